// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;
use std::ops::Deref;

use bytes::Bytes;

/// Fixed-layout binary record moved between stages.
///
/// The attribute layout is agreed between a producer and its consumers; the
/// engine only moves and counts bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Tuple(Bytes);

impl Tuple {
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }

    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Tuple {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Tuple {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Tuple {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<Bytes> for Tuple {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

/// Logical CPU identifier handed out by a scheduling policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub usize);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Operator-type tag used by the dispatcher to route packets to a stage container.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StageKind {
    Scan,
    Aggregate,
    Sort,
    Join,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Scan,
        StageKind::Aggregate,
        StageKind::Sort,
        StageKind::Join,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Scan => "SCAN",
            StageKind::Aggregate => "AGGREGATE",
            StageKind::Sort => "SORT",
            StageKind::Join => "JOIN",
        }
    }

    /// Default container name, e.g. `AGGREGATE_STAGE`.
    pub fn stage_name(self) -> &'static str {
        match self {
            StageKind::Scan => "SCAN_STAGE",
            StageKind::Aggregate => "AGGREGATE_STAGE",
            StageKind::Sort => "SORT_STAGE",
            StageKind::Join => "JOIN_STAGE",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
