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
//! Concrete stages, one per operator type.
//!
//! Responsibilities:
//! - Implements `Stage` for scan, aggregate, sort and nested-loop join.
//! - Provides in-memory tuple sources for plan construction and tests.

pub mod aggregate;
pub mod nljoin;
pub mod scan;
pub mod sort;

use crate::common::error::EngineError;
use crate::common::types::StageKind;
use crate::exec::pipeline::packet::Packet;

pub use aggregate::AggregateStage;
pub use nljoin::NlJoinStage;
pub use scan::{FailingSource, ScanStage, TupleSource, VecSource};
pub use sort::SortStage;

/// Error for a packet routed to a stage of another operator type.
pub(crate) fn payload_mismatch(packet: &Packet, expected: StageKind) -> EngineError {
    EngineError::PayloadMismatch {
        packet: packet.id().to_string(),
        expected,
    }
}
