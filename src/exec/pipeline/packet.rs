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
//! Packets: bound operator executions and their merge sets.
//!
//! Responsibilities:
//! - Binds an operator type, its parameters and input packets, an output buffer and
//!   an output filter into one unit of work.
//! - Tracks the merge set: sibling packets requesting identical work that will be fed
//!   from a single execution.
//!
//! Key exported interfaces:
//! - Types: `Packet`, `PacketPayload`.
//!
//! Equivalence of merged packets is established by the caller. `merge` trusts it;
//! `try_merge` checks operator type and the caller-supplied merge signature, and
//! refuses two packets of the same query.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::common::error::{EngineError, EngineResult};
use crate::common::types::{CpuId, StageKind};
use crate::exec::functors::{Aggregator, Joiner, KeyExtractor, TupleComparator, TupleFilter};
use crate::exec::operators::scan::TupleSource;
use crate::exec::pipeline::schedule::policy::QueryState;
use crate::exec::pipeline::tuple_buffer::TupleBuffer;
use crate::qpipe_logging::{debug, trace};

/// Operator parameters and input packets. The variant decides the packet's `StageKind`.
pub enum PacketPayload {
    Scan {
        source: Arc<dyn TupleSource>,
    },
    /// Group-by-break aggregation; `input` must already be ordered by the key.
    Aggregate {
        input: Arc<Packet>,
        aggregator: Arc<dyn Aggregator>,
        key: Arc<dyn KeyExtractor>,
    },
    Sort {
        input: Arc<Packet>,
        comparator: Arc<dyn TupleComparator>,
    },
    Join {
        outer: Arc<Packet>,
        inner: Arc<Packet>,
        joiner: Arc<dyn Joiner>,
    },
}

impl PacketPayload {
    pub fn kind(&self) -> StageKind {
        match self {
            PacketPayload::Scan { .. } => StageKind::Scan,
            PacketPayload::Aggregate { .. } => StageKind::Aggregate,
            PacketPayload::Sort { .. } => StageKind::Sort,
            PacketPayload::Join { .. } => StageKind::Join,
        }
    }

    pub fn inputs(&self) -> Vec<&Arc<Packet>> {
        match self {
            PacketPayload::Scan { .. } => Vec::new(),
            PacketPayload::Aggregate { input, .. } | PacketPayload::Sort { input, .. } => {
                vec![input]
            }
            PacketPayload::Join { outer, inner, .. } => vec![outer, inner],
        }
    }
}

struct MergeState {
    mergeable: bool,
    /// Siblings in arrival order. The owning packet is implicitly the first member.
    merged: Vec<Arc<Packet>>,
}

pub struct Packet {
    id: String,
    output: Arc<TupleBuffer>,
    filter: Arc<dyn TupleFilter>,
    payload: PacketPayload,
    signature: Option<String>,
    merge: Mutex<MergeState>,
    cpu_bind: Mutex<Option<CpuId>>,
    query_state: Mutex<Option<QueryState>>,
}

impl Packet {
    /// A new packet whose merge set holds only itself.
    pub fn create(
        id: impl Into<String>,
        output: Arc<TupleBuffer>,
        filter: Arc<dyn TupleFilter>,
        payload: PacketPayload,
        mergeable: bool,
    ) -> Self {
        let id = id.into();
        debug!("created packet {} ({})", id, payload.kind());
        Self {
            id,
            output,
            filter,
            payload,
            signature: None,
            merge: Mutex::new(MergeState {
                mergeable,
                merged: Vec::new(),
            }),
            cpu_bind: Mutex::new(None),
            query_state: Mutex::new(None),
        }
    }

    /// Equivalence key for enqueue-time sharing. Packets with equal kind and
    /// signature must request identical computation.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StageKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &PacketPayload {
        &self.payload
    }

    pub fn output_buffer(&self) -> &Arc<TupleBuffer> {
        &self.output
    }

    pub fn filter(&self) -> &Arc<dyn TupleFilter> {
        &self.filter
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn is_mergeable(&self) -> bool {
        self.merge.lock().expect("packet merge lock").mergeable
    }

    /// Closes the merge window. Called when execution starts, so a late arrival
    /// cannot join and miss output that was already produced.
    pub fn set_not_mergeable(&self) {
        self.merge.lock().expect("packet merge lock").mergeable = false;
    }

    /// Adds `other` to this packet's merge set without any compatibility check.
    pub fn merge(&self, other: Arc<Packet>) {
        debug!("adding packet {} to merge set of {}", other.id, self.id);
        self.merge
            .lock()
            .expect("packet merge lock")
            .merged
            .push(other);
    }

    /// Checked merge used by stage containers.
    ///
    /// Fails with `NotMergeable` once this packet started executing, and with
    /// `MergeProtocolViolation` when the two packets do not advertise the same work
    /// or were dispatched under the same query.
    pub fn try_merge(&self, other: Arc<Packet>) -> EngineResult<()> {
        if std::ptr::eq(self, Arc::as_ptr(&other)) {
            return Err(EngineError::MergeProtocolViolation(format!(
                "packet {} merged into itself",
                self.id
            )));
        }
        if self.kind() != other.kind() {
            return Err(EngineError::MergeProtocolViolation(format!(
                "{} packet {} cannot absorb {} packet {}",
                self.kind(),
                self.id,
                other.kind(),
                other.id
            )));
        }
        match (self.signature(), other.signature()) {
            (Some(a), Some(b)) if a == b => {}
            _ => {
                return Err(EngineError::MergeProtocolViolation(format!(
                    "packets {} and {} have different merge signatures",
                    self.id, other.id
                )));
            }
        }
        if other.merged_count() > 0 {
            return Err(EngineError::MergeProtocolViolation(format!(
                "packet {} already owns a merge set",
                other.id
            )));
        }
        // One query may read both packets from a single consumer thread, one after
        // the other; a shared execution would then block on the unread buffer.
        if let (Some(a), Some(b)) = (self.query_state(), other.query_state())
            && a.id() == b.id()
        {
            return Err(EngineError::MergeProtocolViolation(format!(
                "packets {} and {} belong to the same query {}",
                self.id,
                other.id,
                a.id()
            )));
        }

        let mut state = self.merge.lock().expect("packet merge lock");
        if !state.mergeable {
            return Err(EngineError::NotMergeable(self.id.clone()));
        }
        debug!("adding packet {} to merge set of {}", other.id, self.id);
        state.merged.push(other);
        Ok(())
    }

    /// This packet followed by every merged sibling.
    pub fn merge_set(self: &Arc<Self>) -> Vec<Arc<Packet>> {
        let state = self.merge.lock().expect("packet merge lock");
        let mut members = Vec::with_capacity(state.merged.len() + 1);
        members.push(Arc::clone(self));
        members.extend(state.merged.iter().cloned());
        members
    }

    /// Number of siblings merged into this packet.
    pub fn merged_count(&self) -> usize {
        self.merge.lock().expect("packet merge lock").merged.len()
    }

    pub fn cpu_bind(&self) -> Option<CpuId> {
        *self.cpu_bind.lock().expect("packet cpu lock")
    }

    pub(crate) fn set_cpu_bind(&self, cpu: Option<CpuId>) {
        *self.cpu_bind.lock().expect("packet cpu lock") = cpu;
    }

    /// Query state the packet was dispatched under.
    pub fn query_state(&self) -> Option<QueryState> {
        self.query_state
            .lock()
            .expect("packet query state lock")
            .clone()
    }

    pub(crate) fn set_query_state(&self, qs: &QueryState) {
        *self.query_state.lock().expect("packet query state lock") = Some(qs.clone());
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("signature", &self.signature)
            .field("cpu_bind", &self.cpu_bind())
            .finish()
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        trace!("destroying packet {}", self.id);
    }
}
