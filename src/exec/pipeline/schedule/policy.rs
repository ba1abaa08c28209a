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
//! CPU assignment policies consulted by the dispatcher.
//!
//! Assignments are advisory: the chosen CPU is recorded on the packet and in logs,
//! and the stage worker that picks the packet up is not pinned.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};

use crate::common::app_config::{PolicyKind, SchedulerConfig};
use crate::common::config::available_cpus;
use crate::common::types::CpuId;
use crate::exec::pipeline::packet::Packet;
use crate::qpipe_logging::debug;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Per-query scheduling context, handed back to the policy on every dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryState {
    id: u64,
    cpu: Option<CpuId>,
}

impl QueryState {
    pub(crate) fn new(cpu: Option<CpuId>) -> Self {
        Self {
            id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
            cpu,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// CPU reserved for the whole query, if the policy reserves one.
    pub fn cpu(&self) -> Option<CpuId> {
        self.cpu
    }
}

/// Decides which CPU a packet's work should run on.
pub trait SchedulingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn query_state_create(&self) -> QueryState;

    fn query_state_destroy(&self, qs: QueryState) {
        debug!("{} policy: query {} finished", self.name(), qs.id());
    }

    /// `None` leaves placement to the operating system.
    fn assign_packet_to_cpu(&self, packet: &Packet, qs: &QueryState) -> Option<CpuId>;
}

/// The CPUs a policy may hand out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuSet {
    cpus: Vec<CpuId>,
}

impl CpuSet {
    pub fn new(cpus: impl IntoIterator<Item = usize>) -> Result<Self> {
        let cpus: Vec<CpuId> = cpus.into_iter().map(CpuId).collect();
        if cpus.is_empty() {
            bail!("cpu set must not be empty");
        }
        Ok(Self { cpus })
    }

    /// Every CPU visible to the process.
    pub fn detect() -> Self {
        Self {
            cpus: (0..available_cpus()).map(CpuId).collect(),
        }
    }

    pub fn from_config(cfg: &SchedulerConfig) -> Result<Self> {
        if cfg.cpus.is_empty() {
            Ok(Self::detect())
        } else {
            Self::new(cfg.cpus.iter().copied())
        }
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn get(&self, idx: usize) -> CpuId {
        self.cpus[idx % self.cpus.len()]
    }
}

/// Never binds; every packet runs wherever the OS puts its worker.
#[derive(Debug, Default)]
pub struct OsPolicy;

impl SchedulingPolicy for OsPolicy {
    fn name(&self) -> &'static str {
        "os"
    }

    fn query_state_create(&self) -> QueryState {
        QueryState::new(None)
    }

    fn assign_packet_to_cpu(&self, _packet: &Packet, _qs: &QueryState) -> Option<CpuId> {
        None
    }
}

/// Cycles through the CPU set, one packet at a time.
///
/// The cursor is shared by all queries, so N consecutive assignments over C CPUs
/// give every CPU either floor(N/C) or ceil(N/C) packets.
#[derive(Debug)]
pub struct RoundRobinCpuPolicy {
    cpus: CpuSet,
    next: Mutex<usize>,
}

impl RoundRobinCpuPolicy {
    pub fn new(cpus: CpuSet) -> Self {
        Self {
            cpus,
            next: Mutex::new(0),
        }
    }

    pub fn cpus(&self) -> &CpuSet {
        &self.cpus
    }
}

impl SchedulingPolicy for RoundRobinCpuPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn query_state_create(&self) -> QueryState {
        QueryState::new(None)
    }

    fn assign_packet_to_cpu(&self, packet: &Packet, _qs: &QueryState) -> Option<CpuId> {
        let mut next = self.next.lock().expect("round robin cursor lock");
        let cpu = self.cpus.get(*next);
        *next = (*next + 1) % self.cpus.len();
        debug!("round robin: packet {} -> {}", packet.id(), cpu);
        Some(cpu)
    }
}

/// Pins every packet of a query to one CPU, rotating between queries.
#[derive(Debug)]
pub struct QueryCpuPolicy {
    cpus: CpuSet,
    next: Mutex<usize>,
}

impl QueryCpuPolicy {
    pub fn new(cpus: CpuSet) -> Self {
        Self {
            cpus,
            next: Mutex::new(0),
        }
    }
}

impl SchedulingPolicy for QueryCpuPolicy {
    fn name(&self) -> &'static str {
        "query_cpu"
    }

    fn query_state_create(&self) -> QueryState {
        let mut next = self.next.lock().expect("query cpu cursor lock");
        let cpu = self.cpus.get(*next);
        *next = (*next + 1) % self.cpus.len();
        QueryState::new(Some(cpu))
    }

    fn assign_packet_to_cpu(&self, _packet: &Packet, qs: &QueryState) -> Option<CpuId> {
        qs.cpu()
    }
}

/// Instantiates the policy named by the `[scheduler]` config section.
pub fn build_policy(cfg: &SchedulerConfig) -> Result<Arc<dyn SchedulingPolicy>> {
    let policy: Arc<dyn SchedulingPolicy> = match cfg.policy_kind()? {
        PolicyKind::Os => Arc::new(OsPolicy),
        PolicyKind::RoundRobin => Arc::new(RoundRobinCpuPolicy::new(CpuSet::from_config(cfg)?)),
        PolicyKind::QueryCpu => Arc::new(QueryCpuPolicy::new(CpuSet::from_config(cfg)?)),
    };
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::functors::PassThroughFilter;
    use crate::exec::operators::scan::VecSource;
    use crate::exec::pipeline::packet::PacketPayload;
    use crate::exec::pipeline::tuple_buffer::TupleBuffer;

    fn packet(id: &str) -> Packet {
        Packet::create(
            id,
            TupleBuffer::with_capacity(0, 1),
            Arc::new(PassThroughFilter),
            PacketPayload::Scan {
                source: Arc::new(VecSource::new(Vec::new())),
            },
            false,
        )
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let policy = RoundRobinCpuPolicy::new(CpuSet::new([0, 1, 2]).unwrap());
        let qs = policy.query_state_create();
        let p = packet("p");
        let got: Vec<_> = (0..7)
            .map(|_| policy.assign_packet_to_cpu(&p, &qs).unwrap().0)
            .collect();
        assert_eq!(got, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn round_robin_cursor_is_shared_across_queries() {
        let policy = RoundRobinCpuPolicy::new(CpuSet::new([4, 5]).unwrap());
        let q1 = policy.query_state_create();
        let q2 = policy.query_state_create();
        let p = packet("p");
        assert_eq!(policy.assign_packet_to_cpu(&p, &q1), Some(CpuId(4)));
        assert_eq!(policy.assign_packet_to_cpu(&p, &q2), Some(CpuId(5)));
        policy.query_state_destroy(q1);
        assert_eq!(policy.assign_packet_to_cpu(&p, &q2), Some(CpuId(4)));
    }

    #[test]
    fn round_robin_spreads_evenly_over_mixed_queries() {
        let policy = RoundRobinCpuPolicy::new(CpuSet::new([0, 1, 2]).unwrap());
        let queries = [policy.query_state_create(), policy.query_state_create()];
        let p = packet("p");
        let mut counts = [0usize; 3];
        for i in 0..10 {
            let cpu = policy.assign_packet_to_cpu(&p, &queries[i % 2]).unwrap();
            counts[cpu.0] += 1;
        }
        assert!(counts.iter().all(|&c| c == 3 || c == 4));
        assert_eq!(counts.iter().sum::<usize>(), 10);
    }

    #[test]
    fn query_cpu_keeps_a_query_on_one_cpu() {
        let policy = QueryCpuPolicy::new(CpuSet::new([0, 1]).unwrap());
        let q1 = policy.query_state_create();
        let q2 = policy.query_state_create();
        let p = packet("p");
        assert_eq!(policy.assign_packet_to_cpu(&p, &q1), Some(CpuId(0)));
        assert_eq!(policy.assign_packet_to_cpu(&p, &q1), Some(CpuId(0)));
        assert_eq!(policy.assign_packet_to_cpu(&p, &q2), Some(CpuId(1)));
        assert_ne!(q1.id(), q2.id());
    }

    #[test]
    fn os_policy_never_binds() {
        let policy = OsPolicy;
        let qs = policy.query_state_create();
        assert_eq!(policy.assign_packet_to_cpu(&packet("p"), &qs), None);
    }

    #[test]
    fn empty_cpu_set_is_rejected() {
        assert!(CpuSet::new(Vec::new()).is_err());
    }
}
