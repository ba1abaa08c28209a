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
//! Dispatcher: routes packets to the stage container registered for their type.
//!
//! Responsibilities:
//! - Owns the registry from `StageKind` to `StageContainer` and starts containers
//!   as they are registered.
//! - Asks the scheduling policy for a CPU, stamps it on the packet, and enqueues.
//! - Terminates a packet's output buffer when it cannot be enqueued, so readers
//!   never wait on work that will not run.
//! - Shuts down in two phases: refuse new queries and let in-flight plans finish,
//!   then stop and join the workers.
//!
//! Key exported interfaces:
//! - Types: `Dispatcher`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::common::error::{EngineError, EngineResult};
use crate::common::types::StageKind;
use crate::exec::pipeline::packet::Packet;
use crate::exec::pipeline::schedule::{QueryState, SchedulingPolicy};
use crate::exec::pipeline::stage_container::StageContainer;
use crate::qpipe_logging::{debug, error, info};

const QUIESCE_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Dispatcher {
    containers: Mutex<HashMap<StageKind, Arc<StageContainer>>>,
    policy: Arc<dyn SchedulingPolicy>,
}

impl Dispatcher {
    pub fn new(policy: Arc<dyn SchedulingPolicy>) -> Arc<Self> {
        info!("dispatcher created with {} scheduling policy", policy.name());
        Arc::new(Self {
            containers: Mutex::new(HashMap::new()),
            policy,
        })
    }

    pub fn policy(&self) -> &Arc<dyn SchedulingPolicy> {
        &self.policy
    }

    /// Registers `container` as the executor for `kind` and starts its workers.
    pub fn register_stage_container(
        self: &Arc<Self>,
        kind: StageKind,
        container: Arc<StageContainer>,
    ) -> EngineResult<()> {
        let mut containers = self.containers.lock().expect("dispatcher registry lock");
        if containers.contains_key(&kind) {
            return Err(EngineError::DuplicateStageContainer(kind));
        }
        container.start(Arc::downgrade(self));
        info!(
            "registered {} for {} with {} workers",
            container.name(),
            kind,
            container.threads()
        );
        containers.insert(kind, container);
        Ok(())
    }

    pub fn container(&self, kind: StageKind) -> Option<Arc<StageContainer>> {
        self.containers
            .lock()
            .expect("dispatcher registry lock")
            .get(&kind)
            .cloned()
    }

    pub fn query_state_create(&self) -> QueryState {
        let qs = self.policy.query_state_create();
        debug!("query {} created", qs.id());
        qs
    }

    pub fn query_state_destroy(&self, qs: QueryState) {
        self.policy.query_state_destroy(qs);
    }

    /// Hands `packet` to its stage. Does not wait for execution; the caller reads
    /// the packet's output buffer to observe the result.
    pub fn dispatch_packet(&self, packet: &Arc<Packet>, qs: &QueryState) -> EngineResult<()> {
        self.route(packet, qs, false)
    }

    /// Dispatch path for inputs of a running execution. Unlike `dispatch_packet`
    /// it keeps working while the dispatcher shuts down.
    pub(crate) fn dispatch_input(
        &self,
        packet: &Arc<Packet>,
        qs: &QueryState,
    ) -> EngineResult<()> {
        self.route(packet, qs, true)
    }

    fn route(&self, packet: &Arc<Packet>, qs: &QueryState, input: bool) -> EngineResult<()> {
        let kind = packet.kind();
        let Some(container) = self.container(kind) else {
            error!(
                "no stage container registered for {} (packet {})",
                kind,
                packet.id()
            );
            let err = EngineError::UnregisteredOperatorType(kind);
            packet.output_buffer().terminate(err.to_string());
            return Err(err);
        };

        packet.set_query_state(qs);
        packet.set_cpu_bind(self.policy.assign_packet_to_cpu(packet, qs));
        debug!(
            "dispatching packet {} to {} (query {}, {:?})",
            packet.id(),
            container.name(),
            qs.id(),
            packet.cpu_bind()
        );

        let enqueued = if input {
            container.enqueue_input(Arc::clone(packet))
        } else {
            container.enqueue(Arc::clone(packet))
        };
        if let Err(e) = enqueued {
            error!("failed to enqueue packet {}: {}", packet.id(), e);
            packet.output_buffer().terminate(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Refuses new queries, waits until every queued or running packet is done,
    /// then stops every container and joins its workers.
    ///
    /// Plans already dispatched run to completion, so their roots must still be
    /// drained or dropped for this to return.
    pub fn shutdown(&self) {
        let containers: Vec<_> = self
            .containers
            .lock()
            .expect("dispatcher registry lock")
            .values()
            .cloned()
            .collect();
        for container in &containers {
            container.seal();
        }
        wait_quiescent(&containers);
        for container in &containers {
            container.stop();
        }
        for container in &containers {
            container.join();
        }
        info!("dispatcher shut down ({} containers)", containers.len());
    }
}

/// Returns once a pass over all containers finds each one idle and a second
/// pass sees no packet admitted since. Work only moves between containers by
/// admission, so nothing can slip past both passes.
fn wait_quiescent(containers: &[Arc<StageContainer>]) {
    loop {
        let first: Vec<(bool, u64)> = containers.iter().map(|c| c.idle_snapshot()).collect();
        if first.iter().all(|(idle, _)| *idle) {
            let unchanged = containers
                .iter()
                .zip(&first)
                .all(|(c, (_, admitted))| c.idle_snapshot().1 == *admitted);
            if unchanged {
                return;
            }
        }
        thread::sleep(QUIESCE_POLL_INTERVAL);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<StageKind> = self
            .containers
            .lock()
            .expect("dispatcher registry lock")
            .keys()
            .copied()
            .collect();
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy.name())
            .field("stages", &kinds)
            .finish()
    }
}
