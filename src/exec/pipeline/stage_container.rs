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
//! Stage containers: a packet queue plus the worker threads that drain it.
//!
//! Responsibilities:
//! - Queues packets of one operator type and runs them on a fixed set of workers.
//! - Shares work at enqueue time by merging a new packet into a queued packet that
//!   advertises the same merge signature.
//! - Closes the merge window of a packet before its execution starts.
//! - Exposes a small control state machine (running, paused, stopped).
//! - Can be sealed for shutdown: new query roots are refused while inputs
//!   dispatched by executions already in flight are still accepted.
//!
//! Key exported interfaces:
//! - Types: `StageContainer`, `WorkerControl`, `ContainerStats`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;

use crate::common::error::{EngineError, EngineResult};
use crate::exec::pipeline::dispatcher::Dispatcher;
use crate::exec::pipeline::packet::Packet;
use crate::exec::pipeline::schedule::QueryState;
use crate::exec::pipeline::stage::{Stage, StageContext};
use crate::qpipe_logging::{debug, error, info};

/// Worker control state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerControl {
    Running,
    /// Workers finish their current packet and then wait for `resume`.
    Paused,
    /// Workers drain whatever is queued and exit; new packets are rejected.
    Stopped,
}

/// Snapshot of a container's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub enqueued: u64,
    pub merged: u64,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct ContainerCounters {
    enqueued: AtomicU64,
    merged: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

struct ContainerQueue {
    packets: VecDeque<Arc<Packet>>,
    control: WorkerControl,
    sealed: bool,
    /// Packets taken by a worker and not yet done.
    active: usize,
}

struct ContainerInner {
    name: String,
    stage: Arc<dyn Stage>,
    queue: Mutex<ContainerQueue>,
    cv: Condvar,
    counters: ContainerCounters,
}

pub struct StageContainer {
    inner: Arc<ContainerInner>,
    threads: usize,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl StageContainer {
    pub fn new(name: impl Into<String>, stage: Arc<dyn Stage>, threads: usize) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                name: name.into(),
                stage,
                queue: Mutex::new(ContainerQueue {
                    packets: VecDeque::new(),
                    control: WorkerControl::Running,
                    sealed: false,
                    active: 0,
                }),
                cv: Condvar::new(),
                counters: ContainerCounters::default(),
            }),
            threads: threads.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Spawns the worker threads. A second call is a no-op.
    pub(crate) fn start(&self, dispatcher: Weak<Dispatcher>) {
        let mut workers = self.workers.lock().expect("stage container workers lock");
        if !workers.is_empty() {
            return;
        }
        for idx in 0..self.threads {
            let inner = Arc::clone(&self.inner);
            let dispatcher = dispatcher.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.inner.name, idx))
                .spawn(move || worker_loop(inner, dispatcher));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(
                    "{}: failed to spawn worker {}: {}",
                    self.inner.name, idx, e
                ),
            }
        }
        info!("{}: started {} workers", self.inner.name, workers.len());
    }

    /// Queues `packet`, or merges it into a queued packet doing identical work.
    pub fn enqueue(&self, packet: Arc<Packet>) -> EngineResult<()> {
        self.admit(packet, false)
    }

    /// Like `enqueue`, for inputs dispatched by a running execution. These are
    /// still accepted once the container is sealed.
    pub(crate) fn enqueue_input(&self, packet: Arc<Packet>) -> EngineResult<()> {
        self.admit(packet, true)
    }

    fn admit(&self, packet: Arc<Packet>, input: bool) -> EngineResult<()> {
        let mut queue = self.inner.queue.lock().expect("stage container queue lock");
        if queue.control == WorkerControl::Stopped || (queue.sealed && !input) {
            return Err(EngineError::StageStopped(self.inner.name.clone()));
        }
        self.inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        if let Some(signature) = packet.signature()
            && packet.is_mergeable()
        {
            for queued in queue.packets.iter() {
                if queued.signature() != Some(signature) {
                    continue;
                }
                if queued.try_merge(Arc::clone(&packet)).is_ok() {
                    self.inner.counters.merged.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "{}: packet {} merged into queued packet {}",
                        self.inner.name,
                        packet.id(),
                        queued.id()
                    );
                    return Ok(());
                }
            }
        }

        debug!("{}: queued packet {}", self.inner.name, packet.id());
        queue.packets.push_back(packet);
        drop(queue);
        self.inner.cv.notify_one();
        Ok(())
    }

    pub fn pause(&self) {
        self.set_control(WorkerControl::Paused);
    }

    pub fn resume(&self) {
        self.set_control(WorkerControl::Running);
    }

    /// Rejects new packets; workers exit once the queue is empty.
    pub fn stop(&self) {
        self.set_control(WorkerControl::Stopped);
    }

    /// Refuses new query roots and lifts a pause so queued work can finish.
    pub(crate) fn seal(&self) {
        let mut queue = self.inner.queue.lock().expect("stage container queue lock");
        queue.sealed = true;
        if queue.control == WorkerControl::Paused {
            queue.control = WorkerControl::Running;
        }
        drop(queue);
        info!("{}: sealed", self.inner.name);
        self.inner.cv.notify_all();
    }

    pub fn is_sealed(&self) -> bool {
        self.inner
            .queue
            .lock()
            .expect("stage container queue lock")
            .sealed
    }

    /// Whether nothing is queued or running, together with the number of packets
    /// admitted so far. Both are read under the queue lock.
    pub(crate) fn idle_snapshot(&self) -> (bool, u64) {
        let queue = self.inner.queue.lock().expect("stage container queue lock");
        (
            queue.packets.is_empty() && queue.active == 0,
            self.inner.counters.enqueued.load(Ordering::Relaxed),
        )
    }

    fn set_control(&self, control: WorkerControl) {
        let mut queue = self.inner.queue.lock().expect("stage container queue lock");
        if queue.control == WorkerControl::Stopped {
            return;
        }
        queue.control = control;
        drop(queue);
        info!("{}: {:?}", self.inner.name, control);
        self.inner.cv.notify_all();
    }

    /// Waits for every worker to exit. Only returns after `stop`.
    pub fn join(&self) {
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .expect("stage container workers lock"),
        );
        for handle in workers {
            if handle.join().is_err() {
                error!("{}: worker exited by panic", self.inner.name);
            }
        }
    }

    pub fn control(&self) -> WorkerControl {
        self.inner.queue.lock().expect("stage container queue lock").control
    }

    /// Packets waiting for a worker (merged siblings are not counted).
    pub fn queue_len(&self) -> usize {
        self.inner
            .queue
            .lock()
            .expect("stage container queue lock")
            .packets
            .len()
    }

    pub fn stats(&self) -> ContainerStats {
        let c = &self.inner.counters;
        ContainerStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            merged: c.merged.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

/// Stops the workers without waiting for them. They drain the queue and exit.
impl Drop for StageContainer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StageContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContainer")
            .field("name", &self.inner.name)
            .field("threads", &self.threads)
            .field("control", &self.control())
            .finish()
    }
}

fn next_packet(inner: &ContainerInner) -> Option<Arc<Packet>> {
    let mut queue = inner.queue.lock().expect("stage container queue lock");
    loop {
        match queue.control {
            WorkerControl::Running => {
                if let Some(packet) = queue.packets.pop_front() {
                    queue.active += 1;
                    return Some(packet);
                }
            }
            WorkerControl::Paused => {}
            WorkerControl::Stopped => {
                let packet = queue.packets.pop_front();
                if packet.is_some() {
                    queue.active += 1;
                }
                return packet;
            }
        }
        queue = inner
            .cv
            .wait(queue)
            .expect("stage container queue condvar wait");
    }
}

fn worker_loop(inner: Arc<ContainerInner>, dispatcher: Weak<Dispatcher>) {
    while let Some(packet) = next_packet(&inner) {
        process_next_packet(&inner, &dispatcher, packet);
        inner
            .queue
            .lock()
            .expect("stage container queue lock")
            .active -= 1;
    }
    debug!("{}: worker exiting", inner.name);
}

fn process_next_packet(
    inner: &ContainerInner,
    dispatcher: &Weak<Dispatcher>,
    packet: Arc<Packet>,
) {
    packet.set_not_mergeable();
    let outputs = packet.merge_set();
    // Packets enqueued directly, bypassing the dispatcher, run under a fresh query.
    let query_state = packet
        .query_state()
        .unwrap_or_else(|| QueryState::new(packet.cpu_bind()));
    debug!(
        "{}: processing packet {} (merge set of {}) on {:?}",
        inner.name,
        packet.id(),
        outputs.len(),
        packet.cpu_bind()
    );

    let mut ctx = StageContext::new(
        Arc::clone(&packet),
        outputs,
        dispatcher.clone(),
        query_state,
    );
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        inner.stage.process_packet(&mut ctx)
    }))
    .unwrap_or_else(|payload| {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Err(EngineError::Stage(format!(
            "panic in stage {}: {msg}",
            inner.stage.name()
        )))
    });

    match &result {
        Ok(()) => {
            inner.counters.processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) if e.is_cancellation() => {
            debug!("{}: packet {} cancelled by its consumers", inner.name, packet.id());
            inner.counters.processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!("{}: packet {} failed: {}", inner.name, packet.id(), e);
            inner.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    debug!(
        "{}: packet {} done after {} tuples",
        inner.name,
        packet.id(),
        ctx.tuples_out()
    );
    ctx.done(&result);
}
