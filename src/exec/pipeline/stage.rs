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
//! Stage contract and the per-execution context handed to stage code.
//!
//! Responsibilities:
//! - Defines `Stage`, the operator-specific processing routine run by stage workers.
//! - `StageContext` fans each produced tuple out to every live member of the
//!   packet's merge set, through that member's own filter.
//! - Dispatches input packets under the parent's query state and wraps their
//!   buffers in readers that close on drop.
//!
//! Key exported interfaces:
//! - Traits: `Stage`.
//! - Types: `StageContext`.

use std::sync::{Arc, Weak};

use crate::common::error::{EngineError, EngineResult};
use crate::common::types::Tuple;
use crate::exec::pipeline::dispatcher::Dispatcher;
use crate::exec::pipeline::packet::Packet;
use crate::exec::pipeline::schedule::QueryState;
use crate::exec::pipeline::tuple_buffer::BufferReader;
use crate::qpipe_logging::{debug, warn};

/// Operator-specific work run by a stage container's workers.
///
/// Implementations produce tuples with `StageContext::output` and return once the
/// operator has nothing left to emit. Returning `Err(ConsumerGone)` means every
/// consumer went away and is treated as a normal stop.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn process_packet(&self, ctx: &mut StageContext) -> EngineResult<()>;
}

pub struct StageContext {
    packet: Arc<Packet>,
    outputs: Vec<Arc<Packet>>,
    dispatcher: Weak<Dispatcher>,
    query_state: QueryState,
    tuples_out: u64,
}

impl StageContext {
    pub(crate) fn new(
        packet: Arc<Packet>,
        outputs: Vec<Arc<Packet>>,
        dispatcher: Weak<Dispatcher>,
        query_state: QueryState,
    ) -> Self {
        Self {
            packet,
            outputs,
            dispatcher,
            query_state,
            tuples_out: 0,
        }
    }

    /// The packet that owns this execution (first member of the merge set).
    pub fn packet(&self) -> &Arc<Packet> {
        &self.packet
    }

    pub fn query_state(&self) -> &QueryState {
        &self.query_state
    }

    /// Members still accepting output.
    pub fn live_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Tuples handed to `output` so far, before per-member filtering.
    pub fn tuples_out(&self) -> u64 {
        self.tuples_out
    }

    /// Sends `input` to its stage and returns a reader over its output buffer.
    ///
    /// Dropping the reader closes the buffer, which cancels the producer.
    pub fn dispatch_input(&self, input: &Arc<Packet>) -> EngineResult<BufferReader> {
        let dispatcher = self.dispatcher.upgrade().ok_or(EngineError::DispatcherGone)?;
        let reader = BufferReader::new(Arc::clone(input.output_buffer()));
        dispatcher.dispatch_input(input, &self.query_state)?;
        Ok(reader)
    }

    /// Delivers one tuple to every live member of the merge set.
    ///
    /// Each member applies its own selection and projection. A member whose
    /// consumer closed its buffer is dropped from the set; once none remain the
    /// call fails with `ConsumerGone` so the stage can stop early.
    pub fn output(&mut self, tuple: &Tuple) -> EngineResult<()> {
        if self.outputs.is_empty() {
            return Err(EngineError::ConsumerGone);
        }
        self.tuples_out += 1;

        let mut idx = 0;
        while idx < self.outputs.len() {
            let member = &self.outputs[idx];
            let filter = member.filter();
            if !filter.select(tuple) {
                idx += 1;
                continue;
            }
            match member.output_buffer().put(filter.project(tuple)) {
                Ok(()) => idx += 1,
                Err(EngineError::ConsumerGone) => {
                    warn!(
                        "packet {}: consumer of {} went away",
                        self.packet.id(),
                        member.id()
                    );
                    self.outputs.remove(idx);
                }
                Err(e) => return Err(e),
            }
        }

        if self.outputs.is_empty() {
            debug!(
                "packet {}: no consumers left after {} tuples",
                self.packet.id(),
                self.tuples_out
            );
            return Err(EngineError::ConsumerGone);
        }
        Ok(())
    }

    /// Finishes every member's output buffer according to `result`.
    ///
    /// Success and consumer cancellation close the buffers (end of stream); any
    /// other error terminates them so consumers observe the failure.
    pub(crate) fn done(self, result: &EngineResult<()>) {
        match result {
            Err(e) if !e.is_cancellation() => {
                debug!(
                    "packet {}: terminating {} outputs",
                    self.packet.id(),
                    self.outputs.len()
                );
                let reason = e.to_string();
                for member in &self.outputs {
                    member.output_buffer().terminate(reason.clone());
                }
            }
            _ => {
                for member in &self.outputs {
                    member.output_buffer().close();
                }
            }
        }
    }
}
