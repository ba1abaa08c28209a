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
//! Bounded single-producer / single-consumer tuple channel.
//!
//! Responsibilities:
//! - Carries fixed-layout tuples from one stage execution to one consumer slot, in
//!   producer write order.
//! - Signals clean end of stream (`close`) and producer failure (`terminate`) to the
//!   consumer, and early consumer exit (`close` from the reading side) to the producer.
//!
//! Key exported interfaces:
//! - Types: `TupleBuffer`, `BufferState`, `BufferReader`.
//!
//! Fan-out to several consumers is done by writing every tuple into one buffer per
//! consumer, never by sharing a buffer between readers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::common::config::tuple_buffer_capacity;
use crate::common::error::{EngineError, EngineResult};
use crate::common::types::Tuple;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferState {
    Open,
    /// Producer finished normally, or the consumer stopped reading.
    Closed,
    /// Producer failed. Buffered tuples are discarded.
    Terminated,
}

#[derive(Debug)]
struct BufferControlBlock {
    queue: VecDeque<Tuple>,
    state: BufferState,
    terminate_reason: Option<String>,
}

pub struct TupleBuffer {
    tuple_size: usize,
    capacity: usize,
    mu: Mutex<BufferControlBlock>,
    not_empty: Condvar,
    not_full: Condvar,
    tuples_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl TupleBuffer {
    /// Buffer sized by `[engine] tuple_buffer_capacity`. `tuple_size == 0` accepts
    /// tuples of any length.
    pub fn new(tuple_size: usize) -> Arc<Self> {
        Self::with_capacity(tuple_size, tuple_buffer_capacity())
    }

    pub fn with_capacity(tuple_size: usize, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            tuple_size,
            capacity: capacity.max(1),
            mu: Mutex::new(BufferControlBlock {
                queue: VecDeque::new(),
                state: BufferState::Open,
                terminate_reason: None,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            tuples_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `tuple`, blocking while the buffer is full.
    ///
    /// Returns `ConsumerGone` once the buffer is no longer open; the producer should
    /// treat that as a request to stop.
    pub fn put(&self, tuple: Tuple) -> EngineResult<()> {
        if self.tuple_size != 0 && tuple.len() != self.tuple_size {
            return Err(EngineError::TupleSizeMismatch {
                expected: self.tuple_size,
                actual: tuple.len(),
            });
        }

        let len = tuple.len() as u64;
        let mut block = self.mu.lock().expect("tuple buffer lock");
        loop {
            if block.state != BufferState::Open {
                return Err(EngineError::ConsumerGone);
            }
            if block.queue.len() < self.capacity {
                break;
            }
            block = self
                .not_full
                .wait(block)
                .expect("tuple buffer condvar wait");
        }
        block.queue.push_back(tuple);
        drop(block);

        self.tuples_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(len, Ordering::Relaxed);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Next tuple in write order; `Ok(None)` is end of stream.
    ///
    /// Blocks while the buffer is open and empty. A terminated buffer reports
    /// `ProducerTerminated` even if tuples were still queued.
    pub fn get(&self) -> EngineResult<Option<Tuple>> {
        let mut block = self.mu.lock().expect("tuple buffer lock");
        loop {
            if block.state == BufferState::Terminated {
                return Err(EngineError::ProducerTerminated(
                    block
                        .terminate_reason
                        .clone()
                        .unwrap_or_else(|| "terminated".to_string()),
                ));
            }
            if let Some(tuple) = block.queue.pop_front() {
                drop(block);
                self.not_full.notify_all();
                return Ok(Some(tuple));
            }
            if block.state == BufferState::Closed {
                return Ok(None);
            }
            block = self
                .not_empty
                .wait(block)
                .expect("tuple buffer condvar wait");
        }
    }

    /// Idempotent. Has no effect on a terminated buffer.
    pub fn close(&self) {
        let mut block = self.mu.lock().expect("tuple buffer lock");
        if block.state == BufferState::Open {
            block.state = BufferState::Closed;
        }
        drop(block);
        self.wake_all();
    }

    /// Idempotent; the first reason wins.
    pub fn terminate(&self, reason: impl Into<String>) {
        let mut block = self.mu.lock().expect("tuple buffer lock");
        if block.state != BufferState::Terminated {
            block.state = BufferState::Terminated;
            block.terminate_reason = Some(reason.into());
            block.queue.clear();
        }
        drop(block);
        self.wake_all();
    }

    fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn state(&self) -> BufferState {
        self.mu.lock().expect("tuple buffer lock").state
    }

    pub fn is_open(&self) -> bool {
        self.state() == BufferState::Open
    }

    /// Tuples currently queued.
    pub fn len(&self) -> usize {
        self.mu.lock().expect("tuple buffer lock").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tuples_written(&self) -> u64 {
        self.tuples_written.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TupleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleBuffer")
            .field("tuple_size", &self.tuple_size)
            .field("capacity", &self.capacity)
            .field("state", &self.state())
            .finish()
    }
}

/// Consumer-side handle that closes its buffer when dropped.
///
/// A stage that returns early (error or downstream cancellation) drops its readers,
/// which tells every upstream producer to stop.
pub struct BufferReader {
    buffer: Arc<TupleBuffer>,
}

impl BufferReader {
    pub fn new(buffer: Arc<TupleBuffer>) -> Self {
        Self { buffer }
    }

    pub fn next_tuple(&mut self) -> EngineResult<Option<Tuple>> {
        self.buffer.get()
    }

    /// Reads the whole stream into memory.
    pub fn drain(&mut self) -> EngineResult<Vec<Tuple>> {
        let mut out = Vec::new();
        while let Some(tuple) = self.next_tuple()? {
            out.push(tuple);
        }
        Ok(out)
    }

    pub fn buffer(&self) -> &Arc<TupleBuffer> {
        &self.buffer
    }
}

impl Iterator for BufferReader {
    type Item = EngineResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tuple().transpose()
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        self.buffer.close();
    }
}
