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
//! Scan stage and the tuple sources it drives.
//!
//! Responsibilities:
//! - Defines `TupleSource`, the storage-side primitive that yields raw tuples.
//! - `ScanStage` feeds every source tuple to the packet's merge set and stops the
//!   source as soon as no consumer is left.
//!
//! Key exported interfaces:
//! - Traits: `TupleSource`.
//! - Types: `ScanStage`, `VecSource`, `FailingSource`.

use std::sync::Arc;

use crate::common::error::{EngineError, EngineResult};
use crate::common::types::{StageKind, Tuple};
use crate::exec::operators::payload_mismatch;
use crate::exec::pipeline::packet::PacketPayload;
use crate::exec::pipeline::stage::{Stage, StageContext};
use crate::qpipe_logging::debug;

/// Yields raw tuples to `emit` until exhausted.
///
/// An error returned by `emit` must stop the scan and be returned unchanged, so
/// `ConsumerGone` reaches the stage as a cancellation.
pub trait TupleSource: Send + Sync {
    fn scan(&self, emit: &mut dyn FnMut(Tuple) -> EngineResult<()>) -> EngineResult<()>;
}

/// In-memory table.
#[derive(Clone, Debug, Default)]
pub struct VecSource {
    rows: Vec<Tuple>,
}

impl VecSource {
    pub fn new(rows: Vec<Vec<u8>>) -> Self {
        Self {
            rows: rows.into_iter().map(Tuple::from_vec).collect(),
        }
    }

    pub fn from_tuples(rows: Vec<Tuple>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl TupleSource for VecSource {
    fn scan(&self, emit: &mut dyn FnMut(Tuple) -> EngineResult<()>) -> EngineResult<()> {
        for row in &self.rows {
            emit(row.clone())?;
        }
        Ok(())
    }
}

/// Emits `rows`, then fails with `message`. Models a storage read error.
#[derive(Clone, Debug)]
pub struct FailingSource {
    rows: Vec<Tuple>,
    message: String,
}

impl FailingSource {
    pub fn new(rows: Vec<Vec<u8>>, message: impl Into<String>) -> Self {
        Self {
            rows: rows.into_iter().map(Tuple::from_vec).collect(),
            message: message.into(),
        }
    }
}

impl TupleSource for FailingSource {
    fn scan(&self, emit: &mut dyn FnMut(Tuple) -> EngineResult<()>) -> EngineResult<()> {
        for row in &self.rows {
            emit(row.clone())?;
        }
        Err(EngineError::Stage(self.message.clone()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScanStage;

impl Stage for ScanStage {
    fn name(&self) -> &str {
        StageKind::Scan.stage_name()
    }

    fn process_packet(&self, ctx: &mut StageContext) -> EngineResult<()> {
        let source = match ctx.packet().payload() {
            PacketPayload::Scan { source } => Arc::clone(source),
            _ => return Err(payload_mismatch(ctx.packet(), StageKind::Scan)),
        };
        let result = source.scan(&mut |tuple: Tuple| ctx.output(&tuple));
        debug!(
            "scan packet {}: {} tuples emitted",
            ctx.packet().id(),
            ctx.tuples_out()
        );
        result
    }
}
