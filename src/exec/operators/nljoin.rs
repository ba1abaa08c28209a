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
//! Nested-loop join stage.
//!
//! Responsibilities:
//! - Materializes the inner side, then dispatches and streams the outer side and
//!   emits every combination the joiner accepts, in outer-major order.
//!
//! The outer side is dispatched only after the inner side reached EOF. Each input
//! is then read by this thread while it runs, so a shared execution feeding one of
//! them never waits on a buffer nobody is reading. An empty inner side
//! short-circuits and the outer packet is never dispatched.

use std::sync::Arc;

use crate::common::error::EngineResult;
use crate::common::types::StageKind;
use crate::exec::operators::payload_mismatch;
use crate::exec::pipeline::packet::PacketPayload;
use crate::exec::pipeline::stage::{Stage, StageContext};
use crate::qpipe_logging::debug;

#[derive(Clone, Copy, Debug, Default)]
pub struct NlJoinStage;

impl Stage for NlJoinStage {
    fn name(&self) -> &str {
        StageKind::Join.stage_name()
    }

    fn process_packet(&self, ctx: &mut StageContext) -> EngineResult<()> {
        let (outer, inner, joiner) = match ctx.packet().payload() {
            PacketPayload::Join {
                outer,
                inner,
                joiner,
            } => (Arc::clone(outer), Arc::clone(inner), Arc::clone(joiner)),
            _ => return Err(payload_mismatch(ctx.packet(), StageKind::Join)),
        };

        let inner_rows = ctx.dispatch_input(&inner)?.drain()?;
        debug!(
            "join packet {}: {} inner rows",
            ctx.packet().id(),
            inner_rows.len()
        );
        if inner_rows.is_empty() {
            return Ok(());
        }

        let mut outer_reader = ctx.dispatch_input(&outer)?;
        while let Some(outer_row) = outer_reader.next_tuple()? {
            for inner_row in &inner_rows {
                if let Some(joined) = joiner.join(&outer_row, inner_row) {
                    ctx.output(&joined)?;
                }
            }
        }
        Ok(())
    }
}
