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
//! In-memory sort stage.
//!
//! Materializes the whole input, orders it with the packet's comparator and
//! emits it. Ties keep their input order.

use std::sync::Arc;

use crate::common::error::EngineResult;
use crate::common::types::StageKind;
use crate::exec::operators::payload_mismatch;
use crate::exec::pipeline::packet::PacketPayload;
use crate::exec::pipeline::stage::{Stage, StageContext};
use crate::qpipe_logging::debug;

#[derive(Clone, Copy, Debug, Default)]
pub struct SortStage;

impl Stage for SortStage {
    fn name(&self) -> &str {
        StageKind::Sort.stage_name()
    }

    fn process_packet(&self, ctx: &mut StageContext) -> EngineResult<()> {
        let (input, comparator) = match ctx.packet().payload() {
            PacketPayload::Sort { input, comparator } => {
                (Arc::clone(input), Arc::clone(comparator))
            }
            _ => return Err(payload_mismatch(ctx.packet(), StageKind::Sort)),
        };

        let mut rows = {
            let mut reader = ctx.dispatch_input(&input)?;
            reader.drain()?
        };
        rows.sort_by(|a, b| comparator.compare(a, b));
        debug!("sort packet {}: {} rows", ctx.packet().id(), rows.len());

        for row in &rows {
            ctx.output(row)?;
        }
        Ok(())
    }
}
