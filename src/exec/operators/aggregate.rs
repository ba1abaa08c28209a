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
//! Group-by-break aggregation over key-ordered input.
//!
//! The input packet must already deliver tuples ordered by the grouping key. One
//! accumulator is kept per execution; a group is finalized and emitted when the
//! key changes and once more at end of input. An input error, or a tuple too short
//! to hold the key, aborts the execution without emitting the group in flight.

use std::sync::Arc;

use crate::common::error::{EngineError, EngineResult};
use crate::common::types::StageKind;
use crate::exec::operators::payload_mismatch;
use crate::exec::pipeline::packet::PacketPayload;
use crate::exec::pipeline::stage::{Stage, StageContext};
use crate::qpipe_logging::debug;

#[derive(Clone, Copy, Debug, Default)]
pub struct AggregateStage;

impl Stage for AggregateStage {
    fn name(&self) -> &str {
        StageKind::Aggregate.stage_name()
    }

    fn process_packet(&self, ctx: &mut StageContext) -> EngineResult<()> {
        let (input, aggregator, key) = match ctx.packet().payload() {
            PacketPayload::Aggregate {
                input,
                aggregator,
                key,
            } => (Arc::clone(input), Arc::clone(aggregator), Arc::clone(key)),
            _ => return Err(payload_mismatch(ctx.packet(), StageKind::Aggregate)),
        };

        let mut reader = ctx.dispatch_input(&input)?;
        let key_size = key.key_size();
        let mut acc = vec![0u8; aggregator.accumulator_size()];
        let mut last_key: Vec<u8> = Vec::with_capacity(key_size);
        let mut first = true;
        let mut groups = 0u64;

        let min_len = key.min_tuple_len();
        while let Some(tuple) = reader.next_tuple()? {
            if tuple.len() < min_len {
                return Err(EngineError::TupleSizeMismatch {
                    expected: min_len,
                    actual: tuple.len(),
                });
            }
            let k = key.extract_key(&tuple);
            if first || k != last_key.as_slice() {
                if !first {
                    ctx.output(&aggregator.finalize(&acc))?;
                    groups += 1;
                }
                aggregator.init(&mut acc, k);
                last_key.clear();
                last_key.extend_from_slice(k);
                first = false;
            }
            aggregator.accumulate(&mut acc, &tuple);
        }

        if !first {
            ctx.output(&aggregator.finalize(&acc))?;
            groups += 1;
        }
        debug!("aggregate packet {}: {} groups", ctx.packet().id(), groups);
        Ok(())
    }
}
