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
//! Engine error taxonomy.
//!
//! Classification:
//! - [`EngineError::ConsumerGone`] is a cancellation signal, not a failure. Producers
//!   stop quietly and close their own inputs when they see it.
//! - [`EngineError::ProducerTerminated`] is what a consumer observes after its producer
//!   failed; it must never be confused with a clean end of stream.
//! - [`EngineError::UnregisteredOperatorType`] and [`EngineError::DuplicateStageContainer`]
//!   are configuration errors.
//! - Everything else is an execution failure that terminates the merge set.

use thiserror::Error;

use crate::common::types::StageKind;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Every consumer of a buffer closed it early.
    #[error("consumer closed the buffer")]
    ConsumerGone,

    /// The producer terminated the buffer after an error.
    #[error("producer terminated: {0}")]
    ProducerTerminated(String),

    /// No stage container is registered for the packet's operator type.
    #[error("no stage container registered for operator type {0}")]
    UnregisteredOperatorType(StageKind),

    /// A stage container was already registered for this operator type.
    #[error("stage container already registered for operator type {0}")]
    DuplicateStageContainer(StageKind),

    /// Two packets that do not request identical work were merged.
    #[error("merge protocol violation: {0}")]
    MergeProtocolViolation(String),

    /// The target packet already started executing and no longer accepts siblings.
    #[error("packet {0} is no longer mergeable")]
    NotMergeable(String),

    /// The stage container refuses new work after `stop()`.
    #[error("stage container {0} is stopped")]
    StageStopped(String),

    /// The dispatcher was torn down while a stage still needed it.
    #[error("dispatcher has been shut down")]
    DispatcherGone,

    #[error("tuple size mismatch: expected {expected} bytes, got {actual}")]
    TupleSizeMismatch { expected: usize, actual: usize },

    #[error("packet {packet} does not carry a {expected} payload")]
    PayloadMismatch { packet: String, expected: StageKind },

    /// Operator-local failure (scan error, panic in a stage body, ...).
    #[error("stage error: {0}")]
    Stage(String),
}

impl EngineError {
    /// Whether this outcome should close (rather than terminate) downstream buffers.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::ConsumerGone)
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
