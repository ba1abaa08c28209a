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
//! Process-wide engine bootstrap.
//!
//! Builds a dispatcher from configuration, registers one container per operator
//! type, and manages the global instance behind a single lock with explicit
//! init and teardown.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::common::app_config::QPipeConfig;
use crate::common::error::{EngineError, EngineResult};
use crate::common::types::StageKind;
use crate::exec::operators::{AggregateStage, NlJoinStage, ScanStage, SortStage};
use crate::exec::pipeline::dispatcher::Dispatcher;
use crate::exec::pipeline::schedule::build_policy;
use crate::exec::pipeline::stage::Stage;
use crate::exec::pipeline::stage_container::StageContainer;
use crate::qpipe_logging::info;

static GLOBAL_DISPATCHER: Mutex<Option<Arc<Dispatcher>>> = Mutex::new(None);

fn default_stage(kind: StageKind) -> Arc<dyn Stage> {
    match kind {
        StageKind::Scan => Arc::new(ScanStage),
        StageKind::Aggregate => Arc::new(AggregateStage),
        StageKind::Sort => Arc::new(SortStage),
        StageKind::Join => Arc::new(NlJoinStage),
    }
}

fn configured_threads(cfg: &QPipeConfig, kind: StageKind) -> usize {
    match kind {
        StageKind::Scan => cfg.stages.actual_scan_threads(),
        StageKind::Aggregate => cfg.stages.actual_aggregate_threads(),
        StageKind::Sort => cfg.stages.actual_sort_threads(),
        StageKind::Join => cfg.stages.actual_join_threads(),
    }
}

/// A dispatcher with every built-in stage registered and running.
pub fn build_dispatcher(cfg: &QPipeConfig) -> Result<Arc<Dispatcher>> {
    let policy = build_policy(&cfg.scheduler).context("build scheduling policy")?;
    let dispatcher = Dispatcher::new(policy);
    for kind in StageKind::ALL {
        let container = StageContainer::new(
            kind.stage_name(),
            default_stage(kind),
            configured_threads(cfg, kind),
        );
        dispatcher
            .register_stage_container(kind, Arc::new(container))
            .with_context(|| format!("register {} stage", kind))?;
    }
    Ok(dispatcher)
}

/// Installs the global dispatcher. Returns the existing one if already initialized.
pub fn init_global(cfg: &QPipeConfig) -> Result<Arc<Dispatcher>> {
    let mut guard = GLOBAL_DISPATCHER.lock().expect("global dispatcher lock");
    if let Some(existing) = guard.as_ref() {
        return Ok(Arc::clone(existing));
    }
    let dispatcher = build_dispatcher(cfg)?;
    *guard = Some(Arc::clone(&dispatcher));
    info!("global dispatcher initialized");
    Ok(dispatcher)
}

pub fn global() -> EngineResult<Arc<Dispatcher>> {
    GLOBAL_DISPATCHER
        .lock()
        .expect("global dispatcher lock")
        .clone()
        .ok_or(EngineError::DispatcherGone)
}

/// Removes the global dispatcher and stops its containers. No-op if not initialized.
pub fn shutdown_global() {
    let dispatcher = GLOBAL_DISPATCHER
        .lock()
        .expect("global dispatcher lock")
        .take();
    if let Some(dispatcher) = dispatcher {
        dispatcher.shutdown();
        info!("global dispatcher shut down");
    }
}
