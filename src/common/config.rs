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
use std::sync::OnceLock;

use crate::qpipe_config::{QPipeConfig, config as qpipe_app_config, loaded as loaded_app_config};

const DEFAULT_TUPLE_BUFFER_CAPACITY: usize = 1024;

static DEFAULT_LOOKUP: OnceLock<()> = OnceLock::new();

/// The process config, if one is installed. The `$QPIPE_CONFIG` / `./qpipe.toml`
/// lookup runs at most once; a config installed later is still picked up.
fn app_config() -> Option<&'static QPipeConfig> {
    if let Some(cfg) = loaded_app_config() {
        return Some(cfg);
    }
    DEFAULT_LOOKUP.get_or_init(|| {
        let _ = qpipe_app_config();
    });
    loaded_app_config()
}

pub(crate) fn tuple_buffer_capacity() -> usize {
    app_config()
        .map(|c| c.engine.tuple_buffer_capacity)
        .unwrap_or(DEFAULT_TUPLE_BUFFER_CAPACITY)
        .max(1)
}

pub(crate) fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
