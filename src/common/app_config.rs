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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<QPipeConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static QPipeConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = QPipeConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static QPipeConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = QPipeConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static QPipeConfig> {
    init_from_env_or_default()
}

/// The installed config, without any lookup.
pub fn loaded() -> Option<&'static QPipeConfig> {
    CONFIG.get()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("QPIPE_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("qpipe.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $QPIPE_CONFIG or create ./qpipe.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct QPipeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "qpipe=debug,qpipe::exec::pipeline::tuple_buffer=info"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub stages: StagesConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl QPipeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: QPipeConfig = toml::from_str(s)?;
        cfg.scheduler.policy_kind()?;
        Ok(cfg)
    }

    /// Filter expression handed to the tracing subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }
}

impl Default for QPipeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            engine: EngineConfig::default(),
            stages: StagesConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    /// Capacity of a tuple buffer, in tuples.
    #[serde(default = "default_tuple_buffer_capacity")]
    pub tuple_buffer_capacity: usize,
}

fn default_tuple_buffer_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tuple_buffer_capacity: default_tuple_buffer_capacity(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_scan_threads")]
    pub scan_threads: usize,
    #[serde(default = "default_aggregate_threads")]
    pub aggregate_threads: usize,
    #[serde(default = "default_sort_threads")]
    pub sort_threads: usize,
    #[serde(default = "default_join_threads")]
    pub join_threads: usize,
}

fn default_scan_threads() -> usize {
    2
}

fn default_aggregate_threads() -> usize {
    2
}

fn default_sort_threads() -> usize {
    2
}

fn default_join_threads() -> usize {
    1
}

impl StagesConfig {
    fn actual(threads: usize) -> usize {
        if threads > 0 {
            return threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn actual_scan_threads(&self) -> usize {
        Self::actual(self.scan_threads)
    }

    pub fn actual_aggregate_threads(&self) -> usize {
        Self::actual(self.aggregate_threads)
    }

    pub fn actual_sort_threads(&self) -> usize {
        Self::actual(self.sort_threads)
    }

    pub fn actual_join_threads(&self) -> usize {
        Self::actual(self.join_threads)
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            scan_threads: default_scan_threads(),
            aggregate_threads: default_aggregate_threads(),
            sort_threads: default_sort_threads(),
            join_threads: default_join_threads(),
        }
    }
}

/// CPU assignment policy selected by `[scheduler] policy`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PolicyKind {
    Os,
    RoundRobin,
    QueryCpu,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Explicit CPU ids; empty means every available CPU.
    #[serde(default)]
    pub cpus: Vec<usize>,
}

fn default_policy() -> String {
    "round_robin".to_string()
}

impl SchedulerConfig {
    pub fn policy_kind(&self) -> Result<PolicyKind> {
        match self.policy.trim().to_ascii_lowercase().as_str() {
            "os" => Ok(PolicyKind::Os),
            "round_robin" | "rr" | "rr_cpu" => Ok(PolicyKind::RoundRobin),
            "query_cpu" => Ok(PolicyKind::QueryCpu),
            other => Err(anyhow!("unknown scheduler policy: {other}")),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            cpus: Vec::new(),
        }
    }
}
