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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use qpipe::exec::functors::{Aggregator, PassThroughFilter, TupleFilter};
use qpipe::exec::operators::{TupleSource, VecSource};
use qpipe::qpipe_config::{self, QPipeConfig};
use qpipe::qpipe_logging;
use qpipe::{Dispatcher, EngineResult, Packet, PacketPayload, Tuple, TupleBuffer};

/// Engine settings shared by the integration tests: small buffers so producers
/// block early, two workers per stage, and a fixed CPU set.
pub const TEST_CONFIG_TOML: &str = r#"
log_level = "debug"

[engine]
tuple_buffer_capacity = 8

[stages]
scan_threads = 2
aggregate_threads = 2
sort_threads = 2
join_threads = 2

[scheduler]
policy = "round_robin"
cpus = [0, 1, 2, 3]
"#;

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_qpipe.toml");
        std::fs::write(&config_path, TEST_CONFIG_TOML)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        qpipe_logging::init_with_level("debug");
    }

    /// Load the test configuration into the process-wide slot.
    pub fn load_config(&self) -> anyhow::Result<&'static QPipeConfig> {
        qpipe_config::init_from_path(&self.config_path)
    }

    /// Parse the test configuration without touching global state.
    pub fn parse(&self) -> anyhow::Result<QPipeConfig> {
        QPipeConfig::load_from_file(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

pub fn test_config() -> QPipeConfig {
    QPipeConfig::from_toml_str(TEST_CONFIG_TOML).expect("test config parses")
}

/// A private dispatcher with every built-in stage registered.
pub fn test_dispatcher() -> Arc<Dispatcher> {
    qpipe::runtime::exec_env::build_dispatcher(&test_config()).expect("build dispatcher")
}

/// Wait for a condition to become true, with timeout.
pub fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// `(key: u32, value: u64)` row, little endian.
pub fn kv(k: u32, v: u64) -> Vec<u8> {
    let mut row = Vec::with_capacity(12);
    row.extend_from_slice(&k.to_le_bytes());
    row.extend_from_slice(&v.to_le_bytes());
    row
}

pub fn decode_kv(t: &Tuple) -> (u32, u64) {
    let k = u32::from_le_bytes(t[0..4].try_into().expect("4 key bytes"));
    let v = u64::from_le_bytes(t[4..12].try_into().expect("8 value bytes"));
    (k, v)
}

pub fn key_rows(keys: &[u32]) -> Vec<Vec<u8>> {
    keys.iter().map(|k| k.to_le_bytes().to_vec()).collect()
}

pub fn decode_key(t: &Tuple) -> u32 {
    u32::from_le_bytes(t[0..4].try_into().expect("4 key bytes"))
}

/// `SUM(value)` grouped by a key prefix of `key_size` bytes; the value is the
/// little-endian `u64` right after the key. Output row: key then sum.
pub struct SumAggregator {
    pub key_size: usize,
}

impl Aggregator for SumAggregator {
    fn accumulator_size(&self) -> usize {
        self.key_size + 8
    }

    fn init(&self, acc: &mut [u8], key: &[u8]) {
        acc[..self.key_size].copy_from_slice(key);
        acc[self.key_size..].fill(0);
    }

    fn accumulate(&self, acc: &mut [u8], tuple: &Tuple) {
        let value = u64::from_le_bytes(
            tuple[self.key_size..self.key_size + 8]
                .try_into()
                .expect("8 value bytes"),
        );
        let sum = u64::from_le_bytes(acc[self.key_size..].try_into().expect("8 sum bytes"));
        acc[self.key_size..].copy_from_slice(&(sum + value).to_le_bytes());
    }

    fn finalize(&self, acc: &[u8]) -> Tuple {
        Tuple::copy_from_slice(acc)
    }
}

pub fn packet(id: &str, payload: PacketPayload) -> Arc<Packet> {
    Arc::new(Packet::create(
        id,
        TupleBuffer::new(0),
        Arc::new(PassThroughFilter),
        payload,
        true,
    ))
}

pub fn scan_of(rows: Vec<Vec<u8>>) -> PacketPayload {
    PacketPayload::Scan {
        source: Arc::new(VecSource::new(rows)),
    }
}

pub fn scan_packet(id: &str, rows: Vec<Vec<u8>>) -> Arc<Packet> {
    packet(id, scan_of(rows))
}

/// Mergeable scan packet advertising `signature`.
pub fn shared_scan_packet(
    id: &str,
    source: Arc<dyn TupleSource>,
    filter: Arc<dyn TupleFilter>,
    signature: &str,
) -> Arc<Packet> {
    Arc::new(
        Packet::create(
            id,
            TupleBuffer::new(0),
            filter,
            PacketPayload::Scan { source },
            true,
        )
        .with_signature(signature),
    )
}

/// Reads `packet`'s output to end of stream.
pub fn drain(packet: &Packet) -> EngineResult<Vec<Tuple>> {
    let mut out = Vec::new();
    while let Some(t) = packet.output_buffer().get()? {
        out.push(t);
    }
    Ok(out)
}

/// Drains every packet on its own thread, so a shared producer never blocks on
/// a buffer nobody is reading yet.
pub fn drain_concurrently(packets: &[Arc<Packet>]) -> Vec<EngineResult<Vec<Tuple>>> {
    let handles: Vec<_> = packets
        .iter()
        .map(|p| {
            let p = Arc::clone(p);
            thread::spawn(move || drain(&p))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("drain thread"))
        .collect()
}

/// Dispatches `root` under a fresh query and reads its output to end of stream.
pub fn run_plan(dispatcher: &Dispatcher, root: &Arc<Packet>) -> EngineResult<Vec<Tuple>> {
    let qs = dispatcher.query_state_create();
    dispatcher.dispatch_packet(root, &qs)?;
    let out = drain(root);
    dispatcher.query_state_destroy(qs);
    out
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}
