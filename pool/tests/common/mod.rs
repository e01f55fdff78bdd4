#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coinpool::config::{CoinConfig, PoolConfig, RewardType};
use coinpool::daemon::{DaemonRpc, InstanceResult, RpcResult};
use coinpool::error::DaemonError;
use coinpool::jobs::{FamilyContext, ProtocolFamily, StandardFamily};
use coinpool::PoolEvent;
use coinpool_core::{algorithms, AlgorithmParams, HeaderHasher, PowFunction};
use num_bigint::BigUint;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const POOL_SCRIPT: &str = "76a914000102030405060708090a0b0c0d0e0f1011121388ac";

pub fn now() -> u32 {
    chrono::Utc::now().timestamp() as u32
}

/// Digest that lands exactly on a chosen share difficulty.
///
/// `f64::INFINITY` yields the all-zero digest, which meets any target.
pub struct TunableDigest {
    difficulty: AtomicU64,
    calls: AtomicUsize,
}

impl TunableDigest {
    pub fn new(difficulty: f64) -> Arc<Self> {
        Arc::new(Self {
            difficulty: AtomicU64::new(difficulty.to_bits()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, difficulty: f64) {
        self.difficulty.store(difficulty.to_bits(), Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HeaderHasher for TunableDigest {
    fn digest(&self, _header: &[u8], _ntime: u32) -> [u8; 32] {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let difficulty = f64::from_bits(self.difficulty.load(Ordering::SeqCst));
        if difficulty.is_infinite() {
            return [0u8; 32];
        }
        let scaled = BigUint::from((difficulty * 1_000_000.0) as u64);
        let value = coinpool_core::target::diff1() * BigUint::from(1_000_000u64) / scaled;
        let mut bytes = value.to_bytes_le();
        bytes.resize(32, 0);
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        out
    }
}

pub fn standard_coin() -> CoinConfig {
    serde_json::from_value(json!({"name": "Bitcoin", "symbol": "btc", "algorithm": "sha256"})).unwrap()
}

pub fn standard_family(hasher: Arc<TunableDigest>) -> StandardFamily {
    let algorithm = algorithms::resolve("sha256", &AlgorithmParams::default())
        .unwrap()
        .with_pow(PowFunction::Digest(hasher));
    StandardFamily::new(FamilyContext {
        algorithm: Arc::new(algorithm),
        coin: standard_coin(),
        reward: RewardType::Pow,
        pool_script: hex::decode(POOL_SCRIPT).unwrap(),
        recipients: Vec::new(),
        coinbase_signature: "/coinpool/".into(),
        emit_invalid_block_hashes: false,
    })
}

/// Standard template; `bits` 1b00ffff puts the network at difficulty 65536.
pub fn standard_template(prev: &str, height: u64) -> Value {
    json!({
        "version": 0x2000_0000u32,
        "previousblockhash": prev.repeat(32),
        "height": height,
        "curtime": now() - 30,
        "bits": "1b00ffff",
        "coinbasevalue": 625_000_000u64,
        "transactions": [],
    })
}

pub fn pool_config(algorithm: &str) -> PoolConfig {
    PoolConfig::from_json(
        &json!({
            "coin": {"name": "Testcoin", "symbol": "tst", "algorithm": algorithm},
            "address": "mpool",
            "daemons": [{"host": "127.0.0.1", "port": 18332}],
            "instance_id": 3,
            "block_refresh_interval_ms": 0,
            "job_rebroadcast_timeout_secs": 0,
            "ports": {"3032": {"diff": 32}}
        })
        .to_string(),
    )
    .unwrap()
}

/// In-memory daemon. Answers are keyed by method name.
#[derive(Default)]
pub struct MockDaemon {
    instances: usize,
    cmd_answers: Mutex<HashMap<String, Vec<Result<Value, DaemonError>>>>,
    batch_answers: Mutex<HashMap<String, RpcResult>>,
    calls: Mutex<Vec<(String, Value)>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl MockDaemon {
    pub fn new(instances: usize) -> Arc<Self> {
        Arc::new(Self { instances, ..Default::default() })
    }

    /// A daemon that passes every startup probe and serves `template`.
    pub fn healthy(template: Value) -> Arc<Self> {
        let daemon = Self::new(1);
        daemon.answer("getpeerinfo", Ok(json!([{"startingheight": 100}])));
        daemon.answer("getblocktemplate", Ok(template));
        daemon.batch("validateaddress", RpcResult::ok(json!({"isvalid": true, "scriptPubKey": POOL_SCRIPT})));
        daemon.batch("getdifficulty", RpcResult::ok(json!(1.5)));
        daemon.batch("getnetworkinfo", RpcResult::ok(json!({"protocolversion": 70016, "connections": 8})));
        daemon.batch("getmininginfo", RpcResult::ok(json!({"chain": "test", "difficulty": 2.0, "blocks": 100})));
        daemon.batch("getnetworkhashps", RpcResult::ok(json!(2_097_152.0)));
        daemon.batch("submitblock", RpcResult::err(-1, "JSON value is not a string as expected"));
        daemon
    }

    /// Same answer on every instance.
    pub fn answer(&self, method: &str, result: Result<Value, DaemonError>) {
        let per_instance = vec![result; self.instances];
        self.cmd_answers.lock().insert(method.to_string(), per_instance);
    }

    pub fn answer_each(&self, method: &str, results: Vec<Result<Value, DaemonError>>) {
        self.cmd_answers.lock().insert(method.to_string(), results);
    }

    /// Hold every `method` call for `delay` before answering.
    pub fn delay(&self, method: &str, delay: Duration) {
        self.delays.lock().insert(method.to_string(), delay);
    }

    pub fn batch(&self, method: &str, result: RpcResult) {
        self.batch_answers.lock().insert(method.to_string(), result);
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl DaemonRpc for MockDaemon {
    fn instance_count(&self) -> usize {
        self.instances
    }

    async fn cmd(&self, method: &str, params: Value) -> Vec<InstanceResult> {
        self.calls.lock().push((method.to_string(), params));
        let delay = self.delays.lock().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let answers = self.cmd_answers.lock().get(method).cloned().unwrap_or_else(|| {
            vec![Err(DaemonError::Transport(format!("no answer for {}", method))); self.instances]
        });
        answers
            .into_iter()
            .enumerate()
            .map(|(instance, result)| InstanceResult { instance, result })
            .collect()
    }

    async fn batch_cmd(&self, calls: Vec<(String, Value)>) -> Result<Vec<RpcResult>, DaemonError> {
        let answers = self.batch_answers.lock();
        Ok(calls
            .iter()
            .map(|(method, _)| answers.get(method).cloned().unwrap_or_default())
            .collect())
    }
}

/// Next event matching `pred`, skipping the rest. `None` after `wait`.
pub async fn next_event<P>(rx: &mut broadcast::Receiver<PoolEvent>, wait: Duration, mut pred: P) -> Option<PoolEvent>
where
    P: FnMut(&PoolEvent) -> bool,
{
    tokio::time::timeout(wait, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
