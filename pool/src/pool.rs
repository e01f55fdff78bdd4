/// Pool orchestrator - startup, template polling, block submission
///
/// Wires the daemon interface to a [`JobManager`], turns job events into
/// [`PoolEvent`]s for the stratum server and stats collectors, and submits
/// block candidates upstream, reconciling acceptance via `getblock`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use coinpool_core::AlgorithmRegistry;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config::{PoolConfig, RewardType};
use crate::daemon::{DaemonRpc, RpcResult};
use crate::error::{PoolError, ShareError};
use crate::jobs::{FamilyContext, JobTemplate, ProtocolFamily, Recipient, RpcTemplate};
use crate::manager::{JobEvent, JobManager};
use crate::metrics::prometheus as metrics;
use crate::shares::{ClientContext, ShareOutcome, ShareRecord, ShareRequest};

const SYNC_RETRY: Duration = Duration::from_secs(5);

/// Error code a bitcoin-style daemon returns while downloading blocks.
const RPC_IN_WARMUP_OR_SYNCING: i64 = -10;

const FOUNDER_SUBSIDY_KEYS: [&str; 5] = [
    "founders-chris",
    "founders-jimmy",
    "founders-scott",
    "founders-shelby",
    "founders-loki",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Warning,
    Error,
    /// Operator-facing summary lines.
    Special,
}

#[derive(Debug, Clone)]
pub enum PoolEvent {
    Started,
    NewJob { params: Vec<Value>, clean_jobs: bool },
    Share { valid_share: bool, valid_block: bool, share: ShareRecord },
    Log { severity: Severity, message: String },
}

/// Chain facts learned from the daemon at startup.
#[derive(Debug, Clone)]
pub struct CoinInfo {
    pub reward: RewardType,
    pub pool_script: Vec<u8>,
    pub has_submit_method: bool,
    pub testnet: bool,
    pub protocol_version: Option<u64>,
    pub connections: Option<u64>,
    /// Network difficulty scaled by the algorithm multiplier.
    pub network_difficulty: f64,
    pub network_hash_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub extra_nonce1: String,
    pub extra_nonce2_size: usize,
    pub difficulty: f64,
}

pub struct Pool<F: ProtocolFamily> {
    config: Arc<PoolConfig>,
    daemon: Arc<dyn DaemonRpc>,
    coin: CoinInfo,
    fee_percent: f64,
    manager: Mutex<JobManager<F>>,
    job_events: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<JobEvent<F::Job>>>>,
    /// Last block hex handed to the daemons; held across the whole submit.
    last_submitted: Mutex<Option<String>>,
    last_broadcast: parking_lot::Mutex<Instant>,
    events: broadcast::Sender<PoolEvent>,
}

impl<F: ProtocolFamily> Pool<F> {
    /// Run the startup sequence and spawn the background tasks.
    ///
    /// Returns once the first job is installed and `Started` has been emitted.
    pub async fn launch(
        config: Arc<PoolConfig>,
        daemon: Arc<dyn DaemonRpc>,
        registry: &AlgorithmRegistry,
        events: broadcast::Sender<PoolEvent>,
    ) -> Result<Arc<Self>> {
        let log = |severity, message: String| emit_log(&events, severity, message);

        if daemon.instance_count() == 0 {
            log(Severity::Error, PoolError::NoDaemons.to_string());
            bail!(PoolError::NoDaemons);
        }
        if !daemon.is_online().await {
            let msg = "Failed to connect daemon(s)".to_string();
            log(Severity::Error, msg.clone());
            bail!(msg);
        }

        let mut coin = match detect_coin_data(&config, daemon.as_ref()).await {
            Ok(coin) => coin,
            Err(e) => {
                log(Severity::Error, format!("Could not start pool, {}", e));
                return Err(e.into());
            }
        };

        let (recipients, fee_percent) = setup_recipients(&config, daemon.as_ref(), &events).await;

        let algorithm = registry.resolve(&config.coin.algorithm, &config.coin.algorithm_params(coin.reward))?;
        coin.network_difficulty *= algorithm.multiplier;

        let family = F::new(FamilyContext {
            algorithm: Arc::new(algorithm),
            coin: config.coin.clone(),
            reward: coin.reward,
            pool_script: coin.pool_script.clone(),
            recipients,
            coinbase_signature: config.coinbase_signature.clone(),
            emit_invalid_block_hashes: config.emit_invalid_block_hashes,
        });
        let (manager, rx) = JobManager::new(family, config.instance_id);

        let pool = Arc::new(Self {
            config,
            daemon,
            coin,
            fee_percent,
            manager: Mutex::new(manager),
            job_events: parking_lot::Mutex::new(Some(rx)),
            last_submitted: Mutex::new(None),
            last_broadcast: parking_lot::Mutex::new(Instant::now()),
            events,
        });

        tokio::spawn(pool.clone().run_job_events());

        pool.wait_until_synced().await;
        pool.first_job().await?;
        pool.clone().start_block_polling();
        pool.clone().start_rebroadcast_timer();
        pool.output_pool_info().await;
        let _ = pool.events.send(PoolEvent::Started);

        Ok(pool)
    }

    pub fn coin(&self) -> &CoinInfo {
        &self.coin
    }

    pub fn fee_percent(&self) -> f64 {
        self.fee_percent
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    fn log(&self, severity: Severity, message: impl Into<String>) {
        emit_log(&self.events, severity, message.into());
    }

    /// Current job params, as sent to a freshly subscribed miner.
    pub async fn current_job_params(&self) -> Option<Vec<Value>> {
        self.manager.lock().await.current_job().map(|job| job.job_params())
    }

    /// Extranonce allocation and starting difficulty for a new connection.
    pub async fn subscribe(&self, port: u16) -> Subscription {
        let mut manager = self.manager.lock().await;
        Subscription {
            extra_nonce1: manager.next_extra_nonce(),
            extra_nonce2_size: manager.extra_nonce2_size(),
            difficulty: self.config.port_difficulty(port),
        }
    }

    /// `mining.submit`: `Ok(true)` for an accepted share, else the share error.
    pub async fn submit(&self, request: &ShareRequest, client: &ClientContext) -> Result<bool, ShareError> {
        let result = self.manager.lock().await.process_share(request, client);
        if request.version_mask.is_some() {
            self.log(
                Severity::Warning,
                format!("Version Mask detected from {} [{}]", client.worker, client.ip),
            );
        }
        result.map(|ShareOutcome { .. }| true)
    }

    async fn run_job_events(self: Arc<Self>) {
        let Some(mut rx) = self.job_events.lock().take() else {
            return;
        };
        while let Some(event) = rx.recv().await {
            self.handle_job_event(event).await;
        }
    }

    /// Broadcasts and plain shares are handled inline. Block candidates go
    /// to their own task so daemon round-trips never hold up job delivery.
    pub async fn handle_job_event(self: &Arc<Self>, event: JobEvent<F::Job>) {
        match event {
            JobEvent::NewBlock(job) => self.broadcast_job(job.job_params(), true),
            JobEvent::UpdatedBlock(job) => {
                let mut params = job.job_params();
                if let Some(flag) = params.get_mut(F::CLEAN_JOBS_INDEX) {
                    *flag = Value::Bool(false);
                }
                self.broadcast_job(params, false);
            }
            JobEvent::Share { record, block_hex: None } => {
                let valid_share = record.is_valid();
                self.emit_share(valid_share, false, record);
            }
            JobEvent::Share { record, block_hex: Some(block_hex) } => {
                tokio::spawn(self.clone().handle_block_candidate(record, block_hex));
            }
        }
    }

    fn broadcast_job(&self, params: Vec<Value>, clean_jobs: bool) {
        *self.last_broadcast.lock() = Instant::now();
        let _ = self.events.send(PoolEvent::NewJob { params, clean_jobs });
    }

    fn emit_share(&self, valid_share: bool, valid_block: bool, share: ShareRecord) {
        let _ = self.events.send(PoolEvent::Share { valid_share, valid_block, share });
    }

    async fn handle_block_candidate(self: Arc<Self>, mut record: ShareRecord, block_hex: String) {
        let valid_share = record.is_valid();
        let mut last = self.last_submitted.lock().await;
        if last.as_deref() == Some(block_hex.as_str()) {
            metrics::inc_duplicate_submits();
            self.log(
                Severity::Warning,
                format!("Warning, ignored duplicate submit block {}", record.block_hash.as_deref().unwrap_or_default()),
            );
            return;
        }
        *last = Some(block_hex.clone());

        if !self.submit_block(&block_hex).await {
            metrics::inc_blocks_rejected();
            return;
        }

        let block_hash = record.block_hash.clone().unwrap_or_default();
        let valid_block = match self.check_block_accepted(&block_hash).await {
            Ok(tx_hash) => {
                metrics::inc_blocks_accepted();
                tracing::info!("Block {} accepted at height {:?}", block_hash, record.height);
                record.tx_hash = Some(tx_hash);
                true
            }
            Err(diagnostic) => {
                metrics::inc_blocks_rejected();
                record.error = Some(diagnostic);
                false
            }
        };
        self.emit_share(valid_share, valid_block, record);
        drop(last);

        if let Ok((_, true)) = self.get_block_template().await {
            self.log(Severity::Debug, "Block notification via RPC after block submission");
        }
    }

    /// Send a block to every daemon. `false` when any instance errors or
    /// rejects it.
    pub async fn submit_block(&self, block_hex: &str) -> bool {
        let (method, params) = if self.coin.has_submit_method {
            ("submitblock", json!([block_hex]))
        } else {
            ("getblocktemplate", json!([{ "mode": "submit", "data": block_hex }]))
        };

        for r in self.daemon.cmd(method, params).await {
            match r.result {
                Err(e) => {
                    self.log(
                        Severity::Error,
                        format!(
                            "rpc error with daemon instance {} when submitting block with {} {}",
                            r.instance,
                            method,
                            e.to_json()
                        ),
                    );
                    return false;
                }
                Ok(Value::String(s)) if s == "rejected" => {
                    self.log(
                        Severity::Error,
                        format!("Daemon instance {} rejected a supposedly valid block", r.instance),
                    );
                    return false;
                }
                Ok(_) => {}
            }
        }
        self.log(
            Severity::Debug,
            format!("Submitted Block using {} successfully to daemon instance(s)", method),
        );
        true
    }

    /// Look the block up on every daemon. `Ok(coinbase txid)` when any
    /// instance knows it with non-negative confirmations.
    pub async fn check_block_accepted(&self, block_hash: &str) -> Result<String, Value> {
        let results = self.daemon.cmd("getblock", json!([block_hash])).await;
        let matching: Vec<Value> = results
            .into_iter()
            .filter_map(|r| r.result.ok())
            .filter(|block| block.get("hash").and_then(Value::as_str) == Some(block_hash))
            .collect();

        let confirmations = |block: &Value| block.get("confirmations").and_then(Value::as_i64).unwrap_or(-1);

        if let Some(block) = matching.iter().find(|b| confirmations(*b) >= 0) {
            let tx = block
                .get("tx")
                .and_then(|txs| txs.get(0))
                .map(|tx| match tx {
                    Value::String(s) => s.clone(),
                    other => other.get("txid").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
                .unwrap_or_default();
            return Ok(tx);
        }
        match matching.first() {
            Some(block) => Err(json!({ "confirmations": block.get("confirmations").cloned().unwrap_or(Value::Null) })),
            None => Err(json!({ "unknown": "check coin daemon logs" })),
        }
    }

    /// Fetch a template and feed it through the Job Manager.
    ///
    /// Returns the template and whether it installed a new block.
    pub async fn get_block_template(&self) -> Result<(RpcTemplate, bool), PoolError> {
        let rpc = self.fetch_block_template().await?;
        let is_new = self.manager.lock().await.process_template(rpc.clone())?;
        Ok((rpc, is_new))
    }

    async fn fetch_block_template(&self) -> Result<RpcTemplate, PoolError> {
        let subsidy = if F::USES_BLOCK_SUBSIDY {
            match self.daemon.cmd_first("getblocksubsidy", json!([])).await {
                Ok(v) => Some(v),
                Err(e) => {
                    metrics::inc_template_fetch_errors();
                    self.log(Severity::Error, format!("getblocksubsidy call failed with error {}", e.to_json()));
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let mut value = match self
            .daemon
            .cmd_first("getblocktemplate", F::block_template_params(&self.config.coin))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                metrics::inc_template_fetch_errors();
                self.log(Severity::Error, format!("getblocktemplate call failed with error {}", e.to_json()));
                return Err(e.into());
            }
        };

        if let (Some(subsidy), Some(template)) = (subsidy, value.as_object_mut()) {
            merge_block_subsidy(template, &subsidy, &self.config);
        }

        let rpc = RpcTemplate::from_value(value).map_err(|e| {
            metrics::inc_template_fetch_errors();
            e
        })?;
        Ok(rpc)
    }

    /// External block notification (blocknotify, p2p).
    pub async fn process_block_notify(&self, block_hash: &str, source: &str) {
        self.log(Severity::Debug, format!("Block notification via {}", source));
        let stale = self
            .manager
            .lock()
            .await
            .current_job()
            .map(|job| job.rpc().previousblockhash != block_hash)
            .unwrap_or(false);
        if stale && self.get_block_template().await.is_err() {
            self.log(
                Severity::Error,
                format!("Block notify error getting block template for {}", self.config.coin.name),
            );
        }
    }

    /// No job went out for `job_rebroadcast_timeout_secs`: refresh in place.
    pub async fn on_broadcast_timeout(&self) {
        self.log(
            Severity::Debug,
            format!(
                "No new blocks for {} seconds - updating transactions & rebroadcasting work",
                self.config.job_rebroadcast_timeout_secs
            ),
        );
        let Ok(rpc) = self.fetch_block_template().await else {
            return;
        };
        // Intake and refresh share one lock.
        let mut manager = self.manager.lock().await;
        let refreshed = match manager.process_template(rpc.clone()) {
            Ok(true) => return,
            Ok(false) => manager.update_current_job(rpc),
            Err(e) => Err(e),
        };
        drop(manager);
        match refreshed {
            Ok(true) => {}
            Ok(false) => self.log(Severity::Debug, "Skipped rebroadcast of a template behind the current tip"),
            Err(e) => self.log(Severity::Error, format!("Could not refresh current job: {}", e)),
        }
    }

    async fn is_synced(&self) -> bool {
        let results = self
            .daemon
            .cmd("getblocktemplate", F::block_template_params(&self.config.coin))
            .await;
        results.iter().all(|r| match &r.result {
            Err(e) => e.rpc().map(|e| e.code) != Some(RPC_IN_WARMUP_OR_SYNCING),
            Ok(_) => true,
        })
    }

    async fn wait_until_synced(&self) {
        let mut announced = false;
        while !self.is_synced().await {
            if !announced {
                self.log(
                    Severity::Error,
                    "Daemon is still syncing with network (download blockchain) - server will be started once synced",
                );
                announced = true;
            }
            self.log_sync_progress().await;
            tokio::time::sleep(SYNC_RETRY).await;
        }
    }

    async fn log_sync_progress(&self) {
        let method = if F::USES_BLOCK_SUBSIDY {
            if self.config.coin.has_get_info { "getinfo" } else { "getblockchaininfo" }
        } else {
            "getmininginfo"
        };
        let blocks = self
            .daemon
            .cmd(method, json!([]))
            .await
            .into_iter()
            .filter_map(|r| r.result.ok()?.get("blocks")?.as_u64())
            .max();

        let peers = match self.daemon.cmd("getpeerinfo", json!([])).await.into_iter().next() {
            Some(r) => r.result.ok().and_then(|v| v.as_array().cloned()).unwrap_or_default(),
            None => Vec::new(),
        };
        let total = peers.iter().filter_map(|p| p.get("startingheight")?.as_u64()).max();

        if let (Some(blocks), Some(total)) = (blocks, total) {
            if total > 0 {
                let percent = blocks as f64 / total as f64 * 100.0;
                self.log(
                    Severity::Warning,
                    format!("Downloaded {:.2}% of blockchain from {} peers", percent, peers.len()),
                );
            }
        }
    }

    async fn first_job(&self) -> Result<()> {
        if let Err(e) = self.get_block_template().await {
            self.log(
                Severity::Error,
                "Error with getblocktemplate on creating first job, server cannot start",
            );
            bail!(PoolError::FirstJob(e.to_string()));
        }

        let network_diff = self.coin.network_difficulty;
        let warnings: Vec<String> = self
            .config
            .ports
            .iter()
            .filter(|(_, p)| network_diff < p.diff)
            .map(|(port, p)| format!("port {} w/ diff {}", port, p.diff))
            .collect();
        if !warnings.is_empty() {
            self.log(
                Severity::Warning,
                format!("Network diff of {} is lower than {}", network_diff, warnings.join(" and ")),
            );
        }
        Ok(())
    }

    fn start_block_polling(self: Arc<Self>) {
        let interval_ms = self.config.block_refresh_interval_ms;
        if interval_ms == 0 {
            self.log(Severity::Debug, "Block template polling has been disabled");
            return;
        }
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Ok((_, true)) = self.get_block_template().await {
                    self.log(Severity::Debug, "Block notification via RPC polling");
                }
            }
        });
    }

    fn start_rebroadcast_timer(self: Arc<Self>) {
        let timeout = Duration::from_secs(self.config.job_rebroadcast_timeout_secs);
        if timeout.is_zero() {
            return;
        }
        tokio::spawn(async move {
            loop {
                let since = self.last_broadcast.lock().elapsed();
                if since >= timeout {
                    self.on_broadcast_timeout().await;
                    // Keep the cadence even if the refresh produced nothing.
                    *self.last_broadcast.lock() = Instant::now();
                    continue;
                }
                tokio::time::sleep(timeout - since).await;
            }
        });
    }

    async fn output_pool_info(&self) {
        let (height, block_diff) = {
            let manager = self.manager.lock().await;
            match manager.current_job() {
                Some(job) => (
                    job.rpc().height,
                    job.difficulty() * manager.family().context().algorithm.multiplier,
                ),
                None => (0, 0.0),
            }
        };
        let coin = &self.config.coin;
        let ports: Vec<String> = self.config.ports.keys().map(|p| p.to_string()).collect();

        let mut lines = vec![
            format!(
                "Stratum Pool Server Started for {} [{}] {{{}}}",
                coin.name,
                coin.symbol.to_uppercase(),
                coin.algorithm
            ),
            format!("Network Connected:\t{}", if self.coin.testnet { "Testnet" } else { "Mainnet" }),
            format!(
                "Detected Reward Type:\t{}",
                match self.coin.reward {
                    RewardType::Pow => "POW",
                    RewardType::Pos => "POS",
                }
            ),
            format!("Current Block Height:\t{}", height),
            format!(
                "Current Connect Peers:\t{}",
                self.coin.connections.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
            ),
            format!("Current Block Diff:\t{}", block_diff),
            format!("Network Difficulty:\t{}", self.coin.network_difficulty),
            format!("Network Hash Rate:\t{}", readable_hash_rate(self.coin.network_hash_rate.unwrap_or(0.0))),
            format!("Stratum Port(s):\t{}", ports.join(", ")),
            format!("Pool Fee Percent:\t{}%", self.fee_percent),
            format!("ASICBoost Enabled:\t{}", coin.version_mask.is_some()),
        ];
        if self.config.block_refresh_interval_ms > 0 {
            lines.push(format!("Block polling every:\t{} ms", self.config.block_refresh_interval_ms));
        }
        self.log(Severity::Special, lines.join("\n\t\t\t\t\t\t"));
    }
}

fn emit_log(events: &broadcast::Sender<PoolEvent>, severity: Severity, message: String) {
    match severity {
        Severity::Debug => tracing::debug!("{}", message),
        Severity::Warning => tracing::warn!("{}", message),
        Severity::Error => tracing::error!("{}", message),
        Severity::Special => tracing::info!("{}", message),
    }
    let _ = events.send(PoolEvent::Log { severity, message });
}

/// `1536.0` -> `"1.50 KH"`.
pub fn readable_hash_rate(mut rate: f64) -> String {
    const UNITS: [&str; 5] = [" KH", " MH", " GH", " TH", " PH"];
    let mut i = 0;
    rate /= 1024.0;
    while rate > 1024.0 && i < UNITS.len() - 1 {
        rate /= 1024.0;
        i += 1;
    }
    format!("{:.2}{}", rate, UNITS[i])
}

/// Difficulty fields come as a number or as `{"proof-of-work": n, ...}`.
fn difficulty_value(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.get("proof-of-work")?.as_f64())
}

/// P2PK output for POS coinbases.
fn pubkey_script(pubkey_hex: &str) -> Option<Vec<u8>> {
    let key = hex::decode(pubkey_hex).ok()?;
    if key.len() != 33 {
        return None;
    }
    let mut script = Vec::with_capacity(35);
    script.push(0x21);
    script.extend_from_slice(&key);
    script.push(0xac);
    Some(script)
}

/// P2PKH output for a 20-byte mining key.
fn mining_key_script(key_hex: &str) -> Option<Vec<u8>> {
    let key = hex::decode(key_hex).ok().filter(|k| k.len() == 20)?;
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&key);
    script.extend_from_slice(&[0x88, 0xac]);
    Some(script)
}

fn init_error(method: &str, detail: impl ToString) -> PoolError {
    PoolError::InitRpc { method: method.to_string(), detail: detail.to_string() }
}

/// Batched startup probe: address, reward type, network stats and the
/// block submission method.
pub async fn detect_coin_data(config: &PoolConfig, daemon: &dyn DaemonRpc) -> Result<CoinInfo, PoolError> {
    let coin = &config.coin;
    let equihash = config.family().map_err(|e| init_error("config", e))? == coinpool_core::AlgorithmFamily::Equihash;

    let mut calls: Vec<&str> = vec!["validateaddress", "getdifficulty"];
    if !equihash {
        if coin.no_network_info {
            if !coin.get_info {
                calls.push("getinfo");
            }
        } else {
            calls.push("getnetworkinfo");
        }
        calls.push(if coin.get_info { "getinfo" } else { "getmininginfo" });
        calls.push("getnetworkhashps");
        calls.push("submitblock");
    } else {
        calls.push("getmininginfo");
        calls.push("submitblock");
        if coin.has_get_info {
            calls.push("getinfo");
        } else {
            calls.push("getblockchaininfo");
            calls.push("getnetworkinfo");
        }
    }

    let batch: Vec<(String, Value)> = calls
        .iter()
        .map(|m| {
            let params = if *m == "validateaddress" { json!([config.address]) } else { json!([]) };
            (m.to_string(), params)
        })
        .collect();
    let results = daemon
        .batch_cmd(batch)
        .await
        .map_err(|e| init_error("batch", e.to_json()))?;

    let mut by_method: HashMap<&str, RpcResult> = HashMap::new();
    for (method, r) in calls.iter().zip(results) {
        if *method != "submitblock" && r.value().is_none() {
            let detail = r.error.as_ref().map(|e| json!(e).to_string()).unwrap_or_else(|| "null".into());
            return Err(init_error(method, detail));
        }
        by_method.insert(*method, r);
    }
    let get = |m: &str| by_method.get(m).and_then(RpcResult::value).cloned().unwrap_or(Value::Null);

    let address = get("validateaddress");
    if !address.get("isvalid").and_then(Value::as_bool).unwrap_or(false) {
        return Err(PoolError::InvalidAddress);
    }

    let reward = coin.reward.unwrap_or_else(|| {
        if get("getdifficulty").get("proof-of-stake").is_some() {
            RewardType::Pos
        } else {
            RewardType::Pow
        }
    });

    let pool_script = match reward {
        RewardType::Pos => {
            let pubkey = address.get("pubkey").and_then(Value::as_str).ok_or(PoolError::PosWithoutPubkey)?;
            pubkey_script(pubkey).ok_or_else(|| init_error("validateaddress", "pubkey is not a compressed key"))?
        }
        RewardType::Pow => {
            let script = address
                .get("scriptPubKey")
                .and_then(Value::as_str)
                .ok_or_else(|| init_error("validateaddress", "no scriptPubKey for pool address"))?;
            hex::decode(script).map_err(|_| init_error("validateaddress", "scriptPubKey is not hex"))?
        }
    };

    let (testnet, protocol_version, connections, difficulty, network_hash_rate) = if !equihash {
        let network = get(if coin.no_network_info { "getinfo" } else { "getnetworkinfo" });
        let stats = get(if coin.get_info { "getinfo" } else { "getmininginfo" });
        let testnet = if coin.get_info {
            stats.get("testnet").and_then(Value::as_bool).unwrap_or(false)
        } else {
            stats.get("chain").and_then(Value::as_str) == Some("test")
        };
        let algo_key = coin
            .pass_algorithm_key
            .as_ref()
            .and_then(|h| h.resolve(&coin.algorithm))
            .or_else(|| coin.pass_algorithm.as_ref().and_then(|h| h.resolve(&coin.algorithm)))
            .unwrap_or_else(|| coin.algorithm.clone());
        let difficulty = stats
            .get(format!("difficulty_{}", algo_key).as_str())
            .or_else(|| stats.get("difficulty"))
            .and_then(difficulty_value);
        (
            testnet,
            network.get("protocolversion").and_then(Value::as_u64),
            network.get("connections").and_then(Value::as_u64),
            difficulty,
            get("getnetworkhashps").as_f64(),
        )
    } else {
        let info = get(if coin.has_get_info { "getinfo" } else { "getblockchaininfo" });
        let network = get(if coin.has_get_info { "getinfo" } else { "getnetworkinfo" });
        let testnet = if coin.has_get_info {
            info.get("testnet").and_then(Value::as_bool).unwrap_or(false)
        } else {
            info.get("chain").and_then(Value::as_str) == Some("test")
        };
        (
            testnet,
            network.get("protocolversion").and_then(Value::as_u64),
            network.get("connections").and_then(Value::as_u64),
            info.get("difficulty").and_then(difficulty_value),
            get("getmininginfo").get("networkhashps").and_then(Value::as_f64),
        )
    };

    let submit_probe = by_method.get("submitblock").cloned().unwrap_or_default();
    let has_submit_method = match &submit_probe.error {
        Some(e) if e.message == "Method not found" => false,
        Some(e) if e.code == -1 => true,
        _ => {
            return Err(PoolError::SubmitMethodUnknown(
                json!({ "result": submit_probe.result, "error": submit_probe.error }).to_string(),
            ))
        }
    };

    Ok(CoinInfo {
        reward,
        pool_script,
        has_submit_method,
        testnet,
        protocol_version,
        connections,
        network_difficulty: difficulty.unwrap_or(0.0),
        network_hash_rate,
    })
}

/// Resolve reward recipients into output scripts. Recipients whose script
/// cannot be built are logged and skipped.
pub async fn setup_recipients(
    config: &PoolConfig,
    daemon: &dyn DaemonRpc,
    events: &broadcast::Sender<PoolEvent>,
) -> (Vec<Recipient>, f64) {
    let mut recipients = Vec::new();
    let mut fee_percent = 0.0;

    for (address, percent) in &config.reward_recipients {
        let script = if address.len() == 40 {
            mining_key_script(address)
        } else {
            match daemon.cmd_first("validateaddress", json!([address])).await {
                Ok(info) => info
                    .get("scriptPubKey")
                    .and_then(Value::as_str)
                    .and_then(|s| hex::decode(s).ok()),
                Err(_) => None,
            }
        };
        match script {
            Some(script) => {
                recipients.push(Recipient { fraction: percent / 100.0, script });
                fee_percent += percent;
            }
            None => emit_log(events, Severity::Error, PoolError::RecipientScript(address.clone()).to_string()),
        }
    }

    if recipients.is_empty() {
        emit_log(
            events,
            Severity::Error,
            "No rewardRecipients have been setup which means no fees will be taken".to_string(),
        );
    }
    (recipients, fee_percent)
}

/// Fold a `getblocksubsidy` answer into an Equihash template.
pub fn merge_block_subsidy(template: &mut Map<String, Value>, subsidy: &Value, config: &PoolConfig) {
    let num = |key: &str| subsidy.get(key).and_then(Value::as_f64).filter(|v| *v != 0.0);
    let or_zero = |key: &str| json!(num(key).unwrap_or(0.0));

    template.insert("miner".into(), subsidy.get("miner").cloned().unwrap_or(Value::Null));

    let has_founders = template.get("founders").and_then(Value::as_f64).map_or(false, |v| v != 0.0);
    if !has_founders {
        let founders = num("founders")
            .or_else(|| num("community"))
            .unwrap_or_else(|| FOUNDER_SUBSIDY_KEYS.iter().filter_map(|k| num(*k)).sum());
        template.insert("founders".into(), json!(founders));
    }

    if let Some(treasury) = num("treasury") {
        template.insert("treasury".into(), json!(treasury));
    }

    let coin = &config.coin;
    if let (Some(pct), Some(reward)) = (coin.reward_miners_percent, coin.block_reward) {
        template.insert("miner".into(), json!(reward * pct));
    }
    if let (Some(pct), Some(reward)) = (coin.reward_founders_percent, coin.block_reward) {
        template.insert("founders".into(), json!(reward * pct));
    }

    template.insert("securenodes".into(), or_zero("securenodes"));
    template.insert("supernodes".into(), or_zero("supernodes"));

    let masternodes_started = template
        .get("masternode_payments_started")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let mut keys = vec![("infrastructure", "infrastructure"), ("giveaways", "giveaways")];
    if masternodes_started {
        keys.extend([
            ("masternodestotal", "masternodestotal"),
            ("governancetotal", "governancetotal"),
            ("founderstotal", "founderstotal"),
            ("founderamount", "founderamount"),
        ]);
    } else {
        keys.extend([
            ("chris", "founders-chris"),
            ("jimmy", "founders-jimmy"),
            ("scott", "founders-scott"),
            ("shelby", "founders-shelby"),
            ("loki", "founders-loki"),
        ]);
    }
    for (field, key) in keys {
        template.insert(field.into(), or_zero(key));
    }
}
