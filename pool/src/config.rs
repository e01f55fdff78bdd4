use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use coinpool_core::algorithms::{equihash::solution_layout, AlgorithmFamily, AlgorithmKind};
use coinpool_core::{AlgorithmParams, EquihashParams};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "pool_config.json";

/// Version bits a miner may roll when the coin does not configure a mask.
pub const DEFAULT_VERSION_MASK: u32 = 0x1fffe000;

/// Fallback difficulty for ports without a configured one.
pub const DEFAULT_PORT_DIFF: f64 = 8.0;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardType {
    #[serde(rename = "POW")]
    Pow,
    #[serde(rename = "POS")]
    Pos,
}

/// `true` passes the coin's own algorithm name, a string passes that name.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum AlgorithmHint {
    Flag(bool),
    Name(String),
}

impl AlgorithmHint {
    pub fn resolve(&self, algorithm: &str) -> Option<String> {
        match self {
            AlgorithmHint::Flag(true) => Some(algorithm.to_string()),
            AlgorithmHint::Flag(false) => None,
            AlgorithmHint::Name(name) => Some(name.clone()),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct CoinConfig {
    pub name: String,
    pub symbol: String,
    pub algorithm: String,
    /// Must agree with the algorithm's family when given.
    #[serde(default)]
    pub family: Option<AlgorithmFamily>,
    /// Auto-detected from `getdifficulty` when absent.
    #[serde(default)]
    pub reward: Option<RewardType>,
    #[serde(default)]
    pub tx_messages: bool,
    #[serde(default)]
    pub normal_hashing: bool,
    #[serde(default)]
    pub n_value: Option<u32>,
    #[serde(default)]
    pub r_value: Option<u32>,
    #[serde(default)]
    pub parameters: Option<EquihashParams>,
    /// Scrypt-N activation table, `{"2048": 1389306217, ...}`.
    #[serde(default)]
    pub time_table: Option<BTreeMap<String, u64>>,
    /// ASICBoost mask as hex, e.g. `"1fffe000"`.
    #[serde(default)]
    pub version_mask: Option<String>,
    #[serde(default)]
    pub pass_algorithm: Option<AlgorithmHint>,
    #[serde(default)]
    pub pass_algorithm_key: Option<AlgorithmHint>,
    #[serde(default)]
    pub supports_segwit: bool,
    #[serde(default)]
    pub has_get_info: bool,
    #[serde(default)]
    pub get_info: bool,
    #[serde(default)]
    pub no_network_info: bool,
    #[serde(default)]
    pub reward_miners_percent: Option<f64>,
    #[serde(default)]
    pub reward_founders_percent: Option<f64>,
    #[serde(default)]
    pub block_reward: Option<f64>,
    /// Output scripts (hex) for Equihash founders / treasury payments.
    #[serde(default)]
    pub founders_script: Option<String>,
    #[serde(default)]
    pub treasury_script: Option<String>,
}

impl CoinConfig {
    pub fn algorithm_params(&self, reward: RewardType) -> AlgorithmParams {
        AlgorithmParams {
            n_value: self.n_value,
            r_value: self.r_value,
            normal_hashing: self.normal_hashing,
            proof_of_stake: reward == RewardType::Pos,
            equihash: self.parameters.clone(),
            time_table: self.time_table.clone(),
        }
    }

    pub fn version_mask(&self) -> u32 {
        self.version_mask
            .as_deref()
            .and_then(|m| u32::from_str_radix(m.trim_start_matches("0x"), 16).ok())
            .unwrap_or(DEFAULT_VERSION_MASK)
    }

    pub fn equihash_params(&self) -> EquihashParams {
        self.parameters.clone().unwrap_or_default()
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_daemon_timeout")]
    pub timeout_secs: u64,
}

fn default_daemon_timeout() -> u64 { 30 }

#[derive(Deserialize, Clone, Debug)]
pub struct PortConfig {
    #[serde(default = "default_port_diff")]
    pub diff: f64,
}

fn default_port_diff() -> f64 { DEFAULT_PORT_DIFF }

#[derive(Deserialize, Clone, Debug)]
pub struct PoolConfig {
    pub coin: CoinConfig,
    /// Pool payout address.
    pub address: String,
    /// Address (or 40-hex mining key) -> percent of the block reward.
    #[serde(default)]
    pub reward_recipients: BTreeMap<String, f64>,
    pub daemons: Vec<DaemonConfig>,
    #[serde(default)]
    pub instance_id: Option<u32>,
    /// 0 disables polling.
    #[serde(default = "default_block_refresh")]
    pub block_refresh_interval_ms: u64,
    #[serde(default = "default_rebroadcast")]
    pub job_rebroadcast_timeout_secs: u64,
    #[serde(default)]
    pub emit_invalid_block_hashes: bool,
    #[serde(default)]
    pub ports: BTreeMap<u16, PortConfig>,
    #[serde(default)]
    pub metrics_listen: Option<String>,
    #[serde(default = "default_coinbase_signature")]
    pub coinbase_signature: String,
}

fn default_block_refresh() -> u64 { 1000 }
fn default_rebroadcast() -> u64 { 55 }
fn default_coinbase_signature() -> String { "/coinpool/".to_string() }

impl PoolConfig {
    /// Read `COINPOOL_CONFIG` (or `pool_config.json`), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("COINPOOL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pool config {}", path))?;
        let mut cfg = Self::from_json(&txt)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        tracing::info!("Loaded pool config from {} ({} daemon(s))", path, cfg.daemons.len());
        Ok(cfg)
    }

    pub fn from_json(txt: &str) -> Result<Self> {
        serde_json::from_str(txt).context("failed to parse pool config")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COINPOOL_INSTANCE_ID") {
            match v.parse() {
                Ok(id) => self.instance_id = Some(id),
                Err(_) => tracing::warn!("Ignoring invalid COINPOOL_INSTANCE_ID '{}'", v),
            }
        }
        if let Ok(v) = std::env::var("COINPOOL_BLOCK_REFRESH_MS") {
            self.block_refresh_interval_ms = v.parse().unwrap_or(self.block_refresh_interval_ms);
        }
        if let Ok(v) = std::env::var("COINPOOL_METRICS_LISTEN") {
            if !v.trim().is_empty() {
                self.metrics_listen = Some(v);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.daemons.is_empty() {
            bail!(crate::error::PoolError::NoDaemons);
        }
        if self.address.trim().is_empty() {
            bail!("pool address must be set");
        }

        let kind = AlgorithmKind::from_name(&self.coin.algorithm)?;
        if let Some(family) = self.coin.family {
            if family != kind.family() {
                bail!(
                    "coin family {:?} does not match algorithm {} ({:?})",
                    family,
                    kind,
                    kind.family()
                );
            }
        }
        if kind.family() == AlgorithmFamily::Equihash {
            let p = self.coin.equihash_params();
            if solution_layout(p.n, p.k).is_none() {
                bail!("unsupported equihash parameters {}_{}", p.n, p.k);
            }
        }

        if let Some(mask) = &self.coin.version_mask {
            if u32::from_str_radix(mask.trim_start_matches("0x"), 16).is_err() {
                bail!("version_mask '{}' is not hex", mask);
            }
        }

        let mut total = 0.0;
        for (recipient, percent) in &self.reward_recipients {
            if !(*percent >= 0.0) {
                bail!("reward recipient {} has invalid percent {}", recipient, percent);
            }
            total += percent;
        }
        if total >= 100.0 {
            bail!("reward recipients take {}% of the block reward", total);
        }

        for (port, cfg) in &self.ports {
            if cfg.diff <= 0.0 {
                bail!("port {} has non-positive difficulty {}", port, cfg.diff);
            }
        }

        Ok(())
    }

    pub fn family(&self) -> Result<AlgorithmFamily> {
        Ok(AlgorithmKind::from_name(&self.coin.algorithm)?.family())
    }

    pub fn port_difficulty(&self, port: u16) -> f64 {
        self.ports.get(&port).map(|p| p.diff).unwrap_or(DEFAULT_PORT_DIFF)
    }

    /// Sum of configured recipient percentages.
    pub fn fee_percent(&self) -> f64 {
        self.reward_recipients.values().sum()
    }
}
