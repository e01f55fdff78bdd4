//! Job templates and the two protocol families
//!
//! A protocol family turns a daemon block template into a job and checks
//! submissions against it. `standard` splices extranonces into a two-part
//! coinbase and hashes an 80-byte header; `equihash` appends a solution to a
//! 140-byte header and delegates the proof check to a verifier.

pub mod coinbase;
pub mod equihash;
pub mod merkle;
pub mod standard;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use coinpool_core::{AlgorithmDescriptor, AlgorithmFamily};
use num_bigint::BigUint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{CoinConfig, RewardType};
use crate::error::{ShareError, TemplateError};
use crate::shares::{ClientContext, ShareRequest};

pub use equihash::{EquihashFamily, EquihashJob};
pub use standard::{StandardFamily, StandardJob};

/// Upper bound on a submitted nTime, relative to the pool clock.
pub const MAX_FUTURE_NTIME_SECS: i64 = 7200;

/// Shares within 1% of the assigned difficulty still count.
pub const DIFFICULTY_TOLERANCE: f64 = 0.99;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RpcTransaction {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl RpcTransaction {
    /// Display-order id used for the merkle tree; `txid` wins over `hash`.
    pub fn id(&self) -> Option<&str> {
        self.txid.as_deref().or(self.hash.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoinbaseAux {
    #[serde(default)]
    pub flags: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoinbaseTxn {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Extra coinbase output the daemon asks for (masternode / payee).
#[derive(Debug, Clone, PartialEq)]
pub struct PayeeOutput {
    pub script: Vec<u8>,
    pub amount: u64,
}

/// A daemon `getblocktemplate` response.
///
/// Fields merged in from `getblocksubsidy` (Equihash family) sit next to the
/// template's own; anything else is kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RpcTemplate {
    pub version: u32,
    pub previousblockhash: String,
    pub height: u64,
    pub curtime: u32,
    pub bits: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbasevalue: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbaseaux: Option<CoinbaseAux>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_witness_commitment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masternode: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbasetxn: Option<CoinbaseTxn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalsaplingroothash: Option<String>,
    /// Verus solution-version prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founders: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treasury: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub securenodes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supernodes: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RpcTemplate {
    pub fn from_value(value: Value) -> Result<Self, TemplateError> {
        serde_json::from_value(value).map_err(|e| TemplateError::Malformed(e.to_string()))
    }

    /// Masternode payments that come with an output script.
    pub fn payee_outputs(&self) -> Result<Vec<PayeeOutput>, TemplateError> {
        let entries: Vec<&Value> = match &self.masternode {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(obj @ Value::Object(_)) => vec![obj],
            _ => Vec::new(),
        };
        let mut outputs = Vec::with_capacity(entries.len());
        for entry in entries {
            let (Some(script), Some(amount)) = (
                entry.get("script").and_then(Value::as_str),
                entry.get("amount").and_then(Value::as_u64),
            ) else {
                continue;
            };
            let script = hex::decode(script).map_err(|_| TemplateError::hex("masternode.script", script))?;
            outputs.push(PayeeOutput { script, amount });
        }
        Ok(outputs)
    }
}

/// One submission tuple, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubmissionKey {
    Standard {
        extra_nonce1: String,
        extra_nonce2: String,
        ntime: String,
        nonce: String,
    },
    Equihash {
        nonce: String,
        solution: String,
    },
}

impl SubmissionKey {
    pub fn standard(extra_nonce1: &str, extra_nonce2: &str, ntime: &str, nonce: &str) -> Self {
        Self::Standard {
            extra_nonce1: extra_nonce1.to_lowercase(),
            extra_nonce2: extra_nonce2.to_lowercase(),
            ntime: ntime.to_lowercase(),
            nonce: nonce.to_lowercase(),
        }
    }

    pub fn equihash(nonce: &str, solution: &str) -> Self {
        Self::Equihash {
            nonce: nonce.to_lowercase(),
            solution: solution.to_lowercase(),
        }
    }
}

/// Grow-only set of submissions seen for one job.
#[derive(Debug, Default)]
pub struct SubmissionRegistry {
    seen: Mutex<HashSet<SubmissionKey>>,
}

impl SubmissionRegistry {
    /// `true` the first time a tuple is seen, `false` on every repeat.
    pub fn register(&self, key: SubmissionKey) -> bool {
        self.seen.lock().insert(key)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only view of a job, shared as `Arc` between the manager and collaborators.
pub trait JobTemplate: Send + Sync + 'static {
    fn job_id(&self) -> &str;
    fn rpc(&self) -> &RpcTemplate;
    fn target(&self) -> &BigUint;
    /// Network difficulty of this job, unscaled.
    fn difficulty(&self) -> f64;
    /// Positional `mining.notify` parameters.
    fn job_params(&self) -> Vec<Value>;
    fn submissions(&self) -> &SubmissionRegistry;

    fn register_submit(&self, key: SubmissionKey) -> bool {
        self.submissions().register(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    /// Fraction of the reward, 0.0..1.0.
    pub fraction: f64,
    pub script: Vec<u8>,
}

/// Everything a family needs to build jobs, fixed for the life of the pool.
#[derive(Debug, Clone)]
pub struct FamilyContext {
    pub algorithm: Arc<AlgorithmDescriptor>,
    pub coin: CoinConfig,
    pub reward: RewardType,
    pub pool_script: Vec<u8>,
    pub recipients: Vec<Recipient>,
    pub coinbase_signature: String,
    pub emit_invalid_block_hashes: bool,
}

/// A share that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedShare<J> {
    pub job: Arc<J>,
    /// Assigned difficulty credited, possibly the previous one.
    pub difficulty: f64,
    pub share_diff: f64,
    pub block_diff: f64,
    pub block_diff_actual: f64,
    pub block_reward: Option<f64>,
    pub block_hash: Option<String>,
    pub block_hash_invalid: Option<String>,
    pub block_hex: Option<String>,
}

/// Template building and share validation for one protocol family.
pub trait ProtocolFamily: Send + Sync + Sized + 'static {
    type Job: JobTemplate;

    const FAMILY: AlgorithmFamily;
    const JOB_COUNTER_START: u64;
    const JOB_COUNTER_MAX: u64;
    /// Index of the clean-jobs flag in `job_params`.
    const CLEAN_JOBS_INDEX: usize;
    /// Whether `getblocksubsidy` must be merged into templates.
    const USES_BLOCK_SUBSIDY: bool;

    fn new(ctx: FamilyContext) -> Self;

    fn context(&self) -> &FamilyContext;

    fn extra_nonce2_size(&self) -> usize;

    fn build_job(&self, job_id: String, rpc: RpcTemplate) -> Result<Self::Job, TemplateError>;

    fn validate_share(
        &self,
        jobs: &HashMap<String, Arc<Self::Job>>,
        request: &ShareRequest,
        client: &ClientContext,
    ) -> Result<ValidatedShare<Self::Job>, ShareError>;

    /// Positional params for `getblocktemplate`.
    fn block_template_params(coin: &CoinConfig) -> Value;
}

pub(crate) fn lookup_job<J>(jobs: &HashMap<String, Arc<J>>, job_id: &str) -> Result<Arc<J>, ShareError> {
    jobs.get(job_id).cloned().ok_or_else(ShareError::job_not_found)
}

pub(crate) fn check_ntime_window(ntime: u32, curtime: u32, now: i64) -> Result<(), ShareError> {
    if ntime < curtime || i64::from(ntime) > now + MAX_FUTURE_NTIME_SECS {
        return Err(ShareError::malformed("ntime out of range"));
    }
    Ok(())
}

/// Apply the assigned-difficulty check to a non-candidate share.
///
/// Returns the difficulty to credit: the current one, or the previous one
/// when a retarget landed between broadcast and submission.
pub(crate) fn credited_difficulty(share_diff: f64, client: &ClientContext) -> Result<f64, ShareError> {
    if share_diff / client.difficulty >= DIFFICULTY_TOLERANCE {
        return Ok(client.difficulty);
    }
    match client.previous_difficulty {
        Some(previous) if previous > 0.0 && share_diff >= previous => Ok(previous),
        _ => Err(ShareError::low_difficulty(share_diff)),
    }
}

pub(crate) fn decode_hash(field: &'static str, value: &str) -> Result<[u8; 32], TemplateError> {
    let bytes = hex::decode(value).map_err(|_| TemplateError::hex(field, value))?;
    bytes.try_into().map_err(|b: Vec<u8>| TemplateError::BadLength {
        field,
        expected: 32,
        actual: b.len(),
    })
}

/// Bits field as it appears in the header (little-endian).
pub(crate) fn bits_le(bits: &str) -> Result<[u8; 4], TemplateError> {
    let bytes = hex::decode(bits).map_err(|_| TemplateError::hex("bits", bits))?;
    let mut out: [u8; 4] = bytes.try_into().map_err(|b: Vec<u8>| TemplateError::BadLength {
        field: "bits",
        expected: 4,
        actual: b.len(),
    })?;
    out.reverse();
    Ok(out)
}

/// Template target, or the one encoded in `bits`.
pub(crate) fn template_target(rpc: &RpcTemplate) -> Result<BigUint, TemplateError> {
    match &rpc.target {
        Some(t) => Ok(coinpool_core::target::parse_target_hex(t)?),
        None => Ok(coinpool_core::target::target_from_bits(&rpc.bits)?),
    }
}
