use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Rejected submission, carrying the stratum error code.
///
/// 20 malformed, 21 job not found, 22 duplicate / bad solution version,
/// 23 below the assigned difficulty.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("[{code}] {message}")]
pub struct ShareError {
    pub code: i32,
    pub message: String,
}

impl ShareError {
    pub const MALFORMED: i32 = 20;
    pub const JOB_NOT_FOUND: i32 = 21;
    pub const DUPLICATE: i32 = 22;
    pub const LOW_DIFFICULTY: i32 = 23;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(Self::MALFORMED, message)
    }

    pub fn job_not_found() -> Self {
        Self::new(Self::JOB_NOT_FOUND, "job not found")
    }

    pub fn duplicate() -> Self {
        Self::new(Self::DUPLICATE, "duplicate share")
    }

    pub fn low_difficulty(share_diff: f64) -> Self {
        Self::new(Self::LOW_DIFFICULTY, format!("low difficulty share of {}", share_diff))
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// Stratum error triple `[code, message, null]`.
    pub fn to_stratum(&self) -> Value {
        json!([self.code, self.message, Value::Null])
    }
}

/// A `getblocktemplate` payload that cannot be turned into a job.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    #[error("template field {field} is not valid hex: {value}")]
    InvalidHex { field: &'static str, value: String },

    #[error("template field {field} has length {actual}, expected {expected}")]
    BadLength { field: &'static str, expected: usize, actual: usize },

    #[error("template target is invalid: {0}")]
    Target(#[from] coinpool_core::TargetError),

    #[error("template is missing {0}")]
    Missing(&'static str),

    #[error("template does not deserialize: {0}")]
    Malformed(String),
}

impl TemplateError {
    pub fn hex(field: &'static str, value: &str) -> Self {
        Self::InvalidHex { field, value: value.to_string() }
    }
}

/// JSON-RPC error object returned by a daemon.
#[derive(Debug, Error, Clone, PartialEq, Deserialize, serde::Serialize)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DaemonError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("daemon transport failed: {0}")]
    Transport(String),

    #[error("daemon request timed out")]
    Timeout,

    #[error("daemon circuit breaker is open")]
    CircuitOpen,

    #[error("no daemon instances configured")]
    NoInstances,
}

impl DaemonError {
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            DaemonError::Rpc(e) => Some(e),
            _ => None,
        }
    }

    /// JSON form used in logs and in share diagnostics.
    pub fn to_json(&self) -> Value {
        match self {
            DaemonError::Rpc(e) => json!({ "code": e.code, "message": e.message }),
            other => json!({ "message": other.to_string() }),
        }
    }
}

/// Conditions that keep the pool from starting.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no daemons have been configured - pool cannot start")]
    NoDaemons,

    #[error("daemon reports address is not valid")]
    InvalidAddress,

    #[error("the address provided is not from the daemon wallet - this is required for POS coins")]
    PosWithoutPubkey,

    #[error("could not detect block submission RPC method: {0}")]
    SubmitMethodUnknown(String),

    #[error("error with init RPC {method}: {detail}")]
    InitRpc { method: String, detail: String },

    #[error("error generating output script for {0} in reward recipients")]
    RecipientScript(String),

    #[error("getblocktemplate failed on creating first job: {0}")]
    FirstJob(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),
}
