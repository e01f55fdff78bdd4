//! Coin daemon access
//!
//! [`DaemonRpc`] is the seam the pool talks through: a fan-out `cmd` to every
//! configured instance and a `batch_cmd` against the first one. The HTTP
//! implementation lives in [`client`].

pub mod client;

pub use client::DaemonInterface;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{DaemonError, RpcError};

/// Outcome of one call on one daemon instance.
#[derive(Debug, Clone)]
pub struct InstanceResult {
    pub instance: usize,
    pub result: Result<Value, DaemonError>,
}

/// One entry of a batch response. Both fields may be absent.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RpcResult {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcResult {
    pub fn ok(value: Value) -> Self {
        Self { result: Some(value), error: None }
    }

    pub fn err(code: i64, message: &str) -> Self {
        Self {
            result: None,
            error: Some(RpcError { code, message: message.to_string() }),
        }
    }

    /// Non-null result with no error attached.
    pub fn value(&self) -> Option<&Value> {
        match (&self.error, &self.result) {
            (None, Some(v)) if !v.is_null() => Some(v),
            _ => None,
        }
    }
}

#[async_trait]
pub trait DaemonRpc: Send + Sync {
    fn instance_count(&self) -> usize;

    /// Issue `method` on every instance concurrently.
    async fn cmd(&self, method: &str, params: Value) -> Vec<InstanceResult>;

    /// Several calls in one request to the first instance, answered in order.
    async fn batch_cmd(&self, calls: Vec<(String, Value)>) -> Result<Vec<RpcResult>, DaemonError>;

    /// First successful answer, else the first error.
    async fn cmd_first(&self, method: &str, params: Value) -> Result<Value, DaemonError> {
        let mut first_err = None;
        for r in self.cmd(method, params).await {
            match r.result {
                Ok(v) => return Ok(v),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or(DaemonError::NoInstances))
    }

    /// Every instance answers `getpeerinfo`.
    async fn is_online(&self) -> bool {
        let results = self.cmd("getpeerinfo", json!([])).await;
        !results.is_empty() && results.iter().all(|r| r.result.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Result<Value, DaemonError>>);

    #[async_trait]
    impl DaemonRpc for Fixed {
        fn instance_count(&self) -> usize {
            self.0.len()
        }

        async fn cmd(&self, _method: &str, _params: Value) -> Vec<InstanceResult> {
            self.0
                .iter()
                .cloned()
                .enumerate()
                .map(|(instance, result)| InstanceResult { instance, result })
                .collect()
        }

        async fn batch_cmd(&self, _calls: Vec<(String, Value)>) -> Result<Vec<RpcResult>, DaemonError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_cmd_first_prefers_success() {
        let daemon = Fixed(vec![Err(DaemonError::Timeout), Ok(json!("tip"))]);
        assert_eq!(tokio_test::block_on(daemon.cmd_first("getbestblockhash", json!([]))), Ok(json!("tip")));
        assert!(!tokio_test::block_on(daemon.is_online()));

        let down = Fixed(vec![Err(DaemonError::CircuitOpen), Err(DaemonError::Timeout)]);
        assert_eq!(
            tokio_test::block_on(down.cmd_first("getbestblockhash", json!([]))),
            Err(DaemonError::CircuitOpen)
        );
        assert_eq!(
            tokio_test::block_on(Fixed(Vec::new()).cmd_first("x", json!([]))),
            Err(DaemonError::NoInstances)
        );
    }

    #[test]
    fn test_rpc_result_value() {
        assert_eq!(RpcResult::ok(json!(1)).value(), Some(&json!(1)));
        assert_eq!(RpcResult::ok(Value::Null).value(), None);
        assert_eq!(RpcResult::err(-1, "x").value(), None);

        let parsed: RpcResult = serde_json::from_value(json!({"result": null, "error": {"code": -32601, "message": "Method not found"}, "id": 1})).unwrap();
        assert_eq!(parsed.error.unwrap().message, "Method not found");
    }
}
