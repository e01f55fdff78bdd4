/// Daemon JSON-RPC client over HTTP
///
/// One `DaemonInstance` per configured daemon, each behind its own circuit
/// breaker. Bitcoin-style daemons answer RPC errors with HTTP 500 and a JSON
/// body, so the body is parsed regardless of status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Buf, Method, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{DaemonRpc, InstanceResult, RpcResult};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, RpcError};
use crate::metrics::prometheus as metrics;

#[derive(Debug, Clone)]
struct CircuitBreaker {
    failures: u32,
    last_failure: Option<Instant>,
    is_open: bool,
    max_failures: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            is_open: false,
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }

    fn record_failure(&mut self, instance: usize) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());

        if self.failures >= self.max_failures && !self.is_open {
            self.is_open = true;
            tracing::error!(
                "Circuit breaker for daemon instance {} tripped after {} failures, pausing for {}s",
                instance,
                self.failures,
                self.reset_timeout.as_secs()
            );
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
    }

    fn check(&mut self) -> Result<(), DaemonError> {
        if self.is_open {
            if let Some(last_fail) = self.last_failure {
                if last_fail.elapsed() > self.reset_timeout {
                    tracing::info!("Circuit breaker half-open, retrying daemon");
                    self.is_open = false;
                    self.failures = 0;
                } else {
                    return Err(DaemonError::CircuitOpen);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Daemons disagree on the error shape; anything that is not
/// `{code, message}` is kept as text.
fn rpc_error(value: Value) -> RpcError {
    match serde_json::from_value::<RpcError>(value.clone()) {
        Ok(e) => e,
        Err(_) => RpcError {
            code: -1,
            message: match value {
                Value::String(s) => s,
                other => other.to_string(),
            },
        },
    }
}

pub struct DaemonInstance {
    index: usize,
    url: String,
    authorization: Option<String>,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
    circuit_breaker: RwLock<CircuitBreaker>,
}

impl DaemonInstance {
    fn new(index: usize, cfg: &DaemonConfig) -> Self {
        let url = format!("http://{}:{}/", cfg.host, cfg.port);
        let authorization = if cfg.user.is_empty() && cfg.password.is_empty() {
            None
        } else {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", cfg.user, cfg.password));
            Some(format!("Basic {}", token))
        };
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();

        tracing::info!("Daemon instance {} at {}", index, url);

        Self {
            index,
            url,
            authorization,
            timeout: Duration::from_secs(cfg.timeout_secs),
            client,
            circuit_breaker: RwLock::new(CircuitBreaker::new()),
        }
    }

    /// POST `payload` and return the parsed JSON body.
    async fn post(&self, payload: &Value) -> Result<Value, DaemonError> {
        metrics::inc_rpc_requests();

        let res: Result<Value, DaemonError> = async {
            self.circuit_breaker.write().await.check()?;

            let body = serde_json::to_vec(payload).map_err(|e| DaemonError::Transport(e.to_string()))?;
            let mut builder = Request::builder()
                .method(Method::POST)
                .uri(&self.url)
                .header("Content-Type", "application/json");
            if let Some(auth) = &self.authorization {
                builder = builder.header("Authorization", auth);
            }
            let req = builder
                .body(Full::new(Bytes::from(body)))
                .map_err(|e| DaemonError::Transport(e.to_string()))?;

            let sent = tokio::time::timeout(self.timeout, self.client.request(req)).await;
            let response = match sent {
                Err(_) => {
                    self.circuit_breaker.write().await.record_failure(self.index);
                    return Err(DaemonError::Timeout);
                }
                Ok(Err(e)) => {
                    self.circuit_breaker.write().await.record_failure(self.index);
                    return Err(DaemonError::Transport(format!("connection failed: {}", e)));
                }
                Ok(Ok(r)) => r,
            };

            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| DaemonError::Transport(e.to_string()))?
                .to_bytes();

            match serde_json::from_reader::<_, Value>(body.reader()) {
                Ok(v) => {
                    self.circuit_breaker.write().await.record_success();
                    Ok(v)
                }
                Err(_) if status == hyper::StatusCode::UNAUTHORIZED => {
                    Err(DaemonError::Transport("unauthorized, check daemon user and password".to_string()))
                }
                Err(e) => {
                    self.circuit_breaker.write().await.record_failure(self.index);
                    Err(DaemonError::Transport(format!("HTTP {} with unparsable body: {}", status, e)))
                }
            }
        }
        .await;

        if res.is_err() {
            metrics::inc_rpc_errors();
        }
        res
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, DaemonError> {
        let payload = json!({ "jsonrpc": "1.0", "id": next_id(), "method": method, "params": params });
        let body = self.post(&payload).await?;
        let response: RpcResponse =
            serde_json::from_value(body).map_err(|e| DaemonError::Transport(e.to_string()))?;

        match response.error {
            Some(err) if !err.is_null() => {
                metrics::inc_rpc_errors();
                Err(DaemonError::Rpc(rpc_error(err)))
            }
            _ => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    async fn batch(&self, calls: Vec<(String, Value)>) -> Result<Vec<RpcResult>, DaemonError> {
        let payload: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(i, (method, params))| json!({ "jsonrpc": "1.0", "id": i, "method": method, "params": params }))
            .collect();
        let body = self.post(&Value::Array(payload)).await?;
        let responses: Vec<RpcResponse> =
            serde_json::from_value(body).map_err(|e| DaemonError::Transport(format!("batch response: {}", e)))?;

        let mut ordered = vec![RpcResult::default(); calls.len()];
        for (pos, r) in responses.into_iter().enumerate() {
            let slot = r.id.as_ref().and_then(Value::as_u64).map(|i| i as usize).unwrap_or(pos);
            if let Some(entry) = ordered.get_mut(slot) {
                *entry = RpcResult {
                    result: r.result,
                    error: r.error.filter(|e| !e.is_null()).map(rpc_error),
                };
            }
        }
        Ok(ordered)
    }
}

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// All configured daemons.
pub struct DaemonInterface {
    instances: Vec<DaemonInstance>,
}

impl DaemonInterface {
    pub fn new(configs: &[DaemonConfig]) -> Result<Self, DaemonError> {
        if configs.is_empty() {
            return Err(DaemonError::NoInstances);
        }
        Ok(Self {
            instances: configs.iter().enumerate().map(|(i, c)| DaemonInstance::new(i, c)).collect(),
        })
    }
}

#[async_trait]
impl DaemonRpc for DaemonInterface {
    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    async fn cmd(&self, method: &str, params: Value) -> Vec<InstanceResult> {
        let calls = self.instances.iter().map(|inst| {
            let params = params.clone();
            async move {
                InstanceResult {
                    instance: inst.index,
                    result: inst.call(method, params).await,
                }
            }
        });
        futures::future::join_all(calls).await
    }

    async fn batch_cmd(&self, calls: Vec<(String, Value)>) -> Result<Vec<RpcResult>, DaemonError> {
        let first = self.instances.first().ok_or(DaemonError::NoInstances)?;
        first.batch(calls).await
    }
}
