/// Share submission inputs and outcome records
///
/// A `ShareRecord` is never persisted here; it is handed to collaborators
/// (scoring, banning, stats) through the job and pool event streams.

use serde::Serialize;
use serde_json::Value;

/// Miner-supplied fields of a `mining.submit`.
#[derive(Debug, Clone, Default)]
pub struct ShareRequest {
    pub job_id: String,
    pub extra_nonce2: String,
    pub ntime: String,
    pub nonce: String,
    /// ASICBoost version bits (standard family).
    pub version_mask: Option<String>,
    /// Equihash solution hex, CompactSize prefix included.
    pub solution: Option<String>,
}

/// Server-side state of the submitting connection.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub extra_nonce1: String,
    pub difficulty: f64,
    pub previous_difficulty: Option<f64>,
    pub ip: String,
    pub port: u16,
    pub worker: String,
    pub is_solo_mining: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub job: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub worker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reward: Option<f64>,
    pub difficulty: f64,
    /// Achieved difficulty, formatted with 8 decimals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_diff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_diff_actual: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash_invalid: Option<String>,
    pub is_solo_mining: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Rejection message, or the acceptance diagnostic after a failed block submit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ShareRecord {
    pub fn rejected(request: &ShareRequest, client: &ClientContext, message: &str) -> Self {
        Self {
            job: request.job_id.clone(),
            ip: client.ip.clone(),
            worker: client.worker.clone(),
            difficulty: client.difficulty,
            is_solo_mining: client.is_solo_mining,
            error: Some(Value::String(message.to_string())),
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Result returned to the submitting miner on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareOutcome {
    pub block_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejected_record_shape() {
        let request = ShareRequest { job_id: "1f".into(), ..Default::default() };
        let client = ClientContext {
            ip: "10.0.0.1".into(),
            worker: "addr.rig".into(),
            difficulty: 16.0,
            ..Default::default()
        };
        let record = ShareRecord::rejected(&request, &client, "job not found");
        assert!(!record.is_valid());
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "job": "1f",
                "ip": "10.0.0.1",
                "worker": "addr.rig",
                "difficulty": 16.0,
                "isSoloMining": false,
                "error": "job not found"
            })
        );
    }
}
