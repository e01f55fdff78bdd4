/// Job Manager - current job, valid-job set and share validation
///
/// Owns the job id and extranonce counters. Every template change and every
/// validated (or rejected) share is reported as a [`JobEvent`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::counters::{ExtraNonceCounter, JobCounter};
use crate::error::{ShareError, TemplateError};
use crate::jobs::{JobTemplate, ProtocolFamily, RpcTemplate};
use crate::metrics::prometheus as metrics;
use crate::shares::{ClientContext, ShareOutcome, ShareRecord, ShareRequest};

#[derive(Debug)]
pub enum JobEvent<J> {
    /// New previous-block hash: miners must drop older work.
    NewBlock(Arc<J>),
    /// Same chain tip, refreshed transactions.
    UpdatedBlock(Arc<J>),
    Share {
        record: ShareRecord,
        /// Serialized block when the share meets the network target.
        block_hex: Option<String>,
    },
}

pub struct JobManager<F: ProtocolFamily> {
    family: F,
    job_counter: JobCounter,
    extra_nonce_counter: ExtraNonceCounter,
    current_job: Option<Arc<F::Job>>,
    valid_jobs: HashMap<String, Arc<F::Job>>,
    events: mpsc::UnboundedSender<JobEvent<F::Job>>,
}

impl<F: ProtocolFamily> JobManager<F> {
    pub fn new(family: F, instance_id: Option<u32>) -> (Self, mpsc::UnboundedReceiver<JobEvent<F::Job>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            family,
            job_counter: JobCounter::new(F::JOB_COUNTER_START, F::JOB_COUNTER_MAX),
            extra_nonce_counter: ExtraNonceCounter::new(instance_id),
            current_job: None,
            valid_jobs: HashMap::new(),
            events: tx,
        };
        (manager, rx)
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn current_job(&self) -> Option<&Arc<F::Job>> {
        self.current_job.as_ref()
    }

    pub fn valid_job_ids(&self) -> Vec<String> {
        self.valid_jobs.keys().cloned().collect()
    }

    pub fn next_extra_nonce(&mut self) -> String {
        self.extra_nonce_counter.next()
    }

    pub fn extra_nonce1_size(&self) -> usize {
        self.extra_nonce_counter.size()
    }

    pub fn extra_nonce2_size(&self) -> usize {
        self.family.extra_nonce2_size()
    }

    fn emit(&self, event: JobEvent<F::Job>) {
        // A closed receiver means the pool is shutting down.
        let _ = self.events.send(event);
    }

    /// Accept a template when it moves the chain tip forward.
    ///
    /// Returns `Ok(true)` when a new job was installed (and `NewBlock`
    /// emitted), `Ok(false)` for the same tip or an older height.
    pub fn process_template(&mut self, rpc: RpcTemplate) -> Result<bool, TemplateError> {
        if let Some(current) = &self.current_job {
            let current = current.rpc();
            if current.previousblockhash == rpc.previousblockhash {
                return Ok(false);
            }
            if rpc.height < current.height {
                tracing::debug!(
                    "Ignoring template at height {} behind current {}",
                    rpc.height,
                    current.height
                );
                return Ok(false);
            }
        }

        let job_id = self.job_counter.next();
        let height = rpc.height;
        let job = Arc::new(self.family.build_job(job_id.clone(), rpc)?);

        self.current_job = Some(job.clone());
        self.valid_jobs.clear();
        self.valid_jobs.insert(job_id, job.clone());

        metrics::inc_template_updates();
        metrics::set_template_height(height);
        self.emit(JobEvent::NewBlock(job));
        Ok(true)
    }

    /// Replace the current job without invalidating older ones.
    ///
    /// Only a template on the current tip is taken; `Ok(false)` when the tip
    /// moved since `rpc` was fetched.
    pub fn update_current_job(&mut self, rpc: RpcTemplate) -> Result<bool, TemplateError> {
        if let Some(current) = &self.current_job {
            let current = current.rpc();
            if current.previousblockhash != rpc.previousblockhash || rpc.height < current.height {
                tracing::debug!(
                    "Dropping refresh at height {} for superseded tip, current height {}",
                    rpc.height,
                    current.height
                );
                return Ok(false);
            }
        }

        let job_id = self.job_counter.next();
        let job = Arc::new(self.family.build_job(job_id.clone(), rpc)?);

        self.current_job = Some(job.clone());
        self.valid_jobs.insert(job_id, job.clone());

        metrics::inc_template_updates();
        self.emit(JobEvent::UpdatedBlock(job));
        Ok(true)
    }

    /// Validate one submission and emit the resulting share record.
    pub fn process_share(&self, request: &ShareRequest, client: &ClientContext) -> Result<ShareOutcome, ShareError> {
        let share = match self.family.validate_share(&self.valid_jobs, request, client) {
            Ok(share) => share,
            Err(err) => {
                metrics::inc_shares_rejected();
                tracing::debug!("Rejected share from {} ({}): {}", client.worker, client.ip, err);
                self.emit(JobEvent::Share {
                    record: ShareRecord::rejected(request, client, &err.message),
                    block_hex: None,
                });
                return Err(err);
            }
        };

        metrics::inc_shares_accepted();
        if share.block_hex.is_some() {
            metrics::inc_block_candidates();
            tracing::info!(
                "Block candidate at height {} from {} ({:?})",
                share.job.rpc().height,
                client.worker,
                share.block_hash
            );
        }

        let record = ShareRecord {
            job: request.job_id.clone(),
            ip: client.ip.clone(),
            port: Some(client.port),
            worker: client.worker.clone(),
            height: Some(share.job.rpc().height),
            block_reward: share.block_reward,
            difficulty: share.difficulty,
            share_diff: Some(format!("{:.8}", share.share_diff)),
            block_diff: Some(share.block_diff),
            block_diff_actual: Some(share.block_diff_actual),
            block_hash: share.block_hash.clone(),
            block_hash_invalid: share.block_hash_invalid,
            is_solo_mining: client.is_solo_mining,
            tx_hash: None,
            error: None,
        };
        self.emit(JobEvent::Share { record, block_hex: share.block_hex });

        Ok(ShareOutcome { block_hash: share.block_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoinConfig, RewardType};
    use crate::jobs::{FamilyContext, StandardFamily, StandardJob};
    use coinpool_core::{algorithms, AlgorithmParams};
    use serde_json::json;

    fn manager() -> (JobManager<StandardFamily>, mpsc::UnboundedReceiver<JobEvent<StandardJob>>) {
        let coin: CoinConfig =
            serde_json::from_value(json!({"name": "Bitcoin", "symbol": "btc", "algorithm": "sha256"})).unwrap();
        let family = StandardFamily::new(FamilyContext {
            algorithm: Arc::new(algorithms::resolve("sha256", &AlgorithmParams::default()).unwrap()),
            coin,
            reward: RewardType::Pow,
            pool_script: vec![0x51],
            recipients: Vec::new(),
            coinbase_signature: "/test/".into(),
            emit_invalid_block_hashes: false,
        });
        JobManager::new(family, Some(1))
    }

    fn template(prev: u8, height: u64) -> RpcTemplate {
        RpcTemplate {
            version: 0x2000_0000,
            previousblockhash: format!("{:02x}", prev).repeat(32),
            height,
            curtime: 1_700_000_000,
            bits: "1d00ffff".into(),
            coinbasevalue: Some(5_000_000_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_block_replaces_valid_jobs() {
        let (mut m, mut rx) = manager();
        assert!(m.process_template(template(1, 100)).unwrap());
        assert!(matches!(rx.try_recv(), Ok(JobEvent::NewBlock(job)) if job.job_id() == "1"));

        assert!(!m.process_template(template(1, 100)).unwrap());
        assert!(rx.try_recv().is_err());

        assert!(m.process_template(template(2, 101)).unwrap());
        assert_eq!(m.valid_job_ids(), vec!["2".to_string()]);
    }

    #[test]
    fn test_stale_height_is_ignored() {
        let (mut m, _rx) = manager();
        m.process_template(template(1, 100)).unwrap();
        assert!(!m.process_template(template(2, 99)).unwrap());
        assert_eq!(m.current_job().unwrap().rpc().height, 100);
    }

    #[test]
    fn test_update_keeps_older_jobs() {
        let (mut m, mut rx) = manager();
        m.process_template(template(1, 100)).unwrap();
        let _ = rx.try_recv();
        assert!(m.update_current_job(template(1, 100)).unwrap());
        assert!(matches!(rx.try_recv(), Ok(JobEvent::UpdatedBlock(job)) if job.job_id() == "2"));

        let mut ids = m.valid_job_ids();
        ids.sort();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_update_after_tip_change_is_dropped() {
        let (mut m, mut rx) = manager();
        m.process_template(template(1, 100)).unwrap();
        m.process_template(template(2, 101)).unwrap();
        while rx.try_recv().is_ok() {}

        assert!(!m.update_current_job(template(1, 100)).unwrap());
        assert!(rx.try_recv().is_err());
        assert_eq!(m.current_job().unwrap().rpc().height, 101);
        assert_eq!(m.valid_job_ids(), vec!["2".to_string()]);
    }

    #[test]
    fn test_rejected_share_is_emitted() {
        let (mut m, mut rx) = manager();
        m.process_template(template(1, 100)).unwrap();
        let _ = rx.try_recv();

        let request = ShareRequest { job_id: "ff".into(), extra_nonce2: "00000000".into(), ..Default::default() };
        let client = ClientContext { worker: "w1".into(), difficulty: 8.0, ..Default::default() };
        let err = m.process_share(&request, &client).unwrap_err();
        assert_eq!(err.code, ShareError::JOB_NOT_FOUND);

        match rx.try_recv() {
            Ok(JobEvent::Share { record, block_hex }) => {
                assert!(block_hex.is_none());
                assert_eq!(record.error, Some(json!("job not found")));
                assert_eq!(record.worker, "w1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_extranonce_sizes() {
        let (mut m, _rx) = manager();
        assert_eq!(m.next_extra_nonce(), "08000000");
        assert_eq!(m.extra_nonce1_size(), 4);
        assert_eq!(m.extra_nonce2_size(), 4);
    }
}
