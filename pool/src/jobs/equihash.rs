//! Equihash protocol family
//!
//! The miner owns the whole 32-byte nonce (extranonce1 is its prefix), so the
//! coinbase is fixed per job and the merkle root is computed once. Shares
//! carry a solution that is appended to a 140-byte header.

use std::collections::HashMap;
use std::sync::Arc;

use coinpool_core::algorithms::equihash::{solution_layout, HEADER_LEN};
use coinpool_core::target::{difficulty_for_target, digest_value, share_difficulty};
use coinpool_core::util::{is_hex, sha256d, var_int};
use coinpool_core::{AlgorithmFamily, AlgorithmKind, VerusVariant};
use num_bigint::BigUint;
use serde_json::{json, Value};

use super::coinbase::equihash_generation;
use super::merkle::MerkleTree;
use super::{
    bits_le, check_ntime_window, credited_difficulty, decode_hash, lookup_job, template_target,
    FamilyContext, JobTemplate, ProtocolFamily, RpcTemplate, SubmissionKey, SubmissionRegistry,
    ValidatedShare,
};
use crate::config::CoinConfig;
use crate::counters::ExtraNonceCounter;
use crate::error::{ShareError, TemplateError};
use crate::shares::{ClientContext, ShareRequest};

const NONCE_HEX_LEN: usize = 64;

#[derive(Debug)]
pub struct EquihashJob {
    job_id: String,
    rpc: RpcTemplate,
    target: BigUint,
    difficulty: f64,
    prevhash: [u8; 32],
    merkle_root: [u8; 32],
    reserved: [u8; 32],
    bits: [u8; 4],
    coinbase: Vec<u8>,
    transaction_data: Vec<u8>,
    block_reward: f64,
    submissions: SubmissionRegistry,
}

impl EquihashJob {
    pub fn merkle_root(&self) -> &[u8; 32] {
        &self.merkle_root
    }

    pub fn coinbase(&self) -> &[u8] {
        &self.coinbase
    }

    /// Reward reported with shares, in the coin's smallest unit.
    pub fn block_reward(&self) -> f64 {
        self.block_reward
    }

    /// 140-byte header. `ntime` and `nonce` are copied byte-for-byte as submitted.
    pub fn serialize_header(&self, ntime: &[u8; 4], nonce: &[u8; 32]) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&self.rpc.version.to_le_bytes());
        header.extend_from_slice(&self.prevhash);
        header.extend_from_slice(&self.merkle_root);
        header.extend_from_slice(&self.reserved);
        header.extend_from_slice(ntime);
        header.extend_from_slice(&self.bits);
        header.extend_from_slice(nonce);
        header
    }

    pub fn serialize_block(&self, header: &[u8], solution: &[u8]) -> Vec<u8> {
        let mut block = Vec::with_capacity(header.len() + solution.len() + self.coinbase.len() + self.transaction_data.len() + 9);
        block.extend_from_slice(header);
        block.extend_from_slice(solution);
        block.extend_from_slice(&var_int(self.rpc.transactions.len() as u64 + 1));
        block.extend_from_slice(&self.coinbase);
        block.extend_from_slice(&self.transaction_data);
        block
    }
}

impl JobTemplate for EquihashJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn rpc(&self) -> &RpcTemplate {
        &self.rpc
    }

    fn target(&self) -> &BigUint {
        &self.target
    }

    fn difficulty(&self) -> f64 {
        self.difficulty
    }

    fn job_params(&self) -> Vec<Value> {
        let mut params = vec![
            json!(self.job_id),
            json!(hex::encode(self.rpc.version.to_le_bytes())),
            json!(hex::encode(self.prevhash)),
            json!(hex::encode(self.merkle_root)),
            json!(hex::encode(self.reserved)),
            json!(hex::encode(self.rpc.curtime.to_le_bytes())),
            json!(hex::encode(self.bits)),
            json!(true),
        ];
        if let Some(solution) = &self.rpc.solution {
            params.push(json!(solution));
        }
        params
    }

    fn submissions(&self) -> &SubmissionRegistry {
        &self.submissions
    }
}

#[derive(Debug)]
pub struct EquihashFamily {
    ctx: FamilyContext,
    founders_script: Option<Vec<u8>>,
    treasury_script: Option<Vec<u8>>,
}

/// nTime arrives as the little-endian header bytes.
fn parse_ntime(ntime: &str) -> Option<([u8; 4], u32)> {
    let bytes: [u8; 4] = hex::decode(ntime).ok()?.try_into().ok()?;
    Some((bytes, u32::from_le_bytes(bytes)))
}

impl EquihashFamily {
    /// Digest variant for Verus templates, `None` for plain Equihash.
    fn verus_variant(&self, rpc: &RpcTemplate) -> Option<VerusVariant> {
        if self.ctx.algorithm.kind != AlgorithmKind::VerusHash {
            return None;
        }
        Some(match (rpc.version > 4, rpc.solution.is_some()) {
            (true, true) => VerusVariant::V2b1,
            (true, false) => VerusVariant::V2,
            _ => VerusVariant::V1,
        })
    }
}

impl ProtocolFamily for EquihashFamily {
    type Job = EquihashJob;

    const FAMILY: AlgorithmFamily = AlgorithmFamily::Equihash;
    const JOB_COUNTER_START: u64 = 0xcccc;
    const JOB_COUNTER_MAX: u64 = 0xff_ffff_ffff;
    const CLEAN_JOBS_INDEX: usize = 7;
    const USES_BLOCK_SUBSIDY: bool = true;

    fn new(ctx: FamilyContext) -> Self {
        let script = |s: &Option<String>| s.as_deref().and_then(|h| hex::decode(h).ok());
        Self {
            founders_script: script(&ctx.coin.founders_script),
            treasury_script: script(&ctx.coin.treasury_script),
            ctx,
        }
    }

    fn context(&self) -> &FamilyContext {
        &self.ctx
    }

    /// The rest of the 32-byte nonce after extranonce1.
    fn extra_nonce2_size(&self) -> usize {
        32 - ExtraNonceCounter::SIZE
    }

    fn build_job(&self, job_id: String, rpc: RpcTemplate) -> Result<EquihashJob, TemplateError> {
        let mut prevhash = decode_hash("previousblockhash", &rpc.previousblockhash)?;
        prevhash.reverse();
        let reserved = match &rpc.finalsaplingroothash {
            Some(root) => {
                let mut r = decode_hash("finalsaplingroothash", root)?;
                r.reverse();
                r
            }
            None => [0u8; 32],
        };
        let bits = bits_le(&rpc.bits)?;
        let target = template_target(&rpc)?;
        let difficulty = difficulty_for_target(&self.ctx.algorithm.diff1, &target);

        let (coinbase, paid) = match &rpc.coinbasetxn {
            Some(txn) => {
                let data = hex::decode(&txn.data).map_err(|_| TemplateError::hex("coinbasetxn.data", &txn.data))?;
                (data, rpc.coinbasevalue.unwrap_or_default())
            }
            None => equihash_generation(
                &rpc,
                &self.ctx.pool_script,
                &self.ctx.recipients,
                self.founders_script.as_deref(),
                self.treasury_script.as_deref(),
                &self.ctx.coinbase_signature,
            )?,
        };

        let mut tx_hashes = Vec::with_capacity(rpc.transactions.len());
        let mut transaction_data = Vec::new();
        for tx in &rpc.transactions {
            let id = tx.id().ok_or(TemplateError::Missing("transaction hash"))?;
            let mut hash = decode_hash("transaction hash", id)?;
            hash.reverse();
            tx_hashes.push(hash);
            transaction_data.extend(hex::decode(&tx.data).map_err(|_| TemplateError::hex("transaction data", &tx.data))?);
        }
        let merkle_root = MerkleTree::new(tx_hashes).with_first(sha256d(&coinbase));

        let block_reward = rpc
            .extra
            .get("reward")
            .and_then(Value::as_f64)
            .unwrap_or(paid as f64);

        Ok(EquihashJob {
            job_id,
            target,
            difficulty,
            prevhash,
            merkle_root,
            reserved,
            bits,
            coinbase,
            transaction_data,
            block_reward,
            submissions: SubmissionRegistry::default(),
            rpc,
        })
    }

    fn validate_share(
        &self,
        jobs: &HashMap<String, Arc<EquihashJob>>,
        request: &ShareRequest,
        client: &ClientContext,
    ) -> Result<ValidatedShare<EquihashJob>, ShareError> {
        let job = lookup_job(jobs, &request.job_id)?;

        if request.ntime.len() != 8 {
            return Err(ShareError::malformed("incorrect size of ntime"));
        }
        let (ntime_bytes, ntime) = parse_ntime(&request.ntime).ok_or_else(|| ShareError::malformed("invalid ntime"))?;
        check_ntime_window(ntime, job.rpc.curtime, chrono::Utc::now().timestamp())?;

        if request.nonce.len() != NONCE_HEX_LEN {
            return Err(ShareError::malformed("incorrect size of nonce"));
        }

        let params = self.ctx.coin.equihash_params();
        let layout = solution_layout(params.n, params.k)
            .or_else(|| solution_layout(200, 9))
            .ok_or_else(|| ShareError::malformed("unsupported equihash parameters"))?;
        let solution = request.solution.as_deref().unwrap_or_default();
        if solution.len() != layout.hex_len {
            return Err(ShareError::malformed(format!(
                "Error: Incorrect size of solution ({}), expected {}",
                solution.len(),
                layout.hex_len
            )));
        }

        if !is_hex(&request.extra_nonce2) {
            return Err(ShareError::malformed("invalid hex in extraNonce2"));
        }
        let nonce: [u8; 32] = hex::decode(&request.nonce)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ShareError::malformed("invalid hex in nonce"))?;
        let solution_bytes = hex::decode(solution).map_err(|_| ShareError::malformed("invalid hex in solution"))?;

        if !job.register_submit(SubmissionKey::equihash(&request.nonce, solution)) {
            return Err(ShareError::duplicate());
        }

        let header = job.serialize_header(&ntime_bytes, &nonce);
        let mut header_solution = header.clone();
        header_solution.extend_from_slice(&solution_bytes);

        let variant = self.verus_variant(&job.rpc);
        if variant == Some(VerusVariant::V2b1) {
            let expected = job.rpc.solution.as_deref().and_then(|s| s.get(..2));
            let got = solution.get(layout.prefix_hex_len..layout.prefix_hex_len + 2);
            if expected.map(str::to_lowercase) != got.map(str::to_lowercase) {
                return Err(ShareError::new(ShareError::DUPLICATE, "invalid solution version"));
            }
        }

        let algorithm = &self.ctx.algorithm;
        let digest = algorithm.equihash_header_digest(&header_solution, variant);
        let header_value = digest_value(&digest);
        let share_diff = share_difficulty(&algorithm.diff1, &header_value, algorithm.multiplier);
        let block_diff = job.difficulty * algorithm.multiplier;

        if !algorithm.verify_solution(&header, &solution_bytes[layout.prefix_hex_len / 2..]) {
            return Err(ShareError::malformed("invalid solution"));
        }

        let mut difficulty = client.difficulty;
        let mut block_hash = None;
        let mut block_hash_invalid = None;
        let mut block_hex = None;

        if header_value <= job.target {
            block_hex = Some(hex::encode(job.serialize_block(&header, &solution_bytes)));
            let mut hash = digest;
            hash.reverse();
            block_hash = Some(hex::encode(hash));
        } else {
            if self.ctx.emit_invalid_block_hashes {
                let mut hash = sha256d(&header_solution);
                hash.reverse();
                block_hash_invalid = Some(hex::encode(hash));
            }
            difficulty = credited_difficulty(share_diff, client)?;
        }

        Ok(ValidatedShare {
            block_reward: Some(job.block_reward),
            block_diff_actual: job.difficulty,
            job,
            difficulty,
            share_diff,
            block_diff,
            block_hash,
            block_hash_invalid,
            block_hex,
        })
    }

    fn block_template_params(coin: &CoinConfig) -> Value {
        let mut request = json!({
            "capabilities": ["coinbasetxn", "workid", "coinbase/append"],
        });
        if coin.supports_segwit {
            request["rules"] = json!(["segwit"]);
        }
        json!([request])
    }
}
