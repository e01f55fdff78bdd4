//! Standard (bitcoin-style) protocol family
//!
//! Jobs carry a two-part coinbase with an 8-byte extranonce gap and a merkle
//! branch. A submission is rebuilt into an 80-byte header and scored by the
//! coin's header digest.

use std::collections::HashMap;
use std::sync::Arc;

use coinpool_core::target::{difficulty_for_target, digest_value, share_difficulty};
use coinpool_core::util::{is_hex, reverse_word_order, sha256d, var_int};
use coinpool_core::AlgorithmFamily;
use num_bigint::BigUint;
use serde_json::{json, Value};

use super::coinbase::{standard_generation, CoinbaseOptions, CoinbaseParts};
use super::merkle::MerkleTree;
use super::{
    bits_le, check_ntime_window, credited_difficulty, decode_hash, lookup_job, template_target,
    FamilyContext, JobTemplate, ProtocolFamily, RpcTemplate, SubmissionKey, SubmissionRegistry,
    ValidatedShare,
};
use crate::config::{CoinConfig, RewardType};
use crate::counters::ExtraNonceCounter;
use crate::error::{ShareError, TemplateError};
use crate::shares::{ClientContext, ShareRequest};

const EXTRA_NONCE2_SIZE: usize = 4;

#[derive(Debug)]
pub struct StandardJob {
    job_id: String,
    rpc: RpcTemplate,
    target: BigUint,
    difficulty: f64,
    prevhash: [u8; 32],
    bits: [u8; 4],
    coinbase: CoinbaseParts,
    merkle: MerkleTree,
    transaction_data: Vec<u8>,
    reward: RewardType,
    version_mask: u32,
    submissions: SubmissionRegistry,
}

impl StandardJob {
    pub fn coinbase_parts(&self) -> &CoinbaseParts {
        &self.coinbase
    }

    pub fn merkle(&self) -> &MerkleTree {
        &self.merkle
    }

    pub fn serialize_coinbase(&self, extra_nonce1: &[u8], extra_nonce2: &[u8]) -> Vec<u8> {
        self.coinbase.splice(extra_nonce1, extra_nonce2)
    }

    /// Version actually placed in the header. Only bits inside the coin's
    /// mask can be rolled by the miner.
    pub fn header_version(&self, rolled: Option<u32>) -> u32 {
        match rolled {
            Some(bits) => (self.rpc.version & !self.version_mask) | (bits & self.version_mask),
            None => self.rpc.version,
        }
    }

    /// 80-byte header: version, prevhash, merkle root, nTime, bits, nonce.
    pub fn serialize_header(&self, merkle_root: &[u8; 32], ntime: u32, nonce: u32, version: u32) -> Vec<u8> {
        let mut header = Vec::with_capacity(80);
        header.extend_from_slice(&version.to_le_bytes());
        header.extend_from_slice(&self.prevhash);
        header.extend_from_slice(merkle_root);
        header.extend_from_slice(&ntime.to_le_bytes());
        header.extend_from_slice(&self.bits);
        header.extend_from_slice(&nonce.to_le_bytes());
        header
    }

    pub fn serialize_block(&self, header: &[u8], coinbase: &[u8]) -> Vec<u8> {
        let mut block = Vec::with_capacity(header.len() + coinbase.len() + self.transaction_data.len() + 10);
        block.extend_from_slice(header);
        block.extend_from_slice(&var_int(self.rpc.transactions.len() as u64 + 1));
        block.extend_from_slice(coinbase);
        block.extend_from_slice(&self.transaction_data);
        if self.reward == RewardType::Pos {
            block.push(0);
        }
        block
    }
}

impl JobTemplate for StandardJob {
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
        let mut prevhash_display = self.prevhash;
        prevhash_display.reverse();
        vec![
            json!(self.job_id),
            json!(hex::encode(reverse_word_order(&prevhash_display))),
            json!(hex::encode(&self.coinbase.prefix)),
            json!(hex::encode(&self.coinbase.suffix)),
            json!(self.merkle.branch_hex()),
            json!(hex::encode(self.rpc.version.to_be_bytes())),
            json!(self.rpc.bits),
            json!(hex::encode(self.rpc.curtime.to_be_bytes())),
            json!(true),
        ]
    }

    fn submissions(&self) -> &SubmissionRegistry {
        &self.submissions
    }
}

#[derive(Debug)]
pub struct StandardFamily {
    ctx: FamilyContext,
}

fn parse_u32_hex(value: &str) -> Option<u32> {
    if value.len() != 8 || !is_hex(value) {
        return None;
    }
    u32::from_str_radix(value, 16).ok()
}

impl ProtocolFamily for StandardFamily {
    type Job = StandardJob;

    const FAMILY: AlgorithmFamily = AlgorithmFamily::Standard;
    const JOB_COUNTER_START: u64 = 0;
    const JOB_COUNTER_MAX: u64 = 0xffff;
    const CLEAN_JOBS_INDEX: usize = 8;
    const USES_BLOCK_SUBSIDY: bool = false;

    fn new(ctx: FamilyContext) -> Self {
        Self { ctx }
    }

    fn context(&self) -> &FamilyContext {
        &self.ctx
    }

    fn extra_nonce2_size(&self) -> usize {
        EXTRA_NONCE2_SIZE
    }

    fn build_job(&self, job_id: String, rpc: RpcTemplate) -> Result<StandardJob, TemplateError> {
        let mut prevhash = decode_hash("previousblockhash", &rpc.previousblockhash)?;
        prevhash.reverse();
        let bits = bits_le(&rpc.bits)?;
        let target = template_target(&rpc)?;
        let difficulty = difficulty_for_target(&self.ctx.algorithm.diff1, &target);

        let mut tx_hashes = Vec::with_capacity(rpc.transactions.len());
        let mut transaction_data = Vec::new();
        for tx in &rpc.transactions {
            let id = tx.id().ok_or(TemplateError::Missing("transaction txid"))?;
            let mut hash = decode_hash("transaction txid", id)?;
            hash.reverse();
            tx_hashes.push(hash);
            transaction_data.extend(hex::decode(&tx.data).map_err(|_| TemplateError::hex("transaction data", &tx.data))?);
        }

        let coinbase = standard_generation(
            &rpc,
            &self.ctx.pool_script,
            &self.ctx.recipients,
            CoinbaseOptions {
                reward: self.ctx.reward,
                tx_messages: self.ctx.coin.tx_messages,
                signature: &self.ctx.coinbase_signature,
                placeholder_len: ExtraNonceCounter::SIZE + EXTRA_NONCE2_SIZE,
                now: chrono::Utc::now().timestamp() as u32,
            },
        )?;

        Ok(StandardJob {
            job_id,
            target,
            difficulty,
            prevhash,
            bits,
            coinbase,
            merkle: MerkleTree::new(tx_hashes),
            transaction_data,
            reward: self.ctx.reward,
            version_mask: self.ctx.coin.version_mask(),
            submissions: SubmissionRegistry::default(),
            rpc,
        })
    }

    fn validate_share(
        &self,
        jobs: &HashMap<String, Arc<StandardJob>>,
        request: &ShareRequest,
        client: &ClientContext,
    ) -> Result<ValidatedShare<StandardJob>, ShareError> {
        if request.extra_nonce2.len() != 2 * EXTRA_NONCE2_SIZE {
            return Err(ShareError::malformed("incorrect size of extranonce2"));
        }

        let job = lookup_job(jobs, &request.job_id)?;

        if request.ntime.len() != 8 {
            return Err(ShareError::malformed("incorrect size of ntime"));
        }
        let ntime = parse_u32_hex(&request.ntime).ok_or_else(|| ShareError::malformed("ntime out of range"))?;
        check_ntime_window(ntime, job.rpc.curtime, chrono::Utc::now().timestamp())?;

        if request.nonce.len() != 8 {
            return Err(ShareError::malformed("incorrect size of nonce"));
        }
        let nonce = parse_u32_hex(&request.nonce).ok_or_else(|| ShareError::malformed("invalid hex in nonce"))?;

        let rolled = match &request.version_mask {
            Some(mask) => Some(parse_u32_hex(mask).ok_or_else(|| ShareError::malformed("invalid version mask"))?),
            None => None,
        };

        let extra_nonce1 = hex::decode(&client.extra_nonce1).map_err(|_| ShareError::malformed("invalid extranonce1"))?;
        let extra_nonce2 = hex::decode(&request.extra_nonce2)
            .map_err(|_| ShareError::malformed("invalid hex in extraNonce2"))?;

        if !job.register_submit(SubmissionKey::standard(
            &client.extra_nonce1,
            &request.extra_nonce2,
            &request.ntime,
            &request.nonce,
        )) {
            return Err(ShareError::duplicate());
        }

        let algorithm = &self.ctx.algorithm;
        let coinbase = job.serialize_coinbase(&extra_nonce1, &extra_nonce2);
        let merkle_root = job.merkle.with_first(algorithm.coinbase_hasher.hash(&coinbase));
        let header = job.serialize_header(&merkle_root, ntime, nonce, job.header_version(rolled));

        let digest = algorithm
            .hash_header(&header, ntime)
            .ok_or_else(|| ShareError::malformed("algorithm has no header digest"))?;
        let header_value = digest_value(&digest);

        let share_diff = share_difficulty(&algorithm.diff1, &header_value, algorithm.multiplier);
        let block_diff = job.difficulty * algorithm.multiplier;

        let mut difficulty = client.difficulty;
        let mut block_hash = None;
        let mut block_hash_invalid = None;
        let mut block_hex = None;

        if job.target >= header_value {
            block_hex = Some(hex::encode(job.serialize_block(&header, &coinbase)));
            block_hash = Some(hex::encode(algorithm.standard_block_hash(&header, ntime)));
        } else {
            if self.ctx.emit_invalid_block_hashes {
                let mut hash = sha256d(&header);
                hash.reverse();
                block_hash_invalid = Some(hex::encode(hash));
            }
            difficulty = credited_difficulty(share_diff, client)?;
        }

        Ok(ValidatedShare {
            block_reward: job.rpc.coinbasevalue.map(|v| v as f64),
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
            "mode": "template",
            "capabilities": ["coinbasetxn", "workid", "coinbase/append"],
            "rules": ["segwit"],
        });
        if let Some(algo) = coin.pass_algorithm.as_ref().and_then(|h| h.resolve(&coin.algorithm)) {
            return json!([request, algo]);
        }
        if let Some(algo) = coin.pass_algorithm_key.as_ref().and_then(|h| h.resolve(&coin.algorithm)) {
            request["algo"] = json!(algo);
        }
        json!([request])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Recipient;
    use coinpool_core::{algorithms, AlgorithmParams, HeaderHasher, PowFunction};

    struct ZeroDigest;

    impl HeaderHasher for ZeroDigest {
        fn digest(&self, _header: &[u8], _ntime: u32) -> [u8; 32] {
            [0u8; 32]
        }
    }

    fn coin() -> CoinConfig {
        serde_json::from_value(json!({"name": "Bitcoin", "symbol": "btc", "algorithm": "sha256"})).unwrap()
    }

    fn family(pow: Option<PowFunction>, emit_invalid: bool) -> StandardFamily {
        let mut algorithm = algorithms::resolve("sha256", &AlgorithmParams::default()).unwrap();
        if let Some(pow) = pow {
            algorithm = algorithm.with_pow(pow);
        }
        StandardFamily::new(FamilyContext {
            algorithm: Arc::new(algorithm),
            coin: coin(),
            reward: RewardType::Pow,
            pool_script: vec![0x51],
            recipients: vec![Recipient { fraction: 0.01, script: vec![0x52] }],
            coinbase_signature: "/test/".into(),
            emit_invalid_block_hashes: emit_invalid,
        })
    }

    fn template(curtime: u32) -> RpcTemplate {
        RpcTemplate {
            version: 0x2000_0000,
            previousblockhash: format!("{}{}", "00".repeat(28), "0a0b0c0d"),
            height: 800_000,
            curtime,
            bits: "1d00ffff".into(),
            coinbasevalue: Some(625_000_000),
            transactions: vec![super::super::RpcTransaction {
                data: "0100".into(),
                txid: Some("ab".repeat(32)),
                hash: None,
            }],
            ..Default::default()
        }
    }

    fn now() -> u32 {
        chrono::Utc::now().timestamp() as u32
    }

    fn jobs_with(family: &StandardFamily) -> HashMap<String, Arc<StandardJob>> {
        let job = family.build_job("1".into(), template(now() - 60)).unwrap();
        HashMap::from([("1".to_string(), Arc::new(job))])
    }

    fn request(nonce: &str) -> ShareRequest {
        ShareRequest {
            job_id: "1".into(),
            extra_nonce2: "00000001".into(),
            ntime: format!("{:08x}", now()),
            nonce: nonce.into(),
            ..Default::default()
        }
    }

    fn client(difficulty: f64) -> ClientContext {
        ClientContext {
            extra_nonce1: "18000000".into(),
            difficulty,
            ip: "127.0.0.1".into(),
            worker: "w".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_params_layout() {
        let f = family(None, false);
        let job = f.build_job("a".into(), template(1_700_000_000)).unwrap();
        let params = job.job_params();
        assert_eq!(params.len(), 9);
        assert_eq!(params[0], json!("a"));
        // word order reversed, bytes within each word kept
        assert_eq!(params[1], json!(format!("{}{}", "0a0b0c0d", "00".repeat(28))));
        assert_eq!(params[4], json!(["ab".repeat(32)]));
        assert_eq!(params[5], json!("20000000"));
        assert_eq!(params[6], json!("1d00ffff"));
        assert_eq!(params[7], json!("6553f100"));
        assert_eq!(params[StandardFamily::CLEAN_JOBS_INDEX], json!(true));
        assert_eq!(job.difficulty(), 1.0);
    }

    #[test]
    fn test_header_layout() {
        let f = family(None, false);
        let job = f.build_job("1".into(), template(1)).unwrap();
        let header = job.serialize_header(&[7u8; 32], 0x0102_0304, 0xa0b0_c0d0, job.header_version(None));
        assert_eq!(header.len(), 80);
        assert_eq!(&header[..4], &0x2000_0000u32.to_le_bytes());
        assert_eq!(&header[4..8], &[0x0d, 0x0c, 0x0b, 0x0a]);
        assert_eq!(&header[36..68], &[7u8; 32]);
        assert_eq!(&header[68..72], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&header[72..76], &[0xff, 0xff, 0x00, 0x1d]);
        assert_eq!(&header[76..], &[0xd0, 0xc0, 0xb0, 0xa0]);
    }

    #[test]
    fn test_version_rolling_respects_mask() {
        let f = family(None, false);
        let job = f.build_job("1".into(), template(1)).unwrap();
        assert_eq!(job.header_version(Some(0xffff_ffff)), 0x2000_0000 | 0x1fff_e000);
        assert_eq!(job.header_version(Some(0x0000_0001)), 0x2000_0000);
    }

    #[test]
    fn test_extranonce2_size_checked_before_lookup() {
        let f = family(None, false);
        let mut req = request("00000000");
        req.job_id = "missing".into();
        req.extra_nonce2 = "0001".into();
        let err = f.validate_share(&HashMap::new(), &req, &client(1.0)).unwrap_err();
        assert_eq!(err, ShareError::malformed("incorrect size of extranonce2"));

        // odd length rounds down to four bytes under integer division
        let jobs = jobs_with(&f);
        let mut req = request("00000000");
        req.extra_nonce2 = "000000001".into();
        let err = f.validate_share(&jobs, &req, &client(1.0)).unwrap_err();
        assert_eq!(err, ShareError::malformed("incorrect size of extranonce2"));
    }

    #[test]
    fn test_verifier_backend_is_rejected_at_share_time() {
        struct Anything;
        impl coinpool_core::SolutionVerifier for Anything {
            fn verify(&self, _header: &[u8], _solution: &[u8]) -> bool {
                true
            }
        }
        let f = family(Some(PowFunction::Verifier(Arc::new(Anything))), false);
        let jobs = jobs_with(&f);
        let err = f.validate_share(&jobs, &request("00000003"), &client(1e-9)).unwrap_err();
        assert_eq!(err, ShareError::malformed("algorithm has no header digest"));
    }

    #[test]
    fn test_malformed_fields() {
        let f = family(None, false);
        let jobs = jobs_with(&f);

        let mut req = request("00000000");
        req.job_id = "2".into();
        assert_eq!(f.validate_share(&jobs, &req, &client(1.0)).unwrap_err().code, 21);

        let mut req = request("00000000");
        req.ntime = "123".into();
        assert_eq!(
            f.validate_share(&jobs, &req, &client(1.0)).unwrap_err().message,
            "incorrect size of ntime"
        );

        let mut req = request("00000000");
        req.ntime = format!("{:08x}", now() + 7300);
        assert_eq!(
            f.validate_share(&jobs, &req, &client(1.0)).unwrap_err().message,
            "ntime out of range"
        );

        let req = request("0000");
        assert_eq!(
            f.validate_share(&jobs, &req, &client(1.0)).unwrap_err().message,
            "incorrect size of nonce"
        );
    }

    #[test]
    fn test_low_difficulty_then_duplicate() {
        let f = family(None, true);
        let jobs = jobs_with(&f);
        let req = request("00000001");

        let err = f.validate_share(&jobs, &req, &client(1_000_000.0)).unwrap_err();
        assert_eq!(err.code, ShareError::LOW_DIFFICULTY);
        assert!(err.message.starts_with("low difficulty share of "));

        let err = f.validate_share(&jobs, &req, &client(1_000_000.0)).unwrap_err();
        assert_eq!(err, ShareError::duplicate());
    }

    #[test]
    fn test_zero_digest_is_block_candidate() {
        let f = family(Some(PowFunction::Digest(Arc::new(ZeroDigest))), false);
        let jobs = jobs_with(&f);
        let share = f.validate_share(&jobs, &request("00000002"), &client(64.0)).unwrap();

        assert!(share.block_hash.is_some());
        let block = hex::decode(share.block_hex.unwrap()).unwrap();
        // header, tx count 2, coinbase, then the template transaction
        assert_eq!(block[80], 2);
        assert!(block.ends_with(&[0x01, 0x00]));
        assert_eq!(share.difficulty, 64.0);
        assert_eq!(share.block_reward, Some(625_000_000.0));
        assert_eq!(share.block_diff_actual, 1.0);
    }

    #[test]
    fn test_template_params() {
        let mut c = coin();
        assert_eq!(
            StandardFamily::block_template_params(&c),
            json!([{"mode": "template", "capabilities": ["coinbasetxn", "workid", "coinbase/append"], "rules": ["segwit"]}])
        );
        c.pass_algorithm_key = Some(crate::config::AlgorithmHint::Name("sha256d".into()));
        let params = StandardFamily::block_template_params(&c);
        assert_eq!(params[0]["algo"], json!("sha256d"));
        assert_eq!(params.as_array().map(Vec::len), Some(1));

        // a positional algorithm takes precedence over the key
        c.pass_algorithm = Some(crate::config::AlgorithmHint::Flag(true));
        let params = StandardFamily::block_template_params(&c);
        assert!(params[0].get("algo").is_none());
        assert_eq!(params[1], json!("sha256"));
    }
}
