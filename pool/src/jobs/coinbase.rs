/// Coinbase transaction construction
///
/// Standard family: a two-part generation transaction with a gap for
/// `extranonce1 || extranonce2` inside the scriptSig. Equihash family: a
/// complete transaction built once per job (no extranonce splicing).

use coinpool_core::util::{serialize_number, serialize_string, var_int};

use super::{PayeeOutput, Recipient, RpcTemplate};
use crate::config::RewardType;
use crate::error::TemplateError;

const COIN: f64 = 100_000_000.0;
const SEQUENCE_FINAL: u32 = 0xffff_ffff;

const SAPLING_TX_HEADER: u32 = 0x8000_0004;
const SAPLING_VERSION_GROUP_ID: u32 = 0x892f_2085;

/// Coinbase bytes before and after the extranonce gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinbaseParts {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
}

impl CoinbaseParts {
    pub fn splice(&self, extra_nonce1: &[u8], extra_nonce2: &[u8]) -> Vec<u8> {
        let mut tx = Vec::with_capacity(self.prefix.len() + extra_nonce1.len() + extra_nonce2.len() + self.suffix.len());
        tx.extend_from_slice(&self.prefix);
        tx.extend_from_slice(extra_nonce1);
        tx.extend_from_slice(extra_nonce2);
        tx.extend_from_slice(&self.suffix);
        tx
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoinbaseOptions<'a> {
    pub reward: RewardType,
    pub tx_messages: bool,
    pub signature: &'a str,
    /// Length of the extranonce gap in bytes.
    pub placeholder_len: usize,
    /// Coinbase timestamp pushed into the scriptSig.
    pub now: u32,
}

fn push_output(out: &mut Vec<u8>, value: u64, script: &[u8]) {
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&var_int(script.len() as u64));
    out.extend_from_slice(script);
}

fn coinbase_input_prefix(out: &mut Vec<u8>) {
    out.extend_from_slice(&var_int(1));
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());
}

/// Outputs of a standard coinbase: pool first, then payees, recipients and
/// the witness commitment.
pub fn standard_outputs(
    rpc: &RpcTemplate,
    pool_script: &[u8],
    recipients: &[Recipient],
) -> Result<Vec<u8>, TemplateError> {
    let mut reward = rpc.coinbasevalue.ok_or(TemplateError::Missing("coinbasevalue"))?;
    let mut to_pool = reward;
    let mut outputs: Vec<(u64, Vec<u8>)> = Vec::new();

    for PayeeOutput { script, amount } in rpc.payee_outputs()? {
        reward = reward.saturating_sub(amount);
        to_pool = to_pool.saturating_sub(amount);
        outputs.push((amount, script));
    }

    for recipient in recipients {
        let amount = (recipient.fraction * reward as f64).floor() as u64;
        to_pool = to_pool.saturating_sub(amount);
        outputs.push((amount, recipient.script.clone()));
    }

    if let Some(commitment) = &rpc.default_witness_commitment {
        let script = hex::decode(commitment).map_err(|_| TemplateError::hex("default_witness_commitment", commitment))?;
        outputs.push((0, script));
    }

    outputs.insert(0, (to_pool, pool_script.to_vec()));

    let mut out = var_int(outputs.len() as u64);
    for (value, script) in &outputs {
        push_output(&mut out, *value, script);
    }
    Ok(out)
}

/// Two-part standard generation transaction.
pub fn standard_generation(
    rpc: &RpcTemplate,
    pool_script: &[u8],
    recipients: &[Recipient],
    opts: CoinbaseOptions<'_>,
) -> Result<CoinbaseParts, TemplateError> {
    let flags = match &rpc.coinbaseaux {
        Some(aux) if !aux.flags.is_empty() => {
            hex::decode(&aux.flags).map_err(|_| TemplateError::hex("coinbaseaux.flags", &aux.flags))?
        }
        _ => Vec::new(),
    };

    let mut script_part1 = serialize_number(rpc.height);
    script_part1.extend_from_slice(&flags);
    script_part1.extend_from_slice(&serialize_number(u64::from(opts.now)));
    script_part1.push(opts.placeholder_len as u8);

    let script_part2 = serialize_string(opts.signature);

    let tx_version: u32 = if opts.tx_messages { 2 } else { 1 };

    let mut prefix = tx_version.to_le_bytes().to_vec();
    if opts.reward == RewardType::Pos {
        prefix.extend_from_slice(&rpc.curtime.to_le_bytes());
    }
    coinbase_input_prefix(&mut prefix);
    let script_len = script_part1.len() + opts.placeholder_len + script_part2.len();
    prefix.extend_from_slice(&var_int(script_len as u64));
    prefix.extend_from_slice(&script_part1);

    let mut suffix = script_part2;
    suffix.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());
    suffix.extend_from_slice(&standard_outputs(rpc, pool_script, recipients)?);
    suffix.extend_from_slice(&0u32.to_le_bytes());
    if opts.tx_messages {
        suffix.extend_from_slice(&serialize_string(""));
    }

    Ok(CoinbaseParts { prefix, suffix })
}

fn coins_to_sats(coins: f64) -> u64 {
    (coins * COIN).round() as u64
}

/// Equihash coinbase and the total it pays out.
pub fn equihash_generation(
    rpc: &RpcTemplate,
    pool_script: &[u8],
    recipients: &[Recipient],
    founders_script: Option<&[u8]>,
    treasury_script: Option<&[u8]>,
    signature: &str,
) -> Result<(Vec<u8>, u64), TemplateError> {
    let miner_reward = match (rpc.coinbasevalue, rpc.miner) {
        (Some(v), _) => v,
        (None, Some(miner)) => coins_to_sats(miner),
        (None, None) => return Err(TemplateError::Missing("coinbasevalue or miner subsidy")),
    };

    let mut outputs: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut to_pool = miner_reward;
    for recipient in recipients {
        let amount = (recipient.fraction * miner_reward as f64).floor() as u64;
        to_pool = to_pool.saturating_sub(amount);
        outputs.push((amount, recipient.script.clone()));
    }
    outputs.insert(0, (to_pool, pool_script.to_vec()));

    if let (Some(script), Some(founders)) = (founders_script, rpc.founders) {
        if founders > 0.0 {
            outputs.push((coins_to_sats(founders), script.to_vec()));
        }
    }
    if let (Some(script), Some(treasury)) = (treasury_script, rpc.treasury) {
        if treasury > 0.0 {
            outputs.push((coins_to_sats(treasury), script.to_vec()));
        }
    }

    let total: u64 = outputs.iter().map(|(v, _)| v).sum();

    let mut script_sig = serialize_number(rpc.height);
    script_sig.extend_from_slice(&serialize_string(signature));

    let sapling = rpc.version >= 4;
    let mut tx = Vec::new();
    if sapling {
        tx.extend_from_slice(&SAPLING_TX_HEADER.to_le_bytes());
        tx.extend_from_slice(&SAPLING_VERSION_GROUP_ID.to_le_bytes());
    } else {
        tx.extend_from_slice(&1u32.to_le_bytes());
    }
    coinbase_input_prefix(&mut tx);
    tx.extend_from_slice(&var_int(script_sig.len() as u64));
    tx.extend_from_slice(&script_sig);
    tx.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());

    tx.extend_from_slice(&var_int(outputs.len() as u64));
    for (value, script) in &outputs {
        push_output(&mut tx, *value, script);
    }

    tx.extend_from_slice(&0u32.to_le_bytes()); // nLockTime
    if sapling {
        tx.extend_from_slice(&0u32.to_le_bytes()); // nExpiryHeight
        tx.extend_from_slice(&0i64.to_le_bytes()); // valueBalance
        tx.extend_from_slice(&var_int(0)); // vShieldedSpend
        tx.extend_from_slice(&var_int(0)); // vShieldedOutput
        tx.extend_from_slice(&var_int(0)); // vJoinSplit
    }

    Ok((tx, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> RpcTemplate {
        RpcTemplate {
            version: 0x2000_0000,
            previousblockhash: "00".repeat(32),
            height: 500_000,
            curtime: 1_700_000_000,
            bits: "1d00ffff".into(),
            coinbasevalue: Some(1_000_000),
            ..Default::default()
        }
    }

    fn opts() -> CoinbaseOptions<'static> {
        CoinbaseOptions {
            reward: RewardType::Pow,
            tx_messages: false,
            signature: "/test/",
            placeholder_len: 8,
            now: 1_700_000_000,
        }
    }

    /// Decode `(value, script)` pairs from an output section.
    fn read_outputs(buf: &[u8]) -> Vec<(u64, Vec<u8>)> {
        let count = buf[0] as usize;
        let mut pos = 1;
        let mut out = Vec::new();
        for _ in 0..count {
            let value = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
            let len = buf[pos + 8] as usize;
            out.push((value, buf[pos + 9..pos + 9 + len].to_vec()));
            pos += 9 + len;
        }
        out
    }

    #[test]
    fn test_pool_output_first_and_recipients_floor() {
        let recipients = vec![Recipient { fraction: 0.015, script: vec![0xaa] }];
        let outputs = standard_outputs(&template(), &[0x51], &recipients).unwrap();
        assert_eq!(
            read_outputs(&outputs),
            vec![(985_000, vec![0x51]), (15_000, vec![0xaa])]
        );
    }

    #[test]
    fn test_witness_commitment_and_payee() {
        let mut rpc = template();
        rpc.default_witness_commitment = Some("6a24aa21a9ed".into());
        rpc.masternode = Some(json!({"payee": "X", "script": "52", "amount": 200_000}));
        let outputs = read_outputs(&standard_outputs(&rpc, &[0x51], &[]).unwrap());
        assert_eq!(outputs[0], (800_000, vec![0x51]));
        assert_eq!(outputs[1], (200_000, vec![0x52]));
        assert_eq!(outputs[2], (0, hex::decode("6a24aa21a9ed").unwrap()));
    }

    #[test]
    fn test_missing_coinbasevalue() {
        let mut rpc = template();
        rpc.coinbasevalue = None;
        assert_eq!(
            standard_outputs(&rpc, &[0x51], &[]),
            Err(TemplateError::Missing("coinbasevalue"))
        );
    }

    #[test]
    fn test_generation_gap_and_script_length() {
        let parts = standard_generation(&template(), &[0x51], &[], opts()).unwrap();
        // version, input count, null prevout
        assert_eq!(&parts.prefix[..4], &1u32.to_le_bytes());
        assert_eq!(parts.prefix[4], 1);
        assert_eq!(&parts.prefix[5..37], &[0u8; 32]);
        // scriptSig starts with the BIP34 height push and ends with the gap length
        let script_len = parts.prefix[41] as usize;
        let part1 = &parts.prefix[42..];
        assert_eq!(&part1[..4], &[0x03, 0x20, 0xa1, 0x07]);
        assert_eq!(*part1.last().unwrap(), 8);
        let part2_len = serialize_string("/test/").len();
        assert_eq!(script_len, part1.len() + 8 + part2_len);
        assert!(parts.suffix.starts_with(&serialize_string("/test/")));

        let tx = parts.splice(&[1, 2, 3, 4], &[5, 6, 7, 8]);
        assert_eq!(tx.len(), parts.prefix.len() + 8 + parts.suffix.len());
    }

    #[test]
    fn test_pos_adds_timestamp() {
        let pow = standard_generation(&template(), &[0x51], &[], opts()).unwrap();
        let pos = standard_generation(
            &template(),
            &[0x51],
            &[],
            CoinbaseOptions { reward: RewardType::Pos, ..opts() },
        )
        .unwrap();
        assert_eq!(pos.prefix.len(), pow.prefix.len() + 4);
        assert_eq!(&pos.prefix[4..8], &1_700_000_000u32.to_le_bytes());
    }

    #[test]
    fn test_equihash_generation_pays_founders() {
        let mut rpc = template();
        rpc.version = 4;
        rpc.coinbasevalue = None;
        rpc.miner = Some(10.0);
        rpc.founders = Some(2.5);
        let (tx, total) = equihash_generation(&rpc, &[0x51], &[], Some(&[0x52]), None, "/z/").unwrap();
        assert_eq!(total, 1_250_000_000);
        assert_eq!(&tx[..4], &SAPLING_TX_HEADER.to_le_bytes());
        assert_eq!(&tx[4..8], &SAPLING_VERSION_GROUP_ID.to_le_bytes());
        // sapling trailer: locktime, expiry, valueBalance, three empty vectors
        assert_eq!(&tx[tx.len() - 19..], &[0u8; 19]);
    }

    #[test]
    fn test_equihash_generation_needs_reward() {
        let mut rpc = template();
        rpc.coinbasevalue = None;
        assert!(equihash_generation(&rpc, &[0x51], &[], None, None, "/z/").is_err());
    }
}
