//! Scrypt header hash
//!
//! The header is both password and salt, with `p = 1` and a 32-byte output.
//! Litecoin-style coins use `N = 1024, r = 1`. Scrypt-N coins pick N from an
//! activation table keyed by the header's nTime.

use std::collections::BTreeMap;

use scrypt::{scrypt, Params as ScryptParams};

use super::HeaderHasher;
use crate::error::AlgorithmError;

#[derive(Debug, Clone)]
pub struct ScryptHasher {
    params: ScryptParams,
}

impl ScryptHasher {
    pub fn new(algorithm: &str, n: u32, r: u32) -> Result<Self, AlgorithmError> {
        if n < 2 || !n.is_power_of_two() {
            return Err(AlgorithmError::InvalidParameters {
                algorithm: algorithm.to_string(),
                reason: format!("N must be a power of two, got {}", n),
            });
        }
        let params = ScryptParams::new(n.trailing_zeros() as u8, r, 1, 32).map_err(|e| {
            AlgorithmError::InvalidParameters {
                algorithm: algorithm.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { params })
    }
}

/// All-ones never meets a target, so a failed hash is rejected as low difficulty.
const FAILED: [u8; 32] = [0xff; 32];

fn scrypt_digest(header: &[u8], params: &ScryptParams) -> [u8; 32] {
    let mut output = [0u8; 32];
    if let Err(e) = scrypt(header, header, params, &mut output) {
        tracing::error!("scrypt hash failed: {}", e);
        return FAILED;
    }
    output
}

impl HeaderHasher for ScryptHasher {
    fn digest(&self, header: &[u8], _ntime: u32) -> [u8; 32] {
        scrypt_digest(header, &self.params)
    }
}

/// Activation table used when the coin does not configure one.
pub const DEFAULT_TIME_TABLE: [(&str, u64); 9] = [
    ("2048", 1_389_306_217),
    ("4096", 1_456_415_081),
    ("8192", 1_506_746_729),
    ("16384", 1_557_078_377),
    ("32768", 1_657_741_673),
    ("65536", 1_859_068_265),
    ("131072", 2_060_394_857),
    ("262144", 1_722_307_603),
    ("524288", 1_769_642_992),
];

pub fn default_time_table() -> BTreeMap<String, u64> {
    DEFAULT_TIME_TABLE.iter().map(|(n, at)| (n.to_string(), *at)).collect()
}

#[derive(Debug, Clone)]
struct Step {
    n: u32,
    activation: u64,
    /// `None` when the scrypt backend cannot run this N with `r = 1`.
    params: Option<ScryptParams>,
}

/// Scrypt with `r = 1` and a time-dependent N.
#[derive(Debug, Clone)]
pub struct ScryptNHasher {
    /// Lookup order: keys compare as decimal text, highest first, so "8192"
    /// is tried before "65536".
    schedule: Vec<Step>,
}

impl ScryptNHasher {
    pub fn new(algorithm: &str, table: &BTreeMap<String, u64>) -> Result<Self, AlgorithmError> {
        let invalid = |reason: String| AlgorithmError::InvalidParameters {
            algorithm: algorithm.to_string(),
            reason,
        };
        if table.is_empty() {
            return Err(invalid("time table is empty".to_string()));
        }

        let mut schedule = Vec::with_capacity(table.len());
        for (key, activation) in table.iter().rev() {
            let n = key
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 2 && n.is_power_of_two())
                .ok_or_else(|| invalid(format!("time table key {} is not a power of two", key)))?;
            let params = ScryptParams::new(n.trailing_zeros() as u8, 1, 1, 32).ok();
            if params.is_none() {
                tracing::warn!(algorithm, n, "scrypt backend cannot hash this N with r = 1");
            }
            schedule.push(Step { n, activation: *activation, params });
        }
        Ok(Self { schedule })
    }

    /// First entry already active at `ntime`; before every activation the
    /// earliest entry applies.
    fn step(&self, ntime: u32) -> Option<&Step> {
        self.schedule
            .iter()
            .find(|s| u64::from(ntime) > s.activation)
            .or_else(|| self.schedule.iter().min_by_key(|s| s.activation))
    }

    pub fn n_at(&self, ntime: u32) -> Option<u32> {
        self.step(ntime).map(|s| s.n)
    }
}

impl HeaderHasher for ScryptNHasher {
    fn digest(&self, header: &[u8], ntime: u32) -> [u8; 32] {
        match self.step(ntime) {
            Some(Step { params: Some(params), .. }) => scrypt_digest(header, params),
            Some(Step { n, .. }) => {
                tracing::error!("scrypt-n has no usable parameters for N={}", n);
                FAILED
            }
            None => FAILED,
        }
    }
}
