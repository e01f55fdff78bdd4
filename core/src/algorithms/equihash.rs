//! Equihash solution verification
//!
//! Header layout (140 bytes): the first 108 bytes are the Blake2b input,
//! the trailing 32 bytes are the nonce. The solution passed to the
//! verifier has its CompactSize length prefix already stripped.

use super::{EquihashParams, SolutionVerifier};
use crate::error::AlgorithmError;

pub const HEADER_LEN: usize = 140;
const INPUT_LEN: usize = 108;
const PERSONALIZATION: &str = "ZcashPoW";

/// Expected solution hex length and the hex length of its CompactSize prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionLayout {
    pub hex_len: usize,
    pub prefix_hex_len: usize,
}

/// Known `(N, K)` parameter sets.
pub fn solution_layout(n: u32, k: u32) -> Option<SolutionLayout> {
    let (hex_len, prefix_hex_len) = match (n, k) {
        (125, 4) => (106, 2),
        (144, 5) => (202, 2),
        (192, 7) => (806, 6),
        (200, 9) => (2694, 6),
        _ => return None,
    };
    Some(SolutionLayout { hex_len, prefix_hex_len })
}

#[derive(Debug, Clone)]
pub struct EquihashVerifier {
    n: u32,
    k: u32,
}

impl EquihashVerifier {
    pub fn new(params: &EquihashParams) -> Result<Self, AlgorithmError> {
        if params.personalization != PERSONALIZATION {
            return Err(AlgorithmError::UnsupportedAlgorithm(format!(
                "equihash with personalization {}",
                params.personalization
            )));
        }
        if solution_layout(params.n, params.k).is_none() {
            return Err(AlgorithmError::InvalidParameters {
                algorithm: "equihash".to_string(),
                reason: format!("unknown parameter set {}_{}", params.n, params.k),
            });
        }
        Ok(Self { n: params.n, k: params.k })
    }
}

impl SolutionVerifier for EquihashVerifier {
    fn verify(&self, header: &[u8], solution: &[u8]) -> bool {
        if header.len() != HEADER_LEN {
            return false;
        }
        let (input, nonce) = header.split_at(INPUT_LEN);
        match equihash::is_valid_solution(self.n, self.k, input, nonce, solution) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("equihash {}_{} rejected solution: {}", self.n, self.k, e);
                false
            }
        }
    }
}
