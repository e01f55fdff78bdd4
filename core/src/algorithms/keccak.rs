/// Keccak-256 header hash
///
/// Coins with `normalHashing` hash twice over `header || nTime` (nTime as
/// big-endian hex bytes); the others hash the bare header once.

use sha3::{Digest, Keccak256};

use super::HeaderHasher;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeccakHasher {
    pub normal_hashing: bool,
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Bytes of `ntime` written as a hex string, the way the daemon appends it.
fn ntime_bytes(ntime: u32) -> Vec<u8> {
    let mut hex_str = format!("{:x}", ntime);
    if hex_str.len() % 2 == 1 {
        hex_str.insert(0, '0');
    }
    hex::decode(hex_str).unwrap_or_default()
}

impl HeaderHasher for KeccakHasher {
    fn digest(&self, header: &[u8], ntime: u32) -> [u8; 32] {
        if !self.normal_hashing {
            return keccak256(header);
        }
        let mut data = header.to_vec();
        data.extend_from_slice(&ntime_bytes(ntime));
        keccak256(&keccak256(&data))
    }
}
