/// Skein header hash: SHA-256 over the Skein-512 digest.

use skein::digest::consts::U64;
use skein::{Digest, Skein512};

use super::HeaderHasher;
use crate::util;

#[derive(Debug, Clone, Copy, Default)]
pub struct SkeinHasher;

impl HeaderHasher for SkeinHasher {
    fn digest(&self, header: &[u8], _ntime: u32) -> [u8; 32] {
        util::sha256(&Skein512::<U64>::digest(header))
    }
}
