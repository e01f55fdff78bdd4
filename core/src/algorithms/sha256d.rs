/// Double SHA-256 header hash (bitcoin family)

use super::HeaderHasher;
use crate::util;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256d;

impl HeaderHasher for Sha256d {
    fn digest(&self, header: &[u8], _ntime: u32) -> [u8; 32] {
        util::sha256d(header)
    }
}
