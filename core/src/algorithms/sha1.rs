/// SHA-1 header hash
///
/// The 20-byte digest sits in the high end of the 32-byte output, so its
/// little-endian value spans the same range as the 256-bit targets.

use sha1::{Digest, Sha1};

use super::HeaderHasher;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Hasher;

impl HeaderHasher for Sha1Hasher {
    fn digest(&self, header: &[u8], _ntime: u32) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[12..].copy_from_slice(&Sha1::digest(header));
        out
    }
}
