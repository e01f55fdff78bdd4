/// Groestl header hash: Groestl-512 applied twice, truncated to 32 bytes.

use groestl::{Digest, Groestl512};

use super::HeaderHasher;

#[derive(Debug, Clone, Copy, Default)]
pub struct GroestlHasher;

impl HeaderHasher for GroestlHasher {
    fn digest(&self, header: &[u8], _ntime: u32) -> [u8; 32] {
        let second = Groestl512::digest(Groestl512::digest(header));
        let mut out = [0u8; 32];
        out.copy_from_slice(&second[..32]);
        out
    }
}
