/// BLAKE2s-256 header hash

use blake2::{Blake2s256, Digest};

use super::HeaderHasher;

#[derive(Debug, Clone, Copy, Default)]
pub struct Blake2sHasher;

impl HeaderHasher for Blake2sHasher {
    fn digest(&self, header: &[u8], _ntime: u32) -> [u8; 32] {
        Blake2s256::digest(header).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake2s_abc_vector() {
        assert_eq!(
            hex::encode(Blake2sHasher.digest(b"abc", 0)),
            "508c5e8c327c14e2e1a72ba34eeb452f37458b209ed63a294d999b4c86675982"
        );
    }
}
