/// Merkle branch for coinbase-first trees
///
/// Built once per job from the template's transaction hashes (internal byte
/// order, coinbase excluded). The root for any coinbase is then a fold of
/// the branch steps, so submissions never rebuild the tree.

use coinpool_core::util::sha256d;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTree {
    steps: Vec<[u8; 32]>,
}

fn join(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(a);
    buf[32..].copy_from_slice(b);
    sha256d(&buf)
}

impl MerkleTree {
    pub fn new(hashes: Vec<[u8; 32]>) -> Self {
        // `level` is the current tree row minus its first (coinbase-side) slot.
        let mut level = hashes;
        let mut steps = Vec::new();
        while !level.is_empty() {
            steps.push(level[0]);
            if level.len() % 2 == 0 {
                let last = level[level.len() - 1];
                level.push(last);
            }
            level = level[1..]
                .chunks(2)
                .map(|pair| join(&pair[0], &pair[1]))
                .collect();
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[[u8; 32]] {
        &self.steps
    }

    /// Branch as hex strings for `mining.notify`.
    pub fn branch_hex(&self) -> Vec<String> {
        self.steps.iter().map(hex::encode).collect()
    }

    /// Merkle root when `first` is the coinbase hash.
    pub fn with_first(&self, first: [u8; 32]) -> [u8; 32] {
        self.steps.iter().fold(first, |acc, step| join(&acc, step))
    }
}
