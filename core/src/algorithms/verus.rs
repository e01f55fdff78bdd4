/// VerusHash verifier stand-in
///
/// Verus templates carry their own solution checks in the daemon; the pool
/// only requires the digest backend to score shares.

use super::SolutionVerifier;

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SolutionVerifier for AcceptAll {
    fn verify(&self, _header: &[u8], _solution: &[u8]) -> bool {
        true
    }
}
