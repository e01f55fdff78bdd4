//! Coinpool Core
//!
//! Proof-of-work primitives shared by the pool: the algorithm registry with its
//! hash/verify backends, byte-level serialization helpers used to assemble
//! coinbase transactions and block headers, and 256-bit target arithmetic.

pub mod algorithms;
pub mod error;
pub mod target;
pub mod util;

pub use algorithms::{
    AlgorithmDescriptor, AlgorithmFamily, AlgorithmKind, AlgorithmParams, AlgorithmRegistry,
    BlockHasher, CoinbaseHasher, EquihashParams, HeaderHasher, PowFunction, SolutionVerifier,
    VerusHasher, VerusVariant,
};
pub use error::{AlgorithmError, TargetError};
