/// Proof-of-work algorithm registry
///
/// Supported algorithms form a closed set. A configured name is resolved
/// once at startup into an [`AlgorithmDescriptor`]; unknown names fail fast
/// with [`AlgorithmError::UnsupportedAlgorithm`].
///
/// Two hash contracts exist:
/// - **Digest** (standard family): `header bytes + nTime -> 32-byte digest`
/// - **Verifier** (Equihash family): `header + solution -> bool`. The block
///   hash is computed separately over `header || solution`.

pub mod blake2s;
pub mod equihash;
pub mod groestl;
pub mod keccak;
pub mod scrypt;
pub mod sha1;
pub mod sha256d;
pub mod skein;
pub mod verus;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::AlgorithmError;
use crate::target;
use crate::util;

/// Digest contract of the standard family. `ntime` is available for
/// time-dependent algorithms.
pub trait HeaderHasher: Send + Sync {
    fn digest(&self, header: &[u8], ntime: u32) -> [u8; 32];
}

/// Solution-check contract of the Equihash family.
pub trait SolutionVerifier: Send + Sync {
    fn verify(&self, header: &[u8], solution: &[u8]) -> bool;
}

/// VerusHash digest variants, selected by the template version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerusVariant {
    V1,
    V2,
    V2b1,
}

/// VerusHash backend linked in by the operator (no pure-Rust implementation ships here).
pub trait VerusHasher: Send + Sync {
    fn hash(&self, variant: VerusVariant, data: &[u8]) -> [u8; 32];
}

#[derive(Clone)]
pub enum PowFunction {
    Digest(Arc<dyn HeaderHasher>),
    Verifier(Arc<dyn SolutionVerifier>),
}

impl fmt::Debug for PowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowFunction::Digest(_) => f.write_str("PowFunction::Digest"),
            PowFunction::Verifier(_) => f.write_str("PowFunction::Verifier"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmFamily {
    Standard,
    Equihash,
}

/// Hash applied to the serialized coinbase before it enters the merkle tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinbaseHasher {
    Sha256,
    Sha256d,
}

impl CoinbaseHasher {
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        match self {
            CoinbaseHasher::Sha256 => util::sha256(data),
            CoinbaseHasher::Sha256d => util::sha256d(data),
        }
    }
}

/// Hash used to report a found block's id (standard family).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHasher {
    Sha256d,
    PowDigest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    Sha256,
    Sha1,
    Scrypt,
    ScryptOg,
    ScryptN,
    Keccak,
    Blake2s,
    Groestl,
    Skein,
    Equihash,
    VerusHash,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 11] = [
        AlgorithmKind::Sha256,
        AlgorithmKind::Sha1,
        AlgorithmKind::Scrypt,
        AlgorithmKind::ScryptOg,
        AlgorithmKind::ScryptN,
        AlgorithmKind::Keccak,
        AlgorithmKind::Blake2s,
        AlgorithmKind::Groestl,
        AlgorithmKind::Skein,
        AlgorithmKind::Equihash,
        AlgorithmKind::VerusHash,
    ];

    pub fn from_name(name: &str) -> Result<Self, AlgorithmError> {
        match name.to_lowercase().as_str() {
            "sha256" | "sha256d" => Ok(Self::Sha256),
            "sha1" => Ok(Self::Sha1),
            "scrypt" => Ok(Self::Scrypt),
            "scrypt-og" => Ok(Self::ScryptOg),
            "scrypt-n" => Ok(Self::ScryptN),
            "keccak" => Ok(Self::Keccak),
            "blake2s" => Ok(Self::Blake2s),
            "groestl" => Ok(Self::Groestl),
            "skein" => Ok(Self::Skein),
            "equihash" => Ok(Self::Equihash),
            "verushash" | "verus" => Ok(Self::VerusHash),
            _ => Err(AlgorithmError::UnsupportedAlgorithm(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Scrypt => "scrypt",
            Self::ScryptOg => "scrypt-og",
            Self::ScryptN => "scrypt-n",
            Self::Keccak => "keccak",
            Self::Blake2s => "blake2s",
            Self::Groestl => "groestl",
            Self::Skein => "skein",
            Self::Equihash => "equihash",
            Self::VerusHash => "verushash",
        }
    }

    pub fn family(&self) -> AlgorithmFamily {
        match self {
            Self::Equihash | Self::VerusHash => AlgorithmFamily::Equihash,
            _ => AlgorithmFamily::Standard,
        }
    }

    /// Scale applied to "truncated" network difficulties. `None` means 1.
    fn multiplier(&self) -> Option<f64> {
        match self {
            Self::Scrypt | Self::ScryptOg | Self::ScryptN => Some(65536.0),
            Self::Keccak | Self::Groestl => Some(256.0),
            _ => None,
        }
    }

    /// Hard-coded difficulty-1 target replacing the family default.
    fn diff1_override(&self) -> Option<BigUint> {
        match self {
            Self::Equihash | Self::VerusHash => Some(target::equihash_diff1()),
            _ => None,
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquihashParams {
    #[serde(default = "default_n", alias = "N")]
    pub n: u32,
    #[serde(default = "default_k", alias = "K")]
    pub k: u32,
    #[serde(default = "default_personalization")]
    pub personalization: String,
}

fn default_n() -> u32 { 200 }
fn default_k() -> u32 { 9 }
fn default_personalization() -> String { "ZcashPoW".to_string() }

impl Default for EquihashParams {
    fn default() -> Self {
        Self {
            n: default_n(),
            k: default_k(),
            personalization: default_personalization(),
        }
    }
}

/// Coin-level knobs that influence how an algorithm hashes.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmParams {
    pub n_value: Option<u32>,
    pub r_value: Option<u32>,
    pub normal_hashing: bool,
    pub proof_of_stake: bool,
    pub equihash: Option<EquihashParams>,
    /// Scrypt-N activation table, N (decimal) to unix time.
    pub time_table: Option<BTreeMap<String, u64>>,
}

/// A resolved algorithm: everything the job engine needs to hash and score shares.
#[derive(Clone)]
pub struct AlgorithmDescriptor {
    pub kind: AlgorithmKind,
    pub multiplier: f64,
    pub diff1: BigUint,
    pub pow: PowFunction,
    pub coinbase_hasher: CoinbaseHasher,
    pub block_hasher: BlockHasher,
    pub equihash: Option<EquihashParams>,
    verus: Option<Arc<dyn VerusHasher>>,
}

impl fmt::Debug for AlgorithmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmDescriptor")
            .field("kind", &self.kind)
            .field("multiplier", &self.multiplier)
            .field("pow", &self.pow)
            .field("coinbase_hasher", &self.coinbase_hasher)
            .field("block_hasher", &self.block_hasher)
            .field("equihash", &self.equihash)
            .finish()
    }
}

impl AlgorithmDescriptor {
    pub fn family(&self) -> AlgorithmFamily {
        self.kind.family()
    }

    /// Replace the hash backend, keeping the rest of the descriptor.
    pub fn with_pow(mut self, pow: PowFunction) -> Self {
        self.pow = pow;
        self
    }

    pub fn with_verus_backend(mut self, backend: Arc<dyn VerusHasher>) -> Self {
        self.verus = Some(backend);
        self
    }

    /// Standard-family algorithms must hash headers and Equihash-family ones
    /// must verify solutions.
    pub fn check_contract(&self) -> Result<(), AlgorithmError> {
        match (self.family(), &self.pow) {
            (AlgorithmFamily::Standard, PowFunction::Digest(_))
            | (AlgorithmFamily::Equihash, PowFunction::Verifier(_)) => Ok(()),
            (family, _) => Err(AlgorithmError::InvalidParameters {
                algorithm: self.kind.name().to_string(),
                reason: format!("proof-of-work backend does not fit the {:?} family", family),
            }),
        }
    }

    /// Header digest for the standard family. `None` for verifier-only algorithms.
    pub fn hash_header(&self, header: &[u8], ntime: u32) -> Option<[u8; 32]> {
        match &self.pow {
            PowFunction::Digest(hasher) => Some(hasher.digest(header, ntime)),
            PowFunction::Verifier(_) => None,
        }
    }

    /// Equihash-family solution check. Digest algorithms never accept solutions.
    pub fn verify_solution(&self, header: &[u8], solution: &[u8]) -> bool {
        match &self.pow {
            PowFunction::Verifier(verifier) => verifier.verify(header, solution),
            PowFunction::Digest(_) => false,
        }
    }

    /// Display-order block hash of a standard-family header.
    pub fn standard_block_hash(&self, header: &[u8], ntime: u32) -> [u8; 32] {
        let digest = match self.block_hasher {
            BlockHasher::Sha256d => util::sha256d(header),
            BlockHasher::PowDigest => self
                .hash_header(header, ntime)
                .unwrap_or_else(|| util::sha256d(header)),
        };
        let mut out = digest;
        out.reverse();
        out
    }

    /// Digest of `header || solution` for the Equihash family (internal byte order).
    pub fn equihash_header_digest(&self, header_solution: &[u8], variant: Option<VerusVariant>) -> [u8; 32] {
        match (self.kind, &self.verus, variant) {
            (AlgorithmKind::VerusHash, Some(backend), Some(v)) => backend.hash(v, header_solution),
            _ => util::sha256d(header_solution),
        }
    }
}

/// Resolves algorithm names into descriptors.
#[derive(Default, Clone)]
pub struct AlgorithmRegistry {
    verus: Option<Arc<dyn VerusHasher>>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verus_backend(mut self, backend: Arc<dyn VerusHasher>) -> Self {
        self.verus = Some(backend);
        self
    }

    pub fn resolve(&self, name: &str, params: &AlgorithmParams) -> Result<AlgorithmDescriptor, AlgorithmError> {
        let kind = AlgorithmKind::from_name(name)?;
        let diff1 = kind.diff1_override().unwrap_or_else(target::diff1);
        let multiplier = kind.multiplier().unwrap_or(1.0);

        let pow = match kind {
            AlgorithmKind::Sha256 => PowFunction::Digest(Arc::new(sha256d::Sha256d)),
            AlgorithmKind::Sha1 => PowFunction::Digest(Arc::new(sha1::Sha1Hasher)),
            AlgorithmKind::Scrypt => PowFunction::Digest(Arc::new(scrypt::ScryptHasher::new(
                kind.name(),
                params.n_value.unwrap_or(1024),
                params.r_value.unwrap_or(1),
            )?)),
            AlgorithmKind::ScryptOg => PowFunction::Digest(Arc::new(scrypt::ScryptHasher::new(
                kind.name(),
                params.n_value.unwrap_or(64),
                params.r_value.unwrap_or(1),
            )?)),
            AlgorithmKind::Keccak => PowFunction::Digest(Arc::new(keccak::KeccakHasher {
                normal_hashing: params.normal_hashing,
            })),
            AlgorithmKind::ScryptN => {
                let table = params.time_table.clone().unwrap_or_else(scrypt::default_time_table);
                PowFunction::Digest(Arc::new(scrypt::ScryptNHasher::new(kind.name(), &table)?))
            }
            AlgorithmKind::Blake2s => PowFunction::Digest(Arc::new(blake2s::Blake2sHasher)),
            AlgorithmKind::Groestl => PowFunction::Digest(Arc::new(groestl::GroestlHasher)),
            AlgorithmKind::Skein => PowFunction::Digest(Arc::new(skein::SkeinHasher)),
            AlgorithmKind::Equihash => {
                let eh = params.equihash.clone().unwrap_or_default();
                PowFunction::Verifier(Arc::new(equihash::EquihashVerifier::new(&eh)?))
            }
            AlgorithmKind::VerusHash => {
                if self.verus.is_none() {
                    return Err(AlgorithmError::UnsupportedAlgorithm(format!(
                        "{} (no VerusHash backend linked)",
                        kind.name()
                    )));
                }
                PowFunction::Verifier(Arc::new(verus::AcceptAll))
            }
        };

        let coinbase_hasher = match kind {
            AlgorithmKind::Keccak | AlgorithmKind::Groestl if !params.normal_hashing => CoinbaseHasher::Sha256,
            _ => CoinbaseHasher::Sha256d,
        };

        let block_hasher = match kind {
            AlgorithmKind::Blake2s
            | AlgorithmKind::Groestl
            | AlgorithmKind::Skein
            | AlgorithmKind::ScryptN
            | AlgorithmKind::Sha1 => BlockHasher::Sha256d,
            AlgorithmKind::Scrypt | AlgorithmKind::ScryptOg if !params.proof_of_stake => BlockHasher::Sha256d,
            _ => BlockHasher::PowDigest,
        };

        let equihash = match kind.family() {
            AlgorithmFamily::Equihash => Some(params.equihash.clone().unwrap_or_default()),
            AlgorithmFamily::Standard => None,
        };

        tracing::debug!(algorithm = kind.name(), multiplier, "resolved algorithm");

        let descriptor = AlgorithmDescriptor {
            kind,
            multiplier,
            diff1,
            pow,
            coinbase_hasher,
            block_hasher,
            equihash,
            verus: self.verus.clone(),
        };
        descriptor.check_contract()?;
        Ok(descriptor)
    }
}

/// Resolve with the built-in backends only.
pub fn resolve(name: &str, params: &AlgorithmParams) -> Result<AlgorithmDescriptor, AlgorithmError> {
    AlgorithmRegistry::new().resolve(name, params)
}
