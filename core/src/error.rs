use thiserror::Error;

/// Failures while resolving an algorithm at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error("the {0} hashing algorithm is not supported")]
    UnsupportedAlgorithm(String),

    #[error("invalid parameters for {algorithm}: {reason}")]
    InvalidParameters { algorithm: String, reason: String },
}

/// Failures while decoding network targets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid hex in target field: {0}")]
    InvalidHex(String),

    #[error("compact bits must be 4 bytes, got {0}")]
    BadBitsLength(usize),
}
