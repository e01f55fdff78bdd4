/// 256-bit target and difficulty arithmetic
///
/// Digests are interpreted as little-endian unsigned 256-bit integers.
/// Difficulties are reported as `f64`, the way miners and stats consumers
/// expect them.

use num_bigint::BigUint;
use num_traits::{Num, ToPrimitive, Zero};

use crate::error::TargetError;

/// Difficulty-1 target of the standard (bitcoin-style) family.
pub const DIFF1_HEX: &str = "00000000ffff0000000000000000000000000000000000000000000000000000";

/// Difficulty-1 target of the Equihash family.
pub const EQUIHASH_DIFF1_HEX: &str =
    "0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

pub fn parse_target_hex(hex_str: &str) -> Result<BigUint, TargetError> {
    let trimmed = hex_str.trim_start_matches("0x");
    BigUint::from_str_radix(trimmed, 16).map_err(|_| TargetError::InvalidHex(hex_str.to_string()))
}

pub fn diff1() -> BigUint {
    BigUint::from_str_radix(DIFF1_HEX, 16).unwrap_or_default()
}

pub fn equihash_diff1() -> BigUint {
    BigUint::from_str_radix(EQUIHASH_DIFF1_HEX, 16).unwrap_or_default()
}

/// Decode a compact `bits` field (e.g. `"1d00ffff"`) into a full target.
pub fn target_from_bits(bits_hex: &str) -> Result<BigUint, TargetError> {
    let bytes = hex::decode(bits_hex).map_err(|_| TargetError::InvalidHex(bits_hex.to_string()))?;
    if bytes.len() != 4 {
        return Err(TargetError::BadBitsLength(bytes.len()));
    }
    let exponent = bytes[0] as usize;
    let mantissa = BigUint::from_bytes_be(&bytes[1..]);
    let target = if exponent >= 3 {
        mantissa << (8 * (exponent - 3))
    } else {
        mantissa >> (8 * (3 - exponent))
    };
    Ok(target)
}

/// Read a 32-byte digest as a little-endian integer.
pub fn digest_value(digest: &[u8]) -> BigUint {
    BigUint::from_bytes_le(digest)
}

pub fn to_f64(n: &BigUint) -> f64 {
    n.to_f64().unwrap_or(f64::MAX)
}

/// Network difficulty of a target, rounded to 9 decimal places.
pub fn difficulty_for_target(diff1: &BigUint, target: &BigUint) -> f64 {
    if target.is_zero() {
        return f64::INFINITY;
    }
    let raw = to_f64(diff1) / to_f64(target);
    (raw * 1e9).round() / 1e9
}

/// Difficulty achieved by a share whose digest has integer value `header_value`.
pub fn share_difficulty(diff1: &BigUint, header_value: &BigUint, multiplier: f64) -> f64 {
    to_f64(diff1) / to_f64(header_value) * multiplier
}
