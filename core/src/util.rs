/// Byte-level helpers for coinbase, header and block serialization
///
/// Conventions follow the bitcoin wire format: integers little-endian,
/// hashes displayed in reverse byte order, lengths as CompactSize varints.

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, the default header and transaction hash.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

pub fn reversed(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}

/// Reverse the byte order of a hex string (display order <-> internal order).
pub fn reverse_hex(hex_str: &str) -> Result<String, hex::FromHexError> {
    let bytes = hex::decode(hex_str)?;
    Ok(hex::encode(reversed(&bytes)))
}

/// Reverse the order of 4-byte words while keeping the bytes of each word.
///
/// Stratum v1 sends `prevhash` this way.
pub fn reverse_word_order(bytes: &[u8]) -> Vec<u8> {
    bytes
        .chunks(4)
        .rev()
        .flat_map(|w| w.iter().copied())
        .collect()
}

/// CompactSize encoding.
pub fn var_int(n: u64) -> Vec<u8> {
    if n < 0xfd {
        vec![n as u8]
    } else if n <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(n as u16).to_le_bytes());
        out
    } else if n <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(n as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xff];
        out.extend_from_slice(&n.to_le_bytes());
        out
    }
}

/// Script number push used for the BIP34 height and the coinbase timestamp.
///
/// Values 1..=16 use the single-byte `OP_1..OP_16` opcodes.
pub fn serialize_number(n: u64) -> Vec<u8> {
    if (1..=16).contains(&n) {
        return vec![0x50 + n as u8];
    }
    let mut body = Vec::with_capacity(8);
    let mut v = n;
    while v > 0x7f {
        body.push((v & 0xff) as u8);
        v >>= 8;
    }
    body.push(v as u8);

    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(body.len() as u8);
    out.extend_from_slice(&body);
    out
}

/// Length-prefixed string push.
pub fn serialize_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = match bytes.len() {
        n if n < 253 => vec![n as u8],
        n if n < 0x10000 => {
            let mut v = vec![253];
            v.extend_from_slice(&(n as u16).to_le_bytes());
            v
        }
        n => {
            let mut v = vec![254];
            v.extend_from_slice(&(n as u32).to_le_bytes());
            v
        }
    };
    out.extend_from_slice(bytes);
    out
}

/// True when `s` is non-odd-length, lowercase-or-uppercase hexadecimal.
pub fn is_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_int_boundaries() {
        assert_eq!(var_int(0), vec![0x00]);
        assert_eq!(var_int(0xfc), vec![0xfc]);
        assert_eq!(var_int(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(var_int(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_serialize_number() {
        assert_eq!(serialize_number(0), vec![0x01, 0x00]);
        assert_eq!(serialize_number(16), vec![0x60]);
        assert_eq!(serialize_number(17), vec![0x01, 0x11]);
        // BIP34 height 500_000 -> 03 20 a1 07
        assert_eq!(serialize_number(500_000), vec![0x03, 0x20, 0xa1, 0x07]);
        // high bit set needs an extra byte
        assert_eq!(serialize_number(0x80), vec![0x02, 0x80, 0x00]);
    }

    #[test]
    fn test_reverse_word_order() {
        let input = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(reverse_word_order(&input), vec![5, 6, 7, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sha256d_known_vector() {
        // sha256d("") = 5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_is_hex() {
        assert!(is_hex("00ff"));
        assert!(is_hex(""));
        assert!(!is_hex("0"));
        assert!(!is_hex("zz"));
    }
}
