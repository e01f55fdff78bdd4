/// Algorithm registry integration tests
///
/// Resolution happens once per pool at startup, so these exercise the public
/// surface the job engine depends on: family, multiplier, diff1 and the
/// hash/verify contracts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use coinpool_core::algorithms::{resolve, AlgorithmFamily, AlgorithmParams, HeaderHasher, PowFunction};
use coinpool_core::target;
use coinpool_core::AlgorithmError;

// ═══════════════════════════════════════════════════════════════════════════
// 1. Name resolution
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_names_are_case_insensitive() {
    let a = resolve("SHA256", &AlgorithmParams::default()).unwrap();
    let b = resolve("sha256", &AlgorithmParams::default()).unwrap();
    assert_eq!(a.kind, b.kind);
}

#[test]
fn test_unsupported_names_fail() {
    for name in ["x16r", "kawpow", ""] {
        assert!(matches!(
            resolve(name, &AlgorithmParams::default()),
            Err(AlgorithmError::UnsupportedAlgorithm(_))
        ));
    }
}

#[test]
fn test_invalid_scrypt_n_fails() {
    let params = AlgorithmParams { n_value: Some(1000), ..Default::default() };
    assert!(matches!(
        resolve("scrypt", &params),
        Err(AlgorithmError::InvalidParameters { .. })
    ));
}

// ═══════════════════════════════════════════════════════════════════════════
// 2. Descriptor contracts
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_standard_family_digests() {
    for name in ["sha256", "sha1", "scrypt", "scrypt-og", "scrypt-n", "keccak", "blake2s", "groestl", "skein"] {
        let d = resolve(name, &AlgorithmParams::default()).unwrap();
        assert_eq!(d.family(), AlgorithmFamily::Standard, "{}", name);
        assert_eq!(d.diff1, target::diff1(), "{}", name);
        assert!(d.hash_header(&[0u8; 80], 0).is_some(), "{}", name);
        assert!(!d.verify_solution(&[0u8; 140], &[0u8; 32]), "{}", name);
    }
}

#[test]
fn test_block_hash_is_display_order() {
    let d = resolve("sha256", &AlgorithmParams::default()).unwrap();
    let header = [3u8; 80];
    let mut expected = coinpool_core::util::sha256d(&header);
    expected.reverse();
    assert_eq!(d.standard_block_hash(&header, 0), expected);
}

struct Counting(Arc<AtomicUsize>);

impl HeaderHasher for Counting {
    fn digest(&self, _header: &[u8], _ntime: u32) -> [u8; 32] {
        self.0.fetch_add(1, Ordering::SeqCst);
        [0u8; 32]
    }
}

#[test]
fn test_with_pow_swaps_backend() {
    let calls = Arc::new(AtomicUsize::new(0));
    let d = resolve("sha256", &AlgorithmParams::default())
        .unwrap()
        .with_pow(PowFunction::Digest(Arc::new(Counting(calls.clone()))));
    assert_eq!(d.hash_header(&[0u8; 80], 0), Some([0u8; 32]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// 3. Known answers
// ═══════════════════════════════════════════════════════════════════════════

fn digest_of(name: &str, params: &AlgorithmParams, data: &[u8]) -> [u8; 32] {
    resolve(name, params).unwrap().hash_header(data, 0).unwrap()
}

#[test]
fn test_sha1_known_answer() {
    let out = digest_of("sha1", &AlgorithmParams::default(), b"abc");
    assert_eq!(hex::encode(&out[12..]), "a9993e364706816aba3e25717850c26c9cd0d89d");
}

#[test]
fn test_groestl_known_answer() {
    // Groestl-512("") feeds the second round.
    let first = hex::decode(
        "6d3ad29d279110eef3adbd66de2a0345a77baede1557f5d099fce0c03d6dc2ba\
         8e6d4a6633dfbd66053c20faa87d1a11f39a7fbe4a6c2f009801370308fc4ad8",
    )
    .unwrap();
    use groestl::{Digest, Groestl512};
    assert_eq!(Groestl512::digest(b"")[..], first[..]);
    let second = Groestl512::digest(&first);
    assert_eq!(digest_of("groestl", &AlgorithmParams::default(), b"")[..], second[..32]);
}

#[test]
fn test_skein_known_answer() {
    let skein512 = hex::decode(
        "bc5b4c50925519c290cc634277ae3d6257212395cba733bbad37a4af0fa06af4\
         1fca7903d06564fea7a2d3730dbdb80c1f85562dfcc070334ea4d1d9e72cba7a",
    )
    .unwrap();
    assert_eq!(
        digest_of("skein", &AlgorithmParams::default(), b""),
        coinpool_core::util::sha256(&skein512)
    );
}

#[test]
fn test_scrypt_n_known_answer() {
    // scrypt(P = "", S = "", N = 16, r = 1, p = 1), first 32 bytes
    let expected = "77d6576238657b203b19ca42c18a0497f16b4844e3074ae8dfdffa3fede21442";
    let params = AlgorithmParams {
        time_table: Some(BTreeMap::from([("16".to_string(), 0)])),
        ..Default::default()
    };
    assert_eq!(hex::encode(digest_of("scrypt-n", &params, b"")), expected);

    let plain = AlgorithmParams { n_value: Some(16), ..Default::default() };
    assert_eq!(hex::encode(digest_of("scrypt", &plain, b"")), expected);
}

#[test]
fn test_scrypt_n_bad_table_fails() {
    let params = AlgorithmParams {
        time_table: Some(BTreeMap::from([("3000".to_string(), 0)])),
        ..Default::default()
    };
    assert!(matches!(
        resolve("scrypt-n", &params),
        Err(AlgorithmError::InvalidParameters { .. })
    ));
}
