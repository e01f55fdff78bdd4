use coinpool_core::algorithms::{resolve, AlgorithmParams};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_header_digests(c: &mut Criterion) {
    let header = [0x5au8; 80];
    let params = AlgorithmParams::default();

    for name in ["sha256", "sha1", "scrypt", "keccak", "blake2s", "groestl", "skein"] {
        let descriptor = match resolve(name, &params) {
            Ok(d) => d,
            Err(e) => panic!("{}: {}", name, e),
        };
        c.bench_function(&format!("{}_header", name), |b| {
            b.iter(|| descriptor.hash_header(black_box(&header), black_box(1_700_000_000)))
        });
    }
}

fn bench_equihash_reject(c: &mut Criterion) {
    let descriptor = resolve("equihash", &AlgorithmParams::default()).unwrap();
    let header = [0u8; 140];
    let solution = [0u8; 1344];
    c.bench_function("equihash_200_9_reject", |b| {
        b.iter(|| descriptor.verify_solution(black_box(&header), black_box(&solution)))
    });
}

criterion_group!(benches, bench_header_digests, bench_equihash_reject);
criterion_main!(benches);
