use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use secure_datagram::utils::crypto::{generate_salt, Crypto};
use secure_datagram::utils::KeyPair;

#[allow(clippy::unwrap_used)]
fn bench_seal_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal_open");
    let crypto = Crypto::new(b"benchmark-session-key-0123456789").unwrap();
    let salt = [3u8; 8];

    for &size in &[64usize, 1024, 8192, 65_200] {
        let plaintext = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("seal_{size}b"), |b| {
            b.iter(|| crypto.seal(&salt, black_box(&plaintext)).unwrap())
        });

        let sealed = crypto.seal(&salt, &plaintext).unwrap();
        group.bench_function(format!("open_{size}b"), |b| {
            b.iter(|| {
                crypto
                    .open(&sealed.header, black_box(&sealed.ciphertext), &sealed.footer)
                    .unwrap()
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_key_setup(c: &mut Criterion) {
    let server = KeyPair::generate();
    let client = KeyPair::generate();

    c.bench_function("x25519_shared_key", |b| {
        b.iter(|| client.shared_key(black_box(server.public())))
    });
    c.bench_function("subkey_derivation", |b| {
        b.iter(|| Crypto::new(black_box(b"benchmark-session-key-0123456789")).unwrap())
    });
    c.bench_function("generate_salt", |b| b.iter(|| generate_salt().unwrap()));
}

criterion_group!(benches, bench_seal_open, bench_key_setup);
criterion_main!(benches);
