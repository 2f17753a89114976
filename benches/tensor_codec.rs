use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use confidential_inference_client::crypto::seal;
use confidential_inference_client::tensor::codec::{decode_tensor_map, encode_tensor_map};
use confidential_inference_client::{Tensor, TensorMap};

fn bench_tensor_map(c: &mut Criterion) {
    // [128, 768] f32 activations plus a small mask (~384 KB)
    let hidden = Tensor::from_vec(vec![128, 768], &vec![0.5f32; 128 * 768]).unwrap();
    let mask = Tensor::from_vec(vec![1, 128], &vec![1i64; 128]).unwrap();
    let map = TensorMap::from([
        ("hidden".to_string(), hidden),
        ("attention_mask".to_string(), mask),
    ]);
    let encoded = encode_tensor_map(&map).unwrap();

    let mut group = c.benchmark_group("tensor_codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode_128x768_f32", |b| {
        b.iter(|| black_box(encode_tensor_map(&map).unwrap()))
    });

    group.bench_function("decode_128x768_f32", |b| {
        b.iter(|| black_box(decode_tensor_map(encoded.clone()).unwrap()))
    });

    group.finish();
}

fn bench_seal_open(c: &mut Criterion) {
    let key = [0x42u8; 32];
    let aad = [0xCF, 0x4E, 0x01, 0x03, 0, 0, 0, 1];
    let plaintext = vec![0xBBu8; 4096];

    let mut group = c.benchmark_group("crypto");
    group.throughput(Throughput::Bytes(4096));

    group.bench_function("seal_4k", |b| {
        let base = seal::random_iv();
        let mut counter = 0u64;
        b.iter(|| {
            let iv = seal::request_iv(&base, counter);
            counter += 1;
            black_box(seal::seal(&key, &iv, &aad, &plaintext).unwrap())
        })
    });

    group.bench_function("open_4k", |b| {
        let iv = seal::random_iv();
        let sealed = seal::seal(&key, &iv, &aad, &plaintext).unwrap();
        b.iter(|| black_box(seal::open(&key, &iv, &aad, &sealed).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_tensor_map, bench_seal_open);
criterion_main!(benches);
