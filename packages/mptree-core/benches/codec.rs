use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mptree_core::PathCodec;

fn deep_path(codec: &PathCodec, depth: usize) -> String {
    let seq: Vec<u64> = (1..=depth as u64).map(|i| i * 7 % 9000 + 1).collect();
    codec.encode(&seq).expect("encode")
}

fn codec_benches(c: &mut Criterion) {
    let codec = PathCodec::default();
    let path = deep_path(&codec, 12);
    let seq = codec.decode(&path).expect("decode");

    c.bench_function("encode_depth_12", |b| {
        b.iter(|| codec.encode(black_box(&seq)).expect("encode"))
    });
    c.bench_function("decode_depth_12", |b| {
        b.iter(|| codec.decode(black_box(&path)).expect("decode"))
    });
    c.bench_function("shift_level_6", |b| {
        b.iter(|| codec.shift(black_box(&path), 6, 3).expect("shift"))
    });
    c.bench_function("rebase_depth_12", |b| {
        let old_prefix = codec.encode(&seq[..4]).expect("prefix");
        let new_prefix = deep_path(&codec, 7);
        b.iter(|| {
            codec
                .rebase(black_box(&path), &old_prefix, &new_prefix)
                .expect("rebase")
        })
    });
    c.bench_function("subtree_bounds", |b| {
        b.iter(|| codec.subtree_bounds(black_box(&path)))
    });
}

criterion_group!(benches, codec_benches);
criterion_main!(benches);
