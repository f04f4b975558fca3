/// End-to-end pipeline throughput for a few block sizes and codecs.
use blockzip::{CodecKind, Pipeline, PipelineConfig};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const SOURCE_LEN: usize = 16 * 1024 * 1024;

/// Half-compressible data: repeated text interleaved with noise.
fn sample_data() -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB10C);
    let text = b"block pipeline benchmark line with some repetition. ";
    let mut data = Vec::with_capacity(SOURCE_LEN);
    while data.len() < SOURCE_LEN {
        data.extend_from_slice(text);
        data.extend((0..32).map(|_| rng.gen::<u8>()));
    }
    data.truncate(SOURCE_LEN);
    data
}

fn compress_benchmarks(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.bin");
    fs::write(&source, sample_data()).unwrap();

    let mut group = c.benchmark_group("compress");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);
    group.throughput(Throughput::Bytes(SOURCE_LEN as u64));

    for codec in [CodecKind::Zstd, CodecKind::Gzip] {
        for block_size in [256 * 1024u32, 4 * 1024 * 1024] {
            let pipeline = Pipeline::new(PipelineConfig {
                block_size,
                codec,
                ..PipelineConfig::default()
            })
            .unwrap();
            let archive = dir.path().join(format!("{}-{}.bz", codec, block_size));
            group.bench_with_input(
                BenchmarkId::new(codec.to_string(), block_size),
                &block_size,
                |b, _| b.iter(|| pipeline.compress(&source, &archive).unwrap()),
            );
        }
    }
    group.finish();
}

fn decompress_benchmarks(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.bin");
    let archive = dir.path().join("source.bz");
    let restored = dir.path().join("restored.bin");
    fs::write(&source, sample_data()).unwrap();

    let pipeline = Pipeline::new(PipelineConfig {
        block_size: 1024 * 1024,
        ..PipelineConfig::default()
    })
    .unwrap();
    pipeline.compress(&source, &archive).unwrap();

    let mut group = c.benchmark_group("decompress");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(SOURCE_LEN as u64));
    for workers in [1usize, 2, 4] {
        let pipeline = Pipeline::new(PipelineConfig {
            block_size: 1024 * 1024,
            workers: Some(workers),
            ..PipelineConfig::default()
        })
        .unwrap();
        group.bench_with_input(BenchmarkId::new("zstd", workers), &workers, |b, _| {
            b.iter(|| pipeline.decompress(&archive, &restored).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, compress_benchmarks, decompress_benchmarks);
criterion_main!(benches);
