//! Benchmarks for the traffic-shaping primitives.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use quantumgate_obfuscation::*;

fn bench_padding(c: &mut Criterion) {
    let mut group = c.benchmark_group("padding");

    for size in [128, 512, 1024, 4096] {
        let data = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(format!("size_classes_{}", size), &data, |b, data| {
            let mut engine = PaddingEngine::new(PaddingMode::SizeClasses);
            b.iter(|| {
                let mut buf = data.clone();
                let target = engine.padded_size(data.len());
                engine.pad(&mut buf, target);
                black_box(buf);
            });
        });

        group.bench_with_input(format!("statistical_{}", size), &data, |b, data| {
            let mut engine = PaddingEngine::new(PaddingMode::Statistical);
            b.iter(|| {
                let mut buf = data.clone();
                let target = engine.padded_size(data.len());
                engine.pad(&mut buf, target);
                black_box(buf);
            });
        });
    }

    group.finish();
}

fn bench_timing_obfuscator(c: &mut Criterion) {
    let mut group = c.benchmark_group("timing");

    use std::time::Duration;

    group.bench_function("none", |b| {
        let mut obfuscator = TimingObfuscator::new(TimingMode::None);
        b.iter(|| {
            let delay = obfuscator.next_delay();
            black_box(delay);
        });
    });

    group.bench_function("fixed", |b| {
        let mut obfuscator = TimingObfuscator::new(TimingMode::Fixed(Duration::from_millis(10)));
        b.iter(|| {
            let delay = obfuscator.next_delay();
            black_box(delay);
        });
    });

    group.bench_function("uniform", |b| {
        let mut obfuscator = TimingObfuscator::new(TimingMode::Uniform {
            min: Duration::from_millis(5),
            max: Duration::from_millis(15),
        });
        b.iter(|| {
            let delay = obfuscator.next_delay();
            black_box(delay);
        });
    });

    group.bench_function("normal", |b| {
        let mut obfuscator = TimingObfuscator::new(TimingMode::Normal {
            mean: Duration::from_millis(10),
            stddev: Duration::from_millis(2),
        });
        b.iter(|| {
            let delay = obfuscator.next_delay();
            black_box(delay);
        });
    });

    group.bench_function("exponential", |b| {
        let mut obfuscator = TimingObfuscator::new(TimingMode::Exponential {
            mean: Duration::from_millis(10),
        });
        b.iter(|| {
            let delay = obfuscator.next_delay();
            black_box(delay);
        });
    });

    group.finish();
}

fn bench_cover_traffic(c: &mut Criterion) {
    c.bench_function("cover_should_send_check", |b| {
        let generator =
            CoverTrafficGenerator::new(10.0, TrafficDistribution::Poisson { lambda: 10.0 });
        b.iter(|| {
            black_box(generator.should_send());
        });
    });
}

criterion_group!(benches, bench_padding, bench_timing_obfuscator, bench_cover_traffic);
criterion_main!(benches);
