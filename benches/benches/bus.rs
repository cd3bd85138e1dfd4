use std::time::Duration;

use alpha_bus::BusRegistry;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const BLOCK_SIZES: [usize; 5] = [64, 128, 256, 512, 1024];

fn write_then_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus");
    group.measurement_time(Duration::from_secs(5));

    let bus = BusRegistry::anonymous();
    for frames in BLOCK_SIZES {
        let left: Vec<f32> = (0..frames).map(|i| (i as f32 * 0.01).sin()).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let mut out_l = vec![0.0f32; frames];
        let mut out_r = vec![0.0f32; frames];

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::new("stereo_block", frames), &frames, |b, _| {
            b.iter(|| {
                bus.write_to_channel(1, &left, Some(&right));
                bus.read_from_channel(1, &mut out_l, Some(&mut out_r))
            });
        });
    }

    group.finish();
}

fn underrun(c: &mut Criterion) {
    let bus = BusRegistry::anonymous();
    let mut out = vec![0.0f32; 512];
    c.bench_function("bus/underrun_512", |b| {
        b.iter(|| bus.read_from_channel(2, &mut out, None));
    });
}

criterion_group!(benches, write_then_read, underrun);
criterion_main!(benches);
