use criterion::{criterion_group, criterion_main, Criterion};
use cnn_engine::backend::{ConvEngine, ConvEngineConfig};
use cnn_engine::ops::activation::softmax;
use cnn_engine::ops::conv::{conv2d, conv2d_im2col, conv2d_tiled, Conv2DConfig};
use cnn_engine::ops::normalization::{batch_normalize, BatchNormParams};
use cnn_engine::ops::pooling::{adaptive_avg_pool2d, max_pool2d};
use cnn_engine::tensor::{FeatureMap, Kernel};
use rand::prelude::*;

fn random_case(rng: &mut StdRng, size: usize, channels: usize, filters: usize) -> (FeatureMap, Kernel, Vec<f32>) {
    let mut input = FeatureMap::new(size, size, channels);
    input.random_fill(rng);
    let mut kernel = Kernel::new(3, channels, filters);
    kernel.random_fill(rng);
    let bias = (0..filters).map(|_| rng.gen::<f32>()).collect();
    (input, kernel, bias)
}

fn bench_conv(c: &mut Criterion) {
    let _ = env_logger::try_init();
    let mut group = c.benchmark_group("conv2d");
    let mut rng = StdRng::seed_from_u64(0);
    let config = Conv2DConfig::new(1, 1);

    for &(size, channels, filters) in [(32, 3, 32), (16, 32, 64), (8, 64, 128)].iter() {
        let (input, kernel, bias) = random_case(&mut rng, size, channels, filters);
        let label = format!("{}x{}x{}_f{}", size, size, channels, filters);

        group.bench_function(format!("direct_{}", label), |b| {
            b.iter(|| std::hint::black_box(conv2d(&input, &kernel, &bias, config)))
        });
        group.bench_function(format!("tiled_{}", label), |b| {
            b.iter(|| std::hint::black_box(conv2d_tiled(&input, &kernel, &bias, config, 32)))
        });
        group.bench_function(format!("im2col_{}", label), |b| {
            b.iter(|| std::hint::black_box(conv2d_im2col(&input, &kernel, &bias, config)))
        });
        let engine = ConvEngine::new(ConvEngineConfig::default());
        group.bench_function(format!("engine_{}", label), |b| {
            b.iter(|| std::hint::black_box(engine.conv2d(&input, &kernel, &bias, config)))
        });
    }

    group.finish();
}

fn bench_ops(c: &mut Criterion) {
    let _ = env_logger::try_init();
    let mut group = c.benchmark_group("ops");
    group.measurement_time(std::time::Duration::from_secs(1));
    group.warm_up_time(std::time::Duration::from_millis(200));

    let mut rng = StdRng::seed_from_u64(1);
    let mut fm = FeatureMap::new(32, 32, 32);
    fm.random_fill(&mut rng);
    let params = BatchNormParams::new(32);
    let logits: Vec<f32> = (0..1000).map(|_| rng.gen::<f32>() * 10.0).collect();

    group.bench_function("max_pool_2x2", |bencher| {
        bencher.iter(|| std::hint::black_box(max_pool2d(&fm, 2, 2)))
    });
    group.bench_function("adaptive_avg_pool_7x7", |bencher| {
        bencher.iter(|| std::hint::black_box(adaptive_avg_pool2d(&fm, 7, 7)))
    });
    group.bench_function("batch_normalize", |bencher| {
        bencher.iter(|| std::hint::black_box(batch_normalize(&fm, &params)))
    });
    group.bench_function("softmax_1000", |bencher| {
        bencher.iter(|| std::hint::black_box(softmax(&logits)))
    });

    group.finish();
}

criterion_group!(benches, bench_conv, bench_ops);
criterion_main!(benches);
