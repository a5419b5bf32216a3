use crate::error::EngineError;
use crate::ops::conv::*;
use crate::tensor::{FeatureMap, Kernel};
use ndarray::s;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

fn random_pair(seed: u64, h: usize, w: usize, c: usize, k: usize, f: usize) -> (FeatureMap, Kernel, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut input = FeatureMap::new(h, w, c);
    input.random_fill(&mut rng);
    let mut kernel = Kernel::new(k, c, f);
    kernel.random_fill(&mut rng);
    let bias: Vec<f32> = (0..f).map(|i| i as f32 * 0.1 - 0.2).collect();
    (input, kernel, bias)
}

#[test]
fn output_dims_follow_formula() {
    assert_eq!(conv_output_dims(32, 32, 3, 1, 1).unwrap(), (32, 32));
    assert_eq!(conv_output_dims(5, 7, 3, 0, 2).unwrap(), (2, 3));
    assert_eq!(conv_output_dims(3, 3, 3, 0, 1).unwrap(), (1, 1));
    assert!(matches!(
        conv_output_dims(4, 4, 3, 0, 0),
        Err(EngineError::InvalidConfig(_))
    ));
    assert!(conv_output_dims(2, 2, 5, 1, 1).is_err());
    assert!(conv_output_dims(2, 2, 0, 0, 1).is_err());
    assert!(matches!(
        conv_output_dims(4, 4, 3, usize::MAX / 2 + 1, 1),
        Err(EngineError::InvalidConfig(_))
    ));
    assert!(matches!(
        conv_output_dims(usize::MAX, 4, 3, 1, 1),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[test]
fn convolve_point_reads_strided_window() {
    let input = FeatureMap::from_vec((0..16).map(|v| v as f32).collect(), 4, 4, 1).unwrap();
    let mut kernel = Kernel::new(2, 1, 1);
    kernel.set(0, 0, 1, 1, 1.0).unwrap();
    let view = input.view();
    let weights = kernel.view();
    let filter = weights.slice(s![0, .., .., ..]);
    // window at (1, 1) with stride 2 starts at (2, 2); bottom-right is (3, 3) = 15
    assert_eq!(convolve_point(&view, &filter, 1, 1, 2), 15.0);
}

#[test]
fn validation_rejects_bias_and_channel_mismatch() {
    let input = FeatureMap::new(4, 4, 2);
    let kernel = Kernel::new(3, 2, 3);
    assert!(matches!(
        conv2d(&input, &kernel, &[0.0; 2], Conv2DConfig::default()),
        Err(EngineError::BiasLength {
            bias: 2,
            filters: 3
        })
    ));
    let wrong_depth = Kernel::new(3, 1, 3);
    assert!(matches!(
        conv2d(&input, &wrong_depth, &[0.0; 3], Conv2DConfig::default()),
        Err(EngineError::ChannelMismatch {
            input: 2,
            kernel: 1
        })
    ));
}

#[test]
fn tiled_matches_direct_for_odd_block_sizes() {
    let (input, kernel, bias) = random_pair(11, 9, 7, 3, 3, 5);
    let config = Conv2DConfig::new(1, 1);
    let direct = conv2d(&input, &kernel, &bias, config).unwrap();
    for block in [0, 1, 2, 3, 64] {
        let tiled = conv2d_tiled(&input, &kernel, &bias, config, block).unwrap();
        assert_eq!(tiled.shape(), direct.shape());
        for (a, b) in tiled.as_slice().iter().zip(direct.as_slice()) {
            assert!(approx_eq(*a, *b, 1e-6), "block {}: {} vs {}", block, a, b);
        }
    }
}

#[test]
fn same_and_strided_shapes() {
    let (input, kernel, bias) = random_pair(3, 5, 5, 2, 3, 4);
    let same = conv2d_same(&input, &kernel, &bias).unwrap();
    assert_eq!(same.shape(), [5, 5, 4]);
    let valid = conv2d_valid(&input, &kernel, &bias).unwrap();
    assert_eq!(valid.shape(), [3, 3, 4]);
    let strided = conv2d_with_stride(&input, &kernel, &bias, 2).unwrap();
    assert_eq!(strided.shape(), [2, 2, 4]);
    assert_eq!(strided.get(3, 1, 1).unwrap(), valid.get(3, 2, 2).unwrap());
}

#[test]
fn im2col_rows_are_receptive_fields() {
    let input = FeatureMap::from_vec((0..32).map(|v| v as f32).collect(), 4, 4, 2).unwrap();
    let cols = im2col(&input, 3, 0, 1).unwrap();
    assert_eq!(cols.dim(), (4, 18));
    // row 3 = output (1, 1): channel 0 window starts at value 5, channel 1 at 21
    assert_eq!(cols[[3, 0]], 5.0);
    assert_eq!(cols[[3, 8]], 15.0);
    assert_eq!(cols[[3, 9]], 21.0);
}

#[test]
fn im2col_convolution_matches_direct() {
    let (input, kernel, bias) = random_pair(5, 6, 6, 3, 3, 4);
    for config in [Conv2DConfig::new(0, 1), Conv2DConfig::new(1, 2)] {
        let direct = conv2d(&input, &kernel, &bias, config).unwrap();
        let gemm = conv2d_im2col(&input, &kernel, &bias, config).unwrap();
        assert_eq!(gemm.shape(), direct.shape());
        for (a, b) in gemm.as_slice().iter().zip(direct.as_slice()) {
            assert!(approx_eq(*a, *b, 1e-4));
        }
    }
}

#[test]
fn depthwise_accepts_both_kernel_layouts() {
    let (input, _, _) = random_pair(9, 5, 5, 3, 3, 3);
    let mut rng = StdRng::seed_from_u64(21);
    let mut thin = Kernel::new(3, 1, 3);
    thin.random_fill(&mut rng);
    // full-depth kernel with the thin weights on the diagonal
    let mut full = Kernel::new(3, 3, 3);
    for c in 0..3 {
        for h in 0..3 {
            for w in 0..3 {
                full.set(c, c, h, w, thin.get(c, 0, h, w).unwrap()).unwrap();
            }
        }
    }
    let bias = [0.5, 0.0, -0.5];
    let config = Conv2DConfig::new(1, 1);
    let a = depthwise_conv2d(&input, &thin, &bias, config).unwrap();
    let b = depthwise_conv2d(&input, &full, &bias, config).unwrap();
    assert_eq!(a, b);
    assert!(depthwise_conv2d(&input, &Kernel::new(3, 1, 2), &bias[..2], config).is_err());
}

#[test]
fn grouped_with_one_group_is_plain_convolution() {
    let (input, kernel, bias) = random_pair(13, 6, 6, 4, 3, 4);
    let config = Conv2DConfig::new(1, 1);
    let plain = conv2d(&input, &kernel, &bias, config).unwrap();
    let grouped = group_conv2d(&input, &kernel, &bias, 1, config).unwrap();
    assert_eq!(plain, grouped);
}

#[test]
fn grouped_isolates_channel_groups() {
    let (input, _, _) = random_pair(17, 4, 4, 4, 3, 2);
    let mut rng = StdRng::seed_from_u64(18);
    let mut kernel = Kernel::new(3, 2, 2);
    kernel.random_fill(&mut rng);
    let bias = [0.0, 0.0];
    let config = Conv2DConfig::new(1, 1);
    let grouped = group_conv2d(&input, &kernel, &bias, 2, config).unwrap();

    // filter 1 only sees channels 2..4
    let upper = FeatureMap::from_array(input.view().slice(s![2..4, .., ..]).to_owned());
    let filter1 = Kernel::from_array(kernel.view().slice(s![1..2, .., .., ..]).to_owned()).unwrap();
    let expected = conv2d(&upper, &filter1, &[0.0], config).unwrap();
    for h in 0..4 {
        for w in 0..4 {
            assert!(approx_eq(
                grouped.get(1, h, w).unwrap(),
                expected.get(0, h, w).unwrap(),
                1e-6
            ));
        }
    }
}

#[test]
fn grouped_rejects_bad_group_counts() {
    let input = FeatureMap::new(4, 4, 3);
    let kernel = Kernel::new(3, 3, 4);
    let bias = [0.0; 4];
    let config = Conv2DConfig::default();
    assert!(group_conv2d(&input, &kernel, &bias, 0, config).is_err());
    assert!(group_conv2d(&input, &kernel, &bias, 2, config).is_err());
}

#[test]
fn pointwise_requires_unit_kernel() {
    let input = FeatureMap::new(3, 3, 2);
    assert!(matches!(
        pointwise_conv2d(&input, &Kernel::new(3, 2, 1), &[0.0]),
        Err(EngineError::InvalidConfig(_))
    ));
    let mut mix = Kernel::new(1, 2, 1);
    mix.set(0, 0, 0, 0, 1.0).unwrap();
    mix.set(0, 1, 0, 0, 1.0).unwrap();
    let mut input = input;
    input.fill(2.0);
    let out = pointwise_conv2d(&input, &mix, &[1.0]).unwrap();
    assert!(out.as_slice().iter().all(|&v| v == 5.0));
}

#[test]
fn planning_helpers() {
    assert_eq!(optimal_num_workers(1), 1);
    assert!(optimal_num_workers(64) >= 1);
    let t = estimate_conv_time(32, 32, 3, 3, 32, 1, 1).unwrap();
    assert!(approx_eq(t as f32, 8.84736e-4, 1e-9));
    assert!(estimate_conv_time(2, 2, 1, 5, 1, 0, 1).is_err());
}

#[test]
fn empty_dimensions_are_rejected_on_every_path() {
    let config = Conv2DConfig::default();
    let no_channels = FeatureMap::new(3, 3, 0);
    let no_depth = Kernel::new(3, 0, 2);
    let input = FeatureMap::new(3, 3, 2);
    let no_filters = Kernel::new(3, 2, 0);
    let no_size = Kernel::new(0, 2, 2);
    let empty_plane = FeatureMap::new(0, 3, 2);
    let kernel = Kernel::new(3, 2, 2);

    let cases: [(&FeatureMap, &Kernel, &[f32]); 4] = [
        (&no_channels, &no_depth, &[1.0, 2.0]),
        (&input, &no_filters, &[]),
        (&input, &no_size, &[0.0, 0.0]),
        (&empty_plane, &kernel, &[0.0, 0.0]),
    ];
    for (fm, k, bias) in cases {
        assert!(matches!(
            conv2d(fm, k, bias, config),
            Err(EngineError::InvalidDimensions(_))
        ));
        assert!(matches!(
            conv2d_tiled(fm, k, bias, config, 4),
            Err(EngineError::InvalidDimensions(_))
        ));
        assert!(matches!(
            conv2d_im2col(fm, k, bias, config),
            Err(EngineError::InvalidDimensions(_))
        ));
        #[cfg(feature = "parallel")]
        assert!(matches!(
            conv2d_parallel(fm, k, bias, config, 2),
            Err(EngineError::InvalidDimensions(_))
        ));
    }

    assert!(matches!(
        depthwise_conv2d(&no_channels, &Kernel::new(3, 1, 0), &[], config),
        Err(EngineError::InvalidDimensions(_))
    ));
    assert!(matches!(
        depthwise_conv2d(&input, &Kernel::new(0, 1, 2), &[0.0, 0.0], config),
        Err(EngineError::InvalidDimensions(_))
    ));
    assert!(matches!(
        group_conv2d(&no_channels, &Kernel::new(3, 0, 2), &[0.0, 0.0], 2, config),
        Err(EngineError::InvalidDimensions(_))
    ));
    assert!(matches!(
        group_conv2d(&input, &no_filters, &[], 1, config),
        Err(EngineError::InvalidDimensions(_))
    ));
}
