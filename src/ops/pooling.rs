//! Pooling operators: fixed-window (max/avg/min, Lp, rank, stochastic), fractional,
//! adaptive, global and spatial-pyramid pooling.
//!
//! Fixed-window pooling never pads: `out = (in - kernel_size) / stride + 1`.
//! Every configuration is checked before any output is computed.

use crate::error::{EngineError, Result};
use crate::tensor::FeatureMap;
use ndarray::{s, Array3, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolingKind {
    Max,
    Avg,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolingConfig {
    pub kernel_size: usize,
    pub stride: usize,
    pub kind: PoolingKind,
}

impl PoolingConfig {
    pub fn new(kernel_size: usize, stride: usize, kind: PoolingKind) -> Self {
        PoolingConfig {
            kernel_size,
            stride,
            kind,
        }
    }
}

/// Output `(height, width)` of an unpadded pooling window sweep.
pub fn pooling_output_dims(
    input_height: usize,
    input_width: usize,
    kernel_size: usize,
    stride: usize,
) -> Result<(usize, usize)> {
    if kernel_size == 0 {
        return Err(EngineError::InvalidConfig(
            "pooling kernel size must be positive, got 0".to_string(),
        ));
    }
    if stride == 0 {
        return Err(EngineError::InvalidConfig(
            "pooling stride must be positive, got 0".to_string(),
        ));
    }
    if kernel_size > input_height || kernel_size > input_width {
        return Err(EngineError::InvalidConfig(format!(
            "pooling kernel size ({}) larger than input dimensions ({}x{})",
            kernel_size, input_height, input_width
        )));
    }
    Ok((
        (input_height - kernel_size) / stride + 1,
        (input_width - kernel_size) / stride + 1,
    ))
}

fn window_max(window: &ArrayView2<'_, f32>) -> f32 {
    let mut iter = window.iter();
    match iter.next() {
        Some(&first) => iter.fold(first, |m, &v| if v > m { v } else { m }),
        None => 0.0,
    }
}

fn window_min(window: &ArrayView2<'_, f32>) -> f32 {
    let mut iter = window.iter();
    match iter.next() {
        Some(&first) => iter.fold(first, |m, &v| if v < m { v } else { m }),
        None => 0.0,
    }
}

fn window_avg(window: &ArrayView2<'_, f32>) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    window.sum() / window.len() as f32
}

fn reduce(kind: PoolingKind, window: &ArrayView2<'_, f32>) -> f32 {
    match kind {
        PoolingKind::Max => window_max(window),
        PoolingKind::Avg => window_avg(window),
        PoolingKind::Min => window_min(window),
    }
}

/// Sweeps a `kernel_size × kernel_size` window over every channel and reduces each
/// window with `reducer`.
fn sweep<F>(
    input: &FeatureMap,
    kernel_size: usize,
    stride: usize,
    mut reducer: F,
) -> Result<FeatureMap>
where
    F: FnMut(&ArrayView2<'_, f32>) -> Result<f32>,
{
    let (out_h, out_w) =
        pooling_output_dims(input.height(), input.width(), kernel_size, stride)?;
    let view = input.view();
    let mut out = Array3::<f32>::zeros((input.channels(), out_h, out_w));
    for ((c, i, j), o) in out.indexed_iter_mut() {
        let (h0, w0) = (i * stride, j * stride);
        let window = view.slice(s![c, h0..h0 + kernel_size, w0..w0 + kernel_size]);
        *o = reducer(&window)?;
    }
    Ok(FeatureMap::from_array(out))
}

pub fn pool2d(input: &FeatureMap, config: PoolingConfig) -> Result<FeatureMap> {
    sweep(input, config.kernel_size, config.stride, |w| {
        Ok(reduce(config.kind, w))
    })
}

pub fn max_pool2d(input: &FeatureMap, kernel_size: usize, stride: usize) -> Result<FeatureMap> {
    pool2d(input, PoolingConfig::new(kernel_size, stride, PoolingKind::Max))
}

pub fn avg_pool2d(input: &FeatureMap, kernel_size: usize, stride: usize) -> Result<FeatureMap> {
    pool2d(input, PoolingConfig::new(kernel_size, stride, PoolingKind::Avg))
}

pub fn min_pool2d(input: &FeatureMap, kernel_size: usize, stride: usize) -> Result<FeatureMap> {
    pool2d(input, PoolingConfig::new(kernel_size, stride, PoolingKind::Min))
}

/// Lp pooling: `(mean(|x|^p))^(1/p)` per window.
///
/// `p = +inf` is max pooling and `p = 1` is average pooling (of the signed values).
/// `p` must be positive.
pub fn lp_pool2d(
    input: &FeatureMap,
    kernel_size: usize,
    stride: usize,
    p: f64,
) -> Result<FeatureMap> {
    if p.is_nan() || p <= 0.0 {
        return Err(EngineError::InvalidConfig(format!(
            "Lp pooling order must be positive, got {}",
            p
        )));
    }
    if p == f64::INFINITY {
        return max_pool2d(input, kernel_size, stride);
    }
    if p == 1.0 {
        return avg_pool2d(input, kernel_size, stride);
    }
    sweep(input, kernel_size, stride, |window| {
        let total: f64 = window.iter().map(|&v| (v.abs() as f64).powf(p)).sum();
        Ok((total / window.len() as f64).powf(1.0 / p) as f32)
    })
}

/// k-th largest value (1-based) of every window.
pub fn rank_pool2d(
    input: &FeatureMap,
    kernel_size: usize,
    stride: usize,
    k: usize,
) -> Result<FeatureMap> {
    let window_len = kernel_size * kernel_size;
    if k == 0 || k > window_len {
        return Err(EngineError::InvalidConfig(format!(
            "rank must be in 1..={} for a {}x{} window, got {}",
            window_len, kernel_size, kernel_size, k
        )));
    }
    let mut scratch = Vec::with_capacity(window_len);
    sweep(input, kernel_size, stride, |window| {
        scratch.clear();
        scratch.extend(window.iter().copied());
        scratch.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scratch[k - 1])
    })
}

/// Stochastic pooling: each window picks one of its positive values at random with
/// probability proportional to the value. Windows without a positive value yield 0.
pub fn stochastic_pool2d<R: Rng + ?Sized>(
    input: &FeatureMap,
    kernel_size: usize,
    stride: usize,
    rng: &mut R,
) -> Result<FeatureMap> {
    let mut positives = Vec::with_capacity(kernel_size * kernel_size);
    sweep(input, kernel_size, stride, |window| {
        positives.clear();
        positives.extend(window.iter().copied().filter(|&v| v > 0.0));
        if positives.is_empty() {
            return Ok(0.0);
        }
        let dist = WeightedIndex::new(positives.iter().copied()).map_err(|e| {
            log::error!("stochastic_pool2d: bad window weights {:?}: {}", positives, e);
            EngineError::InvalidConfig(format!("stochastic pooling weights: {}", e))
        })?;
        Ok(positives[dist.sample(&mut *rng)])
    })
}

/// Fractional max pooling with a non-integer downscale factor `ratio > 1`.
///
/// Output is `max(1, floor(in / ratio))` per spatial axis; window `i` spans
/// `floor(i * ratio)..floor((i + 1) * ratio)`, clipped to the input and never empty.
pub fn fractional_max_pool2d(input: &FeatureMap, ratio: f64) -> Result<FeatureMap> {
    if ratio.is_nan() || ratio <= 1.0 {
        return Err(EngineError::InvalidConfig(format!(
            "pooling ratio must be greater than 1.0, got {}",
            ratio
        )));
    }
    let (in_h, in_w) = (input.height(), input.width());
    check_spatial(input)?;
    let out_h = ((in_h as f64 / ratio) as usize).max(1);
    let out_w = ((in_w as f64 / ratio) as usize).max(1);
    let bounds = |i: usize, len: usize| {
        let start = ((i as f64 * ratio) as usize).min(len - 1);
        let end = (((i + 1) as f64 * ratio) as usize).clamp(start + 1, len);
        (start, end)
    };
    let view = input.view();
    let out = Array3::from_shape_fn((input.channels(), out_h, out_w), |(c, i, j)| {
        let (h0, h1) = bounds(i, in_h);
        let (w0, w1) = bounds(j, in_w);
        window_max(&view.slice(s![c, h0..h1, w0..w1]))
    });
    Ok(FeatureMap::from_array(out))
}

fn check_spatial(input: &FeatureMap) -> Result<()> {
    if input.height() == 0 || input.width() == 0 {
        return Err(EngineError::InvalidDimensions(input.shape().to_vec()));
    }
    Ok(())
}

/// Adaptive window `start = i*in/out`, `end = (i+1)*in/out`, widened to at least one element.
fn adaptive_bounds(i: usize, input_len: usize, output_len: usize) -> (usize, usize) {
    let start = i * input_len / output_len;
    let end = ((i + 1) * input_len / output_len).clamp(start + 1, input_len);
    (start, end)
}

fn adaptive_pool(
    input: &FeatureMap,
    output_height: usize,
    output_width: usize,
    kind: PoolingKind,
) -> Result<FeatureMap> {
    if output_height == 0 || output_width == 0 {
        return Err(EngineError::InvalidConfig(format!(
            "adaptive pooling output must be positive, got {}x{}",
            output_height, output_width
        )));
    }
    check_spatial(input)?;
    let (in_h, in_w) = (input.height(), input.width());
    let view = input.view();
    let dims = (input.channels(), output_height, output_width);
    let out = Array3::from_shape_fn(dims, |(c, i, j)| {
        let (h0, h1) = adaptive_bounds(i, in_h, output_height);
        let (w0, w1) = adaptive_bounds(j, in_w, output_width);
        reduce(kind, &view.slice(s![c, h0..h1, w0..w1]))
    });
    Ok(FeatureMap::from_array(out))
}

/// Max pooling to a fixed output size regardless of input size.
pub fn adaptive_max_pool2d(
    input: &FeatureMap,
    output_height: usize,
    output_width: usize,
) -> Result<FeatureMap> {
    adaptive_pool(input, output_height, output_width, PoolingKind::Max)
}

pub fn adaptive_avg_pool2d(
    input: &FeatureMap,
    output_height: usize,
    output_width: usize,
) -> Result<FeatureMap> {
    adaptive_pool(input, output_height, output_width, PoolingKind::Avg)
}

/// One value per channel from the whole spatial plane.
fn global_reduce(input: &FeatureMap, kind: PoolingKind) -> Vec<f32> {
    input
        .view()
        .axis_iter(Axis(0))
        .map(|plane| reduce(kind, &plane))
        .collect()
}

pub fn global_max_pool(input: &FeatureMap) -> Vec<f32> {
    global_reduce(input, PoolingKind::Max)
}

pub fn global_min_pool(input: &FeatureMap) -> Vec<f32> {
    global_reduce(input, PoolingKind::Min)
}

pub fn global_avg_pool(input: &FeatureMap) -> Vec<f32> {
    global_reduce(input, PoolingKind::Avg)
}

/// L2 norm of every channel plane, accumulated in f64.
pub fn global_norm_pool(input: &FeatureMap) -> Vec<f32> {
    input
        .view()
        .axis_iter(Axis(0))
        .map(|plane| {
            let squares: f64 = plane.iter().map(|&v| (v as f64) * (v as f64)).sum();
            squares.sqrt() as f32
        })
        .collect()
}

/// Channel 0 of `mask`, checked against the spatial size of `input`.
fn mask_selector<'a>(input: &FeatureMap, mask: &'a FeatureMap) -> Result<ArrayView2<'a, f32>> {
    if mask.height() != input.height() || mask.width() != input.width() {
        log::error!(
            "global pooling mask {}x{} vs input {}x{}",
            mask.height(),
            mask.width(),
            input.height(),
            input.width()
        );
        return Err(EngineError::ShapeMismatch {
            what: "mask spatial size",
            expected: input.height() * input.width(),
            actual: mask.height() * mask.width(),
        });
    }
    if mask.channels() == 0 {
        return Err(EngineError::InvalidDimensions(mask.shape().to_vec()));
    }
    Ok(mask.view().index_axis_move(Axis(0), 0))
}

/// Global pooling restricted to positions where channel 0 of `mask` is positive.
///
/// `None` pools over every position. Channels with no selected position pool to 0.
pub fn global_pool_with_mask(
    input: &FeatureMap,
    mask: Option<&FeatureMap>,
    kind: PoolingKind,
) -> Result<Vec<f32>> {
    let Some(mask) = mask else {
        return Ok(global_reduce(input, kind));
    };
    let selector = mask_selector(input, mask)?;

    let result = input
        .view()
        .axis_iter(Axis(0))
        .map(|plane| {
            let selected = plane
                .iter()
                .zip(selector.iter())
                .filter(|(_, &m)| m > 0.0)
                .map(|(&v, _)| v);
            let mut count = 0usize;
            let mut acc: Option<f32> = None;
            for v in selected {
                count += 1;
                acc = Some(match (acc, kind) {
                    (None, _) => v,
                    (Some(a), PoolingKind::Max) => if v > a { v } else { a },
                    (Some(a), PoolingKind::Min) => if v < a { v } else { a },
                    (Some(a), PoolingKind::Avg) => a + v,
                });
            }
            match (acc, kind) {
                (None, _) => 0.0,
                (Some(total), PoolingKind::Avg) => total / count as f32,
                (Some(v), _) => v,
            }
        })
        .collect();
    Ok(result)
}

/// [`global_norm_pool`] over the positions where channel 0 of `mask` is positive.
pub fn global_norm_pool_with_mask(input: &FeatureMap, mask: Option<&FeatureMap>) -> Result<Vec<f32>> {
    let Some(mask) = mask else {
        return Ok(global_norm_pool(input));
    };
    let selector = mask_selector(input, mask)?;
    Ok(input
        .view()
        .axis_iter(Axis(0))
        .map(|plane| {
            let squares: f64 = plane
                .iter()
                .zip(selector.iter())
                .filter(|(_, &m)| m > 0.0)
                .map(|(&v, _)| (v as f64) * (v as f64))
                .sum();
            squares.sqrt() as f32
        })
        .collect())
}

/// Spatial pyramid pooling: adaptive max pooling to `level × level` for every level,
/// flattened channel-major and concatenated into a fixed-length vector.
pub fn spatial_pyramid_pool(input: &FeatureMap, levels: &[usize]) -> Result<Vec<f32>> {
    let total: usize = levels.iter().map(|&l| l * l * input.channels()).sum();
    let mut features = Vec::with_capacity(total);
    for &level in levels {
        let pooled = adaptive_max_pool2d(input, level, level)?;
        features.extend_from_slice(pooled.as_slice());
    }
    Ok(features)
}
