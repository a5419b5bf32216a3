//! 2D convolution over channel-major feature maps.
//!
//! ```text
//! out[f, i, j] = bias[f] + Σc Σm Σn input[c, i*stride + m, j*stride + n] * kernel[f, c, m, n]
//! ```
//!
//! The direct, filter-parallel and tiled paths all reduce a receptive field through
//! [`convolve_point`], so they differ only in loop order and scheduling.

use crate::error::{EngineError, Result};
use crate::tensor::{pad_feature_map, FeatureMap, Kernel};
use ndarray::{s, Array2, Array3, ArrayView3, ArrayViewMut2, Axis, Zip};
use std::borrow::Cow;

/// Default tile edge for [`conv2d_tiled`].
pub const DEFAULT_BLOCK_SIZE: usize = 32;

/// Padding and stride for a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2DConfig {
    /// Zero border added on every side (0 = "valid").
    pub padding: usize,
    pub stride: usize,
}

impl Conv2DConfig {
    pub fn new(padding: usize, stride: usize) -> Self {
        Conv2DConfig { padding, stride }
    }
}

impl Default for Conv2DConfig {
    fn default() -> Self {
        Conv2DConfig {
            padding: 0,
            stride: 1,
        }
    }
}

/// Output `(height, width)` of a convolution: `(in + 2*padding - kernel_size) / stride + 1`.
///
/// Fails when the stride or kernel size is zero or the padded input is smaller than the kernel.
pub fn conv_output_dims(
    input_height: usize,
    input_width: usize,
    kernel_size: usize,
    padding: usize,
    stride: usize,
) -> Result<(usize, usize)> {
    if stride == 0 {
        return Err(EngineError::InvalidConfig(
            "stride must be positive, got 0".to_string(),
        ));
    }
    if kernel_size == 0 {
        return Err(EngineError::InvalidConfig(
            "kernel size must be positive, got 0".to_string(),
        ));
    }
    let padded = |extent: usize| padding.checked_mul(2).and_then(|p| extent.checked_add(p));
    let (Some(padded_h), Some(padded_w)) = (padded(input_height), padded(input_width)) else {
        return Err(EngineError::InvalidConfig(format!(
            "padding {} overflows the padded input size",
            padding
        )));
    };
    if padded_h < kernel_size || padded_w < kernel_size {
        return Err(EngineError::InvalidConfig(format!(
            "input {}x{} too small for kernel size {} after padding {}",
            input_height, input_width, kernel_size, padding
        )));
    }
    Ok((
        (padded_h - kernel_size) / stride + 1,
        (padded_w - kernel_size) / stride + 1,
    ))
}

/// Padded input plus output geometry, shared by every convolution path.
pub(crate) struct PreparedConv<'a> {
    pub(crate) input: Cow<'a, FeatureMap>,
    pub(crate) out_h: usize,
    pub(crate) out_w: usize,
}

pub(crate) fn prepare<'a>(
    input: &'a FeatureMap,
    kernel_size: usize,
    config: Conv2DConfig,
) -> Result<PreparedConv<'a>> {
    let (out_h, out_w) = conv_output_dims(
        input.height(),
        input.width(),
        kernel_size,
        config.padding,
        config.stride,
    )?;
    let input = if config.padding > 0 {
        Cow::Owned(pad_feature_map(input, config.padding))
    } else {
        Cow::Borrowed(input)
    };
    Ok(PreparedConv {
        input,
        out_h,
        out_w,
    })
}

/// Every dimension of the input and the kernel must be positive.
pub(crate) fn check_nonempty(input: &FeatureMap, kernel: &Kernel) -> Result<()> {
    if input.shape().contains(&0) {
        log::error!("convolution input has an empty dimension: {:?}", input.shape());
        return Err(EngineError::InvalidDimensions(input.shape().to_vec()));
    }
    if kernel.shape().contains(&0) {
        log::error!("convolution kernel has an empty dimension: {:?}", kernel.shape());
        return Err(EngineError::InvalidDimensions(kernel.shape().to_vec()));
    }
    Ok(())
}

pub(crate) fn validate_conv2d_inputs(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
) -> Result<()> {
    check_nonempty(input, kernel)?;
    if bias.len() != kernel.filters() {
        return Err(EngineError::BiasLength {
            bias: bias.len(),
            filters: kernel.filters(),
        });
    }
    if input.channels() != kernel.channels() {
        return Err(EngineError::ChannelMismatch {
            input: input.channels(),
            kernel: kernel.channels(),
        });
    }
    Ok(())
}

/// Dot product of one receptive field with one filter. `filter` is `[channels, size, size]`
/// and may be a channel sub-range of the kernel (grouped convolution).
#[inline]
pub(crate) fn convolve_point(
    input: &ArrayView3<'_, f32>,
    filter: &ArrayView3<'_, f32>,
    i: usize,
    j: usize,
    stride: usize,
) -> f32 {
    let size = filter.dim().1;
    let (h0, w0) = (i * stride, j * stride);
    let window = input.slice(s![.., h0..h0 + size, w0..w0 + size]);
    Zip::from(&window)
        .and(filter)
        .fold(0.0f32, |acc, &x, &w| acc + x * w)
}

/// Fills one output filter plane.
pub(crate) fn convolve_filter(
    input: &ArrayView3<'_, f32>,
    filter: &ArrayView3<'_, f32>,
    bias: f32,
    stride: usize,
    mut out: ArrayViewMut2<'_, f32>,
) {
    for ((i, j), o) in out.indexed_iter_mut() {
        *o = convolve_point(input, filter, i, j, stride) + bias;
    }
}

/// Direct (serial) convolution, one filter after another.
pub fn conv2d(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
    config: Conv2DConfig,
) -> Result<FeatureMap> {
    validate_conv2d_inputs(input, kernel, bias)?;
    let prepared = prepare(input, kernel.size(), config)?;
    let input_view = prepared.input.view();
    let weights = kernel.view();

    let mut out = Array3::<f32>::zeros((kernel.filters(), prepared.out_h, prepared.out_w));
    for (f, plane) in out.axis_iter_mut(Axis(0)).enumerate() {
        let filter = weights.index_axis(Axis(0), f);
        convolve_filter(&input_view, &filter, bias[f], config.stride, plane);
    }
    Ok(FeatureMap::from_array(out))
}

/// Filter-parallel convolution on a rayon pool built for this call only.
///
/// Every output filter plane is a disjoint mutable view handed to exactly one task;
/// the input and kernel are shared read-only. Returns after all tasks completed.
/// The pool holds `min(num_workers, filters)` threads (at least one).
#[cfg(feature = "parallel")]
pub fn conv2d_parallel(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
    config: Conv2DConfig,
    num_workers: usize,
) -> Result<FeatureMap> {
    use ndarray::parallel::prelude::*;

    validate_conv2d_inputs(input, kernel, bias)?;
    let prepared = prepare(input, kernel.size(), config)?;
    let input_view = prepared.input.view();
    let weights = kernel.view();

    let threads = num_workers.clamp(1, kernel.filters().max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| EngineError::WorkerPool(e.to_string()))?;
    log::debug!(
        "conv2d_parallel: {} filters on {} workers",
        kernel.filters(),
        threads
    );

    let mut out = Array3::<f32>::zeros((kernel.filters(), prepared.out_h, prepared.out_w));
    pool.install(|| {
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(f, plane)| {
                let filter = weights.index_axis(Axis(0), f);
                convolve_filter(&input_view, &filter, bias[f], config.stride, plane);
            });
    });
    Ok(FeatureMap::from_array(out))
}

/// Cache-tiled convolution: walks the output in `filter × row × col` blocks of edge
/// `block_size` (0 selects [`DEFAULT_BLOCK_SIZE`]). Same arithmetic as [`conv2d`].
pub fn conv2d_tiled(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
    config: Conv2DConfig,
    block_size: usize,
) -> Result<FeatureMap> {
    validate_conv2d_inputs(input, kernel, bias)?;
    let prepared = prepare(input, kernel.size(), config)?;
    let input_view = prepared.input.view();
    let weights = kernel.view();
    let tile = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };

    let (filters, out_h, out_w) = (kernel.filters(), prepared.out_h, prepared.out_w);
    let mut out = Array3::<f32>::zeros((filters, out_h, out_w));
    for f0 in (0..filters).step_by(tile) {
        let f1 = (f0 + tile).min(filters);
        for r0 in (0..out_h).step_by(tile) {
            let r1 = (r0 + tile).min(out_h);
            for c0 in (0..out_w).step_by(tile) {
                let c1 = (c0 + tile).min(out_w);
                for f in f0..f1 {
                    let filter = weights.index_axis(Axis(0), f);
                    for i in r0..r1 {
                        for j in c0..c1 {
                            out[[f, i, j]] =
                                convolve_point(&input_view, &filter, i, j, config.stride) + bias[f];
                        }
                    }
                }
            }
        }
    }
    Ok(FeatureMap::from_array(out))
}

/// "Valid" convolution: no padding, stride 1.
pub fn conv2d_valid(input: &FeatureMap, kernel: &Kernel, bias: &[f32]) -> Result<FeatureMap> {
    conv2d(input, kernel, bias, Conv2DConfig::new(0, 1))
}

/// "Same" convolution: padding `(size - 1) / 2`, stride 1. Output matches input for odd kernels.
pub fn conv2d_same(input: &FeatureMap, kernel: &Kernel, bias: &[f32]) -> Result<FeatureMap> {
    let padding = kernel.size().saturating_sub(1) / 2;
    conv2d(input, kernel, bias, Conv2DConfig::new(padding, 1))
}

/// Strided, unpadded convolution (downsampling).
pub fn conv2d_with_stride(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
    stride: usize,
) -> Result<FeatureMap> {
    conv2d(input, kernel, bias, Conv2DConfig::new(0, stride))
}

/// Depthwise convolution: channel `c` is convolved only with filter `c`.
///
/// `kernel.filters()` must equal `input.channels()`. The kernel may either carry a single
/// input channel per filter (`[C, 1, S, S]`) or the full channel axis (`[C, C, S, S]`),
/// in which case the diagonal weights `[c, c, .., ..]` are used.
pub fn depthwise_conv2d(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
    config: Conv2DConfig,
) -> Result<FeatureMap> {
    check_nonempty(input, kernel)?;
    let channels = input.channels();
    if kernel.filters() != channels {
        return Err(EngineError::ShapeMismatch {
            what: "depthwise kernel filters",
            expected: channels,
            actual: kernel.filters(),
        });
    }
    if kernel.channels() != 1 && kernel.channels() != channels {
        return Err(EngineError::ChannelMismatch {
            input: channels,
            kernel: kernel.channels(),
        });
    }
    if bias.len() != channels {
        return Err(EngineError::BiasLength {
            bias: bias.len(),
            filters: kernel.filters(),
        });
    }
    let prepared = prepare(input, kernel.size(), config)?;
    let input_view = prepared.input.view();
    let weights = kernel.view();

    let mut out = Array3::<f32>::zeros((channels, prepared.out_h, prepared.out_w));
    for (c, plane) in out.axis_iter_mut(Axis(0)).enumerate() {
        let kc = if kernel.channels() == 1 { 0 } else { c };
        let filter = weights.slice(s![c, kc..kc + 1, .., ..]);
        let channel = input_view.slice(s![c..c + 1, .., ..]);
        convolve_filter(&channel, &filter, bias[c], config.stride, plane);
    }
    Ok(FeatureMap::from_array(out))
}

/// 1x1 convolution, used to mix channels. Delegates to [`conv2d`].
pub fn pointwise_conv2d(input: &FeatureMap, kernel: &Kernel, bias: &[f32]) -> Result<FeatureMap> {
    if kernel.size() != 1 {
        return Err(EngineError::InvalidConfig(format!(
            "pointwise convolution requires a 1x1 kernel, got {}x{}",
            kernel.size(),
            kernel.size()
        )));
    }
    conv2d(input, kernel, bias, Conv2DConfig::default())
}

/// Grouped convolution: channels and filters are split into `groups` equal parts and
/// filter group `g` only sees input channel group `g`.
///
/// The kernel's channel axis may be either the full input depth (only the group's slice is
/// read) or `channels / groups`.
pub fn group_conv2d(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
    groups: usize,
    config: Conv2DConfig,
) -> Result<FeatureMap> {
    if groups == 0 {
        return Err(EngineError::InvalidConfig(
            "number of groups must be positive".to_string(),
        ));
    }
    check_nonempty(input, kernel)?;
    let channels = input.channels();
    if channels % groups != 0 {
        return Err(EngineError::InvalidConfig(format!(
            "input channels ({}) must be divisible by groups ({})",
            channels, groups
        )));
    }
    if kernel.filters() % groups != 0 {
        return Err(EngineError::InvalidConfig(format!(
            "kernel filters ({}) must be divisible by groups ({})",
            kernel.filters(),
            groups
        )));
    }
    let channels_per_group = channels / groups;
    let full_depth = kernel.channels() == channels;
    if !full_depth && kernel.channels() != channels_per_group {
        return Err(EngineError::ChannelMismatch {
            input: channels_per_group,
            kernel: kernel.channels(),
        });
    }
    if bias.len() != kernel.filters() {
        return Err(EngineError::BiasLength {
            bias: bias.len(),
            filters: kernel.filters(),
        });
    }
    let filters_per_group = kernel.filters() / groups;
    let prepared = prepare(input, kernel.size(), config)?;
    let input_view = prepared.input.view();
    let weights = kernel.view();

    let mut out = Array3::<f32>::zeros((kernel.filters(), prepared.out_h, prepared.out_w));
    for (f, plane) in out.axis_iter_mut(Axis(0)).enumerate() {
        let g = f / filters_per_group;
        let c0 = g * channels_per_group;
        let c1 = c0 + channels_per_group;
        let group_input = input_view.slice(s![c0..c1, .., ..]);
        let filter = if full_depth {
            weights.slice(s![f, c0..c1, .., ..])
        } else {
            weights.index_axis(Axis(0), f)
        };
        convolve_filter(&group_input, &filter, bias[f], config.stride, plane);
    }
    Ok(FeatureMap::from_array(out))
}

/// Unrolls every receptive field into one row: `rows = out_h * out_w`,
/// `cols = channels * kernel_size²`, columns ordered `(c, m, n)`.
pub fn im2col(
    input: &FeatureMap,
    kernel_size: usize,
    padding: usize,
    stride: usize,
) -> Result<Array2<f32>> {
    let prepared = prepare(input, kernel_size, Conv2DConfig::new(padding, stride))?;
    let view = prepared.input.view();
    let (out_h, out_w) = (prepared.out_h, prepared.out_w);
    let cols = input.channels() * kernel_size * kernel_size;

    let mut matrix = Array2::<f32>::zeros((out_h * out_w, cols));
    for (row_idx, mut row) in matrix.axis_iter_mut(Axis(0)).enumerate() {
        let (i, j) = (row_idx / out_w, row_idx % out_w);
        let (h0, w0) = (i * stride, j * stride);
        let window = view.slice(s![.., h0..h0 + kernel_size, w0..w0 + kernel_size]);
        for (dst, &src) in row.iter_mut().zip(window.iter()) {
            *dst = src;
        }
    }
    Ok(matrix)
}

/// Convolution as a matrix product: `im2col(input) · kernᵀ + bias`.
pub fn conv2d_im2col(
    input: &FeatureMap,
    kernel: &Kernel,
    bias: &[f32],
    config: Conv2DConfig,
) -> Result<FeatureMap> {
    validate_conv2d_inputs(input, kernel, bias)?;
    let (out_h, out_w) = conv_output_dims(
        input.height(),
        input.width(),
        kernel.size(),
        config.padding,
        config.stride,
    )?;
    let cols = im2col(input, kernel.size(), config.padding, config.stride)?;
    let patch = kernel.channels() * kernel.size() * kernel.size();
    let weights = kernel
        .view()
        .into_shape_with_order((kernel.filters(), patch))
        .map_err(|e| {
            log::error!("conv2d_im2col: kernel reshape failed: {}", e);
            EngineError::InvalidDimensions(kernel.shape().to_vec())
        })?;
    // (out_h*out_w, patch) x (patch, filters)
    let product = cols.dot(&weights.t());
    let out = Array3::from_shape_fn((kernel.filters(), out_h, out_w), |(f, i, j)| {
        product[[i * out_w + j, f]] + bias[f]
    });
    Ok(FeatureMap::from_array(out))
}

/// Worker count for filter-parallel convolution on this machine.
pub fn optimal_num_workers(num_filters: usize) -> usize {
    let cpus = available_cpus();
    let workers = if num_filters < cpus {
        num_filters
    } else if num_filters < 16 {
        // few filters: keep some cores free, the per-task work is small
        num_filters / 2
    } else {
        cpus
    };
    workers.max(1)
}

/// Rough execution-time estimate in seconds, assuming 1 GFLOP/s.
pub fn estimate_conv_time(
    input_height: usize,
    input_width: usize,
    input_channels: usize,
    kernel_size: usize,
    kernel_filters: usize,
    padding: usize,
    stride: usize,
) -> Result<f64> {
    let (out_h, out_w) =
        conv_output_dims(input_height, input_width, kernel_size, padding, stride)?;
    let total_ops = (out_h * out_w) as f64
        * kernel_filters as f64
        * input_channels as f64
        * (kernel_size * kernel_size) as f64;
    Ok(total_ops / 1e9)
}

pub(crate) fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
