//! Convolution and batch-norm weight files.
//!
//! Kernel files store weights in `[height][width][channel][filter]` order; they are
//! transposed into the in-memory `[filter][channel][height][width]` layout on decode.

use super::{decode_f32_le, read_file};
use crate::error::{EngineError, Result};
use crate::ops::normalization::BatchNormParams;
use crate::tensor::Kernel;
use ndarray::Array4;
use std::path::{Path, PathBuf};

pub fn decode_kernel(bytes: &[u8], size: usize, channels: usize, filters: usize) -> Result<Kernel> {
    let values = decode_f32_le(bytes, size * size * channels * filters)?;
    let hwcf = Array4::from_shape_vec((size, size, channels, filters), values).map_err(|e| {
        log::error!("decode_kernel: ndarray shape creation failed: {}", e);
        EngineError::InvalidDimensions(vec![size, channels, filters])
    })?;
    // [h, w, c, f] -> [f, c, h, w]
    let kernel = Kernel::from_array(hwcf.permuted_axes([3, 2, 0, 1]))?;
    kernel.validate()?;
    Ok(kernel)
}

pub fn decode_bias(bytes: &[u8], filters: usize) -> Result<Vec<f32>> {
    let bias = decode_f32_le(bytes, filters)?;
    if let Some(index) = bias.iter().position(|v| !v.is_finite()) {
        return Err(EngineError::NonFinite {
            index,
            value: bias[index],
        });
    }
    Ok(bias)
}

/// Builds batch-norm parameters from the four per-channel arrays.
pub fn decode_batch_norm_params(
    mean: &[u8],
    variance: &[u8],
    gamma: &[u8],
    beta: &[u8],
    channels: usize,
) -> Result<BatchNormParams> {
    BatchNormParams::from_parts(
        decode_f32_le(mean, channels)?,
        decode_f32_le(variance, channels)?,
        decode_f32_le(gamma, channels)?,
        decode_f32_le(beta, channels)?,
    )
}

/// Reads weight files from one directory.
#[derive(Debug, Clone)]
pub struct WeightLoader {
    pub weights_path: PathBuf,
}

impl WeightLoader {
    pub fn new<P: AsRef<Path>>(weights_path: P) -> Self {
        WeightLoader {
            weights_path: weights_path.as_ref().to_path_buf(),
        }
    }

    fn read(&self, filename: &str) -> Result<Vec<u8>> {
        read_file(&self.weights_path.join(filename))
    }

    pub fn load_kernel(
        &self,
        filename: &str,
        size: usize,
        channels: usize,
        filters: usize,
    ) -> Result<Kernel> {
        decode_kernel(&self.read(filename)?, size, channels, filters).map_err(|e| {
            log::error!("WeightLoader::load_kernel: {}: {}", filename, e);
            e
        })
    }

    pub fn load_bias(&self, filename: &str, filters: usize) -> Result<Vec<f32>> {
        decode_bias(&self.read(filename)?, filters)
    }

    /// Loads `{layer}_moving_mean.bin`, `{layer}_moving_variance.bin`,
    /// `{layer}_gamma.bin` and `{layer}_beta.bin`.
    pub fn load_batch_norm_params(&self, layer: &str, channels: usize) -> Result<BatchNormParams> {
        let mean = self.read(&format!("{}_moving_mean.bin", layer))?;
        let variance = self.read(&format!("{}_moving_variance.bin", layer))?;
        let gamma = self.read(&format!("{}_gamma.bin", layer))?;
        let beta = self.read(&format!("{}_beta.bin", layer))?;
        decode_batch_norm_params(&mean, &variance, &gamma, &beta, channels)
    }

    /// Loads `{layer}_weight.bin` and `{layer}_bias.bin`.
    pub fn load_conv_layer(
        &self,
        layer: &str,
        size: usize,
        channels: usize,
        filters: usize,
    ) -> Result<(Kernel, Vec<f32>)> {
        let kernel = self.load_kernel(&format!("{}_weight.bin", layer), size, channels, filters)?;
        let bias = self.load_bias(&format!("{}_bias.bin", layer), filters)?;
        log::debug!("WeightLoader::load_conv_layer: {} -> {}", layer, kernel);
        Ok((kernel, bias))
    }
}
