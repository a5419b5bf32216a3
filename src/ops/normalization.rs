//! Inference-mode batch normalization.

use crate::error::{EngineError, Result};
use crate::tensor::FeatureMap;
use ndarray::Axis;

/// Default variance floor.
pub const DEFAULT_EPSILON: f32 = 1e-5;

/// Per-channel batch-norm parameters (moving statistics plus learned affine terms).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormParams {
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
    /// gamma
    pub scale: Vec<f32>,
    /// beta
    pub shift: Vec<f32>,
    pub epsilon: f32,
    /// Clamp the normalized output to `>= 0`. On by default: the pretrained networks
    /// this engine runs fold the following ReLU into the normalization step.
    pub fused_relu: bool,
}

impl BatchNormParams {
    /// Identity parameters for `channels` channels: mean 0, variance 1, scale 1, shift 0.
    pub fn new(channels: usize) -> Self {
        BatchNormParams {
            mean: vec![0.0; channels],
            variance: vec![1.0; channels],
            scale: vec![1.0; channels],
            shift: vec![0.0; channels],
            epsilon: DEFAULT_EPSILON,
            fused_relu: true,
        }
    }

    pub fn from_parts(
        mean: Vec<f32>,
        variance: Vec<f32>,
        scale: Vec<f32>,
        shift: Vec<f32>,
    ) -> Result<Self> {
        let params = BatchNormParams {
            mean,
            variance,
            scale,
            shift,
            epsilon: DEFAULT_EPSILON,
            fused_relu: true,
        };
        params.validate(params.mean.len())?;
        Ok(params)
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_fused_relu(mut self, fused_relu: bool) -> Self {
        self.fused_relu = fused_relu;
        self
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    /// Checks that all four vectors have `channels` entries and that every
    /// `variance + epsilon` is a positive finite number.
    pub fn validate(&self, channels: usize) -> Result<()> {
        for (what, v) in [
            ("batch-norm mean length", &self.mean),
            ("batch-norm variance length", &self.variance),
            ("batch-norm scale length", &self.scale),
            ("batch-norm shift length", &self.shift),
        ] {
            if v.len() != channels {
                return Err(EngineError::ShapeMismatch {
                    what,
                    expected: channels,
                    actual: v.len(),
                });
            }
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "batch-norm epsilon must be finite and non-negative, got {}",
                self.epsilon
            )));
        }
        for (index, &var) in self.variance.iter().enumerate() {
            let denom = var + self.epsilon;
            if !(denom > 0.0) || !denom.is_finite() {
                return Err(EngineError::NonFinite { index, value: var });
            }
        }
        Ok(())
    }
}

/// `y = scale[c] * (x - mean[c]) / sqrt(variance[c] + epsilon) + shift[c]`, clamped to
/// `>= 0` when `params.fused_relu` is set. Returns a new feature map.
pub fn batch_normalize(input: &FeatureMap, params: &BatchNormParams) -> Result<FeatureMap> {
    let mut out = input.clone();
    batch_normalize_in_place(&mut out, params)?;
    Ok(out)
}

pub fn batch_normalize_in_place(fm: &mut FeatureMap, params: &BatchNormParams) -> Result<()> {
    params.validate(fm.channels())?;
    let fused_relu = params.fused_relu;
    for (c, mut plane) in fm.view_mut().axis_iter_mut(Axis(0)).enumerate() {
        let mean = params.mean[c];
        let scale = params.scale[c];
        let shift = params.shift[c];
        let std = ((params.variance[c] + params.epsilon) as f64).sqrt() as f32;
        plane.mapv_inplace(|x| {
            let y = scale * ((x - mean) / std) + shift;
            if fused_relu && y < 0.0 {
                0.0
            } else {
                y
            }
        });
    }
    Ok(())
}

/// Per-channel mean and population variance over every pixel of every map in `batch`.
///
/// All maps must share one shape with a non-empty spatial plane. An empty batch yields
/// two empty vectors.
pub fn compute_batch_statistics(batch: &[FeatureMap]) -> Result<(Vec<f32>, Vec<f32>)> {
    let Some(first) = batch.first() else {
        return Ok((Vec::new(), Vec::new()));
    };
    let shape = first.shape();
    for fm in &batch[1..] {
        if fm.shape() != shape {
            log::error!(
                "compute_batch_statistics: shape {:?} differs from {:?}",
                fm.shape(),
                shape
            );
            return Err(EngineError::InvalidDimensions(fm.shape().to_vec()));
        }
    }

    let channels = first.channels();
    let pixels = batch.len() * first.height() * first.width();
    if pixels == 0 {
        log::error!("compute_batch_statistics: maps {:?} have no pixels", shape);
        return Err(EngineError::InvalidDimensions(shape.to_vec()));
    }
    let count = pixels as f32;
    let mut means = vec![0.0f32; channels];
    let mut variances = vec![0.0f32; channels];
    for c in 0..channels {
        let total: f32 = batch
            .iter()
            .map(|fm| fm.view().index_axis(Axis(0), c).sum())
            .sum();
        let mean = total / count;
        let squared: f32 = batch
            .iter()
            .map(|fm| {
                fm.view()
                    .index_axis(Axis(0), c)
                    .fold(0.0f32, |acc, &x| acc + (x - mean) * (x - mean))
            })
            .sum();
        means[c] = mean;
        variances[c] = squared / count;
    }
    Ok((means, variances))
}
