use super::{decode_f32_le, read_file};
use crate::error::{EngineError, Result};
use crate::tensor::FeatureMap;
use ndarray::{Array3, Axis};
use std::path::Path;

/// Pixel encoding of a raw image file. Both are stored height, width, channel (HWC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Little-endian f32 already in `[0, 1]`.
    Float32,
    /// One byte per value, scaled by `1 / 255` on decode.
    Uint8,
}

impl ImageFormat {
    pub fn bytes_per_value(&self) -> usize {
        match self {
            ImageFormat::Float32 => 4,
            ImageFormat::Uint8 => 1,
        }
    }
}

/// Decodes an HWC image into a channel-major feature map.
pub fn decode_image(
    bytes: &[u8],
    format: ImageFormat,
    height: usize,
    width: usize,
    channels: usize,
) -> Result<FeatureMap> {
    let count = height * width * channels;
    let values = match format {
        ImageFormat::Float32 => decode_f32_le(bytes, count)?,
        ImageFormat::Uint8 => {
            if bytes.len() != count {
                return Err(EngineError::LengthMismatch {
                    expected: count,
                    actual: bytes.len(),
                });
            }
            bytes.iter().map(|&b| b as f32 / 255.0).collect()
        }
    };
    let hwc = Array3::from_shape_vec((height, width, channels), values).map_err(|e| {
        log::error!("decode_image: ndarray shape creation failed: {}", e);
        EngineError::InvalidDimensions(vec![height, width, channels])
    })?;
    let fm = FeatureMap::from_array(hwc.permuted_axes([2, 0, 1]));
    fm.validate()?;
    Ok(fm)
}

pub fn load_image<P: AsRef<Path>>(
    path: P,
    format: ImageFormat,
    height: usize,
    width: usize,
    channels: usize,
) -> Result<FeatureMap> {
    let path = path.as_ref();
    decode_image(&read_file(path)?, format, height, width, channels).map_err(|e| {
        log::error!("load_image: {}: {}", path.display(), e);
        e
    })
}

/// Per-channel standardisation `(x - mean[c]) / std[c]`.
pub fn normalize_image(image: &FeatureMap, mean: &[f32], std: &[f32]) -> Result<FeatureMap> {
    let channels = image.channels();
    for (what, v) in [("image mean length", mean), ("image std length", std)] {
        if v.len() != channels {
            return Err(EngineError::ShapeMismatch {
                what,
                expected: channels,
                actual: v.len(),
            });
        }
    }
    if let Some(index) = std.iter().position(|&s| !(s != 0.0 && s.is_finite())) {
        return Err(EngineError::NonFinite {
            index,
            value: std[index],
        });
    }
    let mut out = image.clone();
    for (c, mut plane) in out.view_mut().axis_iter_mut(Axis(0)).enumerate() {
        let (m, s) = (mean[c], std[c]);
        plane.mapv_inplace(|x| (x - m) / s);
    }
    Ok(out)
}
