//! Decoders for the little-endian binary payloads a pretrained network ships with:
//! convolution weights, biases, batch-norm statistics, images and labels.
//!
//! Every decoder works on an in-memory byte slice and checks its length before
//! decoding; the `load_*` wrappers read whole files and delegate.

pub mod image;
pub mod label;
pub mod weights;

pub use image::{decode_image, load_image, normalize_image, ImageFormat};
pub use label::{decode_label, load_label, LabelFormat};
pub use weights::{decode_batch_norm_params, decode_bias, decode_kernel, WeightLoader};

use crate::error::{EngineError, Result};
use std::path::Path;

/// Decodes exactly `count` little-endian f32 values.
pub fn decode_f32_le(bytes: &[u8], count: usize) -> Result<Vec<f32>> {
    let expected = count * 4;
    if bytes.len() != expected {
        return Err(EngineError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    let mut values = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(4) {
        let mut b = [0u8; 4];
        b.copy_from_slice(chunk);
        values.push(f32::from_le_bytes(b));
    }
    Ok(values)
}

/// Decodes exactly `count` little-endian i32 values.
pub fn decode_i32_le(bytes: &[u8], count: usize) -> Result<Vec<i32>> {
    let expected = count * 4;
    if bytes.len() != expected {
        return Err(EngineError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    let mut values = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(4) {
        let mut b = [0u8; 4];
        b.copy_from_slice(chunk);
        values.push(i32::from_le_bytes(b));
    }
    Ok(values)
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        log::error!("read_file: failed to read {}: {}", path.display(), e);
        EngineError::Io(e)
    })
}
