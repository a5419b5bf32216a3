use super::{decode_i32_le, read_file};
use crate::error::{EngineError, Result};
use crate::labels::{class_index_to_one_hot, validate_label};
use std::path::Path;

/// Encoding of a label file. Every format decodes to a one-hot `Vec<i32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFormat {
    /// Whitespace-separated 0/1 values on the first line, e.g. `0 0 1 0 0`.
    OneHotText,
    /// A single class index on the first line.
    ClassIndex,
    /// `num_classes` little-endian i32 values. Bytes past the last value are ignored.
    BinaryOneHot,
}

fn first_line(bytes: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(bytes).map_err(|e| EngineError::Parse(e.to_string()))?;
    text.lines()
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| EngineError::Parse("label file is empty".to_string()))
}

pub fn decode_label(bytes: &[u8], format: LabelFormat, num_classes: usize) -> Result<Vec<i32>> {
    let label = match format {
        LabelFormat::OneHotText => {
            let fields: Vec<&str> = first_line(bytes)?.split_whitespace().collect();
            if fields.len() != num_classes {
                return Err(EngineError::LengthMismatch {
                    expected: num_classes,
                    actual: fields.len(),
                });
            }
            fields
                .iter()
                .map(|f| {
                    f.parse::<i32>()
                        .map_err(|e| EngineError::Parse(format!("invalid label value '{}': {}", f, e)))
                })
                .collect::<Result<Vec<_>>>()?
        }
        LabelFormat::ClassIndex => {
            let line = first_line(bytes)?;
            let index: i64 = line
                .parse()
                .map_err(|e| EngineError::Parse(format!("invalid class index '{}': {}", line, e)))?;
            usize::try_from(index)
                .ok()
                .and_then(|i| class_index_to_one_hot(i, num_classes))
                .ok_or_else(|| {
                    EngineError::InvalidLabel(format!(
                        "class index {} out of range [0, {})",
                        index, num_classes
                    ))
                })?
        }
        LabelFormat::BinaryOneHot => {
            let needed = num_classes.checked_mul(4).ok_or_else(|| {
                EngineError::InvalidConfig(format!("{} classes is too many", num_classes))
            })?;
            let payload = bytes.get(..needed).ok_or(EngineError::LengthMismatch {
                expected: needed,
                actual: bytes.len(),
            })?;
            decode_i32_le(payload, num_classes)?
        }
    };
    validate_label(&label, num_classes)?;
    Ok(label)
}

pub fn load_label<P: AsRef<Path>>(path: P, format: LabelFormat, num_classes: usize) -> Result<Vec<i32>> {
    let path = path.as_ref();
    decode_label(&read_file(path)?, format, num_classes).map_err(|e| {
        log::error!("load_label: {}: {}", path.display(), e);
        e
    })
}
