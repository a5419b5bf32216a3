use crate::error::{EngineError, Result};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;

/// Wrapper for a batch of integer class indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels(pub Array1<i64>);

impl Labels {
    pub fn new(arr: Array1<i64>) -> Self {
        Labels(arr)
    }

    pub fn from_one_hot_rows(rows: &[Vec<i32>]) -> Result<Self> {
        let indices = rows
            .iter()
            .map(|row| {
                one_hot_to_class_index(row)
                    .map(|i| i as i64)
                    .ok_or_else(|| EngineError::InvalidLabel(format!("no hot entry in {:?}", row)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Labels(Array1::from(indices)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts the indices to a one-hot `(n, num_classes)` f32 matrix.
    pub fn to_one_hot(&self, num_classes: usize) -> Result<Array2<f32>> {
        let mut out = Array2::<f32>::zeros((self.0.len(), num_classes));
        for (i, &idx) in self.0.iter().enumerate() {
            if idx < 0 || idx as usize >= num_classes {
                log::error!(
                    "Labels::to_one_hot: class {} out of range for {} classes",
                    idx,
                    num_classes
                );
                return Err(EngineError::InvalidLabel(format!(
                    "class index {} out of range [0, {})",
                    idx, num_classes
                )));
            }
            out[[i, idx as usize]] = 1.0;
        }
        Ok(out)
    }
}

/// Position of the first `1` in a one-hot vector.
pub fn one_hot_to_class_index(one_hot: &[i32]) -> Option<usize> {
    one_hot.iter().position(|&v| v == 1)
}

/// One-hot vector of length `num_classes`, `None` when `class_index` is out of range.
pub fn class_index_to_one_hot(class_index: usize, num_classes: usize) -> Option<Vec<i32>> {
    if class_index >= num_classes {
        return None;
    }
    let mut one_hot = vec![0; num_classes];
    one_hot[class_index] = 1;
    Some(one_hot)
}

/// A label is valid when it has `num_classes` entries, each 0 or 1, summing to exactly 1.
pub fn validate_label(label: &[i32], num_classes: usize) -> Result<()> {
    if label.len() != num_classes {
        return Err(EngineError::LengthMismatch {
            expected: num_classes,
            actual: label.len(),
        });
    }
    if let Some((i, v)) = label.iter().enumerate().find(|(_, &v)| v != 0 && v != 1) {
        return Err(EngineError::InvalidLabel(format!(
            "invalid label value {} at position {}",
            v, i
        )));
    }
    let total: i32 = label.iter().sum();
    if total != 1 {
        return Err(EngineError::InvalidLabel(format!(
            "invalid one-hot encoding: sum = {}, expected 1",
            total
        )));
    }
    Ok(())
}

/// Number of labels per class. Vectors without a hot entry are skipped.
pub fn class_distribution(labels: &[Vec<i32>]) -> BTreeMap<usize, usize> {
    let mut distribution = BTreeMap::new();
    for class_index in labels.iter().filter_map(|l| one_hot_to_class_index(l)) {
        *distribution.entry(class_index).or_insert(0) += 1;
    }
    distribution
}
