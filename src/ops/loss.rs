//! Classification losses and accuracy metrics.
//!
//! Every function rejects inputs of different lengths with [`EngineError::LengthMismatch`].

use crate::error::{EngineError, Result};
use crate::ops::activation::log_softmax;
use crate::ops::statistics::{argmax, argmax_top5};

/// Lower bound applied to probabilities before taking the logarithm.
pub const PROB_EPSILON: f32 = 1e-15;

fn check_lengths(expected: &[f32], actual: &[f32]) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(EngineError::LengthMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    Ok(())
}

/// Cross-entropy between probabilities and a dense (one-hot) label vector.
pub fn cross_entropy_loss(predictions: &[f32], labels: &[f32]) -> Result<f32> {
    check_lengths(predictions, labels)?;
    let loss: f32 = predictions
        .iter()
        .zip(labels)
        .filter(|(_, &y)| y > 0.0)
        .map(|(&p, &y)| -y * (p.max(PROB_EPSILON) as f64).ln() as f32)
        .sum();
    Ok(loss)
}

/// Cross-entropy from raw scores, going through [`log_softmax`].
pub fn cross_entropy_from_logits(logits: &[f32], labels: &[f32]) -> Result<f32> {
    check_lengths(logits, labels)?;
    let loss: f32 = log_softmax(logits)
        .iter()
        .zip(labels)
        .filter(|(_, &y)| y > 0.0)
        .map(|(&lp, &y)| -y * lp)
        .sum();
    Ok(loss)
}

/// Cross-entropy against a single true-class index.
pub fn sparse_cross_entropy(predictions: &[f32], true_class: usize) -> Result<f32> {
    let p = predictions.get(true_class).copied().ok_or_else(|| {
        EngineError::IndexOutOfBounds {
            index: vec![true_class],
            shape: vec![predictions.len()],
        }
    })?;
    Ok(-(p.max(PROB_EPSILON) as f64).ln() as f32)
}

pub fn mean_squared_error(predictions: &[f32], targets: &[f32]) -> Result<f32> {
    check_lengths(predictions, targets)?;
    if predictions.is_empty() {
        return Ok(0.0);
    }
    let total: f32 = predictions
        .iter()
        .zip(targets)
        .map(|(&p, &t)| (p - t) * (p - t))
        .sum();
    Ok(total / predictions.len() as f32)
}

/// `1.0` when the highest-scoring class matches the label's class, else `0.0`.
pub fn accuracy(predictions: &[f32], labels: &[f32]) -> Result<f32> {
    check_lengths(predictions, labels)?;
    Ok(if argmax(predictions) == argmax(labels) {
        1.0
    } else {
        0.0
    })
}

/// `1.0` when the label's class is among the five highest-scoring predictions.
pub fn top5_accuracy(predictions: &[f32], labels: &[f32]) -> Result<f32> {
    check_lengths(predictions, labels)?;
    let true_class = argmax(labels);
    if true_class < 0 {
        return Ok(0.0);
    }
    let hit = argmax_top5(predictions).contains(&(true_class as usize));
    Ok(if hit { 1.0 } else { 0.0 })
}
