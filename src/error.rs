//! Error type shared by every fallible operation in the crate.

use thiserror::Error;

/// All recoverable failures raised by the compute core.
///
/// Configuration and shape problems, corrupted data (NaN/Inf, wrong lengths) and
/// out-of-range element access all travel through this one type, so a single bad
/// sample can be skipped by the caller instead of aborting a batch run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid operator configuration: kernel size, stride, pool size, groups, ratio...
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{what} mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("input channels ({input}) don't match kernel channels ({kernel})")]
    ChannelMismatch { input: usize, kernel: usize },

    #[error("bias length ({bias}) doesn't match kernel filters ({filters})")]
    BiasLength { bias: usize, filters: usize },

    #[error("data size mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid dimensions: {0:?}")]
    InvalidDimensions(Vec<usize>),

    #[error("invalid value at index {index}: {value}")]
    NonFinite { index: usize, value: f32 },

    #[error("index out of bounds: {index:?} for shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },

    /// The per-call worker pool for filter-parallel convolution could not be started.
    #[error("worker pool unavailable: {0}")]
    WorkerPool(String),

    #[error("invalid label: {0}")]
    InvalidLabel(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
