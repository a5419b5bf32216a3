//! Dense-tensor compute core for small convolutional network inference.
//!
//! Feature maps and kernels live in [`tensor`]; the operator families (convolution,
//! pooling, batch normalization, activations, losses and statistics) live in [`ops`].
//! [`backend::ConvEngine`] picks a convolution strategy per call from an explicit
//! [`backend::ConvEngineConfig`]. The [`io`] module decodes the little-endian weight,
//! image and label payloads a pretrained network ships with.

pub mod backend;
pub mod error;
pub mod io;
pub mod labels;
pub mod ops;
pub mod tensor;

pub use backend::{ConvBackend, ConvEngine, ConvEngineConfig, ConvStrategy};
pub use error::{EngineError, Result};
pub use ops::conv::Conv2DConfig;
pub use ops::normalization::BatchNormParams;
pub use ops::pooling::{PoolingConfig, PoolingKind};
pub use tensor::{FeatureMap, Kernel};
