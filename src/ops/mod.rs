//! Operator families over [`FeatureMap`](crate::tensor::FeatureMap) and flat `f32` slices.

pub mod activation;
pub mod conv;
pub mod loss;
pub mod normalization;
pub mod pooling;
pub mod statistics;

#[cfg(test)]
mod tests;
