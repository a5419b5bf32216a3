use crate::error::{EngineError, Result};
use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, ArrayViewMut3};
use rand::Rng;
use std::fmt;

/// A 3D activation volume stored channel-major (`[channels, height, width]`).
///
/// The backing `Array3` is always kept in standard (row-major) layout, so element
/// `(c, h, w)` lives at flat index `c*height*width + h*width + w` of [`FeatureMap::as_slice`].
/// Values are not checked on write; call [`FeatureMap::validate`] at trust boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMap {
    data: Array3<f32>,
}

impl FeatureMap {
    /// Creates a zero-filled feature map.
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        FeatureMap {
            data: Array3::zeros((channels, height, width)),
        }
    }

    /// Creates a feature map from a flat channel-major buffer.
    ///
    /// The buffer must hold exactly `height * width * channels` values.
    pub fn from_vec(data: Vec<f32>, height: usize, width: usize, channels: usize) -> Result<Self> {
        let expected = height * width * channels;
        if data.len() != expected {
            return Err(EngineError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        let data = Array3::from_shape_vec((channels, height, width), data)
            .map_err(|e| {
                log::error!("FeatureMap::from_vec: ndarray shape creation failed: {}", e);
                EngineError::InvalidDimensions(vec![height, width, channels])
            })?;
        Ok(FeatureMap { data })
    }

    /// Wraps an existing `[channels, height, width]` array, copying it into standard layout if needed.
    pub fn from_array(data: Array3<f32>) -> Self {
        if data.is_standard_layout() {
            FeatureMap { data }
        } else {
            FeatureMap {
                data: data.as_standard_layout().into_owned(),
            }
        }
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// Dimensions as `[height, width, channels]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.height(), self.width(), self.channels()]
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat index of `(c, h, w)`. Shared by the checked and unchecked accessors.
    #[inline(always)]
    pub fn offset(&self, c: usize, h: usize, w: usize) -> usize {
        let (_, height, width) = self.data.dim();
        c * height * width + h * width + w
    }

    #[inline(always)]
    fn in_bounds(&self, c: usize, h: usize, w: usize) -> bool {
        let (channels, height, width) = self.data.dim();
        c < channels && h < height && w < width
    }

    fn out_of_bounds(&self, c: usize, h: usize, w: usize) -> EngineError {
        EngineError::IndexOutOfBounds {
            index: vec![c, h, w],
            shape: vec![self.channels(), self.height(), self.width()],
        }
    }

    /// Bounds-checked read of element `(c, h, w)`.
    pub fn get(&self, c: usize, h: usize, w: usize) -> Result<f32> {
        if !self.in_bounds(c, h, w) {
            return Err(self.out_of_bounds(c, h, w));
        }
        Ok(self.as_slice()[self.offset(c, h, w)])
    }

    /// Bounds-checked write of element `(c, h, w)`.
    pub fn set(&mut self, c: usize, h: usize, w: usize, value: f32) -> Result<()> {
        if !self.in_bounds(c, h, w) {
            return Err(self.out_of_bounds(c, h, w));
        }
        let idx = self.offset(c, h, w);
        self.as_slice_mut()[idx] = value;
        Ok(())
    }

    /// Reads `(c, h, w)` without bounds checking.
    ///
    /// # Safety
    /// The caller must guarantee `c < channels`, `h < height` and `w < width`.
    #[inline(always)]
    pub unsafe fn get_unchecked(&self, c: usize, h: usize, w: usize) -> f32 {
        let idx = self.offset(c, h, w);
        *self.as_slice().get_unchecked(idx)
    }

    /// Writes `(c, h, w)` without bounds checking.
    ///
    /// # Safety
    /// The caller must guarantee `c < channels`, `h < height` and `w < width`.
    #[inline(always)]
    pub unsafe fn set_unchecked(&mut self, c: usize, h: usize, w: usize, value: f32) {
        let idx = self.offset(c, h, w);
        *self.as_slice_mut().get_unchecked_mut(idx) = value;
    }

    /// Flat channel-major view of the data.
    pub fn as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .expect("FeatureMap storage is always in standard layout")
    }

    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        self.data
            .as_slice_mut()
            .expect("FeatureMap storage is always in standard layout")
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    /// Consumes the feature map and returns the backing array.
    pub fn into_array(self) -> Array3<f32> {
        self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Fills with uniform values in `[0, 1)`. Intended for tests and benchmarks.
    pub fn random_fill<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.data.mapv_inplace(|_| rng.gen::<f32>());
    }

    /// Clamps every element to be non-negative.
    pub fn relu_in_place(&mut self) {
        crate::ops::activation::relu_in_place(self.as_slice_mut());
    }

    /// Returns a copy with `padding` zeros added on every spatial border.
    pub fn pad(&self, padding: usize) -> FeatureMap {
        pad_feature_map(self, padding)
    }

    /// Checks positive dimensions, flat length and absence of NaN/Inf.
    pub fn validate(&self) -> Result<()> {
        let [height, width, channels] = self.shape();
        if height == 0 || width == 0 || channels == 0 {
            return Err(EngineError::InvalidDimensions(vec![height, width, channels]));
        }
        let expected = height * width * channels;
        if self.data.len() != expected {
            return Err(EngineError::LengthMismatch {
                expected,
                actual: self.data.len(),
            });
        }
        check_finite(self.as_slice())
    }
}

impl fmt::Display for FeatureMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeatureMap{{height: {}, width: {}, channels: {}, size: {}}}",
            self.height(),
            self.width(),
            self.channels(),
            self.len()
        )
    }
}

/// Convolution weights stored filter-major (`[filters, channels, size, size]`).
///
/// Element `(f, c, h, w)` lives at flat index `f*channels*size*size + c*size*size + h*size + w`.
/// Kernels are read-only during inference and are shared by reference across workers.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    weights: Array4<f32>,
}

impl Kernel {
    /// Creates a zero-filled kernel.
    pub fn new(size: usize, channels: usize, filters: usize) -> Self {
        Kernel {
            weights: Array4::zeros((filters, channels, size, size)),
        }
    }

    /// Creates a kernel from a flat filter-major buffer of `size*size*channels*filters` values.
    pub fn from_vec(weights: Vec<f32>, size: usize, channels: usize, filters: usize) -> Result<Self> {
        let expected = size * size * channels * filters;
        if weights.len() != expected {
            return Err(EngineError::LengthMismatch {
                expected,
                actual: weights.len(),
            });
        }
        let weights = Array4::from_shape_vec((filters, channels, size, size), weights).map_err(
            |e| {
                log::error!("Kernel::from_vec: ndarray shape creation failed: {}", e);
                EngineError::InvalidDimensions(vec![size, channels, filters])
            },
        )?;
        Ok(Kernel { weights })
    }

    /// Wraps a `[filters, channels, size, size]` array. Non-square spatial extents are rejected.
    pub fn from_array(weights: Array4<f32>) -> Result<Self> {
        let (filters, channels, kh, kw) = weights.dim();
        if kh != kw {
            return Err(EngineError::InvalidDimensions(vec![filters, channels, kh, kw]));
        }
        let weights = if weights.is_standard_layout() {
            weights
        } else {
            weights.as_standard_layout().into_owned()
        };
        Ok(Kernel { weights })
    }

    pub fn size(&self) -> usize {
        self.weights.dim().2
    }

    pub fn channels(&self) -> usize {
        self.weights.dim().1
    }

    pub fn filters(&self) -> usize {
        self.weights.dim().0
    }

    /// Dimensions as `[filters, channels, size, size]`.
    pub fn shape(&self) -> [usize; 4] {
        let (f, c, h, w) = self.weights.dim();
        [f, c, h, w]
    }

    pub fn total_weights(&self) -> usize {
        self.weights.len()
    }

    #[inline(always)]
    pub fn offset(&self, f: usize, c: usize, h: usize, w: usize) -> usize {
        let (_, channels, size, _) = self.weights.dim();
        f * channels * size * size + c * size * size + h * size + w
    }

    #[inline(always)]
    fn in_bounds(&self, f: usize, c: usize, h: usize, w: usize) -> bool {
        let (filters, channels, size, _) = self.weights.dim();
        f < filters && c < channels && h < size && w < size
    }

    fn out_of_bounds(&self, f: usize, c: usize, h: usize, w: usize) -> EngineError {
        EngineError::IndexOutOfBounds {
            index: vec![f, c, h, w],
            shape: self.shape().to_vec(),
        }
    }

    pub fn get(&self, f: usize, c: usize, h: usize, w: usize) -> Result<f32> {
        if !self.in_bounds(f, c, h, w) {
            return Err(self.out_of_bounds(f, c, h, w));
        }
        Ok(self.as_slice()[self.offset(f, c, h, w)])
    }

    pub fn set(&mut self, f: usize, c: usize, h: usize, w: usize, value: f32) -> Result<()> {
        if !self.in_bounds(f, c, h, w) {
            return Err(self.out_of_bounds(f, c, h, w));
        }
        let idx = self.offset(f, c, h, w);
        self.as_slice_mut()[idx] = value;
        Ok(())
    }

    /// # Safety
    /// All indices must be within the kernel's shape.
    #[inline(always)]
    pub unsafe fn get_unchecked(&self, f: usize, c: usize, h: usize, w: usize) -> f32 {
        let idx = self.offset(f, c, h, w);
        *self.as_slice().get_unchecked(idx)
    }

    /// # Safety
    /// All indices must be within the kernel's shape.
    #[inline(always)]
    pub unsafe fn set_unchecked(&mut self, f: usize, c: usize, h: usize, w: usize, value: f32) {
        let idx = self.offset(f, c, h, w);
        *self.as_slice_mut().get_unchecked_mut(idx) = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        self.weights
            .as_slice()
            .expect("Kernel storage is always in standard layout")
    }

    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        self.weights
            .as_slice_mut()
            .expect("Kernel storage is always in standard layout")
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.weights.view()
    }

    pub fn zero(&mut self) {
        self.weights.fill(0.0);
    }

    /// Fills with uniform values in `[-1, 1)`.
    pub fn random_fill<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.weights.mapv_inplace(|_| rng.gen::<f32>() * 2.0 - 1.0);
    }

    pub fn validate(&self) -> Result<()> {
        let (filters, channels, size, _) = self.weights.dim();
        if size == 0 || channels == 0 || filters == 0 {
            return Err(EngineError::InvalidDimensions(vec![size, channels, filters]));
        }
        let expected = size * size * channels * filters;
        if self.weights.len() != expected {
            return Err(EngineError::LengthMismatch {
                expected,
                actual: self.weights.len(),
            });
        }
        check_finite(self.as_slice())
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Kernel{{size: {}, channels: {}, filters: {}, weights: {}}}",
            self.size(),
            self.channels(),
            self.filters(),
            self.total_weights()
        )
    }
}

/// Allocates a `(h + 2p, w + 2p, c)` map with `input` copied into the centre and a zero border.
/// `padding == 0` returns a plain clone.
pub fn pad_feature_map(input: &FeatureMap, padding: usize) -> FeatureMap {
    if padding == 0 {
        return input.clone();
    }
    let [height, width, channels] = input.shape();
    let mut padded = FeatureMap::new(height + 2 * padding, width + 2 * padding, channels);
    padded
        .data
        .slice_mut(s![.., padding..padding + height, padding..padding + width])
        .assign(&input.data);
    padded
}

/// Validates a feature map. Free-function form for callers holding several tensors.
pub fn validate_feature_map(fm: &FeatureMap) -> Result<()> {
    fm.validate()
}

pub fn validate_kernel(kernel: &Kernel) -> Result<()> {
    kernel.validate()
}

fn check_finite(values: &[f32]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(EngineError::NonFinite {
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}
