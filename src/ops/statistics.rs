//! Reductions and rescaling over flat `f32` slices.
//!
//! Empty inputs never panic: reductions return `0.0` and [`argmax`] returns `-1`.

/// Index of the largest element, `-1` for an empty slice.
///
/// Uses a strict `>` comparison, so the earliest maximal index wins ties.
pub fn argmax(values: &[f32]) -> isize {
    let mut iter = values.iter().enumerate();
    let Some((_, &first)) = iter.next() else {
        return -1;
    };
    let mut best = (0usize, first);
    for (i, &v) in iter {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0 as isize
}

/// Indices of the (up to) five largest elements in descending order of value.
/// Equal values keep their input order.
pub fn argmax_top5(values: &[f32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    // stable sort, NaN compares as equal
    indices.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices.truncate(5);
    indices
}

pub fn max(values: &[f32]) -> f32 {
    match values.split_first() {
        Some((&first, rest)) => rest.iter().fold(first, |m, &v| if v > m { v } else { m }),
        None => 0.0,
    }
}

pub fn min(values: &[f32]) -> f32 {
    match values.split_first() {
        Some((&first, rest)) => rest.iter().fold(first, |m, &v| if v < m { v } else { m }),
        None => 0.0,
    }
}

pub fn sum(values: &[f32]) -> f32 {
    values.iter().sum()
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    sum(values) / values.len() as f32
}

/// Sample variance (divides by `n - 1`). Zero for fewer than two elements.
pub fn variance(values: &[f32]) -> f32 {
    if values.len() <= 1 {
        return 0.0;
    }
    let m = mean(values);
    let squared: f32 = values.iter().map(|&v| (v - m) * (v - m)).sum();
    squared / (values.len() - 1) as f32
}

pub fn std_dev(values: &[f32]) -> f32 {
    (variance(values) as f64).sqrt() as f32
}

/// Zero-mean, unit-variance copy of `values`.
///
/// A constant slice has zero standard deviation and normalizes to all zeros.
pub fn normalize(values: &[f32]) -> Vec<f32> {
    let mut out = values.to_vec();
    normalize_in_place(&mut out);
    out
}

pub fn normalize_in_place(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let m = mean(values);
    let std = std_dev(values);
    if std == 0.0 {
        values.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    values.iter_mut().for_each(|v| *v = (*v - m) / std);
}

/// Copy of `values` clamped to `[lo, hi]`.
pub fn clip(values: &[f32], lo: f32, hi: f32) -> Vec<f32> {
    let mut out = values.to_vec();
    clip_in_place(&mut out, lo, hi);
    out
}

pub fn clip_in_place(values: &mut [f32], lo: f32, hi: f32) {
    for v in values.iter_mut() {
        if *v < lo {
            *v = lo;
        } else if *v > hi {
            *v = hi;
        }
    }
}
