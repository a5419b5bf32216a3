//! Elementwise activations and the softmax family.

/// `max(0, x)`.
#[inline]
pub fn relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// `x` for positive inputs, `alpha * x` otherwise.
#[inline]
pub fn leaky_relu(x: f32, alpha: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        alpha * x
    }
}

/// Logistic sigmoid, evaluated in f64 so large negative inputs saturate cleanly to 0.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    (1.0 / (1.0 + (-(x as f64)).exp())) as f32
}

#[inline]
pub fn tanh(x: f32) -> f32 {
    (x as f64).tanh() as f32
}

pub fn relu_in_place(values: &mut [f32]) {
    for v in values.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

pub fn relu_slice(values: &[f32]) -> Vec<f32> {
    values.iter().map(|&v| relu(v)).collect()
}

pub fn leaky_relu_slice(values: &[f32], alpha: f32) -> Vec<f32> {
    values.iter().map(|&v| leaky_relu(v, alpha)).collect()
}

pub fn sigmoid_slice(values: &[f32]) -> Vec<f32> {
    values.iter().map(|&v| sigmoid(v)).collect()
}

pub fn tanh_slice(values: &[f32]) -> Vec<f32> {
    values.iter().map(|&v| tanh(v)).collect()
}

/// Numerically stable softmax.
///
/// The maximum is subtracted before exponentiating, so inputs such as
/// `[1000.0, 1001.0, 1002.0]` stay finite. If the exponentials do not sum to a
/// positive finite value (all-NaN input, for example) the result is all zeros.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let mut out = values.to_vec();
    softmax_in_place(&mut out);
    out
}

pub fn softmax_in_place(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max_val = values
        .iter()
        .skip(1)
        .fold(values[0], |m, &v| if v > m { v } else { m });
    let mut total = 0.0f32;
    for v in values.iter_mut() {
        *v = ((*v - max_val) as f64).exp() as f32;
        total += *v;
    }
    if total > 0.0 && total.is_finite() {
        values.iter_mut().for_each(|v| *v /= total);
    } else {
        log::warn!("softmax_in_place: degenerate exponential sum {}", total);
        values.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// `x - log(Σ exp(x))`, computed with the log-sum-exp trick without building the softmax.
pub fn log_softmax(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max_val = values
        .iter()
        .skip(1)
        .fold(values[0], |m, &v| if v > m { v } else { m });
    let sum_exp: f64 = values.iter().map(|&v| ((v - max_val) as f64).exp()).sum();
    let log_sum_exp = sum_exp.ln() as f32 + max_val;
    values.iter().map(|&v| v - log_sum_exp).collect()
}
