//! Probability-vector arithmetic used throughout the filtering recursions.

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Smallest value a strictly positive probability entry is allowed to take
/// before normalization. Exact zeros are preserved.
pub const PROB_FLOOR: f64 = 1e-15;

/// Normalize a non-negative vector so its entries sum to 1.
///
/// Entries in `(0, PROB_FLOOR)` are clamped up to `PROB_FLOOR`; exact zeros
/// stay zero. A zero total is replaced by 1 so that an all-zero belief vector
/// (an observation impossible under the current model) passes through as
/// zeros instead of producing NaN.
///
/// Returns the normalized vector together with the scale factor that was
/// divided out.
pub fn normalize(mut u: Array1<f64>) -> (Array1<f64>, f64) {
    u.mapv_inplace(|x| {
        if x == 0.0 {
            0.0
        } else if x < PROB_FLOOR {
            PROB_FLOOR
        } else {
            x
        }
    });
    let mut c = u.sum();
    if c == 0.0 {
        c = 1.0;
    }
    (u / c, c)
}

/// Row-wise softmax of a matrix of unconstrained logits.
pub fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
    out
}

/// Softmax of a single logit vector.
pub fn softmax_vec(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
    let mut out = logits.mapv(|x| (x - max).exp());
    let sum = out.sum();
    out.mapv_inplace(|x| x / sum);
    out
}

/// Index of the largest entry, ties resolved to the first occurrence.
pub fn argmax(v: ArrayView1<f64>) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &x) in v.iter().enumerate() {
        if x > best_val {
            best_val = x;
            best = i;
        }
    }
    best
}

/// Row-normalize a count matrix, substituting 1 for a zero row sum.
pub fn normalize_counts_rows(counts: &Array2<f64>) -> Array2<f64> {
    let mut out = counts.clone();
    for mut row in out.rows_mut() {
        let mut sum = row.sum();
        if sum == 0.0 {
            sum = 1.0;
        }
        row.mapv_inplace(|x| x / sum);
    }
    out
}

/// Normalize a count vector, substituting 1 for a zero total.
pub fn normalize_counts(counts: &Array1<f64>) -> Array1<f64> {
    let mut sum = counts.sum();
    if sum == 0.0 {
        sum = 1.0;
    }
    counts.mapv(|x| x / sum)
}

/// Check that every row of a matrix sums to 1 within `tol`.
pub fn rows_are_stochastic(m: &Array2<f64>, tol: f64) -> bool {
    m.sum_axis(Axis(1)).iter().all(|&s| (s - 1.0).abs() <= tol)
}
