//! Shared numeric helpers.

pub mod math;

pub use math::{argmax, normalize, softmax_rows, softmax_vec, PROB_FLOOR};
