//! Model parameter types.
//!
//! Provides the discrete HMM parameter triple and optional pseudo-count
//! priors used by the trainers.

mod hmm;

pub use hmm::{Hmm, Priors};
