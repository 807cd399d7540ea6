//! # hmm_inference
//!
//! Inference and learning for discrete hidden Markov models: scaled
//! forward/backward filtering, Viterbi decoding, Baum-Welch EM, and
//! minibatch gradient training over a softmax reparameterization.
//!
//! Batches hold variable-length sequences padded to a common length; every
//! algorithm masks time steps beyond a sequence's valid length so padding
//! never leaks into likelihoods, expected counts, or decoded paths.
//!
//! ## Modules
//!
//! - `models` - HMM parameter triple and pseudo-count priors
//! - `data` - padded observation batches
//! - `inference` - forward/backward, smoothed marginals, Viterbi
//! - `training` - EM and gradient trainers, optimizers
//!
//! ## Quick start
//!
//! ```
//! use hmm_inference::{forward, viterbi_decode, Hmm};
//! use ndarray::{arr2, array};
//!
//! // 2-state model over a binary alphabet.
//! let model = Hmm::new(
//!     arr2(&[[0.7, 0.3], [0.3, 0.7]]),
//!     arr2(&[[0.9, 0.1], [0.2, 0.8]]),
//!     array![0.5, 0.5],
//! )
//! .unwrap();
//!
//! let obs = array![0usize, 0, 1];
//! let (loglik, _alpha) = forward(&model, obs.view(), 3).unwrap();
//! assert!(loglik < 0.0);
//!
//! let path = viterbi_decode(&model, obs.view(), 3).unwrap();
//! assert_eq!(path.len(), 3);
//! ```

pub mod data;
pub mod error;
pub mod inference;
pub mod models;
pub mod training;
pub mod utils;

pub use data::ObservationBatch;
pub use error::{HmmError, Result};
pub use inference::{
    backward, batch_loglikelihood, belief_update, forward, forward_backward, viterbi_decode,
    FilterResult,
};
pub use models::{Hmm, Priors};
pub use training::{
    e_step, fit_em, fit_gradient, m_step, Adam, GradientConfig, HmmLogits, Optimizer, Sgd,
    SufficientStats,
};
