//! Parameter estimation.
//!
//! Two independent regimes: closed-form Baum-Welch EM over accumulated
//! sufficient statistics, and minibatch gradient descent over a softmax
//! reparameterization.

mod em;
mod optimizer;
mod sgd;

pub use em::{e_step, fit_em, m_step, SufficientStats};
pub use optimizer::{Adam, Optimizer, Sgd};
pub use sgd::{fit_gradient, loss_and_grad, GradientConfig, HmmLogits};
