//! Optimizers for the gradient trainer.
//!
//! Optimizer state is owned by the caller and threaded through each update
//! call; there is no process-wide state.

use super::sgd::HmmLogits;
use ndarray::{Array, Dimension, Zip};
use serde::{Deserialize, Serialize};

/// Update rule plus its internal state.
pub trait Optimizer: Send {
    /// Apply one update to the logits given gradients of the loss.
    fn update(&mut self, params: &mut HmmLogits, grads: &HmmLogits);

    /// Reset internal state for a fresh training run.
    fn reset(&mut self);
}

/// Stochastic gradient descent with optional momentum.
#[derive(Clone, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    #[serde(skip)]
    velocity: Option<HmmLogits>,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            velocity: None,
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, params: &mut HmmLogits, grads: &HmmLogits) {
        if self.momentum > 0.0 {
            let velocity = self
                .velocity
                .get_or_insert_with(|| params.zeros_like());
            momentum_step(
                &mut params.trans,
                &grads.trans,
                &mut velocity.trans,
                self.learning_rate,
                self.momentum,
            );
            momentum_step(
                &mut params.obs,
                &grads.obs,
                &mut velocity.obs,
                self.learning_rate,
                self.momentum,
            );
            momentum_step(
                &mut params.init,
                &grads.init,
                &mut velocity.init,
                self.learning_rate,
                self.momentum,
            );
        } else {
            params.trans.scaled_add(-self.learning_rate, &grads.trans);
            params.obs.scaled_add(-self.learning_rate, &grads.obs);
            params.init.scaled_add(-self.learning_rate, &grads.init);
        }
    }

    fn reset(&mut self) {
        self.velocity = None;
    }
}

/// Adam (adaptive moment estimation).
#[derive(Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    #[serde(skip)]
    t: usize,
    #[serde(skip)]
    moments: Option<(HmmLogits, HmmLogits)>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            moments: None,
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }
}

impl Optimizer for Adam {
    fn update(&mut self, params: &mut HmmLogits, grads: &HmmLogits) {
        self.t += 1;
        let (m, v) = self
            .moments
            .get_or_insert_with(|| (params.zeros_like(), params.zeros_like()));

        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);

        adam_step(
            &mut params.trans,
            &grads.trans,
            &mut m.trans,
            &mut v.trans,
            self.learning_rate,
            self.beta1,
            self.beta2,
            self.epsilon,
            bias1,
            bias2,
        );
        adam_step(
            &mut params.obs,
            &grads.obs,
            &mut m.obs,
            &mut v.obs,
            self.learning_rate,
            self.beta1,
            self.beta2,
            self.epsilon,
            bias1,
            bias2,
        );
        adam_step(
            &mut params.init,
            &grads.init,
            &mut m.init,
            &mut v.init,
            self.learning_rate,
            self.beta1,
            self.beta2,
            self.epsilon,
            bias1,
            bias2,
        );
    }

    fn reset(&mut self) {
        self.t = 0;
        self.moments = None;
    }
}

fn momentum_step<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    velocity: &mut Array<f64, D>,
    learning_rate: f64,
    momentum: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(velocity)
        .for_each(|p, &g, v| {
            *v = momentum * *v - learning_rate * g;
            *p += *v;
        });
}

#[allow(clippy::too_many_arguments)]
fn adam_step<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    bias1: f64,
    bias2: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn unit_logits() -> (HmmLogits, HmmLogits) {
        let params = HmmLogits {
            trans: Array2::ones((2, 2)),
            obs: Array2::ones((2, 3)),
            init: Array1::ones(2),
        };
        let grads = HmmLogits {
            trans: Array2::ones((2, 2)),
            obs: Array2::ones((2, 3)),
            init: Array1::ones(2),
        };
        (params, grads)
    }

    #[test]
    fn sgd_takes_plain_step() {
        let (mut params, grads) = unit_logits();
        let mut optimizer = Sgd::new(0.01);
        optimizer.update(&mut params, &grads);
        assert_abs_diff_eq!(params.trans[[0, 0]], 0.99, epsilon = 1e-12);
        assert_abs_diff_eq!(params.init[1], 0.99, epsilon = 1e-12);
    }

    #[test]
    fn sgd_momentum_accumulates_velocity() {
        let (mut params, grads) = unit_logits();
        let mut optimizer = Sgd::new(0.1).with_momentum(0.9);
        optimizer.update(&mut params, &grads);
        optimizer.update(&mut params, &grads);
        // Steps: -0.1, then -(0.9*0.1 + 0.1) = -0.19.
        assert_abs_diff_eq!(params.trans[[0, 0]], 1.0 - 0.1 - 0.19, epsilon = 1e-12);
    }

    #[test]
    fn adam_moves_against_gradient() {
        let (mut params, grads) = unit_logits();
        let mut optimizer = Adam::new(0.001);
        for _ in 0..10 {
            optimizer.update(&mut params, &grads);
        }
        assert!(params.trans[[0, 0]] < 1.0);
        assert!(params.obs[[1, 2]] < 1.0);
    }

    #[test]
    fn reset_clears_state() {
        let (mut params, grads) = unit_logits();
        let mut optimizer = Adam::new(0.001);
        optimizer.update(&mut params, &grads);
        optimizer.reset();
        assert!(optimizer.moments.is_none());
        assert_eq!(optimizer.t, 0);
    }
}
