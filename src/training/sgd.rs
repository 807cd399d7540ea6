//! Gradient-based training over a softmax reparameterization.
//!
//! Parameters live as unconstrained logits; every loss evaluation maps them
//! through a row-wise softmax to a valid model, so any optimizer step keeps
//! the model stochastic. This path is independent of the EM components: the
//! loss is the negative mean sequence log-likelihood and its gradients with
//! respect to the logits are computed from posterior expectations in closed
//! form.

use crate::data::ObservationBatch;
use crate::error::{HmmError, Result};
use crate::inference::{beta_row, forward_backward};
use crate::models::Hmm;
use crate::training::optimizer::Optimizer;
use crate::utils::math::{softmax_rows, softmax_vec};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Unconstrained logit parameterization of a discrete HMM.
///
/// Row-wise softmax of `trans` and `obs`, and softmax of `init`, recover a
/// valid parameter triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmLogits {
    /// Transition logits, shape (n_states, n_states).
    pub trans: Array2<f64>,
    /// Emission logits, shape (n_states, n_obs).
    pub obs: Array2<f64>,
    /// Initial-distribution logits, length n_states.
    pub init: Array1<f64>,
}

impl HmmLogits {
    /// Standard-normal random logits.
    pub fn random<R: Rng>(n_states: usize, n_obs: usize, rng: &mut R) -> Self {
        Self {
            trans: Array2::from_shape_fn((n_states, n_states), |_| {
                rng.sample::<f64, _>(StandardNormal)
            }),
            obs: Array2::from_shape_fn((n_states, n_obs), |_| {
                rng.sample::<f64, _>(StandardNormal)
            }),
            init: Array1::from_shape_fn(n_states, |_| rng.sample::<f64, _>(StandardNormal)),
        }
    }

    /// Zero logits with the same shapes as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            trans: Array2::zeros(self.trans.dim()),
            obs: Array2::zeros(self.obs.dim()),
            init: Array1::zeros(self.init.len()),
        }
    }

    /// Map the logits to a valid model through row-wise softmax.
    pub fn to_model(&self) -> Hmm {
        Hmm::from_parts(
            softmax_rows(&self.trans),
            softmax_rows(&self.obs),
            softmax_vec(&self.init),
        )
    }
}

/// Configuration for [`fit_gradient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientConfig {
    /// Sequences per minibatch.
    pub batch_size: usize,
    /// Full passes over the batch.
    pub num_epochs: usize,
    /// Seed for logit initialization and epoch reshuffling.
    pub seed: u64,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            num_epochs: 100,
            seed: 0,
        }
    }
}

/// Per-sequence accumulator for the minibatch loss and logit gradients.
struct GradAccum {
    loglik_sum: f64,
    trans: Array2<f64>,
    obs: Array2<f64>,
    init: Array1<f64>,
}

impl GradAccum {
    fn zeros(n_states: usize, n_obs: usize) -> Self {
        Self {
            loglik_sum: 0.0,
            trans: Array2::zeros((n_states, n_states)),
            obs: Array2::zeros((n_states, n_obs)),
            init: Array1::zeros(n_states),
        }
    }

    fn merged(mut self, other: Self) -> Self {
        self.loglik_sum += other.loglik_sum;
        self.trans += &other.trans;
        self.obs += &other.obs;
        self.init += &other.init;
        self
    }
}

/// Gradient of one sequence's negative log-likelihood with respect to the
/// logits.
///
/// For a row-softmax parameterization the gradient of the log-likelihood in
/// a logit is the posterior expected count minus the row's total expected
/// count times the current probability, so the expected counts double as
/// the exact gradient ingredients.
fn sequence_grad(
    model: &Hmm,
    obs_seq: ArrayView1<usize>,
    length: usize,
    acc: &mut GradAccum,
) -> Result<()> {
    let n_states = model.n_states();
    let n_obs = model.n_obs();
    let max_len = obs_seq.len();

    let filtered = forward_backward(model, obs_seq, length)?;
    acc.loglik_sum += filtered.loglikelihood;

    // Posterior expected transition counts, each time slice normalized to
    // sum 1 (the slice total is the exact joint posterior normalizer).
    let mut trans_counts = Array2::zeros((n_states, n_states));
    let mut ksi = Array2::zeros((n_states, n_states));
    for t in 0..length.saturating_sub(1) {
        let symbol = obs_seq[t + 1];
        let beta_next = filtered.beta.row(beta_row(t + 1, max_len, length));
        for j in 0..n_states {
            for k in 0..n_states {
                ksi[[j, k]] = filtered.alpha[[t, j]]
                    * model.trans_mat[[j, k]]
                    * model.obs_mat[[k, symbol]]
                    * beta_next[k];
            }
        }
        let mut slice_sum = ksi.sum();
        if slice_sum == 0.0 {
            slice_sum = 1.0;
        }
        trans_counts.scaled_add(1.0 / slice_sum, &ksi);
    }

    // Posterior expected emission counts.
    let mut obs_counts = Array2::<f64>::zeros((n_states, n_obs));
    for t in 0..length {
        let symbol = obs_seq[t];
        for i in 0..n_states {
            obs_counts[[i, symbol]] += filtered.gamma[[t, i]];
        }
    }

    for j in 0..n_states {
        let row_total = trans_counts.row(j).sum();
        for k in 0..n_states {
            acc.trans[[j, k]] += row_total * model.trans_mat[[j, k]] - trans_counts[[j, k]];
        }
        let row_total = obs_counts.row(j).sum();
        for o in 0..n_obs {
            acc.obs[[j, o]] += row_total * model.obs_mat[[j, o]] - obs_counts[[j, o]];
        }
        acc.init[j] += model.init_dist[j] - filtered.gamma[[0, j]];
    }
    Ok(())
}

/// Negative mean log-likelihood of a minibatch and its gradient with
/// respect to the logits.
pub fn loss_and_grad(logits: &HmmLogits, batch: &ObservationBatch) -> Result<(f64, HmmLogits)> {
    let model = logits.to_model();
    batch.validate_symbols(model.n_obs())?;

    let n_states = model.n_states();
    let n_obs = model.n_obs();
    let n_sequences = batch.n_sequences();

    let acc = (0..n_sequences)
        .into_par_iter()
        .map(|i| {
            let (obs_seq, length) = batch.sequence(i);
            let mut acc = GradAccum::zeros(n_states, n_obs);
            sequence_grad(&model, obs_seq, length, &mut acc)?;
            Ok(acc)
        })
        .try_reduce(
            || GradAccum::zeros(n_states, n_obs),
            |a, b| Ok(a.merged(b)),
        )?;

    let scale = 1.0 / n_sequences as f64;
    let grads = HmmLogits {
        trans: acc.trans * scale,
        obs: acc.obs * scale,
        init: acc.init * scale,
    };
    Ok((-acc.loglik_sum * scale, grads))
}

/// Fit a model by minibatch gradient descent on the negative mean
/// log-likelihood.
///
/// Each epoch reshuffles the batch into minibatches of
/// `config.batch_size` sequences; each minibatch performs one optimizer
/// update. Returns the model recovered from the final logits together with
/// the per-minibatch loss trace.
pub fn fit_gradient(
    batch: &ObservationBatch,
    dims: (usize, usize),
    config: &GradientConfig,
    optimizer: &mut dyn Optimizer,
) -> Result<(Hmm, Vec<f64>)> {
    let (n_hidden, n_obs) = dims;
    if n_hidden == 0 || n_obs == 0 {
        return Err(HmmError::Config(
            "n_hidden and n_obs must be positive".into(),
        ));
    }
    if config.batch_size == 0 {
        return Err(HmmError::Config("batch_size must be positive".into()));
    }
    batch.validate_symbols(n_obs)?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut logits = HmmLogits::random(n_hidden, n_obs, &mut rng);
    optimizer.reset();

    let mut losses = Vec::new();
    let mut indices: Vec<usize> = (0..batch.n_sequences()).collect();

    for epoch in 0..config.num_epochs {
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        let mut n_minibatches = 0;

        for chunk in indices.chunks(config.batch_size) {
            let minibatch = batch.subset(chunk);
            let (loss, grads) = loss_and_grad(&logits, &minibatch)?;
            optimizer.update(&mut logits, &grads);
            losses.push(loss);
            epoch_loss += loss;
            n_minibatches += 1;
        }

        if (epoch + 1) % 10 == 0 {
            tracing::debug!(
                "epoch {}: mean minibatch loss = {:.4}",
                epoch + 1,
                epoch_loss / n_minibatches as f64
            );
        }
    }

    Ok((logits.to_model(), losses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::optimizer::{Adam, Sgd};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, array};

    fn synthetic_batch(seed: u64, n_sequences: usize, seq_len: usize) -> ObservationBatch {
        let truth = Hmm::new(
            arr2(&[[0.85, 0.15], [0.25, 0.75]]),
            arr2(&[[0.9, 0.1], [0.2, 0.8]]),
            array![0.6, 0.4],
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sequences: Vec<Vec<usize>> = (0..n_sequences)
            .map(|_| truth.sample(seq_len, &mut rng).1)
            .collect();
        ObservationBatch::from_sequences(&sequences).unwrap()
    }

    #[test]
    fn logits_map_to_valid_model() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let logits = HmmLogits::random(3, 4, &mut rng);
        let model = logits.to_model();
        model.validate().unwrap();
        assert_eq!(model.n_states(), 3);
        assert_eq!(model.n_obs(), 4);
    }

    #[test]
    fn analytic_gradient_matches_finite_difference() {
        let batch = synthetic_batch(3, 5, 12);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut logits = HmmLogits::random(2, 2, &mut rng);

        let (_, grads) = loss_and_grad(&logits, &batch).unwrap();
        let h = 1e-6;

        let probe = |logits: &mut HmmLogits, j: usize, k: usize, analytic: f64, which: u8| {
            let bump = |l: &mut HmmLogits, delta: f64| match which {
                0 => l.trans[[j, k]] += delta,
                1 => l.obs[[j, k]] += delta,
                _ => l.init[j] += delta,
            };
            bump(logits, h);
            let (plus, _) = loss_and_grad(logits, &batch).unwrap();
            bump(logits, -2.0 * h);
            let (minus, _) = loss_and_grad(logits, &batch).unwrap();
            bump(logits, h);
            let numeric = (plus - minus) / (2.0 * h);
            assert_abs_diff_eq!(numeric, analytic, epsilon = 1e-5);
        };

        for j in 0..2 {
            for k in 0..2 {
                let g = grads.trans[[j, k]];
                probe(&mut logits, j, k, g, 0);
                let g = grads.obs[[j, k]];
                probe(&mut logits, j, k, g, 1);
            }
            let g = grads.init[j];
            probe(&mut logits, j, 0, g, 2);
        }
    }

    #[test]
    fn loss_and_grad_stays_finite_on_degenerate_batch() {
        // A single sequence that never emits symbol 1 still yields finite
        // loss and gradients thanks to the normalizer guards.
        let batch = ObservationBatch::from_sequences(&[vec![0, 0, 0]]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let logits = HmmLogits::random(2, 2, &mut rng);
        let (loss, grads) = loss_and_grad(&logits, &batch).unwrap();
        assert!(loss.is_finite());
        assert!(grads.trans.iter().all(|g| g.is_finite()));
        assert!(grads.obs.iter().all(|g| g.is_finite()));
        assert!(grads.init.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn fit_gradient_decreases_loss_with_sgd() {
        let batch = synthetic_batch(17, 40, 20);
        let config = GradientConfig {
            batch_size: 10,
            num_epochs: 30,
            seed: 11,
        };
        let mut optimizer = Sgd::new(0.2);
        let (model, losses) = fit_gradient(&batch, (2, 2), &config, &mut optimizer).unwrap();
        model.validate().unwrap();

        let head: f64 = losses[..5].iter().sum::<f64>() / 5.0;
        let tail: f64 = losses[losses.len() - 5..].iter().sum::<f64>() / 5.0;
        assert!(
            tail < head,
            "loss did not decrease: head {head}, tail {tail}"
        );
    }

    #[test]
    fn fit_gradient_works_with_adam() {
        let batch = synthetic_batch(23, 30, 15);
        let config = GradientConfig {
            batch_size: 10,
            num_epochs: 20,
            seed: 4,
        };
        let mut optimizer = Adam::new(0.05);
        let (model, losses) = fit_gradient(&batch, (2, 2), &config, &mut optimizer).unwrap();
        model.validate().unwrap();
        let head: f64 = losses[..3].iter().sum::<f64>() / 3.0;
        let tail: f64 = losses[losses.len() - 3..].iter().sum::<f64>() / 3.0;
        assert!(tail < head);
    }

    #[test]
    fn fit_gradient_validates_configuration() {
        let batch = synthetic_batch(1, 4, 8);
        let mut optimizer = Sgd::new(0.1);
        let bad = GradientConfig {
            batch_size: 0,
            ..GradientConfig::default()
        };
        assert!(fit_gradient(&batch, (2, 2), &bad, &mut optimizer).is_err());
        assert!(
            fit_gradient(&batch, (0, 2), &GradientConfig::default(), &mut optimizer).is_err()
        );
    }
}
