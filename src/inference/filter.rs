//! Scaled forward/backward filtering and smoothed posteriors.
//!
//! All recursions run in probability space with a normalization at every
//! step; only the accumulated log-likelihood is carried in log space. Each
//! function takes a padded sequence together with its valid length `length`
//! and never reads symbols at or beyond that length.

use crate::data::ObservationBatch;
use crate::error::{HmmError, Result};
use crate::models::Hmm;
use crate::utils::math::normalize;
use ndarray::{Array1, Array2, ArrayView1};

/// Everything the forward-backward pass produces for one sequence.
///
/// `alpha` and `gamma` are indexed by logical time: rows `0..length` are
/// valid, rows beyond are zero. `beta` is stored right-aligned: the message
/// for logical time t sits at row `t + (max_len - length)`, with zero rows
/// in front (see [`beta_row`]).
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Forward beliefs, shape (max_len, n_states).
    pub alpha: Array2<f64>,
    /// Backward messages, shape (max_len, n_states), right-aligned.
    pub beta: Array2<f64>,
    /// Smoothed marginals, shape (max_len, n_states).
    pub gamma: Array2<f64>,
    /// log P(observations | model) over the valid prefix.
    pub loglikelihood: f64,
}

/// Row index of the backward message for logical time `t` inside a
/// right-aligned beta history.
///
/// The backward recursion fills its history from the last row towards the
/// front, so when `length < max_len` the valid rows occupy the tail and
/// logical indices shift by the padding amount.
#[inline]
pub fn beta_row(t: usize, max_len: usize, length: usize) -> usize {
    t + (max_len - length)
}

fn validate_sequence(model: &Hmm, obs_seq: ArrayView1<usize>, length: usize) -> Result<()> {
    if length == 0 {
        return Err(HmmError::InvalidInput(
            "observation sequence has zero valid length".into(),
        ));
    }
    if length > obs_seq.len() {
        return Err(HmmError::InvalidInput(format!(
            "valid length {length} exceeds sequence length {}",
            obs_seq.len()
        )));
    }
    let n_obs = model.n_obs();
    for t in 0..length {
        if obs_seq[t] >= n_obs {
            return Err(HmmError::InvalidInput(format!(
                "observation[{t}] = {} out of range (n_obs = {n_obs})",
                obs_seq[t]
            )));
        }
    }
    Ok(())
}

/// Scaled forward recursion.
///
/// Returns the accumulated log-likelihood of the valid prefix together with
/// the full (max_len, n_states) alpha history; rows at or beyond `length`
/// are zero and must be ignored by callers.
///
/// # Errors
///
/// Returns an error for a zero valid length, a valid length longer than the
/// sequence, or an out-of-range symbol inside the valid prefix.
pub fn forward(
    model: &Hmm,
    obs_seq: ArrayView1<usize>,
    length: usize,
) -> Result<(f64, Array2<f64>)> {
    validate_sequence(model, obs_seq, length)?;

    let n_states = model.n_states();
    let max_len = obs_seq.len();
    let mut alpha_hist = Array2::zeros((max_len, n_states));

    let (mut alpha, c) = normalize(&model.init_dist * &model.obs_mat.column(obs_seq[0]));
    let mut loglikelihood = c.ln();
    alpha_hist.row_mut(0).assign(&alpha);

    for t in 1..length {
        let predicted = model.trans_mat.t().dot(&alpha);
        let (next, c) = normalize(&predicted * &model.obs_mat.column(obs_seq[t]));
        loglikelihood += c.ln();
        alpha_hist.row_mut(t).assign(&next);
        alpha = next;
    }

    Ok((loglikelihood, alpha_hist))
}

/// Scaled backward recursion.
///
/// Returns the (max_len, n_states) beta history. The history is
/// right-aligned: the message for logical time t is stored at row
/// `beta_row(t, max_len, length)` and the leading `max_len - length` rows
/// are zero.
pub fn backward(model: &Hmm, obs_seq: ArrayView1<usize>, length: usize) -> Result<Array2<f64>> {
    validate_sequence(model, obs_seq, length)?;

    let n_states = model.n_states();
    let max_len = obs_seq.len();
    let mut beta_hist = Array2::zeros((max_len, n_states));

    let mut beta = Array1::ones(n_states);
    beta_hist.row_mut(max_len - 1).assign(&beta);

    for t in (0..length.saturating_sub(1)).rev() {
        let weighted = &beta * &model.obs_mat.column(obs_seq[t + 1]);
        let (next, _) = normalize(model.trans_mat.dot(&weighted));
        beta_hist
            .row_mut(beta_row(t, max_len, length))
            .assign(&next);
        beta = next;
    }

    Ok(beta_hist)
}

/// Forward-backward smoothing: alpha, beta, and the normalized smoothed
/// marginals gamma, plus the forward log-likelihood.
///
/// Gamma rows for t >= `length` are zero and must be ignored.
pub fn forward_backward(
    model: &Hmm,
    obs_seq: ArrayView1<usize>,
    length: usize,
) -> Result<FilterResult> {
    let (loglikelihood, alpha) = forward(model, obs_seq, length)?;
    let beta = backward(model, obs_seq, length)?;

    let n_states = model.n_states();
    let max_len = obs_seq.len();
    let mut gamma = Array2::zeros((max_len, n_states));
    for t in 0..length {
        let product = &alpha.row(t) * &beta.row(beta_row(t, max_len, length));
        let (g, _) = normalize(product);
        gamma.row_mut(t).assign(&g);
    }

    Ok(FilterResult {
        alpha,
        beta,
        gamma,
        loglikelihood,
    })
}

/// Final filtered state belief in the `(mean, covariance)` shape consumed by
/// the sequential-learning agent layer. A discrete belief carries no
/// covariance, so the second element is always `None`.
pub fn belief_update(
    model: &Hmm,
    obs_seq: ArrayView1<usize>,
    length: usize,
) -> Result<(Array1<f64>, Option<Array2<f64>>)> {
    let (_, alpha_hist) = forward(model, obs_seq, length)?;
    Ok((alpha_hist.row(length - 1).to_owned(), None))
}

/// Log-likelihood of every sequence in a batch under `model`.
pub fn batch_loglikelihood(model: &Hmm, batch: &ObservationBatch) -> Result<Vec<f64>> {
    batch.validate_symbols(model.n_obs())?;
    (0..batch.n_sequences())
        .map(|i| {
            let (obs_seq, length) = batch.sequence(i);
            forward(model, obs_seq, length).map(|(ll, _)| ll)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, array};

    fn two_state_model() -> Hmm {
        Hmm::new(
            arr2(&[[0.7, 0.3], [0.3, 0.7]]),
            arr2(&[[0.9, 0.1], [0.2, 0.8]]),
            array![0.5, 0.5],
        )
        .unwrap()
    }

    #[test]
    fn forward_matches_golden_value() {
        // Reference scenario: 2 states, 2 symbols, sequence [0, 0, 1].
        let model = two_state_model();
        let obs = array![0usize, 0, 1];
        let (ll, alpha) = forward(&model, obs.view(), 3).unwrap();
        assert_abs_diff_eq!(ll, -2.116562061783, epsilon = 1e-6);
        for t in 0..3 {
            assert_abs_diff_eq!(alpha.row(t).sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn forward_matches_brute_force_enumeration() {
        let model = two_state_model();
        let obs = array![0usize, 1, 1, 0];
        let (ll, _) = forward(&model, obs.view(), 4).unwrap();

        let mut total = 0.0;
        for z0 in 0..2 {
            for z1 in 0..2 {
                for z2 in 0..2 {
                    for z3 in 0..2 {
                        total += model.init_dist[z0]
                            * model.obs_mat[[z0, 0]]
                            * model.trans_mat[[z0, z1]]
                            * model.obs_mat[[z1, 1]]
                            * model.trans_mat[[z1, z2]]
                            * model.obs_mat[[z2, 1]]
                            * model.trans_mat[[z2, z3]]
                            * model.obs_mat[[z3, 0]];
                    }
                }
            }
        }
        assert_abs_diff_eq!(ll, total.ln(), epsilon = 1e-10);
    }

    #[test]
    fn forward_backward_agrees_with_forward() {
        let model = two_state_model();
        let obs = array![0usize, 1, 0, 0, 1, 1];
        let (ll_fwd, _) = forward(&model, obs.view(), 6).unwrap();
        let result = forward_backward(&model, obs.view(), 6).unwrap();
        assert_abs_diff_eq!(result.loglikelihood, ll_fwd, epsilon = 1e-12);
    }

    #[test]
    fn gamma_rows_sum_to_one_on_valid_prefix() {
        let model = two_state_model();
        let obs = array![0usize, 1, 0, 1, 0];
        let result = forward_backward(&model, obs.view(), 3).unwrap();
        for t in 0..3 {
            assert_abs_diff_eq!(result.gamma.row(t).sum(), 1.0, epsilon = 1e-12);
        }
        for t in 3..5 {
            assert_eq!(result.gamma.row(t).sum(), 0.0);
        }
    }

    #[test]
    fn padding_symbols_do_not_change_results() {
        let model = two_state_model();
        let padded_a = array![0usize, 0, 1, 1, 0];
        let padded_b = array![0usize, 0, 1, 0, 1];

        let ra = forward_backward(&model, padded_a.view(), 3).unwrap();
        let rb = forward_backward(&model, padded_b.view(), 3).unwrap();

        assert_abs_diff_eq!(ra.loglikelihood, rb.loglikelihood, epsilon = 1e-15);
        for t in 0..3 {
            for i in 0..2 {
                assert_abs_diff_eq!(ra.gamma[[t, i]], rb.gamma[[t, i]], epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn beta_realignment_matches_truncated_sequence() {
        // Gamma of a padded sequence must equal gamma of the same sequence
        // without padding; this pins the index shift in beta_row.
        let model = two_state_model();
        let padded = array![0usize, 0, 1, 1, 1];
        let truncated = array![0usize, 0, 1];

        let rp = forward_backward(&model, padded.view(), 3).unwrap();
        let rt = forward_backward(&model, truncated.view(), 3).unwrap();

        assert_abs_diff_eq!(rp.loglikelihood, rt.loglikelihood, epsilon = 1e-12);
        for t in 0..3 {
            for i in 0..2 {
                assert_abs_diff_eq!(rp.gamma[[t, i]], rt.gamma[[t, i]], epsilon = 1e-12);
                assert_abs_diff_eq!(
                    rp.beta[[beta_row(t, 5, 3), i]],
                    rt.beta[[beta_row(t, 3, 3), i]],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn beta_history_is_right_aligned() {
        let model = two_state_model();
        let obs = array![0usize, 1, 0, 1, 0];
        let beta = backward(&model, obs.view(), 3).unwrap();
        // Leading padding rows are zero, terminal row is all ones.
        for t in 0..2 {
            assert_eq!(beta.row(t).sum(), 0.0);
        }
        for i in 0..2 {
            assert_abs_diff_eq!(beta[[4, i]], 1.0, epsilon = 1e-15);
        }
    }

    #[test]
    fn belief_update_returns_filtered_state_and_no_covariance() {
        let model = two_state_model();
        let obs = array![0usize, 0, 1];
        let (mean, cov) = belief_update(&model, obs.view(), 3).unwrap();
        assert!(cov.is_none());
        assert_abs_diff_eq!(mean.sum(), 1.0, epsilon = 1e-12);
        // After two 0s and a 1, state 1 (which favors symbol 1) dominates.
        let (_, alpha) = forward(&model, obs.view(), 3).unwrap();
        assert_abs_diff_eq!(mean[0], alpha[[2, 0]], epsilon = 1e-15);
    }

    #[test]
    fn batch_loglikelihood_matches_per_sequence_forward() {
        let model = two_state_model();
        let batch = ObservationBatch::new(
            arr2(&[[0usize, 0, 1], [1, 0, 0], [0, 1, 1]]),
            array![3, 2, 3],
        )
        .unwrap();
        let lls = batch_loglikelihood(&model, &batch).unwrap();
        assert_eq!(lls.len(), 3);
        for i in 0..3 {
            let (obs_seq, length) = batch.sequence(i);
            let (expected, _) = forward(&model, obs_seq, length).unwrap();
            assert_abs_diff_eq!(lls[i], expected, epsilon = 1e-15);
        }
    }

    #[test]
    fn rejects_invalid_inputs() {
        let model = two_state_model();
        let obs = array![0usize, 1];
        assert!(forward(&model, obs.view(), 0).is_err());
        assert!(forward(&model, obs.view(), 3).is_err());
        assert!(forward(&model, array![0usize, 5].view(), 2).is_err());
        assert!(backward(&model, obs.view(), 0).is_err());
    }

    #[test]
    fn impossible_observation_stays_finite() {
        // Symbol 1 has zero probability in both states: beliefs collapse to
        // the zero vector, the normalizer guard keeps everything finite.
        let model = Hmm::new(
            arr2(&[[0.5, 0.5], [0.5, 0.5]]),
            arr2(&[[1.0, 0.0], [1.0, 0.0]]),
            array![0.5, 0.5],
        )
        .unwrap();
        let obs = array![0usize, 1, 0];
        let (ll, alpha) = forward(&model, obs.view(), 3).unwrap();
        assert!(ll.is_finite());
        assert!(alpha.iter().all(|x| x.is_finite()));
    }
}
