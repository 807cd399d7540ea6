//! Baum-Welch expectation-maximization training.

use crate::data::ObservationBatch;
use crate::error::{HmmError, Result};
use crate::inference::{beta_row, forward_backward};
use crate::models::{Hmm, Priors};
use crate::utils::math::{normalize_counts, normalize_counts_rows};
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Expected sufficient statistics accumulated over a batch during one
/// E-step. Reset at every E-step; never persisted across iterations.
#[derive(Debug, Clone)]
pub struct SufficientStats {
    /// Expected transition counts, shape (n_states, n_states).
    pub trans_counts: Array2<f64>,
    /// Expected emission counts, shape (n_states, n_obs).
    pub obs_counts: Array2<f64>,
    /// Expected initial-state counts, length n_states.
    pub init_counts: Array1<f64>,
    /// Total log-likelihood of the batch under the current model.
    pub loglikelihood: f64,
}

impl SufficientStats {
    fn zeros(n_states: usize, n_obs: usize) -> Self {
        Self {
            trans_counts: Array2::zeros((n_states, n_states)),
            obs_counts: Array2::zeros((n_states, n_obs)),
            init_counts: Array1::zeros(n_states),
            loglikelihood: 0.0,
        }
    }

    /// Merge by summation. Addition is commutative and associative up to
    /// floating error, so any parallel reduction order is acceptable.
    fn merged(mut self, other: Self) -> Self {
        self.trans_counts += &other.trans_counts;
        self.obs_counts += &other.obs_counts;
        self.init_counts += &other.init_counts;
        self.loglikelihood += other.loglikelihood;
        self
    }
}

/// Expected counts contributed by a single sequence.
///
/// The expected-transition slice for each time step is normalized to sum 1
/// before it is accumulated; this per-step normalization (rather than one
/// end-to-end normalization) determines the EM fixed point and must not be
/// "simplified" away.
fn sequence_stats(model: &Hmm, obs_seq: ArrayView1<usize>, length: usize) -> Result<SufficientStats> {
    let n_states = model.n_states();
    let n_obs = model.n_obs();
    let max_len = obs_seq.len();

    let filtered = forward_backward(model, obs_seq, length)?;
    let mut stats = SufficientStats::zeros(n_states, n_obs);
    stats.loglikelihood = filtered.loglikelihood;

    // Expected transition counts from per-step normalized ksi slices.
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
        stats.trans_counts.scaled_add(1.0 / slice_sum, &ksi);
    }

    // Expected emission counts: gamma mass routed to the observed symbol.
    for t in 0..length {
        let symbol = obs_seq[t];
        for i in 0..n_states {
            stats.obs_counts[[i, symbol]] += filtered.gamma[[t, i]];
        }
    }

    stats.init_counts.assign(&filtered.gamma.row(0));
    Ok(stats)
}

/// E-step: accumulate expected transition, emission, and initial-state
/// counts plus the total log-likelihood over a batch.
///
/// Sequences are independent given the shared read-only model, so the batch
/// fans out across a rayon worker pool and reduces by summation.
pub fn e_step(model: &Hmm, batch: &ObservationBatch) -> Result<SufficientStats> {
    batch.validate_symbols(model.n_obs())?;

    let n_states = model.n_states();
    let n_obs = model.n_obs();
    (0..batch.n_sequences())
        .into_par_iter()
        .map(|i| {
            let (obs_seq, length) = batch.sequence(i);
            sequence_stats(model, obs_seq, length)
        })
        .try_reduce(
            || SufficientStats::zeros(n_states, n_obs),
            |a, b| Ok(a.merged(b)),
        )
}

/// M-step: renormalize accumulated counts (plus optional pseudo-counts)
/// into a new model.
///
/// Zero row sums are replaced by 1 so a state with no posterior mass yields
/// a zero row instead of NaN.
pub fn m_step(stats: &SufficientStats, priors: Option<&Priors>) -> Result<Hmm> {
    let mut trans_counts = stats.trans_counts.clone();
    let mut obs_counts = stats.obs_counts.clone();
    let mut init_counts = stats.init_counts.clone();

    if let Some(priors) = priors {
        if priors.trans_pseudo_counts.dim() != trans_counts.dim()
            || priors.obs_pseudo_counts.dim() != obs_counts.dim()
            || priors.init_pseudo_counts.len() != init_counts.len()
        {
            return Err(HmmError::InvalidInput(
                "prior pseudo-count shapes do not match accumulated counts".into(),
            ));
        }
        trans_counts += &priors.trans_pseudo_counts;
        obs_counts += &priors.obs_pseudo_counts;
        init_counts += &priors.init_pseudo_counts;
    }

    Ok(Hmm::from_parts(
        normalize_counts_rows(&trans_counts),
        normalize_counts_rows(&obs_counts),
        normalize_counts(&init_counts),
    ))
}

/// Fit a model with Baum-Welch EM for a fixed number of epochs.
///
/// Either `init_model` or `dims = (n_hidden, n_obs)` must be supplied;
/// providing neither is a configuration error raised before any
/// computation. When only dimensions are given the initial model is drawn
/// with softmax-normalized random rows from the seeded generator.
///
/// Returns the final model and the per-epoch negative log-likelihood trace.
/// There is no automatic convergence detection: callers judge convergence
/// from the trace.
pub fn fit_em(
    batch: &ObservationBatch,
    init_model: Option<Hmm>,
    dims: Option<(usize, usize)>,
    priors: Option<&Priors>,
    num_epochs: usize,
    seed: u64,
) -> Result<(Hmm, Vec<f64>)> {
    let mut model = match (init_model, dims) {
        (Some(model), _) => model,
        (None, Some((n_hidden, n_obs))) => {
            if n_hidden == 0 || n_obs == 0 {
                return Err(HmmError::Config(
                    "n_hidden and n_obs must be positive".into(),
                ));
            }
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            Hmm::random(n_hidden, n_obs, &mut rng)
        }
        (None, None) => {
            return Err(HmmError::Config(
                "either an initial model or (n_hidden, n_obs) dimensions must be supplied".into(),
            ))
        }
    };
    batch.validate_symbols(model.n_obs())?;

    let mut neg_loglikelihoods = Vec::with_capacity(num_epochs);
    for epoch in 0..num_epochs {
        let stats = e_step(&model, batch)?;
        neg_loglikelihoods.push(-stats.loglikelihood);
        model = m_step(&stats, priors)?;

        if (epoch + 1) % 10 == 0 {
            tracing::debug!(
                "epoch {}: negative log-likelihood = {:.4}",
                epoch + 1,
                -stats.loglikelihood
            );
        }
    }
    tracing::info!(
        "EM finished after {} epochs, final NLL = {:.4}",
        num_epochs,
        neg_loglikelihoods.last().copied().unwrap_or(f64::NAN)
    );

    Ok((model, neg_loglikelihoods))
}
