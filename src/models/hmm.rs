//! Discrete hidden Markov model parameters.

use crate::error::{HmmError, Result};
use crate::utils::math::{softmax_rows, softmax_vec};
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Tolerance used when validating that probability rows sum to 1.
const ROW_SUM_TOL: f64 = 1e-6;

/// A discrete hidden Markov model.
///
/// Holds the parameter triple (transition matrix, emission matrix, initial
/// state distribution). Every row of `trans_mat` and `obs_mat`, and
/// `init_dist` itself, sums to 1. Instances are immutable: training code
/// produces a new `Hmm` each step instead of mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hmm {
    /// State transition matrix A, shape (n_states, n_states).
    /// Row i is P(next state | current state i).
    pub trans_mat: Array2<f64>,
    /// Emission matrix B, shape (n_states, n_obs).
    /// Row i is P(observed symbol | state i).
    pub obs_mat: Array2<f64>,
    /// Initial state distribution pi, length n_states.
    pub init_dist: Array1<f64>,
}

impl Hmm {
    /// Create a model after validating dimensions and probability constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if any dimension is zero, shapes are inconsistent,
    /// any entry is negative, or any probability row does not sum to
    /// approximately 1.
    pub fn new(
        trans_mat: Array2<f64>,
        obs_mat: Array2<f64>,
        init_dist: Array1<f64>,
    ) -> Result<Self> {
        let n_states = init_dist.len();
        if n_states == 0 {
            return Err(HmmError::InvalidModel("init_dist is empty".into()));
        }
        if trans_mat.nrows() != n_states || trans_mat.ncols() != n_states {
            return Err(HmmError::InvalidModel(format!(
                "trans_mat shape {:?} does not match n_states {}",
                trans_mat.dim(),
                n_states
            )));
        }
        if obs_mat.nrows() != n_states {
            return Err(HmmError::InvalidModel(format!(
                "obs_mat has {} rows, expected n_states {}",
                obs_mat.nrows(),
                n_states
            )));
        }
        if obs_mat.ncols() == 0 {
            return Err(HmmError::InvalidModel("obs_mat has zero columns".into()));
        }

        let model = Self {
            trans_mat,
            obs_mat,
            init_dist,
        };
        model.validate()?;
        Ok(model)
    }

    /// Build a model from parts the engine itself produced, skipping
    /// validation. Used by the M-step and the softmax reparameterization,
    /// whose outputs are stochastic by construction.
    pub(crate) fn from_parts(
        trans_mat: Array2<f64>,
        obs_mat: Array2<f64>,
        init_dist: Array1<f64>,
    ) -> Self {
        Self {
            trans_mat,
            obs_mat,
            init_dist,
        }
    }

    /// Randomly initialize a model: rows are softmax-transformed draws from
    /// a standard normal, so every row is a valid distribution.
    pub fn random<R: Rng>(n_states: usize, n_obs: usize, rng: &mut R) -> Self {
        let trans_logits =
            Array2::from_shape_fn((n_states, n_states), |_| rng.sample::<f64, _>(StandardNormal));
        let obs_logits =
            Array2::from_shape_fn((n_states, n_obs), |_| rng.sample::<f64, _>(StandardNormal));
        let init_logits = Array1::from_shape_fn(n_states, |_| rng.sample::<f64, _>(StandardNormal));

        Self {
            trans_mat: softmax_rows(&trans_logits),
            obs_mat: softmax_rows(&obs_logits),
            init_dist: softmax_vec(&init_logits),
        }
    }

    /// Number of hidden states.
    pub fn n_states(&self) -> usize {
        self.init_dist.len()
    }

    /// Number of observable symbols.
    pub fn n_obs(&self) -> usize {
        self.obs_mat.ncols()
    }

    /// Check probability constraints on the current parameters.
    pub fn validate(&self) -> Result<()> {
        if self.init_dist.iter().any(|&p| p < 0.0)
            || self.trans_mat.iter().any(|&p| p < 0.0)
            || self.obs_mat.iter().any(|&p| p < 0.0)
        {
            return Err(HmmError::InvalidModel(
                "probabilities must be non-negative".into(),
            ));
        }

        let pi_sum = self.init_dist.sum();
        if (pi_sum - 1.0).abs() > ROW_SUM_TOL {
            return Err(HmmError::InvalidModel(format!(
                "init_dist sums to {pi_sum}, expected ~1.0"
            )));
        }
        for (i, row) in self.trans_mat.rows().into_iter().enumerate() {
            let sum = row.sum();
            if (sum - 1.0).abs() > ROW_SUM_TOL {
                return Err(HmmError::InvalidModel(format!(
                    "trans_mat row {i} sums to {sum}, expected ~1.0"
                )));
            }
        }
        for (i, row) in self.obs_mat.rows().into_iter().enumerate() {
            let sum = row.sum();
            if (sum - 1.0).abs() > ROW_SUM_TOL {
                return Err(HmmError::InvalidModel(format!(
                    "obs_mat row {i} sums to {sum}, expected ~1.0"
                )));
            }
        }
        Ok(())
    }

    /// Sample a (state path, observation sequence) pair of the given length.
    pub fn sample<R: Rng>(&self, seq_len: usize, rng: &mut R) -> (Vec<usize>, Vec<usize>) {
        let mut states = Vec::with_capacity(seq_len);
        let mut observations = Vec::with_capacity(seq_len);
        if seq_len == 0 {
            return (states, observations);
        }

        let mut state = sample_discrete(self.init_dist.iter().copied(), rng);
        states.push(state);
        observations.push(sample_discrete(self.obs_mat.row(state).iter().copied(), rng));

        for _ in 1..seq_len {
            state = sample_discrete(self.trans_mat.row(state).iter().copied(), rng);
            states.push(state);
            observations.push(sample_discrete(self.obs_mat.row(state).iter().copied(), rng));
        }

        (states, observations)
    }
}

/// Dirichlet-style pseudo-counts added to accumulated counts before the
/// M-step renormalization. Shapes match the corresponding model parameters;
/// held constant across an entire EM run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priors {
    pub trans_pseudo_counts: Array2<f64>,
    pub obs_pseudo_counts: Array2<f64>,
    pub init_pseudo_counts: Array1<f64>,
}

impl Priors {
    /// Uniform pseudo-count priors with the same strength everywhere.
    pub fn uniform(n_states: usize, n_obs: usize, strength: f64) -> Self {
        Self {
            trans_pseudo_counts: Array2::from_elem((n_states, n_states), strength),
            obs_pseudo_counts: Array2::from_elem((n_states, n_obs), strength),
            init_pseudo_counts: Array1::from_elem(n_states, strength),
        }
    }
}

/// Draw an index from an (assumed normalized) discrete distribution.
fn sample_discrete<I, R>(probs: I, rng: &mut R) -> usize
where
    I: ExactSizeIterator<Item = f64>,
    R: Rng,
{
    let n = probs.len();
    let u: f64 = rng.gen();
    let mut cumsum = 0.0;
    for (i, p) in probs.enumerate() {
        cumsum += p;
        if u < cumsum {
            return i;
        }
    }
    n - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, array};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_state_model() -> Hmm {
        Hmm::new(
            arr2(&[[0.7, 0.3], [0.3, 0.7]]),
            arr2(&[[0.9, 0.1], [0.2, 0.8]]),
            array![0.5, 0.5],
        )
        .unwrap()
    }

    #[test]
    fn new_accepts_valid_model() {
        let model = two_state_model();
        assert_eq!(model.n_states(), 2);
        assert_eq!(model.n_obs(), 2);
    }

    #[test]
    fn new_rejects_bad_row_sums() {
        let result = Hmm::new(
            arr2(&[[0.7, 0.2], [0.3, 0.7]]),
            arr2(&[[0.9, 0.1], [0.2, 0.8]]),
            array![0.5, 0.5],
        );
        assert!(result.is_err());
    }

    #[test]
    fn new_rejects_shape_mismatch() {
        let result = Hmm::new(
            arr2(&[[0.7, 0.3], [0.3, 0.7]]),
            arr2(&[[0.9, 0.1]]),
            array![0.5, 0.5],
        );
        assert!(result.is_err());

        let result = Hmm::new(
            arr2(&[[1.0]]),
            arr2(&[[0.9, 0.1], [0.2, 0.8]]),
            array![0.5, 0.5],
        );
        assert!(result.is_err());
    }

    #[test]
    fn random_model_is_valid() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let model = Hmm::random(3, 5, &mut rng);
        model.validate().unwrap();
        assert_eq!(model.n_states(), 3);
        assert_eq!(model.n_obs(), 5);
    }

    #[test]
    fn sample_respects_length_and_ranges() {
        let model = two_state_model();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let (states, obs) = model.sample(25, &mut rng);
        assert_eq!(states.len(), 25);
        assert_eq!(obs.len(), 25);
        assert!(states.iter().all(|&z| z < 2));
        assert!(obs.iter().all(|&o| o < 2));
    }

    #[test]
    fn sample_from_deterministic_model() {
        // Degenerate model pinned to state 0 emitting symbol 1.
        let model = Hmm::new(
            arr2(&[[1.0, 0.0], [0.0, 1.0]]),
            arr2(&[[0.0, 1.0], [1.0, 0.0]]),
            array![1.0, 0.0],
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (states, obs) = model.sample(10, &mut rng);
        assert!(states.iter().all(|&z| z == 0));
        assert!(obs.iter().all(|&o| o == 1));
    }

    #[test]
    fn uniform_priors_have_matching_shapes() {
        let priors = Priors::uniform(3, 4, 0.5);
        assert_eq!(priors.trans_pseudo_counts.dim(), (3, 3));
        assert_eq!(priors.obs_pseudo_counts.dim(), (3, 4));
        assert_eq!(priors.init_pseudo_counts.len(), 3);
        assert_abs_diff_eq!(priors.trans_pseudo_counts[[0, 0]], 0.5);
    }
}
