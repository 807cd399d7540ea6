//! Viterbi decoding of the most probable state path.

use crate::error::{HmmError, Result};
use crate::models::Hmm;
use crate::utils::math::argmax;
use ndarray::{Array2, ArrayView1};

/// Floor added before taking logs so zero probabilities become very negative
/// instead of -inf.
const LOG_FLOOR: f64 = 1e-300;

/// Decode the single most probable state sequence for the valid prefix of
/// an observation sequence.
///
/// Runs the max-sum recursion in log space, carrying for each state the
/// best log-probability of any path ending there plus a backpointer to the
/// argmax predecessor, then reconstructs the path from the best terminal
/// state. Ties resolve to the first-encountered maximum. The returned path
/// has one state per valid observation (`length` entries).
///
/// # Errors
///
/// Returns an error for a zero valid length, a valid length longer than the
/// sequence, or an out-of-range symbol inside the valid prefix.
pub fn viterbi_decode(
    model: &Hmm,
    obs_seq: ArrayView1<usize>,
    length: usize,
) -> Result<Vec<usize>> {
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
    let n_states = model.n_states();
    let n_obs = model.n_obs();
    for t in 0..length {
        if obs_seq[t] >= n_obs {
            return Err(HmmError::InvalidInput(format!(
                "observation[{t}] = {} out of range (n_obs = {n_obs})",
                obs_seq[t]
            )));
        }
    }

    let log_trans = model.trans_mat.mapv(|p| (p + LOG_FLOOR).ln());
    let log_obs = model.obs_mat.mapv(|p| (p + LOG_FLOOR).ln());
    let log_init = model.init_dist.mapv(|p| (p + LOG_FLOOR).ln());

    let first = &log_init + &log_obs.column(obs_seq[0]);

    // Single-observation sequences need no recursion.
    if length == 1 {
        return Ok(vec![argmax(first.view())]);
    }

    let mut delta = Array2::zeros((length, n_states));
    let mut backpointers = Array2::<usize>::zeros((length, n_states));
    delta.row_mut(0).assign(&first);

    for t in 1..length {
        let symbol = obs_seq[t];
        for j in 0..n_states {
            let mut best_val = f64::NEG_INFINITY;
            let mut best_state = 0;
            for i in 0..n_states {
                let v = delta[[t - 1, i]] + log_trans[[i, j]];
                if v > best_val {
                    best_val = v;
                    best_state = i;
                }
            }
            delta[[t, j]] = best_val + log_obs[[j, symbol]];
            backpointers[[t, j]] = best_state;
        }
    }

    let mut path = vec![0usize; length];
    path[length - 1] = argmax(delta.row(length - 1));
    for t in (0..length - 1).rev() {
        path[t] = backpointers[[t + 1, path[t + 1]]];
    }

    Ok(path)
}
