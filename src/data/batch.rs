//! Padded batches of variable-length observation sequences.

use crate::error::{HmmError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// A rectangular batch of discrete observation sequences.
///
/// Sequences are stored as symbol indices in an (n_sequences, max_len)
/// array; `valid_lengths[i]` gives the true length of row i. Entries at or
/// beyond a sequence's valid length are padding and never contribute to
/// likelihoods, expected counts, or decoded paths.
#[derive(Debug, Clone)]
pub struct ObservationBatch {
    observations: Array2<usize>,
    valid_lengths: Array1<usize>,
}

impl ObservationBatch {
    /// Create a batch, validating that every sequence has a length in
    /// `1..=max_len` and that there is one length per row.
    pub fn new(observations: Array2<usize>, valid_lengths: Array1<usize>) -> Result<Self> {
        if valid_lengths.len() != observations.nrows() {
            return Err(HmmError::InvalidInput(format!(
                "{} valid lengths for {} sequences",
                valid_lengths.len(),
                observations.nrows()
            )));
        }
        let max_len = observations.ncols();
        for (i, &len) in valid_lengths.iter().enumerate() {
            if len == 0 {
                return Err(HmmError::InvalidInput(format!("sequence {i} is empty")));
            }
            if len > max_len {
                return Err(HmmError::InvalidInput(format!(
                    "sequence {i} has valid length {len} > max_len {max_len}"
                )));
            }
        }
        Ok(Self {
            observations,
            valid_lengths,
        })
    }

    /// Build a batch from ragged sequences, padding with symbol 0 up to the
    /// longest sequence.
    pub fn from_sequences(sequences: &[Vec<usize>]) -> Result<Self> {
        if sequences.is_empty() {
            return Err(HmmError::InvalidInput("no sequences given".into()));
        }
        let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
        if max_len == 0 {
            return Err(HmmError::InvalidInput("all sequences are empty".into()));
        }
        let mut observations = Array2::zeros((sequences.len(), max_len));
        let mut valid_lengths = Array1::zeros(sequences.len());
        for (i, seq) in sequences.iter().enumerate() {
            if seq.is_empty() {
                return Err(HmmError::InvalidInput(format!("sequence {i} is empty")));
            }
            for (t, &symbol) in seq.iter().enumerate() {
                observations[[i, t]] = symbol;
            }
            valid_lengths[i] = seq.len();
        }
        Ok(Self {
            observations,
            valid_lengths,
        })
    }

    /// Number of sequences in the batch.
    pub fn n_sequences(&self) -> usize {
        self.observations.nrows()
    }

    /// Padded length shared by all rows.
    pub fn max_len(&self) -> usize {
        self.observations.ncols()
    }

    /// The padded observation array.
    pub fn observations(&self) -> &Array2<usize> {
        &self.observations
    }

    /// Valid length of each sequence.
    pub fn valid_lengths(&self) -> &Array1<usize> {
        &self.valid_lengths
    }

    /// Row view and valid length of one sequence.
    pub fn sequence(&self, i: usize) -> (ArrayView1<'_, usize>, usize) {
        (self.observations.row(i), self.valid_lengths[i])
    }

    /// Copy out the rows at `indices`, preserving their order. Used to carve
    /// minibatches out of a shuffled index permutation.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let observations = self.observations.select(Axis(0), indices);
        let valid_lengths = Array1::from_iter(indices.iter().map(|&i| self.valid_lengths[i]));
        Self {
            observations,
            valid_lengths,
        }
    }

    /// Verify that every symbol inside a valid prefix is below `n_obs`.
    /// Padding entries are not checked; they are never read.
    pub fn validate_symbols(&self, n_obs: usize) -> Result<()> {
        for (i, (row, &len)) in self
            .observations
            .rows()
            .into_iter()
            .zip(self.valid_lengths.iter())
            .enumerate()
        {
            for t in 0..len {
                if row[t] >= n_obs {
                    return Err(HmmError::InvalidInput(format!(
                        "observation[{i}][{t}] = {} out of range (n_obs = {n_obs})",
                        row[t]
                    )));
                }
            }
        }
        Ok(())
    }
}
