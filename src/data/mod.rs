//! Observation containers consumed by inference and training.

mod batch;

pub use batch::ObservationBatch;
