use thiserror::Error;

use crate::registry::{FacilityId, Pool};

/// Errors raised by the assignment core.
///
/// Only [`SynthError::FacilityFull`] is recoverable: it signals a lost race
/// between workers and is turned into a retry by the assignment loop.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("facility {facility} has no {pool} vacancy left")]
    FacilityFull { facility: FacilityId, pool: Pool },
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("allocation failure: {0}")]
    AllocationFailure(String),
}

impl SynthError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_capacity_race(&self) -> bool {
        matches!(self, Self::FacilityFull { .. })
    }
}

pub type Result<T, E = SynthError> = std::result::Result<T, E>;
