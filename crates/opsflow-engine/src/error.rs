//! Engine error types

use opsflow_core::DefinitionError;
use opsflow_state::StoreError;
use thiserror::Error;

/// Fatal engine errors
///
/// Step, prerequisite and lock failures are not errors; they are reported
/// through [`crate::ExecutionReport::failure`] with the operation row marked failed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Effector invocation errors
///
/// A non-zero exit status is not an error; it is returned as data.
#[derive(Error, Debug)]
pub enum EffectorError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}
