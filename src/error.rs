use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineError;
use crate::facts::FactError;

/// Fatal errors of a solve run.
///
/// Infeasible periods and expired budgets are not errors; they are reported
/// through [`SolveOutcome`](crate::engine::SolveOutcome).
#[derive(Error, Debug)]
pub enum SolveError {
    #[error("program error: {0}")]
    Program(String),
    #[error("value resolution failed: {0}")]
    ValueResolution(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SolveError>;

impl SolveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<EngineError> for SolveError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Syntax(_) | EngineError::Grounding(_) => Self::Program(e.to_string()),
            EngineError::Io { path, source } => Self::Io { path, source },
            EngineError::Unsupported(_) | EngineError::Failure(_) => Self::Engine(e.to_string()),
        }
    }
}

impl From<FactError> for SolveError {
    fn from(e: FactError) -> Self {
        Self::Program(e.to_string())
    }
}
