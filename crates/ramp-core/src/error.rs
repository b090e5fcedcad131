use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RampError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("io error: {0}")]
    Io(String),
}

impl RampError {
    /// True when the failure is not attributable to the model: the run must
    /// not be recorded and is retried on the next invocation.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Engine(EngineError::Unreachable(_)))
    }
}

pub type RampResult<T> = Result<T, RampError>;

/// Failures reported by an inference session client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("inference engine unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("engine rejected request: {0}")]
    Rejected(String),

    #[error("malformed engine response: {0}")]
    Protocol(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
