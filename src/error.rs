//! Error taxonomy for the execution engine.
//!
//! Every variant aborts the scenario that raised it and nothing else.

use crate::validator::AssertionFailure;
use thiserror::Error;

/// Errors raised while executing a scenario.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A history position or list element index is outside the valid
    /// 1-based range.
    #[error("{what} position {position} out of range (1..={len})")]
    OutOfRange {
        what: &'static str,
        position: i64,
        len: usize,
    },

    #[error("response history is empty")]
    Empty,

    #[error("response at position {position} is not a list")]
    NotAList { position: usize },

    #[error("fixture '{0}' not found")]
    NotFound(String),

    /// A once-only fixture could not be created. The key stays poisoned
    /// for the rest of the run.
    #[error("fixture '{key}' creation failed: {reason}")]
    FixtureCreation { key: String, reason: String },

    #[error("unresolved reference '{reference}' in '{template}'")]
    UnresolvedReference { template: String, reference: String },

    #[error("field '{path}' missing while resolving '{template}'")]
    MissingField { template: String, path: String },

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
}

/// Failure reported by an [`HttpClient`](crate::client::HttpClient)
/// before any response was received.
#[derive(Debug, Clone, Error)]
#[error("{method} {path}: {message}")]
pub struct TransportError {
    pub method: String,
    pub path: String,
    pub message: String,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
