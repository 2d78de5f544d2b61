//! Error taxonomy for historical aggregation.
//!
//! Recoverable failures are folded into [`Diagnostic`] records on an
//! [`Outcome`]; only conditions the caller must act on are returned as `Err`.

use serde::Serialize;
use thiserror::Error;

use crate::types::Season;

/// Unified error type for the history subsystem.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Network or remote failure in a data provider.
    #[error("{provider} unavailable: {msg}")]
    ProviderUnavailable {
        /// Provider name reporting the failure.
        provider: String,
        /// Human-readable error message.
        msg: String,
    },

    /// Season, event or entity absent from a source.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. "2023 Monaco Grand Prix race".
        what: String,
    },

    /// A single fetch exceeded its advisory deadline.
    #[error("fetch timed out after {elapsed_ms}ms: {what}")]
    Timeout {
        /// What was being fetched.
        what: String,
        /// Wall-clock time the fetch actually took.
        elapsed_ms: u128,
    },

    /// External interruption received mid-scan.
    #[error("operation cancelled")]
    Cancelled,

    /// A cache artifact could not be read or written.
    #[error("persistence failure for {artifact}: {msg}")]
    Persistence {
        /// Artifact file name.
        artifact: String,
        /// Underlying IO or serialization error.
        msg: String,
    },

    /// A provider returned a payload that could not be interpreted.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Rejected configuration (season range, alias table, timeout).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Nothing was found for the request in any source.
    #[error("no data for {what}")]
    NoData {
        /// Description of the request, e.g. "driver XYZ".
        what: String,
    },
}

/// Copyable tag for a [`HistoryError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderUnavailable,
    NotFound,
    Timeout,
    Cancelled,
    PersistenceFailure,
    InvalidData,
    Config,
    NoData,
}

impl HistoryError {
    /// Helper to build a provider failure.
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            msg: msg.into(),
        }
    }

    /// Helper to build a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Helper to build a persistence error.
    pub fn persistence(artifact: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        Self::Persistence {
            artifact: artifact.into(),
            msg: msg.to_string(),
        }
    }

    /// Helper to build a no-data outcome.
    pub fn no_data(what: impl Into<String>) -> Self {
        Self::NoData { what: what.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Persistence { .. } => ErrorKind::PersistenceFailure,
            Self::InvalidData(_) => ErrorKind::InvalidData,
            Self::Config(_) => ErrorKind::Config,
            Self::NoData { .. } => ErrorKind::NoData,
        }
    }

    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Non-fatal failure recorded while building a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<Season>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn from_error(err: &HistoryError, season: Option<Season>, event: Option<&str>) -> Self {
        Self {
            kind: err.kind(),
            season,
            event: event.map(str::to_string),
            message: err.to_string(),
        }
    }
}

/// Best-effort result plus the non-fatal failures met while producing it.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
    /// Set when a cancellation cut the scan short; `value` holds what was gathered.
    pub interrupted: bool,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
            interrupted: false,
        }
    }

    pub fn with_diagnostics(value: T, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            value,
            diagnostics,
            interrupted: false,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            diagnostics: self.diagnostics,
            interrupted: self.interrupted,
        }
    }
}
