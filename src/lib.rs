//! Multi-season Formula 1 history.
//!
//! Aggregates per-driver, per-team and per-circuit results across seasons
//! from a [`source::SessionDataSource`], caching calendars, entity histories
//! and champions on disk so repeated queries do not hit the provider again.

pub mod config;
pub mod error;
pub mod history;
pub mod retry;
pub mod source;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use error::{Diagnostic, ErrorKind, HistoryError, Outcome, Result};
pub use history::{CancelToken, HistoricalDataManager};
pub use source::SessionDataSource;
