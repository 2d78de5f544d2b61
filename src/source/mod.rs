//! Upstream data providers.
//!
//! The history subsystem only sees providers through [`SessionDataSource`]:
//! event schedules, race classifications and championship standings.

pub mod fixture;
#[cfg(any(test, feature = "mock"))]
pub mod memory;

pub use fixture::FixtureSource;
#[cfg(any(test, feature = "mock"))]
pub use memory::InMemorySource;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{HistoryError, Result};
use crate::types::{RaceResult, Season};

/// Raw schedule row as published by a provider.
///
/// Dates are left as provider strings; the calendar cache normalizes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub round: u32,
    pub event_name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub event_date: Option<String>,
    /// Session code (FP1, Q, R, ...) to raw start
    #[serde(default)]
    pub sessions: BTreeMap<String, RawSessionTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSessionTime {
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
}

/// One classified driver in a race session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub driver_code: String,
    #[serde(default)]
    pub driver_name: String,
    pub team_name: String,
    pub position: Option<u32>,
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub grid_position: Option<u32>,
    #[serde(default)]
    pub laps_completed: Option<u32>,
}

impl ResultRow {
    /// Points scored; missing, negative or non-finite values count as 0.
    pub fn awarded_points(&self) -> f64 {
        self.points
            .filter(|p| p.is_finite() && *p >= 0.0)
            .unwrap_or(0.0)
    }

    /// Grid slot 0 is a pit-lane start, not a qualifying position.
    pub fn grid_slot(&self) -> Option<u32> {
        self.grid_position.filter(|g| *g > 0)
    }

    pub fn race_result(&self) -> RaceResult {
        RaceResult {
            position: self.position,
            points: self.awarded_points(),
            status: self.status.clone(),
            grid_position: self.grid_slot(),
            laps_completed: self.laps_completed.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandingsKind {
    Driver,
    Constructor,
}

impl StandingsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StandingsKind::Driver => "driver",
            StandingsKind::Constructor => "constructor",
        }
    }
}

/// One row of a championship table, ordered by rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingRow {
    pub name: String,
    #[serde(default)]
    pub identifier: Option<String>,
    pub points: f64,
}

/// Provider of schedules, race results and standings.
///
/// Calls block; implementations report failures with the [`HistoryError`]
/// taxonomy so callers can tell a skippable miss from a provider outage.
pub trait SessionDataSource: Send + Sync {
    /// Provider name used in log lines and diagnostics.
    fn name(&self) -> &str;

    fn fetch_event_schedule(&self, season: Season) -> Result<Vec<ScheduleRow>>;

    fn fetch_race_results(&self, season: Season, event_name: &str) -> Result<Vec<ResultRow>>;

    fn fetch_season_standings(&self, season: Season, kind: StandingsKind)
        -> Result<Vec<StandingRow>>;
}

/// Run a blocking fetch and reject it if it overran `timeout`.
///
/// The deadline is advisory: the call is never preempted, its result is just
/// discarded once it comes back too late.
pub fn fetch_with_deadline<T>(
    timeout: Duration,
    what: &str,
    fetch: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let started = Instant::now();
    let result = fetch();
    let elapsed = started.elapsed();
    if elapsed > timeout {
        debug!("{} took {:?} (limit {:?})", what, elapsed, timeout);
        return Err(HistoryError::Timeout {
            what: what.to_string(),
            elapsed_ms: elapsed.as_millis(),
        });
    }
    result
}
