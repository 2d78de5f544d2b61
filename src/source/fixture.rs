//! Offline provider reading JSON dumps from disk.
//!
//! Layout:
//! - `<dir>/<season>/schedule.json`: `[ScheduleRow]`
//! - `<dir>/<season>/results/<Event_Name>.json`: `[ResultRow]`
//! - `<dir>/<season>/standings_driver.json`, `standings_constructor.json`: `[StandingRow]`

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ResultRow, ScheduleRow, SessionDataSource, StandingRow, StandingsKind};
use crate::error::{HistoryError, Result};
use crate::storage::artifact_slug;
use crate::types::Season;

/// Directory-backed [`SessionDataSource`].
pub struct FixtureSource {
    base_dir: PathBuf,
}

impl FixtureSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn season_dir(&self, season: Season) -> PathBuf {
        self.base_dir.join(season.to_string())
    }

    fn schedule_path(&self, season: Season) -> PathBuf {
        self.season_dir(season).join("schedule.json")
    }

    fn results_path(&self, season: Season, event_name: &str) -> PathBuf {
        self.season_dir(season)
            .join("results")
            .join(format!("{}.json", artifact_slug(event_name)))
    }

    fn standings_path(&self, season: Season, kind: StandingsKind) -> PathBuf {
        self.season_dir(season)
            .join(format!("standings_{}.json", kind.as_str()))
    }

    fn read<T: DeserializeOwned>(&self, path: &Path, what: String) -> Result<T> {
        if !path.exists() {
            return Err(HistoryError::not_found(what));
        }
        debug!("Reading fixture {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| HistoryError::provider(self.name(), format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| HistoryError::InvalidData(format!("{}: {}", path.display(), e)))
    }
}

impl SessionDataSource for FixtureSource {
    fn name(&self) -> &str {
        "fixtures"
    }

    fn fetch_event_schedule(&self, season: Season) -> Result<Vec<ScheduleRow>> {
        self.read(&self.schedule_path(season), format!("{} event schedule", season))
    }

    fn fetch_race_results(&self, season: Season, event_name: &str) -> Result<Vec<ResultRow>> {
        self.read(
            &self.results_path(season, event_name),
            format!("{} {} race", season, event_name),
        )
    }

    fn fetch_season_standings(
        &self,
        season: Season,
        kind: StandingsKind,
    ) -> Result<Vec<StandingRow>> {
        self.read(
            &self.standings_path(season, kind),
            format!("{} {} standings", season, kind.as_str()),
        )
    }
}
