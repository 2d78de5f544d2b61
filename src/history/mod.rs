//! Historical multi-season aggregation.
//!
//! [`HistoricalDataManager`] is built once per process and owns the calendar
//! cache, the entity history store, the circuit aggregator and the season
//! comparator together with their persisted artifacts.

pub mod calendar;
pub mod circuit;
pub mod compare;
pub mod entity;
pub mod teams;

use chrono::{Local, NaiveDate};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{Diagnostic, Outcome, Result};
use crate::retry::RetryConfig;
use crate::source::SessionDataSource;
use crate::storage::ArtifactStore;
use crate::types::{CalendarEntry, CircuitHistory, DriverHistory, Season, TeamHistory};

pub use calendar::CalendarCache;
pub use circuit::CircuitHistoryAggregator;
pub use compare::{
    Champion, ChampionPair, ChampionsComparison, DriverComparison, SeasonComparator,
    TeamComparison,
};
pub use entity::EntityHistoryStore;
pub use teams::TeamAliasTable;

/// Cooperative cancellation flag shared between a scan and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the token for the next scan
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Long-lived owner of every history component.
pub struct HistoricalDataManager {
    seasons: Vec<Season>,
    source: Arc<dyn SessionDataSource>,
    store: ArtifactStore,
    retry: RetryConfig,
    calendars: CalendarCache,
    entities: EntityHistoryStore,
    circuits: CircuitHistoryAggregator,
    comparator: SeasonComparator,
    cancel: CancelToken,
    today: NaiveDate,
}

impl HistoricalDataManager {
    /// Validate `config`, build the components and load the calendar snapshot.
    pub fn open(config: &AppConfig, source: Arc<dyn SessionDataSource>) -> Result<Self> {
        config.validate()?;
        let teams = TeamAliasTable::with_config(&config.teams.aliases)?;
        let seasons = config.history.seasons();
        let store = ArtifactStore::new(&config.history.cache_dir);
        let retry = RetryConfig::from(&config.retry);
        let timeout = config.history.fetch_timeout();

        let mut calendars = CalendarCache::new(
            Arc::clone(&source),
            store.clone(),
            seasons.clone(),
            retry.clone(),
        );
        let mut diagnostics = Vec::new();
        calendars.load(&mut diagnostics);

        info!(
            "History manager ready: seasons {:?}, cache {}, provider {}",
            seasons,
            store.base_dir().display(),
            source.name()
        );

        Ok(Self {
            entities: EntityHistoryStore::new(
                Arc::clone(&source),
                store.clone(),
                teams,
                seasons.clone(),
                timeout,
            ),
            circuits: CircuitHistoryAggregator::new(Arc::clone(&source), seasons.clone(), timeout),
            comparator: SeasonComparator::new(Arc::clone(&source), store.clone(), retry.clone()),
            calendars,
            seasons,
            source,
            store,
            retry,
            cancel: CancelToken::new(),
            today: Local::now().date_naive(),
        })
    }

    pub fn seasons(&self) -> &[Season] {
        &self.seasons
    }

    /// Token that interrupts any running scan when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Override the date used to decide whether a season is finished.
    pub fn set_today(&mut self, today: NaiveDate) {
        self.today = today;
    }

    pub fn teams(&self) -> &TeamAliasTable {
        self.entities.teams()
    }

    pub fn calendar(&mut self, season: Season) -> Outcome<Vec<CalendarEntry>> {
        let mut diagnostics = Vec::new();
        let calendar = self
            .calendars
            .calendar(season, &self.cancel, &mut diagnostics)
            .to_vec();
        Outcome::with_diagnostics(calendar, diagnostics)
    }

    pub fn all_calendars(&mut self) -> Outcome<BTreeMap<Season, Vec<CalendarEntry>>> {
        let mut diagnostics = Vec::new();
        let calendars = self
            .calendars
            .all_calendars(&self.cancel, &mut diagnostics)
            .clone();
        Outcome::with_diagnostics(calendars, diagnostics)
    }

    pub fn refresh_calendar(&mut self, season: Season) -> Outcome<Vec<CalendarEntry>> {
        let mut diagnostics = Vec::new();
        let calendar = self
            .calendars
            .refresh_season(season, &self.cancel, &mut diagnostics)
            .to_vec();
        Outcome::with_diagnostics(calendar, diagnostics)
    }

    pub fn driver_history(
        &mut self,
        driver_code: &str,
        events: Option<&HashSet<String>>,
    ) -> Result<Outcome<DriverHistory>> {
        self.entities
            .driver_history(driver_code, events, &mut self.calendars, &self.cancel)
    }

    pub fn team_history(
        &mut self,
        team_name: &str,
        events: Option<&HashSet<String>>,
    ) -> Result<Outcome<TeamHistory>> {
        self.entities
            .team_history(team_name, events, &mut self.calendars, &self.cancel)
    }

    pub fn refresh_driver_history(&mut self, driver_code: &str) -> Result<Outcome<DriverHistory>> {
        self.entities
            .refresh_driver_history(driver_code, &mut self.calendars, &self.cancel)
    }

    pub fn refresh_team_history(&mut self, team_name: &str) -> Result<Outcome<TeamHistory>> {
        self.entities
            .refresh_team_history(team_name, &mut self.calendars, &self.cancel)
    }

    pub fn circuit_history(&mut self, event_name: &str) -> Result<Outcome<CircuitHistory>> {
        self.circuits.circuit_history(
            event_name,
            &mut self.calendars,
            self.entities.teams(),
            &self.cancel,
        )
    }

    /// Compare a driver's seasons; an empty `seasons` means every tracked season.
    pub fn compare_driver(
        &mut self,
        driver_code: &str,
        seasons: &[Season],
    ) -> Result<Outcome<DriverComparison>> {
        let seasons = self.requested(seasons);
        Ok(self
            .driver_history(driver_code, None)?
            .map(|history| SeasonComparator::compare_driver(&history, &seasons)))
    }

    pub fn compare_team(
        &mut self,
        team_name: &str,
        seasons: &[Season],
    ) -> Result<Outcome<TeamComparison>> {
        let seasons = self.requested(seasons);
        Ok(self
            .team_history(team_name, None)?
            .map(|history| SeasonComparator::compare_team(&history, &seasons)))
    }

    pub fn compare_champions(&mut self, seasons: &[Season]) -> Outcome<ChampionsComparison> {
        let seasons = self.requested(seasons);
        self.comparator.compare_champions(
            &seasons,
            &mut self.calendars,
            self.entities.teams(),
            self.today,
            &self.cancel,
        )
    }

    fn requested(&self, seasons: &[Season]) -> Vec<Season> {
        if seasons.is_empty() {
            self.seasons.clone()
        } else {
            seasons.to_vec()
        }
    }

    /// Rewrite the calendar snapshot and retry entity writes that failed.
    pub fn flush(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if let Err(e) = self.calendars.save() {
            warn!("Failed to save calendars to cache: {}", e);
            diagnostics.push(Diagnostic::from_error(&e, None, None));
        }
        diagnostics.extend(self.entities.flush());
        diagnostics
    }

    /// Delete every persisted artifact and forget everything held in memory.
    pub fn clear_cache(&mut self) -> Result<()> {
        let removed = self.store.clear_all()?;
        self.calendars = CalendarCache::new(
            Arc::clone(&self.source),
            self.store.clone(),
            self.seasons.clone(),
            self.retry.clone(),
        );
        self.entities.clear_memory();
        self.comparator.clear_memory();
        info!(
            "Cleared {} artifacts from {}",
            removed,
            self.store.base_dir().display()
        );
        Ok(())
    }
}
