//! Per-driver and per-team history across the tracked seasons.
//!
//! Histories are built by scanning season calendars event by event, merged
//! into persisted records and written back at season checkpoints.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::calendar::CalendarCache;
use super::teams::TeamAliasTable;
use super::CancelToken;
use crate::error::{Diagnostic, HistoryError, Outcome, Result};
use crate::source::{fetch_with_deadline, ResultRow, SessionDataSource};
use crate::storage::{ArtifactKey, ArtifactStore};
use crate::types::{
    DriverHistory, EntityHistory, RaceEntry, RaceResult, RaceTally, Season, SeasonRecord,
    TeamDriverResult, TeamHistory, TeamRaceResult,
};

/// Event-name filter; `None` means the full calendar.
pub type EventFilter<'a> = Option<&'a HashSet<String>>;

#[derive(Default)]
struct Memo {
    drivers: HashMap<String, DriverHistory>,
    teams: HashMap<String, TeamHistory>,
}

/// What a history is about and how to pick its result out of a race.
trait Subject {
    type Race: RaceTally + Clone + Serialize + DeserializeOwned;

    fn id(&self) -> &str;

    fn key(&self) -> ArtifactKey;

    fn extract(&self, rows: &[ResultRow], teams: &TeamAliasTable) -> Option<Self::Race>;

    fn memo(memo: &mut Memo) -> &mut HashMap<String, EntityHistory<Self::Race>>;
}

struct DriverSubject {
    code: String,
}

struct TeamSubject {
    name: String,
}

impl Subject for DriverSubject {
    type Race = RaceResult;

    fn id(&self) -> &str {
        &self.code
    }

    fn key(&self) -> ArtifactKey {
        ArtifactKey::Driver(self.code.clone())
    }

    fn extract(&self, rows: &[ResultRow], _teams: &TeamAliasTable) -> Option<RaceResult> {
        let row = rows
            .iter()
            .find(|r| r.driver_code.trim().eq_ignore_ascii_case(&self.code))?;
        Some(row.race_result())
    }

    fn memo(memo: &mut Memo) -> &mut HashMap<String, DriverHistory> {
        &mut memo.drivers
    }
}

impl Subject for TeamSubject {
    type Race = TeamRaceResult;

    fn id(&self) -> &str {
        &self.name
    }

    fn key(&self) -> ArtifactKey {
        ArtifactKey::Team(self.name.clone())
    }

    fn extract(&self, rows: &[ResultRow], teams: &TeamAliasTable) -> Option<TeamRaceResult> {
        let results: Vec<TeamDriverResult> = rows
            .iter()
            .filter(|r| teams.matches(&self.name, &r.team_name))
            .map(|r| TeamDriverResult {
                driver_code: r.driver_code.trim().to_uppercase(),
                position: r.position,
                points: r.awarded_points(),
                status: r.status.clone(),
            })
            .collect();
        if results.is_empty() {
            return None;
        }
        Some(TeamRaceResult::new(results))
    }

    fn memo(memo: &mut Memo) -> &mut HashMap<String, TeamHistory> {
        &mut memo.teams
    }
}

struct Scan<R> {
    history: EntityHistory<R>,
    interrupted: bool,
    /// Outcome of the last write attempt, `None` when nothing was written
    saved: Option<bool>,
}

/// Owner of every persisted entity history.
pub struct EntityHistoryStore {
    source: Arc<dyn SessionDataSource>,
    store: ArtifactStore,
    teams: TeamAliasTable,
    seasons: Vec<Season>,
    fetch_timeout: Duration,
    memo: Memo,
    /// Histories whose last checkpoint write failed
    dirty: HashSet<ArtifactKey>,
}

impl EntityHistoryStore {
    pub fn new(
        source: Arc<dyn SessionDataSource>,
        store: ArtifactStore,
        teams: TeamAliasTable,
        seasons: Vec<Season>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            store,
            teams,
            seasons,
            fetch_timeout,
            memo: Memo::default(),
            dirty: HashSet::new(),
        }
    }

    pub fn teams(&self) -> &TeamAliasTable {
        &self.teams
    }

    pub fn canonical_driver(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn canonical_team(&self, name: &str) -> String {
        self.teams.canonicalize(name)
    }

    /// Driver history for `code`.
    ///
    /// An unfiltered request is served from the persisted record when one
    /// exists. A filtered request merges the requested events into a copy of
    /// the persisted record and returns that view without persisting it.
    pub fn driver_history(
        &mut self,
        code: &str,
        filter: EventFilter<'_>,
        calendars: &mut CalendarCache,
        cancel: &CancelToken,
    ) -> Result<Outcome<DriverHistory>> {
        let subject = DriverSubject {
            code: Self::canonical_driver(code),
        };
        self.resolve(&subject, filter, false, calendars, cancel)
    }

    /// Team history for `name`, aggregating every driver of the team per race.
    pub fn team_history(
        &mut self,
        name: &str,
        filter: EventFilter<'_>,
        calendars: &mut CalendarCache,
        cancel: &CancelToken,
    ) -> Result<Outcome<TeamHistory>> {
        let subject = TeamSubject {
            name: self.canonical_team(name),
        };
        self.resolve(&subject, filter, false, calendars, cancel)
    }

    /// Scan past the persisted driver record, merging only events it lacks.
    pub fn refresh_driver_history(
        &mut self,
        code: &str,
        calendars: &mut CalendarCache,
        cancel: &CancelToken,
    ) -> Result<Outcome<DriverHistory>> {
        let subject = DriverSubject {
            code: Self::canonical_driver(code),
        };
        self.resolve(&subject, None, true, calendars, cancel)
    }

    /// Scan past the persisted team record, merging only events it lacks.
    pub fn refresh_team_history(
        &mut self,
        name: &str,
        calendars: &mut CalendarCache,
        cancel: &CancelToken,
    ) -> Result<Outcome<TeamHistory>> {
        let subject = TeamSubject {
            name: self.canonical_team(name),
        };
        self.resolve(&subject, None, true, calendars, cancel)
    }

    fn resolve<S: Subject>(
        &mut self,
        subject: &S,
        filter: EventFilter<'_>,
        refresh: bool,
        calendars: &mut CalendarCache,
        cancel: &CancelToken,
    ) -> Result<Outcome<EntityHistory<S::Race>>> {
        let mut diagnostics = Vec::new();
        let filter = filter.filter(|f| !f.is_empty());

        let base = match self.cached(subject, &mut diagnostics) {
            Some(history) if !refresh && filter.is_none() => {
                debug!("Serving cached history for {}", subject.id());
                return Ok(Outcome::with_diagnostics(history, diagnostics));
            }
            Some(history) => history,
            None => EntityHistory::new(subject.id()),
        };

        info!(
            "Retrieving history for {} across {:?}",
            subject.id(),
            self.seasons
        );
        let scan = self.scan(subject, base, filter, calendars, cancel, &mut diagnostics);

        if scan.history.is_empty() && !scan.interrupted {
            warn!("No data found for {}", subject.id());
            return Err(HistoryError::no_data(subject.id()));
        }

        if filter.is_none() {
            let key = subject.key();
            match scan.saved {
                Some(true) => {
                    self.dirty.remove(&key);
                }
                Some(false) => {
                    self.dirty.insert(key);
                }
                None => {}
            }
            if !scan.history.is_empty() {
                S::memo(&mut self.memo).insert(subject.id().to_string(), scan.history.clone());
            }
        }

        let mut outcome = Outcome::with_diagnostics(scan.history, diagnostics);
        outcome.interrupted = scan.interrupted;
        Ok(outcome)
    }

    /// In-memory record, else the persisted one. Corrupt artifacts are misses.
    fn cached<S: Subject>(
        &mut self,
        subject: &S,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<EntityHistory<S::Race>> {
        if let Some(history) = S::memo(&mut self.memo).get(subject.id()) {
            return Some(history.clone());
        }

        match self.store.load::<EntityHistory<S::Race>>(&subject.key()) {
            Ok(Some(mut history)) => {
                history.normalize();
                info!("Loaded cached history for {}", subject.id());
                S::memo(&mut self.memo).insert(subject.id().to_string(), history.clone());
                Some(history)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load cached data for {}: {}", subject.id(), e);
                diagnostics.push(Diagnostic::from_error(&e, None, None));
                None
            }
        }
    }

    fn fetch_race(&self, season: Season, event_name: &str) -> Result<Vec<ResultRow>> {
        let what = format!("{} {} race", season, event_name);
        fetch_with_deadline(self.fetch_timeout, &what, || {
            self.source.fetch_race_results(season, event_name)
        })
    }

    fn persist<R: Serialize>(
        &self,
        key: &ArtifactKey,
        history: &EntityHistory<R>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> bool {
        match self.store.save(key, history) {
            Ok(()) => {
                info!("Saved history for {} to cache", history.entity_id);
                true
            }
            Err(e) => {
                warn!("Failed to save history for {}: {}", history.entity_id, e);
                diagnostics.push(Diagnostic::from_error(&e, None, None));
                false
            }
        }
    }

    /// Walk seasons and events in round order, merging unseen races.
    ///
    /// Statistics are recomputed and, for unfiltered scans, the record is
    /// persisted at the end of each season and when the scan is interrupted.
    /// A record still waiting on an earlier failed write is saved at the end
    /// even when nothing new was merged.
    fn scan<S: Subject>(
        &self,
        subject: &S,
        mut history: EntityHistory<S::Race>,
        filter: EventFilter<'_>,
        calendars: &mut CalendarCache,
        cancel: &CancelToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Scan<S::Race> {
        calendars.all_calendars(cancel, diagnostics);

        let key = subject.key();
        let mut interrupted = false;
        let mut saved = None;

        for &season in &self.seasons {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let events = calendars.calendar(season, cancel, diagnostics).to_vec();
            if events.is_empty() {
                debug!("No calendar for {}, skipping season", season);
                continue;
            }

            let mut record = history
                .seasons
                .remove(&season)
                .unwrap_or_else(|| SeasonRecord::new(season));
            let mut merged = 0usize;

            for (idx, event) in events.iter().enumerate() {
                let name = event.event_name.as_str();
                if filter.is_some_and(|wanted| !wanted.contains(name))
                    || record.contains_event(name)
                {
                    continue;
                }
                if cancel.is_cancelled() {
                    warn!("Scan for {} interrupted at {} {}", subject.id(), season, name);
                    interrupted = true;
                    break;
                }

                debug!(
                    "Processing: {} {} ({}/{} events)",
                    season,
                    name,
                    idx + 1,
                    events.len()
                );

                match self.fetch_race(season, name) {
                    Ok(rows) => match subject.extract(&rows, &self.teams) {
                        Some(result) => {
                            if record.merge(RaceEntry {
                                event: event.event_ref(),
                                result,
                            }) {
                                merged += 1;
                                info!("Added {} {} data for {}", season, name, subject.id());
                            }
                        }
                        None => {
                            debug!("{} did not participate in {} {}", subject.id(), season, name);
                        }
                    },
                    Err(HistoryError::Cancelled) => {
                        warn!("Scan for {} interrupted at {} {}", subject.id(), season, name);
                        interrupted = true;
                        break;
                    }
                    Err(e) => {
                        warn!("Could not load data for {} {}: {}", season, name, e);
                        diagnostics.push(Diagnostic::from_error(&e, Some(season), Some(name)));
                    }
                }
            }

            // Season checkpoint
            record.recompute_statistics();
            if !record.is_empty() {
                history.seasons.insert(season, record);
            }
            if filter.is_none() && merged > 0 {
                saved = Some(self.persist(&key, &history, diagnostics));
            }

            if interrupted {
                break;
            }
        }

        if filter.is_none()
            && saved != Some(true)
            && self.dirty.contains(&key)
            && !history.is_empty()
        {
            saved = Some(self.persist(&key, &history, diagnostics));
        }

        Scan {
            history,
            interrupted,
            saved,
        }
    }

    /// Retry writes that failed at an earlier checkpoint.
    pub fn flush(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let pending: Vec<ArtifactKey> = self.dirty.iter().cloned().collect();
        for key in pending {
            let saved = match &key {
                ArtifactKey::Driver(code) => self
                    .memo
                    .drivers
                    .get(code)
                    .map(|h| self.persist(&key, h, &mut diagnostics)),
                ArtifactKey::Team(name) => self
                    .memo
                    .teams
                    .get(name)
                    .map(|h| self.persist(&key, h, &mut diagnostics)),
                _ => None,
            };
            if saved != Some(false) {
                self.dirty.remove(&key);
            }
        }
        diagnostics
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Drop in-memory records so the next request re-reads the store.
    pub fn clear_memory(&mut self) {
        self.memo = Memo::default();
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::retry::RetryConfig;
    use crate::source::memory::{result_row, schedule_row};
    use crate::source::InMemorySource;

    struct Fixture {
        source: Arc<InMemorySource>,
        calendars: CalendarCache,
        store: EntityHistoryStore,
        artifacts: ArtifactStore,
    }

    fn fixture(source: InMemorySource, dir: &std::path::Path, seasons: Vec<Season>) -> Fixture {
        fixture_with_timeout(source, dir, seasons, Duration::from_secs(30))
    }

    fn fixture_with_timeout(
        source: InMemorySource,
        dir: &std::path::Path,
        seasons: Vec<Season>,
        timeout: Duration,
    ) -> Fixture {
        let source = Arc::new(source);
        let artifacts = ArtifactStore::new(dir);
        let calendars = CalendarCache::new(
            source.clone(),
            artifacts.clone(),
            seasons.clone(),
            RetryConfig::none(),
        );
        let store = EntityHistoryStore::new(
            source.clone(),
            artifacts.clone(),
            TeamAliasTable::builtin(),
            seasons,
            timeout,
        );
        Fixture {
            source,
            calendars,
            store,
            artifacts,
        }
    }

    /// 2021: two races, 2022: one race, 2023: schedule unavailable
    fn three_season_source() -> InMemorySource {
        InMemorySource::new()
            .with_schedule(
                2021,
                vec![
                    schedule_row(1, "Bahrain Grand Prix", "2021-03-28"),
                    schedule_row(2, "Emilia Romagna Grand Prix", "2021-04-18"),
                ],
            )
            .with_schedule(2022, vec![schedule_row(1, "Bahrain Grand Prix", "2022-03-20")])
            .failing_schedule(2023)
            .with_results(
                2021,
                "Bahrain Grand Prix",
                vec![
                    result_row("VER", "Red Bull Racing Honda", Some(1), 25.0, Some(1)),
                    result_row("HAM", "Mercedes", Some(2), 18.0, Some(2)),
                ],
            )
            .with_results(
                2021,
                "Emilia Romagna Grand Prix",
                vec![
                    result_row("HAM", "Mercedes", Some(1), 25.0, Some(1)),
                    result_row("VER", "Red Bull Racing Honda", Some(3), 15.0, Some(3)),
                ],
            )
            .with_results(
                2022,
                "Bahrain Grand Prix",
                vec![
                    result_row("VER", "Red Bull Racing", Some(1), 25.0, Some(2)),
                    result_row("PER", "Red Bull Racing", None, 0.0, Some(4)),
                ],
            )
    }

    #[test]
    fn test_driver_history_across_seasons() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022, 2023]);
        let cancel = CancelToken::new();

        let outcome = f
            .store
            .driver_history("ver", None, &mut f.calendars, &cancel)
            .unwrap();
        let history = &outcome.value;

        assert_eq!(history.entity_id, "VER");
        assert_eq!(history.season(2021).unwrap().statistics().points, 40.0);
        assert_eq!(history.season(2021).unwrap().statistics().wins, 1);
        assert_eq!(history.season(2021).unwrap().statistics().podiums, 2);
        assert_eq!(history.season(2022).unwrap().statistics().points, 25.0);
        assert!(history.season(2023).is_none());
        assert!(outcome.has_kind(ErrorKind::ProviderUnavailable));
        assert!(!outcome.interrupted);
        assert!(f.artifacts.exists(&ArtifactKey::Driver("VER".into())));
    }

    #[test]
    fn test_second_call_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022, 2023]);
        let cancel = CancelToken::new();

        let first = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        let fetches = f.source.race_fetches();
        let second = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();

        assert_eq!(f.source.race_fetches(), fetches);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_persisted_record_reused_by_new_process() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let first = {
            let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022, 2023]);
            f.store
                .driver_history("VER", None, &mut f.calendars, &cancel)
                .unwrap()
                .into_inner()
        };

        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022, 2023]);
        let second = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(f.source.race_fetches(), 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_refresh_merges_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022, 2023]);
        let cancel = CancelToken::new();
        f.store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        let fetches = f.source.race_fetches();

        let refreshed = f
            .store
            .refresh_driver_history("VER", &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(refreshed.season(2021).unwrap().races().len(), 2);
        assert_eq!(refreshed.season(2022).unwrap().races().len(), 1);
        // No known event was fetched again
        assert_eq!(f.source.race_fetches(), fetches);
    }

    #[test]
    fn test_refresh_picks_up_new_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022]);
        let cancel = CancelToken::new();
        f.store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();

        f.source.set_schedule(
            2022,
            vec![
                schedule_row(1, "Bahrain Grand Prix", "2022-03-20"),
                schedule_row(2, "Saudi Arabian Grand Prix", "2022-03-27"),
            ],
        );
        f.source.set_results(
            2022,
            "Saudi Arabian Grand Prix",
            vec![result_row("VER", "Red Bull Racing", Some(1), 25.0, Some(4))],
        );
        f.calendars
            .refresh_season(2022, &cancel, &mut Vec::new());

        let refreshed = f
            .store
            .refresh_driver_history("VER", &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        let season = refreshed.season(2022).unwrap();
        assert_eq!(season.races().len(), 2);
        assert_eq!(season.statistics().points, 50.0);
        assert_eq!(season.statistics().wins, 2);
    }

    #[test]
    fn test_filtered_query_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022, 2023]);
        let cancel = CancelToken::new();
        let filter: HashSet<String> = ["Emilia Romagna Grand Prix".to_string()].into();

        let filtered = f
            .store
            .driver_history("VER", Some(&filter), &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(filtered.race_count(), 1);
        assert!(!f.artifacts.exists(&ArtifactKey::Driver("VER".into())));

        let full = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(full.race_count(), 3);
    }

    #[test]
    fn test_filtered_query_extends_persisted_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022]);
        let cancel = CancelToken::new();
        f.store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();

        f.source.set_schedule(
            2022,
            vec![
                schedule_row(1, "Bahrain Grand Prix", "2022-03-20"),
                schedule_row(2, "Saudi Arabian Grand Prix", "2022-03-27"),
            ],
        );
        f.source.set_results(
            2022,
            "Saudi Arabian Grand Prix",
            vec![result_row("VER", "Red Bull Racing", Some(1), 25.0, Some(4))],
        );
        f.calendars
            .refresh_season(2022, &cancel, &mut Vec::new());
        let fetches = f.source.race_fetches();

        let filter: HashSet<String> = [
            "Bahrain Grand Prix".to_string(),
            "Saudi Arabian Grand Prix".to_string(),
        ]
        .into();
        let filtered = f
            .store
            .driver_history("VER", Some(&filter), &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        // Persisted races are kept and only the missing event is fetched
        assert_eq!(filtered.race_count(), 4);
        assert!(filtered.season(2021).unwrap().contains_event("Emilia Romagna Grand Prix"));
        assert_eq!(filtered.season(2022).unwrap().statistics().points, 50.0);
        assert_eq!(f.source.race_fetches(), fetches + 1);

        let persisted: DriverHistory = f
            .artifacts
            .load(&ArtifactKey::Driver("VER".into()))
            .unwrap()
            .unwrap();
        assert_eq!(persisted.race_count(), 3);
        let full = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(full.race_count(), 3);
    }

    #[test]
    fn test_interrupted_scan_persists_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let source = three_season_source().cancel_after(1, cancel.clone());
        let mut f = fixture(source, dir.path(), vec![2021, 2022, 2023]);

        let outcome = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.value.race_count(), 1);

        let persisted: DriverHistory = f
            .artifacts
            .load(&ArtifactKey::Driver("VER".into()))
            .unwrap()
            .unwrap();
        let season = persisted.season(2021).unwrap();
        assert_eq!(season.races().len(), 1);
        assert_eq!(season.races()[0].event.event_name, "Bahrain Grand Prix");
        assert_eq!(season.statistics().points, 25.0);
        assert_eq!(season.statistics().wins, 1);
        assert!(persisted.season(2022).is_none());
    }

    #[test]
    fn test_resume_after_interruption() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let source = three_season_source().cancel_after(1, cancel.clone());
        let mut f = fixture(source, dir.path(), vec![2021, 2022]);
        f.store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();

        cancel.reset();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022]);
        let resumed = f
            .store
            .refresh_driver_history("VER", &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(resumed.race_count(), 3);
        // Only the two events missing from the partial record were fetched
        assert_eq!(f.source.race_fetches(), 2);
    }

    #[test]
    fn test_failed_event_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_season_source().failing_results(2021, "Bahrain Grand Prix");
        let mut f = fixture(source, dir.path(), vec![2021, 2022]);
        let cancel = CancelToken::new();

        let outcome = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        assert_eq!(outcome.value.season(2021).unwrap().races().len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].event.as_deref(), Some("Bahrain Grand Prix"));
    }

    #[test]
    fn test_slow_event_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_season_source().with_delay(
            2021,
            "Emilia Romagna Grand Prix",
            Duration::from_millis(60),
        );
        let mut f = fixture_with_timeout(source, dir.path(), vec![2021], Duration::from_millis(20));
        let cancel = CancelToken::new();

        let outcome = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        let season = outcome.value.season(2021).unwrap();
        assert_eq!(season.races().len(), 1);
        assert!(outcome.has_kind(ErrorKind::Timeout));
    }

    #[test]
    fn test_unknown_driver_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022]);
        let cancel = CancelToken::new();

        let err = f
            .store
            .driver_history("XYZ", None, &mut f.calendars, &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoData);
        assert!(!f.artifacts.exists(&ArtifactKey::Driver("XYZ".into())));
    }

    #[test]
    fn test_corrupt_record_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("driver_VER.json"), "{ broken").unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022]);
        let cancel = CancelToken::new();

        let outcome = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        assert_eq!(outcome.value.race_count(), 3);
        assert!(outcome.has_kind(ErrorKind::PersistenceFailure));
    }

    #[test]
    fn test_write_failure_still_returns_data() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the store directory should be makes every write fail.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "").unwrap();
        let mut f = fixture(three_season_source(), &blocked, vec![2021, 2022]);
        let cancel = CancelToken::new();

        let outcome = f
            .store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        assert_eq!(outcome.value.race_count(), 3);
        assert!(outcome.has_kind(ErrorKind::PersistenceFailure));
        assert!(f.store.has_pending_writes());

        let diags = f.store.flush();
        assert!(!diags.is_empty());
        assert!(f.store.has_pending_writes());
    }

    #[test]
    fn test_pending_write_saved_by_later_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "").unwrap();
        let mut f = fixture(three_season_source(), &blocked, vec![2021, 2022]);
        let cancel = CancelToken::new();
        f.store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        assert!(f.store.has_pending_writes());

        std::fs::remove_file(&blocked).unwrap();
        let fetches = f.source.race_fetches();
        let refreshed = f
            .store
            .refresh_driver_history("VER", &mut f.calendars, &cancel)
            .unwrap();
        // Nothing new to merge, but the record is still written
        assert_eq!(f.source.race_fetches(), fetches);
        assert!(!refreshed.has_kind(ErrorKind::PersistenceFailure));
        assert!(!f.store.has_pending_writes());

        let persisted: DriverHistory = f
            .artifacts
            .load(&ArtifactKey::Driver("VER".into()))
            .unwrap()
            .unwrap();
        assert_eq!(persisted.race_count(), 3);
    }

    #[test]
    fn test_flush_writes_pending_record_once_store_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "").unwrap();
        let mut f = fixture(three_season_source(), &blocked, vec![2021, 2022]);
        let cancel = CancelToken::new();
        f.store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();

        std::fs::remove_file(&blocked).unwrap();
        // A cached read neither writes nor forgets the pending record
        f.store
            .driver_history("VER", None, &mut f.calendars, &cancel)
            .unwrap();
        assert!(f.store.has_pending_writes());

        let diags = f.store.flush();
        assert!(diags.is_empty());
        assert!(!f.store.has_pending_writes());
        assert!(f.artifacts.exists(&ArtifactKey::Driver("VER".into())));
    }

    #[test]
    fn test_team_history_aggregates_drivers() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemorySource::new()
            .with_schedule(2024, vec![schedule_row(1, "Hungarian Grand Prix", "2024-07-21")])
            .with_results(
                2024,
                "Hungarian Grand Prix",
                vec![
                    result_row("PIA", "McLaren", Some(1), 25.0, Some(2)),
                    result_row("NOR", "McLaren F1 Team", Some(2), 18.0, Some(1)),
                    result_row("HAM", "Mercedes", Some(3), 15.0, Some(5)),
                ],
            );
        let mut f = fixture(source, dir.path(), vec![2024]);
        let cancel = CancelToken::new();

        let history = f
            .store
            .team_history("McLaren F1 Team", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(history.entity_id, "McLaren");
        let season = history.season(2024).unwrap();
        assert_eq!(season.races()[0].result.team_points, 43.0);
        assert_eq!(season.statistics().wins, 1);
        assert_eq!(season.statistics().podiums, 2);
        assert_eq!(season.drivers(), vec!["PIA".to_string(), "NOR".to_string()]);
        assert!(f.artifacts.exists(&ArtifactKey::Team("McLaren".into())));
        assert_eq!(
            f.artifacts.path(&ArtifactKey::Team("McLaren".into())).file_name().unwrap(),
            "team_McLaren.json"
        );
    }

    #[test]
    fn test_team_two_drivers_single_podium() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemorySource::new()
            .with_schedule(2023, vec![schedule_row(1, "Spanish Grand Prix", "2023-06-04")])
            .with_results(
                2023,
                "Spanish Grand Prix",
                vec![
                    result_row("VER", "Red Bull Racing", Some(1), 25.0, Some(1)),
                    result_row("HAM", "Mercedes", Some(2), 18.0, Some(4)),
                    result_row("SAI", "Ferrari", Some(3), 15.0, Some(2)),
                    result_row("RUS", "Mercedes", Some(5), 10.0, Some(12)),
                ],
            );
        let mut f = fixture(source, dir.path(), vec![2023]);
        let cancel = CancelToken::new();

        let history = f
            .store
            .team_history("Mercedes", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        let season = history.season(2023).unwrap();
        assert_eq!(season.races()[0].result.team_points, 28.0);
        assert_eq!(season.statistics().podiums, 1);
        assert_eq!(season.statistics().wins, 0);
    }

    #[test]
    fn test_team_rebrand_attributed_to_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(three_season_source(), dir.path(), vec![2021, 2022]);
        let cancel = CancelToken::new();

        let history = f
            .store
            .team_history("Red Bull", None, &mut f.calendars, &cancel)
            .unwrap()
            .into_inner();
        assert_eq!(history.entity_id, "Red Bull Racing");
        assert_eq!(history.season(2021).unwrap().races().len(), 2);
        assert_eq!(history.season(2021).unwrap().statistics().points, 40.0);
        assert_eq!(history.season(2022).unwrap().drivers(), vec!["VER", "PER"]);
    }

    #[test]
    fn test_grid_zero_is_pit_lane_start() {
        let rows = vec![result_row("HUL", "Haas F1 Team", Some(10), 1.0, Some(0))];
        let subject = DriverSubject {
            code: "HUL".to_string(),
        };
        let result = subject.extract(&rows, &TeamAliasTable::builtin()).unwrap();
        assert_eq!(result.grid_position, None);
        assert_eq!(result.points, 1.0);
    }
}
