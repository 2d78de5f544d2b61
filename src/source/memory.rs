//! Scripted in-memory provider.
//!
//! Serves deterministic schedules, results and standings, and can inject
//! failures, latency and cancellation for exercising partial-failure paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ResultRow, ScheduleRow, SessionDataSource, StandingRow, StandingsKind};
use crate::error::{HistoryError, Result};
use crate::history::CancelToken;
use crate::types::Season;

#[derive(Default)]
struct Script {
    schedules: HashMap<Season, Vec<ScheduleRow>>,
    results: HashMap<(Season, String), Vec<ResultRow>>,
    standings: HashMap<(Season, StandingsKind), Vec<StandingRow>>,
    failing_schedules: HashSet<Season>,
    failing_results: HashSet<(Season, String)>,
    failing_standings: HashSet<Season>,
    delays: HashMap<(Season, String), Duration>,
    cancel_after: Option<(usize, CancelToken)>,
}

/// In-memory [`SessionDataSource`].
#[derive(Default)]
pub struct InMemorySource {
    script: Mutex<Script>,
    schedule_fetches: AtomicUsize,
    race_fetches: AtomicUsize,
    standings_fetches: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panic while holding the lock only happens in a failing test.
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_schedule(self, season: Season, rows: Vec<ScheduleRow>) -> Self {
        self.set_schedule(season, rows);
        self
    }

    pub fn with_results(self, season: Season, event_name: &str, rows: Vec<ResultRow>) -> Self {
        self.set_results(season, event_name, rows);
        self
    }

    pub fn with_standings(self, season: Season, kind: StandingsKind, rows: Vec<StandingRow>) -> Self {
        self.script().standings.insert((season, kind), rows);
        self
    }

    /// Schedule fetches for `season` fail with a provider error.
    pub fn failing_schedule(self, season: Season) -> Self {
        self.script().failing_schedules.insert(season);
        self
    }

    /// Result fetches for one event fail with a provider error.
    pub fn failing_results(self, season: Season, event_name: &str) -> Self {
        self.script()
            .failing_results
            .insert((season, event_name.to_string()));
        self
    }

    pub fn failing_standings(self, season: Season) -> Self {
        self.script().failing_standings.insert(season);
        self
    }

    /// Sleep before answering a result fetch for one event.
    pub fn with_delay(self, season: Season, event_name: &str, delay: Duration) -> Self {
        self.script()
            .delays
            .insert((season, event_name.to_string()), delay);
        self
    }

    /// Trip `token` once `fetches` race result fetches have been answered.
    pub fn cancel_after(self, fetches: usize, token: CancelToken) -> Self {
        self.script().cancel_after = Some((fetches, token));
        self
    }

    pub fn set_schedule(&self, season: Season, rows: Vec<ScheduleRow>) {
        let mut script = self.script();
        script.failing_schedules.remove(&season);
        script.schedules.insert(season, rows);
    }

    pub fn set_results(&self, season: Season, event_name: &str, rows: Vec<ResultRow>) {
        let key = (season, event_name.to_string());
        let mut script = self.script();
        script.failing_results.remove(&key);
        script.results.insert(key, rows);
    }

    pub fn schedule_fetches(&self) -> usize {
        self.schedule_fetches.load(Ordering::SeqCst)
    }

    pub fn race_fetches(&self) -> usize {
        self.race_fetches.load(Ordering::SeqCst)
    }

    pub fn standings_fetches(&self) -> usize {
        self.standings_fetches.load(Ordering::SeqCst)
    }
}

impl SessionDataSource for InMemorySource {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn fetch_event_schedule(&self, season: Season) -> Result<Vec<ScheduleRow>> {
        self.schedule_fetches.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        if script.failing_schedules.contains(&season) {
            return Err(HistoryError::provider(
                self.name(),
                format!("forced schedule failure for {}", season),
            ));
        }
        script
            .schedules
            .get(&season)
            .cloned()
            .ok_or_else(|| HistoryError::not_found(format!("{} event schedule", season)))
    }

    fn fetch_race_results(&self, season: Season, event_name: &str) -> Result<Vec<ResultRow>> {
        let answered = self.race_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let key = (season, event_name.to_string());

        let (delay, outcome, cancel) = {
            let script = self.script();
            let outcome = if script.failing_results.contains(&key) {
                Err(HistoryError::provider(
                    self.name(),
                    format!("forced result failure for {} {}", season, event_name),
                ))
            } else {
                script.results.get(&key).cloned().ok_or_else(|| {
                    HistoryError::not_found(format!("{} {} race", season, event_name))
                })
            };
            let cancel = script
                .cancel_after
                .as_ref()
                .filter(|(after, _)| answered >= *after)
                .map(|(_, token)| token.clone());
            (script.delays.get(&key).copied(), outcome, cancel)
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(token) = cancel {
            token.cancel();
        }
        outcome
    }

    fn fetch_season_standings(
        &self,
        season: Season,
        kind: StandingsKind,
    ) -> Result<Vec<StandingRow>> {
        self.standings_fetches.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        if script.failing_standings.contains(&season) {
            return Err(HistoryError::provider(
                self.name(),
                format!("forced standings failure for {}", season),
            ));
        }
        script
            .standings
            .get(&(season, kind))
            .cloned()
            .ok_or_else(|| HistoryError::not_found(format!("{} {} standings", season, kind.as_str())))
    }
}

/// Schedule row with a race on `date` (YYYY-MM-DD).
pub fn schedule_row(round: u32, event_name: &str, date: &str) -> ScheduleRow {
    let mut sessions = BTreeMap::new();
    sessions.insert(
        "R".to_string(),
        super::RawSessionTime {
            date: date.to_string(),
            time: Some("15:00:00".to_string()),
        },
    );
    ScheduleRow {
        round,
        event_name: event_name.to_string(),
        country: String::new(),
        location: String::new(),
        event_date: Some(date.to_string()),
        sessions,
    }
}

/// Classified result row.
pub fn result_row(
    driver_code: &str,
    team_name: &str,
    position: Option<u32>,
    points: f64,
    grid_position: Option<u32>,
) -> ResultRow {
    ResultRow {
        driver_code: driver_code.to_string(),
        driver_name: driver_code.to_string(),
        team_name: team_name.to_string(),
        position,
        points: Some(points),
        status: if position.is_some() {
            "Finished".to_string()
        } else {
            "DNF".to_string()
        },
        grid_position,
        laps_completed: Some(if position.is_some() { 57 } else { 12 }),
    }
}

pub fn standing_row(name: &str, identifier: Option<&str>, points: f64) -> StandingRow {
    StandingRow {
        name: name.to_string(),
        identifier: identifier.map(str::to_string),
        points,
    }
}
