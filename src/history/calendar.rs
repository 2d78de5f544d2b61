//! Per-season event calendars.
//!
//! Each season is fetched once, normalized and kept for the process
//! lifetime; successfully fetched seasons are persisted as one snapshot.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::CancelToken;
use crate::error::{Diagnostic, HistoryError};
use crate::retry::{retry, RetryConfig};
use crate::source::{ScheduleRow, SessionDataSource};
use crate::storage::{ArtifactKey, ArtifactStore};
use crate::types::{CalendarEntry, Season, SessionKind, SessionSlot};

/// Parse a provider date: `YYYY-MM-DD`, RFC 3339 or a naive datetime.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    parse_datetime(raw).map(|dt| dt.date())
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

/// Turn raw schedule rows into calendar entries ordered by round.
///
/// Round 0 (pre-season testing) is dropped, as are session slots whose date
/// cannot be parsed.
pub fn normalize_schedule(season: Season, rows: Vec<ScheduleRow>) -> Vec<CalendarEntry> {
    let mut entries: Vec<CalendarEntry> = rows
        .into_iter()
        .filter(|row| {
            if row.round == 0 {
                debug!("{}: skipping testing event {}", season, row.event_name);
                return false;
            }
            true
        })
        .map(|row| {
            let mut sessions = BTreeMap::new();
            for (code, raw) in &row.sessions {
                let Some(kind) = SessionKind::from_code(code) else {
                    debug!("{} {}: unknown session code {}", season, row.event_name, code);
                    continue;
                };
                let Some(date) = parse_date(&raw.date) else {
                    debug!("{} {}: bad {} date {}", season, row.event_name, code, raw.date);
                    continue;
                };
                let time = raw
                    .time
                    .as_deref()
                    .and_then(parse_time)
                    .or_else(|| parse_datetime(raw.date.trim()).map(|dt| dt.time()));
                sessions.insert(kind, SessionSlot { date, time });
            }

            let date = row
                .event_date
                .as_deref()
                .and_then(parse_date)
                .or_else(|| sessions.get(&SessionKind::Race).map(|slot| slot.date));

            CalendarEntry {
                round: row.round,
                event_name: row.event_name.trim().to_string(),
                country: row.country,
                location: row.location,
                date,
                sessions,
            }
        })
        .collect();

    entries.sort_by_key(|e| e.round);
    entries
}

/// Season calendars, fetched on demand and cached.
pub struct CalendarCache {
    source: Arc<dyn SessionDataSource>,
    store: ArtifactStore,
    retry: RetryConfig,
    seasons: Vec<Season>,
    calendars: BTreeMap<Season, Vec<CalendarEntry>>,
    /// Seasons whose fetch failed; held empty in memory, never persisted
    failed: BTreeSet<Season>,
}

impl CalendarCache {
    pub fn new(
        source: Arc<dyn SessionDataSource>,
        store: ArtifactStore,
        seasons: Vec<Season>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            source,
            store,
            retry,
            seasons,
            calendars: BTreeMap::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Load the persisted snapshot. A corrupt snapshot counts as empty.
    pub fn load(&mut self, diagnostics: &mut Vec<Diagnostic>) -> usize {
        match self
            .store
            .load::<BTreeMap<Season, Vec<CalendarEntry>>>(&ArtifactKey::Calendars)
        {
            Ok(Some(calendars)) => {
                let count = calendars.len();
                self.calendars.extend(calendars);
                info!("Loaded cached calendars for {} seasons", count);
                count
            }
            Ok(None) => 0,
            Err(e) => {
                warn!("Failed to load cached calendars: {}", e);
                diagnostics.push(Diagnostic::from_error(&e, None, None));
                0
            }
        }
    }

    /// Persist every successfully fetched season, replacing the previous snapshot.
    pub fn save(&self) -> crate::error::Result<()> {
        let snapshot: BTreeMap<Season, &Vec<CalendarEntry>> = self
            .calendars
            .iter()
            .filter(|(season, _)| !self.failed.contains(season))
            .map(|(season, calendar)| (*season, calendar))
            .collect();
        self.store.save(&ArtifactKey::Calendars, &snapshot)?;
        info!("Saved calendars for {} seasons to cache", snapshot.len());
        Ok(())
    }

    fn save_or_warn(&self, diagnostics: &mut Vec<Diagnostic>) {
        if let Err(e) = self.save() {
            warn!("Failed to save calendars to cache: {}", e);
            diagnostics.push(Diagnostic::from_error(&e, None, None));
        }
    }

    pub fn is_cached(&self, season: Season) -> bool {
        self.calendars.contains_key(&season)
    }

    /// Fetch one season. On failure the season is recorded empty so it is
    /// not retried on every call. Returns true when a calendar was stored.
    fn fetch_season(
        &mut self,
        season: Season,
        cancel: &CancelToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let source = Arc::clone(&self.source);
        let fetched = retry(&self.retry, cancel, &format!("{} schedule", season), || {
            source.fetch_event_schedule(season)
        });

        match fetched {
            Ok(rows) => {
                let calendar = normalize_schedule(season, rows);
                if calendar.is_empty() {
                    warn!("No race calendar found for {}", season);
                    let err = HistoryError::not_found(format!("{} race calendar", season));
                    diagnostics.push(Diagnostic::from_error(&err, Some(season), None));
                    self.failed.insert(season);
                    self.calendars.insert(season, Vec::new());
                    return false;
                }
                info!("Found {} races in {} calendar", calendar.len(), season);
                self.failed.remove(&season);
                self.calendars.insert(season, calendar);
                true
            }
            Err(HistoryError::Cancelled) => false,
            Err(e) => {
                error!("Error fetching race calendar for {}: {}", season, e);
                diagnostics.push(Diagnostic::from_error(&e, Some(season), None));
                self.failed.insert(season);
                self.calendars.insert(season, Vec::new());
                false
            }
        }
    }

    /// Calendar for one season, fetching it on first use.
    pub fn calendar(
        &mut self,
        season: Season,
        cancel: &CancelToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> &[CalendarEntry] {
        if !self.is_cached(season) && self.fetch_season(season, cancel, diagnostics) {
            self.save_or_warn(diagnostics);
        }
        self.calendars.get(&season).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Calendars for every tracked season; only missing seasons are fetched.
    pub fn all_calendars(
        &mut self,
        cancel: &CancelToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> &BTreeMap<Season, Vec<CalendarEntry>> {
        let missing: Vec<Season> = self
            .seasons
            .iter()
            .copied()
            .filter(|season| !self.is_cached(*season))
            .collect();

        if missing.is_empty() {
            debug!("Using cached race calendars");
            return &self.calendars;
        }

        info!("Retrieving race calendars for seasons {:?}", missing);
        let mut fetched_any = false;
        for season in missing {
            fetched_any |= self.fetch_season(season, cancel, diagnostics);
        }
        if fetched_any {
            self.save_or_warn(diagnostics);
        }
        &self.calendars
    }

    /// Drop one season's calendar and fetch it again.
    pub fn refresh_season(
        &mut self,
        season: Season,
        cancel: &CancelToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> &[CalendarEntry] {
        self.calendars.remove(&season);
        self.failed.remove(&season);
        self.calendar(season, cancel, diagnostics)
    }

    /// Cached calendar entry for an event, matched by exact name.
    pub fn find_event(&self, season: Season, event_name: &str) -> Option<&CalendarEntry> {
        self.calendars
            .get(&season)?
            .iter()
            .find(|e| e.event_name == event_name)
    }

    pub fn round_number(&self, season: Season, event_name: &str) -> Option<u32> {
        self.find_event(season, event_name).map(|e| e.round)
    }

    /// Last event of a cached season, by round
    pub fn last_event(&self, season: Season) -> Option<&CalendarEntry> {
        self.calendars.get(&season)?.last()
    }
}
