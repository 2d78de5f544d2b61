//! Data model for cross-season history.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Championship year.
pub type Season = i32;

/// Category of a single on-track session within an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    #[serde(rename = "FP1")]
    Practice1,
    #[serde(rename = "FP2")]
    Practice2,
    #[serde(rename = "FP3")]
    Practice3,
    #[serde(rename = "Q")]
    Qualifying,
    #[serde(rename = "S")]
    Sprint,
    #[serde(rename = "R")]
    Race,
}

impl SessionKind {
    pub const ALL: [SessionKind; 6] = [
        SessionKind::Practice1,
        SessionKind::Practice2,
        SessionKind::Practice3,
        SessionKind::Qualifying,
        SessionKind::Sprint,
        SessionKind::Race,
    ];

    /// Short code used by timing providers (FP1, Q, R, ...)
    pub fn code(&self) -> &'static str {
        match self {
            SessionKind::Practice1 => "FP1",
            SessionKind::Practice2 => "FP2",
            SessionKind::Practice3 => "FP3",
            SessionKind::Qualifying => "Q",
            SessionKind::Sprint => "S",
            SessionKind::Race => "R",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code.trim()))
    }
}

/// Scheduled start of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSlot {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

/// One event of a season calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub round: u32,
    pub event_name: String,
    pub country: String,
    pub location: String,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub sessions: BTreeMap<SessionKind, SessionSlot>,
}

impl CalendarEntry {
    pub fn event_ref(&self) -> EventRef {
        EventRef {
            round: self.round,
            event_name: self.event_name.clone(),
            country: self.country.clone(),
            date: self.date,
        }
    }
}

/// Event metadata attached to each merged race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRef {
    pub round: u32,
    pub event_name: String,
    pub country: String,
    pub date: Option<NaiveDate>,
}

/// One driver's classification in one race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    /// `None` for DNF, DSQ or unclassified
    pub position: Option<u32>,
    pub points: f64,
    pub status: String,
    pub grid_position: Option<u32>,
    pub laps_completed: u32,
}

/// One team driver's row inside an aggregated team race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamDriverResult {
    pub driver_code: String,
    pub position: Option<u32>,
    pub points: f64,
    pub status: String,
}

/// All of a team's drivers in one race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRaceResult {
    pub results: Vec<TeamDriverResult>,
    pub team_points: f64,
}

impl TeamRaceResult {
    pub fn new(results: Vec<TeamDriverResult>) -> Self {
        let team_points = results.iter().map(|r| r.points).sum();
        Self {
            results,
            team_points,
        }
    }
}

fn is_win(position: Option<u32>) -> bool {
    position == Some(1)
}

fn is_podium(position: Option<u32>) -> bool {
    matches!(position, Some(1..=3))
}

/// Per-race contribution to season statistics.
pub trait RaceTally {
    fn points(&self) -> f64;
    fn wins(&self) -> u32;
    fn podiums(&self) -> u32;
}

impl RaceTally for RaceResult {
    fn points(&self) -> f64 {
        self.points
    }

    fn wins(&self) -> u32 {
        u32::from(is_win(self.position))
    }

    fn podiums(&self) -> u32 {
        u32::from(is_podium(self.position))
    }
}

impl RaceTally for TeamRaceResult {
    fn points(&self) -> f64 {
        self.team_points
    }

    fn wins(&self) -> u32 {
        self.results.iter().filter(|r| is_win(r.position)).count() as u32
    }

    fn podiums(&self) -> u32 {
        self.results.iter().filter(|r| is_podium(r.position)).count() as u32
    }
}

/// A merged race: event metadata plus the entity's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEntry<R> {
    pub event: EventRef,
    pub result: R,
}

/// Season aggregate derived from the race list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonStatistics {
    pub points: f64,
    pub wins: u32,
    pub podiums: u32,
    pub races_completed: u32,
}

impl SeasonStatistics {
    pub fn from_races<R: RaceTally>(races: &[RaceEntry<R>]) -> Self {
        races.iter().fold(Self::default(), |mut acc, race| {
            acc.points += race.result.points();
            acc.wins += race.result.wins();
            acc.podiums += race.result.podiums();
            acc.races_completed += 1;
            acc
        })
    }
}

/// One season of an entity's history.
///
/// Races stay ordered by round with at most one entry per event name, and
/// `statistics` is only ever written by [`SeasonRecord::recompute_statistics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonRecord<R> {
    pub year: Season,
    races: Vec<RaceEntry<R>>,
    #[serde(default)]
    statistics: SeasonStatistics,
}

impl<R: RaceTally> SeasonRecord<R> {
    pub fn new(year: Season) -> Self {
        Self {
            year,
            races: Vec::new(),
            statistics: SeasonStatistics::default(),
        }
    }

    pub fn races(&self) -> &[RaceEntry<R>] {
        &self.races
    }

    pub fn statistics(&self) -> &SeasonStatistics {
        &self.statistics
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }

    pub fn contains_event(&self, event_name: &str) -> bool {
        self.races.iter().any(|r| r.event.event_name == event_name)
    }

    /// Insert a race in round order. Returns false if the event is already present.
    pub fn merge(&mut self, entry: RaceEntry<R>) -> bool {
        if self.contains_event(&entry.event.event_name) {
            return false;
        }
        let idx = self
            .races
            .partition_point(|r| r.event.round <= entry.event.round);
        self.races.insert(idx, entry);
        true
    }

    pub fn recompute_statistics(&mut self) {
        self.statistics = SeasonStatistics::from_races(&self.races);
    }

    /// Restore ordering, uniqueness and statistics after deserialization.
    pub(crate) fn normalize(&mut self) {
        self.races.sort_by_key(|r| r.event.round);
        let mut seen = std::collections::HashSet::new();
        self.races.retain(|r| seen.insert(r.event.event_name.clone()));
        self.recompute_statistics();
    }
}

impl SeasonRecord<TeamRaceResult> {
    /// Distinct driver codes that raced for the team this season, in order of first appearance.
    pub fn drivers(&self) -> Vec<String> {
        let mut drivers: Vec<String> = Vec::new();
        for race in &self.races {
            for row in &race.result.results {
                if !drivers.contains(&row.driver_code) {
                    drivers.push(row.driver_code.clone());
                }
            }
        }
        drivers
    }
}

/// Cross-season record of one driver or team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHistory<R> {
    pub entity_id: String,
    pub seasons: BTreeMap<Season, SeasonRecord<R>>,
}

pub type DriverHistory = EntityHistory<RaceResult>;
pub type TeamHistory = EntityHistory<TeamRaceResult>;

impl<R: RaceTally> EntityHistory<R> {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            seasons: BTreeMap::new(),
        }
    }

    pub fn season(&self, year: Season) -> Option<&SeasonRecord<R>> {
        self.seasons.get(&year)
    }

    pub fn is_empty(&self) -> bool {
        self.seasons.values().all(SeasonRecord::is_empty)
    }

    pub fn race_count(&self) -> usize {
        self.seasons.values().map(|s| s.races().len()).sum()
    }

    pub(crate) fn normalize(&mut self) {
        self.seasons.retain(|_, season| !season.is_empty());
        for season in self.seasons.values_mut() {
            season.normalize();
        }
    }
}

/// Driver identity as shown in classification tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverIdentity {
    pub driver_code: String,
    pub driver_name: String,
    pub team: String,
}

/// One classified row of a circuit's race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedResult {
    pub driver: DriverIdentity,
    pub result: RaceResult,
}

/// One season's edition of a Grand Prix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSeason {
    pub year: Season,
    pub date: Option<NaiveDate>,
    pub results: Vec<ClassifiedResult>,
    pub pole_sitter: Option<DriverIdentity>,
}

impl CircuitSeason {
    pub fn winner(&self) -> Option<&ClassifiedResult> {
        self.results.iter().find(|r| r.result.position == Some(1))
    }

    pub fn podium(&self) -> Vec<&ClassifiedResult> {
        let mut podium: Vec<_> = self
            .results
            .iter()
            .filter(|r| is_podium(r.result.position))
            .collect();
        podium.sort_by_key(|r| r.result.position);
        podium
    }
}

/// Cross-season history of one Grand Prix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitHistory {
    pub event_name: String,
    pub seasons: BTreeMap<Season, CircuitSeason>,
}
