//! Season-over-season comparisons.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::calendar::CalendarCache;
use super::teams::TeamAliasTable;
use super::CancelToken;
use crate::error::{Diagnostic, HistoryError, Outcome};
use crate::retry::{retry, RetryConfig};
use crate::source::{SessionDataSource, StandingRow, StandingsKind};
use crate::storage::{ArtifactKey, ArtifactStore};
use crate::types::{DriverHistory, EntityHistory, RaceTally, Season, SeasonRecord, TeamHistory};

/// One driver's seasons side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverComparison {
    pub driver: String,
    pub seasons: Vec<Season>,
    pub points_by_season: BTreeMap<Season, f64>,
    pub wins_by_season: BTreeMap<Season, u32>,
    pub podiums_by_season: BTreeMap<Season, u32>,
    /// event name -> season -> finishing position. Every race the driver
    /// entered has a key; unclassified finishes leave its season out.
    pub positions_by_race: BTreeMap<String, BTreeMap<Season, u32>>,
}

/// One team's seasons side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamComparison {
    pub team: String,
    pub seasons: Vec<Season>,
    pub points_by_season: BTreeMap<Season, f64>,
    pub wins_by_season: BTreeMap<Season, u32>,
    pub podiums_by_season: BTreeMap<Season, u32>,
    /// event name -> season -> team points
    pub points_by_race: BTreeMap<String, BTreeMap<Season, f64>>,
}

/// Leader of a championship table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Champion {
    pub name: String,
    pub code: Option<String>,
    pub points: f64,
}

/// Driver and constructor champion of one season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionPair {
    pub driver: Option<Champion>,
    pub team: Option<Champion>,
    /// Standings may still change: the season is unfinished or its calendar unknown
    pub provisional: bool,
}

/// Drivers' and constructors' champions per season.
///
/// A season whose standings could not be resolved maps to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionsComparison {
    pub seasons: Vec<Season>,
    pub driver_champions: BTreeMap<Season, Option<Champion>>,
    pub team_champions: BTreeMap<Season, Option<Champion>>,
    pub provisional_seasons: Vec<Season>,
}

struct Totals<'a, R> {
    seasons: Vec<Season>,
    selected: Vec<&'a SeasonRecord<R>>,
}

/// Seasons of `history` within `seasons`, oldest first. An empty filter keeps all of them.
fn select<'a, R: RaceTally>(history: &'a EntityHistory<R>, seasons: &[Season]) -> Totals<'a, R> {
    let mut wanted: Vec<Season> = if seasons.is_empty() {
        history.seasons.keys().copied().collect()
    } else {
        seasons.to_vec()
    };
    wanted.sort_unstable();
    wanted.dedup();

    let selected = wanted
        .iter()
        .filter_map(|season| history.season(*season))
        .filter(|record| !record.is_empty())
        .collect();
    Totals {
        seasons: wanted,
        selected,
    }
}

/// Derives comparisons from histories and resolves season champions.
pub struct SeasonComparator {
    source: Arc<dyn SessionDataSource>,
    store: ArtifactStore,
    retry: RetryConfig,
    champions: HashMap<Season, ChampionPair>,
}

impl SeasonComparator {
    pub fn new(source: Arc<dyn SessionDataSource>, store: ArtifactStore, retry: RetryConfig) -> Self {
        Self {
            source,
            store,
            retry,
            champions: HashMap::new(),
        }
    }

    pub fn compare_driver(history: &DriverHistory, seasons: &[Season]) -> DriverComparison {
        let totals = select(history, seasons);
        let mut comparison = DriverComparison {
            driver: history.entity_id.clone(),
            seasons: totals.seasons,
            points_by_season: BTreeMap::new(),
            wins_by_season: BTreeMap::new(),
            podiums_by_season: BTreeMap::new(),
            positions_by_race: BTreeMap::new(),
        };

        for record in totals.selected {
            let stats = record.statistics();
            comparison.points_by_season.insert(record.year, stats.points);
            comparison.wins_by_season.insert(record.year, stats.wins);
            comparison.podiums_by_season.insert(record.year, stats.podiums);
            for race in record.races() {
                let by_season = comparison
                    .positions_by_race
                    .entry(race.event.event_name.clone())
                    .or_default();
                if let Some(position) = race.result.position {
                    by_season.insert(record.year, position);
                }
            }
        }
        comparison
    }

    pub fn compare_team(history: &TeamHistory, seasons: &[Season]) -> TeamComparison {
        let totals = select(history, seasons);
        let mut comparison = TeamComparison {
            team: history.entity_id.clone(),
            seasons: totals.seasons,
            points_by_season: BTreeMap::new(),
            wins_by_season: BTreeMap::new(),
            podiums_by_season: BTreeMap::new(),
            points_by_race: BTreeMap::new(),
        };

        for record in totals.selected {
            let stats = record.statistics();
            comparison.points_by_season.insert(record.year, stats.points);
            comparison.wins_by_season.insert(record.year, stats.wins);
            comparison.podiums_by_season.insert(record.year, stats.podiums);
            for race in record.races() {
                comparison
                    .points_by_race
                    .entry(race.event.event_name.clone())
                    .or_default()
                    .insert(record.year, race.result.team_points);
            }
        }
        comparison
    }

    /// Driver and constructor champions per season.
    ///
    /// Final pairs are memoised and persisted; provisional ones are
    /// re-queried on every call. A season whose standings cannot be loaded
    /// maps to `None` without affecting the others.
    pub fn compare_champions(
        &mut self,
        seasons: &[Season],
        calendars: &mut CalendarCache,
        teams: &TeamAliasTable,
        today: NaiveDate,
        cancel: &CancelToken,
    ) -> Outcome<ChampionsComparison> {
        let mut diagnostics = Vec::new();
        let mut wanted = seasons.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let mut comparison = ChampionsComparison {
            seasons: wanted.clone(),
            driver_champions: BTreeMap::new(),
            team_champions: BTreeMap::new(),
            provisional_seasons: Vec::new(),
        };
        let mut interrupted = false;

        for season in wanted {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let pair = match self.cached_pair(season, &mut diagnostics) {
                Some(pair) => pair,
                None => self.resolve_pair(season, calendars, teams, today, cancel, &mut diagnostics),
            };
            if pair.provisional {
                comparison.provisional_seasons.push(season);
            }
            comparison.driver_champions.insert(season, pair.driver);
            comparison.team_champions.insert(season, pair.team);
        }

        let mut outcome = Outcome::with_diagnostics(comparison, diagnostics);
        outcome.interrupted = interrupted;
        outcome
    }

    fn cached_pair(&mut self, season: Season, diagnostics: &mut Vec<Diagnostic>) -> Option<ChampionPair> {
        if let Some(pair) = self.champions.get(&season) {
            return Some(pair.clone());
        }
        match self.store.load::<ChampionPair>(&ArtifactKey::Champions(season)) {
            Ok(Some(pair)) if !pair.provisional => {
                debug!("Loaded cached champions for {}", season);
                self.champions.insert(season, pair.clone());
                Some(pair)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to load cached champions for {}: {}", season, e);
                diagnostics.push(Diagnostic::from_error(&e, Some(season), None));
                None
            }
        }
    }

    fn resolve_pair(
        &mut self,
        season: Season,
        calendars: &mut CalendarCache,
        teams: &TeamAliasTable,
        today: NaiveDate,
        cancel: &CancelToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ChampionPair {
        let finished = calendars
            .calendar(season, cancel, diagnostics)
            .last()
            .and_then(|event| event.date)
            .is_some_and(|date| date < today);

        let driver = self.leader(season, StandingsKind::Driver, cancel, diagnostics);
        let team = self
            .leader(season, StandingsKind::Constructor, cancel, diagnostics)
            .map(|mut champion| {
                champion.name = teams.canonicalize(&champion.name);
                champion
            });

        let pair = ChampionPair {
            provisional: !finished,
            driver,
            team,
        };

        if pair.provisional {
            info!("Champions for {} are provisional", season);
        } else if pair.driver.is_some() && pair.team.is_some() {
            self.champions.insert(season, pair.clone());
            match self.store.save(&ArtifactKey::Champions(season), &pair) {
                Ok(()) => info!("Saved champions for {} to cache", season),
                Err(e) => {
                    warn!("Failed to save champions for {}: {}", season, e);
                    diagnostics.push(Diagnostic::from_error(&e, Some(season), None));
                }
            }
        }
        pair
    }

    fn leader(
        &self,
        season: Season,
        kind: StandingsKind,
        cancel: &CancelToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<Champion> {
        let source = Arc::clone(&self.source);
        let what = format!("{} {} standings", season, kind.as_str());
        let fetched = retry(&self.retry, cancel, &what, || {
            source.fetch_season_standings(season, kind)
        })
        .and_then(|rows: Vec<StandingRow>| {
            rows.into_iter()
                .next()
                .ok_or_else(|| HistoryError::not_found(&what))
        });

        match fetched {
            Ok(row) => Some(Champion {
                name: row.name.trim().to_string(),
                code: row.identifier.map(|id| id.trim().to_uppercase()),
                points: row.points,
            }),
            Err(e) => {
                warn!("Could not determine {} champion for {}: {}", kind.as_str(), season, e);
                diagnostics.push(Diagnostic::from_error(&e, Some(season), None));
                None
            }
        }
    }

    pub fn clear_memory(&mut self) {
        self.champions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::source::memory::{schedule_row, standing_row};
    use crate::source::InMemorySource;
    use crate::types::{EventRef, RaceEntry, RaceResult, TeamDriverResult, TeamRaceResult};

    fn race(round: u32, name: &str, position: Option<u32>, points: f64) -> RaceEntry<RaceResult> {
        RaceEntry {
            event: EventRef {
                round,
                event_name: name.to_string(),
                country: String::new(),
                date: None,
            },
            result: RaceResult {
                position,
                points,
                status: "Finished".to_string(),
                grid_position: None,
                laps_completed: 50,
            },
        }
    }

    fn ver_history() -> DriverHistory {
        let mut history = DriverHistory::new("VER");
        let mut y2021 = SeasonRecord::new(2021);
        y2021.merge(race(1, "Bahrain Grand Prix", Some(1), 25.0));
        y2021.merge(race(2, "Emilia Romagna Grand Prix", Some(3), 15.0));
        y2021.recompute_statistics();
        let mut y2022 = SeasonRecord::new(2022);
        y2022.merge(race(1, "Bahrain Grand Prix", Some(1), 25.0));
        y2022.recompute_statistics();
        history.seasons.insert(2021, y2021);
        history.seasons.insert(2022, y2022);
        history
    }

    #[test]
    fn test_compare_driver_by_season() {
        let comparison = SeasonComparator::compare_driver(&ver_history(), &[2021, 2022, 2023]);

        assert_eq!(comparison.points_by_season, BTreeMap::from([(2021, 40.0), (2022, 25.0)]));
        assert_eq!(comparison.wins_by_season, BTreeMap::from([(2021, 1), (2022, 1)]));
        assert_eq!(comparison.podiums_by_season, BTreeMap::from([(2021, 2), (2022, 1)]));
        assert!(!comparison.points_by_season.contains_key(&2023));
        assert_eq!(
            comparison.positions_by_race["Bahrain Grand Prix"],
            BTreeMap::from([(2021, 1), (2022, 1)])
        );
        assert_eq!(comparison.seasons, vec![2021, 2022, 2023]);
    }

    #[test]
    fn test_compare_driver_keeps_unclassified_race() {
        let mut history = ver_history();
        let mut y2023 = SeasonRecord::new(2023);
        y2023.merge(race(3, "Australian Grand Prix", None, 0.0));
        y2023.recompute_statistics();
        history.seasons.insert(2023, y2023);

        let comparison = SeasonComparator::compare_driver(&history, &[]);
        assert!(comparison.positions_by_race["Australian Grand Prix"].is_empty());
        assert_eq!(comparison.points_by_season[&2023], 0.0);
        assert_eq!(comparison.positions_by_race.len(), 3);
    }

    #[test]
    fn test_compare_driver_season_subset() {
        let comparison = SeasonComparator::compare_driver(&ver_history(), &[2022]);
        assert_eq!(comparison.points_by_season.len(), 1);
        assert!(!comparison.positions_by_race.contains_key("Emilia Romagna Grand Prix"));

        let all = SeasonComparator::compare_driver(&ver_history(), &[]);
        assert_eq!(all.seasons, vec![2021, 2022]);
    }

    #[test]
    fn test_compare_team_points_by_race() {
        let mut history = TeamHistory::new("Mercedes");
        let mut season = SeasonRecord::new(2023);
        season.merge(RaceEntry {
            event: EventRef {
                round: 7,
                event_name: "Spanish Grand Prix".to_string(),
                country: "Spain".to_string(),
                date: None,
            },
            result: TeamRaceResult::new(vec![
                TeamDriverResult {
                    driver_code: "HAM".to_string(),
                    position: Some(2),
                    points: 18.0,
                    status: "Finished".to_string(),
                },
                TeamDriverResult {
                    driver_code: "RUS".to_string(),
                    position: Some(5),
                    points: 10.0,
                    status: "Finished".to_string(),
                },
            ]),
        });
        season.recompute_statistics();
        history.seasons.insert(2023, season);

        let comparison = SeasonComparator::compare_team(&history, &[2023]);
        assert_eq!(comparison.points_by_season[&2023], 28.0);
        assert_eq!(comparison.podiums_by_season[&2023], 1);
        assert_eq!(comparison.points_by_race["Spanish Grand Prix"][&2023], 28.0);
    }

    fn champions_source() -> InMemorySource {
        InMemorySource::new()
            .with_schedule(2021, vec![schedule_row(22, "Abu Dhabi Grand Prix", "2021-12-12")])
            .with_schedule(2022, vec![schedule_row(22, "Abu Dhabi Grand Prix", "2022-11-20")])
            .with_standings(
                2021,
                StandingsKind::Driver,
                vec![
                    standing_row("Max Verstappen", Some("ver"), 395.5),
                    standing_row("Lewis Hamilton", Some("HAM"), 387.5),
                ],
            )
            .with_standings(
                2021,
                StandingsKind::Constructor,
                vec![standing_row("Mercedes-AMG Petronas F1 Team", None, 613.5)],
            )
            .with_standings(
                2022,
                StandingsKind::Driver,
                vec![standing_row("Max Verstappen", Some("VER"), 454.0)],
            )
            .with_standings(
                2022,
                StandingsKind::Constructor,
                vec![standing_row("Oracle Red Bull Racing", None, 759.0)],
            )
    }

    struct ChampionsFixture {
        source: Arc<InMemorySource>,
        comparator: SeasonComparator,
        calendars: CalendarCache,
        store: ArtifactStore,
    }

    fn champions_fixture(source: InMemorySource, dir: &std::path::Path, seasons: Vec<Season>) -> ChampionsFixture {
        let source = Arc::new(source);
        let store = ArtifactStore::new(dir);
        ChampionsFixture {
            calendars: CalendarCache::new(source.clone(), store.clone(), seasons, RetryConfig::none()),
            comparator: SeasonComparator::new(source.clone(), store.clone(), RetryConfig::none()),
            source,
            store,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 15).unwrap()
    }

    #[test]
    fn test_champions_resolved_and_memoised() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = champions_fixture(champions_source(), dir.path(), vec![2021, 2022]);
        let teams = TeamAliasTable::builtin();
        let cancel = CancelToken::new();

        let outcome = f
            .comparator
            .compare_champions(&[2021, 2022], &mut f.calendars, &teams, today(), &cancel);
        let champions = &outcome.value;
        let driver_2021 = champions.driver_champions[&2021].as_ref().unwrap();
        assert_eq!(driver_2021.name, "Max Verstappen");
        assert_eq!(driver_2021.code.as_deref(), Some("VER"));
        assert_eq!(champions.team_champions[&2021].as_ref().unwrap().name, "Mercedes");
        assert_eq!(champions.team_champions[&2022].as_ref().unwrap().name, "Red Bull Racing");
        assert!(champions.provisional_seasons.is_empty());
        assert!(f.store.exists(&ArtifactKey::Champions(2021)));

        let fetches = f.source.standings_fetches();
        assert_eq!(fetches, 4);
        f.comparator
            .compare_champions(&[2021, 2022], &mut f.calendars, &teams, today(), &cancel);
        assert_eq!(f.source.standings_fetches(), fetches);
    }

    #[test]
    fn test_persisted_champions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let teams = TeamAliasTable::builtin();
        let cancel = CancelToken::new();
        {
            let mut f = champions_fixture(champions_source(), dir.path(), vec![2021]);
            f.comparator
                .compare_champions(&[2021], &mut f.calendars, &teams, today(), &cancel);
        }

        let mut f = champions_fixture(InMemorySource::new(), dir.path(), vec![2021]);
        let outcome = f
            .comparator
            .compare_champions(&[2021], &mut f.calendars, &teams, today(), &cancel);
        assert_eq!(f.source.standings_fetches(), 0);
        assert_eq!(
            outcome.value.driver_champions[&2021].as_ref().unwrap().points,
            395.5
        );
    }

    #[test]
    fn test_unfinished_season_is_provisional() {
        let dir = tempfile::tempdir().unwrap();
        let source = champions_source()
            .with_schedule(2023, vec![schedule_row(22, "Abu Dhabi Grand Prix", "2023-11-26")])
            .with_standings(
                2023,
                StandingsKind::Driver,
                vec![standing_row("Max Verstappen", Some("VER"), 51.0)],
            )
            .with_standings(
                2023,
                StandingsKind::Constructor,
                vec![standing_row("Red Bull Racing", None, 87.0)],
            );
        let mut f = champions_fixture(source, dir.path(), vec![2023]);
        let teams = TeamAliasTable::builtin();
        let cancel = CancelToken::new();

        let outcome = f
            .comparator
            .compare_champions(&[2023], &mut f.calendars, &teams, today(), &cancel);
        assert_eq!(outcome.value.provisional_seasons, vec![2023]);
        assert!(outcome.value.driver_champions[&2023].is_some());
        assert!(!f.store.exists(&ArtifactKey::Champions(2023)));

        f.comparator
            .compare_champions(&[2023], &mut f.calendars, &teams, today(), &cancel);
        assert_eq!(f.source.standings_fetches(), 4);
    }

    #[test]
    fn test_failed_season_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let source = champions_source().failing_standings(2021);
        let mut f = champions_fixture(source, dir.path(), vec![2021, 2022]);
        let teams = TeamAliasTable::builtin();
        let cancel = CancelToken::new();

        let outcome = f
            .comparator
            .compare_champions(&[2022, 2021], &mut f.calendars, &teams, today(), &cancel);
        assert_eq!(outcome.value.seasons, vec![2021, 2022]);
        assert!(outcome.value.driver_champions[&2021].is_none());
        assert!(outcome.value.team_champions[&2021].is_none());
        assert!(outcome.value.driver_champions[&2022].is_some());
        assert!(outcome.has_kind(ErrorKind::ProviderUnavailable));
        assert!(!f.store.exists(&ArtifactKey::Champions(2021)));
    }
}
