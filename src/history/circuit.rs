//! Cross-season history of one Grand Prix.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::calendar::CalendarCache;
use super::teams::TeamAliasTable;
use super::CancelToken;
use crate::error::{Diagnostic, HistoryError, Outcome, Result};
use crate::source::{fetch_with_deadline, ResultRow, SessionDataSource};
use crate::types::{CircuitHistory, CircuitSeason, ClassifiedResult, DriverIdentity, Season};

fn identity(row: &ResultRow, teams: &TeamAliasTable) -> DriverIdentity {
    DriverIdentity {
        driver_code: row.driver_code.trim().to_uppercase(),
        driver_name: row.driver_name.clone(),
        team: teams.canonicalize(&row.team_name),
    }
}

fn classify(row: &ResultRow, teams: &TeamAliasTable) -> ClassifiedResult {
    ClassifiedResult {
        driver: identity(row, teams),
        result: row.race_result(),
    }
}

/// Builds [`CircuitHistory`] views. Nothing is cached; every call re-fetches.
pub struct CircuitHistoryAggregator {
    source: Arc<dyn SessionDataSource>,
    seasons: Vec<Season>,
    fetch_timeout: Duration,
}

impl CircuitHistoryAggregator {
    pub fn new(source: Arc<dyn SessionDataSource>, seasons: Vec<Season>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            seasons,
            fetch_timeout,
        }
    }

    /// Race results of `event_name` in every tracked season that held it.
    ///
    /// The event is matched by exact name against each season's calendar.
    /// A season whose race cannot be loaded is omitted and reported as a
    /// diagnostic. `NoData` means no tracked season lists the event at all.
    /// Team names are reported under their canonical name.
    pub fn circuit_history(
        &self,
        event_name: &str,
        calendars: &mut CalendarCache,
        teams: &TeamAliasTable,
        cancel: &CancelToken,
    ) -> Result<Outcome<CircuitHistory>> {
        let event_name = event_name.trim();
        let mut diagnostics = Vec::new();
        let mut seasons = BTreeMap::new();
        let mut scheduled = 0usize;
        let mut interrupted = false;

        info!("Retrieving circuit history for {}", event_name);
        for &season in &self.seasons {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let Some(event) = calendars
                .calendar(season, cancel, &mut diagnostics)
                .iter()
                .find(|e| e.event_name == event_name)
                .cloned()
            else {
                debug!("{} not on the {} calendar", event_name, season);
                continue;
            };
            scheduled += 1;

            let what = format!("{} {} race", season, event_name);
            let fetched = fetch_with_deadline(self.fetch_timeout, &what, || {
                self.source.fetch_race_results(season, event_name)
            })
            .and_then(|rows| {
                if rows.is_empty() {
                    Err(HistoryError::not_found(&what))
                } else {
                    Ok(rows)
                }
            });

            match fetched {
                Ok(rows) => {
                    let pole_sitter = rows
                        .iter()
                        .find(|r| r.grid_slot() == Some(1))
                        .map(|r| identity(r, teams));
                    seasons.insert(
                        season,
                        CircuitSeason {
                            year: season,
                            date: event.date,
                            results: rows.iter().map(|r| classify(r, teams)).collect(),
                            pole_sitter,
                        },
                    );
                }
                Err(HistoryError::Cancelled) => {
                    interrupted = true;
                    break;
                }
                Err(e) => {
                    warn!("Could not load data for {} {}: {}", season, event_name, e);
                    diagnostics.push(Diagnostic::from_error(&e, Some(season), Some(event_name)));
                }
            }
        }

        if scheduled == 0 && !interrupted {
            return Err(HistoryError::no_data(format!("circuit {}", event_name)));
        }

        let mut outcome = Outcome::with_diagnostics(
            CircuitHistory {
                event_name: event_name.to_string(),
                seasons,
            },
            diagnostics,
        );
        outcome.interrupted = interrupted;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::retry::RetryConfig;
    use crate::source::memory::{result_row, schedule_row};
    use crate::source::InMemorySource;
    use crate::storage::ArtifactStore;

    fn monaco_source() -> InMemorySource {
        InMemorySource::new()
            .with_schedule(
                2022,
                vec![
                    schedule_row(7, "Monaco Grand Prix", "2022-05-29"),
                    schedule_row(8, "Azerbaijan Grand Prix", "2022-06-12"),
                ],
            )
            .with_schedule(2023, vec![schedule_row(6, "Monaco Grand Prix", "2023-05-28")])
            .with_schedule(2024, vec![schedule_row(8, "Monaco Grand Prix", "2024-05-26")])
            .with_results(
                2022,
                "Monaco Grand Prix",
                vec![
                    result_row("PER", "Red Bull Racing", Some(1), 25.0, Some(3)),
                    result_row("SAI", "Ferrari", Some(2), 18.0, Some(2)),
                    result_row("VER", "Red Bull Racing", Some(3), 15.0, Some(4)),
                    result_row("LEC", "Ferrari", Some(4), 12.0, Some(1)),
                ],
            )
            .with_results(
                2023,
                "Monaco Grand Prix",
                vec![
                    result_row("VER", "Red Bull Racing", Some(1), 25.0, Some(1)),
                    result_row("ALO", "Aston Martin", Some(2), 18.0, Some(2)),
                    result_row("OCO", "Alpine", Some(3), 15.0, Some(3)),
                ],
            )
            .failing_results(2024, "Monaco Grand Prix")
    }

    fn setup(source: InMemorySource, dir: &std::path::Path) -> (CircuitHistoryAggregator, CalendarCache) {
        let source = Arc::new(source);
        let seasons = vec![2022, 2023, 2024];
        let calendars = CalendarCache::new(
            source.clone(),
            ArtifactStore::new(dir),
            seasons.clone(),
            RetryConfig::none(),
        );
        (
            CircuitHistoryAggregator::new(source, seasons, Duration::from_secs(30)),
            calendars,
        )
    }

    #[test]
    fn test_circuit_history_by_season() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, mut calendars) = setup(monaco_source(), dir.path());

        let outcome = aggregator
            .circuit_history(
                "Monaco Grand Prix",
                &mut calendars,
                &TeamAliasTable::builtin(),
                &CancelToken::new(),
            )
            .unwrap();
        let history = &outcome.value;

        assert_eq!(history.seasons.len(), 2);
        let y2022 = &history.seasons[&2022];
        assert_eq!(y2022.winner().unwrap().driver.driver_code, "PER");
        assert_eq!(y2022.pole_sitter.as_ref().unwrap().driver_code, "LEC");
        let order: Vec<&str> = y2022
            .results
            .iter()
            .map(|r| r.driver.driver_code.as_str())
            .collect();
        assert_eq!(order, vec!["PER", "SAI", "VER", "LEC"]);
        assert_eq!(y2022.podium().len(), 3);
        assert_eq!(y2022.results[0].driver.team, "Red Bull Racing");

        // 2024 failed and is omitted with a diagnostic
        assert!(!history.seasons.contains_key(&2024));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].season, Some(2024));
        assert_eq!(outcome.diagnostics[0].kind, ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn test_circuit_history_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(monaco_source());
        let seasons = vec![2022, 2023];
        let mut calendars = CalendarCache::new(
            source.clone(),
            ArtifactStore::new(dir.path()),
            seasons.clone(),
            RetryConfig::none(),
        );
        let aggregator = CircuitHistoryAggregator::new(source.clone(), seasons, Duration::from_secs(30));
        let teams = TeamAliasTable::builtin();
        let cancel = CancelToken::new();

        aggregator
            .circuit_history("Monaco Grand Prix", &mut calendars, &teams, &cancel)
            .unwrap();
        aggregator
            .circuit_history("Monaco Grand Prix", &mut calendars, &teams, &cancel)
            .unwrap();
        assert_eq!(source.race_fetches(), 4);
    }

    #[test]
    fn test_exact_name_match() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, mut calendars) = setup(monaco_source(), dir.path());

        let err = aggregator
            .circuit_history(
                "Monaco",
                &mut calendars,
                &TeamAliasTable::builtin(),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoData);
    }

    #[test]
    fn test_event_in_single_season() {
        let dir = tempfile::tempdir().unwrap();
        let source = monaco_source().with_results(
            2022,
            "Azerbaijan Grand Prix",
            vec![result_row("PER", "Red Bull Racing", Some(2), 18.0, None)],
        );
        let (aggregator, mut calendars) = setup(source, dir.path());

        let history = aggregator
            .circuit_history(
                "Azerbaijan Grand Prix",
                &mut calendars,
                &TeamAliasTable::builtin(),
                &CancelToken::new(),
            )
            .unwrap()
            .into_inner();
        assert_eq!(history.seasons.keys().copied().collect::<Vec<_>>(), vec![2022]);
        assert!(history.seasons[&2022].pole_sitter.is_none());
        assert!(history.seasons[&2022].winner().is_none());
    }

    #[test]
    fn test_team_names_are_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemorySource::new()
            .with_schedule(2021, vec![schedule_row(5, "Monaco Grand Prix", "2021-05-23")])
            .with_results(
                2021,
                "Monaco Grand Prix",
                vec![
                    result_row("VER", "Red Bull Racing Honda", Some(1), 25.0, Some(2)),
                    result_row("SAI", "Scuderia Ferrari", Some(2), 18.0, Some(4)),
                    result_row("LEC", "Ferrari", None, 0.0, Some(1)),
                ],
            );
        let (aggregator, mut calendars) = setup(source, dir.path());

        let history = aggregator
            .circuit_history(
                "Monaco Grand Prix",
                &mut calendars,
                &TeamAliasTable::builtin(),
                &CancelToken::new(),
            )
            .unwrap()
            .into_inner();
        let y2021 = &history.seasons[&2021];
        let teams: Vec<&str> = y2021.results.iter().map(|r| r.driver.team.as_str()).collect();
        assert_eq!(teams, vec!["Red Bull Racing", "Ferrari", "Ferrari"]);
        let pole = y2021.pole_sitter.as_ref().unwrap();
        assert_eq!(pole.driver_code, "LEC");
        assert_eq!(pole.team, "Ferrari");
    }
}
