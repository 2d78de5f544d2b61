//! CLI commands for f1-history.
//!
//! Each subcommand runs one query against the manager, prints the result as
//! JSON or a plain table, then flushes pending cache writes.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use f1_history::history::{ChampionsComparison, DriverComparison, TeamComparison};
use f1_history::types::{CalendarEntry, CircuitHistory, DriverHistory, Season, TeamHistory};
use f1_history::{HistoricalDataManager, Outcome};

#[derive(Parser)]
#[command(name = "f1-history")]
#[command(version, about = "F1 History: multi-season results with on-disk caching", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./f1-history.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (json, table)
    #[arg(short, long, global = true, default_value = "json")]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show season calendars
    Calendar {
        /// Single season; every tracked season when omitted
        #[arg(short, long)]
        season: Option<Season>,
    },

    /// Driver history across the tracked seasons
    Driver {
        /// Three-letter driver code (VER, HAM, ...)
        code: String,

        /// Only these events, comma separated; never cached
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<String>,
    },

    /// Team history across the tracked seasons
    Team {
        /// Team name; historical spellings resolve to the canonical one
        name: String,

        /// Only these events, comma separated; never cached
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<String>,
    },

    /// Results of one Grand Prix in every tracked season
    Circuit {
        /// Event name exactly as on the calendar
        event: String,
    },

    /// Compare a driver's seasons
    CompareDriver {
        code: String,

        /// Seasons to compare, comma separated
        #[arg(short, long, value_delimiter = ',')]
        seasons: Vec<Season>,
    },

    /// Compare a team's seasons
    CompareTeam {
        name: String,

        /// Seasons to compare, comma separated
        #[arg(short, long, value_delimiter = ',')]
        seasons: Vec<Season>,
    },

    /// Driver and constructor champions per season
    Champions {
        /// Seasons to resolve, comma separated
        #[arg(short, long, value_delimiter = ',')]
        seasons: Vec<Season>,
    },

    /// Re-fetch a calendar and merge new events into cached histories
    Refresh {
        /// Season whose calendar is fetched again
        #[arg(long)]
        season: Option<Season>,

        /// Driver codes to refresh, comma separated
        #[arg(long, value_delimiter = ',')]
        drivers: Vec<String>,

        /// Team names to refresh, comma separated
        #[arg(long, value_delimiter = ',')]
        teams: Vec<String>,
    },

    /// Delete every cached artifact
    ClearCache,
}

fn event_filter(events: Vec<String>) -> Option<HashSet<String>> {
    if events.is_empty() {
        None
    } else {
        Some(events.into_iter().map(|e| e.trim().to_string()).collect())
    }
}

/// Print an outcome, reporting diagnostics on stderr.
fn emit<T: Serialize>(outcome: &Outcome<T>, format: &str, table: impl FnOnce(&T)) -> anyhow::Result<()> {
    for diag in &outcome.diagnostics {
        eprintln!("warning: {}", diag.message);
    }
    if outcome.interrupted {
        eprintln!("Interrupted: showing partial data");
    }

    match format {
        "table" => table(&outcome.value),
        _ => println!("{}", serde_json::to_string_pretty(outcome)?),
    }
    Ok(())
}

/// Run one command to completion.
pub fn run(manager: &mut HistoricalDataManager, command: Commands, format: String) -> anyhow::Result<()> {
    let format = format.as_str();
    match command {
        Commands::Calendar { season } => match season {
            Some(season) => {
                let outcome = manager.calendar(season);
                emit(&outcome, format, |calendar| print_calendar(season, calendar))?;
            }
            None => {
                let outcome = manager.all_calendars();
                emit(&outcome, format, print_calendars)?;
            }
        },
        Commands::Driver { code, events } => {
            let filter = event_filter(events);
            let outcome = manager.driver_history(&code, filter.as_ref())?;
            emit(&outcome, format, print_driver_history)?;
        }
        Commands::Team { name, events } => {
            let filter = event_filter(events);
            let outcome = manager.team_history(&name, filter.as_ref())?;
            emit(&outcome, format, print_team_history)?;
        }
        Commands::Circuit { event } => {
            let outcome = manager.circuit_history(&event)?;
            emit(&outcome, format, print_circuit_history)?;
        }
        Commands::CompareDriver { code, seasons } => {
            let outcome = manager.compare_driver(&code, &seasons)?;
            emit(&outcome, format, print_driver_comparison)?;
        }
        Commands::CompareTeam { name, seasons } => {
            let outcome = manager.compare_team(&name, &seasons)?;
            emit(&outcome, format, print_team_comparison)?;
        }
        Commands::Champions { seasons } => {
            let outcome = manager.compare_champions(&seasons);
            emit(&outcome, format, print_champions)?;
        }
        Commands::Refresh {
            season,
            drivers,
            teams,
        } => {
            if let Some(season) = season {
                let outcome = manager.refresh_calendar(season);
                emit(&outcome, format, |calendar| print_calendar(season, calendar))?;
            }
            for code in &drivers {
                let outcome = manager.refresh_driver_history(code)?;
                emit(&outcome, format, print_driver_history)?;
            }
            for name in &teams {
                let outcome = manager.refresh_team_history(name)?;
                emit(&outcome, format, print_team_history)?;
            }
        }
        Commands::ClearCache => {
            manager.clear_cache()?;
            eprintln!("Cache cleared");
            return Ok(());
        }
    }

    for diag in manager.flush() {
        eprintln!("warning: {}", diag.message);
    }
    Ok(())
}

fn position_label(position: Option<u32>) -> String {
    match position {
        Some(p) => format!("P{}", p),
        None => "DNF".to_string(),
    }
}

fn print_calendar(season: Season, calendar: &[CalendarEntry]) {
    println!("=== {} Calendar ===", season);
    if calendar.is_empty() {
        println!("  (unavailable)");
    }
    for entry in calendar {
        let date = entry
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "TBD".to_string());
        println!(
            "  {:2}. {:<32} {:<16} {}",
            entry.round, entry.event_name, entry.country, date
        );
    }
    println!();
}

fn print_calendars(calendars: &BTreeMap<Season, Vec<CalendarEntry>>) {
    for (season, calendar) in calendars {
        print_calendar(*season, calendar);
    }
}

fn print_driver_history(history: &DriverHistory) {
    println!("Driver: {}", history.entity_id);
    println!();
    for (season, record) in &history.seasons {
        let stats = record.statistics();
        println!(
            "=== {} === {:.1} pts, {} wins, {} podiums, {} races",
            season, stats.points, stats.wins, stats.podiums, stats.races_completed
        );
        for race in record.races() {
            println!(
                "  R{:<2} {:<32} {:>4} {:>5.1} pts  {}",
                race.event.round,
                race.event.event_name,
                position_label(race.result.position),
                race.result.points,
                race.result.status
            );
        }
        println!();
    }
}

fn print_team_history(history: &TeamHistory) {
    println!("Team: {}", history.entity_id);
    println!();
    for (season, record) in &history.seasons {
        let stats = record.statistics();
        println!(
            "=== {} === {:.1} pts, {} wins, {} podiums ({})",
            season,
            stats.points,
            stats.wins,
            stats.podiums,
            record.drivers().join(", ")
        );
        for race in record.races() {
            let finishes: Vec<String> = race
                .result
                .results
                .iter()
                .map(|r| format!("{} {}", r.driver_code, position_label(r.position)))
                .collect();
            println!(
                "  R{:<2} {:<32} {:>5.1} pts  {}",
                race.event.round,
                race.event.event_name,
                race.result.team_points,
                finishes.join(", ")
            );
        }
        println!();
    }
}

fn print_circuit_history(history: &CircuitHistory) {
    println!("Circuit: {}", history.event_name);
    println!();
    for (season, edition) in &history.seasons {
        let winner = edition
            .winner()
            .map(|w| w.driver.driver_code.as_str())
            .unwrap_or("-");
        let pole = edition
            .pole_sitter
            .as_ref()
            .map(|p| p.driver_code.as_str())
            .unwrap_or("-");
        let podium: Vec<&str> = edition
            .podium()
            .iter()
            .map(|r| r.driver.driver_code.as_str())
            .collect();
        println!(
            "  {}  winner {:<4} pole {:<4} podium {}",
            season,
            winner,
            pole,
            podium.join("-")
        );
    }
}

fn print_season_totals(
    seasons: &[Season],
    points: &BTreeMap<Season, f64>,
    wins: &BTreeMap<Season, u32>,
    podiums: &BTreeMap<Season, u32>,
) {
    println!("  {:<6} {:>8} {:>5} {:>8}", "Season", "Points", "Wins", "Podiums");
    for season in seasons {
        match points.get(season) {
            Some(p) => println!(
                "  {:<6} {:>8.1} {:>5} {:>8}",
                season,
                p,
                wins.get(season).copied().unwrap_or(0),
                podiums.get(season).copied().unwrap_or(0)
            ),
            None => println!("  {:<6} {:>8}", season, "-"),
        }
    }
    println!();
}

fn print_driver_comparison(comparison: &DriverComparison) {
    println!("=== {} by season ===", comparison.driver);
    print_season_totals(
        &comparison.seasons,
        &comparison.points_by_season,
        &comparison.wins_by_season,
        &comparison.podiums_by_season,
    );
    for (event, positions) in &comparison.positions_by_race {
        let cells: Vec<String> = positions
            .iter()
            .map(|(season, p)| format!("{} P{}", season, p))
            .collect();
        println!("  {:<32} {}", event, cells.join("  "));
    }
}

fn print_team_comparison(comparison: &TeamComparison) {
    println!("=== {} by season ===", comparison.team);
    print_season_totals(
        &comparison.seasons,
        &comparison.points_by_season,
        &comparison.wins_by_season,
        &comparison.podiums_by_season,
    );
    for (event, points) in &comparison.points_by_race {
        let cells: Vec<String> = points
            .iter()
            .map(|(season, p)| format!("{} {:.1}", season, p))
            .collect();
        println!("  {:<32} {}", event, cells.join("  "));
    }
}

fn print_champions(comparison: &ChampionsComparison) {
    println!("=== Champions ===");
    for season in &comparison.seasons {
        let driver = comparison
            .driver_champions
            .get(season)
            .and_then(Option::as_ref)
            .map(|c| format!("{} ({:.1})", c.name, c.points))
            .unwrap_or_else(|| "-".to_string());
        let team = comparison
            .team_champions
            .get(season)
            .and_then(Option::as_ref)
            .map(|c| format!("{} ({:.1})", c.name, c.points))
            .unwrap_or_else(|| "-".to_string());
        let marker = if comparison.provisional_seasons.contains(season) {
            " *"
        } else {
            ""
        };
        println!("  {}  {:<28} {}{}", season, driver, team, marker);
    }
    if !comparison.provisional_seasons.is_empty() {
        println!();
        println!("  * provisional: season not finished");
    }
}
