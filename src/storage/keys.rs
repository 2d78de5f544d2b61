//! Artifact naming.

use super::artifact_slug;
use crate::types::Season;

/// Identifies one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    /// Snapshot of every season calendar
    Calendars,
    /// History of one driver, by canonical code
    Driver(String),
    /// History of one team, by canonical name
    Team(String),
    /// Champion pair of one season
    Champions(Season),
}

impl ArtifactKey {
    /// File name inside the store directory
    pub fn file_name(&self) -> String {
        match self {
            ArtifactKey::Calendars => "calendars.json".to_string(),
            ArtifactKey::Driver(code) => format!("driver_{}.json", artifact_slug(code)),
            ArtifactKey::Team(name) => format!("team_{}.json", artifact_slug(name)),
            ArtifactKey::Champions(season) => format!("champions_{}.json", season),
        }
    }

    /// Whether a file name follows one of the artifact naming schemes
    pub fn is_artifact_file(name: &str) -> bool {
        if name == "calendars.json" {
            return true;
        }
        let Some(stem) = name.strip_suffix(".json") else {
            return false;
        };
        ["driver_", "team_"]
            .iter()
            .any(|prefix| stem.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty()))
            || stem
                .strip_prefix("champions_")
                .is_some_and(|season| season.parse::<Season>().is_ok())
    }
}
