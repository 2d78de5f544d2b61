//! On-disk persistence for cached history artifacts.
//!
//! One JSON artifact per key:
//! - `calendars.json`: every fetched season calendar
//! - `driver_<CODE>.json` / `team_<Name>.json`: one entity history each
//! - `champions_<season>.json`: resolved champion pair for one season

pub mod keys;
pub mod store;

pub use keys::ArtifactKey;
pub use store::ArtifactStore;

/// File-name-safe form of a display name: spaces become underscores.
pub fn artifact_slug(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
