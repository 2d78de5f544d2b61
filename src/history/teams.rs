//! Team name canonicalization.
//!
//! Constructors race under sponsor and rebrand spellings; every spelling in
//! the table resolves to one canonical name used for attribution and as the
//! storage key.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::TeamAliasConfig;
use crate::error::{HistoryError, Result};

const BUILTIN_ALIASES: &[(&str, &[&str])] = &[
    (
        "Red Bull Racing",
        &[
            "Red Bull",
            "Red Bull Racing Honda",
            "Red Bull Racing Honda RBPT",
            "Red Bull Racing RBPT",
            "Oracle Red Bull Racing",
        ],
    ),
    ("Mercedes", &["Mercedes-AMG Petronas", "Mercedes-AMG Petronas F1 Team"]),
    ("Ferrari", &["Scuderia Ferrari", "Scuderia Ferrari Mission Winnow"]),
    ("McLaren", &["McLaren F1 Team", "McLaren Mercedes"]),
    (
        "Aston Martin",
        &["Aston Martin Aramco", "Aston Martin Aramco Cognizant", "Racing Point"],
    ),
    ("Alpine", &["Alpine F1 Team", "BWT Alpine F1 Team", "Renault"]),
    (
        "RB",
        &["AlphaTauri", "Scuderia AlphaTauri", "Visa Cash App RB", "Racing Bulls"],
    ),
    ("Kick Sauber", &["Sauber", "Alfa Romeo", "Alfa Romeo Racing"]),
    ("Williams", &["Williams Racing"]),
    ("Haas F1 Team", &["Haas", "MoneyGram Haas F1 Team"]),
];

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonical team name to its known historical spellings.
#[derive(Debug, Clone, Default)]
pub struct TeamAliasTable {
    teams: BTreeMap<String, BTreeSet<String>>,
    /// normalized spelling -> canonical
    lookup: HashMap<String, String>,
}

impl TeamAliasTable {
    /// Empty table: every name is its own canonical form
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of the spellings used across the 2021-2025 grid
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (canonical, aliases) in BUILTIN_ALIASES {
            table.add_unchecked(canonical, aliases.iter().copied());
        }
        table
    }

    /// Build a validated table from `(canonical, aliases)` pairs
    pub fn from_entries<'a, I, A>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, A)>,
        A: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new();
        for (canonical, aliases) in entries {
            table.add(canonical, aliases)?;
        }
        Ok(table)
    }

    /// Built-in table extended with configured aliases
    pub fn with_config(overrides: &[TeamAliasConfig]) -> Result<Self> {
        let mut table = Self::builtin();
        for entry in overrides {
            table.add(&entry.canonical, entry.aliases.iter().map(String::as_str))?;
        }
        Ok(table)
    }

    /// Register a canonical name and aliases, rejecting empty names and
    /// spellings already claimed by another team.
    pub fn add<'a>(
        &mut self,
        canonical: &str,
        aliases: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let canonical = canonical.trim();
        if canonical.is_empty() {
            return Err(HistoryError::Config("empty canonical team name".to_string()));
        }
        let aliases: Vec<&str> = aliases.into_iter().map(str::trim).collect();

        for name in std::iter::once(canonical).chain(aliases.iter().copied()) {
            if name.is_empty() {
                return Err(HistoryError::Config(format!(
                    "empty alias for team {}",
                    canonical
                )));
            }
            if let Some(owner) = self.lookup.get(&normalize(name)) {
                if owner != canonical {
                    return Err(HistoryError::Config(format!(
                        "team spelling '{}' claimed by both '{}' and '{}'",
                        name, owner, canonical
                    )));
                }
            }
        }

        self.add_unchecked(canonical, aliases);
        Ok(())
    }

    fn add_unchecked<'a>(&mut self, canonical: &str, aliases: impl IntoIterator<Item = &'a str>) {
        let entry = self.teams.entry(canonical.to_string()).or_default();
        self.lookup
            .insert(normalize(canonical), canonical.to_string());
        for alias in aliases {
            entry.insert(alias.to_string());
            self.lookup.insert(normalize(alias), canonical.to_string());
        }
    }

    /// Canonical name for a raw spelling; unknown names pass through trimmed.
    pub fn canonicalize(&self, raw: &str) -> String {
        self.lookup
            .get(&normalize(raw))
            .cloned()
            .unwrap_or_else(|| raw.trim().to_string())
    }

    /// Whether `raw` is a spelling of `canonical`
    pub fn matches(&self, canonical: &str, raw: &str) -> bool {
        self.canonicalize(raw) == canonical
    }

    pub fn aliases(&self, canonical: &str) -> Option<&BTreeSet<String>> {
        self.teams.get(canonical)
    }
}
