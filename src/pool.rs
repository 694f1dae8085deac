//! Instant-keyed pools of named snapshots or archives.
//!
//! A pool maps each instant to the name that carries it. Names are always
//! `prefix + formatted instant`; the instant parsed back from a name is the
//! sole identity key within a pool.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use thiserror::Error;

/// Naming scheme for one pool: a prefix plus a chrono format pattern.
#[derive(Debug, Clone)]
pub struct Naming {
    prefix: String,
    pattern: String,
}

impl Naming {
    pub fn new(prefix: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            pattern: pattern.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Render the name for an instant.
    pub fn format(&self, instant: NaiveDateTime) -> String {
        format!("{}{}", self.prefix, instant.format(&self.pattern))
    }

    /// Whether a listed name belongs to this naming scheme at all.
    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    /// Extract the instant from a name.
    ///
    /// The name must carry the prefix and its suffix must parse against the
    /// configured pattern; anything else is an error, never a silent skip.
    pub fn parse(&self, name: &str) -> Result<NaiveDateTime, NameError> {
        let suffix = name
            .strip_prefix(&self.prefix)
            .ok_or_else(|| NameError::MissingPrefix {
                name: name.to_string(),
                prefix: self.prefix.clone(),
            })?;
        NaiveDateTime::parse_from_str(suffix, &self.pattern).map_err(|source| {
            NameError::InvalidTimestamp {
                name: name.to_string(),
                pattern: self.pattern.clone(),
                source,
            }
        })
    }
}

/// Ordered mapping from instant to name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pool {
    entries: BTreeMap<NaiveDateTime, String>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instant: NaiveDateTime, name: String) {
        self.entries.insert(instant, name);
    }

    /// Insert while parsing a listing. Two distinct names resolving to the
    /// same instant make the pool ambiguous and are rejected outright.
    pub fn try_insert(&mut self, instant: NaiveDateTime, name: String) -> Result<(), NameError> {
        if let Some(existing) = self.entries.get(&instant)
            && *existing != name
        {
            return Err(NameError::DuplicateInstant {
                instant,
                first: existing.clone(),
                second: name,
            });
        }
        self.entries.insert(instant, name);
        Ok(())
    }

    pub fn remove(&mut self, instant: &NaiveDateTime) -> Option<String> {
        self.entries.remove(instant)
    }

    pub fn get(&self, instant: &NaiveDateTime) -> Option<&str> {
        self.entries.get(instant).map(String::as_str)
    }

    pub fn contains(&self, instant: &NaiveDateTime) -> bool {
        self.entries.contains_key(instant)
    }

    /// All instants, ascending.
    pub fn instants(&self) -> Vec<NaiveDateTime> {
        self.entries.keys().copied().collect()
    }

    pub fn latest(&self) -> Option<NaiveDateTime> {
        self.entries.keys().next_back().copied()
    }

    /// Entries in ascending instant order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Restrict the pool to the instants for which `predicate` holds.
    pub fn filtered(&self, mut predicate: impl FnMut(NaiveDateTime) -> bool) -> Pool {
        Pool {
            entries: self
                .entries
                .iter()
                .filter(|(instant, _)| predicate(**instant))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }
}

/// Parse the raw output of a snapshot listing.
///
/// The last whitespace-delimited token of each non-empty line is a candidate
/// name. Names without the configured prefix are foreign subvolumes and are
/// skipped; a prefixed name that fails to parse is fatal.
pub fn parse_snapshot_listing(raw: &str, naming: &Naming) -> Result<Pool, NameError> {
    let mut pool = Pool::new();
    for line in raw.lines() {
        let Some(name) = line.split_whitespace().next_back() else {
            continue;
        };
        if !naming.matches(name) {
            continue;
        }
        let instant = naming.parse(name)?;
        pool.try_insert(instant, name.to_string())?;
    }
    Ok(pool)
}

/// Parse the raw output of an archive listing.
///
/// The first whitespace-delimited token of each non-empty line is an archive
/// name. Every listed name must carry the configured prefix and must parse;
/// a repository holding anything else is not ours to prune.
pub fn parse_archive_listing(raw: &str, naming: &Naming) -> Result<Pool, NameError> {
    let mut pool = Pool::new();
    for line in raw.lines() {
        let Some(name) = line.split_whitespace().next() else {
            continue;
        };
        let instant = naming.parse(name)?;
        pool.try_insert(instant, name.to_string())?;
    }
    Ok(pool)
}

/// Errors raised while mapping listed names to instants.
#[derive(Error, Debug)]
pub enum NameError {
    /// A name does not start with the configured prefix.
    #[error("name '{name}' should start with '{prefix}'")]
    MissingPrefix { name: String, prefix: String },

    /// A prefixed name whose suffix violates the configured pattern.
    #[error("name '{name}' does not match timestamp pattern '{pattern}': {source}")]
    InvalidTimestamp {
        name: String,
        pattern: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Two distinct names in one listing resolve to the same instant.
    #[error("names '{first}' and '{second}' both resolve to {instant}")]
    DuplicateInstant {
        instant: NaiveDateTime,
        first: String,
        second: String,
    },
}
