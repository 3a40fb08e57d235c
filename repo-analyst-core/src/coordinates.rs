use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Owner and name of a hosted repository, parsed once from `"owner/name"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryCoordinates {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatesError {
    #[error("repository identifier is empty")]
    Empty,
    #[error("repository identifier {0:?} must have the form owner/name")]
    MissingSeparator(String),
    #[error("repository identifier {0:?} has an empty owner or name")]
    EmptySegment(String),
    #[error("repository identifier {0:?} contains characters outside [A-Za-z0-9._-]")]
    InvalidCharacters(String),
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static pattern compiles"))
}

impl RepositoryCoordinates {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses `"owner/name"`. Surrounding whitespace is ignored; anything
    /// other than exactly one separator between two valid segments is
    /// rejected.
    pub fn parse(full_name: &str) -> Result<Self, CoordinatesError> {
        let trimmed = full_name.trim();
        if trimmed.is_empty() {
            return Err(CoordinatesError::Empty);
        }

        let (owner, name) = trimmed
            .split_once('/')
            .ok_or_else(|| CoordinatesError::MissingSeparator(trimmed.to_string()))?;

        if owner.is_empty() || name.is_empty() {
            return Err(CoordinatesError::EmptySegment(trimmed.to_string()));
        }
        if !segment_pattern().is_match(owner) || !segment_pattern().is_match(name) {
            return Err(CoordinatesError::InvalidCharacters(trimmed.to_string()));
        }

        Ok(Self::new(owner, name))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryCoordinates {
    type Err = CoordinatesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepositoryCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
