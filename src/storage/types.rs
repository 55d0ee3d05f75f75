//! Core identifier types for the storage layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated model name such as `res.user` or `company.company`.
///
/// Model names double as directory names in the journal, so they are
/// restricted to a filesystem-safe alphabet:
/// - 1-128 characters
/// - lowercase ASCII letters, digits, underscores and dots
/// - must start with a letter
/// - no empty segments (`a..b`, trailing dot)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    /// Create a new ModelName, validating the input.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Name of a built-in model, written as a literal in this crate.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::validate(name).is_ok(), "invalid built-in model name {name}");
        Self(name.to_string())
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let first_char = match name.chars().next() {
            Some(c) => c,
            None => return Err(InvalidNameError::Empty),
        };

        if name.len() > 128 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if !first_char.is_ascii_lowercase() {
            return Err(InvalidNameError::InvalidStart(first_char));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '_' && c != '.' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if name.split('.').any(str::is_empty) {
            return Err(InvalidNameError::EmptySegment(name.to_string()));
        }

        Ok(())
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ModelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ModelName {
    type Err = InvalidNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Database id of a record. Ids are allocated per model and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Backend principal a transaction runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// The anonymous root principal used for connection setup.
    pub const ROOT: UserId = UserId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Error returned when a model name fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,

    #[error("name too long: {0} characters (max 128)")]
    TooLong(usize),

    #[error("name must start with a lowercase letter, found '{0}'")]
    InvalidStart(char),

    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },

    #[error("name contains an empty segment: {0}")]
    EmptySegment(String),
}
