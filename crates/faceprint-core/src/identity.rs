//! Identity names and their storage-key normalization.

use std::fmt;
use thiserror::Error;

/// Separator that replaces spaces in a normalized identity key.
pub const KEY_SEPARATOR: char = '_';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity name is empty")]
    Empty,
    #[error("identity name {0:?} contains a path separator or control character")]
    InvalidCharacter(String),
}

/// An enrolled person, keyed by their normalized name.
///
/// Equality and hashing use only the key, so "Ana Maria" and "ana maria"
/// are the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    key: String,
}

impl Identity {
    /// Normalize a human-entered name: trim, lowercase, spaces → `_`.
    pub fn new(name: &str) -> Result<Self, IdentityError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        if trimmed
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
            || trimmed == "."
            || trimmed == ".."
        {
            return Err(IdentityError::InvalidCharacter(trimmed.to_string()));
        }

        let key = trimmed
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' { KEY_SEPARATOR } else { c })
            .collect();

        Ok(Self { key })
    }

    /// Rebuild an identity from a key already on disk, without re-normalizing.
    pub(crate) fn from_key(key: &str) -> Result<Self, IdentityError> {
        if key.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self { key: key.to_string() })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Human-facing form of the key: `_` → space, first letter uppercased.
    ///
    /// Lossy by nature (case is gone); never use it for lookups.
    pub fn display_name(&self) -> String {
        let spaced: String = self
            .key
            .chars()
            .map(|c| if c == KEY_SEPARATOR { ' ' } else { c })
            .collect();

        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
