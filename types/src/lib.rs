//! Core domain types for Spindle.
//!
//! This crate contains pure domain types with no IO, no threads, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod classpath;
mod ids;
mod overlay;
mod policy;
mod request;

pub use classpath::{Classpath, ClasspathEntry, ClasspathError};
pub use ids::{LiveFilter, ThreadId, ThreadKind};
pub use overlay::OverlayEntries;
pub use policy::{ShutdownPolicy, TerminationTimeout};
pub use request::InvocationRequest;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Entry point identifier
// ============================================================================

/// Name of the callable an invocation runs, e.g. `com.example.Main`.
///
/// Invariant: non-empty and free of whitespace. Existence of a value is the
/// proof of its validity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryPointId(String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntryPointIdError {
    #[error("entry point name must not be empty")]
    Empty,
    #[error("entry point name must not contain whitespace: {0:?}")]
    Whitespace(String),
}

impl EntryPointId {
    pub fn new(value: impl Into<String>) -> Result<Self, EntryPointIdError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EntryPointIdError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(EntryPointIdError::Whitespace(value));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntryPointId {
    type Error = EntryPointIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for EntryPointId {
    type Error = EntryPointIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntryPointId> for String {
    fn from(value: EntryPointId) -> Self {
        value.0
    }
}

impl std::fmt::Display for EntryPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryPointId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
