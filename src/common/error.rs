//! Error types for the harness
//!
//! The taxonomy follows the run lifecycle: a build or spawn failure aborts
//! the whole run, everything else is local to the step or case that hit it.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Server process errors (fatal for the run) ===
    #[error("Build command '{command}' failed: {reason}")]
    Build { command: String, reason: String },

    #[error("Failed to start '{binary}': {reason}")]
    Spawn { binary: String, reason: String },

    // === Session errors (local to a step) ===
    #[error("Client '{0}' is already connected")]
    AlreadyConnected(String),

    #[error("Failed to connect client '{role}': {reason}")]
    Connect { role: String, reason: String },

    #[error("Send through client '{role}' failed: {reason}")]
    Send { role: String, reason: String },

    // === Matching errors ===
    #[error("No line matched '{pattern}' within {timeout_ms} ms; last received: {tail}")]
    MatchTimeout {
        pattern: String,
        timeout_ms: u64,
        tail: String,
    },

    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    // === Scenario errors ===
    #[error("Unknown procedure '{0}'")]
    UnknownProcedure(String),

    #[error("Scenario error: {0}")]
    Scenario(String),

    // === Configuration errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    // === IO errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },
}

impl Error {
    /// Create a spawn error for a binary that could not be started
    pub fn spawn(binary: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::Spawn {
            binary: binary.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a connect error for a client role
    pub fn connect(role: &str, reason: impl std::fmt::Display) -> Self {
        Self::Connect {
            role: role.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a send error for a client role
    pub fn send(role: &str, reason: impl std::fmt::Display) -> Self {
        Self::Send {
            role: role.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a match-timeout error carrying the tail of the session log
    pub fn match_timeout(
        pattern: impl std::fmt::Display,
        timeout: Duration,
        tail: Vec<String>,
    ) -> Self {
        Self::MatchTimeout {
            pattern: pattern.to_string(),
            timeout_ms: timeout.as_millis() as u64,
            tail: if tail.is_empty() {
                "<nothing>".to_string()
            } else {
                tail.join(" | ")
            },
        }
    }
}
