//! Error types for the game simulation.
//!
//! Command admission does not use these: it reports a
//! [`CommandResult`](crate::command::CommandResult) instead, since a rejected
//! command is an expected outcome rather than a fault.

use thiserror::Error;

use crate::commander::NetworkError;
use crate::config::ConfigError;
use crate::unit::UnitReference;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all game simulation errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// Faction index outside the world's faction list.
    #[error("Unknown faction index: {0}")]
    UnknownFaction(usize),

    /// Unit id not present in any faction roster.
    #[error("Unit not found: {0}")]
    UnitNotFound(u32),

    /// Unit reference that no longer resolves.
    #[error("Unit reference does not resolve: {0:?}")]
    DanglingReference(UnitReference),

    /// Named type missing from the tech tree.
    #[error("Unknown {kind} type: {name}")]
    UnknownType {
        /// Kind of type looked up (unit, upgrade, resource, command).
        kind: &'static str,
        /// Name that failed to resolve.
        name: String,
    },

    /// Content that parsed but failed cross-reference validation.
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Content file parsing error.
    #[error("Failed to parse content: {0}")]
    ParseError(#[from] ron::error::SpannedError),

    /// No free cell was found to place a unit.
    #[error("No free placement near ({x}, {y})")]
    NoPlacement {
        /// Search origin x.
        x: i32,
        /// Search origin y.
        y: i32,
    },

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Session configuration rejected at init.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The network collaborator failed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Desync detected in multiplayer.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },
}
