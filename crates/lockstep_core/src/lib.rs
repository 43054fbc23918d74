//! # Lockstep Core
//!
//! Deterministic simulation core of a real-time strategy game.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No wall clock
//! - No randomness
//! - No floating-point math in the simulation (uses fixed-point)
//!
//! Every peer of a networked game runs the same [`world::World`] on the same
//! commands in the same order, and ends up in the same state.
//!
//! ## Crate Structure
//!
//! - [`tech`] - Declarative content: resource, unit, command and upgrade types
//! - [`ledger`] - Per-faction resources and upgrades
//! - [`command`] - Commands, admission results and per-unit queues
//! - [`unit`] - Units, their lifecycle and command validation
//! - [`updater`] - Per-tick skill progress and command behaviour
//! - [`world`] - The world and its fixed tick order
//! - [`commander`] - Canonical command ordering across peers
//! - [`facade`] - What AI and UI may query and order
//! - [`snapshot`] - Read-only render state
//! - [`game`] - Sessions, victory and tick scheduling
//! - [`replay`] - Recording and playback
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod command;
pub mod commander;
pub mod config;
pub mod effects;
pub mod error;
pub mod facade;
pub mod faction;
pub mod fog;
pub mod game;
pub mod ledger;
pub mod map;
pub mod math;
pub mod pathfinding;
pub mod replay;
pub mod snapshot;
pub mod tech;
pub mod unit;
pub mod updater;
pub mod world;

#[cfg(test)]
mod testing;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::command::{Command, CommandResult};
    pub use crate::commander::{Commander, LocalNetwork, NetworkCommand, NetworkInterface};
    pub use crate::config::{ControlType, GameSettings, GameSpeed, VictoryMode};
    pub use crate::effects::{EffectLog, EffectSink, Hooks, NullEffects, ObserverRegistry};
    pub use crate::error::{GameError, Result};
    pub use crate::facade::{FactionFacade, PlayerFacade, SightedUnit};
    pub use crate::faction::Faction;
    pub use crate::game::{AiController, Game, GameOutcome, ScriptHook, ScriptedAi, TickScheduler};
    pub use crate::map::Map;
    pub use crate::math::{Fixed, GridPos};
    pub use crate::replay::{Replay, ReplayPlayer};
    pub use crate::snapshot::WorldSnapshot;
    pub use crate::tech::{CommandClass, SkillClass, TechTree, UnitTypeId};
    pub use crate::unit::{Unit, UnitId, UnitReference};
    pub use crate::world::World;
}
