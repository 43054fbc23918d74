//! Scenario loading.
//!
//! A scenario is a content directory holding `settings.ron`, `tech.ron` and
//! `map.ron`. Files are read here; parsing is left to the core.

use std::path::{Path, PathBuf};

use lockstep_core::commander::LocalNetwork;
use lockstep_core::config::{ConfigError, GameSettings};
use lockstep_core::effects::NullEffects;
use lockstep_core::error::GameError;
use lockstep_core::game::Game;
use lockstep_core::map::Map;
use lockstep_core::replay::Replay;
use lockstep_core::tech::TechTree;
use thiserror::Error;

/// Settings file name inside a content directory.
pub const SETTINGS_FILE: &str = "settings.ron";
/// Tech tree file name inside a content directory.
pub const TECH_FILE: &str = "tech.ron";
/// Map file name inside a content directory.
pub const MAP_FILE: &str = "map.ron";

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read or write a file.
    #[error("Failed to access scenario file: {0}")]
    Io(#[from] std::io::Error),
    /// Settings were rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The simulation refused the content or failed.
    #[error(transparent)]
    Game(#[from] GameError),
    /// JSON report could not be written.
    #[error("Failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}

/// Settings, tech tree and map of one session.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Session settings.
    pub settings: GameSettings,
    /// Tech tree.
    pub tech: TechTree,
    /// Map resolved against the tech tree.
    pub map: Map,
}

fn read(path: &Path) -> Result<String, ScenarioError> {
    if !path.exists() {
        return Err(ScenarioError::FileNotFound(path.display().to_string()));
    }
    Ok(std::fs::read_to_string(path)?)
}

impl Scenario {
    /// Load a content directory.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ScenarioError> {
        let dir = dir.as_ref();
        Self::load_files(&dir.join(SETTINGS_FILE), &dir.join(TECH_FILE), &dir.join(MAP_FILE))
    }

    /// Load from three explicit files.
    pub fn load_files(settings: &Path, tech: &Path, map: &Path) -> Result<Self, ScenarioError> {
        let scenario = Self::from_ron_strs(&read(settings)?, &read(tech)?, &read(map)?)?;
        tracing::info!(
            settings = %settings.display(),
            tech = %scenario.tech.name,
            map = %scenario.map.name,
            "scenario loaded"
        );
        Ok(scenario)
    }

    /// Parse from RON sources.
    pub fn from_ron_strs(settings: &str, tech: &str, map: &str) -> Result<Self, ScenarioError> {
        let settings = GameSettings::from_ron_str(settings)?;
        let tech = TechTree::from_ron_str(tech)?;
        let map = Map::from_ron_str(map, &tech)?;
        Ok(Self {
            settings,
            tech,
            map,
        })
    }

    /// Start a local session with every AI faction under the scripted
    /// controller.
    pub fn start(&self) -> Result<Game, ScenarioError> {
        let mut game = Game::new(
            self.settings.clone(),
            self.tech.clone(),
            self.map.clone(),
            Box::new(LocalNetwork::new()),
            Box::new(NullEffects),
        )?;
        game.attach_scripted_ai();
        Ok(game)
    }
}

/// Write a replay with bincode.
pub fn save_replay(replay: &Replay, path: &Path) -> Result<(), ScenarioError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, replay.to_bytes()?)?;
    tracing::info!(path = %path.display(), commands = replay.command_count(), "replay saved");
    Ok(())
}

/// Read a replay written by [`save_replay`].
pub fn load_replay(path: &Path) -> Result<Replay, ScenarioError> {
    if !path.exists() {
        return Err(ScenarioError::FileNotFound(path.display().to_string()));
    }
    Ok(Replay::from_bytes(&std::fs::read(path)?)?)
}

/// The bundled skirmish content directory.
#[must_use]
pub fn default_content_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../content/skirmish")
}
