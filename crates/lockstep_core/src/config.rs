//! Session settings loaded from RON and validated once at startup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::world::constants::UPDATE_FPS;

/// Contradictory session configuration. Fatal: reported before any tick.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Every peer must see the same hidden information.
    #[error("Fog of war cannot be disabled in a network game")]
    FogOfWarDisabledInNetworkGame,

    /// No faction slots.
    #[error("Session has no factions")]
    NoFactions,

    /// Local faction index does not exist.
    #[error("Local faction {index} out of range ({count} factions)")]
    ThisFactionOutOfRange {
        /// Configured index.
        index: usize,
        /// Faction count.
        count: usize,
    },

    /// Two factions share a start location.
    #[error("Start location {0} assigned twice")]
    DuplicateStartLocation(usize),

    /// The local faction must be human controlled in a network game.
    #[error("Local faction {0} is not human controlled")]
    LocalFactionNotHuman(usize),

    /// Settings file failed to parse.
    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

/// Who drives a faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlType {
    /// The local player.
    Human,
    /// A local AI controller.
    Ai,
    /// A remote peer.
    Network,
    /// Slot left empty: the faction exists but nobody commands it.
    Closed,
}

/// How fast fixed ticks are released relative to real time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameSpeed {
    /// Half speed.
    Slow,
    /// One tick per `1 / UPDATE_FPS` seconds.
    #[default]
    Normal,
    /// Double speed.
    Fast,
}

impl GameSpeed {
    /// Ticks released per real second.
    #[must_use]
    pub const fn ticks_per_second(self) -> u32 {
        match self {
            Self::Slow => UPDATE_FPS / 2,
            Self::Normal => UPDATE_FPS,
            Self::Fast => UPDATE_FPS * 2,
        }
    }

    /// One step faster, saturating.
    #[must_use]
    pub const fn faster(self) -> Self {
        match self {
            Self::Slow => Self::Normal,
            Self::Normal | Self::Fast => Self::Fast,
        }
    }

    /// One step slower, saturating.
    #[must_use]
    pub const fn slower(self) -> Self {
        match self {
            Self::Fast => Self::Normal,
            Self::Normal | Self::Slow => Self::Slow,
        }
    }
}

/// How the winner is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VictoryMode {
    /// A faction without buildings loses.
    #[default]
    Standard,
    /// A script decides through the world's scripting flags.
    Scripted,
}

/// One faction slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactionSettings {
    /// Display name.
    pub name: String,
    /// Controller.
    pub control: ControlType,
    /// Team; factions on one team are allies.
    pub team: usize,
    /// Map start location index.
    pub start_location: usize,
    /// Unit type names and counts placed at the start location.
    #[serde(default)]
    pub starting_units: Vec<(String, u32)>,
    /// Initial resource amounts by name.
    #[serde(default)]
    pub starting_resources: Vec<(String, i32)>,
}

/// Complete session description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameSettings {
    /// Free text.
    #[serde(default)]
    pub description: String,
    /// Tech tree name the session expects.
    pub tech: String,
    /// Map name the session expects.
    pub map: String,
    /// Faction slots in index order.
    pub factions: Vec<FactionSettings>,
    /// Index of the local faction.
    #[serde(default)]
    pub this_faction: usize,
    /// Whether fog of war hides unexplored cells.
    #[serde(default = "default_fog_of_war")]
    pub fog_of_war: bool,
    /// Tick release rate.
    #[serde(default)]
    pub speed: GameSpeed,
    /// Victory rule.
    #[serde(default)]
    pub victory: VictoryMode,
    /// Ambient track started with the session.
    #[serde(default)]
    pub ambient_track: Option<String>,
}

const fn default_fog_of_war() -> bool {
    true
}

impl GameSettings {
    /// Parse settings from RON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed input.
    pub fn from_ron_str(ron: &str) -> Result<Self, ConfigError> {
        ron::from_str(ron).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Whether any faction is driven by a remote peer.
    #[must_use]
    pub fn is_network_game(&self) -> bool {
        self.factions
            .iter()
            .any(|f| f.control == ControlType::Network)
    }

    /// Reject contradictory settings.
    ///
    /// # Errors
    ///
    /// Returns the first contradiction found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.factions.is_empty() {
            return Err(ConfigError::NoFactions);
        }
        if self.this_faction >= self.factions.len() {
            return Err(ConfigError::ThisFactionOutOfRange {
                index: self.this_faction,
                count: self.factions.len(),
            });
        }
        if self.is_network_game() {
            if !self.fog_of_war {
                return Err(ConfigError::FogOfWarDisabledInNetworkGame);
            }
            if self.factions[self.this_faction].control != ControlType::Human {
                return Err(ConfigError::LocalFactionNotHuman(self.this_faction));
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for faction in &self.factions {
            if !seen.insert(faction.start_location) {
                return Err(ConfigError::DuplicateStartLocation(faction.start_location));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(control: ControlType, start_location: usize) -> FactionSettings {
        FactionSettings {
            name: format!("p{start_location}"),
            control,
            team: start_location,
            start_location,
            starting_units: vec![],
            starting_resources: vec![],
        }
    }

    fn settings(factions: Vec<FactionSettings>) -> GameSettings {
        GameSettings {
            description: String::new(),
            tech: "t".into(),
            map: "m".into(),
            factions,
            this_faction: 0,
            fog_of_war: true,
            speed: GameSpeed::Normal,
            victory: VictoryMode::Standard,
            ambient_track: None,
        }
    }

    #[test]
    fn test_valid_local_game() {
        let s = settings(vec![slot(ControlType::Human, 0), slot(ControlType::Ai, 1)]);
        assert_eq!(s.validate(), Ok(()));
        assert!(!s.is_network_game());
    }

    #[test]
    fn test_fog_disabled_in_network_game_is_fatal() {
        let mut s = settings(vec![slot(ControlType::Human, 0), slot(ControlType::Network, 1)]);
        s.fog_of_war = false;
        assert_eq!(s.validate(), Err(ConfigError::FogOfWarDisabledInNetworkGame));
        s.factions[1].control = ControlType::Ai;
        assert_eq!(s.validate(), Ok(()));
    }

    #[test]
    fn test_duplicate_start_location() {
        let s = settings(vec![slot(ControlType::Human, 1), slot(ControlType::Ai, 1)]);
        assert_eq!(s.validate(), Err(ConfigError::DuplicateStartLocation(1)));
    }

    #[test]
    fn test_empty_and_out_of_range() {
        assert_eq!(settings(vec![]).validate(), Err(ConfigError::NoFactions));
        let mut s = settings(vec![slot(ControlType::Human, 0)]);
        s.this_faction = 3;
        assert!(matches!(
            s.validate(),
            Err(ConfigError::ThisFactionOutOfRange { index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_speed_steps() {
        assert_eq!(GameSpeed::Slow.ticks_per_second(), 20);
        assert_eq!(GameSpeed::Normal.ticks_per_second(), 40);
        assert_eq!(GameSpeed::Fast.ticks_per_second(), 80);
        assert_eq!(GameSpeed::Fast.faster(), GameSpeed::Fast);
        assert_eq!(GameSpeed::Normal.slower(), GameSpeed::Slow);
    }

    #[test]
    fn test_parse_defaults() {
        let ron = r#"(
            tech: "skirmish",
            map: "twin_rivers",
            factions: [
                (name: "red", control: Human, team: 0, start_location: 0),
            ],
        )"#;
        let s = GameSettings::from_ron_str(ron).expect("parses");
        assert!(s.fog_of_war);
        assert_eq!(s.speed, GameSpeed::Normal);
        assert_eq!(s.victory, VictoryMode::Standard);
    }
}
