//! Skirmish content shared by unit tests.

use crate::config::GameSettings;
use crate::map::Map;
use crate::tech::TechTree;
use crate::world::World;

pub(crate) const TECH_RON: &str = include_str!("../../../content/skirmish/tech.ron");
pub(crate) const MAP_RON: &str = include_str!("../../../content/skirmish/map.ron");
pub(crate) const SETTINGS_RON: &str = include_str!("../../../content/skirmish/settings.ron");

pub(crate) fn tech() -> TechTree {
    TechTree::from_ron_str(TECH_RON).expect("skirmish tech parses")
}

pub(crate) fn map(tech: &TechTree) -> Map {
    Map::from_ron_str(MAP_RON, tech).expect("skirmish map parses")
}

pub(crate) fn settings() -> GameSettings {
    GameSettings::from_ron_str(SETTINGS_RON).expect("skirmish settings parse")
}

/// The skirmish session with fog of war on.
pub(crate) fn world() -> World {
    let tech = tech();
    let map = map(&tech);
    World::new(&settings(), tech, map).expect("skirmish world builds")
}
