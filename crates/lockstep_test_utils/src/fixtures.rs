//! Test fixtures and helpers.
//!
//! The skirmish content under `content/skirmish` plus helpers to build and
//! step worlds with it.

use fixed::types::I32F32;
use lockstep_core::commander::{Commander, NetworkCommand};
use lockstep_core::config::GameSettings;
use lockstep_core::effects::{Hooks, NullEffects, ObserverRegistry};
use lockstep_core::map::Map;
use lockstep_core::math::GridPos;
use lockstep_core::tech::TechTree;
use lockstep_core::unit::UnitId;
use lockstep_core::world::World;

/// Skirmish tech tree source.
pub const SKIRMISH_TECH: &str = include_str!("../../../content/skirmish/tech.ron");
/// Skirmish map source.
pub const SKIRMISH_MAP: &str = include_str!("../../../content/skirmish/map.ron");
/// Skirmish settings source.
pub const SKIRMISH_SETTINGS: &str = include_str!("../../../content/skirmish/settings.ron");

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// The skirmish tech tree.
///
/// # Panics
///
/// Panics if the bundled content does not parse.
#[must_use]
pub fn skirmish_tech() -> TechTree {
    TechTree::from_ron_str(SKIRMISH_TECH).expect("skirmish tech parses")
}

/// The skirmish map.
///
/// # Panics
///
/// Panics if the bundled content does not parse.
#[must_use]
pub fn skirmish_map(tech: &TechTree) -> Map {
    Map::from_ron_str(SKIRMISH_MAP, tech).expect("skirmish map parses")
}

/// The skirmish settings.
///
/// # Panics
///
/// Panics if the bundled content does not parse.
#[must_use]
pub fn skirmish_settings() -> GameSettings {
    GameSettings::from_ron_str(SKIRMISH_SETTINGS).expect("skirmish settings parse")
}

/// A fresh skirmish world: a castle and three workers per side.
///
/// # Panics
///
/// Panics if the bundled content does not build a world.
#[must_use]
pub fn skirmish_world() -> World {
    let tech = skirmish_tech();
    let map = skirmish_map(&tech);
    World::new(&skirmish_settings(), tech, map).expect("skirmish world builds")
}

/// Advance a world without effects or observers.
pub fn step(world: &mut World, ticks: u64) {
    let mut effects = NullEffects;
    let mut observers = ObserverRegistry::new();
    let mut hooks = Hooks::new(&mut effects, &mut observers);
    for _ in 0..ticks {
        world.update(&mut hooks);
    }
}

/// Id of the unit in a faction's roster position.
///
/// # Panics
///
/// Panics if the faction or position does not exist.
#[must_use]
pub fn unit_at(world: &World, faction: usize, index: usize) -> UnitId {
    world
        .faction(faction)
        .and_then(|f| f.units().nth(index))
        .map(|u| u.id())
        .expect("unit exists")
}

/// Network command by command name.
///
/// # Panics
///
/// Panics on an unknown command name.
#[must_use]
pub fn order(world: &World, faction: usize, unit: UnitId, command: &str, pos: GridPos) -> NetworkCommand {
    let command_type = world
        .tech()
        .command_type_id(command)
        .expect("command type exists");
    NetworkCommand::new(faction, unit, command_type, pos)
}

/// A skirmish where both sides are busy: workers harvest and walk, castles
/// train workers. Exercises movement, harvesting and production at once.
#[must_use]
pub fn busy_skirmish() -> World {
    let mut world = skirmish_world();
    let mut batch = Vec::new();
    for faction in 0..2 {
        let castle = unit_at(&world, faction, 0);
        batch.push(order(&world, faction, castle, "produce_worker", GridPos::ZERO));
        let gold = if faction == 0 {
            GridPos::new(9, 4)
        } else {
            GridPos::new(22, 26)
        };
        batch.push(order(&world, faction, unit_at(&world, faction, 1), "harvest", gold));
        batch.push(order(&world, faction, unit_at(&world, faction, 2), "harvest", gold));
        batch.push(order(&world, faction, unit_at(&world, faction, 3), "move", GridPos::new(16, 14)));
    }
    Commander::apply_batch(&mut world, batch);
    world
}
