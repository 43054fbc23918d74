//! Session metrics reported as JSON.

use lockstep_core::game::Game;
use lockstep_core::world::World;
use serde::{Deserialize, Serialize};

/// End-of-run metrics for a single session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMetrics {
    /// Tech tree name.
    pub tech: String,
    /// Map name.
    pub map: String,
    /// Completed ticks.
    pub duration_ticks: u64,
    /// Final simulation state hash.
    pub final_state_hash: u64,
    /// Winning faction names, empty while undecided.
    pub winners: Vec<String>,
    /// Tick the game was decided at.
    pub decided_at: Option<u64>,
    /// Commands recorded into the replay, if one was recorded.
    pub recorded_commands: Option<usize>,
    /// Per-faction metrics in index order.
    pub factions: Vec<FactionMetrics>,
}

/// Metrics of one faction at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionMetrics {
    /// Faction index.
    pub index: usize,
    /// Display name.
    pub name: String,
    /// Team.
    pub team: usize,
    /// Units alive or dying.
    pub units: usize,
    /// Researched or researching upgrades.
    pub upgrades: usize,
    /// Resource amounts by name.
    pub resources: Vec<(String, i32)>,
}

impl FactionMetrics {
    fn collect(world: &World, index: usize) -> Option<Self> {
        let faction = world.faction(index)?;
        let resources = world
            .tech()
            .resources()
            .iter()
            .filter_map(|r| {
                world
                    .resource_amount(&r.name, index)
                    .ok()
                    .map(|amount| (r.name.clone(), amount))
            })
            .collect();
        Some(Self {
            index,
            name: faction.name().to_owned(),
            team: faction.team(),
            units: faction.unit_count(),
            upgrades: faction.upgrades().count(),
            resources,
        })
    }

    /// Amount of a resource by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<i32> {
        self.resources
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, amount)| *amount)
    }
}

impl GameMetrics {
    /// Collect metrics from a finished or running session.
    #[must_use]
    pub fn collect(game: &Game) -> Self {
        let world = game.world();
        let factions: Vec<FactionMetrics> = (0..world.factions().len())
            .filter_map(|i| FactionMetrics::collect(world, i))
            .collect();
        let winners = game
            .outcome()
            .map(|o| {
                factions
                    .iter()
                    .filter(|f| o.is_winner(f.index))
                    .map(|f| f.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            tech: world.tech().name.clone(),
            map: world.map().name.clone(),
            duration_ticks: world.frame_count(),
            final_state_hash: world.state_hash(),
            winners,
            decided_at: game.outcome().map(|o| o.tick),
            recorded_commands: None,
            factions,
        }
    }

    /// Metrics of a faction by name.
    #[must_use]
    pub fn faction(&self, name: &str) -> Option<&FactionMetrics> {
        self.factions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use lockstep_test_utils::fixtures::{SKIRMISH_MAP, SKIRMISH_SETTINGS, SKIRMISH_TECH};

    #[test]
    fn test_collect_fresh_session() {
        let scenario =
            Scenario::from_ron_strs(SKIRMISH_SETTINGS, SKIRMISH_TECH, SKIRMISH_MAP).unwrap();
        let game = scenario.start().unwrap();
        let metrics = GameMetrics::collect(&game);

        assert_eq!(metrics.duration_ticks, 0);
        assert!(metrics.winners.is_empty());
        assert_eq!(metrics.decided_at, None);
        let red = metrics.faction("red").unwrap();
        assert_eq!(red.units, 4);
        assert_eq!(red.resource("gold"), Some(600));
        assert_eq!(red.resource("mithril"), None);
        assert_eq!(metrics.faction("blue").unwrap().team, 1);
    }

    #[test]
    fn test_metrics_serialize_to_json() {
        let metrics = GameMetrics {
            tech: "skirmish".into(),
            duration_ticks: 10,
            ..GameMetrics::default()
        };
        let json = serde_json::to_string(&metrics).unwrap();
        let back: GameMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metrics);
    }
}
