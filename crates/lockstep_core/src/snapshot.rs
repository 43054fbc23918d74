//! Render-facing snapshot taken at tick boundaries.
//!
//! Renderers, HUDs and observers read a [`WorldSnapshot`] instead of the
//! live world. This is the only place simulation values are converted to
//! floating point.

use serde::{Deserialize, Serialize};

use crate::faction::Faction;
use crate::tech::{SkillClass, UnitTypeId};
use crate::unit::{Unit, UnitId};
use crate::world::World;

/// Render state of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitView {
    /// Unit id.
    pub id: UnitId,
    /// Owning faction.
    pub faction: usize,
    /// Unit type.
    pub unit_type: UnitTypeId,
    /// Interpolated position, model center.
    pub position: [f32; 3],
    /// Heading in degrees.
    pub rotation: f32,
    /// Current skill.
    pub skill: SkillClass,
    /// Animation handle of the current skill.
    pub animation: String,
    /// Animation progress in `[0, 1]`.
    pub anim_progress: f32,
    /// Hit point ratio.
    pub hp_ratio: f32,
    /// Energy ratio.
    pub ep_ratio: f32,
    /// Whether a fire effect is bound to the unit.
    pub on_fire: bool,
    /// Progress of the head production command in percent.
    pub production_percent: Option<i32>,
}

/// HUD state of one faction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionView {
    /// Faction index.
    pub index: usize,
    /// Team.
    pub team: usize,
    /// Resource name and amount, in tech order.
    pub resources: Vec<(String, i32)>,
}

/// Read-only copy of everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Completed ticks at capture.
    pub frame: u64,
    /// Units in faction-then-slot order.
    pub units: Vec<UnitView>,
    /// Factions whose resources are visible.
    pub factions: Vec<FactionView>,
}

impl WorldSnapshot {
    /// Everything, for observers and replays.
    #[must_use]
    pub fn capture(world: &World) -> Self {
        Self {
            frame: world.frame_count(),
            units: world
                .factions()
                .iter()
                .flat_map(Faction::units)
                .map(|u| unit_view(world, u))
                .collect(),
            factions: world
                .factions()
                .iter()
                .map(|f| faction_view(world, f))
                .collect(),
        }
    }

    /// What one team may see: units on visible cells, own team's resources.
    #[must_use]
    pub fn capture_for_team(world: &World, team: usize) -> Self {
        let fog = world.fog();
        Self {
            frame: world.frame_count(),
            units: world
                .factions()
                .iter()
                .flat_map(Faction::units)
                .filter(|u| fog.is_visible(team, u.pos()))
                .map(|u| unit_view(world, u))
                .collect(),
            factions: world
                .factions()
                .iter()
                .filter(|f| f.team() == team)
                .map(|f| faction_view(world, f))
                .collect(),
        }
    }

    /// View of a unit by id.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&UnitView> {
        self.units.iter().find(|u| u.id == id)
    }
}

fn unit_view(world: &World, unit: &Unit) -> UnitView {
    let tech = world.tech();
    let unit_type = tech.unit_type(unit.unit_type());
    let animation = unit_type
        .skill(unit.skill())
        .map(|s| s.animation.clone())
        .unwrap_or_default();
    UnitView {
        id: unit.id(),
        faction: unit.faction(),
        unit_type: unit.unit_type(),
        position: unit.curr_vector(world.map(), unit_type).to_f32(),
        rotation: unit.rotation().to_num(),
        skill: unit.skill(),
        animation,
        anim_progress: unit.anim_progress().to_num(),
        hp_ratio: unit.hp_ratio(unit_type).to_num(),
        ep_ratio: unit.ep_ratio(unit_type).to_num(),
        on_fire: unit.is_on_fire(),
        production_percent: unit.production_percent(tech),
    }
}

fn faction_view(world: &World, faction: &Faction) -> FactionView {
    let ledger = faction.ledger();
    FactionView {
        index: faction.index(),
        team: faction.team(),
        resources: world
            .tech()
            .resources()
            .iter()
            .zip(ledger.amounts())
            .map(|(r, &amount)| (r.name.clone(), amount))
            .collect(),
    }
}
