//! Player-facing query and command interface.
//!
//! AI controllers and input translation see the world only through
//! [`PlayerFacade`]. Queries about other factions are limited to the
//! position and type of units on cells the player's team currently sees, as
//! a [`SightedUnit`]; resources are searched on explored cells only. Every command goes through the [`Commander`], so a
//! controller has no way to mutate the world directly.

use crate::command::CommandResult;
use crate::commander::Commander;
use crate::faction::Faction;
use crate::math::GridPos;
use crate::tech::{
    CommandClass, CommandType, Producible, ResourceTypeId, TechTree, UnitTypeId,
};
use crate::unit::{Unit, UnitId, UnitReference};
use crate::world::World;

/// What a player learns about a unit it sees: where it stands and what it
/// is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SightedUnit {
    /// The unit.
    pub unit: UnitReference,
    /// Its type.
    pub unit_type: UnitTypeId,
    /// Anchor cell.
    pub pos: GridPos,
}

impl SightedUnit {
    fn of(unit: &Unit) -> Self {
        Self {
            unit: unit.reference(),
            unit_type: unit.unit_type(),
            pos: unit.pos(),
        }
    }

    /// Owning faction.
    #[must_use]
    pub const fn faction(&self) -> usize {
        self.unit.faction
    }
}

/// What a player, human or AI, may ask and order.
pub trait PlayerFacade {
    /// Index of the faction this facade speaks for.
    fn faction_index(&self) -> usize;

    /// Team of that faction.
    fn team(&self) -> usize;

    /// Content the session runs on.
    fn tech(&self) -> &TechTree;

    /// Number of own units, corpses included.
    fn own_unit_count(&self) -> usize;

    /// Own unit by roster position.
    fn own_unit(&self, index: usize) -> Option<&Unit>;

    /// Upgrades researched or in research.
    fn upgrade_count(&self) -> usize;

    /// Own amount of a resource.
    fn resource_amount(&self, resource: ResourceTypeId) -> i32;

    /// Units of every faction standing on a cell the team sees.
    fn on_sight_unit_count(&self) -> usize;

    /// Sighted unit by position in faction-then-slot order.
    fn on_sight_unit(&self, index: usize) -> Option<SightedUnit>;

    /// Closest explored deposit of a resource.
    fn nearest_sighted_resource(&self, resource: ResourceTypeId, pos: GridPos) -> Option<GridPos>;

    /// Whether a unit is owned by an allied faction.
    fn is_ally(&self, unit: UnitReference) -> bool;

    /// Whether the requirements of a producible are met.
    fn reqs_ok(&self, producible: &dyn Producible) -> bool;

    /// Whether a command type could be issued as far as requirements go.
    fn command_reqs_ok(&self, command_type: &CommandType) -> bool;

    /// Whether the faction can afford a producible.
    fn check_costs(&self, producible: &dyn Producible) -> bool;

    /// Whether a square of cells is free for a unit type.
    fn is_free_cells(&self, pos: GridPos, unit_type: UnitTypeId) -> bool;

    /// Own start location.
    fn home_location(&self) -> Option<GridPos>;

    /// Start location slot of the map.
    fn start_location(&self, slot: usize) -> Option<GridPos>;

    /// Order a unit using its first command of a class.
    fn give_command(&mut self, unit: UnitId, class: CommandClass, pos: GridPos) -> CommandResult;

    /// Order a unit to build a unit type at a position.
    fn give_build_command(
        &mut self,
        unit: UnitId,
        command_type: &CommandType,
        pos: GridPos,
        unit_type: UnitTypeId,
    ) -> CommandResult;

    /// Order a unit to act on another unit.
    fn give_target_command(
        &mut self,
        unit: UnitId,
        command_type: &CommandType,
        target: UnitReference,
    ) -> CommandResult;
}

/// [`PlayerFacade`] over a world, issuing through a commander.
pub struct FactionFacade<'a> {
    world: &'a World,
    commander: &'a mut Commander,
    faction: usize,
}

impl<'a> FactionFacade<'a> {
    /// Facade for one faction. `None` for an unknown index.
    pub fn new(world: &'a World, commander: &'a mut Commander, faction: usize) -> Option<Self> {
        world.faction(faction)?;
        Some(Self {
            world,
            commander,
            faction,
        })
    }

    fn own(&self) -> &Faction {
        &self.world.factions()[self.faction]
    }

    fn on_sight(&self) -> impl Iterator<Item = &Unit> {
        let team = self.own().team();
        let fog = self.world.fog();
        self.world
            .factions()
            .iter()
            .flat_map(Faction::units)
            .filter(move |u| fog.is_visible(team, u.pos()))
    }
}

impl PlayerFacade for FactionFacade<'_> {
    fn faction_index(&self) -> usize {
        self.faction
    }

    fn team(&self) -> usize {
        self.own().team()
    }

    fn tech(&self) -> &TechTree {
        self.world.tech()
    }

    fn own_unit_count(&self) -> usize {
        self.own().unit_count()
    }

    fn own_unit(&self, index: usize) -> Option<&Unit> {
        self.own().units().nth(index)
    }

    fn upgrade_count(&self) -> usize {
        self.own().upgrades().count()
    }

    fn resource_amount(&self, resource: ResourceTypeId) -> i32 {
        self.own().ledger().amount(resource)
    }

    fn on_sight_unit_count(&self) -> usize {
        self.on_sight().count()
    }

    fn on_sight_unit(&self, index: usize) -> Option<SightedUnit> {
        self.on_sight().nth(index).map(SightedUnit::of)
    }

    fn nearest_sighted_resource(&self, resource: ResourceTypeId, pos: GridPos) -> Option<GridPos> {
        let team = self.own().team();
        let fog = self.world.fog();
        let mut best: Option<(GridPos, i64)> = None;
        for (at, deposit) in self.world.map().deposits() {
            if deposit.resource != resource || !fog.is_explored(team, at) {
                continue;
            }
            let dist = at.dist_sq(pos);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((at, dist));
            }
        }
        best.map(|(at, _)| at)
    }

    fn is_ally(&self, unit: UnitReference) -> bool {
        self.world
            .faction(unit.faction)
            .is_some_and(|f| f.is_ally(self.own()))
    }

    fn reqs_ok(&self, producible: &dyn Producible) -> bool {
        self.own().reqs_ok_for(producible)
    }

    fn command_reqs_ok(&self, command_type: &CommandType) -> bool {
        let faction = self.own();
        let tech = self.world.tech();
        if !faction.reqs_ok(&command_type.requirements) {
            return false;
        }
        if let Some(produced) = command_type.produced {
            if !faction.reqs_ok_for(tech.producible(produced)) {
                return false;
            }
        }
        if command_type.class == CommandClass::Build {
            return command_type
                .buildable
                .iter()
                .any(|&b| faction.reqs_ok_for(tech.unit_type(b)));
        }
        true
    }

    fn check_costs(&self, producible: &dyn Producible) -> bool {
        self.own().check_costs(producible)
    }

    fn is_free_cells(&self, pos: GridPos, unit_type: UnitTypeId) -> bool {
        let tech = self.world.tech();
        if !tech.contains_unit_type(unit_type) {
            return false;
        }
        let ut = tech.unit_type(unit_type);
        self.world.map().is_free_cells(pos, ut.size, ut.field)
    }

    fn home_location(&self) -> Option<GridPos> {
        self.world.map().start_location(self.own().start_location())
    }

    fn start_location(&self, slot: usize) -> Option<GridPos> {
        self.world.map().start_location(slot)
    }

    fn give_command(&mut self, unit: UnitId, class: CommandClass, pos: GridPos) -> CommandResult {
        let tech = self.world.tech();
        let Some(holder) = self.own().unit(unit) else {
            return CommandResult::FailUndefined;
        };
        let Some(command_type) = tech
            .unit_type(holder.unit_type())
            .commands
            .iter()
            .copied()
            .find(|&c| tech.command_type(c).class == class)
        else {
            return CommandResult::FailUndefined;
        };
        self.commander
            .give_command(self.world, self.faction, unit, command_type, pos)
    }

    fn give_build_command(
        &mut self,
        unit: UnitId,
        command_type: &CommandType,
        pos: GridPos,
        unit_type: UnitTypeId,
    ) -> CommandResult {
        self.commander.give_build_command(
            self.world,
            self.faction,
            unit,
            command_type.id,
            pos,
            unit_type,
        )
    }

    fn give_target_command(
        &mut self,
        unit: UnitId,
        command_type: &CommandType,
        target: UnitReference,
    ) -> CommandResult {
        self.commander
            .give_target_command(self.world, self.faction, unit, command_type.id, target)
    }
}
