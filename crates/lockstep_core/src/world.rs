//! The world: map, factions and fog, advanced one fixed tick at a time.
//!
//! # Tick order
//!
//! [`World::update`] runs a fixed sequence:
//!
//! 1. every unit is updated, faction index ascending, then roster slot
//!    ascending; a unit completing a skill cycle runs its command behaviour
//! 2. consumable upkeep for the resources whose interval fires
//! 3. dead units not yet dying are killed
//! 4. units flagged for removal are undertaken
//! 5. once per second, regeneration
//! 6. fog of war is recomputed and its deltas stored
//! 7. the tick counter advances
//!
//! Later units in step 1 see ledger totals mutated by earlier ones, so the
//! order is part of the determinism contract.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandResult};
use crate::config::GameSettings;
use crate::effects::{Hooks, UnitEvent};
use crate::error::{GameError, Result};
use crate::faction::Faction;
use crate::fog::{FogDelta, FogOfWar, SightSource};
use crate::map::Map;
use crate::math::GridPos;
use crate::tech::{
    CommandClass, Produced, ResourceClass, ResourceTypeId, SkillClass, TechTree, UnitType,
    UnitTypeId,
};
use crate::unit::{Accounts, CommandEnv, Unit, UnitId, UnitReference};

/// Simulation constants.
pub mod constants {
    use crate::math::Fixed;

    /// Ticks per simulated second.
    pub const UPDATE_FPS: u32 = 40;

    /// Divisor turning skill speeds into per-tick progress.
    pub const SPEED_DIVIDER: i32 = 100;

    /// Ticks a corpse stays before it is undertaken.
    pub const MAX_DEAD_COUNT: u32 = 500;

    /// Consecutive blocked steps before a path is recomputed from scratch.
    pub const MAX_BLOCK_COUNT: u32 = 10;

    /// Extra radius explored beyond direct sight.
    pub const INDIRECT_SIGHT_RANGE: i32 = 5;

    /// Height added to air units.
    pub const AIR_HEIGHT: i32 = 5;

    /// Speed factor of a one-cell diagonal step (0.71).
    pub const DIAGONAL_FACTOR: Fixed = Fixed::from_bits(3_049_426_125);

    /// Lower clamp of the height factor (0.2).
    pub const HEIGHT_FACTOR_MIN: Fixed = Fixed::from_bits(858_993_459);

    /// Upper clamp of the height factor.
    pub const HEIGHT_FACTOR_MAX: Fixed = Fixed::from_bits(5 << 32);

    /// Search radius for scripted and starting unit placement.
    pub const GENERATION_AREA: i32 = 100;

    /// Search radius for placing produced units.
    pub const PRODUCTION_AREA: i32 = 10;

    /// Free border kept around spaced placements.
    pub const PLACEMENT_SPACING: i32 = 2;

    /// Radius searched for a fresh deposit when one is exhausted.
    pub const RESOURCE_SEARCH_RADIUS: i32 = 10;
}

use constants::{GENERATION_AREA, PLACEMENT_SPACING, UPDATE_FPS};

/// Game-over flags raised by a script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptFlags {
    game_over: bool,
    winners: BTreeSet<usize>,
}

impl ScriptFlags {
    /// Whether the script ended the game.
    #[must_use]
    pub const fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Whether the script declared a faction a winner.
    #[must_use]
    pub fn is_winner(&self, faction: usize) -> bool {
        self.winners.contains(&faction)
    }
}

/// The complete simulation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub(crate) tech: TechTree,
    pub(crate) map: Map,
    pub(crate) factions: Vec<Faction>,
    pub(crate) fog: FogOfWar,
    pub(crate) frame_count: u64,
    pub(crate) next_unit_id: UnitId,
    pub(crate) script: ScriptFlags,
    #[serde(skip)]
    fog_deltas: Vec<FogDelta>,
}

impl World {
    /// Build the initial world: factions, starting resources and starting
    /// units at their start locations.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Config`] for contradictory settings and
    /// [`GameError::InvalidContent`] when the settings name other content
    /// than supplied or reference missing start locations or types.
    pub fn new(settings: &GameSettings, tech: TechTree, map: Map) -> Result<Self> {
        settings.validate()?;
        if settings.tech != tech.name {
            return Err(GameError::InvalidContent(format!(
                "settings expect tech tree '{}', got '{}'",
                settings.tech, tech.name
            )));
        }
        if settings.map != map.name {
            return Err(GameError::InvalidContent(format!(
                "settings expect map '{}', got '{}'",
                settings.map, map.name
            )));
        }

        let team_count = settings
            .factions
            .iter()
            .map(|f| f.team + 1)
            .max()
            .unwrap_or(0);
        let fog = FogOfWar::new(map.width(), map.height(), team_count, settings.fog_of_war);
        let factions = settings
            .factions
            .iter()
            .enumerate()
            .map(|(i, s)| Faction::new(i, s, &tech))
            .collect();

        let mut world = Self {
            tech,
            map,
            factions,
            fog,
            frame_count: 0,
            next_unit_id: 0,
            script: ScriptFlags::default(),
            fog_deltas: Vec::new(),
        };

        for (index, faction) in settings.factions.iter().enumerate() {
            let start = world
                .map
                .start_location(faction.start_location)
                .ok_or_else(|| {
                    GameError::InvalidContent(format!(
                        "map '{}' has no start location {}",
                        world.map.name, faction.start_location
                    ))
                })?;
            for (name, amount) in &faction.starting_resources {
                let resource = world.tech.resource_id(name)?;
                world.factions[index].ledger.set_amount(resource, *amount);
            }
            for (name, count) in &faction.starting_units {
                let unit_type = world.tech.unit_type_id(name)?;
                for _ in 0..*count {
                    world.create_placed_unit(index, unit_type, start)?;
                }
            }
        }

        world.fog_deltas = world.compute_fog();
        tracing::info!(
            tech = %world.tech.name,
            map = %world.map.name,
            factions = world.factions.len(),
            units = world.unit_total(),
            "world created"
        );
        Ok(world)
    }

    /// Advance the simulation by one tick. See the module docs for the order.
    pub fn update(&mut self, hooks: &mut Hooks<'_>) {
        let tick = self.frame_count + 1;

        for faction in 0..self.factions.len() {
            // Units born this tick get a slot past the current end and are
            // updated too, as the slot count is re-read every iteration.
            let mut slot = 0;
            while slot < self.factions[faction].roster.slot_count() {
                self.update_slot(faction, slot, hooks);
                slot += 1;
            }
        }

        self.apply_consumable_upkeep(tick, hooks);
        self.kill_dead_units(hooks);
        self.undertake_dead_units();

        if tick % u64::from(UPDATE_FPS) == 0 {
            self.regenerate_units();
        }

        self.fog_deltas = self.compute_fog();
        self.frame_count = tick;

        #[cfg(feature = "debug-validation")]
        self.validate_invariants();

        #[cfg(debug_assertions)]
        tracing::trace!(tick, state_hash = self.state_hash(), "world tick");
    }

    /// Panics on a broken unit or ledger invariant.
    #[cfg(feature = "debug-validation")]
    fn validate_invariants(&self) {
        use crate::math::Fixed;

        for faction in &self.factions {
            for (index, resource) in self.tech.resources().iter().enumerate() {
                if let Ok(index) = u16::try_from(index) {
                    let amount = faction.ledger.amount(ResourceTypeId(index));
                    assert!(
                        !resource.is_stored() || amount >= 0,
                        "faction {} holds {amount} {}",
                        faction.index(),
                        resource.name
                    );
                }
            }
            for unit in faction.units() {
                let exclusive = unit.commands().iter().any(|c| !c.behavior().queuable);
                assert!(
                    !exclusive || unit.commands().len() == 1,
                    "unit {} queues behind an exclusive command",
                    unit.id()
                );
                assert!(
                    unit.progress() >= Fixed::ZERO && unit.progress() <= Fixed::ONE,
                    "unit {} progress {}",
                    unit.id(),
                    unit.progress()
                );
                assert!(unit.hp() >= 0, "unit {} hp {}", unit.id(), unit.hp());
            }
        }
    }

    fn apply_consumable_upkeep(&mut self, tick: u64, hooks: &mut Hooks<'_>) {
        let tech = &self.tech;
        let map = &self.map;
        for (index, resource) in tech.resources().iter().enumerate() {
            if resource.class != ResourceClass::Consumable || resource.interval == 0 {
                continue;
            }
            if tick % (u64::from(resource.interval) * u64::from(UPDATE_FPS)) != 0 {
                continue;
            }
            let Ok(index) = u16::try_from(index) else {
                continue;
            };
            let resource = ResourceTypeId(index);

            for faction in &mut self.factions {
                let faction_index = faction.index();
                for unit in faction.roster.iter() {
                    if !unit.is_operative() {
                        continue;
                    }
                    let produced = cost_of(tech.unit_type(unit.unit_type()), resource);
                    if produced < 0 {
                        faction.ledger.inc_amount(resource, -produced);
                    }
                }
                for unit in faction.roster.iter_mut() {
                    if !unit.is_operative() {
                        continue;
                    }
                    let unit_type = tech.unit_type(unit.unit_type());
                    let consumed = cost_of(unit_type, resource);
                    if consumed <= 0 {
                        continue;
                    }
                    faction.ledger.inc_amount(resource, -consumed);
                    if faction.ledger.amount(resource) < 0 {
                        faction.ledger.reset_amount(resource);
                        let damage = unit.total_upgrade().max_hp(unit_type) / 3;
                        let at = unit.curr_vector(map, unit_type);
                        if unit.dec_hp(damage, unit_type, at, hooks.effects) {
                            tracing::debug!(unit = unit.id(), faction = faction_index, "starved");
                        }
                    }
                }
            }
        }
    }

    fn kill_dead_units(&mut self, hooks: &mut Hooks<'_>) {
        let dead: Vec<UnitReference> = self
            .factions
            .iter()
            .flat_map(Faction::units)
            .filter(|u| !u.is_alive() && u.skill() != SkillClass::Die)
            .map(Unit::reference)
            .collect();
        for unit in dead {
            self.kill_unit(unit, hooks);
        }
    }

    fn undertake_dead_units(&mut self) {
        for faction in &mut self.factions {
            let doomed: Vec<UnitId> = faction
                .units()
                .filter(|u| u.to_be_undertaken())
                .map(Unit::id)
                .collect();
            for id in doomed {
                faction.roster.remove(id);
                tracing::debug!(unit = id, faction = faction.index(), "undertaken");
            }
        }
    }

    fn regenerate_units(&mut self) {
        let tech = &self.tech;
        for faction in &mut self.factions {
            for unit in faction.roster.iter_mut() {
                unit.regenerate(tech.unit_type(unit.unit_type()));
            }
        }
    }

    fn compute_fog(&mut self) -> Vec<FogDelta> {
        let tech = &self.tech;
        let sources: Vec<SightSource> = self
            .factions
            .iter()
            .flat_map(|f| f.units().map(move |u| (f.team(), u)))
            .filter(|(_, u)| u.is_operative())
            .map(|(team, u)| {
                let unit_type = tech.unit_type(u.unit_type());
                SightSource {
                    team,
                    center: u.pos() + GridPos::new(unit_type.size / 2, unit_type.size / 2),
                    sight: u.total_upgrade().sight(unit_type),
                }
            })
            .collect();
        self.fog.update(sources)
    }

    /// Insert a fresh unit and claim its cells. The caller decides whether it
    /// is born or starts as a construction site.
    pub(crate) fn spawn_unit(
        &mut self,
        faction: usize,
        unit_type: UnitTypeId,
        pos: GridPos,
    ) -> Option<UnitReference> {
        let ut = self.tech.unit_type(unit_type);
        let f = self.factions.get_mut(faction)?;
        let id = self.next_unit_id;
        let unit = Unit::new(id, faction, pos, ut, f.upgrades.total_upgrade(&self.tech, ut));
        self.map.put_unit_cells(unit.reference(), pos, ut.size, ut.field);
        f.roster.insert(unit);
        self.next_unit_id += 1;
        tracing::debug!(unit = id, faction, unit_type = %ut.name, x = pos.x, y = pos.y, "unit created");
        Some(UnitReference::new(faction, id))
    }

    /// Place, create and bear a unit outside the command path, charging its
    /// static costs.
    fn create_placed_unit(
        &mut self,
        faction: usize,
        unit_type: UnitTypeId,
        origin: GridPos,
    ) -> Result<UnitReference> {
        if faction >= self.factions.len() {
            return Err(GameError::UnknownFaction(faction));
        }
        let pos = self
            .place_unit(origin, GENERATION_AREA, self.tech.unit_type(unit_type), true)
            .ok_or(GameError::NoPlacement {
                x: origin.x,
                y: origin.y,
            })?;
        let reference = self
            .spawn_unit(faction, unit_type, pos)
            .ok_or(GameError::UnknownFaction(faction))?;

        let ut = self.tech.unit_type(unit_type);
        let f = &mut self.factions[faction];
        f.ledger.apply_static_costs(ut);
        if let Some(unit) = f.roster.get_mut(reference.id) {
            unit.born(ut, &mut f.ledger);
        }
        Ok(reference)
    }

    /// Kill a unit: return its static costs and storage, free its cells,
    /// notify observers and drop its commands. Its corpse stays until
    /// undertaken.
    pub(crate) fn kill_unit(&mut self, reference: UnitReference, hooks: &mut Hooks<'_>) {
        let tech = &self.tech;
        let Some(faction) = self.factions.get_mut(reference.faction) else {
            return;
        };
        let Some(unit) = faction.roster.get_mut(reference.id) else {
            return;
        };
        let unit_type = tech.unit_type(unit.unit_type());
        let was_built = unit.is_built();

        if was_built {
            faction.ledger.de_apply_static_costs(unit_type);
        } else {
            faction.ledger.de_apply_static_consumption(unit_type);
        }
        self.map
            .clear_unit_cells(unit.pos(), unit_type.size, unit.field());
        if was_built {
            faction.ledger.remove_store(unit_type);
        }

        unit.set_skill(SkillClass::Die);
        unit.stop_fire(hooks.effects);
        hooks.observers.notify(UnitEvent::Killed, unit);
        let mut accounts = Accounts {
            tech,
            ledger: &mut faction.ledger,
            upgrades: &mut faction.upgrades,
        };
        unit.clear_commands(&mut accounts);
        tracing::debug!(unit = reference.id, faction = reference.faction, unit_type = %unit_type.name, "killed");
    }

    /// Content.
    #[must_use]
    pub const fn tech(&self) -> &TechTree {
        &self.tech
    }

    /// Map.
    #[must_use]
    pub const fn map(&self) -> &Map {
        &self.map
    }

    /// Factions in index order.
    #[must_use]
    pub fn factions(&self) -> &[Faction] {
        &self.factions
    }

    /// Faction by index.
    #[must_use]
    pub fn faction(&self, index: usize) -> Option<&Faction> {
        self.factions.get(index)
    }

    /// Fog of war.
    #[must_use]
    pub const fn fog(&self) -> &FogOfWar {
        &self.fog
    }

    /// Visibility changes of the last tick.
    #[must_use]
    pub fn fog_deltas(&self) -> &[FogDelta] {
        &self.fog_deltas
    }

    /// Completed ticks.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Script game-over flags.
    #[must_use]
    pub const fn script_flags(&self) -> &ScriptFlags {
        &self.script
    }

    /// Resolve a weak reference.
    #[must_use]
    pub fn find_unit(&self, reference: UnitReference) -> Option<&Unit> {
        self.factions.get(reference.faction)?.roster.get(reference.id)
    }

    /// Resolve a weak reference mutably.
    pub fn find_unit_mut(&mut self, reference: UnitReference) -> Option<&mut Unit> {
        self.factions
            .get_mut(reference.faction)?
            .roster
            .get_mut(reference.id)
    }

    /// Unit by id in any faction.
    #[must_use]
    pub fn unit_by_id(&self, id: UnitId) -> Option<&Unit> {
        self.factions.iter().find_map(|f| f.roster.get(id))
    }

    fn reference_of(&self, id: UnitId) -> Result<UnitReference> {
        self.unit_by_id(id)
            .map(Unit::reference)
            .ok_or(GameError::UnitNotFound(id))
    }

    /// Whether two units belong to allied factions. Symmetric.
    #[must_use]
    pub fn is_ally(&self, a: UnitReference, b: UnitReference) -> bool {
        match (self.factions.get(a.faction), self.factions.get(b.faction)) {
            (Some(fa), Some(fb)) => fa.is_ally(fb),
            _ => false,
        }
    }

    /// Number of units in all factions.
    #[must_use]
    pub fn unit_total(&self) -> usize {
        self.factions.iter().map(Faction::unit_count).sum()
    }

    /// Closest operative unit of a faction storing `resource`. Ties go to
    /// the lower slot.
    #[must_use]
    pub fn nearest_store(
        &self,
        pos: GridPos,
        faction: usize,
        resource: ResourceTypeId,
    ) -> Option<&Unit> {
        let faction = self.factions.get(faction)?;
        let mut best: Option<(&Unit, i64)> = None;
        for unit in faction.units() {
            if !unit.is_operative() || self.tech.unit_type(unit.unit_type()).store(resource) <= 0 {
                continue;
            }
            let dist = unit.pos().dist_sq(pos);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((unit, dist));
            }
        }
        best.map(|(unit, _)| unit)
    }

    /// First anchor near `start` where a unit of the type fits, searching
    /// squares of growing half-size below `radius`. A spaced placement also
    /// keeps a free border around the footprint.
    #[must_use]
    pub fn place_unit(
        &self,
        start: GridPos,
        radius: i32,
        unit_type: &UnitType,
        spaced: bool,
    ) -> Option<GridPos> {
        for r in 1..radius {
            for i in -r..r {
                for j in -r..r {
                    let pos = start + GridPos::new(i, j);
                    let free = if spaced {
                        let border = GridPos::new(PLACEMENT_SPACING, PLACEMENT_SPACING);
                        self.map.is_free_cells(
                            pos - border,
                            unit_type.size + PLACEMENT_SPACING * 2,
                            unit_type.field,
                        )
                    } else {
                        self.map.is_free_cells(pos, unit_type.size, unit_type.field)
                    };
                    if free {
                        return Some(pos);
                    }
                }
            }
        }
        None
    }

    /// Admit a command for a unit of a faction.
    ///
    /// Unknown factions and units, including units of another faction,
    /// yield [`CommandResult::FailUndefined`].
    pub fn give_command(&mut self, faction: usize, unit: UnitId, command: Command) -> CommandResult {
        let tech = &self.tech;
        let map = &self.map;
        let Some(faction) = self.factions.get_mut(faction) else {
            return CommandResult::FailUndefined;
        };
        let operative_types = faction.operative_types();
        let Some(unit) = faction.roster.get_mut(unit) else {
            return CommandResult::FailUndefined;
        };
        let mut env = CommandEnv {
            tech,
            map,
            operative_types: &operative_types,
            ledger: &mut faction.ledger,
            upgrades: &mut faction.upgrades,
        };
        unit.give_command(command, &mut env)
    }

    /// Cancel the tail command of a unit, reversing its committed cost.
    ///
    /// [`CommandResult::FailUndefined`] when nothing is queued or the unit
    /// is not the faction's.
    pub fn cancel_command(&mut self, faction: usize, unit: UnitId) -> CommandResult {
        let tech = &self.tech;
        let Some(faction) = self.factions.get_mut(faction) else {
            return CommandResult::FailUndefined;
        };
        let Some(slot) = faction.roster.slot_of(unit) else {
            return CommandResult::FailUndefined;
        };
        let Some(mut taken) = faction.roster.take_slot(slot) else {
            return CommandResult::FailUndefined;
        };
        let result = taken.cancel_command(&mut faction.accounts(tech));
        faction.roster.restore_slot(slot, taken);
        result
    }

    /// Validate a command for a unit of a faction without admitting it.
    #[must_use]
    pub fn check_command(&self, faction: usize, unit: UnitId, command: &Command) -> CommandResult {
        let Some(faction) = self.factions.get(faction) else {
            return CommandResult::FailUndefined;
        };
        let Some(unit) = faction.roster.get(unit) else {
            return CommandResult::FailUndefined;
        };
        let operative_types = faction.operative_types();
        let mut ledger = faction.ledger.clone();
        let mut upgrades = faction.upgrades.clone();
        let env = CommandEnv {
            tech: &self.tech,
            map: &self.map,
            operative_types: &operative_types,
            ledger: &mut ledger,
            upgrades: &mut upgrades,
        };
        unit.check_command(command, &env)
    }

    /// Create a finished unit near `pos`.
    ///
    /// # Errors
    ///
    /// Unknown type or faction, or no free placement.
    pub fn create_unit(
        &mut self,
        unit_type: &str,
        faction: usize,
        pos: GridPos,
    ) -> Result<UnitReference> {
        let unit_type = self.tech.unit_type_id(unit_type)?;
        self.create_placed_unit(faction, unit_type, pos)
    }

    /// Give a unit a named command targeting a position.
    ///
    /// # Errors
    ///
    /// Unknown unit or command name.
    pub fn give_position_command(
        &mut self,
        unit: UnitId,
        command: &str,
        pos: GridPos,
    ) -> Result<CommandResult> {
        let reference = self.reference_of(unit)?;
        let command_type = self.tech.command_type_id(command)?;
        let command = Command::new(self.tech.command_type(command_type), pos);
        Ok(self.give_command(reference.faction, unit, command))
    }

    fn give_command_producing(
        &mut self,
        unit: UnitId,
        class: CommandClass,
        produced: Produced,
    ) -> Result<CommandResult> {
        let reference = self.reference_of(unit)?;
        let Some(holder) = self.find_unit(reference) else {
            return Err(GameError::UnitNotFound(unit));
        };
        let found = self
            .tech
            .unit_type(holder.unit_type())
            .commands
            .iter()
            .map(|&c| self.tech.command_type(c))
            .find(|c| c.class == class && c.produced == Some(produced))
            .map(|c| Command::new(c, holder.pos()));
        Ok(match found {
            Some(command) => self.give_command(reference.faction, unit, command),
            None => CommandResult::FailUndefined,
        })
    }

    /// Order a unit to produce a named unit type.
    ///
    /// # Errors
    ///
    /// Unknown unit or unit type name.
    pub fn give_production_command(&mut self, unit: UnitId, produced: &str) -> Result<CommandResult> {
        let produced = Produced::Unit(self.tech.unit_type_id(produced)?);
        self.give_command_producing(unit, CommandClass::Produce, produced)
    }

    /// Order a unit to research a named upgrade.
    ///
    /// # Errors
    ///
    /// Unknown unit or upgrade name.
    pub fn give_upgrade_command(&mut self, unit: UnitId, upgrade: &str) -> Result<CommandResult> {
        let produced = Produced::Upgrade(self.tech.upgrade_type_id(upgrade)?);
        self.give_command_producing(unit, CommandClass::Upgrade, produced)
    }

    /// Add an amount of a resource to a faction, clamped to storage.
    ///
    /// # Errors
    ///
    /// Unknown resource or faction.
    pub fn give_resource(&mut self, resource: &str, faction: usize, amount: i32) -> Result<()> {
        let resource = self.tech.resource_id(resource)?;
        self.factions
            .get_mut(faction)
            .ok_or(GameError::UnknownFaction(faction))?
            .ledger
            .inc_amount(resource, amount);
        Ok(())
    }

    /// Current amount of a resource.
    ///
    /// # Errors
    ///
    /// Unknown resource or faction.
    pub fn resource_amount(&self, resource: &str, faction: usize) -> Result<i32> {
        let resource = self.tech.resource_id(resource)?;
        Ok(self
            .factions
            .get(faction)
            .ok_or(GameError::UnknownFaction(faction))?
            .ledger
            .amount(resource))
    }

    /// Units of a faction, corpses included until undertaken.
    ///
    /// # Errors
    ///
    /// Unknown faction.
    pub fn unit_count(&self, faction: usize) -> Result<usize> {
        self.factions
            .get(faction)
            .map(Faction::unit_count)
            .ok_or(GameError::UnknownFaction(faction))
    }

    /// Living units of a named type in a faction.
    ///
    /// # Errors
    ///
    /// Unknown faction or type name.
    pub fn unit_count_of_type(&self, faction: usize, unit_type: &str) -> Result<usize> {
        let unit_type = self.tech.unit_type_id(unit_type)?;
        self.factions
            .get(faction)
            .map(|f| f.count_of_type(unit_type))
            .ok_or(GameError::UnknownFaction(faction))
    }

    /// Cell of a unit.
    ///
    /// # Errors
    ///
    /// Unknown unit.
    pub fn unit_position(&self, unit: UnitId) -> Result<GridPos> {
        self.unit_by_id(unit)
            .map(Unit::pos)
            .ok_or(GameError::UnitNotFound(unit))
    }

    /// Faction owning a unit.
    ///
    /// # Errors
    ///
    /// Unknown unit.
    pub fn unit_faction_index(&self, unit: UnitId) -> Result<usize> {
        self.unit_by_id(unit)
            .map(Unit::faction)
            .ok_or(GameError::UnitNotFound(unit))
    }

    /// Start location of a faction.
    ///
    /// # Errors
    ///
    /// Unknown faction, or a map without that location.
    pub fn start_location(&self, faction: usize) -> Result<GridPos> {
        let f = self
            .factions
            .get(faction)
            .ok_or(GameError::UnknownFaction(faction))?;
        self.map
            .start_location(f.start_location())
            .ok_or(GameError::UnknownFaction(faction))
    }

    /// Flag the game as over.
    pub fn end_game(&mut self) {
        self.script.game_over = true;
    }

    /// Declare a faction a winner.
    pub fn set_player_as_winner(&mut self, faction: usize) {
        self.script.winners.insert(faction);
    }

    /// Hash of every piece of dynamic state. Two worlds that hash equal
    /// after the same commands have not diverged.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.frame_count.hash(&mut hasher);
        self.next_unit_id.hash(&mut hasher);
        self.factions.len().hash(&mut hasher);
        for faction in &self.factions {
            faction.hash(&mut hasher);
        }
        self.map.hash(&mut hasher);
        self.fog.hash(&mut hasher);
        self.script.hash(&mut hasher);
        hasher.finish()
    }

    /// Serialize the world with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if encoding fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize world: {e}")))
    }

    /// Restore a world serialized with [`World::serialize`]. Fog deltas are
    /// not persisted and start empty.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if decoding fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| GameError::InvalidState(format!("Failed to deserialize world: {e}")))
    }
}

fn cost_of(unit_type: &UnitType, resource: ResourceTypeId) -> i32 {
    unit_type
        .costs
        .iter()
        .filter(|c| c.resource == resource)
        .map(|c| c.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectLog, ObserverRegistry};
    use crate::testing;

    fn step(world: &mut World, ticks: u32) {
        let mut effects = EffectLog::default();
        let mut observers = ObserverRegistry::new();
        let mut hooks = Hooks::new(&mut effects, &mut observers);
        for _ in 0..ticks {
            world.update(&mut hooks);
        }
    }

    fn resource(world: &World, faction: usize, name: &str) -> i32 {
        world.resource_amount(name, faction).unwrap()
    }

    #[test]
    fn test_new_world_places_starting_units() {
        let world = testing::world();
        assert_eq!(world.factions().len(), 2);
        for f in 0..2 {
            assert_eq!(world.unit_count(f).unwrap(), 4);
            assert_eq!(world.unit_count_of_type(f, "castle").unwrap(), 1);
            assert_eq!(world.unit_count_of_type(f, "worker").unwrap(), 3);
            assert!(world.faction(f).unwrap().units().all(Unit::is_operative));
        }
        // castle grants 10 energy, three workers take one each
        assert_eq!(resource(&world, 0, "energy"), 7);
        assert_eq!(resource(&world, 0, "gold"), 600);
    }

    #[test]
    fn test_starting_units_do_not_overlap() {
        let world = testing::world();
        let mut seen = BTreeSet::new();
        for unit in world.factions().iter().flat_map(Faction::units) {
            let ut = world.tech().unit_type(unit.unit_type());
            for dy in 0..ut.size {
                for dx in 0..ut.size {
                    assert!(seen.insert(unit.pos() + GridPos::new(dx, dy)));
                }
            }
            assert_eq!(world.map().unit_at(unit.pos(), unit.field()), Some(unit.reference()));
        }
    }

    #[test]
    fn test_mismatched_content_is_rejected() {
        let tech = testing::tech();
        let map = testing::map(&tech);
        let mut settings = testing::settings();
        settings.map = "elsewhere".into();
        assert!(matches!(
            World::new(&settings, tech, map),
            Err(GameError::InvalidContent(_))
        ));
    }

    #[test]
    fn test_fog_disabled_in_network_game_aborts_init() {
        let tech = testing::tech();
        let map = testing::map(&tech);
        let mut settings = testing::settings();
        settings.factions[0].control = crate::config::ControlType::Human;
        settings.factions[1].control = crate::config::ControlType::Network;
        settings.fog_of_war = false;
        assert!(matches!(
            World::new(&settings, tech, map),
            Err(GameError::Config(
                crate::config::ConfigError::FogOfWarDisabledInNetworkGame
            ))
        ));
    }

    #[test]
    fn test_update_advances_tick_and_reveals_start() {
        let mut world = testing::world();
        let start = world.start_location(0).unwrap();
        assert!(world.fog().is_visible(0, start));
        assert!(!world.fog().is_visible(0, world.start_location(1).unwrap()));
        step(&mut world, 3);
        assert_eq!(world.frame_count(), 3);
    }

    #[test]
    fn test_is_ally_is_symmetric() {
        let world = testing::world();
        let a = world.faction(0).unwrap().units().next().unwrap().reference();
        let b = world.faction(1).unwrap().units().next().unwrap().reference();
        assert_eq!(world.is_ally(a, b), world.is_ally(b, a));
        assert!(!world.is_ally(a, b));
        assert!(world.is_ally(a, a));
    }

    #[test]
    fn test_nearest_store_picks_castle() {
        let world = testing::world();
        let gold = world.tech().resource_id("gold").unwrap();
        let castle = world.tech().unit_type_id("castle").unwrap();
        let store = world.nearest_store(GridPos::new(9, 4), 0, gold).unwrap();
        assert_eq!(store.unit_type(), castle);
        assert!(world.nearest_store(GridPos::new(9, 4), 0, ResourceTypeId(2)).is_none());
    }

    #[test]
    fn test_place_unit_skips_occupied_cells() {
        let world = testing::world();
        let worker = world.tech().unit_type(world.tech().unit_type_id("worker").unwrap());
        let castle = world.faction(0).unwrap().units().next().unwrap();
        let pos = world.place_unit(castle.pos(), 10, worker, false).unwrap();
        assert!(world.map().is_free_cell(pos, worker.field));
    }

    #[test]
    fn test_scripting_interface() {
        let mut world = testing::world();
        let tower = world.create_unit("tower", 1, GridPos::new(16, 8)).unwrap();
        assert_eq!(world.unit_faction_index(tower.id).unwrap(), 1);
        assert_eq!(world.unit_count_of_type(1, "tower").unwrap(), 1);
        let pos = world.unit_position(tower.id).unwrap();
        assert!(pos.chebyshev(GridPos::new(16, 8)) <= 2);

        world.give_resource("gold", 0, 25).unwrap();
        assert_eq!(resource(&world, 0, "gold"), 625);
        assert!(world.create_unit("dragon", 0, GridPos::ZERO).is_err());
        assert!(matches!(world.unit_position(999), Err(GameError::UnitNotFound(999))));

        world.set_player_as_winner(1);
        world.end_game();
        assert!(world.script_flags().is_game_over());
        assert!(world.script_flags().is_winner(1));
    }

    #[test]
    fn test_production_and_upgrade_by_name() {
        let mut world = testing::world();
        let castle = world.faction(0).unwrap().units().next().unwrap().id();
        let worker = world.faction(0).unwrap().units().nth(1).unwrap().id();
        assert_eq!(
            world.give_production_command(castle, "worker").unwrap(),
            CommandResult::Success
        );
        assert_eq!(resource(&world, 0, "gold"), 550);
        assert_eq!(
            world.give_production_command(worker, "worker").unwrap(),
            CommandResult::FailUndefined
        );
        assert_eq!(
            world.give_upgrade_command(castle, "plating").unwrap(),
            CommandResult::Success
        );
        assert_eq!(
            world.give_upgrade_command(castle, "plating").unwrap(),
            CommandResult::FailUndefined
        );
    }

    #[test]
    fn test_give_command_rejects_foreign_units() {
        let mut world = testing::world();
        let enemy = world.faction(1).unwrap().units().nth(1).unwrap().id();
        let stop = world.tech().command_type(world.tech().command_type_id("stop").unwrap());
        let command = Command::new(stop, GridPos::ZERO);
        assert_eq!(world.give_command(0, enemy, command), CommandResult::FailUndefined);
    }

    #[test]
    fn test_cancel_command_refunds_tail() {
        let mut world = testing::world();
        let castle = world.faction(0).unwrap().units().next().unwrap().id();
        assert_eq!(world.give_production_command(castle, "worker").unwrap(), CommandResult::Success);
        assert_eq!(resource(&world, 0, "gold"), 550);
        assert_eq!(world.cancel_command(0, castle), CommandResult::Success);
        assert_eq!(resource(&world, 0, "gold"), 600);
        assert_eq!(world.cancel_command(0, castle), CommandResult::FailUndefined);
        assert_eq!(world.cancel_command(1, castle), CommandResult::FailUndefined);
    }

    #[test]
    fn test_serialization_round_trip_preserves_hash() {
        let mut world = testing::world();
        step(&mut world, 5);
        let bytes = world.serialize().unwrap();
        let restored = World::deserialize(&bytes).unwrap();
        assert_eq!(restored.state_hash(), world.state_hash());
        assert!(World::deserialize(&bytes[..4]).is_err());
    }

    #[test]
    fn test_compute_command_type_picks_by_target() {
        let world = testing::world();
        let own = world.faction(0).unwrap();
        let castle = own.units().next().unwrap();
        let worker = own.units().nth(1).unwrap();
        let enemy_castle = world.faction(1).unwrap().units().next().unwrap();
        let id = |name: &str| world.tech.command_type_id(name).unwrap();
        let pick = |unit: &Unit, pos: GridPos, target: Option<(&Unit, bool)>| {
            unit.compute_command_type(pos, target, &world.map, &world.tech)
        };

        let open = GridPos::new(0, 0);
        assert_eq!(
            pick(worker, open, Some((enemy_castle, false))),
            Some(id("attack"))
        );
        assert_eq!(pick(worker, open, Some((castle, true))), Some(id("repair")));
        assert_eq!(pick(worker, GridPos::new(9, 4), None), Some(id("harvest")));
        assert_eq!(pick(worker, open, None), Some(id("move")));
        assert_eq!(pick(castle, GridPos::new(9, 4), None), None);
    }
}
