//! Units: identity, state, command admission and hit point handling.
//!
//! A [`Unit`] never holds a pointer to another unit. Targets are
//! [`UnitReference`]s resolved through the world on every use, so a target
//! can die and be undertaken while still referenced.
//!
//! # Command admission
//!
//! [`Unit::give_command`] is the only way a command enters a queue:
//!
//! 1. a non-queuable command clears the queue (reversing every queued cost,
//!    tail first) and the path;
//! 2. a queuable command cancels a non-queuable head;
//! 3. the command is validated against unit state, map bounds, requirements
//!    and costs;
//! 4. on success its cost is committed and it is appended; on failure nothing
//!    changes.
//!
//! Validation and commit run back to back on one `&mut` borrow of the
//! faction's ledger, so no other admission can observe a stale total.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandQueue, CommandResult};
use crate::effects::{EffectSink, ObserverId};
use crate::faction::requirements_met;
use crate::ledger::{Ledger, TotalUpgrade, UpgradeManager};
use crate::map::Map;
use crate::math::{fixed_serde, heading_degrees, ratio, Fixed, GridPos, Vec3Fixed};
use crate::tech::{
    CommandClass, CommandType, CommandTypeId, Field, Produced, SkillClass, TechTree, UnitType,
    UnitTypeId, UpgradeType,
};
use crate::world::constants::{AIR_HEIGHT, MAX_BLOCK_COUNT};

/// World-unique unit id. Assigned monotonically, never reused.
pub type UnitId = u32;

/// Weak reference to a unit: owning faction index plus id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UnitReference {
    /// Owning faction index.
    pub faction: usize,
    /// Unit id.
    pub id: UnitId,
}

impl UnitReference {
    /// Create a reference.
    #[must_use]
    pub const fn new(faction: usize, id: UnitId) -> Self {
        Self { faction, id }
    }
}

/// Waypoints of the move skill plus a consecutive-block counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitPath {
    cells: VecDeque<GridPos>,
    block_count: u32,
}

impl UnitPath {
    /// Whether no waypoints remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether enough consecutive steps failed to force a full recompute.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.block_count >= MAX_BLOCK_COUNT
    }

    /// Consecutive blocked steps.
    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Drop waypoints and reset the block counter.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.block_count = 0;
    }

    /// Record a blocked step: the current path is discarded.
    pub fn inc_block_count(&mut self) {
        self.cells.clear();
        self.block_count += 1;
    }

    /// Append a waypoint.
    pub fn push(&mut self, pos: GridPos) {
        self.cells.push_back(pos);
    }

    /// Next waypoint.
    #[must_use]
    pub fn peek(&self) -> Option<GridPos> {
        self.cells.front().copied()
    }

    /// Consume the next waypoint.
    pub fn pop(&mut self) -> Option<GridPos> {
        self.cells.pop_front()
    }

    /// Number of remaining waypoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

/// Categories used by UIs to cycle through units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterestingUnitType {
    /// Harvester with nothing to do.
    IdleHarvester,
    /// Completed building.
    BuiltBuilding,
    /// Unit able to produce.
    Producer,
    /// Unit below max hit points.
    Damaged,
    /// Unit providing storage.
    Store,
}

/// Borrowed faction accounts used when committing or reversing costs.
pub struct Accounts<'a> {
    /// Content.
    pub tech: &'a TechTree,
    /// Faction resources.
    pub ledger: &'a mut Ledger,
    /// Faction upgrades.
    pub upgrades: &'a mut UpgradeManager,
}

/// Everything admission reads or writes besides the unit itself.
pub struct CommandEnv<'a> {
    /// Content.
    pub tech: &'a TechTree,
    /// Map, for bounds checks.
    pub map: &'a Map,
    /// Unit types the faction owns in operative state.
    pub operative_types: &'a BTreeSet<UnitTypeId>,
    /// Faction resources.
    pub ledger: &'a mut Ledger,
    /// Faction upgrades.
    pub upgrades: &'a mut UpgradeManager,
}

impl CommandEnv<'_> {
    /// Reborrow the cost-bearing parts.
    pub fn accounts(&mut self) -> Accounts<'_> {
        Accounts {
            tech: self.tech,
            ledger: self.ledger,
            upgrades: self.upgrades,
        }
    }
}

/// One controllable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    id: UnitId,
    faction: usize,
    unit_type: UnitTypeId,
    field: Field,

    pub(crate) pos: GridPos,
    pub(crate) last_pos: GridPos,
    pub(crate) target_pos: GridPos,
    pub(crate) target_vec: Vec3Fixed,
    pub(crate) target: Option<UnitReference>,

    #[serde(with = "fixed_serde")]
    pub(crate) rotation: Fixed,
    #[serde(with = "fixed_serde")]
    pub(crate) last_rotation: Fixed,
    #[serde(with = "fixed_serde")]
    pub(crate) target_rotation: Fixed,

    pub(crate) hp: i32,
    pub(crate) ep: i32,
    pub(crate) skill: SkillClass,
    #[serde(with = "fixed_serde")]
    pub(crate) progress: Fixed,
    #[serde(with = "fixed_serde")]
    pub(crate) anim_progress: Fixed,
    #[serde(with = "fixed_serde")]
    pub(crate) last_anim_progress: Fixed,
    pub(crate) progress2: i32,

    pub(crate) kills: u32,
    pub(crate) level: Option<usize>,
    pub(crate) dead_count: u32,
    pub(crate) alive: bool,
    pub(crate) to_be_undertaken: bool,
    pub(crate) on_fire: bool,

    pub(crate) load: i32,
    pub(crate) load_type: Option<crate::tech::ResourceTypeId>,
    pub(crate) harvest_pos: Option<GridPos>,

    pub(crate) commands: CommandQueue,
    pub(crate) path: UnitPath,
    pub(crate) total_upgrade: TotalUpgrade,
    observers: Vec<ObserverId>,
}

impl Unit {
    /// A freshly created unit: a twentieth of its hit points, idle, facing a
    /// small id-derived angle.
    #[must_use]
    pub fn new(
        id: UnitId,
        faction: usize,
        pos: GridPos,
        unit_type: &UnitType,
        total_upgrade: TotalUpgrade,
    ) -> Self {
        let rotation = Fixed::from_num((id.wrapping_mul(7919) % 11) as i32 - 5);
        Self {
            id,
            faction,
            unit_type: unit_type.id,
            field: unit_type.field,
            pos,
            last_pos: pos,
            target_pos: pos,
            target_vec: Vec3Fixed::ZERO,
            target: None,
            rotation,
            last_rotation: rotation,
            target_rotation: rotation,
            hp: unit_type.max_hp / 20,
            ep: 0,
            skill: SkillClass::Stop,
            progress: Fixed::ZERO,
            anim_progress: Fixed::ZERO,
            last_anim_progress: Fixed::ZERO,
            progress2: 0,
            kills: 0,
            level: None,
            dead_count: 0,
            alive: true,
            to_be_undertaken: false,
            on_fire: false,
            load: 0,
            load_type: None,
            harvest_pos: None,
            commands: CommandQueue::new(),
            path: UnitPath::default(),
            total_upgrade,
            observers: Vec::new(),
        }
    }

    /// Unit id.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Owning faction index.
    #[must_use]
    pub const fn faction(&self) -> usize {
        self.faction
    }

    /// Weak reference to this unit.
    #[must_use]
    pub const fn reference(&self) -> UnitReference {
        UnitReference::new(self.faction, self.id)
    }

    /// Unit type id.
    #[must_use]
    pub const fn unit_type(&self) -> UnitTypeId {
        self.unit_type
    }

    /// Movement layer.
    #[must_use]
    pub const fn field(&self) -> Field {
        self.field
    }

    /// Current cell.
    #[must_use]
    pub const fn pos(&self) -> GridPos {
        self.pos
    }

    /// Previous cell.
    #[must_use]
    pub const fn last_pos(&self) -> GridPos {
        self.last_pos
    }

    /// Cell being approached or faced.
    #[must_use]
    pub const fn target_pos(&self) -> GridPos {
        self.target_pos
    }

    /// Tracked target unit.
    #[must_use]
    pub const fn target(&self) -> Option<UnitReference> {
        self.target
    }

    /// Rotation in degrees.
    #[must_use]
    pub const fn rotation(&self) -> Fixed {
        self.rotation
    }

    /// Target rotation in degrees.
    #[must_use]
    pub const fn target_rotation(&self) -> Fixed {
        self.target_rotation
    }

    /// Hit points.
    #[must_use]
    pub const fn hp(&self) -> i32 {
        self.hp
    }

    /// Energy points.
    #[must_use]
    pub const fn ep(&self) -> i32 {
        self.ep
    }

    /// Current skill class.
    #[must_use]
    pub const fn skill(&self) -> SkillClass {
        self.skill
    }

    /// Skill progress in `[0, 1]`.
    #[must_use]
    pub const fn progress(&self) -> Fixed {
        self.progress
    }

    /// Animation progress in `[0, 1]`.
    #[must_use]
    pub const fn anim_progress(&self) -> Fixed {
        self.anim_progress
    }

    /// Production counter of the current skill.
    #[must_use]
    pub const fn progress2(&self) -> i32 {
        self.progress2
    }

    /// Kill count.
    #[must_use]
    pub const fn kills(&self) -> u32 {
        self.kills
    }

    /// Reached experience level index.
    #[must_use]
    pub const fn level(&self) -> Option<usize> {
        self.level
    }

    /// Ticks spent dead.
    #[must_use]
    pub const fn dead_count(&self) -> u32 {
        self.dead_count
    }

    /// Carried resource amount.
    #[must_use]
    pub const fn load(&self) -> i32 {
        self.load
    }

    /// Whether the unit burns.
    #[must_use]
    pub const fn is_on_fire(&self) -> bool {
        self.on_fire
    }

    /// Whether the unit is flagged for removal.
    #[must_use]
    pub const fn to_be_undertaken(&self) -> bool {
        self.to_be_undertaken
    }

    /// Command queue.
    #[must_use]
    pub const fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Command in effect.
    #[must_use]
    pub fn current_command(&self) -> Option<&Command> {
        self.commands.front()
    }

    /// Whether any command is queued.
    #[must_use]
    pub fn any_command(&self) -> bool {
        !self.commands.is_empty()
    }

    /// Movement path.
    #[must_use]
    pub const fn path(&self) -> &UnitPath {
        &self.path
    }

    /// Accumulated upgrade and level bonuses.
    #[must_use]
    pub const fn total_upgrade(&self) -> &TotalUpgrade {
        &self.total_upgrade
    }

    /// Registered observer handles.
    #[must_use]
    pub fn observers(&self) -> &[ObserverId] {
        &self.observers
    }

    /// Register an observer handle.
    pub fn add_observer(&mut self, observer: ObserverId) {
        if !self.observers.contains(&observer) {
            self.observers.push(observer);
        }
    }

    /// Unregister an observer handle.
    pub fn remove_observer(&mut self, observer: ObserverId) {
        self.observers.retain(|&o| o != observer);
    }

    /// Whether hit points remain.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// Whether the unit is under construction.
    #[must_use]
    pub fn is_being_built(&self) -> bool {
        self.skill == SkillClass::BeBuilt
    }

    /// Whether construction is complete.
    #[must_use]
    pub fn is_built(&self) -> bool {
        !self.is_being_built()
    }

    /// Alive and built: able to take commands.
    #[must_use]
    pub fn is_operative(&self) -> bool {
        self.is_alive() && self.is_built()
    }

    /// Whether the corpse has started decaying.
    #[must_use]
    pub const fn is_putrefacting(&self) -> bool {
        self.dead_count != 0
    }

    /// Whether hit points are below the effective max.
    #[must_use]
    pub fn is_damaged(&self, unit_type: &UnitType) -> bool {
        self.hp < self.total_upgrade.max_hp(unit_type)
    }

    /// Switch skill. Animation restarts only when the class changes.
    pub fn set_skill(&mut self, skill: SkillClass) {
        if skill != self.skill {
            self.anim_progress = Fixed::ZERO;
            self.last_anim_progress = Fixed::ZERO;
        }
        self.progress2 = 0;
        self.skill = skill;
    }

    /// Face and approach a cell; drops any tracked target.
    pub fn set_target_pos(&mut self, target_pos: GridPos) {
        self.target_rotation = heading_degrees(target_pos - self.pos);
        self.target = None;
        self.target_pos = target_pos;
    }

    /// Track another unit.
    pub fn set_target(&mut self, target: &Unit, map: &Map, target_type: &UnitType) {
        self.set_target_pos(target.pos);
        self.target_vec = target.curr_vector(map, target_type);
        self.target = Some(target.reference());
    }

    /// Refresh tracking data from the resolved target.
    pub(crate) fn track(&mut self, target_pos: GridPos, target_vec: Vec3Fixed) {
        self.target_pos = target_pos;
        self.target_rotation = heading_degrees(target_pos - self.pos);
        self.target_vec = target_vec;
    }

    /// Step to a new cell.
    pub fn set_pos(&mut self, pos: GridPos) {
        self.last_pos = self.pos;
        self.pos = pos;
    }

    /// Admit a command, committing its cost. See the module docs.
    pub fn give_command(&mut self, command: Command, env: &mut CommandEnv<'_>) -> CommandResult {
        if command.behavior().queuable {
            // A non-queuable head is always alone, so the tail is the head.
            let head_is_exclusive = self
                .commands
                .front()
                .is_some_and(|c| !c.behavior().queuable);
            if head_is_exclusive {
                self.cancel_command(&mut env.accounts());
            }
        } else {
            self.clear_commands(&mut env.accounts());
            self.path.clear();
            self.harvest_pos = None;
        }

        let result = self.check_command(&command, env);
        if result.is_success() {
            self.apply_command(&command, &mut env.accounts());
            self.commands.push_back(command);
        }
        tracing::debug!(
            unit = self.id,
            faction = self.faction,
            ?result,
            queued = self.commands.len(),
            "command admission"
        );
        result
    }

    /// Pop the completed head command.
    pub fn finish_command(&mut self) -> CommandResult {
        if self.commands.pop_front().is_none() {
            return CommandResult::FailUndefined;
        }
        self.path.clear();
        CommandResult::Success
    }

    /// Pop the tail command and reverse its committed cost.
    pub fn cancel_command(&mut self, accounts: &mut Accounts<'_>) -> CommandResult {
        let Some(command) = self.commands.pop_back() else {
            return CommandResult::FailUndefined;
        };
        self.undo_command(&command, accounts);
        self.path.clear();
        CommandResult::Success
    }

    /// Cancel every queued command, tail first.
    pub fn clear_commands(&mut self, accounts: &mut Accounts<'_>) {
        while self.cancel_command(accounts).is_success() {}
    }

    /// Validate a command without side effects.
    #[must_use]
    pub fn check_command(&self, command: &Command, env: &CommandEnv<'_>) -> CommandResult {
        let tech = env.tech;
        if !tech.contains_command_type(command.command_type()) {
            return CommandResult::FailUndefined;
        }
        let unit_type = tech.unit_type(self.unit_type);
        if !self.is_operative()
            || command.unit() == Some(self.reference())
            || !unit_type.has_command(command.command_type())
        {
            return CommandResult::FailUndefined;
        }
        if !env.map.is_inside(command.pos()) {
            return CommandResult::FailUndefined;
        }

        let command_type = tech.command_type(command.command_type());
        if let Some(Produced::Upgrade(upgrade)) = command_type.produced {
            if env.upgrades.is_upgrading_or_upgraded(upgrade) {
                return CommandResult::FailUndefined;
            }
        }

        if let Some(produced) = command_type.produced {
            let p = tech.producible(produced);
            if !requirements_met(p.requirements(), env.operative_types, env.upgrades) {
                return CommandResult::FailRequirements;
            }
            if !env.ledger.check_costs(p) {
                return CommandResult::FailResources;
            }
        }

        if command_type.class == CommandClass::Build {
            let Some(built) = command.unit_type() else {
                return CommandResult::FailUndefined;
            };
            if !command_type.buildable.contains(&built) {
                return CommandResult::FailUndefined;
            }
            let built = tech.unit_type(built);
            if !requirements_met(&built.requirements, env.operative_types, env.upgrades) {
                return CommandResult::FailRequirements;
            }
            if !env.ledger.check_costs(built) {
                return CommandResult::FailResources;
            }
        }

        CommandResult::Success
    }

    fn apply_command(&self, command: &Command, accounts: &mut Accounts<'_>) {
        let command_type = accounts.tech.command_type(command.command_type());
        if let Some(produced) = command_type.produced {
            accounts
                .ledger
                .apply_costs(accounts.tech.producible(produced));
        }
        match (command_type.class, command_type.produced) {
            (CommandClass::Build, _) => {
                if let Some(built) = command.unit_type() {
                    accounts.ledger.apply_costs(accounts.tech.unit_type(built));
                }
            }
            (CommandClass::Upgrade, Some(Produced::Upgrade(upgrade))) => {
                accounts.upgrades.start_upgrade(upgrade);
            }
            _ => {}
        }
    }

    fn undo_command(&self, command: &Command, accounts: &mut Accounts<'_>) {
        let command_type = accounts.tech.command_type(command.command_type());
        if let Some(produced) = command_type.produced {
            accounts
                .ledger
                .de_apply_costs(accounts.tech.producible(produced));
        }
        match (command_type.class, command_type.produced) {
            (CommandClass::Build, _) => {
                // Once construction started the site carries the cost.
                let started = matches!(self.skill, SkillClass::Build | SkillClass::Die);
                if let (false, Some(built)) = (started, command.unit_type()) {
                    accounts
                        .ledger
                        .de_apply_costs(accounts.tech.unit_type(built));
                }
            }
            (CommandClass::Upgrade, Some(Produced::Upgrade(upgrade))) => {
                accounts.upgrades.cancel_upgrade(upgrade);
            }
            _ => {}
        }
    }

    /// Completion of construction or production.
    pub fn born(&mut self, unit_type: &UnitType, ledger: &mut Ledger) {
        ledger.add_store(unit_type);
        ledger.apply_static_production(unit_type);
        self.set_skill(SkillClass::Stop);
        self.hp = self.total_upgrade.max_hp(unit_type);
    }

    /// Subtract hit points. Returns `true` exactly once, on the lethal hit.
    pub fn dec_hp(
        &mut self,
        amount: i32,
        unit_type: &UnitType,
        at: Vec3Fixed,
        effects: &mut dyn EffectSink,
    ) -> bool {
        if self.hp == 0 {
            return false;
        }
        self.hp -= amount.max(0);

        if unit_type.burnable && self.hp < unit_type.max_hp / 2 && !self.on_fire {
            self.on_fire = true;
            effects.spawn_fire(self.reference(), at, ratio(unit_type.size, 3));
        }

        if self.hp <= 0 {
            self.alive = false;
            self.hp = 0;
            self.stop_fire(effects);
            return true;
        }
        false
    }

    pub(crate) fn stop_fire(&mut self, effects: &mut dyn EffectSink) {
        if self.on_fire {
            self.on_fire = false;
            effects.fade_fire(self.reference());
        }
    }

    /// Restore one repair step of hit points. Returns `true` once full.
    pub fn repair(&mut self, unit_type: &UnitType, effects: &mut dyn EffectSink) -> bool {
        self.hp += unit_type.max_hp / unit_type.production_time.max(1) + 1;
        let max = self.total_upgrade.max_hp(unit_type);
        let full = self.hp >= max;
        if full {
            self.hp = max;
        }
        if self.hp > unit_type.max_hp / 2 {
            self.stop_fire(effects);
        }
        full
    }

    /// Per-second regeneration, clamped to effective maxima.
    pub fn regenerate(&mut self, unit_type: &UnitType) {
        if !self.alive {
            return;
        }
        self.hp = (self.hp + unit_type.hp_regeneration).min(self.total_upgrade.max_hp(unit_type));
        self.ep = (self.ep + unit_type.ep_regeneration).min(self.total_upgrade.max_ep(unit_type));
    }

    /// Charge the current skill's energy cost. Returns `true` when the unit
    /// cannot pay and the skill must abort.
    pub fn compute_ep(&mut self, unit_type: &UnitType) -> bool {
        let cost = unit_type.skill(self.skill).map_or(0, |s| s.ep_cost);
        if self.ep - cost < 0 {
            return true;
        }
        self.ep = (self.ep - cost).min(self.total_upgrade.max_ep(unit_type));
        false
    }

    /// Fold a completed upgrade into this unit if it is affected.
    pub fn apply_upgrade(&mut self, upgrade: &UpgradeType) {
        if upgrade.is_affected(self.unit_type) {
            self.total_upgrade.sum(&upgrade.bonus);
            self.hp += upgrade.bonus.max_hp;
        }
    }

    /// Count a kill and level up when the next threshold is reached.
    pub fn inc_kills(&mut self, unit_type: &UnitType) {
        self.kills += 1;
        let next = self.level.map_or(0, |l| l + 1);
        let Some(level) = unit_type.levels.get(next) else {
            return;
        };
        if self.kills >= level.kills {
            self.level = Some(next);
            let before = self.total_upgrade.max_hp(unit_type);
            self.total_upgrade.inc_level(unit_type);
            self.hp += self.total_upgrade.max_hp(unit_type) - before;
        }
    }

    /// Turn into the command's target type if its footprint fits.
    pub fn morph(
        &mut self,
        command_type: &CommandType,
        map: &mut Map,
        accounts: &mut Accounts<'_>,
    ) -> bool {
        let Some(Produced::Unit(target)) = command_type.produced else {
            return false;
        };
        let tech = accounts.tech;
        let from = tech.unit_type(self.unit_type);
        let to = tech.unit_type(target);
        if !map.is_free_cells_or_has_unit(self.pos, to.size, to.field, self.reference()) {
            return false;
        }
        map.clear_unit_cells(self.pos, from.size, self.field);
        accounts.ledger.de_apply_static_costs(from);
        accounts.ledger.remove_store(from);
        self.hp = (self.hp + to.max_hp - from.max_hp).max(1);
        self.unit_type = target;
        self.field = to.field;
        self.level = None;
        self.total_upgrade = accounts.upgrades.total_upgrade(tech, to);
        map.put_unit_cells(self.reference(), self.pos, to.size, self.field);
        accounts.ledger.add_store(to);
        accounts.ledger.apply_static_production(to);
        accounts.ledger.apply_discount(to, command_type.morph_discount);
        true
    }

    /// Whether the unit falls in a UI category.
    #[must_use]
    pub fn is_interesting(&self, kind: InterestingUnitType, tech: &TechTree) -> bool {
        let unit_type = tech.unit_type(self.unit_type);
        match kind {
            InterestingUnitType::IdleHarvester => {
                let harvests = unit_type
                    .commands
                    .iter()
                    .any(|&c| tech.command_type(c).class == CommandClass::Harvest);
                harvests
                    && self
                        .commands
                        .front()
                        .map_or(true, |c| c.class() == CommandClass::Stop)
            }
            InterestingUnitType::BuiltBuilding => {
                unit_type.has_skill(SkillClass::BeBuilt) && self.is_built()
            }
            InterestingUnitType::Producer => unit_type.has_skill(SkillClass::Produce),
            InterestingUnitType::Damaged => self.is_damaged(unit_type),
            InterestingUnitType::Store => !unit_type.stores.is_empty(),
        }
    }

    /// Default command for a right-click on `pos` or on `target`.
    ///
    /// `target` carries the target unit, its type and whether it is allied.
    #[must_use]
    pub fn compute_command_type(
        &self,
        pos: GridPos,
        target: Option<(&Unit, bool)>,
        map: &Map,
        tech: &TechTree,
    ) -> Option<CommandTypeId> {
        let unit_type = tech.unit_type(self.unit_type);
        let commands = || unit_type.commands.iter().map(|&c| tech.command_type(c));

        let chosen = match target {
            Some((target, false)) => {
                let reaches = unit_type
                    .skill(SkillClass::Attack)
                    .and_then(|s| s.attack.as_ref())
                    .is_some_and(|a| a.fields.contains(&target.field));
                commands()
                    .find(|c| c.class == CommandClass::Attack && reaches)
                    .map(|c| c.id)
            }
            Some((target, true)) => commands()
                .find(|c| c.can_repair(target.unit_type))
                .map(|c| c.id),
            None => map
                .deposit_at(pos)
                .and_then(|d| commands().find(|c| c.can_harvest(d.resource)))
                .map(|c| c.id),
        };

        chosen.or_else(|| {
            commands()
                .find(|c| c.class == CommandClass::Move)
                .map(|c| c.id)
        })
    }

    /// Hit point ratio in `[0, 1]`.
    #[must_use]
    pub fn hp_ratio(&self, unit_type: &UnitType) -> Fixed {
        fraction(self.hp, self.total_upgrade.max_hp(unit_type))
    }

    /// Energy ratio in `[0, 1]`; 0 for units without energy.
    #[must_use]
    pub fn ep_ratio(&self, unit_type: &UnitType) -> Fixed {
        fraction(self.ep, self.total_upgrade.max_ep(unit_type))
    }

    /// Progress of the head production command in percent.
    #[must_use]
    pub fn production_percent(&self, tech: &TechTree) -> Option<i32> {
        let command = self.commands.front()?;
        let produced = tech.command_type(command.command_type()).produced?;
        let time = tech.producible(produced).production_time().max(1);
        Some((self.progress2 * 100 / time).clamp(0, 100))
    }

    fn cell_height(&self, map: &Map, pos: GridPos) -> Fixed {
        let base = Fixed::from_num(map.height_at(pos));
        if self.field == Field::Air {
            base + Fixed::from_num(AIR_HEIGHT)
        } else {
            base
        }
    }

    /// Ground-level render position, interpolated while moving.
    #[must_use]
    pub fn curr_vector_flat(&self, map: &Map, unit_type: &UnitType) -> Vec3Fixed {
        let here = Vec3Fixed::new(
            Fixed::from_num(self.pos.x),
            self.cell_height(map, self.pos),
            Fixed::from_num(self.pos.y),
        );
        let mut v = if self.skill == SkillClass::Move {
            let from = Vec3Fixed::new(
                Fixed::from_num(self.last_pos.x),
                self.cell_height(map, self.last_pos),
                Fixed::from_num(self.last_pos.y),
            );
            from.lerp(here, self.progress)
        } else {
            here
        };
        let center = ratio(unit_type.size, 2) - ratio(1, 2);
        v.x += center;
        v.z += center;
        v
    }

    /// Render position at half the model height.
    #[must_use]
    pub fn curr_vector(&self, map: &Map, unit_type: &UnitType) -> Vec3Fixed {
        let mut v = self.curr_vector_flat(map, unit_type);
        v.y += ratio(unit_type.height, 2);
        v
    }
}

fn fraction(num: i32, den: i32) -> Fixed {
    if den <= 0 {
        return Fixed::ZERO;
    }
    crate::math::clamp(ratio(num, den), Fixed::ZERO, Fixed::ONE)
}
