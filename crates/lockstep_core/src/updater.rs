//! Unit updater: skill progress, movement and per-class command behaviour.
//!
//! Every tick [`Unit::advance`] moves the current skill forward. When a
//! skill cycle completes the head command's behaviour runs, decides the next
//! skill and possibly finishes or cancels the command. Damage, harvesting,
//! building and production all happen on cycle completion.
//!
//! The unit being updated is lifted out of its roster slot for the duration,
//! so the rest of the world can be borrowed freely while it is mutated.

use crate::command::Command;
use crate::effects::{Hooks, UnitEvent};
use crate::map::Map;
use crate::math::{clamp, ratio, Fixed, GridPos, Vec3Fixed};
use crate::pathfinding::find_path;
use crate::tech::{CommandClass, Field, HarvestSpec, Produced, SkillClass, UnitType};
use crate::unit::{Accounts, Unit, UnitReference};
use crate::world::constants::{
    DIAGONAL_FACTOR, HEIGHT_FACTOR_MAX, HEIGHT_FACTOR_MIN, MAX_DEAD_COUNT, PRODUCTION_AREA,
    RESOURCE_SEARCH_RADIUS, SPEED_DIVIDER, UPDATE_FPS,
};
use crate::world::World;

/// Waypoints stored per path computation.
const PATH_REFRESH: usize = 10;

/// Radius searched for the nearest free cell around an occupied destination.
const FREE_SEARCH_RADIUS: i32 = 10;

/// Result of one travel step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelState {
    /// The unit stands as close to the destination as it can get.
    Arrived,
    /// The next cell is claimed and the unit is walking.
    Moving,
    /// No step is possible this cycle.
    Blocked,
}

/// Outcome of an attack attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strike {
    OutOfRange,
    Engaged,
    Killed,
}

/// Chebyshev gap between two square footprints; 0 when they overlap, 1
/// when adjacent.
fn footprint_distance(a: GridPos, a_size: i32, b: GridPos, b_size: i32) -> i32 {
    let gap = |a0: i32, a_len: i32, b0: i32, b_len: i32| {
        (b0 - (a0 + a_len - 1)).max(a0 - (b0 + b_len - 1)).max(0)
    };
    gap(a.x, a_size, b.x, b_size).max(gap(a.y, a_size, b.y, b_size))
}

/// Cell of a footprint closest to `from`.
fn nearest_cell(anchor: GridPos, size: i32, from: GridPos) -> GridPos {
    GridPos::new(
        from.x.clamp(anchor.x, anchor.x + size - 1),
        from.y.clamp(anchor.y, anchor.y + size - 1),
    )
}

fn centered(pos: GridPos, size: i32) -> GridPos {
    pos + GridPos::new(size / 2, size / 2)
}

impl Unit {
    /// Advance skill and animation progress by one tick.
    ///
    /// `target` is the resolved tracked unit: its nearest cell and render
    /// vector. Returns `true` when a non-terminal skill cycle completed.
    pub fn advance(
        &mut self,
        unit_type: &UnitType,
        map: &Map,
        target: Option<(GridPos, Vec3Fixed)>,
    ) -> bool {
        let skill = unit_type.skill(self.skill);
        let speed = skill.map_or(0, |s| self.total_upgrade.skill_speed(s));
        let anim_speed = skill.map_or(0, |s| s.anim_speed);

        let mut diagonal_factor = Fixed::ONE;
        let mut height_factor = Fixed::ONE;
        if self.skill == SkillClass::Move {
            if self.last_pos.is_diagonal_step(self.pos) {
                diagonal_factor = DIAGONAL_FACTOR;
            }
            let height_diff = map.height_at(self.last_pos) - map.height_at(self.pos);
            height_factor = clamp(
                Fixed::ONE + ratio(height_diff, 5),
                HEIGHT_FACTOR_MIN,
                HEIGHT_FACTOR_MAX,
            );
        }

        let divider = Fixed::from_num(SPEED_DIVIDER * UPDATE_FPS as i32);
        self.last_anim_progress = self.anim_progress;
        self.progress += Fixed::from_num(speed) * diagonal_factor * height_factor / divider;
        self.anim_progress += Fixed::from_num(anim_speed) * height_factor / divider;

        if let Some((pos, vec)) = target {
            self.track(pos, vec);
        }

        let half = ratio(1, 2);
        if self.skill != SkillClass::Stop
            && self.progress < half
            && unit_type.has_skill(SkillClass::Move)
        {
            let full_turn = Fixed::from_num(360);
            let mut delta = self.target_rotation - self.last_rotation;
            if delta.abs() >= Fixed::from_num(180) {
                delta += if self.target_rotation > self.last_rotation {
                    -full_turn
                } else {
                    full_turn
                };
            }
            self.rotation = self.last_rotation + delta * self.progress * 2;
        }

        if self.anim_progress > Fixed::ONE {
            self.anim_progress = if self.skill == SkillClass::Die {
                Fixed::ONE
            } else {
                Fixed::ZERO
            };
        }

        if self.progress >= Fixed::ONE {
            self.last_rotation = self.target_rotation;
            if self.skill != SkillClass::Die {
                self.progress = Fixed::ZERO;
                return true;
            }
            self.progress = Fixed::ONE;
            if !self.to_be_undertaken {
                self.dead_count += 1;
                if self.dead_count >= MAX_DEAD_COUNT {
                    self.to_be_undertaken = true;
                }
            }
        }
        false
    }
}

impl World {
    /// Update the unit in a roster slot, if any.
    pub(crate) fn update_slot(&mut self, faction: usize, slot: usize, hooks: &mut Hooks<'_>) {
        let Some(mut unit) = self.factions[faction].roster.take_slot(slot) else {
            return;
        };

        let target = unit.target().and_then(|r| self.find_unit(r)).map(|t| {
            let target_type = self.tech.unit_type(t.unit_type());
            (
                nearest_cell(t.pos(), target_type.size, unit.pos()),
                t.curr_vector(&self.map, target_type),
            )
        });

        let unit_type = self.tech.unit_type(unit.unit_type());
        if unit.advance(unit_type, &self.map, target) {
            self.update_command(&mut unit, hooks);

            let unit_type = self.tech.unit_type(unit.unit_type());
            if unit.compute_ep(unit_type) {
                unit.set_skill(SkillClass::Stop);
                let f = &mut self.factions[faction];
                unit.cancel_command(&mut f.accounts(&self.tech));
            }

            if unit.skill() == SkillClass::Move {
                self.move_unit_cells(&mut unit);
            }
        }

        self.factions[faction].roster.restore_slot(slot, unit);
    }

    fn move_unit_cells(&mut self, unit: &mut Unit) {
        let size = self.tech.unit_type(unit.unit_type()).size;
        let new_pos = unit.target_pos();
        if new_pos == unit.pos() || !self.map.is_inside(new_pos) {
            return;
        }
        self.map.clear_unit_cells(unit.pos(), size, unit.field());
        unit.set_pos(new_pos);
        self.map
            .put_unit_cells(unit.reference(), new_pos, size, unit.field());
    }

    fn update_command(&mut self, unit: &mut Unit, hooks: &mut Hooks<'_>) {
        if !unit.is_alive() {
            return;
        }
        let Some(command) = unit.current_command().cloned() else {
            if unit.is_operative() {
                self.update_stop(unit, hooks);
            }
            return;
        };

        match command.class() {
            CommandClass::Stop => self.update_stop(unit, hooks),
            CommandClass::Move => self.update_move(unit, &command),
            CommandClass::Attack => self.update_attack(unit, &command, hooks),
            CommandClass::Build => self.update_build(unit, &command, hooks),
            CommandClass::Harvest => self.update_harvest(unit, &command),
            CommandClass::Repair => self.update_repair(unit, &command, hooks),
            CommandClass::Produce => self.update_produce(unit, &command, hooks),
            CommandClass::Upgrade => self.update_upgrade(unit, &command),
            CommandClass::Morph => self.update_morph(unit, &command),
        }
    }

    fn finish(unit: &mut Unit) {
        unit.finish_command();
        unit.set_skill(SkillClass::Stop);
    }

    fn cancel(&mut self, unit: &mut Unit) {
        let f = &mut self.factions[unit.faction()];
        unit.cancel_command(&mut f.accounts(&self.tech));
        unit.set_skill(SkillClass::Stop);
    }

    /// Whether a unit may stand anchored at `pos`. Cells held by the unit
    /// itself count as free; with `ignore_moving`, so do cells held by
    /// walking units.
    fn can_occupy(&self, unit: &Unit, size: i32, pos: GridPos, ignore_moving: bool) -> bool {
        let field = unit.field();
        (0..size).all(|dy| {
            (0..size).all(|dx| {
                let Some(cell) = self.map.cell(pos + GridPos::new(dx, dy)) else {
                    return false;
                };
                if field == Field::Land && cell.deposit.is_some() {
                    return false;
                }
                match cell.units[field.slot()] {
                    None => true,
                    Some(r) if r == unit.reference() => true,
                    Some(r) => {
                        ignore_moving
                            && self
                                .find_unit(r)
                                .is_some_and(|o| o.skill() == SkillClass::Move)
                    }
                }
            })
        })
    }

    /// Free anchor closest to `dest`, ties going to the one closer to the
    /// unit. The unit's own position is the fallback.
    fn nearest_free_pos(&self, unit: &Unit, size: i32, dest: GridPos) -> GridPos {
        if self.can_occupy(unit, size, dest, false) {
            return dest;
        }
        let mut best = unit.pos();
        let mut best_dist = best.dist_sq(dest);
        for i in -FREE_SEARCH_RADIUS..=FREE_SEARCH_RADIUS {
            for j in -FREE_SEARCH_RADIUS..=FREE_SEARCH_RADIUS {
                let pos = dest + GridPos::new(i, j);
                if !self.can_occupy(unit, size, pos, false) {
                    continue;
                }
                let dist = pos.dist_sq(dest);
                if dist < best_dist
                    || (dist == best_dist && pos.dist_sq(unit.pos()) < best.dist_sq(unit.pos()))
                {
                    best = pos;
                    best_dist = dist;
                }
            }
        }
        best
    }

    /// Take one step toward `dest`, using the cached path when its next cell
    /// is free and searching otherwise.
    pub(crate) fn travel(&self, unit: &mut Unit, dest: GridPos) -> TravelState {
        let unit_type = self.tech.unit_type(unit.unit_type());
        let size = unit_type.size;
        if dest == unit.pos() {
            return TravelState::Arrived;
        }
        if !unit_type.has_skill(SkillClass::Move) {
            return TravelState::Blocked;
        }

        if let Some(next) = unit.path.pop() {
            if self.can_occupy(unit, size, next, false) && next.chebyshev(unit.pos()) == 1 {
                unit.set_target_pos(next);
                return TravelState::Moving;
            }
        }

        let goal = self.nearest_free_pos(unit, size, dest);
        if goal == unit.pos() {
            return TravelState::Arrived;
        }

        let ignore_moving = unit.path.is_blocked();
        let found = find_path(unit.pos(), goal, |p| {
            self.can_occupy(unit, size, p, ignore_moving)
        });
        match found {
            Some(cells) if !cells.is_empty() => {
                unit.path.clear();
                for cell in cells.into_iter().take(PATH_REFRESH) {
                    unit.path.push(cell);
                }
                match unit.path.pop() {
                    Some(next) if self.can_occupy(unit, size, next, false) => {
                        unit.set_target_pos(next);
                        TravelState::Moving
                    }
                    _ => {
                        unit.path.inc_block_count();
                        TravelState::Blocked
                    }
                }
            }
            _ => {
                unit.path.inc_block_count();
                tracing::trace!(
                    unit = unit.id(),
                    blocked = unit.path.block_count(),
                    "path blocked"
                );
                TravelState::Blocked
            }
        }
    }

    /// Travel and pick the matching skill: walking, or waiting in place.
    fn approach(&self, unit: &mut Unit, dest: GridPos) -> TravelState {
        let state = self.travel(unit, dest);
        if state == TravelState::Moving {
            unit.set_skill(SkillClass::Move);
        } else {
            unit.set_skill(SkillClass::Stop);
        }
        state
    }

    /// Attack `target` if it is alive, attackable and in range. The damage
    /// of a cycle lands when it completes, so only a unit already attacking
    /// the same target hits.
    fn strike(&mut self, unit: &mut Unit, target: UnitReference, hooks: &mut Hooks<'_>) -> Strike {
        let unit_type = self.tech.unit_type(unit.unit_type());
        let Some(skill) = unit_type.skill(SkillClass::Attack) else {
            return Strike::OutOfRange;
        };
        let Some((strength, range)) = unit.total_upgrade().attack(skill) else {
            return Strike::OutOfRange;
        };
        let Some(victim) = self.find_unit(target).filter(|v| v.is_alive()) else {
            return Strike::OutOfRange;
        };
        let reaches = skill
            .attack
            .as_ref()
            .map_or(true, |a| a.fields.is_empty() || a.fields.contains(&victim.field()));
        let victim_type = self.tech.unit_type(victim.unit_type());
        if !reaches
            || footprint_distance(unit.pos(), unit_type.size, victim.pos(), victim_type.size)
                > range
        {
            return Strike::OutOfRange;
        }

        let was_attacking = unit.skill() == SkillClass::Attack && unit.target() == Some(target);
        unit.set_target(victim, &self.map, victim_type);
        unit.set_skill(SkillClass::Attack);
        if was_attacking && self.hit(unit, target, strength, hooks) {
            return Strike::Killed;
        }
        Strike::Engaged
    }

    /// Deal `max(1, strength - armor)` damage. Returns `true` on the kill.
    fn hit(
        &mut self,
        attacker: &mut Unit,
        target: UnitReference,
        strength: i32,
        hooks: &mut Hooks<'_>,
    ) -> bool {
        let tech = &self.tech;
        let map = &self.map;
        let Some(victim) = self
            .factions
            .get_mut(target.faction)
            .and_then(|f| f.roster.get_mut(target.id))
        else {
            return false;
        };
        let victim_type = tech.unit_type(victim.unit_type());
        let damage = (strength - victim.total_upgrade().armor(victim_type)).max(1);
        let at = victim.curr_vector(map, victim_type);
        if !victim.dec_hp(damage, victim_type, at, hooks.effects) {
            return false;
        }
        attacker.inc_kills(tech.unit_type(attacker.unit_type()));
        tracing::debug!(
            attacker = attacker.id(),
            victim = target.id,
            kills = attacker.kills(),
            "lethal hit"
        );
        true
    }

    /// Living enemies the unit could attack, nearest first by squared
    /// distance, ties in faction and slot order.
    fn nearest_enemy(&self, unit: &Unit, radius: i32, visible_only: bool) -> Option<UnitReference> {
        let unit_type = self.tech.unit_type(unit.unit_type());
        let skill = unit_type.skill(SkillClass::Attack)?;
        let (_, range) = unit.total_upgrade().attack(skill)?;
        let fields = skill.attack.as_ref().map(|a| a.fields.clone()).unwrap_or_default();
        let own = self.factions.get(unit.faction())?;
        let team = own.team();

        let mut best: Option<(UnitReference, i64)> = None;
        for faction in self.factions.iter().filter(|f| !f.is_ally(own)) {
            for other in faction.units().filter(|u| u.is_alive()) {
                if !fields.is_empty() && !fields.contains(&other.field()) {
                    continue;
                }
                let other_type = self.tech.unit_type(other.unit_type());
                let gap = footprint_distance(unit.pos(), unit_type.size, other.pos(), other_type.size);
                if gap > radius.max(range) {
                    continue;
                }
                if visible_only && !self.fog.is_visible(team, other.pos()) {
                    continue;
                }
                let dist = unit.pos().dist_sq(other.pos());
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((other.reference(), dist));
                }
            }
        }
        best.map(|(r, _)| r)
    }

    fn update_stop(&mut self, unit: &mut Unit, hooks: &mut Hooks<'_>) {
        if let Some(target) = unit.target() {
            if unit.skill() == SkillClass::Attack
                && self.strike(unit, target, hooks) == Strike::Engaged
            {
                return;
            }
        }
        unit.set_skill(SkillClass::Stop);
        if let Some(enemy) = self.nearest_enemy(unit, 0, false) {
            self.strike(unit, enemy, hooks);
        }
    }

    /// A blocked walker waits for the way to clear instead of giving up.
    fn update_move(&self, unit: &mut Unit, command: &Command) {
        if self.approach(unit, command.pos()) == TravelState::Arrived {
            Self::finish(unit);
        }
    }

    /// Units without a Move skill hold position and wait for the target to
    /// come into range.
    fn update_attack(&mut self, unit: &mut Unit, command: &Command, hooks: &mut Hooks<'_>) {
        let mobile = self
            .tech
            .unit_type(unit.unit_type())
            .has_skill(SkillClass::Move);
        if let Some(target) = command.unit() {
            let Some(target_pos) = self.find_unit(target).filter(|t| t.is_alive()).map(Unit::pos)
            else {
                Self::finish(unit);
                return;
            };
            match self.strike(unit, target, hooks) {
                Strike::Killed => Self::finish(unit),
                Strike::Engaged => {}
                Strike::OutOfRange if mobile => {
                    self.approach(unit, target_pos);
                }
                Strike::OutOfRange => unit.set_skill(SkillClass::Stop),
            }
            return;
        }

        // Attack-move: engage whatever shows up on the way.
        let sight = unit
            .total_upgrade()
            .sight(self.tech.unit_type(unit.unit_type()));
        if let Some(enemy) = self.nearest_enemy(unit, sight, true) {
            if self.strike(unit, enemy, hooks) != Strike::OutOfRange {
                return;
            }
            if !mobile {
                unit.set_skill(SkillClass::Stop);
                return;
            }
            if let Some(enemy_pos) = self.find_unit(enemy).map(Unit::pos) {
                self.approach(unit, enemy_pos);
                return;
            }
        }
        if !mobile || self.approach(unit, command.pos()) == TravelState::Arrived {
            Self::finish(unit);
        }
    }

    fn update_build(&mut self, unit: &mut Unit, command: &Command, hooks: &mut Hooks<'_>) {
        let Some(built) = command.unit_type() else {
            Self::finish(unit);
            return;
        };
        let site_pos = command.pos();
        let (site_size, site_field) = {
            let bt = self.tech.unit_type(built);
            (bt.size, bt.field)
        };

        if unit.skill() != SkillClass::Build {
            let size = self.tech.unit_type(unit.unit_type()).size;
            if footprint_distance(unit.pos(), size, site_pos, site_size) > 1 {
                let state = self.approach(unit, site_pos - GridPos::new(1, 1));
                if state != TravelState::Arrived {
                    return;
                }
            }
            if !self.map.is_free_cells(site_pos, site_size, site_field) {
                tracing::debug!(unit = unit.id(), x = site_pos.x, y = site_pos.y, "build site blocked");
                self.cancel(unit);
                return;
            }
            let Some(site) = self.spawn_unit(unit.faction(), built, site_pos) else {
                self.cancel(unit);
                return;
            };
            if let Some(s) = self.find_unit_mut(site) {
                s.set_skill(SkillClass::BeBuilt);
            }
            if let Some(s) = self.find_unit(site) {
                unit.set_target(s, &self.map, self.tech.unit_type(built));
            }
            unit.set_skill(SkillClass::Build);
            return;
        }

        let Some(site_ref) = unit.target() else {
            Self::finish(unit);
            return;
        };
        let tech = &self.tech;
        let Some(f) = self.factions.get_mut(site_ref.faction) else {
            Self::finish(unit);
            return;
        };
        let Some(site) = f.roster.get_mut(site_ref.id).filter(|s| s.is_alive()) else {
            Self::finish(unit);
            return;
        };
        let site_type = tech.unit_type(site.unit_type());
        if site.repair(site_type, hooks.effects) {
            if site.is_being_built() {
                site.born(site_type, &mut f.ledger);
                hooks.observers.notify(UnitEvent::Born, site);
                tracing::debug!(unit = site.id(), builder = unit.id(), "construction finished");
            }
            Self::finish(unit);
        }
    }

    fn search_for_resource(&self, from: GridPos, spec: &HarvestSpec) -> Option<GridPos> {
        for radius in 0..RESOURCE_SEARCH_RADIUS {
            for x in (from.x - radius)..=(from.x + radius) {
                for y in (from.y - radius)..=(from.y + radius) {
                    let pos = GridPos::new(x, y);
                    if self
                        .map
                        .deposit_at(pos)
                        .is_some_and(|d| spec.resources.contains(&d.resource))
                    {
                        return Some(pos);
                    }
                }
            }
        }
        None
    }

    fn update_harvest(&mut self, unit: &mut Unit, command: &Command) {
        let Some(spec) = self
            .tech
            .command_type(command.command_type())
            .harvest
            .clone()
        else {
            Self::finish(unit);
            return;
        };
        let deposit_pos = *unit.harvest_pos.get_or_insert(command.pos());
        let size = self.tech.unit_type(unit.unit_type()).size;

        if unit.skill() == SkillClass::Harvest {
            if self.map.deposit_at(deposit_pos).is_none() {
                unit.set_skill(SkillClass::Stop);
                return;
            }
            unit.progress2 += 1;
            if unit.progress2 >= spec.hits_per_unit {
                unit.progress2 = 0;
                unit.load += self.map.extract(deposit_pos, 1);
                if self.map.deposit_at(deposit_pos).is_none() {
                    unit.set_skill(SkillClass::Stop);
                }
            }
            if unit.load >= spec.max_load {
                unit.set_skill(SkillClass::Stop);
                unit.path.clear();
            }
            return;
        }

        if unit.load == 0 {
            match self.map.deposit_at(deposit_pos) {
                Some(deposit) if spec.resources.contains(&deposit.resource) => {
                    if footprint_distance(unit.pos(), size, deposit_pos, 1) <= 1 {
                        unit.set_target_pos(deposit_pos);
                        unit.set_skill(SkillClass::Harvest);
                        unit.load_type = Some(deposit.resource);
                    } else {
                        self.approach(unit, deposit_pos);
                    }
                }
                _ => {
                    unit.set_skill(SkillClass::Stop);
                    match self.search_for_resource(deposit_pos, &spec) {
                        Some(pos) => unit.harvest_pos = Some(pos),
                        None => Self::finish(unit),
                    }
                }
            }
            return;
        }

        let Some(resource) = unit.load_type else {
            Self::finish(unit);
            return;
        };
        let Some((store_pos, store_size)) = self
            .nearest_store(unit.pos(), unit.faction(), resource)
            .map(|s| (s.pos(), self.tech.unit_type(s.unit_type()).size))
        else {
            Self::finish(unit);
            return;
        };
        if footprint_distance(unit.pos(), size, store_pos, store_size) <= 1 {
            let load = unit.load;
            self.factions[unit.faction()]
                .ledger
                .inc_amount(resource, load);
            unit.load = 0;
            unit.path.clear();
            unit.set_skill(SkillClass::Stop);
            tracing::debug!(unit = unit.id(), load, "resources delivered");
        } else {
            self.approach(unit, store_pos);
        }
    }

    fn update_repair(&mut self, unit: &mut Unit, command: &Command, hooks: &mut Hooks<'_>) {
        let target = command
            .unit()
            .or_else(|| self.map.unit_at(command.pos(), Field::Land))
            .or_else(|| self.map.unit_at(command.pos(), Field::Air));
        let repairable = |world: &Self, t: &Unit| {
            let command_type = world.tech.command_type(command.command_type());
            t.is_alive()
                && command_type.can_repair(t.unit_type())
                && world.is_ally(unit.reference(), t.reference())
                && (t.is_being_built() || t.is_damaged(world.tech.unit_type(t.unit_type())))
        };
        let Some(target) = target.filter(|&r| self.find_unit(r).is_some_and(|t| repairable(self, t)))
        else {
            Self::finish(unit);
            return;
        };

        let size = self.tech.unit_type(unit.unit_type()).size;
        let Some((target_pos, target_size)) = self
            .find_unit(target)
            .map(|t| (t.pos(), self.tech.unit_type(t.unit_type()).size))
        else {
            Self::finish(unit);
            return;
        };
        if footprint_distance(unit.pos(), size, target_pos, target_size) > 1 {
            self.approach(unit, target_pos);
            return;
        }

        if unit.skill() == SkillClass::Repair && unit.target() == Some(target) {
            let tech = &self.tech;
            let Some(f) = self.factions.get_mut(target.faction) else {
                Self::finish(unit);
                return;
            };
            let Some(t) = f.roster.get_mut(target.id) else {
                Self::finish(unit);
                return;
            };
            let target_type = tech.unit_type(t.unit_type());
            if t.repair(target_type, hooks.effects) {
                if t.is_being_built() {
                    t.born(target_type, &mut f.ledger);
                    hooks.observers.notify(UnitEvent::Born, t);
                }
                Self::finish(unit);
                return;
            }
        }

        if let Some(t) = self.find_unit(target) {
            unit.set_target(t, &self.map, self.tech.unit_type(t.unit_type()));
        }
        unit.set_skill(SkillClass::Repair);
    }

    fn update_produce(&mut self, unit: &mut Unit, command: &Command, hooks: &mut Hooks<'_>) {
        let Some(Produced::Unit(produced)) = self.tech.command_type(command.command_type()).produced
        else {
            Self::finish(unit);
            return;
        };
        if unit.skill() != SkillClass::Produce {
            unit.set_skill(SkillClass::Produce);
            return;
        }

        unit.progress2 += 1;
        let produced_type = self.tech.unit_type(produced);
        if unit.progress2 <= produced_type.production_time {
            return;
        }
        let origin = centered(unit.pos(), self.tech.unit_type(unit.unit_type()).size);
        let Some(pos) = self.place_unit(origin, PRODUCTION_AREA, produced_type, false) else {
            tracing::trace!(unit = unit.id(), "no room for produced unit");
            return;
        };
        let Some(child) = self.spawn_unit(unit.faction(), produced, pos) else {
            return;
        };

        let tech = &self.tech;
        let f = &mut self.factions[unit.faction()];
        if let Some(c) = f.roster.get_mut(child.id) {
            c.born(tech.unit_type(produced), &mut f.ledger);
            hooks.observers.notify(UnitEvent::Born, c);
        }
        tracing::debug!(producer = unit.id(), unit = child.id, "unit produced");
        Self::finish(unit);
    }

    fn update_upgrade(&mut self, unit: &mut Unit, command: &Command) {
        let Some(Produced::Upgrade(upgrade)) =
            self.tech.command_type(command.command_type()).produced
        else {
            Self::finish(unit);
            return;
        };
        if unit.skill() != SkillClass::Upgrade {
            unit.set_skill(SkillClass::Upgrade);
            return;
        }

        unit.progress2 += 1;
        let upgrade_type = self.tech.upgrade_type(upgrade);
        if unit.progress2 <= upgrade_type.production_time {
            return;
        }
        let f = &mut self.factions[unit.faction()];
        f.upgrades.finish_upgrade(upgrade);
        for other in f.roster.iter_mut() {
            other.apply_upgrade(upgrade_type);
        }
        unit.apply_upgrade(upgrade_type);
        tracing::debug!(faction = unit.faction(), upgrade = %upgrade_type.name, "upgrade finished");
        Self::finish(unit);
    }

    fn update_morph(&mut self, unit: &mut Unit, command: &Command) {
        let command_type = self.tech.command_type(command.command_type());
        let Some(Produced::Unit(target)) = command_type.produced else {
            Self::finish(unit);
            return;
        };
        let target_type = self.tech.unit_type(target);

        if unit.skill() != SkillClass::Morph {
            if self.map.is_free_cells_or_has_unit(
                unit.pos(),
                target_type.size,
                unit.field(),
                unit.reference(),
            ) {
                unit.set_skill(SkillClass::Morph);
            } else {
                self.cancel(unit);
            }
            return;
        }

        unit.progress2 += 1;
        if unit.progress2 <= target_type.production_time {
            return;
        }
        let f = &mut self.factions[unit.faction()];
        let mut accounts = Accounts {
            tech: &self.tech,
            ledger: &mut f.ledger,
            upgrades: &mut f.upgrades,
        };
        if unit.morph(command_type, &mut self.map, &mut accounts) {
            tracing::debug!(unit = unit.id(), into = %target_type.name, "morphed");
            Self::finish(unit);
        } else {
            self.cancel(unit);
        }
    }
}
