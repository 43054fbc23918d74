//! Factions: unit roster, ledger, upgrades and team relations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::{ControlType, FactionSettings};
use crate::ledger::{Ledger, UpgradeManager};
use crate::tech::{Producible, Requirements, SkillClass, TechTree, UnitTypeId};
use crate::unit::{Accounts, Unit, UnitId};

/// Whether every required unit type is owned in operative state and every
/// required upgrade is complete.
#[must_use]
pub fn requirements_met(
    requirements: &Requirements,
    operative_types: &BTreeSet<UnitTypeId>,
    upgrades: &UpgradeManager,
) -> bool {
    requirements
        .units
        .iter()
        .all(|u| operative_types.contains(u))
        && requirements.upgrades.iter().all(|&u| upgrades.is_upgraded(u))
}

/// Index-stable unit storage.
///
/// Units keep their slot for life; an undertaken unit leaves an empty slot
/// behind, so slot order is creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roster {
    slots: Vec<Option<Unit>>,
    ids: BTreeMap<UnitId, usize>,
}

impl Roster {
    /// Append a unit and return its slot.
    pub fn insert(&mut self, unit: Unit) -> usize {
        let slot = self.slots.len();
        self.ids.insert(unit.id(), slot);
        self.slots.push(Some(unit));
        slot
    }

    /// Remove a unit for good.
    pub fn remove(&mut self, id: UnitId) -> Option<Unit> {
        let slot = self.ids.remove(&id)?;
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Slot of a unit.
    #[must_use]
    pub fn slot_of(&self, id: UnitId) -> Option<usize> {
        self.ids.get(&id).copied()
    }

    /// Unit by id.
    #[must_use]
    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.slot_of(id)
            .and_then(|slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    /// Mutable unit by id.
    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        let slot = self.slot_of(id)?;
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Number of slots ever handed out.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of units present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no units are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Units in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Mutable units in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Lift a unit out of its slot for an update. The id stays mapped.
    pub(crate) fn take_slot(&mut self, slot: usize) -> Option<Unit> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Put a lifted unit back.
    pub(crate) fn restore_slot(&mut self, slot: usize, unit: Unit) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = Some(unit);
        }
    }
}

/// One player's units, resources and upgrades.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Faction {
    index: usize,
    name: String,
    team: usize,
    control: ControlType,
    start_location: usize,
    pub(crate) roster: Roster,
    pub(crate) ledger: Ledger,
    pub(crate) upgrades: UpgradeManager,
}

impl Faction {
    /// Empty faction from its slot settings.
    #[must_use]
    pub fn new(index: usize, settings: &FactionSettings, tech: &TechTree) -> Self {
        Self {
            index,
            name: settings.name.clone(),
            team: settings.team,
            control: settings.control,
            start_location: settings.start_location,
            roster: Roster::default(),
            ledger: Ledger::new(tech),
            upgrades: UpgradeManager::new(),
        }
    }

    /// Faction index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Team.
    #[must_use]
    pub const fn team(&self) -> usize {
        self.team
    }

    /// Controller.
    #[must_use]
    pub const fn control(&self) -> ControlType {
        self.control
    }

    /// Map start location index.
    #[must_use]
    pub const fn start_location(&self) -> usize {
        self.start_location
    }

    /// Whether `other` is on the same team. Symmetric and reflexive.
    #[must_use]
    pub const fn is_ally(&self, other: &Self) -> bool {
        self.team == other.team
    }

    /// Resource ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Upgrade state.
    #[must_use]
    pub const fn upgrades(&self) -> &UpgradeManager {
        &self.upgrades
    }

    /// Unit roster.
    #[must_use]
    pub const fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Unit by id.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.roster.get(id)
    }

    /// Units in slot order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.roster.iter()
    }

    /// Number of units, dead ones included until undertaken.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.roster.len()
    }

    /// Number of living units of a type.
    #[must_use]
    pub fn count_of_type(&self, unit_type: UnitTypeId) -> usize {
        self.units()
            .filter(|u| u.unit_type() == unit_type && u.is_alive())
            .count()
    }

    /// Types of the units that are alive and built.
    #[must_use]
    pub fn operative_types(&self) -> BTreeSet<UnitTypeId> {
        self.units()
            .filter(|u| u.is_operative())
            .map(Unit::unit_type)
            .collect()
    }

    /// Whether requirements are satisfied.
    #[must_use]
    pub fn reqs_ok(&self, requirements: &Requirements) -> bool {
        requirements_met(requirements, &self.operative_types(), &self.upgrades)
    }

    /// Whether a producible's requirements are satisfied.
    #[must_use]
    pub fn reqs_ok_for(&self, p: &(impl Producible + ?Sized)) -> bool {
        self.reqs_ok(p.requirements())
    }

    /// Whether the ledger covers a producible's costs.
    #[must_use]
    pub fn check_costs(&self, p: &(impl Producible + ?Sized)) -> bool {
        self.ledger.check_costs(p)
    }

    /// Whether any living unit can still be built into something: a
    /// faction without one has lost.
    #[must_use]
    pub fn has_building(&self, tech: &TechTree) -> bool {
        self.units().any(|u| {
            u.is_alive() && tech.unit_type(u.unit_type()).has_skill(SkillClass::BeBuilt)
        })
    }

    /// Cost-bearing parts, for cancelling or clearing commands.
    pub(crate) fn accounts<'a>(&'a mut self, tech: &'a TechTree) -> Accounts<'a> {
        Accounts {
            tech,
            ledger: &mut self.ledger,
            upgrades: &mut self.upgrades,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TotalUpgrade;
    use crate::math::GridPos;
    use crate::testing;

    fn faction(index: usize, team: usize) -> Faction {
        let tech = testing::tech();
        let settings = FactionSettings {
            name: format!("f{index}"),
            control: ControlType::Ai,
            team,
            start_location: index,
            starting_units: vec![],
            starting_resources: vec![],
        };
        Faction::new(index, &settings, &tech)
    }

    #[test]
    fn test_roster_slots_are_stable() {
        let tech = testing::tech();
        let worker = tech.unit_type(tech.unit_type_id("worker").unwrap());
        let mut roster = Roster::default();
        for id in 0..3 {
            roster.insert(Unit::new(id, 0, GridPos::ZERO, worker, TotalUpgrade::default()));
        }
        assert!(roster.remove(1).is_some());
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.slot_count(), 3);
        assert_eq!(roster.slot_of(2), Some(2));
        assert!(roster.get(1).is_none());
        let ids: Vec<_> = roster.iter().map(Unit::id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_take_and_restore_keeps_id_mapping() {
        let tech = testing::tech();
        let worker = tech.unit_type(tech.unit_type_id("worker").unwrap());
        let mut roster = Roster::default();
        let slot = roster.insert(Unit::new(7, 0, GridPos::ZERO, worker, TotalUpgrade::default()));
        let unit = roster.take_slot(slot).unwrap();
        assert!(roster.get(7).is_none());
        assert_eq!(roster.len(), 1);
        roster.restore_slot(slot, unit);
        assert_eq!(roster.get(7).map(Unit::id), Some(7));
    }

    #[test]
    fn test_is_ally_is_symmetric() {
        let a = faction(0, 0);
        let b = faction(1, 0);
        let c = faction(2, 1);
        assert!(a.is_ally(&b) && b.is_ally(&a));
        assert!(!a.is_ally(&c) && !c.is_ally(&a));
        assert!(a.is_ally(&a));
    }

    #[test]
    fn test_requirements_need_operative_units() {
        let tech = testing::tech();
        let barracks = tech.unit_type_id("barracks").unwrap();
        let soldier = tech.unit_type(tech.unit_type_id("soldier").unwrap());
        let mut f = faction(0, 0);
        assert!(!f.reqs_ok_for(soldier));

        let bt = tech.unit_type(barracks);
        let mut site = Unit::new(1, 0, GridPos::ZERO, bt, TotalUpgrade::default());
        site.set_skill(SkillClass::BeBuilt);
        f.roster.insert(site);
        assert!(!f.reqs_ok_for(soldier));

        f.roster.get_mut(1).unwrap().born(bt, &mut f.ledger);
        assert!(f.reqs_ok_for(soldier));
        assert!(f.has_building(&tech));
    }
}
