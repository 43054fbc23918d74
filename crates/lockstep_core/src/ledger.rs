//! Per-faction resource and upgrade accounting.
//!
//! Every cost a command commits passes through [`Ledger`], and every commit
//! has an exact inverse so a cancelled command returns precisely what it
//! took. Amounts are plain `i32` counters indexed by resource type in
//! declared order.
//!
//! Static resources (housing, power) are not capped by storage: a unit holds
//! its positive static cost while alive, and a negative static cost is
//! production granted at birth and withdrawn at death.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tech::{
    Cost, Producible, ResourceClass, ResourceTypeId, SkillClass, SkillType, TechTree, UnitType,
    UpgradeBonus, UpgradeTypeId,
};

/// Resource amounts and storage capacity of one faction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ledger {
    classes: Vec<ResourceClass>,
    amounts: Vec<i32>,
    stores: Vec<i32>,
}

impl Ledger {
    /// Empty ledger for the resources of a tech tree.
    #[must_use]
    pub fn new(tech: &TechTree) -> Self {
        let classes: Vec<_> = tech.resources().iter().map(|r| r.class).collect();
        let count = classes.len();
        Self {
            classes,
            amounts: vec![0; count],
            stores: vec![0; count],
        }
    }

    /// Current amount of a resource.
    #[must_use]
    pub fn amount(&self, resource: ResourceTypeId) -> i32 {
        self.amounts.get(resource.index()).copied().unwrap_or(0)
    }

    /// Storage capacity of a resource.
    #[must_use]
    pub fn store(&self, resource: ResourceTypeId) -> i32 {
        self.stores.get(resource.index()).copied().unwrap_or(0)
    }

    /// All amounts in declared order.
    #[must_use]
    pub fn amounts(&self) -> &[i32] {
        &self.amounts
    }

    /// Overwrite an amount without clamping. Used for session setup.
    pub fn set_amount(&mut self, resource: ResourceTypeId, amount: i32) {
        if let Some(slot) = self.amounts.get_mut(resource.index()) {
            *slot = amount;
        }
    }

    /// Add extra storage independent of units. Used for session setup.
    pub fn add_base_store(&mut self, resource: ResourceTypeId, amount: i32) {
        if let Some(slot) = self.stores.get_mut(resource.index()) {
            *slot += amount;
        }
    }

    fn class(&self, resource: ResourceTypeId) -> ResourceClass {
        self.classes
            .get(resource.index())
            .copied()
            .unwrap_or(ResourceClass::Tech)
    }

    /// Add `delta` to a resource, clamping stored classes to their capacity.
    pub fn inc_amount(&mut self, resource: ResourceTypeId, delta: i32) {
        let class = self.class(resource);
        let store = self.store(resource);
        if let Some(amount) = self.amounts.get_mut(resource.index()) {
            *amount += delta;
            if class != ResourceClass::Static && *amount > store {
                *amount = store;
            }
        }
    }

    /// Reset a resource to zero (starvation).
    pub fn reset_amount(&mut self, resource: ResourceTypeId) {
        self.set_amount(resource, 0);
    }

    /// True iff every positive cost is covered by the current amount.
    ///
    /// Negative costs are production and always pass.
    #[must_use]
    pub fn check_costs(&self, p: &(impl Producible + ?Sized)) -> bool {
        p.costs()
            .iter()
            .all(|c| c.amount <= 0 || c.amount <= self.amount(c.resource))
    }

    fn is_committed_at_admission(&self, cost: &Cost) -> bool {
        let class = self.class(cost.resource);
        (cost.amount > 0 || class != ResourceClass::Static) && class != ResourceClass::Consumable
    }

    /// Commit the costs charged when a command is admitted.
    ///
    /// Consumables are charged on interval instead, and negative static costs
    /// are granted at birth.
    pub fn apply_costs(&mut self, p: &(impl Producible + ?Sized)) {
        for cost in p.costs() {
            if self.is_committed_at_admission(cost) {
                self.inc_amount(cost.resource, -cost.amount);
            }
        }
    }

    /// Exact inverse of [`Ledger::apply_costs`].
    pub fn de_apply_costs(&mut self, p: &(impl Producible + ?Sized)) {
        for cost in p.costs() {
            if self.is_committed_at_admission(cost) {
                self.inc_amount(cost.resource, cost.amount);
            }
        }
    }

    fn static_costs(&self, p: &(impl Producible + ?Sized)) -> Vec<Cost> {
        p.costs()
            .iter()
            .filter(|c| self.class(c.resource) == ResourceClass::Static)
            .copied()
            .collect()
    }

    /// Charge the positive static costs of a unit placed without admission.
    pub fn apply_static_costs(&mut self, p: &(impl Producible + ?Sized)) {
        for cost in self.static_costs(p) {
            if cost.amount > 0 {
                self.inc_amount(cost.resource, -cost.amount);
            }
        }
    }

    /// Return all static costs of a unit leaving play: refund consumption and
    /// withdraw production.
    pub fn de_apply_static_costs(&mut self, p: &(impl Producible + ?Sized)) {
        for cost in self.static_costs(p) {
            self.inc_amount(cost.resource, cost.amount);
        }
    }

    /// Grant the static production of a newly born unit.
    pub fn apply_static_production(&mut self, p: &(impl Producible + ?Sized)) {
        for cost in self.static_costs(p) {
            if cost.amount < 0 {
                self.inc_amount(cost.resource, -cost.amount);
            }
        }
    }

    /// Refund the static consumption of a unit that never finished building.
    pub fn de_apply_static_consumption(&mut self, p: &(impl Producible + ?Sized)) {
        for cost in self.static_costs(p) {
            if cost.amount > 0 {
                self.inc_amount(cost.resource, cost.amount);
            }
        }
    }

    /// Refund `percent` of the storable costs of a producible.
    pub fn apply_discount(&mut self, p: &(impl Producible + ?Sized), percent: i32) {
        for cost in p.costs() {
            let class = self.class(cost.resource);
            if cost.amount > 0 && class != ResourceClass::Static && class != ResourceClass::Consumable
            {
                self.inc_amount(cost.resource, cost.amount * percent / 100);
            }
        }
    }

    /// Add the storage a unit type provides.
    pub fn add_store(&mut self, unit_type: &UnitType) {
        for store in &unit_type.stores {
            self.add_base_store(store.resource, store.amount);
        }
    }

    /// Remove the storage a unit type provides and clamp amounts to it.
    pub fn remove_store(&mut self, unit_type: &UnitType) {
        for store in &unit_type.stores {
            self.add_base_store(store.resource, -store.amount);
        }
        self.limit_to_store();
    }

    fn limit_to_store(&mut self) {
        for i in 0..self.amounts.len() {
            if self.classes[i] != ResourceClass::Static && self.amounts[i] > self.stores[i] {
                self.amounts[i] = self.stores[i];
            }
        }
    }
}

/// Lifecycle state of a started upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpgradeState {
    /// Research in progress.
    Upgrading,
    /// Research completed.
    Upgraded,
}

/// Upgrade state machine of one faction.
///
/// `Upgrading -> Upgraded` on finish, `Upgrading -> (removed)` on cancel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpgradeManager {
    upgrades: BTreeMap<UpgradeTypeId, UpgradeState>,
}

impl UpgradeManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of started or completed upgrades.
    #[must_use]
    pub fn count(&self) -> usize {
        self.upgrades.len()
    }

    /// State of an upgrade, if started.
    #[must_use]
    pub fn state(&self, upgrade: UpgradeTypeId) -> Option<UpgradeState> {
        self.upgrades.get(&upgrade).copied()
    }

    /// Mark an upgrade as in progress.
    pub fn start_upgrade(&mut self, upgrade: UpgradeTypeId) {
        self.upgrades.insert(upgrade, UpgradeState::Upgrading);
    }

    /// Drop an in-progress upgrade. Returns whether anything was cancelled.
    pub fn cancel_upgrade(&mut self, upgrade: UpgradeTypeId) -> bool {
        if self.is_upgrading(upgrade) {
            self.upgrades.remove(&upgrade);
            true
        } else {
            false
        }
    }

    /// Complete an in-progress upgrade.
    pub fn finish_upgrade(&mut self, upgrade: UpgradeTypeId) {
        if let Some(state) = self.upgrades.get_mut(&upgrade) {
            *state = UpgradeState::Upgraded;
        }
    }

    /// Whether the upgrade is completed.
    #[must_use]
    pub fn is_upgraded(&self, upgrade: UpgradeTypeId) -> bool {
        self.state(upgrade) == Some(UpgradeState::Upgraded)
    }

    /// Whether the upgrade is in progress.
    #[must_use]
    pub fn is_upgrading(&self, upgrade: UpgradeTypeId) -> bool {
        self.state(upgrade) == Some(UpgradeState::Upgrading)
    }

    /// Whether the upgrade was started, finished or not.
    #[must_use]
    pub fn is_upgrading_or_upgraded(&self, upgrade: UpgradeTypeId) -> bool {
        self.state(upgrade).is_some()
    }

    /// Sum of completed upgrade bonuses affecting a unit type.
    #[must_use]
    pub fn total_upgrade(&self, tech: &TechTree, unit_type: &UnitType) -> TotalUpgrade {
        let mut total = TotalUpgrade::default();
        for (&id, &state) in &self.upgrades {
            let upgrade = tech.upgrade_type(id);
            if state == UpgradeState::Upgraded && upgrade.is_affected(unit_type.id) {
                total.sum(&upgrade.bonus);
            }
        }
        total
    }
}

/// Accumulated bonuses on a unit from upgrades and experience levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TotalUpgrade {
    /// Accumulated flat bonuses.
    pub bonus: UpgradeBonus,
}

impl TotalUpgrade {
    /// Add an upgrade's bonuses.
    pub fn sum(&mut self, bonus: &UpgradeBonus) {
        let b = &mut self.bonus;
        b.max_hp += bonus.max_hp;
        b.max_ep += bonus.max_ep;
        b.sight += bonus.sight;
        b.attack_strength += bonus.attack_strength;
        b.attack_range += bonus.attack_range;
        b.armor += bonus.armor;
        b.move_speed += bonus.move_speed;
        b.prod_speed += bonus.prod_speed;
    }

    /// Apply one experience level of the unit type.
    pub fn inc_level(&mut self, unit_type: &UnitType) {
        self.bonus.max_hp += unit_type.max_hp * 50 / 100;
        self.bonus.max_ep += unit_type.max_ep * 50 / 100;
        self.bonus.sight += unit_type.sight * 20 / 100;
        self.bonus.armor += unit_type.armor * 50 / 100;
    }

    /// Effective max hit points.
    #[must_use]
    pub fn max_hp(&self, unit_type: &UnitType) -> i32 {
        unit_type.max_hp + self.bonus.max_hp
    }

    /// Effective max energy.
    #[must_use]
    pub fn max_ep(&self, unit_type: &UnitType) -> i32 {
        unit_type.max_ep + self.bonus.max_ep
    }

    /// Effective sight.
    #[must_use]
    pub fn sight(&self, unit_type: &UnitType) -> i32 {
        unit_type.sight + self.bonus.sight
    }

    /// Effective armor.
    #[must_use]
    pub fn armor(&self, unit_type: &UnitType) -> i32 {
        unit_type.armor + self.bonus.armor
    }

    /// Effective speed of a skill.
    #[must_use]
    pub fn skill_speed(&self, skill: &SkillType) -> i32 {
        match skill.class {
            SkillClass::Move => skill.speed + self.bonus.move_speed,
            SkillClass::Produce | SkillClass::Upgrade | SkillClass::Morph => {
                skill.speed + self.bonus.prod_speed
            }
            _ => skill.speed,
        }
    }

    /// Effective attack strength and range of an attack skill.
    #[must_use]
    pub fn attack(&self, skill: &SkillType) -> Option<(i32, i32)> {
        skill.attack.as_ref().map(|a| {
            (
                a.strength + self.bonus.attack_strength,
                a.range + self.bonus.attack_range,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tech::{Requirements, UpgradeType};

    struct Item(Vec<Cost>);

    impl Producible for Item {
        fn name(&self) -> &str {
            "item"
        }
        fn costs(&self) -> &[Cost] {
            &self.0
        }
        fn requirements(&self) -> &Requirements {
            static NONE: Requirements = Requirements {
                units: Vec::new(),
                upgrades: Vec::new(),
            };
            &NONE
        }
        fn production_time(&self) -> i32 {
            1
        }
    }

    const GOLD: ResourceTypeId = ResourceTypeId(0);
    const HOUSING: ResourceTypeId = ResourceTypeId(1);
    const FOOD: ResourceTypeId = ResourceTypeId(2);

    fn ledger() -> Ledger {
        let mut l = Ledger {
            classes: vec![
                ResourceClass::Tech,
                ResourceClass::Static,
                ResourceClass::Consumable,
            ],
            amounts: vec![0; 3],
            stores: vec![0; 3],
        };
        l.add_base_store(GOLD, 1000);
        l.add_base_store(FOOD, 1000);
        l.set_amount(GOLD, 100);
        l.set_amount(HOUSING, 5);
        l.set_amount(FOOD, 20);
        l
    }

    fn cost(resource: ResourceTypeId, amount: i32) -> Cost {
        Cost { resource, amount }
    }

    #[test]
    fn test_check_costs() {
        let l = ledger();
        assert!(l.check_costs(&Item(vec![cost(GOLD, 100)])));
        assert!(!l.check_costs(&Item(vec![cost(GOLD, 101)])));
        // Production never fails the check.
        assert!(l.check_costs(&Item(vec![cost(HOUSING, -10)])));
    }

    #[test]
    fn test_apply_and_de_apply_are_inverse() {
        let mut l = ledger();
        let before = l.clone();
        let item = Item(vec![cost(GOLD, 60), cost(HOUSING, 1), cost(FOOD, 3)]);
        l.apply_costs(&item);
        assert_eq!(l.amount(GOLD), 40);
        assert_eq!(l.amount(HOUSING), 4);
        // Consumables are not charged at admission.
        assert_eq!(l.amount(FOOD), 20);
        l.de_apply_costs(&item);
        assert_eq!(l, before);
    }

    #[test]
    fn test_negative_static_granted_at_birth_only() {
        let mut l = ledger();
        let house = Item(vec![cost(GOLD, 10), cost(HOUSING, -4)]);
        l.apply_costs(&house);
        assert_eq!(l.amount(HOUSING), 5);
        l.apply_static_production(&house);
        assert_eq!(l.amount(HOUSING), 9);
        l.de_apply_static_costs(&house);
        assert_eq!(l.amount(HOUSING), 5);
    }

    #[test]
    fn test_static_consumption_refund() {
        let mut l = ledger();
        let soldier = Item(vec![cost(HOUSING, 2)]);
        l.apply_static_costs(&soldier);
        assert_eq!(l.amount(HOUSING), 3);
        l.de_apply_static_consumption(&soldier);
        assert_eq!(l.amount(HOUSING), 5);
    }

    #[test]
    fn test_inc_amount_clamps_to_store() {
        let mut l = ledger();
        l.inc_amount(GOLD, 5000);
        assert_eq!(l.amount(GOLD), 1000);
        // Static resources are not capped.
        l.inc_amount(HOUSING, 5000);
        assert_eq!(l.amount(HOUSING), 5005);
    }

    #[test]
    fn test_discount_refunds_percentage() {
        let mut l = ledger();
        l.apply_discount(&Item(vec![cost(GOLD, 50), cost(HOUSING, 2)]), 20);
        assert_eq!(l.amount(GOLD), 110);
        assert_eq!(l.amount(HOUSING), 5);
    }

    #[test]
    fn test_upgrade_state_machine() {
        let mut m = UpgradeManager::new();
        let id = UpgradeTypeId(3);
        assert!(!m.is_upgrading_or_upgraded(id));
        m.start_upgrade(id);
        assert!(m.is_upgrading(id));
        assert!(m.cancel_upgrade(id));
        assert!(!m.is_upgrading_or_upgraded(id));
        m.start_upgrade(id);
        m.finish_upgrade(id);
        assert!(m.is_upgraded(id));
        // Completed upgrades cannot be cancelled.
        assert!(!m.cancel_upgrade(id));
        assert_eq!(m.count(), 1);
    }

    #[test]
    fn test_total_upgrade_sums_bonuses() {
        let mut total = TotalUpgrade::default();
        let upgrade = UpgradeType {
            id: UpgradeTypeId(0),
            name: "plating".into(),
            costs: vec![],
            requirements: Requirements::default(),
            production_time: 1,
            effects: vec![],
            bonus: UpgradeBonus {
                armor: 2,
                max_hp: 10,
                ..UpgradeBonus::default()
            },
        };
        total.sum(&upgrade.bonus);
        total.sum(&upgrade.bonus);
        assert_eq!(total.bonus.armor, 4);
        assert_eq!(total.bonus.max_hp, 20);
    }
}
