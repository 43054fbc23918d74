//! Command admission and lifecycle properties checked through the public
//! world API on the skirmish content.

use std::cell::RefCell;
use std::rc::Rc;

use lockstep_core::command::{Command, CommandResult};
use lockstep_core::effects::{Hooks, NullEffects, ObserverRegistry, UnitEvent, UnitObserver};
use lockstep_core::math::{Fixed, GridPos};
use lockstep_core::map::Map;
use lockstep_core::tech::{CommandClass, SkillClass, TechTree};
use lockstep_core::unit::{Unit, UnitId};
use lockstep_core::world::World;
use lockstep_test_utils::determinism::strategies::arb_grid_pos;
use lockstep_test_utils::fixtures::{
    busy_skirmish, skirmish_settings, skirmish_world, step, unit_at, SKIRMISH_MAP, SKIRMISH_TECH,
};
use proptest::prelude::*;

fn gold(world: &World, faction: usize) -> i32 {
    world.resource_amount("gold", faction).unwrap()
}

fn command(world: &World, name: &str, pos: GridPos) -> Command {
    let tech = world.tech();
    Command::new(tech.command_type(tech.command_type_id(name).unwrap()), pos)
}

fn build_tower(world: &World, pos: GridPos) -> Command {
    let tech = world.tech();
    let build = tech.command_type(tech.command_type_id("build").unwrap());
    Command::build(build, pos, tech.unit_type_id("tower").unwrap())
}

fn unit(world: &World, faction: usize, id: UnitId) -> &Unit {
    world.faction(faction).and_then(|f| f.unit(id)).unwrap()
}

/// Gold held by the queued commands of a castle; every castle command that
/// costs anything costs 50 gold.
fn committed_gold(world: &World, castle: UnitId) -> i32 {
    let queued = unit(world, 0, castle)
        .commands()
        .iter()
        .filter(|c| world.tech().command_type(c.command_type()).produced.is_some())
        .count();
    50 * i32::try_from(queued).unwrap()
}

#[derive(Debug, Clone, Copy)]
enum CastleOp {
    Produce,
    Research,
    Stop,
    Cancel,
}

fn arb_castle_op() -> impl Strategy<Value = CastleOp> {
    prop_oneof![
        4 => Just(CastleOp::Produce),
        1 => Just(CastleOp::Research),
        1 => Just(CastleOp::Stop),
        3 => Just(CastleOp::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_never_drifts(ops in proptest::collection::vec(arb_castle_op(), 1..40)) {
        let mut world = skirmish_world();
        let castle = unit_at(&world, 0, 0);
        let initial = world.faction(0).unwrap().ledger().amounts().to_vec();
        let start = gold(&world, 0);

        for op in ops {
            let _ = match op {
                CastleOp::Produce => world.give_production_command(castle, "worker").unwrap(),
                CastleOp::Research => world.give_upgrade_command(castle, "plating").unwrap(),
                CastleOp::Stop => {
                    let stop = command(&world, "stop", GridPos::ZERO);
                    world.give_command(0, castle, stop)
                }
                CastleOp::Cancel => world.cancel_command(0, castle),
            };
            prop_assert_eq!(gold(&world, 0), start - committed_gold(&world, castle));
            prop_assert!(gold(&world, 0) >= 0);
        }

        while world.cancel_command(0, castle).is_success() {}
        prop_assert!(unit(&world, 0, castle).commands().is_empty());
        prop_assert_eq!(world.faction(0).unwrap().ledger().amounts(), &initial[..]);
        prop_assert_eq!(world.faction(0).unwrap().upgrades().count(), 0);
    }

    #[test]
    fn non_queuable_success_leaves_at_most_one_command(
        names in proptest::collection::vec(
            proptest::sample::select(vec!["stop", "move", "attack", "harvest", "repair"]),
            1..20,
        ),
        positions in proptest::collection::vec(arb_grid_pos(32, 32), 20),
        gaps in proptest::collection::vec(0u64..5, 20),
    ) {
        let mut world = skirmish_world();
        let worker = unit_at(&world, 0, 1);
        for ((name, pos), gap) in names.iter().zip(positions).zip(gaps) {
            let result = world.give_command(0, worker, command(&world, name, pos));
            if result.is_success() {
                prop_assert!(unit(&world, 0, worker).commands().len() <= 1);
            }
            step(&mut world, gap);
        }
    }

    #[test]
    fn progress_stays_in_unit_interval(ticks in 1u64..400) {
        let mut world = busy_skirmish();
        let mut effects = NullEffects;
        let mut observers = ObserverRegistry::new();
        let mut hooks = Hooks::new(&mut effects, &mut observers);
        for _ in 0..ticks {
            world.update(&mut hooks);
            for unit in world.factions().iter().flat_map(|f| f.units()) {
                prop_assert!(unit.progress() >= Fixed::ZERO);
                prop_assert!(unit.progress() <= Fixed::ONE);
                prop_assert!(unit.anim_progress() <= Fixed::ONE);
            }
        }
    }

    #[test]
    fn is_ally_is_symmetric(ticks in 0u64..100) {
        let mut world = busy_skirmish();
        step(&mut world, ticks);
        let units: Vec<_> = world
            .factions()
            .iter()
            .flat_map(|f| f.units().map(Unit::reference))
            .collect();
        for &a in &units {
            for &b in &units {
                prop_assert_eq!(world.is_ally(a, b), world.is_ally(b, a));
            }
        }
    }
}

#[test]
fn cancel_pops_each_command_once() {
    let mut world = skirmish_world();
    let castle = unit_at(&world, 0, 0);
    for _ in 0..3 {
        assert_eq!(world.give_production_command(castle, "worker").unwrap(), CommandResult::Success);
    }
    assert_eq!(gold(&world, 0), 450);

    for expected in [500, 550, 600] {
        assert_eq!(world.cancel_command(0, castle), CommandResult::Success);
        assert_eq!(gold(&world, 0), expected);
    }
    assert_eq!(world.cancel_command(0, castle), CommandResult::FailUndefined);
    assert_eq!(gold(&world, 0), 600);
}

/// Skirmish content where the castle may also fortify, a costed exclusive
/// command next to its queuable production.
fn fortifiable_world() -> World {
    let tech_ron = SKIRMISH_TECH
        .replace(
            r#"commands: ["stop", "produce_worker", "research_plating"]"#,
            r#"commands: ["stop", "produce_worker", "research_plating", "fortify"]"#,
        )
        .replace(
            "SkillType(class: Upgrade, speed: 100),",
            "SkillType(class: Upgrade, speed: 100), SkillType(class: Morph, speed: 100),",
        );
    let tech = TechTree::from_ron_str(&tech_ron).unwrap();
    let map = Map::from_ron_str(SKIRMISH_MAP, &tech).unwrap();
    World::new(&skirmish_settings(), tech, map).unwrap()
}

#[test]
fn queuable_order_replaces_costed_exclusive_head() {
    let mut world = fortifiable_world();
    let castle = unit_at(&world, 0, 0);
    let pos = unit(&world, 0, castle).pos();

    let fortify = command(&world, "fortify", pos);
    assert_eq!(world.give_command(0, castle, fortify), CommandResult::Success);
    assert_eq!(gold(&world, 0), 400);
    assert_eq!(unit(&world, 0, castle).commands().len(), 1);

    assert_eq!(world.give_production_command(castle, "worker").unwrap(), CommandResult::Success);
    assert_eq!(gold(&world, 0), 550);
    let queued = unit(&world, 0, castle).commands();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued.front().unwrap().class(), CommandClass::Produce);

    // A queuable head stays put.
    assert_eq!(world.give_production_command(castle, "worker").unwrap(), CommandResult::Success);
    assert_eq!(gold(&world, 0), 500);
    assert_eq!(unit(&world, 0, castle).commands().len(), 2);
}

#[test]
fn second_build_is_rejected_until_first_is_cancelled() {
    let mut world = skirmish_world();
    world.give_resource("gold", 0, -500).unwrap();
    assert_eq!(gold(&world, 0), 100);

    let first = unit_at(&world, 0, 1);
    let second = unit_at(&world, 0, 2);
    let site = GridPos::new(10, 10);

    assert_eq!(world.give_command(0, first, build_tower(&world, site)), CommandResult::Success);
    assert_eq!(gold(&world, 0), 20);

    assert_eq!(
        world.give_command(0, second, build_tower(&world, site)),
        CommandResult::FailResources
    );
    assert_eq!(gold(&world, 0), 20);
    assert!(unit(&world, 0, second).commands().is_empty());

    assert_eq!(world.cancel_command(0, first), CommandResult::Success);
    assert_eq!(gold(&world, 0), 100);
}

#[test]
fn duplicate_upgrade_is_undefined() {
    let mut world = skirmish_world();
    let castle = unit_at(&world, 0, 0);
    assert_eq!(world.give_upgrade_command(castle, "plating").unwrap(), CommandResult::Success);
    let plating = world.tech().upgrade_type_id("plating").unwrap();
    assert!(world.faction(0).unwrap().upgrades().is_upgrading(plating));

    assert_eq!(world.give_upgrade_command(castle, "plating").unwrap(), CommandResult::FailUndefined);

    // A second research building of the same faction is refused too.
    let other = world.create_unit("castle", 0, GridPos::new(12, 4)).unwrap();
    assert_eq!(world.give_upgrade_command(other.id, "plating").unwrap(), CommandResult::FailUndefined);
    assert!(world.faction(0).unwrap().upgrades().is_upgrading_or_upgraded(plating));

    step(&mut world, 400);
    assert!(world.faction(0).unwrap().upgrades().is_upgraded(plating));
    assert_eq!(world.give_upgrade_command(castle, "plating").unwrap(), CommandResult::FailUndefined);

    // The other faction researches independently.
    let enemy_castle = unit_at(&world, 1, 0);
    assert_eq!(world.give_upgrade_command(enemy_castle, "plating").unwrap(), CommandResult::Success);
}

struct KillCounter(Rc<RefCell<u32>>);

impl UnitObserver for KillCounter {
    fn on_unit_event(&mut self, event: UnitEvent, _unit: &Unit) {
        if event == UnitEvent::Killed {
            *self.0.borrow_mut() += 1;
        }
    }
}

#[test]
fn lethal_damage_kills_once_and_undertakes() {
    let mut world = skirmish_world();
    let worker = world.faction(0).unwrap().units().nth(1).unwrap().reference();
    let worker_type = world.tech().unit_type(world.tech().unit_type_id("worker").unwrap()).clone();

    let kills = Rc::new(RefCell::new(0));
    let mut observers = ObserverRegistry::new();
    let handle = observers.register(Box::new(KillCounter(Rc::clone(&kills))));

    let mut effects = NullEffects;
    {
        let unit = world.find_unit_mut(worker).unwrap();
        unit.add_observer(handle);
        let at = lockstep_core::math::Vec3Fixed::ZERO;
        assert!(unit.dec_hp(10_000, &worker_type, at, &mut effects));
        assert!(!unit.dec_hp(10_000, &worker_type, at, &mut effects));
        assert_eq!(unit.hp(), 0);
        assert!(!unit.is_alive());
    }

    let mut hooks = Hooks::new(&mut effects, &mut observers);
    world.update(&mut hooks);
    assert_eq!(world.find_unit(worker).unwrap().skill(), SkillClass::Die);
    assert_eq!(*kills.borrow(), 1);

    let mut undertaken_at = None;
    for tick in 0..2_000 {
        world.update(&mut hooks);
        match world.find_unit(worker) {
            Some(unit) => {
                assert_eq!(unit.skill(), SkillClass::Die);
                assert!(unit.progress() <= Fixed::ONE);
            }
            None => {
                undertaken_at.get_or_insert(tick);
            }
        }
    }
    assert!(undertaken_at.is_some());
    assert_eq!(*kills.borrow(), 1);
    assert_eq!(world.unit_count(0).unwrap(), 3);
}
