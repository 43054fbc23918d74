//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Lockstep peers exchange commands, never state, so every peer must reach
//! the same state from the same commands. Sources of divergence include:
//!
//! - **Floating-point math**: all simulation math uses
//!   [`lockstep_core::math::Fixed`].
//!
//! - **HashMap iteration order**: the world iterates factions by index,
//!   units by roster slot, and keys maps with `BTreeMap`.
//!
//! - **Admission order**: the commander sorts every exchanged batch by
//!   faction before admission.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: per-module behaviour in `lockstep_core`
//! 2. **Property tests**: random command streams still replay identically
//! 3. **Integration tests**: full sessions are reproducible
//! 4. **Parallel tests**: N worlds on N threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use lockstep_core::commander::{Commander, NetworkCommand};
use lockstep_core::world::World;

use crate::fixtures::step;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// All unique hashes; one for a deterministic simulation.
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run agreed.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run any state machine several times and compare final hashes.
///
/// # Example
///
/// ```
/// use lockstep_test_utils::determinism::verify_determinism;
///
/// let result = verify_determinism(3, 10, || 0u64, |n| *n += 2, |n| *n);
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Build a world twice, run both for `ticks` and compare state hashes.
pub fn verify_world_determinism<F>(setup: F, ticks: u64) -> DeterminismResult
where
    F: Fn() -> World,
{
    verify_determinism(2, ticks, &setup, |w| step(w, 1), World::state_hash)
}

/// Run `worlds` copies on scoped threads and collect their final hashes.
///
/// # Panics
///
/// Panics if a worker thread panics.
pub fn run_parallel_worlds<F>(setup: F, worlds: usize, ticks: u64) -> DeterminismResult
where
    F: Fn() -> World + Sync,
{
    let hashes: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..worlds)
            .map(|_| {
                s.spawn(|| {
                    let mut world = setup();
                    step(&mut world, ticks);
                    world.state_hash()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect()
    });

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks,
    }
}

/// Step two worlds side by side and report the first tick their hashes
/// differ. `None` when they never do; `Some(0)` when they start apart.
pub fn find_first_divergence<F>(setup: F, ticks: u64) -> Option<u64>
where
    F: Fn() -> World,
{
    let mut a = setup();
    let mut b = setup();
    if a.state_hash() != b.state_hash() {
        return Some(0);
    }
    for tick in 1..=ticks {
        step(&mut a, 1);
        step(&mut b, 1);
        if a.state_hash() != b.state_hash() {
            tracing::warn!(tick, "worlds diverged");
            return Some(tick);
        }
    }
    None
}

/// Run, save, restore, and check that the restored world both hashes the
/// same and keeps evolving identically for `after` more ticks.
pub fn verify_serialization_determinism<F>(setup: F, before: u64, after: u64) -> bool
where
    F: Fn() -> World,
{
    let mut world = setup();
    step(&mut world, before);

    let Ok(bytes) = world.serialize() else {
        return false;
    };
    let Ok(mut restored) = World::deserialize(&bytes) else {
        return false;
    };
    if restored.state_hash() != world.state_hash() {
        return false;
    }

    step(&mut world, after);
    step(&mut restored, after);
    world.state_hash() == restored.state_hash()
}

/// Run a world while admitting timed command batches, the way the
/// commander does after each exchange. Returns the final hash.
pub fn run_with_orders(mut world: World, orders: &[(u64, Vec<NetworkCommand>)], ticks: u64) -> u64 {
    for tick in 1..=ticks {
        step(&mut world, 1);
        for (_, batch) in orders.iter().filter(|(t, _)| *t == tick) {
            Commander::apply_batch(&mut world, batch.clone());
        }
    }
    world.state_hash()
}

/// Hash any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for command streams.
pub mod strategies {
    use lockstep_core::commander::NetworkCommand;
    use lockstep_core::math::GridPos;
    use lockstep_core::world::World;
    use proptest::prelude::*;

    /// Every command name in the skirmish tech tree.
    pub const COMMAND_NAMES: [&str; 10] = [
        "stop",
        "move",
        "attack",
        "harvest",
        "repair",
        "build",
        "produce_worker",
        "produce_soldier",
        "research_plating",
        "fortify",
    ];

    /// An order addressed by roster position rather than id.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ArbOrder {
        /// Issuing faction.
        pub faction: usize,
        /// Roster position of the commanded unit.
        pub slot: usize,
        /// Command name.
        pub command: &'static str,
        /// Target cell.
        pub pos: GridPos,
    }

    impl ArbOrder {
        /// Resolve against a world. Build orders build a tower.
        /// `None` when the roster position is empty.
        #[must_use]
        pub fn resolve(&self, world: &World) -> Option<NetworkCommand> {
            let unit = world.faction(self.faction)?.units().nth(self.slot)?.id();
            let command_type = world.tech().command_type_id(self.command).ok()?;
            let mut command = NetworkCommand::new(self.faction, unit, command_type, self.pos);
            if self.command == "build" {
                command.unit_type = world.tech().unit_type_id("tower").ok();
            }
            Some(command)
        }
    }

    /// A cell of a `width` by `height` map, plus a margin outside it.
    pub fn arb_grid_pos(width: i32, height: i32) -> impl Strategy<Value = GridPos> {
        (-2..width + 2, -2..height + 2).prop_map(|(x, y)| GridPos::new(x, y))
    }

    /// Any skirmish command name.
    pub fn arb_command_name() -> impl Strategy<Value = &'static str> {
        proptest::sample::select(COMMAND_NAMES.to_vec())
    }

    /// An order for one of the first `slots` units of one of two factions.
    pub fn arb_order(slots: usize) -> impl Strategy<Value = ArbOrder> {
        (0..2usize, 0..slots, arb_command_name(), arb_grid_pos(32, 32)).prop_map(
            |(faction, slot, command, pos)| ArbOrder {
                faction,
                slot,
                command,
                pos,
            },
        )
    }

    /// Orders tagged with the tick after which they are admitted.
    pub fn arb_timed_orders(
        max_len: usize,
        max_tick: u64,
    ) -> impl Strategy<Value = Vec<(u64, ArbOrder)>> {
        proptest::collection::vec((1..max_tick, arb_order(4)), 0..max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::strategies::*;
    use super::*;
    use crate::fixtures::{busy_skirmish, skirmish_world};
    use proptest::prelude::*;

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
        assert_eq!(result.unique_hashes(), vec![100]);
    }

    #[test]
    #[should_panic(expected = "non-deterministic")]
    fn test_assert_reports_divergence() {
        let result = DeterminismResult {
            is_deterministic: false,
            hashes: vec![1, 2],
            ticks: 5,
        };
        result.assert_deterministic();
    }

    #[test]
    fn test_idle_skirmish_is_deterministic() {
        verify_world_determinism(skirmish_world, 200).assert_deterministic();
    }

    #[test]
    fn test_busy_skirmish_is_deterministic() {
        verify_world_determinism(busy_skirmish, 600).assert_deterministic();
    }

    #[test]
    fn test_no_divergence_in_busy_skirmish() {
        assert_eq!(find_first_divergence(busy_skirmish, 300), None);
    }

    #[test]
    fn test_serialization_mid_game() {
        assert!(verify_serialization_determinism(busy_skirmish, 150, 150));
    }

    #[test]
    fn test_parallel_worlds_agree() {
        let result = run_parallel_worlds(busy_skirmish, 4, 300);
        assert_eq!(result.hashes.len(), 4);
        result.assert_deterministic();
    }

    #[test]
    fn test_compute_hash_is_stable() {
        assert_eq!(compute_hash(&(1u32, "a")), compute_hash(&(1u32, "a")));
        assert_ne!(compute_hash(&1u32), compute_hash(&2u32));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_random_orders_replay_identically(orders in arb_timed_orders(24, 200)) {
            let world = skirmish_world();
            let mut timed: Vec<(u64, Vec<NetworkCommand>)> = Vec::new();
            for (tick, order) in &orders {
                if let Some(command) = order.resolve(&world) {
                    timed.push((*tick, vec![command]));
                }
            }
            let a = run_with_orders(skirmish_world(), &timed, 250);
            let b = run_with_orders(skirmish_world(), &timed, 250);
            prop_assert_eq!(a, b);
        }
    }
}
