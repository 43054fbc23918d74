//! The game session.
//!
//! [`Game`] owns the world and its collaborators and runs the per-tick
//! sequence around [`World::update`]:
//!
//! 1. every AI controller issues commands through its facade
//! 2. the world advances one tick
//! 3. the script hook runs
//! 4. the commander exchanges commands with the peers and admits them
//! 5. admitted commands are recorded, victory is checked
//!
//! Commands admitted at the end of tick `n` act in tick `n + 1` on every
//! peer. Render frames are decoupled from ticks by [`TickScheduler`].

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::Hasher;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commander::{Commander, NetworkInterface};
use crate::config::{ControlType, GameSettings, GameSpeed, VictoryMode};
use crate::effects::{EffectSink, Hooks, ObserverRegistry};
use crate::error::{GameError, Result};
use crate::facade::{FactionFacade, PlayerFacade};
use crate::map::Map;
use crate::replay::Replay;
use crate::snapshot::WorldSnapshot;
use crate::tech::{CommandClass, TechTree};
use crate::unit::InterestingUnitType;
use crate::world::World;

/// Hash of a value's bincode encoding.
///
/// # Errors
///
/// Returns [`GameError::InvalidState`] if the value cannot be encoded.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<u64> {
    let bytes = bincode::serialize(value)
        .map_err(|e| GameError::InvalidState(format!("Failed to encode content: {e}")))?;
    let mut hasher = DefaultHasher::new();
    hasher.write(&bytes);
    Ok(hasher.finish())
}

/// Checksum every peer must agree on before the first tick.
///
/// # Errors
///
/// Returns [`GameError::InvalidState`] if the content cannot be encoded.
pub fn content_checksum(settings: &GameSettings, tech: &TechTree, map: &Map) -> Result<u64> {
    fingerprint(&(settings, tech, map))
}

/// Decision-making for one faction. Sees the world only through a facade.
pub trait AiController {
    /// Issue this tick's commands.
    fn update(&mut self, facade: &mut dyn PlayerFacade);
}

/// Script collaborator, run once per tick after the world update.
pub trait ScriptHook {
    /// React to the tick. May use the world's scripting interface.
    fn on_tick(&mut self, world: &mut World);
}

/// Minimal controller: idle harvesters go harvesting and producers train
/// units up to a cap.
#[derive(Debug, Clone)]
pub struct ScriptedAi {
    interval: u32,
    max_units: usize,
    counter: u32,
}

impl ScriptedAi {
    /// Act every `interval` calls; stop producing at `max_units`.
    #[must_use]
    pub fn new(interval: u32, max_units: usize) -> Self {
        Self {
            interval: interval.max(1),
            max_units,
            counter: 0,
        }
    }
}

impl Default for ScriptedAi {
    fn default() -> Self {
        Self::new(40, 8)
    }
}

impl AiController for ScriptedAi {
    fn update(&mut self, facade: &mut dyn PlayerFacade) {
        self.counter += 1;
        if self.counter % self.interval != 0 {
            return;
        }

        let mut harvesters = Vec::new();
        let mut producers = Vec::new();
        for i in 0..facade.own_unit_count() {
            let Some(unit) = facade.own_unit(i) else {
                continue;
            };
            if !unit.is_operative() {
                continue;
            }
            let tech = facade.tech();
            if unit.is_interesting(InterestingUnitType::IdleHarvester, tech) {
                let resource = tech
                    .unit_type(unit.unit_type())
                    .commands
                    .iter()
                    .filter_map(|&c| tech.command_type(c).harvest.as_ref())
                    .find_map(|h| h.resources.first().copied());
                if let Some(resource) = resource {
                    harvesters.push((unit.id(), unit.pos(), resource));
                }
            } else if unit.is_interesting(InterestingUnitType::Producer, tech)
                && !unit.any_command()
            {
                producers.push((unit.id(), unit.pos()));
            }
        }

        for (unit, pos, resource) in harvesters {
            if let Some(deposit) = facade.nearest_sighted_resource(resource, pos) {
                facade.give_command(unit, CommandClass::Harvest, deposit);
            }
        }
        if facade.own_unit_count() < self.max_units {
            for (unit, pos) in producers {
                facade.give_command(unit, CommandClass::Produce, pos);
            }
        }
    }
}

/// End of the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// Tick the game ended after.
    pub tick: u64,
    /// Winning factions.
    pub winners: BTreeSet<usize>,
}

impl GameOutcome {
    /// Whether a faction won.
    #[must_use]
    pub fn is_winner(&self, faction: usize) -> bool {
        self.winners.contains(&faction)
    }
}

/// Releases fixed ticks for elapsed render time.
///
/// The tick length never changes; the speed only changes how many ticks a
/// second of real time releases. Elapsed time is passed in, so the
/// scheduler itself never reads a clock.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    speed: GameSpeed,
    accumulator: Duration,
    paused: bool,
    max_ticks_per_frame: u32,
}

impl TickScheduler {
    /// Scheduler at a speed, releasing at most `max_ticks_per_frame` per call.
    #[must_use]
    pub fn new(speed: GameSpeed, max_ticks_per_frame: u32) -> Self {
        Self {
            speed,
            accumulator: Duration::ZERO,
            paused: false,
            max_ticks_per_frame: max_ticks_per_frame.max(1),
        }
    }

    /// Real time per tick at the current speed.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.speed.ticks_per_second()
    }

    /// Ticks due after `elapsed`. A backlog beyond the cap is dropped.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        if self.paused {
            return 0;
        }
        self.accumulator += elapsed;
        let period = self.tick_period();
        let mut ticks = 0;
        while self.accumulator >= period && ticks < self.max_ticks_per_frame {
            self.accumulator -= period;
            ticks += 1;
        }
        if self.accumulator >= period {
            tracing::debug!(dropped = ?self.accumulator, "tick backlog dropped");
            self.accumulator = Duration::ZERO;
        }
        ticks
    }

    /// Fraction of the next tick already elapsed, for render interpolation.
    #[must_use]
    pub fn alpha(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.tick_period().as_secs_f32()
    }

    /// Current speed.
    #[must_use]
    pub const fn speed(&self) -> GameSpeed {
        self.speed
    }

    /// Change speed. The pending fraction of a tick is kept.
    pub fn set_speed(&mut self, speed: GameSpeed) {
        self.speed = speed;
        self.accumulator = self.accumulator.min(self.tick_period());
    }

    /// Whether paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause or resume.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

/// A running session.
pub struct Game {
    settings: GameSettings,
    world: World,
    commander: Commander,
    network: Box<dyn NetworkInterface>,
    effects: Box<dyn EffectSink>,
    observers: ObserverRegistry,
    controllers: Vec<(usize, Box<dyn AiController>)>,
    script: Option<Box<dyn ScriptHook>>,
    scheduler: TickScheduler,
    replay: Option<Replay>,
    outcome: Option<GameOutcome>,
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("frame", &self.world.frame_count())
            .field("controllers", &self.controllers.len())
            .field("recording", &self.replay.is_some())
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl Game {
    /// Build the world and pass the start barrier.
    ///
    /// # Errors
    ///
    /// Configuration contradictions, content that does not fit the
    /// settings, and a failed barrier. All of them abort before any tick.
    pub fn new(
        settings: GameSettings,
        tech: TechTree,
        map: Map,
        mut network: Box<dyn NetworkInterface>,
        mut effects: Box<dyn EffectSink>,
    ) -> Result<Self> {
        let checksum = content_checksum(&settings, &tech, &map)?;
        let world = World::new(&settings, tech, map)?;

        if let Err(e) = network.wait_until_ready(checksum) {
            tracing::warn!(error = %e, checksum, "start barrier failed");
            return Err(GameError::Network(e));
        }
        tracing::info!(checksum, "all peers ready");

        if let Some(track) = &settings.ambient_track {
            effects.play_ambient(track);
        }
        tracing::info!(
            description = %settings.description,
            factions = settings.factions.len(),
            speed = ?settings.speed,
            "game started"
        );

        Ok(Self {
            scheduler: TickScheduler::new(settings.speed, 8),
            settings,
            world,
            commander: Commander::new(),
            network,
            effects,
            observers: ObserverRegistry::new(),
            controllers: Vec::new(),
            script: None,
            replay: None,
            outcome: None,
        })
    }

    /// Attach a controller to a faction.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownFaction`] for an index outside the game.
    pub fn add_controller(&mut self, faction: usize, controller: Box<dyn AiController>) -> Result<()> {
        if self.world.faction(faction).is_none() {
            return Err(GameError::UnknownFaction(faction));
        }
        self.controllers.push((faction, controller));
        self.controllers.sort_by_key(|(f, _)| *f);
        Ok(())
    }

    /// Attach a [`ScriptedAi`] to every AI-controlled faction.
    pub fn attach_scripted_ai(&mut self) {
        let ai: Vec<usize> = self
            .world
            .factions()
            .iter()
            .filter(|f| f.control() == ControlType::Ai)
            .map(crate::faction::Faction::index)
            .collect();
        for faction in ai {
            self.controllers.push((faction, Box::new(ScriptedAi::default())));
        }
        self.controllers.sort_by_key(|(f, _)| *f);
    }

    /// Install the script hook.
    pub fn set_script(&mut self, script: Box<dyn ScriptHook>) {
        self.script = Some(script);
    }

    /// Start recording a replay from the current tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the world cannot be encoded.
    pub fn start_recording(&mut self) -> Result<()> {
        self.replay = Some(Replay::new(&self.settings, &self.world)?);
        Ok(())
    }

    /// Stop recording and return the replay, stamped with the current state.
    pub fn finish_recording(&mut self) -> Option<Replay> {
        let mut replay = self.replay.take()?;
        replay.finalize(self.world.frame_count(), self.world.state_hash());
        Some(replay)
    }

    /// Register a kill observer.
    pub fn observers_mut(&mut self) -> &mut ObserverRegistry {
        &mut self.observers
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Network failures. The tick itself has already run when they occur.
    pub fn tick(&mut self) -> Result<()> {
        for (faction, controller) in &mut self.controllers {
            if let Some(mut facade) = FactionFacade::new(&self.world, &mut self.commander, *faction) {
                controller.update(&mut facade);
            }
        }

        let mut hooks = Hooks::new(self.effects.as_mut(), &mut self.observers);
        self.world.update(&mut hooks);

        if let Some(script) = &mut self.script {
            script.on_tick(&mut self.world);
        }

        let applied = self
            .commander
            .update_network(&mut self.world, self.network.as_mut())?;
        if let Some(replay) = &mut self.replay {
            replay.record_batch(&applied);
        }

        if self.outcome.is_none() {
            self.outcome = self.check_victory();
            if let Some(outcome) = &self.outcome {
                tracing::info!(tick = outcome.tick, winners = ?outcome.winners, "game over");
            }
        }
        Ok(())
    }

    /// Run the ticks due after `elapsed` render time. Returns how many ran.
    ///
    /// # Errors
    ///
    /// Network failures.
    pub fn run_frame(&mut self, elapsed: Duration) -> Result<u32> {
        let due = self.scheduler.advance(elapsed);
        let mut ran = 0;
        while ran < due && self.outcome.is_none() {
            self.tick()?;
            ran += 1;
        }
        Ok(ran)
    }

    fn check_victory(&self) -> Option<GameOutcome> {
        let tick = self.world.frame_count();
        match self.settings.victory {
            VictoryMode::Scripted => {
                let flags = self.world.script_flags();
                flags.is_game_over().then(|| GameOutcome {
                    tick,
                    winners: (0..self.world.factions().len())
                        .filter(|&f| flags.is_winner(f))
                        .collect(),
                })
            }
            VictoryMode::Standard => {
                let factions = self.world.factions();
                let tech = self.world.tech();
                let this = factions.get(self.settings.this_faction)?;
                if !this.has_building(tech) {
                    return Some(GameOutcome {
                        tick,
                        winners: factions
                            .iter()
                            .filter(|f| !f.is_ally(this))
                            .map(crate::faction::Faction::index)
                            .collect(),
                    });
                }
                let enemies_standing = factions
                    .iter()
                    .any(|f| !f.is_ally(this) && f.has_building(tech));
                (!enemies_standing).then(|| GameOutcome {
                    tick,
                    winners: factions
                        .iter()
                        .filter(|f| f.is_ally(this))
                        .map(crate::faction::Faction::index)
                        .collect(),
                })
            }
        }
    }

    /// The world.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// Session settings.
    #[must_use]
    pub const fn settings(&self) -> &GameSettings {
        &self.settings
    }

    /// The commander, for local input.
    pub fn commander_mut(&mut self) -> (&World, &mut Commander) {
        (&self.world, &mut self.commander)
    }

    /// Facade for the local faction.
    pub fn local_facade(&mut self) -> Option<FactionFacade<'_>> {
        FactionFacade::new(&self.world, &mut self.commander, self.settings.this_faction)
    }

    /// Tick scheduler.
    pub fn scheduler_mut(&mut self) -> &mut TickScheduler {
        &mut self.scheduler
    }

    /// Game result once decided.
    #[must_use]
    pub const fn outcome(&self) -> Option<&GameOutcome> {
        self.outcome.as_ref()
    }

    /// Render snapshot for the local team.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let team = self
            .world
            .faction(self.settings.this_faction)
            .map_or(0, crate::faction::Faction::team);
        WorldSnapshot::capture_for_team(&self.world, team)
    }
}
