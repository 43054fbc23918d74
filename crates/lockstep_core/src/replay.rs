//! Replay recording and playback.
//!
//! A replay stores the world as it stood when the session started plus every
//! command that came out of the network exchange, tagged with the tick after
//! which it was admitted. Rejected commands are kept too: re-admitting them
//! rejects them again, and the stream stays a faithful copy of what every
//! peer saw.

use serde::{Deserialize, Serialize};

use crate::commander::{AppliedCommand, Commander, NetworkCommand};
use crate::config::GameSettings;
use crate::effects::{Hooks, NullEffects, ObserverRegistry};
use crate::error::{GameError, Result};
use crate::game::fingerprint;
use crate::map::Map;
use crate::tech::TechTree;
use crate::world::World;

/// One exchanged command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCommand {
    /// Completed ticks when the command was admitted.
    pub tick: u64,
    /// The command as exchanged.
    pub command: NetworkCommand,
}

/// Replay format version.
pub const REPLAY_VERSION: u32 = 1;

/// A recorded session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replay {
    /// Format version.
    pub version: u32,
    /// Session settings.
    pub settings: GameSettings,
    /// Fingerprint of the tech tree.
    pub tech_fingerprint: u64,
    /// Fingerprint of the map's static content.
    pub map_fingerprint: u64,
    /// Serialized world at the first recorded tick.
    pub initial_state: Vec<u8>,
    /// Commands in admission order.
    pub commands: Vec<ReplayCommand>,
    /// Completed ticks at the end.
    pub final_tick: u64,
    /// State hash at the end.
    pub final_hash: u64,
}

impl Replay {
    /// Start recording from the current world.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if the world cannot be encoded.
    pub fn new(settings: &GameSettings, world: &World) -> Result<Self> {
        Ok(Self {
            version: REPLAY_VERSION,
            settings: settings.clone(),
            tech_fingerprint: fingerprint(world.tech())?,
            map_fingerprint: fingerprint(&world.map().content())?,
            initial_state: world.serialize()?,
            commands: Vec::new(),
            final_tick: world.frame_count(),
            final_hash: world.state_hash(),
        })
    }

    /// Append a command.
    pub fn record_command(&mut self, tick: u64, command: NetworkCommand) {
        self.commands.push(ReplayCommand { tick, command });
    }

    /// Append the outcome of a network update.
    pub fn record_batch(&mut self, applied: &[AppliedCommand]) {
        for a in applied {
            self.record_command(a.tick, a.command.clone());
        }
    }

    /// Stamp the end state.
    pub fn finalize(&mut self, final_tick: u64, final_hash: u64) {
        self.final_tick = final_tick;
        self.final_hash = final_hash;
    }

    /// Whether the replay was recorded on this content.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if the content cannot be encoded.
    pub fn matches_content(&self, tech: &TechTree, map: &Map) -> Result<bool> {
        Ok(fingerprint(tech)? == self.tech_fingerprint
            && fingerprint(&map.content())? == self.map_fingerprint)
    }

    /// Encode with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize replay: {e}")))
    }

    /// Decode and check the format version.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] on undecodable input or a version
    /// mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let replay: Self = bincode::deserialize(bytes)
            .map_err(|e| GameError::InvalidState(format!("Failed to deserialize replay: {e}")))?;
        if replay.version != REPLAY_VERSION {
            return Err(GameError::InvalidState(format!(
                "Replay version mismatch: expected {REPLAY_VERSION}, got {}",
                replay.version
            )));
        }
        Ok(replay)
    }

    /// World at the first recorded tick.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if the state does not decode.
    pub fn restore_initial_state(&self) -> Result<World> {
        World::deserialize(&self.initial_state)
    }

    /// Commands admitted after a given tick.
    #[must_use]
    pub fn commands_at_tick(&self, tick: u64) -> Vec<&ReplayCommand> {
        self.commands.iter().filter(|c| c.tick == tick).collect()
    }

    /// Recorded ticks.
    #[must_use]
    pub const fn duration(&self) -> u64 {
        self.final_tick
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

/// Re-executes a replay.
#[derive(Debug)]
pub struct ReplayPlayer {
    replay: Replay,
    world: World,
    start_tick: u64,
    command_index: usize,
    observers: ObserverRegistry,
    /// Whether playback is paused.
    pub paused: bool,
}

impl ReplayPlayer {
    /// Restore the initial world and admit the commands of its tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial state cannot be restored.
    pub fn new(replay: Replay) -> Result<Self> {
        let world = replay.restore_initial_state()?;
        let mut player = Self {
            start_tick: world.frame_count(),
            replay,
            world,
            command_index: 0,
            observers: ObserverRegistry::new(),
            paused: false,
        };
        player.admit_due_commands();
        Ok(player)
    }

    fn admit_due_commands(&mut self) {
        let now = self.world.frame_count();
        let mut batch = Vec::new();
        while let Some(c) = self.replay.commands.get(self.command_index) {
            if c.tick > now {
                break;
            }
            if c.tick == now {
                batch.push(c.command.clone());
            }
            self.command_index += 1;
        }
        if !batch.is_empty() {
            Commander::apply_batch(&mut self.world, batch);
        }
    }

    /// Run one tick. Returns whether ticks remain.
    pub fn advance(&mut self) -> bool {
        if self.paused || self.is_finished() {
            return !self.is_finished();
        }
        let mut effects = NullEffects;
        let mut hooks = Hooks::new(&mut effects, &mut self.observers);
        self.world.update(&mut hooks);
        self.admit_due_commands();
        !self.is_finished()
    }

    /// Restart from the initial state and play up to `target_tick`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial state cannot be restored.
    pub fn seek(&mut self, target_tick: u64) -> Result<()> {
        self.world = self.replay.restore_initial_state()?;
        self.command_index = 0;
        self.admit_due_commands();
        let paused = std::mem::replace(&mut self.paused, false);
        while self.world.frame_count() < target_tick && self.advance() {}
        self.paused = paused;
        Ok(())
    }

    /// Completed ticks of the replayed world.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.world.frame_count()
    }

    /// Replayed world.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// The replay.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Whether the final tick was reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.world.frame_count() >= self.replay.final_tick
    }

    /// Play to the end and compare the state hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial state cannot be restored.
    pub fn verify(&mut self) -> Result<bool> {
        self.seek(self.replay.final_tick)?;
        let actual = self.world.state_hash();
        if actual != self.replay.final_hash {
            tracing::warn!(
                tick = self.world.frame_count(),
                expected = self.replay.final_hash,
                actual,
                "replay diverged"
            );
        }
        Ok(actual == self.replay.final_hash)
    }

    /// Toggle pause.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Played share of the replay in percent.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        let total = self.replay.final_tick.saturating_sub(self.start_tick);
        if total == 0 {
            return 100.0;
        }
        let played = self.world.frame_count().saturating_sub(self.start_tick);
        #[allow(clippy::cast_precision_loss)]
        let percent = played as f64 / total as f64 * 100.0;
        percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::math::GridPos;
    use crate::tech::CommandClass;
    use crate::testing;

    fn hooks_step(world: &mut World, ticks: u64) {
        let mut effects = NullEffects;
        let mut observers = ObserverRegistry::new();
        let mut hooks = Hooks::new(&mut effects, &mut observers);
        for _ in 0..ticks {
            world.update(&mut hooks);
        }
    }

    /// Record a short session: a worker walks, the castle trains a worker.
    fn recorded() -> Replay {
        let settings = testing::settings();
        let mut world = testing::world();
        let mut replay = Replay::new(&settings, &world).unwrap();

        let worker = world.faction(0).unwrap().units().nth(1).unwrap().id();
        let castle = world.faction(1).unwrap().units().next().unwrap().id();
        let mv = world.tech().command_type_id("move").unwrap();
        let produce = world.tech().command_type_id("produce_worker").unwrap();

        hooks_step(&mut world, 3);
        let batch = vec![
            NetworkCommand::new(1, castle, produce, GridPos::ZERO),
            NetworkCommand::new(0, worker, mv, GridPos::new(14, 12)),
        ];
        let applied = Commander::apply_batch(&mut world, batch);
        replay.record_batch(&applied);
        hooks_step(&mut world, 300);
        replay.finalize(world.frame_count(), world.state_hash());
        replay
    }

    #[test]
    fn test_record_keeps_canonical_order() {
        let replay = recorded();
        assert_eq!(replay.version, REPLAY_VERSION);
        assert_eq!(replay.command_count(), 2);
        assert_eq!(replay.commands_at_tick(3).len(), 2);
        assert!(replay.commands_at_tick(4).is_empty());
        assert_eq!(replay.commands[0].command.faction, 0);
        assert_eq!(replay.duration(), 303);
    }

    #[test]
    fn test_bytes_round_trip_and_version_check() {
        let mut replay = recorded();
        let loaded = Replay::from_bytes(&replay.to_bytes().unwrap()).unwrap();
        assert_eq!(loaded, replay);

        replay.version = REPLAY_VERSION + 1;
        assert!(matches!(
            Replay::from_bytes(&replay.to_bytes().unwrap()),
            Err(GameError::InvalidState(_))
        ));
        assert!(Replay::from_bytes(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_content_fingerprints() {
        let replay = recorded();
        let tech = testing::tech();
        let map = testing::map(&tech);
        assert!(replay.matches_content(&tech, &map).unwrap());

        let mut world = testing::world();
        hooks_step(&mut world, 300);
        let late = Replay::new(&testing::settings(), &world).unwrap();
        assert!(late.matches_content(&tech, &map).unwrap());

        let other = Map::flat("twin_fields", 16, 16);
        assert!(!replay.matches_content(&tech, &other).unwrap());
    }

    #[test]
    fn test_player_reproduces_final_hash() {
        let replay = recorded();
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(player.verify().unwrap());
        assert!(player.is_finished());
        assert_eq!(player.world().unit_count(1).unwrap(), 5);
    }

    #[test]
    fn test_tampered_replay_fails_verification() {
        let mut replay = recorded();
        replay.commands.remove(1);
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(!player.verify().unwrap());
    }

    #[test]
    fn test_player_advance_pause_and_seek() {
        let replay = recorded();
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert_eq!(player.current_tick(), 0);
        assert!(player.progress_percent().abs() < 0.01);

        for _ in 0..5 {
            assert!(player.advance());
        }
        assert_eq!(player.current_tick(), 5);
        let worker = player.world().faction(0).unwrap().units().nth(1).unwrap();
        assert!(worker.any_command());

        player.toggle_pause();
        player.advance();
        assert_eq!(player.current_tick(), 5);
        player.toggle_pause();

        player.seek(2).unwrap();
        assert_eq!(player.current_tick(), 2);
        let worker = player.world().faction(0).unwrap().units().nth(1).unwrap();
        assert!(!worker.any_command());

        while player.advance() {}
        assert!((player.progress_percent() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_tick_zero_commands_apply_at_start() {
        let settings = testing::settings();
        let world = testing::world();
        let mut replay = Replay::new(&settings, &world).unwrap();
        let worker = world.faction(0).unwrap().units().nth(1).unwrap().id();
        let stop = world.tech().command_type_id("stop").unwrap();
        replay.record_command(0, NetworkCommand::new(0, worker, stop, GridPos::ZERO));
        replay.finalize(1, 0);

        let player = ReplayPlayer::new(replay).unwrap();
        let unit = player.world().unit_by_id(worker).unwrap();
        let head = unit.current_command().map(Command::class);
        assert_eq!(head, Some(CommandClass::Stop));
    }
}
