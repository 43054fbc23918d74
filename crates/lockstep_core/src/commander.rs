//! The commander: the single entry point for commands into the simulation.
//!
//! Local players and AI controllers issue commands through [`Commander`].
//! A command is checked against the current world for immediate feedback,
//! then queued as a [`NetworkCommand`]. Once per tick the queue is exchanged
//! with every peer through a [`NetworkInterface`]; the combined batch is
//! sorted into canonical order and admitted on every peer alike.
//!
//! Nothing coming off the network is trusted: every command is resolved
//! against local content, checked for ownership and admitted through the
//! same validation as a local one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{Command, CommandResult};
use crate::math::GridPos;
use crate::tech::{CommandTypeId, TechTree, UnitTypeId};
use crate::unit::{UnitId, UnitReference};
use crate::world::World;

/// Failures of the network collaborator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// A peer announced different content.
    #[error("Checksum mismatch with peer {peer}: local {local:#x}, remote {remote:#x}")]
    ChecksumMismatch {
        /// Peer index.
        peer: usize,
        /// Local checksum.
        local: u64,
        /// Checksum the peer sent.
        remote: u64,
    },

    /// Commands were exchanged before the start barrier.
    #[error("Network exchange before the start barrier")]
    NotReady,

    /// A peer went away.
    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    /// A payload failed to decode.
    #[error("Malformed network command: {0}")]
    Malformed(String),
}

/// The admission tuple as it travels between peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkCommand {
    /// Issuing faction.
    pub faction: usize,
    /// Commanded unit.
    pub unit: UnitId,
    /// Command type.
    pub command_type: CommandTypeId,
    /// Target position.
    pub pos: GridPos,
    /// Target unit.
    pub target: Option<UnitReference>,
    /// Unit type to build.
    pub unit_type: Option<UnitTypeId>,
}

impl NetworkCommand {
    /// Position command.
    #[must_use]
    pub const fn new(faction: usize, unit: UnitId, command_type: CommandTypeId, pos: GridPos) -> Self {
        Self {
            faction,
            unit,
            command_type,
            pos,
            target: None,
            unit_type: None,
        }
    }

    /// Encode as a bincode payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Malformed`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        bincode::serialize(self).map_err(|e| NetworkError::Malformed(e.to_string()))
    }

    /// Decode a bincode payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Malformed`] on undecodable input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        bincode::deserialize(bytes).map_err(|e| NetworkError::Malformed(e.to_string()))
    }

    /// Resolve against local content. `None` when the command type is
    /// unknown here.
    #[must_use]
    pub fn to_command(&self, tech: &TechTree) -> Option<Command> {
        if !tech.contains_command_type(self.command_type) {
            return None;
        }
        let command_type = tech.command_type(self.command_type);
        Some(match (self.target, self.unit_type) {
            (Some(target), _) => Command::targeting(command_type, target, self.pos),
            (None, Some(unit_type)) => Command::build(command_type, self.pos, unit_type),
            (None, None) => Command::new(command_type, self.pos),
        })
    }
}

/// Transport collaborator: a start barrier and a per-tick command exchange.
pub trait NetworkInterface {
    /// Block until every peer has announced `checksum`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::ChecksumMismatch`] when a peer disagrees.
    fn wait_until_ready(&mut self, checksum: u64) -> Result<(), NetworkError>;

    /// Send this peer's commands for `tick` and return every peer's commands
    /// for it, this peer's included.
    ///
    /// # Errors
    ///
    /// Transport failures.
    fn exchange(
        &mut self,
        tick: u64,
        outgoing: Vec<NetworkCommand>,
    ) -> Result<Vec<NetworkCommand>, NetworkError>;
}

/// Loopback transport for single-process sessions. Simulated peers may
/// announce checksums and inject commands.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    peer_checksums: Vec<u64>,
    inbound: Vec<NetworkCommand>,
    ready: bool,
}

impl LocalNetwork {
    /// Loopback with no remote peers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a simulated peer announcing `checksum` at the barrier.
    #[must_use]
    pub fn with_peer(mut self, checksum: u64) -> Self {
        self.peer_checksums.push(checksum);
        self
    }

    /// Deliver a command as if a peer had sent it.
    pub fn inject(&mut self, command: NetworkCommand) {
        self.inbound.push(command);
    }

    /// Whether the barrier passed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }
}

impl NetworkInterface for LocalNetwork {
    fn wait_until_ready(&mut self, checksum: u64) -> Result<(), NetworkError> {
        for (peer, &remote) in self.peer_checksums.iter().enumerate() {
            if remote != checksum {
                return Err(NetworkError::ChecksumMismatch {
                    peer,
                    local: checksum,
                    remote,
                });
            }
        }
        self.ready = true;
        Ok(())
    }

    fn exchange(
        &mut self,
        _tick: u64,
        mut outgoing: Vec<NetworkCommand>,
    ) -> Result<Vec<NetworkCommand>, NetworkError> {
        if !self.ready {
            return Err(NetworkError::NotReady);
        }
        outgoing.append(&mut self.inbound);
        Ok(outgoing)
    }
}

/// A command admitted or rejected during a network update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCommand {
    /// World tick at admission.
    pub tick: u64,
    /// The exchanged command.
    pub command: NetworkCommand,
    /// Admission outcome.
    pub result: CommandResult,
}

/// Issues local commands and admits exchanged ones in canonical order.
///
/// Issued commands are pre-admitted on a private copy of the world, so a
/// check sees the costs and queue changes of everything already pending for
/// the coming exchange.
#[derive(Debug, Default)]
pub struct Commander {
    pending: Vec<NetworkCommand>,
    shadow: Option<World>,
}

impl Commander {
    /// Create a commander with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands waiting for the next exchange.
    #[must_use]
    pub fn pending(&self) -> &[NetworkCommand] {
        &self.pending
    }

    /// Order a unit to a position.
    pub fn give_command(
        &mut self,
        world: &World,
        faction: usize,
        unit: UnitId,
        command_type: CommandTypeId,
        pos: GridPos,
    ) -> CommandResult {
        self.issue(world, NetworkCommand::new(faction, unit, command_type, pos))
    }

    /// Order a unit to build a unit type at a position.
    pub fn give_build_command(
        &mut self,
        world: &World,
        faction: usize,
        unit: UnitId,
        command_type: CommandTypeId,
        pos: GridPos,
        unit_type: UnitTypeId,
    ) -> CommandResult {
        let command = NetworkCommand {
            unit_type: Some(unit_type),
            ..NetworkCommand::new(faction, unit, command_type, pos)
        };
        self.issue(world, command)
    }

    /// Order a unit to act on another unit.
    pub fn give_target_command(
        &mut self,
        world: &World,
        faction: usize,
        unit: UnitId,
        command_type: CommandTypeId,
        target: UnitReference,
    ) -> CommandResult {
        let Some(pos) = world.find_unit(target).map(|t| t.pos()) else {
            return CommandResult::FailUndefined;
        };
        let command = NetworkCommand {
            target: Some(target),
            ..NetworkCommand::new(faction, unit, command_type, pos)
        };
        self.issue(world, command)
    }

    /// Check a command against the world with every pending command
    /// already admitted, and queue it for the next exchange when it passes.
    /// Admission after the exchange re-validates; only changes made to the
    /// world outside the commander can still make it fail.
    pub fn issue(&mut self, world: &World, command: NetworkCommand) -> CommandResult {
        let Some(resolved) = command.to_command(world.tech()) else {
            return CommandResult::FailUndefined;
        };
        let result = self
            .shadow_world(world)
            .give_command(command.faction, command.unit, resolved);
        tracing::debug!(
            faction = command.faction,
            unit = command.unit,
            ?result,
            "command issued"
        );
        if result.is_success() {
            self.pending.push(command);
        } else {
            // A rejected exclusive order has still cleared the shadow queue.
            self.shadow = None;
        }
        result
    }

    /// The world as admission will find it: `world` plus every pending
    /// command. Rebuilt when nothing is pending or the world has ticked.
    fn shadow_world(&mut self, world: &World) -> &mut World {
        let stale = self.pending.is_empty()
            || self
                .shadow
                .as_ref()
                .map_or(true, |s| s.frame_count() != world.frame_count());
        if stale {
            let mut shadow = world.clone();
            for pending in &self.pending {
                if let Some(resolved) = pending.to_command(world.tech()) {
                    shadow.give_command(pending.faction, pending.unit, resolved);
                }
            }
            self.shadow = Some(shadow);
        }
        self.shadow.get_or_insert_with(|| world.clone())
    }

    /// Exchange pending commands with every peer and admit the combined
    /// batch.
    ///
    /// # Errors
    ///
    /// Transport failures. Commands already pending are lost.
    pub fn update_network(
        &mut self,
        world: &mut World,
        network: &mut dyn NetworkInterface,
    ) -> Result<Vec<AppliedCommand>, NetworkError> {
        let tick = world.frame_count();
        let outgoing = std::mem::take(&mut self.pending);
        self.shadow = None;
        let incoming = network.exchange(tick, outgoing)?;
        Ok(Self::apply_batch(world, incoming))
    }

    /// Admit a batch in canonical order: faction index ascending, issue
    /// order within a faction.
    pub fn apply_batch(world: &mut World, mut batch: Vec<NetworkCommand>) -> Vec<AppliedCommand> {
        batch.sort_by_key(|c| c.faction);
        let tick = world.frame_count();
        batch
            .into_iter()
            .map(|command| {
                let result = Self::apply(world, &command);
                AppliedCommand {
                    tick,
                    command,
                    result,
                }
            })
            .collect()
    }

    /// Admit one exchanged command after re-validating it locally.
    pub fn apply(world: &mut World, command: &NetworkCommand) -> CommandResult {
        let owned = world
            .faction(command.faction)
            .is_some_and(|f| f.unit(command.unit).is_some());
        if !owned {
            tracing::warn!(
                faction = command.faction,
                unit = command.unit,
                "network command for a unit the faction does not own"
            );
            return CommandResult::FailUndefined;
        }
        let Some(resolved) = command.to_command(world.tech()) else {
            tracing::warn!(
                command_type = command.command_type.index(),
                "network command of unknown type"
            );
            return CommandResult::FailUndefined;
        };
        let result = world.give_command(command.faction, command.unit, resolved);
        if !result.is_success() {
            tracing::warn!(
                faction = command.faction,
                unit = command.unit,
                ?result,
                "network command rejected"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn worker(world: &World, faction: usize) -> UnitId {
        world.factions()[faction].units().nth(1).unwrap().id()
    }

    fn move_type(world: &World) -> CommandTypeId {
        world.tech().command_type_id("move").unwrap()
    }

    #[test]
    fn test_payload_round_trip() {
        let command = NetworkCommand {
            target: Some(UnitReference::new(1, 7)),
            ..NetworkCommand::new(0, 3, CommandTypeId(2), GridPos::new(4, 5))
        };
        let bytes = command.to_bytes().unwrap();
        assert_eq!(NetworkCommand::from_bytes(&bytes).unwrap(), command);
        assert!(matches!(
            NetworkCommand::from_bytes(&[1, 2]),
            Err(NetworkError::Malformed(_))
        ));
    }

    #[test]
    fn test_issue_queues_until_exchange() {
        let mut world = testing::world();
        let mut network = LocalNetwork::new();
        network.wait_until_ready(1).unwrap();
        let mut commander = Commander::new();

        let unit = worker(&world, 0);
        let result = commander.give_command(&world, 0, unit, move_type(&world), GridPos::new(10, 10));
        assert_eq!(result, CommandResult::Success);
        assert!(!world.unit_by_id(unit).unwrap().any_command());

        let applied = commander.update_network(&mut world, &mut network).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].result, CommandResult::Success);
        assert!(world.unit_by_id(unit).unwrap().any_command());
        assert!(commander.pending().is_empty());
    }

    #[test]
    fn test_failed_check_is_not_queued() {
        let world = testing::world();
        let mut commander = Commander::new();
        let unit = worker(&world, 0);
        let outside = GridPos::new(-1, 40);
        assert_eq!(
            commander.give_command(&world, 0, unit, move_type(&world), outside),
            CommandResult::FailUndefined
        );
        assert!(commander.pending().is_empty());
    }

    #[test]
    fn test_foreign_unit_rejected_on_apply() {
        let mut world = testing::world();
        let blue = worker(&world, 1);
        let forged = NetworkCommand::new(0, blue, move_type(&world), GridPos::new(10, 10));
        assert_eq!(Commander::apply(&mut world, &forged), CommandResult::FailUndefined);
        assert!(!world.unit_by_id(blue).unwrap().any_command());
    }

    #[test]
    fn test_unknown_command_type_rejected() {
        let mut world = testing::world();
        let unit = worker(&world, 0);
        let bogus = NetworkCommand::new(0, unit, CommandTypeId(999), GridPos::new(1, 1));
        assert_eq!(Commander::apply(&mut world, &bogus), CommandResult::FailUndefined);
    }

    #[test]
    fn test_batch_order_is_canonical() {
        let mut world = testing::world();
        let castle_red = world.factions()[0].units().next().unwrap().id();
        let castle_blue = world.factions()[1].units().next().unwrap().id();
        let produce = world.tech().command_type_id("produce_worker").unwrap();
        let here = GridPos::new(0, 0);

        let batch = vec![
            NetworkCommand::new(1, castle_blue, produce, here),
            NetworkCommand::new(0, castle_red, produce, here),
            NetworkCommand::new(1, castle_blue, produce, here),
        ];
        let applied = Commander::apply_batch(&mut world, batch);
        let order: Vec<usize> = applied.iter().map(|a| a.command.faction).collect();
        assert_eq!(order, vec![0, 1, 1]);
        assert!(applied.iter().all(|a| a.result.is_success()));
        assert_eq!(world.resource_amount("gold", 1).unwrap(), 500);
    }

    #[test]
    fn test_revalidation_after_exchange() {
        let mut world = testing::world();
        let mut network = LocalNetwork::new();
        network.wait_until_ready(0).unwrap();
        let mut commander = Commander::new();
        let castle = world.factions()[0].units().next().unwrap().id();
        let produce = world.tech().command_type_id("produce_worker").unwrap();

        // both pass against 600 gold; the world changes behind the commander
        for _ in 0..2 {
            assert!(commander
                .give_command(&world, 0, castle, produce, GridPos::new(0, 0))
                .is_success());
        }
        world.give_resource("gold", 0, -570).unwrap();
        let applied = commander.update_network(&mut world, &mut network).unwrap();
        assert_eq!(applied[0].result, CommandResult::FailResources);
        assert_eq!(applied[1].result, CommandResult::FailResources);
        assert_eq!(world.resource_amount("gold", 0).unwrap(), 30);
    }

    #[test]
    fn test_pending_costs_count_against_later_orders() {
        let mut world = testing::world();
        let mut network = LocalNetwork::new();
        network.wait_until_ready(0).unwrap();
        let mut commander = Commander::new();
        let castle = world.factions()[0].units().next().unwrap().id();
        let produce = world.tech().command_type_id("produce_worker").unwrap();
        world.give_resource("gold", 0, -530).unwrap();
        let here = GridPos::new(0, 0);

        assert_eq!(
            commander.give_command(&world, 0, castle, produce, here),
            CommandResult::Success
        );
        assert_eq!(
            commander.give_command(&world, 0, castle, produce, here),
            CommandResult::FailResources
        );
        assert_eq!(commander.pending().len(), 1);
        assert_eq!(world.resource_amount("gold", 0).unwrap(), 70);

        let applied = commander.update_network(&mut world, &mut network).unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].result.is_success());
        assert_eq!(world.resource_amount("gold", 0).unwrap(), 20);

        // After the exchange the check follows the real ledger again.
        world.give_resource("gold", 0, 30).unwrap();
        assert_eq!(
            commander.give_command(&world, 0, castle, produce, here),
            CommandResult::Success
        );
    }

    #[test]
    fn test_barrier() {
        let mut network = LocalNetwork::new().with_peer(42);
        assert_eq!(
            network.exchange(0, vec![]),
            Err(NetworkError::NotReady)
        );
        assert!(matches!(
            network.wait_until_ready(41),
            Err(NetworkError::ChecksumMismatch { peer: 0, local: 41, remote: 42 })
        ));
        assert!(!network.is_ready());
        network.wait_until_ready(42).unwrap();
        assert!(network.is_ready());
    }

    #[test]
    fn test_injected_commands_are_delivered() {
        let mut world = testing::world();
        let mut network = LocalNetwork::new();
        network.wait_until_ready(0).unwrap();
        let blue = worker(&world, 1);
        network.inject(NetworkCommand::new(1, blue, move_type(&world), GridPos::new(20, 20)));
        let applied = Commander::new()
            .update_network(&mut world, &mut network)
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert!(world.unit_by_id(blue).unwrap().any_command());
    }
}
