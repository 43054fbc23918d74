//! Commands, admission results, the command-class behavior table and the
//! per-unit command queue.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::math::GridPos;
use crate::tech::{CommandClass, CommandType, CommandTypeId, SkillClass, UnitTypeId};
use crate::unit::UnitReference;

/// Outcome of admitting a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandResult {
    /// Admitted and committed.
    Success,
    /// A prerequisite unit or upgrade is missing.
    FailRequirements,
    /// The faction cannot afford the cost.
    FailResources,
    /// Structurally invalid: wrong unit state, bad target, repeated upgrade.
    FailUndefined,
}

impl CommandResult {
    /// Whether the command was admitted.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Fixed behavior of a command class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassBehavior {
    /// Class described.
    pub class: CommandClass,
    /// Whether the command stacks behind the current one instead of replacing it.
    pub queuable: bool,
    /// Skill executed while the command is in effect at its target.
    pub skill: SkillClass,
    /// Whether the unit walks to the target before executing.
    pub approaches: bool,
}

const BEHAVIORS: [ClassBehavior; 9] = [
    ClassBehavior {
        class: CommandClass::Stop,
        queuable: false,
        skill: SkillClass::Stop,
        approaches: false,
    },
    ClassBehavior {
        class: CommandClass::Move,
        queuable: false,
        skill: SkillClass::Move,
        approaches: true,
    },
    ClassBehavior {
        class: CommandClass::Attack,
        queuable: false,
        skill: SkillClass::Attack,
        approaches: true,
    },
    ClassBehavior {
        class: CommandClass::Build,
        queuable: false,
        skill: SkillClass::Build,
        approaches: true,
    },
    ClassBehavior {
        class: CommandClass::Harvest,
        queuable: false,
        skill: SkillClass::Harvest,
        approaches: true,
    },
    ClassBehavior {
        class: CommandClass::Repair,
        queuable: false,
        skill: SkillClass::Repair,
        approaches: true,
    },
    ClassBehavior {
        class: CommandClass::Produce,
        queuable: true,
        skill: SkillClass::Produce,
        approaches: false,
    },
    ClassBehavior {
        class: CommandClass::Upgrade,
        queuable: true,
        skill: SkillClass::Upgrade,
        approaches: false,
    },
    ClassBehavior {
        class: CommandClass::Morph,
        queuable: false,
        skill: SkillClass::Morph,
        approaches: false,
    },
];

impl ClassBehavior {
    /// Behavior row of a class.
    #[must_use]
    pub fn of(class: CommandClass) -> &'static Self {
        let row = match class {
            CommandClass::Stop => 0,
            CommandClass::Move => 1,
            CommandClass::Attack => 2,
            CommandClass::Build => 3,
            CommandClass::Harvest => 4,
            CommandClass::Repair => 5,
            CommandClass::Produce => 6,
            CommandClass::Upgrade => 7,
            CommandClass::Morph => 8,
        };
        &BEHAVIORS[row]
    }
}

/// A player order bound to one unit.
///
/// Fields are fixed at construction; a queued command is never edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    command_type: CommandTypeId,
    class: CommandClass,
    pos: GridPos,
    unit: Option<UnitReference>,
    unit_type: Option<UnitTypeId>,
}

impl Command {
    /// Command targeting a position.
    #[must_use]
    pub fn new(command_type: &CommandType, pos: GridPos) -> Self {
        Self {
            command_type: command_type.id,
            class: command_type.class,
            pos,
            unit: None,
            unit_type: None,
        }
    }

    /// Command targeting a unit; `pos` is the target's cell at issue time.
    #[must_use]
    pub fn targeting(command_type: &CommandType, unit: UnitReference, pos: GridPos) -> Self {
        Self {
            unit: Some(unit),
            ..Self::new(command_type, pos)
        }
    }

    /// Build command for a unit type at a position.
    #[must_use]
    pub fn build(command_type: &CommandType, pos: GridPos, unit_type: UnitTypeId) -> Self {
        Self {
            unit_type: Some(unit_type),
            ..Self::new(command_type, pos)
        }
    }

    /// Command type id.
    #[must_use]
    pub const fn command_type(&self) -> CommandTypeId {
        self.command_type
    }

    /// Behavior class.
    #[must_use]
    pub const fn class(&self) -> CommandClass {
        self.class
    }

    /// Behavior row.
    #[must_use]
    pub fn behavior(&self) -> &'static ClassBehavior {
        ClassBehavior::of(self.class)
    }

    /// Target position.
    #[must_use]
    pub const fn pos(&self) -> GridPos {
        self.pos
    }

    /// Target unit.
    #[must_use]
    pub const fn unit(&self) -> Option<UnitReference> {
        self.unit
    }

    /// Unit type to build.
    #[must_use]
    pub const fn unit_type(&self) -> Option<UnitTypeId> {
        self.unit_type
    }
}

/// FIFO of admitted commands with O(1) pops at both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandQueue {
    commands: VecDeque<Command>,
}

impl CommandQueue {
    /// Create an empty command queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
        }
    }

    /// Append at the tail.
    pub fn push_back(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    /// Command in effect.
    #[must_use]
    pub fn front(&self) -> Option<&Command> {
        self.commands.front()
    }

    /// Most recently admitted command.
    #[must_use]
    pub fn back(&self) -> Option<&Command> {
        self.commands.back()
    }

    /// Remove the head (completed command).
    pub fn pop_front(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    /// Remove the tail (cancelled command).
    pub fn pop_back(&mut self) -> Option<Command> {
        self.commands.pop_back()
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Get the number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Commands from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tech::Requirements;

    fn command_type(class: CommandClass) -> CommandType {
        CommandType {
            id: CommandTypeId(0),
            name: "c".into(),
            class,
            requirements: Requirements::default(),
            produced: None,
            buildable: vec![],
            harvest: None,
            repairable: vec![],
            morph_discount: 0,
        }
    }

    #[test]
    fn test_behavior_table_rows_match_classes() {
        for class in [
            CommandClass::Stop,
            CommandClass::Move,
            CommandClass::Attack,
            CommandClass::Build,
            CommandClass::Harvest,
            CommandClass::Repair,
            CommandClass::Produce,
            CommandClass::Upgrade,
            CommandClass::Morph,
        ] {
            assert_eq!(ClassBehavior::of(class).class, class);
        }
    }

    #[test]
    fn test_only_production_classes_queue() {
        assert!(ClassBehavior::of(CommandClass::Produce).queuable);
        assert!(ClassBehavior::of(CommandClass::Upgrade).queuable);
        assert!(!ClassBehavior::of(CommandClass::Move).queuable);
        assert!(!ClassBehavior::of(CommandClass::Build).queuable);
    }

    #[test]
    fn test_queue_fifo_and_tail_pop() {
        let ct = command_type(CommandClass::Produce);
        let mut q = CommandQueue::new();
        q.push_back(Command::new(&ct, GridPos::new(1, 0)));
        q.push_back(Command::new(&ct, GridPos::new(2, 0)));
        q.push_back(Command::new(&ct, GridPos::new(3, 0)));
        assert_eq!(q.front().map(Command::pos), Some(GridPos::new(1, 0)));
        assert_eq!(q.pop_back().map(|c| c.pos()), Some(GridPos::new(3, 0)));
        assert_eq!(q.pop_front().map(|c| c.pos()), Some(GridPos::new(1, 0)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_build_command_carries_unit_type() {
        let ct = command_type(CommandClass::Build);
        let c = Command::build(&ct, GridPos::new(4, 4), UnitTypeId(2));
        assert_eq!(c.unit_type(), Some(UnitTypeId(2)));
        assert_eq!(c.class(), CommandClass::Build);
        assert!(c.unit().is_none());
    }
}
