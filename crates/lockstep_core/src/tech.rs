//! Declarative game content: resources, skills, commands, unit and upgrade types.
//!
//! Content is authored in RON using names ([`TechTreeDef`]) and resolved once
//! into a [`TechTree`] where every cross reference is a typed index. The
//! simulation only ever sees the resolved form.
//!
//! # Example RON
//!
//! ```ron
//! TechTreeDef(
//!     name: "skirmish",
//!     resources: [ResourceDef(name: "gold", class: Tech)],
//!     upgrades: [],
//!     commands: [CommandTypeDef(name: "move", class: Move)],
//!     units: [
//!         UnitTypeDef(
//!             name: "worker",
//!             max_hp: 100,
//!             sight: 6,
//!             production_time: 20,
//!             costs: [("gold", 50)],
//!             skills: [
//!                 SkillType(class: Stop, speed: 100),
//!                 SkillType(class: Move, speed: 200),
//!                 SkillType(class: Die, speed: 100),
//!             ],
//!             commands: ["move"],
//!         ),
//!     ],
//! )
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

macro_rules! type_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u16);

        impl $name {
            /// Position of this type in its tech tree vector.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

type_id!(
    /// Index of a resource type.
    ResourceTypeId
);
type_id!(
    /// Index of a unit type.
    UnitTypeId
);
type_id!(
    /// Index of an upgrade type.
    UpgradeTypeId
);
type_id!(
    /// Index of a command type.
    CommandTypeId
);

// ============================================================================
// Resolved types
// ============================================================================

/// Accounting class of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceClass {
    /// Harvested from the map and kept in stores.
    Tech,
    /// Tileset-provided harvestable resource, stored like `Tech`.
    Tileset,
    /// Capacity-like resource held while a unit lives (housing, power).
    Static,
    /// Upkeep charged every `interval` seconds.
    Consumable,
}

/// A resource declared by the tech tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    /// Unique name.
    pub name: String,
    /// Accounting class.
    pub class: ResourceClass,
    /// Upkeep interval in seconds (consumables only).
    pub interval: u32,
}

impl ResourceType {
    /// Whether amounts of this resource are capped by faction storage.
    #[must_use]
    pub fn is_stored(&self) -> bool {
        self.class != ResourceClass::Static
    }
}

/// A signed resource amount. Negative costs are production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cost {
    /// Resource charged or produced.
    pub resource: ResourceTypeId,
    /// Signed amount.
    pub amount: i32,
}

/// Prerequisites of a producible or command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Unit types the faction must own in operative state.
    pub units: Vec<UnitTypeId>,
    /// Upgrades the faction must have completed.
    pub upgrades: Vec<UpgradeTypeId>,
}

/// Movement layer a unit occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Field {
    /// Ground layer, blocked by resources and land units.
    #[default]
    Land,
    /// Air layer.
    Air,
}

impl Field {
    /// Occupancy slot index in a map cell.
    #[must_use]
    pub const fn slot(self) -> usize {
        match self {
            Self::Land => 0,
            Self::Air => 1,
        }
    }
}

/// Closed set of low-level behaviors a unit can be executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SkillClass {
    /// Idle.
    Stop,
    /// Walking one cell per cycle.
    Move,
    /// Striking a target.
    Attack,
    /// Constructing a building.
    Build,
    /// Gathering from a deposit.
    Harvest,
    /// Restoring an ally's hit points.
    Repair,
    /// Under construction.
    BeBuilt,
    /// Training a unit.
    Produce,
    /// Researching an upgrade.
    Upgrade,
    /// Turning into another unit type.
    Morph,
    /// Dying; terminal.
    Die,
}

/// Attack parameters of an attack skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackStats {
    /// Damage before armor.
    pub strength: i32,
    /// Range in cells (Chebyshev).
    pub range: i32,
    /// Fields this attack can hit.
    #[serde(default = "default_attack_fields")]
    pub fields: Vec<Field>,
}

fn default_attack_fields() -> Vec<Field> {
    vec![Field::Land, Field::Air]
}

/// A skill a unit type can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillType {
    /// Skill class.
    pub class: SkillClass,
    /// Progress speed; 100 is one cycle per `SPEED_DIVIDER * UPDATE_FPS / 100` ticks.
    pub speed: i32,
    /// Animation speed.
    #[serde(default = "default_anim_speed")]
    pub anim_speed: i32,
    /// Energy charged per completed cycle.
    #[serde(default)]
    pub ep_cost: i32,
    /// Animation handle forwarded to renderers.
    #[serde(default)]
    pub animation: String,
    /// Attack data for attack skills.
    #[serde(default)]
    pub attack: Option<AttackStats>,
}

fn default_anim_speed() -> i32 {
    100
}

/// Closed set of command classes. Behavior per class lives in
/// [`crate::command::ClassBehavior`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommandClass {
    /// Halt.
    Stop,
    /// Walk to a position.
    Move,
    /// Attack a unit or attack-move to a position.
    Attack,
    /// Construct a unit type at a position.
    Build,
    /// Gather resources.
    Harvest,
    /// Repair an ally.
    Repair,
    /// Train a unit.
    Produce,
    /// Research an upgrade.
    Upgrade,
    /// Turn into another unit type.
    Morph,
}

/// What a producing command yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Produced {
    /// A unit type (Produce, Morph).
    Unit(UnitTypeId),
    /// An upgrade (Upgrade).
    Upgrade(UpgradeTypeId),
}

/// Harvest parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSpec {
    /// Resources this command can gather.
    pub resources: Vec<ResourceTypeId>,
    /// Load carried back per trip.
    pub max_load: i32,
    /// Harvest cycles per loaded unit.
    pub hits_per_unit: i32,
}

/// Declarative descriptor of an order a unit type accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandType {
    /// Own index.
    pub id: CommandTypeId,
    /// Unique name.
    pub name: String,
    /// Behavior class.
    pub class: CommandClass,
    /// Prerequisites to see and issue this command.
    pub requirements: Requirements,
    /// Output of Produce/Upgrade/Morph commands.
    pub produced: Option<Produced>,
    /// Buildable unit types (Build).
    pub buildable: Vec<UnitTypeId>,
    /// Harvest data (Harvest).
    pub harvest: Option<HarvestSpec>,
    /// Repairable unit types (Repair). Empty means any.
    pub repairable: Vec<UnitTypeId>,
    /// Percentage of the morph target's cost refunded on morph.
    pub morph_discount: i32,
}

impl CommandType {
    /// Whether this repair command can repair the given type.
    #[must_use]
    pub fn can_repair(&self, unit_type: UnitTypeId) -> bool {
        self.class == CommandClass::Repair
            && (self.repairable.is_empty() || self.repairable.contains(&unit_type))
    }

    /// Whether this harvest command can gather the resource.
    #[must_use]
    pub fn can_harvest(&self, resource: ResourceTypeId) -> bool {
        self.harvest
            .as_ref()
            .is_some_and(|h| h.resources.contains(&resource))
    }
}

/// Experience level reached through kills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Display name.
    pub name: String,
    /// Kills needed to reach this level.
    pub kills: u32,
}

/// Flat bonuses granted by an upgrade to affected unit types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeBonus {
    /// Max hit points.
    pub max_hp: i32,
    /// Max energy.
    pub max_ep: i32,
    /// Sight range.
    pub sight: i32,
    /// Attack strength.
    pub attack_strength: i32,
    /// Attack range.
    pub attack_range: i32,
    /// Armor.
    pub armor: i32,
    /// Move skill speed.
    pub move_speed: i32,
    /// Production skill speed.
    pub prod_speed: i32,
}

/// A unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitType {
    /// Own index.
    pub id: UnitTypeId,
    /// Unique name.
    pub name: String,
    /// Footprint edge length in cells.
    pub size: i32,
    /// Model height, used for render vectors.
    pub height: i32,
    /// Movement layer.
    pub field: Field,
    /// Base max hit points.
    pub max_hp: i32,
    /// Hit points regenerated per second.
    pub hp_regeneration: i32,
    /// Base max energy.
    pub max_ep: i32,
    /// Energy regenerated per second.
    pub ep_regeneration: i32,
    /// Sight radius in cells.
    pub sight: i32,
    /// Damage reduction.
    pub armor: i32,
    /// Production time in skill cycles.
    pub production_time: i32,
    /// Costs (negative = production).
    pub costs: Vec<Cost>,
    /// Storage capacity contributed while alive.
    pub stores: Vec<Cost>,
    /// Prerequisites.
    pub requirements: Requirements,
    /// Skills, at most one per class is used.
    pub skills: Vec<SkillType>,
    /// Accepted commands in UI order.
    pub commands: Vec<CommandTypeId>,
    /// Experience levels in ascending order.
    pub levels: Vec<Level>,
    /// Whether the unit catches fire when badly damaged.
    pub burnable: bool,
}

impl UnitType {
    /// First skill of a class.
    #[must_use]
    pub fn skill(&self, class: SkillClass) -> Option<&SkillType> {
        self.skills.iter().find(|s| s.class == class)
    }

    /// Whether the type has a skill of the class.
    #[must_use]
    pub fn has_skill(&self, class: SkillClass) -> bool {
        self.skill(class).is_some()
    }

    /// Whether the type accepts the command type.
    #[must_use]
    pub fn has_command(&self, command: CommandTypeId) -> bool {
        self.commands.contains(&command)
    }

    /// Total storage of a resource.
    #[must_use]
    pub fn store(&self, resource: ResourceTypeId) -> i32 {
        self.stores
            .iter()
            .filter(|s| s.resource == resource)
            .map(|s| s.amount)
            .sum()
    }
}

/// An upgrade type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeType {
    /// Own index.
    pub id: UpgradeTypeId,
    /// Unique name.
    pub name: String,
    /// Costs.
    pub costs: Vec<Cost>,
    /// Prerequisites.
    pub requirements: Requirements,
    /// Research time in skill cycles.
    pub production_time: i32,
    /// Unit types affected.
    pub effects: Vec<UnitTypeId>,
    /// Bonuses applied to affected types.
    pub bonus: UpgradeBonus,
}

impl UpgradeType {
    /// Whether the upgrade affects the unit type.
    #[must_use]
    pub fn is_affected(&self, unit_type: UnitTypeId) -> bool {
        self.effects.contains(&unit_type)
    }
}

/// Something with costs and requirements: a unit type or an upgrade.
pub trait Producible {
    /// Name for logs.
    fn name(&self) -> &str;
    /// Signed costs.
    fn costs(&self) -> &[Cost];
    /// Prerequisites.
    fn requirements(&self) -> &Requirements;
    /// Production time in skill cycles.
    fn production_time(&self) -> i32;
}

impl Producible for UnitType {
    fn name(&self) -> &str {
        &self.name
    }
    fn costs(&self) -> &[Cost] {
        &self.costs
    }
    fn requirements(&self) -> &Requirements {
        &self.requirements
    }
    fn production_time(&self) -> i32 {
        self.production_time
    }
}

impl Producible for UpgradeType {
    fn name(&self) -> &str {
        &self.name
    }
    fn costs(&self) -> &[Cost] {
        &self.costs
    }
    fn requirements(&self) -> &Requirements {
        &self.requirements
    }
    fn production_time(&self) -> i32 {
        self.production_time
    }
}

/// Resolved content. Ids handed out by a tree are always valid for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechTree {
    /// Content name, part of the session checksum.
    pub name: String,
    resources: Vec<ResourceType>,
    units: Vec<UnitType>,
    upgrades: Vec<UpgradeType>,
    commands: Vec<CommandType>,
}

impl TechTree {
    /// Parse and resolve a RON tech tree.
    pub fn from_ron_str(ron: &str) -> Result<Self> {
        let def: TechTreeDef = ron::from_str(ron)?;
        Self::from_def(def)
    }

    /// Resolve a name-based definition.
    pub fn from_def(def: TechTreeDef) -> Result<Self> {
        Resolver::new(&def)?.resolve(def)
    }

    /// All resource types in declared order.
    #[must_use]
    pub fn resources(&self) -> &[ResourceType] {
        &self.resources
    }

    /// All unit types.
    #[must_use]
    pub fn unit_types(&self) -> &[UnitType] {
        &self.units
    }

    /// All upgrade types.
    #[must_use]
    pub fn upgrade_types(&self) -> &[UpgradeType] {
        &self.upgrades
    }

    /// All command types.
    #[must_use]
    pub fn command_types(&self) -> &[CommandType] {
        &self.commands
    }

    /// Resource type by id.
    #[must_use]
    pub fn resource(&self, id: ResourceTypeId) -> &ResourceType {
        &self.resources[id.index()]
    }

    /// Unit type by id.
    #[must_use]
    pub fn unit_type(&self, id: UnitTypeId) -> &UnitType {
        &self.units[id.index()]
    }

    /// Upgrade type by id.
    #[must_use]
    pub fn upgrade_type(&self, id: UpgradeTypeId) -> &UpgradeType {
        &self.upgrades[id.index()]
    }

    /// Command type by id.
    #[must_use]
    pub fn command_type(&self, id: CommandTypeId) -> &CommandType {
        &self.commands[id.index()]
    }

    /// The producible a command yields, if any.
    #[must_use]
    pub fn producible(&self, produced: Produced) -> &dyn Producible {
        match produced {
            Produced::Unit(id) => self.unit_type(id),
            Produced::Upgrade(id) => self.upgrade_type(id),
        }
    }

    /// Whether the unit type id belongs to this tree.
    #[must_use]
    pub fn contains_unit_type(&self, id: UnitTypeId) -> bool {
        id.index() < self.units.len()
    }

    /// Whether the command id belongs to this tree.
    #[must_use]
    pub fn contains_command_type(&self, id: CommandTypeId) -> bool {
        id.index() < self.commands.len()
    }

    /// Look up a resource by name.
    pub fn resource_id(&self, name: &str) -> Result<ResourceTypeId> {
        find_id(&self.resources, |r| r.name == name, "resource", name).map(ResourceTypeId)
    }

    /// Look up a unit type by name.
    pub fn unit_type_id(&self, name: &str) -> Result<UnitTypeId> {
        find_id(&self.units, |u| u.name == name, "unit", name).map(UnitTypeId)
    }

    /// Look up an upgrade by name.
    pub fn upgrade_type_id(&self, name: &str) -> Result<UpgradeTypeId> {
        find_id(&self.upgrades, |u| u.name == name, "upgrade", name).map(UpgradeTypeId)
    }

    /// Look up a command type by name.
    pub fn command_type_id(&self, name: &str) -> Result<CommandTypeId> {
        find_id(&self.commands, |c| c.name == name, "command", name).map(CommandTypeId)
    }
}

fn find_id<T>(
    items: &[T],
    pred: impl Fn(&T) -> bool,
    kind: &'static str,
    name: &str,
) -> Result<u16> {
    items
        .iter()
        .position(pred)
        .and_then(|i| u16::try_from(i).ok())
        .ok_or_else(|| GameError::UnknownType {
            kind,
            name: name.to_string(),
        })
}

// ============================================================================
// Name-based definitions
// ============================================================================

/// Name-based tech tree as authored in RON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechTreeDef {
    /// Content name.
    pub name: String,
    /// Resources in declared order.
    pub resources: Vec<ResourceDef>,
    /// Unit types.
    pub units: Vec<UnitTypeDef>,
    /// Upgrade types.
    #[serde(default)]
    pub upgrades: Vec<UpgradeDef>,
    /// Command types.
    pub commands: Vec<CommandTypeDef>,
}

/// Resource definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Unique name.
    pub name: String,
    /// Accounting class.
    pub class: ResourceClass,
    /// Upkeep interval in seconds.
    #[serde(default)]
    pub interval: u32,
}

/// Requirements by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsDef {
    /// Unit type names.
    pub units: Vec<String>,
    /// Upgrade names.
    pub upgrades: Vec<String>,
}

/// Unit type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitTypeDef {
    /// Unique name.
    pub name: String,
    /// Footprint size.
    #[serde(default = "one")]
    pub size: i32,
    /// Model height.
    #[serde(default = "one")]
    pub height: i32,
    /// Movement layer.
    #[serde(default)]
    pub field: Field,
    /// Max hit points.
    pub max_hp: i32,
    /// Hit point regeneration per second.
    #[serde(default)]
    pub hp_regeneration: i32,
    /// Max energy.
    #[serde(default)]
    pub max_ep: i32,
    /// Energy regeneration per second.
    #[serde(default)]
    pub ep_regeneration: i32,
    /// Sight radius.
    pub sight: i32,
    /// Armor.
    #[serde(default)]
    pub armor: i32,
    /// Production time in cycles.
    pub production_time: i32,
    /// Costs by resource name.
    #[serde(default)]
    pub costs: Vec<(String, i32)>,
    /// Storage by resource name.
    #[serde(default)]
    pub stores: Vec<(String, i32)>,
    /// Requirements.
    #[serde(default)]
    pub requirements: RequirementsDef,
    /// Skills.
    pub skills: Vec<SkillType>,
    /// Command names.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Levels.
    #[serde(default)]
    pub levels: Vec<Level>,
    /// Burnable property.
    #[serde(default)]
    pub burnable: bool,
}

fn one() -> i32 {
    1
}

/// Harvest definition by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestDef {
    /// Resource names.
    pub resources: Vec<String>,
    /// Load per trip.
    pub max_load: i32,
    /// Cycles per loaded unit.
    #[serde(default = "one")]
    pub hits_per_unit: i32,
}

/// Command type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTypeDef {
    /// Unique name.
    pub name: String,
    /// Class.
    pub class: CommandClass,
    /// Requirements.
    #[serde(default)]
    pub requirements: RequirementsDef,
    /// Produced unit (Produce, Morph) or upgrade (Upgrade) name.
    #[serde(default)]
    pub produced: Option<String>,
    /// Buildable unit names.
    #[serde(default)]
    pub buildable: Vec<String>,
    /// Harvest data.
    #[serde(default)]
    pub harvest: Option<HarvestDef>,
    /// Repairable unit names.
    #[serde(default)]
    pub repairable: Vec<String>,
    /// Morph refund percentage.
    #[serde(default)]
    pub morph_discount: i32,
}

/// Upgrade definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeDef {
    /// Unique name.
    pub name: String,
    /// Costs by resource name.
    #[serde(default)]
    pub costs: Vec<(String, i32)>,
    /// Requirements.
    #[serde(default)]
    pub requirements: RequirementsDef,
    /// Research time in cycles.
    pub production_time: i32,
    /// Affected unit names.
    pub effects: Vec<String>,
    /// Bonuses.
    #[serde(default)]
    pub bonus: UpgradeBonus,
}

struct Resolver {
    resources: BTreeMap<String, ResourceTypeId>,
    units: BTreeMap<String, UnitTypeId>,
    upgrades: BTreeMap<String, UpgradeTypeId>,
    commands: BTreeMap<String, CommandTypeId>,
}

fn index_names<I>(
    names: impl Iterator<Item = String>,
    kind: &str,
    wrap: impl Fn(u16) -> I,
) -> Result<BTreeMap<String, I>> {
    let mut map = BTreeMap::new();
    for (i, name) in names.enumerate() {
        let idx = u16::try_from(i)
            .map_err(|_| GameError::InvalidContent(format!("too many {kind} types")))?;
        if map.insert(name.clone(), wrap(idx)).is_some() {
            return Err(GameError::InvalidContent(format!(
                "duplicate {kind} name '{name}'"
            )));
        }
    }
    Ok(map)
}

fn lookup<I: Copy>(map: &BTreeMap<String, I>, kind: &'static str, name: &str) -> Result<I> {
    map.get(name).copied().ok_or_else(|| GameError::UnknownType {
        kind,
        name: name.to_string(),
    })
}

impl Resolver {
    fn new(def: &TechTreeDef) -> Result<Self> {
        Ok(Self {
            resources: index_names(
                def.resources.iter().map(|r| r.name.clone()),
                "resource",
                ResourceTypeId,
            )?,
            units: index_names(def.units.iter().map(|u| u.name.clone()), "unit", UnitTypeId)?,
            upgrades: index_names(
                def.upgrades.iter().map(|u| u.name.clone()),
                "upgrade",
                UpgradeTypeId,
            )?,
            commands: index_names(
                def.commands.iter().map(|c| c.name.clone()),
                "command",
                CommandTypeId,
            )?,
        })
    }

    fn costs(&self, costs: &[(String, i32)]) -> Result<Vec<Cost>> {
        costs
            .iter()
            .map(|(name, amount)| {
                Ok(Cost {
                    resource: lookup(&self.resources, "resource", name)?,
                    amount: *amount,
                })
            })
            .collect()
    }

    fn units(&self, names: &[String]) -> Result<Vec<UnitTypeId>> {
        names.iter().map(|n| lookup(&self.units, "unit", n)).collect()
    }

    fn requirements(&self, def: &RequirementsDef) -> Result<Requirements> {
        Ok(Requirements {
            units: self.units(&def.units)?,
            upgrades: def
                .upgrades
                .iter()
                .map(|n| lookup(&self.upgrades, "upgrade", n))
                .collect::<Result<_>>()?,
        })
    }

    fn command(&self, index: usize, def: &CommandTypeDef) -> Result<CommandType> {
        let produced = match (&def.produced, def.class) {
            (None, CommandClass::Produce | CommandClass::Upgrade | CommandClass::Morph) => {
                return Err(GameError::InvalidContent(format!(
                    "command '{}' produces nothing",
                    def.name
                )));
            }
            (None, _) => None,
            (Some(name), CommandClass::Upgrade) => {
                Some(Produced::Upgrade(lookup(&self.upgrades, "upgrade", name)?))
            }
            (Some(name), _) => Some(Produced::Unit(lookup(&self.units, "unit", name)?)),
        };
        let harvest = match &def.harvest {
            Some(h) => Some(HarvestSpec {
                resources: h
                    .resources
                    .iter()
                    .map(|n| lookup(&self.resources, "resource", n))
                    .collect::<Result<_>>()?,
                max_load: h.max_load,
                hits_per_unit: h.hits_per_unit.max(1),
            }),
            None if def.class == CommandClass::Harvest => {
                return Err(GameError::InvalidContent(format!(
                    "harvest command '{}' has no harvest data",
                    def.name
                )));
            }
            None => None,
        };
        Ok(CommandType {
            id: CommandTypeId(u16::try_from(index).unwrap_or(u16::MAX)),
            name: def.name.clone(),
            class: def.class,
            requirements: self.requirements(&def.requirements)?,
            produced,
            buildable: self.units(&def.buildable)?,
            harvest,
            repairable: self.units(&def.repairable)?,
            morph_discount: def.morph_discount.clamp(0, 100),
        })
    }

    fn resolve(self, def: TechTreeDef) -> Result<TechTree> {
        let resources = def
            .resources
            .iter()
            .map(|r| ResourceType {
                name: r.name.clone(),
                class: r.class,
                interval: r.interval.max(1),
            })
            .collect();

        let commands = def
            .commands
            .iter()
            .enumerate()
            .map(|(i, c)| self.command(i, c))
            .collect::<Result<Vec<_>>>()?;

        let mut units = Vec::with_capacity(def.units.len());
        for (i, u) in def.units.iter().enumerate() {
            let unit = UnitType {
                id: UnitTypeId(u16::try_from(i).unwrap_or(u16::MAX)),
                name: u.name.clone(),
                size: u.size.max(1),
                height: u.height,
                field: u.field,
                max_hp: u.max_hp,
                hp_regeneration: u.hp_regeneration,
                max_ep: u.max_ep,
                ep_regeneration: u.ep_regeneration,
                sight: u.sight,
                armor: u.armor,
                production_time: u.production_time.max(1),
                costs: self.costs(&u.costs)?,
                stores: self.costs(&u.stores)?,
                requirements: self.requirements(&u.requirements)?,
                skills: u.skills.clone(),
                commands: u
                    .commands
                    .iter()
                    .map(|n| lookup(&self.commands, "command", n))
                    .collect::<Result<_>>()?,
                levels: u.levels.clone(),
                burnable: u.burnable,
            };
            validate_unit(&unit, &commands)?;
            units.push(unit);
        }

        let upgrades = def
            .upgrades
            .iter()
            .enumerate()
            .map(|(i, u)| {
                Ok(UpgradeType {
                    id: UpgradeTypeId(u16::try_from(i).unwrap_or(u16::MAX)),
                    name: u.name.clone(),
                    costs: self.costs(&u.costs)?,
                    requirements: self.requirements(&u.requirements)?,
                    production_time: u.production_time.max(1),
                    effects: self.units(&u.effects)?,
                    bonus: u.bonus,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TechTree {
            name: def.name,
            resources,
            units,
            upgrades,
            commands,
        })
    }
}

fn validate_unit(unit: &UnitType, commands: &[CommandType]) -> Result<()> {
    for required in [SkillClass::Stop, SkillClass::Die] {
        if !unit.has_skill(required) {
            return Err(GameError::InvalidContent(format!(
                "unit '{}' lacks a {required:?} skill",
                unit.name
            )));
        }
    }
    for id in &unit.commands {
        let command = &commands[id.index()];
        let skill = crate::command::ClassBehavior::of(command.class).skill;
        if !unit.has_skill(skill) {
            return Err(GameError::InvalidContent(format!(
                "unit '{}' accepts '{}' but has no {skill:?} skill",
                unit.name, command.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"
TechTreeDef(
    name: "mini",
    resources: [
        ResourceDef(name: "gold", class: Tech),
        ResourceDef(name: "food", class: Consumable, interval: 10),
    ],
    upgrades: [
        UpgradeDef(name: "armor", costs: [("gold", 10)], production_time: 5, effects: ["worker"], bonus: (armor: 2)),
    ],
    commands: [
        CommandTypeDef(name: "move", class: Move),
        CommandTypeDef(name: "research", class: Upgrade, produced: Some("armor")),
    ],
    units: [
        UnitTypeDef(
            name: "worker",
            max_hp: 100,
            sight: 6,
            production_time: 20,
            costs: [("gold", 50), ("food", 1)],
            skills: [
                SkillType(class: Stop, speed: 100),
                SkillType(class: Move, speed: 200),
                SkillType(class: Upgrade, speed: 100),
                SkillType(class: Die, speed: 100),
            ],
            commands: ["move", "research"],
        ),
    ],
)
"#;

    #[test]
    fn test_resolve_names_to_ids() {
        let tree = TechTree::from_ron_str(TREE).expect("tree parses");
        let worker = tree.unit_type_id("worker").unwrap();
        let unit = tree.unit_type(worker);
        assert_eq!(unit.costs.len(), 2);
        assert_eq!(unit.costs[0].resource, tree.resource_id("gold").unwrap());
        let research = tree.command_type(tree.command_type_id("research").unwrap());
        assert_eq!(
            research.produced,
            Some(Produced::Upgrade(tree.upgrade_type_id("armor").unwrap()))
        );
        assert!(tree.upgrade_type(UpgradeTypeId(0)).is_affected(worker));
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let bad = TREE.replace("commands: [\"move\", \"research\"]", "commands: [\"fly\"]");
        let err = TechTree::from_ron_str(&bad).unwrap_err();
        assert!(matches!(err, GameError::UnknownType { kind: "command", .. }));
    }

    #[test]
    fn test_missing_die_skill_is_rejected() {
        let bad = TREE.replace("SkillType(class: Die, speed: 100),", "");
        let err = TechTree::from_ron_str(&bad).unwrap_err();
        assert!(matches!(err, GameError::InvalidContent(_)));
    }

    #[test]
    fn test_command_without_skill_is_rejected() {
        let bad = TREE.replace("SkillType(class: Upgrade, speed: 100),", "");
        assert!(TechTree::from_ron_str(&bad).is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let bad = TREE.replace(
            "ResourceDef(name: \"food\"",
            "ResourceDef(name: \"gold\"",
        );
        assert!(TechTree::from_ron_str(&bad).is_err());
    }
}
