//! The game map: static heightfield, resource deposits and cell occupancy.
//!
//! Cells are stored row-major. Each cell has one occupancy slot per
//! [`Field`], holding a weak [`UnitReference`] to the unit standing there.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::GridPos;
use crate::tech::{Field, ResourceTypeId, TechTree};
use crate::unit::UnitReference;

/// A harvestable deposit sitting on a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDeposit {
    /// Resource type.
    pub resource: ResourceTypeId,
    /// Remaining amount.
    pub amount: i32,
}

impl ResourceDeposit {
    /// Take up to `requested` from the deposit and return what was taken.
    pub fn extract(&mut self, requested: i32) -> i32 {
        let extracted = requested.min(self.amount).max(0);
        self.amount -= extracted;
        extracted
    }

    /// Whether nothing is left.
    #[must_use]
    pub const fn is_depleted(&self) -> bool {
        self.amount <= 0
    }
}

/// One map cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Terrain height.
    pub height: i32,
    /// Occupant per field slot.
    pub units: [Option<UnitReference>; 2],
    /// Deposit on this cell.
    pub deposit: Option<ResourceDeposit>,
}

/// The map grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Map {
    /// Map name, part of the session checksum.
    pub name: String,
    width: i32,
    height: i32,
    cells: Vec<Cell>,
    start_locations: Vec<GridPos>,
    initial_deposits: Vec<(GridPos, ResourceDeposit)>,
}

/// The authored part of a map: everything play leaves untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapContent<'a> {
    /// Map name.
    pub name: &'a str,
    /// Width in cells.
    pub width: i32,
    /// Height in cells.
    pub height: i32,
    /// Row-major terrain heights.
    pub heights: Vec<i32>,
    /// Deposits as loaded.
    pub deposits: &'a [(GridPos, ResourceDeposit)],
    /// Start locations in slot order.
    pub start_locations: &'a [GridPos],
}

impl Map {
    /// Flat map with no deposits.
    #[must_use]
    pub fn flat(name: impl Into<String>, width: i32, height: i32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            name: name.into(),
            width,
            height,
            cells: vec![Cell::default(); (width * height) as usize],
            start_locations: Vec::new(),
            initial_deposits: Vec::new(),
        }
    }

    /// Parse a RON [`MapData`] and resolve it against a tech tree.
    pub fn from_ron_str(ron: &str, tech: &TechTree) -> Result<Self> {
        let data: MapData = ron::from_str(ron)?;
        Self::from_data(&data, tech)
    }

    /// Build a map from its data description.
    pub fn from_data(data: &MapData, tech: &TechTree) -> Result<Self> {
        let mut map = Self::flat(data.name.clone(), data.width, data.height);
        if !data.heights.is_empty() {
            if data.heights.len() != map.cells.len() {
                return Err(GameError::InvalidContent(format!(
                    "map '{}' has {} heights for {} cells",
                    data.name,
                    data.heights.len(),
                    map.cells.len()
                )));
            }
            for (cell, &h) in map.cells.iter_mut().zip(&data.heights) {
                cell.height = h;
            }
        }
        for deposit in &data.deposits {
            let pos = GridPos::new(deposit.x, deposit.y);
            let resource = tech.resource_id(&deposit.resource)?;
            let cell = map.cell_mut(pos).ok_or_else(|| {
                GameError::InvalidContent(format!("deposit outside map at {pos:?}"))
            })?;
            cell.deposit = Some(ResourceDeposit {
                resource,
                amount: deposit.amount,
            });
        }
        for &(x, y) in &data.start_locations {
            let pos = GridPos::new(x, y);
            if !map.is_inside(pos) {
                return Err(GameError::InvalidContent(format!(
                    "start location outside map at {pos:?}"
                )));
            }
            map.start_locations.push(pos);
        }
        map.initial_deposits = map.deposits().collect();
        Ok(map)
    }

    /// Width in cells.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.width
    }

    /// Height in cells.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    /// Whether a position lies on the map.
    #[must_use]
    pub fn is_inside(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    fn index(&self, pos: GridPos) -> Option<usize> {
        self.is_inside(pos)
            .then(|| (pos.y * self.width + pos.x) as usize)
    }

    /// Cell at a position.
    #[must_use]
    pub fn cell(&self, pos: GridPos) -> Option<&Cell> {
        self.index(pos).map(|i| &self.cells[i])
    }

    /// Mutable cell at a position.
    pub fn cell_mut(&mut self, pos: GridPos) -> Option<&mut Cell> {
        self.index(pos).map(move |i| &mut self.cells[i])
    }

    /// Terrain height, 0 outside the map.
    #[must_use]
    pub fn height_at(&self, pos: GridPos) -> i32 {
        self.cell(pos).map_or(0, |c| c.height)
    }

    /// Start locations in slot order.
    #[must_use]
    pub fn start_locations(&self) -> &[GridPos] {
        &self.start_locations
    }

    /// Start location of a slot.
    #[must_use]
    pub fn start_location(&self, slot: usize) -> Option<GridPos> {
        self.start_locations.get(slot).copied()
    }

    /// Occupant of a cell in a field.
    #[must_use]
    pub fn unit_at(&self, pos: GridPos, field: Field) -> Option<UnitReference> {
        self.cell(pos).and_then(|c| c.units[field.slot()])
    }

    /// Deposit on a cell.
    #[must_use]
    pub fn deposit_at(&self, pos: GridPos) -> Option<ResourceDeposit> {
        self.cell(pos).and_then(|c| c.deposit)
    }

    /// Whether a single cell can take a unit of the field.
    #[must_use]
    pub fn is_free_cell(&self, pos: GridPos, field: Field) -> bool {
        self.cell(pos).is_some_and(|c| {
            c.units[field.slot()].is_none() && (field == Field::Air || c.deposit.is_none())
        })
    }

    fn footprint(pos: GridPos, size: i32) -> impl Iterator<Item = GridPos> {
        (0..size).flat_map(move |dy| (0..size).map(move |dx| GridPos::new(pos.x + dx, pos.y + dy)))
    }

    /// Whether a `size`x`size` footprint anchored at `pos` is free.
    #[must_use]
    pub fn is_free_cells(&self, pos: GridPos, size: i32, field: Field) -> bool {
        Self::footprint(pos, size).all(|p| self.is_free_cell(p, field))
    }

    /// Like [`Map::is_free_cells`] but cells held by `unit` count as free.
    #[must_use]
    pub fn is_free_cells_or_has_unit(
        &self,
        pos: GridPos,
        size: i32,
        field: Field,
        unit: UnitReference,
    ) -> bool {
        Self::footprint(pos, size).all(|p| {
            self.is_free_cell(p, field) || self.unit_at(p, field) == Some(unit)
        })
    }

    /// Claim a footprint for a unit.
    pub fn put_unit_cells(&mut self, unit: UnitReference, pos: GridPos, size: i32, field: Field) {
        for p in Self::footprint(pos, size) {
            if let Some(cell) = self.cell_mut(p) {
                cell.units[field.slot()] = Some(unit);
            }
        }
    }

    /// Release a footprint.
    pub fn clear_unit_cells(&mut self, pos: GridPos, size: i32, field: Field) {
        for p in Self::footprint(pos, size) {
            if let Some(cell) = self.cell_mut(p) {
                cell.units[field.slot()] = None;
            }
        }
    }

    /// Positions holding a deposit, in row-major order.
    pub fn deposits(&self) -> impl Iterator<Item = (GridPos, ResourceDeposit)> + '_ {
        self.cells.iter().enumerate().filter_map(move |(i, c)| {
            let i = i as i32;
            c.deposit
                .map(|d| (GridPos::new(i % self.width, i / self.width), d))
        })
    }

    /// Static content, independent of occupancy and harvesting.
    #[must_use]
    pub fn content(&self) -> MapContent<'_> {
        MapContent {
            name: &self.name,
            width: self.width,
            height: self.height,
            heights: self.cells.iter().map(|c| c.height).collect(),
            deposits: &self.initial_deposits,
            start_locations: &self.start_locations,
        }
    }

    /// Take from a deposit, clearing the cell once depleted.
    pub fn extract(&mut self, pos: GridPos, requested: i32) -> i32 {
        let Some(cell) = self.cell_mut(pos) else {
            return 0;
        };
        let Some(deposit) = cell.deposit.as_mut() else {
            return 0;
        };
        let taken = deposit.extract(requested);
        if deposit.is_depleted() {
            cell.deposit = None;
        }
        taken
    }
}

/// RON description of a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapData {
    /// Map name.
    pub name: String,
    /// Width in cells.
    pub width: i32,
    /// Height in cells.
    pub height: i32,
    /// Row-major heights; empty for a flat map.
    #[serde(default)]
    pub heights: Vec<i32>,
    /// Resource deposits.
    #[serde(default)]
    pub deposits: Vec<DepositDef>,
    /// Start locations per slot.
    #[serde(default)]
    pub start_locations: Vec<(i32, i32)>,
}

/// A deposit in [`MapData`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositDef {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Resource name.
    pub resource: String,
    /// Initial amount.
    pub amount: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn unit(id: u32) -> UnitReference {
        UnitReference::new(0, id)
    }

    #[test]
    fn test_bounds() {
        let map = Map::flat("t", 4, 3);
        assert!(map.is_inside(GridPos::new(0, 0)));
        assert!(map.is_inside(GridPos::new(3, 2)));
        assert!(!map.is_inside(GridPos::new(4, 0)));
        assert!(!map.is_inside(GridPos::new(0, -1)));
        assert!(map.cell(GridPos::new(9, 9)).is_none());
    }

    #[test]
    fn test_put_and_clear_footprint() {
        let mut map = Map::flat("t", 8, 8);
        let pos = GridPos::new(2, 2);
        map.put_unit_cells(unit(1), pos, 2, Field::Land);
        assert!(!map.is_free_cells(GridPos::new(3, 3), 1, Field::Land));
        assert!(map.is_free_cells(GridPos::new(3, 3), 1, Field::Air));
        assert!(map.is_free_cells_or_has_unit(pos, 2, Field::Land, unit(1)));
        assert!(!map.is_free_cells_or_has_unit(pos, 2, Field::Land, unit(2)));
        map.clear_unit_cells(pos, 2, Field::Land);
        assert!(map.is_free_cells(pos, 2, Field::Land));
    }

    #[test]
    fn test_footprint_outside_map_is_not_free() {
        let map = Map::flat("t", 4, 4);
        assert!(!map.is_free_cells(GridPos::new(3, 3), 2, Field::Land));
    }

    #[test]
    fn test_deposit_blocks_land_and_depletes() {
        let mut map = Map::flat("t", 4, 4);
        let pos = GridPos::new(1, 1);
        map.cell_mut(pos).unwrap().deposit = Some(ResourceDeposit {
            resource: ResourceTypeId(0),
            amount: 7,
        });
        assert!(!map.is_free_cell(pos, Field::Land));
        assert!(map.is_free_cell(pos, Field::Air));
        assert_eq!(map.extract(pos, 5), 5);
        assert_eq!(map.extract(pos, 5), 2);
        assert!(map.deposit_at(pos).is_none());
        assert!(map.is_free_cell(pos, Field::Land));
    }

    #[test]
    fn test_content_ignores_play() {
        let tech = testing::tech();
        let pristine = testing::map(&tech);
        let mut played = pristine.clone();
        let pos = GridPos::new(9, 4);
        assert_eq!(played.extract(pos, 400), 400);
        played.put_unit_cells(unit(1), GridPos::new(2, 2), 1, Field::Land);

        assert_ne!(played, pristine);
        assert_eq!(played.content(), pristine.content());
        assert_eq!(played.content().deposits.len(), 6);
        assert_ne!(Map::flat("twin_fields", 32, 32).content(), pristine.content());
    }
}
