//! Ship occupancy geometry and per-board hit tracking
//!
//! The board is an N x N grid over a fixed physical extent. A physical
//! position is discretized by offsetting into the grid's local frame and
//! floor-dividing by the cell size. Straight hulls occupy a centered run of
//! cells along the axis their rotation indicates; the gunship's irregular
//! hull is a fixed 3-cell run with its own orientation rule.

use std::collections::HashSet;
use std::f32::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

/// Physical position or rotation triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A discretized grid square
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub col: i32,
    pub row: i32,
}

impl Cell {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    /// Store key for this cell
    pub fn key(&self) -> String {
        format!("{}_{}", self.col, self.row)
    }
}

/// The five hull classes of a fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipClass {
    Carrier,
    Destroyer,
    Drone,
    Gunship,
    Submarine,
}

impl ShipClass {
    /// The full fleet every player places
    pub const FLEET: [ShipClass; 5] = [
        ShipClass::Carrier,
        ShipClass::Destroyer,
        ShipClass::Drone,
        ShipClass::Gunship,
        ShipClass::Submarine,
    ];

    /// Number of grid cells this hull covers
    pub const fn cells(self) -> u32 {
        match self {
            ShipClass::Carrier => 5,
            ShipClass::Destroyer => 4,
            ShipClass::Drone => 3,
            ShipClass::Gunship => 3,
            ShipClass::Submarine => 2,
        }
    }

    /// The gunship uses the irregular-hull orientation rule
    pub const fn is_bent(self) -> bool {
        matches!(self, ShipClass::Gunship)
    }

    /// Total defended cells across the fleet; the win threshold
    pub const fn total_defended_cells() -> u32 {
        let mut sum = 0;
        let mut i = 0;
        while i < Self::FLEET.len() {
            sum += Self::FLEET[i].cells();
            i += 1;
        }
        sum
    }
}

/// Axis a hull runs along once placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// East-west: column varies, row fixed
    Cols,
    /// North-south: row varies, column fixed
    Rows,
}

/// A placed ship, as persisted in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipPlacement {
    pub shape: ShipClass,
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl ShipPlacement {
    /// Orientation from the rotation about the vertical axis.
    ///
    /// Straight hulls run east-west when the rotation's cosine is near
    /// zero; the gunship runs north-south only when its rotation sits
    /// within 0.1 rad of a quarter turn.
    pub fn axis(&self) -> Axis {
        let rot = self.rotation.y;
        if self.shape.is_bent() {
            let near = |target: f32| (rot.abs() - target).abs() < 0.1;
            if near(FRAC_PI_2) || near(3.0 * FRAC_PI_2) {
                Axis::Rows
            } else {
                Axis::Cols
            }
        } else if rot.cos().abs() < 0.5 {
            Axis::Cols
        } else {
            Axis::Rows
        }
    }
}

/// A board's grid at a fixed x offset
#[derive(Debug, Clone, Copy)]
pub struct BoardFrame {
    pub extent: f32,
    pub divisions: u32,
    pub offset_x: f32,
}

impl BoardFrame {
    pub fn new(extent: f32, divisions: u32, offset_x: f32) -> Self {
        Self {
            extent,
            divisions,
            offset_x,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.extent / self.divisions as f32
    }

    /// Quantize a physical position into a grid cell
    pub fn discretize(&self, position: Vec3) -> Cell {
        let cell = self.cell_size();
        let half = self.extent / 2.0;
        Cell {
            col: ((position.x - self.offset_x + half) / cell).floor() as i32,
            row: ((position.z + half) / cell).floor() as i32,
        }
    }

    /// The set of cells a placed ship covers: a centered run of
    /// `shape.cells()` cells along the ship's axis
    pub fn occupied_cells(&self, ship: &ShipPlacement) -> Vec<Cell> {
        let anchor = self.discretize(ship.position);
        let len = ship.shape.cells() as i32;
        let half = len / 2;

        (0..len)
            .map(|i| match ship.axis() {
                Axis::Cols => Cell::new(anchor.col - half + i, anchor.row),
                Axis::Rows => Cell::new(anchor.col, anchor.row - half + i),
            })
            .collect()
    }

    /// Whether an attack at `cell` lands on this ship
    pub fn hit(&self, ship: &ShipPlacement, cell: Cell) -> bool {
        self.occupied_cells(ship).contains(&cell)
    }
}

/// Outcome of resolving one coordinate against a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellResolution {
    /// False when this coordinate was already resolved
    pub newly_resolved: bool,
    pub hit: bool,
    /// Set when this resolution completed a hull
    pub sunk: Option<ShipClass>,
}

/// Tracks resolved coordinates and per-ship hits for one board.
///
/// The board-wide resolved set guarantees a coordinate is scored at most
/// once, no matter how many times its record is re-delivered.
pub struct BoardTracker {
    frame: BoardFrame,
    ships: Vec<ShipPlacement>,
    hits: Vec<HashSet<Cell>>,
    resolved: HashSet<Cell>,
}

impl BoardTracker {
    pub fn new(frame: BoardFrame) -> Self {
        Self {
            frame,
            ships: Vec::new(),
            hits: Vec::new(),
            resolved: HashSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ships.is_empty()
    }

    /// Install a fleet and replay already-resolved coordinates against it.
    ///
    /// Ships may arrive after attack records (a rejoin replays the attack
    /// subtree first), so hulls completed by the replay are reported here.
    pub fn set_ships(&mut self, ships: Vec<ShipPlacement>) -> Vec<ShipClass> {
        self.hits = vec![HashSet::new(); ships.len()];
        self.ships = ships;

        let resolved: Vec<Cell> = self.resolved.iter().copied().collect();
        let mut sunk = Vec::new();
        for cell in resolved {
            if let Some(shape) = self.score(cell) {
                sunk.push(shape);
            }
        }
        sunk
    }

    /// Whether any ship covers `cell`
    pub fn is_ship_at(&self, cell: Cell) -> bool {
        self.ships.iter().any(|ship| self.frame.hit(ship, cell))
    }

    /// Resolve one coordinate, idempotently
    pub fn resolve(&mut self, cell: Cell) -> CellResolution {
        if !self.resolved.insert(cell) {
            return CellResolution {
                newly_resolved: false,
                hit: self.is_ship_at(cell),
                sunk: None,
            };
        }

        let hit = self.is_ship_at(cell);
        let sunk = self.score(cell);
        CellResolution {
            newly_resolved: true,
            hit,
            sunk,
        }
    }

    /// Credit `cell` to the first ship covering it; returns the hull class
    /// when this hit completes it
    fn score(&mut self, cell: Cell) -> Option<ShipClass> {
        for (idx, ship) in self.ships.iter().enumerate() {
            if self.frame.hit(ship, cell) {
                let hits = &mut self.hits[idx];
                if hits.insert(cell) && hits.len() as u32 == ship.shape.cells() {
                    return Some(ship.shape);
                }
                return None;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> BoardFrame {
        BoardFrame::new(400.0, 8, 0.0)
    }

    /// Center of a cell in the canonical frame
    fn cell_center(col: i32, row: i32) -> Vec3 {
        Vec3::new(col as f32 * 50.0 - 175.0, 0.0, row as f32 * 50.0 - 175.0)
    }

    fn place(shape: ShipClass, col: i32, row: i32, rot_y: f32) -> ShipPlacement {
        ShipPlacement {
            shape,
            position: cell_center(col, row),
            rotation: Vec3::new(0.0, rot_y, 0.0),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }

    #[test]
    fn fleet_defends_seventeen_cells() {
        assert_eq!(ShipClass::total_defended_cells(), 17);
    }

    #[test]
    fn discretize_maps_extent_to_grid() {
        let f = frame();
        assert_eq!(f.discretize(Vec3::new(-175.0, 0.0, -175.0)), Cell::new(0, 0));
        assert_eq!(f.discretize(Vec3::new(175.0, 0.0, 175.0)), Cell::new(7, 7));
        assert_eq!(f.discretize(Vec3::new(-199.9, 0.0, 199.9)), Cell::new(0, 7));
    }

    #[test]
    fn discretize_respects_board_offset() {
        let enemy = BoardFrame::new(400.0, 8, -330.0);
        assert_eq!(
            enemy.discretize(Vec3::new(-330.0 - 175.0, 0.0, -175.0)),
            Cell::new(0, 0)
        );
    }

    #[test]
    fn carrier_occupies_five_contiguous_columns() {
        let ship = place(ShipClass::Carrier, 3, 0, FRAC_PI_2);
        let cells = frame().occupied_cells(&ship);
        assert_eq!(cells.len(), 5);
        for (i, cell) in cells.iter().enumerate() {
            assert_eq!(*cell, Cell::new(1 + i as i32, 0));
        }
    }

    #[test]
    fn destroyer_run_is_centered_with_floor_offset() {
        let ship = place(ShipClass::Destroyer, 4, 2, FRAC_PI_2);
        let cells = frame().occupied_cells(&ship);
        assert_eq!(
            cells,
            vec![
                Cell::new(2, 2),
                Cell::new(3, 2),
                Cell::new(4, 2),
                Cell::new(5, 2)
            ]
        );
    }

    #[test]
    fn submarine_runs_along_rows_when_unrotated() {
        let ship = place(ShipClass::Submarine, 7, 1, 0.0);
        let cells = frame().occupied_cells(&ship);
        assert_eq!(cells, vec![Cell::new(7, 0), Cell::new(7, 1)]);
    }

    #[test]
    fn gunship_orientation_uses_quarter_turn_tolerance() {
        let upright = place(ShipClass::Gunship, 4, 4, 0.0);
        assert_eq!(upright.axis(), Axis::Cols);

        let quarter = place(ShipClass::Gunship, 4, 4, FRAC_PI_2);
        assert_eq!(quarter.axis(), Axis::Rows);

        let nearly = place(ShipClass::Gunship, 4, 4, FRAC_PI_2 + 0.05);
        assert_eq!(nearly.axis(), Axis::Rows);

        let negative = place(ShipClass::Gunship, 4, 4, -FRAC_PI_2);
        assert_eq!(negative.axis(), Axis::Rows);
    }

    #[test]
    fn gunship_occupies_fixed_three_cell_run() {
        let ship = place(ShipClass::Gunship, 4, 4, FRAC_PI_2);
        let cells = frame().occupied_cells(&ship);
        assert_eq!(
            cells,
            vec![Cell::new(4, 3), Cell::new(4, 4), Cell::new(4, 5)]
        );
    }

    #[test]
    fn hit_predicate_matches_occupancy() {
        let ship = place(ShipClass::Drone, 5, 4, FRAC_PI_2);
        let f = frame();
        assert!(f.hit(&ship, Cell::new(4, 4)));
        assert!(f.hit(&ship, Cell::new(6, 4)));
        assert!(!f.hit(&ship, Cell::new(7, 4)));
        assert!(!f.hit(&ship, Cell::new(5, 5)));
    }

    #[test]
    fn tracker_resolves_each_coordinate_once() {
        let mut tracker = BoardTracker::new(frame());
        tracker.set_ships(vec![place(ShipClass::Submarine, 0, 1, 0.0)]);

        let first = tracker.resolve(Cell::new(0, 0));
        assert!(first.newly_resolved);
        assert!(first.hit);
        assert_eq!(first.sunk, None);

        let again = tracker.resolve(Cell::new(0, 0));
        assert!(!again.newly_resolved);
        assert_eq!(again.sunk, None);
    }

    #[test]
    fn ship_sinks_when_all_cells_hit() {
        let mut tracker = BoardTracker::new(frame());
        tracker.set_ships(vec![place(ShipClass::Submarine, 0, 1, 0.0)]);

        assert_eq!(tracker.resolve(Cell::new(0, 0)).sunk, None);
        assert_eq!(
            tracker.resolve(Cell::new(0, 1)).sunk,
            Some(ShipClass::Submarine)
        );
        // further resolutions cannot re-sink
        assert_eq!(tracker.resolve(Cell::new(0, 1)).sunk, None);
    }

    #[test]
    fn misses_do_not_accumulate_hits() {
        let mut tracker = BoardTracker::new(frame());
        tracker.set_ships(vec![place(ShipClass::Submarine, 0, 1, 0.0)]);

        let miss = tracker.resolve(Cell::new(5, 5));
        assert!(miss.newly_resolved);
        assert!(!miss.hit);
        assert_eq!(miss.sunk, None);
    }

    #[test]
    fn late_fleet_install_replays_resolved_cells() {
        let mut tracker = BoardTracker::new(frame());
        // records replayed before the fleet subscription delivered
        tracker.resolve(Cell::new(0, 0));
        tracker.resolve(Cell::new(0, 1));

        let sunk = tracker.set_ships(vec![place(ShipClass::Submarine, 0, 1, 0.0)]);
        assert_eq!(sunk, vec![ShipClass::Submarine]);
    }
}
