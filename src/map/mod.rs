//! Static occupancy map with a cached obstacle-distance field.
//!
//! The map is built once per received grid and immutable afterwards. Sensor
//! models hold an `Arc` to it; installing a new map means building a new
//! `OccupancyMap` and rebuilding every dependent model before the old one
//! drops.

mod distance;
mod range;

use crate::core::types::OccupancyGridMsg;

/// Ternary occupancy state of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Known traversable space.
    Free,
    /// No information.
    Unknown,
    /// Known obstacle.
    Occupied,
}

impl CellState {
    fn from_msg_value(value: i8) -> Self {
        match value {
            0 => CellState::Free,
            100 => CellState::Occupied,
            _ => CellState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Cell {
    pub state: CellState,
    /// Distance to the nearest occupied cell, meters, capped at max_occ_dist.
    pub occ_dist: f64,
}

/// Static 2D occupancy grid with precomputed distance-to-nearest-obstacle.
///
/// The world origin sits at the grid center: grid index (i, j) maps to world
/// `(origin_x + (i - width/2) * scale, origin_y + (j - height/2) * scale)`.
#[derive(Debug)]
pub struct OccupancyMap {
    width: i32,
    height: i32,
    /// Meters per cell.
    scale: f64,
    origin_x: f64,
    origin_y: f64,
    cells: Vec<Cell>,
    max_occ_dist: f64,
    /// Grid indices of every free cell, for uniform pose generation.
    free_cells: Vec<(i32, i32)>,
}

impl OccupancyMap {
    /// Build a map from a received occupancy grid.
    ///
    /// Copies the occupancy states, computes the obstacle-distance field
    /// (capped at `max_occ_dist`), and enumerates free cells.
    pub fn from_msg(msg: &OccupancyGridMsg, max_occ_dist: f64) -> Self {
        let width = msg.width as i32;
        let height = msg.height as i32;
        // Shift the message's corner origin to the grid center. Integer
        // halving matches the grid index convention below.
        let origin_x = msg.origin_x + (width / 2) as f64 * msg.resolution;
        let origin_y = msg.origin_y + (height / 2) as f64 * msg.resolution;

        // A short data array leaves the tail unknown rather than panicking.
        let cell_count = (width as usize) * (height as usize);
        if msg.data.len() != cell_count {
            log::warn!(
                "occupancy grid carries {} cells for a {}x{} map",
                msg.data.len(),
                width,
                height
            );
        }
        let cells: Vec<Cell> = (0..cell_count)
            .map(|idx| Cell {
                state: msg
                    .data
                    .get(idx)
                    .map(|&v| CellState::from_msg_value(v))
                    .unwrap_or(CellState::Unknown),
                occ_dist: max_occ_dist,
            })
            .collect();

        let mut map = Self {
            width,
            height,
            scale: msg.resolution,
            origin_x,
            origin_y,
            cells,
            max_occ_dist,
            free_cells: Vec::new(),
        };

        let free_cells: Vec<(i32, i32)> = (0..height)
            .flat_map(|j| (0..width).map(move |i| (i, j)))
            .filter(|&(i, j)| map.state_at(i, j) == Some(CellState::Free))
            .collect();
        map.free_cells = free_cells;

        map.update_occ_dist();
        map
    }

    /// Grid width in cells.
    #[inline]
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Grid height in cells.
    #[inline]
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Meters per cell.
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Distance cap of the obstacle-distance field, meters.
    #[inline]
    pub fn max_occ_dist(&self) -> f64 {
        self.max_occ_dist
    }

    /// Grid indices of all free cells.
    #[inline]
    pub fn free_cells(&self) -> &[(i32, i32)] {
        &self.free_cells
    }

    /// Whether (i, j) lies inside the grid.
    #[inline]
    pub fn valid(&self, i: i32, j: i32) -> bool {
        i >= 0 && i < self.width && j >= 0 && j < self.height
    }

    #[inline]
    pub(crate) fn index(&self, i: i32, j: i32) -> usize {
        (j * self.width + i) as usize
    }

    /// Occupancy state at (i, j), or `None` outside the grid.
    #[inline]
    pub fn state_at(&self, i: i32, j: i32) -> Option<CellState> {
        if self.valid(i, j) {
            Some(self.cells[self.index(i, j)].state)
        } else {
            None
        }
    }

    /// Obstacle distance at (i, j); the cap for out-of-grid queries.
    #[inline]
    pub fn occ_dist_at(&self, i: i32, j: i32) -> f64 {
        if self.valid(i, j) {
            self.cells[self.index(i, j)].occ_dist
        } else {
            self.max_occ_dist
        }
    }

    /// Obstacle distance at a world coordinate; the cap outside the grid.
    #[inline]
    pub fn occ_dist_at_world(&self, x: f64, y: f64) -> f64 {
        let (i, j) = self.world_to_grid(x, y);
        self.occ_dist_at(i, j)
    }

    /// World coordinate to grid index (may be outside the grid).
    #[inline]
    pub fn world_to_grid(&self, x: f64, y: f64) -> (i32, i32) {
        let i = ((x - self.origin_x) / self.scale + 0.5).floor() as i32 + self.width / 2;
        let j = ((y - self.origin_y) / self.scale + 0.5).floor() as i32 + self.height / 2;
        (i, j)
    }

    /// Grid index to the world coordinate of the cell center.
    #[inline]
    pub fn grid_to_world(&self, i: i32, j: i32) -> (f64, f64) {
        (
            self.origin_x + (i - self.width / 2) as f64 * self.scale,
            self.origin_y + (j - self.height / 2) as f64 * self.scale,
        )
    }

    pub(crate) fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut Vec<Cell> {
        &mut self.cells
    }
}
