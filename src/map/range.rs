//! Ray casting for the beam sensor model.

use super::{CellState, OccupancyMap};

impl OccupancyMap {
    /// Expected range along a bearing: distance from (x, y) to the first
    /// non-free cell along `angle`, capped at `max_range`.
    ///
    /// Integer Bresenham over grid cells; unknown space terminates the ray
    /// the same way an obstacle does.
    pub fn calc_range(&self, x: f64, y: f64, angle: f64, max_range: f64) -> f64 {
        let (x0, y0) = self.world_to_grid(x, y);
        let (x1, y1) = self.world_to_grid(x + max_range * angle.cos(), y + max_range * angle.sin());

        let steep = (y1 - y0).abs() > (x1 - x0).abs();
        let (mut x0, mut y0, x1, y1) = if steep {
            (y0, x0, y1, x1)
        } else {
            (x0, y0, x1, y1)
        };

        let deltax = (x1 - x0).abs();
        let deltay = (y1 - y0).abs();
        let mut error = 0;
        let deltaerr = deltay;

        let xstep = if x0 < x1 { 1 } else { -1 };
        let ystep = if y0 < y1 { 1 } else { -1 };

        let blocked = |i: i32, j: i32| -> bool {
            match self.state_at(i, j) {
                Some(CellState::Free) => false,
                _ => true,
            }
        };

        let hit_dist = |cx: i32, cy: i32| -> f64 {
            let (i, j) = if steep { (cy, cx) } else { (cx, cy) };
            let (wx, wy) = self.grid_to_world(i, j);
            ((wx - x).powi(2) + (wy - y).powi(2)).sqrt()
        };

        let (i, j) = if steep { (y0, x0) } else { (x0, y0) };
        if blocked(i, j) {
            return hit_dist(x0, y0);
        }

        while x0 != x1 {
            x0 += xstep;
            error += deltaerr;
            if 2 * error >= deltax {
                y0 += ystep;
                error -= deltax;
            }
            let (i, j) = if steep { (y0, x0) } else { (x0, y0) };
            if blocked(i, j) {
                return hit_dist(x0, y0);
            }
        }

        max_range
    }
}
