//! Obstacle-distance field.
//!
//! Multi-source brushfire from every occupied cell. The wavefront expands
//! over the 8-connected neighborhood but each cell is scored with the exact
//! Euclidean distance to the source obstacle that reached it, so distances
//! are monotone along any shortest path from an obstacle.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::{CellState, OccupancyMap};

struct Wave {
    dist: f64,
    i: i32,
    j: i32,
    src_i: i32,
    src_j: i32,
}

impl PartialEq for Wave {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}

impl Eq for Wave {}

impl PartialOrd for Wave {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Wave {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on distance; ties broken arbitrarily but totally.
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
    }
}

const NEIGHBORS: [(i32, i32); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
];

impl OccupancyMap {
    /// Recompute the distance field from the current occupancy states.
    pub(super) fn update_occ_dist(&mut self) {
        let max_occ_dist = self.max_occ_dist();
        let scale = self.scale();
        let (width, height) = (self.width(), self.height());

        let mut heap: BinaryHeap<Wave> = BinaryHeap::new();

        for j in 0..height {
            for i in 0..width {
                let idx = self.index(i, j);
                let cell = &mut self.cells_mut()[idx];
                if cell.state == CellState::Occupied {
                    cell.occ_dist = 0.0;
                    heap.push(Wave {
                        dist: 0.0,
                        i,
                        j,
                        src_i: i,
                        src_j: j,
                    });
                } else {
                    cell.occ_dist = max_occ_dist;
                }
            }
        }

        while let Some(wave) = heap.pop() {
            let idx = self.index(wave.i, wave.j);
            if wave.dist > self.cells()[idx].occ_dist {
                continue;
            }
            for &(di, dj) in &NEIGHBORS {
                let (ni, nj) = (wave.i + di, wave.j + dj);
                if !self.valid(ni, nj) {
                    continue;
                }
                let dx = (ni - wave.src_i) as f64;
                let dy = (nj - wave.src_j) as f64;
                let dist = scale * (dx * dx + dy * dy).sqrt();
                if dist >= max_occ_dist {
                    continue;
                }
                let nidx = self.index(ni, nj);
                if dist < self.cells()[nidx].occ_dist {
                    self.cells_mut()[nidx].occ_dist = dist;
                    heap.push(Wave {
                        dist,
                        i: ni,
                        j: nj,
                        src_i: wave.src_i,
                        src_j: wave.src_j,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::grid_msg;
    use super::super::OccupancyMap;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_occupied_cells_have_zero_distance() {
        let mut data = vec![0i8; 25];
        data[12] = 100; // center of 5x5
        let map = OccupancyMap::from_msg(&grid_msg(5, 5, 1.0, data), 10.0);
        assert_eq!(map.occ_dist_at(2, 2), 0.0);
    }

    #[test]
    fn test_distance_is_euclidean_to_nearest() {
        let mut data = vec![0i8; 49];
        data[3 * 7 + 3] = 100; // single obstacle at (3, 3) of 7x7
        let map = OccupancyMap::from_msg(&grid_msg(7, 7, 0.5, data), 10.0);

        assert_abs_diff_eq!(map.occ_dist_at(4, 3), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(map.occ_dist_at(4, 4), 0.5 * 2f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(map.occ_dist_at(5, 3), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(map.occ_dist_at(6, 4), 0.5 * 10f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_distance_capped_at_max() {
        let mut data = vec![0i8; 21 * 21];
        data[0] = 100;
        let map = OccupancyMap::from_msg(&grid_msg(21, 21, 1.0, data), 3.0);
        // Far corner is well beyond the cap.
        assert_eq!(map.occ_dist_at(20, 20), 3.0);
        for j in 0..21 {
            for i in 0..21 {
                let d = map.occ_dist_at(i, j);
                assert!((0.0..=3.0).contains(&d), "distance out of range: {}", d);
            }
        }
    }

    #[test]
    fn test_distance_monotone_from_obstacle() {
        let mut data = vec![0i8; 81];
        data[4 * 9 + 4] = 100;
        let map = OccupancyMap::from_msg(&grid_msg(9, 9, 1.0, data), 20.0);
        // Walking straight away from the obstacle never decreases distance.
        let mut prev = 0.0;
        for i in 4..9 {
            let d = map.occ_dist_at(i, 4);
            assert!(d >= prev, "distance regressed: {} < {}", d, prev);
            prev = d;
        }
    }

    #[test]
    fn test_nearest_of_two_obstacles_wins() {
        let mut data = vec![0i8; 100];
        data[0] = 100; // (0, 0)
        data[9] = 100; // (9, 0)
        let map = OccupancyMap::from_msg(&grid_msg(10, 10, 1.0, data), 20.0);
        assert_abs_diff_eq!(map.occ_dist_at(2, 0), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(map.occ_dist_at(7, 0), 2.0, epsilon = 1e-12);
    }
}
