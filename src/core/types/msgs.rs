//! Input message mirrors.
//!
//! The middleware transport is an external collaborator; these types mirror
//! exactly the data the coordinator consumes from it. Timestamps are
//! microseconds since an arbitrary epoch.

use super::Pose2D;
use serde::{Deserialize, Serialize};

/// A single planar laser scan as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    /// Sensor frame the ranges are expressed in.
    pub frame_id: String,
    /// Acquisition timestamp in microseconds.
    pub stamp_us: u64,
    /// Bearing of the first beam, radians, in the sensor frame.
    pub angle_min: f64,
    /// Angular step between consecutive beams, radians.
    pub angle_increment: f64,
    /// Minimum valid range in meters.
    pub range_min: f64,
    /// Maximum valid range in meters.
    pub range_max: f64,
    /// Range measurements in meters.
    pub ranges: Vec<f64>,
}

impl LaserScan {
    /// Number of beams.
    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the scan carries no beams.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// An occupancy grid as delivered by the map source.
///
/// Cell values follow the common convention: 0 = free, 100 = occupied,
/// anything else = unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGridMsg {
    /// Grid width in cells.
    pub width: usize,
    /// Grid height in cells.
    pub height: usize,
    /// Meters per cell.
    pub resolution: f64,
    /// World X of cell (0, 0).
    pub origin_x: f64,
    /// World Y of cell (0, 0).
    pub origin_y: f64,
    /// Yaw of the grid in the world frame (ignored; maps are axis-aligned).
    pub origin_yaw: f64,
    /// Row-major cell values.
    pub data: Vec<i8>,
}

/// An initial pose estimate with full 6x6 covariance.
///
/// Only the planar block is consumed: positions (0,0)..(1,1) and yaw (5,5).
#[derive(Debug, Clone, PartialEq)]
pub struct PoseWithCovariance {
    /// Frame the pose is expressed in; must equal the global frame.
    pub frame_id: String,
    /// Timestamp of the estimate in microseconds.
    pub stamp_us: u64,
    /// The pose estimate.
    pub pose: Pose2D,
    /// Row-major 6x6 covariance (x, y, z, roll, pitch, yaw).
    pub covariance: [f64; 36],
}

impl PoseWithCovariance {
    /// Build with a diagonal planar covariance.
    pub fn with_diagonal(
        frame_id: &str,
        stamp_us: u64,
        pose: Pose2D,
        var_x: f64,
        var_y: f64,
        var_yaw: f64,
    ) -> Self {
        let mut covariance = [0.0; 36];
        covariance[0] = var_x;
        covariance[6 + 1] = var_y;
        covariance[6 * 5 + 5] = var_yaw;
        Self {
            frame_id: frame_id.to_string(),
            stamp_us,
            pose,
            covariance,
        }
    }
}
