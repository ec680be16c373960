//! Shared value types.

mod covariance;
mod msgs;
mod pose;

pub use covariance::Covariance2D;
pub use msgs::{LaserScan, OccupancyGridMsg, PoseWithCovariance};
pub use pose::Pose2D;
