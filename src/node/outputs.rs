//! Output seam toward the middleware.
//!
//! The coordinator pushes its results through [`AmclSink`]; the transport
//! behind it (topics, persistence) is an external collaborator.

use crate::core::types::{Covariance2D, Pose2D};

/// Best-hypothesis pose with covariance, in the global frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    pub frame_id: String,
    /// Scan timestamp the estimate corresponds to, microseconds.
    pub stamp_us: u64,
    pub pose: Pose2D,
    pub covariance: Covariance2D,
}

/// A broadcast planar transform with an expiration stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformStamped {
    pub parent_frame_id: String,
    pub child_frame_id: String,
    /// Stamp until which consumers may extrapolate this transform.
    pub expiration_us: u64,
    pub transform: Pose2D,
}

/// Snapshot persisted so the next run can resume near the last fix.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPose {
    pub pose: Pose2D,
    pub var_xx: f64,
    pub var_yy: f64,
    pub var_aa: f64,
}

/// Receiver of coordinator outputs.
pub trait AmclSink {
    /// Best-hypothesis pose after a filter update.
    fn pose_estimate(&mut self, estimate: &PoseEstimate);

    /// All poses of the current particle set, for visualization.
    fn particle_cloud(&mut self, poses: &[Pose2D]);

    /// The map→odom correction transform.
    fn map_to_odom(&mut self, transform: &TransformStamped);

    /// Periodic last-known-pose persistence.
    fn saved_pose(&mut self, saved: &SavedPose);
}

/// Sink that drops everything; useful when only filter state matters.
#[derive(Debug, Default)]
pub struct NullSink;

impl AmclSink for NullSink {
    fn pose_estimate(&mut self, _estimate: &PoseEstimate) {}
    fn particle_cloud(&mut self, _poses: &[Pose2D]) {}
    fn map_to_odom(&mut self, _transform: &TransformStamped) {}
    fn saved_pose(&mut self, _saved: &SavedPose) {}
}
