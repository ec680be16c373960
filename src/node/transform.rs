//! Transform-tree seam.
//!
//! The transform tree lives outside this crate; the coordinator only needs
//! planar parent←child lookups at a timestamp. Lookups may fail, and a
//! failure never mutates the filter.

use thiserror::Error;

use crate::core::types::Pose2D;

/// Transform lookup failure.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("transform {parent} <- {child} unavailable: {reason}")]
    Unavailable {
        parent: String,
        child: String,
        reason: String,
    },

    #[error("transform {parent} <- {child} timed out")]
    Timeout { parent: String, child: String },
}

/// Provider of rigid planar transforms between named frames over time.
pub trait TransformSource {
    /// Pose of `child` in `parent` at `time_us`. Implementations may
    /// interpolate or return the latest available transform.
    fn lookup(&self, parent: &str, child: &str, time_us: u64)
        -> Result<Pose2D, TransformError>;
}

