//! DishaAMCL - Adaptive Monte-Carlo localization for planar robots.
//!
//! Tracks the 2D pose (x, y, yaw) of a mobile robot on a known static
//! occupancy map by fusing wheel odometry with planar laser scans in an
//! adaptive particle filter.
//!
//! # Architecture
//!
//! The crate is organized into 5 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     node/                           │  ← Coordinator
//! │   (scan/map/pose handlers, transform broadcasting)  │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    models/                          │  ← Motion + sensor models
//! │        (diff/omni odometry, beam/likelihood)        │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    filter/                          │  ← Particle filter
//! │       (KLD sizing, resampling, clustering)          │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     map/                            │  ← Occupancy map
//! │        (distance field, ray casting)                │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Event flow
//!
//! On each scan the coordinator queries the base pose from the transform
//! provider, checks motion against the update thresholds, and when they are
//! exceeded runs the motion model, the sensor model, and (on its cadence)
//! the adaptive resampler. Cluster statistics yield the best hypothesis,
//! from which the map→odom correction transform is derived and broadcast.
//!
//! The middleware transport, the transform tree, and persistence are
//! external collaborators reached through the [`node::TransformSource`] and
//! [`node::AmclSink`] seams.
//!
//! # Determinism
//!
//! All randomness flows through one seedable PRNG owned by the filter. With
//! a fixed `rng_seed`, the same map, and the same event sequence, particle
//! sets are bit-identical across runs.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Occupancy map (depends on core)
// ============================================================================
pub mod map;

// ============================================================================
// Layer 3: Particle filter (depends on core, map)
// ============================================================================
pub mod filter;

// ============================================================================
// Layer 4: Motion and sensor models (depends on core, map, filter)
// ============================================================================
pub mod models;

// ============================================================================
// Layer 5: Coordinator (depends on all layers)
// ============================================================================
pub mod node;

pub mod config;
pub mod error;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

pub use crate::core::math;
pub use crate::core::types::{
    Covariance2D, LaserScan, OccupancyGridMsg, Pose2D, PoseWithCovariance,
};
pub use config::AmclConfig;
pub use error::{AmclError, Result};
pub use filter::{
    Cluster, FilterConfig, KdTree, ParticleFilter, PoseGenerator, Sample, SampleSet,
    UniformFreeSpace,
};
pub use map::{CellState, OccupancyMap};
pub use models::{
    LaserData, LaserModel, LaserModelConfig, LaserModelType, OdomData, OdomModel, OdomModelType,
};
pub use node::{
    AmclNode, AmclSink, NullSink, PoseEstimate, SavedPose, TransformError, TransformSource,
    TransformStamped,
};
