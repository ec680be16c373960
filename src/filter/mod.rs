//! The adaptive particle filter core.

mod filter;
mod kdtree;
mod sample;

pub use filter::{FilterConfig, ParticleFilter};
pub use kdtree::KdTree;
pub use sample::{Cluster, PoseGenerator, Sample, SampleSet, UniformFreeSpace};
