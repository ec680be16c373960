//! Motion and sensor models.

mod laser;
mod odom;

pub use laser::{LaserData, LaserModel, LaserModelConfig, LaserModelType};
pub use odom::{OdomData, OdomModel, OdomModelType};
