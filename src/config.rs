//! Configuration for the localization engine.
//!
//! Every knob the coordinator exposes, with defaults matching long-standing
//! field-tested values. Loadable from TOML; unknown model strings fall back
//! with a warning, NaN initial pose entries are ignored in favor of the
//! defaults.

use serde::Deserialize;
use std::path::Path;

use crate::error::{AmclError, Result};
use crate::models::{LaserModelConfig, LaserModelType, OdomModelType};

/// Main configuration structure.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AmclConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub odom: OdomConfig,
    #[serde(default)]
    pub laser: LaserConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub frames: FrameConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub initial_pose: InitialPoseConfig,
}

/// Particle count adaptation.
#[derive(Clone, Debug, Deserialize)]
pub struct SamplingConfig {
    /// Lower bound on the particle count.
    #[serde(default = "default_min_particles")]
    pub min_particles: usize,

    /// Upper bound on the particle count.
    #[serde(default = "default_max_particles")]
    pub max_particles: usize,

    /// KLD error bound ε.
    #[serde(default = "default_kld_err")]
    pub kld_err: f64,

    /// Upper standard-normal quantile for the KLD bound.
    #[serde(default = "default_kld_z")]
    pub kld_z: f64,

    /// PRNG seed for deterministic runs (0 = seed from the OS).
    #[serde(default)]
    pub rng_seed: u64,
}

/// Odometry model selection and noise.
#[derive(Clone, Debug, Deserialize)]
pub struct OdomConfig {
    /// One of "diff", "diff-corrected", "omni", "omni-corrected".
    #[serde(default = "default_odom_model")]
    pub model_type: String,

    #[serde(default = "default_alpha")]
    pub alpha1: f64,
    #[serde(default = "default_alpha")]
    pub alpha2: f64,
    #[serde(default = "default_alpha")]
    pub alpha3: f64,
    #[serde(default = "default_alpha")]
    pub alpha4: f64,
    #[serde(default = "default_alpha")]
    pub alpha5: f64,
}

/// Laser model selection and mixture parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct LaserConfig {
    /// One of "beam", "likelihood_field", "likelihood_field_prob".
    #[serde(default = "default_laser_model")]
    pub model_type: String,

    /// Beams per scan actually evaluated.
    #[serde(default = "default_max_beams")]
    pub max_beams: usize,

    #[serde(default = "default_z_hit")]
    pub z_hit: f64,
    #[serde(default = "default_z_short")]
    pub z_short: f64,
    #[serde(default = "default_z_max")]
    pub z_max: f64,
    #[serde(default = "default_z_rand")]
    pub z_rand: f64,
    #[serde(default = "default_sigma_hit")]
    pub sigma_hit: f64,
    #[serde(default = "default_lambda_short")]
    pub lambda_short: f64,

    /// Cap of the cached obstacle-distance field, meters.
    #[serde(default = "default_likelihood_max_dist")]
    pub likelihood_max_dist: f64,

    /// Override of the scan's own minimum range; <= 0 keeps the scan's value.
    #[serde(default = "default_range_override")]
    pub min_range: f64,

    /// Override of the scan's own maximum range; <= 0 keeps the scan's value.
    #[serde(default = "default_range_override")]
    pub max_range: f64,

    #[serde(default)]
    pub do_beamskip: bool,
    #[serde(default = "default_beam_skip_distance")]
    pub beam_skip_distance: f64,
    #[serde(default = "default_beam_skip_threshold")]
    pub beam_skip_threshold: f64,
    #[serde(default = "default_beam_skip_error_threshold")]
    pub beam_skip_error_threshold: f64,
}

/// Update gating and resampling cadence.
#[derive(Clone, Debug, Deserialize)]
pub struct UpdateConfig {
    /// Translation (either axis) that triggers a filter update, meters.
    #[serde(default = "default_update_min_d")]
    pub update_min_d: f64,

    /// Rotation that triggers a filter update, radians.
    #[serde(default = "default_update_min_a")]
    pub update_min_a: f64,

    /// Resample every this many sensor updates.
    #[serde(default = "default_resample_interval")]
    pub resample_interval: usize,

    /// Long-term weight average gain for recovery injection.
    #[serde(default = "default_recovery_alpha_slow")]
    pub recovery_alpha_slow: f64,

    /// Short-term weight average gain for recovery injection.
    #[serde(default = "default_recovery_alpha_fast")]
    pub recovery_alpha_fast: f64,
}

/// Coordinate frame names.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameConfig {
    #[serde(default = "default_odom_frame")]
    pub odom_frame_id: String,
    #[serde(default = "default_base_frame")]
    pub base_frame_id: String,
    #[serde(default = "default_global_frame")]
    pub global_frame_id: String,
}

/// Transform broadcasting and persistence cadence.
#[derive(Clone, Debug, Deserialize)]
pub struct BroadcastConfig {
    /// How long a published map→odom transform stays valid, seconds.
    #[serde(default = "default_transform_tolerance")]
    pub transform_tolerance: f64,

    /// Whether to broadcast the map→odom transform at all.
    #[serde(default = "default_tf_broadcast")]
    pub tf_broadcast: bool,

    /// Period between last-known-pose writes, seconds; <= 0 disables.
    #[serde(default = "default_save_pose_period")]
    pub save_pose_period: f64,

    /// Ignore map messages after the first one.
    #[serde(default)]
    pub first_map_only: bool,
}

/// Pose the filter starts from when no initial-pose message has arrived.
#[derive(Clone, Debug, Deserialize)]
pub struct InitialPoseConfig {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub yaw: f64,
    #[serde(default = "default_initial_cov_xx")]
    pub cov_xx: f64,
    #[serde(default = "default_initial_cov_yy")]
    pub cov_yy: f64,
    #[serde(default = "default_initial_cov_aa")]
    pub cov_aa: f64,
}

impl AmclConfig {
    /// Load from a TOML file and sanitize.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AmclError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse from a TOML string and sanitize.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: AmclConfig = toml::from_str(content)?;
        config.sanitize();
        Ok(config)
    }

    /// Enforce internal consistency: particle bounds ordered, NaN initial
    /// pose entries replaced by defaults.
    pub fn sanitize(&mut self) {
        if self.sampling.min_particles > self.sampling.max_particles {
            log::warn!(
                "min_particles ({}) > max_particles ({}); clamping max to min",
                self.sampling.min_particles,
                self.sampling.max_particles
            );
            self.sampling.max_particles = self.sampling.min_particles;
        }
        if self.update.resample_interval == 0 {
            log::warn!("resample_interval must be at least 1; clamping");
            self.update.resample_interval = 1;
        }
        let defaults = InitialPoseConfig::default();
        let fields: [(&str, &mut f64, f64); 6] = [
            ("x", &mut self.initial_pose.x, defaults.x),
            ("y", &mut self.initial_pose.y, defaults.y),
            ("yaw", &mut self.initial_pose.yaw, defaults.yaw),
            ("cov_xx", &mut self.initial_pose.cov_xx, defaults.cov_xx),
            ("cov_yy", &mut self.initial_pose.cov_yy, defaults.cov_yy),
            ("cov_aa", &mut self.initial_pose.cov_aa, defaults.cov_aa),
        ];
        for (name, value, default) in fields {
            if value.is_nan() {
                log::warn!("ignoring NaN in initial pose {}", name);
                *value = default;
            }
        }
    }

    /// Parse the configured odometry model, warning and falling back to
    /// `diff` on an unknown string.
    pub fn odom_model_type(&self) -> OdomModelType {
        match self.odom.model_type.as_str() {
            "diff" => OdomModelType::Diff,
            "diff-corrected" => OdomModelType::DiffCorrected,
            "omni" => OdomModelType::Omni,
            "omni-corrected" => OdomModelType::OmniCorrected,
            other => {
                log::warn!("unknown odom model type \"{}\"; defaulting to diff", other);
                OdomModelType::Diff
            }
        }
    }

    /// Parse the configured laser model, warning and falling back to
    /// `likelihood_field` on an unknown string.
    pub fn laser_model_type(&self) -> LaserModelType {
        match self.laser.model_type.as_str() {
            "beam" => LaserModelType::Beam,
            "likelihood_field" => LaserModelType::LikelihoodField,
            "likelihood_field_prob" => LaserModelType::LikelihoodFieldProb,
            other => {
                log::warn!(
                    "unknown laser model type \"{}\"; defaulting to likelihood_field",
                    other
                );
                LaserModelType::LikelihoodField
            }
        }
    }

    /// Laser model parameters assembled for model construction.
    pub fn laser_model_config(&self) -> LaserModelConfig {
        LaserModelConfig {
            model: self.laser_model_type(),
            max_beams: self.laser.max_beams,
            z_hit: self.laser.z_hit,
            z_short: self.laser.z_short,
            z_max: self.laser.z_max,
            z_rand: self.laser.z_rand,
            sigma_hit: self.laser.sigma_hit,
            lambda_short: self.laser.lambda_short,
            do_beamskip: self.laser.do_beamskip,
            beam_skip_distance: self.laser.beam_skip_distance,
            beam_skip_threshold: self.laser.beam_skip_threshold,
            beam_skip_error_threshold: self.laser.beam_skip_error_threshold,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_particles: default_min_particles(),
            max_particles: default_max_particles(),
            kld_err: default_kld_err(),
            kld_z: default_kld_z(),
            rng_seed: 0,
        }
    }
}

impl Default for OdomConfig {
    fn default() -> Self {
        Self {
            model_type: default_odom_model(),
            alpha1: default_alpha(),
            alpha2: default_alpha(),
            alpha3: default_alpha(),
            alpha4: default_alpha(),
            alpha5: default_alpha(),
        }
    }
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            model_type: default_laser_model(),
            max_beams: default_max_beams(),
            z_hit: default_z_hit(),
            z_short: default_z_short(),
            z_max: default_z_max(),
            z_rand: default_z_rand(),
            sigma_hit: default_sigma_hit(),
            lambda_short: default_lambda_short(),
            likelihood_max_dist: default_likelihood_max_dist(),
            min_range: default_range_override(),
            max_range: default_range_override(),
            do_beamskip: false,
            beam_skip_distance: default_beam_skip_distance(),
            beam_skip_threshold: default_beam_skip_threshold(),
            beam_skip_error_threshold: default_beam_skip_error_threshold(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            update_min_d: default_update_min_d(),
            update_min_a: default_update_min_a(),
            resample_interval: default_resample_interval(),
            recovery_alpha_slow: default_recovery_alpha_slow(),
            recovery_alpha_fast: default_recovery_alpha_fast(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            odom_frame_id: default_odom_frame(),
            base_frame_id: default_base_frame(),
            global_frame_id: default_global_frame(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            transform_tolerance: default_transform_tolerance(),
            tf_broadcast: default_tf_broadcast(),
            save_pose_period: default_save_pose_period(),
            first_map_only: false,
        }
    }
}

impl Default for InitialPoseConfig {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            yaw: 0.0,
            cov_xx: default_initial_cov_xx(),
            cov_yy: default_initial_cov_yy(),
            cov_aa: default_initial_cov_aa(),
        }
    }
}

fn default_min_particles() -> usize {
    100
}
fn default_max_particles() -> usize {
    5000
}
fn default_kld_err() -> f64 {
    0.01
}
fn default_kld_z() -> f64 {
    0.99
}
fn default_odom_model() -> String {
    "diff".to_string()
}
fn default_alpha() -> f64 {
    0.2
}
fn default_laser_model() -> String {
    "likelihood_field".to_string()
}
fn default_max_beams() -> usize {
    30
}
fn default_z_hit() -> f64 {
    0.95
}
fn default_z_short() -> f64 {
    0.1
}
fn default_z_max() -> f64 {
    0.05
}
fn default_z_rand() -> f64 {
    0.05
}
fn default_sigma_hit() -> f64 {
    0.2
}
fn default_lambda_short() -> f64 {
    0.1
}
fn default_likelihood_max_dist() -> f64 {
    2.0
}
fn default_range_override() -> f64 {
    -1.0
}
fn default_beam_skip_distance() -> f64 {
    0.5
}
fn default_beam_skip_threshold() -> f64 {
    0.3
}
fn default_beam_skip_error_threshold() -> f64 {
    0.9
}
fn default_update_min_d() -> f64 {
    0.2
}
fn default_update_min_a() -> f64 {
    std::f64::consts::PI / 6.0
}
fn default_resample_interval() -> usize {
    2
}
fn default_recovery_alpha_slow() -> f64 {
    0.001
}
fn default_recovery_alpha_fast() -> f64 {
    0.1
}
fn default_odom_frame() -> String {
    "odom".to_string()
}
fn default_base_frame() -> String {
    "base_link".to_string()
}
fn default_global_frame() -> String {
    "map".to_string()
}
fn default_transform_tolerance() -> f64 {
    0.1
}
fn default_tf_broadcast() -> bool {
    true
}
fn default_save_pose_period() -> f64 {
    2.0
}
fn default_initial_cov_xx() -> f64 {
    0.5 * 0.5
}
fn default_initial_cov_yy() -> f64 {
    0.5 * 0.5
}
fn default_initial_cov_aa() -> f64 {
    (std::f64::consts::PI / 12.0) * (std::f64::consts::PI / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AmclConfig::default();
        assert_eq!(config.sampling.min_particles, 100);
        assert_eq!(config.sampling.max_particles, 5000);
        assert_eq!(config.laser.max_beams, 30);
        assert_eq!(config.odom_model_type(), OdomModelType::Diff);
        assert_eq!(config.laser_model_type(), LaserModelType::LikelihoodField);
        assert_eq!(config.frames.global_frame_id, "map");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AmclConfig::from_toml_str(
            r#"
            [sampling]
            min_particles = 50
            max_particles = 500
            rng_seed = 7

            [odom]
            model_type = "omni-corrected"
            alpha1 = 0.1

            [laser]
            model_type = "beam"
            max_beams = 60

            [update]
            resample_interval = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.sampling.min_particles, 50);
        assert_eq!(config.sampling.rng_seed, 7);
        assert_eq!(config.odom_model_type(), OdomModelType::OmniCorrected);
        assert_eq!(config.odom.alpha1, 0.1);
        // Unspecified fields keep defaults.
        assert_eq!(config.odom.alpha2, 0.2);
        assert_eq!(config.laser_model_type(), LaserModelType::Beam);
        assert_eq!(config.update.resample_interval, 1);
        assert_eq!(config.update.update_min_d, 0.2);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let mut config = AmclConfig::default();
        config.odom.model_type = "hovercraft".to_string();
        config.laser.model_type = "sonar".to_string();
        assert_eq!(config.odom_model_type(), OdomModelType::Diff);
        assert_eq!(config.laser_model_type(), LaserModelType::LikelihoodField);
    }

    #[test]
    fn test_sanitize_nan_initial_pose() {
        let mut config = AmclConfig::default();
        config.initial_pose.x = f64::NAN;
        config.initial_pose.cov_aa = f64::NAN;
        config.sanitize();
        assert_eq!(config.initial_pose.x, 0.0);
        assert!((config.initial_pose.cov_aa - default_initial_cov_aa()).abs() < 1e-12);
    }

    #[test]
    fn test_sanitize_particle_bounds() {
        let mut config = AmclConfig::default();
        config.sampling.min_particles = 800;
        config.sampling.max_particles = 200;
        config.sanitize();
        assert_eq!(config.sampling.max_particles, 800);
    }
}
