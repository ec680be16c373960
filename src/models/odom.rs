//! Odometry motion models.
//!
//! Applies a measured odometric delta to every particle with sampled noise.
//! Four variants: the classic differential decomposition into
//! rotate-translate-rotate, an omnidirectional form with strafe noise, and
//! the "corrected" versions of both, which treat the alpha expressions as
//! variances (the uncorrected ones feed them to the sampler as standard
//! deviations, which practitioners tune around).

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::core::math::angle_diff;
use crate::core::types::Pose2D;
use crate::filter::ParticleFilter;

/// Motion below this translation is treated as pure rotation.
const TRANS_EPS: f64 = 0.01;

/// Selected odometry noise model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OdomModelType {
    /// Differential drive, rotate-translate-rotate decomposition.
    #[default]
    Diff,
    /// Differential drive with variance-correct noise terms.
    DiffCorrected,
    /// Omnidirectional base with strafe noise.
    Omni,
    /// Omnidirectional base with variance-correct noise terms.
    OmniCorrected,
}

/// Odometry reading handed to the motion model.
#[derive(Debug, Clone, Copy)]
pub struct OdomData {
    /// Absolute pose in the odometry frame at this update.
    pub pose: Pose2D,
    /// Change since the previous filter update.
    pub delta: Pose2D,
}

/// Odometry motion model.
///
/// The alpha parameters scale noise with motion:
/// - `alpha1`: rotation noise from rotation
/// - `alpha2`: rotation noise from translation
/// - `alpha3`: translation noise from translation
/// - `alpha4`: translation noise from rotation
/// - `alpha5`: strafe noise from translation (omni models only)
#[derive(Debug, Clone, Copy)]
pub struct OdomModel {
    model: OdomModelType,
    alpha1: f64,
    alpha2: f64,
    alpha3: f64,
    alpha4: f64,
    alpha5: f64,
}

impl OdomModel {
    pub fn new(
        model: OdomModelType,
        alpha1: f64,
        alpha2: f64,
        alpha3: f64,
        alpha4: f64,
        alpha5: f64,
    ) -> Self {
        Self {
            model,
            alpha1,
            alpha2,
            alpha3,
            alpha4,
            alpha5,
        }
    }

    /// The configured variant.
    pub fn model_type(&self) -> OdomModelType {
        self.model
    }

    /// Perturb every particle by the odometric delta plus sampled noise.
    pub fn update_action(&self, filter: &mut ParticleFilter, data: &OdomData) {
        match self.model {
            OdomModelType::Diff | OdomModelType::DiffCorrected => {
                self.update_diff(filter, data, self.model == OdomModelType::DiffCorrected)
            }
            OdomModelType::Omni | OdomModelType::OmniCorrected => {
                self.update_omni(filter, data, self.model == OdomModelType::OmniCorrected)
            }
        }
    }

    fn update_diff(&self, filter: &mut ParticleFilter, data: &OdomData, corrected: bool) {
        // Pose before this delta was applied, in the odometry frame.
        let old_theta = data.pose.theta - data.delta.theta;

        let delta_trans = (data.delta.x * data.delta.x + data.delta.y * data.delta.y).sqrt();
        let delta_rot1 = if delta_trans < TRANS_EPS {
            // Pure rotation: fold everything into the second rotation.
            0.0
        } else {
            angle_diff(data.delta.y.atan2(data.delta.x), old_theta)
        };
        let delta_rot2 = angle_diff(data.delta.theta, delta_rot1);

        // Reversal-tolerant rotation magnitudes: driving backwards should
        // not count as a half-turn of rotation noise.
        let rot1_mag = angle_diff(delta_rot1, 0.0)
            .abs()
            .min(angle_diff(delta_rot1, std::f64::consts::PI).abs());
        let rot2_mag = angle_diff(delta_rot2, 0.0)
            .abs()
            .min(angle_diff(delta_rot2, std::f64::consts::PI).abs());

        let rot1_term = self.alpha1 * rot1_mag * rot1_mag + self.alpha2 * delta_trans * delta_trans;
        let trans_term = self.alpha3 * delta_trans * delta_trans
            + self.alpha4 * rot1_mag * rot1_mag
            + self.alpha4 * rot2_mag * rot2_mag;
        let rot2_term = self.alpha1 * rot2_mag * rot2_mag + self.alpha2 * delta_trans * delta_trans;

        let sigma_rot1 = if corrected { rot1_term.sqrt() } else { rot1_term };
        let sigma_trans = if corrected { trans_term.sqrt() } else { trans_term };
        let sigma_rot2 = if corrected { rot2_term.sqrt() } else { rot2_term };

        let (set, rng) = filter.samples_and_rng_mut();
        for sample in &mut set.samples {
            let rot1_hat = angle_diff(delta_rot1, gaussian(rng, sigma_rot1));
            let trans_hat = delta_trans - gaussian(rng, sigma_trans);
            let rot2_hat = angle_diff(delta_rot2, gaussian(rng, sigma_rot2));

            let heading = sample.pose.theta + rot1_hat;
            sample.pose = Pose2D::new(
                sample.pose.x + trans_hat * heading.cos(),
                sample.pose.y + trans_hat * heading.sin(),
                sample.pose.theta + rot1_hat + rot2_hat,
            );
        }
    }

    fn update_omni(&self, filter: &mut ParticleFilter, data: &OdomData, corrected: bool) {
        let old_theta = data.pose.theta - data.delta.theta;

        let delta_trans = (data.delta.x * data.delta.x + data.delta.y * data.delta.y).sqrt();
        let delta_rot = data.delta.theta;
        // Direction of travel relative to the previous heading.
        let heading_offset = if delta_trans < TRANS_EPS {
            0.0
        } else {
            angle_diff(data.delta.y.atan2(data.delta.x), old_theta)
        };

        let trans_term =
            self.alpha3 * delta_trans * delta_trans + self.alpha1 * delta_rot * delta_rot;
        let rot_term = self.alpha4 * delta_rot * delta_rot + self.alpha2 * delta_trans * delta_trans;
        let strafe_term =
            self.alpha1 * delta_rot * delta_rot + self.alpha5 * delta_trans * delta_trans;

        let sigma_trans = if corrected { trans_term.sqrt() } else { trans_term };
        let sigma_rot = if corrected { rot_term.sqrt() } else { rot_term };
        let sigma_strafe = if corrected { strafe_term.sqrt() } else { strafe_term };

        let (set, rng) = filter.samples_and_rng_mut();
        for sample in &mut set.samples {
            let bearing = sample.pose.theta + heading_offset;
            let trans_hat = delta_trans + gaussian(rng, sigma_trans);
            let rot_hat = delta_rot + gaussian(rng, sigma_rot);
            let strafe_hat = gaussian(rng, sigma_strafe);

            let (sin_b, cos_b) = bearing.sin_cos();
            sample.pose = Pose2D::new(
                sample.pose.x + trans_hat * cos_b - strafe_hat * sin_b,
                sample.pose.y + trans_hat * sin_b + strafe_hat * cos_b,
                sample.pose.theta + rot_hat,
            );
        }
    }
}

/// Zero-mean Gaussian draw; degenerate σ collapses to zero noise.
fn gaussian(rng: &mut StdRng, sigma: f64) -> f64 {
    if sigma <= 0.0 || !sigma.is_finite() {
        return 0.0;
    }
    Normal::new(0.0, sigma)
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}
