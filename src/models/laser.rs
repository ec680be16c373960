//! Laser sensor models.
//!
//! Three ways to score a particle against a scan:
//! - `Beam`: ray-cast the expected range per beam and score the residual with
//!   the classic hit/short/max/rand mixture.
//! - `LikelihoodField`: project each beam endpoint into the map and score the
//!   cached distance to the nearest obstacle. No ray-casting.
//! - `LikelihoodFieldProb`: the same kernel in log space, with optional beam
//!   skipping that drops beams most particles disagree with.
//!
//! A model holds a shared handle to the installed map. Installing a new map
//! means constructing new models; the old map is freed once the last handle
//! drops.

use std::sync::Arc;

use crate::core::types::Pose2D;
use crate::filter::{ParticleFilter, SampleSet};
use crate::map::OccupancyMap;

/// Selected laser measurement model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaserModelType {
    /// Ray-casting beam model.
    Beam,
    /// Likelihood field over beam endpoints.
    #[default]
    LikelihoodField,
    /// Likelihood field with explicit probabilities and beam skipping.
    LikelihoodFieldProb,
}

/// Laser model parameters.
///
/// Mixture weights z_* should sum to about 1; sigma_hit is in meters.
#[derive(Debug, Clone, Copy)]
pub struct LaserModelConfig {
    pub model: LaserModelType,
    /// Beams per scan actually evaluated; the rest are subsampled away.
    pub max_beams: usize,
    pub z_hit: f64,
    pub z_short: f64,
    pub z_max: f64,
    pub z_rand: f64,
    pub sigma_hit: f64,
    pub lambda_short: f64,
    pub do_beamskip: bool,
    pub beam_skip_distance: f64,
    pub beam_skip_threshold: f64,
    pub beam_skip_error_threshold: f64,
}

impl Default for LaserModelConfig {
    fn default() -> Self {
        Self {
            model: LaserModelType::LikelihoodField,
            max_beams: 30,
            z_hit: 0.95,
            z_short: 0.1,
            z_max: 0.05,
            z_rand: 0.05,
            sigma_hit: 0.2,
            lambda_short: 0.1,
            do_beamskip: false,
            beam_skip_distance: 0.5,
            beam_skip_threshold: 0.3,
            beam_skip_error_threshold: 0.9,
        }
    }
}

/// One scan prepared for the filter: (range, bearing) pairs in the base
/// frame, plus the effective maximum range.
#[derive(Debug, Clone)]
pub struct LaserData {
    pub ranges: Vec<(f64, f64)>,
    pub range_max: f64,
}

/// A configured laser model bound to one sensor and one map.
#[derive(Debug, Clone)]
pub struct LaserModel {
    config: LaserModelConfig,
    map: Arc<OccupancyMap>,
    /// Sensor position in the base frame. The mounting yaw is folded into
    /// the per-beam bearings instead, so this stays at zero heading.
    laser_pose: Pose2D,
}

impl LaserModel {
    pub fn new(config: LaserModelConfig, map: Arc<OccupancyMap>) -> Self {
        if config.model == LaserModelType::LikelihoodFieldProb && config.do_beamskip {
            log::info!(
                "likelihood field model with beam skipping: distance {:.2} m, threshold {:.2}",
                config.beam_skip_distance,
                config.beam_skip_threshold
            );
        }
        Self {
            config,
            map,
            laser_pose: Pose2D::identity(),
        }
    }

    /// Record where this sensor sits on the robot.
    pub fn set_laser_pose(&mut self, pose: Pose2D) {
        self.laser_pose = pose;
    }

    /// The configured variant.
    pub fn model_type(&self) -> LaserModelType {
        self.config.model
    }

    /// Reweight every particle against `data` and refresh the filter's
    /// weight bookkeeping.
    pub fn update_sensor(&mut self, filter: &mut ParticleFilter, data: &LaserData) {
        let config = self.config;
        let map = Arc::clone(&self.map);
        let laser_pose = self.laser_pose;
        match config.model {
            LaserModelType::Beam => {
                filter.update_sensor(|set| beam_score(&config, &map, &laser_pose, set, data))
            }
            LaserModelType::LikelihoodField => filter.update_sensor(|set| {
                likelihood_field_score(&config, &map, &laser_pose, set, data)
            }),
            LaserModelType::LikelihoodFieldProb => filter.update_sensor(|set| {
                likelihood_field_prob_score(&config, &map, &laser_pose, set, data)
            }),
        }
    }
}

/// Subsampling stride so at most `max_beams` beams are evaluated.
fn beam_step(range_count: usize, max_beams: usize) -> usize {
    if max_beams > 1 && range_count > 1 {
        ((range_count - 1) / (max_beams - 1)).max(1)
    } else {
        1
    }
}

fn beam_score(
    config: &LaserModelConfig,
    map: &OccupancyMap,
    laser_pose: &Pose2D,
    set: &mut SampleSet,
    data: &LaserData,
) -> f64 {
    let step = beam_step(data.ranges.len(), config.max_beams);
    let denom = 2.0 * config.sigma_hit * config.sigma_hit;
    let mut total = 0.0;

    for sample in &mut set.samples {
        let pose = sample.pose.compose(laser_pose);
        let mut p = 1.0;

        for &(obs_range, obs_bearing) in data.ranges.iter().step_by(step) {
            let map_range =
                map.calc_range(pose.x, pose.y, pose.theta + obs_bearing, data.range_max);
            let z = obs_range - map_range;

            let mut pz = config.z_hit * (-z * z / denom).exp();
            if z < 0.0 {
                pz += config.z_short * config.lambda_short * (-config.lambda_short * obs_range).exp();
            }
            if obs_range >= data.range_max {
                pz += config.z_max;
            } else {
                pz += config.z_rand / data.range_max;
            }
            p *= pz;
        }

        sample.weight *= p;
        total += sample.weight;
    }
    total
}

/// Distance-field kernel shared by both likelihood-field variants.
#[inline]
fn endpoint_dist(
    map: &OccupancyMap,
    pose: &Pose2D,
    obs_range: f64,
    obs_bearing: f64,
) -> f64 {
    let angle = pose.theta + obs_bearing;
    let hx = pose.x + obs_range * angle.cos();
    let hy = pose.y + obs_range * angle.sin();
    map.occ_dist_at_world(hx, hy)
}

fn likelihood_field_score(
    config: &LaserModelConfig,
    map: &OccupancyMap,
    laser_pose: &Pose2D,
    set: &mut SampleSet,
    data: &LaserData,
) -> f64 {
    let step = beam_step(data.ranges.len(), config.max_beams);
    let denom = 2.0 * config.sigma_hit * config.sigma_hit;
    let z_rand_term = config.z_rand / data.range_max;
    let mut total = 0.0;

    for sample in &mut set.samples {
        let pose = sample.pose.compose(laser_pose);
        let mut p = 1.0;

        for &(obs_range, obs_bearing) in data.ranges.iter().step_by(step) {
            if !obs_range.is_finite() || obs_range >= data.range_max {
                continue;
            }
            let z = endpoint_dist(map, &pose, obs_range, obs_bearing);
            let pz = config.z_hit * (-z * z / denom).exp() + z_rand_term;
            p *= pz;
        }

        sample.weight *= p;
        total += sample.weight;
    }
    total
}

fn likelihood_field_prob_score(
    config: &LaserModelConfig,
    map: &OccupancyMap,
    laser_pose: &Pose2D,
    set: &mut SampleSet,
    data: &LaserData,
) -> f64 {
    let step = beam_step(data.ranges.len(), config.max_beams);
    let denom = 2.0 * config.sigma_hit * config.sigma_hit;
    let z_rand_term = config.z_rand / data.range_max;
    let sample_count = set.samples.len();

    let beams: Vec<(f64, f64)> = data.ranges.iter().copied().step_by(step).collect();
    let beam_count = beams.len();

    // Residuals per (sample, beam); NaN marks an unusable beam.
    let mut dists = vec![f64::NAN; sample_count * beam_count];
    let mut agree_count = vec![0usize; beam_count];

    for (s, sample) in set.samples.iter().enumerate() {
        let pose = sample.pose.compose(laser_pose);
        for (b, &(obs_range, obs_bearing)) in beams.iter().enumerate() {
            if !obs_range.is_finite() || obs_range >= data.range_max {
                continue;
            }
            let z = endpoint_dist(map, &pose, obs_range, obs_bearing);
            dists[s * beam_count + b] = z;
            if z < config.beam_skip_distance {
                agree_count[b] += 1;
            }
        }
    }

    // A beam is kept when enough particles agree with it; if too many beams
    // would be dropped the filter is likely diverged, so keep them all.
    let mut skip = vec![false; beam_count];
    if config.do_beamskip && sample_count > 0 {
        let needed = config.beam_skip_threshold * sample_count as f64;
        for b in 0..beam_count {
            skip[b] = (agree_count[b] as f64) < needed;
        }
        let skipped = skip.iter().filter(|&&s| s).count();
        if (skipped as f64) > config.beam_skip_error_threshold * beam_count as f64 {
            log::warn!(
                "beam skip would drop {}/{} beams; integrating all beams (filter may be diverged)",
                skipped,
                beam_count
            );
            skip.iter_mut().for_each(|s| *s = false);
        }
    }

    let mut total = 0.0;
    for (s, sample) in set.samples.iter_mut().enumerate() {
        let mut log_p = 0.0;
        for b in 0..beam_count {
            if skip[b] {
                continue;
            }
            let z = dists[s * beam_count + b];
            if !z.is_finite() {
                continue;
            }
            let pz = config.z_hit * (-z * z / denom).exp() + z_rand_term;
            log_p += pz.max(f64::MIN_POSITIVE).ln();
        }
        sample.weight *= log_p.exp();
        total += sample.weight;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Covariance2D, OccupancyGridMsg};
    use crate::filter::{FilterConfig, ParticleFilter};

    /// 21x21 map at 0.5 m/cell with a wall along the top row (y ≈ +5 m).
    fn walled_map() -> Arc<OccupancyMap> {
        let n = 21;
        let mut data = vec![0i8; n * n];
        for i in 0..n {
            data[(n - 1) * n + i] = 100;
        }
        let msg = OccupancyGridMsg {
            width: n,
            height: n,
            resolution: 0.5,
            origin_x: -(n as f64) * 0.5 / 2.0,
            origin_y: -(n as f64) * 0.5 / 2.0,
            origin_yaw: 0.0,
            data,
        };
        Arc::new(OccupancyMap::from_msg(&msg, 2.0))
    }

    fn tight_filter(pose: Pose2D, n: usize) -> ParticleFilter {
        let mut pf = ParticleFilter::new(&FilterConfig {
            min_samples: n,
            max_samples: n,
            seed: 42,
            ..Default::default()
        });
        pf.init(&pose, &Covariance2D::diagonal(0.0, 0.0, 0.0));
        pf
    }

    fn scan_toward_wall(range: f64, range_max: f64, beams: usize) -> LaserData {
        // Beams fanned ±0.05 rad around +Y.
        let half = 0.05;
        let ranges = (0..beams)
            .map(|i| {
                let bearing = std::f64::consts::FRAC_PI_2 - half
                    + 2.0 * half * i as f64 / (beams - 1).max(1) as f64;
                (range, bearing)
            })
            .collect();
        LaserData { ranges, range_max }
    }

    #[test]
    fn test_likelihood_field_prefers_consistent_pose() {
        let map = walled_map();
        let config = LaserModelConfig::default();

        // The wall row center sits at y = +5.0; robot at origin sees it at 5 m.
        let scan = scan_toward_wall(5.0, 8.0, 5);

        let mut good = tight_filter(Pose2D::identity(), 10);
        let mut model = LaserModel::new(config, Arc::clone(&map));
        model.update_sensor(&mut good, &scan);
        let (w_slow_good, _) = good.recovery_averages();

        let mut bad = tight_filter(Pose2D::new(0.0, -2.0, 0.0), 10);
        let mut model = LaserModel::new(config, map);
        model.update_sensor(&mut bad, &scan);
        let (w_slow_bad, _) = bad.recovery_averages();

        assert!(
            w_slow_good > w_slow_bad,
            "consistent pose should score higher: {} vs {}",
            w_slow_good,
            w_slow_bad
        );
    }

    #[test]
    fn test_max_range_scan_is_uninformative() {
        let map = walled_map();
        let mut model = LaserModel::new(LaserModelConfig::default(), map);

        // Two particles at different poses with distinct weights.
        let mut pf = tight_filter(Pose2D::identity(), 2);
        {
            let (set, _) = pf.samples_and_rng_mut();
            set.samples[0].pose = Pose2D::new(1.0, 1.0, 0.3);
            set.samples[0].weight = 0.75;
            set.samples[1].weight = 0.25;
        }
        let scan = LaserData {
            ranges: vec![(8.0, 0.0), (8.0, 0.5), (8.0, 1.0)],
            range_max: 8.0,
        };
        model.update_sensor(&mut pf, &scan);
        let set = pf.current_set();
        // Every beam was skipped, so relative weights are unchanged.
        assert!((set.samples[0].weight - 0.75).abs() < 1e-9);
        assert!((set.samples[1].weight - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_beam_model_scores_exact_range_highest() {
        let map = walled_map();
        let config = LaserModelConfig {
            model: LaserModelType::Beam,
            ..Default::default()
        };

        let score = |range: f64| {
            let mut pf = tight_filter(Pose2D::identity(), 4);
            let mut model = LaserModel::new(config, Arc::clone(&map));
            let scan = scan_toward_wall(range, 8.0, 3);
            model.update_sensor(&mut pf, &scan);
            pf.recovery_averages().0
        };

        let exact = score(5.0);
        let short = score(2.0);
        let long = score(7.5);
        assert!(exact > short, "exact {} vs short {}", exact, short);
        assert!(exact > long, "exact {} vs long {}", exact, long);
    }

    #[test]
    fn test_beam_skip_fallback_when_all_disagree() {
        let map = walled_map();
        let config = LaserModelConfig {
            model: LaserModelType::LikelihoodFieldProb,
            do_beamskip: true,
            beam_skip_distance: 0.2,
            beam_skip_threshold: 0.3,
            beam_skip_error_threshold: 0.5,
            ..Default::default()
        };
        let mut model = LaserModel::new(config, map);

        // Particles far from where the scan says the wall is: every beam
        // disagrees with every particle.
        let mut pf = tight_filter(Pose2D::new(0.0, -4.0, 0.0), 20);
        let before: Vec<f64> = pf.current_set().samples.iter().map(|s| s.weight).collect();
        let scan = scan_toward_wall(2.0, 8.0, 7);
        model.update_sensor(&mut pf, &scan);

        // The degeneracy guard integrates all beams: weights were still
        // updated (uniformly here, since all particles are identical).
        let after: Vec<f64> = pf.current_set().samples.iter().map(|s| s.weight).collect();
        assert_eq!(before.len(), after.len());
        let sum: f64 = after.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "weights not normalized: {}", sum);
    }

    #[test]
    fn test_beam_step_subsampling() {
        assert_eq!(beam_step(360, 30), 12);
        assert_eq!(beam_step(30, 30), 1);
        assert_eq!(beam_step(10, 30), 1);
        assert_eq!(beam_step(0, 30), 1);
        assert_eq!(beam_step(100, 1), 1);
    }

    #[test]
    fn test_likelihood_field_prob_matches_field_without_skip() {
        let map = walled_map();
        let scan = scan_toward_wall(5.0, 8.0, 5);

        let mut pf_a = tight_filter(Pose2D::identity(), 8);
        let mut lf = LaserModel::new(LaserModelConfig::default(), Arc::clone(&map));
        lf.update_sensor(&mut pf_a, &scan);

        let mut pf_b = tight_filter(Pose2D::identity(), 8);
        let mut lfp = LaserModel::new(
            LaserModelConfig {
                model: LaserModelType::LikelihoodFieldProb,
                ..Default::default()
            },
            map,
        );
        lfp.update_sensor(&mut pf_b, &scan);

        let (slow_a, _) = pf_a.recovery_averages();
        let (slow_b, _) = pf_b.recovery_averages();
        assert!(
            (slow_a - slow_b).abs() < 1e-9,
            "log-space and product scores diverge: {} vs {}",
            slow_a,
            slow_b
        );
    }
}
