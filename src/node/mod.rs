//! The localization coordinator.
//!
//! Sequences map installation, per-frame laser registration, threshold-gated
//! motion and sensor updates, resampling cadence, hypothesis selection, and
//! map→odom publication. Every handler takes `&mut self`; callers serialize
//! concurrent event sources with an ordinary mutex around the node.

mod outputs;
mod transform;

pub use outputs::{AmclSink, NullSink, PoseEstimate, SavedPose, TransformStamped};
pub use transform::{TransformError, TransformSource};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AmclConfig;
use crate::core::math::angle_diff;
use crate::core::types::{Covariance2D, LaserScan, OccupancyGridMsg, Pose2D, PoseWithCovariance};
use crate::error::{AmclError, Result};
use crate::filter::{FilterConfig, ParticleFilter, UniformFreeSpace};
use crate::map::OccupancyMap;
use crate::models::{LaserData, LaserModel, OdomData, OdomModel};

/// One registered laser: its model clone, mounting yaw, and update flag.
struct LaserUnit {
    model: LaserModel,
    /// Mounting yaw in the base frame, folded into per-beam bearings.
    mount_yaw: f64,
    needs_update: bool,
}

/// Adaptive Monte-Carlo localization node.
pub struct AmclNode {
    config: AmclConfig,

    map: Option<Arc<OccupancyMap>>,
    filter: Option<ParticleFilter>,
    odom: OdomModel,

    lasers: Vec<LaserUnit>,
    frame_to_laser: HashMap<String, usize>,

    /// Whether the odometry baseline has been seeded since the last init.
    filter_initialized: bool,
    /// Base pose in the odom frame at the last filter update.
    odom_baseline: Pose2D,
    force_update: bool,
    resample_count: usize,

    latest_map_to_odom: Option<Pose2D>,
    sent_first_transform: bool,
    last_published: Option<PoseEstimate>,
    last_save_us: u64,
    first_map_received: bool,
    pending_initial_pose: Option<(Pose2D, Covariance2D)>,
}

impl AmclNode {
    pub fn new(mut config: AmclConfig) -> Self {
        config.sanitize();
        let odom = OdomModel::new(
            config.odom_model_type(),
            config.odom.alpha1,
            config.odom.alpha2,
            config.odom.alpha3,
            config.odom.alpha4,
            config.odom.alpha5,
        );
        Self {
            config,
            map: None,
            filter: None,
            odom,
            lasers: Vec::new(),
            frame_to_laser: HashMap::new(),
            filter_initialized: false,
            odom_baseline: Pose2D::identity(),
            force_update: false,
            resample_count: 0,
            latest_map_to_odom: None,
            sent_first_transform: false,
            last_published: None,
            last_save_us: 0,
            first_map_received: false,
            pending_initial_pose: None,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &AmclConfig {
        &self.config
    }

    /// The installed map, if any.
    pub fn map(&self) -> Option<&Arc<OccupancyMap>> {
        self.map.as_ref()
    }

    /// The particle filter, once a map has been installed.
    pub fn filter(&self) -> Option<&ParticleFilter> {
        self.filter.as_ref()
    }

    /// Latest map→odom correction, if one has been computed.
    pub fn latest_map_to_odom(&self) -> Option<Pose2D> {
        self.latest_map_to_odom
    }

    /// A map arrived on the map stream.
    ///
    /// With `first_map_only` set, maps after the first are ignored.
    pub fn handle_map(&mut self, msg: &OccupancyGridMsg) {
        if self.config.broadcast.first_map_only && self.first_map_received {
            log::debug!("ignoring map update (first_map_only is set)");
            return;
        }
        self.install_map(msg);
        self.first_map_received = true;
    }

    /// Explicit map replacement with a bundled initial pose.
    ///
    /// Always replaces the map, regardless of `first_map_only`; that flag
    /// gates only the passive map stream.
    pub fn set_map(
        &mut self,
        msg: &OccupancyGridMsg,
        initial_pose: &PoseWithCovariance,
        now_us: u64,
        tf: &dyn TransformSource,
    ) -> Result<()> {
        self.install_map(msg);
        self.first_map_received = true;
        self.handle_initial_pose(initial_pose, now_us, tf)
    }

    fn install_map(&mut self, msg: &OccupancyGridMsg) {
        log::info!(
            "received a {} x {} map @ {:.3} m/cell",
            msg.width,
            msg.height,
            msg.resolution
        );

        // Registered lasers hold handles to the outgoing map; drop them
        // before the swap so the old map is released once rebuilt.
        self.lasers.clear();
        self.frame_to_laser.clear();

        let map = Arc::new(OccupancyMap::from_msg(
            msg,
            self.config.laser.likelihood_max_dist,
        ));

        let mut filter = ParticleFilter::new(&FilterConfig {
            min_samples: self.config.sampling.min_particles,
            max_samples: self.config.sampling.max_particles,
            kld_err: self.config.sampling.kld_err,
            kld_z: self.config.sampling.kld_z,
            recovery_alpha_slow: self.config.update.recovery_alpha_slow,
            recovery_alpha_fast: self.config.update.recovery_alpha_fast,
            seed: self.config.sampling.rng_seed,
        });
        let init = &self.config.initial_pose;
        filter.init(
            &Pose2D::new(init.x, init.y, init.yaw),
            &Covariance2D::diagonal(init.cov_xx, init.cov_yy, init.cov_aa),
        );

        self.filter = Some(filter);
        self.filter_initialized = false;
        self.resample_count = 0;
        self.map = Some(map);

        // An initial pose that arrived before the map applies now.
        self.apply_pending_initial_pose();
    }

    /// A laser scan arrived.
    pub fn handle_scan(
        &mut self,
        scan: &LaserScan,
        tf: &dyn TransformSource,
        sink: &mut dyn AmclSink,
    ) {
        let Some(map) = self.map.clone() else {
            log::debug!("dropping scan: no map installed yet");
            return;
        };

        let laser_index = match self.register_laser(scan, tf, &map) {
            Some(index) => index,
            None => return,
        };

        // Where was the robot when this scan was taken?
        let base_frame = self.config.frames.base_frame_id.clone();
        let odom_frame = self.config.frames.odom_frame_id.clone();
        let pose = match tf.lookup(&odom_frame, &base_frame, scan.stamp_us) {
            Ok(pose) => pose,
            Err(e) => {
                log::warn!("couldn't determine robot pose for scan, skipping ({})", e);
                return;
            }
        };

        let mut delta = Pose2D {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        };
        if self.filter_initialized {
            delta = Pose2D {
                x: pose.x - self.odom_baseline.x,
                y: pose.y - self.odom_baseline.y,
                theta: angle_diff(pose.theta, self.odom_baseline.theta),
            };

            let update = delta.x.abs() > self.config.update.update_min_d
                || delta.y.abs() > self.config.update.update_min_d
                || delta.theta.abs() > self.config.update.update_min_a
                || self.force_update;
            self.force_update = false;

            if update {
                for unit in &mut self.lasers {
                    unit.needs_update = true;
                }
            }
        }

        let mut force_publication = false;
        if !self.filter_initialized {
            // Seed the odometry baseline; the filter publishes once without
            // any motion applied.
            self.odom_baseline = pose;
            self.filter_initialized = true;
            for unit in &mut self.lasers {
                unit.needs_update = true;
            }
            force_publication = true;
            self.resample_count = 0;
        } else if self.lasers[laser_index].needs_update {
            let data = OdomData { pose, delta };
            if let Some(filter) = self.filter.as_mut() {
                self.odom.update_action(filter, &data);
            }
        }

        let mut resampled = false;
        if self.lasers[laser_index].needs_update {
            let data = self.build_laser_data(scan, self.lasers[laser_index].mount_yaw);
            if let Some(filter) = self.filter.as_mut() {
                self.lasers[laser_index].model.update_sensor(filter, &data);
            }
            self.lasers[laser_index].needs_update = false;
            self.odom_baseline = pose;

            self.resample_count += 1;
            if self.resample_count % self.config.update.resample_interval == 0 {
                if let Some(filter) = self.filter.as_mut() {
                    filter.resample(&UniformFreeSpace::new(Arc::clone(&map)));
                }
                resampled = true;
            }

            if let Some(filter) = self.filter.as_ref() {
                let poses: Vec<Pose2D> =
                    filter.current_set().samples.iter().map(|s| s.pose).collect();
                sink.particle_cloud(&poses);
            }
        }

        if resampled || force_publication {
            if !resampled {
                if let Some(filter) = self.filter.as_mut() {
                    filter.cluster_stats();
                }
            }
            self.publish_estimate(scan.stamp_us, &pose, sink);
        } else if self.latest_map_to_odom.is_some() {
            // Nothing changed; refresh the transform expiration so the
            // transform tree stays live.
            self.broadcast_map_to_odom(scan.stamp_us, sink);
            self.maybe_save_pose(scan.stamp_us, sink);
        }
    }

    /// An initial pose estimate arrived.
    ///
    /// Must be expressed in the global frame. Odometric motion between the
    /// message stamp and `now_us` is folded in so a stale estimate lands
    /// where the robot is now. Applied immediately if a map is installed,
    /// otherwise deferred until one arrives.
    pub fn handle_initial_pose(
        &mut self,
        msg: &PoseWithCovariance,
        now_us: u64,
        tf: &dyn TransformSource,
    ) -> Result<()> {
        if msg.frame_id.is_empty() {
            log::warn!("initial pose has empty frame_id; assuming the global frame");
        } else if msg.frame_id != self.config.frames.global_frame_id {
            log::warn!(
                "ignoring initial pose in frame \"{}\"; it must be in the global frame \"{}\"",
                msg.frame_id,
                self.config.frames.global_frame_id
            );
            return Err(AmclError::FrameMismatch {
                got: msg.frame_id.clone(),
                expected: self.config.frames.global_frame_id.clone(),
            });
        }

        // Motion of the base between the message stamp and now, from the
        // odometry frame. Failure degrades to the identity correction.
        let odom_frame = &self.config.frames.odom_frame_id;
        let base_frame = &self.config.frames.base_frame_id;
        let tx_odom = match (
            tf.lookup(odom_frame, base_frame, msg.stamp_us),
            tf.lookup(odom_frame, base_frame, now_us),
        ) {
            (Ok(then), Ok(now)) => then.inverse().compose(&now),
            (Err(e), _) | (_, Err(e)) => {
                if self.sent_first_transform {
                    log::warn!("failed to integrate odometry into initial pose ({})", e);
                }
                Pose2D::identity()
            }
        };

        let pose_new = msg.pose.compose(&tx_odom);
        log::info!(
            "setting pose: {:.3} {:.3} {:.3}",
            pose_new.x,
            pose_new.y,
            pose_new.theta
        );

        let mut cov = Covariance2D::zero();
        for i in 0..2 {
            for j in 0..2 {
                cov.set(i, j, msg.covariance[6 * i + j]);
            }
        }
        cov.set(2, 2, msg.covariance[6 * 5 + 5]);

        self.pending_initial_pose = Some((pose_new, cov));
        self.apply_pending_initial_pose();
        Ok(())
    }

    /// Scatter the particles uniformly over the map's free space.
    pub fn global_localization(&mut self) {
        let Some(map) = self.map.clone() else {
            return;
        };
        log::info!("initializing with uniform distribution");
        if let Some(filter) = self.filter.as_mut() {
            filter.init_model(&UniformFreeSpace::new(map));
        }
        self.filter_initialized = false;
        log::info!("global initialization done");
    }

    /// Force the next scan to run a full update even without motion.
    pub fn request_nomotion_update(&mut self) {
        self.force_update = true;
        log::info!("requesting no-motion update");
    }

    fn apply_pending_initial_pose(&mut self) {
        if self.map.is_none() {
            return;
        }
        if let Some((mean, cov)) = self.pending_initial_pose.take() {
            if let Some(filter) = self.filter.as_mut() {
                filter.init(&mean, &cov);
            }
            self.filter_initialized = false;
        }
    }

    /// Look up (or register) the laser for this scan's frame id.
    fn register_laser(
        &mut self,
        scan: &LaserScan,
        tf: &dyn TransformSource,
        map: &Arc<OccupancyMap>,
    ) -> Option<usize> {
        if let Some(&index) = self.frame_to_laser.get(&scan.frame_id) {
            return Some(index);
        }

        log::debug!(
            "setting up laser {} (frame_id={})",
            self.lasers.len(),
            scan.frame_id
        );
        let base_frame = &self.config.frames.base_frame_id;
        let laser_pose = match tf.lookup(base_frame, &scan.frame_id, scan.stamp_us) {
            Ok(pose) => pose,
            Err(e) => {
                log::error!(
                    "couldn't transform laser frame \"{}\" to base frame \"{}\" ({})",
                    scan.frame_id,
                    base_frame,
                    e
                );
                return None;
            }
        };

        let mut model = LaserModel::new(self.config.laser_model_config(), Arc::clone(map));
        // The mounting yaw is applied per beam; the model keeps only the
        // positional offset.
        model.set_laser_pose(Pose2D::new(laser_pose.x, laser_pose.y, 0.0));
        log::debug!(
            "laser at ({:.3}, {:.3}) yaw {:.3} wrt base",
            laser_pose.x,
            laser_pose.y,
            laser_pose.theta
        );

        let index = self.lasers.len();
        self.lasers.push(LaserUnit {
            model,
            mount_yaw: laser_pose.theta,
            needs_update: true,
        });
        self.frame_to_laser.insert(scan.frame_id.clone(), index);
        Some(index)
    }

    /// Clamp ranges and express bearings in the base frame.
    fn build_laser_data(&self, scan: &LaserScan, mount_yaw: f64) -> LaserData {
        let range_max = if self.config.laser.max_range > 0.0 {
            scan.range_max.min(self.config.laser.max_range)
        } else {
            scan.range_max
        };
        let range_min = if self.config.laser.min_range > 0.0 {
            scan.range_min.max(self.config.laser.min_range)
        } else {
            scan.range_min
        };

        let ranges = scan
            .ranges
            .iter()
            .enumerate()
            .map(|(i, &r)| {
                // The filter has no concept of a minimum range: short and
                // invalid readings count as max-range.
                let range = if !r.is_finite() || r <= range_min {
                    range_max
                } else {
                    r.min(range_max)
                };
                let bearing = scan.angle_min + i as f64 * scan.angle_increment + mount_yaw;
                (range, bearing)
            })
            .collect();

        LaserData { ranges, range_max }
    }

    /// Publish the best hypothesis and the derived map→odom transform.
    fn publish_estimate(&mut self, stamp_us: u64, base_in_odom: &Pose2D, sink: &mut dyn AmclSink) {
        let Some(filter) = self.filter.as_ref() else {
            return;
        };
        let set = filter.current_set();
        let Some(best) = set.clusters.first() else {
            log::error!("no pose cluster to publish");
            return;
        };

        log::debug!(
            "max weight pose: {:.3} {:.3} {:.3} (weight {:.3}, {} samples)",
            best.mean.x,
            best.mean.y,
            best.mean.theta,
            best.weight,
            set.len()
        );

        // The published covariance is the overall filter covariance, not the
        // best cluster's own.
        let mut covariance = Covariance2D::zero();
        for i in 0..2 {
            for j in 0..2 {
                covariance.set(i, j, set.cov.get(i, j));
            }
        }
        covariance.set(2, 2, set.cov.var_theta());

        let estimate = PoseEstimate {
            frame_id: self.config.frames.global_frame_id.clone(),
            stamp_us,
            pose: best.mean,
            covariance,
        };
        sink.pose_estimate(&estimate);
        self.last_published = Some(estimate);

        // map→base ⊖ odom→base = map→odom.
        self.latest_map_to_odom = Some(best.mean.compose(&base_in_odom.inverse()));
        self.broadcast_map_to_odom(stamp_us, sink);
    }

    fn broadcast_map_to_odom(&mut self, stamp_us: u64, sink: &mut dyn AmclSink) {
        if !self.config.broadcast.tf_broadcast {
            return;
        }
        let Some(transform) = self.latest_map_to_odom else {
            return;
        };
        let tolerance_us = (self.config.broadcast.transform_tolerance * 1e6) as u64;
        sink.map_to_odom(&TransformStamped {
            parent_frame_id: self.config.frames.global_frame_id.clone(),
            child_frame_id: self.config.frames.odom_frame_id.clone(),
            expiration_us: stamp_us + tolerance_us,
            transform,
        });
        self.sent_first_transform = true;
    }

    fn maybe_save_pose(&mut self, stamp_us: u64, sink: &mut dyn AmclSink) {
        let period = self.config.broadcast.save_pose_period;
        if period <= 0.0 {
            return;
        }
        let period_us = (period * 1e6) as u64;
        if stamp_us.saturating_sub(self.last_save_us) < period_us {
            return;
        }
        let Some(last) = self.last_published.as_ref() else {
            return;
        };
        sink.saved_pose(&SavedPose {
            pose: last.pose,
            var_xx: last.covariance.var_x(),
            var_yy: last.covariance.var_y(),
            var_aa: last.covariance.var_theta(),
        });
        self.last_save_us = stamp_us;
    }
}
