//! Adaptive particle filter.
//!
//! Maintains two sample buffers (current and staging), adapts the sample
//! count with KLD sizing, tracks short- and long-term weight averages for
//! recovery injection, and produces clustered pose hypotheses.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::sample::{Cluster, PoseGenerator, Sample, SampleSet};
use crate::core::types::{Covariance2D, Pose2D};

/// Configuration for the adaptive particle filter.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// Lower bound on the sample count.
    pub min_samples: usize,
    /// Upper bound on the sample count.
    pub max_samples: usize,
    /// KLD error bound ε.
    pub kld_err: f64,
    /// Upper standard-normal quantile for the KLD bound.
    pub kld_z: f64,
    /// Long-term weight average gain. 0 disables recovery injection.
    pub recovery_alpha_slow: f64,
    /// Short-term weight average gain. 0 disables recovery injection.
    pub recovery_alpha_fast: f64,
    /// PRNG seed; 0 draws a seed from the OS.
    pub seed: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            max_samples: 5000,
            kld_err: 0.01,
            kld_z: 0.99,
            recovery_alpha_slow: 0.001,
            recovery_alpha_fast: 0.1,
            seed: 0,
        }
    }
}

/// Adaptive Monte-Carlo particle filter over planar poses.
///
/// Every random draw (initialization, motion noise, recovery injection,
/// low-variance resampling) goes through the single owned PRNG, so runs with
/// the same seed, map, and event sequence are bit-identical.
#[derive(Debug)]
pub struct ParticleFilter {
    min_samples: usize,
    max_samples: usize,
    kld_err: f64,
    kld_z: f64,
    alpha_slow: f64,
    alpha_fast: f64,
    sets: [SampleSet; 2],
    current: usize,
    w_slow: f64,
    w_fast: f64,
    rng: StdRng,
}

impl ParticleFilter {
    /// Create an empty filter. Call [`init`](Self::init) or
    /// [`init_model`](Self::init_model) before the first update.
    pub fn new(config: &FilterConfig) -> Self {
        let rng = if config.seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(config.seed)
        };
        let min_samples = config.min_samples.max(1);
        Self {
            min_samples,
            max_samples: config.max_samples.max(min_samples),
            kld_err: config.kld_err,
            kld_z: config.kld_z,
            alpha_slow: config.recovery_alpha_slow,
            alpha_fast: config.recovery_alpha_fast,
            sets: [SampleSet::new(), SampleSet::new()],
            current: 0,
            w_slow: 0.0,
            w_fast: 0.0,
            rng,
        }
    }

    /// The active sample set.
    #[inline]
    pub fn current_set(&self) -> &SampleSet {
        &self.sets[self.current]
    }

    /// Number of samples in the active set.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.sets[self.current].len()
    }

    /// (w_slow, w_fast) recovery averages, for diagnostics.
    #[inline]
    pub fn recovery_averages(&self) -> (f64, f64) {
        (self.w_slow, self.w_fast)
    }

    /// Mutable access to the active samples and the filter PRNG, for motion
    /// models that perturb every sample.
    #[inline]
    pub fn samples_and_rng_mut(&mut self) -> (&mut SampleSet, &mut StdRng) {
        (&mut self.sets[self.current], &mut self.rng)
    }

    /// Initialize with `min_samples` draws from a Gaussian about `mean`.
    ///
    /// The positional 2x2 block of `cov` is sampled through its Cholesky
    /// factor; θ is drawn independently from the θθ entry.
    pub fn init(&mut self, mean: &Pose2D, cov: &Covariance2D) {
        let (l00, l10, l11) = cholesky_2x2(cov.var_x(), cov.get(0, 1), cov.var_y());
        let sigma_theta = cov.var_theta().max(0.0).sqrt();

        let n = self.min_samples;
        let weight = 1.0 / n as f64;
        let set = &mut self.sets[self.current];
        set.samples.clear();
        set.kdtree.clear();
        for _ in 0..n {
            let z0: f64 = self.rng.sample(StandardNormal);
            let z1: f64 = self.rng.sample(StandardNormal);
            let z2: f64 = self.rng.sample(StandardNormal);
            let pose = Pose2D::new(
                mean.x + l00 * z0,
                mean.y + l10 * z0 + l11 * z1,
                mean.theta + sigma_theta * z2,
            );
            set.samples.push(Sample { pose, weight });
            set.kdtree.insert(&pose, weight);
        }

        self.w_slow = 0.0;
        self.w_fast = 0.0;
        self.cluster_stats();
    }

    /// Initialize with `min_samples` draws from a pose generator (typically
    /// uniform over free space).
    pub fn init_model(&mut self, gen: &dyn PoseGenerator) {
        let n = self.min_samples;
        let weight = 1.0 / n as f64;
        let set = &mut self.sets[self.current];
        set.samples.clear();
        set.kdtree.clear();
        for _ in 0..n {
            let pose = gen.sample_pose(&mut self.rng);
            set.samples.push(Sample { pose, weight });
            set.kdtree.insert(&pose, weight);
        }

        self.w_slow = 0.0;
        self.w_fast = 0.0;
        self.cluster_stats();
    }

    /// Apply a sensor scoring pass and refresh the weight bookkeeping.
    ///
    /// `score` multiplies each sample weight by its measurement likelihood
    /// and returns the pre-normalization total. The filter then normalizes
    /// to Σw = 1 and updates the recovery averages.
    pub fn update_sensor<F>(&mut self, score: F)
    where
        F: FnOnce(&mut SampleSet) -> f64,
    {
        let total = score(&mut self.sets[self.current]);
        let set = &mut self.sets[self.current];
        let n = set.len();
        if n == 0 {
            return;
        }

        if total > 0.0 && total.is_finite() {
            for s in &mut set.samples {
                s.weight /= total;
            }
            let w_avg = total / n as f64;
            if self.alpha_slow > 0.0 {
                if self.w_slow == 0.0 {
                    self.w_slow = w_avg;
                } else {
                    self.w_slow += self.alpha_slow * (w_avg - self.w_slow);
                }
            }
            if self.alpha_fast > 0.0 {
                if self.w_fast == 0.0 {
                    self.w_fast = w_avg;
                } else {
                    self.w_fast += self.alpha_fast * (w_avg - self.w_fast);
                }
            }
        } else {
            log::warn!(
                "sensor update produced total weight {}; resetting to uniform",
                total
            );
            let w = 1.0 / n as f64;
            for s in &mut set.samples {
                s.weight = w;
            }
        }
    }

    /// Resample the current set into the staging buffer and swap.
    ///
    /// Low-variance draws over the normalized weights, with per-draw uniform
    /// injection at probability `max(0, 1 - w_fast/w_slow)`. The staging
    /// count stops at the KLD limit of the staging tree's bin count (never
    /// below `min_samples`, never above `max_samples`).
    pub fn resample(&mut self, gen: &dyn PoseGenerator) {
        let (min_samples, max_samples) = (self.min_samples, self.max_samples);
        let (kld_err, kld_z) = (self.kld_err, self.kld_z);

        let w_diff = if self.w_slow > 0.0 {
            (1.0 - self.w_fast / self.w_slow).max(0.0)
        } else {
            0.0
        };

        let mut injected = false;
        {
            let (left, right) = self.sets.split_at_mut(1);
            let (cur, stg) = if self.current == 0 {
                (&mut left[0], &mut right[0])
            } else {
                (&mut right[0], &mut left[0])
            };
            let rng = &mut self.rng;

            stg.samples.clear();
            stg.kdtree.clear();
            stg.clusters.clear();

            if cur.samples.is_empty() {
                return;
            }

            // Low-variance wheel over the current weights; the position only
            // advances on empirical draws and wraps past the total weight.
            let step = 1.0 / max_samples as f64;
            let mut pos = rng.gen_range(0.0..step);
            let mut idx = 0usize;
            let mut cum = cur.samples[0].weight;

            loop {
                let n = stg.samples.len();
                if n >= max_samples {
                    break;
                }
                if n >= min_samples
                    && n >= resample_limit(
                        min_samples,
                        max_samples,
                        kld_err,
                        kld_z,
                        stg.kdtree.leaf_count(),
                    )
                {
                    break;
                }

                let pose = if w_diff > 0.0 && rng.gen::<f64>() < w_diff {
                    injected = true;
                    gen.sample_pose(rng)
                } else {
                    while pos > cum {
                        idx += 1;
                        if idx >= cur.samples.len() {
                            pos -= cum;
                            idx = 0;
                            cum = cur.samples[0].weight;
                        } else {
                            cum += cur.samples[idx].weight;
                        }
                    }
                    pos += step;
                    cur.samples[idx].pose
                };

                stg.samples.push(Sample { pose, weight: 1.0 });
                stg.kdtree.insert(&pose, 1.0);
            }

            let w = 1.0 / stg.samples.len() as f64;
            for s in &mut stg.samples {
                s.weight = w;
            }
        }

        if injected {
            // Suppress oscillating injections until the averages recover.
            self.w_slow = 0.0;
            self.w_fast = 0.0;
        }

        self.current = 1 - self.current;
        self.cluster_stats();
    }

    /// Recompute cluster and whole-set statistics on the active set.
    ///
    /// Statistics are total: every cluster reported has positive weight, and
    /// samples whose bin is missing from the tree (possible after motion has
    /// moved poses between bins) still contribute to the set totals.
    pub fn cluster_stats(&mut self) {
        let set = &mut self.sets[self.current];
        set.kdtree.cluster();

        #[derive(Clone, Copy, Default)]
        struct Acc {
            count: usize,
            weight: f64,
            m: [f64; 4],
            c: [[f64; 2]; 2],
        }

        impl Acc {
            fn add(&mut self, pose: &Pose2D, w: f64) {
                self.count += 1;
                self.weight += w;
                self.m[0] += w * pose.x;
                self.m[1] += w * pose.y;
                self.m[2] += w * pose.theta.cos();
                self.m[3] += w * pose.theta.sin();
                for i in 0..2 {
                    let vi = if i == 0 { pose.x } else { pose.y };
                    for j in 0..2 {
                        let vj = if j == 0 { pose.x } else { pose.y };
                        self.c[i][j] += w * vi * vj;
                    }
                }
            }

            fn finalize(&self) -> (Pose2D, Covariance2D) {
                let w = self.weight;
                let mean = Pose2D::new(self.m[0] / w, self.m[1] / w, self.m[3].atan2(self.m[2]));
                let mut cov = Covariance2D::zero();
                for i in 0..2 {
                    let mi = if i == 0 { mean.x } else { mean.y };
                    for j in 0..2 {
                        let mj = if j == 0 { mean.x } else { mean.y };
                        cov.set(i, j, self.c[i][j] / w - mi * mj);
                    }
                }
                // Circular variance from the resultant length.
                let resultant = ((self.m[2] * self.m[2] + self.m[3] * self.m[3]).sqrt() / w)
                    .clamp(f64::MIN_POSITIVE, 1.0);
                cov.set(2, 2, -2.0 * resultant.ln());
                (mean, cov)
            }
        }

        let mut accs: Vec<Acc> = Vec::new();
        let mut total = Acc::default();

        for s in &set.samples {
            total.add(&s.pose, s.weight);
            if let Some(cidx) = set.kdtree.get_cluster(&s.pose) {
                if cidx >= accs.len() {
                    accs.resize(cidx + 1, Acc::default());
                }
                accs[cidx].add(&s.pose, s.weight);
            }
        }

        set.clusters = accs
            .iter()
            .filter(|a| a.weight > 0.0)
            .map(|a| {
                let (mean, cov) = a.finalize();
                Cluster {
                    count: a.count,
                    weight: a.weight,
                    mean,
                    cov,
                }
            })
            .collect();
        set.clusters
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));

        if total.weight > 0.0 {
            let (mean, cov) = total.finalize();
            set.mean = mean;
            set.cov = cov;
        } else {
            set.mean = Pose2D::identity();
            set.cov = Covariance2D::zero();
        }
    }

    /// KLD-recommended sample count for `k` occupied bins, clamped to the
    /// configured range.
    pub fn resample_limit(&self, k: usize) -> usize {
        resample_limit(self.min_samples, self.max_samples, self.kld_err, self.kld_z, k)
    }
}

/// Lower-triangular Cholesky factor of a 2x2 covariance block.
///
/// Falls back to independent axis standard deviations when the block is not
/// positive definite (zero or degenerate covariances are legal inputs).
fn cholesky_2x2(xx: f64, xy: f64, yy: f64) -> (f64, f64, f64) {
    let l00 = xx.max(0.0).sqrt();
    if l00 > 0.0 {
        let l10 = xy / l00;
        let rem = yy - l10 * l10;
        if rem >= 0.0 && l10.is_finite() {
            return (l00, l10, rem.sqrt());
        }
    }
    (l00, 0.0, yy.max(0.0).sqrt())
}

/// Upper χ²-quantile approximation of the KLD sample bound.
fn resample_limit(min: usize, max: usize, pop_err: f64, pop_z: f64, k: usize) -> usize {
    if k <= 1 {
        return max;
    }
    let kf = k as f64;
    let b = 2.0 / (9.0 * (kf - 1.0));
    let c = b.sqrt() * pop_z;
    let x = 1.0 - b + c;
    let n = ((kf - 1.0) / (2.0 * pop_err) * x * x * x).ceil() as usize;
    n.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_filter(seed: u64) -> ParticleFilter {
        ParticleFilter::new(&FilterConfig {
            min_samples: 200,
            max_samples: 2000,
            seed,
            ..Default::default()
        })
    }

    struct FixedPose(Pose2D);

    impl PoseGenerator for FixedPose {
        fn sample_pose(&self, _rng: &mut StdRng) -> Pose2D {
            self.0
        }
    }

    #[test]
    fn test_init_weights_normalized() {
        let mut pf = small_filter(42);
        pf.init(&Pose2D::new(1.0, 2.0, 0.5), &Covariance2D::diagonal(0.01, 0.01, 0.01));
        let sum: f64 = pf.current_set().samples.iter().map(|s| s.weight).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
        assert_eq!(pf.sample_count(), 200);
    }

    #[test]
    fn test_init_mean_near_requested() {
        let mut pf = small_filter(42);
        let mean = Pose2D::new(1.0, 2.0, 0.5);
        pf.init(&mean, &Covariance2D::diagonal(0.01, 0.01, 0.01));
        let set = pf.current_set();
        // 3σ/√N bound on the sample mean.
        let tol = 3.0 * 0.1 / (200f64).sqrt();
        assert!((set.mean.x - mean.x).abs() < tol, "x mean {}", set.mean.x);
        assert!((set.mean.y - mean.y).abs() < tol, "y mean {}", set.mean.y);
        assert!((set.mean.theta - mean.theta).abs() < tol);
        assert!(!set.clusters.is_empty());
    }

    #[test]
    fn test_init_with_correlated_covariance() {
        let mut pf = small_filter(3);
        let mut cov = Covariance2D::diagonal(0.04, 0.04, 0.01);
        cov.set(0, 1, 0.03);
        cov.set(1, 0, 0.03);
        pf.init(&Pose2D::identity(), &cov);
        // Sample covariance should show the positive correlation.
        let set = pf.current_set();
        assert!(set.cov.get(0, 1) > 0.0, "xy cov {}", set.cov.get(0, 1));
    }

    #[test]
    fn test_deterministic_with_seed() {
        let run = |seed| {
            let mut pf = small_filter(seed);
            pf.init(&Pose2D::identity(), &Covariance2D::diagonal(0.1, 0.1, 0.1));
            pf.update_sensor(|set| {
                let mut total = 0.0;
                for s in &mut set.samples {
                    s.weight *= (-s.pose.x * s.pose.x).exp();
                    total += s.weight;
                }
                total
            });
            pf.resample(&FixedPose(Pose2D::identity()));
            pf.current_set()
                .samples
                .iter()
                .map(|s| (s.pose.x, s.pose.y, s.pose.theta, s.weight))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_update_sensor_normalizes() {
        let mut pf = small_filter(7);
        pf.init(&Pose2D::identity(), &Covariance2D::diagonal(0.1, 0.1, 0.1));
        pf.update_sensor(|set| {
            let mut total = 0.0;
            for s in &mut set.samples {
                s.weight *= 3.0;
                total += s.weight;
            }
            total
        });
        let sum: f64 = pf.current_set().samples.iter().map(|s| s.weight).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
        let (w_slow, w_fast) = pf.recovery_averages();
        assert_abs_diff_eq!(w_slow, 3.0 / 200.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w_fast, 3.0 / 200.0, epsilon = 1e-12);
    }

    #[test]
    fn test_update_sensor_zero_total_goes_uniform() {
        let mut pf = small_filter(7);
        pf.init(&Pose2D::identity(), &Covariance2D::diagonal(0.1, 0.1, 0.1));
        pf.update_sensor(|set| {
            for s in &mut set.samples {
                s.weight = 0.0;
            }
            0.0
        });
        let n = pf.sample_count() as f64;
        for s in &pf.current_set().samples {
            assert_abs_diff_eq!(s.weight, 1.0 / n, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_resample_preserves_count_bounds() {
        let mut pf = small_filter(11);
        pf.init(&Pose2D::identity(), &Covariance2D::diagonal(0.5, 0.5, 0.3));
        for _ in 0..5 {
            pf.resample(&FixedPose(Pose2D::identity()));
            let n = pf.sample_count();
            assert!((200..=2000).contains(&n), "count out of bounds: {}", n);
        }
    }

    #[test]
    fn test_kld_limit_formula() {
        let pf = small_filter(1);
        // k <= 1 always asks for the maximum.
        assert_eq!(pf.resample_limit(0), 2000);
        assert_eq!(pf.resample_limit(1), 2000);
        // Tight clusters collapse to the minimum.
        assert_eq!(pf.resample_limit(2), 200);
        // More bins ask for more samples.
        assert!(pf.resample_limit(100) > pf.resample_limit(10));
    }

    #[test]
    fn test_cluster_stats_matches_direct_computation() {
        let mut pf = small_filter(5);
        pf.init(&Pose2D::new(0.5, -0.5, 0.2), &Covariance2D::diagonal(0.04, 0.09, 0.01));
        let set = pf.current_set();

        let mut mx = 0.0;
        let mut my = 0.0;
        for s in &set.samples {
            mx += s.weight * s.pose.x;
            my += s.weight * s.pose.y;
        }
        assert_abs_diff_eq!(set.mean.x, mx, epsilon = 1e-9);
        assert_abs_diff_eq!(set.mean.y, my, epsilon = 1e-9);

        let mut cxx = 0.0;
        for s in &set.samples {
            cxx += s.weight * (s.pose.x - mx) * (s.pose.x - mx);
        }
        assert_abs_diff_eq!(set.cov.var_x(), cxx, epsilon = 1e-9);
    }

    #[test]
    fn test_clusters_sorted_by_weight() {
        let mut pf = small_filter(5);
        pf.init(&Pose2D::identity(), &Covariance2D::diagonal(4.0, 4.0, 0.5));
        let set = pf.current_set();
        for pair in set.clusters.windows(2) {
            assert!(pair[0].weight >= pair[1].weight);
        }
        let total: f64 = set.clusters.iter().map(|c| c.weight).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fixed_size_filter_stays_fixed() {
        let mut pf = ParticleFilter::new(&FilterConfig {
            min_samples: 150,
            max_samples: 150,
            seed: 9,
            ..Default::default()
        });
        pf.init(&Pose2D::identity(), &Covariance2D::diagonal(0.5, 0.5, 0.3));
        for _ in 0..4 {
            pf.resample(&FixedPose(Pose2D::identity()));
            assert_eq!(pf.sample_count(), 150);
        }
    }
}
