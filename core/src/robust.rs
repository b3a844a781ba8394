//! Generic RANSAC engine used for pairwise geometric verification.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct RobustConfig {
    pub threshold: f64,
    pub max_iterations: usize,
    /// Fixed RNG seed for reproducible registration runs.
    pub seed: Option<u64>,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iterations: 500,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RobustResult<M> {
    pub model: Option<M>,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
}

/// A transform model that can be estimated from a minimal sample and
/// scored per data point.
pub trait RobustModel<D> {
    type Model: Clone;

    fn min_sample_size(&self) -> usize;

    fn estimate(&self, data: &[&D]) -> Option<Self::Model>;

    fn compute_error(&self, model: &Self::Model, data: &D) -> f64;
}

pub struct Ransac {
    config: RobustConfig,
}

impl Ransac {
    pub fn new(config: RobustConfig) -> Self {
        Self { config }
    }

    pub fn run<D, M: RobustModel<D>>(&self, estimator: &M, data: &[D]) -> RobustResult<M::Model> {
        let n = data.len();
        let k = estimator.min_sample_size();

        let mut best = RobustResult {
            model: None,
            inliers: vec![false; n],
            num_inliers: 0,
        };
        if n < k {
            return best;
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut indices: Vec<usize> = (0..n).collect();

        for _ in 0..self.config.max_iterations {
            indices.shuffle(&mut rng);
            let sample: Vec<&D> = indices[..k].iter().map(|&i| &data[i]).collect();

            let Some(model) = estimator.estimate(&sample) else {
                continue;
            };

            let mut inliers = vec![false; n];
            let mut num_inliers = 0;
            for (i, d) in data.iter().enumerate() {
                if estimator.compute_error(&model, d) < self.config.threshold {
                    inliers[i] = true;
                    num_inliers += 1;
                }
            }

            if num_inliers > best.num_inliers {
                best = RobustResult {
                    model: Some(model),
                    inliers,
                    num_inliers,
                };
                // All inliers: no better consensus is possible.
                if num_inliers == n {
                    break;
                }
            }
        }

        best
    }
}
