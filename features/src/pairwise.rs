//! Pairwise geometric matching between all eligible image pairs.
//!
//! Produces the full N x N table of [`MatchesInfo`] (flat, indexed
//! `i * n + j`), keeping sub-threshold pairs so downstream stages decide
//! what to use. The (j, i) entry mirrors (i, j) with the transform
//! inverted.

use nalgebra::{DMatrix, DVector, Matrix3, Point2, Vector3};
use rayon::prelude::*;
use stitch_core::{
    FeatureMatch, MatcherKind, Ransac, RobustConfig, RobustModel, RobustResult,
};
use tracing::debug;

use crate::{match_descriptors, ImageFeatures};

/// Geometric match state for one ordered image pair.
#[derive(Debug, Clone, Default)]
pub struct MatchesInfo {
    pub src_img_idx: usize,
    pub dst_img_idx: usize,
    pub matches: Vec<FeatureMatch>,
    pub inliers_mask: Vec<bool>,
    pub num_inliers: usize,
    pub h: Option<Matrix3<f64>>,
    pub confidence: f64,
}

// A pair needs this many tentative matches before geometry is attempted,
// and this many inliers before the transform is re-fit on them.
const MIN_TENTATIVE_MATCHES: usize = 6;
const MIN_INLIERS_FOR_REFINE: usize = 6;

pub struct PairwiseMatcher {
    kind: MatcherKind,
    match_conf: f32,
    range_width: Option<usize>,
    ransac: RobustConfig,
}

impl PairwiseMatcher {
    pub fn new(kind: MatcherKind, match_conf: f32) -> Self {
        Self {
            kind,
            match_conf,
            range_width: None,
            ransac: RobustConfig::default(),
        }
    }

    /// Only match images whose indices differ by less than `width`
    /// (sequential capture order), bounding cost to O(N * width).
    pub fn with_range_width(mut self, width: Option<usize>) -> Self {
        self.range_width = width;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ransac.seed = Some(seed);
        self
    }

    /// Match every eligible pair. Returns the flat N x N table.
    pub fn match_features(&self, features: &[ImageFeatures]) -> Vec<MatchesInfo> {
        let n = features.len();
        let mut table = vec![MatchesInfo::default(); n * n];

        let mut pair_list = Vec::new();
        for i in 0..n {
            for j in i + 1..n {
                if let Some(width) = self.range_width {
                    if j - i >= width {
                        continue;
                    }
                }
                pair_list.push((i, j));
            }
        }

        let results: Vec<(usize, usize, MatchesInfo)> = pair_list
            .par_iter()
            .map(|&(i, j)| {
                let info = self.match_pair(&features[i], &features[j], (i * n + j) as u64);
                (i, j, info)
            })
            .collect();

        for (i, j, info) in results {
            debug!(
                src = i,
                dst = j,
                matches = info.matches.len(),
                inliers = info.num_inliers,
                confidence = info.confidence,
                "pairwise match"
            );
            table[j * n + i] = dual(&info);
            table[i * n + j] = info;
        }

        table
    }

    fn match_pair(&self, f1: &ImageFeatures, f2: &ImageFeatures, pair_id: u64) -> MatchesInfo {
        let matches = match_descriptors(&f1.descriptors, &f2.descriptors, self.match_conf);
        let mut info = MatchesInfo {
            src_img_idx: f1.img_idx,
            dst_img_idx: f2.img_idx,
            matches,
            ..Default::default()
        };

        if info.matches.len() < MIN_TENTATIVE_MATCHES {
            return info;
        }

        // Transforms are estimated on centre-shifted coordinates; the pose
        // estimator restores the principal point afterwards.
        let c1 = (f1.img_size.0 as f64 * 0.5, f1.img_size.1 as f64 * 0.5);
        let c2 = (f2.img_size.0 as f64 * 0.5, f2.img_size.1 as f64 * 0.5);
        let pairs: Vec<PointPair> = info
            .matches
            .iter()
            .map(|m| PointPair {
                src: Point2::new(
                    f1.keypoints[m.query_idx].x - c1.0,
                    f1.keypoints[m.query_idx].y - c1.1,
                ),
                dst: Point2::new(
                    f2.keypoints[m.train_idx].x - c2.0,
                    f2.keypoints[m.train_idx].y - c2.1,
                ),
            })
            .collect();

        let mut config = self.ransac.clone();
        if let Some(seed) = config.seed {
            config.seed = Some(seed.wrapping_add(pair_id));
        }
        let result: RobustResult<Matrix3<f64>> = match self.kind {
            MatcherKind::Homography => Ransac::new(config).run(&HomographyModel, &pairs),
            MatcherKind::Affine => Ransac::new(config).run(&AffineModel, &pairs),
        };

        let Some(h) = result.model else {
            return info;
        };
        if h.determinant().abs() < f64::EPSILON {
            return info;
        }

        info.inliers_mask = result.inliers;
        info.num_inliers = result.num_inliers;
        info.h = Some(h);

        // Inliers over an affine function of the match count; suspiciously
        // high values mean near-identical frames and are rejected outright.
        info.confidence = info.num_inliers as f64 / (8.0 + 0.3 * info.matches.len() as f64);
        if info.confidence > 3.0 {
            info.confidence = 0.0;
        }

        if info.num_inliers >= MIN_INLIERS_FOR_REFINE {
            let inlier_pairs: Vec<&PointPair> = pairs
                .iter()
                .zip(&info.inliers_mask)
                .filter_map(|(p, &keep)| keep.then_some(p))
                .collect();
            let refined = match self.kind {
                MatcherKind::Homography => dlt_homography(&inlier_pairs),
                MatcherKind::Affine => fit_affine(&inlier_pairs),
            };
            if let Some(refined) = refined {
                info.h = Some(refined);
            }
        }

        info
    }
}

fn dual(info: &MatchesInfo) -> MatchesInfo {
    MatchesInfo {
        src_img_idx: info.dst_img_idx,
        dst_img_idx: info.src_img_idx,
        matches: info.matches.iter().map(FeatureMatch::flipped).collect(),
        inliers_mask: info.inliers_mask.clone(),
        num_inliers: info.num_inliers,
        h: info.h.and_then(|h| h.try_inverse()),
        confidence: info.confidence,
    }
}

#[derive(Debug, Clone)]
struct PointPair {
    src: Point2<f64>,
    dst: Point2<f64>,
}

struct HomographyModel;

impl RobustModel<PointPair> for HomographyModel {
    type Model = Matrix3<f64>;

    fn min_sample_size(&self) -> usize {
        4
    }

    fn estimate(&self, data: &[&PointPair]) -> Option<Self::Model> {
        dlt_homography(data)
    }

    fn compute_error(&self, model: &Self::Model, data: &PointPair) -> f64 {
        transfer_error(model, data)
    }
}

struct AffineModel;

impl RobustModel<PointPair> for AffineModel {
    type Model = Matrix3<f64>;

    fn min_sample_size(&self) -> usize {
        3
    }

    fn estimate(&self, data: &[&PointPair]) -> Option<Self::Model> {
        fit_affine(data)
    }

    fn compute_error(&self, model: &Self::Model, data: &PointPair) -> f64 {
        transfer_error(model, data)
    }
}

fn transfer_error(h: &Matrix3<f64>, pair: &PointPair) -> f64 {
    let p = h * Vector3::new(pair.src.x, pair.src.y, 1.0);
    if p.z.abs() < 1e-10 {
        return f64::INFINITY;
    }
    let dx = p.x / p.z - pair.dst.x;
    let dy = p.y / p.z - pair.dst.y;
    (dx * dx + dy * dy).sqrt()
}

/// Direct linear transform over the given correspondences. Needs at least
/// four; more are handled in the least-squares sense.
fn dlt_homography(pairs: &[&PointPair]) -> Option<Matrix3<f64>> {
    if pairs.len() < 4 {
        return None;
    }

    let rows = (pairs.len() * 2).max(9);
    let mut a = DMatrix::zeros(rows, 9);
    for (i, p) in pairs.iter().enumerate() {
        let (x1, y1) = (p.src.x, p.src.y);
        let (x2, y2) = (p.dst.x, p.dst.y);
        let r1 = i * 2;
        let r2 = r1 + 1;
        a[(r1, 0)] = -x1;
        a[(r1, 1)] = -y1;
        a[(r1, 2)] = -1.0;
        a[(r1, 6)] = x2 * x1;
        a[(r1, 7)] = x2 * y1;
        a[(r1, 8)] = x2;
        a[(r2, 3)] = -x1;
        a[(r2, 4)] = -y1;
        a[(r2, 5)] = -1.0;
        a[(r2, 6)] = y2 * x1;
        a[(r2, 7)] = y2 * y1;
        a[(r2, 8)] = y2;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let h = v_t.row(8);
    let mut m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    if m[(2, 2)].abs() > 1e-12 {
        m /= m[(2, 2)];
    }
    Some(m)
}

/// Least-squares 6-DOF affine fit, returned as a 3x3 with unit last row.
fn fit_affine(pairs: &[&PointPair]) -> Option<Matrix3<f64>> {
    if pairs.len() < 3 {
        return None;
    }

    let n = pairs.len();
    let mut a = DMatrix::zeros(n, 3);
    let mut bx = DVector::zeros(n);
    let mut by = DVector::zeros(n);
    for (i, p) in pairs.iter().enumerate() {
        a[(i, 0)] = p.src.x;
        a[(i, 1)] = p.src.y;
        a[(i, 2)] = 1.0;
        bx[i] = p.dst.x;
        by[i] = p.dst.y;
    }

    let svd = a.svd(true, true);
    let row_x = svd.solve(&bx, 1e-12).ok()?;
    let row_y = svd.solve(&by, 1e-12).ok()?;

    Some(Matrix3::new(
        row_x[0], row_x[1], row_x[2], row_y[0], row_y[1], row_y[2], 0.0, 0.0, 1.0,
    ))
}
