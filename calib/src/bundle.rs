//! Joint nonlinear refinement of all camera parameters.
//!
//! Levenberg-Marquardt over a packed parameter vector with a
//! central-difference Jacobian. Only pairs above the confidence threshold
//! contribute residuals; the refinement mask freezes intrinsic entries by
//! zeroing their Jacobian columns.

use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, Vector3};
use stitch_core::{BundleCost, CameraParams, RefinementMask};
use stitch_features::{ImageFeatures, MatchesInfo};
use tracing::debug;

use crate::{CalibError, Result};

pub struct BundleAdjuster {
    cost: BundleCost,
    conf_thresh: f64,
    refine_mask: RefinementMask,
    max_iterations: usize,
}

impl BundleAdjuster {
    pub fn new(cost: BundleCost, conf_thresh: f64, refine_mask: RefinementMask) -> Self {
        Self {
            cost,
            conf_thresh,
            refine_mask,
            max_iterations: 50,
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Refine `cameras` in place. A no-op when the cost is [`BundleCost::None`].
    pub fn run(
        &self,
        features: &[ImageFeatures],
        pairwise: &[MatchesInfo],
        cameras: &mut [CameraParams],
    ) -> Result<()> {
        if self.cost == BundleCost::None {
            return Ok(());
        }

        let problem = Problem::build(self.cost, self.conf_thresh, features, pairwise, cameras);
        if problem.edges.is_empty() {
            return Err(CalibError::AdjusterFailed(
                "no pairs above the confidence threshold".into(),
            ));
        }

        let mut params = problem.pack(cameras);
        let active = problem.active_params(&self.refine_mask, cameras.len());

        let mut residuals = problem.residuals(&params);
        let mut err = residuals.norm_squared();
        let mut lambda = 1e-3;
        debug!(cost = ?self.cost, edges = problem.edges.len(), initial_err = err, "bundle adjustment");

        for _ in 0..self.max_iterations {
            let jac = problem.numeric_jacobian(&params, &active);
            let jtj = jac.transpose() * &jac;
            let jtr = jac.transpose() * &residuals;

            // A vanished gradient means the input was already optimal.
            if jtr.amax() < 1e-9 {
                break;
            }

            let mut lhs = jtj;
            for d in 0..lhs.nrows() {
                if active[d] {
                    lhs[(d, d)] *= 1.0 + lambda;
                } else {
                    lhs[(d, d)] = 1.0;
                }
            }

            let neg_jtr = -&jtr;
            let delta = match lhs.clone().cholesky() {
                Some(ch) => ch.solve(&neg_jtr),
                None => lhs
                    .lu()
                    .solve(&neg_jtr)
                    .ok_or_else(|| CalibError::AdjusterFailed("singular normal equations".into()))?,
            };
            if !delta.iter().all(|v| v.is_finite()) {
                return Err(CalibError::AdjusterFailed(
                    "non-finite update step".into(),
                ));
            }

            let next_params = &params + &delta;
            let next_residuals = problem.residuals(&next_params);
            let next_err = next_residuals.norm_squared();

            if next_err.is_finite() && next_err < err {
                let improvement = err - next_err;
                params = next_params;
                residuals = next_residuals;
                err = next_err;
                lambda = (lambda / 10.0).max(1e-12);

                if delta.norm() < 1e-10 * (1.0 + params.norm())
                    || improvement < 1e-12 * (1.0 + err)
                {
                    break;
                }
            } else {
                lambda *= 10.0;
                // Damping exhausted without a better step: the cost has
                // plateaued as far as this parametrization can go.
                if lambda > 1e12 {
                    break;
                }
            }
        }

        if !err.is_finite() {
            return Err(CalibError::AdjusterFailed("diverged to non-finite cost".into()));
        }

        debug!(final_err = err, "bundle adjustment done");
        problem.unpack(&params, cameras);
        Ok(())
    }
}

/// Inlier correspondences of one over-threshold pair, in raw pixel
/// coordinates of the work-scale images.
struct Edge {
    cam1: usize,
    cam2: usize,
    points: Vec<(f64, f64, f64, f64)>,
}

struct Problem {
    cost: BundleCost,
    edges: Vec<Edge>,
    /// Fixed per-camera context the parameter vector does not carry:
    /// (ppx, ppy, aspect).
    fixed: Vec<(f64, f64, f64)>,
}

impl Problem {
    fn build(
        cost: BundleCost,
        conf_thresh: f64,
        features: &[ImageFeatures],
        pairwise: &[MatchesInfo],
        cameras: &[CameraParams],
    ) -> Self {
        let n = features.len();
        let mut edges = Vec::new();

        for i in 0..n {
            for j in i + 1..n {
                let info = &pairwise[i * n + j];
                if info.confidence <= conf_thresh || info.h.is_none() {
                    continue;
                }

                let points = info
                    .matches
                    .iter()
                    .zip(&info.inliers_mask)
                    .filter(|(_, &inlier)| inlier)
                    .map(|(m, _)| {
                        let p1 = &features[i].keypoints[m.query_idx];
                        let p2 = &features[j].keypoints[m.train_idx];
                        (p1.x, p1.y, p2.x, p2.y)
                    })
                    .collect::<Vec<_>>();

                if !points.is_empty() {
                    edges.push(Edge {
                        cam1: i,
                        cam2: j,
                        points,
                    });
                }
            }
        }

        let fixed = cameras.iter().map(|c| (c.ppx, c.ppy, c.aspect)).collect();
        Self { cost, edges, fixed }
    }

    fn params_per_camera(&self) -> usize {
        match self.cost {
            BundleCost::Reproj => 7,
            BundleCost::Ray | BundleCost::Affine => 4,
            BundleCost::None => 0,
        }
    }

    fn pack(&self, cameras: &[CameraParams]) -> DVector<f64> {
        let np = self.params_per_camera();
        let mut params = DVector::zeros(cameras.len() * np);

        for (i, cam) in cameras.iter().enumerate() {
            let base = i * np;
            match self.cost {
                BundleCost::Reproj => {
                    let rvec = Rotation3::from_matrix_unchecked(cam.r).scaled_axis();
                    params[base] = cam.focal;
                    params[base + 1] = cam.ppx;
                    params[base + 2] = cam.ppy;
                    params[base + 3] = cam.aspect;
                    params[base + 4] = rvec.x;
                    params[base + 5] = rvec.y;
                    params[base + 6] = rvec.z;
                }
                BundleCost::Ray => {
                    let rvec = Rotation3::from_matrix_unchecked(cam.r).scaled_axis();
                    params[base] = cam.focal;
                    params[base + 1] = rvec.x;
                    params[base + 2] = rvec.y;
                    params[base + 3] = rvec.z;
                }
                BundleCost::Affine => {
                    // Similarity part of the affine camera matrix.
                    params[base] = cam.r[(0, 0)];
                    params[base + 1] = cam.r[(1, 0)];
                    params[base + 2] = cam.r[(0, 2)];
                    params[base + 3] = cam.r[(1, 2)];
                }
                BundleCost::None => {}
            }
        }
        params
    }

    fn unpack(&self, params: &DVector<f64>, cameras: &mut [CameraParams]) {
        let np = self.params_per_camera();
        for (i, cam) in cameras.iter_mut().enumerate() {
            let base = i * np;
            match self.cost {
                BundleCost::Reproj => {
                    cam.focal = params[base];
                    cam.ppx = params[base + 1];
                    cam.ppy = params[base + 2];
                    cam.aspect = params[base + 3];
                    let rvec =
                        Vector3::new(params[base + 4], params[base + 5], params[base + 6]);
                    cam.r = Rotation3::new(rvec).into_inner();
                }
                BundleCost::Ray => {
                    cam.focal = params[base];
                    let rvec =
                        Vector3::new(params[base + 1], params[base + 2], params[base + 3]);
                    cam.r = Rotation3::new(rvec).into_inner();
                }
                BundleCost::Affine => {
                    let (a, b) = (params[base], params[base + 1]);
                    let (tx, ty) = (params[base + 2], params[base + 3]);
                    cam.r = Matrix3::new(a, -b, tx, b, a, ty, 0.0, 0.0, 1.0);
                }
                BundleCost::None => {}
            }
        }
    }

    fn active_params(&self, mask: &RefinementMask, num_cameras: usize) -> Vec<bool> {
        let np = self.params_per_camera();
        let mut active = vec![true; num_cameras * np];
        for i in 0..num_cameras {
            let base = i * np;
            match self.cost {
                BundleCost::Reproj => {
                    active[base] = mask.refine_focal();
                    active[base + 1] = mask.refine_ppx();
                    active[base + 2] = mask.refine_ppy();
                    active[base + 3] = mask.refine_aspect();
                }
                BundleCost::Ray => {
                    active[base] = mask.refine_focal();
                }
                // The affine cost refines its full 4-DOF similarity.
                BundleCost::Affine | BundleCost::None => {}
            }
        }
        active
    }

    fn residual_len(&self) -> usize {
        let per_point = if self.cost == BundleCost::Ray { 3 } else { 2 };
        self.edges.iter().map(|e| e.points.len() * per_point).sum()
    }

    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let np = self.params_per_camera();
        let mut res = DVector::zeros(self.residual_len());
        let mut at = 0;

        for edge in &self.edges {
            let b1 = edge.cam1 * np;
            let b2 = edge.cam2 * np;

            match self.cost {
                BundleCost::Reproj => {
                    let k1 = self.intrinsic(params, edge.cam1, true);
                    let k2 = self.intrinsic(params, edge.cam2, true);
                    let r1 = rotation_at(params, b1 + 4);
                    let r2 = rotation_at(params, b2 + 4);
                    let k1_inv = k1.try_inverse().unwrap_or_else(Matrix3::identity);
                    let h = k2 * r2.transpose() * r1 * k1_inv;

                    for &(x1, y1, x2, y2) in &edge.points {
                        let p = h * Vector3::new(x1, y1, 1.0);
                        let z = if p.z.abs() < 1e-12 { 1e-12 } else { p.z };
                        res[at] = p.x / z - x2;
                        res[at + 1] = p.y / z - y2;
                        at += 2;
                    }
                }
                BundleCost::Ray => {
                    let k1 = self.intrinsic(params, edge.cam1, false);
                    let k2 = self.intrinsic(params, edge.cam2, false);
                    let r1 = rotation_at(params, b1 + 1);
                    let r2 = rotation_at(params, b2 + 1);
                    let m1 = r1 * k1.try_inverse().unwrap_or_else(Matrix3::identity);
                    let m2 = r2 * k2.try_inverse().unwrap_or_else(Matrix3::identity);
                    let mult = (params[b1] * params[b2]).abs().sqrt();

                    for &(x1, y1, x2, y2) in &edge.points {
                        let ray1 = (m1 * Vector3::new(x1, y1, 1.0)).normalize();
                        let ray2 = (m2 * Vector3::new(x2, y2, 1.0)).normalize();
                        let d = ray1 - ray2;
                        res[at] = mult * d.x;
                        res[at + 1] = mult * d.y;
                        res[at + 2] = mult * d.z;
                        at += 3;
                    }
                }
                BundleCost::Affine => {
                    let a1 = affine_at(params, b1);
                    let a2 = affine_at(params, b2);
                    let a2_inv = a2.try_inverse().unwrap_or_else(Matrix3::identity);
                    let m = a2_inv * a1;
                    let (cx1, cy1, _) = self.fixed[edge.cam1];
                    let (cx2, cy2, _) = self.fixed[edge.cam2];

                    for &(x1, y1, x2, y2) in &edge.points {
                        let p = m * Vector3::new(x1 - cx1, y1 - cy1, 1.0);
                        res[at] = p.x - (x2 - cx2);
                        res[at + 1] = p.y - (y2 - cy2);
                        at += 2;
                    }
                }
                BundleCost::None => {}
            }
        }

        res
    }

    /// K for a camera. Reproj carries principal point and aspect in the
    /// parameter vector; ray keeps them fixed.
    fn intrinsic(&self, params: &DVector<f64>, cam: usize, from_params: bool) -> Matrix3<f64> {
        let np = self.params_per_camera();
        let base = cam * np;
        let f = params[base];
        let (ppx, ppy, aspect) = if from_params {
            (params[base + 1], params[base + 2], params[base + 3])
        } else {
            self.fixed[cam]
        };
        Matrix3::new(f, 0.0, ppx, 0.0, f * aspect, ppy, 0.0, 0.0, 1.0)
    }

    fn numeric_jacobian(&self, params: &DVector<f64>, active: &[bool]) -> DMatrix<f64> {
        let n_res = self.residual_len();
        let n_params = params.len();
        let mut jac = DMatrix::zeros(n_res, n_params);

        for col in 0..n_params {
            if !active[col] {
                continue;
            }
            let eps = 1e-6 * (1.0 + params[col].abs());
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[col] += eps;
            minus[col] -= eps;

            let res_plus = self.residuals(&plus);
            let res_minus = self.residuals(&minus);
            for row in 0..n_res {
                jac[(row, col)] = (res_plus[row] - res_minus[row]) / (2.0 * eps);
            }
        }

        jac
    }
}

fn rotation_at(params: &DVector<f64>, base: usize) -> Matrix3<f64> {
    let rvec = Vector3::new(params[base], params[base + 1], params[base + 2]);
    Rotation3::new(rvec).into_inner()
}

fn affine_at(params: &DVector<f64>, base: usize) -> Matrix3<f64> {
    let (a, b) = (params[base], params[base + 1]);
    let (tx, ty) = (params[base + 2], params[base + 3]);
    Matrix3::new(a, -b, tx, b, a, ty, 0.0, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::rotation_rig;
    use crate::estimate_cameras;
    use approx::assert_relative_eq;
    use stitch_core::EstimatorKind;

    #[test]
    fn noop_adjuster_leaves_cameras_untouched() {
        let rig = rotation_rig(3, 800.0, 0.12);
        let mut cameras =
            estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Homography).unwrap();
        let before = cameras.clone();

        let adjuster = BundleAdjuster::new(BundleCost::None, 0.75, RefinementMask::all());
        adjuster.run(&rig.features, &rig.pairwise, &mut cameras).unwrap();

        for (a, b) in before.iter().zip(&cameras) {
            assert_relative_eq!(a.focal, b.focal);
            assert_relative_eq!(a.r, b.r);
        }
    }

    #[test]
    fn ray_adjustment_keeps_rotations_orthonormal() {
        let rig = rotation_rig(3, 800.0, 0.12);
        let mut cameras =
            estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Homography).unwrap();

        let adjuster = BundleAdjuster::new(BundleCost::Ray, 0.75, RefinementMask::all())
            .with_max_iterations(30);
        adjuster.run(&rig.features, &rig.pairwise, &mut cameras).unwrap();

        for cam in &cameras {
            let rrt = cam.r * cam.r.transpose();
            assert_relative_eq!(rrt, Matrix3::identity(), epsilon = 1e-9);
            assert!(cam.focal > 0.0);
            assert!((cam.focal - 800.0).abs() / 800.0 < 0.15, "focal {}", cam.focal);
        }
    }

    #[test]
    fn reproj_adjustment_reduces_cost_on_perturbed_rig() {
        let rig = rotation_rig(3, 800.0, 0.12);
        let mut cameras =
            estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Homography).unwrap();
        // Perturb the focal guess; reprojection refinement should pull it back.
        for cam in cameras.iter_mut() {
            cam.focal *= 1.08;
        }

        let adjuster = BundleAdjuster::new(BundleCost::Reproj, 0.75, RefinementMask::all())
            .with_max_iterations(40);
        adjuster.run(&rig.features, &rig.pairwise, &mut cameras).unwrap();

        for cam in &cameras {
            assert!(
                (cam.focal - 800.0).abs() / 800.0 < 0.05,
                "focal {} did not return to ground truth",
                cam.focal
            );
            let rrt = cam.r * cam.r.transpose();
            assert_relative_eq!(rrt, Matrix3::identity(), epsilon = 1e-9);
        }
    }

    #[test]
    fn frozen_mask_keeps_intrinsics_fixed() {
        let rig = rotation_rig(3, 800.0, 0.12);
        let mut cameras =
            estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Homography).unwrap();
        let focal_before: Vec<f64> = cameras.iter().map(|c| c.focal).collect();

        // '_' everywhere: only rotations may move.
        let mask = RefinementMask::parse("_____").unwrap();
        let adjuster = BundleAdjuster::new(BundleCost::Reproj, 0.75, mask);
        adjuster.run(&rig.features, &rig.pairwise, &mut cameras).unwrap();

        for (cam, before) in cameras.iter().zip(focal_before) {
            assert_relative_eq!(cam.focal, before);
        }
    }

    #[test]
    fn empty_problem_is_a_fatal_failure() {
        let rig = rotation_rig(2, 700.0, 0.1);
        let mut cameras =
            estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Homography).unwrap();

        // Threshold above every confidence: nothing to optimize.
        let adjuster = BundleAdjuster::new(BundleCost::Ray, 1e9, RefinementMask::all());
        let err = adjuster
            .run(&rig.features, &rig.pairwise, &mut cameras)
            .unwrap_err();
        assert!(matches!(err, CalibError::AdjusterFailed(_)));
    }
}
