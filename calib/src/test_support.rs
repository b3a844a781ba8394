//! Synthetic rotation rigs with exact pairwise geometry, shared by the
//! calibration tests.

use nalgebra::{Matrix3, Rotation3, Vector3};
use stitch_core::KeyPoint;
use stitch_features::{Descriptors, ImageFeatures, MatchesInfo};

pub struct SyntheticRig {
    pub features: Vec<ImageFeatures>,
    pub pairwise: Vec<MatchesInfo>,
    pub focal: f64,
    pub rotations: Vec<Matrix3<f64>>,
}

/// Cameras panning about the y axis in `yaw_step` increments, observing a
/// fixed bundle of rays with focal length `focal` on a 640x480 sensor.
/// Pairwise matches and homographies are exact; every match is an inlier.
pub fn rotation_rig(num_cameras: usize, focal: f64, yaw_step: f64) -> SyntheticRig {
    let (width, height) = (640u32, 480u32);
    let (cx, cy) = (width as f64 * 0.5, height as f64 * 0.5);
    let k = Matrix3::new(focal, 0.0, 0.0, 0.0, focal, 0.0, 0.0, 0.0, 1.0);
    let k_inv = k.try_inverse().unwrap();

    let rotations: Vec<Matrix3<f64>> = (0..num_cameras)
        .map(|i| Rotation3::from_axis_angle(&Vector3::y_axis(), yaw_step * i as f64).into_inner())
        .collect();

    // Rays covering the first camera's field of view, expressed in world
    // coordinates. A small cross-term keeps them in general position.
    let mut rays = Vec::new();
    for gy in 0..8 {
        for gx in 0..10 {
            let px = -280.0 + gx as f64 * 62.0 + gy as f64 * 1.5;
            let py = -200.0 + gy as f64 * 57.0 + gx as f64 * 2.0;
            rays.push((rotations[0] * k_inv * Vector3::new(px, py, 1.0)).normalize());
        }
    }

    // Keep rays that project inside every camera.
    let mut keypoints = vec![Vec::new(); num_cameras];
    'rays: for ray in &rays {
        let mut projected = Vec::with_capacity(num_cameras);
        for r in &rotations {
            let p = k * r.transpose() * ray;
            if p.z <= 0.1 {
                continue 'rays;
            }
            let x = p.x / p.z + cx;
            let y = p.y / p.z + cy;
            if !(0.0..width as f64).contains(&x) || !(0.0..height as f64).contains(&y) {
                continue 'rays;
            }
            projected.push((x, y));
        }
        for (cam, &(x, y)) in projected.iter().enumerate() {
            keypoints[cam].push(KeyPoint::new(x, y));
        }
    }

    let features: Vec<ImageFeatures> = keypoints
        .into_iter()
        .enumerate()
        .map(|(img_idx, kps)| ImageFeatures {
            img_idx,
            img_size: (width, height),
            keypoints: kps,
            descriptors: Descriptors::new(),
        })
        .collect();

    let num_points = features[0].keypoints.len();
    assert!(num_points >= 8, "rig too aggressive, no shared points left");

    let mut pairwise = vec![MatchesInfo::default(); num_cameras * num_cameras];
    for i in 0..num_cameras {
        for j in 0..num_cameras {
            if i == j {
                continue;
            }
            let h = k * rotations[j].transpose() * rotations[i] * k_inv;
            let matches = (0..num_points)
                .map(|p| stitch_core::FeatureMatch::new(p, p, 0.0))
                .collect::<Vec<_>>();
            pairwise[i * num_cameras + j] = MatchesInfo {
                src_img_idx: i,
                dst_img_idx: j,
                inliers_mask: vec![true; num_points],
                num_inliers: num_points,
                h: Some(h / h[(2, 2)]),
                confidence: 2.0,
                matches,
            };
        }
    }

    SyntheticRig {
        features,
        pairwise,
        focal,
        rotations,
    }
}
