//! Initial camera graph from pairwise matches.

use nalgebra::Matrix3;
use stitch_core::{normalize_rotation, CameraParams, EstimatorKind};
use stitch_features::{ImageFeatures, MatchesInfo};
use tracing::debug;

use crate::{estimate_focals, CalibError, Result};

/// Estimate an initial [`CameraParams`] for every image, or fail when the
/// match graph does not connect all of them.
pub fn estimate_cameras(
    features: &[ImageFeatures],
    pairwise: &[MatchesInfo],
    kind: EstimatorKind,
) -> Result<Vec<CameraParams>> {
    let num_images = features.len();
    if num_images < 2 {
        return Err(CalibError::EstimationFailed(format!(
            "need at least 2 images, got {num_images}"
        )));
    }

    let tree = max_spanning_tree(num_images, pairwise)?;
    let center = tree_center(num_images, &tree);
    debug!(center, "propagating rotations over the match tree");

    let mut cameras: Vec<CameraParams> = match kind {
        EstimatorKind::Homography => estimate_focals(features, pairwise)
            .into_iter()
            .map(|focal| CameraParams {
                focal,
                ..Default::default()
            })
            .collect(),
        EstimatorKind::Affine => vec![CameraParams::default(); num_images],
    };

    propagate_rotations(&mut cameras, pairwise, &tree, center, num_images);

    for (cam, feat) in cameras.iter_mut().zip(features) {
        // Transforms were estimated on centre-shifted points; move the
        // principal point back to the image centre.
        cam.ppx += 0.5 * feat.img_size.0 as f64;
        cam.ppy += 0.5 * feat.img_size.1 as f64;

        cam.r = truncate_precision(&cam.r);
        if kind == EstimatorKind::Homography {
            cam.r = normalize_rotation(&cam.r);
        }
    }

    Ok(cameras)
}

fn propagate_rotations(
    cameras: &mut [CameraParams],
    pairwise: &[MatchesInfo],
    tree: &[(usize, usize)],
    center: usize,
    num_images: usize,
) {
    let mut adjacency = vec![Vec::new(); num_images];
    for &(a, b) in tree {
        adjacency[a].push(b);
        adjacency[b].push(a);
    }

    let mut visited = vec![false; num_images];
    visited[center] = true;
    let mut queue = std::collections::VecDeque::from([center]);

    while let Some(from) = queue.pop_front() {
        for &to in &adjacency[from] {
            if visited[to] {
                continue;
            }

            // Tree edges are built from pairs with a transform; the reverse
            // direction falls back to inverting the forward entry.
            let h = pairwise[from * num_images + to].h.or_else(|| {
                pairwise[to * num_images + from]
                    .h
                    .and_then(|m| m.try_inverse())
            });
            let Some(h) = h else { continue };
            visited[to] = true;

            let k_from = cameras[from].k();
            let k_to = cameras[to].k();
            let h_inv = h.try_inverse().unwrap_or_else(Matrix3::identity);
            let k_from_inv = k_from.try_inverse().unwrap_or_else(Matrix3::identity);

            let relative = k_from_inv * h_inv * k_to;
            cameras[to].r = cameras[from].r * relative;
            queue.push_back(to);
        }
    }
}

/// Maximum spanning tree over inlier counts. Errors when the graph does
/// not connect every image.
fn max_spanning_tree(num_images: usize, pairwise: &[MatchesInfo]) -> Result<Vec<(usize, usize)>> {
    let mut edges = Vec::new();
    for i in 0..num_images {
        for j in i + 1..num_images {
            let info = &pairwise[i * num_images + j];
            if info.h.is_some() && info.num_inliers > 0 {
                edges.push((info.num_inliers, i, j));
            }
        }
    }
    edges.sort_by(|a, b| b.0.cmp(&a.0));

    let mut parent: Vec<usize> = (0..num_images).collect();
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        if parent[x] != x {
            let up = parent[x];
            let root = find(parent, up);
            parent[x] = root;
        }
        parent[x]
    }

    let mut tree = Vec::with_capacity(num_images - 1);
    for (_, i, j) in edges {
        let ri = find(&mut parent, i);
        let rj = find(&mut parent, j);
        if ri != rj {
            parent[ri] = rj;
            tree.push((i, j));
        }
    }

    if tree.len() + 1 < num_images {
        return Err(CalibError::EstimationFailed(format!(
            "match graph is disconnected: {} of {} images linked",
            tree.len() + 1,
            num_images
        )));
    }
    Ok(tree)
}

/// Node with the smallest eccentricity in the tree.
fn tree_center(num_images: usize, tree: &[(usize, usize)]) -> usize {
    let mut adjacency = vec![Vec::new(); num_images];
    for &(a, b) in tree {
        adjacency[a].push(b);
        adjacency[b].push(a);
    }

    let mut best = (usize::MAX, 0);
    for start in 0..num_images {
        let mut dist = vec![usize::MAX; num_images];
        dist[start] = 0;
        let mut queue = std::collections::VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &next in &adjacency[node] {
                if dist[next] == usize::MAX {
                    dist[next] = dist[node] + 1;
                    queue.push_back(next);
                }
            }
        }
        let ecc = dist.iter().copied().max().unwrap_or(0);
        if ecc < best.0 {
            best = (ecc, start);
        }
    }
    best.1
}

/// Rotations are stored at single precision right after estimation;
/// downstream stages must not depend on sub-f32 digits.
fn truncate_precision(r: &Matrix3<f64>) -> Matrix3<f64> {
    r.map(|v| v as f32 as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::rotation_rig;
    use approx::assert_relative_eq;

    #[test]
    fn estimates_connected_rig() {
        let rig = rotation_rig(3, 800.0, 0.15);
        let cameras =
            estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Homography).unwrap();

        assert_eq!(cameras.len(), 3);
        for cam in &cameras {
            // Focal within 10% of ground truth.
            assert!(
                (cam.focal - 800.0).abs() / 800.0 < 0.1,
                "focal {} too far from 800",
                cam.focal
            );
            assert_relative_eq!(cam.ppx, 320.0, epsilon = 1e-9);
            assert_relative_eq!(cam.ppy, 240.0, epsilon = 1e-9);

            let rrt = cam.r * cam.r.transpose();
            assert_relative_eq!(rrt, Matrix3::identity(), epsilon = 1e-6);
        }

        // Relative yaw between neighbours should be close to the rig step.
        let rel = cameras[0].r.transpose() * cameras[1].r;
        let angle = ((rel.trace() - 1.0) * 0.5).clamp(-1.0, 1.0).acos();
        assert!((angle - 0.15).abs() < 0.03, "relative angle {angle}");
    }

    #[test]
    fn disconnected_graph_is_an_error() {
        let mut rig = rotation_rig(3, 800.0, 0.15);
        // Sever image 2 from the graph entirely.
        for i in 0..3 {
            rig.pairwise[i * 3 + 2] = MatchesInfo::default();
            rig.pairwise[2 * 3 + i] = MatchesInfo::default();
        }

        let err = estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Homography)
            .unwrap_err();
        assert!(matches!(err, CalibError::EstimationFailed(_)));
    }

    #[test]
    fn affine_estimator_propagates_transforms() {
        let rig = rotation_rig(2, 700.0, 0.1);
        let cameras =
            estimate_cameras(&rig.features, &rig.pairwise, EstimatorKind::Affine).unwrap();
        assert_eq!(cameras.len(), 2);
        assert_relative_eq!(cameras[0].focal, 1.0);
    }
}
