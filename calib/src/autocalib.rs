//! Focal length recovery from pairwise homographies.

use nalgebra::Matrix3;
use stitch_features::{ImageFeatures, MatchesInfo};
use tracing::debug;

/// Focal candidates `(f_src, f_dst)` decomposed from a rotation-induced
/// homography between two views. Either side can fail when the
/// corresponding quadratic has no positive root.
pub fn focals_from_homography(h: &Matrix3<f64>) -> (Option<f64>, Option<f64>) {
    let h = [
        h[(0, 0)],
        h[(0, 1)],
        h[(0, 2)],
        h[(1, 0)],
        h[(1, 1)],
        h[(1, 2)],
        h[(2, 0)],
        h[(2, 1)],
        h[(2, 2)],
    ];

    let f_dst = {
        let d1 = h[6] * h[7];
        let d2 = (h[7] - h[6]) * (h[7] + h[6]);
        let mut v1 = -(h[0] * h[1] + h[3] * h[4]) / d1;
        let mut v2 = (h[0] * h[0] + h[3] * h[3] - h[1] * h[1] - h[4] * h[4]) / d2;
        if v1 < v2 {
            std::mem::swap(&mut v1, &mut v2);
        }
        pick_focal(v1, v2, d1, d2)
    };

    let f_src = {
        let d1 = h[0] * h[3] + h[1] * h[4];
        let d2 = h[0] * h[0] + h[1] * h[1] - h[3] * h[3] - h[4] * h[4];
        let mut v1 = -h[2] * h[5] / d1;
        let mut v2 = (h[5] * h[5] - h[2] * h[2]) / d2;
        if v1 < v2 {
            std::mem::swap(&mut v1, &mut v2);
        }
        pick_focal(v1, v2, d1, d2)
    };

    (f_src, f_dst)
}

fn pick_focal(v1: f64, v2: f64, d1: f64, d2: f64) -> Option<f64> {
    // NaN/inf from degenerate denominators fail every comparison below.
    let f2 = if v1 > 0.0 && v2 > 0.0 {
        if d1.abs() > d2.abs() {
            v1
        } else {
            v2
        }
    } else if v1 > 0.0 {
        v1
    } else {
        return None;
    };
    f2.is_finite().then(|| f2.sqrt())
}

/// Initial focal guess for every camera: the median over all per-pair
/// candidates when enough pairs decompose, otherwise a naive guess from
/// the image dimensions.
pub fn estimate_focals(features: &[ImageFeatures], pairwise: &[MatchesInfo]) -> Vec<f64> {
    let num_images = features.len();
    let mut all_focals = Vec::new();

    for info in pairwise {
        let Some(h) = info.h else { continue };
        if let (Some(f0), Some(f1)) = focals_from_homography(&h) {
            all_focals.push((f0 * f1).sqrt());
        }
    }

    if all_focals.len() >= num_images.saturating_sub(1) && !all_focals.is_empty() {
        let focal = median_focal(&all_focals);
        vec![focal; num_images]
    } else {
        debug!("focal decomposition too sparse, falling back to image-size guess");
        let sum: f64 = features
            .iter()
            .map(|f| f.img_size.0 as f64 + f.img_size.1 as f64)
            .sum();
        vec![sum / num_images as f64; num_images]
    }
}

/// Exact median: middle element for odd counts, mean of the two middle
/// elements for even counts.
pub fn median_focal(focals: &[f64]) -> f64 {
    let mut sorted = focals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn median_of_odd_set() {
        assert_relative_eq!(median_focal(&[30.0, 10.0, 20.0]), 20.0);
    }

    #[test]
    fn median_of_even_set() {
        assert_relative_eq!(median_focal(&[40.0, 10.0, 30.0, 20.0]), 25.0);
    }

    #[test]
    fn focal_recovered_from_rotation_homography() {
        let f = 800.0;
        let k = Matrix3::new(f, 0.0, 0.0, 0.0, f, 0.0, 0.0, 0.0, 1.0);
        let r = nalgebra::Rotation3::from_axis_angle(&Vector3::y_axis(), 0.2).into_inner()
            * nalgebra::Rotation3::from_axis_angle(&Vector3::x_axis(), 0.05).into_inner();
        let h = k * r.try_inverse().unwrap() * k.try_inverse().unwrap();

        let (f0, f1) = focals_from_homography(&h);
        assert_relative_eq!(f0.unwrap(), f, max_relative = 1e-6);
        assert_relative_eq!(f1.unwrap(), f, max_relative = 1e-6);
    }

    #[test]
    fn translation_homography_has_no_focal() {
        let h = Matrix3::new(1.0, 0.0, 25.0, 0.0, 1.0, -4.0, 0.0, 0.0, 1.0);
        let (f0, f1) = focals_from_homography(&h);
        assert!(f0.is_none());
        assert!(f1.is_none());
    }
}
