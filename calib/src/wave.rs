//! Wave correction: a single global rotation applied to every camera so
//! the rig's aggregate up direction lines up with a canonical axis.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use stitch_core::WaveCorrectKind;
use tracing::warn;

/// Rotate all camera rotations by one shared correction. No-op for fewer
/// than two cameras or a degenerate rig geometry.
pub fn wave_correct(rmats: &mut [Matrix3<f64>], kind: WaveCorrectKind) {
    if rmats.len() < 2 {
        return;
    }

    // Second moment of the camera x-axes.
    let mut moment = Matrix3::zeros();
    for r in rmats.iter() {
        let col = r.column(0);
        moment += col * col.transpose();
    }

    let eigen = SymmetricEigen::new(moment);
    let mut order: Vec<usize> = (0..3).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut rg1: Vector3<f64> = match kind {
        // Smallest-variance direction of the x-axes.
        WaveCorrectKind::Horiz => eigen.eigenvectors.column(order[0]).into_owned(),
        // Largest-variance direction.
        WaveCorrectKind::Vert => eigen.eigenvectors.column(order[2]).into_owned(),
    };

    let mut img_k = Vector3::zeros();
    for r in rmats.iter() {
        img_k += r.column(2);
    }

    let mut rg0 = rg1.cross(&img_k);
    let norm = rg0.norm();
    if norm < 1e-10 {
        warn!("degenerate rig geometry, skipping wave correction");
        return;
    }
    rg0 /= norm;

    let conf: f64 = match kind {
        WaveCorrectKind::Horiz => rmats.iter().map(|r| rg0.dot(&r.column(0))).sum(),
        WaveCorrectKind::Vert => rmats.iter().map(|r| -rg1.dot(&r.column(0))).sum(),
    };
    if conf < 0.0 {
        rg0 = -rg0;
        rg1 = -rg1;
    }

    let rg2 = rg0.cross(&rg1);

    let correction = Matrix3::from_rows(&[rg0.transpose(), rg1.transpose(), rg2.transpose()]);
    for r in rmats.iter_mut() {
        *r = correction * *r;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn yaw_pitch_rig() -> Vec<Matrix3<f64>> {
        // A row of cameras panning in yaw with a spurious common tilt: the
        // situation wave correction exists to fix.
        let tilt = nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), 0.1).into_inner();
        (0..5)
            .map(|i| tilt * nalgebra::Rotation3::from_axis_angle(&Vector3::y_axis(), 0.2 * i as f64).into_inner())
            .collect()
    }

    #[test]
    fn rotations_stay_orthonormal() {
        for kind in [WaveCorrectKind::Horiz, WaveCorrectKind::Vert] {
            let mut rig = yaw_pitch_rig();
            wave_correct(&mut rig, kind);
            for r in &rig {
                assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
                assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn correction_is_shared_across_cameras() {
        let rig = yaw_pitch_rig();
        let mut corrected = rig.clone();
        wave_correct(&mut corrected, WaveCorrectKind::Horiz);

        let first = corrected[0] * rig[0].transpose();
        for (after, before) in corrected.iter().zip(&rig).skip(1) {
            let this = after * before.transpose();
            assert_relative_eq!(this, first, epsilon = 1e-12);
        }
    }

    #[test]
    fn horiz_correction_levels_the_rig() {
        let mut rig = yaw_pitch_rig();
        wave_correct(&mut rig, WaveCorrectKind::Horiz);

        // After correction the x-axes should have no second-moment spread
        // along the rig's y axis beyond numeric noise.
        let mut spread = 0.0;
        for r in &rig {
            spread += r.column(0).y.powi(2);
        }
        assert!(spread < 1e-12, "residual waviness {spread}");
    }

    #[test]
    fn single_camera_is_untouched() {
        let mut rig = vec![nalgebra::Rotation3::from_axis_angle(&Vector3::x_axis(), 0.3).into_inner()];
        let before = rig.clone();
        wave_correct(&mut rig, WaveCorrectKind::Horiz);
        assert_relative_eq!(rig[0], before[0]);
    }
}
