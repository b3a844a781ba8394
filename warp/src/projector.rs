//! Projection math shared by the rotation warpers.
//!
//! Pixels back-project to world rays through `r_kinv = R * K^-1` and
//! forward-project through `k_rinv = K * R^-1`. The projection surface
//! (plane, cylinder, sphere) decides how rays map to warped coordinates,
//! scaled by the focal scale fixed at warper construction.

use nalgebra::Matrix3;
use stitch_core::WarpKind;

#[derive(Debug, Clone)]
pub struct Projector {
    pub kind: WarpKind,
    pub scale: f32,
    k_rinv: Matrix3<f32>,
    r_kinv: Matrix3<f32>,
}

impl Projector {
    pub fn new(kind: WarpKind, scale: f32, k: &Matrix3<f64>, r: &Matrix3<f64>) -> Self {
        let r_inv = r.try_inverse().unwrap_or_else(Matrix3::identity);
        let k_inv = k.try_inverse().unwrap_or_else(Matrix3::identity);
        Self {
            kind,
            scale,
            k_rinv: (k * r_inv).map(|v| v as f32),
            r_kinv: (r * k_inv).map(|v| v as f32),
        }
    }

    /// Source pixel to warped-plane coordinates.
    pub fn map_forward(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.r_kinv;
        let x_ = m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)];
        let y_ = m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)];
        let z_ = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)];

        match self.kind {
            WarpKind::Plane | WarpKind::Affine => {
                // Rays grazing the projection plane are clamped to keep the
                // result finite.
                let z = if z_.abs() < 1e-5 { 1e-5 } else { z_ };
                (self.scale * x_ / z, self.scale * y_ / z)
            }
            WarpKind::Cylindrical => {
                let u = self.scale * x_.atan2(z_);
                let v = self.scale * y_ / (x_ * x_ + z_ * z_).sqrt().max(1e-6);
                (u, v)
            }
            WarpKind::Spherical => {
                let u = self.scale * x_.atan2(z_);
                let norm = (x_ * x_ + y_ * y_ + z_ * z_).sqrt().max(1e-6);
                let w = (y_ / norm).clamp(-1.0, 1.0);
                let v = self.scale * (std::f32::consts::PI - w.acos());
                (u, v)
            }
        }
    }

    /// Warped-plane coordinates back to a source pixel. Rays that point
    /// behind the camera return (-1, -1), which samples as border.
    pub fn map_backward(&self, u: f32, v: f32) -> (f32, f32) {
        let u = u / self.scale;
        let v = v / self.scale;

        let (x_, y_, z_) = match self.kind {
            WarpKind::Plane | WarpKind::Affine => (u, v, 1.0),
            WarpKind::Cylindrical => (u.sin(), v, u.cos()),
            WarpKind::Spherical => {
                let sinv = (std::f32::consts::PI - v).sin();
                (
                    sinv * u.sin(),
                    (std::f32::consts::PI - v).cos(),
                    sinv * u.cos(),
                )
            }
        };

        let m = &self.k_rinv;
        let x = m[(0, 0)] * x_ + m[(0, 1)] * y_ + m[(0, 2)] * z_;
        let y = m[(1, 0)] * x_ + m[(1, 1)] * y_ + m[(1, 2)] * z_;
        let z = m[(2, 0)] * x_ + m[(2, 1)] * y_ + m[(2, 2)] * z_;

        if z > 0.0 {
            (x / z, y / z)
        } else {
            (-1.0, -1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn centered_k(f: f64, ppx: f64, ppy: f64) -> Matrix3<f64> {
        Matrix3::new(f, 0.0, ppx, 0.0, f, ppy, 0.0, 0.0, 1.0)
    }

    #[test]
    fn plane_identity_maps_are_translations() {
        let k = centered_k(500.0, 320.0, 240.0);
        let proj = Projector::new(WarpKind::Plane, 500.0, &k, &Matrix3::identity());

        let (u, v) = proj.map_forward(320.0, 240.0);
        assert!(u.abs() < 1e-3 && v.abs() < 1e-3);

        let (u, v) = proj.map_forward(420.0, 240.0);
        assert!((u - 100.0).abs() < 1e-2 && v.abs() < 1e-2);
    }

    #[test]
    fn forward_backward_round_trip() {
        let k = centered_k(600.0, 300.0, 200.0);
        let r = nalgebra::Rotation3::from_axis_angle(&Vector3::y_axis(), 0.2).into_inner();

        for kind in [
            WarpKind::Plane,
            WarpKind::Affine,
            WarpKind::Cylindrical,
            WarpKind::Spherical,
        ] {
            let proj = Projector::new(kind, 600.0, &k, &r);
            for &(x, y) in &[(10.0f32, 20.0), (300.0, 200.0), (550.0, 380.0)] {
                let (u, v) = proj.map_forward(x, y);
                let (bx, by) = proj.map_backward(u, v);
                assert!(
                    (bx - x).abs() < 0.1 && (by - y).abs() < 0.1,
                    "{kind:?}: ({x},{y}) -> ({u},{v}) -> ({bx},{by})"
                );
            }
        }
    }
}
