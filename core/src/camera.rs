use nalgebra::{Matrix3, Vector3};

use crate::{CoreError, Result};

/// Per-camera intrinsic and extrinsic parameters.
///
/// Progressively refined along the pipeline: the pose estimator writes the
/// initial guess, bundle adjustment refines it, wave correction rotates it,
/// and the compose pass rescales focal and principal point. The rotation
/// must stay orthonormal through all of that; use [`normalize_rotation`]
/// after any operation that can degrade it.
#[derive(Debug, Clone)]
pub struct CameraParams {
    pub focal: f64,
    pub aspect: f64,
    pub ppx: f64,
    pub ppy: f64,
    pub r: Matrix3<f64>,
    pub t: Vector3<f64>,
}

impl CameraParams {
    /// Intrinsic matrix assembled from focal, aspect, and principal point.
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focal,
            0.0,
            self.ppx,
            0.0,
            self.focal * self.aspect,
            self.ppy,
            0.0,
            0.0,
            1.0,
        )
    }
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            focal: 1.0,
            aspect: 1.0,
            ppx: 0.0,
            ppy: 0.0,
            r: Matrix3::identity(),
            t: Vector3::zeros(),
        }
    }
}

/// Project a rotation estimate back onto SO(3) via SVD.
pub fn normalize_rotation(r: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = r.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => {
            let mut rot = u * v_t;
            // A reflection is not a rotation; flip the last axis back.
            if rot.determinant() < 0.0 {
                let mut u = u;
                u.column_mut(2).neg_mut();
                rot = u * v_t;
            }
            rot
        }
        _ => *r,
    }
}

/// Selects which intrinsic entries bundle adjustment may vary.
///
/// Derived once from a 5-character string where 'x' marks a refinable
/// entry, mapped positionally onto the 3x3 intrinsic layout:
/// `(0,0)` focal, `(0,1)` skew, `(0,2)` ppx, `(1,1)` aspect, `(1,2)` ppy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefinementMask {
    mask: [[bool; 3]; 3],
}

impl RefinementMask {
    const POSITIONS: [(usize, usize); 5] = [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2)];

    pub fn parse(spec: &str) -> Result<Self> {
        if spec.chars().count() != 5 {
            return Err(CoreError::InvalidRefinementMask(spec.to_string()));
        }
        let mut mask = [[false; 3]; 3];
        for (ch, (row, col)) in spec.chars().zip(Self::POSITIONS) {
            mask[row][col] = ch == 'x';
        }
        Ok(Self { mask })
    }

    /// Refine everything.
    pub fn all() -> Self {
        let mut mask = [[false; 3]; 3];
        for (row, col) in Self::POSITIONS {
            mask[row][col] = true;
        }
        Self { mask }
    }

    pub fn at(&self, row: usize, col: usize) -> bool {
        self.mask[row][col]
    }

    pub fn refine_focal(&self) -> bool {
        self.mask[0][0]
    }

    pub fn refine_skew(&self) -> bool {
        self.mask[0][1]
    }

    pub fn refine_ppx(&self) -> bool {
        self.mask[0][2]
    }

    pub fn refine_aspect(&self) -> bool {
        self.mask[1][1]
    }

    pub fn refine_ppy(&self) -> bool {
        self.mask[1][2]
    }
}
