use std::fmt;
use std::str::FromStr;

use crate::{CoreError, Result};

/// Descriptor algorithm used at work scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureAlgorithm {
    Orb,
    HarrisBrief,
}

/// Pairwise matching strategy, fixed before matching starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// Exhaustive best-of-2-nearest with homography verification.
    Homography,
    /// Assumes pure affine camera motion between views.
    Affine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    Homography,
    Affine,
}

/// Bundle adjustment cost, `None` disables refinement entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleCost {
    Reproj,
    Ray,
    Affine,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveCorrectKind {
    Horiz,
    Vert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarpKind {
    Plane,
    Affine,
    Cylindrical,
    Spherical,
}

macro_rules! impl_name_enum {
    ($ty:ident, $kind:literal, { $($name:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(CoreError::UnknownName {
                        kind: $kind,
                        name: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($name),)+
                }
            }
        }
    };
}

impl_name_enum!(FeatureAlgorithm, "feature algorithm", {
    "orb" => Orb,
    "harris-brief" => HarrisBrief,
});

impl_name_enum!(MatcherKind, "matcher", {
    "homography" => Homography,
    "affine" => Affine,
});

impl_name_enum!(EstimatorKind, "estimator", {
    "homography" => Homography,
    "affine" => Affine,
});

impl_name_enum!(BundleCost, "bundle adjustment cost", {
    "reproj" => Reproj,
    "ray" => Ray,
    "affine" => Affine,
    "no" => None,
});

impl_name_enum!(WaveCorrectKind, "wave correction", {
    "horiz" => Horiz,
    "vert" => Vert,
});

impl_name_enum!(WarpKind, "warp projection", {
    "plane" => Plane,
    "affine" => Affine,
    "cylindrical" => Cylindrical,
    "spherical" => Spherical,
});

/// Immutable run configuration, constructed once before the pipeline starts
/// and passed by reference through every stage.
///
/// Megapixel budgets at or below zero mean "no downscale" for the work and
/// compose regimes.
#[derive(Debug, Clone)]
pub struct StitchConfig {
    pub features: FeatureAlgorithm,
    pub matcher: MatcherKind,
    /// Only match image pairs whose indices are closer than this window.
    pub range_width: Option<usize>,
    pub estimator: EstimatorKind,
    pub bundle_cost: BundleCost,
    pub conf_thresh: f64,
    pub refine_mask: crate::RefinementMask,
    pub wave_correct: Option<WaveCorrectKind>,
    pub warp: WarpKind,
    pub match_conf: f32,
    pub work_megapix: f64,
    pub seam_megapix: f64,
    pub compose_megapix: f64,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            features: FeatureAlgorithm::Orb,
            matcher: MatcherKind::Homography,
            range_width: None,
            estimator: EstimatorKind::Homography,
            bundle_cost: BundleCost::Ray,
            conf_thresh: 0.75,
            refine_mask: crate::RefinementMask::all(),
            wave_correct: Some(WaveCorrectKind::Horiz),
            warp: WarpKind::Plane,
            match_conf: 0.3,
            work_megapix: 0.6,
            seam_megapix: 0.1,
            compose_megapix: -1.0,
        }
    }
}
