pub mod autocalib;
pub mod bundle;
pub mod estimator;
pub mod test_support;
pub mod wave;

pub use autocalib::*;
pub use bundle::*;
pub use estimator::*;
pub use wave::*;

pub type Result<T> = std::result::Result<T, CalibError>;

#[derive(Debug, thiserror::Error)]
pub enum CalibError {
    #[error("Pose estimation failed: {0}")]
    EstimationFailed(String),

    #[error("Bundle adjustment failed: {0}")]
    AdjusterFailed(String),
}
