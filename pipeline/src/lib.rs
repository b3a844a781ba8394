pub mod persist;
pub mod scale;
pub mod stitcher;

pub use persist::*;
pub use scale::*;
pub use stitcher::*;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Need at least 2 input images, got {found}")]
    InsufficientImages { found: usize },

    #[error(transparent)]
    Calib(#[from] stitch_calib::CalibError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
