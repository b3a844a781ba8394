pub mod camera;
pub mod config;
pub mod geometry;
pub mod image;
pub mod keypoint;
pub mod robust;

pub use camera::*;
pub use config::*;
pub use geometry::*;
pub use crate::image::*;
pub use keypoint::*;
pub use robust::*;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown {kind} name: '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("Invalid refinement mask '{0}': expected 5 characters")]
    InvalidRefinementMask(String),
}
