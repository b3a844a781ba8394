pub mod brief;
pub mod descriptor;
pub mod fast;
pub mod finder;
pub mod harris;
pub mod matcher;
pub mod orb;
pub mod pairwise;

pub use brief::*;
pub use descriptor::*;
pub use fast::*;
pub use finder::*;
pub use harris::*;
pub use matcher::*;
pub use orb::*;
pub use pairwise::*;

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Detection error: {0}")]
    DetectionError(String),

    #[error("Matching error: {0}")]
    MatchingError(String),
}
