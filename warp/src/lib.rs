pub mod projector;
pub mod warper;

pub use projector::*;
pub use warper::*;
