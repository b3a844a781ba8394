pub mod canvas;

pub use canvas::*;
