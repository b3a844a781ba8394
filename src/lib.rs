pub use stitch_calib as calib;
pub use stitch_compose as compose;
pub use stitch_core as core;
pub use stitch_features as features;
pub use stitch_imgproc as imgproc;
pub use stitch_pipeline as pipeline;
pub use stitch_warp as warp;
