use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use stitch_core::{
    BundleCost, EstimatorKind, FeatureAlgorithm, MatcherKind, RefinementMask, StitchConfig,
    WarpKind, WaveCorrectKind,
};
use stitch_pipeline::{PipelineError, Stitcher};
use tracing::{info, warn};

/// Too few usable input images.
const EXIT_INSUFFICIENT_IMAGES: u8 = 2;

/// Estimate per-camera registration parameters for a set of overlapping
/// photographs and write each camera's warped view on a shared canvas.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Input image paths (at least 2).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Feature algorithm: orb | harris-brief.
    #[arg(long, default_value = "orb", value_parser = FeatureAlgorithm::from_str)]
    features: FeatureAlgorithm,

    /// Matcher strategy: homography | affine.
    #[arg(long, default_value = "homography", value_parser = MatcherKind::from_str)]
    matcher: MatcherKind,

    /// Only match images within this index window (sequential captures).
    #[arg(long)]
    range_width: Option<usize>,

    /// Pose estimator: homography | affine.
    #[arg(long, default_value = "homography", value_parser = EstimatorKind::from_str)]
    estimator: EstimatorKind,

    /// Bundle adjustment cost: reproj | ray | affine | no.
    #[arg(long = "ba", default_value = "ray", value_parser = BundleCost::from_str)]
    bundle_cost: BundleCost,

    /// Confidence threshold for pairs used by bundle adjustment.
    #[arg(long, default_value_t = 0.75)]
    conf_thresh: f64,

    /// 5-character refinement mask ('x' = refine): focal, skew, ppx,
    /// aspect, ppy.
    #[arg(long = "ba-refine-mask", default_value = "xxxxx", value_parser = RefinementMask::parse)]
    refine_mask: RefinementMask,

    /// Wave correction: no | horiz | vert.
    #[arg(long, default_value = "horiz")]
    wave_correct: String,

    /// Warp projection: plane | affine | cylindrical | spherical.
    #[arg(long = "warp", default_value = "plane", value_parser = WarpKind::from_str)]
    warp: WarpKind,

    /// Descriptor match confidence in [0, 1).
    #[arg(long, default_value_t = 0.3)]
    match_conf: f32,

    /// Megapixel budget for feature extraction (<= 0 keeps native size).
    #[arg(long, default_value_t = 0.6, allow_negative_numbers = true)]
    work_megapix: f64,

    /// Megapixel budget for the seam-scale layout pass.
    #[arg(long, default_value_t = 0.1, allow_negative_numbers = true)]
    seam_megapix: f64,

    /// Megapixel budget for final outputs (<= 0 keeps native size).
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    compose_megapix: f64,

    /// Directory for camera records and warped outputs.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Also write the warped validity mask per camera.
    #[arg(long)]
    save_masks: bool,
}

impl Args {
    fn wave_correct_kind(&self) -> Result<Option<WaveCorrectKind>, String> {
        match self.wave_correct.as_str() {
            "no" => Ok(None),
            other => WaveCorrectKind::from_str(other)
                .map(Some)
                .map_err(|e| e.to_string()),
        }
    }

    fn to_config(&self) -> Result<StitchConfig, String> {
        Ok(StitchConfig {
            features: self.features,
            matcher: self.matcher,
            range_width: self.range_width,
            estimator: self.estimator,
            bundle_cost: self.bundle_cost,
            conf_thresh: self.conf_thresh,
            refine_mask: self.refine_mask,
            wave_correct: self.wave_correct_kind()?,
            warp: self.warp,
            match_conf: self.match_conf,
            work_megapix: self.work_megapix,
            seam_megapix: self.seam_megapix,
            compose_megapix: self.compose_megapix,
        })
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Configuration errors abort before any image is touched.
    let config = match args.to_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    // Unreadable images are dropped; the remainder must still make a pair.
    let mut images = Vec::with_capacity(args.images.len());
    for path in &args.images {
        match image::open(path) {
            Ok(img) => images.push(img.to_rgb8()),
            Err(err) => warn!(path = %path.display(), %err, "skipping unreadable image"),
        }
    }
    if images.len() < 2 {
        eprintln!("error: need at least 2 usable images, got {}", images.len());
        return ExitCode::from(EXIT_INSUFFICIENT_IMAGES);
    }

    let output = match Stitcher::new(config).run(&images, &args.output_dir) {
        Ok(output) => output,
        Err(PipelineError::InsufficientImages { found }) => {
            eprintln!("error: need at least 2 usable images, got {found}");
            return ExitCode::from(EXIT_INSUFFICIENT_IMAGES);
        }
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    for (i, cam) in output.outputs.iter().enumerate() {
        let image_path = args.output_dir.join(format!("cam{}_warped.png", i + 1));
        if let Err(err) = cam.image.save(&image_path) {
            eprintln!("error: writing {}: {err}", image_path.display());
            return ExitCode::FAILURE;
        }

        if args.save_masks {
            let mask_path = args.output_dir.join(format!("cam{}_mask.png", i + 1));
            if let Err(err) = cam.mask.save(&mask_path) {
                eprintln!("error: writing {}: {err}", mask_path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    info!(
        cameras = output.cameras.len(),
        canvas = ?output.canvas,
        "registration complete"
    );
    ExitCode::SUCCESS
}
