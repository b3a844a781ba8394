//! The registration pipeline driver.
//!
//! Stage order per run:
//! extract -> match -> estimate -> adjust -> wave correct (optional) ->
//! persist params -> seam warp pass -> compose warp pass -> composite.
//! Any stage failure aborts the run; nothing is retried.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::{GrayImage, RgbImage};
use nalgebra::Matrix3;
use stitch_calib::{estimate_cameras, median_focal, wave_correct, BundleAdjuster};
use stitch_compose::{result_roi, Canvas};
use stitch_core::{full_mask, image_area, rgb_to_gray, CameraParams, Rect, StitchConfig, WarpKind};
use stitch_features::{FeatureFinder, PairwiseMatcher};
use stitch_imgproc::{resize_gray_scale, resize_rgb_scale};
use stitch_warp::{RotationWarper, WarpResult};
use tracing::{debug, info};

use crate::{save_camera_params, PipelineError, Result, ScaleRegimes};

/// One camera's registered output on the shared canvas.
#[derive(Debug)]
pub struct CameraOutput {
    pub image: RgbImage,
    pub mask: GrayImage,
    pub corner: (i32, i32),
}

#[derive(Debug)]
pub struct StitchOutput {
    pub cameras: Vec<CameraParams>,
    /// Canvas bounding rectangle shared by all outputs.
    pub canvas: Rect,
    pub outputs: Vec<CameraOutput>,
    pub camera_files: Vec<PathBuf>,
}

pub struct Stitcher {
    config: StitchConfig,
}

impl Stitcher {
    pub fn new(config: StitchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Run the full pipeline. Camera records land in `out_dir` right after
    /// the parameters are final; warped outputs are returned in memory.
    pub fn run(&self, inputs: &[RgbImage], out_dir: &Path) -> Result<StitchOutput> {
        if inputs.len() < 2 {
            return Err(PipelineError::InsufficientImages {
                found: inputs.len(),
            });
        }

        let cfg = &self.config;
        let mut scales =
            ScaleRegimes::new(cfg.work_megapix, cfg.seam_megapix, cfg.compose_megapix);
        let full_sizes: Vec<(u32, u32)> = inputs.iter().map(|i| i.dimensions()).collect();

        // EXTRACT
        let t = Instant::now();
        let mut finder = FeatureFinder::from_algorithm(cfg.features);
        let mut features = Vec::with_capacity(inputs.len());
        let mut seam_images = Vec::with_capacity(inputs.len());

        for (idx, full) in inputs.iter().enumerate() {
            let area = image_area(full.dimensions());
            let work_scale = scales.work_scale(area);
            let seam_scale = scales.seam_scale(area);

            let gray = rgb_to_gray(full);
            let work_gray = if work_scale < 1.0 {
                resize_gray_scale(&gray, work_scale)
            } else {
                gray
            };

            let feats = finder.find(&work_gray, idx);
            info!(image = idx + 1, features = feats.len(), "features in image");
            features.push(feats);

            seam_images.push(if seam_scale < 1.0 {
                resize_rgb_scale(full, seam_scale)
            } else {
                full.clone()
            });
        }
        finder.collect_garbage();
        info!(elapsed = ?t.elapsed(), "feature extraction done");

        // MATCH
        let t = Instant::now();
        let matcher =
            PairwiseMatcher::new(cfg.matcher, cfg.match_conf).with_range_width(cfg.range_width);
        let pairwise = matcher.match_features(&features);
        info!(elapsed = ?t.elapsed(), "pairwise matching done");

        // ESTIMATE
        let mut cameras = estimate_cameras(&features, &pairwise, cfg.estimator)?;

        // ADJUST
        let t = Instant::now();
        let adjuster = BundleAdjuster::new(cfg.bundle_cost, cfg.conf_thresh, cfg.refine_mask);
        adjuster.run(&features, &pairwise, &mut cameras)?;
        info!(elapsed = ?t.elapsed(), "bundle adjustment done");

        // The median focal fixes the warped-image scale for all cameras.
        let focals: Vec<f64> = cameras.iter().map(|c| c.focal).collect();
        let mut warped_image_scale = median_focal(&focals);

        // WAVE_CORRECT
        if let Some(kind) = cfg.wave_correct {
            let mut rmats: Vec<Matrix3<f64>> = cameras.iter().map(|c| c.r).collect();
            wave_correct(&mut rmats, kind);
            for (cam, r) in cameras.iter_mut().zip(rmats) {
                cam.r = r;
            }
        }

        // PERSIST_PARAMS
        let camera_files = save_camera_params(out_dir, &cameras)?;

        // WARP_SEAM_PASS: seam-scale warp fixes the corner layout used to
        // sanity-check the compose-regime geometry.
        let t = Instant::now();
        let seam_pass =
            SeamPassContext::new(cfg.warp, warped_image_scale, scales.seam_work_aspect());
        let seam_layout = seam_pass.warp_layout(&seam_images, &cameras);
        debug!(?seam_layout, "seam-scale layout");
        drop(seam_images);
        info!(elapsed = ?t.elapsed(), "seam warp pass done");

        // WARP_COMPOSE_PASS: the first image fixes the compose scale and
        // rescales every camera; a fresh warper is mandatory because the
        // focal scale changed.
        let t = Instant::now();
        let compose_scale = scales.compose_scale(image_area(inputs[0].dimensions()));
        let compose_work_aspect = scales.compose_work_aspect();
        warped_image_scale *= compose_work_aspect;
        let compose_pass = ComposePassContext::new(
            cfg.warp,
            warped_image_scale,
            compose_scale,
            compose_work_aspect,
            &mut cameras,
            &full_sizes,
        );

        // COMPOSITE: one zero-initialized canvas per camera, all sharing
        // the compose-regime bounding rectangle.
        let canvas_roi = result_roi(&compose_pass.corners, &compose_pass.sizes);
        let mut outputs = Vec::with_capacity(inputs.len());
        for (full, cam) in inputs.iter().zip(&cameras) {
            let warped = compose_pass.warp_image(full, cam);
            let mut canvas = Canvas::new(canvas_roi);
            canvas.place(&warped.image, &warped.mask, warped.corner);
            let (image, mask) = canvas.into_output();
            outputs.push(CameraOutput {
                image,
                mask,
                corner: warped.corner,
            });
        }
        info!(elapsed = ?t.elapsed(), canvas = ?canvas_roi, "compose pass done");

        Ok(StitchOutput {
            cameras,
            canvas: canvas_roi,
            outputs,
            camera_files,
        })
    }
}

/// Seam-regime warp context: a warper at `median_focal * seam_work_aspect`
/// plus the intrinsic rescaling into seam coordinates.
pub struct SeamPassContext {
    warper: RotationWarper,
    seam_work_aspect: f64,
}

impl SeamPassContext {
    pub fn new(kind: WarpKind, warped_image_scale: f64, seam_work_aspect: f64) -> Self {
        Self {
            warper: RotationWarper::new(kind, (warped_image_scale * seam_work_aspect) as f32),
            seam_work_aspect,
        }
    }

    /// Warp every seam-scale image and report the corner layout. The
    /// warped buffers are dropped on the spot; only the layout survives
    /// this pass.
    pub fn warp_layout(
        &self,
        seam_images: &[RgbImage],
        cameras: &[CameraParams],
    ) -> Vec<((i32, i32), (u32, u32))> {
        seam_images
            .iter()
            .zip(cameras)
            .map(|(img, cam)| {
                let k = scaled_intrinsics(cam, self.seam_work_aspect);
                let mask = full_mask(img.width(), img.height());
                let result = self.warper.warp(img, &mask, &k, &cam.r);
                (result.corner, result.size)
            })
            .collect()
    }
}

/// Compose-regime warp context. Construction is the scale-fixing step:
/// cameras are rescaled in place and the final corner layout computed.
pub struct ComposePassContext {
    warper: RotationWarper,
    compose_scale: f64,
    pub corners: Vec<(i32, i32)>,
    pub sizes: Vec<(u32, u32)>,
}

impl ComposePassContext {
    pub fn new(
        kind: WarpKind,
        warped_image_scale: f64,
        compose_scale: f64,
        compose_work_aspect: f64,
        cameras: &mut [CameraParams],
        full_sizes: &[(u32, u32)],
    ) -> Self {
        for cam in cameras.iter_mut() {
            cam.focal *= compose_work_aspect;
            cam.ppx *= compose_work_aspect;
            cam.ppy *= compose_work_aspect;
        }

        let warper = RotationWarper::new(kind, warped_image_scale as f32);
        let mut corners = Vec::with_capacity(cameras.len());
        let mut sizes = Vec::with_capacity(cameras.len());
        for (cam, &(w, h)) in cameras.iter().zip(full_sizes) {
            let sz = compose_dims((w, h), compose_scale);
            let roi = warper.warp_roi(sz, &cam.k(), &cam.r);
            corners.push(roi.tl());
            sizes.push(roi.size());
        }

        Self {
            warper,
            compose_scale,
            corners,
            sizes,
        }
    }

    pub fn warp_image(&self, full: &RgbImage, cam: &CameraParams) -> WarpResult {
        let img: Cow<RgbImage> = if needs_resize(self.compose_scale) {
            Cow::Owned(resize_rgb_scale(full, self.compose_scale))
        } else {
            Cow::Borrowed(full)
        };
        let mask = full_mask(img.width(), img.height());
        self.warper.warp(&img, &mask, &cam.k(), &cam.r)
    }
}

fn scaled_intrinsics(cam: &CameraParams, s: f64) -> Matrix3<f64> {
    let mut k = cam.k();
    k[(0, 0)] *= s;
    k[(0, 2)] *= s;
    k[(1, 1)] *= s;
    k[(1, 2)] *= s;
    k
}

// Resize only when the compose scale deviates noticeably from native.
fn needs_resize(compose_scale: f64) -> bool {
    (compose_scale - 1.0).abs() > 1e-1
}

fn compose_dims(full: (u32, u32), compose_scale: f64) -> (u32, u32) {
    if needs_resize(compose_scale) {
        (
            (full.0 as f64 * compose_scale).round().max(1.0) as u32,
            (full.1 as f64 * compose_scale).round().max(1.0) as u32,
        )
    } else {
        full
    }
}
