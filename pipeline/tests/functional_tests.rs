use image::RgbImage;
use nalgebra::{Matrix3, Vector3};
use stitch_core::{
    rgb_from_f32, BundleCost, EstimatorKind, MatcherKind, StitchConfig, WarpKind, WaveCorrectKind,
};
use stitch_imgproc::{remap_rgb, BorderMode, Interpolation};
use stitch_pipeline::{load_camera_record, PipelineError, Stitcher};

/// Piecewise-constant pseudo-random texture: corner-rich for the
/// detectors, low-frequency enough to survive resampling.
fn block_texture(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let bx = (x / 4) as u64;
            let by = (y / 4) as u64;
            let h = bx
                .wrapping_mul(2654435761)
                .wrapping_add(by.wrapping_mul(40503))
                .wrapping_mul(2246822519);
            img.put_pixel(
                x,
                y,
                image::Rgb([
                    (h >> 16) as u8,
                    (h >> 24) as u8,
                    (h >> 32) as u8,
                ]),
            );
        }
    }
    img
}

/// Render the view of `base` seen by a camera rotated by `r`, assuming
/// `base` was shot with intrinsics `k` at identity rotation.
fn synthesize_view(base: &RgbImage, k: &Matrix3<f64>, r: &Matrix3<f64>) -> RgbImage {
    let (width, height) = base.dimensions();
    // A pixel in the rotated view back-projects through R and lands in the
    // base view through K.
    let h = k * r * k.try_inverse().unwrap();
    let h = h.map(|v| v as f32);

    let mut map_x = vec![0.0f32; (width * height) as usize];
    let mut map_y = vec![0.0f32; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let p = h * nalgebra::Vector3::new(x as f32, y as f32, 1.0);
            let idx = (y * width + x) as usize;
            map_x[idx] = p.x / p.z;
            map_y[idx] = p.y / p.z;
        }
    }

    let warped = remap_rgb(
        base,
        &map_x,
        &map_y,
        width,
        height,
        Interpolation::Linear,
        BorderMode::Reflect,
    );
    rgb_from_f32(&warped)
}

#[test]
fn zero_or_one_image_aborts_without_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let stitcher = Stitcher::new(StitchConfig::default());

    for inputs in [vec![], vec![block_texture(200, 150)]] {
        let found = inputs.len();
        let err = stitcher.run(&inputs, dir.path()).unwrap_err();
        match err {
            PipelineError::InsufficientImages { found: f } => assert_eq!(f, found),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            std::fs::read_dir(dir.path()).unwrap().count(),
            0,
            "abort must not leave files behind"
        );
    }
}

#[test]
fn rotation_views_end_to_end() {
    let focal = 500.0;
    let (width, height) = (400u32, 300u32);
    let k = Matrix3::new(
        focal,
        0.0,
        width as f64 * 0.5,
        0.0,
        focal,
        height as f64 * 0.5,
        0.0,
        0.0,
        1.0,
    );

    let base = block_texture(width, height);
    // A little pitch on top of the yaw keeps every homography away from
    // the degenerate axis-aligned case.
    let poses = [(-0.05f64, 0.02f64), (0.0, -0.015), (0.05, 0.01)];
    let views: Vec<RgbImage> = poses
        .iter()
        .map(|&(yaw, pitch)| {
            let r = nalgebra::Rotation3::from_axis_angle(&Vector3::y_axis(), yaw).into_inner()
                * nalgebra::Rotation3::from_axis_angle(&Vector3::x_axis(), pitch).into_inner();
            synthesize_view(&base, &k, &r)
        })
        .collect();

    let config = StitchConfig {
        bundle_cost: BundleCost::None,
        wave_correct: Some(WaveCorrectKind::Horiz),
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let output = Stitcher::new(config).run(&views, dir.path()).unwrap();

    // Estimated focals should land near the synthesis ground truth.
    for cam in &output.cameras {
        assert!(
            cam.focal > focal * 0.5 && cam.focal < focal * 2.0,
            "estimated focal {} vs ground truth {focal}",
            cam.focal
        );
    }

    // One persisted record per camera, parseable, matching the run result.
    assert_eq!(output.camera_files.len(), 3);
    for (path, cam) in output.camera_files.iter().zip(&output.cameras) {
        assert!(path.exists());
        let record = load_camera_record(path).unwrap();
        let restored = record.to_camera();
        assert_eq!(restored.focal, cam.focal);
        assert_eq!(restored.r, cam.r);
        assert_eq!(restored.t, cam.t);
    }

    // All outputs share the canvas frame.
    let canvas_size = output.canvas.size();
    assert!(canvas_size.0 >= width && canvas_size.1 >= height);
    assert_eq!(output.outputs.len(), 3);
    for out in &output.outputs {
        assert_eq!(out.image.dimensions(), canvas_size);
        assert_eq!(out.mask.dimensions(), canvas_size);
        let set = out.mask.pixels().filter(|p| p.0[0] != 0).count();
        assert!(
            set as f64 > 0.5 * (width * height) as f64,
            "mask unexpectedly sparse: {set} pixels"
        );
    }
}

#[test]
fn affine_pipeline_on_translated_crops() {
    let base = block_texture(640, 300);
    let shift = 80u32;
    let views: Vec<RgbImage> = (0..3)
        .map(|i| {
            let mut view = RgbImage::new(400, 300);
            for y in 0..300 {
                for x in 0..400 {
                    view.put_pixel(x, y, *base.get_pixel(x + i * shift, y));
                }
            }
            view
        })
        .collect();

    let config = StitchConfig {
        matcher: MatcherKind::Affine,
        estimator: EstimatorKind::Affine,
        bundle_cost: BundleCost::None,
        wave_correct: None,
        warp: WarpKind::Affine,
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let output = Stitcher::new(config).run(&views, dir.path()).unwrap();

    // Pure horizontal translation: corners step by the crop shift.
    let base_corner = output.outputs[0].corner;
    for (i, out) in output.outputs.iter().enumerate() {
        let dx = out.corner.0 - base_corner.0;
        let dy = out.corner.1 - base_corner.1;
        assert!(
            (dx - (i as i32 * shift as i32)).abs() <= 2,
            "camera {i}: dx = {dx}"
        );
        assert!(dy.abs() <= 2, "camera {i}: dy = {dy}");
    }

    // The canvas covers all three placements.
    assert!(output.canvas.width >= 400 + 2 * shift as i32 - 2);
    for out in &output.outputs {
        assert_eq!(out.image.dimensions(), output.canvas.size());
    }
}
