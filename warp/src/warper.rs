use image::{GrayImage, Rgb32FImage, RgbImage};
use nalgebra::Matrix3;
use stitch_core::{Rect, WarpKind};
use stitch_imgproc::{remap_gray, remap_rgb, BorderMode, Interpolation};

use crate::Projector;

/// A warped image with its validity mask and placement in the shared
/// canvas coordinate frame.
pub struct WarpResult {
    pub image: Rgb32FImage,
    pub mask: GrayImage,
    pub corner: (i32, i32),
    pub size: (u32, u32),
}

/// Warps images into the common output projection at one fixed focal
/// scale. A scale-regime transition needs a freshly constructed warper;
/// reusing one across regimes mixes focal scales and is incorrect.
pub struct RotationWarper {
    kind: WarpKind,
    scale: f32,
}

impl RotationWarper {
    pub fn new(kind: WarpKind, scale: f32) -> Self {
        Self { kind, scale }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Warp an image and its mask. The image is resampled bilinearly with
    /// reflected borders into the f32 working representation; the mask
    /// nearest-neighbour with a zero border.
    pub fn warp(&self, src: &RgbImage, mask: &GrayImage, k: &Matrix3<f64>, r: &Matrix3<f64>) -> WarpResult {
        let projector = Projector::new(self.kind, self.scale, k, r);
        let (roi, map_x, map_y) = self.build_maps(src.dimensions(), &projector);
        let (width, height) = roi.size();

        let image = remap_rgb(
            src,
            &map_x,
            &map_y,
            width,
            height,
            Interpolation::Linear,
            BorderMode::Reflect,
        );
        let mask = remap_gray(
            mask,
            &map_x,
            &map_y,
            width,
            height,
            Interpolation::Nearest,
            BorderMode::Constant(0),
        );

        WarpResult {
            image,
            mask,
            corner: roi.tl(),
            size: (width, height),
        }
    }

    /// Destination rectangle a source of the given size would occupy,
    /// without resampling anything.
    pub fn warp_roi(&self, src_size: (u32, u32), k: &Matrix3<f64>, r: &Matrix3<f64>) -> Rect {
        let projector = Projector::new(self.kind, self.scale, k, r);
        self.detect_result_roi(src_size, &projector)
    }

    fn build_maps(
        &self,
        src_size: (u32, u32),
        projector: &Projector,
    ) -> (Rect, Vec<f32>, Vec<f32>) {
        let roi = self.detect_result_roi(src_size, projector);
        let (width, height) = roi.size();

        let mut map_x = vec![0.0f32; width as usize * height as usize];
        let mut map_y = vec![0.0f32; width as usize * height as usize];
        for v in 0..height {
            for u in 0..width {
                let idx = v as usize * width as usize + u as usize;
                let (x, y) =
                    projector.map_backward((roi.x + u as i32) as f32, (roi.y + v as i32) as f32);
                map_x[idx] = x;
                map_y[idx] = y;
            }
        }

        (roi, map_x, map_y)
    }

    /// Forward-map the full source grid and take the bounding box.
    fn detect_result_roi(&self, src_size: (u32, u32), projector: &Projector) -> Rect {
        let mut tl_u = f32::INFINITY;
        let mut tl_v = f32::INFINITY;
        let mut br_u = f32::NEG_INFINITY;
        let mut br_v = f32::NEG_INFINITY;

        for y in 0..src_size.1 {
            for x in 0..src_size.0 {
                let (u, v) = projector.map_forward(x as f32, y as f32);
                tl_u = tl_u.min(u);
                tl_v = tl_v.min(v);
                br_u = br_u.max(u);
                br_v = br_v.max(v);
            }
        }

        let tl = (tl_u.floor() as i32, tl_v.floor() as i32);
        let br = (br_u.ceil() as i32, br_v.ceil() as i32);
        Rect::new(tl.0, tl.1, br.0 - tl.0 + 1, br.1 - tl.1 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_core::full_mask;

    fn centered_k(f: f64, width: u32, height: u32) -> Matrix3<f64> {
        Matrix3::new(
            f,
            0.0,
            width as f64 * 0.5,
            0.0,
            f,
            height as f64 * 0.5,
            0.0,
            0.0,
            1.0,
        )
    }

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.put_pixel(x, y, image::Rgb([(x % 256) as u8, (y % 256) as u8, 60]));
            }
        }
        img
    }

    #[test]
    fn plane_identity_warp_reproduces_source() {
        let (w, h) = (64, 48);
        let img = gradient_image(w, h);
        let k = centered_k(100.0, w, h);
        let warper = RotationWarper::new(WarpKind::Plane, 100.0);

        let result = warper.warp(&img, &full_mask(w, h), &k, &Matrix3::identity());

        // Identity rotation at matching focal scale is a pure shift by the
        // principal point.
        assert_eq!(result.corner, (-32, -24));
        assert_eq!(result.size, (w, h));
        for y in 0..h {
            for x in 0..w {
                let got = result.image.get_pixel(x, y);
                let want = img.get_pixel(x, y);
                assert!((got[0] - want[0] as f32).abs() < 0.5, "pixel ({x},{y})");
            }
        }
        assert!(result.mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn warp_roi_matches_warp_placement() {
        let (w, h) = (80, 60);
        let img = gradient_image(w, h);
        let k = centered_k(120.0, w, h);
        let r = nalgebra::Rotation3::from_axis_angle(&nalgebra::Vector3::y_axis(), 0.15).into_inner();

        for kind in [WarpKind::Plane, WarpKind::Cylindrical, WarpKind::Spherical] {
            let warper = RotationWarper::new(kind, 120.0);
            let roi = warper.warp_roi((w, h), &k, &r);
            let result = warper.warp(&img, &full_mask(w, h), &k, &r);
            assert_eq!(roi.tl(), result.corner, "{kind:?}");
            assert_eq!(roi.size(), result.size, "{kind:?}");
        }
    }

    #[test]
    fn mask_warp_keeps_zero_border() {
        let (w, h) = (40, 40);
        let img = gradient_image(w, h);
        let k = centered_k(60.0, w, h);
        let r = nalgebra::Rotation3::from_axis_angle(&nalgebra::Vector3::y_axis(), 0.4).into_inner();

        let warper = RotationWarper::new(WarpKind::Spherical, 60.0);
        let result = warper.warp(&img, &full_mask(w, h), &k, &r);

        // Some warped area falls outside the source; its mask must be 0.
        let zeros = result.mask.pixels().filter(|p| p.0[0] == 0).count();
        let ones = result.mask.pixels().filter(|p| p.0[0] == 255).count();
        assert!(zeros > 0, "expected unmapped border pixels");
        assert!(ones > 0, "expected valid interior pixels");
        assert_eq!(zeros + ones, (result.size.0 * result.size.1) as usize);
    }

    #[test]
    fn different_scales_give_different_layouts() {
        let (w, h) = (50, 50);
        let k = centered_k(80.0, w, h);
        let r = Matrix3::identity();

        let roi_seam = RotationWarper::new(WarpKind::Plane, 40.0).warp_roi((w, h), &k, &r);
        let roi_compose = RotationWarper::new(WarpKind::Plane, 80.0).warp_roi((w, h), &k, &r);
        assert!(roi_compose.width > roi_seam.width);
    }
}
