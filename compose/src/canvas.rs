use image::{GrayImage, Rgb32FImage};
use stitch_core::{rgb_from_f32, Rect, RgbImage};

/// Minimal rectangle covering all `(corner, corner + size)` placements.
/// Recomputed whenever corners or sizes change; never cached across scale
/// regimes.
pub fn result_roi(corners: &[(i32, i32)], sizes: &[(u32, u32)]) -> Rect {
    debug_assert_eq!(corners.len(), sizes.len());
    if corners.is_empty() {
        return Rect::new(0, 0, 0, 0);
    }

    let mut tl = (i32::MAX, i32::MAX);
    let mut br = (i32::MIN, i32::MIN);
    for (&(x, y), &(w, h)) in corners.iter().zip(sizes) {
        tl.0 = tl.0.min(x);
        tl.1 = tl.1.min(y);
        br.0 = br.0.max(x + w as i32);
        br.1 = br.1.max(y + h as i32);
    }

    Rect::from_corners(tl, br)
}

/// One output buffer in the shared coordinate frame. The pipeline creates
/// a fresh canvas per camera so outputs stay independent but directly
/// overlayable.
pub struct Canvas {
    roi: Rect,
    image: Rgb32FImage,
    mask: GrayImage,
}

impl Canvas {
    /// Zero-initialized canvas covering `roi`.
    pub fn new(roi: Rect) -> Self {
        let (width, height) = roi.size();
        Self {
            roi,
            image: Rgb32FImage::new(width, height),
            mask: GrayImage::new(width, height),
        }
    }

    pub fn roi(&self) -> Rect {
        self.roi
    }

    /// Copy warped pixels in wherever `mask` is set, OR-ing mask bits into
    /// the canvas mask. `corner` is the warped image's placement in canvas
    /// coordinates.
    pub fn place(&mut self, warped: &Rgb32FImage, mask: &GrayImage, corner: (i32, i32)) {
        let dx = corner.0 - self.roi.x;
        let dy = corner.1 - self.roi.y;
        let (cw, ch) = (self.image.width() as i32, self.image.height() as i32);

        for y in 0..warped.height() as i32 {
            let cy = dy + y;
            if cy < 0 || cy >= ch {
                continue;
            }
            for x in 0..warped.width() as i32 {
                let cx = dx + x;
                if cx < 0 || cx >= cw {
                    continue;
                }

                let m = mask.get_pixel(x as u32, y as u32)[0];
                if m != 0 {
                    let p = *warped.get_pixel(x as u32, y as u32);
                    self.image.put_pixel(cx as u32, cy as u32, p);
                }
                let out = self.mask.get_pixel_mut(cx as u32, cy as u32);
                out[0] |= m;
            }
        }
    }

    /// Finish the canvas: clamp the f32 working buffer down to 8-bit.
    pub fn into_output(self) -> (RgbImage, GrayImage) {
        (rgb_from_f32(&self.image), self.mask)
    }
}
