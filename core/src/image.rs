pub use image::{GrayImage, ImageBuffer, Luma, Rgb, Rgb32FImage, RgbImage};

/// Source image dimensions as (width, height).
pub type ImageSize = (u32, u32);

pub fn image_area(size: ImageSize) -> f64 {
    size.0 as f64 * size.1 as f64
}

pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    image::imageops::colorops::grayscale(rgb)
}

/// All-foreground validity mask for a source image.
pub fn full_mask(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([255u8]))
}

/// Widen an 8-bit image to the f32 working representation used while
/// warping and compositing, so resampled values survive without clipping.
pub fn rgb_to_f32(src: &RgbImage) -> Rgb32FImage {
    let mut dst = Rgb32FImage::new(src.width(), src.height());
    for (s, d) in src.pixels().zip(dst.pixels_mut()) {
        d.0 = [s.0[0] as f32, s.0[1] as f32, s.0[2] as f32];
    }
    dst
}

pub fn rgb_from_f32(src: &Rgb32FImage) -> RgbImage {
    let mut dst = RgbImage::new(src.width(), src.height());
    for (s, d) in src.pixels().zip(dst.pixels_mut()) {
        d.0 = [
            s.0[0].clamp(0.0, 255.0) as u8,
            s.0[1].clamp(0.0, 255.0) as u8,
            s.0[2].clamp(0.0, 255.0) as u8,
        ];
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mask_is_all_set() {
        let mask = full_mask(4, 3);
        assert_eq!(mask.dimensions(), (4, 3));
        assert!(mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn f32_round_trip_preserves_u8_values() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, Rgb([7, 130, 255]));
        img.put_pixel(1, 1, Rgb([0, 64, 9]));
        let round = rgb_from_f32(&rgb_to_f32(&img));
        assert_eq!(img, round);
    }
}
