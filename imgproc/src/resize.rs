use image::{GrayImage, RgbImage};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

/// Bilinear resize of a grayscale image.
pub fn resize_gray(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    if width == 0 || height == 0 {
        return GrayImage::new(0, 0);
    }

    let mut dst = GrayImage::new(width, height);
    let src_width = src.width() as f32 - 1.0;
    let src_height = src.height() as f32 - 1.0;
    let dst_width = (width.max(2) - 1) as f32;
    let dst_height = (height.max(2) - 1) as f32;

    if src_width <= 0.0 || src_height <= 0.0 {
        return dst;
    }

    dst.as_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = (y as f32 / dst_height) * src_height;
            let y0 = fy as u32;
            let y1 = (y0 + 1).min(src.height() - 1);
            let dy = fy - y0 as f32;

            for (x, out) in row.iter_mut().enumerate() {
                let fx = (x as f32 / dst_width) * src_width;
                let x0 = fx as u32;
                let x1 = (x0 + 1).min(src.width() - 1);
                let dx = fx - x0 as f32;

                let v00 = src.get_pixel(x0, y0)[0] as f32;
                let v10 = src.get_pixel(x1, y0)[0] as f32;
                let v01 = src.get_pixel(x0, y1)[0] as f32;
                let v11 = src.get_pixel(x1, y1)[0] as f32;

                let v0 = v00 * (1.0 - dx) + v10 * dx;
                let v1 = v01 * (1.0 - dx) + v11 * dx;
                *out = (v0 * (1.0 - dy) + v1 * dy).clamp(0.0, 255.0) as u8;
            }
        });

    dst
}

/// Bilinear resize of an RGB image.
pub fn resize_rgb(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    if width == 0 || height == 0 {
        return RgbImage::new(0, 0);
    }

    let mut dst = RgbImage::new(width, height);
    let src_width = src.width() as f32 - 1.0;
    let src_height = src.height() as f32 - 1.0;
    let dst_width = (width.max(2) - 1) as f32;
    let dst_height = (height.max(2) - 1) as f32;

    if src_width <= 0.0 || src_height <= 0.0 {
        return dst;
    }

    dst.as_mut()
        .par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = (y as f32 / dst_height) * src_height;
            let y0 = fy as u32;
            let y1 = (y0 + 1).min(src.height() - 1);
            let dy = fy - y0 as f32;

            for x in 0..width as usize {
                let fx = (x as f32 / dst_width) * src_width;
                let x0 = fx as u32;
                let x1 = (x0 + 1).min(src.width() - 1);
                let dx = fx - x0 as f32;

                for c in 0..3 {
                    let v00 = src.get_pixel(x0, y0)[c] as f32;
                    let v10 = src.get_pixel(x1, y0)[c] as f32;
                    let v01 = src.get_pixel(x0, y1)[c] as f32;
                    let v11 = src.get_pixel(x1, y1)[c] as f32;

                    let v0 = v00 * (1.0 - dx) + v10 * dx;
                    let v1 = v01 * (1.0 - dx) + v11 * dx;
                    row[x * 3 + c] = (v0 * (1.0 - dy) + v1 * dy).clamp(0.0, 255.0) as u8;
                }
            }
        });

    dst
}

fn scaled_dims(width: u32, height: u32, scale: f64) -> (u32, u32) {
    (
        (width as f64 * scale).round().max(1.0) as u32,
        (height as f64 * scale).round().max(1.0) as u32,
    )
}

pub fn resize_rgb_scale(src: &RgbImage, scale: f64) -> RgbImage {
    let (w, h) = scaled_dims(src.width(), src.height(), scale);
    resize_rgb(src, w, h)
}

pub fn resize_gray_scale(src: &GrayImage, scale: f64) -> GrayImage {
    let (w, h) = scaled_dims(src.width(), src.height(), scale);
    resize_gray(src, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn resize_dimensions() {
        let src = GrayImage::new(100, 60);
        let dst = resize_gray(&src, 50, 30);
        assert_eq!(dst.dimensions(), (50, 30));
    }

    #[test]
    fn scale_rounding() {
        let src = RgbImage::new(101, 57);
        let dst = resize_rgb_scale(&src, 0.5);
        assert_eq!(dst.dimensions(), (51, 29));
    }

    #[test]
    fn constant_image_stays_constant() {
        let src = GrayImage::from_pixel(16, 16, Luma([137u8]));
        let dst = resize_gray(&src, 7, 5);
        assert!(dst.pixels().all(|p| p.0[0] == 137));
    }

    #[test]
    fn rgb_channels_resize_independently() {
        let src = RgbImage::from_pixel(8, 8, Rgb([10, 200, 90]));
        let dst = resize_rgb(&src, 4, 4);
        assert!(dst.pixels().all(|p| p.0 == [10, 200, 90]));
    }
}
