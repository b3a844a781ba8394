//! Backward-map resampling with configurable border handling, the warp
//! primitive behind the rotation warpers.

use image::{GrayImage, Rgb32FImage, RgbImage};
use rayon::prelude::*;

use crate::Interpolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    Constant(u8),
    Reflect,
}

fn map_coord(coord: isize, len: usize, mode: BorderMode) -> Option<usize> {
    let n = len as isize;
    if n <= 0 {
        return None;
    }

    match mode {
        BorderMode::Constant(_) => {
            if coord < 0 || coord >= n {
                None
            } else {
                Some(coord as usize)
            }
        }
        BorderMode::Reflect => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n;
            let mut c = coord % period;
            if c < 0 {
                c += period;
            }
            if c >= n {
                c = period - c - 1;
            }
            Some(c as usize)
        }
    }
}

fn sample_gray(img: &GrayImage, x: isize, y: isize, border: BorderMode) -> f32 {
    let width = img.width() as usize;
    match (
        map_coord(x, width, border),
        map_coord(y, img.height() as usize, border),
    ) {
        (Some(ix), Some(iy)) => img.as_raw()[iy * width + ix] as f32,
        _ => match border {
            BorderMode::Constant(v) => v as f32,
            BorderMode::Reflect => 0.0,
        },
    }
}

fn sample_rgb(img: &RgbImage, x: isize, y: isize, border: BorderMode) -> [f32; 3] {
    let width = img.width() as usize;
    match (
        map_coord(x, width, border),
        map_coord(y, img.height() as usize, border),
    ) {
        (Some(ix), Some(iy)) => {
            let base = (iy * width + ix) * 3;
            let raw = img.as_raw();
            [raw[base] as f32, raw[base + 1] as f32, raw[base + 2] as f32]
        }
        _ => match border {
            BorderMode::Constant(v) => [v as f32; 3],
            BorderMode::Reflect => [0.0; 3],
        },
    }
}

/// Remap an RGB image through backward maps into the f32 working
/// representation. `map_x`/`map_y` give, per destination pixel, the source
/// coordinate to sample.
pub fn remap_rgb(
    src: &RgbImage,
    map_x: &[f32],
    map_y: &[f32],
    width: u32,
    height: u32,
    interpolation: Interpolation,
    border: BorderMode,
) -> Rgb32FImage {
    debug_assert_eq!(map_x.len(), (width * height) as usize);
    debug_assert_eq!(map_y.len(), (width * height) as usize);

    let mut dst = Rgb32FImage::new(width, height);

    dst.as_mut()
        .par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width as usize {
                let idx = y * width as usize + x;
                let sx = map_x[idx];
                let sy = map_y[idx];

                let rgb = match interpolation {
                    Interpolation::Nearest => sample_rgb(
                        src,
                        sx.round() as isize,
                        sy.round() as isize,
                        border,
                    ),
                    Interpolation::Linear => {
                        let x0 = sx.floor() as isize;
                        let y0 = sy.floor() as isize;
                        let fx = sx - x0 as f32;
                        let fy = sy - y0 as f32;

                        let v00 = sample_rgb(src, x0, y0, border);
                        let v10 = sample_rgb(src, x0 + 1, y0, border);
                        let v01 = sample_rgb(src, x0, y0 + 1, border);
                        let v11 = sample_rgb(src, x0 + 1, y0 + 1, border);

                        let mut out = [0.0f32; 3];
                        for c in 0..3 {
                            let v0 = v00[c] * (1.0 - fx) + v10[c] * fx;
                            let v1 = v01[c] * (1.0 - fx) + v11[c] * fx;
                            out[c] = v0 * (1.0 - fy) + v1 * fy;
                        }
                        out
                    }
                };

                row[x * 3..x * 3 + 3].copy_from_slice(&rgb);
            }
        });

    dst
}

/// Remap a single-channel mask. Nearest sampling keeps mask values binary.
pub fn remap_gray(
    src: &GrayImage,
    map_x: &[f32],
    map_y: &[f32],
    width: u32,
    height: u32,
    interpolation: Interpolation,
    border: BorderMode,
) -> GrayImage {
    debug_assert_eq!(map_x.len(), (width * height) as usize);
    debug_assert_eq!(map_y.len(), (width * height) as usize);

    let mut dst = GrayImage::new(width, height);

    dst.as_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let idx = y * width as usize + x;
                let sx = map_x[idx];
                let sy = map_y[idx];

                let val = match interpolation {
                    Interpolation::Nearest => {
                        sample_gray(src, sx.round() as isize, sy.round() as isize, border)
                    }
                    Interpolation::Linear => {
                        let x0 = sx.floor() as isize;
                        let y0 = sy.floor() as isize;
                        let fx = sx - x0 as f32;
                        let fy = sy - y0 as f32;

                        let v00 = sample_gray(src, x0, y0, border);
                        let v10 = sample_gray(src, x0 + 1, y0, border);
                        let v01 = sample_gray(src, x0, y0 + 1, border);
                        let v11 = sample_gray(src, x0 + 1, y0 + 1, border);

                        let v0 = v00 * (1.0 - fx) + v10 * fx;
                        let v1 = v01 * (1.0 - fx) + v11 * fx;
                        v0 * (1.0 - fy) + v1 * fy
                    }
                };

                *out = val.clamp(0.0, 255.0) as u8;
            }
        });

    dst
}
