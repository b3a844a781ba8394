use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stitch_core::KeyPoint;

use crate::Descriptor;

/// The sampling pattern is fixed across runs so descriptors from
/// different processes stay comparable.
const PATTERN_SEED: u64 = 0x5f3759df;
const PATCH_SIZE: i32 = 31;

/// BRIEF binary descriptor, optionally steered by keypoint orientation.
pub struct Brief {
    bytes: usize,
    pattern: Vec<[(f32, f32); 2]>,
}

impl Brief {
    pub fn new(bytes: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let half = PATCH_SIZE / 2;
        let pattern = (0..bytes * 8)
            .map(|_| {
                [
                    (
                        rng.gen_range(-half..=half) as f32,
                        rng.gen_range(-half..=half) as f32,
                    ),
                    (
                        rng.gen_range(-half..=half) as f32,
                        rng.gen_range(-half..=half) as f32,
                    ),
                ]
            })
            .collect();

        Self { bytes, pattern }
    }

    /// Descriptor sampled with the pattern rotated to the keypoint angle.
    /// Keypoints with no orientation (`angle < 0`) use the upright pattern.
    pub fn compute(&self, image: &GrayImage, kp: &KeyPoint) -> Descriptor {
        let (sin, cos) = if kp.angle >= 0.0 {
            kp.angle.to_radians().sin_cos()
        } else {
            (0.0, 1.0)
        };
        let (sin, cos) = (sin as f32, cos as f32);

        let cx = kp.x as i32;
        let cy = kp.y as i32;
        let mut data = vec![0u8; self.bytes];

        for (i, pair) in self.pattern.iter().enumerate() {
            let rotate = |(px, py): (f32, f32)| {
                (
                    (px * cos - py * sin).round() as i32,
                    (px * sin + py * cos).round() as i32,
                )
            };
            let (ax, ay) = rotate(pair[0]);
            let (bx, by) = rotate(pair[1]);

            let v1 = pixel_clamped(image, cx + ax, cy + ay);
            let v2 = pixel_clamped(image, cx + bx, cy + by);

            if v1 > v2 {
                data[i / 8] |= 1 << (i % 8);
            }
        }

        Descriptor::new(data, *kp)
    }
}

impl Default for Brief {
    fn default() -> Self {
        Self::new(32)
    }
}

fn pixel_clamped(image: &GrayImage, x: i32, y: i32) -> u8 {
    let x = x.clamp(0, image.width() as i32 - 1) as u32;
    let y = y.clamp(0, image.height() as i32 - 1) as u32;
    image.get_pixel(x, y)[0]
}
