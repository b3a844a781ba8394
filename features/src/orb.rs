//! ORB-style detector: multi-scale FAST corners, intensity-centroid
//! orientation, steered BRIEF descriptors.

use image::GrayImage;
use stitch_core::KeyPoint;
use stitch_imgproc::resize_gray;

use crate::{fast_detect, Brief, Descriptor, Descriptors};

pub struct Orb {
    n_features: usize,
    scale_factor: f64,
    n_levels: usize,
    fast_threshold: u8,
    brief: Brief,
    // Scratch pyramid reused across images; released by collect_garbage.
    pyramid: Vec<GrayImage>,
}

impl Orb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_features(mut self, n: usize) -> Self {
        self.n_features = n;
        self
    }

    pub fn with_n_levels(mut self, n: usize) -> Self {
        self.n_levels = n.max(1);
        self
    }

    pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
        self.fast_threshold = threshold;
        self
    }

    pub fn detect_and_compute(&mut self, image: &GrayImage) -> (Vec<KeyPoint>, Descriptors) {
        self.build_pyramid(image);

        let mut scored: Vec<(KeyPoint, Descriptor)> = Vec::new();
        let mut scale = 1.0f64;

        for (level, scaled) in self.pyramid.iter().enumerate() {
            if scaled.width() < 16 || scaled.height() < 16 {
                break;
            }

            let kps = fast_detect(scaled, self.fast_threshold, self.n_features * 2);
            for kp in kps {
                let angle = orientation(scaled, kp.x as i32, kp.y as i32);
                let oriented = kp.with_angle(angle).with_octave(level as i32);
                let desc = self.brief.compute(scaled, &oriented);

                // Report coordinates in the level-0 frame.
                let at_base = KeyPoint {
                    x: oriented.x * scale,
                    y: oriented.y * scale,
                    size: 31.0 * scale,
                    ..oriented
                };
                scored.push((at_base, Descriptor { keypoint: at_base, ..desc }));
            }

            scale *= self.scale_factor;
        }

        scored.sort_by(|a, b| {
            b.0.response
                .partial_cmp(&a.0.response)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.n_features);

        let mut keypoints = Vec::with_capacity(scored.len());
        let mut descriptors = Descriptors::with_capacity(scored.len());
        for (kp, desc) in scored {
            keypoints.push(kp);
            descriptors.push(desc);
        }
        (keypoints, descriptors)
    }

    /// Drop pooled pyramid buffers once extraction is over.
    pub fn collect_garbage(&mut self) {
        self.pyramid = Vec::new();
    }

    fn build_pyramid(&mut self, image: &GrayImage) {
        self.pyramid.clear();
        self.pyramid.push(image.clone());

        let mut scale = 1.0f64;
        for _ in 1..self.n_levels {
            scale *= self.scale_factor;
            let w = (image.width() as f64 / scale).round() as u32;
            let h = (image.height() as f64 / scale).round() as u32;
            if w < 16 || h < 16 {
                break;
            }
            self.pyramid.push(resize_gray(image, w, h));
        }
    }
}

impl Default for Orb {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            fast_threshold: 20,
            brief: Brief::default(),
            pyramid: Vec::new(),
        }
    }
}

/// Intensity-centroid orientation in degrees.
fn orientation(image: &GrayImage, x: i32, y: i32) -> f64 {
    const RADIUS: i32 = 15;
    let mut m01 = 0.0f64;
    let mut m10 = 0.0f64;

    for dy in -RADIUS..=RADIUS {
        for dx in -RADIUS..=RADIUS {
            if dx * dx + dy * dy > RADIUS * RADIUS {
                continue;
            }
            let px = (x + dx).clamp(0, image.width() as i32 - 1) as u32;
            let py = (y + dy).clamp(0, image.height() as i32 - 1) as u32;
            let v = image.get_pixel(px, py)[0] as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }

    m01.atan2(m10).to_degrees()
}
