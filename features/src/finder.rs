use image::GrayImage;
use stitch_core::FeatureAlgorithm;
use tracing::debug;

use crate::{harris_detect, Brief, Descriptors, ImageFeatures, Orb};

/// Harris corners described with upright BRIEF.
pub struct HarrisBrief {
    max_features: usize,
    block_size: i32,
    k: f64,
    threshold: f64,
    brief: Brief,
    // Scratch response plane reused across images.
    responses: Vec<f64>,
}

impl HarrisBrief {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_features(mut self, n: usize) -> Self {
        self.max_features = n;
        self
    }

    pub fn detect_and_compute(&mut self, image: &GrayImage) -> (Vec<stitch_core::KeyPoint>, Descriptors) {
        let mut keypoints = harris_detect(
            image,
            self.block_size,
            self.k,
            self.threshold,
            &mut self.responses,
        );
        keypoints.truncate(self.max_features);

        let mut descriptors = Descriptors::with_capacity(keypoints.len());
        for kp in &keypoints {
            descriptors.push(self.brief.compute(image, kp));
        }
        (keypoints, descriptors)
    }

    pub fn collect_garbage(&mut self) {
        self.responses = Vec::new();
    }
}

impl Default for HarrisBrief {
    fn default() -> Self {
        Self {
            max_features: 500,
            block_size: 3,
            k: 0.04,
            threshold: 1e5,
            brief: Brief::default(),
            responses: Vec::new(),
        }
    }
}

/// The configured descriptor engine. Closed set of variants, chosen once
/// before any image is processed.
pub enum FeatureFinder {
    Orb(Orb),
    HarrisBrief(HarrisBrief),
}

impl FeatureFinder {
    pub fn from_algorithm(algorithm: FeatureAlgorithm) -> Self {
        match algorithm {
            FeatureAlgorithm::Orb => Self::Orb(Orb::default()),
            FeatureAlgorithm::HarrisBrief => Self::HarrisBrief(HarrisBrief::default()),
        }
    }

    pub fn with_max_features(self, n: usize) -> Self {
        match self {
            Self::Orb(orb) => Self::Orb(orb.with_n_features(n)),
            Self::HarrisBrief(hb) => Self::HarrisBrief(hb.with_max_features(n)),
        }
    }

    pub fn find(&mut self, image: &GrayImage, img_idx: usize) -> ImageFeatures {
        let (keypoints, descriptors) = match self {
            Self::Orb(orb) => orb.detect_and_compute(image),
            Self::HarrisBrief(hb) => hb.detect_and_compute(image),
        };
        debug!(img_idx, count = keypoints.len(), "extracted features");

        ImageFeatures {
            img_idx,
            img_size: image.dimensions(),
            keypoints,
            descriptors,
        }
    }

    /// Release pooled scratch buffers held by the algorithm. Call once
    /// after the last image has been processed.
    pub fn collect_garbage(&mut self) {
        match self {
            Self::Orb(orb) => orb.collect_garbage(),
            Self::HarrisBrief(hb) => hb.collect_garbage(),
        }
    }
}
