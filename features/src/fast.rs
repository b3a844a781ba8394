use image::GrayImage;
use stitch_core::KeyPoint;

const CIRCLE: [(i32, i32); 12] = [
    (-3, 0),
    (-2, 1),
    (-1, 2),
    (0, 3),
    (1, 2),
    (2, 1),
    (3, 0),
    (2, -1),
    (1, -2),
    (0, -3),
    (-1, -2),
    (-2, -1),
];

/// Segment-test corner detector. Keypoints come back strongest-first,
/// truncated to `max_keypoints`.
pub fn fast_detect(image: &GrayImage, threshold: u8, max_keypoints: usize) -> Vec<KeyPoint> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let mut keypoints = Vec::new();

    for y in 3..height - 3 {
        for x in 3..width - 3 {
            let p = image.get_pixel(x as u32, y as u32)[0];

            let mut brighter = 0;
            let mut darker = 0;
            let mut score = 0u32;

            for &(dx, dy) in &CIRCLE {
                let val = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0];

                if val > p.saturating_add(threshold) {
                    brighter += 1;
                    score += (val - p) as u32;
                } else if val < p.saturating_sub(threshold) {
                    darker += 1;
                    score += (p - val) as u32;
                }
            }

            if brighter >= 9 || darker >= 9 {
                keypoints.push(KeyPoint::new(x as f64, y as f64).with_response(score as f64));
            }
        }
    }

    keypoints.sort_by(|a, b| {
        b.response
            .partial_cmp(&a.response)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    keypoints.truncate(max_keypoints);
    keypoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn detects_square_corner() {
        let mut img = GrayImage::new(24, 24);
        for y in 8..24 {
            for x in 8..24 {
                img.put_pixel(x, y, Luma([255]));
            }
        }

        let kps = fast_detect(&img, 20, 100);
        assert!(!kps.is_empty());
        assert!(kps
            .iter()
            .any(|kp| (kp.x - 8.0).abs() <= 2.0 && (kp.y - 8.0).abs() <= 2.0));
    }

    #[test]
    fn flat_image_has_no_corners() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        assert!(fast_detect(&img, 20, 100).is_empty());
    }

    #[test]
    fn truncates_to_strongest() {
        let mut img = GrayImage::new(40, 40);
        for y in 0..40 {
            for x in 0..40 {
                if (x / 8 + y / 8) % 2 == 0 {
                    img.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let kps = fast_detect(&img, 20, 5);
        assert!(kps.len() <= 5);
        for pair in kps.windows(2) {
            assert!(pair[0].response >= pair[1].response);
        }
    }
}
