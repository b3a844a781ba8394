use image::GrayImage;
use stitch_core::KeyPoint;

/// Harris corner detector with 3x3 non-maximum suppression.
pub fn harris_detect(
    image: &GrayImage,
    block_size: i32,
    k: f64,
    threshold: f64,
    responses: &mut Vec<f64>,
) -> Vec<KeyPoint> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let half_block = block_size / 2;
    let mut keypoints = Vec::new();

    if width < block_size + 2 || height < block_size + 2 {
        return keypoints;
    }

    let ix = sobel(image, [-1, 0, 1, -2, 0, 2, -1, 0, 1]);
    let iy = sobel(image, [-1, -2, -1, 0, 0, 0, 1, 2, 1]);

    responses.clear();
    responses.resize((width * height) as usize, 0.0);

    for y in half_block..height - half_block {
        for x in half_block..width - half_block {
            let mut i_xx = 0.0f64;
            let mut i_yy = 0.0f64;
            let mut i_xy = 0.0f64;

            for by in -half_block..=half_block {
                for bx in -half_block..=half_block {
                    let idx = ((y + by) * width + (x + bx)) as usize;
                    let gx = ix[idx] as f64;
                    let gy = iy[idx] as f64;
                    i_xx += gx * gx;
                    i_yy += gy * gy;
                    i_xy += gx * gy;
                }
            }

            let det = i_xx * i_yy - i_xy * i_xy;
            let trace = i_xx + i_yy;
            responses[(y * width + x) as usize] = det - k * trace * trace;
        }
    }

    for y in (half_block + 1)..(height - half_block - 1) {
        for x in (half_block + 1)..(width - half_block - 1) {
            let idx = (y * width + x) as usize;
            let response = responses[idx];
            if response <= threshold {
                continue;
            }

            let mut is_max = true;
            'nms: for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nidx = ((y + dy) * width + (x + dx)) as usize;
                    if responses[nidx] > response {
                        is_max = false;
                        break 'nms;
                    }
                }
            }

            if is_max {
                keypoints.push(KeyPoint::new(x as f64, y as f64).with_response(response));
            }
        }
    }

    keypoints.sort_by(|a, b| {
        b.response
            .partial_cmp(&a.response)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    keypoints
}

fn sobel(image: &GrayImage, kernel: [i32; 9]) -> Vec<i16> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let mut result = vec![0i16; (width * height) as usize];

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sum = 0i32;
            for ky in 0..3 {
                for kx in 0..3 {
                    let val = image.get_pixel((x + kx - 1) as u32, (y + ky - 1) as u32)[0] as i32;
                    sum += val * kernel[(ky * 3 + kx) as usize];
                }
            }
            result[(y * width + x) as usize] = sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn finds_checkerboard_corners() {
        let mut img = GrayImage::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                if (x / 16 + y / 16) % 2 == 0 {
                    img.put_pixel(x, y, Luma([255]));
                }
            }
        }

        let mut scratch = Vec::new();
        let kps = harris_detect(&img, 3, 0.04, 1e6, &mut scratch);
        assert!(!kps.is_empty());
        // The interior corner sits at (16, 16).
        assert!(kps
            .iter()
            .any(|kp| (kp.x - 16.0).abs() <= 2.0 && (kp.y - 16.0).abs() <= 2.0));
    }
}
