//! Training-time image augmentation: random crop with zero padding and
//! random horizontal flip. Applied to the training split only; export and
//! evaluation always see the raw pixels.

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::Rng;

/// Zero-pad the image on all sides, then crop back to the original size at a
/// uniformly random offset.
pub fn random_crop(pixels: &Array3<f32>, padding: usize, rng: &mut StdRng) -> Array3<f32> {
    if padding == 0 {
        return pixels.clone();
    }

    let (channels, height, width) = pixels.dim();
    let offset_y = rng.gen_range(0..=2 * padding);
    let offset_x = rng.gen_range(0..=2 * padding);

    let mut cropped = Array3::zeros((channels, height, width));
    for c in 0..channels {
        for y in 0..height {
            // Position of this output row inside the padded canvas.
            let src_y = y as isize + offset_y as isize - padding as isize;
            if src_y < 0 || src_y >= height as isize {
                continue;
            }
            for x in 0..width {
                let src_x = x as isize + offset_x as isize - padding as isize;
                if src_x < 0 || src_x >= width as isize {
                    continue;
                }
                cropped[[c, y, x]] = pixels[[c, src_y as usize, src_x as usize]];
            }
        }
    }

    cropped
}

/// Mirror the image left-to-right.
pub fn horizontal_flip(pixels: &Array3<f32>) -> Array3<f32> {
    let (channels, height, width) = pixels.dim();
    let mut flipped = Array3::zeros((channels, height, width));
    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                flipped[[c, y, x]] = pixels[[c, y, width - 1 - x]];
            }
        }
    }
    flipped
}

/// Standard training augmentation: random crop, then flip with probability ½.
pub fn augment_sample(pixels: &Array3<f32>, padding: usize, rng: &mut StdRng) -> Array3<f32> {
    let cropped = random_crop(pixels, padding, rng);
    if rng.gen_bool(0.5) {
        horizontal_flip(&cropped)
    } else {
        cropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ramp_image() -> Array3<f32> {
        Array3::from_shape_fn((1, 4, 4), |(_, y, x)| (y * 4 + x) as f32)
    }

    #[test]
    fn crop_preserves_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let image = ramp_image();
        let cropped = random_crop(&image, 2, &mut rng);
        assert_eq!(cropped.dim(), image.dim());
    }

    #[test]
    fn zero_padding_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        let image = ramp_image();
        let cropped = random_crop(&image, 0, &mut rng);
        assert_eq!(cropped, image);
    }

    #[test]
    fn flip_is_involutive() {
        let image = ramp_image();
        let twice = horizontal_flip(&horizontal_flip(&image));
        assert_eq!(twice, image);
    }

    #[test]
    fn flip_reverses_columns() {
        let image = ramp_image();
        let flipped = horizontal_flip(&image);
        assert_eq!(flipped[[0, 0, 0]], image[[0, 0, 3]]);
        assert_eq!(flipped[[0, 2, 1]], image[[0, 2, 2]]);
    }

    #[test]
    fn augment_is_deterministic_for_a_seed() {
        let image = ramp_image();
        let a = augment_sample(&image, 2, &mut StdRng::seed_from_u64(11));
        let b = augment_sample(&image, 2, &mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
    }
}
