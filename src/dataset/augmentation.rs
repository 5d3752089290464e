//! Data Augmentation Module
//!
//! Random affine perturbations applied to training images only. A single
//! affine map combines rotation, shift, shear and zoom around the image
//! centre. Pixels are sampled bilinearly and out-of-range coordinates take
//! the nearest edge pixel. A horizontal flip may follow.
//!
//! Validation and inference never go through the augmenter.

use image::{Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees (uniform in ±rotation_range)
    pub rotation_range: f32,
    /// Horizontal shift as a fraction of the width
    pub width_shift_range: f32,
    /// Vertical shift as a fraction of the height
    pub height_shift_range: f32,
    /// Shear angle in degrees (uniform in ±shear_range)
    pub shear_range: f32,
    /// Zoom factors drawn per axis from [1 - zoom_range, 1 + zoom_range]
    pub zoom_range: f32,
    /// Flip left/right with probability 0.5
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 40.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Identity configuration
    pub fn none() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::none()
    }
}

/// Parameters drawn for one image
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformParams {
    pub theta_deg: f32,
    /// Row shift in pixels
    pub tx: f32,
    /// Column shift in pixels
    pub ty: f32,
    pub shear_deg: f32,
    pub zx: f32,
    pub zy: f32,
    pub flip_horizontal: bool,
}

impl TransformParams {
    pub fn identity() -> Self {
        Self {
            theta_deg: 0.0,
            tx: 0.0,
            ty: 0.0,
            shear_deg: 0.0,
            zx: 1.0,
            zy: 1.0,
            flip_horizontal: false,
        }
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(AugmentationConfig::default())
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw transform parameters for an image of `width` x `height`.
    pub fn random_params(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> TransformParams {
        let c = &self.config;
        let symmetric = |rng: &mut ChaCha8Rng, range: f32| {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };

        let theta_deg = symmetric(rng, c.rotation_range);
        let tx = symmetric(rng, c.height_shift_range) * height as f32;
        let ty = symmetric(rng, c.width_shift_range) * width as f32;
        let shear_deg = symmetric(rng, c.shear_range);
        let (zx, zy) = if c.zoom_range > 0.0 {
            (
                rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
                rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
            )
        } else {
            (1.0, 1.0)
        };
        let flip_horizontal = c.horizontal_flip && rng.gen::<f32>() < 0.5;

        TransformParams {
            theta_deg,
            tx,
            ty,
            shear_deg,
            zx,
            zy,
            flip_horizontal,
        }
    }

    /// Apply a random transform drawn from `rng`.
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let params = self.random_params(img.width(), img.height(), rng);
        apply_transform(img, &params)
    }
}

/// Apply a fixed set of transform parameters.
///
/// The matrix maps output (row, col) to input (row, col) about the centre:
/// `rotation * shift * shear * zoom`.
pub fn apply_transform(img: &RgbImage, p: &TransformParams) -> RgbImage {
    let (width, height) = img.dimensions();
    let mut output = if is_affine_identity(p) {
        img.clone()
    } else {
        let theta = p.theta_deg.to_radians();
        let shear = p.shear_deg.to_radians();

        let rotation = [
            [theta.cos(), -theta.sin(), 0.0],
            [theta.sin(), theta.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let shift = [[1.0, 0.0, p.tx], [0.0, 1.0, p.ty], [0.0, 0.0, 1.0]];
        let shear_m = [[1.0, -shear.sin(), 0.0], [0.0, shear.cos(), 0.0], [0.0, 0.0, 1.0]];
        let zoom = [[p.zx, 0.0, 0.0], [0.0, p.zy, 0.0], [0.0, 0.0, 1.0]];
        let m = matmul(&matmul(&matmul(&rotation, &shift), &shear_m), &zoom);

        let cr = height as f32 / 2.0 - 0.5;
        let cc = width as f32 / 2.0 - 0.5;

        let mut out = RgbImage::new(width, height);
        for row in 0..height {
            for col in 0..width {
                let r = row as f32 - cr;
                let c = col as f32 - cc;
                let src_r = m[0][0] * r + m[0][1] * c + m[0][2] + cr;
                let src_c = m[1][0] * r + m[1][1] * c + m[1][2] + cc;
                out.put_pixel(col, row, bilinear_sample_nearest_fill(img, src_c, src_r));
            }
        }
        out
    };

    if p.flip_horizontal {
        image::imageops::flip_horizontal_in_place(&mut output);
    }
    output
}

fn is_affine_identity(p: &TransformParams) -> bool {
    p.theta_deg == 0.0
        && p.tx == 0.0
        && p.ty == 0.0
        && p.shear_deg == 0.0
        && p.zx == 1.0
        && p.zy == 1.0
}

fn matmul(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0f32; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Bilinear sample with coordinates clamped to the image ("nearest" fill)
fn bilinear_sample_nearest_fill(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient_image(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
    }

    #[test]
    fn test_identity_transform_is_noop() {
        let img = gradient_image(16);
        let out = apply_transform(&img, &TransformParams::identity());
        assert_eq!(out, img);
    }

    #[test]
    fn test_flip_only() {
        let img = gradient_image(16);
        let params = TransformParams {
            flip_horizontal: true,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, &params);
        assert_eq!(out.get_pixel(0, 3), img.get_pixel(15, 3));
    }

    #[test]
    fn test_shift_uses_nearest_fill() {
        let img = gradient_image(16);
        let params = TransformParams {
            ty: 4.0,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, &params);
        // Output column c samples input column c + 4; the right edge is clamped.
        assert_eq!(out.get_pixel(0, 5), img.get_pixel(4, 5));
        assert_eq!(out.get_pixel(15, 5), img.get_pixel(15, 5));
    }

    #[test]
    fn test_random_params_within_ranges() {
        let aug = Augmenter::with_defaults();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let p = aug.random_params(32, 32, &mut rng);
            assert!(p.theta_deg.abs() <= 40.0);
            assert!(p.tx.abs() <= 0.2 * 32.0 + 1e-4);
            assert!(p.ty.abs() <= 0.2 * 32.0 + 1e-4);
            assert!(p.shear_deg.abs() <= 0.2);
            assert!((0.8..=1.2).contains(&p.zx));
            assert!((0.8..=1.2).contains(&p.zy));
        }
    }

    #[test]
    fn test_augment_is_seed_deterministic() {
        let aug = Augmenter::with_defaults();
        let img = gradient_image(32);
        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (32, 32));
    }

    #[test]
    fn test_none_config_draws_identity() {
        let aug = Augmenter::new(AugmentationConfig::none());
        assert!(aug.config().is_identity());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(aug.random_params(10, 10, &mut rng), TransformParams::identity());
    }
}
