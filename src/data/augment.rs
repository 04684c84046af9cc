use rand::Rng;

use super::{ImageItem, ImageShape};

/// Random photometric and mirror jitter applied to training items.
#[derive(Clone, Debug, PartialEq)]
pub struct Augmentation {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Occasionally rotate by a random multiple of 90 degrees.
    pub rotation: bool,
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            vertical_flip: false,
            rotation: true,
            brightness: Some(0.2),
            contrast: Some(0.2),
        }
    }
}

impl Augmentation {
    pub fn with_horizontal_flip(mut self, enabled: bool) -> Self {
        self.horizontal_flip = enabled;
        self
    }

    pub fn with_vertical_flip(mut self, enabled: bool) -> Self {
        self.vertical_flip = enabled;
        self
    }

    pub fn with_rotation(mut self, enabled: bool) -> Self {
        self.rotation = enabled;
        self
    }

    pub fn with_brightness(mut self, range: Option<f32>) -> Self {
        self.brightness = range;
        self
    }

    pub fn with_contrast(mut self, range: Option<f32>) -> Self {
        self.contrast = range;
        self
    }

    pub fn apply<R: Rng + ?Sized>(&self, item: &mut ImageItem, shape: ImageShape, rng: &mut R) {
        if self.horizontal_flip && rng.gen_bool(0.5) {
            flip_horizontal(&mut item.pixels, shape);
        }

        if self.vertical_flip && rng.gen_bool(0.5) {
            flip_vertical(&mut item.pixels, shape);
        }

        if self.rotation && rng.gen_bool(0.2) {
            for _ in 0..rng.gen_range(0..4) {
                rotate_quarter(&mut item.pixels, shape);
            }
        }

        if let Some(range) = self.brightness {
            let factor = 1.0 + rng.gen_range(-1.0f32..=1.0) * range;
            for p in item.pixels.iter_mut() {
                *p = (*p * factor).clamp(0.0, 1.0);
            }
        }

        if let Some(range) = self.contrast {
            let factor = 1.0 + rng.gen_range(-1.0f32..=1.0) * range;
            let mean = item.pixels.iter().sum::<f32>() / item.pixels.len().max(1) as f32;
            for p in item.pixels.iter_mut() {
                *p = (mean + (*p - mean) * factor).clamp(0.0, 1.0);
            }
        }
    }
}

fn flip_horizontal(pixels: &mut [f32], shape: ImageShape) {
    for row in pixels.chunks_exact_mut(shape.size) {
        row.reverse();
    }
}

fn flip_vertical(pixels: &mut [f32], shape: ImageShape) {
    let size = shape.size;
    for plane in pixels.chunks_exact_mut(shape.plane()) {
        for row in 0..size / 2 {
            let (top, bottom) = plane.split_at_mut((size - 1 - row) * size);
            top[row * size..(row + 1) * size].swap_with_slice(&mut bottom[..size]);
        }
    }
}

/// Clockwise quarter turn of every channel plane.
fn rotate_quarter(pixels: &mut [f32], shape: ImageShape) {
    let size = shape.size;
    let mut rotated = vec![0.0; shape.plane()];
    for plane in pixels.chunks_exact_mut(shape.plane()) {
        for y in 0..size {
            for x in 0..size {
                rotated[y * size + x] = plane[(size - 1 - x) * size + y];
            }
        }
        plane.copy_from_slice(&rotated);
    }
}
