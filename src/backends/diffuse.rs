//! Built-in diffusion-fill backend
//!
//! Fills the masked region by iteratively averaging each unknown pixel
//! with its four neighbors, seeded from the mean color of the mask
//! boundary. No weights, no device, always available; useful as the
//! default registered backend and for exercising the orchestration path
//! end to end.

use super::{BackendError, BackendFactory, CapabilityDescriptor, InferParams, InpaintBackend};
use crate::config::{Device, Precision};
use crate::error::Result;
use crate::types::MASK_BINARY_THRESHOLD;
use image::{GrayImage, RgbImage};

/// Jacobi iterations stop once the largest per-channel change in a sweep
/// drops below this
const CONVERGENCE_DELTA: f32 = 0.25;

/// Pure-Rust inpainting by neighborhood diffusion
pub struct DiffuseBackend {
    max_iterations: usize,
}

impl DiffuseBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_iterations: 512,
        }
    }

    /// Capability descriptor: no padding or size constraints, CPU only
    #[must_use]
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor {
            min_size: 0,
            pad_modulus: 1,
            supports_scaled_dispatch: true,
            supported_devices: vec![Device::Cpu],
        }
    }
}

impl Default for DiffuseBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InpaintBackend for DiffuseBackend {
    fn infer(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        _params: &InferParams<'_>,
    ) -> std::result::Result<RgbImage, BackendError> {
        let (width, height) = image.dimensions();
        let w = width as usize;
        let h = height as usize;

        let unknown: Vec<bool> = mask
            .pixels()
            .map(|px| px.0[0] >= MASK_BINARY_THRESHOLD)
            .collect();

        // Working buffer in f32, masked pixels seeded with the boundary mean.
        let mut buf = vec![[0.0f32; 3]; w * h];
        let seed_color = boundary_mean(image, &unknown, w, h);
        for (i, px) in image.pixels().enumerate() {
            buf[i] = if unknown[i] {
                seed_color
            } else {
                [
                    f32::from(px.0[0]),
                    f32::from(px.0[1]),
                    f32::from(px.0[2]),
                ]
            };
        }

        let hole: Vec<usize> = (0..w * h).filter(|&i| unknown[i]).collect();
        let mut next = buf.clone();
        for _ in 0..self.max_iterations {
            let mut max_delta = 0.0f32;
            for &i in &hole {
                let x = i % w;
                let y = i / w;
                let mut sum = [0.0f32; 3];
                let mut count = 0.0f32;
                if x > 0 {
                    accumulate(&mut sum, &buf[i - 1], &mut count);
                }
                if x + 1 < w {
                    accumulate(&mut sum, &buf[i + 1], &mut count);
                }
                if y > 0 {
                    accumulate(&mut sum, &buf[i - w], &mut count);
                }
                if y + 1 < h {
                    accumulate(&mut sum, &buf[i + w], &mut count);
                }
                if count == 0.0 {
                    continue;
                }
                for c in 0..3 {
                    let value = sum[c] / count;
                    max_delta = max_delta.max((value - buf[i][c]).abs());
                    next[i][c] = value;
                }
            }
            for &i in &hole {
                buf[i] = next[i];
            }
            if max_delta < CONVERGENCE_DELTA {
                break;
            }
        }

        let mut out = image.clone();
        for &i in &hole {
            let x = (i % w) as u32;
            let y = (i / w) as u32;
            out.put_pixel(
                x,
                y,
                image::Rgb([
                    buf[i][0].round().clamp(0.0, 255.0) as u8,
                    buf[i][1].round().clamp(0.0, 255.0) as u8,
                    buf[i][2].round().clamp(0.0, 255.0) as u8,
                ]),
            );
        }
        Ok(out)
    }
}

fn accumulate(sum: &mut [f32; 3], value: &[f32; 3], count: &mut f32) {
    for c in 0..3 {
        sum[c] += value[c];
    }
    *count += 1.0;
}

/// Mean color of known pixels adjacent to the hole; falls back to mid-gray
/// when the mask covers the whole buffer
fn boundary_mean(image: &RgbImage, unknown: &[bool], w: usize, h: usize) -> [f32; 3] {
    let mut sum = [0.0f64; 3];
    let mut count = 0u64;
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if unknown[i] {
                continue;
            }
            let touches_hole = (x > 0 && unknown[i - 1])
                || (x + 1 < w && unknown[i + 1])
                || (y > 0 && unknown[i - w])
                || (y + 1 < h && unknown[i + w]);
            if touches_hole {
                let px = image.get_pixel(x as u32, y as u32).0;
                for c in 0..3 {
                    sum[c] += f64::from(px[c]);
                }
                count += 1;
            }
        }
    }
    if count == 0 {
        return [128.0; 3];
    }
    [
        (sum[0] / count as f64) as f32,
        (sum[1] / count as f64) as f32,
        (sum[2] / count as f64) as f32,
    ]
}

/// Factory for [`DiffuseBackend`]; weights are never needed
pub struct DiffuseFactory;

impl BackendFactory for DiffuseFactory {
    fn create(&self, _device: Device, _precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        Ok(Box::new(DiffuseBackend::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn params() -> InferParams<'static> {
        InferParams {
            seed: 1,
            example: None,
        }
    }

    #[test]
    fn test_flat_surroundings_fill_flat() {
        let image = RgbImage::from_pixel(32, 32, Rgb([80, 120, 160]));
        let mut mask = GrayImage::new(32, 32);
        for y in 12..20 {
            for x in 12..20 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }

        let out = DiffuseBackend::new().infer(&image, &mask, &params()).unwrap();

        assert_eq!(out.dimensions(), (32, 32));
        let center = out.get_pixel(16, 16).0;
        for c in 0..3 {
            let expected: u8 = [80, 120, 160][c];
            assert!(
                (i16::from(center[c]) - i16::from(expected)).abs() <= 2,
                "channel {c}: {} vs {expected}",
                center[c]
            );
        }
    }

    #[test]
    fn test_unmasked_pixels_untouched() {
        let mut image = RgbImage::new(16, 16);
        for (x, y, px) in image.enumerate_pixels_mut() {
            px.0 = [(x * 16) as u8, (y * 16) as u8, 7];
        }
        let mut mask = GrayImage::new(16, 16);
        mask.put_pixel(8, 8, Luma([255]));

        let out = DiffuseBackend::new().infer(&image, &mask, &params()).unwrap();

        for (x, y, px) in out.enumerate_pixels() {
            if (x, y) != (8, 8) {
                assert_eq!(px, image.get_pixel(x, y), "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn test_gradient_interpolated_inside_hole() {
        // Left half dark, right half bright; hole straddles the boundary.
        let mut image = RgbImage::new(40, 20);
        for (x, _, px) in image.enumerate_pixels_mut() {
            let v = if x < 20 { 20 } else { 220 };
            px.0 = [v, v, v];
        }
        let mut mask = GrayImage::new(40, 20);
        for y in 6..14 {
            for x in 14..26 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }

        let out = DiffuseBackend::new().infer(&image, &mask, &params()).unwrap();

        let left = out.get_pixel(15, 10).0[0];
        let right = out.get_pixel(24, 10).0[0];
        assert!(left < right, "fill should follow the gradient: {left} vs {right}");
    }

    #[test]
    fn test_full_mask_produces_finite_output() {
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));
        let mask = GrayImage::from_pixel(8, 8, Luma([255]));
        let out = DiffuseBackend::new().infer(&image, &mask, &params()).unwrap();
        assert_eq!(out.dimensions(), (8, 8));
    }
}
