//! Compositing backend output back into the full-resolution canvas
//!
//! The backend only ever sees a bounded sub-image; these routines place
//! its output by crop coordinates, undo any dispatch-time scaling,
//! restore untouched pixels from the original, and handle the optional
//! postprocessing stages (histogram matching, mask blur, alpha
//! reattachment). Ordering is fixed: undo-scale and keep-pixel
//! restoration run before histogram matching, and alpha is reattached
//! last.

use crate::types::{CropRegion, MASK_BINARY_THRESHOLD};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage, RgbaImage};

/// Overwrite `full[region]` with `cropped`; every pixel outside the
/// region is left bit-identical
pub fn place_crop(full: &mut RgbImage, cropped: &RgbImage, region: CropRegion) {
    debug_assert_eq!(cropped.dimensions(), (region.width(), region.height()));
    image::imageops::replace(full, cropped, i64::from(region.left), i64::from(region.top));
}

/// Resize a scaled backend result back to the original dimensions, then
/// substitute the original pixel wherever the mask says "keep"
///
/// The substitution guarantees interpolation artifacts never leak into
/// regions the caller did not ask to repaint. `keep_threshold` tolerates
/// anti-aliased mask edges; mask values strictly below it keep the
/// original pixel.
#[must_use]
pub fn undo_scale(
    scaled_result: &RgbImage,
    original: &RgbImage,
    mask: &GrayImage,
    keep_threshold: u8,
    filter: FilterType,
) -> RgbImage {
    let (width, height) = original.dimensions();
    let mut restored = if scaled_result.dimensions() == (width, height) {
        scaled_result.clone()
    } else {
        image::imageops::resize(scaled_result, width, height, filter)
    };
    restore_keep_pixels(&mut restored, original, mask, keep_threshold);
    restored
}

/// Substitute original pixels wherever `mask < keep_threshold`
pub fn restore_keep_pixels(
    result: &mut RgbImage,
    original: &RgbImage,
    mask: &GrayImage,
    keep_threshold: u8,
) {
    debug_assert_eq!(result.dimensions(), original.dimensions());
    debug_assert_eq!(result.dimensions(), mask.dimensions());
    for (x, y, px) in result.enumerate_pixels_mut() {
        if mask.get_pixel(x, y).0[0] < keep_threshold {
            *px = *original.get_pixel(x, y);
        }
    }
}

/// Soft-blend the repaired result over the original using the mask as a
/// per-pixel weight: `out = result*(m/255) + original*(1 - m/255)`
///
/// With a blurred mask this feathers the seam between repainted and
/// untouched content.
#[must_use]
pub fn blend_with_mask(result: &RgbImage, original: &RgbImage, mask: &GrayImage) -> RgbImage {
    debug_assert_eq!(result.dimensions(), original.dimensions());
    let (width, height) = result.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let m = u16::from(mask.get_pixel(x, y).0[0]);
        let res = result.get_pixel(x, y).0;
        let orig = original.get_pixel(x, y).0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            let blended =
                (u16::from(res[c]) * m + u16::from(orig[c]) * (255 - m) + 127) / 255;
            out[c] = blended as u8;
        }
        image::Rgb(out)
    })
}

/// Blur the mask edge with a symmetric Gaussian kernel of size `2*radius+1`
///
/// Radius 0 is a no-op. The sigma follows the OpenCV convention for a
/// kernel-size-derived Gaussian.
#[must_use]
pub fn blur_mask_edge(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let kernel = 2 * radius + 1;
    let sigma = 0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    image::imageops::blur(mask, sigma)
}

/// Shift the color distribution of the repainted region toward the
/// surrounding original content
///
/// Builds per-channel CDFs over the unmasked pixels of `result` and
/// `original`, derives a lookup table, and applies it only inside the
/// masked region. A mask with no unmasked pixels leaves the result
/// untouched.
pub fn match_histograms(result: &mut RgbImage, original: &RgbImage, mask: &GrayImage) {
    debug_assert_eq!(result.dimensions(), original.dimensions());

    for channel in 0..3 {
        let mut result_hist = [0u64; 256];
        let mut original_hist = [0u64; 256];
        let mut unmasked = 0u64;

        for (x, y, px) in result.enumerate_pixels() {
            if mask.get_pixel(x, y).0[0] < MASK_BINARY_THRESHOLD {
                result_hist[px.0[channel] as usize] += 1;
                original_hist[original.get_pixel(x, y).0[channel] as usize] += 1;
                unmasked += 1;
            }
        }
        if unmasked == 0 {
            return;
        }

        let lookup = histogram_lookup(
            &cumulative_distribution(&result_hist),
            &cumulative_distribution(&original_hist),
        );
        for (x, y, px) in result.enumerate_pixels_mut() {
            if mask.get_pixel(x, y).0[0] >= MASK_BINARY_THRESHOLD {
                px.0[channel] = lookup[px.0[channel] as usize];
            }
        }
    }
}

fn cumulative_distribution(hist: &[u64; 256]) -> [f64; 256] {
    let total: u64 = hist.iter().sum();
    let total = total.max(1) as f64;
    let mut cdf = [0.0f64; 256];
    let mut acc = 0u64;
    for (i, count) in hist.iter().enumerate() {
        acc += count;
        cdf[i] = acc as f64 / total;
    }
    cdf
}

fn histogram_lookup(source_cdf: &[f64; 256], reference_cdf: &[f64; 256]) -> [u8; 256] {
    let mut lookup = [0u8; 256];
    let mut j = 0usize;
    for (i, &value) in source_cdf.iter().enumerate() {
        while j < 255 && reference_cdf[j] < value {
            j += 1;
        }
        lookup[i] = j as u8;
    }
    lookup
}

/// Append a single-channel alpha buffer as the fourth channel, resizing
/// it first when the result dimensions differ from the source
#[must_use]
pub fn reattach_alpha(rgb_result: &RgbImage, alpha: &GrayImage) -> RgbaImage {
    let (width, height) = rgb_result.dimensions();
    let alpha = if alpha.dimensions() == (width, height) {
        alpha.clone()
    } else {
        image::imageops::resize(alpha, width, height, FilterType::Triangle)
    };

    RgbaImage::from_fn(width, height, |x, y| {
        let rgb = rgb_result.get_pixel(x, y).0;
        image::Rgba([rgb[0], rgb[1], rgb[2], alpha.get_pixel(x, y).0[0]])
    })
}

/// Swap red and blue channels in place for callers expecting BGR buffers
pub fn swap_red_blue(image: &mut RgbImage) {
    for px in image.pixels_mut() {
        px.0.swap(0, 2);
    }
}
