//! Pure geometry utilities: mask bounding boxes, modulus alignment,
//! size-limited resizing, and edge-replicating buffer padding
//!
//! Everything here is stateless and safe to run in parallel across
//! requests.

use crate::error::{InpaintError, Result};
use crate::types::{CropRegion, MASK_BINARY_THRESHOLD};
use image::imageops::FilterType;
use image::{GrayImage, ImageBuffer, Pixel};

/// Tightest rectangle enclosing every repaint pixel of the mask
pub fn bounding_box(mask: &GrayImage) -> Result<CropRegion> {
    let (width, height) = mask.dimensions();
    let mut left = width;
    let mut top = height;
    let mut right = 0u32;
    let mut bottom = 0u32;

    for (x, y, px) in mask.enumerate_pixels() {
        if px.0[0] >= MASK_BINARY_THRESHOLD {
            left = left.min(x);
            top = top.min(y);
            right = right.max(x + 1);
            bottom = bottom.max(y + 1);
        }
    }

    if right == 0 && bottom == 0 {
        return Err(InpaintError::EmptyMask { width, height });
    }
    Ok(CropRegion::new(left, top, right, bottom))
}

/// Grow a region by `margin` on each side, clamped to image bounds
///
/// Never returns a region narrower or shorter than the input.
#[must_use]
pub fn expand(
    region: CropRegion,
    margin: u32,
    image_width: u32,
    image_height: u32,
) -> CropRegion {
    CropRegion {
        left: region.left.saturating_sub(margin),
        top: region.top.saturating_sub(margin),
        right: region.right.saturating_add(margin).min(image_width),
        bottom: region.bottom.saturating_add(margin).min(image_height),
    }
}

/// Grow each edge outward so the region's dimensions become multiples of
/// `modulus`, staying within image bounds
///
/// Growth is split evenly between the two edges of each axis and shifted
/// inward at image borders. When an axis has no in-bounds multiple that
/// still covers the region, the full image span is returned for that axis
/// (the "clamped, never dropped" rule); downstream buffer padding covers
/// the modulus in that case. Fails only when the image itself is smaller
/// than the modulus.
pub fn align_to_modulus(
    region: CropRegion,
    modulus: u32,
    image_width: u32,
    image_height: u32,
) -> Result<CropRegion> {
    if modulus <= 1 {
        return Ok(region.clamp_to(image_width, image_height));
    }
    if image_width < modulus || image_height < modulus {
        return Err(InpaintError::UnalignableRegion {
            width: image_width,
            height: image_height,
            modulus,
        });
    }

    let region = region.clamp_to(image_width, image_height);
    let (left, right) = align_axis(region.left, region.right, modulus, image_width);
    let (top, bottom) = align_axis(region.top, region.bottom, modulus, image_height);
    Ok(CropRegion::new(left, top, right, bottom))
}

fn align_axis(start: u32, end: u32, modulus: u32, limit: u32) -> (u32, u32) {
    let len = end.saturating_sub(start).max(1);
    let largest_fit = (limit / modulus) * modulus;
    if largest_fit < len {
        // No in-bounds multiple covers the region; clamp to the full span.
        return (0, limit);
    }

    let target = len.div_ceil(modulus) * modulus;
    let grow_left = (target - len) / 2;
    let mut new_start = start.saturating_sub(grow_left);
    if new_start + target > limit {
        new_start = limit - target;
    }
    (new_start, new_start + target)
}

/// Proportionally shrink an image so its longer side equals `size_limit`
///
/// Returns the image unchanged with scale 1.0 when it already fits.
/// The second return value is the applied scale factor; it is
/// deterministic for identical inputs.
#[must_use]
pub fn resize_within_limit<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    size_limit: u32,
    filter: FilterType,
) -> (ImageBuffer<P, Vec<u8>>, f32)
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let (width, height) = image.dimensions();
    let longer = width.max(height);
    if longer <= size_limit {
        return (image.clone(), 1.0);
    }

    let scale = size_limit as f32 / longer as f32;
    let new_width = ((width as f32 * scale).round() as u32).max(1);
    let new_height = ((height as f32 * scale).round() as u32).max(1);
    let resized = image::imageops::resize(image, new_width, new_height, filter);
    (resized, scale)
}

/// Pad an image so both dimensions are multiples of `modulus` and at
/// least `min_size`, replicating edge pixels into the padded band
///
/// The payload stays anchored at the top-left corner, so trimming the
/// result back to the original dimensions recovers the payload region.
#[must_use]
pub fn pad_to_modulus<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    modulus: u32,
    min_size: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let (width, height) = image.dimensions();
    let modulus = modulus.max(1);
    let out_width = (width.div_ceil(modulus) * modulus).max(min_size);
    let out_height = (height.div_ceil(modulus) * modulus).max(min_size);
    if out_width == width && out_height == height {
        return image.clone();
    }

    ImageBuffer::from_fn(out_width, out_height, |x, y| {
        *image.get_pixel(x.min(width - 1), y.min(height - 1))
    })
}

/// Crop a sub-image described by a region out of a larger buffer
#[must_use]
pub fn crop_to_region<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    region: CropRegion,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    image::imageops::crop_imm(
        image,
        region.left,
        region.top,
        region.width(),
        region.height(),
    )
    .to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};

    fn mask_with_block(w: u32, h: u32, region: CropRegion) -> GrayImage {
        let mut mask = GrayImage::new(w, h);
        for y in region.top..region.bottom {
            for x in region.left..region.right {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    #[test]
    fn test_bounding_box_tightest() {
        let mask = mask_with_block(200, 100, CropRegion::new(20, 30, 50, 70));
        let bbox = bounding_box(&mask).unwrap();
        assert_eq!(bbox, CropRegion::new(20, 30, 50, 70));
    }

    #[test]
    fn test_bounding_box_single_pixel() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(7, 3, Luma([255]));
        let bbox = bounding_box(&mask).unwrap();
        assert_eq!(bbox, CropRegion::new(7, 3, 8, 4));
    }

    #[test]
    fn test_bounding_box_empty_mask() {
        let mask = GrayImage::new(64, 48);
        let err = bounding_box(&mask).unwrap_err();
        assert!(matches!(
            err,
            InpaintError::EmptyMask {
                width: 64,
                height: 48
            }
        ));
    }

    #[test]
    fn test_expand_clamps_to_bounds() {
        let region = CropRegion::new(5, 5, 95, 95);
        let expanded = expand(region, 16, 100, 100);
        assert_eq!(expanded, CropRegion::new(0, 0, 100, 100));
    }

    #[test]
    fn test_expand_never_shrinks() {
        let region = CropRegion::new(40, 40, 60, 60);
        let expanded = expand(region, 0, 100, 100);
        assert_eq!(expanded, region);
    }

    #[test]
    fn test_align_expanded_block_to_modulus() {
        // 1000x800 image, bbox (50,50)-(150,150), margin 16 -> (34,34)-(166,166)
        let expanded = expand(CropRegion::new(50, 50, 150, 150), 16, 1000, 800);
        assert_eq!(expanded, CropRegion::new(34, 34, 166, 166));

        let aligned = align_to_modulus(expanded, 8, 1000, 800).unwrap();
        assert_eq!(aligned, CropRegion::new(32, 32, 168, 168));
        assert_eq!(aligned.width(), 136);
        assert_eq!(aligned.height(), 136);
    }

    #[test]
    fn test_align_output_is_superset_and_multiple() {
        let cases = [
            (CropRegion::new(3, 5, 17, 29), 8, 100, 100),
            (CropRegion::new(0, 0, 1, 1), 16, 64, 64),
            (CropRegion::new(90, 90, 100, 100), 8, 100, 100),
            (CropRegion::new(10, 20, 73, 99), 32, 128, 256),
        ];
        for (region, modulus, w, h) in cases {
            let aligned = align_to_modulus(region, modulus, w, h).unwrap();
            assert_eq!(aligned.width() % modulus, 0, "{region:?}");
            assert_eq!(aligned.height() % modulus, 0, "{region:?}");
            assert!(aligned.left <= region.left);
            assert!(aligned.top <= region.top);
            assert!(aligned.right >= region.right);
            assert!(aligned.bottom >= region.bottom);
            assert!(aligned.right <= w && aligned.bottom <= h);
        }
    }

    #[test]
    fn test_align_image_smaller_than_modulus() {
        let region = CropRegion::new(0, 0, 4, 4);
        let err = align_to_modulus(region, 8, 6, 20).unwrap_err();
        assert!(matches!(err, InpaintError::UnalignableRegion { .. }));
    }

    #[test]
    fn test_align_clamps_when_no_multiple_fits() {
        // 10 wide image, modulus 8: largest multiple is 8, but the region
        // needs 9. Falls back to the full span.
        let region = CropRegion::new(0, 0, 9, 8);
        let aligned = align_to_modulus(region, 8, 10, 16).unwrap();
        assert_eq!(aligned.left, 0);
        assert_eq!(aligned.right, 10);
    }

    #[test]
    fn test_resize_within_limit_noop() {
        let image = RgbImage::new(800, 600);
        let (resized, scale) = resize_within_limit(&image, 1080, FilterType::CatmullRom);
        assert_eq!(resized.dimensions(), (800, 600));
        assert!((scale - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_resize_within_limit_scales_longer_side() {
        let image = RgbImage::new(2000, 1000);
        let (resized, scale) = resize_within_limit(&image, 1000, FilterType::CatmullRom);
        assert_eq!(resized.dimensions(), (1000, 500));
        assert!((scale - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_resize_within_limit_min_one_pixel() {
        let image = RgbImage::new(4000, 1);
        let (resized, _) = resize_within_limit(&image, 1000, FilterType::CatmullRom);
        assert_eq!(resized.dimensions(), (1000, 1));
    }

    #[test]
    fn test_pad_to_modulus_dimensions() {
        let image = RgbImage::new(130, 62);
        let padded = pad_to_modulus(&image, 8, 0);
        assert_eq!(padded.dimensions(), (136, 64));

        let padded = pad_to_modulus(&image, 8, 512);
        assert_eq!(padded.dimensions(), (512, 512));
    }

    #[test]
    fn test_pad_to_modulus_replicates_edges() {
        let mut image = GrayImage::new(3, 3);
        image.put_pixel(2, 2, Luma([200]));
        let padded = pad_to_modulus(&image, 4, 0);
        assert_eq!(padded.dimensions(), (4, 4));
        assert_eq!(padded.get_pixel(3, 3).0[0], 200);
        assert_eq!(padded.get_pixel(3, 2).0[0], 200);
    }

    #[test]
    fn test_pad_noop_when_aligned() {
        let image = RgbImage::new(64, 64);
        let padded = pad_to_modulus(&image, 8, 0);
        assert_eq!(padded.dimensions(), (64, 64));
    }

    #[test]
    fn test_crop_to_region() {
        let mut image = RgbImage::new(10, 10);
        image.put_pixel(5, 5, image::Rgb([1, 2, 3]));
        let sub = crop_to_region(&image, CropRegion::new(4, 4, 8, 8));
        assert_eq!(sub.dimensions(), (4, 4));
        assert_eq!(sub.get_pixel(1, 1).0, [1, 2, 3]);
    }
}
