//! Resolution strategy engine
//!
//! Decides, per request, whether the active backend sees the full image,
//! a resized copy, or an aligned crop around the mask, and tracks the
//! inverse transform (crop offset, scale factor) needed to composite the
//! backend's bounded-size output back into original coordinates. The
//! backend itself never learns the original geometry.

use crate::backends::{BackendError, CapabilityDescriptor, InferParams, InpaintBackend};
use crate::compositor;
use crate::config::{InpaintConfig, Strategy};
use crate::error::InpaintError;
use crate::geometry;
use crate::types::{CropRegion, InpaintRequest};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use log::debug;

/// Interpolation used for all strategy-level scale changes. CatmullRom is
/// the cubic filter, matching the original pipeline's choice.
const SCALE_FILTER: FilterType = FilterType::CatmullRom;

/// Failures inside a dispatch, keeping backend faults separate so the
/// registry can attach the backend name and trigger reclamation
#[derive(Debug)]
pub(crate) enum EngineError {
    Orchestration(InpaintError),
    Backend(BackendError),
}

impl From<InpaintError> for EngineError {
    fn from(err: InpaintError) -> Self {
        Self::Orchestration(err)
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

/// Outcome of a routed dispatch, in request coordinates
pub(crate) struct EngineOutput {
    pub image: RgbImage,
    /// The strategy that actually ran (a CROP request below the trigger
    /// size degrades to a full dispatch)
    pub strategy: Strategy,
    pub region: Option<CropRegion>,
}

/// Route a request through the chosen strategy and run the backend
pub(crate) fn run(
    backend: &mut dyn InpaintBackend,
    descriptor: &CapabilityDescriptor,
    request: &InpaintRequest,
    config: &InpaintConfig,
    params: &InferParams<'_>,
) -> Result<EngineOutput, EngineError> {
    // Request-level size limit: both buffers shrink before routing, and
    // the response stays at the reduced resolution.
    let limited;
    let (image, mask) = match config.size_limit {
        Some(limit) if request.image.width().max(request.image.height()) > limit => {
            let (small_image, _) = geometry::resize_within_limit(&request.image, limit, SCALE_FILTER);
            let small_mask = resize_mask_to(&request.mask, small_image.dimensions());
            debug!(
                "size limit {limit}: {:?} -> {:?}",
                request.image.dimensions(),
                small_image.dimensions()
            );
            limited = (small_image, small_mask);
            (&limited.0, &limited.1)
        },
        _ => (&request.image, &request.mask),
    };
    let (width, height) = image.dimensions();
    let longer_side = width.max(height);

    // Caller-supplied crop rectangle overrides the computed bounding box.
    if let Some(croper) = config.croper {
        let region = geometry::align_to_modulus(
            croper.clamp_to(width, height),
            descriptor.pad_modulus,
            width,
            height,
        )?;
        return dispatch_crop(backend, descriptor, image, mask, region, config, params);
    }

    match config.strategy {
        Strategy::Crop if longer_side > config.crop_trigger_size => {
            let bbox = geometry::bounding_box(mask)?;
            let expanded = geometry::expand(bbox, config.crop_margin, width, height);
            let region =
                geometry::align_to_modulus(expanded, descriptor.pad_modulus, width, height)?;
            debug!("crop dispatch: bbox {bbox:?} -> region {region:?}");
            dispatch_crop(backend, descriptor, image, mask, region, config, params)
        },
        Strategy::Resize if longer_side > config.resize_limit => {
            let (small_image, scale) =
                geometry::resize_within_limit(image, config.resize_limit, SCALE_FILTER);
            let small_mask = resize_mask_to(mask, small_image.dimensions());
            debug!("resize dispatch: scale {scale:.3} -> {:?}", small_image.dimensions());

            let raw = infer_padded(backend, descriptor, &small_image, &small_mask, params)?;
            let restored = compositor::undo_scale(
                &raw,
                image,
                mask,
                config.keep_pixel_threshold,
                SCALE_FILTER,
            );
            Ok(EngineOutput {
                image: postprocess(restored, image, mask, config),
                strategy: Strategy::Resize,
                region: None,
            })
        },
        _ => {
            let result = pad_forward(backend, descriptor, image, mask, config, params, false)?;
            Ok(EngineOutput {
                image: result,
                strategy: Strategy::Original,
                region: None,
            })
        },
    }
}

fn dispatch_crop(
    backend: &mut dyn InpaintBackend,
    descriptor: &CapabilityDescriptor,
    image: &RgbImage,
    mask: &GrayImage,
    region: CropRegion,
    config: &InpaintConfig,
    params: &InferParams<'_>,
) -> Result<EngineOutput, EngineError> {
    let crop_image = geometry::crop_to_region(image, region);
    let crop_mask = geometry::crop_to_region(mask, region);

    // The "scaled pad forward" path: a crop that still exceeds the
    // comfortable size gets downscaled before dispatch.
    let sub_result = pad_forward(
        backend,
        descriptor,
        &crop_image,
        &crop_mask,
        config,
        params,
        descriptor.supports_scaled_dispatch,
    )?;

    let mut full = image.clone();
    compositor::place_crop(&mut full, &sub_result, region);
    Ok(EngineOutput {
        image: full,
        strategy: Strategy::Crop,
        region: Some(region),
    })
}

/// Pad, infer, trim, and postprocess one bounded dispatch
///
/// With `allow_scaled` set, an input whose longer side exceeds the resize
/// limit is downscaled first and the raw output upscaled back, with
/// keep-pixel restoration guarding the untouched area.
#[allow(clippy::too_many_arguments)]
fn pad_forward(
    backend: &mut dyn InpaintBackend,
    descriptor: &CapabilityDescriptor,
    image: &RgbImage,
    mask: &GrayImage,
    config: &InpaintConfig,
    params: &InferParams<'_>,
    allow_scaled: bool,
) -> Result<RgbImage, EngineError> {
    let longer_side = image.width().max(image.height());

    let result = if allow_scaled && longer_side > config.resize_limit {
        let (small_image, scale) =
            geometry::resize_within_limit(image, config.resize_limit, SCALE_FILTER);
        let small_mask = resize_mask_to(mask, small_image.dimensions());
        debug!("scaled pad forward: scale {scale:.3}");
        let raw = infer_padded(backend, descriptor, &small_image, &small_mask, params)?;
        compositor::undo_scale(&raw, image, mask, config.keep_pixel_threshold, SCALE_FILTER)
    } else {
        infer_padded(backend, descriptor, image, mask, params)?
    };

    Ok(postprocess(result, image, mask, config))
}

/// Histogram matching and seam blending against `original`
///
/// Callers must hand in a result already undone to `original`'s
/// resolution with keep pixels restored; matching and blending never see
/// a downscaled buffer.
fn postprocess(
    mut result: RgbImage,
    original: &RgbImage,
    mask: &GrayImage,
    config: &InpaintConfig,
) -> RgbImage {
    if config.match_histograms {
        compositor::match_histograms(&mut result, original, mask);
    }
    let blend_mask = compositor::blur_mask_edge(mask, config.mask_blur_radius);
    compositor::blend_with_mask(&result, original, &blend_mask)
}

/// Pad both buffers to the backend's modulus and minimum size, run the
/// opaque call, and trim the output back to the pre-pad dimensions
fn infer_padded(
    backend: &mut dyn InpaintBackend,
    descriptor: &CapabilityDescriptor,
    image: &RgbImage,
    mask: &GrayImage,
    params: &InferParams<'_>,
) -> Result<RgbImage, EngineError> {
    let (width, height) = image.dimensions();
    let pad_image = geometry::pad_to_modulus(image, descriptor.pad_modulus, descriptor.min_size);
    let pad_mask = geometry::pad_to_modulus(mask, descriptor.pad_modulus, descriptor.min_size);

    let raw = backend.infer(&pad_image, &pad_mask, params)?;
    if raw.dimensions() != pad_image.dimensions() {
        return Err(EngineError::Backend(BackendError::Other(anyhow::anyhow!(
            "backend returned {:?} for {:?} input",
            raw.dimensions(),
            pad_image.dimensions()
        ))));
    }

    Ok(geometry::crop_to_region(
        &raw,
        CropRegion::new(0, 0, width, height),
    ))
}

fn resize_mask_to(mask: &GrayImage, dimensions: (u32, u32)) -> GrayImage {
    if mask.dimensions() == dimensions {
        mask.clone()
    } else {
        image::imageops::resize(mask, dimensions.0, dimensions.1, SCALE_FILTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::RecordingBackend;
    use image::Luma;

    fn request_with_block(w: u32, h: u32, block: CropRegion) -> InpaintRequest {
        let image = RgbImage::from_pixel(w, h, image::Rgb([40, 80, 120]));
        let mut mask = GrayImage::new(w, h);
        for y in block.top..block.bottom {
            for x in block.left..block.right {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        InpaintRequest::new(image, mask).unwrap()
    }

    fn params() -> InferParams<'static> {
        InferParams {
            seed: 7,
            example: None,
        }
    }

    fn descriptor(modulus: u32) -> CapabilityDescriptor {
        CapabilityDescriptor {
            min_size: 0,
            pad_modulus: modulus,
            supports_scaled_dispatch: true,
            supported_devices: vec![crate::config::Device::Cpu],
        }
    }

    #[test]
    fn test_crop_route_margin_and_alignment() {
        let request = request_with_block(1000, 800, CropRegion::new(50, 50, 150, 150));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Crop)
            .crop_margin(16)
            .crop_trigger_size(640)
            .build()
            .unwrap();
        let mut backend = RecordingBackend::painting([255, 0, 0]);

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();

        assert_eq!(output.strategy, Strategy::Crop);
        assert_eq!(output.region, Some(CropRegion::new(32, 32, 168, 168)));
        // Backend saw only the aligned 136x136 sub-image (already modulus-sized).
        assert_eq!(backend.seen_sizes(), vec![(136, 136)]);
    }

    #[test]
    fn test_crop_leaves_outside_pixels_byte_identical() {
        let request = request_with_block(1000, 800, CropRegion::new(50, 50, 150, 150));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Crop)
            .crop_margin(16)
            .crop_trigger_size(640)
            .build()
            .unwrap();
        let mut backend = RecordingBackend::painting([255, 0, 0]);

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();
        let region = output.region.unwrap();

        for (x, y, px) in output.image.enumerate_pixels() {
            if !region.contains(x, y) {
                assert_eq!(px, request.image.get_pixel(x, y), "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn test_crop_below_trigger_degrades_to_full_dispatch() {
        let request = request_with_block(400, 300, CropRegion::new(50, 50, 100, 100));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Crop)
            .crop_trigger_size(640)
            .build()
            .unwrap();
        let mut backend = RecordingBackend::identity();

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();

        assert_eq!(output.strategy, Strategy::Original);
        assert_eq!(output.region, None);
        // Full image, padded 400x300 -> 400x304.
        assert_eq!(backend.seen_sizes(), vec![(400, 304)]);
    }

    #[test]
    fn test_resize_route_keep_pixels_survive() {
        let request = request_with_block(2000, 1000, CropRegion::new(100, 100, 300, 300));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Resize)
            .resize_limit(1000)
            .build()
            .unwrap();
        let mut backend = RecordingBackend::painting([9, 9, 9]);

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();

        assert_eq!(output.strategy, Strategy::Resize);
        assert_eq!(output.image.dimensions(), (2000, 1000));
        // Backend saw the downscaled pair.
        assert_eq!(backend.seen_sizes(), vec![(1000, 504)]);
        // Far away from the mask, pixels are exactly the original.
        assert_eq!(
            output.image.get_pixel(1900, 900),
            request.image.get_pixel(1900, 900)
        );
    }

    #[test]
    fn test_resize_histogram_match_runs_after_upscale() {
        // Checkerboard surroundings: bimodal at full resolution, smeared
        // to mid-gray once downscaled. Matching must see the restored
        // full-resolution pixels, where half the mass sits at zero and
        // the mid-gray fill maps to black.
        let image = RgbImage::from_fn(2000, 1000, |x, y| {
            let v = if (x + y) % 2 == 0 { 0 } else { 255 };
            image::Rgb([v, v, v])
        });
        let mut mask = GrayImage::new(2000, 1000);
        for y in 400..600 {
            for x in 400..600 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let request = InpaintRequest::new(image, mask).unwrap();
        let config = InpaintConfig::builder()
            .strategy(Strategy::Resize)
            .resize_limit(1000)
            .match_histograms(true)
            .build()
            .unwrap();
        let mut backend = RecordingBackend::painting([127, 127, 127]);

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();

        let center = output.image.get_pixel(500, 500).0;
        assert!(center[0] <= 5, "matched fill should be black, got {center:?}");
        // Pixels outside the mask are restored, never matched.
        assert_eq!(output.image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(output.image.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_croper_overrides_bounding_box() {
        let request = request_with_block(1000, 800, CropRegion::new(50, 50, 150, 150));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Original)
            .croper(CropRegion::new(600, 200, 856, 456))
            .build()
            .unwrap();
        let mut backend = RecordingBackend::painting([0, 255, 0]);

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();

        assert_eq!(output.strategy, Strategy::Crop);
        assert_eq!(output.region, Some(CropRegion::new(600, 200, 856, 456)));
        assert_eq!(backend.seen_sizes(), vec![(256, 256)]);
    }

    #[test]
    fn test_nested_scaled_pad_forward() {
        // A croper rectangle larger than the resize limit gets downscaled
        // before dispatch and upscaled back on return.
        let request = request_with_block(3000, 2000, CropRegion::new(100, 100, 200, 200));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Original)
            .croper(CropRegion::new(0, 0, 2048, 1024))
            .resize_limit(512)
            .build()
            .unwrap();
        let mut backend = RecordingBackend::painting([1, 1, 1]);

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();

        assert_eq!(output.image.dimensions(), (3000, 2000));
        let seen = backend.seen_sizes();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0 <= 512 && seen[0].1 <= 512, "saw {seen:?}");
    }

    #[test]
    fn test_min_size_padding_applied() {
        let request = request_with_block(100, 80, CropRegion::new(10, 10, 40, 40));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Original)
            .build()
            .unwrap();
        let mut descriptor = descriptor(8);
        descriptor.min_size = 512;
        let mut backend = RecordingBackend::identity();

        let output = run(&mut backend, &descriptor, &request, &config, &params()).unwrap();

        assert_eq!(backend.seen_sizes(), vec![(512, 512)]);
        assert_eq!(output.image.dimensions(), (100, 80));
    }

    #[test]
    fn test_size_limit_shrinks_before_routing() {
        let request = request_with_block(4000, 2000, CropRegion::new(100, 100, 300, 300));
        let config = InpaintConfig::builder()
            .strategy(Strategy::Original)
            .size_limit(Some(1000))
            .build()
            .unwrap();
        let mut backend = RecordingBackend::identity();

        let output = run(&mut backend, &descriptor(8), &request, &config, &params()).unwrap();

        assert_eq!(output.image.dimensions(), (1000, 500));
        assert_eq!(backend.seen_sizes(), vec![(1000, 504)]);
    }
}
