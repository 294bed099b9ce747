//! Core types for inpainting orchestration

use crate::config::Strategy;
use crate::error::{InpaintError, Result};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Mask values at or above this count as repaint pixels at request entry.
/// Matches the binarization threshold applied by the original server.
pub const MASK_BINARY_THRESHOLD: u8 = 127;

/// Rectangle in original-image coordinates selected for bounded processing
///
/// Invariant: `left < right <= image width` and `top < bottom <= image
/// height` for the image it was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    /// Inclusive left edge
    pub left: u32,
    /// Inclusive top edge
    pub top: u32,
    /// Exclusive right edge
    pub right: u32,
    /// Exclusive bottom edge
    pub bottom: u32,
}

impl CropRegion {
    /// Create a region from edges
    #[must_use]
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Region width
    #[must_use]
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    /// Region height
    #[must_use]
    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Clamp the region to image bounds
    #[must_use]
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Self {
        Self {
            left: self.left.min(image_width),
            top: self.top.min(image_height),
            right: self.right.min(image_width),
            bottom: self.bottom.min(image_height),
        }
    }

    /// Whether a pixel coordinate falls inside the region
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// A validated inpainting request: full-resolution image, binary mask,
/// optional alpha channel
///
/// Shape invariants are checked once at construction; everything
/// downstream can assume image and mask dimensions agree.
#[derive(Debug, Clone)]
pub struct InpaintRequest {
    /// RGB pixel buffer
    pub image: RgbImage,
    /// Binary mask, 0 = keep, 255 = repaint
    pub mask: GrayImage,
    /// Optional alpha channel carried alongside the RGB buffer
    pub alpha: Option<GrayImage>,
    /// Optional reference image for example-guided backends, passed
    /// through to the backend untouched
    pub example: Option<RgbImage>,
}

impl InpaintRequest {
    /// Create a request, validating mask and alpha shapes and binarizing
    /// the mask at [`MASK_BINARY_THRESHOLD`]
    pub fn new(image: RgbImage, mask: GrayImage) -> Result<Self> {
        if image.dimensions() != mask.dimensions() {
            return Err(InpaintError::shape_mismatch(
                image.dimensions(),
                mask.dimensions(),
            ));
        }

        let mut mask = mask;
        for px in mask.pixels_mut() {
            px.0[0] = if px.0[0] > MASK_BINARY_THRESHOLD {
                255
            } else {
                0
            };
        }

        Ok(Self {
            image,
            mask,
            alpha: None,
            example: None,
        })
    }

    /// Attach an alpha channel; must match the image dimensions
    pub fn with_alpha(mut self, alpha: GrayImage) -> Result<Self> {
        if alpha.dimensions() != self.image.dimensions() {
            return Err(InpaintError::shape_mismatch(
                self.image.dimensions(),
                alpha.dimensions(),
            ));
        }
        self.alpha = Some(alpha);
        Ok(self)
    }

    /// Attach a reference example image for example-guided backends
    #[must_use]
    pub fn with_example(mut self, example: RgbImage) -> Self {
        self.example = Some(example);
        self
    }

    /// Whether the mask has at least one repaint pixel
    #[must_use]
    pub fn mask_has_repaint_pixels(&self) -> bool {
        self.mask.pixels().any(|px| px.0[0] >= MASK_BINARY_THRESHOLD)
    }
}

/// Timing breakdown of a dispatch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchTimings {
    /// Time spent inside the backend's compute call, in milliseconds
    pub inference_ms: u64,
    /// Everything else: geometry, compositing, postprocessing
    pub orchestration_ms: u64,
    /// End-to-end dispatch time
    pub total_ms: u64,
}

/// Result of an orchestrated inpainting dispatch
#[derive(Debug, Clone)]
pub struct InpaintResult {
    /// Final full-resolution composited image (RGBA when the request
    /// carried an alpha channel, RGB otherwise)
    pub image: image::DynamicImage,
    /// The seed the backend call ran with; echoed back so callers can
    /// reproduce a result they liked
    pub seed: u64,
    /// Strategy the engine actually used
    pub strategy: Strategy,
    /// Crop region dispatched to the backend, if the CROP path ran
    pub region: Option<CropRegion>,
    /// Name of the backend that performed the repair
    pub backend: String,
    /// Timing breakdown
    pub timings: DispatchTimings,
}

impl InpaintResult {
    /// Final image dimensions
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        use image::GenericImageView;
        self.image.dimensions()
    }
}
