//! Configuration types for inpainting requests and the backend registry

use crate::error::{InpaintError, Result};
use crate::types::CropRegion;
use serde::{Deserialize, Serialize};

/// Compute device a backend runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU
    Cuda,
    /// Apple Silicon GPU (Metal / CoreML)
    Metal,
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Numeric precision for backend weights and activations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit floats
    Full,
    /// 16-bit floats (GPU only for most backends)
    Half,
}

impl Default for Precision {
    fn default() -> Self {
        Self::Full
    }
}

/// High-resolution dispatch strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Dispatch the full image unchanged (modulus padding only)
    Original,
    /// Downscale to the resize limit, dispatch, upscale the result back
    Resize,
    /// Dispatch only an aligned crop around the mask's bounding box
    Crop,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Crop
    }
}

/// Channel order of the final composited image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorOrder {
    /// Red, green, blue (the crate's working order)
    Rgb,
    /// Blue, green, red (callers feeding OpenCV-style consumers)
    Bgr,
}

impl Default for ColorOrder {
    fn default() -> Self {
        Self::Rgb
    }
}

/// Per-request inpainting configuration
///
/// Strategy parameters mirror the knobs of the original high-resolution
/// pipeline: which strategy to use, when cropping triggers, how far the
/// crop extends past the mask, and how large a dispatch may get before
/// it is downscaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InpaintConfig {
    /// Dispatch strategy
    pub strategy: Strategy,

    /// Margin in pixels added around the mask bounding box for CROP
    pub crop_margin: u32,

    /// Longer-side size above which CROP actually crops
    pub crop_trigger_size: u32,

    /// Longer-side limit for RESIZE and for nested crop downscaling
    pub resize_limit: u32,

    /// Optional request-level size limit applied to image and mask before
    /// strategy routing (`None` = keep original resolution)
    pub size_limit: Option<u32>,

    /// Caller-supplied crop rectangle, overriding the computed bounding box
    pub croper: Option<CropRegion>,

    /// Mask edge blur radius for seam smoothing (kernel size `2*r+1`, 0 = off)
    pub mask_blur_radius: u32,

    /// Match the repainted region's color distribution to its surroundings
    pub match_histograms: bool,

    /// Mask values strictly below this keep the original pixel after an
    /// undo-scale. Tolerates anti-aliased mask edges; tune per
    /// interpolation kernel.
    pub keep_pixel_threshold: u8,

    /// Seed for stochastic backends (`None` = resolved by the registry and
    /// echoed back in the result)
    pub seed: Option<u64>,

    /// Channel order of the output image
    pub color_order: ColorOrder,
}

impl Default for InpaintConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            crop_margin: 196,
            crop_trigger_size: 1280,
            resize_limit: 2048,
            size_limit: None,
            croper: None,
            mask_blur_radius: 0,
            match_histograms: false,
            keep_pixel_threshold: 127,
            seed: None,
            color_order: ColorOrder::default(),
        }
    }
}

impl InpaintConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder() -> InpaintConfigBuilder {
        InpaintConfigBuilder::default()
    }

    /// Validate parameter consistency
    pub fn validate(&self) -> Result<()> {
        if self.resize_limit == 0 {
            return Err(InpaintError::invalid_config(
                "resize limit must be at least 1",
            ));
        }
        if self.crop_trigger_size == 0 {
            return Err(InpaintError::invalid_config(
                "crop trigger size must be at least 1",
            ));
        }
        if let Some(limit) = self.size_limit {
            if limit == 0 {
                return Err(InpaintError::invalid_config("size limit must be at least 1"));
            }
        }
        if let Some(region) = &self.croper {
            if region.left >= region.right || region.top >= region.bottom {
                return Err(InpaintError::invalid_config(format!(
                    "croper rectangle {region:?} is empty"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`InpaintConfig`]
#[derive(Debug, Default)]
pub struct InpaintConfigBuilder {
    config: InpaintConfig,
}

impl InpaintConfigBuilder {
    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    #[must_use]
    pub fn crop_margin(mut self, margin: u32) -> Self {
        self.config.crop_margin = margin;
        self
    }

    #[must_use]
    pub fn crop_trigger_size(mut self, size: u32) -> Self {
        self.config.crop_trigger_size = size;
        self
    }

    #[must_use]
    pub fn resize_limit(mut self, limit: u32) -> Self {
        self.config.resize_limit = limit;
        self
    }

    #[must_use]
    pub fn size_limit(mut self, limit: Option<u32>) -> Self {
        self.config.size_limit = limit;
        self
    }

    #[must_use]
    pub fn croper(mut self, region: CropRegion) -> Self {
        self.config.croper = Some(region);
        self
    }

    #[must_use]
    pub fn mask_blur_radius(mut self, radius: u32) -> Self {
        self.config.mask_blur_radius = radius;
        self
    }

    #[must_use]
    pub fn match_histograms(mut self, enabled: bool) -> Self {
        self.config.match_histograms = enabled;
        self
    }

    #[must_use]
    pub fn keep_pixel_threshold(mut self, threshold: u8) -> Self {
        self.config.keep_pixel_threshold = threshold;
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn color_order(mut self, order: ColorOrder) -> Self {
        self.config.color_order = order;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<InpaintConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
