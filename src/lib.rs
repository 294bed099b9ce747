#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # hd-inpaint
//!
//! Resolution-adaptive orchestration for image inpainting backends.
//!
//! Inpainting models operate comfortably only on bounded-size inputs,
//! while user images keep growing. This crate sits between the two: it
//! routes each request through a high-resolution strategy (dispatch the
//! ORIGINAL image, RESIZE it down and restore, or CROP an aligned
//! rectangle around the mask), satisfies the active backend's padding
//! and size constraints, runs the backend, and composites the bounded
//! output back into the full-resolution canvas. Backends stay opaque
//! repair engines behind a small trait.
//!
//! ## Features
//!
//! - **Strategy routing**: ORIGINAL / RESIZE / CROP with caller
//!   overrides, crop margin and trigger thresholds, nested
//!   crop-then-scale for oversized crops
//! - **Backend registry**: lazy construction through factories, one
//!   active backend at a time, exclusive inference and activation
//!   sections, typed switch errors that never tear down a working
//!   backend
//! - **Compositing**: keep-pixel restoration after scaling, soft mask
//!   blending with optional edge blur, histogram matching, alpha
//!   channel reattachment, BGR output for OpenCV-style consumers
//! - **Backends**: a built-in pure-Rust diffusion fill, plus an ONNX
//!   Runtime backend (feature `onnx`, default on) for LaMa-style
//!   exported models
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hd_inpaint::{
//!     BackendRegistry, DiffuseBackend, DiffuseFactory, InpaintConfig,
//!     InpaintRequest, RegistryOptions, Strategy,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> hd_inpaint::Result<()> {
//! let image = image::open("photo.jpg")?.to_rgb8();
//! let mask = image::open("mask.png")?.to_luma8();
//! let request = InpaintRequest::new(image, mask)?;
//!
//! let registry = BackendRegistry::new(RegistryOptions::default());
//! registry.register("diffuse", DiffuseBackend::descriptor(), Arc::new(DiffuseFactory));
//! registry.activate("diffuse").await?;
//!
//! let config = InpaintConfig::builder()
//!     .strategy(Strategy::Crop)
//!     .crop_margin(196)
//!     .build()?;
//! let result = registry.dispatch(&request, &config).await?;
//! result.image.save("repaired.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML support

pub mod backends;
pub mod compositor;
pub mod config;
pub mod error;
pub mod geometry;
pub mod registry;
mod strategy;
pub mod types;
pub mod weights;

pub use backends::{
    BackendError, BackendFactory, CapabilityDescriptor, DiffuseBackend, DiffuseFactory,
    InferParams, InpaintBackend,
};
#[cfg(feature = "onnx")]
pub use backends::onnx::{OnnxBackendFactory, OnnxInpaintBackend};
pub use config::{ColorOrder, Device, InpaintConfig, InpaintConfigBuilder, Precision, Strategy};
pub use error::{InpaintError, Result};
pub use registry::{BackendRegistry, RegistryOptions};
pub use types::{
    CropRegion, DispatchTimings, InpaintRequest, InpaintResult, MASK_BINARY_THRESHOLD,
};
pub use weights::WeightCache;

/// Repair a single image with the built-in diffusion backend
///
/// Convenience wrapper for callers that do not need backend selection:
/// builds a throwaway registry, activates the diffusion fill, and runs
/// one dispatch.
pub async fn inpaint_image(
    request: &InpaintRequest,
    config: &InpaintConfig,
) -> Result<InpaintResult> {
    let registry = BackendRegistry::new(RegistryOptions::default());
    registry.register(
        "diffuse",
        DiffuseBackend::descriptor(),
        std::sync::Arc::new(DiffuseFactory),
    );
    registry.activate("diffuse").await?;
    registry.dispatch(request, config).await
}
