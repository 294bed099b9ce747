//! Inpainting backend abstraction
//!
//! Backends are opaque repair engines operating on bounded-size pixel
//! buffers. The orchestration layer never asks a backend to understand
//! the original image geometry; it hands over a sub-image and sub-mask
//! that already satisfy the backend's declared constraints and composites
//! the result itself.

pub mod diffuse;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod test_utils;

use crate::config::Device;
use image::{GrayImage, RgbImage};

pub use diffuse::{DiffuseBackend, DiffuseFactory};
#[cfg(feature = "onnx")]
pub use onnx::OnnxInpaintBackend;

/// Static capability metadata for a backend, immutable after registration
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    /// Minimum square operable size; inputs are padded up to at least this
    pub min_size: u32,
    /// Both input dimensions must be multiples of this ("padding modulus")
    pub pad_modulus: u32,
    /// Whether an oversized dispatch may be downscaled before the backend
    /// sees it (some backends degrade badly on resampled input)
    pub supports_scaled_dispatch: bool,
    /// Devices the backend can run on
    pub supported_devices: Vec<Device>,
}

impl CapabilityDescriptor {
    /// Descriptor for a backend with no size constraints, CPU only
    #[must_use]
    pub fn unconstrained() -> Self {
        Self {
            min_size: 0,
            pad_modulus: 1,
            supports_scaled_dispatch: true,
            supported_devices: vec![Device::Cpu],
        }
    }

    /// Whether the backend can run on the given device
    #[must_use]
    pub fn supports_device(&self, device: Device) -> bool {
        self.supported_devices.contains(&device)
    }
}

/// Error surface of a backend call
///
/// Out-of-memory gets its own variant so the registry can map it to a
/// typed orchestration error and attempt device memory reclamation;
/// everything else keeps its original cause for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Device memory exhausted mid-inference
    #[error("device out of memory: {0}")]
    OutOfMemory(String),
    /// Any other backend-internal fault
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Parameters threaded through to a backend call
#[derive(Debug, Clone)]
pub struct InferParams<'a> {
    /// Resolved seed for stochastic backends; never "unspecified" by the
    /// time a backend sees it
    pub seed: u64,
    /// Reference image for example-guided backends, passed through
    /// unmodified by the orchestration layer
    pub example: Option<&'a RgbImage>,
}

/// An opaque inference backend performing the actual repair
///
/// Contract: `infer` receives an RGB sub-image and same-sized sub-mask
/// whose dimensions satisfy the registered [`CapabilityDescriptor`]
/// (modulus-aligned, at least `min_size`), and returns an RGB buffer of
/// identical dimensions. Inference may block for seconds; the registry
/// serializes calls so a backend never sees two concurrent `infer`s.
pub trait InpaintBackend: Send {
    /// Repair the masked area of `image` and return the full sub-image
    fn infer(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        params: &InferParams<'_>,
    ) -> Result<RgbImage, BackendError>;

    /// Best-effort release of device memory after an out-of-memory fault
    fn reclaim_memory(&mut self) {}
}

/// Lazily constructs backend instances at activation time
///
/// Construction covers device placement, precision selection, and weight
/// loading; none of that happens at registration.
pub trait BackendFactory: Send + Sync {
    /// Build a backend on the given device and precision
    fn create(
        &self,
        device: Device,
        precision: crate::config::Precision,
    ) -> crate::error::Result<Box<dyn InpaintBackend>>;

    /// Whether the backend's weights are present locally
    fn is_downloaded(&self) -> bool {
        true
    }
}
