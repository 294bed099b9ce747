//! Error types for inpainting orchestration
//!
//! Orchestration faults (bad geometry, unknown backend, busy engine) get
//! dedicated variants so callers can react to each condition; backend
//! internals stay behind [`InpaintError::BackendFailure`] with the cause
//! preserved for diagnostics.

use crate::config::Device;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, InpaintError>;

/// All errors the orchestration layer can surface
#[derive(Debug, Error)]
pub enum InpaintError {
    /// The mask contains no repaint pixels, so there is nothing to crop to
    #[error("mask {width}x{height} has no repaint pixels")]
    EmptyMask {
        /// Mask width
        width: u32,
        /// Mask height
        height: u32,
    },

    /// Image and mask (or alpha) dimensions disagree
    #[error(
        "image is {image_width}x{image_height} but mask is {mask_width}x{mask_height}"
    )]
    ShapeMismatch {
        image_width: u32,
        image_height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    /// No modulus-aligned rectangle fits inside the image
    #[error("cannot align {width}x{height} region to modulus {modulus} within image bounds")]
    UnalignableRegion {
        width: u32,
        height: u32,
        modulus: u32,
    },

    /// No backend registered under the requested name
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Backend switching is disabled for this registry
    #[error("backend switching is disabled")]
    SwitchDisabled,

    /// The backend cannot run on the configured device
    #[error("backend '{name}' does not support device {device}")]
    NotImplementedForDevice {
        /// Backend name
        name: String,
        /// Device the registry was configured with
        device: Device,
    },

    /// Device memory exhausted during inference; retrying with a smaller
    /// input (RESIZE strategy or a lower size limit) usually succeeds
    #[error("backend '{backend}' ran out of device memory: {detail}")]
    ResourceExhausted {
        /// Backend that hit the limit
        backend: String,
        /// Device-reported detail
        detail: String,
    },

    /// The backend failed for a reason other than memory pressure
    #[error("backend '{backend}' failed")]
    BackendFailure {
        /// Backend that failed
        backend: String,
        /// Underlying cause
        #[source]
        source: anyhow::Error,
    },

    /// A dispatch could not acquire the engine within its deadline
    #[error("engine busy: gave up after {waited_ms} ms")]
    Busy {
        /// Milliseconds waited before giving up
        waited_ms: u64,
    },

    /// Configuration parameters are inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Image decode or encode failure
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Filesystem failure (weights cache, model files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InpaintError {
    /// Create an invalid-configuration error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a shape-mismatch error from two dimension pairs
    #[must_use]
    pub fn shape_mismatch(image: (u32, u32), mask: (u32, u32)) -> Self {
        Self::ShapeMismatch {
            image_width: image.0,
            image_height: image.1,
            mask_width: mask.0,
            mask_height: mask.1,
        }
    }

    /// Whether retrying the same request with a smaller input is likely
    /// to succeed
    #[must_use]
    pub fn is_retryable_with_smaller_input(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}
