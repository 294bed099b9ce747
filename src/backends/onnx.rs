//! ONNX Runtime inpainting backend
//!
//! Runs exported inpainting models (LaMa-style two-input graphs: NCHW
//! image plus single-channel mask) through `ort`, with execution-provider
//! selection per configured device and positional IO so tensor names in
//! the exported graph do not matter.

use super::{BackendError, BackendFactory, CapabilityDescriptor, InferParams, InpaintBackend};
use crate::config::{Device, Precision};
use crate::error::{InpaintError, Result};
use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::PathBuf;

/// ONNX Runtime backend executing a two-input inpainting graph
pub struct OnnxInpaintBackend {
    session: Session,
}

impl OnnxInpaintBackend {
    /// Load a model file and build a session for the given device
    pub fn from_file(path: &std::path::Path, device: Device, precision: Precision) -> Result<Self> {
        let model_data = std::fs::read(path)?;
        log::debug!(
            "loading ONNX model from {} ({} bytes, {precision:?} precision)",
            path.display(),
            model_data.len()
        );

        let mut builder = Session::builder()
            .map_err(|e| session_error("create session builder", &e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| session_error("set optimization level", &e))?;

        builder = match device {
            Device::Cpu => builder,
            Device::Cuda => {
                let provider = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&provider).unwrap_or(false) {
                    log::info!("using CUDA execution provider");
                    builder
                        .with_execution_providers([provider.build()])
                        .map_err(|e| session_error("set CUDA execution provider", &e))?
                } else {
                    log::warn!("CUDA requested but not available, falling back to CPU");
                    builder
                }
            },
            Device::Metal => {
                let provider = CoreMLExecutionProvider::default();
                if OrtExecutionProvider::is_available(&provider).unwrap_or(false) {
                    log::info!("using CoreML execution provider");
                    let provider = CoreMLExecutionProvider::default().with_subgraphs(true);
                    builder
                        .with_execution_providers([provider.build()])
                        .map_err(|e| session_error("set CoreML execution provider", &e))?
                } else {
                    log::warn!("CoreML requested but not available, falling back to CPU");
                    builder
                }
            },
        };

        let intra_threads = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| session_error("set intra threads", &e))?
            .commit_from_memory(&model_data)
            .map_err(|e| session_error("create session from model data", &e))?;

        Ok(Self { session })
    }
}

fn session_error(action: &str, err: &ort::Error) -> InpaintError {
    InpaintError::BackendFailure {
        backend: "onnx".to_string(),
        source: anyhow::anyhow!("failed to {action}: {err}"),
    }
}

impl InpaintBackend for OnnxInpaintBackend {
    fn infer(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        _params: &InferParams<'_>,
    ) -> std::result::Result<RgbImage, BackendError> {
        let (width, height) = image.dimensions();
        let image_tensor = image_to_tensor(image);
        let mask_tensor = mask_to_tensor(mask);

        let image_value = Value::from_array(image_tensor)
            .map_err(|e| BackendError::Other(anyhow::anyhow!("input tensor conversion: {e}")))?;
        let mask_value = Value::from_array(mask_tensor)
            .map_err(|e| BackendError::Other(anyhow::anyhow!("mask tensor conversion: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![image_value, mask_value])
            .map_err(|e| classify_run_error(&e))?;

        // Positional output access, first output is the repainted image.
        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| BackendError::Other(anyhow::anyhow!("model produced no outputs")))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| BackendError::Other(anyhow::anyhow!("first output tensor missing")))?
            .try_extract_array::<f32>()
            .map_err(|e| BackendError::Other(anyhow::anyhow!("output extraction: {e}")))?;

        let shape = output.shape();
        if shape.len() != 4 || shape[1] != 3 {
            return Err(BackendError::Other(anyhow::anyhow!(
                "expected NCHW RGB output, got shape {shape:?}"
            )));
        }
        if (shape[3] as u32, shape[2] as u32) != (width, height) {
            return Err(BackendError::Other(anyhow::anyhow!(
                "model returned {}x{} for {width}x{height} input",
                shape[3],
                shape[2]
            )));
        }

        Ok(tensor_to_image(&output.view(), width, height))
    }
}

/// Map an ort runtime error, detecting device memory exhaustion by message
fn classify_run_error(err: &ort::Error) -> BackendError {
    let message = err.to_string();
    if is_oom_message(&message) {
        BackendError::OutOfMemory(message)
    } else {
        BackendError::Other(anyhow::anyhow!("ONNX inference failed: {message}"))
    }
}

fn is_oom_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("out of memory")
        || lower.contains("failed to allocate memory")
        || lower.contains("cuda error 2")
}

/// RGB8 image to normalized NCHW `[1, 3, H, W]` in `0..=1`
fn image_to_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, px) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = f32::from(px.0[c]) / 255.0;
        }
    }
    tensor
}

/// Binary mask to NCHW `[1, 1, H, W]` with repaint pixels at 1.0
fn mask_to_tensor(mask: &GrayImage) -> Array4<f32> {
    let (width, height) = mask.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 1, height as usize, width as usize));
    for (x, y, px) in mask.enumerate_pixels() {
        if px.0[0] >= crate::types::MASK_BINARY_THRESHOLD {
            tensor[[0, 0, y as usize, x as usize]] = 1.0;
        }
    }
    tensor
}

/// NCHW float output in `0..=1` back to an RGB8 buffer
fn tensor_to_image(tensor: &ndarray::ArrayViewD<'_, f32>, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let mut px = [0u8; 3];
        for c in 0..3 {
            let value = tensor[[0, c, y as usize, x as usize]];
            px[c] = (value * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        image::Rgb(px)
    })
}

/// Factory loading an ONNX model file at activation time
pub struct OnnxBackendFactory {
    model_path: PathBuf,
}

impl OnnxBackendFactory {
    #[must_use]
    pub fn new(model_path: PathBuf) -> Self {
        Self { model_path }
    }

    /// Descriptor for LaMa-style exports: inputs padded to a multiple of
    /// 8, scaled dispatch tolerated, CPU and CUDA
    #[must_use]
    pub fn lama_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor {
            min_size: 0,
            pad_modulus: 8,
            supports_scaled_dispatch: true,
            supported_devices: vec![Device::Cpu, Device::Cuda, Device::Metal],
        }
    }
}

impl BackendFactory for OnnxBackendFactory {
    fn create(&self, device: Device, precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        Ok(Box::new(OnnxInpaintBackend::from_file(
            &self.model_path,
            device,
            precision,
        )?))
    }

    fn is_downloaded(&self) -> bool {
        self.model_path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_image_tensor_layout() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, image::Rgb([255, 0, 51]));
        let tensor = image_to_tensor(&image);

        assert_eq!(tensor.dim(), (1, 3, 2, 3));
        assert!((tensor[[0, 0, 1, 2]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 1, 2]] - 0.2).abs() < 1e-6);
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_mask_tensor_binarized() {
        let mut mask = GrayImage::new(2, 2);
        mask.put_pixel(0, 0, Luma([255]));
        mask.put_pixel(1, 0, Luma([126]));
        let tensor = mask_to_tensor(&mask);

        assert_eq!(tensor.dim(), (1, 1, 2, 2));
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 0, 0, 1]].abs() < 1e-6);
    }

    #[test]
    fn test_tensor_to_image_clamps() {
        let mut tensor = Array4::<f32>::zeros((1, 3, 1, 2));
        tensor[[0, 0, 0, 0]] = 1.4;
        tensor[[0, 1, 0, 1]] = -0.5;
        let image = tensor_to_image(&tensor.view().into_dyn(), 2, 1);

        assert_eq!(image.get_pixel(0, 0).0[0], 255);
        assert_eq!(image.get_pixel(1, 0).0[1], 0);
    }

    #[test]
    fn test_oom_messages_detected() {
        assert!(is_oom_message("CUDA out of memory. Tried to allocate 2.00 GiB"));
        assert!(is_oom_message("Failed to allocate memory for requested buffer"));
        assert!(!is_oom_message("invalid dimensions for input"));
    }

    #[test]
    fn test_missing_model_not_downloaded() {
        let factory = OnnxBackendFactory::new(PathBuf::from("/nonexistent/model.onnx"));
        assert!(!factory.is_downloaded());
    }
}
