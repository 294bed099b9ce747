//! Mock backends for unit and integration tests
//!
//! These never touch a device; they record what the orchestration layer
//! hands them and produce deterministic output, so tests can assert on
//! dispatch geometry and error handling without model weights.

use super::{BackendError, BackendFactory, InferParams, InpaintBackend};
use crate::config::{Device, Precision};
use crate::error::Result;
use crate::types::MASK_BINARY_THRESHOLD;
use image::{GrayImage, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every dispatch and paints masked pixels a fixed color
pub struct RecordingBackend {
    sizes: Arc<Mutex<Vec<(u32, u32)>>>,
    seeds: Arc<Mutex<Vec<u64>>>,
    fill: Option<[u8; 3]>,
}

impl RecordingBackend {
    /// Backend that returns its input unchanged
    #[must_use]
    pub fn identity() -> Self {
        Self {
            sizes: Arc::new(Mutex::new(Vec::new())),
            seeds: Arc::new(Mutex::new(Vec::new())),
            fill: None,
        }
    }

    /// Backend that paints masked pixels with `color`
    #[must_use]
    pub fn painting(color: [u8; 3]) -> Self {
        Self {
            fill: Some(color),
            ..Self::identity()
        }
    }

    /// Dimensions of every sub-image the backend has seen
    #[must_use]
    pub fn seen_sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().unwrap().clone()
    }

    /// Seeds of every call the backend has seen
    #[must_use]
    pub fn seen_seeds(&self) -> Vec<u64> {
        self.seeds.lock().unwrap().clone()
    }

    /// Shared handles observing this backend after it moves into a registry
    #[must_use]
    pub fn observer(&self) -> RecordingObserver {
        RecordingObserver {
            sizes: Arc::clone(&self.sizes),
            seeds: Arc::clone(&self.seeds),
        }
    }
}

/// Read-only view onto a [`RecordingBackend`] owned elsewhere
#[derive(Clone)]
pub struct RecordingObserver {
    sizes: Arc<Mutex<Vec<(u32, u32)>>>,
    seeds: Arc<Mutex<Vec<u64>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn seen_sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().unwrap().clone()
    }

    #[must_use]
    pub fn seen_seeds(&self) -> Vec<u64> {
        self.seeds.lock().unwrap().clone()
    }
}

impl InpaintBackend for RecordingBackend {
    fn infer(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        params: &InferParams<'_>,
    ) -> std::result::Result<RgbImage, BackendError> {
        self.sizes.lock().unwrap().push(image.dimensions());
        self.seeds.lock().unwrap().push(params.seed);

        let mut out = image.clone();
        if let Some(color) = self.fill {
            for (x, y, px) in out.enumerate_pixels_mut() {
                if mask.get_pixel(x, y).0[0] >= MASK_BINARY_THRESHOLD {
                    px.0 = color;
                }
            }
        }
        Ok(out)
    }
}

/// Factory producing recording backends that all share one observer
pub struct RecordingFactory {
    observer: RecordingObserver,
    fill: Option<[u8; 3]>,
    downloaded: bool,
    created: AtomicUsize,
}

impl RecordingFactory {
    #[must_use]
    pub fn painting(color: [u8; 3]) -> Self {
        Self {
            observer: RecordingBackend::identity().observer(),
            fill: Some(color),
            downloaded: true,
            created: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn not_downloaded() -> Self {
        Self {
            downloaded: false,
            ..Self::painting([255, 0, 255])
        }
    }

    #[must_use]
    pub fn observer(&self) -> RecordingObserver {
        self.observer.clone()
    }

    /// How many backend instances this factory has constructed
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BackendFactory for RecordingFactory {
    fn create(&self, _device: Device, _precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingBackend {
            sizes: Arc::clone(&self.observer.sizes),
            seeds: Arc::clone(&self.observer.seeds),
            fill: self.fill,
        }))
    }

    fn is_downloaded(&self) -> bool {
        self.downloaded
    }
}

/// Backend that reports out-of-memory for the first `failures` calls,
/// then succeeds; counts reclamation attempts
pub struct OomBackend {
    remaining_failures: Arc<AtomicUsize>,
    reclaims: Arc<AtomicUsize>,
}

impl OomBackend {
    #[must_use]
    pub fn failing_first(failures: usize) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            reclaims: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn reclaim_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reclaims)
    }
}

impl InpaintBackend for OomBackend {
    fn infer(
        &mut self,
        image: &RgbImage,
        _mask: &GrayImage,
        _params: &InferParams<'_>,
    ) -> std::result::Result<RgbImage, BackendError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::OutOfMemory(format!(
                "simulated OOM at {}x{}",
                image.width(),
                image.height()
            )));
        }
        Ok(image.clone())
    }

    fn reclaim_memory(&mut self) {
        self.reclaims.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory for [`OomBackend`]s sharing one failure budget
pub struct OomFactory {
    remaining_failures: Arc<AtomicUsize>,
    reclaims: Arc<AtomicUsize>,
}

impl OomFactory {
    #[must_use]
    pub fn failing_first(failures: usize) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            reclaims: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn reclaim_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reclaims)
    }
}

impl BackendFactory for OomFactory {
    fn create(&self, _device: Device, _precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        Ok(Box::new(OomBackend {
            remaining_failures: Arc::clone(&self.remaining_failures),
            reclaims: Arc::clone(&self.reclaims),
        }))
    }
}

/// Factory whose construction takes a while, for observing registry
/// state during an in-flight switch
pub struct SlowFactory {
    delay: std::time::Duration,
}

impl SlowFactory {
    #[must_use]
    pub fn taking(delay: std::time::Duration) -> Self {
        Self { delay }
    }
}

impl BackendFactory for SlowFactory {
    fn create(&self, _device: Device, _precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        std::thread::sleep(self.delay);
        Ok(Box::new(RecordingBackend::identity()))
    }
}

/// Backend whose every call fails with an opaque internal error
pub struct FailingBackend;

impl InpaintBackend for FailingBackend {
    fn infer(
        &mut self,
        _image: &RgbImage,
        _mask: &GrayImage,
        _params: &InferParams<'_>,
    ) -> std::result::Result<RgbImage, BackendError> {
        Err(BackendError::Other(anyhow::anyhow!(
            "tensor shape negotiation failed"
        )))
    }
}

/// Factory whose construction always fails, for activation rollback tests
pub struct BrokenFactory;

impl BackendFactory for BrokenFactory {
    fn create(&self, _device: Device, _precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        Err(crate::error::InpaintError::BackendFailure {
            backend: "broken".to_string(),
            source: anyhow::anyhow!("weights file truncated"),
        })
    }
}

/// Factory wrapping [`FailingBackend`]
pub struct FailingFactory;

impl BackendFactory for FailingFactory {
    fn create(&self, _device: Device, _precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        Ok(Box::new(FailingBackend))
    }
}

/// Backend that blocks inside `infer` until told to finish, for
/// exclusive-section tests
pub struct BlockingBackend {
    release: Arc<std::sync::Condvar>,
    gate: Arc<Mutex<bool>>,
    entered: Arc<AtomicUsize>,
}

impl BlockingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            release: Arc::new(std::sync::Condvar::new()),
            gate: Arc::new(Mutex::new(false)),
            entered: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle that lets a test unblock the in-flight call
    #[must_use]
    pub fn gate(&self) -> BlockingGate {
        BlockingGate {
            release: Arc::clone(&self.release),
            gate: Arc::clone(&self.gate),
            entered: Arc::clone(&self.entered),
        }
    }
}

impl Default for BlockingBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller for a [`BlockingBackend`]
#[derive(Clone)]
pub struct BlockingGate {
    release: Arc<std::sync::Condvar>,
    gate: Arc<Mutex<bool>>,
    entered: Arc<AtomicUsize>,
}

impl BlockingGate {
    /// Let the blocked inference call return
    pub fn open(&self) {
        *self.gate.lock().unwrap() = true;
        self.release.notify_all();
    }

    /// How many inference calls have started
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl InpaintBackend for BlockingBackend {
    fn infer(
        &mut self,
        image: &RgbImage,
        _mask: &GrayImage,
        _params: &InferParams<'_>,
    ) -> std::result::Result<RgbImage, BackendError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let guard = self.gate.lock().unwrap();
        let _unused = self
            .release
            .wait_while(guard, |open| !*open)
            .map_err(|_| BackendError::Other(anyhow::anyhow!("gate poisoned")))?;
        Ok(image.clone())
    }
}

/// Factory producing blocking backends that share one gate
pub struct BlockingFactory {
    gate: BlockingGate,
}

impl BlockingFactory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: BlockingBackend::new().gate(),
        }
    }

    #[must_use]
    pub fn gate(&self) -> BlockingGate {
        self.gate.clone()
    }
}

impl Default for BlockingFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for BlockingFactory {
    fn create(&self, _device: Device, _precision: Precision) -> Result<Box<dyn InpaintBackend>> {
        Ok(Box::new(BlockingBackend {
            release: Arc::clone(&self.gate.release),
            gate: Arc::clone(&self.gate.gate),
            entered: Arc::clone(&self.gate.entered),
        }))
    }
}
