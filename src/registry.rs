//! Backend registry and dispatch surface
//!
//! The registry owns every known backend's capability descriptor and
//! factory, keeps at most one backend constructed at a time, and
//! serializes inference and activation behind a single async mutex so a
//! backend never sees concurrent calls and a switch never tears down a
//! backend mid-inference.

use crate::backends::{
    BackendError, BackendFactory, CapabilityDescriptor, InferParams, InpaintBackend,
};
use crate::config::{Device, InpaintConfig, Precision};
use crate::error::{InpaintError, Result};
use crate::strategy::{self, EngineError};
use crate::types::{DispatchTimings, InpaintRequest, InpaintResult};
use image::{GrayImage, RgbImage};
use instant::Instant;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::instrument;

/// Registry-wide execution options, fixed at construction
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Device every activated backend is placed on
    pub device: Device,
    /// Precision backends are constructed with
    pub precision: Precision,
    /// Reject activation of a different backend once one is active
    pub disable_switch: bool,
}

struct RegisteredBackend {
    descriptor: CapabilityDescriptor,
    factory: Arc<dyn BackendFactory>,
}

struct ActiveBackend {
    name: String,
    descriptor: CapabilityDescriptor,
    backend: Box<dyn InpaintBackend>,
}

/// Registry of inpainting backends with a single active slot
///
/// Registration is cheap and never loads weights; construction happens at
/// [`activate`](Self::activate) time through the backend's factory.
/// Dispatch and activation share one exclusive section, so an activation
/// requested while an inference is in flight waits for it to finish.
pub struct BackendRegistry {
    options: RegistryOptions,
    backends: RwLock<HashMap<String, RegisteredBackend>>,
    active: tokio::sync::Mutex<Option<ActiveBackend>>,
    // Mirror of the active slot's name, readable without the async lock.
    active_name: RwLock<Option<String>>,
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            options,
            backends: RwLock::new(HashMap::new()),
            active: tokio::sync::Mutex::new(None),
            active_name: RwLock::new(None),
        }
    }

    /// Register a backend under a unique name
    ///
    /// Replaces any previous registration under the same name; an already
    /// active backend keeps running until the next activation.
    pub fn register<S: Into<String>>(
        &self,
        name: S,
        descriptor: CapabilityDescriptor,
        factory: Arc<dyn BackendFactory>,
    ) {
        let name = name.into();
        log::debug!("registering backend '{name}'");
        self.backends
            .write()
            .unwrap()
            .insert(name, RegisteredBackend { descriptor, factory });
    }

    /// Names of all registered backends
    #[must_use]
    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Name of the currently active backend, if any
    #[must_use]
    pub fn active_backend(&self) -> Option<String> {
        self.active_name.read().unwrap().clone()
    }

    /// Whether a registered backend's weights are present locally
    pub fn is_available(&self, name: &str) -> Result<bool> {
        let backends = self.backends.read().unwrap();
        let registered = backends
            .get(name)
            .ok_or_else(|| InpaintError::UnknownBackend(name.to_string()))?;
        Ok(registered.factory.is_downloaded())
    }

    /// Make `name` the active backend, constructing it through its factory
    ///
    /// Switching to the already-active backend is a no-op success. All
    /// validations run before the previous backend is torn down, so every
    /// typed error here leaves it untouched. Waits for any in-flight
    /// inference to finish before the swap.
    pub async fn activate(&self, name: &str) -> Result<()> {
        let (descriptor, factory) = {
            let backends = self.backends.read().unwrap();
            let registered = backends
                .get(name)
                .ok_or_else(|| InpaintError::UnknownBackend(name.to_string()))?;
            (registered.descriptor.clone(), Arc::clone(&registered.factory))
        };

        if self.active_backend().as_deref() == Some(name) {
            log::debug!("backend '{name}' already active");
            return Ok(());
        }
        // The first activation is configuration, not a switch.
        if self.options.disable_switch && self.active_backend().is_some() {
            return Err(InpaintError::SwitchDisabled);
        }
        if !descriptor.supports_device(self.options.device) {
            return Err(InpaintError::NotImplementedForDevice {
                name: name.to_string(),
                device: self.options.device,
            });
        }
        if !factory.is_downloaded() {
            return Err(InpaintError::BackendFailure {
                backend: name.to_string(),
                source: anyhow::anyhow!("model weights not present in the local cache"),
            });
        }

        let mut active = self.active.lock().await;

        // Teardown before construction keeps peak memory at one backend.
        // The name mirror keeps reporting the previous backend until the
        // swap is decided, so observers never see an empty slot while a
        // successful switch is in flight.
        let previous = active.take();

        match factory.create(self.options.device, self.options.precision) {
            Ok(backend) => {
                log::info!(
                    "activated backend '{name}' on {} ({:?} precision)",
                    self.options.device,
                    self.options.precision
                );
                *active = Some(ActiveBackend {
                    name: name.to_string(),
                    descriptor,
                    backend,
                });
                *self.active_name.write().unwrap() = Some(name.to_string());
                Ok(())
            },
            Err(err) => {
                // Best effort: bring the previous backend back so callers
                // never observe "neither active" after a failed switch.
                let mut restored_name = None;
                if let Some(prev) = previous {
                    let restored = {
                        let backends = self.backends.read().unwrap();
                        backends
                            .get(&prev.name)
                            .map(|r| Arc::clone(&r.factory))
                    }
                    .and_then(|f| f.create(self.options.device, self.options.precision).ok());
                    if let Some(backend) = restored {
                        log::warn!(
                            "activation of '{name}' failed, restored '{}'",
                            prev.name
                        );
                        restored_name = Some(prev.name.clone());
                        *active = Some(ActiveBackend {
                            name: prev.name,
                            descriptor: prev.descriptor,
                            backend,
                        });
                    }
                }
                *self.active_name.write().unwrap() = restored_name;
                Err(err)
            },
        }
    }

    /// Run one orchestrated inpainting dispatch, waiting as long as needed
    /// for the engine to become free
    pub async fn dispatch(
        &self,
        request: &InpaintRequest,
        config: &InpaintConfig,
    ) -> Result<InpaintResult> {
        let started = Instant::now();
        self.prevalidate(request, config)?;
        let guard = self.active.lock().await;
        self.run_locked(guard, request, config, started)
    }

    /// Like [`dispatch`](Self::dispatch), but give up with
    /// [`InpaintError::Busy`] if the engine stays occupied past `limit`
    pub async fn dispatch_timeout(
        &self,
        request: &InpaintRequest,
        config: &InpaintConfig,
        limit: Duration,
    ) -> Result<InpaintResult> {
        let started = Instant::now();
        self.prevalidate(request, config)?;
        let guard = tokio::time::timeout(limit, self.active.lock())
            .await
            .map_err(|_| InpaintError::Busy {
                waited_ms: limit.as_millis() as u64,
            })?;
        self.run_locked(guard, request, config, started)
    }

    // Checks that need no lock: they fail fast while another dispatch runs.
    fn prevalidate(&self, request: &InpaintRequest, config: &InpaintConfig) -> Result<()> {
        config.validate()?;
        if !request.mask_has_repaint_pixels() {
            let (width, height) = request.mask.dimensions();
            return Err(InpaintError::EmptyMask { width, height });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(backend = tracing::field::Empty, seed = tracing::field::Empty))]
    fn run_locked(
        &self,
        mut guard: tokio::sync::MutexGuard<'_, Option<ActiveBackend>>,
        request: &InpaintRequest,
        config: &InpaintConfig,
        started: Instant,
    ) -> Result<InpaintResult> {
        let active = guard.as_mut().ok_or_else(|| {
            InpaintError::invalid_config("no backend has been activated")
        })?;

        let seed = config
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..1_000_000_000u64));
        tracing::Span::current().record("backend", active.name.as_str());
        tracing::Span::current().record("seed", seed);

        let params = InferParams {
            seed,
            example: request.example.as_ref(),
        };
        let mut timed = TimedBackend {
            inner: active.backend.as_mut(),
            inference_ms: 0,
        };

        let outcome = strategy::run(&mut timed, &active.descriptor, request, config, &params);
        let inference_ms = timed.inference_ms;

        let output = match outcome {
            Ok(output) => output,
            Err(EngineError::Orchestration(err)) => return Err(err),
            Err(EngineError::Backend(BackendError::OutOfMemory(detail))) => {
                log::warn!("backend '{}' out of memory: {detail}", active.name);
                active.backend.reclaim_memory();
                return Err(InpaintError::ResourceExhausted {
                    backend: active.name.clone(),
                    detail,
                });
            },
            Err(EngineError::Backend(BackendError::Other(source))) => {
                return Err(InpaintError::BackendFailure {
                    backend: active.name.clone(),
                    source,
                });
            },
        };

        let backend_name = active.name.clone();
        drop(guard);

        let mut rgb = output.image;
        if config.color_order == crate::config::ColorOrder::Bgr {
            crate::compositor::swap_red_blue(&mut rgb);
        }
        let image = match &request.alpha {
            Some(alpha) => {
                image::DynamicImage::ImageRgba8(crate::compositor::reattach_alpha(&rgb, alpha))
            },
            None => image::DynamicImage::ImageRgb8(rgb),
        };

        let total_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "dispatch done: backend '{backend_name}', strategy {:?}, {total_ms} ms ({inference_ms} ms inference)",
            output.strategy
        );
        Ok(InpaintResult {
            image,
            seed,
            strategy: output.strategy,
            region: output.region,
            backend: backend_name,
            timings: DispatchTimings {
                inference_ms,
                orchestration_ms: total_ms.saturating_sub(inference_ms),
                total_ms,
            },
        })
    }
}

/// Wraps the active backend to accumulate pure inference time
struct TimedBackend<'a> {
    inner: &'a mut dyn InpaintBackend,
    inference_ms: u64,
}

impl InpaintBackend for TimedBackend<'_> {
    fn infer(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        params: &InferParams<'_>,
    ) -> std::result::Result<RgbImage, BackendError> {
        let started = Instant::now();
        let result = self.inner.infer(image, mask, params);
        self.inference_ms += started.elapsed().as_millis() as u64;
        result
    }

    fn reclaim_memory(&mut self) {
        self.inner.reclaim_memory();
    }
}
