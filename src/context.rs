//! GPU context acquisition.
//!
//! This module provides a thin wrapper around wgpu's instance, adapter,
//! device and queue objects.  A [`GpuContext`] is the one device session a
//! pipeline runs on; it is passed explicitly to the backend instead of
//! living in global state, and it is released when dropped.  The blocking
//! constructors hide the asynchronous adapter and device requests behind
//! [`pollster`].

use log::debug;
use wgpu::{Adapter, Device, Instance, Queue};

use crate::error::{PipelineError, Result};

/// What to ask the platform for when acquiring a context.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Backends the instance may use.
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Use a software adapter even when hardware is available.
    pub force_fallback_adapter: bool,
    /// Capabilities the adapter must report.  Compute shaders are required
    /// by default.
    pub required_downlevel: wgpu::DownlevelFlags,
    pub label: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_downlevel: wgpu::DownlevelFlags::COMPUTE_SHADERS,
            label: "gpu_kernel_pipeline_device".into(),
        }
    }
}

impl ContextConfig {
    /// Defaults overridden by the `WGPU_BACKEND` and `WGPU_POWER_PREF`
    /// environment variables when they are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(backends) = wgpu::Backends::from_env() {
            config.backends = backends;
        }
        if let Some(power_preference) = wgpu::PowerPreference::from_env() {
            config.power_preference = power_preference;
        }
        config
    }
}

/// A GPU context encapsulates all state needed to submit work.
///
/// The context holds on to the `Instance`, `Adapter`, `Device` and
/// `Queue`.  Those types have internal reference counting so they can
/// cheaply be cloned if you need multiple references.
pub struct GpuContext {
    /// The global GPU instance.  Still required to request an adapter in
    /// headless use.
    pub instance: Instance,
    /// The physical device selected for computation.
    pub adapter: Adapter,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    /// Command submission queue used to send recorded command buffers
    /// to the GPU.
    pub queue: Queue,
}

impl GpuContext {
    /// Acquires a context synchronously.
    ///
    /// Blocks the current thread while the adapter and device requests
    /// complete.  Use [`Self::acquire_async`] inside an async runtime.
    pub fn acquire(config: &ContextConfig) -> Result<Self> {
        pollster::block_on(Self::acquire_async(config))
    }

    /// Acquires a context with [`ContextConfig::from_env`].
    pub fn new_blocking() -> Result<Self> {
        Self::acquire(&ContextConfig::from_env())
    }

    pub async fn new_async() -> Result<Self> {
        Self::acquire_async(&ContextConfig::from_env()).await
    }

    pub async fn acquire_async(config: &ContextConfig) -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                force_fallback_adapter: config.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .map_err(|e| {
                PipelineError::ContextAcquisition(format!("no suitable GPU adapter: {e}"))
            })?;

        let info = adapter.get_info();
        debug!("selected adapter {} ({:?})", info.name, info.backend);

        // Downlevel adapters may lack compute or other capabilities on some
        // backends; refuse them up front.
        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities.flags.contains(config.required_downlevel) {
            return Err(PipelineError::ContextAcquisition(format!(
                "adapter {} lacks {:?}",
                info.name,
                config.required_downlevel.difference(capabilities.flags)
            )));
        }

        // Downlevel limits, raised to the adapter's texture resolution so
        // wide sample grids fit in a single render target.
        let required_limits =
            wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits());
        // Adapter-specific format features widen the set of render target
        // formats beyond the WebGPU guarantees where the adapter offers them.
        let required_features =
            adapter.features() & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(&config.label),
                required_features,
                required_limits,
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| {
                PipelineError::ContextAcquisition(format!("failed to create GPU device: {e}"))
            })?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Whether the device can use `format` as a render target.
    ///
    /// The adapter must report `RENDER_ATTACHMENT` for the format.  Unless
    /// the device was created with adapter-specific format features, the
    /// format must also be renderable under the WebGPU guarantees, since
    /// those are what the device validates against.
    pub fn renders_to(&self, format: wgpu::TextureFormat) -> bool {
        let attachment = wgpu::TextureUsages::RENDER_ATTACHMENT;
        let adapter = self.adapter.get_texture_format_features(format).allowed_usages;
        let features = self.device.features();
        let guaranteed = format.guaranteed_format_features(features).allowed_usages;
        adapter.contains(attachment)
            && (features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
                || guaranteed.contains(attachment))
    }
}
