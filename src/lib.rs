//! Offload small numerical kernels to the GPU with
//! [wgpu](https://github.com/gfx-rs/wgpu) and read the results back on the
//! host.
//!
//! A run goes through a fixed sequence of stages, each in its own module:
//!
//! 1. [`program`] validates the WGSL of a [`KernelDescriptor`] and builds
//!    the device program.
//! 2. [`resource`] allocates a buffer per binding (plus a sample surface
//!    for raster kernels) and uploads host data.
//! 3. [`dispatch`] runs the kernel, either as a compute dispatch or by
//!    rasterizing one sample per texel, and blocks until the device is done.
//! 4. [`readback`] copies results to host memory and reduces samples.
//!
//! [`Pipeline`] strings the stages together and tears everything down at
//! the end of each run.  The device itself sits behind the [`Backend`]
//! trait; [`WgpuBackend`] drives a real adapter through a [`GpuContext`].
//! The API is synchronous and blocking.
//!
//! ```no_run
//! use gpu_kernel_pipeline::{kernels, GpuContext, Pipeline, WgpuBackend};
//!
//! let context = GpuContext::new_blocking()?;
//! let mut pipeline = Pipeline::new(WgpuBackend::new(&context));
//! let sum = kernels::add_scalars(&mut pipeline, 55.0, 45.9)?;
//! assert!((sum - 100.9).abs() <= 1e-4);
//! # Ok::<(), gpu_kernel_pipeline::PipelineError>(())
//! ```

pub mod backend;
pub mod buffer;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod kernels;
pub mod pipeline;
pub mod program;
pub mod readback;
pub mod resource;

// Re-export the most common types at the crate root so that users can
// simply `use gpu_kernel_pipeline::*;`.
pub use backend::{Backend, BoundBuffer};
pub use context::{ContextConfig, GpuContext};
pub use descriptor::{
    Access, BindingShape, DomainBounds, ExecutionMode, KernelDescriptor, KernelSources,
    ResourceBinding, SampleGrid, StageSource, WorkgroupShape,
};
pub use device::WgpuBackend;
pub use dispatch::{domain_point, DispatchHandle, Dispatcher, SampleParams, SAMPLE_PARAMS_BINDING};
pub use error::{PipelineError, Result};
pub use kernels::{Integral, Integrand};
pub use pipeline::{ExecutionResult, Pipeline};
pub use program::{Program, ProgramBuilder};
pub use readback::{readback, HostBuffer, ReadTarget, ReductionPolicy};
pub use resource::{InitialData, ResourceManager, ResourceSet};
