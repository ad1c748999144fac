//! Kernel dispatch and the host/device synchronization barrier.
//!
//! [`Dispatcher::execute`] is the only way to obtain a [`DispatchHandle`],
//! and it only returns one after the backend reported that every device
//! write is visible to the host.  Readback requires the handle, so results
//! cannot be read before the barrier has completed.

use bytemuck::{Pod, Zeroable};
use log::debug;

use crate::backend::Backend;
use crate::descriptor::{BindingShape, DomainBounds, ExecutionMode, KernelDescriptor, SampleGrid};
use crate::error::{PipelineError, Result};
use crate::program::Program;
use crate::resource::ResourceSet;

/// Binding slot of the [`SampleParams`] uniform in raster-sample kernels.
pub const SAMPLE_PARAMS_BINDING: u32 = 0;

/// Parameters supplied to every raster-sample kernel, laid out as the WGSL
/// struct
///
/// ```wgsl
/// struct SampleParams { lower_bound: f32, upper_bound: f32, width: f32, height: f32 }
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Zeroable, Pod)]
pub struct SampleParams {
    pub lower_bound: f32,
    pub upper_bound: f32,
    pub width: f32,
    pub height: f32,
}

impl SampleParams {
    pub const SIZE: u64 = std::mem::size_of::<SampleParams>() as u64;

    pub fn new(grid: SampleGrid, domain: DomainBounds) -> Self {
        Self {
            lower_bound: domain.lower,
            upper_bound: domain.upper,
            width: grid.width as f32,
            height: grid.height as f32,
        }
    }
}

/// Normalized position of sample `index` in a grid `width` samples wide:
/// `(index + 0.5) / width`, the centre of the sample's interval.
pub fn sample_position(index: u32, width: u32) -> f32 {
    (index as f32 + 0.5) / width as f32
}

/// Domain point evaluated by sample `index`:
/// `lower + (upper - lower) * (index + 0.5) / width`.
///
/// Kernels must use this exact expression, in this order, in `f32`.
pub fn domain_point(index: u32, width: u32, domain: DomainBounds) -> f32 {
    domain.lower + (domain.upper - domain.lower) * sample_position(index, width)
}

/// Proof that a dispatch finished and its results are host-visible.
#[derive(Debug)]
pub struct DispatchHandle {
    label: String,
    mode: ExecutionMode,
}

impl DispatchHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
}

/// Issues kernels on a backend.
pub struct Dispatcher;

impl Dispatcher {
    /// Runs `program` with the resources of `resources` as described by
    /// `descriptor`, then blocks until its writes are visible to the host.
    ///
    /// Every binding of the descriptor must be provisioned in `resources`;
    /// a mismatch is reported before any work reaches the device.
    pub fn execute<B: Backend>(
        backend: &mut B,
        program: &Program<B>,
        resources: &ResourceSet<B>,
        descriptor: &KernelDescriptor,
    ) -> Result<DispatchHandle> {
        let label = descriptor.label.as_str();
        if program.label() != label {
            return Err(PipelineError::binding(
                label,
                format!("program was built for `{}`", program.label()),
            ));
        }
        let buffers = resources.bound_buffers(descriptor)?;

        match descriptor.mode {
            ExecutionMode::ComputeDispatch { workgroups } => {
                debug!(
                    "`{label}`: dispatching {}x{}x{} workgroup(s)",
                    workgroups.x, workgroups.y, workgroups.z
                );
                backend.dispatch_compute(&program.handle, &buffers, workgroups)?;
            }
            ExecutionMode::RasterSample { grid, domain } => {
                let params_binding = resources.binding(SAMPLE_PARAMS_BINDING);
                let params_ok = matches!(
                    params_binding.map(|b| b.shape),
                    Some(BindingShape::Uniform { size }) if size == SampleParams::SIZE
                );
                if !params_ok {
                    return Err(PipelineError::binding(
                        label,
                        format!(
                            "raster kernels need a {}-byte uniform at binding {}",
                            SampleParams::SIZE,
                            SAMPLE_PARAMS_BINDING
                        ),
                    ));
                }
                let surface = match resources.surface() {
                    Some((surface_grid, surface)) if surface_grid == grid => surface,
                    Some((surface_grid, _)) => {
                        return Err(PipelineError::binding(
                            label,
                            format!(
                                "sample surface is {}x{} but the grid is {}x{}",
                                surface_grid.width, surface_grid.height, grid.width, grid.height
                            ),
                        ))
                    }
                    None => {
                        return Err(PipelineError::binding(
                            label,
                            "no sample surface was provisioned",
                        ))
                    }
                };
                let params_buffer = resources.buffer(SAMPLE_PARAMS_BINDING).ok_or_else(|| {
                    PipelineError::binding(label, "sample parameters were never provisioned")
                })?;

                let params = SampleParams::new(grid, domain);
                backend.write_buffer(params_buffer, bytemuck::bytes_of(&params))?;
                debug!(
                    "`{label}`: sampling [{}, {}] over a {}x{} grid",
                    domain.lower, domain.upper, grid.width, grid.height
                );
                backend.draw_samples(&program.handle, &buffers, surface)?;
            }
        }

        backend.synchronize()?;
        debug!("`{label}`: device work complete");
        Ok(DispatchHandle {
            label: label.to_owned(),
            mode: descriptor.mode,
        })
    }
}
