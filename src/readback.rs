//! Host readback and sample reduction.
//!
//! Readback copies one device-written resource into a [`HostBuffer`].  It
//! requires the [`DispatchHandle`] of the finished dispatch and fails rather
//! than returning a short or stale copy.  [`ReductionPolicy`] turns the
//! samples of a raster kernel into a definite-integral estimate.

use bytemuck::Pod;
use log::debug;

use crate::backend::Backend;
use crate::descriptor::{Access, DomainBounds, ExecutionMode};
use crate::dispatch::DispatchHandle;
use crate::error::{PipelineError, Result};
use crate::resource::ResourceSet;

/// Which resource of a set to copy back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadTarget {
    /// A `DeviceWriteHostRead` buffer at this binding index.
    Binding(u32),
    /// The sample surface of a raster kernel.
    Samples,
}

/// Host-resident copy of a device resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostBuffer {
    bytes: Vec<u8>,
}

impl HostBuffer {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// The contents reinterpreted as `T` values.
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        bytemuck::allocation::pod_collect_to_vec::<u8, T>(&self.bytes)
    }

    /// The single value held by a scalar buffer.
    pub fn scalar<T: Pod>(&self) -> Result<T> {
        if self.bytes.len() != std::mem::size_of::<T>() {
            return Err(PipelineError::Readback(format!(
                "expected a {}-byte scalar, buffer holds {} bytes",
                std::mem::size_of::<T>(),
                self.bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&self.bytes))
    }
}

/// Copies `target` of `resources` into host memory.
///
/// The returned buffer holds exactly the bytes of the resource: the full
/// binding size, or four bytes per sample of the grid.
pub fn readback<B: Backend>(
    backend: &mut B,
    resources: &ResourceSet<B>,
    handle: &DispatchHandle,
    target: ReadTarget,
) -> Result<HostBuffer> {
    let label = resources.label();
    if handle.label() != label {
        return Err(PipelineError::Readback(format!(
            "dispatch `{}` does not belong to resource set `{label}`",
            handle.label()
        )));
    }

    let (bytes, expected) = match target {
        ReadTarget::Binding(index) => {
            let binding = resources.binding(index).ok_or_else(|| {
                PipelineError::binding(label, format!("cannot read unprovisioned binding {index}"))
            })?;
            if binding.access != Access::DeviceWriteHostRead {
                return Err(PipelineError::binding(
                    label,
                    format!("binding {index} is {:?}, not host-readable", binding.access),
                ));
            }
            let size = binding.shape.size();
            let buffer = resources.buffer(index).ok_or_else(|| {
                PipelineError::binding(label, format!("binding {index} has no buffer"))
            })?;
            (backend.read_buffer(buffer, size)?, size as usize)
        }
        ReadTarget::Samples => {
            let (grid, surface) = resources
                .surface()
                .ok_or_else(|| PipelineError::binding(label, "no sample surface to read"))?;
            if let ExecutionMode::RasterSample { grid: dispatched, .. } = handle.mode() {
                if dispatched != grid {
                    return Err(PipelineError::binding(
                        label,
                        "sample surface does not match the dispatched grid",
                    ));
                }
            }
            (backend.read_surface(surface)?, grid.sample_count() * std::mem::size_of::<f32>())
        }
    };

    if bytes.len() != expected {
        return Err(PipelineError::Readback(format!(
            "`{label}`: read {} bytes from {target:?}, expected {expected}",
            bytes.len()
        )));
    }
    debug!("`{label}`: read back {expected} bytes from {target:?}");
    Ok(HostBuffer::from_bytes(bytes))
}

/// Weighted-sum reduction of ordered samples into an integral estimate.
///
/// With samples taken at the interval centres (see
/// [`domain_point`](crate::dispatch::domain_point)) this is the midpoint
/// rule: `sum(sample[i] * (upper - lower) / count)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReductionPolicy {
    pub domain: DomainBounds,
    pub sample_count: u32,
}

impl ReductionPolicy {
    pub fn new(domain: DomainBounds, sample_count: u32) -> Self {
        Self { domain, sample_count }
    }

    /// Width of one quadrature interval.
    pub fn step(&self) -> f64 {
        f64::from(self.domain.span()) / f64::from(self.sample_count)
    }

    /// Sums `samples` weighted by the step.  The sample count must match
    /// the policy's.
    pub fn reduce(&self, samples: &[f32]) -> Result<f64> {
        if samples.len() != self.sample_count as usize {
            return Err(PipelineError::Readback(format!(
                "expected {} samples, got {}",
                self.sample_count,
                samples.len()
            )));
        }
        let step = self.step();
        Ok(samples.iter().map(|&s| f64::from(s) * step).sum())
    }
}
