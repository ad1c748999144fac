//! Kernel descriptors.
//!
//! A [`KernelDescriptor`] is everything the pipeline needs to know about one
//! kernel before it touches the device: the WGSL source text for each stage,
//! the execution mode with its dispatch shape, and the list of resource
//! bindings the kernel reads and writes.  The binding list is the single
//! contract shared by the program builder (which checks that the WGSL
//! declares exactly these bindings) and the resource manager (which
//! allocates them).

use crate::error::{PipelineError, Result};

/// How a binding is used across the host/device boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Filled by the host before dispatch, only read by the kernel.
    HostWriteDeviceRead,
    /// Written by the kernel and copied back to the host afterwards.
    DeviceWriteHostRead,
    /// Scratch storage the kernel both reads and writes.
    DeviceReadWrite,
}

impl Access {
    /// Whether the kernel must declare the binding writable.
    pub fn device_writes(self) -> bool {
        !matches!(self, Access::HostWriteDeviceRead)
    }
}

/// Memory shape of a bound resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingShape {
    /// `var<storage, ...>` buffer of `size` bytes.
    Storage { size: u64 },
    /// `var<uniform>` buffer of `size` bytes.
    Uniform { size: u64 },
}

impl BindingShape {
    pub fn size(self) -> u64 {
        match self {
            BindingShape::Storage { size } | BindingShape::Uniform { size } => size,
        }
    }
}

/// One resource slot of a kernel, visible at `@group(0) @binding(index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceBinding {
    pub index: u32,
    pub shape: BindingShape,
    pub access: Access,
}

impl ResourceBinding {
    pub fn storage(index: u32, size: u64, access: Access) -> Self {
        Self {
            index,
            shape: BindingShape::Storage { size },
            access,
        }
    }

    /// Uniform buffers are always host-written.
    pub fn uniform(index: u32, size: u64) -> Self {
        Self {
            index,
            shape: BindingShape::Uniform { size },
            access: Access::HostWriteDeviceRead,
        }
    }
}

/// Number of workgroups launched along each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkgroupShape {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupShape {
    /// A single workgroup, the shape of a one-invocation kernel when the
    /// shader declares `@workgroup_size(1)`.
    pub const SINGLE: WorkgroupShape = WorkgroupShape { x: 1, y: 1, z: 1 };

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Size of the render target of a raster-sample kernel.  Every texel is one
/// independent domain sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleGrid {
    pub width: u32,
    pub height: u32,
}

impl SampleGrid {
    /// A one-row grid of `width` samples.
    pub fn row(width: u32) -> Self {
        Self { width, height: 1 }
    }

    pub fn sample_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Closed interval `[lower, upper]` sampled by a raster kernel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DomainBounds {
    pub lower: f32,
    pub upper: f32,
}

impl DomainBounds {
    pub fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    pub fn span(self) -> f32 {
        self.upper - self.lower
    }
}

/// Execution model of a kernel together with its dispatch shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExecutionMode {
    /// Run a compute entry point over `workgroups`.
    ComputeDispatch { workgroups: WorkgroupShape },
    /// Rasterize a full-grid primitive into a `grid` sized target, each
    /// fragment evaluating the kernel at one point of `domain`.
    RasterSample {
        grid: SampleGrid,
        domain: DomainBounds,
    },
}

/// WGSL module text plus the entry point used from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageSource {
    pub wgsl: String,
    pub entry_point: String,
}

impl StageSource {
    pub fn new(wgsl: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            wgsl: wgsl.into(),
            entry_point: entry_point.into(),
        }
    }
}

/// Source text for the stages of a kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelSources {
    Compute(StageSource),
    Raster {
        vertex: StageSource,
        fragment: StageSource,
    },
}

impl KernelSources {
    /// Every stage source paired with the shader stage it must provide.
    pub fn stages(&self) -> Vec<(naga::ShaderStage, &StageSource)> {
        match self {
            KernelSources::Compute(stage) => vec![(naga::ShaderStage::Compute, stage)],
            KernelSources::Raster { vertex, fragment } => vec![
                (naga::ShaderStage::Vertex, vertex),
                (naga::ShaderStage::Fragment, fragment),
            ],
        }
    }
}

/// Complete description of one kernel run.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelDescriptor {
    pub label: String,
    pub sources: KernelSources,
    pub mode: ExecutionMode,
    pub bindings: Vec<ResourceBinding>,
}

impl KernelDescriptor {
    /// Looks up a binding by index.
    pub fn binding(&self, index: u32) -> Option<&ResourceBinding> {
        self.bindings.iter().find(|b| b.index == index)
    }

    /// Checks the structural invariants of the descriptor that do not
    /// depend on the shader text.
    pub fn validate(&self) -> Result<()> {
        let label = self.label.as_str();
        let mut seen = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            if seen.contains(&binding.index) {
                return Err(PipelineError::binding(
                    label,
                    format!("binding {} is declared more than once", binding.index),
                ));
            }
            seen.push(binding.index);
            if binding.shape.size() == 0 {
                return Err(PipelineError::invalid(
                    label,
                    format!("binding {} has zero size", binding.index),
                ));
            }
            let uniform = matches!(binding.shape, BindingShape::Uniform { .. });
            if uniform && binding.access.device_writes() {
                return Err(PipelineError::invalid(
                    label,
                    format!("uniform binding {} cannot be device-writable", binding.index),
                ));
            }
        }

        match (&self.mode, &self.sources) {
            (ExecutionMode::ComputeDispatch { workgroups }, KernelSources::Compute(_)) => {
                if workgroups.x == 0 || workgroups.y == 0 || workgroups.z == 0 {
                    return Err(PipelineError::invalid(
                        label,
                        format!("workgroup shape {workgroups:?} has an empty axis"),
                    ));
                }
            }
            (ExecutionMode::RasterSample { grid, domain }, KernelSources::Raster { .. }) => {
                if grid.width == 0 || grid.height == 0 {
                    return Err(PipelineError::invalid(
                        label,
                        format!("sample grid {}x{} is empty", grid.width, grid.height),
                    ));
                }
                if !domain.lower.is_finite() || !domain.upper.is_finite() {
                    return Err(PipelineError::invalid(
                        label,
                        format!(
                            "domain bounds [{}, {}] are not finite",
                            domain.lower, domain.upper
                        ),
                    ));
                }
            }
            (ExecutionMode::ComputeDispatch { .. }, _) => {
                return Err(PipelineError::invalid(
                    label,
                    "compute dispatch needs a single compute stage",
                ));
            }
            (ExecutionMode::RasterSample { .. }, _) => {
                return Err(PipelineError::invalid(
                    label,
                    "raster sampling needs a vertex and a fragment stage",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compute(bindings: Vec<ResourceBinding>, workgroups: WorkgroupShape) -> KernelDescriptor {
        KernelDescriptor {
            label: "test".into(),
            sources: KernelSources::Compute(StageSource::new("", "main")),
            mode: ExecutionMode::ComputeDispatch { workgroups },
            bindings,
        }
    }

    #[test]
    fn duplicate_binding_index_is_a_mismatch() {
        let d = compute(
            vec![
                ResourceBinding::storage(0, 4, Access::HostWriteDeviceRead),
                ResourceBinding::storage(0, 4, Access::DeviceWriteHostRead),
            ],
            WorkgroupShape::SINGLE,
        );
        assert!(matches!(d.validate(), Err(PipelineError::BindingMismatch { .. })));
    }

    #[test]
    fn empty_workgroup_axis_is_rejected() {
        let d = compute(
            vec![ResourceBinding::storage(0, 4, Access::DeviceWriteHostRead)],
            WorkgroupShape::new(1, 0, 1),
        );
        assert!(matches!(d.validate(), Err(PipelineError::InvalidDescriptor { .. })));
    }

    #[test]
    fn mode_and_sources_must_agree() {
        let d = KernelDescriptor {
            label: "mixed".into(),
            sources: KernelSources::Compute(StageSource::new("", "main")),
            mode: ExecutionMode::RasterSample {
                grid: SampleGrid::row(8),
                domain: DomainBounds::new(0.0, 1.0),
            },
            bindings: vec![],
        };
        assert!(matches!(d.validate(), Err(PipelineError::InvalidDescriptor { .. })));
    }

    #[test]
    fn writable_uniform_is_rejected() {
        let mut binding = ResourceBinding::uniform(0, 16);
        binding.access = Access::DeviceReadWrite;
        let d = compute(vec![binding], WorkgroupShape::SINGLE);
        assert!(d.validate().is_err());
    }

    #[test]
    fn single_invocation_compute_is_valid() {
        let d = compute(
            vec![ResourceBinding::storage(2, 4, Access::DeviceWriteHostRead)],
            WorkgroupShape::SINGLE,
        );
        assert!(d.validate().is_ok());
    }
}
