//! The shipped kernels: scalar addition (compute dispatch) and midpoint
//! integration of a WGSL function (raster sampling).
//!
//! Binding indices are defined once here and interpolated into the WGSL
//! text, so the host-side descriptor and the kernel source cannot drift.

use crate::backend::Backend;
use crate::descriptor::{
    Access, DomainBounds, ExecutionMode, KernelDescriptor, KernelSources, ResourceBinding,
    SampleGrid, StageSource, WorkgroupShape,
};
use crate::dispatch::{domain_point, SampleParams, SAMPLE_PARAMS_BINDING};
use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::readback::{ReadTarget, ReductionPolicy};
use crate::resource::InitialData;

/// Left operand of the addition kernel.
pub const ADD_LHS_BINDING: u32 = 0;
/// Right operand of the addition kernel.
pub const ADD_RHS_BINDING: u32 = 1;
/// Sum written by the addition kernel.
pub const ADD_RESULT_BINDING: u32 = 2;

const F32_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// Vertex stage shared by every raster-sample kernel: one triangle whose
/// corners lie outside clip space, so the viewport is covered by a single
/// primitive with no interior edges.
pub const FULL_GRID_VERTEX_WGSL: &str = r#"
@vertex
fn full_grid(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    var corners = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    return vec4<f32>(corners[index], 0.0, 1.0);
}
"#;

pub const FULL_GRID_VERTEX_ENTRY: &str = "full_grid";
pub const SAMPLE_FRAGMENT_ENTRY: &str = "evaluate_sample";
pub const ADD_ENTRY: &str = "add";

/// WGSL source of the addition kernel.
pub fn addition_wgsl() -> String {
    format!(
        r#"
@group(0) @binding({ADD_LHS_BINDING})
var<storage, read> lhs: f32;
@group(0) @binding({ADD_RHS_BINDING})
var<storage, read> rhs: f32;
@group(0) @binding({ADD_RESULT_BINDING})
var<storage, read_write> total: f32;

@compute @workgroup_size(1)
fn {ADD_ENTRY}() {{
    total = lhs + rhs;
}}
"#
    )
}

/// Descriptor of the single-invocation addition kernel.
pub fn addition_descriptor() -> KernelDescriptor {
    KernelDescriptor {
        label: "add_scalars".into(),
        sources: KernelSources::Compute(StageSource::new(addition_wgsl(), ADD_ENTRY)),
        mode: ExecutionMode::ComputeDispatch {
            workgroups: WorkgroupShape::SINGLE,
        },
        bindings: vec![
            ResourceBinding::storage(ADD_LHS_BINDING, F32_SIZE, Access::HostWriteDeviceRead),
            ResourceBinding::storage(ADD_RHS_BINDING, F32_SIZE, Access::HostWriteDeviceRead),
            ResourceBinding::storage(ADD_RESULT_BINDING, F32_SIZE, Access::DeviceWriteHostRead),
        ],
    }
}

/// Adds `a` and `b` on the device.
pub fn add_scalars<B: Backend>(pipeline: &mut Pipeline<B>, a: f32, b: f32) -> Result<f32> {
    let descriptor = addition_descriptor();
    let initial = InitialData::new()
        .with_values(ADD_LHS_BINDING, &[a])
        .with_values(ADD_RHS_BINDING, &[b]);
    let result = pipeline.run(&descriptor, &initial, &[ReadTarget::Binding(ADD_RESULT_BINDING)])?;
    result
        .buffer(ADD_RESULT_BINDING)
        .ok_or_else(|| PipelineError::Readback("sum was not read back".into()))?
        .scalar::<f32>()
}

/// A function to integrate.
///
/// `wgsl` must define `fn integrand(x: f32) -> f32`; it may declare helper
/// functions and constants but no resource bindings.
#[derive(Clone, Debug, PartialEq)]
pub struct Integrand {
    pub name: String,
    pub wgsl: String,
    /// Analytic value of the integral when known, for reporting.
    pub expected: Option<f64>,
}

impl Integrand {
    pub fn new(name: impl Into<String>, wgsl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wgsl: wgsl.into(),
            expected: None,
        }
    }

    pub fn with_expected(mut self, expected: f64) -> Self {
        self.expected = Some(expected);
        self
    }

    /// `cos(x)`; its integral over `[0, pi]` is zero.
    pub fn cosine() -> Self {
        Self::new("cos(x)", "fn integrand(x: f32) -> f32 {\n    return cos(x);\n}\n")
            .with_expected(0.0)
    }
}

/// Fragment stage evaluating `integrand` at the centre of each sample.
pub fn sampling_fragment_wgsl(integrand: &Integrand) -> String {
    format!(
        r#"
struct SampleParams {{
    lower_bound: f32,
    upper_bound: f32,
    width: f32,
    height: f32,
}}

@group(0) @binding({SAMPLE_PARAMS_BINDING})
var<uniform> params: SampleParams;

{body}

@fragment
fn {SAMPLE_FRAGMENT_ENTRY}(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {{
    let i = floor(position.x);
    let u = (i + 0.5) / params.width;
    let x = params.lower_bound + (params.upper_bound - params.lower_bound) * u;
    return vec4<f32>(integrand(x), 0.0, 0.0, 1.0);
}}
"#,
        body = integrand.wgsl
    )
}

/// Descriptor sampling `integrand` at `width` points of `domain`.
pub fn integration_descriptor(
    integrand: &Integrand,
    domain: DomainBounds,
    width: u32,
) -> KernelDescriptor {
    KernelDescriptor {
        label: format!("integrate {}", integrand.name),
        sources: KernelSources::Raster {
            vertex: StageSource::new(FULL_GRID_VERTEX_WGSL, FULL_GRID_VERTEX_ENTRY),
            fragment: StageSource::new(sampling_fragment_wgsl(integrand), SAMPLE_FRAGMENT_ENTRY),
        },
        mode: ExecutionMode::RasterSample {
            grid: SampleGrid::row(width),
            domain,
        },
        bindings: vec![ResourceBinding::uniform(SAMPLE_PARAMS_BINDING, SampleParams::SIZE)],
    }
}

/// Outcome of one integration run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integral {
    pub value: f64,
    pub step: f64,
    pub sample_count: u32,
}

/// Integrates `integrand` over `domain` with `width` midpoint samples
/// evaluated on the device.
pub fn integrate<B: Backend>(
    pipeline: &mut Pipeline<B>,
    integrand: &Integrand,
    domain: DomainBounds,
    width: u32,
) -> Result<Integral> {
    let descriptor = integration_descriptor(integrand, domain, width);
    let result = pipeline.run(&descriptor, &InitialData::new(), &[ReadTarget::Samples])?;
    let samples = result
        .samples()
        .ok_or_else(|| PipelineError::Readback("samples were not read back".into()))?
        .to_vec::<f32>();

    let policy = ReductionPolicy::new(domain, width);
    Ok(Integral {
        value: policy.reduce(&samples)?,
        step: policy.step(),
        sample_count: width,
    })
}

/// The same midpoint sum evaluated on the host, sample for sample.
pub fn reference_integral(f: impl Fn(f32) -> f32, domain: DomainBounds, width: u32) -> f64 {
    let step = ReductionPolicy::new(domain, width).step();
    (0..width)
        .map(|i| f64::from(f(domain_point(i, width, domain))) * step)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::inspect_sources;

    #[test]
    fn addition_kernel_declares_its_bindings() {
        let interface = inspect_sources(&addition_descriptor()).unwrap();
        let indices: Vec<u32> = interface.keys().copied().collect();
        assert_eq!(indices, vec![ADD_LHS_BINDING, ADD_RHS_BINDING, ADD_RESULT_BINDING]);
        assert!(interface[&ADD_RESULT_BINDING].writable);
    }

    #[test]
    fn integration_kernel_declares_only_params() {
        let domain = DomainBounds::new(0.0, 1.0);
        let descriptor = integration_descriptor(&Integrand::cosine(), domain, 64);
        let interface = inspect_sources(&descriptor).unwrap();
        assert_eq!(interface.len(), 1);
        assert!(interface[&SAMPLE_PARAMS_BINDING].uniform);
    }

    #[test]
    fn host_reference_of_cosine_is_near_zero() {
        let domain = DomainBounds::new(0.0, std::f32::consts::PI);
        let value = reference_integral(f32::cos, domain, 16384);
        assert!(value.abs() <= 1e-3, "{value}");
    }
}
