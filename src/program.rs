//! Program building.
//!
//! Building a kernel happens in two steps.  First every stage is run through
//! the `naga` WGSL front end: the source must parse, validate, expose the
//! requested entry point for the right stage, and declare exactly the
//! `@group(0)` bindings listed in the descriptor.  Only then is the backend
//! asked to compile and link the device program.  A kernel that fails the
//! first step never reaches the device.

use std::collections::BTreeMap;

use log::debug;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::backend::Backend;
use crate::descriptor::{BindingShape, KernelDescriptor, ResourceBinding};
use crate::error::{PipelineError, Result};

/// A binding as declared by the kernel source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredBinding {
    /// Name of the WGSL global, when it has one.
    pub name: Option<String>,
    pub uniform: bool,
    pub writable: bool,
}

/// Built program plus the binding interface it was checked against.
pub struct Program<B: Backend> {
    pub(crate) handle: B::Program,
    label: String,
    interface: BTreeMap<u32, DeclaredBinding>,
}

impl<B: Backend> Program<B> {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bindings declared by the kernel, keyed by binding index.
    pub fn interface(&self) -> &BTreeMap<u32, DeclaredBinding> {
        &self.interface
    }
}

/// Builds and releases [`Program`]s on a backend.
pub struct ProgramBuilder;

impl ProgramBuilder {
    /// Validates `descriptor` and its sources, then builds the device
    /// program.
    pub fn build<B: Backend>(backend: &mut B, descriptor: &KernelDescriptor) -> Result<Program<B>> {
        descriptor.validate()?;
        let interface = inspect_sources(descriptor)?;
        check_interface(descriptor, &interface)?;

        let handle = backend.build_program(descriptor)?;
        debug!(
            "built kernel `{}` on {} with {} binding(s)",
            descriptor.label,
            backend.name(),
            interface.len()
        );
        Ok(Program {
            handle,
            label: descriptor.label.clone(),
            interface,
        })
    }

    pub fn release<B: Backend>(backend: &mut B, program: Program<B>) {
        debug!("releasing kernel `{}`", program.label);
        backend.release_program(program.handle);
    }
}

/// Parses and validates every stage and collects the union of their
/// declared bindings.
pub fn inspect_sources(descriptor: &KernelDescriptor) -> Result<BTreeMap<u32, DeclaredBinding>> {
    let label = descriptor.label.as_str();
    let mut interface: BTreeMap<u32, DeclaredBinding> = BTreeMap::new();

    for (stage, source) in descriptor.sources.stages() {
        let module = naga::front::wgsl::parse_str(&source.wgsl)
            .map_err(|e| PipelineError::build(label, e.emit_to_string(&source.wgsl)))?;
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| PipelineError::build(label, e.emit_to_string(&source.wgsl)))?;

        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == source.entry_point)
            .ok_or_else(|| {
                let missing = format!("entry point `{}` not found", source.entry_point);
                PipelineError::build(label, missing)
            })?;
        if entry.stage != stage {
            return Err(PipelineError::build(
                label,
                format!(
                    "entry point `{}` is a {:?} stage, expected {:?}",
                    source.entry_point, entry.stage, stage
                ),
            ));
        }
        if stage == naga::ShaderStage::Compute {
            debug!("`{}` workgroup size {:?}", source.entry_point, entry.workgroup_size);
        }

        for (_, global) in module.global_variables.iter() {
            let Some(slot) = &global.binding else { continue };
            if slot.group != 0 {
                return Err(PipelineError::binding(
                    label,
                    format!(
                        "`{}` is bound in group {}, only group 0 is provisioned",
                        global.name.as_deref().unwrap_or("<unnamed>"),
                        slot.group
                    ),
                ));
            }
            let declared = match global.space {
                naga::AddressSpace::Uniform => DeclaredBinding {
                    name: global.name.clone(),
                    uniform: true,
                    writable: false,
                },
                naga::AddressSpace::Storage { access } => DeclaredBinding {
                    name: global.name.clone(),
                    uniform: false,
                    writable: access.contains(naga::StorageAccess::STORE),
                },
                ref other => {
                    return Err(PipelineError::binding(
                        label,
                        format!(
                            "binding {} lives in unsupported address space {other:?}",
                            slot.binding
                        ),
                    ))
                }
            };
            if let Some(previous) = interface.get(&slot.binding) {
                if previous.uniform != declared.uniform || previous.writable != declared.writable {
                    return Err(PipelineError::binding(
                        label,
                        format!("stages disagree on the declaration of binding {}", slot.binding),
                    ));
                }
            }
            interface.insert(slot.binding, declared);
        }
    }
    Ok(interface)
}

/// Compares the bindings declared by the kernel with the descriptor's.
fn check_interface(
    descriptor: &KernelDescriptor,
    interface: &BTreeMap<u32, DeclaredBinding>,
) -> Result<()> {
    let label = descriptor.label.as_str();
    for binding in &descriptor.bindings {
        let declared = interface.get(&binding.index).ok_or_else(|| {
            PipelineError::binding(
                label,
                format!(
                    "binding {} is provisioned but the kernel never declares it",
                    binding.index
                ),
            )
        })?;
        check_declaration(label, binding, declared)?;
    }
    for index in interface.keys() {
        if descriptor.binding(*index).is_none() {
            return Err(PipelineError::binding(
                label,
                format!("kernel declares binding {index} which the descriptor does not provision"),
            ));
        }
    }
    Ok(())
}

fn check_declaration(
    label: &str,
    binding: &ResourceBinding,
    declared: &DeclaredBinding,
) -> Result<()> {
    let uniform = matches!(binding.shape, BindingShape::Uniform { .. });
    if uniform != declared.uniform {
        return Err(PipelineError::binding(
            label,
            format!(
                "binding {} is provisioned as {} but declared as {}",
                binding.index,
                if uniform { "uniform" } else { "storage" },
                if declared.uniform { "uniform" } else { "storage" },
            ),
        ));
    }
    if binding.access.device_writes() != declared.writable {
        return Err(PipelineError::binding(
            label,
            format!(
                "binding {} access {:?} does not match the kernel's {} declaration",
                binding.index,
                binding.access,
                if declared.writable { "read_write" } else { "read-only" },
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Access, ExecutionMode, KernelSources, StageSource, WorkgroupShape};

    const TWO_BUFFERS: &str = r#"
@group(0) @binding(0)
var<storage, read> src: f32;
@group(0) @binding(1)
var<storage, read_write> dst: f32;

@compute @workgroup_size(1)
fn main() {
    dst = src * 2.0;
}
"#;

    fn descriptor(wgsl: &str, bindings: Vec<ResourceBinding>) -> KernelDescriptor {
        KernelDescriptor {
            label: "double".into(),
            sources: KernelSources::Compute(StageSource::new(wgsl, "main")),
            mode: ExecutionMode::ComputeDispatch {
                workgroups: WorkgroupShape::SINGLE,
            },
            bindings,
        }
    }

    #[test]
    fn interface_lists_declared_bindings() {
        let d = descriptor(
            TWO_BUFFERS,
            vec![
                ResourceBinding::storage(0, 4, Access::HostWriteDeviceRead),
                ResourceBinding::storage(1, 4, Access::DeviceWriteHostRead),
            ],
        );
        let interface = inspect_sources(&d).unwrap();
        assert_eq!(interface.len(), 2);
        assert!(!interface[&0].writable);
        assert!(interface[&1].writable);
        assert_eq!(interface[&1].name.as_deref(), Some("dst"));
        check_interface(&d, &interface).unwrap();
    }

    #[test]
    fn parse_error_carries_diagnostics() {
        let d = descriptor("fn main( {", vec![]);
        match inspect_sources(&d) {
            Err(PipelineError::Build { diagnostics, .. }) => assert!(!diagnostics.is_empty()),
            other => panic!("expected a build error, got {other:?}"),
        }
    }

    #[test]
    fn missing_entry_point_is_a_build_error() {
        let mut d = descriptor(TWO_BUFFERS, vec![]);
        d.sources = KernelSources::Compute(StageSource::new(TWO_BUFFERS, "nope"));
        assert!(matches!(inspect_sources(&d), Err(PipelineError::Build { .. })));
    }

    #[test]
    fn unprovisioned_declaration_is_a_mismatch() {
        let d = descriptor(
            TWO_BUFFERS,
            vec![ResourceBinding::storage(1, 4, Access::DeviceWriteHostRead)],
        );
        let interface = inspect_sources(&d).unwrap();
        assert!(matches!(
            check_interface(&d, &interface),
            Err(PipelineError::BindingMismatch { .. })
        ));
    }

    #[test]
    fn access_disagreement_is_a_mismatch() {
        let d = descriptor(
            TWO_BUFFERS,
            vec![
                ResourceBinding::storage(0, 4, Access::DeviceReadWrite),
                ResourceBinding::storage(1, 4, Access::DeviceWriteHostRead),
            ],
        );
        let interface = inspect_sources(&d).unwrap();
        assert!(matches!(
            check_interface(&d, &interface),
            Err(PipelineError::BindingMismatch { .. })
        ));
    }
}
