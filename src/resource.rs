//! Resource provisioning.
//!
//! The [`ResourceManager`] turns the binding list of a descriptor into live
//! device resources collected in a [`ResourceSet`].  A set owns every handle
//! it holds: each binding index maps to exactly one buffer, and a
//! raster-sample kernel additionally gets one sample surface sized to its
//! grid.  Nothing in a set outlives [`ResourceSet::teardown`].

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::backend::{Backend, BoundBuffer};
use crate::descriptor::{Access, ExecutionMode, KernelDescriptor, ResourceBinding, SampleGrid};
use crate::error::{PipelineError, Result};

/// Host bytes uploaded into host-written bindings, keyed by binding index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitialData {
    data: BTreeMap<u32, Vec<u8>>,
}

impl InitialData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the contents for binding `index`, replacing earlier contents.
    pub fn with(mut self, index: u32, bytes: impl Into<Vec<u8>>) -> Self {
        self.data.insert(index, bytes.into());
        self
    }

    /// Adds a slice of plain values for binding `index`.
    pub fn with_values<T: bytemuck::Pod>(self, index: u32, values: &[T]) -> Self {
        self.with(index, bytemuck::cast_slice::<T, u8>(values).to_vec())
    }

    pub fn get(&self, index: u32) -> Option<&[u8]> {
        self.data.get(&index).map(Vec::as_slice)
    }

    fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.data.keys().copied()
    }
}

struct Slot<B: Backend> {
    binding: ResourceBinding,
    buffer: B::Buffer,
}

/// The live resources of one pipeline run.
pub struct ResourceSet<B: Backend> {
    label: String,
    slots: BTreeMap<u32, Slot<B>>,
    surface: Option<(SampleGrid, B::Surface)>,
    released: bool,
}

impl<B: Backend> ResourceSet<B> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            slots: BTreeMap::new(),
            surface: None,
            released: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Places `buffer` at its binding index.  A buffer already bound at
    /// the same index is released rather than kept alongside.
    pub fn insert(&mut self, backend: &mut B, binding: ResourceBinding, buffer: B::Buffer) {
        if let Some(old) = self.slots.insert(binding.index, Slot { binding, buffer }) {
            debug!("`{}`: rebinding index {}", self.label, binding.index);
            backend.release_buffer(old.buffer);
        }
        self.released = false;
    }

    /// Installs the sample surface, releasing any previous one.
    pub fn set_surface(&mut self, backend: &mut B, grid: SampleGrid, surface: B::Surface) {
        if let Some((_, old)) = self.surface.replace((grid, surface)) {
            backend.release_surface(old);
        }
        self.released = false;
    }

    pub fn binding(&self, index: u32) -> Option<&ResourceBinding> {
        self.slots.get(&index).map(|slot| &slot.binding)
    }

    pub fn buffer(&self, index: u32) -> Option<&B::Buffer> {
        self.slots.get(&index).map(|slot| &slot.buffer)
    }

    pub fn surface(&self) -> Option<(SampleGrid, &B::Surface)> {
        self.surface.as_ref().map(|(grid, surface)| (*grid, surface))
    }

    /// Number of live device resources held by the set.
    pub fn len(&self) -> usize {
        self.slots.len() + usize::from(self.surface.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffers for the given descriptor bindings, in descriptor order.
    /// Every binding must be provisioned with the same shape and access.
    pub fn bound_buffers(&self, descriptor: &KernelDescriptor) -> Result<Vec<BoundBuffer<'_, B>>> {
        descriptor
            .bindings
            .iter()
            .map(|wanted| {
                let slot = self.slots.get(&wanted.index).ok_or_else(|| {
                    PipelineError::binding(
                        &descriptor.label,
                        format!("binding {} was never provisioned", wanted.index),
                    )
                })?;
                if slot.binding != *wanted {
                    return Err(PipelineError::binding(
                        &descriptor.label,
                        format!(
                            "binding {} is provisioned as {:?} but the kernel expects {:?}",
                            wanted.index, slot.binding, wanted
                        ),
                    ));
                }
                Ok(BoundBuffer {
                    binding: slot.binding,
                    buffer: &slot.buffer,
                })
            })
            .collect()
    }

    /// Releases every resource of the set.  Calling it again is a no-op.
    pub fn teardown(&mut self, backend: &mut B) {
        if self.released {
            return;
        }
        let count = self.len();
        for (_, slot) in std::mem::take(&mut self.slots) {
            backend.release_buffer(slot.buffer);
        }
        if let Some((_, surface)) = self.surface.take() {
            backend.release_surface(surface);
        }
        self.released = true;
        debug!("`{}`: released {count} resource(s)", self.label);
    }
}

impl<B: Backend> Drop for ResourceSet<B> {
    fn drop(&mut self) {
        if !self.released && !self.is_empty() {
            warn!(
                "`{}`: resource set dropped without teardown, {} handle(s) leaked to the backend",
                self.label,
                self.len()
            );
        }
    }
}

/// Allocates the resources a kernel needs.
pub struct ResourceManager;

impl ResourceManager {
    /// Creates one buffer per descriptor binding, uploading `initial` into
    /// host-written bindings, plus the sample surface for raster kernels.
    ///
    /// On failure everything allocated so far is released again.
    pub fn provision<B: Backend>(
        backend: &mut B,
        descriptor: &KernelDescriptor,
        initial: &InitialData,
    ) -> Result<ResourceSet<B>> {
        let mut set = ResourceSet::new(descriptor.label.clone());
        match Self::fill(backend, descriptor, initial, &mut set) {
            Ok(()) => {
                debug!("`{}`: provisioned {} resource(s)", descriptor.label, set.len());
                Ok(set)
            }
            Err(e) => {
                set.teardown(backend);
                Err(e)
            }
        }
    }

    fn fill<B: Backend>(
        backend: &mut B,
        descriptor: &KernelDescriptor,
        initial: &InitialData,
        set: &mut ResourceSet<B>,
    ) -> Result<()> {
        let label = descriptor.label.as_str();
        for index in initial.indices() {
            match descriptor.binding(index) {
                None => {
                    return Err(PipelineError::binding(
                        label,
                        format!("initial data supplied for unknown binding {index}"),
                    ))
                }
                Some(binding) if binding.access != Access::HostWriteDeviceRead => {
                    return Err(PipelineError::binding(
                        label,
                        format!("binding {index} is not host-writable ({:?})", binding.access),
                    ))
                }
                Some(_) => {}
            }
        }

        for binding in &descriptor.bindings {
            let contents = initial.get(binding.index);
            if let Some(bytes) = contents {
                if bytes.len() as u64 != binding.shape.size() {
                    return Err(PipelineError::binding(
                        label,
                        format!(
                            "binding {} holds {} bytes but {} were supplied",
                            binding.index,
                            binding.shape.size(),
                            bytes.len()
                        ),
                    ));
                }
            }
            let buffer = backend.create_buffer(binding, contents)?;
            set.insert(backend, *binding, buffer);
        }

        if let ExecutionMode::RasterSample { grid, .. } = descriptor.mode {
            let surface = backend.create_surface(grid)?;
            set.set_surface(backend, grid, surface);
        }
        Ok(())
    }
}
