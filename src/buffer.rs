//! wgpu buffers and host readback.
//!
//! [`DeviceBuffer`] wraps a [`wgpu::Buffer`] created for one kernel binding
//! together with its byte size.  Bindings the host reads back get
//! `COPY_SRC` so their contents can be copied into a `MAP_READ` staging
//! buffer; mapping that staging buffer is scoped by [`MappedRead`], which
//! unmaps on every exit path.

use std::sync::mpsc;

use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::context::GpuContext;
use crate::descriptor::{Access, BindingShape, ResourceBinding};
use crate::error::{PipelineError, Result};

/// A device buffer bound at one kernel binding.
pub struct DeviceBuffer {
    pub buffer: Buffer,
    pub size: u64,
}

impl DeviceBuffer {
    /// Usage flags needed for `binding`.
    pub fn usages(binding: &ResourceBinding) -> BufferUsages {
        let mut usage = match binding.shape {
            BindingShape::Storage { .. } => BufferUsages::STORAGE,
            BindingShape::Uniform { .. } => BufferUsages::UNIFORM,
        };
        // Host data arrives through queue writes, which need COPY_DST.
        usage |= BufferUsages::COPY_DST;
        if binding.access == Access::DeviceWriteHostRead {
            usage |= BufferUsages::COPY_SRC;
        }
        usage
    }

    /// Creates the buffer for `binding`, uploading `contents` through the
    /// queue when given.  The write is ordered before any later submission,
    /// so no dispatch can observe the buffer without it.
    pub fn for_binding(
        context: &GpuContext,
        binding: &ResourceBinding,
        contents: Option<&[u8]>,
    ) -> Self {
        let size = binding.shape.size();
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(&format!("binding_{}", binding.index)),
            size,
            usage: Self::usages(binding),
            mapped_at_creation: false,
        });
        if let Some(bytes) = contents {
            context.queue.write_buffer(&buffer, 0, bytes);
        }
        Self { buffer, size }
    }

    pub fn destroy(self) {
        self.buffer.destroy();
    }
}

/// Creates a staging buffer of `size` bytes that the host can map for
/// reading.  It cannot be bound to a shader.
pub fn new_download(context: &GpuContext, size: u64) -> Buffer {
    context.device.create_buffer(&BufferDescriptor {
        label: Some("download_staging"),
        size,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    })
}

/// A mapped, host-readable view of a staging buffer.  The buffer is
/// unmapped when the guard is dropped.
pub struct MappedRead<'a> {
    buffer: &'a Buffer,
}

impl<'a> MappedRead<'a> {
    /// Maps `buffer` for reading and blocks until the mapping is ready.
    ///
    /// The copy that fills the buffer must already be submitted.
    pub fn map(context: &GpuContext, buffer: &'a Buffer) -> Result<Self> {
        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |outcome| {
            let _ = sender.send(outcome);
        });

        // PollType::Wait keeps the thread idle until the device has
        // completed all submitted work, including the staging copy.
        context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| PipelineError::Readback(format!("device poll failed: {e}")))?;

        match receiver.recv() {
            Ok(Ok(())) => Ok(Self { buffer }),
            Ok(Err(e)) => Err(PipelineError::Readback(format!("buffer mapping failed: {e}"))),
            Err(_) => Err(PipelineError::Readback("buffer mapping was never resolved".into())),
        }
    }

    /// Copies the mapped contents out.  The range view is dropped before
    /// this returns so the buffer can be unmapped.
    pub fn to_vec(&self) -> Vec<u8> {
        let view = self.buffer.slice(..).get_mapped_range();
        view.to_vec()
    }
}

impl Drop for MappedRead<'_> {
    fn drop(&mut self) {
        self.buffer.unmap();
    }
}
