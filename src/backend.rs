//! The device seam of the pipeline.
//!
//! Pipeline stages never talk to `wgpu` directly.  They drive a [`Backend`],
//! which owns the device handles and performs the primitive operations:
//! building programs, allocating buffers and sample surfaces, recording
//! work, waiting for the device and copying memory back.  [`WgpuBackend`]
//! is the production implementation; tests substitute an in-memory one.
//!
//! Handles returned by a backend are plain values owned by the caller and
//! must be handed back to the matching `release_*` method exactly once.
//!
//! [`WgpuBackend`]: crate::device::WgpuBackend

use crate::descriptor::{KernelDescriptor, ResourceBinding, SampleGrid, WorkgroupShape};
use crate::error::Result;

/// A provisioned buffer together with the binding slot it occupies.
pub struct BoundBuffer<'a, B: ?Sized + Backend> {
    pub binding: ResourceBinding,
    pub buffer: &'a B::Buffer,
}

pub trait Backend {
    /// Linked, executable form of a kernel.
    type Program;
    /// Device buffer bound at one binding slot.
    type Buffer;
    /// Render target a raster-sample kernel writes its samples into.
    type Surface;

    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Compiles and links the stages of `descriptor`.  The sources have
    /// already passed front-end validation.
    fn build_program(&mut self, descriptor: &KernelDescriptor) -> Result<Self::Program>;

    fn release_program(&mut self, program: Self::Program);

    /// Allocates a buffer for `binding`.  When `contents` is given it is
    /// uploaded before any later dispatch can observe the buffer.
    fn create_buffer(
        &mut self,
        binding: &ResourceBinding,
        contents: Option<&[u8]>,
    ) -> Result<Self::Buffer>;

    /// Overwrites the start of `buffer` with `bytes`.
    fn write_buffer(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> Result<()>;

    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Allocates a single-channel 32-bit float render target of `grid` size.
    fn create_surface(&mut self, grid: SampleGrid) -> Result<Self::Surface>;

    fn release_surface(&mut self, surface: Self::Surface);

    /// Records and submits a compute dispatch over `workgroups`.
    fn dispatch_compute(
        &mut self,
        program: &Self::Program,
        buffers: &[BoundBuffer<'_, Self>],
        workgroups: WorkgroupShape,
    ) -> Result<()>;

    /// Records and submits one draw that covers every texel of `surface`
    /// exactly once, with the viewport set to the full grid.
    fn draw_samples(
        &mut self,
        program: &Self::Program,
        buffers: &[BoundBuffer<'_, Self>],
        surface: &Self::Surface,
    ) -> Result<()>;

    /// Blocks until every submitted write is visible to host reads.
    fn synchronize(&mut self) -> Result<()>;

    /// Copies the first `len` bytes of `buffer` to host memory.
    fn read_buffer(&mut self, buffer: &Self::Buffer, len: u64) -> Result<Vec<u8>>;

    /// Copies every texel of `surface` to host memory, row-major and
    /// tightly packed.
    fn read_surface(&mut self, surface: &Self::Surface) -> Result<Vec<u8>>;
}
