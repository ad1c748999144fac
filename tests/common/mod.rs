//! In-memory backend shared by the integration tests.
//!
//! Kernels are emulated on the host: compute programs run a closure
//! registered under the kernel label over the bound buffers, raster
//! programs evaluate a registered `f32 -> f32` function at the domain point
//! of every texel.  The backend counts live allocations and device calls
//! and refuses reads that are not preceded by a barrier.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use gpu_kernel_pipeline::{
    domain_point, Backend, BoundBuffer, DomainBounds, ExecutionMode, KernelDescriptor,
    KernelSources, PipelineError, ResourceBinding, Result, SampleGrid, SampleParams,
    WorkgroupShape, SAMPLE_PARAMS_BINDING,
};

pub type ComputeKernel = Box<dyn Fn(&mut BTreeMap<u32, Vec<u8>>)>;
pub type SampleFn = Box<dyn Fn(f32) -> f32>;

pub struct FakeProgram {
    label: String,
    raster: bool,
}

pub struct FakeBuffer {
    id: usize,
    binding: ResourceBinding,
}

pub struct FakeSurface {
    id: usize,
    grid: SampleGrid,
}

#[derive(Default)]
pub struct FakeBackend {
    next_id: usize,
    memory: HashMap<usize, Vec<u8>>,
    compute_kernels: HashMap<String, ComputeKernel>,
    sample_fns: HashMap<String, SampleFn>,
    unsynchronized: bool,

    pub live: usize,
    pub programs_built: usize,
    pub buffers_created: usize,
    pub buffers_released: usize,
    pub dispatches: usize,
    pub draws: usize,
    pub barriers: usize,
    pub reads: usize,
    pub last_workgroups: Option<WorkgroupShape>,

    /// Largest grid side `create_surface` accepts.
    pub max_surface_side: Option<u32>,
    /// Make every read fail.
    pub fail_reads: bool,
    /// Refuse raster programs and surfaces as if the sample format could
    /// not be rendered into.
    pub unrenderable_samples: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the host emulation of the compute kernel labelled `label`.
    pub fn with_compute(
        mut self,
        label: &str,
        kernel: impl Fn(&mut BTreeMap<u32, Vec<u8>>) + 'static,
    ) -> Self {
        self.compute_kernels.insert(label.to_owned(), Box::new(kernel));
        self
    }

    /// Registers the function sampled by the raster kernel labelled `label`.
    pub fn with_samples(mut self, label: &str, f: impl Fn(f32) -> f32 + 'static) -> Self {
        self.sample_fns.insert(label.to_owned(), Box::new(f));
        self
    }

    /// Emulates the shipped addition kernel.
    pub fn with_addition(self) -> Self {
        use gpu_kernel_pipeline::kernels::{ADD_LHS_BINDING, ADD_RESULT_BINDING, ADD_RHS_BINDING};
        self.with_compute("add_scalars", |buffers| {
            let lhs: f32 = bytemuck::pod_read_unaligned(&buffers[&ADD_LHS_BINDING]);
            let rhs: f32 = bytemuck::pod_read_unaligned(&buffers[&ADD_RHS_BINDING]);
            buffers.insert(ADD_RESULT_BINDING, (lhs + rhs).to_le_bytes().to_vec());
        })
    }

    fn alloc(&mut self, bytes: Vec<u8>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.memory.insert(id, bytes);
        self.live += 1;
        id
    }

    fn free(&mut self, id: usize) {
        assert!(self.memory.remove(&id).is_some(), "double release of resource {id}");
        self.live -= 1;
    }

    fn check_renderable(&self, grid: SampleGrid) -> Result<()> {
        if self.unrenderable_samples {
            return Err(PipelineError::Allocation {
                what: format!("{}x{} sample surface", grid.width, grid.height),
                detail: "sample format is not renderable".into(),
            });
        }
        Ok(())
    }

    fn check_synchronized(&self) -> Result<()> {
        if self.unsynchronized {
            return Err(PipelineError::Readback("read issued before the barrier".into()));
        }
        if self.fail_reads {
            return Err(PipelineError::Readback("injected read failure".into()));
        }
        Ok(())
    }
}

impl Backend for FakeBackend {
    type Program = FakeProgram;
    type Buffer = FakeBuffer;
    type Surface = FakeSurface;

    fn name(&self) -> &str {
        "fake"
    }

    fn build_program(&mut self, descriptor: &KernelDescriptor) -> Result<FakeProgram> {
        if let ExecutionMode::RasterSample { grid, .. } = descriptor.mode {
            self.check_renderable(grid)?;
        }
        self.programs_built += 1;
        self.live += 1;
        Ok(FakeProgram {
            label: descriptor.label.clone(),
            raster: matches!(descriptor.sources, KernelSources::Raster { .. }),
        })
    }

    fn release_program(&mut self, _program: FakeProgram) {
        self.live -= 1;
    }

    fn create_buffer(
        &mut self,
        binding: &ResourceBinding,
        contents: Option<&[u8]>,
    ) -> Result<FakeBuffer> {
        let mut bytes = vec![0u8; binding.shape.size() as usize];
        if let Some(contents) = contents {
            bytes.copy_from_slice(contents);
        }
        self.buffers_created += 1;
        Ok(FakeBuffer {
            id: self.alloc(bytes),
            binding: *binding,
        })
    }

    fn write_buffer(&mut self, buffer: &FakeBuffer, bytes: &[u8]) -> Result<()> {
        let memory = self
            .memory
            .get_mut(&buffer.id)
            .ok_or_else(|| PipelineError::Dispatch("write to a released buffer".into()))?;
        memory[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: FakeBuffer) {
        self.buffers_released += 1;
        self.free(buffer.id);
    }

    fn create_surface(&mut self, grid: SampleGrid) -> Result<FakeSurface> {
        self.check_renderable(grid)?;
        if let Some(max) = self.max_surface_side {
            if grid.width > max || grid.height > max {
                return Err(PipelineError::Allocation {
                    what: "sample surface".into(),
                    detail: format!("limit is {max}"),
                });
            }
        }
        let id = self.alloc(vec![0u8; grid.sample_count() * 4]);
        Ok(FakeSurface { id, grid })
    }

    fn release_surface(&mut self, surface: FakeSurface) {
        self.free(surface.id);
    }

    fn dispatch_compute(
        &mut self,
        program: &FakeProgram,
        buffers: &[BoundBuffer<'_, Self>],
        workgroups: WorkgroupShape,
    ) -> Result<()> {
        assert!(!program.raster, "compute dispatch of a raster program");
        self.dispatches += 1;
        self.last_workgroups = Some(workgroups);

        let mut view: BTreeMap<u32, Vec<u8>> = buffers
            .iter()
            .map(|bound| (bound.binding.index, self.memory[&bound.buffer.id].clone()))
            .collect();
        let kernel = self
            .compute_kernels
            .get(&program.label)
            .ok_or_else(|| no_emulation(&program.label))?;
        kernel(&mut view);
        for bound in buffers {
            if bound.binding.access.device_writes() {
                self.memory.insert(bound.buffer.id, view[&bound.binding.index].clone());
            }
        }
        self.unsynchronized = true;
        Ok(())
    }

    fn draw_samples(
        &mut self,
        program: &FakeProgram,
        buffers: &[BoundBuffer<'_, Self>],
        surface: &FakeSurface,
    ) -> Result<()> {
        assert!(program.raster, "draw of a compute program");
        self.draws += 1;

        let params_buffer = buffers
            .iter()
            .find(|bound| bound.binding.index == SAMPLE_PARAMS_BINDING)
            .ok_or_else(|| PipelineError::Dispatch("sample parameters not bound".into()))?;
        let params: SampleParams =
            bytemuck::pod_read_unaligned(&self.memory[&params_buffer.buffer.id]);
        let domain = DomainBounds::new(params.lower_bound, params.upper_bound);
        let width = params.width as u32;

        let f = self
            .sample_fns
            .get(&program.label)
            .ok_or_else(|| no_emulation(&program.label))?;
        let mut texels = Vec::with_capacity(surface.grid.sample_count() * 4);
        for _row in 0..surface.grid.height {
            for i in 0..surface.grid.width {
                texels.extend_from_slice(&f(domain_point(i, width, domain)).to_le_bytes());
            }
        }
        self.memory.insert(surface.id, texels);
        self.unsynchronized = true;
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.barriers += 1;
        self.unsynchronized = false;
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &FakeBuffer, len: u64) -> Result<Vec<u8>> {
        self.check_synchronized()?;
        self.reads += 1;
        assert!(len <= buffer.binding.shape.size());
        Ok(self.memory[&buffer.id][..len as usize].to_vec())
    }

    fn read_surface(&mut self, surface: &FakeSurface) -> Result<Vec<u8>> {
        self.check_synchronized()?;
        self.reads += 1;
        Ok(self.memory[&surface.id].clone())
    }
}

fn no_emulation(label: &str) -> PipelineError {
    PipelineError::Dispatch(format!("no emulation for `{label}`"))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
