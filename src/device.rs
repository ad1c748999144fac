//! The wgpu implementation of [`Backend`].
//!
//! Compute kernels become a `ComputePipeline` with one bind group layout
//! derived from the descriptor bindings.  Raster-sample kernels become a
//! `RenderPipeline` drawing into a single-channel `R32Float` texture, one
//! texel per sample, with no multisampling and no filtering.  Adapters that
//! cannot render into that format fail raster kernels with
//! [`PipelineError::Allocation`] before any raster object exists.  Every call
//! that can trip wgpu validation runs inside an error scope so failures come
//! back as [`PipelineError`]s instead of the uncaptured-error panic.

use std::num::NonZeroU64;

use log::debug;

use crate::backend::{Backend, BoundBuffer};
use crate::buffer::{new_download, DeviceBuffer, MappedRead};
use crate::context::GpuContext;
use crate::descriptor::{
    BindingShape, ExecutionMode, KernelDescriptor, KernelSources, ResourceBinding, SampleGrid,
    StageSource, WorkgroupShape,
};
use crate::error::{PipelineError, Result};

/// Texel format of sample surfaces: one 32-bit float per sample.
pub const SAMPLE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
const SAMPLE_TEXEL_SIZE: u32 = 4;

/// A linked kernel and the layout of its bind group 0.
pub enum WgpuProgram {
    Compute {
        pipeline: wgpu::ComputePipeline,
        layout: wgpu::BindGroupLayout,
    },
    Raster {
        pipeline: wgpu::RenderPipeline,
        layout: wgpu::BindGroupLayout,
    },
}

/// Render target of a raster-sample kernel.
pub struct SampleSurface {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub grid: SampleGrid,
}

/// [`Backend`] over one borrowed [`GpuContext`].
pub struct WgpuBackend<'a> {
    context: &'a GpuContext,
    live: usize,
}

impl<'a> WgpuBackend<'a> {
    pub fn new(context: &'a GpuContext) -> Self {
        Self { context, live: 0 }
    }

    pub fn context(&self) -> &GpuContext {
        self.context
    }

    /// Programs, buffers and surfaces created and not yet released.
    pub fn live_resources(&self) -> usize {
        self.live
    }

    /// Runs `f` inside a validation error scope.
    fn validated<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let error = pollster::block_on(device.pop_error_scope());
        (value, error)
    }

    fn shader_module(&self, label: &str, stage: &StageSource) -> wgpu::ShaderModule {
        self.context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(stage.wgsl.as_str().into()),
        })
    }

    fn bind_group_layout(
        &self,
        descriptor: &KernelDescriptor,
        visibility: wgpu::ShaderStages,
    ) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = descriptor
            .bindings
            .iter()
            .map(|binding| layout_entry(binding, visibility))
            .collect();
        self.context
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{}_layout", descriptor.label)),
                entries: &entries,
            })
    }

    fn bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        buffers: &[BoundBuffer<'_, Self>],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .map(|bound| wgpu::BindGroupEntry {
                binding: bound.binding.index,
                resource: bound.buffer.buffer.as_entire_binding(),
            })
            .collect();
        self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel_bind_group"),
            layout,
            entries: &entries,
        })
    }

    fn pipeline_layout(&self, label: &str, layout: &wgpu::BindGroupLayout) -> wgpu::PipelineLayout {
        self.context
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            })
    }

    fn build_compute(&self, descriptor: &KernelDescriptor, stage: &StageSource) -> WgpuProgram {
        let module = self.shader_module(&descriptor.label, stage);
        let layout = self.bind_group_layout(descriptor, wgpu::ShaderStages::COMPUTE);
        let pipeline_layout = self.pipeline_layout(&descriptor.label, &layout);
        let pipeline = self
            .context
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&descriptor.label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(&stage.entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        WgpuProgram::Compute { pipeline, layout }
    }

    fn build_raster(
        &self,
        descriptor: &KernelDescriptor,
        vertex: &StageSource,
        fragment: &StageSource,
    ) -> WgpuProgram {
        let vertex_module = self.shader_module(&format!("{}_vertex", descriptor.label), vertex);
        let fragment_module =
            self.shader_module(&format!("{}_fragment", descriptor.label), fragment);
        let layout = self.bind_group_layout(descriptor, wgpu::ShaderStages::VERTEX_FRAGMENT);
        let pipeline_layout = self.pipeline_layout(&descriptor.label, &layout);
        let pipeline = self
            .context
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&descriptor.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some(&vertex.entry_point),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some(&fragment.entry_point),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: SAMPLE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            });
        WgpuProgram::Raster { pipeline, layout }
    }

    /// Copies `size` bytes out of a `COPY_SRC` resource through a staging
    /// buffer; `record` encodes the copy into the staging buffer.
    fn download(
        &self,
        size: u64,
        record: impl FnOnce(&mut wgpu::CommandEncoder, &wgpu::Buffer),
    ) -> Result<Vec<u8>> {
        let staging = new_download(self.context, size);
        let ((), error) = self.validated(|| {
            let mut encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("readback_encoder"),
                });
            record(&mut encoder, &staging);
            self.context.queue.submit([encoder.finish()]);
        });
        let bytes = match error {
            Some(e) => Err(PipelineError::Readback(e.to_string())),
            None => MappedRead::map(self.context, &staging).map(|mapped| mapped.to_vec()),
        };
        staging.destroy();
        bytes
    }

    /// Fails with [`PipelineError::Allocation`] when the device cannot
    /// render into [`SAMPLE_FORMAT`], before any raster object is created.
    fn require_sample_target(&self, what: impl FnOnce() -> String) -> Result<()> {
        if self.context.renders_to(SAMPLE_FORMAT) {
            return Ok(());
        }
        Err(PipelineError::Allocation {
            what: what(),
            detail: format!(
                "adapter {} cannot render into {SAMPLE_FORMAT:?}",
                self.context.adapter.get_info().name
            ),
        })
    }
}

fn sample_surface_name(grid: SampleGrid) -> String {
    format!("{}x{} {SAMPLE_FORMAT:?} sample surface", grid.width, grid.height)
}

fn layout_entry(
    binding: &ResourceBinding,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    let ty = match binding.shape {
        BindingShape::Storage { .. } => wgpu::BufferBindingType::Storage {
            read_only: !binding.access.device_writes(),
        },
        BindingShape::Uniform { .. } => wgpu::BufferBindingType::Uniform,
    };
    wgpu::BindGroupLayoutEntry {
        binding: binding.index,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(binding.shape.size()),
        },
        count: None,
    }
}

impl Backend for WgpuBackend<'_> {
    type Program = WgpuProgram;
    type Buffer = DeviceBuffer;
    type Surface = SampleSurface;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn build_program(&mut self, descriptor: &KernelDescriptor) -> Result<WgpuProgram> {
        if let ExecutionMode::RasterSample { grid, .. } = descriptor.mode {
            self.require_sample_target(|| sample_surface_name(grid))?;
        }
        // Shader modules are dropped when the build returns; the pipeline
        // keeps what it needs.
        let (program, error) = self.validated(|| match &descriptor.sources {
            KernelSources::Compute(stage) => self.build_compute(descriptor, stage),
            KernelSources::Raster { vertex, fragment } => {
                self.build_raster(descriptor, vertex, fragment)
            }
        });
        if let Some(e) = error {
            return Err(PipelineError::build(&descriptor.label, e.to_string()));
        }
        self.live += 1;
        Ok(program)
    }

    fn release_program(&mut self, program: WgpuProgram) {
        drop(program);
        self.live -= 1;
    }

    fn create_buffer(
        &mut self,
        binding: &ResourceBinding,
        contents: Option<&[u8]>,
    ) -> Result<DeviceBuffer> {
        let (buffer, error) =
            self.validated(|| DeviceBuffer::for_binding(self.context, binding, contents));
        if let Some(e) = error {
            buffer.destroy();
            return Err(PipelineError::Allocation {
                what: format!("buffer for binding {}", binding.index),
                detail: e.to_string(),
            });
        }
        self.live += 1;
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > buffer.size {
            return Err(PipelineError::Dispatch(format!(
                "{} bytes do not fit a {}-byte buffer",
                bytes.len(),
                buffer.size
            )));
        }
        self.context.queue.write_buffer(&buffer.buffer, 0, bytes);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: DeviceBuffer) {
        buffer.destroy();
        self.live -= 1;
    }

    fn create_surface(&mut self, grid: SampleGrid) -> Result<SampleSurface> {
        self.require_sample_target(|| sample_surface_name(grid))?;
        let max = self.context.device.limits().max_texture_dimension_2d;
        if grid.width > max || grid.height > max {
            return Err(PipelineError::Allocation {
                what: sample_surface_name(grid),
                detail: format!("device textures are limited to {max} texels per side"),
            });
        }
        let (texture, error) = self.validated(|| {
            self.context.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("sample_surface"),
                size: wgpu::Extent3d {
                    width: grid.width,
                    height: grid.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: SAMPLE_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        });
        if let Some(e) = error {
            texture.destroy();
            return Err(PipelineError::Allocation {
                what: sample_surface_name(grid),
                detail: e.to_string(),
            });
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.live += 1;
        Ok(SampleSurface { texture, view, grid })
    }

    fn release_surface(&mut self, surface: SampleSurface) {
        surface.texture.destroy();
        self.live -= 1;
    }

    fn dispatch_compute(
        &mut self,
        program: &WgpuProgram,
        buffers: &[BoundBuffer<'_, Self>],
        workgroups: WorkgroupShape,
    ) -> Result<()> {
        let WgpuProgram::Compute { pipeline, layout } = program else {
            return Err(PipelineError::Dispatch("program is not a compute kernel".into()));
        };
        let ((), error) = self.validated(|| {
            let bind_group = self.bind_group(layout, buffers);
            let mut encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("compute_encoder"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("compute_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(workgroups.x, workgroups.y, workgroups.z);
            }
            self.context.queue.submit([encoder.finish()]);
        });
        match error {
            Some(e) => Err(PipelineError::Dispatch(e.to_string())),
            None => Ok(()),
        }
    }

    fn draw_samples(
        &mut self,
        program: &WgpuProgram,
        buffers: &[BoundBuffer<'_, Self>],
        surface: &SampleSurface,
    ) -> Result<()> {
        let WgpuProgram::Raster { pipeline, layout } = program else {
            return Err(PipelineError::Dispatch("program is not a raster-sample kernel".into()));
        };
        let SampleGrid { width, height } = surface.grid;
        let ((), error) = self.validated(|| {
            let bind_group = self.bind_group(layout, buffers);
            let mut encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("sample_encoder"),
                });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("sample_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &surface.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                // One fragment per texel: the viewport is the grid.
                pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                pass.set_scissor_rect(0, 0, width, height);
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            self.context.queue.submit([encoder.finish()]);
        });
        match error {
            Some(e) => Err(PipelineError::Dispatch(e.to_string())),
            None => Ok(()),
        }
    }

    fn synchronize(&mut self) -> Result<()> {
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| PipelineError::Dispatch(format!("waiting for the device failed: {e}")))?;
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &DeviceBuffer, len: u64) -> Result<Vec<u8>> {
        if len > buffer.size || len % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(PipelineError::Readback(format!(
                "cannot copy {len} bytes out of a {}-byte buffer",
                buffer.size
            )));
        }
        self.download(len, |encoder, staging| {
            encoder.copy_buffer_to_buffer(&buffer.buffer, 0, staging, 0, len);
        })
    }

    fn read_surface(&mut self, surface: &SampleSurface) -> Result<Vec<u8>> {
        let SampleGrid { width, height } = surface.grid;
        let row_bytes = width * SAMPLE_TEXEL_SIZE;
        let alignment = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = row_bytes.div_ceil(alignment) * alignment;
        let padded_size = u64::from(padded_row_bytes) * u64::from(height);
        let padded = self.download(padded_size, |encoder, staging| {
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &surface.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row_bytes),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        })?;

        let mut bytes = Vec::with_capacity(row_bytes as usize * height as usize);
        for row in padded.chunks_exact(padded_row_bytes as usize) {
            bytes.extend_from_slice(&row[..row_bytes as usize]);
        }
        debug!("unpacked {height} row(s) of {width} samples");
        Ok(bytes)
    }
}
