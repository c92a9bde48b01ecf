use std::borrow::Cow;
use std::collections::HashMap;

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use wgpu::naga::ShaderStage;

use super::compile::{wrap_fragment, WrappedFragment, PARAMS_BINDING, VERTEX_SHADER_GLSL};
use super::{
    DeviceStats, FramebufferHandle, GpuDevice, ProgramHandle, TextureHandle, UniformValue,
};
use crate::error::CompositorError;
use crate::types::PixelBuffer;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const BYTES_PER_PIXEL: u32 = 16;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct BlockSlot {
    binding: u32,
    buffer: Option<wgpu::Buffer>,
}

struct GpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    params_layout: wgpu::BindGroupLayout,
    textures_layout: wgpu::BindGroupLayout,
    wrapped: WrappedFragment,
    params: Vec<u8>,
    params_buffer: wgpu::Buffer,
    blocks: HashMap<String, BlockSlot>,
}

/// [`GpuDevice`] backed by a real adapter through `wgpu`.
pub struct WgpuDevice {
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    vertex_module: wgpu::ShaderModule,
    sampler: wgpu::Sampler,
    next_handle: u32,
    textures: HashMap<TextureHandle, GpuTexture>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    bound: HashMap<u32, TextureHandle>,
    stats: DeviceStats,
}

impl WgpuDevice {
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("vandal device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fullscreen triangle vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        });

        // Rgba32Float is not filterable without an optional feature.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("effect input sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            _instance: instance,
            device,
            queue,
            adapter_name: info.name,
            vertex_module,
            sampler,
            next_handle: 0,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            bound: HashMap::new(),
            stats: DeviceStats::default(),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn issue(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn texture(&self, texture: TextureHandle) -> Result<&GpuTexture, CompositorError> {
        self.textures
            .get(&texture)
            .ok_or_else(|| CompositorError::invariant(format!("{texture} is not a live texture")))
    }

    fn build_pipeline(
        &self,
        label: &str,
        wrapped: &WrappedFragment,
    ) -> Result<(wgpu::RenderPipeline, wgpu::BindGroupLayout, wgpu::BindGroupLayout), CompositorError>
    {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let fragment_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(wrapped.source.as_str()),
                stage: ShaderStage::Fragment,
                defines: &[],
            },
        });

        let mut params_entries = vec![uniform_entry(PARAMS_BINDING)];
        params_entries.extend(wrapped.blocks.iter().map(|(_, binding)| uniform_entry(*binding)));
        let params_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("effect params layout"),
                entries: &params_entries,
            });

        let mut texture_entries = Vec::with_capacity(wrapped.samplers.len() * 2);
        for unit in 0..wrapped.samplers.len() as u32 {
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: unit * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                },
                count: None,
            });
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: unit * 2 + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            });
        }
        let textures_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("effect textures layout"),
                entries: &texture_entries,
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("effect pipeline layout"),
                bind_group_layouts: &[&params_layout, &textures_layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.vertex_module,
                    entry_point: Some("main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TEXTURE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompositorError::ShaderCompile {
                shader: label.to_string(),
                message: error.to_string(),
            });
        }
        Ok((pipeline, params_layout, textures_layout))
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn padded_row_bytes(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * BYTES_PER_PIXEL).div_ceil(align) * align
}

impl GpuDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, CompositorError> {
        if width == 0 || height == 0 {
            return Err(CompositorError::Device(format!(
                "cannot create a {width}x{height} texture"
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("effect texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = TextureHandle(self.issue());
        self.textures.insert(
            handle,
            GpuTexture {
                texture,
                view,
                width,
                height,
            },
        );
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        pixels: &PixelBuffer,
    ) -> Result<(), CompositorError> {
        let slot = self.texture(texture)?;
        if (slot.width, slot.height) != (pixels.width, pixels.height) {
            return Err(CompositorError::Device(format!(
                "upload of {}x{} into {texture} sized {}x{}",
                pixels.width, pixels.height, slot.width, slot.height
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &slot.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&pixels.data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(pixels.width * BYTES_PER_PIXEL),
                rows_per_image: Some(pixels.height),
            },
            wgpu::Extent3d {
                width: pixels.width,
                height: pixels.height,
                depth_or_array_layers: 1,
            },
        );
        self.stats.texture_uploads += 1;
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<PixelBuffer, CompositorError> {
        let slot = self.texture(texture)?;
        let (width, height) = (slot.width, slot.height);
        let padded = padded_row_bytes(width);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &slot.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| CompositorError::Device(format!("device poll failed: {err}")))?;
        receiver
            .recv()
            .map_err(|_| CompositorError::Device("readback callback dropped".to_string()))?
            .map_err(|err| CompositorError::Device(format!("readback map failed: {err}")))?;

        let row_bytes = (width * BYTES_PER_PIXEL) as usize;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded as usize) {
                data.extend(
                    row[..row_bytes]
                        .chunks_exact(4)
                        .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
                );
            }
        }
        buffer.unmap();
        self.stats.texture_readbacks += 1;

        PixelBuffer::from_raw(width, height, data)
            .map_err(|err| CompositorError::Device(format!("readback of {texture}: {err}")))
    }

    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), CompositorError> {
        let slot = self.texture(texture)?;
        Ok((slot.width, slot.height))
    }

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), CompositorError> {
        let slot = self.textures.remove(&texture).ok_or_else(|| {
            CompositorError::invariant(format!("{texture} deleted twice or never created"))
        })?;
        slot.texture.destroy();
        self.bound.retain(|_, bound| *bound != texture);
        self.stats.textures_deleted += 1;
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
    ) -> Result<FramebufferHandle, CompositorError> {
        self.texture(color)?;
        let handle = FramebufferHandle(self.issue());
        self.framebuffers.insert(handle, color);
        self.stats.framebuffers_created += 1;
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<(), CompositorError> {
        if self.framebuffers.remove(&framebuffer).is_none() {
            return Err(CompositorError::invariant(format!(
                "{framebuffer} deleted twice or never created"
            )));
        }
        self.stats.framebuffers_deleted += 1;
        Ok(())
    }

    fn compile_program(
        &mut self,
        label: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle, CompositorError> {
        let wrapped = wrap_fragment(fragment_source).map_err(|message| {
            CompositorError::ShaderCompile {
                shader: label.to_string(),
                message,
            }
        })?;
        let (pipeline, params_layout, textures_layout) = self.build_pipeline(label, &wrapped)?;
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("effect params"),
            size: u64::from(wrapped.layout.size),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let blocks = wrapped
            .blocks
            .iter()
            .map(|(name, binding)| {
                (
                    name.clone(),
                    BlockSlot {
                        binding: *binding,
                        buffer: None,
                    },
                )
            })
            .collect();
        let handle = ProgramHandle(self.issue());
        self.programs.insert(
            handle,
            GpuProgram {
                label: label.to_string(),
                pipeline,
                params_layout,
                textures_layout,
                params: vec![0; wrapped.layout.size as usize],
                wrapped,
                params_buffer,
                blocks,
            },
        );
        self.stats.programs_compiled += 1;
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), CompositorError> {
        if self.programs.remove(&program).is_none() {
            return Err(CompositorError::invariant(format!(
                "{program} deleted twice or never compiled"
            )));
        }
        self.stats.programs_deleted += 1;
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: &UniformValue,
    ) -> Result<(), CompositorError> {
        let record = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| CompositorError::invariant(format!("uniform set on dead {program}")))?;
        self.stats.uniform_uploads += 1;

        if let UniformValue::Block(data) = value {
            let Some(slot) = record.blocks.get_mut(name) else {
                tracing::trace!(program = %record.label, block = name, "shader declares no such block");
                return Ok(());
            };
            let bytes: &[u8] = bytemuck::cast_slice(data);
            let size = (bytes.len() as u64).div_ceil(16).max(1) * 16;
            let stale = slot.buffer.as_ref().is_none_or(|buffer| buffer.size() != size);
            if stale {
                slot.buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(name),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }));
            }
            if let Some(buffer) = &slot.buffer {
                self.queue.write_buffer(buffer, 0, bytes);
            }
            return Ok(());
        }

        let written = record
            .wrapped
            .layout
            .write(name, value, &mut record.params)
            .map_err(|message| CompositorError::Device(format!("{}: {message}", record.label)))?;
        if !written {
            tracing::trace!(program = %record.label, uniform = name, "shader declares no such uniform");
        }
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<(), CompositorError> {
        self.texture(texture)?;
        self.bound.insert(unit, texture);
        Ok(())
    }

    fn draw_fullscreen(
        &mut self,
        program: ProgramHandle,
        target: FramebufferHandle,
    ) -> Result<(), CompositorError> {
        let record = self
            .programs
            .get(&program)
            .ok_or_else(|| CompositorError::invariant(format!("draw with dead {program}")))?;
        let color = *self
            .framebuffers
            .get(&target)
            .ok_or_else(|| CompositorError::invariant(format!("draw into dead {target}")))?;
        let target_view = &self.texture(color)?.view;

        self.queue
            .write_buffer(&record.params_buffer, 0, &record.params);

        let mut params_entries = vec![wgpu::BindGroupEntry {
            binding: PARAMS_BINDING,
            resource: record.params_buffer.as_entire_binding(),
        }];
        for (name, slot) in &record.blocks {
            let buffer = slot.buffer.as_ref().ok_or_else(|| {
                CompositorError::Device(format!("{}: block `{name}` was never uploaded", record.label))
            })?;
            params_entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: buffer.as_entire_binding(),
            });
        }
        let params_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("effect params"),
            layout: &record.params_layout,
            entries: &params_entries,
        });

        let mut texture_entries = Vec::with_capacity(record.wrapped.samplers.len() * 2);
        for (unit, name) in record.wrapped.samplers.iter().enumerate() {
            let bound = self.bound.get(&(unit as u32)).copied().ok_or_else(|| {
                CompositorError::invariant(format!(
                    "{}: nothing bound to unit {unit} for `{name}`",
                    record.label
                ))
            })?;
            if bound == color {
                return Err(CompositorError::invariant(format!(
                    "{bound} is both sampled and rendered to"
                )));
            }
            texture_entries.push(wgpu::BindGroupEntry {
                binding: unit as u32 * 2,
                resource: wgpu::BindingResource::TextureView(&self.texture(bound)?.view),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: unit as u32 * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        let textures_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("effect textures"),
            layout: &record.textures_layout,
            entries: &texture_entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("effect encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(record.label.as_str()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target_view,
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
            pass.set_pipeline(&record.pipeline);
            pass.set_bind_group(0, &params_group, &[]);
            pass.set_bind_group(1, &textures_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.stats.draws += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<(), CompositorError> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| CompositorError::Device(format!("device poll failed: {err}")))?;
        self.stats.submits += 1;
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}
