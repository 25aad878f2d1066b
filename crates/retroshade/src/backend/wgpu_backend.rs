//! wgpu implementation of [`RenderBackend`]
//!
//! Generated passes are GLSL 450 and go through wgpu's GLSL front-end. Every program
//! shares one bind group layout shape: the uniform block at binding 0, then a texture
//! and a sampler per sampler of the pass.

use super::{
    BackendError, DrawCommand, MVP, ProgramId, ProgramOutput, QUAD_INDICES, QUAD_VERTICES, QuadVertex, RenderBackend, RenderDestination, SamplerState, TextureBinding,
    TextureDesc, TextureId,
};
use retroshade_compiler::graph::Size;
use retroshade_compiler::preset::{FilterMode, TargetFormat, WrapMode};
use retroshade_compiler::transpile::{CompiledPass, UNIFORM_BINDING, sampler_bindings};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

const BLIT_VERTEX_SHADER: &str = include_str!("../../../../shaders/internal/blit.vert");
const BLIT_FRAGMENT_SHADER: &str = include_str!("../../../../shaders/internal/blit.frag");
/// Size of the blit shader's uniform block, a single matrix
const MVP_SIZE: u32 = 64;

impl QuadVertex {
    const ATTRIBUTES: &[wgpu::VertexAttribute] = &[
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x4,
            offset: 0,
            shader_location: 0,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 16,
            shader_location: 1,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x4,
            offset: 32,
            shader_location: 2,
        },
    ];

    const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: Self::ATTRIBUTES,
        array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
    };
}

/// Maps a render target format to its wgpu equivalent
pub fn texture_format(format: TargetFormat) -> wgpu::TextureFormat {
    match format {
        TargetFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TargetFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TargetFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

#[derive(Debug)]
struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Imported textures belong to the host and are never destroyed here
    owned: bool,
}

#[derive(Debug)]
struct Program {
    label: String,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: Option<wgpu::Buffer>,
}

#[derive(Debug)]
struct Canvas {
    view: wgpu::TextureView,
    size: Size,
}

/// Renders through a wgpu device
///
/// The host attaches the canvas for every frame with [`WgpuBackend::set_canvas`] and
/// hands its per-frame source texture over with [`WgpuBackend::import_texture`].
#[derive(Debug)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    canvas_format: wgpu::TextureFormat,
    canvas: Option<Canvas>,
    textures: HashMap<TextureId, TextureEntry>,
    programs: HashMap<ProgramId, Program>,
    samplers: HashMap<SamplerState, wgpu::Sampler>,
    blit_programs: HashMap<wgpu::TextureFormat, Program>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    encoder: Option<wgpu::CommandEncoder>,
    next_id: u32,
}

impl WgpuBackend {
    /// Features a device should be created with
    ///
    /// Float32 filtering is needed by presets with `float_framebuffer` passes and clamping
    /// to the border by `clamp_to_border` samplers; without the latter, edges are clamped.
    pub fn desired_features() -> wgpu::Features {
        wgpu::Features::FLOAT32_FILTERABLE | wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER
    }

    /// Creates a backend presenting into canvases of the given format
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, canvas_format: wgpu::TextureFormat) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad vertex buffer"),
            usage: wgpu::BufferUsages::VERTEX,
            contents: bytemuck::cast_slice(QUAD_VERTICES),
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad index buffer"),
            usage: wgpu::BufferUsages::INDEX,
            contents: bytemuck::cast_slice(QUAD_INDICES),
        });
        Self {
            device,
            queue,
            canvas_format,
            canvas: None,
            textures: HashMap::new(),
            programs: HashMap::new(),
            samplers: HashMap::new(),
            blit_programs: HashMap::new(),
            vertex_buffer,
            index_buffer,
            encoder: None,
            next_id: 1,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Attaches the texture the next frame presents into
    pub fn set_canvas(&mut self, view: wgpu::TextureView, size: Size) {
        self.canvas = Some(Canvas { view, size });
    }

    pub fn clear_canvas(&mut self) {
        self.canvas = None;
    }

    /// Makes a host texture available to the renderer, typically the frame's source
    pub fn import_texture(&mut self, texture: &wgpu::Texture) -> TextureId {
        let id = TextureId(self.next_id());
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.insert(
            id,
            TextureEntry {
                texture: texture.clone(),
                view,
                owned: false,
            },
        );
        id
    }

    /// The wgpu texture behind an id, for reading results back
    pub fn texture(&self, texture: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&texture).map(|t| &t.texture)
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_sampler(device: &wgpu::Device, state: SamplerState) -> wgpu::Sampler {
        let clamp_to_border = device.features().contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        let address_mode = match state.wrap_mode {
            WrapMode::ClampToBorder if clamp_to_border => wgpu::AddressMode::ClampToBorder,
            WrapMode::ClampToBorder | WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            WrapMode::Repeat => wgpu::AddressMode::Repeat,
            WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        };
        let filter = match state.filter {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("Sampler {:?} {:?}", state.filter, state.wrap_mode)),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 0.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: (address_mode == wgpu::AddressMode::ClampToBorder).then_some(wgpu::SamplerBorderColor::TransparentBlack),
        })
    }

    /// Builds a render pipeline over the shared quad with an explicit bind group layout
    fn create_program(&self, label: &str, vertex_source: &str, fragment_source: &str, uniform_size: u32, sampler_count: usize, format: wgpu::TextureFormat) -> Program {
        let vertex_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} vertex")),
            source: wgpu::ShaderSource::Glsl {
                shader: vertex_source.into(),
                stage: wgpu::naga::ShaderStage::Vertex,
                defines: Default::default(),
            },
        });
        let fragment_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} fragment")),
            source: wgpu::ShaderSource::Glsl {
                shader: fragment_source.into(),
                stage: wgpu::naga::ShaderStage::Fragment,
                defines: Default::default(),
            },
        });

        let mut bind_group_layout_entries = Vec::new();
        if uniform_size > 0 {
            bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: UNIFORM_BINDING,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        for index in 0..sampler_count {
            let (texture_binding, sampler_binding) = sampler_bindings(index);
            bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: texture_binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: sampler_binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        bind_group_layout_entries.sort_by_key(|entry| entry.binding);

        let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &bind_group_layout_entries,
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: wgpu::VertexState {
                module: &vertex_module,
                buffers: &[QuadVertex::LAYOUT],
                compilation_options: Default::default(),
                entry_point: Some("main"),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
                entry_point: Some("main"),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                cull_mode: None,
                front_face: wgpu::FrontFace::Ccw,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
                unclipped_depth: false,
            },
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            depth_stencil: None,
        });

        let uniform_buffer = (uniform_size > 0).then(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{label} uniforms")),
                size: uniform_size.next_multiple_of(16) as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        Program {
            label: label.to_string(),
            pipeline,
            bind_group_layout,
            uniform_buffer,
        }
    }

    fn destination_format(&self, destination: RenderDestination) -> Result<wgpu::TextureFormat, BackendError> {
        match destination {
            RenderDestination::Canvas => Ok(self.canvas_format),
            RenderDestination::Texture(texture) => self.textures.get(&texture).map(|t| t.texture.format()).ok_or(BackendError::UnknownTexture(texture)),
        }
    }

    fn ensure_sampler(&mut self, state: SamplerState) {
        if !self.samplers.contains_key(&state) {
            let sampler = Self::create_sampler(&self.device, state);
            self.samplers.insert(state, sampler);
        }
    }

    /// Binds the command's resources to `program` and records a quad draw
    ///
    /// Uniform contents are only uploaded when the command carries any.
    fn draw_program(&mut self, program: &Program, command: &DrawCommand) -> Result<(), BackendError> {
        let mut bind_group_entries = Vec::new();
        if let Some(buffer) = &program.uniform_buffer {
            if !command.uniforms.is_empty() {
                self.queue.write_buffer(buffer, 0, command.uniforms);
            }
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: UNIFORM_BINDING,
                resource: buffer.as_entire_binding(),
            });
        }
        for binding in command.textures {
            let view = &self.textures.get(&binding.texture).ok_or(BackendError::UnknownTexture(binding.texture))?.view;
            let sampler = self.samplers.get(&binding.sampler).ok_or_else(|| BackendError::Device(format!("no sampler for {:?}", binding.sampler)))?;
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: binding.texture_binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: binding.sampler_binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        bind_group_entries.sort_by_key(|entry| entry.binding);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(command.label),
            layout: &program.bind_group_layout,
            entries: &bind_group_entries,
        });

        let view = match command.destination {
            RenderDestination::Canvas => self.canvas.as_ref().map(|c| &c.view).ok_or(BackendError::NoCanvas)?,
            RenderDestination::Texture(texture) => self.textures.get(&texture).map(|t| &t.view).ok_or(BackendError::UnknownTexture(texture))?,
        };
        let device = &self.device;
        let encoder = self
            .encoder
            .get_or_insert_with(|| device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("retroshade frame") }));

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(command.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        render_pass.set_pipeline(&program.pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        render_pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn max_samplers(&self) -> usize {
        let limits = self.device.limits();
        limits.max_sampled_textures_per_shader_stage.min(limits.max_samplers_per_shader_stage) as usize
    }

    fn canvas_size(&self) -> Option<Size> {
        self.canvas.as_ref().map(|c| c.size)
    }

    fn compile_program(&mut self, pass: &CompiledPass, output: ProgramOutput) -> Result<ProgramId, BackendError> {
        let format = match output {
            ProgramOutput::Texture(format) => texture_format(format),
            ProgramOutput::Canvas => self.canvas_format,
        };
        let label = format!("pass {}", pass.pass_index);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let program = self.create_program(&label, &pass.vertex_source, &pass.fragment_source, pass.uniforms.size, pass.samplers.len(), format);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::Compile {
                pass_index: pass.pass_index,
                message: error.to_string(),
            });
        }

        let id = ProgramId(self.next_id());
        self.programs.insert(id, program);
        tracing::debug!(pass = pass.pass_index, ?format, "compiled program");
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if let Some(buffer) = self.programs.remove(&program).and_then(|p| p.uniform_buffer) {
            buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, BackendError> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.size.width.max(1),
                height: desc.size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.next_id());
        self.textures.insert(id, TextureEntry { texture, view, owned: true });
        Ok(id)
    }

    fn write_texture(&mut self, texture: TextureId, rgba8: &[u8]) -> Result<(), BackendError> {
        let entry = self.textures.get(&texture).ok_or(BackendError::UnknownTexture(texture))?;
        let format = entry.texture.format();
        if !matches!(format, wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb) {
            return Err(BackendError::Device(format!("cannot write RGBA8 texels into a {format:?} texture")));
        }
        let (width, height) = (entry.texture.width(), entry.texture.height());
        let expected = width as usize * height as usize * 4;
        if rgba8.len() != expected {
            return Err(BackendError::DataSize { expected, actual: rgba8.len() });
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba8,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(&texture).filter(|e| e.owned) {
            entry.texture.destroy();
        }
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<(), BackendError> {
        for binding in command.textures {
            self.ensure_sampler(binding.sampler);
        }
        // Taken out of the map while drawing so the rest of the backend stays borrowable
        let program = self.programs.remove(&command.program).ok_or(BackendError::UnknownProgram(command.program))?;
        let result = self.draw_program(&program, command);
        self.programs.insert(command.program, program);
        result
    }

    fn blit(&mut self, source: TextureId, destination: RenderDestination) -> Result<(), BackendError> {
        let format = self.destination_format(destination)?;
        let program = match self.blit_programs.remove(&format) {
            Some(program) => program,
            None => {
                let program = self.create_program(&format!("blit {format:?}"), BLIT_VERTEX_SHADER, BLIT_FRAGMENT_SHADER, MVP_SIZE, 1, format);
                if let Some(buffer) = &program.uniform_buffer {
                    self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&MVP));
                }
                program
            }
        };
        let (texture_binding, sampler_binding) = sampler_bindings(0);
        let binding = TextureBinding {
            texture_binding,
            sampler_binding,
            texture: source,
            sampler: SamplerState {
                filter: FilterMode::Linear,
                wrap_mode: WrapMode::ClampToEdge,
            },
        };
        self.ensure_sampler(binding.sampler);

        let command = DrawCommand {
            label: &program.label,
            program: ProgramId(0),
            destination,
            uniforms: &[],
            textures: std::slice::from_ref(&binding),
        };
        let result = self.draw_program(&program, &command);
        self.blit_programs.insert(format, program);
        result
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        Ok(())
    }
}
