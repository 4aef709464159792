//! Headless wgpu device drawing into an offscreen texture.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;

use super::context::{BufferId, GraphicsContext, HostSurface, ProgramId, ShaderId, UniformLocation};
use super::shader::{self, CompiledStage, ProgramLayout};
use crate::error::{GpuError, Stage};

pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Viewport the fragment program is centred on.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

const UNIFORM_SLOT_SIZE: u64 = 16;
const POSITION_STRIDE: u64 = std::mem::size_of::<[f32; 2]>() as u64;

struct GpuProgram {
    layout: ProgramLayout,
    pipeline: wgpu::RenderPipeline,
    bind_groups: Vec<wgpu::BindGroup>,
    uniforms: HashMap<UniformLocation, wgpu::Buffer>,
    /// vertex buffer slot of each attribute location
    slots: HashMap<u32, u32>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    slot: u32,
    vertices: u32,
}

pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    _texture: wgpu::Texture,
    target: wgpu::TextureView,
    clear_color: wgpu::Color,
    next_id: u32,
    shaders: HashMap<ShaderId, CompiledStage>,
    programs: HashMap<ProgramId, GpuProgram>,
    buffers: HashMap<BufferId, GpuBuffer>,
}

impl WgpuContext {
    /// Opens the first high-performance adapter without a window.
    pub fn headless(width: u32, height: u32) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| GpuError::Device("no suitable graphics adapter".to_string()))?;

        let info = adapter.get_info();
        info!(adapter = %info.name, backend = ?info.backend, "graphics adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("burnin"),
                ..Default::default()
            },
            None,
        ))
        .map_err(|err| GpuError::Device(err.to_string()))?;

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            error!(%err, "uncaptured graphics error");
        }));

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("burnin-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let target = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            device,
            queue,
            _texture: texture,
            target,
            clear_color: wgpu::Color::BLACK,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
        })
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn scoped<T>(&self, make: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = make(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    fn build_program(&self, layout: ProgramLayout) -> Result<GpuProgram, GpuError> {
        // one bind group per group index, groups must be contiguous from zero
        let mut groups: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for loc in layout.uniform_locations() {
            groups.entry(loc.group).or_default().push(loc.binding);
        }
        let group_count = groups.keys().next_back().map_or(0, |last| last + 1);

        let mut uniforms = HashMap::new();
        let mut group_layouts = Vec::with_capacity(group_count as usize);
        let mut bind_groups = Vec::with_capacity(group_count as usize);
        for group in 0..group_count {
            let bindings = groups.get(&group).cloned().unwrap_or_default();
            let entries: Vec<_> = bindings
                .iter()
                .map(|&binding| wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let group_layout = self
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("burnin-uniforms"),
                    entries: &entries,
                });

            let buffers: Vec<(u32, wgpu::Buffer)> = bindings
                .iter()
                .map(|&binding| {
                    let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("burnin-uniform"),
                        size: UNIFORM_SLOT_SIZE,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    (binding, buffer)
                })
                .collect();
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("burnin-uniforms"),
                layout: &group_layout,
                entries: &buffers
                    .iter()
                    .map(|(binding, buffer)| wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: buffer.as_entire_binding(),
                    })
                    .collect::<Vec<_>>(),
            });

            for (binding, buffer) in buffers {
                uniforms.insert(UniformLocation { group, binding }, buffer);
            }
            group_layouts.push(group_layout);
            bind_groups.push(bind_group);
        }

        let mut attribute_locations: Vec<u32> = layout.attribute_locations();
        attribute_locations.sort_unstable();
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = attribute_locations
            .iter()
            .map(|&location| {
                [wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 0,
                    shader_location: location,
                }]
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = attributes
            .iter()
            .map(|attribute| wgpu::VertexBufferLayout {
                array_stride: POSITION_STRIDE,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();
        let slots = attribute_locations
            .iter()
            .enumerate()
            .map(|(slot, &location)| (location, slot as u32))
            .collect();

        let pipeline = self
            .scoped(|device| {
                let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("burnin-vertex"),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(layout.vertex().source())),
                });
                let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("burnin-fragment"),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(layout.fragment().source())),
                });
                let group_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("burnin-program"),
                        bind_group_layouts: &group_refs,
                        push_constant_ranges: &[],
                    });
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("burnin-program"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex,
                        entry_point: Some(layout.vertex().entry_point()),
                        compilation_options: Default::default(),
                        buffers: &vertex_buffers,
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleStrip,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment,
                        entry_point: Some(layout.fragment().entry_point()),
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: TARGET_FORMAT,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    multiview: None,
                    cache: None,
                })
            })
            .map_err(GpuError::Link)?;

        Ok(GpuProgram {
            layout,
            pipeline,
            bind_groups,
            uniforms,
            slots,
        })
    }
}

impl GraphicsContext for WgpuContext {
    fn compile_shader(&mut self, stage: Stage, source: &str) -> Result<ShaderId, GpuError> {
        let compiled = shader::compile(stage, source)?;
        let id = ShaderId(self.next());
        self.shaders.insert(id, compiled);
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GpuError> {
        let vertex = self.shaders.remove(&vertex);
        let fragment = self.shaders.remove(&fragment);
        let (Some(vertex), Some(fragment)) = (vertex, fragment) else {
            return Err(GpuError::Link("unknown shader handle".to_string()));
        };
        let program = self.build_program(shader::link(vertex, fragment)?)?;
        let id = ProgramId(self.next());
        self.programs.insert(id, program);
        debug!(program = id.0, "program linked");
        Ok(id)
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program)?.layout.attribute(name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs.get(&program)?.layout.uniform(name)
    }

    fn create_vertex_buffer(
        &mut self,
        program: ProgramId,
        attribute: u32,
        vertices: &[[f32; 2]],
    ) -> Result<BufferId, GpuError> {
        let slot = self
            .programs
            .get(&program)
            .and_then(|p| p.slots.get(&attribute).copied())
            .ok_or_else(|| GpuError::MissingBinding(format!("attribute location {}", attribute)))?;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("burnin-quad"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let id = BufferId(self.next());
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                slot,
                vertices: vertices.len() as u32,
            },
        );
        Ok(id)
    }

    fn clear(&mut self, color: [f32; 4]) {
        let [r, g, b, a] = color.map(f64::from);
        self.clear_color = wgpu::Color { r, g, b, a };
    }

    fn set_uniform_f32(&mut self, program: ProgramId, location: UniformLocation, value: f32) {
        if let Some(buffer) = self
            .programs
            .get(&program)
            .and_then(|p| p.uniforms.get(&location))
        {
            self.queue.write_buffer(buffer, 0, bytemuck::bytes_of(&value));
        }
    }

    fn draw_strip(&mut self, program: ProgramId, buffer: BufferId, vertex_count: u32) -> Result<(), GpuError> {
        let program = self
            .programs
            .get(&program)
            .ok_or_else(|| GpuError::Device("unknown program".to_string()))?;
        let vertices = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| GpuError::Device("unknown vertex buffer".to_string()))?;
        if vertex_count > vertices.vertices {
            return Err(GpuError::Device("vertex buffer too small".to_string()));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("burnin-frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("burnin-frame"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&program.pipeline);
            for (group, bind_group) in program.bind_groups.iter().enumerate() {
                pass.set_bind_group(group as u32, bind_group, &[]);
            }
            pass.set_vertex_buffer(vertices.slot, vertices.buffer.slice(..));
            pass.draw(0..vertex_count, 0..1);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.submit(Some(encoder.finish()));
        // waiting keeps one frame of work in flight at most
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(GpuError::Device(err.to_string())),
            None => Ok(()),
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(gpu) = self.buffers.remove(&buffer) {
            gpu.buffer.destroy();
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(gpu) = self.programs.remove(&program) {
            for buffer in gpu.uniforms.values() {
                buffer.destroy();
            }
        }
    }
}

/// Production host: a headless device and a fixed-rate frame pacer.
pub struct OffscreenSurface {
    width: u32,
    height: u32,
    frame_interval: Duration,
    next_frame: Option<Instant>,
}

impl OffscreenSurface {
    pub fn new(width: u32, height: u32, frames_per_second: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_secs(1) / frames_per_second.max(1),
            next_frame: None,
        }
    }
}

impl Default for OffscreenSurface {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, 60)
    }
}

impl HostSurface for OffscreenSurface {
    fn acquire_context(&mut self) -> Option<Box<dyn GraphicsContext>> {
        match WgpuContext::headless(self.width, self.height) {
            Ok(ctx) => Some(Box::new(ctx)),
            Err(err) => {
                warn!(%err, "graphics context unavailable");
                None
            }
        }
    }

    fn request_frame(&mut self) {
        let now = Instant::now();
        let due = self.next_frame.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // a slow frame pushes the schedule instead of bursting to catch up
        self.next_frame = Some(due.max(now) + self.frame_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_spaces_frames() {
        let mut surface = OffscreenSurface::new(8, 8, 200);
        let start = Instant::now();
        for _ in 0..5 {
            surface.request_frame();
        }
        // first request is immediate, the next four wait one interval each
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    #[ignore = "needs a graphics adapter"]
    fn headless_context_draws_a_frame() {
        use crate::gpu::RenderSession;

        let ctx = WgpuContext::headless(8, 8).expect("no graphics adapter");
        let mut session = RenderSession::open(Box::new(ctx)).unwrap();
        assert_eq!(session.bindings().vertex_count, 4);
        let first = session.frame_step().unwrap();
        let second = session.frame_step().unwrap();
        assert!(second >= first);
        assert_eq!(session.frames(), 2);
        session.release();
    }

    #[test]
    fn zero_rate_is_clamped() {
        let surface = OffscreenSurface::new(8, 8, 0);
        assert_eq!(surface.frame_interval, Duration::from_secs(1));
    }
}
