//! In-memory graphics context for tests. Shaders go through the real WGSL
//! front end; drawing only records what would have been sent to a device.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::context::{BufferId, GraphicsContext, HostSurface, ProgramId, ShaderId, UniformLocation};
use super::shader::{self, CompiledStage, ProgramLayout};
use crate::error::{GpuError, Stage};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Clear([f32; 4]),
    Uniform(UniformLocation, f32),
    Draw { buffer: BufferId, vertex_count: u32 },
    DeleteShader(ShaderId),
    DeleteBuffer(BufferId),
    DeleteProgram(ProgramId),
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct RecordingContext {
    next_id: u32,
    shaders: HashMap<ShaderId, CompiledStage>,
    programs: HashMap<ProgramId, ProgramLayout>,
    buffers: HashMap<BufferId, usize>,
    draws_left: Option<usize>,
    log: CallLog,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            draws_left: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes every draw after the first `draws` fail like a lost device.
    pub fn fail_draw_after(mut self, draws: usize) -> Self {
        self.draws_left = Some(draws);
        self
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GraphicsContext for RecordingContext {
    fn compile_shader(&mut self, stage: Stage, source: &str) -> Result<ShaderId, GpuError> {
        let compiled = shader::compile(stage, source)?;
        let id = ShaderId(self.next());
        self.shaders.insert(id, compiled);
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
        self.log.lock().push(Call::DeleteShader(shader));
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GpuError> {
        let vertex = self.shaders.remove(&vertex);
        let fragment = self.shaders.remove(&fragment);
        let (Some(vertex), Some(fragment)) = (vertex, fragment) else {
            return Err(GpuError::Link("unknown shader handle".to_string()));
        };
        let layout = shader::link(vertex, fragment)?;
        let id = ProgramId(self.next());
        self.programs.insert(id, layout);
        Ok(id)
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program)?.attribute(name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs.get(&program)?.uniform(name)
    }

    fn create_vertex_buffer(
        &mut self,
        program: ProgramId,
        _attribute: u32,
        vertices: &[[f32; 2]],
    ) -> Result<BufferId, GpuError> {
        if !self.programs.contains_key(&program) {
            return Err(GpuError::Device("unknown program".to_string()));
        }
        let id = BufferId(self.next());
        self.buffers.insert(id, vertices.len());
        Ok(id)
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.log.lock().push(Call::Clear(color));
    }

    fn set_uniform_f32(&mut self, _program: ProgramId, location: UniformLocation, value: f32) {
        self.log.lock().push(Call::Uniform(location, value));
    }

    fn draw_strip(&mut self, program: ProgramId, buffer: BufferId, vertex_count: u32) -> Result<(), GpuError> {
        if let Some(left) = self.draws_left.as_mut() {
            if *left == 0 {
                return Err(GpuError::Device("device lost".to_string()));
            }
            *left -= 1;
        }
        if !self.programs.contains_key(&program) {
            return Err(GpuError::Device("unknown program".to_string()));
        }
        match self.buffers.get(&buffer) {
            Some(len) if *len >= vertex_count as usize => {}
            _ => return Err(GpuError::Device("vertex buffer too small".to_string())),
        }
        self.log.lock().push(Call::Draw { buffer, vertex_count });
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        self.log.lock().push(Call::DeleteBuffer(buffer));
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.log.lock().push(Call::DeleteProgram(program));
    }
}

/// Host that hands out one recording context and ticks every millisecond.
pub struct RecordingSurface {
    context: Option<RecordingContext>,
    log: CallLog,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::with_context(RecordingContext::new())
    }

    pub fn with_context(context: RecordingContext) -> Self {
        let log = context.log();
        Self {
            context: Some(context),
            log,
        }
    }

    pub fn without_context() -> Self {
        Self {
            context: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }
}

impl HostSurface for RecordingSurface {
    fn acquire_context(&mut self) -> Option<Box<dyn GraphicsContext>> {
        self.context
            .take()
            .map(|ctx| Box::new(ctx) as Box<dyn GraphicsContext>)
    }

    fn request_frame(&mut self) {
        thread::sleep(Duration::from_millis(1));
    }
}
