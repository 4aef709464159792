//! The seam between the render loop and a concrete graphics API.
//!
//! Handles are plain ids owned by the context that issued them. A render
//! session keeps its handles and hands them back on every call; nothing else
//! ever sees them.

use crate::error::{GpuError, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Where a uniform lives: bind group and binding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub group: u32,
    pub binding: u32,
}

/// Operations a render session needs from a graphics API.
pub trait GraphicsContext: Send {
    fn compile_shader(&mut self, stage: Stage, source: &str) -> Result<ShaderId, GpuError>;

    fn delete_shader(&mut self, shader: ShaderId);

    /// Links two compiled stages. Both shader ids are consumed, even when
    /// linking fails.
    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId)
        -> Result<ProgramId, GpuError>;

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Uploads a static buffer of 2D positions feeding `attribute`.
    fn create_vertex_buffer(
        &mut self,
        program: ProgramId,
        attribute: u32,
        vertices: &[[f32; 2]],
    ) -> Result<BufferId, GpuError>;

    fn clear(&mut self, color: [f32; 4]);

    fn set_uniform_f32(&mut self, program: ProgramId, location: UniformLocation, value: f32);

    /// Draws `vertex_count` vertices of `buffer` as a triangle strip.
    fn draw_strip(
        &mut self,
        program: ProgramId,
        buffer: BufferId,
        vertex_count: u32,
    ) -> Result<(), GpuError>;

    fn delete_buffer(&mut self, buffer: BufferId);

    fn delete_program(&mut self, program: ProgramId);
}

/// What the render loop needs from whoever hosts it.
pub trait HostSurface: Send + 'static {
    /// Hands out the graphics context, or `None` if the host has none.
    fn acquire_context(&mut self) -> Option<Box<dyn GraphicsContext>>;

    /// Blocks until the host is ready for the next frame.
    fn request_frame(&mut self);
}
