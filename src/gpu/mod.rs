//! GPU saturation: a fragment program heavy enough to keep the shader cores
//! busy, redrawn every frame with a fresh time value until stopped.
//!
//! - `context` is the seam to a graphics API and to the host that paces frames.
//! - `shader` parses, validates and links WGSL stages with naga.
//! - `program` holds the fixed sources and the one-time setup.
//! - `render` owns the session and the frame loop.
//! - `wgpu_backend` is the production context, a headless wgpu device.

mod context;
mod program;
#[cfg(test)]
mod recording;
mod render;
mod shader;
mod wgpu_backend;

pub use context::{BufferId, GraphicsContext, HostSurface, ProgramId, ShaderId, UniformLocation};
pub use program::{
    initialize, initialize_with, ProgramBindings, FRAGMENT_SHADER, FULLSCREEN_QUAD,
    POSITION_ATTRIBUTE, TIME_UNIFORM, VERTEX_SHADER,
};
pub use render::{FrameClock, GraphicsEngine, RenderSession, CLEAR_COLOR};
pub use shader::{compile, link, CompiledStage, ProgramLayout};
pub use wgpu_backend::{OffscreenSurface, WgpuContext, DEFAULT_HEIGHT, DEFAULT_WIDTH, TARGET_FORMAT};
