//! Synthetic load for two subsystems: every CPU core through a pool of
//! isolated prime-search workers, and the graphics pipeline through a heavy
//! fragment program redrawn every frame.
//!
//! Both engines report through the same [`RunStatus`] and never share state.

pub mod cpu;
pub mod error;
pub mod gpu;
pub mod status;

pub use cpu::ComputeEngine;
pub use error::{ComputeError, GpuError, Stage};
pub use gpu::{GraphicsEngine, OffscreenSurface};
pub use status::{RunStatus, StatusBoard};
