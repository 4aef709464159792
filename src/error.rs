use std::fmt;

use thiserror::Error;

/// Reasons a compute run could not be started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComputeError {
    #[error("a compute run is already in progress")]
    AlreadyRunning,
    #[error("a compute run needs at least one worker")]
    NoWorkers,
}

/// Shader stage a compile diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => write!(f, "vertex"),
            Stage::Fragment => write!(f, "fragment"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("no graphics context could be obtained from the host surface")]
    ContextUnavailable,
    #[error("{stage} shader failed to compile:\n{diagnostic}")]
    Compile { stage: Stage, diagnostic: String },
    #[error("shader program failed to link: {0}")]
    Link(String),
    #[error("shader program has no binding named `{0}`")]
    MissingBinding(String),
    #[error("graphics device error: {0}")]
    Device(String),
    #[error("a render session is already running")]
    AlreadyRunning,
}
