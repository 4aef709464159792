//! Run status shared by both engines and the board that pushes it outward.

use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Coarse outcome of a stress run as seen by the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed(String),
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

struct Board {
    generation: u64,
    status: RunStatus,
    subscribers: Vec<Sender<RunStatus>>,
}

/// Holds the current status of one engine and fans every transition out to
/// subscribers.
///
/// Each run gets a generation number. Publishers from a run that has since
/// been replaced are ignored, so a stale coordinator can never overwrite the
/// status of a newer run.
pub struct StatusBoard {
    inner: Mutex<Board>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Board {
                generation: 0,
                status: RunStatus::Idle,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn current(&self) -> RunStatus {
        self.inner.lock().status.clone()
    }

    /// Returns a stream of every transition published after this call.
    pub fn subscribe(&self) -> Receiver<RunStatus> {
        let (tx, rx) = unbounded();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Opens a new run and publishes `Running` for it, unless a run is
    /// already in progress. Returns the generation of the new run.
    pub fn begin(&self) -> Option<u64> {
        let mut board = self.inner.lock();
        if board.status.is_running() {
            return None;
        }
        board.generation += 1;
        Self::push(&mut board, RunStatus::Running);
        Some(board.generation)
    }

    /// Publishes `status` if `generation` is still the current run and the
    /// run has not already settled. Returns whether the transition was applied.
    pub fn publish(&self, generation: u64, status: RunStatus) -> bool {
        let mut board = self.inner.lock();
        if board.generation != generation
            || board.status.is_terminal()
            || board.status == status
        {
            return false;
        }
        Self::push(&mut board, status);
        true
    }

    /// Closes run `generation` for good: anything it publishes afterwards is
    /// ignored. A run that has not settled goes back to `Idle`; a settled
    /// one keeps its verdict. Returns whether `Idle` was published.
    pub fn retire(&self, generation: u64) -> bool {
        let mut board = self.inner.lock();
        if board.generation != generation {
            return false;
        }
        board.generation += 1;
        if !board.status.is_running() {
            return false;
        }
        Self::push(&mut board, RunStatus::Idle);
        true
    }

    /// Publishes a failure that happened before any run could begin.
    pub fn reject(&self, reason: String) {
        let mut board = self.inner.lock();
        board.generation += 1;
        Self::push(&mut board, RunStatus::Failed(reason));
    }

    fn push(board: &mut Board, status: RunStatus) {
        board.status = status.clone();
        board
            .subscribers
            .retain(|tx| tx.send(status.clone()).is_ok());
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
