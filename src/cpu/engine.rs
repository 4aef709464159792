use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::info;

use super::pool::WorkerPool;
use super::workload::{PrimeSearch, Workload};
use crate::error::ComputeError;
use crate::status::{RunStatus, StatusBoard};

/// Number of units used when the caller does not ask for a specific count:
/// one per hardware thread, never fewer than one.
pub fn default_workers() -> usize {
    num_cpus::get().max(1)
}

/// Saturates every core with isolated units and reports a single verdict per
/// run.
pub struct ComputeEngine {
    workload: Arc<dyn Workload>,
    board: Arc<StatusBoard>,
    pool: Mutex<Option<WorkerPool>>,
}

impl ComputeEngine {
    pub fn new() -> Self {
        Self::with_workload(PrimeSearch::unbounded())
    }

    pub fn with_workload(workload: impl Workload) -> Self {
        Self {
            workload: Arc::new(workload),
            board: Arc::new(StatusBoard::new()),
            pool: Mutex::new(None),
        }
    }

    /// Starts a run with `workers` units, or one per hardware thread.
    ///
    /// Refused while a run is in progress. A finished or failed run is
    /// discarded along with its pool, so counters always start from zero.
    pub fn start(&self, workers: Option<usize>) -> Result<usize, ComputeError> {
        let size = workers.unwrap_or_else(default_workers);
        if size == 0 {
            return Err(ComputeError::NoWorkers);
        }

        let mut slot = self.pool.lock();
        let generation = self.board.begin().ok_or(ComputeError::AlreadyRunning)?;
        if let Some(previous) = slot.take() {
            previous.abandon();
        }

        info!(workers = size, generation, "compute run starting");
        *slot = Some(WorkerPool::launch(
            size,
            Arc::clone(&self.workload),
            Arc::clone(&self.board),
            generation,
        ));
        Ok(size)
    }

    /// Abandons the current run. Units notice the stop flag at their next
    /// check; whatever they report afterwards is dropped.
    pub fn stop(&self) {
        if let Some(pool) = self.pool.lock().take() {
            if self.board.retire(pool.generation()) {
                info!(generation = pool.generation(), "compute run stopped");
            }
            pool.abandon();
        }
    }

    pub fn status(&self) -> RunStatus {
        self.board.current()
    }

    pub fn subscribe(&self) -> Receiver<RunStatus> {
        self.board.subscribe()
    }

    /// Units credited as completed in the current run.
    pub fn completed_units(&self) -> usize {
        self.pool
            .lock()
            .as_ref()
            .map_or(0, |pool| pool.counters().completed())
    }

    /// Whether a unit of the current run has faulted.
    pub fn run_failed(&self) -> bool {
        self.pool
            .lock()
            .as_ref()
            .is_some_and(|pool| pool.counters().failed())
    }

    /// Size of the current run's pool, if one exists.
    pub fn pool_size(&self) -> Option<usize> {
        self.pool.lock().as_ref().map(WorkerPool::size)
    }
}

impl Default for ComputeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ComputeEngine {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.get_mut().take() {
            pool.abandon();
        }
    }
}
