use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver};
use tracing::{error, info, warn};

use super::unit::{spawn_unit, SignalKind, UnitSignal, UnitState};
use super::workload::Workload;
use crate::status::{RunStatus, StatusBoard};

/// Folds unit signals into the verdict of one run.
///
/// Counting is by unit, not by message: a unit is credited once no matter
/// how many times it reports, and nothing is credited after the run has
/// settled.
#[derive(Debug)]
pub struct PoolTracker {
    units: Vec<UnitState>,
    completed: usize,
    failure: Option<String>,
    settled: bool,
}

impl PoolTracker {
    pub fn new(size: usize) -> Self {
        Self {
            units: vec![UnitState::Spawned; size],
            completed: 0,
            failure: None,
            settled: false,
        }
    }

    pub fn size(&self) -> usize {
        self.units.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn unit_state(&self, unit: usize) -> Option<UnitState> {
        self.units.get(unit).copied()
    }

    pub fn mark_running(&mut self, unit: usize) {
        if let Some(state) = self.units.get_mut(unit) {
            if *state == UnitState::Spawned {
                *state = UnitState::Running;
            }
        }
    }

    /// Applies one signal. Returns the terminal status the first time the
    /// run settles and `None` for every other signal.
    pub fn apply(&mut self, signal: &UnitSignal) -> Option<RunStatus> {
        if self.settled {
            return None;
        }
        let state = self.units.get_mut(signal.unit)?;
        if matches!(*state, UnitState::Completed | UnitState::Failed) {
            return None;
        }
        match &signal.kind {
            SignalKind::Done => {
                *state = UnitState::Completed;
                self.completed += 1;
                if self.completed == self.units.len() {
                    self.settled = true;
                    return Some(RunStatus::Completed);
                }
                None
            }
            SignalKind::Fault(reason) => {
                *state = UnitState::Failed;
                self.failure = Some(reason.clone());
                self.settled = true;
                Some(RunStatus::Failed(reason.clone()))
            }
        }
    }
}

/// Counters of a run, readable from outside the coordinator.
#[derive(Debug, Default)]
pub struct PoolCounters {
    completed: AtomicUsize,
    failed: AtomicBool,
}

impl PoolCounters {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

/// The units of one compute run plus the coordinator folding their signals.
///
/// Unit and coordinator threads are detached as soon as they are spawned.
/// Dropping the pool raises the stop flag so a well-behaved workload winds
/// down on its own.
pub struct WorkerPool {
    size: usize,
    generation: u64,
    stop: Arc<AtomicBool>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Spawns `size` units and the coordinator for run `generation`.
    pub fn launch(
        size: usize,
        workload: Arc<dyn Workload>,
        board: Arc<StatusBoard>,
        generation: u64,
    ) -> Self {
        let (tx, rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(PoolCounters::default());
        let mut tracker = PoolTracker::new(size);

        for unit in 0..size {
            match spawn_unit(unit, Arc::clone(&workload), Arc::clone(&stop), tx.clone()) {
                Ok(_) => tracker.mark_running(unit),
                Err(err) => {
                    // the run is lost anyway, no point spawning the rest
                    let _ = tx.send(UnitSignal::fault(
                        unit,
                        format!("unit {} could not start: {}", unit, err),
                    ));
                    break;
                }
            }
        }
        drop(tx);

        let spawned = {
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&counters);
            let board = Arc::clone(&board);
            thread::Builder::new()
                .name(format!("burn-coordinator-{}", generation))
                .spawn(move || coordinate(rx, tracker, &stop, &counters, &board, generation))
        };
        if let Err(err) = spawned {
            error!(%err, "compute coordinator could not start");
            stop.store(true, Ordering::SeqCst);
            counters.failed.store(true, Ordering::SeqCst);
            board.publish(
                generation,
                RunStatus::Failed(format!("coordinator could not start: {}", err)),
            );
        }

        Self {
            size,
            generation,
            stop,
            counters,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.counters
    }

    /// Tells every unit to stop and lets go of them without waiting.
    pub fn abandon(self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn coordinate(
    signals: Receiver<UnitSignal>,
    mut tracker: PoolTracker,
    stop: &AtomicBool,
    counters: &PoolCounters,
    board: &StatusBoard,
    generation: u64,
) {
    // ends early once every unit has hung up without settling (stopped run)
    for signal in signals.iter() {
        let before = tracker.completed();
        let verdict = tracker.apply(&signal);
        if tracker.completed() > before {
            counters.completed.fetch_add(1, Ordering::SeqCst);
        }
        match verdict {
            Some(RunStatus::Completed) => {
                info!(units = tracker.size(), generation, "compute run completed");
                board.publish(generation, RunStatus::Completed);
                return;
            }
            Some(status @ RunStatus::Failed(_)) => {
                warn!(
                    unit = signal.unit,
                    completed = tracker.completed(),
                    generation,
                    "compute run failed, abandoning remaining units"
                );
                counters.failed.store(true, Ordering::SeqCst);
                stop.store(true, Ordering::SeqCst);
                board.publish(generation, status);
                return;
            }
            _ => {}
        }
    }
}
