use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use super::workload::{Flow, Workload};

/// Lifecycle of one worker unit as tracked by its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Spawned,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Done,
    Fault(String),
}

/// The one terminal message a unit sends to its coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSignal {
    pub unit: usize,
    pub kind: SignalKind,
}

impl UnitSignal {
    pub fn done(unit: usize) -> Self {
        Self {
            unit,
            kind: SignalKind::Done,
        }
    }

    pub fn fault(unit: usize, reason: impl Into<String>) -> Self {
        Self {
            unit,
            kind: SignalKind::Fault(reason.into()),
        }
    }
}

/// Runs `workload` for `unit`, turning a panic into a fault.
///
/// Returns `None` when the workload was interrupted: an abandoned unit stays
/// silent.
pub fn run_unit(unit: usize, workload: &dyn Workload, stop: &AtomicBool) -> Option<SignalKind> {
    match panic::catch_unwind(AssertUnwindSafe(|| workload.run(unit, stop))) {
        Ok(Flow::Finished) => Some(SignalKind::Done),
        Ok(Flow::Interrupted) => {
            debug!(unit, "unit interrupted");
            None
        }
        Err(payload) => {
            let reason = format!("unit {} panicked: {}", unit, panic_message(payload.as_ref()));
            warn!(unit, %reason, "unit fault");
            Some(SignalKind::Fault(reason))
        }
    }
}

/// Starts `unit` on its own OS thread. The thread owns its clone of the
/// workload and sends at most one signal on `signals`.
pub fn spawn_unit(
    unit: usize,
    workload: Arc<dyn Workload>,
    stop: Arc<AtomicBool>,
    signals: Sender<UnitSignal>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("burn-unit-{}", unit))
        .spawn(move || {
            if let Some(kind) = run_unit(unit, workload.as_ref(), &stop) {
                // the coordinator hangs up once the run has settled
                let _ = signals.send(UnitSignal { unit, kind });
            }
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
