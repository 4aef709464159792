//! CPU saturation: a pool of isolated worker threads running a prime search,
//! folded into one verdict per run.

mod engine;
mod pool;
mod unit;
mod workload;

pub use engine::{default_workers, ComputeEngine};
pub use pool::{PoolCounters, PoolTracker, WorkerPool};
pub use unit::{run_unit, spawn_unit, SignalKind, UnitSignal, UnitState};
pub use workload::{Flow, PrimeSearch, Workload, STOP_CHECK_INTERVAL, UNBOUNDED};
