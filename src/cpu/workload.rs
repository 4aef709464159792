use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};

/// Ceiling used for production runs. Never reached in practice, so a unit
/// keeps its core busy until it is stopped or the process exits.
pub const UNBOUNDED: u64 = u64::MAX;

/// How many candidates a unit tests between two looks at its stop flag.
pub const STOP_CHECK_INTERVAL: u64 = 1024;

/// How a workload run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Finished,
    Interrupted,
}

/// CPU-bound work executed by one isolated unit.
///
/// `stop` is the only thing a unit shares with the rest of the pool. It is
/// read-only from the unit's side and a well-behaved workload polls it now
/// and then.
pub trait Workload: Send + Sync + 'static {
    fn run(&self, unit: usize, stop: &AtomicBool) -> Flow;
}

/// Trial-division prime search from 2 up to (but excluding) a ceiling.
#[derive(Debug, Clone, Copy)]
pub struct PrimeSearch {
    ceiling: u64,
}

impl PrimeSearch {
    pub fn new(ceiling: u64) -> Self {
        Self { ceiling }
    }

    pub fn unbounded() -> Self {
        Self::new(UNBOUNDED)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Counts primes below the ceiling, or returns `None` once `stop` is
    /// raised. Primes are counted rather than kept so memory stays flat
    /// however long the search runs.
    pub fn count_primes(&self, stop: &AtomicBool) -> Option<u64> {
        let mut found = 0u64;
        let mut candidate = 2u64;
        while candidate < self.ceiling {
            if candidate % STOP_CHECK_INTERVAL == 0 && stop.load(Ordering::Relaxed) {
                return None;
            }
            if is_prime(black_box(candidate)) {
                found += 1;
            }
            candidate += 1;
        }
        Some(found)
    }
}

impl Default for PrimeSearch {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Workload for PrimeSearch {
    fn run(&self, _unit: usize, stop: &AtomicBool) -> Flow {
        match self.count_primes(stop) {
            Some(found) => {
                black_box(found);
                Flow::Finished
            }
            None => Flow::Interrupted,
        }
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut divisor = 2u64;
    // divisor <= n / divisor avoids overflowing divisor * divisor near u64::MAX
    while divisor <= n / divisor {
        if n % divisor == 0 {
            return false;
        }
        divisor += 1;
    }
    true
}
