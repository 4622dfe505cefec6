//! # Periodic scheduling
//!
//! Runs a [`Periodic`] task on its own thread at a fixed period. The clock is
//! injected so that the timing can be replaced in tests, and the job is
//! stopped through a [`CancelToken`] which hands the task back to the caller.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of consecutive overruns after which a warning is raised for every
/// further overrun rather than just the first.
const OVERRUN_WARN_LIMIT: u64 = 10;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Source of time for a periodic job.
pub trait Clock: Send + 'static {
    /// Time elapsed since the clock's own epoch.
    fn now(&self) -> Duration;

    /// Block the calling thread for the given duration.
    fn sleep(&self, duration: Duration);
}

/// A task which is executed once per period.
pub trait Periodic: Send + 'static {
    /// Execute one cycle of the task.
    fn tick(&mut self);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Wall clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

/// Shared flag used to request that a job stops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

/// A task running on a dedicated thread at a fixed period.
#[derive(Debug)]
pub struct PeriodicJob<T> {
    name: String,
    cancel: CancelToken,
    handle: JoinHandle<T>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors that can occur when managing a periodic job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Could not spawn the thread for job {0}: {1}")]
    SpawnError(String, std::io::Error),

    #[error("The thread for job {0} panicked")]
    Panicked(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl<T: Periodic> PeriodicJob<T> {
    /// Spawn a new job which will call `task.tick()` every `period`.
    pub fn spawn<C: Clock>(
        name: &str,
        period: Duration,
        clock: C,
        task: T,
    ) -> Result<Self, JobError> {
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&thread_name, period, clock, task, thread_cancel))
            .map_err(|e| JobError::SpawnError(name.to_string(), e))?;

        info!("Job {} started with a period of {:?}", name, period);

        Ok(Self {
            name: name.to_string(),
            cancel,
            handle,
        })
    }

    /// Get a token which can be used to stop the job from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop the job, waiting for the current cycle to complete, and return
    /// the task.
    pub fn stop(self) -> Result<T, JobError> {
        self.cancel.cancel();

        let name = &self.name;
        let task = self
            .handle
            .join()
            .map_err(|_| JobError::Panicked(name.clone()))?;

        info!("Job {} stopped", name);

        Ok(task)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn run<T: Periodic, C: Clock>(
    name: &str,
    period: Duration,
    clock: C,
    mut task: T,
    cancel: CancelToken,
) -> T {
    let mut num_consec_overruns = 0u64;

    while !cancel.is_cancelled() {
        let cycle_start = clock.now();

        task.tick();

        let cycle_dur = clock.now().checked_sub(cycle_start).unwrap_or_default();

        match period.checked_sub(cycle_dur) {
            Some(d) => {
                num_consec_overruns = 0;
                clock.sleep(d);
            }
            None => {
                num_consec_overruns += 1;

                if num_consec_overruns == 1 || num_consec_overruns > OVERRUN_WARN_LIMIT {
                    warn!(
                        "Job {} overran by {:.06} s ({} consecutive)",
                        name,
                        (cycle_dur - period).as_secs_f64(),
                        num_consec_overruns
                    );
                }
            }
        }
    }

    debug!("Job {} exiting", name);

    task
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{
        atomic::{AtomicU64, AtomicUsize},
        Arc,
    };

    /// Clock which only advances when slept on.
    #[derive(Clone, Default)]
    struct ManualClock {
        now_ns: Arc<AtomicU64>,
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            Duration::from_nanos(self.now_ns.load(Ordering::SeqCst))
        }

        fn sleep(&self, duration: Duration) {
            self.now_ns
                .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
            thread::yield_now();
        }
    }

    struct Counter {
        ticks: Arc<AtomicUsize>,
    }

    impl Periodic for Counter {
        fn tick(&mut self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_job_ticks_until_stopped() {
        let clock = ManualClock::default();
        let ticks = Arc::new(AtomicUsize::new(0));

        let job = PeriodicJob::spawn(
            "test_job",
            Duration::from_millis(10),
            clock.clone(),
            Counter {
                ticks: ticks.clone(),
            },
        )
        .unwrap();

        let mut waited = 0;
        while ticks.load(Ordering::SeqCst) < 10 && waited < 5000 {
            thread::sleep(Duration::from_millis(1));
            waited += 1;
        }

        let task = job.stop().unwrap();
        let num_ticks = task.ticks.load(Ordering::SeqCst);

        assert!(num_ticks >= 10);

        // Every completed cycle slept for exactly one period on the manual clock
        assert!(clock.now() >= Duration::from_millis(10) * (num_ticks as u32 - 1));
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(other.is_cancelled());
    }
}
