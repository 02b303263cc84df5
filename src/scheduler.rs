use crate::engine::{EngineError, ReconciliationEngine};
use crate::store::MailStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_stop_signal(_: libc::c_int) {
    SIGNALLED.store(true, Ordering::Relaxed);
}

/// Cloneable cancellation handle checked between cycles and while sleeping.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    watch_process: bool,
}

impl StopSignal {
    pub fn new() -> Self {
        StopSignal::default()
    }

    /// A handle that also trips on SIGINT or SIGTERM.
    pub fn from_process_signals() -> Self {
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = handle_stop_signal as libc::sighandler_t;
            libc::sigemptyset(&mut sa.sa_mask);
            sa.sa_flags = libc::SA_RESTART;
            libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
            libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
        }
        StopSignal {
            flag: Arc::new(AtomicBool::new(false)),
            watch_process: true,
        }
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || (self.watch_process && SIGNALLED.load(Ordering::Relaxed))
    }
}

/// Runs reconciliation cycles on a fixed interval until stopped.
pub struct Scheduler {
    interval: Duration,
    stop: StopSignal,
    max_cycles: Option<u64>,
}

impl Scheduler {
    pub fn new(interval: Duration, stop: StopSignal) -> Self {
        Scheduler {
            interval,
            stop,
            max_cycles: None,
        }
    }

    /// Stop after `cycles` completed cycles.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Drive `engine` until the stop signal, the cycle cap, or a cycle error.
    /// The engine is shut down on every path out. Returns the number of
    /// completed cycles.
    pub fn run<S: MailStore>(
        &self,
        engine: &mut ReconciliationEngine<'_, S>,
    ) -> Result<u64, EngineError> {
        let result = self.run_cycles(engine);
        engine.shutdown();
        result
    }

    fn run_cycles<S: MailStore>(
        &self,
        engine: &mut ReconciliationEngine<'_, S>,
    ) -> Result<u64, EngineError> {
        let mut completed = 0;

        loop {
            if self.stop.is_stopped() {
                tracing::info!(completed, "Stop requested");
                return Ok(completed);
            }

            match engine.run_cycle() {
                Ok(_) => completed += 1,
                Err(e) if self.stop.is_stopped() => {
                    tracing::info!(error = %e, "Cycle interrupted by stop request");
                    return Ok(completed);
                }
                Err(e) => {
                    tracing::error!(error = %e, cycle = completed + 1, "Cycle failed, stopping");
                    return Err(e);
                }
            }

            if self.max_cycles.is_some_and(|max| completed >= max) {
                return Ok(completed);
            }

            if !self.sleep() {
                tracing::info!(completed, "Stop requested");
                return Ok(completed);
            }
        }
    }

    /// Sleep for one interval in short slices. Returns `false` if a stop was
    /// requested meanwhile.
    fn sleep(&self) -> bool {
        let deadline = Instant::now() + self.interval;
        loop {
            if self.stop.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
