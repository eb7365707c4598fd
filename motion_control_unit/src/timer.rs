//! Cycle timer: paces the pipeline through a shared [`CycleEvent`].
//!
//! Two strategies implement [`CycleTimer`]:
//!
//! | Strategy | Period source | start / adjust / stop |
//! |----------|---------------|------------------------|
//! | [`SoftwareTimer`] | dedicated sleeping thread | supported |
//! | [`LinkLayerTimer`] | engine start-of-cycle callback | `NotSupported` |
//!
//! The pipeline only ever sees the event and calls [`CycleEvent::wait`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use motion_common::consts::{
    TIMER_HANDSHAKE_TIMEOUT_MS, TIMER_PERIOD_NS_MIN, TIMER_SLEEP_SLICE_MS_MIN,
};
use motion_common::engine::{CycleHook, EngineError, MasterEngine};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cycle::{RtParams, rt_thread_setup};

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimerError {
    #[error("timer thread did not report running within {0:?}")]
    StartupTimeout(Duration),

    #[error("timer thread did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("timer is not running")]
    NotRunning,

    #[error("timer is already running")]
    AlreadyRunning,

    #[error("not supported by {0} timing")]
    NotSupported(&'static str),

    #[error("failed to spawn timer thread: {0}")]
    Spawn(String),

    #[error("cycle hook registration failed: {0}")]
    Hook(#[from] EngineError),
}

// ─── Cycle Event ────────────────────────────────────────────────────

/// Auto-reset event: one `signal` releases one `wait`.
///
/// Signals raised while nobody waits coalesce into one pending wake-up.
#[derive(Debug, Default)]
pub struct CycleEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl CycleEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Block until signaled or `timeout` elapses. Returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }
}

// ─── Strategy trait ─────────────────────────────────────────────────

/// Periodic wake-up source.
pub trait CycleTimer: Send {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Start the source and block until it reports running.
    fn start(&mut self, period: Duration) -> Result<(), TimerError>;

    /// Change the period by `permille` relative to the period given to `start`.
    fn adjust(&mut self, permille: i32) -> Result<(), TimerError>;

    /// Stop the source and block until it reports stopped.
    fn stop(&mut self) -> Result<(), TimerError>;

    fn is_running(&self) -> bool;

    /// Event signaled once per cycle.
    fn event(&self) -> Arc<CycleEvent>;
}

// ─── Software strategy ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct TimerShared {
    period_ns: AtomicU64,
    running: AtomicBool,
    shutdown: AtomicBool,
}

/// Sleep-driven timer thread.
pub struct SoftwareTimer {
    event: Arc<CycleEvent>,
    shared: Arc<TimerShared>,
    original_ns: u64,
    rt: Option<RtParams>,
    handshake_timeout: Duration,
    thread: Option<JoinHandle<()>>,
}

impl SoftwareTimer {
    pub fn new() -> Self {
        Self {
            event: Arc::new(CycleEvent::new()),
            shared: Arc::new(TimerShared::default()),
            original_ns: 0,
            rt: None,
            handshake_timeout: Duration::from_millis(TIMER_HANDSHAKE_TIMEOUT_MS),
            thread: None,
        }
    }

    /// Elevate the timer thread with these RT parameters.
    pub fn with_rt(mut self, rt: RtParams) -> Self {
        self.rt = Some(rt);
        self
    }

    /// Current (possibly adjusted) period.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.shared.period_ns.load(Ordering::Acquire))
    }

    fn wait_for(&self, running: bool) -> bool {
        let deadline = Instant::now() + self.handshake_timeout;
        while self.shared.running.load(Ordering::Acquire) != running {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Default for SoftwareTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep slice for a period: whole milliseconds, never below the minimum slice.
fn sleep_slice(period_ns: u64) -> Duration {
    Duration::from_millis((period_ns / 1_000_000).max(TIMER_SLEEP_SLICE_MS_MIN))
}

fn timer_loop(shared: Arc<TimerShared>, event: Arc<CycleEvent>, rt: Option<RtParams>) {
    if let Some(rt) = rt {
        if let Err(e) = rt_thread_setup(&rt) {
            warn!("timer thread RT setup failed: {e}");
        }
    }
    shared.running.store(true, Ordering::Release);
    while !shared.shutdown.load(Ordering::Acquire) {
        thread::sleep(sleep_slice(shared.period_ns.load(Ordering::Acquire)));
        event.signal();
    }
    shared.running.store(false, Ordering::Release);
}

impl CycleTimer for SoftwareTimer {
    fn name(&self) -> &'static str {
        "software"
    }

    fn start(&mut self, period: Duration) -> Result<(), TimerError> {
        if self.thread.is_some() {
            return Err(TimerError::AlreadyRunning);
        }
        let period_ns = u64::try_from(period.as_nanos())
            .unwrap_or(u64::MAX)
            .max(TIMER_PERIOD_NS_MIN);
        self.original_ns = period_ns;
        // Fresh state per start: a thread detached by an earlier failed start
        // keeps its own shutdown flag.
        self.shared = Arc::new(TimerShared::default());
        self.shared.period_ns.store(period_ns, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let event = Arc::clone(&self.event);
        let rt = self.rt;
        let handle = thread::Builder::new()
            .name("cycle-timer".into())
            .spawn(move || timer_loop(shared, event, rt))
            .map_err(|e| TimerError::Spawn(e.to_string()))?;
        self.thread = Some(handle);

        if !self.wait_for(true) {
            self.shared.shutdown.store(true, Ordering::Release);
            // Detached; it exits on its first wake-up.
            self.thread = None;
            return Err(TimerError::StartupTimeout(self.handshake_timeout));
        }
        info!(period_ns, "software cycle timer running");
        Ok(())
    }

    fn adjust(&mut self, permille: i32) -> Result<(), TimerError> {
        if !self.is_running() {
            return Err(TimerError::NotRunning);
        }
        let original = self.original_ns as i128;
        let adjusted = (original + original * permille as i128 / 1000)
            .clamp(TIMER_PERIOD_NS_MIN as i128, u64::MAX as i128) as u64;
        self.shared.period_ns.store(adjusted, Ordering::Release);
        debug!(permille, period_ns = adjusted, "cycle period adjusted");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TimerError> {
        if !self.is_running() {
            return Err(TimerError::NotRunning);
        }
        self.shared.shutdown.store(true, Ordering::Release);
        if !self.wait_for(false) {
            // Leave the thread detached; it exits on its next wake-up.
            self.thread = None;
            return Err(TimerError::ShutdownTimeout(self.handshake_timeout));
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        info!("software cycle timer stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn event(&self) -> Arc<CycleEvent> {
        Arc::clone(&self.event)
    }
}

impl Drop for SoftwareTimer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

// ─── Link-layer strategy ────────────────────────────────────────────

/// Cycle boundaries signaled by the engine's link layer.
pub struct LinkLayerTimer {
    event: Arc<CycleEvent>,
}

impl LinkLayerTimer {
    /// Register the start-of-cycle callback with `engine`.
    pub fn register(engine: &dyn MasterEngine) -> Result<Self, TimerError> {
        let timer = Self {
            event: Arc::new(CycleEvent::new()),
        };
        engine.register_cycle_hook(timer.hook())?;
        info!(engine = engine.name(), "link-layer cycle hook registered");
        Ok(timer)
    }

    /// Callback that signals the cycle event.
    pub fn hook(&self) -> CycleHook {
        let event = Arc::clone(&self.event);
        Arc::new(move || event.signal())
    }
}

impl CycleTimer for LinkLayerTimer {
    fn name(&self) -> &'static str {
        "link-layer"
    }

    fn start(&mut self, _period: Duration) -> Result<(), TimerError> {
        Err(TimerError::NotSupported("link-layer"))
    }

    fn adjust(&mut self, _permille: i32) -> Result<(), TimerError> {
        Err(TimerError::NotSupported("link-layer"))
    }

    fn stop(&mut self) -> Result<(), TimerError> {
        Err(TimerError::NotSupported("link-layer"))
    }

    fn is_running(&self) -> bool {
        true
    }

    fn event(&self) -> Arc<CycleEvent> {
        Arc::clone(&self.event)
    }
}
