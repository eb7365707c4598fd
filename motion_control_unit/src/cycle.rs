//! Cyclic job pipeline and RT thread setup.
//!
//! ## Pipeline (one iteration per cycle event)
//! 1. `StartTask`
//! 2. `ProcessRxFrames`, overload tracking on unacknowledged frames
//! 3. DC log flush (if enabled)
//! 4. Application step: feedback in SAFE-OP; state machine and targets in OP
//! 5. `SendCycFrames` (evaluation expiry clears the run flag)
//! 6. `MasterTimer`, 7. `SendAcycFrames`, 8. `StopTask`
//! 9. Drain engine notifications
//!
//! "Invalid state" and "link disconnected" job results are expected while
//! the bus is coming up or down and are not logged. Every other job error is
//! logged and the cycle continues.
//!
//! ## RT Setup
//! With the `rt` feature: `mlockall`, stack prefault, CPU affinity and
//! `SCHED_FIFO`. Without it every call is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use motion_common::command::MotionCommand;
use motion_common::config::{DiagnosticsConfig, MotionConfig};
use motion_common::consts::{CYCLE_WAIT_TIMEOUT_MS, MAX_AXES, OVERLOAD_STEP};
use motion_common::engine::{EngineError, Job, JobOutcome, MasterEngine, MasterState, Notification};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::axis::AxisSet;
use crate::channel::AxisChannel;
use crate::timer::CycleEvent;
use crate::trajectory::ProfileParams;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle statistics of the pipeline body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStats {
    /// Total iterations executed.
    pub cycle_count: u64,
    /// Event waits that timed out.
    pub missed_wakeups: u64,
    /// Cycles with unacknowledged frames.
    pub overload_events: u64,
    /// Last body duration [ns].
    pub last_cycle_ns: i64,
    pub min_cycle_ns: i64,
    pub max_cycle_ns: i64,
    pub sum_cycle_ns: i64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            missed_wakeups: 0,
            overload_events: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, duration_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns = self.sum_cycle_ns.saturating_add(duration_ns);
    }

    /// Average body duration [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Errors during RT setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("RT setup error: {0}")]
    RtSetup(String),
}

/// Scheduling parameters for the pipeline and timer threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtParams {
    /// Pin to this core, if set.
    pub cpu_core: Option<usize>,
    /// `SCHED_FIFO` priority; 0 leaves the default policy.
    pub priority: i32,
}

impl Default for RtParams {
    fn default() -> Self {
        Self {
            cpu_core: None,
            priority: 0,
        }
    }
}

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch stack pages up front so the cycle never faults them in.
#[cfg(feature = "rt")]
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, aligned reference into a live stack array.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(not(feature = "rt"))]
fn prefault_stack() {}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: pid 0 targets the calling thread; `param` outlives the call.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Process-wide setup: lock memory.
pub fn rt_setup() -> Result<(), CycleError> {
    rt_mlockall()
}

/// Per-thread setup: prefault, pin, elevate.
pub fn rt_thread_setup(params: &RtParams) -> Result<(), CycleError> {
    prefault_stack();
    if let Some(cpu) = params.cpu_core {
        rt_set_affinity(cpu)?;
    }
    if params.priority > 0 {
        rt_set_scheduler(params.priority)?;
    }
    Ok(())
}

// ─── Job Pipeline ───────────────────────────────────────────────────

/// Fixed-order per-cycle driver of the engine and the axes.
pub struct JobPipeline {
    engine: Arc<dyn MasterEngine>,
    channel: Arc<AxisChannel>,
    run_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    axes: Option<AxisSet>,
    handoff: Option<Receiver<AxisSet>>,
    params: ProfileParams,
    diagnostics: DiagnosticsConfig,
    rt: Option<RtParams>,
    overload: u32,
    stats: CycleStats,
    commands: [Option<MotionCommand>; MAX_AXES],
}

impl JobPipeline {
    pub fn new(
        engine: Arc<dyn MasterEngine>,
        channel: Arc<AxisChannel>,
        config: &MotionConfig,
        run_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            channel,
            run_flag,
            running: Arc::new(AtomicBool::new(false)),
            axes: None,
            handoff: None,
            params: ProfileParams::new(&config.profile, config.cycle_time_us),
            diagnostics: config.diagnostics,
            rt: None,
            overload: 0,
            stats: CycleStats::new(),
            commands: [None; MAX_AXES],
        }
    }

    /// Receive the bound axis set from the supervisor once it is ready.
    pub fn with_handoff(mut self, rx: Receiver<AxisSet>) -> Self {
        self.handoff = Some(rx);
        self
    }

    pub fn with_rt(mut self, rt: RtParams) -> Self {
        self.rt = Some(rt);
        self
    }

    pub fn attach(&mut self, axes: AxisSet) {
        info!(axes = axes.len(), "axis set attached to pipeline");
        self.axes = Some(axes);
    }

    pub fn axes(&self) -> Option<&AxisSet> {
        self.axes.as_ref()
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn overload_counter(&self) -> u32 {
        self.overload
    }

    /// Cleared when [`run`](Self::run) returns.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Loop until `shutdown` is observed after a full iteration.
    pub fn run(mut self, event: Arc<CycleEvent>, shutdown: Arc<AtomicBool>) -> CycleStats {
        self.running.store(true, Ordering::Release);
        if let Some(rt) = self.rt {
            if let Err(e) = rt_thread_setup(&rt) {
                warn!("pipeline thread RT setup failed: {e}");
            }
        }
        let timeout = Duration::from_millis(CYCLE_WAIT_TIMEOUT_MS);
        info!("job pipeline running");

        loop {
            if !event.wait(timeout) {
                self.stats.missed_wakeups += 1;
                warn!(timeout_ms = CYCLE_WAIT_TIMEOUT_MS, "cycle event wait timed out");
            }
            self.run_cycle();
            if shutdown.load(Ordering::Acquire) {
                break;
            }
        }

        info!(
            cycles = self.stats.cycle_count,
            missed = self.stats.missed_wakeups,
            "job pipeline stopped"
        );
        self.running.store(false, Ordering::Release);
        self.stats
    }

    /// One full pipeline iteration.
    pub fn run_cycle(&mut self) {
        let t0 = Instant::now();
        self.poll_handoff();

        self.exec(Job::StartTask);

        if let Some(outcome) = self.exec(Job::ProcessRxFrames) {
            self.track_frames(outcome);
        }

        if self.diagnostics.dc_log {
            if let Some(msg) = self.engine.dc_log_message() {
                debug!(target: "dc", "{msg}");
            }
        }

        self.application_step();

        self.exec(Job::SendCycFrames);
        self.exec(Job::MasterTimer);
        self.exec(Job::SendAcycFrames);
        self.exec(Job::StopTask);

        self.engine.drain_notifications(&mut log_notification);

        self.stats
            .record(i64::try_from(t0.elapsed().as_nanos()).unwrap_or(i64::MAX));
    }

    fn poll_handoff(&mut self) {
        let Some(rx) = &self.handoff else { return };
        match rx.try_recv() {
            Ok(axes) => {
                self.handoff = None;
                self.attach(axes);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.handoff = None,
        }
    }

    fn exec(&self, job: Job) -> Option<JobOutcome> {
        match self.engine.exec_job(job) {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_tolerated() => None,
            Err(EngineError::EvaluationExpired) => {
                if self.run_flag.swap(false, Ordering::AcqRel) {
                    error!(job = job.name(), "evaluation license expired, shutting down");
                }
                None
            }
            Err(e) => {
                error!(job = job.name(), "job failed: {e}");
                None
            }
        }
    }

    fn track_frames(&mut self, outcome: JobOutcome) {
        if outcome.all_frames_processed {
            self.overload = self.overload.saturating_sub(1);
            return;
        }
        self.overload = self.overload.saturating_add(OVERLOAD_STEP);
        self.stats.overload_events += 1;
        if self.overload >= self.diagnostics.overload_warn_threshold {
            if self.overload < self.diagnostics.perf_dump_limit {
                if let Some(report) = self.engine.perf_report() {
                    info!(target: "perf", "{report}");
                }
            }
            warn!(
                counter = self.overload,
                "system overload: cycle time too short or large jitter"
            );
        } else {
            warn!(
                counter = self.overload,
                "not all previously sent frames were received (frame loss)"
            );
        }
    }

    fn application_step(&mut self) {
        let operational = match self.engine.state() {
            MasterState::Op => true,
            MasterState::SafeOp => false,
            _ => return,
        };
        let Some(axes) = self.axes.as_mut() else { return };
        let channel = &self.channel;
        let params = &self.params;
        let run_mode = channel.run_mode();

        // Pull commands and scales; keep the cached value on contention.
        for axis in axes.iter_mut() {
            if let Ok(slot) = channel.slot(axis.index) {
                if let Some(command) = slot.command.try_read() {
                    axis.command = command;
                }
                if let Some(scale) = slot.scale.try_read() {
                    axis.scale = scale;
                }
            }
            if let Some(c) = self.commands.get_mut(axis.index) {
                *c = axis.command;
            }
        }
        if operational {
            let n = axes.len().min(MAX_AXES);
            channel.derive_requests(run_mode, &self.commands[..n]);
        }

        let result = self.engine.with_process_image(&mut |image| {
            let (input, output) = (image.input, image.output);
            for axis in axes.iter_mut() {
                let Ok(slot) = channel.slot(axis.index) else {
                    continue;
                };
                if operational {
                    axis.drive(slot.request(), input, output);
                }
                let feedback = axis.refresh_feedback(input);
                if operational {
                    axis.generate(run_mode, params, input, output);
                }
                if !slot.state.try_publish(feedback) {
                    trace!(axis = axis.index, "snapshot publish skipped (contended)");
                }
                slot.set_device_state(axis.machine.state());
            }
        });
        if let Err(e) = result {
            if !e.is_tolerated() {
                error!("process image access failed: {e}");
            }
        }
    }
}

/// Log one engine notification at a level matching its severity.
pub fn log_notification(notification: Notification) {
    match notification {
        Notification::StateChanged { from, to } => {
            info!(%from, %to, "engine state changed");
        }
        Notification::LinkConnected => info!("link connected"),
        Notification::LinkDisconnected => warn!("link disconnected"),
        Notification::SlaveUnexpectedState { address, state } => {
            warn!(slave = address, %state, "slave in unexpected state");
        }
        Notification::FrameResponseError { missing } => {
            warn!(missing, "frame response error");
        }
        Notification::Error { code, message } => {
            error!(code = format_args!("0x{code:08X}"), "{message}");
        }
    }
}
