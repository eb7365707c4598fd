//! Command/state exchange between external actors and the cyclic task.
//!
//! Each axis owns three latest-wins cells (command, feedback snapshot, unit
//! scale) plus atomic request and device-state slots. Writers never queue:
//! a second write before the pipeline reads replaces the first.
//!
//! The pipeline only uses the `try_` accessors. On contention it keeps the
//! value it cached last cycle, so an external writer can never stall the
//! cycle.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use heapless::Vec as FixedVec;
use motion_common::command::{MotionCommand, MotionState, UnitScale};
use motion_common::consts::{MAX_AXES, SETTLE_POLL_MS, SETTLE_TIMEOUT_MS};
use motion_common::drive::{DeviceState, ProcessRequest, RunMode};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ChannelError;

// ─── Versioned cell ─────────────────────────────────────────────────

/// Latest-wins value with a monotonically increasing version.
///
/// The value sits behind a short critical section so readers never observe
/// a partial write; the version lets a reader detect whether anything
/// changed since its last look.
#[derive(Debug, Default)]
pub struct VersionedCell<T: Copy> {
    value: Mutex<T>,
    version: AtomicU64,
}

impl<T: Copy> VersionedCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            version: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, value: T) {
        let mut slot = self.value.lock();
        *slot = value;
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Publish unless another thread holds the cell. Returns `false` when skipped.
    pub fn try_publish(&self, value: T) -> bool {
        match self.value.try_lock() {
            Some(mut slot) => {
                *slot = value;
                self.version.fetch_add(1, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn read(&self) -> T {
        *self.value.lock()
    }

    pub fn try_read(&self) -> Option<T> {
        self.value.try_lock().map(|v| *v)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

// ─── Axis slot ──────────────────────────────────────────────────────

/// Exchange state of one axis.
#[derive(Debug)]
pub struct AxisSlot {
    pub command: VersionedCell<Option<MotionCommand>>,
    pub state: VersionedCell<MotionState>,
    pub scale: VersionedCell<UnitScale>,
    request: AtomicU8,
    device_state: AtomicU8,
}

impl AxisSlot {
    fn new() -> Self {
        Self {
            command: VersionedCell::new(None),
            state: VersionedCell::new(MotionState::default()),
            scale: VersionedCell::new(UnitScale::default()),
            request: AtomicU8::new(ProcessRequest::None as u8),
            device_state: AtomicU8::new(DeviceState::NotReady as u8),
        }
    }

    pub fn request(&self) -> ProcessRequest {
        ProcessRequest::from_u8(self.request.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_request(&self, request: ProcessRequest) {
        self.request.store(request as u8, Ordering::Release);
    }

    pub fn device_state(&self) -> DeviceState {
        DeviceState::from_u8(self.device_state.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_device_state(&self, state: DeviceState) {
        self.device_state.store(state as u8, Ordering::Release);
    }
}

// ─── Channel ────────────────────────────────────────────────────────

/// Shared exchange surface for all axes. Wrap in `Arc` to share.
#[derive(Debug)]
pub struct AxisChannel {
    slots: FixedVec<AxisSlot, MAX_AXES>,
    run_mode: AtomicU8,
    /// Set by a broadcast of anything but START; suspends run-mode request
    /// derivation so a broadcast shutdown/stop is not overridden next cycle.
    requests_held: AtomicBool,
    /// Bound of the wait after a broadcast STOP or SHUTDOWN.
    settle_timeout: Duration,
}

impl AxisChannel {
    pub fn new(axis_count: usize, run_mode: RunMode) -> Result<Self, ChannelError> {
        let mut slots = FixedVec::new();
        for _ in 0..axis_count {
            slots
                .push(AxisSlot::new())
                .map_err(|_| ChannelError::CapacityExceeded(axis_count))?;
        }
        Ok(Self {
            slots,
            run_mode: AtomicU8::new(run_mode as u8),
            requests_held: AtomicBool::new(false),
            settle_timeout: Duration::from_millis(SETTLE_TIMEOUT_MS),
        })
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn settle_timeout(&self) -> Duration {
        self.settle_timeout
    }

    pub fn axis_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, axis: usize) -> Result<&AxisSlot, ChannelError> {
        self.slots.get(axis).ok_or(ChannelError::InvalidAxis {
            axis,
            count: self.slots.len(),
        })
    }

    pub fn slots(&self) -> impl Iterator<Item = &AxisSlot> {
        self.slots.iter()
    }

    // ── Commands & feedback ──

    /// Replace the axis command (latest wins).
    pub fn set_command(&self, axis: usize, command: MotionCommand) -> Result<(), ChannelError> {
        self.slot(axis)?.command.publish(Some(command));
        Ok(())
    }

    /// Forget the axis command.
    pub fn clear_command(&self, axis: usize) -> Result<(), ChannelError> {
        self.slot(axis)?.command.publish(None);
        Ok(())
    }

    pub fn command(&self, axis: usize) -> Result<Option<MotionCommand>, ChannelError> {
        Ok(self.slot(axis)?.command.read())
    }

    /// Latest feedback snapshot.
    pub fn state(&self, axis: usize) -> Result<MotionState, ChannelError> {
        Ok(self.slot(axis)?.state.read())
    }

    pub fn device_state(&self, axis: usize) -> Result<DeviceState, ChannelError> {
        Ok(self.slot(axis)?.device_state())
    }

    // ── Scale ──

    /// Set the counts ↔ radians scale. Invalid input leaves the previous
    /// scale in place.
    pub fn set_scale(
        &self,
        axis: usize,
        encoder_cpr: f64,
        gear_ratio: f64,
    ) -> Result<UnitScale, ChannelError> {
        let slot = self.slot(axis)?;
        let scale = UnitScale::from_encoder(encoder_cpr, gear_ratio)?;
        slot.scale.publish(scale);
        info!(
            axis,
            encoder_cpr,
            gear_ratio,
            counts_per_radian = scale.counts_per_radian(),
            "axis scale set"
        );
        Ok(scale)
    }

    pub fn set_unit_scale(&self, axis: usize, scale: UnitScale) -> Result<(), ChannelError> {
        self.slot(axis)?.scale.publish(scale);
        Ok(())
    }

    pub fn scale(&self, axis: usize) -> Result<UnitScale, ChannelError> {
        Ok(self.slot(axis)?.scale.read())
    }

    // ── Run mode & requests ──

    pub fn run_mode(&self) -> RunMode {
        RunMode::from_u8(self.run_mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_run_mode(&self, mode: RunMode) {
        let prev = self.run_mode.swap(mode as u8, Ordering::AcqRel);
        if prev != mode as u8 {
            info!(mode = mode.name(), "run mode changed");
        }
    }

    pub fn set_request(&self, axis: usize, request: ProcessRequest) -> Result<(), ChannelError> {
        self.slot(axis)?.set_request(request);
        Ok(())
    }

    pub fn request(&self, axis: usize) -> Result<ProcessRequest, ChannelError> {
        Ok(self.slot(axis)?.request())
    }

    /// Set `request` on every axis without waiting for the drives.
    ///
    /// Any request other than START holds requests until the next START
    /// broadcast.
    pub fn post(&self, request: ProcessRequest) {
        self.requests_held
            .store(request != ProcessRequest::Start, Ordering::Release);
        for slot in &self.slots {
            slot.set_request(request);
        }
        debug!(?request, axes = self.slots.len(), "request broadcast");
    }

    /// Set `request` on every axis. After STOP or SHUTDOWN, block until no
    /// axis reports OPERATION_ENABLED or the settle timeout elapses.
    ///
    /// Returns `false` only when the settle wait timed out. Needs a running
    /// pipeline to make progress.
    pub fn broadcast(&self, request: ProcessRequest) -> bool {
        self.post(request);
        if !request.retracts_motion() {
            return true;
        }
        let settled = self.wait_motion_retracted(self.settle_timeout);
        if !settled {
            warn!(
                ?request,
                timeout_ms = self.settle_timeout.as_millis() as u64,
                "axes still enabled after settle wait"
            );
        }
        settled
    }

    pub fn requests_held(&self) -> bool {
        self.requests_held.load(Ordering::Acquire)
    }

    /// Derive per-axis requests from the run mode.
    ///
    /// AUTO starts every axis. MANUAL follows the command enable flag and
    /// keeps the previous request when no command was ever written.
    pub fn derive_requests(&self, run_mode: RunMode, commands: &[Option<MotionCommand>]) {
        if self.requests_held() {
            return;
        }
        for (slot, command) in self.slots.iter().zip(commands) {
            match (run_mode, command) {
                (RunMode::Auto, _) => slot.set_request(ProcessRequest::Start),
                (RunMode::Manual, Some(cmd)) if cmd.is_enabled() => {
                    slot.set_request(ProcessRequest::Start)
                }
                (RunMode::Manual, Some(_)) => slot.set_request(ProcessRequest::Shutdown),
                (RunMode::Manual, None) => {}
            }
        }
    }

    // ── Settle wait ──

    /// True while any axis reports OPERATION_ENABLED.
    pub fn any_enabled(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.device_state() == DeviceState::OperationEnabled)
    }

    /// Poll until no axis reports OPERATION_ENABLED or `timeout` elapses.
    /// Returns `true` if motion authority was retracted in time.
    pub fn wait_motion_retracted(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.any_enabled() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(SETTLE_POLL_MS));
        }
    }
}
