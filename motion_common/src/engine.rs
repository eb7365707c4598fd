//! Fieldbus master engine capability trait and error types.
//!
//! The control core never builds frames, scans the bus or runs clock
//! synchronization itself. It consumes those services through
//! [`MasterEngine`], which a concrete engine (hardware stack or simulation)
//! implements.
//!
//! # Lifecycle
//!
//! 1. `init()` with link, cycle time and retry budget
//! 2. `set_state()` INIT → PREOP (metadata available, binding happens here)
//!    → SAFEOP → OP
//! 3. `exec_job()` six times per cycle from the pipeline thread
//! 4. `set_state(Init)` and `deinit()` at shutdown
//!
//! # Timing Contracts
//!
//! | Operation | Caller thread | RT Constraint |
//! |-----------|---------------|---------------|
//! | `init()` / `deinit()` | supervisor | None |
//! | `set_state()` | supervisor | bounded by `timeout` |
//! | `exec_job()` / `with_process_image()` | pipeline | **HARD** |
//! | `drain_notifications()` | pipeline | **HARD**, no heavy work |
//! | `dc_status()` | supervisor | None |

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object::ObjectId;

// ─── Errors ─────────────────────────────────────────────────────────

/// Errors reported by an engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Operation not valid in the current engine state (e.g. not yet operational).
    #[error("invalid engine state")]
    InvalidState,

    /// Physical link is down.
    #[error("link disconnected")]
    LinkDisconnected,

    /// Evaluation license expired; the engine stops exchanging data.
    #[error("evaluation license expired")]
    EvaluationExpired,

    /// Capability not provided by this engine.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Bounded wait elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// No slave with this station address.
    #[error("slave {0} not found")]
    SlaveNotFound(u16),

    /// Engine initialization failed.
    #[error("initialization failed: {0}")]
    InitFailed(String),

    /// Any other engine-side failure.
    #[error("engine error: {0}")]
    Other(String),
}

impl EngineError {
    /// Job statuses the pipeline steps over without logging.
    pub const fn is_tolerated(&self) -> bool {
        matches!(self, Self::InvalidState | Self::LinkDisconnected)
    }
}

// ─── Engine state ───────────────────────────────────────────────────

/// Top-level engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MasterState {
    Unknown = 0,
    Init = 1,
    PreOp = 2,
    SafeOp = 4,
    Op = 8,
}

impl MasterState {
    /// Cyclic process data is exchanged (SAFEOP or OP).
    pub const fn exchanges_process_data(self) -> bool {
        matches!(self, Self::SafeOp | Self::Op)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Init => "INIT",
            Self::PreOp => "PREOP",
            Self::SafeOp => "SAFEOP",
            Self::Op => "OP",
        }
    }
}

impl Default for MasterState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for MasterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters handed to `init()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineParams {
    pub link: String,
    pub cycle_time_us: u32,
    pub max_retries: u32,
}

// ─── Jobs ───────────────────────────────────────────────────────────

/// Per-cycle engine jobs, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    StartTask,
    ProcessRxFrames,
    SendCycFrames,
    MasterTimer,
    SendAcycFrames,
    StopTask,
}

impl Job {
    pub const fn name(self) -> &'static str {
        match self {
            Self::StartTask => "StartTask",
            Self::ProcessRxFrames => "ProcessRxFrames",
            Self::SendCycFrames => "SendCycFrames",
            Self::MasterTimer => "MasterTimer",
            Self::SendAcycFrames => "SendAcycFrames",
            Self::StopTask => "StopTask",
        }
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    /// For `ProcessRxFrames`: every frame sent last cycle came back.
    /// Always `true` for other jobs.
    pub all_frames_processed: bool,
}

impl JobOutcome {
    pub const DONE: Self = Self { all_frames_processed: true };
}

// ─── Process image & metadata ───────────────────────────────────────

/// Sizes of the two process-image regions [bytes].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessImageLayout {
    pub input_len: usize,
    pub output_len: usize,
}

/// Borrowed view of the process image for one cycle.
#[derive(Debug)]
pub struct ProcessImage<'a> {
    /// From-device region, written by the engine during frame processing.
    pub input: &'a [u8],
    /// To-device region, written by the control core.
    pub output: &'a mut [u8],
}

/// One process variable of a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessVarInfo {
    pub name: String,
    pub id: ObjectId,
    /// Offset from the start of the region [bits].
    pub bit_offset: u32,
    pub bit_len: u16,
}

/// Slave configuration summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveInfo {
    pub address: u16,
    pub name: String,
    pub vendor_id: u32,
    pub product_code: u32,
    pub input_var_count: u16,
    pub output_var_count: u16,
}

// ─── Notifications ──────────────────────────────────────────────────

/// Asynchronous engine events, queued by the engine and drained once per cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged { from: MasterState, to: MasterState },
    LinkConnected,
    LinkDisconnected,
    SlaveUnexpectedState { address: u16, state: MasterState },
    FrameResponseError { missing: u32 },
    Error { code: u32, message: String },
}

// ─── Distributed clocks ─────────────────────────────────────────────

/// DC master synchronization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DcMode {
    #[default]
    Off,
    BusShift,
    MasterShift,
    MasterRefClock,
    LinkLayerRefClock,
    Dcx,
}

impl DcMode {
    /// Whether periodic DC status queries are meaningful in this mode.
    pub const fn reports_status(self) -> bool {
        !matches!(self, Self::Off | Self::LinkLayerRefClock)
    }
}

/// One-shot DC configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DcConfig {
    #[serde(default)]
    pub mode: DcMode,
    #[serde(default)]
    pub sync_to_cycle_start: bool,
    #[serde(default)]
    pub control_loop_disabled: bool,
    /// Distance between cyclic frame send time and DC base [ns].
    #[serde(default)]
    pub ctl_set_val_ns: i32,
}

/// Synchronization state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcSyncState {
    NotReady,
    Busy,
    InSync,
    OutOfSync(u32),
}

/// DC deviation statistics [ns].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcStatus {
    pub state: DcSyncState,
    pub deviation_cur_ns: i32,
    pub deviation_avg_ns: i32,
    pub deviation_max_ns: i32,
}

/// Start-of-cycle callback registered with a link layer.
pub type CycleHook = Arc<dyn Fn() + Send + Sync>;

// ─── Engine trait ───────────────────────────────────────────────────

/// Capability surface of a fieldbus master engine.
///
/// Methods take `&self`: the supervisor thread drives state changes while
/// the pipeline thread executes jobs, so implementations synchronize
/// internally.
pub trait MasterEngine: Send + Sync {
    /// Engine identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    fn init(&self, params: &EngineParams) -> Result<(), EngineError>;

    fn deinit(&self) -> Result<(), EngineError>;

    /// Request a top-level state and wait up to `timeout` for it.
    fn set_state(&self, state: MasterState, timeout: Duration) -> Result<(), EngineError>;

    fn state(&self) -> MasterState;

    /// `None` while no process image exists (before configuration).
    fn process_image_layout(&self) -> Option<ProcessImageLayout>;

    /// Run `f` with exclusive access to the process image.
    fn with_process_image(&self, f: &mut dyn FnMut(ProcessImage<'_>)) -> Result<(), EngineError>;

    fn slave_count(&self) -> usize;

    fn is_slave_present(&self, address: u16) -> Result<bool, EngineError>;

    fn slave_info(&self, address: u16) -> Result<SlaveInfo, EngineError>;

    /// To-device process variables of a slave.
    fn output_vars(&self, address: u16) -> Result<Vec<ProcessVarInfo>, EngineError>;

    /// From-device process variables of a slave.
    fn input_vars(&self, address: u16) -> Result<Vec<ProcessVarInfo>, EngineError>;

    fn exec_job(&self, job: Job) -> Result<JobOutcome, EngineError>;

    /// Hand every queued notification to `sink`.
    fn drain_notifications(&self, _sink: &mut dyn FnMut(Notification)) {}

    fn configure_dc(&self, _config: &DcConfig) -> Result<(), EngineError> {
        Err(EngineError::NotSupported("distributed clocks"))
    }

    fn dc_status(&self) -> Result<DcStatus, EngineError> {
        Err(EngineError::NotSupported("distributed clocks"))
    }

    fn reset_dc_status(&self) {}

    /// Pending synchronization log line, if the engine keeps one.
    fn dc_log_message(&self) -> Option<String> {
        None
    }

    /// Performance counter dump for overload diagnostics.
    fn perf_report(&self) -> Option<String> {
        None
    }

    /// Register a start-of-cycle callback (link-layer timing).
    fn register_cycle_hook(&self, _hook: CycleHook) -> Result<(), EngineError> {
        Err(EngineError::NotSupported("link-layer cycle hook"))
    }
}
