//! Prelude module for common re-exports.
//!
//! ```rust
//! use motion_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Commands & Feedback ────────────────────────────────────────────
pub use crate::command::{MotionCommand, MotionState, ScaleError, UnitScale, saturate_i32};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{MotionConfig, SlaveConfig, TimingStrategy};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{CYCLE_TIME_US, MAX_AXES, MAX_SLAVES};

// ─── Drive vocabulary ───────────────────────────────────────────────
pub use crate::drive::{ControlWord, DeviceState, OperationMode, ProcessRequest, RunMode, StatusWord};

// ─── Engine ─────────────────────────────────────────────────────────
pub use crate::engine::{
    EngineError, EngineParams, Job, JobOutcome, MasterEngine, MasterState, Notification,
    ProcessImage, ProcessImageLayout, ProcessVarInfo, SlaveInfo,
};

// ─── Objects ────────────────────────────────────────────────────────
pub use crate::object::{Direction, ObjectId, ObjectKind};

/// Default cycle time as Duration.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_micros(CYCLE_TIME_US as u64);
