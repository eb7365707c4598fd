//! System-wide constants.
//!
//! Limits, CiA402 object indices, control/status word codes and the default
//! tuning values used when the configuration leaves a field out.

use static_assertions::const_assert;

// ─── Capacity ───────────────────────────────────────────────────────

/// Maximum number of axes managed by one control core.
pub const MAX_AXES: usize = 8;

/// Maximum number of slaves in the slave-to-axis map.
pub const MAX_SLAVES: usize = 8;

const_assert!(MAX_AXES <= u8::MAX as usize);
const_assert!(MAX_SLAVES <= MAX_AXES);

// ─── Cycle timing ───────────────────────────────────────────────────

/// Default bus cycle time [µs].
pub const CYCLE_TIME_US: u32 = 1000;

/// Minimum accepted bus cycle time [µs].
pub const CYCLE_TIME_US_MIN: u32 = 100;

/// Maximum accepted bus cycle time [µs].
pub const CYCLE_TIME_US_MAX: u32 = 100_000;

/// Smallest period the software timer accepts [ns]; shorter requests are raised to this.
pub const TIMER_PERIOD_NS_MIN: u64 = 10;

/// Minimum sleep slice of the software timer thread [ms]. Never 0.
pub const TIMER_SLEEP_SLICE_MS_MIN: u64 = 1;

const_assert!(TIMER_SLEEP_SLICE_MS_MIN > 0);

/// Bounded wait for the timer thread to report running or stopped [ms].
pub const TIMER_HANDSHAKE_TIMEOUT_MS: u64 = 2000;

/// Bounded wait of the pipeline on the cycle event [ms].
pub const CYCLE_WAIT_TIMEOUT_MS: u64 = 3000;

/// Default engine state-change timeout [ms].
pub const STATE_CHANGE_TIMEOUT_MS: u64 = 15_000;

/// Supervisor poll period [ms].
pub const SUPERVISOR_POLL_MS: u64 = 5;

/// Default interval between DC status queries [ms].
pub const DC_STATUS_INTERVAL_MS: u64 = 5000;

/// Default bound of the stop/shutdown settle wait [ms].
pub const SETTLE_TIMEOUT_MS: u64 = 2000;

/// Poll step of the settle wait [ms].
pub const SETTLE_POLL_MS: u64 = 1;

/// Default bound on joining the pipeline thread at shutdown [ms].
pub const PIPELINE_JOIN_TIMEOUT_MS: u64 = 2000;

// ─── Overload detection ─────────────────────────────────────────────

/// Overload counter increment per cycle with unacknowledged frames.
pub const OVERLOAD_STEP: u32 = 10;

/// Overload counter level at which a warning is emitted.
pub const OVERLOAD_WARN_THRESHOLD: u32 = 50;

/// Performance counters are dumped while the overload counter is below this.
pub const OVERLOAD_PERF_DUMP_LIMIT: u32 = 60;

// ─── Object addressing ──────────────────────────────────────────────

/// Default object index distance between consecutive axes of one slave.
pub const AXIS_OBJECT_STRIDE: u16 = 0x800;

pub const OBJ_ERROR_CODE: u16 = 0x603F;
pub const OBJ_CONTROL_WORD: u16 = 0x6040;
pub const OBJ_STATUS_WORD: u16 = 0x6041;
pub const OBJ_MODES_OF_OPERATION: u16 = 0x6060;
pub const OBJ_POSITION_ACTUAL: u16 = 0x6064;
pub const OBJ_VELOCITY_ACTUAL: u16 = 0x606C;
pub const OBJ_TARGET_TORQUE: u16 = 0x6071;
pub const OBJ_TORQUE_ACTUAL: u16 = 0x6077;
pub const OBJ_TARGET_POSITION: u16 = 0x607A;
pub const OBJ_FOLLOWING_ERROR: u16 = 0x60F4;
pub const OBJ_TARGET_VELOCITY: u16 = 0x60FF;
pub const OBJ_DIGITAL_INPUT: u16 = 0x6000;
pub const OBJ_DIGITAL_OUTPUT: u16 = 0x7010;
pub const OBJ_MCU_TEMPERATURE: u16 = 0x3008;
pub const OBJ_MOTOR_TEMPERATURE: u16 = 0x3009;
pub const OBJ_DC_LINK_VOLTAGE: u16 = 0x300B;
pub const OBJ_IGBT_TEMPERATURE: u16 = 0x300F;

// ─── Status word decoding ───────────────────────────────────────────

/// Narrow mask separating NOT_READY from SWITCH_ON_DISABLED.
pub const STATUS_MASK_DISABLED: u16 = 0x004F;

/// Wide mask for the remaining device states.
pub const STATUS_MASK: u16 = 0x006F;

pub const STATUS_NOT_READY: u16 = 0x0000;
pub const STATUS_SWITCH_ON_DISABLED: u16 = 0x0040;
pub const STATUS_READY_TO_SWITCH_ON: u16 = 0x0021;
pub const STATUS_SWITCHED_ON: u16 = 0x0023;
pub const STATUS_OPERATION_ENABLED: u16 = 0x0027;
pub const STATUS_QUICK_STOP_ACTIVE: u16 = 0x0005;

/// Fault bit of the status word.
pub const STATUS_FAULT_BIT: u16 = 0x0008;

// ─── Fault recovery ─────────────────────────────────────────────────

/// Consecutive fault-reset pulses before falling back to disable-voltage.
pub const FAULT_RESET_PULSE_LIMIT: u32 = 20;

/// Cycles spent writing disable-voltage before the reset counter restarts.
pub const FAULT_DISABLE_VOLTAGE_CYCLES: u32 = 2;

// ─── Trajectory defaults ────────────────────────────────────────────

/// Autonomous profile maximum velocity [internal units/s].
pub const PROFILE_MAX_VELOCITY: f64 = 20.0;

/// Autonomous profile acceleration [internal units/s²].
pub const PROFILE_ACCELERATION: f64 = 10.0;

/// Autonomous profile constant-velocity dwell [s].
pub const PROFILE_DWELL_SECONDS: f64 = 20.0;

/// Raw counts per internal profile unit.
pub const PROFILE_COUNTS_PER_UNIT: f64 = 10.0;

/// Empirical position integration factor per µs of cycle time.
pub const POSITION_STEP_FACTOR_PER_US: f64 = 0.0010922;

// ─── Unit scale defaults ────────────────────────────────────────────

/// Default encoder resolution [counts/rev] applied at prepare time.
pub const DEFAULT_ENCODER_CPR: f64 = 131_072.0;

/// Default gear ratio applied at prepare time.
pub const DEFAULT_GEAR_RATIO: f64 = 9.0;

/// Canonical service name (used for logging).
pub const SERVICE_NAME: &str = "motion_control_unit";
