//! Configuration structures for the motion control core.
//!
//! All config types use `serde::Deserialize` for TOML loading. Optional
//! sections and fields use `#[serde(default)]` so a minimal file only needs
//! the slave map. Bounds are checked by [`MotionConfig::validate`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::drive::{OperationMode, RunMode};
use crate::engine::{DcConfig, DcMode};
use crate::object::ObjectKind;

// ─── Top-Level Config ───────────────────────────────────────────────

/// Top-level configuration, loaded from TOML at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Bus cycle time in microseconds (default: 1000).
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u32,

    /// Initial run mode (default: auto).
    #[serde(default)]
    pub run_mode: RunMode,

    /// Cycle pacing strategy (default: software).
    #[serde(default)]
    pub timing: TimingStrategy,

    /// Run duration [ms]; 0 runs until the run flag is cleared.
    #[serde(default)]
    pub duration_ms: u64,

    /// Abort startup when a configured slave is absent from the bus.
    #[serde(default)]
    pub strict_slave_presence: bool,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Slave-to-axis map.
    pub slaves: Vec<SlaveConfig>,

    #[serde(default)]
    pub addressing: AddressingConfig,

    #[serde(default)]
    pub profile: ProfileConfig,

    /// Per-axis overrides; axes not listed use defaults.
    #[serde(default)]
    pub axes: Vec<AxisConfig>,

    #[serde(default)]
    pub fault: FaultConfig,

    #[serde(default)]
    pub dc: DcConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_cycle_time_us() -> u32 {
    CYCLE_TIME_US
}

/// Cycle pacing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingStrategy {
    /// Dedicated sleep-driven timer thread.
    #[default]
    Software,
    /// Start-of-cycle callback from the engine's link layer.
    LinkLayer,
}

// ─── Sections ───────────────────────────────────────────────────────

/// Engine initialization parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine implementation name.
    #[serde(default = "default_engine_driver")]
    pub driver: String,
    /// Link-layer descriptor handed to the engine.
    #[serde(default = "default_engine_link")]
    pub link: String,
    /// Acyclic command retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Top-level state change timeout [ms].
    #[serde(default = "default_state_change_timeout_ms")]
    pub state_change_timeout_ms: u64,
}

fn default_engine_driver() -> String {
    "simulation".to_string()
}
fn default_engine_link() -> String {
    "sim0".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_state_change_timeout_ms() -> u64 {
    STATE_CHANGE_TIMEOUT_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            driver: default_engine_driver(),
            link: default_engine_link(),
            max_retries: default_max_retries(),
            state_change_timeout_ms: default_state_change_timeout_ms(),
        }
    }
}

/// One slave-to-axis map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// Fixed station address.
    pub address: u16,
    /// Number of axes served by this slave (default: 1).
    #[serde(default = "default_slave_axes")]
    pub axes: u8,
}

fn default_slave_axes() -> u8 {
    1
}

/// Logical object → per-axis object index resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressingConfig {
    /// Index distance between consecutive axes of one slave (default: 0x800).
    #[serde(default = "default_stride")]
    pub stride: u16,
    /// Explicit per-axis entries for devices that do not follow the stride.
    #[serde(default)]
    pub overrides: Vec<AddressOverride>,
}

fn default_stride() -> u16 {
    AXIS_OBJECT_STRIDE
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            stride: default_stride(),
            overrides: Vec::new(),
        }
    }
}

/// Explicit object id for one catalog entry of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressOverride {
    /// Global axis index.
    pub axis: usize,
    pub object: ObjectKind,
    pub index: u16,
    /// Defaults to the catalog subindex.
    #[serde(default)]
    pub subindex: Option<u8>,
}

/// Autonomous profile tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    #[serde(default = "default_dwell_seconds")]
    pub dwell_seconds: f64,
    #[serde(default = "default_counts_per_unit")]
    pub counts_per_unit: f64,
    /// Position integration factor per µs of cycle time.
    #[serde(default = "default_position_step_factor")]
    pub position_step_factor_per_us: f64,
}

fn default_max_velocity() -> f64 {
    PROFILE_MAX_VELOCITY
}
fn default_acceleration() -> f64 {
    PROFILE_ACCELERATION
}
fn default_dwell_seconds() -> f64 {
    PROFILE_DWELL_SECONDS
}
fn default_counts_per_unit() -> f64 {
    PROFILE_COUNTS_PER_UNIT
}
fn default_position_step_factor() -> f64 {
    POSITION_STEP_FACTOR_PER_US
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            max_velocity: default_max_velocity(),
            acceleration: default_acceleration(),
            dwell_seconds: default_dwell_seconds(),
            counts_per_unit: default_counts_per_unit(),
            position_step_factor_per_us: default_position_step_factor(),
        }
    }
}

/// Per-axis overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Global axis index (0-based).
    pub axis: usize,
    #[serde(default)]
    pub mode: OperationMode,
    #[serde(default)]
    pub encoder_cpr: Option<f64>,
    #[serde(default)]
    pub gear_ratio: Option<f64>,
}

/// Fault recovery bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    #[serde(default = "default_reset_pulse_limit")]
    pub reset_pulse_limit: u32,
    #[serde(default = "default_disable_voltage_cycles")]
    pub disable_voltage_cycles: u32,
}

fn default_reset_pulse_limit() -> u32 {
    FAULT_RESET_PULSE_LIMIT
}
fn default_disable_voltage_cycles() -> u32 {
    FAULT_DISABLE_VOLTAGE_CYCLES
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            reset_pulse_limit: default_reset_pulse_limit(),
            disable_voltage_cycles: default_disable_voltage_cycles(),
        }
    }
}

/// Diagnostic logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Log DC deviation on every status interval.
    #[serde(default)]
    pub dc_log: bool,
    #[serde(default = "default_dc_status_interval_ms")]
    pub dc_status_interval_ms: u64,
    #[serde(default = "default_overload_warn_threshold")]
    pub overload_warn_threshold: u32,
    #[serde(default = "default_perf_dump_limit")]
    pub perf_dump_limit: u32,
}

fn default_dc_status_interval_ms() -> u64 {
    DC_STATUS_INTERVAL_MS
}
fn default_overload_warn_threshold() -> u32 {
    OVERLOAD_WARN_THRESHOLD
}
fn default_perf_dump_limit() -> u32 {
    OVERLOAD_PERF_DUMP_LIMIT
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            dc_log: false,
            dc_status_interval_ms: default_dc_status_interval_ms(),
            overload_warn_threshold: default_overload_warn_threshold(),
            perf_dump_limit: default_perf_dump_limit(),
        }
    }
}

/// Shutdown bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    #[serde(default = "default_pipeline_join_timeout_ms")]
    pub pipeline_join_timeout_ms: u64,
}

fn default_settle_timeout_ms() -> u64 {
    SETTLE_TIMEOUT_MS
}
fn default_pipeline_join_timeout_ms() -> u64 {
    PIPELINE_JOIN_TIMEOUT_MS
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            settle_timeout_ms: default_settle_timeout_ms(),
            pipeline_join_timeout_ms: default_pipeline_join_timeout_ms(),
        }
    }
}

// ─── Derived values & validation ────────────────────────────────────

impl MotionConfig {
    /// Minimal configuration for the given slave map.
    pub fn with_slaves(slaves: Vec<SlaveConfig>) -> Self {
        Self {
            cycle_time_us: default_cycle_time_us(),
            run_mode: RunMode::default(),
            timing: TimingStrategy::default(),
            duration_ms: 0,
            strict_slave_presence: false,
            engine: EngineConfig::default(),
            slaves,
            addressing: AddressingConfig::default(),
            profile: ProfileConfig::default(),
            axes: Vec::new(),
            fault: FaultConfig::default(),
            dc: DcConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }

    /// Sum of axis counts across the slave map.
    pub fn total_axes(&self) -> usize {
        self.slaves.iter().map(|s| s.axes as usize).sum()
    }

    /// Cycle time in seconds.
    pub fn cycle_seconds(&self) -> f64 {
        self.cycle_time_us as f64 / 1_000_000.0
    }

    /// Overrides for one axis, if configured.
    pub fn axis(&self, axis: usize) -> Option<&AxisConfig> {
        self.axes.iter().find(|a| a.axis == axis)
    }

    /// Validate parameter bounds and cross-references.
    pub fn validate(&self) -> Result<(), String> {
        if self.cycle_time_us < CYCLE_TIME_US_MIN || self.cycle_time_us > CYCLE_TIME_US_MAX {
            return Err(format!(
                "cycle_time_us {} out of range [{}, {}]",
                self.cycle_time_us, CYCLE_TIME_US_MIN, CYCLE_TIME_US_MAX
            ));
        }
        if self.slaves.is_empty() {
            return Err("at least one slave must be configured".to_string());
        }
        if self.slaves.len() > MAX_SLAVES {
            return Err(format!(
                "{} slaves configured, maximum is {}",
                self.slaves.len(),
                MAX_SLAVES
            ));
        }
        let mut addresses = HashSet::new();
        for slave in &self.slaves {
            if slave.axes == 0 {
                return Err(format!("slave {} has zero axes", slave.address));
            }
            if !addresses.insert(slave.address) {
                return Err(format!("duplicate slave address {}", slave.address));
            }
        }
        let total = self.total_axes();
        if total > MAX_AXES {
            return Err(format!("{total} axes configured, maximum is {MAX_AXES}"));
        }
        if self.addressing.stride == 0 {
            return Err("addressing.stride must be non-zero".to_string());
        }

        let mut overridden = HashSet::new();
        for o in &self.addressing.overrides {
            if o.axis >= total {
                return Err(format!(
                    "addressing override for axis {} but only {total} axes exist",
                    o.axis
                ));
            }
            if !overridden.insert((o.axis, o.object)) {
                return Err(format!(
                    "duplicate addressing override for axis {} object {}",
                    o.axis, o.object
                ));
            }
        }

        let mut seen = HashSet::new();
        for a in &self.axes {
            if a.axis >= total {
                return Err(format!("axis {} configured but only {total} axes exist", a.axis));
            }
            if !seen.insert(a.axis) {
                return Err(format!("duplicate axis config for axis {}", a.axis));
            }
            for (name, value) in [("encoder_cpr", a.encoder_cpr), ("gear_ratio", a.gear_ratio)] {
                if let Some(v) = value {
                    if !(v.is_finite() && v > 0.0) {
                        return Err(format!("axis {} {name} must be positive, got {v}", a.axis));
                    }
                }
            }
        }

        let p = &self.profile;
        for (name, value) in [
            ("profile.max_velocity", p.max_velocity),
            ("profile.acceleration", p.acceleration),
            ("profile.counts_per_unit", p.counts_per_unit),
            ("profile.position_step_factor_per_us", p.position_step_factor_per_us),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be positive, got {value}"));
            }
        }
        if !(p.dwell_seconds.is_finite() && p.dwell_seconds >= 0.0) {
            return Err(format!(
                "profile.dwell_seconds must be non-negative, got {}",
                p.dwell_seconds
            ));
        }

        if self.fault.reset_pulse_limit == 0 {
            return Err("fault.reset_pulse_limit must be at least 1".to_string());
        }
        if self.fault.disable_voltage_cycles == 0 {
            return Err("fault.disable_voltage_cycles must be at least 1".to_string());
        }
        if self.diagnostics.dc_status_interval_ms == 0 {
            return Err("diagnostics.dc_status_interval_ms must be non-zero".to_string());
        }
        if self.dc.mode != DcMode::Off && self.dc.ctl_set_val_ns < 0 {
            return Err(format!(
                "dc.ctl_set_val_ns must be non-negative, got {}",
                self.dc.ctl_set_val_ns
            ));
        }
        Ok(())
    }
}
