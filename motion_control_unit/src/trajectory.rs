//! Autonomous back-and-forth trapezoidal profile.
//!
//! ```text
//!  vel
//!   +max ──┐  ┌──────────┐
//!          │ /  POS_CON   \
//!          │/              \ POS_DEC
//!   0 ─────/─ POS_ACC ──────\──────────────────/──
//!                  NEG_ACC   \               / NEG_DEC
//!                             \   NEG_CON   /
//!   -max                       └───────────┘
//! ```
//!
//! Velocity ramps by `acceleration * dt` per cycle, holds at ±max for
//! `dwell_seconds`, then ramps the other way. Position integrates the
//! velocity with an empirical per-cycle factor and is written to the drive as
//! `position * counts_per_unit`. If that raw value leaves the i32 range the
//! profile reverses immediately.

use motion_common::command::saturate_i32;
use motion_common::config::ProfileConfig;

// ─── Phase ──────────────────────────────────────────────────────────

/// Profile phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MotionPhase {
    #[default]
    PosAcc = 1,
    PosCon = 2,
    PosDec = 3,
    NegAcc = 4,
    NegCon = 5,
    NegDec = 6,
}

impl MotionPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::PosAcc => "POS_ACC",
            Self::PosCon => "POS_CON",
            Self::PosDec => "POS_DEC",
            Self::NegAcc => "NEG_ACC",
            Self::NegCon => "NEG_CON",
            Self::NegDec => "NEG_DEC",
        }
    }
}

// ─── Parameters ─────────────────────────────────────────────────────

/// Profile parameters derived from config and cycle time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileParams {
    pub max_velocity: f64,
    pub acceleration: f64,
    /// Cycles spent at constant velocity.
    pub dwell_cycles: f64,
    pub counts_per_unit: f64,
    /// Cycle time [s].
    pub dt: f64,
    /// Position increment per unit of velocity per cycle.
    pub position_step: f64,
}

impl ProfileParams {
    pub fn new(config: &ProfileConfig, cycle_time_us: u32) -> Self {
        let dt = cycle_time_us as f64 / 1_000_000.0;
        Self {
            max_velocity: config.max_velocity,
            acceleration: config.acceleration,
            dwell_cycles: config.dwell_seconds / dt,
            counts_per_unit: config.counts_per_unit,
            dt,
            position_step: config.position_step_factor_per_us * cycle_time_us as f64,
        }
    }
}

/// Raw targets for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileTargets {
    pub position: i32,
    pub velocity: i32,
}

// ─── Runtime state ──────────────────────────────────────────────────

/// Per-axis profile runtime state in internal units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProfileState {
    pub position: f64,
    pub velocity: f64,
    pub phase: MotionPhase,
    pub dwell_count: u64,
}

impl ProfileState {
    /// Advance one cycle.
    ///
    /// The position target is taken before integration; the velocity target
    /// after the phase update.
    pub fn step(&mut self, p: &ProfileParams) -> ProfileTargets {
        let raw = self.position * p.counts_per_unit;
        if raw > i32::MAX as f64 {
            self.phase = MotionPhase::NegAcc;
            self.position = i32::MAX as f64 / p.counts_per_unit;
        } else if raw < i32::MIN as f64 {
            self.phase = MotionPhase::PosAcc;
            self.position = i32::MIN as f64 / p.counts_per_unit;
        }
        let position = saturate_i32(raw);

        let dv = p.dt * p.acceleration;
        match self.phase {
            MotionPhase::PosAcc => {
                self.velocity += dv;
                if self.velocity >= p.max_velocity {
                    self.phase = MotionPhase::PosCon;
                }
            }
            MotionPhase::PosCon => {
                self.velocity = p.max_velocity;
                if self.dwell_elapsed(p) {
                    self.phase = MotionPhase::PosDec;
                }
            }
            MotionPhase::PosDec => {
                self.velocity -= dv;
                if self.velocity <= 0.0 {
                    self.phase = MotionPhase::NegAcc;
                }
            }
            MotionPhase::NegAcc => {
                self.velocity -= dv;
                if self.velocity <= -p.max_velocity {
                    self.phase = MotionPhase::NegCon;
                }
            }
            MotionPhase::NegCon => {
                self.velocity = -p.max_velocity;
                if self.dwell_elapsed(p) {
                    self.phase = MotionPhase::NegDec;
                }
            }
            MotionPhase::NegDec => {
                self.velocity += dv;
                if self.velocity >= 0.0 {
                    self.phase = MotionPhase::PosAcc;
                }
            }
        }

        self.position += self.velocity * p.position_step;

        ProfileTargets {
            position,
            velocity: saturate_i32(self.velocity * p.counts_per_unit),
        }
    }

    fn dwell_elapsed(&mut self, p: &ProfileParams) -> bool {
        let count = self.dwell_count;
        self.dwell_count += 1;
        if count as f64 > p.dwell_cycles {
            self.dwell_count = 0;
            true
        } else {
            false
        }
    }

    /// Align to the drive's actual position with zero velocity.
    pub fn sync_to_actual(&mut self, actual_raw: i32, p: &ProfileParams) {
        self.position = actual_raw as f64 / p.counts_per_unit;
        self.velocity = 0.0;
    }

    pub fn hold(&mut self) {
        self.velocity = 0.0;
    }
}
