//! Motion command, feedback snapshot and unit conversion.
//!
//! Engineering units are radians and radians per second. Drives work in raw
//! counts; [`UnitScale`] converts between the two:
//!
//! ```text
//! counts_per_radian = encoder_cpr * gear_ratio / (2π)
//! raw               = round(engineering * counts_per_radian)   (saturated to i32)
//! engineering       = raw * radians_per_count
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_ENCODER_CPR, DEFAULT_GEAR_RATIO};

// ─── Motion Command ─────────────────────────────────────────────────

/// Desired state for one axis, written by an external actor.
///
/// `tau`, `kp` and `kd` are carried for completeness; the cyclic task never
/// writes them to the drive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionCommand {
    /// 0 = disable (axis is sent to shutdown), non-zero = follow targets.
    pub mode: u8,
    /// Target position [rad].
    pub q: f64,
    /// Target velocity [rad/s].
    pub dq: f64,
    /// Feed-forward torque.
    pub tau: f64,
    /// Stiffness gain.
    pub kp: f64,
    /// Damping gain.
    pub kd: f64,
}

impl MotionCommand {
    pub const fn follow(q: f64, dq: f64) -> Self {
        Self { mode: 1, q, dq, tau: 0.0, kp: 0.0, kd: 0.0 }
    }

    pub const fn stop() -> Self {
        Self { mode: 0, q: 0.0, dq: 0.0, tau: 0.0, kp: 0.0, kd: 0.0 }
    }

    pub const fn is_enabled(&self) -> bool {
        self.mode != 0
    }
}

// ─── Motion State Snapshot ──────────────────────────────────────────

/// Point-in-time feedback of one axis, published once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionState {
    /// Raw status word.
    pub status_word: u16,
    /// Feedback position [rad].
    pub q_fb: f64,
    /// Feedback velocity [rad/s].
    pub dq_fb: f64,
    /// Feedback torque (drive units, per mille of rated torque).
    pub tau_fb: f64,
    /// Drive error code (0x603F).
    pub motor_state: u32,
    /// MCU and motor temperature.
    pub temperature: [i16; 2],
    /// IGBT temperature.
    pub igbt_temperature: i16,
    /// DC-link voltage.
    pub dc_link_voltage: u16,
    /// Following error [counts].
    pub following_error: i32,
}

// ─── Unit Scale ─────────────────────────────────────────────────────

/// Rejected scale parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScaleError {
    #[error("encoder resolution must be positive, got {0}")]
    InvalidResolution(f64),
    #[error("gear ratio must be positive, got {0}")]
    InvalidGearRatio(f64),
}

/// Counts ↔ radians conversion of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitScale {
    counts_per_radian: f64,
    radians_per_count: f64,
}

impl UnitScale {
    /// Unit scale (1 count = 1 rad); used until an axis is prepared.
    pub const IDENTITY: Self = Self { counts_per_radian: 1.0, radians_per_count: 1.0 };

    /// Build from encoder counts per motor revolution and gear ratio.
    ///
    /// Non-finite or non-positive inputs are rejected.
    pub fn from_encoder(encoder_cpr: f64, gear_ratio: f64) -> Result<Self, ScaleError> {
        if !(encoder_cpr.is_finite() && encoder_cpr > 0.0) {
            return Err(ScaleError::InvalidResolution(encoder_cpr));
        }
        if !(gear_ratio.is_finite() && gear_ratio > 0.0) {
            return Err(ScaleError::InvalidGearRatio(gear_ratio));
        }
        let counts_per_radian = encoder_cpr * gear_ratio / std::f64::consts::TAU;
        Ok(Self {
            counts_per_radian,
            radians_per_count: 1.0 / counts_per_radian,
        })
    }

    /// Scale applied to every axis at prepare time.
    pub fn default_drive() -> Self {
        Self::from_encoder(DEFAULT_ENCODER_CPR, DEFAULT_GEAR_RATIO).unwrap_or(Self::IDENTITY)
    }

    #[inline]
    pub const fn counts_per_radian(&self) -> f64 {
        self.counts_per_radian
    }

    #[inline]
    pub const fn radians_per_count(&self) -> f64 {
        self.radians_per_count
    }

    /// Engineering value → raw counts, rounded and saturated to i32.
    #[inline]
    pub fn to_counts(&self, engineering: f64) -> i32 {
        saturate_i32(engineering * self.counts_per_radian)
    }

    /// Raw counts → engineering value.
    #[inline]
    pub fn to_engineering(&self, raw: i32) -> f64 {
        raw as f64 * self.radians_per_count
    }
}

impl Default for UnitScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Round to nearest and clamp into the i32 range. NaN maps to 0.
#[inline]
pub fn saturate_i32(value: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    // `as` saturates at the i32 bounds.
    value.round() as i32
}
