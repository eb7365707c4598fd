//! CiA402 drive vocabulary.
//!
//! Device states as decoded from the status word, the control-word command
//! codes that move a drive between them, process-state requests issued by
//! callers and the run/operation modes of an axis.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::consts::*;

// ─── Device State ───────────────────────────────────────────────────

/// Simplified CiA402 device state of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceState {
    NotReady = 0,
    SwitchOnDisabled = 1,
    ReadyToSwitchOn = 2,
    SwitchedOn = 3,
    OperationEnabled = 4,
    QuickStop = 5,
    FaultReaction = 6,
    Fault = 7,
}

impl DeviceState {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::NotReady),
            1 => Some(Self::SwitchOnDisabled),
            2 => Some(Self::ReadyToSwitchOn),
            3 => Some(Self::SwitchedOn),
            4 => Some(Self::OperationEnabled),
            5 => Some(Self::QuickStop),
            6 => Some(Self::FaultReaction),
            7 => Some(Self::Fault),
            _ => None,
        }
    }

    /// FAULT or FAULT_REACTION.
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReaction)
    }

    /// Classify a status word that does not carry the fault bit.
    ///
    /// Returns `None` for bit patterns outside the decoded set; the caller
    /// keeps its previous state in that case.
    pub const fn decode(status_word: u16) -> Option<Self> {
        if status_word & STATUS_MASK_DISABLED == STATUS_NOT_READY {
            Some(Self::NotReady)
        } else if status_word & STATUS_MASK_DISABLED == STATUS_SWITCH_ON_DISABLED {
            Some(Self::SwitchOnDisabled)
        } else if status_word & STATUS_MASK == STATUS_READY_TO_SWITCH_ON {
            Some(Self::ReadyToSwitchOn)
        } else if status_word & STATUS_MASK == STATUS_SWITCHED_ON {
            Some(Self::SwitchedOn)
        } else if status_word & STATUS_MASK == STATUS_QUICK_STOP_ACTIVE {
            Some(Self::QuickStop)
        } else if status_word & STATUS_MASK == STATUS_OPERATION_ENABLED {
            Some(Self::OperationEnabled)
        } else {
            None
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::NotReady => "NOT_READY",
            Self::SwitchOnDisabled => "SWITCH_ON_DISABLED",
            Self::ReadyToSwitchOn => "READY_TO_SWITCH_ON",
            Self::SwitchedOn => "SWITCHED_ON",
            Self::OperationEnabled => "OPERATION_ENABLED",
            Self::QuickStop => "QUICK_STOP",
            Self::FaultReaction => "FAULT_REACTION",
            Self::Fault => "FAULT",
        }
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::NotReady
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Process-State Request ──────────────────────────────────────────

/// Per-axis request consumed by the state machine every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcessRequest {
    None = 0,
    Shutdown = 1,
    Start = 2,
    Reset = 3,
    Halt = 4,
    Pause = 5,
    QuickStop = 6,
    Stop = 7,
}

impl ProcessRequest {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Shutdown),
            2 => Some(Self::Start),
            3 => Some(Self::Reset),
            4 => Some(Self::Halt),
            5 => Some(Self::Pause),
            6 => Some(Self::QuickStop),
            7 => Some(Self::Stop),
            _ => None,
        }
    }

    /// Device state this request drives the axis toward.
    pub const fn requested_state(self) -> DeviceState {
        match self {
            Self::Start => DeviceState::OperationEnabled,
            Self::Shutdown => DeviceState::ReadyToSwitchOn,
            _ => DeviceState::SwitchedOn,
        }
    }

    /// Requests after which callers wait for motion authority to be retracted.
    pub const fn retracts_motion(self) -> bool {
        matches!(self, Self::Shutdown | Self::Stop)
    }
}

impl Default for ProcessRequest {
    fn default() -> Self {
        Self::None
    }
}

// ─── Status / Control Words ─────────────────────────────────────────

bitflags! {
    /// CiA402 status word (0x6041) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusWord: u16 {
        const READY_TO_SWITCH_ON = 0x0001;
        const SWITCHED_ON = 0x0002;
        const OPERATION_ENABLED = 0x0004;
        const FAULT = 0x0008;
        const VOLTAGE_ENABLED = 0x0010;
        const QUICK_STOP = 0x0020;
        const SWITCH_ON_DISABLED = 0x0040;
        const WARNING = 0x0080;
        const REMOTE = 0x0200;
        const TARGET_REACHED = 0x0400;
        const INTERNAL_LIMIT = 0x0800;
    }
}

impl StatusWord {
    pub const fn has_fault(self) -> bool {
        self.contains(Self::FAULT)
    }
}

bitflags! {
    /// CiA402 control word (0x6040) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlWord: u16 {
        const SWITCH_ON = 0x0001;
        const ENABLE_VOLTAGE = 0x0002;
        const QUICK_STOP = 0x0004;
        const ENABLE_OPERATION = 0x0008;
        const FAULT_RESET = 0x0080;
        const HALT = 0x0100;
    }
}

impl ControlWord {
    /// 0x0006: go to READY_TO_SWITCH_ON.
    pub const SHUTDOWN_CMD: Self = Self::ENABLE_VOLTAGE.union(Self::QUICK_STOP);
    /// 0x0007: go to SWITCHED_ON.
    pub const SWITCH_ON_CMD: Self = Self::SHUTDOWN_CMD.union(Self::SWITCH_ON);
    /// 0x000F: go to OPERATION_ENABLED.
    pub const ENABLE_OPERATION_CMD: Self = Self::SWITCH_ON_CMD.union(Self::ENABLE_OPERATION);
    /// 0x0000: go to SWITCH_ON_DISABLED.
    pub const DISABLE_VOLTAGE_CMD: Self = Self::empty();
    /// 0x0080: acknowledge a fault.
    pub const FAULT_RESET_CMD: Self = Self::FAULT_RESET;
}

// ─── Modes ──────────────────────────────────────────────────────────

/// Modes of operation (0x6060).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum OperationMode {
    ProfilePosition = 1,
    Velocity = 2,
    ProfileVelocity = 3,
    ProfileTorque = 4,
    Homing = 6,
    InterpolatedPosition = 7,
    CyclicSyncPosition = 8,
    CyclicSyncVelocity = 9,
    CyclicSyncTorque = 10,
}

impl OperationMode {
    pub const fn from_i8(v: i8) -> Option<Self> {
        match v {
            1 => Some(Self::ProfilePosition),
            2 => Some(Self::Velocity),
            3 => Some(Self::ProfileVelocity),
            4 => Some(Self::ProfileTorque),
            6 => Some(Self::Homing),
            7 => Some(Self::InterpolatedPosition),
            8 => Some(Self::CyclicSyncPosition),
            9 => Some(Self::CyclicSyncVelocity),
            10 => Some(Self::CyclicSyncTorque),
            _ => None,
        }
    }

    pub const fn code(self) -> i8 {
        self as i8
    }
}

impl Default for OperationMode {
    fn default() -> Self {
        Self::CyclicSyncPosition
    }
}

/// Who produces motion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunMode {
    /// Autonomous back-and-forth trapezoidal profile.
    Auto = 0,
    /// Targets forwarded from external motion commands.
    Manual = 1,
}

impl RunMode {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Auto),
            1 => Some(Self::Manual),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Auto
    }
}
