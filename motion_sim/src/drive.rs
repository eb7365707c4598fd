//! CiA402 drive emulator.
//!
//! One [`SimDrive`] per simulated axis. Each exchange cycle the drive
//! receives the output values the master latched (control word, targets,
//! mode of operation), advances its device state by at most one hop and
//! reports its inputs (status word, actual values, diagnostics).
//!
//! | State | Status word |
//! |-------|-------------|
//! | NOT_READY | `0x0200` |
//! | SWITCH_ON_DISABLED | `0x0250` |
//! | READY_TO_SWITCH_ON | `0x0231` |
//! | SWITCHED_ON | `0x0233` |
//! | OPERATION_ENABLED | `0x0237` |
//! | QUICK_STOP | `0x0215` |
//! | FAULT | `0x0218` |
//!
//! A fault is acknowledged on the rising edge of the fault-reset bit, unless
//! it was injected as persistent.

use std::collections::VecDeque;

use motion_common::command::saturate_i32;
use motion_common::drive::{ControlWord, DeviceState, OperationMode};
use tracing::debug;

/// Applied control words kept for inspection.
pub const CONTROL_HISTORY_LEN: usize = 512;

const SW_NOT_READY: u16 = 0x0200;
const SW_SWITCH_ON_DISABLED: u16 = 0x0250;
const SW_READY_TO_SWITCH_ON: u16 = 0x0231;
const SW_SWITCHED_ON: u16 = 0x0233;
const SW_OPERATION_ENABLED: u16 = 0x0237;
const SW_QUICK_STOP: u16 = 0x0215;
const SW_FAULT: u16 = 0x0218;

const MCU_TEMPERATURE: i16 = 35;
const MOTOR_TEMPERATURE: i16 = 41;
const IGBT_TEMPERATURE: i16 = 38;
const DC_LINK_VOLTAGE: u16 = 480;

// ─── Exchange values ────────────────────────────────────────────────

/// Values the master hands to a drive for one cycle. `None` = not mapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveOutputs {
    pub control_word: Option<u16>,
    pub target_position: Option<i32>,
    pub target_velocity: Option<i32>,
    pub target_torque: Option<i16>,
    pub mode: Option<i8>,
    pub digital_outputs: [Option<u16>; 2],
}

/// Values a drive reports back for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveInputs {
    pub status_word: u16,
    pub error_code: u16,
    pub position_actual: i32,
    pub velocity_actual: i32,
    pub torque_actual: i16,
    pub following_error: i32,
    pub digital_inputs: [u16; 2],
    pub mcu_temperature: i16,
    pub motor_temperature: i16,
    pub igbt_temperature: i16,
    pub dc_link_voltage: u16,
}

/// Injected device fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveFault {
    /// Value reported in the error-code object.
    pub code: u16,
    /// Fault reset is ignored while set.
    pub persistent: bool,
}

// ─── Drive ──────────────────────────────────────────────────────────

/// Emulated CiA402 servo drive.
#[derive(Debug, Clone)]
pub struct SimDrive {
    state: DeviceState,
    boot_cycles: u32,
    fault: Option<DriveFault>,
    stuck: bool,
    last_control: u16,
    mode: OperationMode,
    position: i32,
    velocity: i32,
    torque: i16,
    target_position: i32,
    position_remainder: f64,
    digital_loopback: [u16; 2],
    reset_edges: u32,
    history: VecDeque<u16>,
}

impl SimDrive {
    pub fn new() -> Self {
        Self {
            state: DeviceState::SwitchOnDisabled,
            boot_cycles: 0,
            fault: None,
            stuck: false,
            last_control: 0,
            mode: OperationMode::default(),
            position: 0,
            velocity: 0,
            torque: 0,
            target_position: 0,
            position_remainder: 0.0,
            digital_loopback: [0; 2],
            reset_edges: 0,
            history: VecDeque::with_capacity(CONTROL_HISTORY_LEN),
        }
    }

    /// Stay NOT_READY for `cycles` exchange cycles after power-on.
    pub fn with_boot_cycles(mut self, cycles: u32) -> Self {
        self.boot_cycles = cycles;
        if cycles > 0 {
            self.state = DeviceState::NotReady;
        }
        self
    }

    /// Start at a given raw position.
    pub fn with_position(mut self, position: i32) -> Self {
        self.position = position;
        self.target_position = position;
        self
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn status_word(&self) -> u16 {
        match self.state {
            DeviceState::NotReady => SW_NOT_READY,
            DeviceState::SwitchOnDisabled => SW_SWITCH_ON_DISABLED,
            DeviceState::ReadyToSwitchOn => SW_READY_TO_SWITCH_ON,
            DeviceState::SwitchedOn => SW_SWITCHED_ON,
            DeviceState::OperationEnabled => SW_OPERATION_ENABLED,
            DeviceState::QuickStop => SW_QUICK_STOP,
            DeviceState::Fault | DeviceState::FaultReaction => SW_FAULT,
        }
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn velocity(&self) -> i32 {
        self.velocity
    }

    /// Last target position received while enabled.
    pub fn target_position(&self) -> i32 {
        self.target_position
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn fault(&self) -> Option<DriveFault> {
        self.fault
    }

    /// Rising edges of the fault-reset bit seen so far.
    pub fn reset_edges(&self) -> u32 {
        self.reset_edges
    }

    /// Control words applied, oldest first.
    pub fn control_history(&self) -> impl Iterator<Item = u16> + '_ {
        self.history.iter().copied()
    }

    /// Force FAULT on the next exchange.
    pub fn inject_fault(&mut self, fault: DriveFault) {
        debug!(code = format_args!("0x{:04X}", fault.code), persistent = fault.persistent, "fault injected");
        self.fault = Some(fault);
        self.state = DeviceState::Fault;
        self.velocity = 0;
    }

    /// Make a persistent fault acknowledgeable again.
    pub fn release_fault(&mut self) {
        if let Some(f) = self.fault.as_mut() {
            f.persistent = false;
        }
    }

    /// A stuck drive ignores every control word.
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    /// One exchange cycle. `outputs` is `None` while outputs are not
    /// delivered (SAFEOP); the drive still reports its inputs.
    pub fn exchange(&mut self, outputs: Option<&DriveOutputs>, cycle_seconds: f64) -> DriveInputs {
        if self.boot_cycles > 0 {
            self.boot_cycles -= 1;
            if self.boot_cycles == 0 && self.state == DeviceState::NotReady {
                self.state = DeviceState::SwitchOnDisabled;
            }
        } else if self.state == DeviceState::QuickStop {
            // Quick stop ramp completes within one cycle.
            self.state = DeviceState::SwitchOnDisabled;
        }

        let previous_velocity = self.velocity;
        if let Some(out) = outputs {
            if let Some(mode) = out.mode.and_then(OperationMode::from_i8) {
                self.mode = mode;
            }
            if let Some(cw) = out.control_word {
                self.apply_control_word(cw);
            }
            for (loopback, value) in self.digital_loopback.iter_mut().zip(out.digital_outputs) {
                if let Some(v) = value {
                    *loopback = v;
                }
            }
            if self.state == DeviceState::OperationEnabled {
                self.follow(out, cycle_seconds);
            } else {
                self.velocity = 0;
            }
        } else if self.state != DeviceState::OperationEnabled {
            self.velocity = 0;
        }

        let accel = i64::from(self.velocity) - i64::from(previous_velocity);
        self.torque = (accel / 16).clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16;
        self.inputs()
    }

    fn inputs(&self) -> DriveInputs {
        DriveInputs {
            status_word: self.status_word(),
            error_code: self.fault.map_or(0, |f| f.code),
            position_actual: self.position,
            velocity_actual: self.velocity,
            torque_actual: self.torque,
            following_error: self.target_position.wrapping_sub(self.position),
            digital_inputs: self.digital_loopback,
            mcu_temperature: MCU_TEMPERATURE,
            motor_temperature: MOTOR_TEMPERATURE,
            igbt_temperature: IGBT_TEMPERATURE,
            dc_link_voltage: DC_LINK_VOLTAGE,
        }
    }

    fn apply_control_word(&mut self, raw: u16) {
        if self.history.len() == CONTROL_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(raw);

        let previous = std::mem::replace(&mut self.last_control, raw);
        if self.stuck {
            return;
        }
        let cw = ControlWord::from_bits_retain(raw);
        let reset_edge = cw.contains(ControlWord::FAULT_RESET)
            && !ControlWord::from_bits_retain(previous).contains(ControlWord::FAULT_RESET);

        if self.state.is_fault() {
            if reset_edge {
                self.reset_edges += 1;
                if self.fault.is_some_and(|f| !f.persistent) {
                    self.fault = None;
                }
                if self.fault.is_none() {
                    self.state = DeviceState::SwitchOnDisabled;
                }
            }
            return;
        }

        let disable_voltage = raw & 0x0082 == 0x0000;
        let quick_stop = raw & 0x0086 == 0x0002;
        let shutdown = raw & 0x0087 == 0x0006;
        let switch_on = raw & 0x008F == 0x0007;
        let enable_operation = raw & 0x008F == 0x000F;

        let next = match self.state {
            DeviceState::NotReady => return,
            DeviceState::SwitchOnDisabled if shutdown => DeviceState::ReadyToSwitchOn,
            DeviceState::ReadyToSwitchOn if switch_on || enable_operation => DeviceState::SwitchedOn,
            DeviceState::SwitchedOn if enable_operation => DeviceState::OperationEnabled,
            DeviceState::SwitchedOn | DeviceState::OperationEnabled if shutdown => {
                DeviceState::ReadyToSwitchOn
            }
            DeviceState::OperationEnabled if switch_on => DeviceState::SwitchedOn,
            DeviceState::OperationEnabled if quick_stop => DeviceState::QuickStop,
            DeviceState::ReadyToSwitchOn | DeviceState::SwitchedOn | DeviceState::OperationEnabled
                if disable_voltage || quick_stop =>
            {
                DeviceState::SwitchOnDisabled
            }
            state => state,
        };
        if next != self.state {
            debug!(from = %self.state, to = %next, control_word = format_args!("0x{raw:04X}"), "drive state");
            if next == DeviceState::OperationEnabled {
                // Take over from the actual position, never jump.
                self.target_position = self.position;
                self.position_remainder = 0.0;
            }
            self.state = next;
        }
    }

    fn follow(&mut self, out: &DriveOutputs, cycle_seconds: f64) {
        match self.mode {
            OperationMode::CyclicSyncVelocity | OperationMode::ProfileVelocity | OperationMode::Velocity => {
                let velocity = out.target_velocity.unwrap_or(0);
                let travel = f64::from(velocity) * cycle_seconds + self.position_remainder;
                let whole = travel.trunc();
                self.position_remainder = travel - whole;
                self.position = saturate_i32(f64::from(self.position) + whole);
                self.target_position = self.position;
                self.velocity = velocity;
            }
            OperationMode::CyclicSyncTorque | OperationMode::ProfileTorque => {
                self.velocity = 0;
            }
            _ => {
                let target = out.target_position.unwrap_or(self.position);
                self.velocity = if cycle_seconds > 0.0 {
                    saturate_i32((f64::from(target) - f64::from(self.position)) / cycle_seconds)
                } else {
                    0
                };
                self.target_position = target;
                self.position = target;
            }
        }
    }
}

impl Default for SimDrive {
    fn default() -> Self {
        Self::new()
    }
}
