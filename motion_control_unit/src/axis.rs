//! Axis registry.
//!
//! Axes live in a fixed-capacity arena ([`AxisSet`]) created once at prepare
//! time from the slave map; the axis index is the handle used by the channel
//! and the console. Each [`Axis`] owns its bindings, drive state machine,
//! profile state and the values it cached from the channel last cycle.
//!
//! Per-cycle work is split in three calls, run in this order by the pipeline:
//!
//! | Call                   | Reads         | Writes                      |
//! |------------------------|---------------|-----------------------------|
//! | `refresh_feedback`     | input region  | cached snapshot             |
//! | `drive`                | status word   | control word                |
//! | `generate`             | actual pos    | mode, target pos/vel        |

use heapless::Vec as FixedVec;
use motion_common::command::{MotionCommand, MotionState, UnitScale};
use motion_common::config::MotionConfig;
use motion_common::consts::{DEFAULT_ENCODER_CPR, DEFAULT_GEAR_RATIO, MAX_AXES};
use motion_common::drive::{OperationMode, ProcessRequest, RunMode};
use motion_common::engine::MasterEngine;
use tracing::{debug, error, info, warn};

use crate::binder::{AxisBindings, BindOutcome, Binding, SlaveSpan};
use crate::error::{ChannelError, CoreError};
use crate::state::{DriveStateMachine, DriveStep};
use crate::trajectory::{ProfileParams, ProfileState};

// ─── Axis ───────────────────────────────────────────────────────────

/// Runtime state of one axis.
#[derive(Debug, Clone)]
pub struct Axis {
    /// Global axis index.
    pub index: usize,
    /// Owning slave station address.
    pub slave: u16,
    /// Position within the owning slave.
    pub local_index: usize,
    /// Slave answered the presence check.
    pub present: bool,
    pub bindings: AxisBindings,
    pub mode: OperationMode,
    pub machine: DriveStateMachine,
    pub profile: ProfileState,
    /// Scale cached from the channel.
    pub scale: UnitScale,
    /// Command cached from the channel.
    pub command: Option<MotionCommand>,
    /// Last feedback read from the process image.
    pub feedback: MotionState,
}

impl Axis {
    /// Read every bound input into the feedback snapshot. Unbound → 0.
    pub fn refresh_feedback(&mut self, input: &[u8]) -> MotionState {
        let b = &self.bindings;
        let read_i32 = |binding: Option<Binding<i32>>| {
            binding.map(|x| x.read(input)).unwrap_or(0)
        };
        let read_i16 = |binding: Option<Binding<i16>>| {
            binding.map(|x| x.read(input)).unwrap_or(0)
        };
        self.feedback = MotionState {
            status_word: b.status_word.map(|x| x.read(input)).unwrap_or(0),
            q_fb: self.scale.to_engineering(read_i32(b.position_actual)),
            dq_fb: self.scale.to_engineering(read_i32(b.velocity_actual)),
            tau_fb: read_i16(b.torque_actual) as f64,
            motor_state: b.error_code.map(|x| x.read(input)).unwrap_or(0) as u32,
            temperature: [read_i16(b.mcu_temperature), read_i16(b.motor_temperature)],
            igbt_temperature: read_i16(b.igbt_temperature),
            dc_link_voltage: b.dc_link_voltage.map(|x| x.read(input)).unwrap_or(0),
            following_error: read_i32(b.following_error),
        };
        self.feedback
    }

    /// Evaluate the drive state machine and write the selected control word.
    ///
    /// Axes without a status-word binding are skipped.
    pub fn drive(&mut self, request: ProcessRequest, input: &[u8], output: &mut [u8]) -> DriveStep {
        let Some(sw_binding) = self.bindings.status_word else {
            return DriveStep::default();
        };
        let status_word = sw_binding.read(input);
        let step = self.machine.update(request, status_word);

        if let Some(t) = step.transition {
            if t.is_fault_onset() {
                warn!(
                    axis = self.index,
                    from = %t.from,
                    status_word = format_args!("0x{:04X}", t.status_word),
                    "drive fault"
                );
            } else {
                info!(
                    axis = self.index,
                    from = %t.from,
                    to = %t.to,
                    status_word = format_args!("0x{:04X}", t.status_word),
                    "drive state change"
                );
            }
        }
        if let (Some(word), Some(cw)) = (step.control_word, self.bindings.control_word) {
            cw.write(output, word.bits());
        }
        step
    }

    /// Write mode-of-operation and motion targets for this cycle.
    ///
    /// Targets follow the command (MANUAL) or the profile (AUTO) only in
    /// OPERATION_ENABLED; otherwise they are pinned to the actual position.
    pub fn generate(
        &mut self,
        run_mode: RunMode,
        params: &ProfileParams,
        input: &[u8],
        output: &mut [u8],
    ) {
        let b = self.bindings;
        if let Some(mode) = b.modes_of_operation {
            mode.write(output, self.mode.code());
        }
        let actual = b.position_actual.map(|x| x.read(input));

        if !self.machine.is_enabled() {
            if let Some(target) = b.target_velocity {
                target.write(output, 0);
            }
            match actual {
                Some(actual) => {
                    self.profile.sync_to_actual(actual, params);
                    if let Some(target) = b.target_position {
                        target.write(output, actual);
                    }
                }
                None => self.profile.hold(),
            }
            return;
        }

        match run_mode {
            RunMode::Manual => match self.command.filter(MotionCommand::is_enabled) {
                Some(cmd) => {
                    if let Some(target) = b.target_position {
                        target.write(output, self.scale.to_counts(cmd.q));
                    }
                    if let Some(target) = b.target_velocity {
                        target.write(output, self.scale.to_counts(cmd.dq));
                    }
                }
                None => {
                    if let (Some(actual), Some(target)) = (actual, b.target_position) {
                        target.write(output, actual);
                    }
                    if let Some(target) = b.target_velocity {
                        target.write(output, 0);
                    }
                    self.profile.hold();
                }
            },
            RunMode::Auto => {
                let targets = self.profile.step(params);
                if let Some(target) = b.target_position {
                    target.write(output, targets.position);
                }
                if let Some(target) = b.target_velocity {
                    target.write(output, targets.velocity);
                }
            }
        }
    }
}

// ─── Axis Set ───────────────────────────────────────────────────────

/// Fixed-capacity axis arena plus the slave spans it was expanded from.
#[derive(Debug, Clone)]
pub struct AxisSet {
    axes: FixedVec<Axis, MAX_AXES>,
    spans: Vec<SlaveSpan>,
}

impl AxisSet {
    /// Expand the slave map into axes with configured modes and scales.
    pub fn from_config(config: &MotionConfig) -> Result<Self, ChannelError> {
        let mut axes = FixedVec::new();
        let mut spans = Vec::with_capacity(config.slaves.len());
        let total = config.total_axes();

        for slave in &config.slaves {
            let first_axis = axes.len();
            for local_index in 0..slave.axes as usize {
                let index = axes.len();
                let overrides = config.axis(index);
                let cpr = overrides
                    .and_then(|a| a.encoder_cpr)
                    .unwrap_or(DEFAULT_ENCODER_CPR);
                let ratio = overrides
                    .and_then(|a| a.gear_ratio)
                    .unwrap_or(DEFAULT_GEAR_RATIO);
                let axis = Axis {
                    index,
                    slave: slave.address,
                    local_index,
                    present: true,
                    bindings: AxisBindings::default(),
                    mode: overrides.map(|a| a.mode).unwrap_or_default(),
                    machine: DriveStateMachine::new(&config.fault),
                    profile: ProfileState::default(),
                    scale: UnitScale::from_encoder(cpr, ratio)?,
                    command: None,
                    feedback: MotionState::default(),
                };
                axes.push(axis)
                    .map_err(|_| ChannelError::CapacityExceeded(total))?;
            }
            spans.push(SlaveSpan {
                address: slave.address,
                first_axis,
                axis_count: slave.axes as usize,
            });
        }
        info!(axes = axes.len(), slaves = spans.len(), "axis set prepared");
        Ok(Self { axes, spans })
    }

    /// Check every configured slave against the bus.
    ///
    /// Absent slaves are fatal when `strict`; otherwise their axes are kept
    /// and marked absent.
    pub fn check_presence(
        &mut self,
        engine: &dyn MasterEngine,
        strict: bool,
    ) -> Result<(), CoreError> {
        for span in &self.spans {
            let present = match engine.is_slave_present(span.address) {
                Ok(p) => p,
                Err(e) => {
                    error!(slave = span.address, "presence query failed: {e}");
                    false
                }
            };
            if !present {
                if strict {
                    return Err(CoreError::SlaveAbsent(span.address));
                }
                error!(slave = span.address, "slave not present on bus");
            } else {
                debug!(slave = span.address, "slave present");
            }
            for axis in self.axes[span.first_axis..span.first_axis + span.axis_count].iter_mut() {
                axis.present = present;
            }
        }
        Ok(())
    }

    /// Install bindings produced by the binder.
    pub fn apply_bindings(&mut self, outcome: &BindOutcome) {
        for (axis, bindings) in self.axes.iter_mut().zip(&outcome.axes) {
            axis.bindings = *bindings;
            if !bindings.can_drive_state_machine() {
                warn!(
                    axis = axis.index,
                    slave = axis.slave,
                    "control/status word unbound, axis will not be enabled"
                );
            }
        }
    }

    pub fn spans(&self) -> &[SlaveSpan] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Axis> {
        self.axes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Axis> {
        self.axes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Axis> {
        self.axes.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_common::config::{AxisConfig, SlaveConfig};
    use motion_common::drive::DeviceState;

    fn two_slave_config() -> MotionConfig {
        let mut cfg = MotionConfig::with_slaves(vec![
            SlaveConfig { address: 1001, axes: 2 },
            SlaveConfig { address: 1002, axes: 1 },
        ]);
        cfg.axes.push(AxisConfig {
            axis: 2,
            mode: OperationMode::CyclicSyncVelocity,
            encoder_cpr: Some(131_072.0),
            gear_ratio: Some(1.0),
        });
        cfg
    }

    /// Axis with a compact layout: outputs cw@0 tpos@2 tvel@6 mode@10,
    /// inputs sw@0 apos@2 avel@6 torque@10 err@12.
    fn bound_axis() -> Axis {
        let cfg = MotionConfig::with_slaves(vec![SlaveConfig { address: 1, axes: 1 }]);
        let mut set = AxisSet::from_config(&cfg).unwrap();
        let mut axis = set.axes.pop().unwrap();
        axis.bindings = AxisBindings {
            control_word: Some(Binding::at(0)),
            target_position: Some(Binding::at(2)),
            target_velocity: Some(Binding::at(6)),
            modes_of_operation: Some(Binding::at(10)),
            status_word: Some(Binding::at(0)),
            position_actual: Some(Binding::at(2)),
            velocity_actual: Some(Binding::at(6)),
            torque_actual: Some(Binding::at(10)),
            error_code: Some(Binding::at(12)),
            ..Default::default()
        };
        axis
    }

    fn enable(axis: &mut Axis, input: &mut [u8], output: &mut [u8]) {
        Binding::<u16>::at(0).write(input, 0x0237);
        axis.drive(ProcessRequest::Start, input, output);
        assert_eq!(axis.machine.state(), DeviceState::OperationEnabled);
    }

    #[test]
    fn expands_slave_map_with_local_indices() {
        let set = AxisSet::from_config(&two_slave_config()).unwrap();
        assert_eq!(set.len(), 3);
        let locals: Vec<_> = set.iter().map(|a| (a.slave, a.local_index)).collect();
        assert_eq!(locals, vec![(1001, 0), (1001, 1), (1002, 0)]);
        assert_eq!(set.spans()[1].first_axis, 2);
        assert_eq!(set.get(0).unwrap().scale, UnitScale::default_drive());
        assert_eq!(set.get(2).unwrap().mode, OperationMode::CyclicSyncVelocity);
        assert!((set.get(2).unwrap().scale.counts_per_radian() - 20_860.76).abs() < 0.01);
    }

    #[test]
    fn feedback_reads_bound_inputs_only() {
        let mut axis = bound_axis();
        axis.scale = UnitScale::from_encoder(std::f64::consts::TAU, 1.0).unwrap();
        let mut input = [0u8; 16];
        Binding::<u16>::at(0).write(&mut input, 0x0237);
        Binding::<i32>::at(2).write(&mut input, 1500);
        Binding::<i16>::at(10).write(&mut input, -42);
        Binding::<u16>::at(12).write(&mut input, 0x7500);
        let fb = axis.refresh_feedback(&input);
        assert_eq!(fb.status_word, 0x0237);
        assert!((fb.q_fb - 1500.0).abs() < 1e-9);
        assert_eq!(fb.tau_fb, -42.0);
        assert_eq!(fb.motor_state, 0x7500);
        assert_eq!(fb.temperature, [0, 0]);
        assert_eq!(fb.dc_link_voltage, 0);
    }

    #[test]
    fn unbound_status_word_skips_state_machine() {
        let mut axis = bound_axis();
        axis.bindings.status_word = None;
        let input = [0u8; 16];
        let mut output = [0xAAu8; 16];
        assert_eq!(axis.drive(ProcessRequest::Start, &input, &mut output), DriveStep::default());
        assert_eq!(output, [0xAA; 16]);
    }

    #[test]
    fn control_word_written_through_binding() {
        let mut axis = bound_axis();
        let mut input = [0u8; 16];
        let mut output = [0u8; 16];
        Binding::<u16>::at(0).write(&mut input, 0x0250);
        axis.drive(ProcessRequest::Start, &input, &mut output);
        assert_eq!(Binding::<u16>::at(0).read(&output), 0x0006);
    }

    #[test]
    fn disabled_axis_pins_target_to_actual() {
        let p = ProfileParams::new(&Default::default(), 1000);
        let mut axis = bound_axis();
        let mut input = [0u8; 16];
        let mut output = [0u8; 16];
        Binding::<i32>::at(2).write(&mut input, 777);
        axis.generate(RunMode::Auto, &p, &input, &mut output);
        assert_eq!(Binding::<i32>::at(2).read(&output), 777);
        assert_eq!(Binding::<i8>::at(10).read(&output), 8);
        assert_eq!(axis.profile.position, 77.7);
    }

    #[test]
    fn disabled_axis_zeroes_stale_target_velocity() {
        let p = ProfileParams::new(&Default::default(), 1000);
        let mut axis = bound_axis();
        let mut input = [0u8; 16];
        let mut output = [0u8; 16];
        enable(&mut axis, &mut input, &mut output);
        for _ in 0..200 {
            axis.generate(RunMode::Auto, &p, &input, &mut output);
        }
        assert!(Binding::<i32>::at(6).read(&output) > 0);

        Binding::<u16>::at(0).write(&mut input, 0x0231);
        axis.drive(ProcessRequest::Shutdown, &input, &mut output);
        assert!(!axis.machine.is_enabled());
        axis.generate(RunMode::Auto, &p, &input, &mut output);
        assert_eq!(Binding::<i32>::at(6).read(&output), 0);
    }

    #[test]
    fn manual_command_converted_to_counts() {
        let p = ProfileParams::new(&Default::default(), 1000);
        let mut axis = bound_axis();
        axis.scale = UnitScale::from_encoder(131_072.0, 1.0).unwrap();
        let mut input = [0u8; 16];
        let mut output = [0u8; 16];
        enable(&mut axis, &mut input, &mut output);
        axis.command = Some(MotionCommand::follow(1.57, -0.5));
        axis.generate(RunMode::Manual, &p, &input, &mut output);
        assert_eq!(
            Binding::<i32>::at(2).read(&output),
            axis.scale.to_counts(1.57)
        );
        assert_eq!(Binding::<i32>::at(6).read(&output), axis.scale.to_counts(-0.5));
    }

    #[test]
    fn manual_without_enabled_command_holds() {
        let p = ProfileParams::new(&Default::default(), 1000);
        let mut axis = bound_axis();
        let mut input = [0u8; 16];
        let mut output = [0u8; 16];
        enable(&mut axis, &mut input, &mut output);
        Binding::<i32>::at(2).write(&mut input, -300);
        Binding::<i32>::at(6).write(&mut output, 99);
        axis.command = Some(MotionCommand::stop());
        axis.generate(RunMode::Manual, &p, &input, &mut output);
        assert_eq!(Binding::<i32>::at(2).read(&output), -300);
        assert_eq!(Binding::<i32>::at(6).read(&output), 0);
    }

    #[test]
    fn auto_mode_advances_profile() {
        let p = ProfileParams::new(&Default::default(), 1000);
        let mut axis = bound_axis();
        let mut input = [0u8; 16];
        let mut output = [0u8; 16];
        enable(&mut axis, &mut input, &mut output);
        for _ in 0..200 {
            axis.generate(RunMode::Auto, &p, &input, &mut output);
        }
        assert!(Binding::<i32>::at(2).read(&output) > 0);
        assert!(Binding::<i32>::at(6).read(&output) > 0);
    }
}
