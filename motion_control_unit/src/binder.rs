//! Address binder: logical objects → process-image offsets.
//!
//! Runs once per configuration load, in PREOP, before the pipeline starts
//! producing outputs. For every slave it asks the engine for the slave's
//! output and input process variables, then for every axis of that slave and
//! every catalog entry resolves the axis-specific object id through the
//! [`AddressMap`] and records a typed [`Binding`] on a match.
//!
//! Unmatched entries stay `None`. Consumers pattern-match the `Option`, so a
//! device layout that does not expose an object simply loses the dependent
//! feature.
//!
//! ## Failure policy
//! - No process image → [`BindError::ProcessImageUnavailable`], fatal.
//! - Metadata query failure for one slave → logged, slave skipped.
//! - Binding that would not fit in its region → logged, left unresolved.

use std::collections::HashMap;
use std::marker::PhantomData;

use motion_common::config::AddressingConfig;
use motion_common::engine::{MasterEngine, ProcessImageLayout, ProcessVarInfo};
use motion_common::object::{Direction, ObjectId, ObjectKind};
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// The engine has no process image (not configured / not in PREOP).
    #[error("process image unavailable")]
    ProcessImageUnavailable,
}

// ─── Typed bindings ─────────────────────────────────────────────────

/// Value type that can live in the process image (little-endian).
pub trait PdoValue: Copy + Default {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_pdo_value {
    ($($t:ty),*) => {$(
        impl PdoValue for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(buf)
            }

            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
        }
    )*};
}

impl_pdo_value!(u8, i8, u16, i16, u32, i32);

/// Resolved location of one value inside a process-image region.
///
/// Only constructed by the binder after checking that the value fits the
/// region; the accessors still bound-check and degrade to default/no-op.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Binding<T> {
    byte_offset: usize,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Binding<T> {}

impl<T: PdoValue> Binding<T> {
    pub const fn at(byte_offset: usize) -> Self {
        Self {
            byte_offset,
            _value: PhantomData,
        }
    }

    pub const fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    #[inline]
    pub fn read(&self, region: &[u8]) -> T {
        region
            .get(self.byte_offset..self.byte_offset + T::SIZE)
            .map(T::read_le)
            .unwrap_or_default()
    }

    #[inline]
    pub fn write(&self, region: &mut [u8], value: T) {
        if let Some(dst) = region.get_mut(self.byte_offset..self.byte_offset + T::SIZE) {
            value.write_le(dst);
        }
    }
}

/// Every bindable field of one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisBindings {
    // Outputs
    pub control_word: Option<Binding<u16>>,
    pub target_position: Option<Binding<i32>>,
    pub target_velocity: Option<Binding<i32>>,
    pub target_torque: Option<Binding<i16>>,
    pub modes_of_operation: Option<Binding<i8>>,
    pub digital_outputs: [Option<Binding<u16>>; 2],
    // Inputs
    pub error_code: Option<Binding<u16>>,
    pub status_word: Option<Binding<u16>>,
    pub position_actual: Option<Binding<i32>>,
    pub velocity_actual: Option<Binding<i32>>,
    pub torque_actual: Option<Binding<i16>>,
    pub following_error: Option<Binding<i32>>,
    pub digital_inputs: [Option<Binding<u16>>; 2],
    pub mcu_temperature: Option<Binding<i16>>,
    pub motor_temperature: Option<Binding<i16>>,
    pub igbt_temperature: Option<Binding<i16>>,
    pub dc_link_voltage: Option<Binding<u16>>,
}

impl AxisBindings {
    /// Record `kind` at `byte_offset`.
    pub fn set(&mut self, kind: ObjectKind, byte_offset: usize) {
        match kind {
            ObjectKind::ControlWord => self.control_word = Some(Binding::at(byte_offset)),
            ObjectKind::TargetPosition => self.target_position = Some(Binding::at(byte_offset)),
            ObjectKind::TargetVelocity => self.target_velocity = Some(Binding::at(byte_offset)),
            ObjectKind::TargetTorque => self.target_torque = Some(Binding::at(byte_offset)),
            ObjectKind::ModesOfOperation => {
                self.modes_of_operation = Some(Binding::at(byte_offset))
            }
            ObjectKind::DigitalOutput1 => self.digital_outputs[0] = Some(Binding::at(byte_offset)),
            ObjectKind::DigitalOutput2 => self.digital_outputs[1] = Some(Binding::at(byte_offset)),
            ObjectKind::ErrorCode => self.error_code = Some(Binding::at(byte_offset)),
            ObjectKind::StatusWord => self.status_word = Some(Binding::at(byte_offset)),
            ObjectKind::PositionActual => self.position_actual = Some(Binding::at(byte_offset)),
            ObjectKind::VelocityActual => self.velocity_actual = Some(Binding::at(byte_offset)),
            ObjectKind::TorqueActual => self.torque_actual = Some(Binding::at(byte_offset)),
            ObjectKind::FollowingError => self.following_error = Some(Binding::at(byte_offset)),
            ObjectKind::DigitalInput1 => self.digital_inputs[0] = Some(Binding::at(byte_offset)),
            ObjectKind::DigitalInput2 => self.digital_inputs[1] = Some(Binding::at(byte_offset)),
            ObjectKind::McuTemperature => self.mcu_temperature = Some(Binding::at(byte_offset)),
            ObjectKind::MotorTemperature => self.motor_temperature = Some(Binding::at(byte_offset)),
            ObjectKind::IgbtTemperature => self.igbt_temperature = Some(Binding::at(byte_offset)),
            ObjectKind::DcLinkVoltage => self.dc_link_voltage = Some(Binding::at(byte_offset)),
        }
    }

    /// Byte offset bound for `kind`, if any.
    pub fn offset_of(&self, kind: ObjectKind) -> Option<usize> {
        match kind {
            ObjectKind::ControlWord => self.control_word.map(|b| b.byte_offset()),
            ObjectKind::TargetPosition => self.target_position.map(|b| b.byte_offset()),
            ObjectKind::TargetVelocity => self.target_velocity.map(|b| b.byte_offset()),
            ObjectKind::TargetTorque => self.target_torque.map(|b| b.byte_offset()),
            ObjectKind::ModesOfOperation => self.modes_of_operation.map(|b| b.byte_offset()),
            ObjectKind::DigitalOutput1 => self.digital_outputs[0].map(|b| b.byte_offset()),
            ObjectKind::DigitalOutput2 => self.digital_outputs[1].map(|b| b.byte_offset()),
            ObjectKind::ErrorCode => self.error_code.map(|b| b.byte_offset()),
            ObjectKind::StatusWord => self.status_word.map(|b| b.byte_offset()),
            ObjectKind::PositionActual => self.position_actual.map(|b| b.byte_offset()),
            ObjectKind::VelocityActual => self.velocity_actual.map(|b| b.byte_offset()),
            ObjectKind::TorqueActual => self.torque_actual.map(|b| b.byte_offset()),
            ObjectKind::FollowingError => self.following_error.map(|b| b.byte_offset()),
            ObjectKind::DigitalInput1 => self.digital_inputs[0].map(|b| b.byte_offset()),
            ObjectKind::DigitalInput2 => self.digital_inputs[1].map(|b| b.byte_offset()),
            ObjectKind::McuTemperature => self.mcu_temperature.map(|b| b.byte_offset()),
            ObjectKind::MotorTemperature => self.motor_temperature.map(|b| b.byte_offset()),
            ObjectKind::IgbtTemperature => self.igbt_temperature.map(|b| b.byte_offset()),
            ObjectKind::DcLinkVoltage => self.dc_link_voltage.map(|b| b.byte_offset()),
        }
    }

    pub fn is_bound(&self, kind: ObjectKind) -> bool {
        self.offset_of(kind).is_some()
    }

    pub fn bound_count(&self) -> usize {
        ObjectKind::ALL.iter().filter(|k| self.is_bound(**k)).count()
    }

    /// The state machine needs both words to make progress.
    pub fn can_drive_state_machine(&self) -> bool {
        self.status_word.is_some() && self.control_word.is_some()
    }
}

// ─── Addressing ─────────────────────────────────────────────────────

/// Logical object → per-axis object id.
///
/// The default formula is `base.index + local_axis * stride`; explicit
/// per-axis entries take precedence for devices that do not follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMap {
    stride: u16,
    overrides: HashMap<(usize, ObjectKind), ObjectId>,
}

impl AddressMap {
    pub fn with_stride(stride: u16) -> Self {
        Self {
            stride,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &AddressingConfig) -> Self {
        let mut map = Self::with_stride(config.stride);
        for o in &config.overrides {
            let subindex = o.subindex.unwrap_or(o.object.base().subindex);
            map.overrides
                .insert((o.axis, o.object), ObjectId::new(o.index, subindex));
        }
        map
    }

    /// Pin `kind` of global axis `axis` to an explicit id.
    pub fn insert(&mut self, axis: usize, kind: ObjectKind, id: ObjectId) {
        self.overrides.insert((axis, kind), id);
    }

    /// Object id for `kind` on the `local_axis`-th axis of a slave whose
    /// global index is `axis`. `None` if the formula leaves the index space.
    pub fn resolve(&self, kind: ObjectKind, axis: usize, local_axis: usize) -> Option<ObjectId> {
        if let Some(id) = self.overrides.get(&(axis, kind)) {
            return Some(*id);
        }
        let base = kind.base();
        let index = base.index as usize + local_axis * self.stride as usize;
        u16::try_from(index)
            .ok()
            .map(|index| ObjectId::new(index, base.subindex))
    }
}

// ─── Bind ───────────────────────────────────────────────────────────

/// Contiguous axis range served by one slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveSpan {
    pub address: u16,
    /// Global index of the slave's first axis.
    pub first_axis: usize,
    pub axis_count: usize,
}

/// Result of a bind pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BindOutcome {
    /// One entry per global axis.
    pub axes: Vec<AxisBindings>,
    /// Slaves whose metadata could not be read.
    pub skipped_slaves: Vec<u16>,
    /// Cycle time for profile math [s].
    pub cycle_seconds: f64,
}

/// Resolve every catalog entry of every axis.
pub fn bind(
    engine: &dyn MasterEngine,
    slaves: &[SlaveSpan],
    map: &AddressMap,
    cycle_time_us: u32,
) -> Result<BindOutcome, BindError> {
    let layout = engine
        .process_image_layout()
        .ok_or(BindError::ProcessImageUnavailable)?;

    let total = slaves
        .iter()
        .map(|s| s.first_axis + s.axis_count)
        .max()
        .unwrap_or(0);
    let mut axes = vec![AxisBindings::default(); total];
    let mut skipped_slaves = Vec::new();

    for slave in slaves {
        match bind_slave(engine, slave, map, layout, &mut axes) {
            Ok(bound) => info!(
                slave = slave.address,
                axes = slave.axis_count,
                bound,
                "slave objects bound"
            ),
            Err(e) => {
                error!(slave = slave.address, "slave metadata unavailable, skipped: {e}");
                skipped_slaves.push(slave.address);
            }
        }
    }

    Ok(BindOutcome {
        axes,
        skipped_slaves,
        cycle_seconds: cycle_time_us as f64 / 1_000_000.0,
    })
}

/// Bind one slave. The variable lists live only for this call.
fn bind_slave(
    engine: &dyn MasterEngine,
    slave: &SlaveSpan,
    map: &AddressMap,
    layout: ProcessImageLayout,
    axes: &mut [AxisBindings],
) -> Result<usize, motion_common::engine::EngineError> {
    let info = engine.slave_info(slave.address)?;
    debug!(
        slave = slave.address,
        name = %info.name,
        inputs = info.input_var_count,
        outputs = info.output_var_count,
        "slave config info"
    );

    let mut bound = 0;
    {
        let outputs = engine.output_vars(slave.address)?;
        bound += bind_region(
            &outputs,
            Direction::Output,
            layout.output_len,
            slave,
            map,
            axes,
        );
    }
    {
        let inputs = engine.input_vars(slave.address)?;
        bound += bind_region(&inputs, Direction::Input, layout.input_len, slave, map, axes);
    }
    Ok(bound)
}

fn bind_region(
    vars: &[ProcessVarInfo],
    direction: Direction,
    region_len: usize,
    slave: &SlaveSpan,
    map: &AddressMap,
    axes: &mut [AxisBindings],
) -> usize {
    let mut bound = 0;
    for local in 0..slave.axis_count {
        let axis = slave.first_axis + local;
        let Some(bindings) = axes.get_mut(axis) else {
            continue;
        };
        for kind in ObjectKind::ALL.iter().filter(|k| k.direction() == direction) {
            let Some(expected) = map.resolve(*kind, axis, local) else {
                continue;
            };
            let Some(var) = vars.iter().find(|v| kind.matches(expected, v.id)) else {
                continue;
            };
            let byte_offset = (var.bit_offset / 8) as usize;
            if byte_offset + kind.byte_len() > region_len {
                warn!(
                    axis,
                    object = %kind,
                    byte_offset,
                    region_len,
                    "object outside process image, left unbound"
                );
                continue;
            }
            bindings.set(*kind, byte_offset);
            bound += 1;
            debug!(axis, object = %kind, id = %var.id, byte_offset, "bound");
        }
    }
    bound
}
