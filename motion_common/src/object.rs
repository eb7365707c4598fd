//! Logical object catalog.
//!
//! Every process variable the control core knows how to use is listed in
//! [`ObjectKind`]. A catalog entry carries the base object index of the first
//! axis, the process-image direction and the byte width of its value. The
//! per-axis index is derived by the addressing scheme configured in the
//! binder.

use serde::{Deserialize, Serialize};

use crate::consts::*;

/// CoE object identifier (index + subindex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub index: u16,
    pub subindex: u8,
}

impl ObjectId {
    pub const fn new(index: u16, subindex: u8) -> Self {
        Self { index, subindex }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}:{}", self.index, self.subindex)
    }
}

/// Process-image region a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// To-device, written by the control core.
    Output,
    /// From-device, written by the engine during frame processing.
    Input,
}

/// Known logical objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    // Outputs
    ControlWord,
    TargetPosition,
    TargetVelocity,
    TargetTorque,
    ModesOfOperation,
    DigitalOutput1,
    DigitalOutput2,
    // Inputs
    ErrorCode,
    StatusWord,
    PositionActual,
    VelocityActual,
    TorqueActual,
    FollowingError,
    DigitalInput1,
    DigitalInput2,
    McuTemperature,
    MotorTemperature,
    IgbtTemperature,
    DcLinkVoltage,
}

impl ObjectKind {
    /// Full catalog in binding order.
    pub const ALL: [ObjectKind; 19] = [
        ObjectKind::ControlWord,
        ObjectKind::TargetPosition,
        ObjectKind::TargetVelocity,
        ObjectKind::TargetTorque,
        ObjectKind::ModesOfOperation,
        ObjectKind::DigitalOutput1,
        ObjectKind::DigitalOutput2,
        ObjectKind::ErrorCode,
        ObjectKind::StatusWord,
        ObjectKind::PositionActual,
        ObjectKind::VelocityActual,
        ObjectKind::TorqueActual,
        ObjectKind::FollowingError,
        ObjectKind::DigitalInput1,
        ObjectKind::DigitalInput2,
        ObjectKind::McuTemperature,
        ObjectKind::MotorTemperature,
        ObjectKind::IgbtTemperature,
        ObjectKind::DcLinkVoltage,
    ];

    /// Object id of this entry for the first axis of a slave.
    pub const fn base(self) -> ObjectId {
        match self {
            Self::ControlWord => ObjectId::new(OBJ_CONTROL_WORD, 0),
            Self::TargetPosition => ObjectId::new(OBJ_TARGET_POSITION, 0),
            Self::TargetVelocity => ObjectId::new(OBJ_TARGET_VELOCITY, 0),
            Self::TargetTorque => ObjectId::new(OBJ_TARGET_TORQUE, 0),
            Self::ModesOfOperation => ObjectId::new(OBJ_MODES_OF_OPERATION, 0),
            Self::DigitalOutput1 => ObjectId::new(OBJ_DIGITAL_OUTPUT, 1),
            Self::DigitalOutput2 => ObjectId::new(OBJ_DIGITAL_OUTPUT, 2),
            Self::ErrorCode => ObjectId::new(OBJ_ERROR_CODE, 0),
            Self::StatusWord => ObjectId::new(OBJ_STATUS_WORD, 0),
            Self::PositionActual => ObjectId::new(OBJ_POSITION_ACTUAL, 0),
            Self::VelocityActual => ObjectId::new(OBJ_VELOCITY_ACTUAL, 0),
            Self::TorqueActual => ObjectId::new(OBJ_TORQUE_ACTUAL, 0),
            Self::FollowingError => ObjectId::new(OBJ_FOLLOWING_ERROR, 0),
            Self::DigitalInput1 => ObjectId::new(OBJ_DIGITAL_INPUT, 1),
            Self::DigitalInput2 => ObjectId::new(OBJ_DIGITAL_INPUT, 2),
            Self::McuTemperature => ObjectId::new(OBJ_MCU_TEMPERATURE, 0),
            Self::MotorTemperature => ObjectId::new(OBJ_MOTOR_TEMPERATURE, 0),
            Self::IgbtTemperature => ObjectId::new(OBJ_IGBT_TEMPERATURE, 0),
            Self::DcLinkVoltage => ObjectId::new(OBJ_DC_LINK_VOLTAGE, 0),
        }
    }

    pub const fn direction(self) -> Direction {
        match self {
            Self::ControlWord
            | Self::TargetPosition
            | Self::TargetVelocity
            | Self::TargetTorque
            | Self::ModesOfOperation
            | Self::DigitalOutput1
            | Self::DigitalOutput2 => Direction::Output,
            _ => Direction::Input,
        }
    }

    /// Width of the mapped value in bytes.
    pub const fn byte_len(self) -> usize {
        match self {
            Self::ModesOfOperation => 1,
            Self::TargetPosition
            | Self::TargetVelocity
            | Self::PositionActual
            | Self::VelocityActual
            | Self::FollowingError => 4,
            _ => 2,
        }
    }

    /// Whether the subindex takes part in matching.
    ///
    /// Only the digital I/O arrays share one index across several entries;
    /// every other object is matched on its index alone.
    pub const fn matches_subindex(self) -> bool {
        matches!(
            self,
            Self::DigitalInput1 | Self::DigitalInput2 | Self::DigitalOutput1 | Self::DigitalOutput2
        )
    }

    /// Whether a process variable with `id` satisfies this entry once the
    /// entry has been resolved to `expected` for a given axis.
    pub fn matches(self, expected: ObjectId, id: ObjectId) -> bool {
        expected.index == id.index && (!self.matches_subindex() || expected.subindex == id.subindex)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ControlWord => "control_word",
            Self::TargetPosition => "target_position",
            Self::TargetVelocity => "target_velocity",
            Self::TargetTorque => "target_torque",
            Self::ModesOfOperation => "modes_of_operation",
            Self::DigitalOutput1 => "digital_output_1",
            Self::DigitalOutput2 => "digital_output_2",
            Self::ErrorCode => "error_code",
            Self::StatusWord => "status_word",
            Self::PositionActual => "position_actual",
            Self::VelocityActual => "velocity_actual",
            Self::TorqueActual => "torque_actual",
            Self::FollowingError => "following_error",
            Self::DigitalInput1 => "digital_input_1",
            Self::DigitalInput2 => "digital_input_2",
            Self::McuTemperature => "mcu_temperature",
            Self::MotorTemperature => "motor_temperature",
            Self::IgbtTemperature => "igbt_temperature",
            Self::DcLinkVoltage => "dc_link_voltage",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_ids_are_unique() {
        let ids: HashSet<ObjectId> = ObjectKind::ALL.iter().map(|k| k.base()).collect();
        assert_eq!(ids.len(), ObjectKind::ALL.len());
    }

    #[test]
    fn digital_io_matches_on_subindex() {
        let di1 = ObjectKind::DigitalInput1.base();
        assert!(ObjectKind::DigitalInput1.matches(di1, ObjectId::new(0x6000, 1)));
        assert!(!ObjectKind::DigitalInput1.matches(di1, ObjectId::new(0x6000, 2)));
    }

    #[test]
    fn plain_objects_ignore_subindex() {
        let sw = ObjectKind::StatusWord.base();
        assert!(ObjectKind::StatusWord.matches(sw, ObjectId::new(0x6041, 0)));
        assert!(ObjectKind::StatusWord.matches(sw, ObjectId::new(0x6041, 3)));
        assert!(!ObjectKind::StatusWord.matches(sw, ObjectId::new(0x6841, 0)));
    }

    #[test]
    fn directions() {
        assert_eq!(ObjectKind::ControlWord.direction(), Direction::Output);
        assert_eq!(ObjectKind::DigitalOutput2.direction(), Direction::Output);
        assert_eq!(ObjectKind::StatusWord.direction(), Direction::Input);
        assert_eq!(ObjectKind::DcLinkVoltage.direction(), Direction::Input);
    }

    #[test]
    fn object_id_display() {
        assert_eq!(ObjectId::new(0x607A, 0).to_string(), "0x607A:0");
    }
}
