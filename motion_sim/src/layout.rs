//! PDO layout of the simulated bus.
//!
//! Every slave maps the full object catalog for each of its axes unless an
//! object is listed in [`SimSlave::omit`]. Axis `n` of a slave uses object
//! index `base + n * stride`. Variables are packed back to back per region
//! in slave order, outputs and inputs separately, so offsets are stable for
//! a given slave list.

use std::collections::HashMap;

use motion_common::consts::{AXIS_OBJECT_STRIDE, MAX_AXES};
use motion_common::engine::{ProcessImageLayout, ProcessVarInfo};
use motion_common::object::{Direction, ObjectId, ObjectKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("duplicate slave address {0}")]
    DuplicateAddress(u16),

    #[error("slave {0} has zero axes")]
    ZeroAxes(u16),

    #[error("{0} axes simulated, maximum is {max}", max = MAX_AXES)]
    TooManyAxes(usize),

    #[error("slave {address} axis {local} object {object} leaves the index space")]
    IndexOverflow {
        address: u16,
        local: usize,
        object: ObjectKind,
    },
}

// ─── Slave description ──────────────────────────────────────────────

/// One simulated slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSlave {
    pub address: u16,
    pub name: String,
    pub axes: u8,
    /// Object index distance between axes.
    pub stride: u16,
    /// Catalog entries this device does not map.
    pub omit: Vec<ObjectKind>,
    /// Absent slaves keep their image space but never exchange data.
    pub present: bool,
    /// Metadata queries fail when cleared.
    pub metadata_available: bool,
    /// Exchange cycles each drive stays NOT_READY after power-on.
    pub boot_cycles: u32,
}

impl SimSlave {
    pub fn new(address: u16, axes: u8) -> Self {
        Self {
            address,
            name: format!("SimServo-{address}"),
            axes,
            stride: AXIS_OBJECT_STRIDE,
            omit: Vec::new(),
            present: true,
            metadata_available: true,
            boot_cycles: 0,
        }
    }

    pub fn omit(mut self, kind: ObjectKind) -> Self {
        self.omit.push(kind);
        self
    }

    pub fn with_stride(mut self, stride: u16) -> Self {
        self.stride = stride;
        self
    }

    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    pub fn without_metadata(mut self) -> Self {
        self.metadata_available = false;
        self
    }

    pub fn with_boot_cycles(mut self, cycles: u32) -> Self {
        self.boot_cycles = cycles;
        self
    }

    fn maps(&self, kind: ObjectKind) -> bool {
        !self.omit.contains(&kind)
    }
}

// ─── Map ────────────────────────────────────────────────────────────

/// One mapped process variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedVar {
    pub kind: ObjectKind,
    /// Global axis index.
    pub axis: usize,
    pub info: ProcessVarInfo,
}

/// Mapped variables of one slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveImage {
    pub slave: SimSlave,
    pub first_axis: usize,
    pub outputs: Vec<MappedVar>,
    pub inputs: Vec<MappedVar>,
}

/// Complete process image layout of the simulated bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdoMap {
    slaves: Vec<SlaveImage>,
    input_len: usize,
    output_len: usize,
    axis_count: usize,
    offsets: HashMap<(usize, ObjectKind), usize>,
}

impl PdoMap {
    pub fn build(slaves: Vec<SimSlave>) -> Result<Self, LayoutError> {
        let mut map = Self {
            slaves: Vec::with_capacity(slaves.len()),
            input_len: 0,
            output_len: 0,
            axis_count: 0,
            offsets: HashMap::new(),
        };

        for slave in slaves {
            if slave.axes == 0 {
                return Err(LayoutError::ZeroAxes(slave.address));
            }
            if map.slave(slave.address).is_some() {
                return Err(LayoutError::DuplicateAddress(slave.address));
            }
            let first_axis = map.axis_count;
            map.axis_count += slave.axes as usize;
            if map.axis_count > MAX_AXES {
                return Err(LayoutError::TooManyAxes(map.axis_count));
            }

            let mut outputs = Vec::new();
            let mut inputs = Vec::new();
            for local in 0..slave.axes as usize {
                let axis = first_axis + local;
                for kind in ObjectKind::ALL.into_iter().filter(|k| slave.maps(*k)) {
                    let base = kind.base();
                    let index = u16::try_from(base.index as usize + local * slave.stride as usize)
                        .map_err(|_| LayoutError::IndexOverflow {
                            address: slave.address,
                            local,
                            object: kind,
                        })?;
                    let (cursor, list) = match kind.direction() {
                        Direction::Output => (&mut map.output_len, &mut outputs),
                        Direction::Input => (&mut map.input_len, &mut inputs),
                    };
                    let byte_offset = *cursor;
                    *cursor += kind.byte_len();
                    map.offsets.insert((axis, kind), byte_offset);
                    list.push(MappedVar {
                        kind,
                        axis,
                        info: ProcessVarInfo {
                            name: format!("Axis{local}.{}", kind.name()),
                            id: ObjectId::new(index, base.subindex),
                            bit_offset: (byte_offset * 8) as u32,
                            bit_len: (kind.byte_len() * 8) as u16,
                        },
                    });
                }
            }
            map.slaves.push(SlaveImage {
                slave,
                first_axis,
                outputs,
                inputs,
            });
        }
        Ok(map)
    }

    pub fn slaves(&self) -> &[SlaveImage] {
        &self.slaves
    }

    pub fn slave(&self, address: u16) -> Option<&SlaveImage> {
        self.slaves.iter().find(|s| s.slave.address == address)
    }

    /// Slave image serving global axis `axis`.
    pub fn slave_of(&self, axis: usize) -> Option<&SlaveImage> {
        self.slaves
            .iter()
            .find(|s| (s.first_axis..s.first_axis + s.slave.axes as usize).contains(&axis))
    }

    pub fn axis_count(&self) -> usize {
        self.axis_count
    }

    pub fn layout(&self) -> ProcessImageLayout {
        ProcessImageLayout {
            input_len: self.input_len,
            output_len: self.output_len,
        }
    }

    /// Byte offset of `kind` for global axis `axis` in its region.
    pub fn offset(&self, axis: usize, kind: ObjectKind) -> Option<usize> {
        self.offsets.get(&(axis, kind)).copied()
    }
}
