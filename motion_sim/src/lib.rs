//! # Motion Simulation Engine
//!
//! In-process [`MasterEngine`](motion_common::engine::MasterEngine) used for
//! development and testing without a fieldbus.
//!
//! ## Components
//!
//! - [`drive`] - CiA402 drive emulator (status word, fault, CSP/CSV motion)
//! - [`layout`] - PDO layout per simulated slave, objects can be omitted
//! - [`master`] - `SimulatedMaster`: state changes, cyclic exchange, fault
//!   and frame-loss injection, link-layer cycle hook, notifications, DC status
//!
//! ## Exchange timing
//!
//! Outputs written by the control core are latched at `SendCycFrames` and
//! reach the drives at the next `ProcessRxFrames`, which also refreshes the
//! input region. The core therefore sees the drive react one cycle later,
//! the same as on a real bus.

pub mod drive;
pub mod layout;
pub mod master;

pub use drive::{DriveFault, SimDrive};
pub use layout::{LayoutError, PdoMap, SimSlave};
pub use master::{SimOptions, SimulatedMaster};
