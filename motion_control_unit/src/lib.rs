//! # Motion Control Unit Library
//!
//! Cyclic control core for CiA402 servo drives behind a fieldbus master
//! engine. Every bus cycle it refreshes axis feedback from the process image,
//! steps each drive's state machine toward the requested state and writes
//! position/velocity targets, either from an autonomous trapezoidal profile
//! (AUTO) or from externally supplied motion commands (MANUAL).
//!
//! ## Threads
//!
//! | Thread | Role |
//! |--------|------|
//! | supervisor (caller) | startup, DC status polling, shutdown |
//! | `job-pipeline` | fixed-order engine jobs + application step |
//! | `cycle-timer` | software pacing (or the engine's link layer) |
//! | console (optional) | line protocol over stdin/stdout |
//!
//! ## Data flow
//!
//! External actors talk to the pipeline only through [`channel::AxisChannel`]:
//! latest-wins command and snapshot cells per axis plus per-axis process
//! requests. The pipeline never blocks on the channel.
//!
//! ## Zero-Allocation Cycle
//!
//! Axis state, bindings and command buffers are sized at startup
//! (`MAX_AXES`); the cycle body performs no heap allocation.

pub mod axis;
pub mod binder;
pub mod channel;
pub mod config;
pub mod console;
pub mod cycle;
pub mod error;
pub mod state;
pub mod supervisor;
pub mod timer;
pub mod trajectory;
