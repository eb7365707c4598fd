//! Motion Common Library
//!
//! Shared definitions for the motion control workspace: the fieldbus object
//! catalog, CiA402 drive vocabulary, command/feedback types, configuration
//! structures and the capability trait through which the control core talks
//! to a fieldbus master engine.
//!
//! # Module Structure
//!
//! - [`consts`] - System limits, object indices and default tuning values
//! - [`object`] - Logical object catalog (control word, status word, ...)
//! - [`drive`] - Device states, process-state requests, control/status words
//! - [`command`] - Motion command, feedback snapshot and unit scale
//! - [`config`] - TOML configuration structures with bound validation
//! - [`engine`] - `MasterEngine` trait and engine-facing types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! motion = { package = "motion_common", path = "../motion_common" }
//! ```

pub mod command;
pub mod config;
pub mod consts;
pub mod drive;
pub mod engine;
pub mod object;
pub mod prelude;
