//! Control core error types.
//!
//! Setup-time failures are fatal and propagate to the caller of
//! [`MotionCore::run`](crate::supervisor::MotionCore::run). Cycle-time
//! conditions never surface here; they are logged by the pipeline.

use motion_common::command::ScaleError;
use motion_common::engine::{EngineError, MasterState};
use thiserror::Error;

use crate::binder::BindError;
use crate::config::ConfigError;
use crate::timer::TimerError;

/// Per-axis channel access errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("axis {axis} out of range (axis count {count})")]
    InvalidAxis { axis: usize, count: usize },

    #[error("axis count {0} exceeds registry capacity")]
    CapacityExceeded(usize),

    #[error(transparent)]
    Scale(#[from] ScaleError),
}

/// Fatal startup / shutdown errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("engine transition to {state} failed: {source}")]
    StateTransition {
        state: MasterState,
        #[source]
        source: EngineError,
    },

    #[error("address binding: {0}")]
    Bind(#[from] BindError),

    #[error("cycle timer: {0}")]
    Timer(#[from] TimerError),

    #[error("axis registry: {0}")]
    Channel(#[from] ChannelError),

    #[error("slave {0} is not present on the bus")]
    SlaveAbsent(u16),

    #[error("job pipeline exited before the axis set was handed over")]
    PipelineUnavailable,

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("RT setup: {0}")]
    RtSetup(String),
}
