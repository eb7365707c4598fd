//! Startup, supervision and orderly shutdown of the control core.
//!
//! ## Startup
//! 1. Engine init (link, cycle time, retry budget).
//! 2. Cycle timer: software thread started, or link-layer hook registered.
//! 3. Job pipeline thread spawned; it idles until the axis set arrives.
//! 4. INIT → prepare axes (slave map, presence, default scales) → PRE-OP →
//!    bind → hand axes to the pipeline → SAFE-OP → OP → DC config.
//! 5. START broadcast to every axis.
//!
//! ## Supervision
//! Poll every 5 ms until the run flag clears or the run duration elapses;
//! query DC status periodically.
//!
//! ## Shutdown
//! SHUTDOWN broadcast, bounded settle wait, engine → INIT, pipeline stop
//! (bounded join), timer stop, engine deinit.
//!
//! Any startup failure skips straight to the shutdown steps that apply and is
//! returned to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use motion_common::config::{MotionConfig, TimingStrategy};
use motion_common::consts::SUPERVISOR_POLL_MS;
use motion_common::drive::ProcessRequest;
use motion_common::engine::{DcMode, EngineParams, MasterEngine, MasterState};
use tracing::{debug, error, info, warn};

use crate::axis::AxisSet;
use crate::binder::{self, AddressMap};
use crate::channel::AxisChannel;
use crate::cycle::{CycleStats, JobPipeline, RtParams};
use crate::error::CoreError;
use crate::timer::{CycleTimer, LinkLayerTimer, SoftwareTimer, TimerError};

/// What a completed run reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Pipeline statistics; `None` if the pipeline did not stop in time.
    pub stats: Option<CycleStats>,
    /// Every axis left OPERATION_ENABLED within the settle bound.
    pub settled: bool,
    /// Slaves whose metadata could not be bound.
    pub skipped_slaves: Vec<u16>,
}

/// Owns the engine handle and the exchange channel for one run.
pub struct MotionCore {
    config: MotionConfig,
    engine: Arc<dyn MasterEngine>,
    channel: Arc<AxisChannel>,
    run_flag: Arc<AtomicBool>,
    rt: Option<RtParams>,
}

impl MotionCore {
    /// Validate `config` and allocate the channel for its slave map.
    pub fn new(config: MotionConfig, engine: Arc<dyn MasterEngine>) -> Result<Self, CoreError> {
        config
            .validate()
            .map_err(crate::config::ConfigError::ValidationError)?;
        let channel = Arc::new(
            AxisChannel::new(config.total_axes(), config.run_mode)?
                .with_settle_timeout(Duration::from_millis(config.shutdown.settle_timeout_ms)),
        );
        Ok(Self {
            config,
            engine,
            channel,
            run_flag: Arc::new(AtomicBool::new(true)),
            rt: None,
        })
    }

    /// Elevate the pipeline and software timer threads.
    pub fn with_rt(mut self, rt: RtParams) -> Self {
        self.rt = Some(rt);
        self
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn channel(&self) -> Arc<AxisChannel> {
        Arc::clone(&self.channel)
    }

    /// Clearing this flag ends supervision and starts the shutdown sequence.
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.run_flag)
    }

    /// Run the full startup → supervision → shutdown sequence.
    pub fn run(&self) -> Result<RunSummary, CoreError> {
        let params = EngineParams {
            link: self.config.engine.link.clone(),
            cycle_time_us: self.config.cycle_time_us,
            max_retries: self.config.engine.max_retries,
        };
        info!(
            engine = self.engine.name(),
            link = %params.link,
            cycle_time_us = params.cycle_time_us,
            axes = self.channel.axis_count(),
            "initializing engine"
        );
        self.engine.init(&params)?;

        let result = self.run_initialized();

        if let Err(e) = self.engine.deinit() {
            warn!("engine deinit failed: {e}");
        }
        info!("engine deinitialized");
        result
    }

    fn run_initialized(&self) -> Result<RunSummary, CoreError> {
        let mut timer = self.create_timer()?;
        let event = timer.event();
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let mut pipeline = JobPipeline::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.channel),
            &self.config,
            Arc::clone(&self.run_flag),
        )
        .with_handoff(rx);
        if let Some(rt) = self.rt {
            pipeline = pipeline.with_rt(rt);
        }

        let spawned = {
            let event = Arc::clone(&event);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("job-pipeline".into())
                .spawn(move || pipeline.run(event, shutdown))
        };
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                stop_timer(timer.as_mut());
                return Err(CoreError::Spawn {
                    name: "job-pipeline",
                    source,
                });
            }
        };

        let startup = self.bring_up(tx);
        let settled = match &startup {
            Ok(_) => {
                self.supervise();
                self.settle()
            }
            Err(e) => {
                error!("startup failed: {e}");
                false
            }
        };

        self.transition_logged(MasterState::Init);
        shutdown.store(true, Ordering::Release);
        event.signal();
        let stats = self.join_pipeline(handle);
        stop_timer(timer.as_mut());

        if let Some(s) = &stats {
            info!(
                cycles = s.cycle_count,
                missed = s.missed_wakeups,
                overloads = s.overload_events,
                min_ns = if s.cycle_count > 0 { s.min_cycle_ns } else { 0 },
                max_ns = s.max_cycle_ns,
                avg_ns = s.avg_cycle_ns(),
                "cycle statistics"
            );
        }

        let skipped_slaves = startup?;
        Ok(RunSummary {
            stats,
            settled,
            skipped_slaves,
        })
    }

    fn create_timer(&self) -> Result<Box<dyn CycleTimer>, CoreError> {
        match self.config.timing {
            TimingStrategy::Software => {
                let mut timer = SoftwareTimer::new();
                if let Some(rt) = self.rt {
                    timer = timer.with_rt(rt);
                }
                timer.start(Duration::from_micros(u64::from(self.config.cycle_time_us)))?;
                Ok(Box::new(timer))
            }
            TimingStrategy::LinkLayer => Ok(Box::new(LinkLayerTimer::register(&*self.engine)?)),
        }
    }

    fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.config.engine.state_change_timeout_ms)
    }

    fn transition(&self, state: MasterState) -> Result<(), CoreError> {
        info!(%state, "requesting engine state");
        self.engine
            .set_state(state, self.state_timeout())
            .map_err(|source| CoreError::StateTransition { state, source })
    }

    fn transition_logged(&self, state: MasterState) {
        if let Err(e) = self.transition(state) {
            error!("{e}");
        }
    }

    /// Startup steps 4 and 5. Returns the slaves skipped by the binder.
    fn bring_up(&self, tx: Sender<AxisSet>) -> Result<Vec<u16>, CoreError> {
        self.transition(MasterState::Init)?;

        let mut axes = AxisSet::from_config(&self.config)?;
        axes.check_presence(&*self.engine, self.config.strict_slave_presence)?;
        for axis in axes.iter() {
            self.channel.set_unit_scale(axis.index, axis.scale)?;
        }

        self.transition(MasterState::PreOp)?;

        let map = AddressMap::from_config(&self.config.addressing);
        let outcome = binder::bind(&*self.engine, axes.spans(), &map, self.config.cycle_time_us)?;
        axes.apply_bindings(&outcome);
        tx.send(axes).map_err(|_| CoreError::PipelineUnavailable)?;

        self.transition(MasterState::SafeOp)?;
        self.transition(MasterState::Op)?;

        if self.config.dc.mode != DcMode::Off {
            match self.engine.configure_dc(&self.config.dc) {
                Ok(()) => info!(mode = ?self.config.dc.mode, "DC configured"),
                Err(e) => warn!("DC configuration failed: {e}"),
            }
        }

        self.channel.broadcast(ProcessRequest::Start);
        info!(
            run_mode = self.channel.run_mode().name(),
            "motion core operational"
        );
        Ok(outcome.skipped_slaves)
    }

    fn supervise(&self) {
        let start = Instant::now();
        let limit = (self.config.duration_ms > 0)
            .then(|| Duration::from_millis(self.config.duration_ms));
        let dc_interval = Duration::from_millis(self.config.diagnostics.dc_status_interval_ms);
        let mut next_dc = start + dc_interval;
        let mut dc_stats_reset = false;

        while self.run_flag.load(Ordering::Acquire) {
            if let Some(limit) = limit {
                if start.elapsed() >= limit {
                    info!(duration_ms = self.config.duration_ms, "run duration elapsed");
                    break;
                }
            }
            if self.config.dc.mode.reports_status() && Instant::now() >= next_dc {
                next_dc += dc_interval;
                match self.engine.dc_status() {
                    Ok(status) => {
                        if !dc_stats_reset {
                            self.engine.reset_dc_status();
                            dc_stats_reset = true;
                        }
                        if self.config.diagnostics.dc_log {
                            info!(
                                state = ?status.state,
                                cur_ns = status.deviation_cur_ns,
                                avg_ns = status.deviation_avg_ns,
                                max_ns = status.deviation_max_ns,
                                "DC deviation"
                            );
                        }
                    }
                    Err(e) => debug!("DC status unavailable: {e}"),
                }
            }
            thread::sleep(Duration::from_millis(SUPERVISOR_POLL_MS));
        }
        info!("supervision ended, shutting down");
    }

    /// Broadcast SHUTDOWN and wait for motion authority to be retracted.
    fn settle(&self) -> bool {
        let settled = self.channel.broadcast(ProcessRequest::Shutdown);
        if settled {
            info!("all axes left OPERATION_ENABLED");
        }
        settled
    }

    fn join_pipeline(&self, handle: JoinHandle<CycleStats>) -> Option<CycleStats> {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.shutdown.pipeline_join_timeout_ms);
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("job pipeline did not stop in time, detaching");
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                error!("job pipeline panicked");
                None
            }
        }
    }
}

fn stop_timer(timer: &mut dyn CycleTimer) {
    match timer.stop() {
        Ok(()) | Err(TimerError::NotSupported(_)) => {}
        Err(e) => warn!(timer = timer.name(), "timer stop failed: {e}"),
    }
}
