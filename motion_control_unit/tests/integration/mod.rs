//! Shared rig: a bound pipeline over a simulated master, stepped by hand.

mod binder;
mod lifecycle;
mod scenario_auto;
mod scenario_fault;
mod scenario_manual;
mod scenario_shutdown;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use motion_common::config::{MotionConfig, SlaveConfig};
use motion_common::drive::{DeviceState, ProcessRequest};
use motion_common::engine::{EngineParams, MasterEngine, MasterState};
use motion_control_unit::axis::AxisSet;
use motion_control_unit::binder::{self as mcu_binder, AddressMap};
use motion_control_unit::channel::AxisChannel;
use motion_control_unit::cycle::JobPipeline;
use motion_sim::{SimOptions, SimulatedMaster};

pub const SLAVE: u16 = 1001;

/// Config with one slave serving `axes` axes.
pub fn config(axes: u8) -> MotionConfig {
    MotionConfig::with_slaves(vec![SlaveConfig {
        address: SLAVE,
        axes,
    }])
}

pub struct Rig {
    pub sim: Arc<SimulatedMaster>,
    pub channel: Arc<AxisChannel>,
    pub pipeline: JobPipeline,
    pub run_flag: Arc<AtomicBool>,
}

impl Rig {
    /// Bring a simulated bus to OP and broadcast START, without threads.
    pub fn new(config: MotionConfig) -> Self {
        Self::with_options(SimOptions::from_config(&config), config)
    }

    pub fn with_options(options: SimOptions, config: MotionConfig) -> Self {
        config.validate().unwrap();
        let sim = Arc::new(SimulatedMaster::new(options).unwrap());
        let engine: Arc<dyn MasterEngine> = sim.clone();
        let timeout = Duration::from_millis(100);

        engine
            .init(&EngineParams {
                link: "sim0".into(),
                cycle_time_us: config.cycle_time_us,
                max_retries: 3,
            })
            .unwrap();
        engine.set_state(MasterState::Init, timeout).unwrap();

        let channel = Arc::new(
            AxisChannel::new(config.total_axes(), config.run_mode)
                .unwrap()
                .with_settle_timeout(Duration::from_millis(config.shutdown.settle_timeout_ms)),
        );
        let mut axes = AxisSet::from_config(&config).unwrap();
        axes.check_presence(&*engine, false).unwrap();
        for axis in axes.iter() {
            channel.set_unit_scale(axis.index, axis.scale).unwrap();
        }

        engine.set_state(MasterState::PreOp, timeout).unwrap();
        let outcome = mcu_binder::bind(
            &*engine,
            axes.spans(),
            &AddressMap::from_config(&config.addressing),
            config.cycle_time_us,
        )
        .unwrap();
        axes.apply_bindings(&outcome);

        let run_flag = Arc::new(AtomicBool::new(true));
        let mut pipeline = JobPipeline::new(
            engine.clone(),
            Arc::clone(&channel),
            &config,
            Arc::clone(&run_flag),
        );
        pipeline.attach(axes);

        engine.set_state(MasterState::SafeOp, timeout).unwrap();
        engine.set_state(MasterState::Op, timeout).unwrap();
        channel.broadcast(ProcessRequest::Start);

        Self {
            sim,
            channel,
            pipeline,
            run_flag,
        }
    }

    pub fn cycles(&mut self, n: usize) {
        for _ in 0..n {
            self.pipeline.run_cycle();
        }
    }

    /// Step until `axis` reports `state`; panics after `limit` cycles.
    pub fn cycle_until(&mut self, axis: usize, state: DeviceState, limit: usize) -> usize {
        for n in 0..limit {
            if self.channel.device_state(axis).unwrap() == state {
                return n;
            }
            self.pipeline.run_cycle();
        }
        panic!(
            "axis {axis} did not reach {state} within {limit} cycles (at {})",
            self.channel.device_state(axis).unwrap()
        );
    }

    /// Control words the simulated drive applied, consecutive repeats removed.
    pub fn distinct_control_words(&self, axis: usize) -> Vec<u16> {
        let mut words: Vec<u16> = self.sim.drive(axis).unwrap().control_history().collect();
        words.dedup();
        words
    }
}
