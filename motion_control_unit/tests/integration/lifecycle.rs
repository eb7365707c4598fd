//! Full supervisor runs: startup, supervision, shutdown, startup failures.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use motion_common::config::{MotionConfig, SlaveConfig, TimingStrategy};
use motion_common::drive::DeviceState;
use motion_common::engine::{EngineError, MasterEngine, MasterState};
use motion_control_unit::binder::BindError;
use motion_control_unit::config::load_config_from_str;
use motion_control_unit::error::CoreError;
use motion_control_unit::supervisor::{MotionCore, RunSummary};
use motion_sim::{SimOptions, SimSlave, SimulatedMaster};

use super::{SLAVE, config};

fn timed(mut c: MotionConfig, duration_ms: u64) -> MotionConfig {
    c.duration_ms = duration_ms;
    c
}

type Outcome = (Arc<SimulatedMaster>, MotionCore, Result<RunSummary, CoreError>);

fn run_with(options: SimOptions, config: MotionConfig) -> Outcome {
    let sim = Arc::new(SimulatedMaster::new(options).unwrap());
    let core = MotionCore::new(config, sim.clone()).unwrap();
    let result = core.run();
    (sim, core, result)
}

fn run(config: MotionConfig) -> Outcome {
    run_with(SimOptions::from_config(&config), config)
}

#[test]
fn software_timed_run_settles_and_deinitializes() {
    let (sim, core, result) = run(timed(config(2), 200));
    let summary = result.unwrap();

    let stats = summary.stats.unwrap();
    assert!(stats.cycle_count > 10, "only {} cycles", stats.cycle_count);
    assert!(summary.settled);
    assert!(summary.skipped_slaves.is_empty());

    let channel = core.channel();
    for axis in 0..2 {
        assert_eq!(
            channel.device_state(axis).unwrap(),
            DeviceState::ReadyToSwitchOn
        );
    }
    // Engine released.
    assert_eq!(sim.state(), MasterState::Unknown);
    assert!(sim.drive(0).is_none());
}

#[test]
fn link_layer_timed_run_settles() {
    let mut c = timed(config(1), 200);
    c.timing = TimingStrategy::LinkLayer;
    let (_, _, result) = run(c);
    let summary = result.unwrap();

    assert!(summary.stats.unwrap().cycle_count > 10);
    assert!(summary.settled);
}

#[test]
fn clearing_the_run_flag_ends_an_unbounded_run() {
    let c = config(1);
    let sim = Arc::new(SimulatedMaster::new(SimOptions::from_config(&c)).unwrap());
    let core = MotionCore::new(c, sim).unwrap();
    let flag = core.run_flag();
    let channel = core.channel();

    let stopper = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !channel.any_enabled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        flag.store(false, Ordering::Release);
    });
    let summary = core.run().unwrap();
    stopper.join().unwrap();

    assert!(summary.settled);
    assert!(!core.run_flag().load(Ordering::Acquire));
}

#[test]
fn evaluation_expiry_stops_the_run() {
    let mut c = timed(config(1), 10_000);
    c.shutdown.settle_timeout_ms = 50;
    let options = SimOptions::from_config(&c).expire_after(200);

    let started = Instant::now();
    let (sim, core, result) = run_with(options, c);
    let summary = result.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!core.run_flag().load(Ordering::Acquire));
    // Frames stopped flowing, so the drives could not be walked back.
    assert!(!summary.settled);
    assert_eq!(sim.state(), MasterState::Unknown);
}

#[test]
fn failing_init_is_fatal() {
    let c = timed(config(1), 50);
    let options = SimOptions::from_config(&c).fail_init();
    let (_, _, result) = run_with(options, c);

    assert!(matches!(
        result,
        Err(CoreError::Engine(EngineError::InitFailed(_)))
    ));
}

#[test]
fn failing_transition_is_fatal_and_releases_the_engine() {
    let c = timed(config(1), 50);
    let options = SimOptions::from_config(&c).fail_transition_to(MasterState::SafeOp);
    let (sim, _, result) = run_with(options, c);

    match result {
        Err(CoreError::StateTransition { state, source }) => {
            assert_eq!(state, MasterState::SafeOp);
            assert!(matches!(source, EngineError::Timeout(_)));
        }
        other => panic!("expected a transition failure, got {other:?}"),
    }
    assert_eq!(sim.state(), MasterState::Unknown);
}

#[test]
fn missing_process_image_is_fatal() {
    let c = timed(config(1), 50);
    let options = SimOptions::from_config(&c).without_process_image();
    let (_, _, result) = run_with(options, c);

    assert!(matches!(
        result,
        Err(CoreError::Bind(BindError::ProcessImageUnavailable))
    ));
}

fn with_absent_slave(strict: bool) -> (MotionConfig, SimOptions) {
    let mut c = MotionConfig::with_slaves(vec![
        SlaveConfig { address: SLAVE, axes: 1 },
        SlaveConfig { address: 1002, axes: 1 },
    ]);
    c.duration_ms = 100;
    c.strict_slave_presence = strict;
    let options = SimOptions::new(vec![
        SimSlave::new(SLAVE, 1),
        SimSlave::new(1002, 1).absent(),
    ]);
    (c, options)
}

#[test]
fn absent_slave_is_skipped_by_default() {
    let (c, options) = with_absent_slave(false);
    let (_, core, result) = run_with(options, c);
    let summary = result.unwrap();

    assert_eq!(summary.skipped_slaves, vec![1002]);
    assert!(summary.settled);
    let channel = core.channel();
    assert_eq!(
        channel.device_state(0).unwrap(),
        DeviceState::ReadyToSwitchOn
    );
    assert_eq!(channel.device_state(1).unwrap(), DeviceState::NotReady);
}

#[test]
fn absent_slave_is_fatal_when_strict() {
    let (c, options) = with_absent_slave(true);
    let (_, _, result) = run_with(options, c);
    assert!(matches!(result, Err(CoreError::SlaveAbsent(1002))));
}

#[test]
fn invalid_config_is_rejected_before_the_engine_is_touched() {
    let mut c = config(1);
    c.cycle_time_us = 0;
    let sim = Arc::new(SimulatedMaster::new(SimOptions::from_config(&c)).unwrap());
    let result = MotionCore::new(c, sim.clone());

    assert!(matches!(result, Err(CoreError::Config(_))));
    assert_eq!(sim.state(), MasterState::Unknown);
}

#[test]
fn file_config_runs_end_to_end() {
    let c = load_config_from_str(
        r#"
        cycle_time_us = 2000
        duration_ms = 150
        run_mode = "manual"

        [[slaves]]
        address = 1001
        axes = 2

        [[axes]]
        axis = 1
        mode = "cyclic_sync_velocity"
        "#,
    )
    .unwrap();
    let (_, core, result) = run(c);
    let summary = result.unwrap();

    assert!(summary.settled);
    assert_eq!(core.config().cycle_time_us, 2000);
    assert_eq!(core.channel().axis_count(), 2);
}
