//! Shutdown: request hold, settle wait, stuck drives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use motion_common::command::MotionCommand;
use motion_common::drive::{DeviceState, ProcessRequest, RunMode};
use motion_control_unit::channel::AxisChannel;

use super::{Rig, config};

/// Step the pipeline on its own thread until the returned flag is cleared.
fn step_in_background(mut rig: Rig) -> (Arc<AxisChannel>, Arc<AtomicBool>, JoinHandle<Rig>) {
    let channel = rig.channel.clone();
    let stepping = Arc::new(AtomicBool::new(true));
    let flag = stepping.clone();
    let handle = thread::spawn(move || {
        while flag.load(Ordering::Acquire) {
            rig.cycles(1);
            thread::sleep(Duration::from_millis(1));
        }
        rig
    });
    (channel, stepping, handle)
}

#[test]
fn shutdown_broadcast_retracts_every_axis() {
    let mut rig = Rig::new(config(3));
    rig.cycles(10);
    assert!(rig.channel.any_enabled());

    rig.channel.post(ProcessRequest::Shutdown);
    rig.cycles(3);

    assert!(!rig.channel.any_enabled());
    assert!(rig.channel.wait_motion_retracted(Duration::ZERO));
    for axis in 0..3 {
        assert_eq!(
            rig.sim.drive(axis).unwrap().state(),
            DeviceState::ReadyToSwitchOn
        );
    }
}

#[test]
fn held_requests_ignore_the_run_mode() {
    let mut rig = Rig::new(config(1));
    rig.cycles(10);
    rig.channel.post(ProcessRequest::Shutdown);
    rig.cycles(50);

    // AUTO would otherwise restart the axis every cycle.
    assert_eq!(
        rig.channel.device_state(0).unwrap(),
        DeviceState::ReadyToSwitchOn
    );
    assert_eq!(rig.channel.request(0).unwrap(), ProcessRequest::Shutdown);

    rig.channel.post(ProcessRequest::Start);
    rig.cycle_until(0, DeviceState::OperationEnabled, 10);
}

#[test]
fn manual_commands_do_not_override_a_held_shutdown() {
    let mut c = config(1);
    c.run_mode = RunMode::Manual;
    let mut rig = Rig::new(c);
    rig.cycles(10);

    rig.channel.post(ProcessRequest::Shutdown);
    rig.channel
        .set_command(0, MotionCommand::follow(0.5, 0.0))
        .unwrap();
    rig.cycles(10);
    assert!(!rig.channel.any_enabled());
}

#[test]
fn stuck_drive_times_out_the_settle_wait() {
    let mut rig = Rig::new(config(2));
    rig.cycles(10);
    rig.sim.set_stuck(1, true).unwrap();

    rig.channel.post(ProcessRequest::Shutdown);
    rig.cycles(10);
    assert_eq!(
        rig.channel.device_state(0).unwrap(),
        DeviceState::ReadyToSwitchOn
    );
    assert_eq!(
        rig.channel.device_state(1).unwrap(),
        DeviceState::OperationEnabled
    );

    let started = Instant::now();
    assert!(!rig.channel.wait_motion_retracted(Duration::from_millis(50)));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn settle_wait_returns_once_the_pipeline_retracts() {
    let mut rig = Rig::new(config(1));
    rig.cycles(10);
    rig.channel.post(ProcessRequest::Shutdown);

    let channel = rig.channel.clone();
    let waiter = std::thread::spawn(move || channel.wait_motion_retracted(Duration::from_secs(5)));
    rig.cycles(3);
    assert!(waiter.join().unwrap());
}

#[test]
fn shutdown_broadcast_blocks_until_the_pipeline_retracts() {
    let mut rig = Rig::new(config(2));
    rig.cycles(10);
    assert!(rig.channel.any_enabled());

    let (channel, stepping, handle) = step_in_background(rig);
    assert!(channel.broadcast(ProcessRequest::Shutdown));
    assert!(!channel.any_enabled());
    stepping.store(false, Ordering::Release);
    let rig = handle.join().unwrap();

    for axis in 0..2 {
        assert_eq!(
            rig.sim.drive(axis).unwrap().state(),
            DeviceState::ReadyToSwitchOn
        );
    }
}

#[test]
fn stop_broadcast_keeps_axes_enabled_until_the_settle_timeout() {
    let mut c = config(1);
    c.shutdown.settle_timeout_ms = 100;
    let mut rig = Rig::new(c);
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);

    let (channel, stepping, handle) = step_in_background(rig);
    let started = Instant::now();
    assert!(!channel.broadcast(ProcessRequest::Stop));
    assert!(started.elapsed() >= Duration::from_millis(100));
    stepping.store(false, Ordering::Release);
    let rig = handle.join().unwrap();

    // Enable operation is re-asserted; only SHUTDOWN leaves OPERATION_ENABLED.
    assert_eq!(rig.distinct_control_words(0).last(), Some(&0x0F));
    assert_eq!(
        rig.channel.device_state(0).unwrap(),
        DeviceState::OperationEnabled
    );
}
