//! AUTO mode: enable sequence, profile targets, feedback publication.

use motion_common::drive::{DeviceState, OperationMode};
use motion_common::engine::{MasterEngine, MasterState};

use super::{Rig, config};

#[test]
fn enable_takes_the_shortest_path() {
    let mut rig = Rig::new(config(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    rig.cycles(10);

    assert_eq!(rig.distinct_control_words(0), vec![0x06, 0x07, 0x0F]);
    assert_eq!(
        rig.sim.drive(0).unwrap().state(),
        DeviceState::OperationEnabled
    );
}

#[test]
fn every_axis_of_a_multi_axis_slave_enables() {
    let mut rig = Rig::new(config(3));
    rig.cycles(10);
    for axis in 0..3 {
        assert_eq!(
            rig.channel.device_state(axis).unwrap(),
            DeviceState::OperationEnabled,
            "axis {axis}"
        );
        assert_eq!(
            rig.sim.drive(axis).unwrap().mode(),
            OperationMode::CyclicSyncPosition
        );
    }
}

#[test]
fn profile_ramps_target_away_from_actual() {
    let mut rig = Rig::new(config(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    let start = rig.sim.drive(0).unwrap().target_position();

    let mut last = start;
    for _ in 0..200 {
        rig.cycles(1);
        let target = rig.sim.drive(0).unwrap().target_position();
        assert!(target >= last, "target went backwards: {last} -> {target}");
        last = target;
    }
    assert!(last > start);
}

#[test]
fn feedback_follows_the_drive() {
    let mut rig = Rig::new(config(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    rig.cycles(100);

    let drive = rig.sim.drive(0).unwrap();
    let state = rig.channel.state(0).unwrap();
    let scale = rig.channel.scale(0).unwrap();
    assert_eq!(state.status_word, drive.status_word());
    // One cycle behind the drive at most.
    let lag = (scale.to_counts(state.q_fb) - drive.position()).abs();
    assert!(lag < 50, "feedback lags by {lag} counts");
    assert!(state.dq_fb > 0.0);
}

#[test]
fn safeop_publishes_feedback_without_driving() {
    let mut rig = Rig::new(config(1));
    rig.sim
        .set_state(MasterState::SafeOp, std::time::Duration::from_millis(10))
        .unwrap();
    rig.cycles(10);

    assert_eq!(rig.sim.drive(0).unwrap().control_history().count(), 0);
    assert_eq!(rig.channel.state(0).unwrap().status_word, 0x0250);
    assert_eq!(rig.channel.device_state(0).unwrap(), DeviceState::NotReady);
}

#[test]
fn frame_loss_raises_and_decays_the_overload_counter() {
    let mut rig = Rig::new(config(1));
    rig.cycles(1);
    rig.sim.drop_frames(3);
    rig.cycles(3);

    assert_eq!(rig.sim.lost_frames(), 3);
    assert_eq!(rig.pipeline.stats().overload_events, 3);
    let peak = rig.pipeline.overload_counter();
    assert!(peak > 0);

    rig.cycles(5);
    assert_eq!(rig.pipeline.overload_counter(), peak - 5);
}

#[test]
fn evaluation_expiry_clears_the_run_flag() {
    use std::sync::atomic::Ordering;

    let c = config(1);
    let options = motion_sim::SimOptions::from_config(&c).expire_after(5);
    let mut rig = Rig::with_options(options, c);
    rig.cycles(5);
    assert!(rig.run_flag.load(Ordering::Acquire));

    rig.cycles(1);
    assert!(!rig.run_flag.load(Ordering::Acquire));
    assert_eq!(rig.sim.cycles(), 5);
}
