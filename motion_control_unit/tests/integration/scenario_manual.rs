//! MANUAL mode: external commands, runtime scale changes, console.

use motion_common::command::{MotionCommand, UnitScale};
use motion_common::config::{AxisConfig, MotionConfig};
use motion_common::drive::{DeviceState, OperationMode, RunMode};
use motion_control_unit::console::{Console, Reply};

use super::{Rig, config};

fn manual(axes: u8) -> MotionConfig {
    let mut c = config(axes);
    c.run_mode = RunMode::Manual;
    c
}

fn direct_drive(mut c: MotionConfig) -> MotionConfig {
    c.axes.push(AxisConfig {
        axis: 0,
        mode: OperationMode::CyclicSyncPosition,
        encoder_cpr: Some(131_072.0),
        gear_ratio: Some(1.0),
    });
    c
}

#[test]
fn commanded_position_is_scaled_to_counts() {
    let mut rig = Rig::new(direct_drive(manual(1)));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);

    rig.channel
        .set_command(0, MotionCommand::follow(1.57, 0.0))
        .unwrap();
    rig.cycles(3);

    let expected = UnitScale::from_encoder(131_072.0, 1.0).unwrap().to_counts(1.57);
    assert_eq!(expected, 32_751);
    assert_eq!(rig.sim.drive(0).unwrap().target_position(), expected);

    rig.cycles(1);
    let q_fb = rig.channel.state(0).unwrap().q_fb;
    assert!((q_fb - 1.57).abs() < 1e-4, "q_fb = {q_fb}");
}

#[test]
fn no_command_holds_actual_position() {
    let mut rig = Rig::new(manual(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    rig.cycles(50);

    let drive = rig.sim.drive(0).unwrap();
    assert_eq!(drive.target_position(), 0);
    assert_eq!(drive.position(), 0);
}

#[test]
fn disabled_command_shuts_the_axis_down() {
    let mut rig = Rig::new(manual(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);

    rig.channel.set_command(0, MotionCommand::stop()).unwrap();
    rig.cycle_until(0, DeviceState::ReadyToSwitchOn, 10);
    assert!(!rig.channel.any_enabled());

    rig.channel
        .set_command(0, MotionCommand::follow(0.0, 0.0))
        .unwrap();
    rig.cycle_until(0, DeviceState::OperationEnabled, 10);
}

#[test]
fn console_drives_a_live_axis() {
    let mut rig = Rig::new(manual(2));
    let console = Console::new(rig.channel.clone());
    rig.cycle_until(1, DeviceState::OperationEnabled, 20);

    let reply = console.handle_line("scale 1 131072 1.0");
    assert_eq!(
        reply,
        Some(Reply::Text(
            "OK: scale axis=1 cpr=131072 ratio=1.000000".to_string()
        ))
    );
    console.handle_line("set 1 1 1.57 0.0");
    rig.cycles(3);
    assert_eq!(rig.sim.drive(1).unwrap().target_position(), 32_751);
    // Axis 0 was never commanded.
    assert_eq!(rig.sim.drive(0).unwrap().target_position(), 0);

    let Some(Reply::Text(state)) = console.handle_line("get 1") else {
        panic!("get returned no text");
    };
    assert!(state.starts_with("STATE axis=1 sw=0x0237"), "{state}");
    let q_fb: f64 = state
        .split_whitespace()
        .find_map(|field| field.strip_prefix("q_fb="))
        .unwrap()
        .parse()
        .unwrap();
    assert!((q_fb - 1.57).abs() < 1e-4, "{state}");

    console.handle_line("stop 1");
    rig.cycle_until(1, DeviceState::ReadyToSwitchOn, 10);
}

#[test]
fn switching_to_auto_starts_the_profile() {
    let mut rig = Rig::new(manual(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    rig.cycles(20);
    assert_eq!(rig.sim.drive(0).unwrap().target_position(), 0);

    rig.channel.set_run_mode(RunMode::Auto);
    rig.cycles(100);
    assert!(rig.sim.drive(0).unwrap().target_position() > 0);
}
