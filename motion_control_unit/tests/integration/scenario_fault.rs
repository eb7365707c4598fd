//! Drive faults: bounded reset pulses, escalation, recovery.

use motion_common::consts::{FAULT_DISABLE_VOLTAGE_CYCLES, FAULT_RESET_PULSE_LIMIT};
use motion_common::drive::DeviceState;

use super::{Rig, config};

/// Run lengths of consecutive equal words.
fn runs(words: &[u16]) -> Vec<(u16, usize)> {
    let mut out: Vec<(u16, usize)> = Vec::new();
    for &w in words {
        match out.last_mut() {
            Some((last, n)) if *last == w => *n += 1,
            _ => out.push((w, 1)),
        }
    }
    out
}

#[test]
fn persistent_fault_bounds_reset_pulses() {
    let mut rig = Rig::new(config(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    rig.sim.inject_fault(0, 0x2310, true).unwrap();
    rig.cycle_until(0, DeviceState::Fault, 5);
    rig.cycles(100);

    let history: Vec<u16> = rig.sim.drive(0).unwrap().control_history().collect();
    let start = history.iter().position(|&w| w == 0x0080).unwrap();
    let fault_runs = runs(&history[start..]);

    // Drop the trailing run, it may be cut short.
    let complete = &fault_runs[..fault_runs.len() - 1];
    assert!(complete.len() >= 4, "{fault_runs:?}");
    for &(word, len) in complete {
        match word {
            0x0080 => assert_eq!(len, FAULT_RESET_PULSE_LIMIT as usize),
            0x0000 => assert_eq!(len, FAULT_DISABLE_VOLTAGE_CYCLES as usize),
            other => panic!("unexpected control word 0x{other:04X} in fault"),
        }
    }

    // One acknowledge edge per reset run.
    let reset_runs = fault_runs.iter().filter(|(w, _)| *w == 0x0080).count();
    assert_eq!(rig.sim.drive(0).unwrap().reset_edges() as usize, reset_runs);
    assert_eq!(rig.channel.device_state(0).unwrap(), DeviceState::Fault);
    assert_eq!(rig.channel.state(0).unwrap().motor_state, 0x2310);
}

#[test]
fn transient_fault_recovers_and_re_enables() {
    let mut rig = Rig::new(config(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    rig.sim.inject_fault(0, 0x7500, false).unwrap();
    rig.cycle_until(0, DeviceState::Fault, 5);
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);

    let drive = rig.sim.drive(0).unwrap();
    assert_eq!(drive.reset_edges(), 1);
    assert!(drive.fault().is_none());
    assert_eq!(rig.channel.state(0).unwrap().motor_state, 0);
}

#[test]
fn released_fault_is_acknowledged_on_the_next_pulse() {
    let mut rig = Rig::new(config(1));
    rig.cycle_until(0, DeviceState::OperationEnabled, 20);
    rig.sim.inject_fault(0, 0x2310, true).unwrap();
    rig.cycle_until(0, DeviceState::Fault, 5);
    rig.cycles(30);
    assert_eq!(rig.channel.device_state(0).unwrap(), DeviceState::Fault);

    rig.sim.release_fault(0).unwrap();
    rig.cycle_until(0, DeviceState::OperationEnabled, 60);
}

#[test]
fn fault_on_one_axis_leaves_the_others_enabled() {
    let mut rig = Rig::new(config(2));
    rig.cycles(10);
    rig.sim.inject_fault(1, 0x2310, true).unwrap();
    rig.cycles(30);

    assert_eq!(
        rig.channel.device_state(0).unwrap(),
        DeviceState::OperationEnabled
    );
    assert_eq!(rig.channel.device_state(1).unwrap(), DeviceState::Fault);
    assert!(rig.sim.drive(0).unwrap().control_history().all(|w| w != 0x0080));
}
