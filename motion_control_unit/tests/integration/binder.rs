//! Address binding against simulated slave layouts.

use std::time::Duration;

use motion_common::engine::{EngineParams, MasterEngine, MasterState};
use motion_common::object::{ObjectId, ObjectKind};
use motion_common::drive::DeviceState;
use motion_control_unit::binder::{self, AddressMap, BindError, BindOutcome, SlaveSpan};
use motion_sim::{SimOptions, SimSlave, SimulatedMaster};
use proptest::prelude::*;

use super::{Rig, SLAVE, config};

fn preop(slaves: Vec<SimSlave>) -> SimulatedMaster {
    preop_with(SimOptions::new(slaves))
}

fn preop_with(options: SimOptions) -> SimulatedMaster {
    let sim = SimulatedMaster::new(options).unwrap();
    sim.init(&EngineParams {
        link: "sim0".into(),
        cycle_time_us: 1000,
        max_retries: 3,
    })
    .unwrap();
    sim.set_state(MasterState::PreOp, Duration::from_millis(10))
        .unwrap();
    sim
}

fn spans(sim: &SimulatedMaster) -> Vec<SlaveSpan> {
    sim.pdo_map()
        .slaves()
        .iter()
        .map(|s| SlaveSpan {
            address: s.slave.address,
            first_axis: s.first_axis,
            axis_count: s.slave.axes as usize,
        })
        .collect()
}

fn bind(sim: &SimulatedMaster, map: &AddressMap) -> BindOutcome {
    binder::bind(sim, &spans(sim), map, 1000).unwrap()
}

proptest! {
    #[test]
    fn bindings_match_the_slave_layout(
        axes in prop::collection::vec(1u8..=4, 1..=3),
        stride in prop::sample::select(vec![0x400u16, 0x800, 0x1000]),
    ) {
        let slaves = axes
            .iter()
            .enumerate()
            .map(|(i, n)| SimSlave::new(1001 + i as u16, *n).with_stride(stride))
            .collect();
        let sim = preop(slaves);
        let map = AddressMap::with_stride(stride);

        let first = bind(&sim, &map);
        prop_assert!(first.skipped_slaves.is_empty());
        prop_assert_eq!(first.axes.len(), sim.pdo_map().axis_count());
        for (axis, bindings) in first.axes.iter().enumerate() {
            for kind in ObjectKind::ALL {
                prop_assert_eq!(bindings.offset_of(kind), sim.pdo_map().offset(axis, kind));
            }
        }

        // Binding is a pure function of the bus.
        let second = bind(&sim, &map);
        prop_assert_eq!(first, second);
    }
}

#[test]
fn omitted_objects_stay_unbound() {
    let sim = preop(vec![SimSlave::new(SLAVE, 1).omit(ObjectKind::TargetVelocity)]);
    let outcome = bind(&sim, &AddressMap::with_stride(0x800));

    let axis = &outcome.axes[0];
    assert!(!axis.is_bound(ObjectKind::TargetVelocity));
    assert!(axis.is_bound(ObjectKind::TargetPosition));
    assert_eq!(axis.bound_count(), ObjectKind::ALL.len() - 1);
    assert!(axis.can_drive_state_machine());
}

#[test]
fn stride_mismatch_leaves_later_axes_unbound() {
    let sim = preop(vec![SimSlave::new(SLAVE, 2).with_stride(0x400)]);
    let outcome = bind(&sim, &AddressMap::with_stride(0x800));

    assert_eq!(outcome.axes[0].bound_count(), ObjectKind::ALL.len());
    assert_eq!(outcome.axes[1].bound_count(), 0);
    assert!(!outcome.axes[1].can_drive_state_machine());
}

#[test]
fn explicit_entries_take_precedence_over_the_stride() {
    let sim = preop(vec![SimSlave::new(SLAVE, 2).with_stride(0x400)]);
    let mut map = AddressMap::with_stride(0x800);
    map.insert(1, ObjectKind::ControlWord, ObjectId::new(0x6440, 0));
    map.insert(1, ObjectKind::StatusWord, ObjectId::new(0x6441, 0));
    let outcome = bind(&sim, &map);

    let axis = &outcome.axes[1];
    assert_eq!(axis.bound_count(), 2);
    assert_eq!(
        axis.offset_of(ObjectKind::ControlWord),
        sim.pdo_map().offset(1, ObjectKind::ControlWord)
    );
    assert!(axis.can_drive_state_machine());
}

#[test]
fn slave_without_metadata_is_skipped() {
    let sim = preop(vec![
        SimSlave::new(1001, 1),
        SimSlave::new(1002, 2).without_metadata(),
    ]);
    let outcome = bind(&sim, &AddressMap::with_stride(0x800));

    assert_eq!(outcome.skipped_slaves, vec![1002]);
    assert_eq!(outcome.axes.len(), 3);
    assert!(outcome.axes[0].can_drive_state_machine());
    assert_eq!(outcome.axes[1].bound_count(), 0);
    assert_eq!(outcome.axes[2].bound_count(), 0);
    assert!((outcome.cycle_seconds - 0.001).abs() < 1e-12);
}

#[test]
fn missing_process_image_is_an_error() {
    let sim = preop_with(SimOptions::new(vec![SimSlave::new(SLAVE, 1)]).without_process_image());
    let err = binder::bind(&sim, &spans(&sim), &AddressMap::with_stride(0x800), 1000).unwrap_err();
    assert_eq!(err, BindError::ProcessImageUnavailable);
}

#[test]
fn axis_without_control_word_is_never_enabled() {
    let options = SimOptions::new(vec![SimSlave::new(SLAVE, 1).omit(ObjectKind::ControlWord)]);
    let mut rig = Rig::with_options(options, config(1));
    rig.cycles(20);

    assert_eq!(rig.sim.drive(0).unwrap().control_history().count(), 0);
    assert_eq!(
        rig.channel.device_state(0).unwrap(),
        DeviceState::SwitchOnDisabled
    );
    assert!(!rig.channel.any_enabled());
}
