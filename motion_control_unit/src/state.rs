//! Per-axis CiA402 drive state machine.
//!
//! Evaluated once per cycle per axis while the engine is OPERATIONAL:
//!
//! 1. Process request → requested device state.
//! 2. Status word → actual device state (fault bit is edge-triggered,
//!    everything else decoded only on change).
//! 3. actual == requested → nothing written.
//! 4. Otherwise the control word for the next hop is selected from the
//!    actual state. In FAULT the reset pulse is bounded and escalates to
//!    disable-voltage.
//!
//! The machine is pure: it neither reads nor writes the process image. The
//! cycle module feeds it the status word and writes the returned control
//! word through the axis binding.

use motion_common::config::FaultConfig;
use motion_common::drive::{ControlWord, DeviceState, ProcessRequest, StatusWord};

// ─── Fault Recovery ─────────────────────────────────────────────────

/// Bounded reset-pulse sequence while an axis sits in FAULT.
///
/// `reset_pulse_limit` consecutive FAULT_RESET words are followed by
/// `disable_voltage_cycles` DISABLE_VOLTAGE words, then the sequence repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecovery {
    pub reset_pulses: u32,
    pub disable_cycles: u32,
    reset_pulse_limit: u32,
    disable_voltage_cycles: u32,
}

impl FaultRecovery {
    pub const fn new(config: &FaultConfig) -> Self {
        Self {
            reset_pulses: 0,
            disable_cycles: 0,
            reset_pulse_limit: config.reset_pulse_limit,
            disable_voltage_cycles: config.disable_voltage_cycles,
        }
    }

    /// Control word for this FAULT cycle.
    pub fn next_word(&mut self) -> ControlWord {
        if self.reset_pulses < self.reset_pulse_limit {
            self.reset_pulses += 1;
            return ControlWord::FAULT_RESET_CMD;
        }
        if self.disable_cycles < self.disable_voltage_cycles {
            self.disable_cycles += 1;
            return ControlWord::DISABLE_VOLTAGE_CMD;
        }
        self.reset_pulses = 1;
        self.disable_cycles = 0;
        ControlWord::FAULT_RESET_CMD
    }

    /// True while the last word returned was DISABLE_VOLTAGE.
    pub const fn exhausted(&self) -> bool {
        self.disable_cycles > 0
    }

    pub fn clear(&mut self) {
        self.reset_pulses = 0;
        self.disable_cycles = 0;
    }
}

// ─── Transition ─────────────────────────────────────────────────────

/// One applied state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DeviceState,
    pub to: DeviceState,
    /// Status word that caused it.
    pub status_word: u16,
}

impl Transition {
    /// Fault onset (logged at warn level by the caller).
    pub const fn is_fault_onset(&self) -> bool {
        matches!(self.to, DeviceState::Fault) && !matches!(self.from, DeviceState::Fault)
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveStep {
    pub transition: Option<Transition>,
    /// Control word to write, `None` when actual == requested.
    pub control_word: Option<ControlWord>,
}

// ─── State Machine ──────────────────────────────────────────────────

/// CiA402 state machine of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveStateMachine {
    state: DeviceState,
    previous: DeviceState,
    requested: DeviceState,
    recovery: FaultRecovery,
}

impl DriveStateMachine {
    pub const fn new(fault: &FaultConfig) -> Self {
        Self {
            state: DeviceState::NotReady,
            previous: DeviceState::NotReady,
            requested: DeviceState::NotReady,
            recovery: FaultRecovery::new(fault),
        }
    }

    pub const fn state(&self) -> DeviceState {
        self.state
    }

    pub const fn previous(&self) -> DeviceState {
        self.previous
    }

    pub const fn requested(&self) -> DeviceState {
        self.requested
    }

    pub const fn recovery(&self) -> &FaultRecovery {
        &self.recovery
    }

    /// Targets are only produced in OPERATION_ENABLED.
    pub const fn is_enabled(&self) -> bool {
        matches!(self.state, DeviceState::OperationEnabled)
    }

    fn apply(&mut self, to: DeviceState, status_word: u16) -> Transition {
        let t = Transition {
            from: self.state,
            to,
            status_word,
        };
        self.previous = self.state;
        self.state = to;
        if !to.is_fault() {
            self.recovery.clear();
        }
        t
    }

    /// Classify `status_word` and return the transition it causes, if any.
    pub fn observe(&mut self, status_word: u16) -> Option<Transition> {
        if StatusWord::from_bits_retain(status_word).has_fault() {
            if self.state != DeviceState::Fault {
                return Some(self.apply(DeviceState::Fault, status_word));
            }
            return None;
        }
        match DeviceState::decode(status_word) {
            Some(decoded) if decoded != self.state => Some(self.apply(decoded, status_word)),
            _ => None,
        }
    }

    /// Control word that moves the actual state toward the requested one.
    pub fn select_control_word(&mut self) -> Option<ControlWord> {
        if self.state == self.requested {
            return None;
        }
        let word = match self.state {
            DeviceState::NotReady | DeviceState::SwitchOnDisabled => ControlWord::SHUTDOWN_CMD,
            DeviceState::ReadyToSwitchOn => ControlWord::SWITCH_ON_CMD,
            DeviceState::SwitchedOn => ControlWord::ENABLE_OPERATION_CMD,
            // Only a shutdown request takes an enabled axis out of operation.
            DeviceState::OperationEnabled => match self.requested {
                DeviceState::ReadyToSwitchOn => ControlWord::SHUTDOWN_CMD,
                _ => ControlWord::ENABLE_OPERATION_CMD,
            },
            DeviceState::QuickStop => ControlWord::SHUTDOWN_CMD,
            DeviceState::Fault | DeviceState::FaultReaction => self.recovery.next_word(),
        };
        Some(word)
    }

    /// Full per-cycle evaluation.
    pub fn update(&mut self, request: ProcessRequest, status_word: u16) -> DriveStep {
        self.requested = request.requested_state();
        let transition = self.observe(status_word);
        DriveStep {
            transition,
            control_word: self.select_control_word(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_common::consts::*;

    fn machine() -> DriveStateMachine {
        DriveStateMachine::new(&FaultConfig::default())
    }

    /// Machine already sitting in `state`.
    fn machine_in(state: DeviceState, sw: u16) -> DriveStateMachine {
        let mut m = machine();
        if state != DeviceState::NotReady {
            assert!(m.observe(sw).is_some());
        }
        assert_eq!(m.state(), state);
        m
    }

    const SW_DISABLED: u16 = 0x0250;
    const SW_READY: u16 = 0x0231;
    const SW_ON: u16 = 0x0233;
    const SW_ENABLED: u16 = 0x0237;
    const SW_QUICK_STOP: u16 = 0x0215;
    const SW_FAULT: u16 = 0x0218;

    #[test]
    fn initial_state() {
        let m = machine();
        assert_eq!(m.state(), DeviceState::NotReady);
        assert_eq!(m.previous(), DeviceState::NotReady);
        assert!(!m.is_enabled());
    }

    #[test]
    fn shortest_enable_sequence() {
        let mut m = machine();
        let words: Vec<u16> = [SW_DISABLED, SW_READY, SW_ON, SW_ENABLED]
            .iter()
            .filter_map(|sw| m.update(ProcessRequest::Start, *sw).control_word)
            .map(|w| w.bits())
            .collect();
        assert_eq!(words, vec![0x0006, 0x0007, 0x000F]);
        assert_eq!(m.state(), DeviceState::OperationEnabled);
        assert_eq!(m.previous(), DeviceState::SwitchedOn);
    }

    #[test]
    fn unchanged_status_word_transitions_once() {
        let mut m = machine();
        let transitions = (0..10)
            .filter(|_| m.update(ProcessRequest::Start, SW_ENABLED).transition.is_some())
            .count();
        assert_eq!(transitions, 1);
        assert_eq!(m.state(), DeviceState::OperationEnabled);
        // Reached requested state: nothing written.
        assert_eq!(m.update(ProcessRequest::Start, SW_ENABLED).control_word, None);
    }

    #[test]
    fn decode_transitions_from_every_state() {
        let patterns = [
            (STATUS_NOT_READY, DeviceState::NotReady),
            (SW_DISABLED, DeviceState::SwitchOnDisabled),
            (SW_READY, DeviceState::ReadyToSwitchOn),
            (SW_ON, DeviceState::SwitchedOn),
            (SW_QUICK_STOP, DeviceState::QuickStop),
            (SW_ENABLED, DeviceState::OperationEnabled),
        ];
        for (from_sw, from) in patterns {
            for (to_sw, to) in patterns {
                let mut m = machine_in(from, from_sw);
                let t = m.observe(to_sw);
                if from == to {
                    assert_eq!(t, None, "{from} -> {to}");
                } else {
                    assert_eq!(
                        t,
                        Some(Transition { from, to, status_word: to_sw }),
                        "{from} -> {to}"
                    );
                    assert_eq!(m.previous(), from);
                }
            }
        }
    }

    #[test]
    fn control_word_per_actual_state() {
        let cases = [
            (STATUS_NOT_READY, DeviceState::NotReady, ProcessRequest::Start, Some(0x0006)),
            (SW_DISABLED, DeviceState::SwitchOnDisabled, ProcessRequest::Start, Some(0x0006)),
            (SW_READY, DeviceState::ReadyToSwitchOn, ProcessRequest::Start, Some(0x0007)),
            (SW_ON, DeviceState::SwitchedOn, ProcessRequest::Start, Some(0x000F)),
            (SW_ENABLED, DeviceState::OperationEnabled, ProcessRequest::Start, None),
            (SW_ENABLED, DeviceState::OperationEnabled, ProcessRequest::Shutdown, Some(0x0006)),
            (SW_ENABLED, DeviceState::OperationEnabled, ProcessRequest::Stop, Some(0x000F)),
            (SW_ENABLED, DeviceState::OperationEnabled, ProcessRequest::Halt, Some(0x000F)),
            (SW_ENABLED, DeviceState::OperationEnabled, ProcessRequest::QuickStop, Some(0x000F)),
            (SW_QUICK_STOP, DeviceState::QuickStop, ProcessRequest::Start, Some(0x0006)),
            (SW_READY, DeviceState::ReadyToSwitchOn, ProcessRequest::Shutdown, None),
            (SW_ON, DeviceState::SwitchedOn, ProcessRequest::Halt, None),
            // Shutdown request from SWITCHED_ON re-enables first (forward-only hops).
            (SW_ON, DeviceState::SwitchedOn, ProcessRequest::Shutdown, Some(0x000F)),
        ];
        for (sw, state, request, expected) in cases {
            let mut m = machine_in(state, sw);
            let step = m.update(request, sw);
            assert_eq!(step.transition, None);
            assert_eq!(
                step.control_word.map(|w| w.bits()),
                expected,
                "{state} with {request:?}"
            );
        }
    }

    #[test]
    fn fault_is_edge_triggered() {
        let mut m = machine_in(DeviceState::OperationEnabled, SW_ENABLED);
        let first = m.update(ProcessRequest::Start, SW_FAULT);
        let t = first.transition.unwrap();
        assert!(t.is_fault_onset());
        assert_eq!(t.from, DeviceState::OperationEnabled);
        for _ in 0..50 {
            assert_eq!(m.update(ProcessRequest::Start, SW_FAULT).transition, None);
        }
        assert_eq!(m.state(), DeviceState::Fault);
    }

    #[test]
    fn fault_reset_escalates_to_disable_voltage() {
        let mut m = machine_in(DeviceState::SwitchOnDisabled, SW_DISABLED);
        let words: Vec<u16> = (0..25)
            .map(|_| m.update(ProcessRequest::Start, SW_FAULT).control_word.unwrap().bits())
            .collect();
        assert!(words[..20].iter().all(|w| *w == 0x0080));
        assert_eq!(&words[20..22], &[0x0000, 0x0000]);
        // Sequence restarts with reset pulses.
        assert_eq!(words[22], 0x0080);
        assert_eq!(words[23], 0x0080);
    }

    #[test]
    fn leaving_fault_clears_recovery() {
        let mut m = machine();
        for _ in 0..5 {
            m.update(ProcessRequest::Start, SW_FAULT);
        }
        assert_eq!(m.recovery().reset_pulses, 5);
        let step = m.update(ProcessRequest::Start, SW_DISABLED);
        assert_eq!(
            step.transition.map(|t| (t.from, t.to)),
            Some((DeviceState::Fault, DeviceState::SwitchOnDisabled))
        );
        assert_eq!(m.recovery().reset_pulses, 0);
        assert_eq!(step.control_word.map(|w| w.bits()), Some(0x0006));
    }

    #[test]
    fn unknown_pattern_keeps_state() {
        let mut m = machine_in(DeviceState::SwitchedOn, SW_ON);
        assert_eq!(m.observe(0x0001), None);
        assert_eq!(m.state(), DeviceState::SwitchedOn);
    }

    #[test]
    fn custom_reset_limit() {
        let cfg = FaultConfig {
            reset_pulse_limit: 2,
            disable_voltage_cycles: 1,
        };
        let mut r = FaultRecovery::new(&cfg);
        let words: Vec<u16> = (0..5).map(|_| r.next_word().bits()).collect();
        assert_eq!(words, vec![0x80, 0x80, 0x00, 0x80, 0x80]);
        assert!(!r.exhausted());
    }
}
