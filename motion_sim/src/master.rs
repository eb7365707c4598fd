//! Simulated fieldbus master.
//!
//! [`SimulatedMaster`] implements [`MasterEngine`] over a [`PdoMap`] and one
//! [`SimDrive`] per axis. State changes complete immediately. Cyclic jobs
//! are only accepted in SAFEOP and OP; outputs reach the drives only in OP.
//!
//! Test hooks: fault injection per axis, stuck drives, frame loss for a
//! number of cycles, evaluation expiry after a number of cycles, failing
//! transitions and slaves without metadata.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use motion_common::config::MotionConfig;
use motion_common::engine::{
    CycleHook, DcConfig, DcMode, DcStatus, DcSyncState, EngineError, EngineParams, Job,
    JobOutcome, MasterEngine, MasterState, Notification, ProcessImage, ProcessImageLayout,
    ProcessVarInfo, SlaveInfo,
};
use motion_common::object::ObjectKind;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::drive::{DriveFault, DriveInputs, DriveOutputs, SimDrive};
use crate::layout::{LayoutError, PdoMap, SimSlave};

const SIM_VENDOR_ID: u32 = 0x0000_0A5E;
const SIM_PRODUCT_CODE: u32 = 0x0402_0001;

/// MasterTimer ticks before DC reports in-sync.
const DC_SYNC_TICKS: u64 = 100;

// ─── Options ────────────────────────────────────────────────────────

/// Simulation setup.
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub slaves: Vec<SimSlave>,
    /// Provide a process image (cleared: layout queries return `None`).
    pub process_image: bool,
    /// `SendCycFrames` reports evaluation expiry after this many cycles.
    pub evaluation_cycles: Option<u64>,
    /// Transitions to this state time out.
    pub failing_state: Option<MasterState>,
    /// `init()` fails.
    pub failing_init: bool,
}

impl SimOptions {
    pub fn new(slaves: Vec<SimSlave>) -> Self {
        Self {
            slaves,
            process_image: true,
            evaluation_cycles: None,
            failing_state: None,
            failing_init: false,
        }
    }

    /// One present slave per configured slave, same address, axes and stride.
    pub fn from_config(config: &MotionConfig) -> Self {
        Self::new(
            config
                .slaves
                .iter()
                .map(|s| SimSlave::new(s.address, s.axes).with_stride(config.addressing.stride))
                .collect(),
        )
    }

    pub fn without_process_image(mut self) -> Self {
        self.process_image = false;
        self
    }

    pub fn expire_after(mut self, cycles: u64) -> Self {
        self.evaluation_cycles = Some(cycles);
        self
    }

    pub fn fail_transition_to(mut self, state: MasterState) -> Self {
        self.failing_state = Some(state);
        self
    }

    pub fn fail_init(mut self) -> Self {
        self.failing_init = true;
        self
    }
}

// ─── Bus state ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DcStats {
    config: Option<DcConfig>,
    ticks: u64,
    samples: u64,
    sum_ns: i64,
    max_ns: i32,
    cur_ns: i32,
    pending_log: Option<String>,
}

impl DcStats {
    fn tick(&mut self) {
        if self.config.is_none() {
            return;
        }
        self.ticks += 1;
        // Deterministic jitter in [-100, 99] ns.
        self.cur_ns = ((self.ticks * 37) % 200) as i32 - 100;
        self.samples += 1;
        self.sum_ns += i64::from(self.cur_ns);
        self.max_ns = self.max_ns.max(self.cur_ns.abs());
        if self.ticks == DC_SYNC_TICKS {
            self.pending_log = Some(format!("DC in sync after {} cycles", self.ticks));
        }
    }

    fn status(&self) -> DcStatus {
        let state = if self.ticks >= DC_SYNC_TICKS {
            DcSyncState::InSync
        } else if self.ticks > 0 {
            DcSyncState::Busy
        } else {
            DcSyncState::NotReady
        };
        let avg = if self.samples > 0 {
            (self.sum_ns / self.samples as i64) as i32
        } else {
            0
        };
        DcStatus {
            state,
            deviation_cur_ns: self.cur_ns,
            deviation_avg_ns: avg,
            deviation_max_ns: self.max_ns,
        }
    }

    fn reset(&mut self) {
        self.samples = 0;
        self.sum_ns = 0;
        self.max_ns = 0;
    }
}

#[derive(Debug, Default)]
struct Bus {
    initialized: bool,
    state: MasterState,
    cycle_seconds: f64,
    cycle_period: Duration,
    drives: Vec<SimDrive>,
    input: Vec<u8>,
    output: Vec<u8>,
    latched: Vec<u8>,
    in_flight: bool,
    deliver_outputs: bool,
    drop_frames: u32,
    sent_cycles: u64,
    lost_frames: u64,
    notifications: VecDeque<Notification>,
    dc: DcStats,
}

struct HookThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

// ─── Master ─────────────────────────────────────────────────────────

/// In-process fieldbus master with emulated CiA402 drives.
pub struct SimulatedMaster {
    options: SimOptions,
    map: PdoMap,
    bus: Mutex<Bus>,
    hook: Mutex<Option<HookThread>>,
}

impl SimulatedMaster {
    pub fn new(options: SimOptions) -> Result<Self, LayoutError> {
        let map = PdoMap::build(options.slaves.clone())?;
        Ok(Self {
            options,
            map,
            bus: Mutex::new(Bus::default()),
            hook: Mutex::new(None),
        })
    }

    pub fn pdo_map(&self) -> &PdoMap {
        &self.map
    }

    /// Snapshot of one emulated drive.
    pub fn drive(&self, axis: usize) -> Option<SimDrive> {
        self.bus.lock().drives.get(axis).cloned()
    }

    /// `SendCycFrames` calls accepted so far.
    pub fn cycles(&self) -> u64 {
        self.bus.lock().sent_cycles
    }

    pub fn lost_frames(&self) -> u64 {
        self.bus.lock().lost_frames
    }

    pub fn inject_fault(&self, axis: usize, code: u16, persistent: bool) -> Result<(), EngineError> {
        self.with_drive(axis, |d| d.inject_fault(DriveFault { code, persistent }))
    }

    pub fn release_fault(&self, axis: usize) -> Result<(), EngineError> {
        self.with_drive(axis, SimDrive::release_fault)
    }

    pub fn set_stuck(&self, axis: usize, stuck: bool) -> Result<(), EngineError> {
        self.with_drive(axis, |d| d.set_stuck(stuck))
    }

    /// Lose the returning frames of the next `cycles` exchanges.
    pub fn drop_frames(&self, cycles: u32) {
        self.bus.lock().drop_frames += cycles;
    }

    fn with_drive(&self, axis: usize, f: impl FnOnce(&mut SimDrive)) -> Result<(), EngineError> {
        let mut bus = self.bus.lock();
        let drive = bus
            .drives
            .get_mut(axis)
            .ok_or_else(|| EngineError::Other(format!("no simulated axis {axis}")))?;
        f(drive);
        Ok(())
    }

    fn present_slave(&self, address: u16) -> Result<&crate::layout::SlaveImage, EngineError> {
        let image = self
            .map
            .slave(address)
            .filter(|s| s.slave.present)
            .ok_or(EngineError::SlaveNotFound(address))?;
        if !image.slave.metadata_available {
            return Err(EngineError::Other(format!(
                "mailbox timeout reading configuration of slave {address}"
            )));
        }
        Ok(image)
    }

    fn stop_hook(&self) {
        if let Some(hook) = self.hook.lock().take() {
            hook.stop.store(true, Ordering::Release);
            if hook.handle.join().is_err() {
                warn!("link-layer hook thread panicked");
            }
        }
    }

    fn exchange(&self, bus: &mut Bus) {
        let Bus {
            drives,
            input,
            latched,
            deliver_outputs,
            cycle_seconds,
            ..
        } = bus;
        for slave in self.map.slaves().iter().filter(|s| s.slave.present) {
            for axis in slave.first_axis..slave.first_axis + slave.slave.axes as usize {
                let Some(drive) = drives.get_mut(axis) else {
                    continue;
                };
                let outputs = deliver_outputs.then(|| self.read_outputs(latched, axis));
                let inputs = drive.exchange(outputs.as_ref(), *cycle_seconds);
                self.write_inputs(input, axis, &inputs);
            }
        }
    }

    fn read_outputs(&self, region: &[u8], axis: usize) -> DriveOutputs {
        let at = |kind| self.map.offset(axis, kind);
        DriveOutputs {
            control_word: get::<2>(region, at(ObjectKind::ControlWord)).map(u16::from_le_bytes),
            target_position: get::<4>(region, at(ObjectKind::TargetPosition))
                .map(i32::from_le_bytes),
            target_velocity: get::<4>(region, at(ObjectKind::TargetVelocity))
                .map(i32::from_le_bytes),
            target_torque: get::<2>(region, at(ObjectKind::TargetTorque)).map(i16::from_le_bytes),
            mode: get::<1>(region, at(ObjectKind::ModesOfOperation)).map(i8::from_le_bytes),
            digital_outputs: [
                get::<2>(region, at(ObjectKind::DigitalOutput1)).map(u16::from_le_bytes),
                get::<2>(region, at(ObjectKind::DigitalOutput2)).map(u16::from_le_bytes),
            ],
        }
    }

    fn write_inputs(&self, region: &mut [u8], axis: usize, inputs: &DriveInputs) {
        let at = |kind| self.map.offset(axis, kind);
        put(region, at(ObjectKind::StatusWord), &inputs.status_word.to_le_bytes());
        put(region, at(ObjectKind::ErrorCode), &inputs.error_code.to_le_bytes());
        put(region, at(ObjectKind::PositionActual), &inputs.position_actual.to_le_bytes());
        put(region, at(ObjectKind::VelocityActual), &inputs.velocity_actual.to_le_bytes());
        put(region, at(ObjectKind::TorqueActual), &inputs.torque_actual.to_le_bytes());
        put(region, at(ObjectKind::FollowingError), &inputs.following_error.to_le_bytes());
        put(region, at(ObjectKind::DigitalInput1), &inputs.digital_inputs[0].to_le_bytes());
        put(region, at(ObjectKind::DigitalInput2), &inputs.digital_inputs[1].to_le_bytes());
        put(region, at(ObjectKind::McuTemperature), &inputs.mcu_temperature.to_le_bytes());
        put(region, at(ObjectKind::MotorTemperature), &inputs.motor_temperature.to_le_bytes());
        put(region, at(ObjectKind::IgbtTemperature), &inputs.igbt_temperature.to_le_bytes());
        put(region, at(ObjectKind::DcLinkVoltage), &inputs.dc_link_voltage.to_le_bytes());
    }
}

impl Drop for SimulatedMaster {
    fn drop(&mut self) {
        self.stop_hook();
    }
}

fn get<const N: usize>(region: &[u8], offset: Option<usize>) -> Option<[u8; N]> {
    let offset = offset?;
    region.get(offset..offset + N)?.try_into().ok()
}

fn put(region: &mut [u8], offset: Option<usize>, bytes: &[u8]) {
    if let Some(dst) = offset.and_then(|o| region.get_mut(o..o + bytes.len())) {
        dst.copy_from_slice(bytes);
    }
}

fn var_infos(vars: &[crate::layout::MappedVar]) -> Vec<ProcessVarInfo> {
    vars.iter().map(|v| v.info.clone()).collect()
}

// ─── Engine trait ───────────────────────────────────────────────────

impl MasterEngine for SimulatedMaster {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn init(&self, params: &EngineParams) -> Result<(), EngineError> {
        if self.options.failing_init {
            return Err(EngineError::InitFailed(format!("link {} unavailable", params.link)));
        }
        if params.cycle_time_us == 0 {
            return Err(EngineError::InitFailed("cycle time must be non-zero".to_string()));
        }
        let mut bus = self.bus.lock();
        if bus.initialized {
            return Err(EngineError::InvalidState);
        }

        let drives = self
            .map
            .slaves()
            .iter()
            .flat_map(|s| {
                let boot = s.slave.boot_cycles;
                (0..s.slave.axes).map(move |_| SimDrive::new().with_boot_cycles(boot))
            })
            .collect();
        let layout = self.map.layout();
        let (input_len, output_len) = if self.options.process_image {
            (layout.input_len, layout.output_len)
        } else {
            (0, 0)
        };

        *bus = Bus {
            initialized: true,
            state: MasterState::Init,
            cycle_seconds: f64::from(params.cycle_time_us) / 1_000_000.0,
            cycle_period: Duration::from_micros(u64::from(params.cycle_time_us)),
            drives,
            input: vec![0; input_len],
            output: vec![0; output_len],
            latched: vec![0; output_len],
            ..Bus::default()
        };
        bus.notifications.push_back(Notification::LinkConnected);
        info!(
            link = %params.link,
            cycle_time_us = params.cycle_time_us,
            slaves = self.map.slaves().len(),
            axes = self.map.axis_count(),
            input_bytes = input_len,
            output_bytes = output_len,
            "simulated master initialized"
        );
        Ok(())
    }

    fn deinit(&self) -> Result<(), EngineError> {
        self.stop_hook();
        let mut bus = self.bus.lock();
        if !bus.initialized {
            return Err(EngineError::InvalidState);
        }
        *bus = Bus::default();
        info!("simulated master deinitialized");
        Ok(())
    }

    fn set_state(&self, state: MasterState, timeout: Duration) -> Result<(), EngineError> {
        let mut bus = self.bus.lock();
        if !bus.initialized {
            return Err(EngineError::InvalidState);
        }
        if self.options.failing_state == Some(state) {
            return Err(EngineError::Timeout(format!(
                "{state} not reached within {} ms",
                timeout.as_millis()
            )));
        }
        let from = bus.state;
        if from != state {
            if !state.exchanges_process_data() {
                bus.in_flight = false;
            }
            bus.state = state;
            bus.notifications
                .push_back(Notification::StateChanged { from, to: state });
            debug!(%from, to = %state, "simulated master state");
        }
        Ok(())
    }

    fn state(&self) -> MasterState {
        self.bus.lock().state
    }

    fn process_image_layout(&self) -> Option<ProcessImageLayout> {
        let bus = self.bus.lock();
        (bus.initialized && self.options.process_image).then(|| self.map.layout())
    }

    fn with_process_image(&self, f: &mut dyn FnMut(ProcessImage<'_>)) -> Result<(), EngineError> {
        let mut bus = self.bus.lock();
        if !bus.initialized || !self.options.process_image {
            return Err(EngineError::InvalidState);
        }
        let Bus { input, output, .. } = &mut *bus;
        f(ProcessImage {
            input: input.as_slice(),
            output: output.as_mut_slice(),
        });
        Ok(())
    }

    fn slave_count(&self) -> usize {
        self.map.slaves().iter().filter(|s| s.slave.present).count()
    }

    fn is_slave_present(&self, address: u16) -> Result<bool, EngineError> {
        Ok(self.map.slave(address).is_some_and(|s| s.slave.present))
    }

    fn slave_info(&self, address: u16) -> Result<SlaveInfo, EngineError> {
        let image = self.present_slave(address)?;
        Ok(SlaveInfo {
            address,
            name: image.slave.name.clone(),
            vendor_id: SIM_VENDOR_ID,
            product_code: SIM_PRODUCT_CODE,
            input_var_count: image.inputs.len() as u16,
            output_var_count: image.outputs.len() as u16,
        })
    }

    fn output_vars(&self, address: u16) -> Result<Vec<ProcessVarInfo>, EngineError> {
        Ok(var_infos(&self.present_slave(address)?.outputs))
    }

    fn input_vars(&self, address: u16) -> Result<Vec<ProcessVarInfo>, EngineError> {
        Ok(var_infos(&self.present_slave(address)?.inputs))
    }

    fn exec_job(&self, job: Job) -> Result<JobOutcome, EngineError> {
        let mut bus = self.bus.lock();
        if !bus.initialized {
            return Err(EngineError::InvalidState);
        }
        match job {
            Job::StartTask | Job::StopTask | Job::SendAcycFrames => Ok(JobOutcome::DONE),
            Job::MasterTimer => {
                bus.dc.tick();
                Ok(JobOutcome::DONE)
            }
            Job::ProcessRxFrames => {
                if !bus.state.exchanges_process_data() {
                    return Err(EngineError::InvalidState);
                }
                if !std::mem::replace(&mut bus.in_flight, false) {
                    return Ok(JobOutcome::DONE);
                }
                if bus.drop_frames > 0 {
                    bus.drop_frames -= 1;
                    bus.lost_frames += 1;
                    bus.notifications
                        .push_back(Notification::FrameResponseError { missing: 1 });
                    return Ok(JobOutcome {
                        all_frames_processed: false,
                    });
                }
                self.exchange(&mut bus);
                Ok(JobOutcome::DONE)
            }
            Job::SendCycFrames => {
                if !bus.state.exchanges_process_data() {
                    return Err(EngineError::InvalidState);
                }
                if let Some(limit) = self.options.evaluation_cycles {
                    if bus.sent_cycles >= limit {
                        return Err(EngineError::EvaluationExpired);
                    }
                }
                bus.sent_cycles += 1;
                let Bus { output, latched, .. } = &mut *bus;
                latched.copy_from_slice(output);
                bus.deliver_outputs = bus.state == MasterState::Op;
                bus.in_flight = true;
                Ok(JobOutcome::DONE)
            }
        }
    }

    fn drain_notifications(&self, sink: &mut dyn FnMut(Notification)) {
        let pending = std::mem::take(&mut self.bus.lock().notifications);
        for n in pending {
            sink(n);
        }
    }

    fn configure_dc(&self, config: &DcConfig) -> Result<(), EngineError> {
        let mut bus = self.bus.lock();
        if !bus.initialized {
            return Err(EngineError::InvalidState);
        }
        if config.mode == DcMode::Off {
            bus.dc = DcStats::default();
            return Ok(());
        }
        bus.dc = DcStats {
            config: Some(*config),
            pending_log: Some(format!("DC configured: {:?}", config.mode)),
            ..DcStats::default()
        };
        Ok(())
    }

    fn dc_status(&self) -> Result<DcStatus, EngineError> {
        let bus = self.bus.lock();
        if bus.dc.config.is_none() {
            return Err(EngineError::NotSupported("distributed clocks not configured"));
        }
        Ok(bus.dc.status())
    }

    fn reset_dc_status(&self) {
        self.bus.lock().dc.reset();
    }

    fn dc_log_message(&self) -> Option<String> {
        self.bus.lock().dc.pending_log.take()
    }

    fn perf_report(&self) -> Option<String> {
        let bus = self.bus.lock();
        Some(format!(
            "sim perf: cycles={} lost_frames={} period_us={}",
            bus.sent_cycles,
            bus.lost_frames,
            bus.cycle_period.as_micros()
        ))
    }

    fn register_cycle_hook(&self, hook: CycleHook) -> Result<(), EngineError> {
        let period = {
            let bus = self.bus.lock();
            if !bus.initialized {
                return Err(EngineError::InvalidState);
            }
            bus.cycle_period
        };
        let mut slot = self.hook.lock();
        if slot.is_some() {
            return Err(EngineError::Other("cycle hook already registered".to_string()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("sim-link".into())
                .spawn(move || {
                    let mut next = Instant::now() + period;
                    while !stop.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if next > now {
                            thread::sleep(next - now);
                        }
                        next += period;
                        hook();
                    }
                })
                .map_err(|e| EngineError::Other(format!("failed to spawn link thread: {e}")))?
        };
        *slot = Some(HookThread { stop, handle });
        info!(period_us = period.as_micros() as u64, "link-layer cycle hook registered");
        Ok(())
    }
}
