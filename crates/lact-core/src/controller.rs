//! Scan executive.
//!
//! One scan: inputs → safety → state machine (commands, then safety
//! requests — safety wins) → process modules in declared order → alarm
//! annunciation → outputs → sleep to cadence. The loop is the last line
//! of defense: a panic anywhere inside the scan forces the E-Stop output
//! set and halts after one final output write.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::alarms::{ActiveAlarm, AlarmId, Annunciator};
use crate::error::CoreError;
use crate::io::IoPort;
use crate::modules::flow::BatchTotals;
use crate::modules::proving::ProvingReport;
use crate::modules::{
    BswMonitor, FlowMeasurement, PressureMonitor, Proving, PumpControl, Sampler,
    TemperatureMonitor,
};
use crate::safety::SafetyManager;
use crate::setpoints::{SetpointStore, Setpoints};
use crate::state::{LactState, StateMachine};
use crate::store::{TagSnapshot, TagStore};
use crate::tags::TagId;
use crate::timebase::TimeBase;

/// Commands drained per scan, bounding console pressure on the cycle.
const MAX_COMMANDS_PER_SCAN: usize = 8;
const COMMAND_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub enum Command {
    Start,
    Stop,
    Prove,
    /// Prover reports its certified volume displaced.
    ProveSignal,
    Reset,
    Set { name: String, value: f64 },
    CloseBatch,
    AckAlarms,
    SilenceHorn,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Prove => "PROVE",
            Command::ProveSignal => "PROVE_SIGNAL",
            Command::Reset => "RESET",
            Command::Set { .. } => "SET",
            Command::CloseBatch => "CLOSE_BATCH",
            Command::AckAlarms => "ACK",
            Command::SilenceHorn => "SILENCE",
        }
    }
}

/// Batch custody document emitted on close-batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub opened_us: u64,
    pub closed_us: u64,
    pub gross_bbl: f64,
    pub net_bbl: f64,
    pub diverted_gross_bbl: f64,
    pub diverted_net_bbl: f64,
    pub avg_temp_f: f64,
    pub meter_factor: f64,
    pub sample_grabs: u64,
    pub sample_volume_ml: f64,
}

/// Event sink for the external journal/report collaborators. Default
/// methods are no-ops so implementations subscribe to what they need.
pub trait Journal: Send {
    fn state_changed(&self, _from: LactState, _to: LactState, _ts_us: u64) {}
    fn alarm_raised(&self, _id: AlarmId, _ts_us: u64) {}
    fn alarm_cleared(&self, _id: AlarmId, _ts_us: u64) {}
    fn setpoint_changed(&self, _name: &str, _value: f64, _ts_us: u64) {}
    fn batch_closed(&self, _report: &BatchReport) {}
    fn proving_completed(&self, _report: &ProvingReport) {}
    fn scan_overrun(&self, _measured_ms: f64, _ts_us: u64) {}
}

pub struct NullJournal;

impl Journal for NullJournal {}

#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub scans: u64,
    pub last_scan_ms: f64,
    pub max_scan_ms: f64,
    pub overruns: u64,
}

/// Cloneable console-side handle. Commands enqueue; queries read shared
/// snapshots. No control logic ever runs on the calling thread.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: Sender<Command>,
    store: Arc<TagStore>,
    setpoints: Arc<SetpointStore>,
    alarm_view: Arc<RwLock<Vec<ActiveAlarm>>>,
}

impl ControllerHandle {
    fn send(&self, cmd: Command) -> Result<(), CoreError> {
        self.tx.try_send(cmd).map_err(|_| CoreError::QueueFull)
    }

    pub fn start(&self) -> Result<(), CoreError> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<(), CoreError> {
        self.send(Command::Stop)
    }

    pub fn prove(&self) -> Result<(), CoreError> {
        self.send(Command::Prove)
    }

    pub fn prove_signal(&self) -> Result<(), CoreError> {
        self.send(Command::ProveSignal)
    }

    pub fn reset(&self) -> Result<(), CoreError> {
        self.send(Command::Reset)
    }

    pub fn close_batch(&self) -> Result<(), CoreError> {
        self.send(Command::CloseBatch)
    }

    pub fn ack_alarms(&self) -> Result<(), CoreError> {
        self.send(Command::AckAlarms)
    }

    pub fn silence_horn(&self) -> Result<(), CoreError> {
        self.send(Command::SilenceHorn)
    }

    /// Validated up front so the console gets an immediate domain error;
    /// the install itself still happens on the scan thread.
    pub fn set_setpoint(&self, name: &str, value: f64) -> Result<(), CoreError> {
        let (lo, hi) = Setpoints::domain(name)
            .ok_or_else(|| CoreError::UnknownSetpoint(name.to_string()))?;
        if !value.is_finite() || value < lo || value > hi {
            return Err(CoreError::InvalidSetpoint {
                name: name.to_string(),
                value,
                lo,
                hi,
            });
        }
        self.send(Command::Set {
            name: name.to_string(),
            value,
        })
    }

    /// QUERY: one tag by name, or the whole image.
    pub fn query(&self, tag: Option<&str>) -> Result<Vec<TagSnapshot>, CoreError> {
        match tag {
            Some(name) => Ok(vec![self.store.read_by_name(name)?]),
            None => Ok(self.store.snapshot()),
        }
    }

    /// DUMP: the active alarm list as of the last completed scan.
    pub fn dump_alarms(&self) -> Vec<ActiveAlarm> {
        self.alarm_view.read().unwrap().clone()
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    pub fn shared_store(&self) -> Arc<TagStore> {
        Arc::clone(&self.store)
    }

    pub fn setpoints(&self) -> Arc<Setpoints> {
        self.setpoints.current()
    }
}

pub struct Controller {
    store: Arc<TagStore>,
    setpoints: Arc<SetpointStore>,
    timebase: TimeBase,
    io: Box<dyn IoPort>,
    tx: Sender<Command>,
    rx: Receiver<Command>,
    journal: Box<dyn Journal>,

    ann: Annunciator,
    safety: SafetyManager,
    sm: StateMachine,

    bsw: BswMonitor,
    flow: FlowMeasurement,
    pressure: PressureMonitor,
    temperature: TemperatureMonitor,
    sampler: Sampler,
    pump: PumpControl,
    proving: Proving,

    batch: BatchTotals,
    stats: ScanStats,
    alarm_view: Arc<RwLock<Vec<ActiveAlarm>>>,
    last_active: Vec<AlarmId>,
}

impl Controller {
    pub fn new(
        io: Box<dyn IoPort>,
        setpoints: Arc<SetpointStore>,
        timebase: TimeBase,
        journal: Box<dyn Journal>,
    ) -> Self {
        let (tx, rx) = bounded(COMMAND_QUEUE_DEPTH);
        let store = Arc::new(TagStore::new(timebase.clone()));
        Self {
            store,
            setpoints,
            timebase,
            io,
            tx,
            rx,
            journal,
            ann: Annunciator::new(),
            safety: SafetyManager::new(),
            sm: StateMachine::new(),
            bsw: BswMonitor::new(),
            flow: FlowMeasurement::new(),
            pressure: PressureMonitor::new(),
            temperature: TemperatureMonitor::new(),
            sampler: Sampler::new(),
            pump: PumpControl::new(),
            proving: Proving::new(),
            batch: BatchTotals::default(),
            stats: ScanStats::default(),
            alarm_view: Arc::new(RwLock::new(Vec::new())),
            last_active: Vec::new(),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.tx.clone(),
            store: Arc::clone(&self.store),
            setpoints: Arc::clone(&self.setpoints),
            alarm_view: Arc::clone(&self.alarm_view),
        }
    }

    pub fn state(&self) -> LactState {
        self.sm.state()
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn batch_totals(&self) -> BatchTotals {
        self.batch
    }

    /// One complete scan cycle (§ the nine steps). Pacing and panic
    /// containment live in [`run`].
    pub fn single_scan(&mut self) {
        let wall_start = Instant::now();
        let now_us = self.timebase.now_us();
        let sp = self.setpoints.current();

        // Drain a bounded slice of the command queue.
        let mut pending = Vec::with_capacity(MAX_COMMANDS_PER_SCAN);
        while pending.len() < MAX_COMMANDS_PER_SCAN {
            match self.rx.try_recv() {
                Ok(cmd) => pending.push(cmd),
                Err(_) => break,
            }
        }

        // Field inputs. A failed read leaves qualities degraded and the
        // interlocks take it from there.
        if let Err(err) = self.io.read_inputs(&self.store) {
            warn!(%err, "input read failed");
        }

        // Safety interlocks.
        if let Err(err) = self.safety.evaluate(&self.store, &sp, self.sm.state(), &mut self.ann, now_us) {
            error!(%err, "safety manager failure, forcing e-stop");
            let _ = self.sm.force_estop(&self.store);
        }

        // State machine: operator commands first, then safety requests.
        let prev_state = self.sm.state();
        for cmd in pending {
            self.handle_command(cmd, now_us);
        }
        let req = self.ann.requests();
        if let Err(err) = self.sm.apply_safety(req, &self.store) {
            error!(%err, "state machine failure, forcing e-stop");
            let _ = self.sm.force_estop(&self.store);
        }
        if let Err(err) = self.sm.execute(&self.store, &sp, req, self.proving.finished()) {
            error!(%err, "state machine failure, forcing e-stop");
            let _ = self.sm.force_estop(&self.store);
        }

        let state = self.sm.state();
        if state != prev_state {
            self.journal.state_changed(prev_state, state, now_us);
            if prev_state == LactState::Startup && state == LactState::Running {
                self.batch.started_us = now_us.max(1);
                info!("batch opened");
            }
        }

        // Process modules, declared order.
        if let Err(err) = self.bsw.execute(&self.store) {
            warn!(module = "bsw", %err, "module failure");
        }
        let delivered = match self.flow.execute(&self.store, &sp, state, &mut self.batch) {
            Ok(delivered) => delivered,
            Err(err) => {
                warn!(module = "flow", %err, "module failure");
                0.0
            }
        };
        if let Err(err) = self.pressure.execute(&self.store, &sp, &mut self.ann, now_us) {
            warn!(module = "pressure", %err, "module failure");
        }
        if let Err(err) = self.temperature.execute(&self.store, &sp) {
            warn!(module = "temperature", %err, "module failure");
        }
        if let Err(err) = self.sampler.execute(&self.store, &sp, state, delivered) {
            warn!(module = "sampler", %err, "module failure");
        }
        if let Err(err) = self.pump.execute(&self.store, &sp, &mut self.ann, now_us) {
            warn!(module = "pump", %err, "module failure");
        }
        if let Err(err) =
            self.proving
                .execute(&self.store, &sp, &self.setpoints, state, &mut self.ann, now_us)
        {
            warn!(module = "proving", %err, "module failure");
        }
        if let Some(report) = self.proving.take_report() {
            self.journal.proving_completed(&report);
        }

        if self.batch.started_us > 0 {
            let elapsed = now_us.saturating_sub(self.batch.started_us) as f32 / 1e6;
            let _ = self.store.write_f32(TagId::BatchElapsedSec, elapsed);
        }

        // Annunciation and the console's alarm view.
        if let Err(err) = self.ann.update_outputs(&self.store) {
            warn!(%err, "annunciator output failure");
        }
        self.publish_alarm_view(now_us);

        // Field outputs.
        if let Err(err) = self.io.write_outputs(&self.store) {
            warn!(%err, "output write failed");
        }

        self.stats.scans += 1;
        let scan_ms = wall_start.elapsed().as_secs_f64() * 1000.0;
        self.stats.last_scan_ms = scan_ms;
        self.stats.max_scan_ms = self.stats.max_scan_ms.max(scan_ms);
        // Wall time would break replay determinism under a fixed clock.
        let published_ms = if self.timebase.is_fixed() { 0.0 } else { scan_ms as f32 };
        let _ = self.store.write_f32(TagId::ScanTimeMs, published_ms);
        let _ = self.store.write_count(TagId::ScanCount, self.stats.scans);
    }

    fn handle_command(&mut self, cmd: Command, now_us: u64) {
        let name = cmd.name();
        let result = match cmd {
            Command::Start => self.sm.cmd_start(&self.store),
            Command::Stop => self.sm.cmd_stop(&self.store),
            Command::Prove => {
                let divert_pending = self.ann.requests().divert;
                match self.sm.cmd_prove(&self.store, divert_pending) {
                    Ok(()) => {
                        self.ann.clear(AlarmId::ProvingFailed, now_us);
                        self.proving.start();
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Command::ProveSignal => {
                if self.sm.state() == LactState::Proving {
                    self.proving.signal_run_complete();
                    Ok(())
                } else {
                    Err(CoreError::IllegalCommand {
                        command: "PROVE_SIGNAL",
                        state: self.sm.state(),
                    })
                }
            }
            Command::Reset => {
                self.ann.reset(now_us);
                self.sm.cmd_reset(&self.store)
            }
            Command::Set { name, value } => match self.setpoints.apply(&name, value) {
                Ok(()) => {
                    info!(setpoint = %name, value, "setpoint updated");
                    self.journal.setpoint_changed(&name, value, now_us);
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::CloseBatch => {
                self.close_batch(now_us);
                Ok(())
            }
            Command::AckAlarms => {
                self.ann.ack_all();
                Ok(())
            }
            Command::SilenceHorn => {
                self.ann.silence_horn(now_us);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(command = name, %err, "command rejected");
            self.ann.raise(AlarmId::IllegalCommand, now_us);
        }
    }

    fn close_batch(&mut self, now_us: u64) {
        let report = BatchReport {
            opened_us: self.batch.started_us,
            closed_us: now_us,
            gross_bbl: self.batch.gross_bbl,
            net_bbl: self.batch.net_bbl,
            diverted_gross_bbl: self.batch.diverted_gross_bbl,
            diverted_net_bbl: self.batch.diverted_net_bbl,
            avg_temp_f: self.batch.avg_temp_f(),
            meter_factor: self.batch.meter_factor,
            sample_grabs: self.sampler.grabs(),
            sample_volume_ml: self.sampler.total_ml(),
        };
        info!(
            gross_bbl = report.gross_bbl,
            net_bbl = report.net_bbl,
            "batch closed"
        );
        self.journal.batch_closed(&report);

        self.batch = BatchTotals::default();
        if self.sm.state() == LactState::Running {
            // Back-to-back batches: the new one opens immediately.
            self.batch.started_us = now_us.max(1);
        }
        let _ = self.sampler.reset(&self.store);
        let _ = self.store.write_f32(TagId::BatchGrossBbl, 0.0);
        let _ = self.store.write_f32(TagId::BatchNetBbl, 0.0);
        let _ = self.store.write_f32(TagId::BatchDivertedBbl, 0.0);
        let _ = self.store.write_f32(TagId::BatchElapsedSec, 0.0);
    }

    fn publish_alarm_view(&mut self, now_us: u64) {
        let active = self.ann.list_active();
        let ids: Vec<AlarmId> = active.iter().map(|a| a.id).collect();
        for id in &ids {
            if !self.last_active.contains(id) {
                self.journal.alarm_raised(*id, now_us);
            }
        }
        for id in &self.last_active {
            if !ids.contains(id) {
                self.journal.alarm_cleared(*id, now_us);
            }
        }
        self.last_active = ids;
        *self.alarm_view.write().unwrap() = active;
    }

    /// Cadenced scan loop. Returns when `stop` is set (after driving safe
    /// outputs and one final output write) or after a caught panic.
    pub fn run(&mut self, stop: &AtomicBool) {
        let mut sp = self.setpoints.current();
        info!(scan_period_ms = sp.scan_period_ms, "scan loop starting");
        let mut period = Duration::from_millis(sp.scan_period_ms);
        let mut deadline = Instant::now() + period;

        while !stop.load(Ordering::Relaxed) {
            let scanned = catch_unwind(AssertUnwindSafe(|| self.single_scan()));
            if scanned.is_err() {
                error!("panic inside scan, driving e-stop outputs and halting");
                let _ = self.sm.force_estop(&self.store);
                let _ = self.io.write_outputs(&self.store);
                return;
            }

            sp = self.setpoints.current();
            period = Duration::from_millis(sp.scan_period_ms);
            if self.timebase.is_fixed() {
                self.timebase.advance(period);
            }

            let now = Instant::now();
            if now < deadline {
                std::thread::sleep(deadline - now);
                deadline += period;
            } else {
                // Overrun: log, alarm, and re-anchor rather than compound.
                let over_ms = (now - deadline).as_secs_f64() * 1000.0 + period.as_secs_f64() * 1000.0;
                warn!(measured_ms = over_ms, "scan overrun");
                self.stats.overruns += 1;
                self.ann.raise(AlarmId::ScanOverrun, self.timebase.now_us());
                self.journal.scan_overrun(over_ms, self.timebase.now_us());
                deadline = now + period;
            }
        }

        // Graceful exit: finish with idle-safe outputs on the field.
        let _ = self.safe_idle_outputs();
        let _ = self.io.write_outputs(&self.store);
        info!(scans = self.stats.scans, "scan loop stopped");
    }

    fn safe_idle_outputs(&mut self) -> Result<(), CoreError> {
        self.store.write_bool(TagId::DoPumpStart, false)?;
        self.store.write_bool(TagId::PumpDemand, false)?;
        self.store.write_bool(TagId::DoDivertCmd, true)?;
        self.store.write_bool(TagId::DoSampleSol, false)?;
        self.store.write_bool(TagId::DoSampleMixPump, false)?;
        self.store.write_bool(TagId::DoProverVlvCmd, false)?;
        self.store.write_bool(TagId::DoAlarmBeacon, false)?;
        self.store.write_bool(TagId::DoAlarmHorn, false)?;
        self.store.write_bool(TagId::DoStatusGreen, false)?;
        Ok(())
    }
}
