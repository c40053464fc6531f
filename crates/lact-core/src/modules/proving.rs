//! Meter proving against a certified reference volume.
//!
//! Scan-paced sequence: open the prover DBB valve, snapshot the pulse
//! counter, and close out a run when the prover signals that its certified
//! volume has been displaced (operator signal or detector switch, same
//! path). After the configured number of runs the repeatability gate
//! decides whether the mean becomes the new meter factor.

use serde::Serialize;
use tracing::{info, warn};

use crate::alarms::{AlarmId, Annunciator};
use crate::error::CoreError;
use crate::setpoints::{SetpointStore, Setpoints};
use crate::state::LactState;
use crate::store::TagStore;
use crate::tags::TagId;

const COUNTER_MASK: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProveRun {
    pub pulses: u64,
    pub certified_bbl: f64,
    pub raw_factor: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvingReport {
    pub runs: Vec<ProveRun>,
    pub repeatability: f64,
    pub passed: bool,
    /// Factor in effect after the prove (new mean if passed).
    pub meter_factor: f64,
    pub previous_factor: f64,
}

/// Repeatability `(max − min) / min` and mean of a factor set.
pub fn evaluate_runs(factors: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for &f in factors {
        min = min.min(f);
        max = max.max(f);
        sum += f;
    }
    if factors.is_empty() || min <= 0.0 {
        return (f64::INFINITY, 0.0);
    }
    ((max - min) / min, sum / factors.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    OpeningValve,
    AwaitRun,
    Done,
}

pub struct Proving {
    phase: Phase,
    runs: Vec<ProveRun>,
    start_pulses: u64,
    valve_scans: u32,
    run_signal: bool,
    finished: bool,
    report: Option<ProvingReport>,
}

impl Proving {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            runs: Vec::new(),
            start_pulses: 0,
            valve_scans: 0,
            run_signal: false,
            finished: false,
            report: None,
        }
    }

    /// Begin a proving sequence (the unit has just entered Proving).
    pub fn start(&mut self) {
        self.phase = Phase::OpeningValve;
        self.runs.clear();
        self.valve_scans = 0;
        self.run_signal = false;
        self.finished = false;
        info!("proving sequence initiated");
    }

    /// Prover reports its certified volume displaced.
    pub fn signal_run_complete(&mut self) {
        self.run_signal = true;
    }

    pub fn in_progress(&self) -> bool {
        matches!(self.phase, Phase::OpeningValve | Phase::AwaitRun)
    }

    /// Sequence done (pass or fail); the state machine returns to Running.
    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn take_report(&mut self) -> Option<ProvingReport> {
        self.report.take()
    }

    pub fn execute(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        setpoints: &SetpointStore,
        state: LactState,
        ann: &mut Annunciator,
        now_us: u64,
    ) -> Result<(), CoreError> {
        if state != LactState::Proving {
            if self.in_progress() {
                warn!("proving aborted by state change");
                store.write_bool(TagId::DoProverVlvCmd, false)?;
            }
            self.phase = Phase::Idle;
            self.finished = false;
            self.run_signal = false;
            return Ok(());
        }

        match self.phase {
            Phase::Idle | Phase::Done => {}
            Phase::OpeningValve => {
                store.write_bool(TagId::DoProverVlvCmd, true)?;
                self.valve_scans = self.valve_scans.saturating_add(1);
                if store.read_bool(TagId::DiProverVlvOpen)? {
                    self.start_pulses = store.read_count(TagId::PiMeterPulse)?;
                    self.run_signal = false;
                    self.phase = Phase::AwaitRun;
                    info!(run = self.runs.len() + 1, "proving run started");
                } else if self.valve_scans > sp.secs_to_scans(sp.prove_valve_timeout_sec) {
                    warn!("proving aborted: prover valve did not open");
                    self.fail(store, sp, ann, now_us)?;
                }
            }
            Phase::AwaitRun => {
                if !self.run_signal {
                    return Ok(());
                }
                self.run_signal = false;
                let end = store.read_count(TagId::PiMeterPulse)?;
                let pulses = end.wrapping_sub(self.start_pulses) & COUNTER_MASK;
                if pulses == 0 {
                    warn!("proving run discarded: no pulses accumulated");
                    self.fail(store, sp, ann, now_us)?;
                    return Ok(());
                }
                let indicated_bbl = pulses as f64 / sp.meter_k_factor;
                let raw_factor = sp.prove_certified_barrels / indicated_bbl;
                info!(run = self.runs.len() + 1, raw_factor, pulses, "proving run complete");
                self.runs.push(ProveRun {
                    pulses,
                    certified_bbl: sp.prove_certified_barrels,
                    raw_factor,
                });
                if self.runs.len() >= sp.prove_runs as usize {
                    self.complete(store, sp, setpoints, ann, now_us)?;
                } else {
                    self.start_pulses = end;
                }
            }
        }
        Ok(())
    }

    fn complete(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        setpoints: &SetpointStore,
        ann: &mut Annunciator,
        now_us: u64,
    ) -> Result<(), CoreError> {
        let factors: Vec<f64> = self.runs.iter().map(|r| r.raw_factor).collect();
        let (repeatability, mean) = evaluate_runs(&factors);
        let mut passed = repeatability <= sp.repeatability_tolerance;
        let mut applied = sp.meter_factor;

        if passed {
            // The new factor installs through the same validated path as
            // any operator change, so modules pick it up next scan entry.
            match setpoints.apply("meter_factor", mean) {
                Ok(()) => {
                    applied = mean;
                    info!(meter_factor = mean, repeatability, "new meter factor adopted");
                }
                Err(err) => {
                    warn!(%err, "proving factor rejected by setpoint domain");
                    passed = false;
                }
            }
        }
        if !passed {
            warn!(repeatability, tolerance = sp.repeatability_tolerance, "proving failed");
            ann.raise(AlarmId::ProvingFailed, now_us);
        }

        self.report = Some(ProvingReport {
            runs: self.runs.clone(),
            repeatability,
            passed,
            meter_factor: applied,
            previous_factor: sp.meter_factor,
        });
        store.write_bool(TagId::DoProverVlvCmd, false)?;
        self.phase = Phase::Done;
        self.finished = true;
        Ok(())
    }

    fn fail(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        ann: &mut Annunciator,
        now_us: u64,
    ) -> Result<(), CoreError> {
        ann.raise(AlarmId::ProvingFailed, now_us);
        self.report = Some(ProvingReport {
            runs: self.runs.clone(),
            repeatability: f64::INFINITY,
            passed: false,
            meter_factor: sp.meter_factor,
            previous_factor: sp.meter_factor,
        });
        store.write_bool(TagId::DoProverVlvCmd, false)?;
        self.phase = Phase::Done;
        self.finished = true;
        Ok(())
    }
}

impl Default for Proving {
    fn default() -> Self {
        Self::new()
    }
}
