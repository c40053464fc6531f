//! Safety interlock evaluation.
//!
//! Runs every scan after input reads and before the state machine, so the
//! request flags it produces are consumed in the same scan. Each check
//! carries its own debounce, counted in scans: a predicate must hold
//! continuously for the on-count before its alarm raises, and be
//! continuously false for the off-count before it clears.

use tracing::warn;

use crate::alarms::{AlarmId, Annunciator};
use crate::error::CoreError;
use crate::setpoints::Setpoints;
use crate::state::LactState;
use crate::store::TagStore;
use crate::tags::{Quality, TagId};

/// Scan-counted on/off debounce.
#[derive(Debug, Clone, Copy, Default)]
struct Debounce {
    streak: u32,
    active: bool,
}

impl Debounce {
    fn update(&mut self, cond: bool, on_scans: u32, off_scans: u32) -> bool {
        if cond == self.active {
            self.streak = 0;
            return self.active;
        }
        self.streak += 1;
        let needed = if cond { on_scans } else { off_scans };
        if self.streak >= needed {
            self.active = cond;
            self.streak = 0;
        }
        self.active
    }
}

const ESTOP: usize = 0;
const PUMP_OVERLOAD: usize = 1;
const INLET_VLV: usize = 2;
const OUTLET_VLV: usize = 3;
const INLET_PRESS: usize = 4;
const LOOP_PRESS: usize = 5;
const STRAINER: usize = 6;
const BSW_PROBE: usize = 7;
const BSW_HIGH: usize = 8;
const SAMPLE_POT: usize = 9;
const TEMP_LO: usize = 10;
const TEMP_HI: usize = 11;
const GAS: usize = 12;
const PUMP_FAIL_START: usize = 13;
const N_CHECKS: usize = 14;

pub struct SafetyManager {
    db: [Debounce; N_CHECKS],
    divert_cmd_last: bool,
    divert_cmd_scans: u32,
}

impl SafetyManager {
    pub fn new() -> Self {
        Self {
            db: [Debounce::default(); N_CHECKS],
            divert_cmd_last: true, // matches the DIVERT fail position
            divert_cmd_scans: 0,
        }
    }

    /// Evaluate the fixed check list for this scan.
    pub fn evaluate(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        state: LactState,
        ann: &mut Annunciator,
        now_us: u64,
    ) -> Result<(), CoreError> {
        // E-Stop. NC wiring: a dead input circuit must read as asserted.
        let estop = store.read_bool(TagId::DiEstop)?
            || store.quality(TagId::DiEstop) != Quality::Good;
        self.check(ESTOP, estop, 0, 0, AlarmId::Estop, ann, now_us);

        // Pump overload, straight off the relay contact.
        let overload = store.read_bool(TagId::DiPumpOverload)?;
        self.check(PUMP_OVERLOAD, overload, 0, 0, AlarmId::PumpOverload, ann, now_us);

        // Block/divert valves must stay open while transferring.
        let transferring = matches!(state, LactState::Startup | LactState::Running);
        let inlet_closed = transferring && !store.read_bool(TagId::DiInletVlvOpen)?;
        self.check(INLET_VLV, inlet_closed, 2, 2, AlarmId::InletVlvNotOpen, ann, now_us);
        let outlet_closed = transferring && !store.read_bool(TagId::DiOutletVlvOpen)?;
        self.check(OUTLET_VLV, outlet_closed, 2, 2, AlarmId::OutletVlvNotOpen, ann, now_us);

        // Loss of feed, only meaningful with the pump pulling.
        let pump_running = store.read_bool(TagId::DiPumpRunning)?;
        let inlet_lo = pump_running
            && f64::from(store.read_f32(TagId::AiInletPress)?) < sp.inlet_press_lo_psi;
        self.check(INLET_PRESS, inlet_lo, 10, 10, AlarmId::InletPressLo, ann, now_us);

        let loop_hi =
            f64::from(store.read_f32(TagId::AiLoopHiPress)?) > sp.loop_press_hi_psi;
        self.check(LOOP_PRESS, loop_hi, 5, 5, AlarmId::LoopPressHi, ann, now_us);

        // Plugged strainer screen.
        let strainer = f64::from(store.read_f32(TagId::AiStrainerDp)?) > sp.strainer_dp_hi_psi
            || store.read_bool(TagId::DiStrainerHiDp)?;
        self.check(STRAINER, strainer, 5, 5, AlarmId::StrainerDpHi, ann, now_us);

        // BS&W probe health: Bad quality, or a raw sample that clamped.
        let probe_bad = store.quality(TagId::AiBswProbe) != Quality::Good;
        self.check(BSW_PROBE, probe_bad, 3, 3, AlarmId::BswProbeFail, ann, now_us);

        // BS&W high on the rolling mean.
        let bsw_scans = sp.secs_to_scans(sp.bsw_debounce_sec);
        let bsw_hi = f64::from(store.read_f32(TagId::BswPct)?) > sp.bsw_divert_pct;
        let was_active = ann.is_active(AlarmId::BswHigh);
        self.check(BSW_HIGH, bsw_hi, bsw_scans, bsw_scans, AlarmId::BswHigh, ann, now_us);
        if !was_active && ann.is_active(AlarmId::BswHigh) {
            store.write_text(TagId::DivertReason, "BS&W above divert setpoint")?;
        }

        self.check_divert_travel(store, sp, ann, now_us)?;

        // Pot full pauses sampling (the sampler watches the same input).
        let pot_full = store.read_bool(TagId::DiSamplePotHi)?;
        self.check(SAMPLE_POT, pot_full, 0, 0, AlarmId::SamplePotFull, ann, now_us);

        let temp = f64::from(store.read_f32(TagId::AiMeterTemp)?);
        self.check(TEMP_LO, temp < sp.temp_lo_deg_f, 10, 10, AlarmId::TempLo, ann, now_us);
        self.check(TEMP_HI, temp > sp.temp_hi_deg_f, 10, 10, AlarmId::TempHi, ann, now_us);

        // Gas in the metering loop (air eliminator float).
        let gas = store.read_bool(TagId::DiAirElimFloat)?;
        self.check(GAS, gas, 3, 3, AlarmId::GasDetected, ann, now_us);

        // Pump commanded but no run feedback.
        let fail_start = store.read_bool(TagId::DoPumpStart)? && !pump_running;
        let start_scans = sp.secs_to_scans(sp.pump_start_timeout_sec);
        self.check(PUMP_FAIL_START, fail_start, start_scans, 1, AlarmId::PumpFailStart, ann, now_us);

        Ok(())
    }

    /// Commanded divert position must confirm within the travel timeout.
    fn check_divert_travel(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        ann: &mut Annunciator,
        now_us: u64,
    ) -> Result<(), CoreError> {
        let cmd = store.read_bool(TagId::DoDivertCmd)?;
        if cmd != self.divert_cmd_last {
            self.divert_cmd_last = cmd;
            self.divert_cmd_scans = 0;
        } else {
            self.divert_cmd_scans = self.divert_cmd_scans.saturating_add(1);
        }

        let confirmed = if cmd {
            store.read_bool(TagId::DiDivertDivert)?
        } else {
            store.read_bool(TagId::DiDivertSales)?
        };

        if confirmed {
            ann.clear(AlarmId::DivertTravelFail, now_us);
        } else if self.divert_cmd_scans > sp.secs_to_scans(sp.divert_travel_timeout_sec) {
            warn!(
                commanded = if cmd { "DIVERT" } else { "SALES" },
                "divert valve failed to reach commanded position"
            );
            ann.raise(AlarmId::DivertTravelFail, now_us);
        }
        Ok(())
    }

    fn check(
        &mut self,
        idx: usize,
        cond: bool,
        on_scans: u32,
        off_scans: u32,
        id: AlarmId,
        ann: &mut Annunciator,
        now_us: u64,
    ) {
        if self.db[idx].update(cond, on_scans, off_scans) {
            ann.raise(id, now_us);
        } else {
            ann.clear(id, now_us);
        }
    }
}

impl Default for SafetyManager {
    fn default() -> Self {
        Self::new()
    }
}
