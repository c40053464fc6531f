//! Skid hardware simulator.
//!
//! Stands in for the physical unit behind [`IoPort`]: pump spin-up and run
//! feedback, valve travel, flow ramp with pulse generation, and the slow
//! process variables. With noise disabled (the default) and a fixed time
//! base, a scan sequence replays bit-identically regardless of seed.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::CoreError;
use crate::io::IoPort;
use crate::store::TagStore;
use crate::tags::TagId;

const PUMP_RUN_DELAY_S: f64 = 1.0;
const VALVE_TRAVEL_S: f64 = 0.5;
const NOMINAL_FLOW_BPH: f64 = 400.0;
const FLOW_TAU_S: f64 = 2.0;
const SIM_K_FACTOR: f64 = 100.0; // pulses per barrel
const POT_FULL_GAL: f64 = 15.0;

pub struct SkidSimulator {
    dt_s: f64,
    rng: StdRng,
    noise: bool,

    // Pump
    pump_cmd: bool,
    pump_run: bool,
    pump_on_s: f64,
    overload: bool,

    // Valves
    divert_cmd: bool,
    divert_pos: f64, // 0.0 = SALES, 1.0 = DIVERT
    prover_cmd: bool,
    prover_pos: f64,
    inlet_open: bool,
    outlet_open: bool,

    // Process
    flow_bph: f64,
    pulse_count: u64,
    pulse_carry: f64,
    bsw_pct: f32,
    meter_temp_f: f32,
    inlet_psi: f32,
    outlet_psi: f32,
    loop_psi: f32,
    strainer_dp_psi: f32,
    pot_level_gal: f64,
    gas_detected: bool,
    estop: bool,

    // Output mirrors
    sol_on: bool,
    bp_sales_psi: f32,
    bp_divert_psi: f32,
}

impl SkidSimulator {
    pub fn new(seed: u64, scan_period_ms: u64) -> Self {
        Self {
            dt_s: scan_period_ms as f64 / 1000.0,
            rng: StdRng::seed_from_u64(seed),
            noise: false,
            pump_cmd: false,
            pump_run: false,
            pump_on_s: 0.0,
            overload: false,
            divert_cmd: true,
            divert_pos: 1.0,
            prover_cmd: false,
            prover_pos: 0.0,
            inlet_open: true,
            outlet_open: true,
            flow_bph: 0.0,
            pulse_count: 0,
            pulse_carry: 0.0,
            bsw_pct: 0.3,
            meter_temp_f: 60.0,
            inlet_psi: 45.0,
            outlet_psi: 35.0,
            loop_psi: 40.0,
            strainer_dp_psi: 2.0,
            pot_level_gal: 0.0,
            gas_detected: false,
            estop: false,
            sol_on: false,
            bp_sales_psi: 50.0,
            bp_divert_psi: 50.0,
        }
    }

    /// Enable measurement noise for live demo runs. Leaves the process
    /// model itself deterministic.
    pub fn with_noise(mut self) -> Self {
        self.noise = true;
        self
    }

    // ── Test and demo overrides ──────────────────────────────────────

    pub fn set_bsw(&mut self, pct: f32) {
        self.bsw_pct = pct;
    }

    pub fn set_meter_temp(&mut self, deg_f: f32) {
        self.meter_temp_f = deg_f;
    }

    pub fn set_inlet_pressure(&mut self, psi: f32) {
        self.inlet_psi = psi;
    }

    pub fn set_loop_pressure(&mut self, psi: f32) {
        self.loop_psi = psi;
    }

    pub fn set_strainer_dp(&mut self, psi: f32) {
        self.strainer_dp_psi = psi;
    }

    pub fn set_estop(&mut self, active: bool) {
        self.estop = active;
    }

    pub fn set_overload(&mut self, active: bool) {
        self.overload = active;
    }

    pub fn set_valves(&mut self, inlet_open: bool, outlet_open: bool) {
        self.inlet_open = inlet_open;
        self.outlet_open = outlet_open;
    }

    pub fn set_gas_detected(&mut self, active: bool) {
        self.gas_detected = active;
    }

    pub fn set_pot_level(&mut self, gal: f64) {
        self.pot_level_gal = gal;
    }

    /// Put the meter counter at an arbitrary point (wrap tests).
    pub fn set_pulse_count(&mut self, count: u64) {
        self.pulse_count = count;
        self.pulse_carry = 0.0;
    }

    /// Add pulses on top of whatever the flow model produces.
    pub fn inject_pulses(&mut self, pulses: u64) {
        self.pulse_count = self.pulse_count.wrapping_add(pulses);
    }

    /// Stop the flow model from generating pulses (exact-total tests).
    pub fn freeze_flow(&mut self) {
        self.flow_bph = -1.0;
    }

    pub fn pulse_count(&self) -> u64 {
        self.pulse_count
    }

    pub fn flow_bph(&self) -> f64 {
        self.flow_bph.max(0.0)
    }

    // ── Process model ────────────────────────────────────────────────

    fn step(&mut self) {
        let dt = self.dt_s;

        // Pump: run feedback follows the command after a starter delay.
        if self.pump_cmd && !self.overload && !self.estop {
            self.pump_on_s += dt;
            self.pump_run = self.pump_on_s >= PUMP_RUN_DELAY_S;
        } else {
            self.pump_on_s = 0.0;
            self.pump_run = false;
        }

        // Flow: first-order ramp toward nominal while pumping. A negative
        // value means the model is frozen for a test.
        if self.flow_bph >= 0.0 {
            let target = if self.pump_run { NOMINAL_FLOW_BPH } else { 0.0 };
            self.flow_bph += (target - self.flow_bph) * (dt / FLOW_TAU_S).min(1.0);
            if self.flow_bph < 0.5 && target == 0.0 {
                self.flow_bph = 0.0;
            }

            // Meter pulses with fractional carry.
            let pulses = self.flow_bph / 3600.0 * SIM_K_FACTOR * dt + self.pulse_carry;
            let whole = pulses.floor();
            self.pulse_carry = pulses - whole;
            self.pulse_count = self.pulse_count.wrapping_add(whole as u64);
        }

        // Valve travel.
        let rate = dt / VALVE_TRAVEL_S;
        if self.divert_cmd {
            self.divert_pos = (self.divert_pos + rate).min(1.0);
        } else {
            self.divert_pos = (self.divert_pos - rate).max(0.0);
        }
        if self.prover_cmd {
            self.prover_pos = (self.prover_pos + rate).min(1.0);
        } else {
            self.prover_pos = (self.prover_pos - rate).max(0.0);
        }

        // Sample pot fills while the solenoid is energized.
        if self.sol_on {
            self.pot_level_gal += 0.002 * dt;
        }
    }

    fn jitter(&mut self, amplitude: f32) -> f32 {
        if self.noise {
            self.rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }
}

impl IoPort for SkidSimulator {
    fn read_inputs(&mut self, store: &TagStore) -> Result<(), CoreError> {
        self.step();

        store.write_bool(TagId::DiInletVlvOpen, self.inlet_open)?;
        store.write_bool(TagId::DiInletVlvClosed, !self.inlet_open)?;
        store.write_bool(TagId::DiStrainerHiDp, self.strainer_dp_psi > 20.0)?;
        store.write_bool(TagId::DiPumpRunning, self.pump_run)?;
        store.write_bool(TagId::DiPumpOverload, self.overload)?;
        store.write_bool(TagId::DiDivertSales, self.divert_pos < 0.05)?;
        store.write_bool(TagId::DiDivertDivert, self.divert_pos > 0.95)?;
        store.write_bool(TagId::DiSamplePotHi, self.pot_level_gal >= POT_FULL_GAL)?;
        store.write_bool(TagId::DiSamplePotLo, self.pot_level_gal <= 0.5)?;
        store.write_bool(TagId::DiProverVlvOpen, self.prover_pos > 0.95)?;
        store.write_bool(TagId::DiAirElimFloat, self.gas_detected)?;
        store.write_bool(TagId::DiOutletVlvOpen, self.outlet_open)?;
        store.write_bool(TagId::DiEstop, self.estop)?;

        let press_noise = self.jitter(0.3);
        store.write_f32(TagId::AiInletPress, self.inlet_psi + press_noise)?;
        store.write_f32(TagId::AiLoopHiPress, self.loop_psi + self.jitter(0.3))?;
        store.write_f32(TagId::AiStrainerDp, self.strainer_dp_psi + self.jitter(0.1))?;
        store.write_f32(TagId::AiBswProbe, self.bsw_pct + self.jitter(0.01))?;
        store.write_f32(TagId::AiMeterTemp, self.meter_temp_f + self.jitter(0.1))?;
        store.write_f32(TagId::AiTestThermo, self.meter_temp_f + self.jitter(0.2))?;
        store.write_f32(TagId::AiOutletPress, self.outlet_psi + self.jitter(0.3))?;

        // The field counter is 32 bits wide.
        store.write_count(TagId::PiMeterPulse, self.pulse_count & u64::from(u32::MAX))?;
        Ok(())
    }

    fn write_outputs(&mut self, store: &TagStore) -> Result<(), CoreError> {
        self.pump_cmd = store.read_bool(TagId::DoPumpStart)?;
        self.divert_cmd = store.read_bool(TagId::DoDivertCmd)?;
        self.sol_on = store.read_bool(TagId::DoSampleSol)?;
        self.prover_cmd = store.read_bool(TagId::DoProverVlvCmd)?;
        self.bp_sales_psi = store.read_f32(TagId::AoBpSalesSp)?;
        self.bp_divert_psi = store.read_f32(TagId::AoBpDivertSp)?;
        Ok(())
    }
}

/// Cloneable handle so tests and the runtime can poke the simulator while
/// the controller owns it as an `IoPort`.
#[derive(Clone)]
pub struct SharedSim(Arc<Mutex<SkidSimulator>>);

impl SharedSim {
    pub fn new(sim: SkidSimulator) -> Self {
        Self(Arc::new(Mutex::new(sim)))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SkidSimulator) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl IoPort for SharedSim {
    fn read_inputs(&mut self, store: &TagStore) -> Result<(), CoreError> {
        self.0.lock().unwrap().read_inputs(store)
    }

    fn write_outputs(&mut self, store: &TagStore) -> Result<(), CoreError> {
        self.0.lock().unwrap().write_outputs(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::TimeBase;

    fn scan(sim: &mut SkidSimulator, store: &TagStore) {
        sim.read_inputs(store).unwrap();
        sim.write_outputs(store).unwrap();
    }

    #[test]
    fn pump_feedback_follows_command_after_delay() {
        let store = TagStore::new(TimeBase::fixed());
        let mut sim = SkidSimulator::new(1, 100);
        scan(&mut sim, &store);
        assert!(!store.read_bool(TagId::DiPumpRunning).unwrap());

        store.write_bool(TagId::DoPumpStart, true).unwrap();
        sim.write_outputs(&store).unwrap();
        for _ in 0..15 {
            scan(&mut sim, &store);
        }
        assert!(store.read_bool(TagId::DiPumpRunning).unwrap());
    }

    #[test]
    fn divert_valve_travels_to_commanded_position() {
        let store = TagStore::new(TimeBase::fixed());
        let mut sim = SkidSimulator::new(1, 100);
        // Fail position is DIVERT.
        scan(&mut sim, &store);
        assert!(store.read_bool(TagId::DiDivertDivert).unwrap());

        store.write_bool(TagId::DoDivertCmd, false).unwrap();
        sim.write_outputs(&store).unwrap();
        for _ in 0..10 {
            scan(&mut sim, &store);
        }
        assert!(store.read_bool(TagId::DiDivertSales).unwrap());
        assert!(!store.read_bool(TagId::DiDivertDivert).unwrap());
    }

    #[test]
    fn flow_generates_pulses_while_pumping() {
        let store = TagStore::new(TimeBase::fixed());
        let mut sim = SkidSimulator::new(1, 100);
        store.write_bool(TagId::DoPumpStart, true).unwrap();
        sim.write_outputs(&store).unwrap();
        for _ in 0..300 {
            scan(&mut sim, &store);
        }
        assert!(sim.pulse_count() > 0);
        assert!(sim.flow_bph() > 100.0);
    }

    #[test]
    fn same_seed_same_trace() {
        let run = |seed: u64| {
            let store = TagStore::new(TimeBase::fixed());
            let mut sim = SkidSimulator::new(seed, 100).with_noise();
            store.write_bool(TagId::DoPumpStart, true).unwrap();
            sim.write_outputs(&store).unwrap();
            for _ in 0..50 {
                scan(&mut sim, &store);
            }
            (sim.pulse_count(), store.read_f32(TagId::AiInletPress).unwrap())
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn injected_pulses_are_additive() {
        let mut sim = SkidSimulator::new(1, 100);
        sim.freeze_flow();
        sim.inject_pulses(10_000);
        assert_eq!(sim.pulse_count(), 10_000);
    }
}
