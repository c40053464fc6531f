//! Top-level operating state machine.
//!
//! ```text
//!     IDLE ──► STARTUP ──► RUNNING ──► SHUTDOWN ──► IDLE
//!                 │            │
//!                 │            ├──► DIVERT ──► RUNNING
//!                 │            │
//!                 │            └──► PROVING ──► RUNNING
//!                 │
//!                 └──► IDLE (on failure)
//!
//!     Any state ──► ESTOP (RequestEStop)
//!     ESTOP     ──► IDLE  (estop cleared + CmdReset)
//! ```
//!
//! Every wait is a deadline in scan counts; nothing here blocks.

use std::fmt;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::alarms::Requests;
use crate::error::CoreError;
use crate::setpoints::Setpoints;
use crate::store::TagStore;
use crate::tags::TagId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LactState {
    Idle,
    Startup,
    Running,
    Divert,
    Proving,
    Shutdown,
    EStop,
}

impl LactState {
    pub fn name(self) -> &'static str {
        match self {
            LactState::Idle => "IDLE",
            LactState::Startup => "STARTUP",
            LactState::Running => "RUNNING",
            LactState::Divert => "DIVERT",
            LactState::Proving => "PROVING",
            LactState::Shutdown => "SHUTDOWN",
            LactState::EStop => "ESTOP",
        }
    }
}

impl fmt::Display for LactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn legal(from: LactState, to: LactState) -> bool {
    use LactState::*;
    if to == EStop {
        return true;
    }
    matches!(
        (from, to),
        (Idle, Startup)
            | (Startup, Running)
            | (Startup, Idle)
            | (Startup, Divert)
            | (Running, Divert)
            | (Divert, Running)
            | (Running, Proving)
            | (Proving, Running)
            | (Running, Shutdown)
            | (Divert, Shutdown)
            | (Shutdown, Idle)
            | (EStop, Idle)
    )
}

pub struct StateMachine {
    state: LactState,
    scans_in_state: u32,
    step: u8,
    step_scans: u32,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: LactState::Idle,
            scans_in_state: 0,
            step: 0,
            step_scans: 0,
        }
    }

    pub fn state(&self) -> LactState {
        self.state
    }

    fn transition(&mut self, to: LactState, store: &TagStore) -> Result<bool, CoreError> {
        if !legal(self.state, to) {
            // Internal callers only request listed transitions; anything
            // else is a logic fault worth shouting about.
            error!(from = %self.state, to = %to, "illegal transition rejected");
            return Ok(false);
        }
        info!(from = %self.state, to = %to, "state transition");
        store.write_text(TagId::PrevStateTag, self.state.name())?;
        self.state = to;
        self.scans_in_state = 0;
        self.step = 0;
        self.step_scans = 0;
        store.write_text(TagId::LactStateTag, to.name())?;
        self.enter(to, store)?;
        Ok(true)
    }

    fn enter(&mut self, state: LactState, store: &TagStore) -> Result<(), CoreError> {
        match state {
            LactState::Idle => self.safe_outputs(store)?,
            LactState::Startup => {
                // Fail position until BS&W proves clean.
                store.write_bool(TagId::DoDivertCmd, true)?;
            }
            LactState::Running => {
                store.write_bool(TagId::DoDivertCmd, false)?;
                store.write_bool(TagId::DoStatusGreen, true)?;
            }
            LactState::Divert => {
                store.write_bool(TagId::DoDivertCmd, true)?;
                store.write_bool(TagId::DoStatusGreen, false)?;
            }
            LactState::Proving => {}
            LactState::Shutdown => {
                store.write_bool(TagId::DoDivertCmd, true)?;
                store.write_bool(TagId::DoSampleSol, false)?;
                store.write_bool(TagId::DoSampleMixPump, false)?;
                store.write_bool(TagId::DoStatusGreen, false)?;
            }
            LactState::EStop => {
                store.write_bool(TagId::PumpDemand, false)?;
                store.write_bool(TagId::DoPumpStart, false)?;
                store.write_bool(TagId::DoSampleSol, false)?;
                store.write_bool(TagId::DoSampleMixPump, false)?;
                store.write_bool(TagId::DoProverVlvCmd, false)?;
                store.write_bool(TagId::DoDivertCmd, true)?;
                store.write_bool(TagId::DoAlarmBeacon, true)?;
                store.write_bool(TagId::DoAlarmHorn, true)?;
                store.write_bool(TagId::DoStatusGreen, false)?;
            }
        }
        Ok(())
    }

    fn safe_outputs(&self, store: &TagStore) -> Result<(), CoreError> {
        store.write_bool(TagId::PumpDemand, false)?;
        store.write_bool(TagId::DoDivertCmd, true)?;
        store.write_bool(TagId::DoSampleSol, false)?;
        store.write_bool(TagId::DoSampleMixPump, false)?;
        store.write_bool(TagId::DoProverVlvCmd, false)?;
        store.write_bool(TagId::DoStatusGreen, false)?;
        Ok(())
    }

    // ── Operator commands ────────────────────────────────────────────

    pub fn cmd_start(&mut self, store: &TagStore) -> Result<(), CoreError> {
        if self.state != LactState::Idle {
            return Err(CoreError::IllegalCommand { command: "START", state: self.state });
        }
        if store.read_bool(TagId::PumpLockout)? {
            warn!("start denied: pump restart lockout active");
            return Err(CoreError::IllegalCommand { command: "START", state: self.state });
        }
        self.transition(LactState::Startup, store)?;
        Ok(())
    }

    pub fn cmd_stop(&mut self, store: &TagStore) -> Result<(), CoreError> {
        match self.state {
            LactState::Running | LactState::Divert => {
                self.transition(LactState::Shutdown, store)?;
                Ok(())
            }
            // A stop during startup aborts back to Idle.
            LactState::Startup => {
                self.transition(LactState::Idle, store)?;
                Ok(())
            }
            // A stop during proving aborts the prove first; the operator can
            // stop again from Running.
            LactState::Proving => {
                self.transition(LactState::Running, store)?;
                Ok(())
            }
            _ => Err(CoreError::IllegalCommand { command: "STOP", state: self.state }),
        }
    }

    pub fn cmd_prove(&mut self, store: &TagStore, divert_pending: bool) -> Result<(), CoreError> {
        if self.state != LactState::Running || divert_pending {
            return Err(CoreError::IllegalCommand { command: "PROVE", state: self.state });
        }
        self.transition(LactState::Proving, store)?;
        Ok(())
    }

    pub fn cmd_reset(&mut self, store: &TagStore) -> Result<(), CoreError> {
        if self.state != LactState::EStop {
            // Outside EStop a reset only releases latched alarms, which the
            // controller handles; nothing to do here.
            return Ok(());
        }
        if store.read_bool(TagId::DiEstop)? {
            return Err(CoreError::IllegalCommand { command: "RESET", state: self.state });
        }
        self.transition(LactState::Idle, store)?;
        Ok(())
    }

    /// Panic-equivalent path: unconditional E-Stop entry.
    pub fn force_estop(&mut self, store: &TagStore) -> Result<(), CoreError> {
        if self.state != LactState::EStop {
            self.transition(LactState::EStop, store)?;
        }
        Ok(())
    }

    // ── Safety requests (win over operator commands) ─────────────────

    pub fn apply_safety(&mut self, req: Requests, store: &TagStore) -> Result<(), CoreError> {
        if req.estop {
            if self.state != LactState::EStop {
                self.transition(LactState::EStop, store)?;
            }
            return Ok(());
        }
        if req.shutdown {
            match self.state {
                LactState::Running | LactState::Divert => {
                    self.transition(LactState::Shutdown, store)?;
                }
                // Startup aborts; the pump demand drops with it.
                LactState::Startup => {
                    self.transition(LactState::Idle, store)?;
                }
                // Proving first falls back to Running; the still-active
                // request takes it to Shutdown next scan.
                LactState::Proving => {
                    self.transition(LactState::Running, store)?;
                }
                _ => {}
            }
            return Ok(());
        }
        if req.divert && self.state == LactState::Running {
            self.transition(LactState::Divert, store)?;
        }
        Ok(())
    }

    // ── Per-scan action ──────────────────────────────────────────────

    pub fn execute(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        req: Requests,
        prove_finished: bool,
    ) -> Result<(), CoreError> {
        self.scans_in_state = self.scans_in_state.saturating_add(1);
        self.step_scans = self.step_scans.saturating_add(1);

        match self.state {
            LactState::Idle => self.safe_outputs(store)?,
            LactState::Startup => self.run_startup(store, sp)?,
            LactState::Running => {
                store.write_bool(TagId::DoDivertCmd, false)?;
                store.write_bool(TagId::DoStatusGreen, true)?;
                store.write_bool(TagId::PumpDemand, true)?;
            }
            LactState::Divert => {
                store.write_bool(TagId::DoDivertCmd, true)?;
                store.write_bool(TagId::PumpDemand, true)?;
                if !req.divert {
                    self.transition(LactState::Running, store)?;
                }
            }
            LactState::Proving => {
                store.write_bool(TagId::DoDivertCmd, false)?;
                store.write_bool(TagId::DoStatusGreen, true)?;
                store.write_bool(TagId::PumpDemand, true)?;
                if prove_finished {
                    self.transition(LactState::Running, store)?;
                }
            }
            LactState::Shutdown => self.run_shutdown(store, sp)?,
            LactState::EStop => {
                store.write_bool(TagId::PumpDemand, false)?;
                store.write_bool(TagId::DoSampleSol, false)?;
                store.write_bool(TagId::DoSampleMixPump, false)?;
                store.write_bool(TagId::DoProverVlvCmd, false)?;
                store.write_bool(TagId::DoDivertCmd, true)?;
            }
        }
        Ok(())
    }

    /// Startup entry sequence, scan paced.
    ///
    /// Verify valves → divert to DIVERT → start pump → wait run feedback →
    /// BS&W stabilize → SALES if clean, else Divert.
    fn run_startup(&mut self, store: &TagStore, sp: &Setpoints) -> Result<(), CoreError> {
        let travel_scans = sp.secs_to_scans(sp.divert_travel_timeout_sec);
        match self.step {
            0 => {
                let inlet = store.read_bool(TagId::DiInletVlvOpen)?;
                let outlet = store.read_bool(TagId::DiOutletVlvOpen)?;
                if !inlet || !outlet {
                    warn!(inlet, outlet, "startup aborted: valves not aligned");
                    self.transition(LactState::Idle, store)?;
                    return Ok(());
                }
                self.advance_step(1);
            }
            1 => {
                store.write_bool(TagId::DoDivertCmd, true)?;
                self.advance_step(2);
            }
            2 => {
                if store.read_bool(TagId::DiDivertDivert)? {
                    self.advance_step(3);
                } else if self.step_scans > travel_scans {
                    warn!("startup aborted: divert valve travel timeout");
                    self.transition(LactState::Idle, store)?;
                }
            }
            3 => {
                store.write_bool(TagId::PumpDemand, true)?;
                self.advance_step(4);
            }
            4 => {
                if store.read_bool(TagId::DiPumpRunning)? {
                    self.advance_step(5);
                } else if self.step_scans > sp.secs_to_scans(sp.pump_start_timeout_sec) {
                    warn!("startup aborted: pump failed to start");
                    store.write_bool(TagId::PumpDemand, false)?;
                    self.transition(LactState::Idle, store)?;
                }
            }
            5 => {
                if self.step_scans >= sp.secs_to_scans(sp.bsw_stabilize_sec) {
                    let bsw = f64::from(store.read_f32(TagId::BswPct)?);
                    if bsw < sp.bsw_divert_pct {
                        store.write_bool(TagId::DoDivertCmd, false)?;
                        self.advance_step(6);
                    } else {
                        warn!(bsw, "startup: BS&W high, entering divert");
                        self.transition(LactState::Divert, store)?;
                    }
                }
            }
            _ => {
                if store.read_bool(TagId::DiDivertSales)? {
                    self.transition(LactState::Running, store)?;
                } else if self.step_scans > travel_scans {
                    warn!("startup aborted: divert valve did not reach SALES");
                    store.write_bool(TagId::PumpDemand, false)?;
                    self.transition(LactState::Idle, store)?;
                }
            }
        }
        Ok(())
    }

    /// Orderly shutdown: divert, sampler off, pump off, confirm stop.
    fn run_shutdown(&mut self, store: &TagStore, sp: &Setpoints) -> Result<(), CoreError> {
        store.write_bool(TagId::DoDivertCmd, true)?;
        match self.step {
            0 => {
                store.write_bool(TagId::DoSampleSol, false)?;
                store.write_bool(TagId::DoSampleMixPump, false)?;
                self.advance_step(1);
            }
            1 => {
                if self.step_scans >= sp.secs_to_scans(sp.pump_stop_delay_sec) {
                    store.write_bool(TagId::PumpDemand, false)?;
                    self.advance_step(2);
                }
            }
            _ => {
                if !store.read_bool(TagId::DiPumpRunning)? {
                    self.transition(LactState::Idle, store)?;
                } else if self.step_scans > sp.secs_to_scans(15.0) {
                    warn!("pump did not confirm stop during shutdown");
                    self.transition(LactState::Idle, store)?;
                }
            }
        }
        Ok(())
    }

    fn advance_step(&mut self, step: u8) {
        self.step = step;
        self.step_scans = 0;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::TimeBase;

    fn rig() -> (StateMachine, TagStore, Setpoints) {
        (
            StateMachine::new(),
            TagStore::new(TimeBase::fixed()),
            Setpoints::default(),
        )
    }

    fn no_req() -> Requests {
        Requests::default()
    }

    #[test]
    fn start_only_from_idle() {
        let (mut sm, store, _sp) = rig();
        sm.cmd_start(&store).unwrap();
        assert_eq!(sm.state(), LactState::Startup);
        let err = sm.cmd_start(&store).unwrap_err();
        assert!(matches!(err, CoreError::IllegalCommand { .. }));
    }

    #[test]
    fn startup_walks_to_running_with_clean_bsw() {
        let (mut sm, store, sp) = rig();
        store.write_bool(TagId::DiInletVlvOpen, true).unwrap();
        store.write_bool(TagId::DiOutletVlvOpen, true).unwrap();
        store.write_f32(TagId::BswPct, 0.3).unwrap();
        sm.cmd_start(&store).unwrap();

        for _ in 0..200 {
            // Field follows commands promptly in this rig.
            let cmd = store.read_bool(TagId::DoDivertCmd).unwrap();
            store.write_bool(TagId::DiDivertDivert, cmd).unwrap();
            store.write_bool(TagId::DiDivertSales, !cmd).unwrap();
            let demand = store.read_bool(TagId::PumpDemand).unwrap();
            store.write_bool(TagId::DiPumpRunning, demand).unwrap();
            sm.execute(&store, &sp, no_req(), false).unwrap();
            if sm.state() == LactState::Running {
                break;
            }
        }
        assert_eq!(sm.state(), LactState::Running);
        assert!(!store.read_bool(TagId::DoDivertCmd).unwrap());
        assert!(store.read_bool(TagId::DoStatusGreen).unwrap());
    }

    #[test]
    fn startup_aborts_without_valves() {
        let (mut sm, store, sp) = rig();
        sm.cmd_start(&store).unwrap();
        sm.execute(&store, &sp, no_req(), false).unwrap();
        assert_eq!(sm.state(), LactState::Idle);
    }

    #[test]
    fn startup_with_dirty_bsw_lands_in_divert() {
        let (mut sm, store, sp) = rig();
        store.write_bool(TagId::DiInletVlvOpen, true).unwrap();
        store.write_bool(TagId::DiOutletVlvOpen, true).unwrap();
        store.write_f32(TagId::BswPct, 2.0).unwrap();
        sm.cmd_start(&store).unwrap();
        for _ in 0..200 {
            let cmd = store.read_bool(TagId::DoDivertCmd).unwrap();
            store.write_bool(TagId::DiDivertDivert, cmd).unwrap();
            let demand = store.read_bool(TagId::PumpDemand).unwrap();
            store.write_bool(TagId::DiPumpRunning, demand).unwrap();
            sm.execute(&store, &sp, no_req(), false).unwrap();
            if sm.state() != LactState::Startup {
                break;
            }
        }
        assert_eq!(sm.state(), LactState::Divert);
        assert!(store.read_bool(TagId::DoDivertCmd).unwrap());
    }

    #[test]
    fn divert_recovers_when_request_drops() {
        let (mut sm, store, sp) = rig();
        sm.state = LactState::Divert;
        let req = Requests { divert: true, ..Default::default() };
        sm.execute(&store, &sp, req, false).unwrap();
        assert_eq!(sm.state(), LactState::Divert);
        sm.execute(&store, &sp, no_req(), false).unwrap();
        assert_eq!(sm.state(), LactState::Running);
        assert!(!store.read_bool(TagId::DoDivertCmd).unwrap());
    }

    #[test]
    fn estop_request_preempts_any_state() {
        for from in [
            LactState::Idle,
            LactState::Startup,
            LactState::Running,
            LactState::Divert,
            LactState::Proving,
            LactState::Shutdown,
        ] {
            let (mut sm, store, _sp) = rig();
            sm.state = from;
            let req = Requests { estop: true, ..Default::default() };
            sm.apply_safety(req, &store).unwrap();
            assert_eq!(sm.state(), LactState::EStop, "from {from}");
            assert!(!store.read_bool(TagId::DoPumpStart).unwrap());
            assert!(!store.read_bool(TagId::DoSampleSol).unwrap());
            assert!(!store.read_bool(TagId::DoProverVlvCmd).unwrap());
            assert!(store.read_bool(TagId::DoDivertCmd).unwrap());
            assert!(store.read_bool(TagId::DoAlarmBeacon).unwrap());
            assert!(store.read_bool(TagId::DoAlarmHorn).unwrap());
        }
    }

    #[test]
    fn estop_reset_requires_cleared_input() {
        let (mut sm, store, _sp) = rig();
        sm.state = LactState::EStop;
        store.write_bool(TagId::DiEstop, true).unwrap();
        assert!(sm.cmd_reset(&store).is_err());
        store.write_bool(TagId::DiEstop, false).unwrap();
        sm.cmd_reset(&store).unwrap();
        assert_eq!(sm.state(), LactState::Idle);
    }

    #[test]
    fn shutdown_request_during_proving_falls_back_then_stops() {
        let (mut sm, store, _sp) = rig();
        sm.state = LactState::Proving;
        let req = Requests { shutdown: true, ..Default::default() };
        sm.apply_safety(req, &store).unwrap();
        assert_eq!(sm.state(), LactState::Running);
        sm.apply_safety(req, &store).unwrap();
        assert_eq!(sm.state(), LactState::Shutdown);
    }

    #[test]
    fn shutdown_completes_to_idle_when_pump_stops() {
        let (mut sm, store, sp) = rig();
        sm.state = LactState::Running;
        store.write_bool(TagId::DiPumpRunning, true).unwrap();
        sm.cmd_stop(&store).unwrap();
        assert_eq!(sm.state(), LactState::Shutdown);
        for _ in 0..100 {
            let demand = store.read_bool(TagId::PumpDemand).unwrap();
            store.write_bool(TagId::DiPumpRunning, demand).unwrap();
            sm.execute(&store, &sp, no_req(), false).unwrap();
            if sm.state() == LactState::Idle {
                break;
            }
        }
        assert_eq!(sm.state(), LactState::Idle);
        assert!(store.read_bool(TagId::DoDivertCmd).unwrap());
    }

    #[test]
    fn prove_rejected_outside_running_or_with_divert_pending() {
        let (mut sm, store, _sp) = rig();
        assert!(sm.cmd_prove(&store, false).is_err());
        sm.state = LactState::Running;
        assert!(sm.cmd_prove(&store, true).is_err());
        sm.cmd_prove(&store, false).unwrap();
        assert_eq!(sm.state(), LactState::Proving);
    }

    #[test]
    fn proving_returns_to_running_when_finished() {
        let (mut sm, store, sp) = rig();
        sm.state = LactState::Proving;
        sm.execute(&store, &sp, no_req(), true).unwrap();
        assert_eq!(sm.state(), LactState::Running);
    }

    #[test]
    fn unlisted_transitions_rejected() {
        use LactState::*;
        let states = [Idle, Startup, Running, Divert, Proving, Shutdown, EStop];
        for from in states {
            for to in states {
                if legal(from, to) {
                    continue;
                }
                let (mut sm, store, _sp) = rig();
                sm.state = from;
                assert!(!sm.transition(to, &store).unwrap(), "{from} -> {to}");
                assert_eq!(sm.state(), from);
            }
        }
    }

    #[test]
    fn start_denied_under_pump_lockout() {
        let (mut sm, store, _sp) = rig();
        store.write_bool(TagId::PumpLockout, true).unwrap();
        assert!(sm.cmd_start(&store).is_err());
        assert_eq!(sm.state(), LactState::Idle);
    }
}
