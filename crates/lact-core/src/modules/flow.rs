//! Flow totalization from the PD meter pulse train.
//!
//! Pulse deltas are taken modulo the 32-bit width of the field counter,
//! so a counter wrap never produces a negative or runaway increment. The
//! batch ledger is kept in f64; the tag mirrors are display copies.

use serde::Serialize;

use crate::error::CoreError;
use crate::modules::temperature::compute_ctl;
use crate::setpoints::Setpoints;
use crate::state::LactState;
use crate::store::TagStore;
use crate::tags::{Quality, TagId};

const COUNTER_MASK: u64 = u32::MAX as u64;

/// Custody ledger for the open batch. Monotone while the unit runs;
/// zeroed only by an explicit close-batch.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchTotals {
    pub started_us: u64,
    pub gross_bbl: f64,
    pub net_bbl: f64,
    pub diverted_gross_bbl: f64,
    pub diverted_net_bbl: f64,
    /// Σ observed °F × net Δbbl, for the volume-weighted average.
    temp_weight: f64,
    pub meter_factor: f64,
}

impl BatchTotals {
    pub fn avg_temp_f(&self) -> f64 {
        if self.net_bbl > 0.0 {
            self.temp_weight / self.net_bbl
        } else {
            0.0
        }
    }
}

pub struct FlowMeasurement {
    last_pulses: Option<u64>,
    rate_bph: f64,
}

impl FlowMeasurement {
    pub fn new() -> Self {
        Self {
            last_pulses: None,
            rate_bph: 0.0,
        }
    }

    /// Process this scan's pulse delta. Returns the net barrels delivered
    /// to sales this scan (the sampler paces itself on it).
    pub fn execute(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        state: LactState,
        batch: &mut BatchTotals,
    ) -> Result<f64, CoreError> {
        let current = store.read_count(TagId::PiMeterPulse)?;
        let delta = match self.last_pulses {
            Some(prev) => current.wrapping_sub(prev) & COUNTER_MASK,
            None => 0,
        };
        self.last_pulses = Some(current);

        let gross = delta as f64 / sp.meter_k_factor;

        let temp = f64::from(store.read_f32(TagId::AiMeterTemp)?);
        let (ctl, clamped) = compute_ctl(temp, sp);
        let net = gross * sp.meter_factor * ctl;

        // Instantaneous indicated rate.
        let dt_hr = sp.scan_period_ms as f64 / 3_600_000.0;
        self.rate_bph = if dt_hr > 0.0 { gross / dt_hr } else { 0.0 };

        let pump_running = store.read_bool(TagId::DiPumpRunning)?;
        let totalizing = pump_running
            && matches!(
                state,
                LactState::Running | LactState::Divert | LactState::Proving
            );

        let mut delivered = 0.0;
        if totalizing && delta > 0 {
            if state == LactState::Divert {
                batch.diverted_gross_bbl += gross;
                batch.diverted_net_bbl += net;
            } else {
                batch.gross_bbl += gross;
                batch.net_bbl += net;
                batch.temp_weight += temp * net;
                delivered = net;
            }
        }
        batch.meter_factor = sp.meter_factor;

        let net_quality = if clamped { Quality::Uncertain } else { Quality::Good };
        store.write_f32(TagId::FlowRateBph, self.rate_bph as f32)?;
        store.write_f32(TagId::BatchGrossBbl, batch.gross_bbl as f32)?;
        store.write_f32_quality(TagId::BatchNetBbl, batch.net_bbl as f32, net_quality)?;
        store.write_f32(TagId::BatchDivertedBbl, batch.diverted_net_bbl as f32)?;
        store.write_f32(TagId::MeterFactor, sp.meter_factor as f32)?;
        Ok(delivered)
    }

    /// Forget the pulse baseline (new batch keeps totalizing seamlessly;
    /// this is only for full restarts of the measurement chain).
    pub fn reset(&mut self) {
        self.last_pulses = None;
        self.rate_bph = 0.0;
    }
}

impl Default for FlowMeasurement {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::TimeBase;

    struct Rig {
        store: TagStore,
        sp: Setpoints,
        flow: FlowMeasurement,
        batch: BatchTotals,
    }

    impl Rig {
        fn new() -> Self {
            let store = TagStore::new(TimeBase::fixed());
            store.write_bool(TagId::DiPumpRunning, true).unwrap();
            Self {
                store,
                sp: Setpoints::default(),
                flow: FlowMeasurement::new(),
                batch: BatchTotals::default(),
            }
        }

        fn pulses(&self, count: u64) {
            self.store.write_count(TagId::PiMeterPulse, count).unwrap();
        }

        fn scan(&mut self, state: LactState) -> f64 {
            self.flow
                .execute(&self.store, &self.sp, state, &mut self.batch)
                .unwrap()
        }
    }

    #[test]
    fn ten_thousand_pulses_is_one_hundred_barrels() {
        let mut rig = Rig::new();
        rig.pulses(0);
        rig.scan(LactState::Running);
        rig.pulses(10_000);
        let delivered = rig.scan(LactState::Running);
        assert_eq!(rig.batch.gross_bbl, 100.0);
        assert_eq!(rig.batch.net_bbl, 100.0);
        assert_eq!(delivered, 100.0);
    }

    #[test]
    fn elevated_temperature_applies_ctl() {
        let mut rig = Rig::new();
        rig.store.write_f32(TagId::AiMeterTemp, 120.0).unwrap();
        rig.pulses(0);
        rig.scan(LactState::Running);
        rig.pulses(10_000);
        rig.scan(LactState::Running);
        assert_eq!(rig.batch.gross_bbl, 100.0);
        // 100 × (1 − 0.00045 × 60) = 97.300
        assert!((rig.batch.net_bbl - 97.3).abs() < 1e-9);
        assert!((rig.batch.avg_temp_f() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn counter_wrap_produces_small_positive_delta() {
        let mut rig = Rig::new();
        rig.pulses(u64::from(u32::MAX) - 99);
        rig.scan(LactState::Running);
        rig.pulses(100); // wrapped past 2^32
        rig.scan(LactState::Running);
        assert_eq!(rig.batch.gross_bbl, 2.0); // 200 pulses at K=100
    }

    #[test]
    fn first_scan_establishes_baseline_only() {
        let mut rig = Rig::new();
        rig.pulses(50_000);
        rig.scan(LactState::Running);
        assert_eq!(rig.batch.gross_bbl, 0.0);
    }

    #[test]
    fn divert_accumulates_to_its_own_ledger() {
        let mut rig = Rig::new();
        rig.pulses(0);
        rig.scan(LactState::Running);
        rig.pulses(1_000);
        let delivered = rig.scan(LactState::Divert);
        assert_eq!(rig.batch.gross_bbl, 0.0);
        assert_eq!(rig.batch.diverted_gross_bbl, 10.0);
        assert_eq!(delivered, 0.0);
    }

    #[test]
    fn no_accumulation_when_pump_stopped_or_idle() {
        let mut rig = Rig::new();
        rig.pulses(0);
        rig.scan(LactState::Running);

        rig.store.write_bool(TagId::DiPumpRunning, false).unwrap();
        rig.pulses(500);
        rig.scan(LactState::Running);
        assert_eq!(rig.batch.gross_bbl, 0.0);

        rig.store.write_bool(TagId::DiPumpRunning, true).unwrap();
        rig.pulses(1_000);
        rig.scan(LactState::Idle);
        assert_eq!(rig.batch.gross_bbl, 0.0);
    }

    #[test]
    fn meter_factor_scales_net() {
        let mut rig = Rig::new();
        rig.sp.meter_factor = 1.0011;
        rig.pulses(0);
        rig.scan(LactState::Running);
        rig.pulses(10_000);
        rig.scan(LactState::Running);
        assert_eq!(rig.batch.gross_bbl, 100.0);
        assert!((rig.batch.net_bbl - 100.11).abs() < 1e-9);
    }

    #[test]
    fn totals_never_decrease() {
        let mut rig = Rig::new();
        let mut last = (0.0, 0.0);
        let seq: [u64; 6] = [0, 10, 10, 4_000_000_000, 4_294_967_290, 5];
        for (i, p) in seq.into_iter().enumerate() {
            rig.pulses(p);
            let state = if i % 2 == 0 { LactState::Running } else { LactState::Divert };
            rig.scan(state);
            assert!(rig.batch.gross_bbl >= last.0);
            assert!(rig.batch.net_bbl >= last.1);
            last = (rig.batch.gross_bbl, rig.batch.net_bbl);
        }
    }
}
