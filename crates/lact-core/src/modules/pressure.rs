//! Pressure monitoring and backpressure setpoint output.
//!
//! The shutdown-grade pressure interlocks live in the safety manager;
//! this module publishes the backpressure valve setpoints and annunciates
//! outlet pressure low with hysteresis at 2 % of span.

use crate::alarms::{AlarmId, Annunciator};
use crate::error::CoreError;
use crate::setpoints::Setpoints;
use crate::store::TagStore;
use crate::tags::TagId;

/// Hysteresis band as a fraction of the transmitter span.
const HYSTERESIS_FRAC: f32 = 0.02;

pub struct PressureMonitor {
    outlet_lo: bool,
}

impl PressureMonitor {
    pub fn new() -> Self {
        Self { outlet_lo: false }
    }

    pub fn execute(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        ann: &mut Annunciator,
        now_us: u64,
    ) -> Result<(), CoreError> {
        store.write_f32(TagId::AoBpSalesSp, sp.backpressure_sales_psi as f32)?;
        store.write_f32(TagId::AoBpDivertSp, sp.backpressure_divert_psi as f32)?;

        let outlet = store.read_f32(TagId::AiOutletPress)?;
        let pump_running = store.read_bool(TagId::DiPumpRunning)?;
        let (lo, hi) = TagId::AiOutletPress.range();
        let band = (hi - lo) * HYSTERESIS_FRAC;
        let threshold = sp.outlet_press_lo_psi as f32;

        if pump_running && outlet < threshold {
            self.outlet_lo = true;
        } else if !pump_running || outlet > threshold + band {
            self.outlet_lo = false;
        }

        if self.outlet_lo {
            ann.raise(AlarmId::OutletPressLo, now_us);
        } else {
            ann.clear(AlarmId::OutletPressLo, now_us);
        }
        Ok(())
    }
}

impl Default for PressureMonitor {
    fn default() -> Self {
        Self::new()
    }
}
