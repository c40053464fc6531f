//! Meter temperature conditioning and CTL.
//!
//! CTL converts observed volume to the 60 °F base per the linear field
//! approximation of API MPMS Ch. 11.1; the crude-specific polynomial can
//! replace [`compute_ctl`] without touching the interface.

use crate::error::CoreError;
use crate::setpoints::Setpoints;
use crate::store::TagStore;
use crate::tags::{Quality, TagId};

/// CTL for an observed temperature. Returns the factor and whether the
/// sanity clamp engaged.
pub fn compute_ctl(observed_f: f64, sp: &Setpoints) -> (f64, bool) {
    let raw = 1.0 - sp.api_thermal_expansion_alpha * (observed_f - sp.temp_base_deg_f);
    let ctl = raw.clamp(0.90, 1.10);
    (ctl, ctl != raw)
}

pub struct TemperatureMonitor;

impl TemperatureMonitor {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(&mut self, store: &TagStore, sp: &Setpoints) -> Result<(), CoreError> {
        let observed = f64::from(store.read_f32(TagId::AiMeterTemp)?);
        let (ctl, clamped) = compute_ctl(observed, sp);
        let quality = if clamped { Quality::Uncertain } else { Quality::Good };
        store.write_f32_quality(TagId::CtlFactor, ctl as f32, quality)?;
        Ok(())
    }
}

impl Default for TemperatureMonitor {
    fn default() -> Self {
        Self::new()
    }
}
