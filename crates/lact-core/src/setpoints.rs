//! Tunable process setpoints.
//!
//! Modules resolve the snapshot once at scan entry, so a console `apply`
//! can never produce a mid-scan mix of old and new values.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One consistent setpoint snapshot. Immutable once installed; replaced
/// whole through [`SetpointStore::apply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Setpoints {
    // BS&W
    pub bsw_divert_pct: f64,
    pub bsw_debounce_sec: f64,
    pub bsw_stabilize_sec: f64,
    // Flow measurement
    pub meter_k_factor: f64,
    pub meter_factor: f64,
    pub api_thermal_expansion_alpha: f64,
    pub temp_base_deg_f: f64,
    pub temp_lo_deg_f: f64,
    pub temp_hi_deg_f: f64,
    // Pressure
    pub inlet_press_lo_psi: f64,
    pub outlet_press_lo_psi: f64,
    pub loop_press_hi_psi: f64,
    pub strainer_dp_hi_psi: f64,
    pub backpressure_sales_psi: f64,
    pub backpressure_divert_psi: f64,
    // Sampling
    pub sample_rate_sec: f64,
    /// Volumetric pacing; 0 falls back to time pacing via `sample_rate_sec`.
    pub sample_barrels_per_grab: f64,
    pub grab_duration_ms: u32,
    pub grab_volume_ml: f64,
    // Pump protection
    pub pump_max_starts_per_hour: u32,
    pub pump_lockout_sec: f64,
    pub pump_start_timeout_sec: f64,
    pub pump_stop_delay_sec: f64,
    // Divert valve
    pub divert_travel_timeout_sec: f64,
    // Executive
    pub scan_period_ms: u64,
    // Proving
    pub prove_runs: u32,
    pub repeatability_tolerance: f64,
    pub prove_certified_barrels: f64,
    pub prove_valve_timeout_sec: f64,
}

impl Default for Setpoints {
    fn default() -> Self {
        Self {
            bsw_divert_pct: 1.0,
            bsw_debounce_sec: 5.0,
            bsw_stabilize_sec: 2.0,
            meter_k_factor: 100.0,
            meter_factor: 1.0,
            api_thermal_expansion_alpha: 0.00045,
            temp_base_deg_f: 60.0,
            temp_lo_deg_f: 20.0,
            temp_hi_deg_f: 150.0,
            inlet_press_lo_psi: 5.0,
            outlet_press_lo_psi: 5.0,
            loop_press_hi_psi: 250.0,
            strainer_dp_hi_psi: 15.0,
            backpressure_sales_psi: 50.0,
            backpressure_divert_psi: 50.0,
            sample_rate_sec: 15.0,
            sample_barrels_per_grab: 0.0,
            grab_duration_ms: 500,
            grab_volume_ml: 1.5,
            pump_max_starts_per_hour: 6,
            pump_lockout_sec: 60.0,
            pump_start_timeout_sec: 10.0,
            pump_stop_delay_sec: 3.0,
            divert_travel_timeout_sec: 5.0,
            scan_period_ms: 100,
            prove_runs: 5,
            repeatability_tolerance: 0.0005,
            prove_certified_barrels: 10.0,
            prove_valve_timeout_sec: 30.0,
        }
    }
}

/// Declared domain per field, used by `apply` and file loading.
const DOMAINS: &[(&str, f64, f64)] = &[
    ("bsw_divert_pct", 0.1, 5.0),
    ("bsw_debounce_sec", 0.0, 60.0),
    ("bsw_stabilize_sec", 0.0, 120.0),
    ("meter_k_factor", 1.0, 10_000.0),
    ("meter_factor", 0.9800, 1.0200),
    ("api_thermal_expansion_alpha", 0.0003, 0.0006),
    ("temp_base_deg_f", 40.0, 80.0),
    ("temp_lo_deg_f", -20.0, 200.0),
    ("temp_hi_deg_f", -20.0, 200.0),
    ("inlet_press_lo_psi", 0.0, 300.0),
    ("outlet_press_lo_psi", 0.0, 300.0),
    ("loop_press_hi_psi", 0.0, 300.0),
    ("strainer_dp_hi_psi", 0.0, 50.0),
    ("backpressure_sales_psi", 0.0, 150.0),
    ("backpressure_divert_psi", 0.0, 150.0),
    ("sample_rate_sec", 1.0, 3600.0),
    ("sample_barrels_per_grab", 0.0, 100.0),
    ("grab_duration_ms", 50.0, 5000.0),
    ("grab_volume_ml", 0.1, 50.0),
    ("pump_max_starts_per_hour", 1.0, 30.0),
    ("pump_lockout_sec", 0.0, 3600.0),
    ("pump_start_timeout_sec", 1.0, 120.0),
    ("pump_stop_delay_sec", 0.0, 60.0),
    ("divert_travel_timeout_sec", 1.0, 60.0),
    ("scan_period_ms", 10.0, 1000.0),
    ("prove_runs", 1.0, 10.0),
    ("repeatability_tolerance", 0.0001, 0.01),
    ("prove_certified_barrels", 0.1, 1000.0),
    ("prove_valve_timeout_sec", 1.0, 300.0),
];

impl Setpoints {
    pub fn domain(name: &str) -> Option<(f64, f64)> {
        DOMAINS
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, lo, hi)| (*lo, *hi))
    }

    pub fn field_names() -> impl Iterator<Item = &'static str> {
        DOMAINS.iter().map(|(n, _, _)| *n)
    }

    fn get(&self, name: &str) -> Option<f64> {
        Some(match name {
            "bsw_divert_pct" => self.bsw_divert_pct,
            "bsw_debounce_sec" => self.bsw_debounce_sec,
            "bsw_stabilize_sec" => self.bsw_stabilize_sec,
            "meter_k_factor" => self.meter_k_factor,
            "meter_factor" => self.meter_factor,
            "api_thermal_expansion_alpha" => self.api_thermal_expansion_alpha,
            "temp_base_deg_f" => self.temp_base_deg_f,
            "temp_lo_deg_f" => self.temp_lo_deg_f,
            "temp_hi_deg_f" => self.temp_hi_deg_f,
            "inlet_press_lo_psi" => self.inlet_press_lo_psi,
            "outlet_press_lo_psi" => self.outlet_press_lo_psi,
            "loop_press_hi_psi" => self.loop_press_hi_psi,
            "strainer_dp_hi_psi" => self.strainer_dp_hi_psi,
            "backpressure_sales_psi" => self.backpressure_sales_psi,
            "backpressure_divert_psi" => self.backpressure_divert_psi,
            "sample_rate_sec" => self.sample_rate_sec,
            "sample_barrels_per_grab" => self.sample_barrels_per_grab,
            "grab_duration_ms" => f64::from(self.grab_duration_ms),
            "grab_volume_ml" => self.grab_volume_ml,
            "pump_max_starts_per_hour" => f64::from(self.pump_max_starts_per_hour),
            "pump_lockout_sec" => self.pump_lockout_sec,
            "pump_start_timeout_sec" => self.pump_start_timeout_sec,
            "pump_stop_delay_sec" => self.pump_stop_delay_sec,
            "divert_travel_timeout_sec" => self.divert_travel_timeout_sec,
            "scan_period_ms" => self.scan_period_ms as f64,
            "prove_runs" => f64::from(self.prove_runs),
            "repeatability_tolerance" => self.repeatability_tolerance,
            "prove_certified_barrels" => self.prove_certified_barrels,
            "prove_valve_timeout_sec" => self.prove_valve_timeout_sec,
            _ => return None,
        })
    }

    fn set(&mut self, name: &str, value: f64) -> Result<(), CoreError> {
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
        match name {
            "bsw_divert_pct" => self.bsw_divert_pct = value,
            "bsw_debounce_sec" => self.bsw_debounce_sec = value,
            "bsw_stabilize_sec" => self.bsw_stabilize_sec = value,
            "meter_k_factor" => self.meter_k_factor = value,
            "meter_factor" => self.meter_factor = value,
            "api_thermal_expansion_alpha" => self.api_thermal_expansion_alpha = value,
            "temp_base_deg_f" => self.temp_base_deg_f = value,
            "temp_lo_deg_f" => self.temp_lo_deg_f = value,
            "temp_hi_deg_f" => self.temp_hi_deg_f = value,
            "inlet_press_lo_psi" => self.inlet_press_lo_psi = value,
            "outlet_press_lo_psi" => self.outlet_press_lo_psi = value,
            "loop_press_hi_psi" => self.loop_press_hi_psi = value,
            "strainer_dp_hi_psi" => self.strainer_dp_hi_psi = value,
            "backpressure_sales_psi" => self.backpressure_sales_psi = value,
            "backpressure_divert_psi" => self.backpressure_divert_psi = value,
            "sample_rate_sec" => self.sample_rate_sec = value,
            "sample_barrels_per_grab" => self.sample_barrels_per_grab = value,
            "grab_duration_ms" => self.grab_duration_ms = value.round() as u32,
            "grab_volume_ml" => self.grab_volume_ml = value,
            "pump_max_starts_per_hour" => self.pump_max_starts_per_hour = value.round() as u32,
            "pump_lockout_sec" => self.pump_lockout_sec = value,
            "pump_start_timeout_sec" => self.pump_start_timeout_sec = value,
            "pump_stop_delay_sec" => self.pump_stop_delay_sec = value,
            "divert_travel_timeout_sec" => self.divert_travel_timeout_sec = value,
            "scan_period_ms" => self.scan_period_ms = value.round() as u64,
            "prove_runs" => self.prove_runs = value.round() as u32,
            "repeatability_tolerance" => self.repeatability_tolerance = value,
            "prove_certified_barrels" => self.prove_certified_barrels = value,
            "prove_valve_timeout_sec" => self.prove_valve_timeout_sec = value,
            _ => unreachable!("domain table and field match diverged"),
        }
        Ok(())
    }

    /// Validate every field against its domain (file-loaded snapshots).
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, lo, hi) in DOMAINS {
            let value = self.get(name).expect("domain table names a field");
            if !value.is_finite() || value < *lo || value > *hi {
                return Err(CoreError::InvalidSetpoint {
                    name: (*name).to_string(),
                    value,
                    lo: *lo,
                    hi: *hi,
                });
            }
        }
        Ok(())
    }

    /// Scan count equivalent of a seconds figure, never less than one scan.
    pub fn secs_to_scans(&self, secs: f64) -> u32 {
        let scans = (secs * 1000.0 / self.scan_period_ms as f64).ceil();
        (scans as u32).max(1)
    }
}

/// Holder of the current snapshot. `current` hands out the `Arc`; `apply`
/// validates and installs a replacement atomically.
pub struct SetpointStore {
    current: Mutex<Arc<Setpoints>>,
}

impl SetpointStore {
    pub fn new(sp: Setpoints) -> Result<Self, CoreError> {
        sp.validate()?;
        Ok(Self {
            current: Mutex::new(Arc::new(sp)),
        })
    }

    pub fn current(&self) -> Arc<Setpoints> {
        Arc::clone(&self.current.lock().unwrap())
    }

    /// Patch one field. On any failure the installed snapshot is unchanged.
    pub fn apply(&self, name: &str, value: f64) -> Result<(), CoreError> {
        let mut guard = self.current.lock().unwrap();
        let mut next = (**guard).clone();
        next.set(name, value)?;
        *guard = Arc::new(next);
        Ok(())
    }
}

impl Default for SetpointStore {
    fn default() -> Self {
        Self {
            current: Mutex::new(Arc::new(Setpoints::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_domain() {
        Setpoints::default().validate().unwrap();
    }

    #[test]
    fn apply_replaces_snapshot_atomically() {
        let store = SetpointStore::default();
        let before = store.current();
        store.apply("bsw_divert_pct", 0.8).unwrap();
        let after = store.current();
        assert_eq!(before.bsw_divert_pct, 1.0);
        assert_eq!(after.bsw_divert_pct, 0.8);
    }

    #[test]
    fn out_of_domain_leaves_snapshot_unchanged() {
        let store = SetpointStore::default();
        let err = store.apply("bsw_divert_pct", 9.0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSetpoint { .. }));
        assert_eq!(store.current().bsw_divert_pct, 1.0);
    }

    #[test]
    fn unknown_setpoint_is_rejected() {
        let store = SetpointStore::default();
        let err = store.apply("warp_drive", 1.0).unwrap_err();
        assert_eq!(err, CoreError::UnknownSetpoint("warp_drive".into()));
    }

    #[test]
    fn integer_fields_round() {
        let store = SetpointStore::default();
        store.apply("prove_runs", 3.0).unwrap();
        assert_eq!(store.current().prove_runs, 3);
        store.apply("grab_duration_ms", 250.0).unwrap();
        assert_eq!(store.current().grab_duration_ms, 250);
    }

    #[test]
    fn secs_to_scans_rounds_up() {
        let sp = Setpoints::default(); // 100 ms scans
        assert_eq!(sp.secs_to_scans(0.0), 1);
        assert_eq!(sp.secs_to_scans(0.25), 3);
        assert_eq!(sp.secs_to_scans(5.0), 50);
    }

    #[test]
    fn domain_table_matches_fields() {
        let sp = Setpoints::default();
        for name in Setpoints::field_names() {
            assert!(sp.get(name).is_some(), "no accessor for {name}");
        }
    }
}
