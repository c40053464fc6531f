//! Setpoint file and custody report persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};

use lact_core::{BatchReport, CoreError, Journal, ProvingReport, Setpoints};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed setpoints file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] CoreError),
}

/// Load a setpoints file. Every field is validated against its domain;
/// a bad value aborts startup rather than running with it.
pub fn load_setpoints(path: &Path) -> Result<Setpoints, PersistError> {
    let text = fs::read_to_string(path)?;
    let sp: Setpoints = serde_json::from_str(&text)?;
    sp.validate()?;
    Ok(sp)
}

pub fn save_setpoints(path: &Path, sp: &Setpoints) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(sp)?)?;
    Ok(())
}

/// Writes batch and proving reports as timestamped JSON documents.
pub struct ReportDir {
    dir: PathBuf,
}

impl ReportDir {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn write(&self, stem: &str, body: &impl serde::Serialize) -> std::io::Result<PathBuf> {
        let unix_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        let path = self.dir.join(format!("{stem}-{unix_us}.json"));
        fs::write(&path, serde_json::to_string_pretty(body)?)?;
        Ok(path)
    }

    pub fn write_batch_report(&self, report: &BatchReport) -> std::io::Result<PathBuf> {
        self.write("batch", report)
    }

    pub fn write_proving_report(&self, report: &ProvingReport) -> std::io::Result<PathBuf> {
        self.write("proving", report)
    }
}

impl Journal for ReportDir {
    fn batch_closed(&self, report: &BatchReport) {
        match self.write_batch_report(report) {
            Ok(path) => info!(path = %path.display(), "batch report written"),
            Err(err) => warn!(%err, "batch report write failed"),
        }
    }

    fn proving_completed(&self, report: &ProvingReport) {
        match self.write_proving_report(report) {
            Ok(path) => info!(path = %path.display(), "proving report written"),
            Err(err) => warn!(%err, "proving report write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn setpoints_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setpoints.json");
        let mut sp = Setpoints::default();
        sp.bsw_divert_pct = 0.8;
        sp.meter_k_factor = 250.0;
        save_setpoints(&path, &sp).unwrap();

        let loaded = load_setpoints(&path).unwrap();
        assert_eq!(loaded.bsw_divert_pct, 0.8);
        assert_eq!(loaded.meter_k_factor, 250.0);
        assert_eq!(loaded.scan_period_ms, 100);
    }

    #[test]
    fn out_of_domain_file_value_aborts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setpoints.json");
        fs::write(&path, r#"{ "bsw_divert_pct": 42.0 }"#).unwrap();
        let err = load_setpoints(&path).unwrap_err();
        assert!(matches!(err, PersistError::Config(_)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setpoints.json");
        fs::write(&path, r#"{ "not_a_setpoint": 1.0 }"#).unwrap();
        assert!(matches!(
            load_setpoints(&path).unwrap_err(),
            PersistError::Parse(_)
        ));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setpoints.json");
        fs::write(&path, r#"{ "meter_factor": 1.0050 }"#).unwrap();
        let sp = load_setpoints(&path).unwrap();
        assert_eq!(sp.meter_factor, 1.0050);
        assert_eq!(sp.bsw_divert_pct, 1.0);
    }

    #[test]
    fn batch_report_lands_in_directory() {
        let dir = tempdir().unwrap();
        let reports = ReportDir::new(dir.path().join("reports")).unwrap();
        let report = BatchReport {
            opened_us: 1,
            closed_us: 2,
            gross_bbl: 100.0,
            net_bbl: 99.5,
            diverted_gross_bbl: 0.0,
            diverted_net_bbl: 0.0,
            avg_temp_f: 72.0,
            meter_factor: 1.0011,
            sample_grabs: 12,
            sample_volume_ml: 18.0,
        };
        let path = reports.write_batch_report(&report).unwrap();
        let text = fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["gross_bbl"], 100.0);
        assert_eq!(parsed["sample_grabs"], 12);
    }
}
