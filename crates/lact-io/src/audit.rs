//! Audit journal for safety-relevant events.
//!
//! Append-only JSONL, one event per line, stamped with both the engine's
//! monotonic clock and wall time. Implements the core's `Journal` trait so
//! the scan thread hands events over without knowing about files.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use lact_core::{AlarmId, BatchReport, Journal, LactState, ProvingReport};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SystemStart,
    SystemShutdown,
    StateChange,
    AlarmRaised,
    AlarmCleared,
    SetpointChange,
    BatchClosed,
    ProvingCompleted,
    ScanOverrun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts_us: u64,
    pub unix_us: u64,
    pub event: AuditEventType,
    pub details: serde_json::Value,
}

pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLog {
    /// Open in append mode, creating parent directories as needed.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    pub fn log(&self, ts_us: u64, event: AuditEventType, details: serde_json::Value) {
        let entry = AuditEntry {
            ts_us,
            unix_us: unix_us(),
            event,
            details,
        };
        let mut writer = self.writer.lock().unwrap();
        if serde_json::to_writer(&mut *writer, &entry).is_err() {
            warn!("audit entry serialization failed");
            return;
        }
        let _ = writer.write_all(b"\n");
        let _ = writer.flush();
    }
}

fn unix_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

impl Journal for AuditLog {
    fn state_changed(&self, from: LactState, to: LactState, ts_us: u64) {
        self.log(
            ts_us,
            AuditEventType::StateChange,
            serde_json::json!({ "from": from, "to": to }),
        );
    }

    fn alarm_raised(&self, id: AlarmId, ts_us: u64) {
        self.log(
            ts_us,
            AuditEventType::AlarmRaised,
            serde_json::json!({ "alarm": id.name() }),
        );
    }

    fn alarm_cleared(&self, id: AlarmId, ts_us: u64) {
        self.log(
            ts_us,
            AuditEventType::AlarmCleared,
            serde_json::json!({ "alarm": id.name() }),
        );
    }

    fn setpoint_changed(&self, name: &str, value: f64, ts_us: u64) {
        self.log(
            ts_us,
            AuditEventType::SetpointChange,
            serde_json::json!({ "name": name, "value": value }),
        );
    }

    fn batch_closed(&self, report: &BatchReport) {
        self.log(
            report.closed_us,
            AuditEventType::BatchClosed,
            serde_json::json!(report),
        );
    }

    fn proving_completed(&self, report: &ProvingReport) {
        self.log(
            0,
            AuditEventType::ProvingCompleted,
            serde_json::json!(report),
        );
    }

    fn scan_overrun(&self, measured_ms: f64, ts_us: u64) {
        self.log(
            ts_us,
            AuditEventType::ScanOverrun,
            serde_json::json!({ "measured_ms": measured_ms }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path).unwrap();

        log.log(
            1000,
            AuditEventType::SystemStart,
            serde_json::json!({ "version": "test" }),
        );
        log.state_changed(LactState::Idle, LactState::Startup, 2000);

        let mut content = String::new();
        File::open(&path).unwrap().read_to_string(&mut content).unwrap();
        let lines: Vec<&str> = content.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.ts_us, 1000);
        assert_eq!(first.event, AuditEventType::SystemStart);

        let second: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.event, AuditEventType::StateChange);
        assert_eq!(second.details["to"], "Startup");
    }

    #[test]
    fn append_preserves_existing_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::new(&path).unwrap();
            log.log(1, AuditEventType::SystemStart, serde_json::json!({}));
        }
        {
            let log = AuditLog::new(&path).unwrap();
            log.log(2, AuditEventType::SystemShutdown, serde_json::json!({}));
        }
        let mut content = String::new();
        File::open(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content.trim().split('\n').count(), 2);
    }
}
