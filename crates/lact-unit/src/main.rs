mod config;
mod logging;
mod modbus;
mod telemetry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use config::RuntimeConfig;
use lact_core::{
    AlarmId, BatchReport, Controller, IoPort, Journal, LactState, ProvingReport, SetpointStore,
    Setpoints, SharedSim, SkidSimulator, TimeBase,
};
use lact_io::metrics::SCAN_OVERRUNS_TOTAL;
use lact_io::{load_setpoints, AuditEventType, AuditLog, ReportDir};
use modbus::ModbusPort;

/// Fans core events out to the audit journal, the report directory and
/// the overrun counter.
struct UnitJournal {
    audit: Option<Arc<AuditLog>>,
    reports: Option<ReportDir>,
}

impl Journal for UnitJournal {
    fn state_changed(&self, from: LactState, to: LactState, ts_us: u64) {
        if let Some(audit) = &self.audit {
            audit.state_changed(from, to, ts_us);
        }
    }

    fn alarm_raised(&self, id: AlarmId, ts_us: u64) {
        if let Some(audit) = &self.audit {
            audit.alarm_raised(id, ts_us);
        }
    }

    fn alarm_cleared(&self, id: AlarmId, ts_us: u64) {
        if let Some(audit) = &self.audit {
            audit.alarm_cleared(id, ts_us);
        }
    }

    fn setpoint_changed(&self, name: &str, value: f64, ts_us: u64) {
        if let Some(audit) = &self.audit {
            audit.setpoint_changed(name, value, ts_us);
        }
    }

    fn batch_closed(&self, report: &BatchReport) {
        if let Some(audit) = &self.audit {
            audit.batch_closed(report);
        }
        if let Some(reports) = &self.reports {
            reports.batch_closed(report);
        }
    }

    fn proving_completed(&self, report: &ProvingReport) {
        if let Some(audit) = &self.audit {
            audit.proving_completed(report);
        }
        if let Some(reports) = &self.reports {
            reports.proving_completed(report);
        }
    }

    fn scan_overrun(&self, measured_ms: f64, ts_us: u64) {
        SCAN_OVERRUNS_TOTAL.inc();
        if let Some(audit) = &self.audit {
            audit.scan_overrun(measured_ms, ts_us);
        }
    }
}

fn main() {
    let cfg = RuntimeConfig::from_env();
    if cfg.show_help {
        RuntimeConfig::print_help();
        return;
    }

    logging::init_tracing(cfg.json_logs);

    // Configuration errors abort before the scan thread exists.
    let sp = match &cfg.setpoints_path {
        Some(path) => match load_setpoints(path) {
            Ok(sp) => {
                info!(path = %path.display(), "setpoints loaded");
                sp
            }
            Err(err) => {
                error!(%err, path = %path.display(), "setpoints file rejected");
                std::process::exit(1);
            }
        },
        None => Setpoints::default(),
    };
    let setpoints = match SetpointStore::new(sp) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(%err, "invalid setpoints");
            std::process::exit(1);
        }
    };

    let _metrics_server = telemetry::init(&cfg.metrics_addr);

    let audit = cfg.audit_path.as_ref().map(|path| match AuditLog::new(path) {
        Ok(log) => {
            info!(path = %path.display(), "audit journal enabled");
            Arc::new(log)
        }
        Err(err) => {
            error!(%err, path = %path.display(), "audit journal unavailable");
            std::process::exit(1);
        }
    });
    let reports = cfg.reports_dir.as_ref().map(|dir| match ReportDir::new(dir.clone()) {
        Ok(reports) => reports,
        Err(err) => {
            error!(%err, dir = %dir.display(), "report directory unavailable");
            std::process::exit(1);
        }
    });

    let timebase = TimeBase::new();
    if let Some(log) = &audit {
        log.log(
            timebase.now_us(),
            AuditEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "modbus": &cfg.modbus_addr,
                "seed": cfg.seed,
            }),
        );
    }

    let port: Box<dyn IoPort> = match &cfg.modbus_addr {
        Some(addr) => match ModbusPort::connect(addr) {
            Ok(port) => {
                info!(%addr, "using modbus i/o");
                Box::new(port)
            }
            Err(err) => {
                error!(%err, %addr, "modbus adapter failed to start");
                std::process::exit(1);
            }
        },
        None => {
            info!(seed = cfg.seed, noise = cfg.sim_noise, "using skid simulator");
            let mut sim = SkidSimulator::new(cfg.seed, setpoints.current().scan_period_ms);
            if cfg.sim_noise {
                sim = sim.with_noise();
            }
            Box::new(SharedSim::new(sim))
        }
    };

    let journal = UnitJournal {
        audit: audit.clone(),
        reports,
    };
    let mut controller = Controller::new(port, Arc::clone(&setpoints), timebase.clone(), Box::new(journal));
    let handle = controller.handle();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_scan = Arc::clone(&stop);
    let scan_thread = thread::Builder::new()
        .name("lact-scan".into())
        .spawn(move || controller.run(&stop_scan))
        .expect("failed to spawn scan thread");

    let observer = telemetry::spawn_observer(handle.shared_store(), Arc::clone(&stop));

    if cfg.auto_start {
        match handle.start() {
            Ok(()) => info!("start command issued"),
            Err(err) => error!(%err, "start command rejected"),
        }
    }

    match cfg.run_seconds {
        Some(secs) => {
            info!(secs, "running for fixed duration");
            thread::sleep(Duration::from_secs(secs));
            stop.store(true, Ordering::Relaxed);
            let _ = scan_thread.join();
            let _ = observer.join();
        }
        None => {
            // Headless service mode: run until the process is killed.
            let _ = scan_thread.join();
            stop.store(true, Ordering::Relaxed);
            let _ = observer.join();
        }
    }

    if let Some(log) = &audit {
        log.log(
            timebase.now_us(),
            AuditEventType::SystemShutdown,
            serde_json::json!({}),
        );
    }
    info!("lact-unit stopped");
}
