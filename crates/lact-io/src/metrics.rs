//! Prometheus metrics for the LACT unit.
//!
//! Gauges are fed by the runtime's telemetry thread from tag-store
//! snapshots; the scan thread never touches the registry.

use std::sync::LazyLock;
use std::thread;

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use tiny_http::{Response, Server};
use tracing::{error, info};

use lact_core::{TagId, TagStore, Value};

/// Global metrics registry.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

macro_rules! register {
    ($ctor:ident, $name:literal, $help:literal) => {{
        let metric = $ctor::new($name, $help).unwrap();
        REGISTRY.register(Box::new(metric.clone())).unwrap();
        metric
    }};
}

pub static SCANS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register!(IntCounter, "lact_scans_total", "Scan cycles executed")
});

pub static SCAN_OVERRUNS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register!(IntCounter, "lact_scan_overruns_total", "Scan cycles that exceeded the period")
});

pub static SCAN_TIME_MS: LazyLock<Gauge> = LazyLock::new(|| {
    register!(Gauge, "lact_scan_time_ms", "Last scan execution time in milliseconds")
});

pub static STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    register!(
        IntGauge,
        "lact_state",
        "Operating state (0 idle, 1 startup, 2 running, 3 divert, 4 proving, 5 shutdown, 6 estop)"
    )
});

pub static FLOW_BPH: LazyLock<Gauge> = LazyLock::new(|| {
    register!(Gauge, "lact_flow_rate_bph", "Indicated flow rate in barrels per hour")
});

pub static BATCH_GROSS_BBL: LazyLock<Gauge> = LazyLock::new(|| {
    register!(Gauge, "lact_batch_gross_bbl", "Open batch gross barrels")
});

pub static BATCH_NET_BBL: LazyLock<Gauge> = LazyLock::new(|| {
    register!(Gauge, "lact_batch_net_bbl", "Open batch net barrels")
});

pub static BSW_PCT: LazyLock<Gauge> = LazyLock::new(|| {
    register!(Gauge, "lact_bsw_pct", "Rolling-mean BS&W percent")
});

pub static METER_FACTOR: LazyLock<Gauge> = LazyLock::new(|| {
    register!(Gauge, "lact_meter_factor", "Meter factor in effect")
});

pub static ALARMS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    register!(IntGauge, "lact_alarms_active", "Active alarm count")
});

pub static ALARMS_UNACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    register!(IntGauge, "lact_alarms_unacked", "Unacknowledged alarm count")
});

pub static PUMP_RUNNING: LazyLock<IntGauge> = LazyLock::new(|| {
    register!(IntGauge, "lact_pump_running", "Transfer pump run feedback")
});

/// Force registration of every metric up front.
pub fn init_metrics() {
    LazyLock::force(&SCANS_TOTAL);
    LazyLock::force(&SCAN_OVERRUNS_TOTAL);
    LazyLock::force(&SCAN_TIME_MS);
    LazyLock::force(&STATE);
    LazyLock::force(&FLOW_BPH);
    LazyLock::force(&BATCH_GROSS_BBL);
    LazyLock::force(&BATCH_NET_BBL);
    LazyLock::force(&BSW_PCT);
    LazyLock::force(&METER_FACTOR);
    LazyLock::force(&ALARMS_ACTIVE);
    LazyLock::force(&ALARMS_UNACKED);
    LazyLock::force(&PUMP_RUNNING);
}

fn state_index(name: &str) -> i64 {
    match name {
        "IDLE" => 0,
        "STARTUP" => 1,
        "RUNNING" => 2,
        "DIVERT" => 3,
        "PROVING" => 4,
        "SHUTDOWN" => 5,
        "ESTOP" => 6,
        _ => -1,
    }
}

/// Refresh the gauges from a tag-store view. Counters are owned by the
/// caller (the telemetry thread tracks scan deltas itself).
pub fn observe_store(store: &TagStore) {
    if let Ok(v) = store.read_f32(TagId::ScanTimeMs) {
        SCAN_TIME_MS.set(f64::from(v));
    }
    if let Ok(v) = store.read_f32(TagId::FlowRateBph) {
        FLOW_BPH.set(f64::from(v));
    }
    if let Ok(v) = store.read_f32(TagId::BatchGrossBbl) {
        BATCH_GROSS_BBL.set(f64::from(v));
    }
    if let Ok(v) = store.read_f32(TagId::BatchNetBbl) {
        BATCH_NET_BBL.set(f64::from(v));
    }
    if let Ok(v) = store.read_f32(TagId::BswPct) {
        BSW_PCT.set(f64::from(v));
    }
    if let Ok(v) = store.read_f32(TagId::MeterFactor) {
        METER_FACTOR.set(f64::from(v));
    }
    if let Ok(v) = store.read_count(TagId::AlarmActiveCount) {
        ALARMS_ACTIVE.set(v as i64);
    }
    if let Ok(v) = store.read_count(TagId::AlarmUnackCount) {
        ALARMS_UNACKED.set(v as i64);
    }
    if let Ok(v) = store.read_bool(TagId::DiPumpRunning) {
        PUMP_RUNNING.set(i64::from(v));
    }
    if let (Value::Text(name), _, _) = store.read(TagId::LactStateTag) {
        STATE.set(state_index(name));
    }
}

/// Serve `/metrics` on a helper thread.
pub fn serve_metrics(addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&addr) {
            Ok(server) => server,
            Err(err) => {
                error!(%addr, %err, "failed to bind metrics server");
                return;
            }
        };
        info!(%addr, "metrics server listening");
        for request in server.incoming_requests() {
            let metric_families = REGISTRY.gather();
            let mut buffer = Vec::new();
            let encoder = TextEncoder::new();
            if encoder.encode(&metric_families, &mut buffer).is_ok() {
                let _ = request.respond(Response::from_data(buffer));
            } else {
                let _ = request.respond(Response::empty(500));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lact_core::TimeBase;

    #[test]
    fn observe_store_reads_defaults() {
        init_metrics();
        let store = TagStore::new(TimeBase::fixed());
        observe_store(&store);
        assert_eq!(STATE.get(), 0);
        assert_eq!(METER_FACTOR.get(), 1.0);
        assert_eq!(PUMP_RUNNING.get(), 0);
    }
}
