use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lact_io::metrics::{self, SCANS_TOTAL};
use tracing::info;

use lact_core::{TagId, TagStore};

pub fn init(metrics_addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    metrics::init_metrics();
    metrics_addr.as_ref().map(|addr| {
        info!(addr = %addr, "starting metrics server");
        metrics::serve_metrics(addr.clone())
    })
}

/// Periodically mirror the tag store into the Prometheus gauges. Reads
/// only; the scan thread stays untouched.
pub fn spawn_observer(store: Arc<TagStore>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last_scans = 0u64;
        while !stop.load(Ordering::Relaxed) {
            metrics::observe_store(&store);
            if let Ok(scans) = store.read_count(TagId::ScanCount) {
                SCANS_TOTAL.inc_by(scans.saturating_sub(last_scans));
                last_scans = scans;
            }
            thread::sleep(Duration::from_secs(1));
        }
    })
}
