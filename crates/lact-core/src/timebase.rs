use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic time source for tag stamps and deadlines.
///
/// The default source is the OS monotonic clock. The `fixed` variant is an
/// advance-by-hand counter so a scan sequence replays bit-identically;
/// `Controller::run` advances it by one scan period per cycle, tests advance
/// it themselves.
#[derive(Debug, Clone)]
pub struct TimeBase {
    start: Instant,
    fixed_us: Option<Arc<AtomicU64>>,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            fixed_us: None,
        }
    }

    /// A frozen clock starting at zero. Only `advance` moves it.
    pub fn fixed() -> Self {
        Self {
            start: Instant::now(),
            fixed_us: Some(Arc::new(AtomicU64::new(0))),
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_us.is_some()
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        match &self.fixed_us {
            Some(counter) => counter.load(Ordering::Acquire),
            None => self.start.elapsed().as_micros() as u64,
        }
    }

    /// Advance a fixed clock. No effect on the monotonic source.
    pub fn advance(&self, by: Duration) {
        if let Some(counter) = &self.fixed_us {
            counter.fetch_add(by.as_micros() as u64, Ordering::AcqRel);
        }
    }

    /// Wall-clock microseconds since Unix epoch (for cross-process logs only).
    pub fn unix_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_only_moves_on_advance() {
        let tb = TimeBase::fixed();
        assert_eq!(tb.now_us(), 0);
        tb.advance(Duration::from_millis(100));
        assert_eq!(tb.now_us(), 100_000);
        let clone = tb.clone();
        clone.advance(Duration::from_millis(50));
        assert_eq!(tb.now_us(), 150_000);
    }

    #[test]
    fn monotonic_clock_moves_forward() {
        let tb = TimeBase::new();
        let a = tb.now_us();
        let b = tb.now_us();
        assert!(b >= a);
    }
}
