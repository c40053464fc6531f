//! Boundary to physical I/O.
//!
//! The engine only ever sees this trait; the fieldbus client and the skid
//! simulator both live behind it. I/O is confined to the read/write steps
//! of the scan; a failed call degrades tag quality and the scan continues.

use crate::error::CoreError;
use crate::store::TagStore;

pub trait IoPort: Send {
    /// Populate all DI, AI and PI tags with current field values and quality.
    fn read_inputs(&mut self, store: &TagStore) -> Result<(), CoreError>;

    /// Push all DO and AO tags to the field.
    fn write_outputs(&mut self, store: &TagStore) -> Result<(), CoreError>;
}

/// Linear scaling of a raw 0–4095 count to an engineering range.
pub fn scale_analog(raw: u16, lo: f32, hi: f32) -> f32 {
    let ratio = f32::from(raw.min(4095)) / 4095.0;
    lo + ratio * (hi - lo)
}

/// Engineering value back to a raw 0–4095 count, saturating at the ends.
pub fn unscale_analog(eng: f32, lo: f32, hi: f32) -> u16 {
    if hi <= lo {
        return 0;
    }
    let ratio = ((eng - lo) / (hi - lo)).clamp(0.0, 1.0);
    (ratio * 4095.0).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_endpoints() {
        assert_eq!(scale_analog(0, 0.0, 300.0), 0.0);
        assert_eq!(scale_analog(4095, 0.0, 300.0), 300.0);
        assert_eq!(scale_analog(0, -20.0, 200.0), -20.0);
    }

    #[test]
    fn scaling_midpoint() {
        let mid = scale_analog(2048, 0.0, 300.0);
        assert!((mid - 150.0).abs() < 0.1);
    }

    #[test]
    fn unscale_saturates() {
        assert_eq!(unscale_analog(-5.0, 0.0, 300.0), 0);
        assert_eq!(unscale_analog(400.0, 0.0, 300.0), 4095);
        assert_eq!(unscale_analog(300.0, 0.0, 300.0), 4095);
    }

    #[test]
    fn round_trip_is_close() {
        for eng in [0.0f32, 12.5, 150.0, 299.9] {
            let raw = unscale_analog(eng, 0.0, 300.0);
            let back = scale_analog(raw, 0.0, 300.0);
            assert!((back - eng).abs() < 0.05, "{eng} -> {raw} -> {back}");
        }
    }
}
