//! Alarm table and annunciation.
//!
//! The annunciator is edge-triggered and idempotent on repeat raises.
//! Debounce belongs to the caller (each interlock states its own). All
//! mutation happens on the scan thread; the console sees a published
//! read-only view.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::store::TagStore;
use crate::tags::TagId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlarmAction {
    None,
    RequestDivert,
    RequestShutdown,
    RequestEStop,
}

/// Every alarm point in the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlarmId {
    Estop,
    PumpOverload,
    PumpFailStart,
    PumpMaxStarts,
    InletVlvNotOpen,
    OutletVlvNotOpen,
    InletPressLo,
    LoopPressHi,
    OutletPressLo,
    StrainerDpHi,
    BswProbeFail,
    BswHigh,
    DivertTravelFail,
    SamplePotFull,
    TempLo,
    TempHi,
    GasDetected,
    ScanOverrun,
    IllegalCommand,
    ProvingFailed,
}

const ALL_ALARMS: &[AlarmId] = &[
    AlarmId::Estop,
    AlarmId::PumpOverload,
    AlarmId::PumpFailStart,
    AlarmId::PumpMaxStarts,
    AlarmId::InletVlvNotOpen,
    AlarmId::OutletVlvNotOpen,
    AlarmId::InletPressLo,
    AlarmId::LoopPressHi,
    AlarmId::OutletPressLo,
    AlarmId::StrainerDpHi,
    AlarmId::BswProbeFail,
    AlarmId::BswHigh,
    AlarmId::DivertTravelFail,
    AlarmId::SamplePotFull,
    AlarmId::TempLo,
    AlarmId::TempHi,
    AlarmId::GasDetected,
    AlarmId::ScanOverrun,
    AlarmId::IllegalCommand,
    AlarmId::ProvingFailed,
];

impl AlarmId {
    pub fn all() -> impl Iterator<Item = AlarmId> {
        ALL_ALARMS.iter().copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            AlarmId::Estop => "ALM_ESTOP",
            AlarmId::PumpOverload => "ALM_PUMP_OVERLOAD",
            AlarmId::PumpFailStart => "ALM_PUMP_FAIL_START",
            AlarmId::PumpMaxStarts => "ALM_PUMP_MAX_STARTS",
            AlarmId::InletVlvNotOpen => "ALM_INLET_VLV_NOT_OPEN",
            AlarmId::OutletVlvNotOpen => "ALM_OUTLET_VLV_NOT_OPEN",
            AlarmId::InletPressLo => "ALM_INLET_PRESS_LO",
            AlarmId::LoopPressHi => "ALM_LOOP_PRESS_HI",
            AlarmId::OutletPressLo => "ALM_OUTLET_PRESS_LO",
            AlarmId::StrainerDpHi => "ALM_STRAINER_DP_HI",
            AlarmId::BswProbeFail => "ALM_BSW_PROBE_FAIL",
            AlarmId::BswHigh => "ALM_BSW_DIVERT",
            AlarmId::DivertTravelFail => "ALM_DIVERT_FAIL",
            AlarmId::SamplePotFull => "ALM_SAMPLE_POT_FULL",
            AlarmId::TempLo => "ALM_TEMP_LO",
            AlarmId::TempHi => "ALM_TEMP_HI",
            AlarmId::GasDetected => "ALM_GAS_DETECTED",
            AlarmId::ScanOverrun => "ALM_SCAN_OVERRUN",
            AlarmId::IllegalCommand => "ALM_ILLEGAL_COMMAND",
            AlarmId::ProvingFailed => "ALM_PROVE_FAIL",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            AlarmId::Estop
            | AlarmId::PumpOverload
            | AlarmId::PumpFailStart
            | AlarmId::InletVlvNotOpen
            | AlarmId::OutletVlvNotOpen
            | AlarmId::InletPressLo
            | AlarmId::LoopPressHi
            | AlarmId::DivertTravelFail => Severity::Critical,
            AlarmId::PumpMaxStarts
            | AlarmId::OutletPressLo
            | AlarmId::StrainerDpHi
            | AlarmId::BswProbeFail
            | AlarmId::BswHigh
            | AlarmId::SamplePotFull
            | AlarmId::TempLo
            | AlarmId::TempHi
            | AlarmId::GasDetected
            | AlarmId::ProvingFailed => Severity::Warn,
            AlarmId::ScanOverrun | AlarmId::IllegalCommand => Severity::Info,
        }
    }

    pub fn action(self) -> AlarmAction {
        match self {
            AlarmId::Estop => AlarmAction::RequestEStop,
            AlarmId::PumpOverload
            | AlarmId::PumpFailStart
            | AlarmId::InletVlvNotOpen
            | AlarmId::OutletVlvNotOpen
            | AlarmId::InletPressLo
            | AlarmId::LoopPressHi
            | AlarmId::DivertTravelFail => AlarmAction::RequestShutdown,
            AlarmId::BswProbeFail | AlarmId::BswHigh => AlarmAction::RequestDivert,
            _ => AlarmAction::None,
        }
    }

    /// Critical trips that demand a stop stay latched until a reset.
    fn latching(self) -> bool {
        self.severity() == Severity::Critical
            && matches!(
                self.action(),
                AlarmAction::RequestShutdown | AlarmAction::RequestEStop
            )
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Record {
    active: bool,
    acked: bool,
    /// Condition cleared while latched; released by `reset`.
    clear_pending: bool,
    first_us: u64,
    last_us: u64,
}

/// Console-facing view of one active alarm.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActiveAlarm {
    pub id: AlarmId,
    pub severity: Severity,
    pub action: AlarmAction,
    pub acked: bool,
    pub first_us: u64,
    pub last_us: u64,
}

/// Safety-to-state-machine request flags for the current scan. At most one
/// is set when taken: E-Stop dominates Shutdown dominates Divert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requests {
    pub estop: bool,
    pub shutdown: bool,
    pub divert: bool,
}

pub struct Annunciator {
    records: [Record; ALL_ALARMS.len()],
    horn_silenced_at: Option<u64>,
}

impl Annunciator {
    pub fn new() -> Self {
        Self {
            records: [Record::default(); ALL_ALARMS.len()],
            horn_silenced_at: None,
        }
    }

    fn idx(id: AlarmId) -> usize {
        // ALL_ALARMS mirrors the enum declaration order (asserted in tests).
        id as usize
    }

    /// Raise an alarm. Idempotent while already active.
    pub fn raise(&mut self, id: AlarmId, now_us: u64) {
        let rec = &mut self.records[Self::idx(id)];
        rec.last_us = now_us;
        rec.clear_pending = false;
        if !rec.active {
            rec.active = true;
            rec.acked = false;
            rec.first_us = now_us;
            warn!(alarm = id.name(), severity = ?id.severity(), "alarm raised");
        }
    }

    /// Condition gone. Latching alarms stay active until `reset`.
    pub fn clear(&mut self, id: AlarmId, now_us: u64) {
        let rec = &mut self.records[Self::idx(id)];
        if !rec.active {
            return;
        }
        if id.latching() {
            rec.clear_pending = true;
            return;
        }
        rec.active = false;
        rec.last_us = now_us;
        info!(alarm = id.name(), "alarm cleared");
    }

    /// Acknowledge one alarm. Returns whether it was active.
    pub fn ack(&mut self, id: AlarmId) -> bool {
        let rec = &mut self.records[Self::idx(id)];
        if !rec.active {
            return false;
        }
        rec.acked = true;
        // Momentary Info alarms carry no condition; ack retires them.
        if id.severity() == Severity::Info {
            rec.active = false;
        }
        true
    }

    pub fn ack_all(&mut self) {
        for id in AlarmId::all() {
            let rec = &mut self.records[Self::idx(id)];
            if rec.active {
                rec.acked = true;
                if id.severity() == Severity::Info {
                    rec.active = false;
                }
            }
        }
    }

    /// Release latched trips whose condition has cleared.
    pub fn reset(&mut self, now_us: u64) {
        for id in AlarmId::all() {
            let rec = &mut self.records[Self::idx(id)];
            if rec.active && id.latching() && rec.clear_pending {
                rec.active = false;
                rec.clear_pending = false;
                rec.last_us = now_us;
                info!(alarm = id.name(), "latched alarm reset");
            }
        }
    }

    pub fn is_active(&self, id: AlarmId) -> bool {
        self.records[Self::idx(id)].active
    }

    pub fn list_active(&self) -> Vec<ActiveAlarm> {
        AlarmId::all()
            .filter_map(|id| {
                let rec = self.records[Self::idx(id)];
                rec.active.then_some(ActiveAlarm {
                    id,
                    severity: id.severity(),
                    action: id.action(),
                    acked: rec.acked,
                    first_us: rec.first_us,
                    last_us: rec.last_us,
                })
            })
            .collect()
    }

    /// Aggregate the active table into this scan's request flags, reduced
    /// to the single highest severity demanded.
    pub fn requests(&self) -> Requests {
        let mut req = Requests::default();
        for id in AlarmId::all() {
            if !self.records[Self::idx(id)].active {
                continue;
            }
            match id.action() {
                AlarmAction::RequestEStop => req.estop = true,
                AlarmAction::RequestShutdown => req.shutdown = true,
                AlarmAction::RequestDivert => req.divert = true,
                AlarmAction::None => {}
            }
        }
        if req.estop {
            req.shutdown = false;
            req.divert = false;
        } else if req.shutdown {
            req.divert = false;
        }
        req
    }

    pub fn silence_horn(&mut self, now_us: u64) {
        self.horn_silenced_at = Some(now_us);
    }

    /// Drive beacon, horn and summary tags from the aggregate predicates.
    pub fn update_outputs(&mut self, store: &TagStore) -> Result<(), CoreError> {
        let active = self.list_active();
        let unacked = active.iter().filter(|a| !a.acked).count();
        let beacon = unacked > 0;
        let mut horn = active
            .iter()
            .any(|a| !a.acked && a.severity == Severity::Critical);

        if let Some(silenced_at) = self.horn_silenced_at {
            let fresh_critical = active.iter().any(|a| {
                !a.acked && a.severity == Severity::Critical && a.first_us > silenced_at
            });
            if fresh_critical {
                self.horn_silenced_at = None;
            } else {
                horn = false;
            }
        }

        store.write_bool(TagId::DoAlarmBeacon, beacon)?;
        store.write_bool(TagId::DoAlarmHorn, horn)?;
        store.write_count(TagId::AlarmActiveCount, active.len() as u64)?;
        store.write_count(TagId::AlarmUnackCount, unacked as u64)?;
        Ok(())
    }
}

impl Default for Annunciator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::TimeBase;

    #[test]
    fn table_matches_enum_order() {
        for (i, id) in AlarmId::all().enumerate() {
            assert_eq!(id as usize, i, "table out of order at {}", id.name());
        }
    }

    #[test]
    fn raise_is_idempotent() {
        let mut ann = Annunciator::new();
        ann.raise(AlarmId::StrainerDpHi, 10);
        ann.raise(AlarmId::StrainerDpHi, 20);
        let active = ann.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].first_us, 10);
        assert_eq!(active[0].last_us, 20);
    }

    #[test]
    fn non_latching_clears_on_condition_gone() {
        let mut ann = Annunciator::new();
        ann.raise(AlarmId::BswHigh, 0);
        assert!(ann.is_active(AlarmId::BswHigh));
        ann.clear(AlarmId::BswHigh, 1);
        assert!(!ann.is_active(AlarmId::BswHigh));
    }

    #[test]
    fn critical_trip_latches_until_reset() {
        let mut ann = Annunciator::new();
        ann.raise(AlarmId::PumpOverload, 0);
        ann.clear(AlarmId::PumpOverload, 1);
        assert!(ann.is_active(AlarmId::PumpOverload), "must stay latched");
        ann.reset(2);
        assert!(!ann.is_active(AlarmId::PumpOverload));
    }

    #[test]
    fn reset_keeps_latched_alarm_with_live_condition() {
        let mut ann = Annunciator::new();
        ann.raise(AlarmId::Estop, 0);
        ann.reset(1);
        assert!(ann.is_active(AlarmId::Estop), "condition still present");
    }

    #[test]
    fn requests_reduce_to_highest_severity() {
        let mut ann = Annunciator::new();
        ann.raise(AlarmId::BswHigh, 0);
        assert_eq!(
            ann.requests(),
            Requests { estop: false, shutdown: false, divert: true }
        );
        ann.raise(AlarmId::PumpOverload, 0);
        assert_eq!(
            ann.requests(),
            Requests { estop: false, shutdown: true, divert: false }
        );
        ann.raise(AlarmId::Estop, 0);
        assert_eq!(
            ann.requests(),
            Requests { estop: true, shutdown: false, divert: false }
        );
    }

    #[test]
    fn beacon_follows_unacked_horn_follows_critical() {
        let mut ann = Annunciator::new();
        let store = TagStore::new(TimeBase::fixed());
        ann.raise(AlarmId::SamplePotFull, 0);
        ann.update_outputs(&store).unwrap();
        assert!(store.read_bool(TagId::DoAlarmBeacon).unwrap());
        assert!(!store.read_bool(TagId::DoAlarmHorn).unwrap());

        ann.raise(AlarmId::PumpOverload, 1);
        ann.update_outputs(&store).unwrap();
        assert!(store.read_bool(TagId::DoAlarmHorn).unwrap());

        ann.ack_all();
        ann.update_outputs(&store).unwrap();
        assert!(!store.read_bool(TagId::DoAlarmBeacon).unwrap());
        assert!(!store.read_bool(TagId::DoAlarmHorn).unwrap());
    }

    #[test]
    fn horn_silence_holds_until_fresh_critical() {
        let mut ann = Annunciator::new();
        let store = TagStore::new(TimeBase::fixed());
        ann.raise(AlarmId::PumpOverload, 10);
        ann.silence_horn(20);
        ann.update_outputs(&store).unwrap();
        assert!(!store.read_bool(TagId::DoAlarmHorn).unwrap());
        // A new critical re-arms the horn.
        ann.raise(AlarmId::DivertTravelFail, 30);
        ann.update_outputs(&store).unwrap();
        assert!(store.read_bool(TagId::DoAlarmHorn).unwrap());
    }

    #[test]
    fn info_alarm_retires_on_ack() {
        let mut ann = Annunciator::new();
        ann.raise(AlarmId::IllegalCommand, 0);
        assert!(ann.ack(AlarmId::IllegalCommand));
        assert!(!ann.is_active(AlarmId::IllegalCommand));
        assert!(!ann.ack(AlarmId::IllegalCommand));
    }
}
