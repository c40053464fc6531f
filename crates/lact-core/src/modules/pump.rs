//! Transfer pump motor control and protection.
//!
//! The state machine only expresses a demand; this module arbitrates it
//! against motor protection: an overload trip forces the starter off and
//! opens a restart lockout, and start edges are rate-limited over a
//! sliding one-hour window.

use std::collections::VecDeque;

use tracing::{info, warn};

use crate::alarms::{AlarmId, Annunciator};
use crate::error::CoreError;
use crate::setpoints::Setpoints;
use crate::store::TagStore;
use crate::tags::TagId;

const WINDOW_US: u64 = 3_600_000_000;

pub struct PumpControl {
    start_stamps: VecDeque<u64>,
    lockout_until_us: Option<u64>,
    last_cmd: bool,
}

impl PumpControl {
    pub fn new() -> Self {
        Self {
            start_stamps: VecDeque::new(),
            lockout_until_us: None,
            last_cmd: false,
        }
    }

    pub fn starts_in_window(&self) -> usize {
        self.start_stamps.len()
    }

    pub fn execute(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        ann: &mut Annunciator,
        now_us: u64,
    ) -> Result<(), CoreError> {
        let demand = store.read_bool(TagId::PumpDemand)?;
        let overload = store.read_bool(TagId::DiPumpOverload)?;

        // Overload while commanded: force off and open the lockout.
        if overload && self.last_cmd {
            let lockout_us = (sp.pump_lockout_sec * 1e6) as u64;
            self.lockout_until_us = Some(now_us + lockout_us);
            warn!(lockout_sec = sp.pump_lockout_sec, "pump overload trip, restart lockout open");
        }

        let locked = match self.lockout_until_us {
            Some(until) if now_us < until => true,
            Some(_) => {
                self.lockout_until_us = None;
                info!("pump restart lockout expired");
                false
            }
            None => false,
        };
        store.write_bool(TagId::PumpLockout, locked)?;

        while let Some(front) = self.start_stamps.front() {
            if now_us.saturating_sub(*front) > WINDOW_US {
                self.start_stamps.pop_front();
            } else {
                break;
            }
        }

        let mut cmd = demand && !overload && !locked;

        if cmd && !self.last_cmd {
            if self.start_stamps.len() >= sp.pump_max_starts_per_hour as usize {
                warn!(
                    starts = self.start_stamps.len(),
                    limit = sp.pump_max_starts_per_hour,
                    "pump start denied: max starts per hour"
                );
                ann.raise(AlarmId::PumpMaxStarts, now_us);
                cmd = false;
            } else {
                self.start_stamps.push_back(now_us);
            }
        }

        if self.start_stamps.len() < sp.pump_max_starts_per_hour as usize {
            ann.clear(AlarmId::PumpMaxStarts, now_us);
        }

        store.write_bool(TagId::DoPumpStart, cmd)?;
        self.last_cmd = cmd;
        Ok(())
    }
}

impl Default for PumpControl {
    fn default() -> Self {
        Self::new()
    }
}
