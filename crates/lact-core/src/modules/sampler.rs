//! Flow-proportional grab sampling.
//!
//! The grab pacing integrates delivered net barrels; when the
//! configuration leaves `sample_barrels_per_grab` at zero, pacing falls
//! back to a fixed interval. Grabs only fire in Running with room in the
//! pot. The accumulator keeps integrating through Proving so sampling
//! resumes on pace afterwards.

use tracing::debug;

use crate::error::CoreError;
use crate::setpoints::Setpoints;
use crate::state::LactState;
use crate::store::TagStore;
use crate::tags::TagId;

pub struct Sampler {
    accum_bbl: f64,
    scans_since_grab: u32,
    sol_scans_left: u32,
    grabs: u64,
    total_ml: f64,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            accum_bbl: 0.0,
            scans_since_grab: 0,
            sol_scans_left: 0,
            grabs: 0,
            total_ml: 0.0,
        }
    }

    pub fn grabs(&self) -> u64 {
        self.grabs
    }

    pub fn total_ml(&self) -> f64 {
        self.total_ml
    }

    pub fn execute(
        &mut self,
        store: &TagStore,
        sp: &Setpoints,
        state: LactState,
        delivered_bbl: f64,
    ) -> Result<(), CoreError> {
        let running = state == LactState::Running;

        // Mix pump keeps the pot homogeneous the whole time we transfer.
        store.write_bool(TagId::DoSampleMixPump, running)?;

        self.accum_bbl += delivered_bbl;
        self.scans_since_grab = self.scans_since_grab.saturating_add(1);

        // Solenoid pulse countdown from a previous grab.
        if self.sol_scans_left > 0 {
            self.sol_scans_left -= 1;
            if self.sol_scans_left == 0 {
                store.write_bool(TagId::DoSampleSol, false)?;
            }
        }

        let pot_full = store.read_bool(TagId::DiSamplePotHi)?;
        if !running || pot_full {
            self.sol_scans_left = 0;
            store.write_bool(TagId::DoSampleSol, false)?;
            return Ok(());
        }

        let due = if sp.sample_barrels_per_grab > 0.0 {
            self.accum_bbl >= sp.sample_barrels_per_grab
        } else {
            self.scans_since_grab >= sp.secs_to_scans(sp.sample_rate_sec)
        };

        if due && self.sol_scans_left == 0 {
            let pulse_scans =
                (u64::from(sp.grab_duration_ms) / sp.scan_period_ms.max(1)).max(1) as u32;
            store.write_bool(TagId::DoSampleSol, true)?;
            self.sol_scans_left = pulse_scans;
            self.grabs += 1;
            self.total_ml += sp.grab_volume_ml;
            self.accum_bbl = 0.0;
            self.scans_since_grab = 0;
            debug!(grabs = self.grabs, "sample grab fired");
            store.write_count(TagId::SampleGrabs, self.grabs)?;
            store.write_f32(TagId::SampleTotalMl, self.total_ml as f32)?;
        }
        Ok(())
    }

    /// New batch: zero the collected-sample ledger.
    pub fn reset(&mut self, store: &TagStore) -> Result<(), CoreError> {
        self.grabs = 0;
        self.total_ml = 0.0;
        self.accum_bbl = 0.0;
        self.scans_since_grab = 0;
        store.write_count(TagId::SampleGrabs, 0)?;
        store.write_f32(TagId::SampleTotalMl, 0.0)?;
        Ok(())
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::TimeBase;

    fn rig() -> (Sampler, TagStore, Setpoints) {
        (
            Sampler::new(),
            TagStore::new(TimeBase::fixed()),
            Setpoints::default(),
        )
    }

    #[test]
    fn volumetric_pacing_fires_on_accumulated_barrels() {
        let (mut sampler, store, mut sp) = rig();
        sp.sample_barrels_per_grab = 5.0;
        for _ in 0..4 {
            sampler.execute(&store, &sp, LactState::Running, 1.0).unwrap();
            assert!(!store.read_bool(TagId::DoSampleSol).unwrap());
        }
        sampler.execute(&store, &sp, LactState::Running, 1.0).unwrap();
        assert!(store.read_bool(TagId::DoSampleSol).unwrap());
        assert_eq!(sampler.grabs(), 1);
        assert_eq!(sampler.total_ml(), 1.5);
    }

    #[test]
    fn solenoid_pulse_lasts_grab_duration() {
        let (mut sampler, store, mut sp) = rig();
        sp.sample_barrels_per_grab = 1.0;
        sp.grab_duration_ms = 300; // 3 scans at 100 ms
        sampler.execute(&store, &sp, LactState::Running, 2.0).unwrap();
        assert!(store.read_bool(TagId::DoSampleSol).unwrap());
        sampler.execute(&store, &sp, LactState::Running, 0.0).unwrap();
        sampler.execute(&store, &sp, LactState::Running, 0.0).unwrap();
        assert!(store.read_bool(TagId::DoSampleSol).unwrap());
        sampler.execute(&store, &sp, LactState::Running, 0.0).unwrap();
        assert!(!store.read_bool(TagId::DoSampleSol).unwrap());
    }

    #[test]
    fn time_pacing_when_volumetric_unset() {
        let (mut sampler, store, mut sp) = rig();
        sp.sample_rate_sec = 1.0; // 10 scans
        for _ in 0..9 {
            sampler.execute(&store, &sp, LactState::Running, 0.1).unwrap();
        }
        assert!(!store.read_bool(TagId::DoSampleSol).unwrap());
        sampler.execute(&store, &sp, LactState::Running, 0.1).unwrap();
        assert!(store.read_bool(TagId::DoSampleSol).unwrap());
    }

    #[test]
    fn suppressed_outside_running() {
        let (mut sampler, store, mut sp) = rig();
        sp.sample_barrels_per_grab = 1.0;
        for state in [LactState::Divert, LactState::Proving, LactState::Idle] {
            sampler.execute(&store, &sp, state, 10.0).unwrap();
            assert!(!store.read_bool(TagId::DoSampleSol).unwrap(), "{state}");
        }
        assert_eq!(sampler.grabs(), 0);
    }

    #[test]
    fn suppressed_when_pot_full() {
        let (mut sampler, store, mut sp) = rig();
        sp.sample_barrels_per_grab = 1.0;
        store.write_bool(TagId::DiSamplePotHi, true).unwrap();
        sampler.execute(&store, &sp, LactState::Running, 10.0).unwrap();
        assert!(!store.read_bool(TagId::DoSampleSol).unwrap());
        assert_eq!(sampler.grabs(), 0);
    }

    #[test]
    fn accumulator_keeps_integrating_through_proving() {
        let (mut sampler, store, mut sp) = rig();
        sp.sample_barrels_per_grab = 5.0;
        // 4 barrels short of a grab, then proving delivers 2 more.
        sampler.execute(&store, &sp, LactState::Running, 4.0).unwrap();
        sampler.execute(&store, &sp, LactState::Proving, 2.0).unwrap();
        assert_eq!(sampler.grabs(), 0);
        // Back in Running, the stored 6 bbl fires immediately.
        sampler.execute(&store, &sp, LactState::Running, 0.0).unwrap();
        assert_eq!(sampler.grabs(), 1);
    }

    #[test]
    fn mix_pump_runs_only_in_running() {
        let (mut sampler, store, sp) = rig();
        sampler.execute(&store, &sp, LactState::Running, 0.0).unwrap();
        assert!(store.read_bool(TagId::DoSampleMixPump).unwrap());
        sampler.execute(&store, &sp, LactState::Divert, 0.0).unwrap();
        assert!(!store.read_bool(TagId::DoSampleMixPump).unwrap());
    }
}
