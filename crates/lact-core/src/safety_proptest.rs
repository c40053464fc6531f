#[cfg(test)]
mod proptest_core {
    use proptest::prelude::*;

    use crate::alarms::Annunciator;
    use crate::modules::flow::{BatchTotals, FlowMeasurement};
    use crate::modules::proving::evaluate_runs;
    use crate::modules::pump::PumpControl;
    use crate::modules::temperature::compute_ctl;
    use crate::setpoints::Setpoints;
    use crate::state::LactState;
    use crate::store::TagStore;
    use crate::tags::TagId;
    use crate::timebase::TimeBase;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        // CTL stays inside the sanity clamp for any observed temperature.
        #[test]
        fn ctl_bounded(temp in -10_000.0f64..10_000.0, alpha in 0.0003f64..0.0006) {
            let mut sp = Setpoints::default();
            sp.api_thermal_expansion_alpha = alpha;
            let (ctl, _) = compute_ctl(temp, &sp);
            prop_assert!((0.90..=1.10).contains(&ctl));
        }

        // At base temperature the correction is exactly unity.
        #[test]
        fn ctl_unity_at_base(alpha in 0.0003f64..0.0006, base in 40.0f64..80.0) {
            let mut sp = Setpoints::default();
            sp.api_thermal_expansion_alpha = alpha;
            sp.temp_base_deg_f = base;
            let (ctl, clamped) = compute_ctl(base, &sp);
            prop_assert_eq!(ctl, 1.0);
            prop_assert!(!clamped);
        }

        // Totals never decrease, whatever the counter does (wraps included).
        #[test]
        fn totals_monotone(counters in prop::collection::vec(any::<u32>(), 1..80)) {
            let store = TagStore::new(TimeBase::fixed());
            store.write_bool(TagId::DiPumpRunning, true).unwrap();
            let sp = Setpoints::default();
            let mut flow = FlowMeasurement::new();
            let mut batch = BatchTotals::default();
            let mut last = (0.0f64, 0.0f64);
            for c in counters {
                store.write_count(TagId::PiMeterPulse, u64::from(c)).unwrap();
                flow.execute(&store, &sp, LactState::Running, &mut batch).unwrap();
                prop_assert!(batch.gross_bbl >= last.0);
                prop_assert!(batch.net_bbl >= last.1);
                last = (batch.gross_bbl, batch.net_bbl);
            }
        }

        // Repeatability is non-negative and the mean sits between extremes.
        #[test]
        fn repeatability_well_formed(factors in prop::collection::vec(0.9f64..1.1, 2..12)) {
            let (rep, mean) = evaluate_runs(&factors);
            let min = factors.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = factors.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(rep >= 0.0);
            prop_assert!(mean >= min - 1e-12 && mean <= max + 1e-12);
        }

        // Analog writes always land inside the declared range.
        #[test]
        fn analog_clamp_holds(value in -1e6f32..1e6) {
            let store = TagStore::new(TimeBase::fixed());
            store.write_f32(TagId::AiBswProbe, value).unwrap();
            let read = store.read_f32(TagId::AiBswProbe).unwrap();
            prop_assert!((0.0..=5.0).contains(&read));
        }

        // Start edges never exceed the hourly limit, whatever the operator
        // does with the demand bit.
        #[test]
        fn pump_start_rate_limited(demands in prop::collection::vec(any::<bool>(), 1..600)) {
            let store = TagStore::new(TimeBase::fixed());
            let sp = Setpoints::default();
            let mut pump = PumpControl::new();
            let mut ann = Annunciator::new();
            let mut now_us = 0u64;
            let mut last = false;
            let mut edges = 0u32;
            for demand in demands {
                store.write_bool(TagId::PumpDemand, demand).unwrap();
                pump.execute(&store, &sp, &mut ann, now_us).unwrap();
                let cmd = store.read_bool(TagId::DoPumpStart).unwrap();
                if cmd && !last {
                    edges += 1;
                }
                last = cmd;
                now_us += 100_000;
            }
            // Sequence stays inside one hour, so the window never drains.
            prop_assert!(edges <= sp.pump_max_starts_per_hour);
        }
    }
}
