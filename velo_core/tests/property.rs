use proptest::prelude::*;
use velo_core::{CONTROL_MAX, CONTROL_MIN, EstimatorParams, PiController, VelocityEstimator};

prop_compose! {
    fn step_strategy()(
        reference in -10_000i32..10_000,
        measured in -10_000i32..10_000,
        dt in 1u32..100,
    ) -> (i32, i32, u32) {
        (reference, measured, dt)
    }
}

proptest! {
    #[test]
    fn output_bounded_and_integrator_consistent(
        steps in proptest::collection::vec(step_strategy(), 1..200),
        t0 in any::<u32>(),
    ) {
        let mut pi = PiController::default();
        let mut ts = t0;
        pi.compute(0, 0, ts);
        for (reference, measured, dt) in steps {
            ts = ts.wrapping_add(dt);
            let out = pi.compute(reference, measured, ts);
            prop_assert!((CONTROL_MIN..=CONTROL_MAX).contains(&out));
            let p = 300_000i64 * (i64::from(reference) - i64::from(measured));
            prop_assert_eq!(p + pi.integrator(), i64::from(out));
        }
    }

    #[test]
    fn first_compute_is_zero_for_any_input(
        reference in any::<i32>(),
        measured in any::<i32>(),
        ts in any::<u32>(),
    ) {
        let mut pi = PiController::default();
        prop_assert_eq!(pi.compute(reference, measured, ts), 0);
        prop_assert_eq!(pi.integrator(), 0);
    }

    #[test]
    fn single_step_velocity_matches_rounded_ratio(
        start in any::<i16>(),
        step in -1000i16..1000,
        t0 in any::<u32>(),
        dt in 1u32..1000,
        cpr in 1u32..4096,
    ) {
        let mut est = VelocityEstimator::new(EstimatorParams {
            counts_per_rev: cpr,
            alpha_num: 1,
            alpha_den: 1,
        });
        est.sample(start, t0);
        let v = est.sample(start.wrapping_add(step), t0.wrapping_add(dt));

        let num = i64::from(step).abs() * 60_000;
        let den = i64::from(cpr) * i64::from(dt);
        let mag = (num + den / 2) / den;
        let expected = if step < 0 { -mag } else { mag };
        prop_assert_eq!(i64::from(v), expected);
    }

    #[test]
    fn filtered_velocity_stays_between_old_and_new(
        first in -500i16..500,
        second in -500i16..500,
        alpha_num in 1u32..8,
    ) {
        let mut est = VelocityEstimator::new(EstimatorParams {
            counts_per_rev: 60,
            alpha_num,
            alpha_den: 8,
        });
        est.sample(0, 0);
        let a = est.sample(first, 1000);
        let b = est.sample(first.wrapping_add(second), 2000);
        // counts_per_rev = 60 and dt = 1 s: instantaneous RPM == counts
        let lo = a.min(i32::from(second));
        let hi = a.max(i32::from(second));
        prop_assert!((lo..=hi).contains(&b), "{b} not in [{lo}, {hi}]");
    }
}
