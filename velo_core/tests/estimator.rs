use rstest::rstest;
use velo_core::{EstimatorParams, VelocityEstimator};

fn unfiltered(counts_per_rev: u32) -> VelocityEstimator {
    VelocityEstimator::new(EstimatorParams {
        counts_per_rev,
        alpha_num: 1,
        alpha_den: 1,
    })
}

#[test]
fn counter_wrap_is_one_step_forward() {
    let mut est = unfiltered(44);
    est.sample(i16::MAX, 0);
    // +1 count in 10 ms at 44 counts/rev = 136.36 RPM
    assert_eq!(est.sample(i16::MIN, 10), 136);
}

#[test]
fn counter_wrap_backwards() {
    let mut est = unfiltered(44);
    est.sample(i16::MIN, 0);
    assert_eq!(est.sample(i16::MAX, 10), -136);
}

#[rstest]
#[case(1, 15_000, 1)]
#[case(-1, 15_000, -1)]
#[case(3, 15_000, 2)]
#[case(-3, 15_000, -2)]
fn rounds_half_away_from_zero(#[case] step: i16, #[case] dt: u32, #[case] expected: i32) {
    // counts_per_rev = 8: step * 60000 / (8 * 15000) = step * 0.5
    let mut est = unfiltered(8);
    est.sample(100, 0);
    assert_eq!(est.sample(100 + step, dt), expected);
}

#[test]
fn timestamp_wrap_keeps_dt_positive() {
    let mut est = unfiltered(44);
    est.sample(0, u32::MAX - 4);
    assert_eq!(est.sample(44, 5), 6000);
}

#[test]
fn reset_forgets_baseline() {
    let mut est = unfiltered(44);
    est.sample(0, 0);
    est.sample(440, 100);
    est.reset();
    assert!(!est.is_initialized());
    assert_eq!(est.filtered(), 0);
    assert_eq!(est.sample(-30_000, 5), 0);
}
