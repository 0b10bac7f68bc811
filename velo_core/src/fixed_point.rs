//! Integer arithmetic helpers for the control path.
//!
//! The controller and estimator never touch floating point: control output is
//! a signed duty in units of 2^-30, velocities are whole RPM.

/// Upper bound of the control output (just under +100% duty).
pub const CONTROL_MAX: i32 = (1 << 30) - 1;
/// Lower bound of the control output (-100% duty).
pub const CONTROL_MIN: i32 = -(1 << 30);

/// `num / den` rounded to nearest, ties away from zero.
///
/// Works in 128-bit so any pair of i64 operands is safe. A zero denominator
/// yields 0.
#[inline]
pub fn div_round_half_away(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    }
}

/// Clamp a 128-bit intermediate into i64.
#[inline]
pub fn saturate_i64(x: i128) -> i64 {
    x.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Clamp a 64-bit value into i32.
#[inline]
pub fn saturate_i32(x: i64) -> i32 {
    x.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Signed step between two readings of a free-running 16-bit counter.
///
/// Takes the shortest path around the wrap, so `32767 -> -32768` is `+1`.
#[inline]
pub fn wrapping_step_i16(prev: i16, now: i16) -> i32 {
    i32::from(now.wrapping_sub(prev))
}
