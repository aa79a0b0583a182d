//! Rational time bases and timestamp rescaling.
//!
//! Media timestamps are integers counted in a stream-specific rational
//! time base (e.g. `1/90000` for MPEG-TS). Moving a timestamp between
//! time bases is an exact integer operation performed in 128-bit
//! intermediate precision, rounding to the nearest representable value.

/// A rational number used as a time base.
///
/// Time bases are always positive (`num > 0`, `den > 0`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator.
    pub num: i32,
    /// Denominator.
    pub den: i32,
}

impl Rational {
    /// One nanosecond: the time base used for wall-clock conversions.
    pub const NANOSECONDS: Rational = Rational::new(1, 1_000_000_000);

    /// Create a new rational.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// The rational as a floating point value.
    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescale `v` from time base `from` to time base `to`.
///
/// Rounds to the nearest representable value, ties away from zero.
pub fn rescale_q(v: i64, from: Rational, to: Rational) -> i64 {
    let num = v as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    debug_assert!(den > 0, "time bases must be positive");
    let rounded = if num >= 0 {
        (num + den / 2) / den
    } else {
        (num - den / 2) / den
    };
    rounded as i64
}

/// Convert a duration expressed in `time_base` units to nanoseconds.
///
/// Negative durations clamp to zero.
pub fn duration_to_nanos(duration: i64, time_base: Rational) -> u64 {
    rescale_q(duration, time_base, Rational::NANOSECONDS).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rescale_millis_to_mpegts() {
        // 1/1000 -> 1/90000 multiplies by 90.
        let from = Rational::new(1, 1000);
        let to = Rational::new(1, 90000);
        assert_eq!(rescale_q(1000, from, to), 90000);
        assert_eq!(rescale_q(2000, from, to), 180000);
    }

    #[test]
    fn test_rescale_identity() {
        let tb = Rational::new(1, 48000);
        assert_eq!(rescale_q(1024, tb, tb), 1024);
    }

    #[test]
    fn test_rescale_rounds_to_nearest() {
        // 1/10 -> 1/3: 1 * 3 / 10 = 0.3 -> 0, 2 * 3 / 10 = 0.6 -> 1.
        let from = Rational::new(1, 10);
        let to = Rational::new(1, 3);
        assert_eq!(rescale_q(1, from, to), 0);
        assert_eq!(rescale_q(2, from, to), 1);
    }

    #[test]
    fn test_rescale_negative() {
        let from = Rational::new(1, 1000);
        let to = Rational::new(1, 90000);
        assert_eq!(rescale_q(-1000, from, to), -90000);
    }

    #[test]
    fn test_duration_to_nanos() {
        // One packet of 1024 samples at 48kHz.
        let tb = Rational::new(1, 48000);
        assert_eq!(duration_to_nanos(1024, tb), 21_333_333);
        assert_eq!(duration_to_nanos(-5, tb), 0);
    }

    proptest! {
        #[test]
        fn prop_rescale_monotonic(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            let from = Rational::new(1, 1000);
            let to = Rational::new(1, 90000);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(rescale_q(lo, from, to) <= rescale_q(hi, from, to));
        }
    }
}
