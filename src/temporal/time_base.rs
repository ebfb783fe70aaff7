//! Rational time bases and timestamp rescaling.

use std::time::Duration;

/// A rational time unit: one tick lasts `num / den` seconds.
///
/// A 25 fps encoder counts in `1/25`, Matroska stores milliseconds (`1/1000`),
/// and MP4 tracks pick their own timescale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBase {
    num: u32,
    den: u32,
}

impl TimeBase {
    /// Millisecond ticks.
    pub const MILLISECONDS: TimeBase = TimeBase { num: 1, den: 1000 };

    /// Nanosecond ticks.
    pub const NANOSECONDS: TimeBase = TimeBase {
        num: 1,
        den: 1_000_000_000,
    };

    /// Create a time base of `num / den` seconds per tick.
    ///
    /// Returns `None` if either part is zero.
    pub const fn new(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            None
        } else {
            Some(Self { num, den })
        }
    }

    /// Time base of a constant frame rate: one tick per frame.
    ///
    /// Returns `None` for a zero frame rate.
    pub const fn from_frame_rate(frame_rate: u32) -> Option<Self> {
        Self::new(1, frame_rate)
    }

    /// Numerator (seconds).
    pub const fn num(&self) -> u32 {
        self.num
    }

    /// Denominator (ticks).
    pub const fn den(&self) -> u32 {
        self.den
    }

    /// Convert a timestamp from `from` ticks into `to` ticks.
    ///
    /// Computes `ts * from / to` exactly and rounds half away from zero.
    pub fn rescale(ts: i64, from: TimeBase, to: TimeBase) -> i64 {
        if from == to {
            return ts;
        }
        let numer = ts as i128 * from.num as i128 * to.den as i128;
        let denom = from.den as i128 * to.num as i128;
        let half = denom / 2;
        let rounded = if numer >= 0 {
            (numer + half) / denom
        } else {
            (numer - half) / denom
        };
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Convert a timestamp in this time base to `to`.
    pub fn rescale_to(&self, ts: i64, to: TimeBase) -> i64 {
        Self::rescale(ts, *self, to)
    }

    /// Wall-clock length of `ticks` in this time base.
    pub fn duration_of(&self, ticks: u64) -> Duration {
        let nanos = self.rescale_to(ticks as i64, Self::NANOSECONDS);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    /// Length of `ticks` in seconds.
    pub fn seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.num as f64 / self.den as f64
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero() {
        assert!(TimeBase::new(0, 25).is_none());
        assert!(TimeBase::from_frame_rate(0).is_none());
        assert_eq!(TimeBase::from_frame_rate(25).unwrap().to_string(), "1/25");
    }

    #[test]
    fn test_rescale_frames_to_millis() {
        let tb = TimeBase::from_frame_rate(25).unwrap();
        assert_eq!(tb.rescale_to(0, TimeBase::MILLISECONDS), 0);
        assert_eq!(tb.rescale_to(1, TimeBase::MILLISECONDS), 40);
        assert_eq!(tb.rescale_to(25, TimeBase::MILLISECONDS), 1000);
    }

    #[test]
    fn test_rescale_rounds_half_away_from_zero() {
        let tb = TimeBase::from_frame_rate(30).unwrap();
        // 1/30 s = 33.33 ms, 2/30 s = 66.67 ms
        assert_eq!(tb.rescale_to(1, TimeBase::MILLISECONDS), 33);
        assert_eq!(tb.rescale_to(2, TimeBase::MILLISECONDS), 67);
        assert_eq!(tb.rescale_to(-2, TimeBase::MILLISECONDS), -67);

        let from = TimeBase::new(1, 2).unwrap();
        let to = TimeBase::new(1, 1).unwrap();
        assert_eq!(TimeBase::rescale(1, from, to), 1);
        assert_eq!(TimeBase::rescale(-1, from, to), -1);
    }

    #[test]
    fn test_rescale_identity() {
        let tb = TimeBase::from_frame_rate(60).unwrap();
        assert_eq!(TimeBase::rescale(12345, tb, tb), 12345);
    }

    #[test]
    fn test_duration_of() {
        let tb = TimeBase::from_frame_rate(25).unwrap();
        assert_eq!(tb.duration_of(25), Duration::from_secs(1));
        assert_eq!(tb.seconds(50), 2.0);
    }
}
