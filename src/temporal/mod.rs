//! Temporal types for frame and packet timestamps.
//!
//! Encoders and containers each count time in their own unit. A
//! [`TimeBase`] names that unit as a rational number of seconds per tick,
//! and [`TimeBase::rescale`] moves timestamps between two of them.

mod time_base;

pub use time_base::TimeBase;
