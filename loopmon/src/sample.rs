//! Sample - one measurement taken by the sampling loop.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// A single measurement of event loop health.
///
/// Samples are produced once per interval and handed to every callback.
/// The monitor keeps no history of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Sample {
    /// How much later than requested the sampling loop was resumed.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_secs"))]
    pub lag: Duration,

    /// Number of tasks alive on the monitored loop, including the sampling loop.
    pub tasks: usize,

    /// Wall-clock time the sample was taken.
    pub sampled_at: DateTime<Utc>,
}

impl Sample {
    /// Lag in (fractional) seconds.
    pub fn lag_secs(&self) -> f64 {
        self.lag.as_secs_f64()
    }
}

#[cfg(feature = "serde")]
fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
