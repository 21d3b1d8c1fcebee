//! Metric reducers: pure functions from raw upstream records to derived
//! analytics snapshots.
//!
//! Every reducer has the shape `reduce(records, now) -> Metrics`: deterministic,
//! no I/O, with an explicit reference time so results are reproducible in
//! tests. Each bucketed series covers its full window with zero-filled gaps
//! (30 daily buckets, 4 weekly buckets, 24 hourly buckets, and a contiguous
//! range of observed years) regardless of how sparse the source data is.
//!
//! - [`identity`]: registration growth, verification, daily/yearly histograms
//! - [`session`]: activity windows, durations, peak hours, geo clusters
//! - [`hydra`]: OAuth2 client classification and grant-type usage
//! - [`reduce_system`]: schema count and service freshness (below)

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{IdentitySchema, YearCount};

pub mod hydra;
pub mod identity;
pub mod session;

pub use hydra::{HydraMetrics, reduce_clients};
pub use identity::{IdentityMetrics, reduce_identities};
pub use session::{SessionMetrics, device_ips, reduce_sessions};

/// Number of daily buckets in the by-day histograms.
pub const DAY_WINDOW: usize = 30;

/// Number of weekly buckets in the registration series.
pub const WEEK_WINDOW: usize = 4;

/// The last `n` UTC calendar days ending today, oldest first.
pub(crate) fn last_n_days(now: DateTime<Utc>, n: usize) -> Vec<NaiveDate> {
    (0..n)
        .rev()
        .map(|i| (now - Duration::days(i as i64)).date_naive())
        .collect()
}

/// Zero-fill a year histogram over the contiguous observed range,
/// latest year first. Empty input produces an empty series.
pub(crate) fn fill_year_counts(
    counts: &std::collections::HashMap<i32, usize>,
) -> Vec<YearCount> {
    let (min, max) = match (counts.keys().min(), counts.keys().max()) {
        (Some(&min), Some(&max)) => (min, max),
        _ => return Vec::new(),
    };

    (min..=max)
        .rev()
        .map(|year| YearCount {
            year,
            count: counts.get(&year).copied().unwrap_or(0),
        })
        .collect()
}

/// Round to one decimal place (display precision for percentages and durations).
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// System health classification carried inside metric snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Warning,
    Error,
}

/// Derived system-wide metrics (schema inventory).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub total_schemas: usize,
    pub system_health: SystemHealth,
    pub last_updated: DateTime<Utc>,
}

/// Reduce the schema listing into system metrics. The fetch itself is
/// health-gated, so a successful reduction always reports healthy.
pub fn reduce_system(schemas: &[IdentitySchema], now: DateTime<Utc>) -> SystemMetrics {
    SystemMetrics {
        total_schemas: schemas.len(),
        system_health: SystemHealth::Healthy,
        last_updated: now,
    }
}

/// Calendar year of a timestamp.
pub(crate) fn year_of(ts: DateTime<Utc>) -> i32 {
    ts.year()
}
