//! Identity reducer: registration growth, verification status, and
//! daily/weekly/yearly histograms from raw identity records.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    DayCount, Identity, TrendDirection, WeekOverWeekGrowth, YearCount, percentage_change,
};

use super::{DAY_WINDOW, WEEK_WINDOW, fill_year_counts, last_n_days, round1, year_of};

/// How many entries the recent-signups feed carries.
const RECENT_SIGNUPS: usize = 20;

/// Identity count per schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCount {
    pub schema: String,
    pub count: usize,
}

/// Verified / unverified identity split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStatus {
    pub verified: usize,
    pub unverified: usize,
}

/// One entry of the recent-signups feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSignup {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub email: String,
    pub schema_id: String,
}

/// Derived identity metrics. Immutable once built; replaced wholesale on the
/// next successful fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetrics {
    pub total_identities: usize,
    pub new_identities_last_30_days: usize,

    /// Exactly 30 buckets, oldest first, zero-filled.
    pub identities_by_day: Vec<DayCount>,

    /// Contiguous observed year range, latest first, zero-filled.
    pub identities_by_year: Vec<YearCount>,

    pub identities_by_schema: Vec<SchemaCount>,
    pub verification_status: VerificationStatus,

    /// Exactly 4 buckets, oldest first.
    pub registrations_by_week: Vec<usize>,
    pub total_growth_4_weeks: usize,
    pub week_over_week_growth: WeekOverWeekGrowth,

    /// At most 20 entries, newest first.
    pub recent_signups: Vec<RecentSignup>,
}

/// Reduce raw identity records into [`IdentityMetrics`].
///
/// Identities without a creation timestamp still count toward totals, schema
/// and verification splits, but are excluded from every time-bucketed series.
pub fn reduce_identities(identities: &[Identity], now: DateTime<Utc>) -> IdentityMetrics {
    let thirty_days_ago = now - Duration::days(30);

    let new_identities_last_30_days = identities
        .iter()
        .filter(|i| i.created_at.is_some_and(|t| t >= thirty_days_ago))
        .count();

    // Daily histogram over the last 30 UTC calendar days.
    let mut per_day: HashMap<chrono::NaiveDate, usize> = HashMap::new();
    let mut per_year: HashMap<i32, usize> = HashMap::new();
    for identity in identities {
        if let Some(created) = identity.created_at {
            *per_day.entry(created.date_naive()).or_insert(0) += 1;
            *per_year.entry(year_of(created)).or_insert(0) += 1;
        }
    }

    let identities_by_day: Vec<DayCount> = last_n_days(now, DAY_WINDOW)
        .into_iter()
        .map(|date| DayCount {
            date: date.format("%Y-%m-%d").to_string(),
            count: per_day.get(&date).copied().unwrap_or(0),
        })
        .collect();

    let identities_by_year = fill_year_counts(&per_year);

    // Schema split.
    let mut per_schema: HashMap<String, usize> = HashMap::new();
    for identity in identities {
        let schema = identity.schema_id.clone().unwrap_or_else(|| "unknown".to_string());
        *per_schema.entry(schema).or_insert(0) += 1;
    }
    let mut identities_by_schema: Vec<SchemaCount> = per_schema
        .into_iter()
        .map(|(schema, count)| SchemaCount { schema, count })
        .collect();
    identities_by_schema.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.schema.cmp(&b.schema)));

    // Verification split: verified means at least one verified address.
    let verified = identities.iter().filter(|i| i.is_verified()).count();
    let verification_status = VerificationStatus {
        verified,
        unverified: identities.len() - verified,
    };

    // Weekly registration counts, oldest first.
    let registrations_by_week: Vec<usize> = (0..WEEK_WINDOW as i64)
        .rev()
        .map(|w| {
            let start = now - Duration::weeks(w + 1);
            let end = now - Duration::weeks(w);
            identities
                .iter()
                .filter(|i| i.created_at.is_some_and(|t| t >= start && t < end))
                .count()
        })
        .collect();
    let total_growth_4_weeks = registrations_by_week.iter().sum();

    let current_week_count = registrations_by_week[WEEK_WINDOW - 1];
    let previous_week_count = registrations_by_week[WEEK_WINDOW - 2];
    let change = percentage_change(current_week_count, previous_week_count);
    let week_over_week_growth = WeekOverWeekGrowth {
        current_week_count,
        previous_week_count,
        percentage_change: round1(change),
        direction: TrendDirection::from_change(change),
    };

    // Recent signups feed, newest first.
    let mut dated: Vec<&Identity> = identities.iter().filter(|i| i.created_at.is_some()).collect();
    dated.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let recent_signups: Vec<RecentSignup> = dated
        .into_iter()
        .take(RECENT_SIGNUPS)
        .map(|identity| RecentSignup {
            id: identity.id.clone(),
            timestamp: identity.created_at.unwrap_or(now),
            email: identity.display_name(),
            schema_id: identity.schema_id.clone().unwrap_or_else(|| "unknown".to_string()),
        })
        .collect();

    IdentityMetrics {
        total_identities: identities.len(),
        new_identities_last_30_days,
        identities_by_day,
        identities_by_year,
        identities_by_schema,
        verification_status,
        registrations_by_week,
        total_growth_4_weeks,
        week_over_week_growth,
        recent_signups,
    }
}
