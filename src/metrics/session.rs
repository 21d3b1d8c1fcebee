//! Session reducer: activity windows, durations, peak hours, active users,
//! and geo clusters from raw session records.
//!
//! The reducer itself is pure; device IPs are resolved by the caller through
//! [`crate::geo::GeoResolver`] and handed in as already-clustered
//! [`GeoPoint`]s (see [`device_ips`]).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DayCount, GeoPoint, HourCount, Session, YearCount};

use super::{DAY_WINDOW, fill_year_counts, last_n_days, year_of};

/// How many entries the recent-logins feed carries.
const RECENT_LOGINS: usize = 20;

/// Session count per authentication method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCount {
    pub method: String,
    pub count: usize,
}

/// One entry of the recent-logins feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentLogin {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub email: String,
    pub method: String,
    pub identity_id: String,
}

/// Derived session metrics. Immutable once built; replaced wholesale on the
/// next successful fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub sessions_last_7_days: usize,

    /// Exactly 30 buckets, oldest first: sessions active as of each day.
    pub sessions_by_day: Vec<DayCount>,

    /// Average session duration in whole minutes.
    pub average_session_duration: u64,

    pub total_active_users: usize,

    /// Contiguous observed year range, latest first, zero-filled.
    pub active_users_by_year: Vec<YearCount>,

    pub auth_method_breakdown: Vec<MethodCount>,

    /// Exactly 24 buckets (hour 0-23) from authentication timestamps.
    pub sessions_by_hour: Vec<HourCount>,

    /// At most 20 entries, newest first.
    pub recent_logins: Vec<RecentLogin>,

    /// Clustered session origins, descending by count.
    pub session_geo_points: Vec<GeoPoint>,
}

/// Collect device IP addresses from session records, preserving multiplicity
/// so cluster counts reflect session volume per location.
pub fn device_ips(sessions: &[Session]) -> Vec<String> {
    sessions
        .iter()
        .flat_map(|s| s.devices.iter())
        .filter_map(|d| d.ip_address.clone())
        .collect()
}

/// Reduce raw session records into [`SessionMetrics`].
///
/// Sessions without an authentication timestamp count toward the total but
/// are excluded from every time-derived series.
pub fn reduce_sessions(
    sessions: &[Session],
    geo_points: Vec<GeoPoint>,
    now: DateTime<Utc>,
) -> SessionMetrics {
    let seven_days_ago = now - Duration::days(7);

    let active_sessions = sessions.iter().filter(|s| s.active).count();

    let sessions_last_7_days = sessions
        .iter()
        .filter(|s| s.authenticated_at.is_some_and(|t| t >= seven_days_ago))
        .count();

    // Sessions active "as of" each of the last 30 days: authenticated on or
    // before the day's end and, when an expiry exists, not expired before the
    // day started.
    let sessions_by_day: Vec<DayCount> = last_n_days(now, DAY_WINDOW)
        .into_iter()
        .map(|date| {
            let day_start = date.and_time(NaiveTime::MIN).and_utc();
            let next_day = day_start + Duration::days(1);

            let count = sessions
                .iter()
                .filter(|s| {
                    let Some(auth) = s.authenticated_at else {
                        return false;
                    };
                    if auth >= next_day {
                        return false;
                    }
                    match s.expires_at {
                        Some(expires) => expires >= day_start,
                        None => true,
                    }
                })
                .count();

            DayCount {
                date: date.format("%Y-%m-%d").to_string(),
                count,
            }
        })
        .collect();

    // Average duration: each session's end time capped at the lesser of its
    // expiry and "now".
    let durations: Vec<i64> = sessions
        .iter()
        .filter_map(|s| {
            let auth = s.authenticated_at?;
            let end = s.expires_at.map_or(now, |e| e.min(now));
            Some((end - auth).num_seconds().max(0))
        })
        .collect();
    let average_session_duration = if durations.is_empty() {
        0
    } else {
        let avg_seconds = durations.iter().sum::<i64>() as f64 / durations.len() as f64;
        (avg_seconds / 60.0).round() as u64
    };

    // Unique active users per calendar year of authentication.
    let mut users_by_year: HashMap<i32, HashSet<&str>> = HashMap::new();
    let mut all_users: HashSet<&str> = HashSet::new();
    for session in sessions {
        let (Some(auth), Some(identity)) = (session.authenticated_at, session.identity.as_ref())
        else {
            continue;
        };
        users_by_year
            .entry(year_of(auth))
            .or_default()
            .insert(identity.id.as_str());
        all_users.insert(identity.id.as_str());
    }
    let year_counts: HashMap<i32, usize> =
        users_by_year.iter().map(|(&year, ids)| (year, ids.len())).collect();
    let active_users_by_year = fill_year_counts(&year_counts);
    let total_active_users = all_users.len();

    // Authentication method breakdown; a session contributes once per
    // distinct method it completed.
    let mut method_counts: HashMap<String, usize> = HashMap::new();
    for session in sessions {
        let methods: HashSet<&str> = session
            .authentication_methods
            .iter()
            .filter_map(|m| m.method.as_deref())
            .collect();
        for method in methods {
            *method_counts.entry(method.to_string()).or_insert(0) += 1;
        }
    }
    let mut auth_method_breakdown: Vec<MethodCount> = method_counts
        .into_iter()
        .map(|(method, count)| MethodCount { method, count })
        .collect();
    auth_method_breakdown
        .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.method.cmp(&b.method)));

    // Hour-of-day histogram from authentication timestamps.
    let mut hour_counts = [0usize; 24];
    for session in sessions {
        if let Some(auth) = session.authenticated_at {
            hour_counts[auth.hour() as usize] += 1;
        }
    }
    let sessions_by_hour: Vec<HourCount> = hour_counts
        .iter()
        .enumerate()
        .map(|(hour, &count)| HourCount {
            hour: hour as u32,
            count,
        })
        .collect();

    // Recent logins feed, newest first.
    let mut dated: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.authenticated_at.is_some() && s.identity.is_some())
        .collect();
    dated.sort_by(|a, b| b.authenticated_at.cmp(&a.authenticated_at));
    let recent_logins: Vec<RecentLogin> = dated
        .into_iter()
        .take(RECENT_LOGINS)
        .filter_map(|session| {
            let auth = session.authenticated_at?;
            let identity = session.identity.as_ref()?;
            let method = session
                .authentication_methods
                .first()
                .and_then(|m| m.method.clone())
                .unwrap_or_else(|| "unknown".to_string());
            Some(RecentLogin {
                id: session.id.clone(),
                timestamp: auth,
                email: identity.display_name(),
                method,
                identity_id: identity.id.clone(),
            })
        })
        .collect();

    SessionMetrics {
        total_sessions: sessions.len(),
        active_sessions,
        sessions_last_7_days,
        sessions_by_day,
        average_session_duration,
        total_active_users,
        active_users_by_year,
        auth_method_breakdown,
        sessions_by_hour,
        recent_logins,
        session_geo_points: geo_points,
    }
}
