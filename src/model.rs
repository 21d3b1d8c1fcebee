//! Data models for the Athena console.
//!
//! Two families of types live here:
//!
//! - **Raw upstream records** ([`Identity`], [`Session`], [`IdentitySchema`],
//!   [`OAuth2Client`]): explicit schemas for the subset of fields the metric
//!   reducers actually read. Every optional upstream field is `#[serde(default)]`
//!   so a missing field degrades to a zero value instead of a decode error.
//!   Records are fetched fresh per aggregation cycle and discarded after
//!   reduction; nothing here is ever mutated.
//!
//! - **Shared metric value types** ([`DayCount`], [`YearCount`], [`HourCount`],
//!   [`WeekOverWeekGrowth`], [`GeoPoint`], [`ServiceHealth`]) used by the
//!   reducers in [`crate::metrics`].
//!
//! Wire format is camelCase: the metric snapshots and the persisted dashboard
//! layout share a JSON schema with earlier deployments of the console and must
//! stay readable by them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Raw upstream records
// ============================================================================

/// An identity record from the identity service admin API.
///
/// Only the fields the reducers read are modeled; the upstream record carries
/// much more (credentials, recovery addresses, state history) that the
/// analytics path never touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,

    /// Schema the identity was created under.
    #[serde(default)]
    pub schema_id: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Free-form traits object; the console only looks for `email`/`username`.
    #[serde(default)]
    pub traits: serde_json::Value,

    #[serde(default)]
    pub verifiable_addresses: Vec<VerifiableAddress>,
}

/// A verifiable address (email or phone) attached to an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiableAddress {
    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub verified: bool,
}

impl Identity {
    /// True if at least one address has been verified.
    pub fn is_verified(&self) -> bool {
        self.verifiable_addresses.iter().any(|a| a.verified)
    }

    /// Best human-readable handle: email, then username, then the raw id.
    pub fn display_name(&self) -> String {
        display_name_from_traits(&self.traits).unwrap_or_else(|| self.id.clone())
    }
}

/// An authenticated session record, optionally expanded with its identity
/// and device sub-records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub authenticated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub identity: Option<SessionIdentity>,

    #[serde(default)]
    pub authentication_methods: Vec<AuthenticationMethod>,

    #[serde(default)]
    pub devices: Vec<SessionDevice>,
}

/// The identity a session belongs to (from `expand=identity`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: String,

    #[serde(default)]
    pub traits: serde_json::Value,
}

impl SessionIdentity {
    /// Best human-readable handle: email, then username, then the raw id.
    pub fn display_name(&self) -> String {
        display_name_from_traits(&self.traits).unwrap_or_else(|| self.id.clone())
    }
}

fn display_name_from_traits(traits: &serde_json::Value) -> Option<String> {
    for key in ["email", "username"] {
        if let Some(v) = traits.get(key).and_then(|v| v.as_str()) {
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

/// One completed authentication method on a session (password, oidc, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationMethod {
    #[serde(default)]
    pub method: Option<String>,
}

/// A device attached to a session (from `expand=devices`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDevice {
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// An identity schema definition. Only counted, never inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySchema {
    #[serde(default)]
    pub id: String,
}

/// An OAuth2 client record from the OAuth2 service admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Client {
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_name: Option<String>,

    /// `"none"` marks a public client; anything else is confidential.
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,

    #[serde(default)]
    pub grant_types: Vec<String>,
}

impl OAuth2Client {
    /// Public clients present no credentials at the token endpoint.
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_method.as_deref() == Some("none")
    }
}

// ============================================================================
// Shared metric value types
// ============================================================================

/// Count for one calendar day (`date` is `YYYY-MM-DD`, UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub count: usize,
}

/// Count for one calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearCount {
    pub year: i32,
    pub count: usize,
}

/// Count for one hour of the day (0-23).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

/// Direction of a week-over-week trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    /// Direction of an (unrounded) percentage change: strictly positive is
    /// `Up`, strictly negative is `Down`, exactly zero is `Flat`.
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            TrendDirection::Up
        } else if change < 0.0 {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        }
    }
}

/// Week-over-week registration growth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekOverWeekGrowth {
    pub current_week_count: usize,
    pub previous_week_count: usize,

    /// Percentage change rounded to one decimal place.
    pub percentage_change: f64,

    pub direction: TrendDirection,
}

/// Percentage change from `previous` to `current`.
///
/// Defined as `(current - previous) / previous * 100` when `previous > 0`,
/// and `0` otherwise: growth from an empty baseline has no meaningful
/// percentage, so it is reported as flat rather than infinite.
pub fn percentage_change(current: usize, previous: usize) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}

/// A geographic cluster centroid for the session-locations heat map.
///
/// Coordinates are rounded to a 0.5-degree grid (roughly 50 km), so nearby
/// source IPs collapse into one point; `count` is the number of source IPs
/// mapped into the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub label: String,
    pub count: usize,
}

// ============================================================================
// Health
// ============================================================================

/// Result of a health-gate check for one upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub is_healthy: bool,

    /// True when the service is toggled off in configuration. A disabled
    /// service is unhealthy but not an error state.
    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy() -> Self {
        Self {
            is_healthy: true,
            disabled: false,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            disabled: false,
            error: Some(error.into()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            is_healthy: false,
            disabled: true,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_percentage_change_zero_baseline() {
        assert_eq!(percentage_change(10, 0), 0.0);
        assert_eq!(percentage_change(0, 0), 0.0);
    }

    #[test]
    fn test_percentage_change_up_and_down() {
        assert_eq!(percentage_change(150, 100), 50.0);
        assert_eq!(percentage_change(50, 100), -50.0);
        assert_eq!(percentage_change(100, 100), 0.0);
    }

    #[test]
    fn test_trend_direction_strict_sign() {
        assert_eq!(TrendDirection::from_change(0.1), TrendDirection::Up);
        assert_eq!(TrendDirection::from_change(-0.1), TrendDirection::Down);
        assert_eq!(TrendDirection::from_change(0.0), TrendDirection::Flat);
    }

    #[test]
    fn test_identity_display_name_fallbacks() {
        let with_email = Identity {
            id: "id-1".to_string(),
            schema_id: None,
            created_at: None,
            traits: json!({"email": "a@example.com", "username": "a"}),
            verifiable_addresses: vec![],
        };
        assert_eq!(with_email.display_name(), "a@example.com");

        let with_username = Identity {
            traits: json!({"username": "bob"}),
            ..with_email.clone()
        };
        assert_eq!(with_username.display_name(), "bob");

        let bare = Identity {
            traits: json!({}),
            ..with_email
        };
        assert_eq!(bare.display_name(), "id-1");
    }

    #[test]
    fn test_identity_verified_requires_one_verified_address() {
        let identity = Identity {
            id: "id-1".to_string(),
            schema_id: None,
            created_at: None,
            traits: json!({}),
            verifiable_addresses: vec![
                VerifiableAddress {
                    value: "a@example.com".to_string(),
                    verified: false,
                },
                VerifiableAddress {
                    value: "b@example.com".to_string(),
                    verified: true,
                },
            ],
        };
        assert!(identity.is_verified());
    }

    #[test]
    fn test_raw_records_tolerate_missing_fields() {
        let identity: Identity = serde_json::from_value(json!({"id": "x"})).unwrap();
        assert!(identity.created_at.is_none());
        assert!(identity.verifiable_addresses.is_empty());

        let session: Session = serde_json::from_value(json!({"id": "s"})).unwrap();
        assert!(!session.active);
        assert!(session.devices.is_empty());

        let client: OAuth2Client = serde_json::from_value(json!({})).unwrap();
        assert!(!client.is_public());
        assert!(client.grant_types.is_empty());
    }
}
