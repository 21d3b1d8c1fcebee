//! Cached analytics aggregation across the identity and OAuth2 services.
//!
//! The [`Aggregator`] owns one cache slot per metric domain, each with its
//! own freshness window tuned to how fast the underlying numbers move. Stale
//! domains are refreshed on demand by snapshot requests and by a periodic
//! background task, so an idle console does not accumulate arbitrary
//! staleness. Every snapshot request first consults the [`HealthGate`]: when the
//! identity service is down, no fetches are attempted and the previously
//! cached data is served alongside the error. Concurrent snapshots may fetch
//! the same domain twice; the last writer wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::geo::{GeoResolver, cluster_geo_results};
use crate::health::{HealthGate, Service};
use crate::metrics::{
    HydraMetrics, IdentityMetrics, SessionMetrics, SystemMetrics, device_ips, reduce_clients,
    reduce_identities, reduce_sessions, reduce_system,
};
use crate::upstream::{HydraClient, KratosClient};

/// How long each domain's numbers stay fresh. Session activity moves the
/// fastest, schema setup changes the least.
const IDENTITY_TTL: Duration = Duration::from_secs(5 * 60);
const SESSION_TTL: Duration = Duration::from_secs(2 * 60);
const SYSTEM_TTL: Duration = Duration::from_secs(10 * 60);
const HYDRA_TTL: Duration = Duration::from_secs(5 * 60);

/// Sessions older than this are ignored entirely.
const SESSION_LOOKBACK_DAYS: i64 = 365;

/// How often the background task re-checks for stale domains. Each domain
/// still refreshes on its own TTL; the tick only bounds how long staleness
/// can go unnoticed while no requests arrive.
const BACKGROUND_TICK: Duration = Duration::from_secs(60);

/// One metric domain as seen by API consumers: the latest data if any,
/// whether it is still being established, and the latest fetch error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSnapshot<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The full analytics payload: every domain plus rolled-up status flags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedAnalytics {
    pub identity: DomainSnapshot<IdentityMetrics>,
    pub session: DomainSnapshot<SessionMetrics>,
    pub system: DomainSnapshot<SystemMetrics>,
    pub hydra: DomainSnapshot<HydraMetrics>,
    pub is_loading: bool,
    pub is_error: bool,
    pub hydra_available: bool,
}

struct Slot<T> {
    data: Option<T>,
    error: Option<String>,
    fetched_at: Option<Instant>,
}

impl<T: Clone> Slot<T> {
    fn empty() -> Self {
        Self {
            data: None,
            error: None,
            fetched_at: None,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }

    /// A successful fetch refreshes the slot. A failed one records the error
    /// but keeps the stale data and does not bump the fetch time, so the
    /// next snapshot retries.
    fn absorb(&mut self, outcome: anyhow::Result<T>, domain: &str) {
        match outcome {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
                self.fetched_at = Some(Instant::now());
            }
            Err(error) => {
                warn!(domain, %error, "metric fetch failed");
                self.error = Some(error.to_string());
            }
        }
    }

    fn snapshot(&self) -> DomainSnapshot<T> {
        DomainSnapshot {
            data: self.data.clone(),
            is_loading: self.data.is_none() && self.error.is_none(),
            is_error: self.error.is_some(),
            error: self.error.clone(),
        }
    }
}

struct Slots {
    identity: Slot<IdentityMetrics>,
    session: Slot<SessionMetrics>,
    system: Slot<SystemMetrics>,
    hydra: Slot<HydraMetrics>,
}

/// Fetches, reduces, and caches analytics from the upstream services.
pub struct Aggregator {
    kratos: KratosClient,
    hydra: Option<HydraClient>,
    geo: GeoResolver,
    health: Arc<HealthGate>,
    slots: Mutex<Slots>,
}

impl Aggregator {
    pub fn new(
        kratos: KratosClient,
        hydra: Option<HydraClient>,
        geo: GeoResolver,
        health: Arc<HealthGate>,
    ) -> Self {
        Self {
            kratos,
            hydra,
            geo,
            health,
            slots: Mutex::new(Slots {
                identity: Slot::empty(),
                session: Slot::empty(),
                system: Slot::empty(),
                hydra: Slot::empty(),
            }),
        }
    }

    /// Current analytics, refreshing whichever domains have gone stale.
    pub async fn snapshot(&self) -> CombinedAnalytics {
        let kratos_health = self.health.check(Service::Kratos).await;
        let hydra_health = self.health.check(Service::Hydra).await;
        let hydra_available = !hydra_health.disabled && hydra_health.is_healthy;

        if kratos_health.is_healthy {
            self.refresh_stale(hydra_available).await;
        } else {
            debug!("identity service unhealthy, serving cached analytics only");
        }

        let slots = self.slots.lock().await;
        let identity = slots.identity.snapshot();
        let session = slots.session.snapshot();
        let system = slots.system.snapshot();
        let hydra = slots.hydra.snapshot();
        drop(slots);

        // The identity service is mandatory; the OAuth2 service degrades
        // gracefully and never fails the combined view.
        let kratos_error = (!kratos_health.is_healthy).then(|| {
            kratos_health
                .error
                .clone()
                .unwrap_or_else(|| "identity service is unavailable".to_string())
        });
        let is_error =
            kratos_error.is_some() || identity.is_error || session.is_error || system.is_error;
        let is_loading = identity.is_loading || session.is_loading || system.is_loading;

        CombinedAnalytics {
            identity,
            session,
            system,
            hydra,
            is_loading,
            is_error,
            hydra_available,
        }
    }

    /// Drop every cache so the next snapshot re-probes health and refetches
    /// all domains.
    pub async fn refetch_all(&self) {
        self.health.invalidate().await;
        let mut slots = self.slots.lock().await;
        slots.identity.fetched_at = None;
        slots.session.fetched_at = None;
        slots.system.fetched_at = None;
        slots.hydra.fetched_at = None;
    }

    /// Keep the caches warm without waiting for a request: a periodic task
    /// that refreshes whichever domains have outlived their TTL, as long as
    /// the identity service is healthy.
    pub fn spawn_background_refresh(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.spawn_background_refresh_every(BACKGROUND_TICK)
    }

    pub fn spawn_background_refresh_every(
        self: Arc<Self>,
        tick: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let kratos_health = self.health.check(Service::Kratos).await;
                if !kratos_health.is_healthy {
                    debug!("identity service unhealthy, skipping background refresh");
                    continue;
                }
                let hydra_available = self.hydra_available().await;
                self.refresh_stale(hydra_available).await;
            }
        })
    }

    /// Whether the OAuth2 service is currently enabled and reachable.
    pub async fn hydra_available(&self) -> bool {
        let health = self.health.check(Service::Hydra).await;
        !health.disabled && health.is_healthy
    }

    async fn refresh_stale(&self, hydra_available: bool) {
        let (identity_due, session_due, system_due, hydra_due) = {
            let slots = self.slots.lock().await;
            (
                !slots.identity.is_fresh(IDENTITY_TTL),
                !slots.session.is_fresh(SESSION_TTL),
                !slots.system.is_fresh(SYSTEM_TTL),
                hydra_available && !slots.hydra.is_fresh(HYDRA_TTL),
            )
        };

        let (identity, session, system, hydra) = tokio::join!(
            async {
                if identity_due {
                    Some(self.fetch_identity().await)
                } else {
                    None
                }
            },
            async {
                if session_due {
                    Some(self.fetch_session().await)
                } else {
                    None
                }
            },
            async {
                if system_due {
                    Some(self.fetch_system().await)
                } else {
                    None
                }
            },
            async {
                if hydra_due {
                    Some(self.fetch_hydra().await)
                } else {
                    None
                }
            },
        );

        let mut slots = self.slots.lock().await;
        if let Some(outcome) = identity {
            slots.identity.absorb(outcome, "identity");
        }
        if let Some(outcome) = session {
            slots.session.absorb(outcome, "session");
        }
        if let Some(outcome) = system {
            slots.system.absorb(outcome, "system");
        }
        if let Some(outcome) = hydra {
            // A reachability blip should zero the OAuth2 numbers rather than
            // poison the whole dashboard.
            match outcome {
                Ok(metrics) => slots.hydra.absorb(Ok(metrics), "hydra"),
                Err(error) => {
                    warn!(%error, "OAuth2 metric fetch failed, reporting degraded metrics");
                    slots.hydra.data = Some(HydraMetrics::degraded());
                    slots.hydra.error = Some(error.to_string());
                    slots.hydra.fetched_at = Some(Instant::now());
                }
            }
        }
    }

    async fn fetch_identity(&self) -> anyhow::Result<IdentityMetrics> {
        let identities = self.kratos.list_identities().await?;
        Ok(reduce_identities(&identities, Utc::now()))
    }

    async fn fetch_session(&self) -> anyhow::Result<SessionMetrics> {
        let now = Utc::now();
        let sessions = self
            .kratos
            .list_sessions_until(now - chrono::Duration::days(SESSION_LOOKBACK_DAYS))
            .await?;

        let ips = device_ips(&sessions);
        let resolved = self.geo.resolve_ips(&ips).await;
        let geo_points = cluster_geo_results(&resolved);

        Ok(reduce_sessions(&sessions, geo_points, now))
    }

    async fn fetch_system(&self) -> anyhow::Result<SystemMetrics> {
        let schemas = self.kratos.list_schemas().await?;
        Ok(reduce_system(&schemas, Utc::now()))
    }

    async fn fetch_hydra(&self) -> anyhow::Result<HydraMetrics> {
        let Some(hydra) = &self.hydra else {
            anyhow::bail!("OAuth2 service is not configured");
        };
        let clients = hydra.list_clients().await?;
        Ok(reduce_clients(&clients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_aggregator() -> Aggregator {
        let kratos = KratosClient::new("http://127.0.0.1:1");
        let health = Arc::new(HealthGate::new(
            KratosClient::new("http://127.0.0.1:1"),
            None,
            false,
        ));
        Aggregator::new(kratos, None, GeoResolver::new("http://127.0.0.1:1"), health)
    }

    #[tokio::test]
    async fn test_unreachable_identity_service_yields_error_without_data() {
        let aggregator = unreachable_aggregator();

        let combined = aggregator.snapshot().await;

        assert!(combined.is_error);
        assert!(combined.is_loading);
        assert!(!combined.hydra_available);
        assert!(combined.identity.data.is_none());
        assert!(combined.session.data.is_none());
    }

    #[tokio::test]
    async fn test_disabled_hydra_reports_no_data_and_no_error() {
        let aggregator = unreachable_aggregator();

        let combined = aggregator.snapshot().await;

        assert!(!combined.hydra_available);
        assert!(combined.hydra.data.is_none());
        assert!(!combined.hydra.is_error);
    }

    #[test]
    fn test_slot_keeps_stale_data_on_fetch_error() {
        let mut slot = Slot::empty();
        slot.absorb(Ok(41usize), "test");
        slot.absorb(Err(anyhow::anyhow!("boom")), "test");

        let snapshot = slot.snapshot();
        assert_eq!(snapshot.data, Some(41));
        assert!(snapshot.is_error);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_slot_error_does_not_extend_freshness() {
        let mut slot: Slot<usize> = Slot::empty();
        slot.absorb(Err(anyhow::anyhow!("boom")), "test");
        assert!(!slot.is_fresh(Duration::from_secs(60)));

        slot.absorb(Ok(1), "test");
        assert!(slot.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn test_combined_payload_uses_camel_case_keys() {
        let snapshot: DomainSnapshot<usize> = Slot::empty().snapshot();
        let combined = serde_json::to_value(CombinedAnalytics {
            identity: DomainSnapshot {
                data: None,
                is_loading: true,
                is_error: false,
                error: None,
            },
            session: DomainSnapshot {
                data: None,
                is_loading: true,
                is_error: false,
                error: None,
            },
            system: DomainSnapshot {
                data: None,
                is_loading: true,
                is_error: false,
                error: None,
            },
            hydra: DomainSnapshot {
                data: None,
                is_loading: snapshot.is_loading,
                is_error: false,
                error: None,
            },
            is_loading: true,
            is_error: false,
            hydra_available: false,
        })
        .unwrap();

        assert!(combined.get("isLoading").is_some());
        assert!(combined.get("isError").is_some());
        assert!(combined.get("hydraAvailable").is_some());
    }
}
