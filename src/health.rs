//! Health gate: decides whether an upstream service may be queried.
//!
//! The aggregator never invokes a reducer's fetch for a service that has not
//! first reported healthy here. Three cases short-circuit the network probe:
//!
//! - managed-cloud deployments expose no probe endpoint, so health is assumed
//! - a service toggled off in configuration reports `disabled` (unhealthy,
//!   but deliberately not an error state)
//! - a recent positive result is served from a short cache window
//!
//! A failed probe is retried once and never cached, so the next aggregation
//! cycle probes again.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::ServiceHealth;
use crate::upstream::{HydraClient, KratosClient};

/// How long a positive health result is trusted without a new probe.
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(120);

/// The upstream services the gate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Kratos,
    Hydra,
}

impl Service {
    fn label(&self) -> &'static str {
        match self {
            Service::Kratos => "kratos",
            Service::Hydra => "hydra",
        }
    }
}

/// Health gate over the identity and OAuth2 services.
pub struct HealthGate {
    kratos: KratosClient,

    /// `None` when the OAuth2 service is disabled in configuration.
    hydra: Option<HydraClient>,

    /// Managed-cloud deployments skip probes entirely.
    ory_network: bool,

    cache_ttl: Duration,
    cache: Mutex<HashMap<Service, (ServiceHealth, Instant)>>,
}

impl HealthGate {
    pub fn new(kratos: KratosClient, hydra: Option<HydraClient>, ory_network: bool) -> Self {
        Self {
            kratos,
            hydra,
            ory_network,
            cache_ttl: HEALTH_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the positive cache window (used in tests).
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Check health for one service, serving recent positive results from
    /// cache.
    pub async fn check(&self, service: Service) -> ServiceHealth {
        {
            let cache = self.cache.lock().await;
            if let Some((health, at)) = cache.get(&service) {
                if at.elapsed() < self.cache_ttl {
                    return health.clone();
                }
            }
        }

        let health = self.probe(service).await;

        // Only positive (or deliberately disabled) results are cached; a
        // failed probe is re-attempted on the next cycle.
        if health.is_healthy || health.disabled {
            let mut cache = self.cache.lock().await;
            cache.insert(service, (health.clone(), Instant::now()));
        }

        health
    }

    /// Drop all cached results; the next check probes again.
    pub async fn invalidate(&self) {
        self.cache.lock().await.clear();
    }

    async fn probe(&self, service: Service) -> ServiceHealth {
        if service == Service::Hydra && self.hydra.is_none() {
            debug!(service = service.label(), "Service disabled in configuration");
            return ServiceHealth::disabled();
        }

        // The managed cloud variant has no probe endpoint.
        if self.ory_network {
            return ServiceHealth::healthy();
        }

        let result = match (service, &self.hydra) {
            (Service::Kratos, _) => self.probe_with_retry(|| self.kratos.check_ready()).await,
            (Service::Hydra, Some(hydra)) => {
                self.probe_with_retry(|| hydra.check_ready()).await
            }
            (Service::Hydra, None) => return ServiceHealth::disabled(),
        };

        match result {
            Ok(()) => ServiceHealth::healthy(),
            Err(e) => {
                warn!(service = service.label(), error = %e, "Health probe failed");
                ServiceHealth::unhealthy(format!("{} is not reachable: {}", service.label(), e))
            }
        }
    }

    async fn probe_with_retry<F, Fut>(&self, probe: F) -> anyhow::Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        match probe().await {
            Ok(()) => Ok(()),
            Err(_) => probe().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_kratos() -> KratosClient {
        KratosClient::new("http://127.0.0.1:1")
    }

    #[tokio::test]
    async fn test_disabled_hydra_is_not_an_error() {
        let gate = HealthGate::new(unreachable_kratos(), None, false);

        let health = gate.check(Service::Hydra).await;

        assert!(!health.is_healthy);
        assert!(health.disabled);
        assert!(health.error.is_none());
    }

    #[tokio::test]
    async fn test_managed_cloud_skips_probe() {
        // Both base URLs point nowhere; a probe attempt would fail.
        let gate = HealthGate::new(
            unreachable_kratos(),
            Some(HydraClient::new("http://127.0.0.1:1")),
            true,
        );

        assert!(gate.check(Service::Kratos).await.is_healthy);
        assert!(gate.check(Service::Hydra).await.is_healthy);
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_unhealthy() {
        let gate = HealthGate::new(unreachable_kratos(), None, false);

        let health = gate.check(Service::Kratos).await;

        assert!(!health.is_healthy);
        assert!(!health.disabled);
        assert!(health.error.as_deref().unwrap_or("").contains("kratos"));
    }

    #[tokio::test]
    async fn test_failed_probe_is_not_cached() {
        let gate = HealthGate::new(unreachable_kratos(), None, false);

        let _ = gate.check(Service::Kratos).await;
        let cache = gate.cache.lock().await;
        assert!(!cache.contains_key(&Service::Kratos));
    }

    #[tokio::test]
    async fn test_positive_result_is_cached() {
        let gate = HealthGate::new(unreachable_kratos(), None, true);

        let _ = gate.check(Service::Kratos).await;
        let cache = gate.cache.lock().await;
        assert!(cache.contains_key(&Service::Kratos));
    }
}
