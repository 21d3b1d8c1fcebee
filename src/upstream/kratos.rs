//! Identity service (Kratos) admin API client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{Identity, IdentitySchema, Session};

/// Page size for identity and session listings.
const PAGE_SIZE: usize = 250;

/// Maximum identity pages fetched per aggregation cycle.
const MAX_IDENTITY_PAGES: usize = 20;

/// Maximum session pages fetched per aggregation cycle.
const MAX_SESSION_PAGES: usize = 10;

/// Timeout for the readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Client for the identity service admin API.
#[derive(Clone)]
pub struct KratosClient {
    client: reqwest::Client,
    base_url: String,
}

impl KratosClient {
    /// Create a client against the given admin base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the identity inventory, bounded to `MAX_IDENTITY_PAGES` pages of
    /// `PAGE_SIZE` records.
    pub async fn list_identities(&self) -> anyhow::Result<Vec<Identity>> {
        let mut identities = Vec::new();

        for page in 1..=MAX_IDENTITY_PAGES {
            let url = format!(
                "{}/admin/identities?per_page={}&page={}",
                self.base_url, PAGE_SIZE, page
            );
            let batch: Vec<Identity> = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let len = batch.len();
            identities.extend(batch);
            debug!(page, fetched = identities.len(), "Fetched identity page");

            if len < PAGE_SIZE {
                break;
            }
        }

        Ok(identities)
    }

    /// Fetch sessions newer than `until`, expanded with identity and device
    /// sub-records, bounded to `MAX_SESSION_PAGES` pages.
    ///
    /// Paging stops early once a page reaches records older than the cutoff;
    /// records past the cutoff are dropped from the result.
    pub async fn list_sessions_until(&self, until: DateTime<Utc>) -> anyhow::Result<Vec<Session>> {
        let mut sessions: Vec<Session> = Vec::new();

        for page in 1..=MAX_SESSION_PAGES {
            let url = format!(
                "{}/admin/sessions?per_page={}&page={}&expand=identity&expand=devices",
                self.base_url, PAGE_SIZE, page
            );
            let batch: Vec<Session> = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let len = batch.len();
            let reached_cutoff = batch
                .iter()
                .any(|s| s.authenticated_at.is_some_and(|t| t < until));
            sessions.extend(batch);
            debug!(page, fetched = sessions.len(), "Fetched session page");

            if len < PAGE_SIZE || reached_cutoff {
                break;
            }
        }

        sessions.retain(|s| s.authenticated_at.is_none_or(|t| t >= until));
        Ok(sessions)
    }

    /// Fetch the identity schema inventory (single bounded page).
    pub async fn list_schemas(&self) -> anyhow::Result<Vec<IdentitySchema>> {
        let url = format!("{}/schemas?per_page=500", self.base_url);
        let schemas = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(schemas)
    }

    /// Lightweight readiness probe.
    pub async fn check_ready(&self) -> anyhow::Result<()> {
        let url = format!("{}/health/ready", self.base_url);
        self.client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fetch the full raw identity record, including metadata.
    pub async fn get_identity_raw(&self, id: &str) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/admin/identities/{}", self.base_url, urlencoding::encode(id));
        let identity = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(identity)
    }

    /// Replace an identity record (admin PUT with the full body).
    pub async fn put_identity_raw(
        &self,
        id: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let url = format!("{}/admin/identities/{}", self.base_url, urlencoding::encode(id));
        self.client
            .put(&url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
