//! OAuth2 service (Hydra) admin API client.

use std::time::Duration;

use crate::model::OAuth2Client;

/// The client inventory is fetched as a single large page.
const CLIENT_PAGE_SIZE: usize = 500;

/// Timeout for the readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Client for the OAuth2 service admin API.
#[derive(Clone)]
pub struct HydraClient {
    client: reqwest::Client,
    base_url: String,
}

impl HydraClient {
    /// Create a client against the given admin base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the OAuth2 client inventory (single bounded page).
    pub async fn list_clients(&self) -> anyhow::Result<Vec<OAuth2Client>> {
        let url = format!("{}/admin/clients?page_size={}", self.base_url, CLIENT_PAGE_SIZE);
        let clients = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(clients)
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
}
