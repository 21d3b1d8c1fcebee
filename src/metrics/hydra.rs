//! OAuth2 client reducer: public/confidential classification and grant-type
//! usage across the registered client inventory.
//!
//! The OAuth2 service is optional, so this domain degrades instead of
//! failing: an upstream error reduces to [`HydraMetrics::degraded`] (zeroed
//! values, `Error` health) rather than propagating.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::OAuth2Client;

use super::SystemHealth;

/// Client count per OAuth2 grant type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantTypeCount {
    pub grant_type: String,
    pub count: usize,
}

/// Derived OAuth2 client metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydraMetrics {
    pub total_clients: usize,
    pub public_clients: usize,
    pub confidential_clients: usize,

    /// A client contributes to every grant type it declares.
    pub clients_by_grant_type: Vec<GrantTypeCount>,

    pub system_health: SystemHealth,
}

impl HydraMetrics {
    /// Zeroed metrics with an error health flag, returned when the upstream
    /// listing fails.
    pub fn degraded() -> Self {
        Self {
            total_clients: 0,
            public_clients: 0,
            confidential_clients: 0,
            clients_by_grant_type: Vec::new(),
            system_health: SystemHealth::Error,
        }
    }
}

/// Reduce the OAuth2 client listing into [`HydraMetrics`].
pub fn reduce_clients(clients: &[OAuth2Client]) -> HydraMetrics {
    let public_clients = clients.iter().filter(|c| c.is_public()).count();

    let mut grant_counts: HashMap<&str, usize> = HashMap::new();
    for client in clients {
        for grant in &client.grant_types {
            *grant_counts.entry(grant.as_str()).or_insert(0) += 1;
        }
    }
    let mut clients_by_grant_type: Vec<GrantTypeCount> = grant_counts
        .into_iter()
        .map(|(grant_type, count)| GrantTypeCount {
            grant_type: grant_type.to_string(),
            count,
        })
        .collect();
    clients_by_grant_type
        .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.grant_type.cmp(&b.grant_type)));

    HydraMetrics {
        total_clients: clients.len(),
        public_clients,
        confidential_clients: clients.len() - public_clients,
        clients_by_grant_type,
        system_health: SystemHealth::Healthy,
    }
}
