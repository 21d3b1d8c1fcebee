//! IP geolocation: batched resolution and spatial clustering.
//!
//! Device IPs from session records are resolved to coordinates through an
//! external bulk lookup service and clustered onto a coarse 0.5-degree grid
//! for the session-locations heat map.
//!
//! Geography is best-effort throughout: private and loopback ranges are
//! dropped without a network call, a failed batch marks every member
//! permanently unresolvable for the process lifetime, and the resolver never
//! raises an error to the caller. The cache is append-only; an entry is
//! written once (resolved or [`Unresolvable`]) and never changes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::GeoPoint;

/// Maximum IPs per batch request, the bulk endpoint's documented limit.
const MAX_BATCH: usize = 100;

/// Fields requested from the bulk lookup endpoint.
const BATCH_FIELDS: &str = "query,lat,lon,city,country,countryCode,status";

/// An IP that could not be resolved: private/loopback, rejected by the
/// lookup service, or part of a failed batch. Cached for the process
/// lifetime; never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("IP address could not be resolved to a location")]
pub struct Unresolvable;

/// A successfully resolved IP address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoResult {
    pub ip: String,
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub country: String,
    pub country_code: String,

    /// `"city, CC"` display label.
    pub label: String,
}

/// One entry of the bulk endpoint's response array.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    #[serde(default)]
    query: String,

    #[serde(default)]
    status: String,

    #[serde(default)]
    lat: Option<f64>,

    #[serde(default)]
    lon: Option<f64>,

    #[serde(default)]
    city: Option<String>,

    #[serde(default)]
    country: Option<String>,

    #[serde(default, rename = "countryCode")]
    country_code: Option<String>,
}

impl BatchEntry {
    fn into_result(self) -> Result<GeoResult, Unresolvable> {
        if self.status != "success" {
            return Err(Unresolvable);
        }
        let (lat, lng) = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(Unresolvable),
        };

        let city = self.city.unwrap_or_default();
        let country = self.country.unwrap_or_default();
        let country_code = self.country_code.unwrap_or_default();
        let label = if !city.is_empty() && !country_code.is_empty() {
            format!("{}, {}", city, country_code)
        } else if !country.is_empty() {
            country.clone()
        } else {
            "Unknown".to_string()
        };

        Ok(GeoResult {
            ip: self.query,
            lat,
            lng,
            city: if city.is_empty() { "Unknown".to_string() } else { city },
            country: if country.is_empty() { "Unknown".to_string() } else { country },
            country_code,
            label,
        })
    }
}

/// Resolver over the bulk lookup service with a process-lifetime cache.
pub struct GeoResolver {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<HashMap<String, Result<GeoResult, Unresolvable>>>,
}

impl GeoResolver {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a list of IP addresses to geographic results.
    ///
    /// Input may contain duplicates; the returned list preserves the input
    /// multiplicity of every resolvable IP (so cluster counts reflect how
    /// many sessions came from a location, not how many distinct IPs).
    pub async fn resolve_ips(&self, ips: &[String]) -> Vec<GeoResult> {
        // Work out what still needs a network call.
        let mut pending: Vec<String> = Vec::new();
        {
            let mut cache = self.cache.lock().expect("geo cache poisoned");
            let mut seen: HashSet<&str> = HashSet::new();
            for ip in ips {
                if !seen.insert(ip.as_str()) || cache.contains_key(ip) {
                    continue;
                }
                if is_local_ip(ip) {
                    cache.insert(ip.clone(), Err(Unresolvable));
                } else {
                    pending.push(ip.clone());
                }
            }
        }

        for batch in pending.chunks(MAX_BATCH) {
            match self.lookup_batch(batch).await {
                Ok(entries) => {
                    let mut cache = self.cache.lock().expect("geo cache poisoned");
                    for entry in entries {
                        let ip = entry.query.clone();
                        cache.entry(ip).or_insert_with(|| entry.into_result());
                    }
                    // Anything the service did not echo back stays unresolvable.
                    for ip in batch {
                        cache.entry(ip.clone()).or_insert(Err(Unresolvable));
                    }
                }
                Err(e) => {
                    warn!(batch_size = batch.len(), error = %e, "Geo batch lookup failed");
                    let mut cache = self.cache.lock().expect("geo cache poisoned");
                    for ip in batch {
                        cache.entry(ip.clone()).or_insert(Err(Unresolvable));
                    }
                }
            }
        }

        let cache = self.cache.lock().expect("geo cache poisoned");
        ips.iter()
            .filter_map(|ip| cache.get(ip).and_then(|r| r.clone().ok()))
            .collect()
    }

    async fn lookup_batch(&self, ips: &[String]) -> anyhow::Result<Vec<BatchEntry>> {
        let url = format!("{}/batch?fields={}", self.base_url, BATCH_FIELDS);
        let response = self.client.post(&url).json(&ips).send().await?;
        let entries = response.error_for_status()?.json::<Vec<BatchEntry>>().await?;
        Ok(entries)
    }
}

/// Cluster resolved points onto the 0.5-degree grid.
///
/// Points are grouped by rounded coordinates, counts summed per cell, and the
/// first point's label kept for the cell. Output is sorted by descending
/// count; ties keep an arbitrary but complete ordering, so the cluster set is
/// stable under input reordering.
pub fn cluster_geo_results(results: &[GeoResult]) -> Vec<GeoPoint> {
    let mut clusters: HashMap<(i64, i64), GeoPoint> = HashMap::new();

    for r in results {
        let lat = (r.lat * 2.0).round() / 2.0;
        let lng = (r.lng * 2.0).round() / 2.0;
        let key = ((lat * 2.0) as i64, (lng * 2.0) as i64);

        clusters
            .entry(key)
            .and_modify(|point| point.count += 1)
            .or_insert_with(|| GeoPoint {
                lat,
                lng,
                label: r.label.clone(),
                count: 1,
            });
    }

    let mut points: Vec<GeoPoint> = clusters.into_values().collect();
    points.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.lat.partial_cmp(&b.lat).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.lng.partial_cmp(&b.lng).unwrap_or(std::cmp::Ordering::Equal))
    });
    points
}

/// Check if an IP is local / private / loopback.
fn is_local_ip(ip: &str) -> bool {
    if let Ok(addr) = ip.parse::<std::net::IpAddr>() {
        return match addr {
            std::net::IpAddr::V4(v4) => {
                v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
            }
            std::net::IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
                    || (v6.segments()[0] & 0xffc0) == 0xfe80 // link local fe80::/10
            }
        };
    }
    // Unparseable input never reaches the network.
    true
}
