//! Environment configuration for the console server.
//!
//! Configuration is loaded once at startup, before the health gate or the
//! aggregator run: every component that needs a setting receives it by value
//! or reference, so nothing can observe a "settings not yet loaded" state.

use std::env;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default identity service (Kratos) admin base URL.
pub const DEFAULT_KRATOS_ADMIN_URL: &str = "http://localhost:4434";

/// Default OAuth2 service (Hydra) admin base URL.
pub const DEFAULT_HYDRA_ADMIN_URL: &str = "http://localhost:4445";

/// Default bulk IP geolocation endpoint.
pub const DEFAULT_GEO_API_URL: &str = "http://ip-api.com";

/// Runtime configuration, read from `ATHENA_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,

    /// Identity service admin base URL.
    pub kratos_admin_url: String,

    /// OAuth2 service admin base URL.
    pub hydra_admin_url: String,

    /// Whether the optional OAuth2 service is enabled at all. When false the
    /// health gate reports it as disabled and its widgets are hidden.
    pub hydra_enabled: bool,

    /// True when running against the managed cloud variant of the platform,
    /// which exposes no health probe endpoints. Health checks are skipped and
    /// assumed healthy.
    pub ory_network: bool,

    /// Base URL of the bulk IP geolocation service.
    pub geo_api_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            kratos_admin_url: DEFAULT_KRATOS_ADMIN_URL.to_string(),
            hydra_admin_url: DEFAULT_HYDRA_ADMIN_URL.to_string(),
            hydra_enabled: true,
            ory_network: false,
            geo_api_url: DEFAULT_GEO_API_URL.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: env::var("ATHENA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            kratos_admin_url: env::var("ATHENA_KRATOS_ADMIN_URL")
                .unwrap_or(defaults.kratos_admin_url),
            hydra_admin_url: env::var("ATHENA_HYDRA_ADMIN_URL").unwrap_or(defaults.hydra_admin_url),
            hydra_enabled: env::var("ATHENA_HYDRA_ENABLED")
                .ok()
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.hydra_enabled),
            ory_network: env::var("ATHENA_ORY_NETWORK")
                .ok()
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.ory_network),
            geo_api_url: env::var("ATHENA_GEO_API_URL").unwrap_or(defaults.geo_api_url),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.hydra_enabled);
        assert!(!config.ory_network);
    }

    #[test]
    fn test_parse_bool_variants() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }
}
