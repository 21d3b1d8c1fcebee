//! Upstream service clients.
//!
//! Thin, typed wrappers over the admin APIs the console aggregates from:
//!
//! - [`kratos`]: the identity service (identities, sessions, schemas, and the
//!   per-identity metadata where dashboard layouts are persisted)
//! - [`hydra`]: the optional OAuth2/OIDC service (client inventory)
//!
//! Every listing is bounded (page-size and max-page ceilings, plus a lookback
//! cutoff for sessions), so an aggregation cycle builds bounded in-memory
//! collections rather than scanning unbounded upstream data. Clients take
//! their base URL at construction, which is also how tests point them at mock
//! servers.

pub mod hydra;
pub mod kratos;

pub use hydra::HydraClient;
pub use kratos::KratosClient;
