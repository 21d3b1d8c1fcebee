//! Athena Console - analytics aggregation and adaptive dashboard layout for
//! an identity platform.
//!
//! # Overview
//!
//! The console sits in front of an Ory Kratos identity service and an
//! optional Ory Hydra OAuth2 service. It pulls raw identities, sessions,
//! schemas, and OAuth2 clients from their admin APIs, reduces them into
//! dashboard-ready metrics, and manages a per-user customizable widget grid
//! whose layout is persisted into the user's identity record.
//!
//! The moving parts:
//!
//! - [`upstream`] - thin admin-API clients for Kratos and Hydra
//! - [`health`] - cached reachability gate in front of the upstreams
//! - [`metrics`] - pure reducers from raw records to metric snapshots
//! - [`geo`] - batch IP geolocation with clustering for the session map
//! - [`aggregator`] - per-domain caching and the combined analytics view
//! - [`layout`] - widget catalogue and the default grid packing
//! - [`layout_store`] - per-user layout state with debounced persistence
//! - [`api`] - the HTTP surface tying it all together
//!
//! # API Endpoints
//!
//! - `GET /health` - liveness and upstream reachability
//! - `GET /api/analytics` - combined analytics snapshot
//! - `POST /api/analytics/refresh` - drop caches and refetch
//! - `GET /api/dashboard` - composed layout plus analytics for rendering
//! - `GET /api/dashboard/widgets` - widget catalogue
//! - `GET|PUT /api/dashboard/layout` - load / replace the widget grid
//! - `POST|DELETE /api/dashboard/widgets/{id}` - add / hide a widget
//! - `PUT /api/dashboard/widgets/{id}/size` - resize a widget
//! - `POST /api/dashboard/layout/reset` - back to the default grid

pub mod aggregator;
pub mod api;
pub mod config;
pub mod geo;
pub mod health;
pub mod layout;
pub mod layout_store;
pub mod metrics;
pub mod model;
pub mod upstream;
