//! HTTP API handlers for the admin console.
//!
//! Analytics endpoints are open to whoever can reach the server; the
//! dashboard layout endpoints act on behalf of a user and require the
//! console session cookie. The cookie is issued elsewhere, this server only
//! reads the identity id out of it.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::COOKIE},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::aggregator::{Aggregator, CombinedAnalytics};
use crate::health::{HealthGate, Service};
use crate::layout::{DashboardLayout, WidgetDefinition, WidgetId, WidgetLayoutItem};
use crate::layout_store::{LayoutError, LayoutService};
use crate::model::ServiceHealth;

/// Name of the console session cookie.
pub const SESSION_COOKIE: &str = "athena-session";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub layouts: Arc<LayoutService>,
    pub health: Arc<HealthGate>,
}

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/analytics", get(get_analytics))
        .route("/api/analytics/refresh", post(post_analytics_refresh))
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/dashboard/widgets", get(get_widget_catalogue))
        .route("/api/dashboard/layout", get(get_layout).put(put_layout))
        .route("/api/dashboard/layout/reset", post(post_layout_reset))
        .route(
            "/api/dashboard/widgets/:id",
            post(post_widget).delete(delete_widget),
        )
        .route("/api/dashboard/widgets/:id/size", put(put_widget_size))
        .with_state(state)
}

// ============================================================================
// Session handling
// ============================================================================

#[derive(Debug, Deserialize)]
struct SessionCookie {
    user: SessionUser,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    #[serde(rename = "kratosIdentityId")]
    kratos_identity_id: String,
}

/// Extract the identity id from the session cookie, or reject with 401.
///
/// The cookie value is a URL-encoded JSON document of the shape
/// `{"user":{"kratosIdentityId":"..."}}`.
fn session_principal(headers: &HeaderMap) -> Result<String, StatusCode> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            if name != SESSION_COOKIE {
                continue;
            }
            let decoded = match urlencoding::decode(value) {
                Ok(decoded) => decoded,
                Err(_) => continue,
            };
            match serde_json::from_str::<SessionCookie>(&decoded) {
                Ok(session) => return Ok(session.user.kratos_identity_id),
                Err(error) => {
                    warn!(%error, "session cookie present but unreadable");
                }
            }
        }
    }
    Err(StatusCode::UNAUTHORIZED)
}

fn layout_error_response(error: LayoutError) -> StatusCode {
    match error {
        LayoutError::NotPlaced(id) => {
            info!(widget = %id, "widget not on the dashboard");
            StatusCode::NOT_FOUND
        }
        LayoutError::AlreadyPlaced(id) => {
            info!(widget = %id, "widget already on the dashboard");
            StatusCode::CONFLICT
        }
        LayoutError::InvalidLayout => StatusCode::BAD_REQUEST,
        LayoutError::Backend(error) => {
            warn!(%error, "layout backend request failed");
            StatusCode::BAD_GATEWAY
        }
    }
}

fn parse_widget_id(raw: &str) -> Result<WidgetId, StatusCode> {
    raw.parse().map_err(|_| {
        info!(widget = raw, "unknown widget id");
        StatusCode::NOT_FOUND
    })
}

// ============================================================================
// Health and analytics
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub kratos: ServiceHealth,
    pub hydra: ServiceHealth,
}

/// GET /health - Liveness plus upstream reachability.
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let kratos = state.health.check(Service::Kratos).await;
    let hydra = state.health.check(Service::Hydra).await;
    Json(HealthResponse {
        status: "ok",
        kratos,
        hydra,
    })
}

/// GET /api/analytics - Combined analytics snapshot across all domains.
#[instrument(skip(state))]
pub async fn get_analytics(State(state): State<AppState>) -> Json<CombinedAnalytics> {
    let combined = state.aggregator.snapshot().await;
    info!(
        is_error = combined.is_error,
        hydra_available = combined.hydra_available,
        "Analytics queried"
    );
    Json(combined)
}

/// POST /api/analytics/refresh - Drop every cache and fetch fresh numbers.
#[instrument(skip(state))]
pub async fn post_analytics_refresh(State(state): State<AppState>) -> Json<CombinedAnalytics> {
    state.aggregator.refetch_all().await;
    let combined = state.aggregator.snapshot().await;
    info!(is_error = combined.is_error, "Analytics refreshed");
    Json(combined)
}

// ============================================================================
// Dashboard layout
// ============================================================================

/// Composed dashboard view: the user's layout with capability filtering
/// applied, the widgets that can still be added, and the analytics snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub widgets: Vec<WidgetLayoutItem>,
    pub available_widgets: Vec<WidgetId>,
    pub version: u32,
    pub hydra_available: bool,
    pub analytics: CombinedAnalytics,
}

/// GET /api/dashboard - Everything a dashboard render needs in one call.
#[instrument(skip(state, headers))]
pub async fn get_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardResponse>, StatusCode> {
    let principal = session_principal(&headers)?;
    let store = state.layouts.store_for(&principal).await;

    let layout = store.layout().await.map_err(layout_error_response)?;
    let analytics = state.aggregator.snapshot().await;
    let hydra_available = analytics.hydra_available;

    info!(
        widget_count = layout.widgets.len(),
        hydra_available, "Dashboard composed"
    );
    Ok(Json(DashboardResponse {
        widgets: layout.visible_widgets(hydra_available),
        available_widgets: layout.addable_widgets(hydra_available),
        version: layout.version,
        hydra_available,
        analytics,
    }))
}

/// GET /api/dashboard/widgets - The static widget catalogue.
pub async fn get_widget_catalogue() -> Json<Vec<WidgetDefinition>> {
    Json(WidgetId::ALL.iter().map(|id| id.definition()).collect())
}

/// GET /api/dashboard/layout - The user's raw layout, unfiltered.
#[instrument(skip(state, headers))]
pub async fn get_layout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardLayout>, StatusCode> {
    let principal = session_principal(&headers)?;
    let store = state.layouts.store_for(&principal).await;
    let layout = store.layout().await.map_err(layout_error_response)?;
    Ok(Json(layout))
}

#[derive(Debug, Deserialize)]
pub struct UpdateLayoutRequest {
    pub widgets: Vec<WidgetLayoutItem>,
}

/// PUT /api/dashboard/layout - Replace all widget placements.
#[instrument(skip(state, headers, request))]
pub async fn put_layout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateLayoutRequest>,
) -> Result<Json<DashboardLayout>, StatusCode> {
    let principal = session_principal(&headers)?;
    let store = state.layouts.store_for(&principal).await;

    let layout = store
        .update_layout(request.widgets)
        .await
        .map_err(layout_error_response)?;
    info!(widget_count = layout.widgets.len(), "Layout updated");
    Ok(Json(layout))
}

/// POST /api/dashboard/widgets/:id - Add a hidden widget back to the grid.
#[instrument(skip(state, headers))]
pub async fn post_widget(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DashboardLayout>, StatusCode> {
    let principal = session_principal(&headers)?;
    let id = parse_widget_id(&id)?;
    let store = state.layouts.store_for(&principal).await;

    let layout = store.add_widget(id).await.map_err(layout_error_response)?;
    info!(widget = %id, "Widget added");
    Ok(Json(layout))
}

/// DELETE /api/dashboard/widgets/:id - Hide a widget.
#[instrument(skip(state, headers))]
pub async fn delete_widget(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DashboardLayout>, StatusCode> {
    let principal = session_principal(&headers)?;
    let id = parse_widget_id(&id)?;
    let store = state.layouts.store_for(&principal).await;

    let layout = store
        .remove_widget(id)
        .await
        .map_err(layout_error_response)?;
    info!(widget = %id, "Widget removed");
    Ok(Json(layout))
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub w: u32,
    pub h: u32,
}

/// PUT /api/dashboard/widgets/:id/size - Resize a placed widget.
#[instrument(skip(state, headers))]
pub async fn put_widget_size(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ResizeRequest>,
) -> Result<Json<DashboardLayout>, StatusCode> {
    let principal = session_principal(&headers)?;
    let id = parse_widget_id(&id)?;
    let store = state.layouts.store_for(&principal).await;

    let layout = store
        .resize_widget(id, request.w, request.h)
        .await
        .map_err(layout_error_response)?;
    info!(widget = %id, w = request.w, h = request.h, "Widget resized");
    Ok(Json(layout))
}

/// POST /api/dashboard/layout/reset - Back to the default layout.
#[instrument(skip(state, headers))]
pub async fn post_layout_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardLayout>, StatusCode> {
    let principal = session_principal(&headers)?;
    let store = state.layouts.store_for(&principal).await;

    let layout = store
        .reset_to_default()
        .await
        .map_err(layout_error_response)?;
    info!("Layout reset to default");
    Ok(Json(layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_session_principal_reads_encoded_cookie() {
        let cookie = format!(
            "{}={}",
            SESSION_COOKIE,
            urlencoding::encode(r#"{"user":{"kratosIdentityId":"id-123"}}"#)
        );
        let headers = headers_with_cookie(&cookie);

        assert_eq!(session_principal(&headers).unwrap(), "id-123");
    }

    #[test]
    fn test_session_principal_skips_other_cookies() {
        let cookie = format!(
            "theme=dark; {}={}; lang=en",
            SESSION_COOKIE,
            urlencoding::encode(r#"{"user":{"kratosIdentityId":"id-123"}}"#)
        );
        let headers = headers_with_cookie(&cookie);

        assert_eq!(session_principal(&headers).unwrap(), "id-123");
    }

    #[test]
    fn test_missing_session_is_unauthorized() {
        assert_eq!(
            session_principal(&HeaderMap::new()),
            Err(StatusCode::UNAUTHORIZED)
        );

        let headers = headers_with_cookie("theme=dark");
        assert_eq!(session_principal(&headers), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_malformed_session_is_unauthorized() {
        let headers = headers_with_cookie(&format!("{SESSION_COOKIE}=not-json"));
        assert_eq!(session_principal(&headers), Err(StatusCode::UNAUTHORIZED));
    }
}
