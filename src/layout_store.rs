//! Per-user dashboard layout state with debounced persistence.
//!
//! Each authenticated user gets one [`LayoutStore`], handed out by the
//! [`LayoutService`] registry. The store lazily loads the persisted layout on
//! first use, rebuilds and re-persists the default layout when the stored
//! copy is missing, invalid, or from an older schema version, and writes mutations
//! back through a [`LayoutBackend`] after a short debounce so that a drag
//! burst collapses into a single save. The last scheduled snapshot wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::layout::{
    build_default_layout, DashboardLayout, WidgetId, WidgetLayoutItem, GRID_COLUMNS, LAYOUT_VERSION,
};
use crate::upstream::KratosClient;

/// Delay between the last mutation and the persistence write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Errors surfaced by layout mutations.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("widget {0} is not on the dashboard")]
    NotPlaced(WidgetId),
    #[error("widget {0} is already on the dashboard")]
    AlreadyPlaced(WidgetId),
    #[error("layout failed validation")]
    InvalidLayout,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

// ============================================================================
// Persistence backends
// ============================================================================

/// Storage seam for dashboard layouts, keyed by the owning user id.
#[async_trait]
pub trait LayoutBackend: Send + Sync {
    /// Load the stored layout, or `None` when the user has never saved one.
    async fn load(&self, principal: &str) -> anyhow::Result<Option<DashboardLayout>>;

    /// Persist the layout for this user, replacing any previous copy.
    async fn save(&self, principal: &str, layout: &DashboardLayout) -> anyhow::Result<()>;
}

/// Persists layouts into the user's identity record, under
/// `metadata_public.dashboardLayout`, so the layout follows the user across
/// devices without a dedicated database.
pub struct KratosLayoutBackend {
    kratos: KratosClient,
}

impl KratosLayoutBackend {
    pub fn new(kratos: KratosClient) -> Self {
        Self { kratos }
    }
}

#[async_trait]
impl LayoutBackend for KratosLayoutBackend {
    async fn load(&self, principal: &str) -> anyhow::Result<Option<DashboardLayout>> {
        let identity = self.kratos.get_identity_raw(principal).await?;
        let Some(raw) = identity.pointer("/metadata_public/dashboardLayout") else {
            return Ok(None);
        };
        if raw.is_null() {
            return Ok(None);
        }
        match serde_json::from_value(raw.clone()) {
            Ok(layout) => Ok(Some(layout)),
            Err(error) => {
                warn!(%principal, %error, "stored dashboard layout is unreadable, ignoring it");
                Ok(None)
            }
        }
    }

    async fn save(&self, principal: &str, layout: &DashboardLayout) -> anyhow::Result<()> {
        let mut identity = self.kratos.get_identity_raw(principal).await?;

        let mut metadata = identity
            .get("metadata_public")
            .cloned()
            .unwrap_or(Value::Null);
        if !metadata.is_object() {
            metadata = json!({});
        }
        metadata["dashboardLayout"] = serde_json::to_value(layout)?;

        // The admin update endpoint replaces the whole identity, so the
        // untouched fields have to be carried over.
        let mut body = serde_json::Map::new();
        body.insert("schema_id".into(), identity["schema_id"].take());
        body.insert("traits".into(), identity["traits"].take());
        if let Some(state) = identity.get("state").filter(|v| !v.is_null()) {
            body.insert("state".into(), state.clone());
        }
        if let Some(admin) = identity.get("metadata_admin").filter(|v| !v.is_null()) {
            body.insert("metadata_admin".into(), admin.clone());
        }
        body.insert("metadata_public".into(), metadata);

        self.kratos
            .put_identity_raw(principal, &Value::Object(body))
            .await
    }
}

// ============================================================================
// Layout store
// ============================================================================

struct StoreState {
    layout: Option<DashboardLayout>,
    pending_flush: Option<JoinHandle<()>>,
}

/// Mutable layout state for a single user.
pub struct LayoutStore {
    principal: String,
    backend: Arc<dyn LayoutBackend>,
    debounce: Duration,
    state: Mutex<StoreState>,
}

impl LayoutStore {
    pub fn new(principal: String, backend: Arc<dyn LayoutBackend>, debounce: Duration) -> Self {
        Self {
            principal,
            backend,
            debounce,
            state: Mutex::new(StoreState {
                layout: None,
                pending_flush: None,
            }),
        }
    }

    /// Current layout, loading from the backend on first access.
    pub async fn layout(&self) -> Result<DashboardLayout, LayoutError> {
        let mut state = self.state.lock().await;
        Ok(self.initialized(&mut state).await?.clone())
    }

    /// Replace the widget placements wholesale, as sent after a drag or
    /// resize interaction. Items for hidden widgets are dropped rather than
    /// resurrected; the hidden list is the stronger signal.
    pub async fn update_layout(
        &self,
        widgets: Vec<WidgetLayoutItem>,
    ) -> Result<DashboardLayout, LayoutError> {
        let mut state = self.state.lock().await;
        let layout = self.initialized(&mut state).await?;

        let hidden = layout.hidden_widgets.clone();
        let candidate = DashboardLayout {
            widgets: widgets
                .into_iter()
                .filter(|item| !hidden.contains(&item.i))
                .collect(),
            hidden_widgets: hidden,
            version: LAYOUT_VERSION,
        };
        if !candidate.is_valid() {
            return Err(LayoutError::InvalidLayout);
        }

        *layout = candidate;
        let snapshot = layout.clone();
        self.schedule_flush(&mut state, snapshot.clone());
        Ok(snapshot)
    }

    /// Remove a widget from the grid and remember it as hidden.
    pub async fn remove_widget(&self, id: WidgetId) -> Result<DashboardLayout, LayoutError> {
        let mut state = self.state.lock().await;
        let layout = self.initialized(&mut state).await?;

        if !layout.widgets.iter().any(|item| item.i == id) {
            return Err(LayoutError::NotPlaced(id));
        }
        layout.widgets.retain(|item| item.i != id);
        if !layout.hidden_widgets.contains(&id) {
            layout.hidden_widgets.push(id);
        }

        let snapshot = layout.clone();
        self.schedule_flush(&mut state, snapshot.clone());
        Ok(snapshot)
    }

    /// Bring a hidden widget back, placed at its default size in the first
    /// free row below everything else.
    pub async fn add_widget(&self, id: WidgetId) -> Result<DashboardLayout, LayoutError> {
        let mut state = self.state.lock().await;
        let layout = self.initialized(&mut state).await?;

        if layout.widgets.iter().any(|item| item.i == id) {
            return Err(LayoutError::AlreadyPlaced(id));
        }
        layout.hidden_widgets.retain(|hidden| *hidden != id);
        let y = layout.bottom();
        layout
            .widgets
            .push(WidgetLayoutItem::from_definition(&id.definition(), 0, y));

        let snapshot = layout.clone();
        self.schedule_flush(&mut state, snapshot.clone());
        Ok(snapshot)
    }

    /// Resize a placed widget, clamped to its catalogue bounds and the grid.
    pub async fn resize_widget(
        &self,
        id: WidgetId,
        w: u32,
        h: u32,
    ) -> Result<DashboardLayout, LayoutError> {
        let mut state = self.state.lock().await;
        let layout = self.initialized(&mut state).await?;

        let Some(item) = layout.widgets.iter_mut().find(|item| item.i == id) else {
            return Err(LayoutError::NotPlaced(id));
        };
        let def = id.definition();

        let mut w = w.max(def.min_w.unwrap_or(1));
        if let Some(max) = def.max_w {
            w = w.min(max);
        }
        item.w = w.min(GRID_COLUMNS - item.x);

        let mut h = h.max(def.min_h.unwrap_or(1));
        if let Some(max) = def.max_h {
            h = h.min(max);
        }
        item.h = h;

        let snapshot = layout.clone();
        self.schedule_flush(&mut state, snapshot.clone());
        Ok(snapshot)
    }

    /// Discard all customization and return to the default layout.
    pub async fn reset_to_default(&self) -> Result<DashboardLayout, LayoutError> {
        let mut state = self.state.lock().await;
        // Nothing from the stored layout survives a reset, so skip loading it.
        let layout = build_default_layout();
        state.layout = Some(layout.clone());
        self.schedule_flush(&mut state, layout.clone());
        Ok(layout)
    }

    async fn initialized<'a>(
        &self,
        state: &'a mut StoreState,
    ) -> Result<&'a mut DashboardLayout, LayoutError> {
        if state.layout.is_none() {
            let (layout, rebuilt) = match self.backend.load(&self.principal).await? {
                Some(stored) if stored.is_valid() => {
                    debug!(principal = %self.principal, "loaded stored dashboard layout");
                    (stored, false)
                }
                Some(stored) => {
                    info!(
                        principal = %self.principal,
                        stored_version = stored.version,
                        current_version = LAYOUT_VERSION,
                        "stored dashboard layout is stale or invalid, rebuilding default"
                    );
                    (build_default_layout(), true)
                }
                None => (build_default_layout(), true),
            };
            // A rebuilt default replaces the remote copy too; otherwise a
            // stale stored layout would survive until the first mutation.
            if rebuilt {
                self.schedule_flush(state, layout.clone());
            }
            state.layout = Some(layout);
        }
        Ok(state.layout.get_or_insert_with(build_default_layout))
    }

    fn schedule_flush(&self, state: &mut StoreState, snapshot: DashboardLayout) {
        if let Some(pending) = state.pending_flush.take() {
            pending.abort();
        }
        let backend = Arc::clone(&self.backend);
        let principal = self.principal.clone();
        let debounce = self.debounce;
        state.pending_flush = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(error) = backend.save(&principal, &snapshot).await {
                warn!(%principal, %error, "failed to persist dashboard layout");
            }
        }));
    }
}

// ============================================================================
// Layout service
// ============================================================================

/// Hands out one [`LayoutStore`] per user, created on first request.
pub struct LayoutService {
    backend: Arc<dyn LayoutBackend>,
    debounce: Duration,
    stores: Mutex<HashMap<String, Arc<LayoutStore>>>,
}

impl LayoutService {
    pub fn new(backend: Arc<dyn LayoutBackend>) -> Self {
        Self::with_debounce(backend, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(backend: Arc<dyn LayoutBackend>, debounce: Duration) -> Self {
        Self {
            backend,
            debounce,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub async fn store_for(&self, principal: &str) -> Arc<LayoutStore> {
        let mut stores = self.stores.lock().await;
        stores
            .entry(principal.to_string())
            .or_insert_with(|| {
                Arc::new(LayoutStore::new(
                    principal.to_string(),
                    Arc::clone(&self.backend),
                    self.debounce,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemoryBackend {
        layouts: std::sync::Mutex<HashMap<String, DashboardLayout>>,
        saves: AtomicUsize,
    }

    impl MemoryBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                layouts: std::sync::Mutex::new(HashMap::new()),
                saves: AtomicUsize::new(0),
            })
        }

        fn seeded(principal: &str, layout: DashboardLayout) -> Arc<Self> {
            let backend = Self::new();
            backend
                .layouts
                .lock()
                .unwrap()
                .insert(principal.to_string(), layout);
            backend
        }

        fn stored(&self, principal: &str) -> Option<DashboardLayout> {
            self.layouts.lock().unwrap().get(principal).cloned()
        }
    }

    #[async_trait]
    impl LayoutBackend for MemoryBackend {
        async fn load(&self, principal: &str) -> anyhow::Result<Option<DashboardLayout>> {
            Ok(self.layouts.lock().unwrap().get(principal).cloned())
        }

        async fn save(&self, principal: &str, layout: &DashboardLayout) -> anyhow::Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.layouts
                .lock()
                .unwrap()
                .insert(principal.to_string(), layout.clone());
            Ok(())
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(10);

    fn store(backend: Arc<MemoryBackend>) -> LayoutStore {
        LayoutStore::new("user-1".into(), backend, DEBOUNCE)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn test_first_access_builds_default_layout() {
        let store = store(MemoryBackend::new());
        let layout = store.layout().await.unwrap();
        assert_eq!(layout, build_default_layout());
    }

    #[tokio::test]
    async fn test_stored_layout_is_used_when_valid() {
        let mut stored = build_default_layout();
        stored.widgets.retain(|w| w.i != WidgetId::ChartPeakHours);
        stored.hidden_widgets.push(WidgetId::ChartPeakHours);
        let store = store(MemoryBackend::seeded("user-1", stored.clone()));

        assert_eq!(store.layout().await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_version_mismatch_rebuilds_default() {
        let mut stale = build_default_layout();
        stale.version = LAYOUT_VERSION - 1;
        let store = store(MemoryBackend::seeded("user-1", stale));

        assert_eq!(store.layout().await.unwrap(), build_default_layout());
    }

    #[tokio::test]
    async fn test_version_mismatch_rebuild_overwrites_stored_copy() {
        let mut stale = build_default_layout();
        stale.version = LAYOUT_VERSION - 1;
        let backend = MemoryBackend::seeded("user-1", stale);
        let store = store(Arc::clone(&backend));

        store.layout().await.unwrap();
        settle().await;

        assert_eq!(backend.saves.load(Ordering::SeqCst), 1);
        assert_eq!(backend.stored("user-1"), Some(build_default_layout()));
    }

    #[tokio::test]
    async fn test_first_default_build_is_persisted() {
        let backend = MemoryBackend::new();
        let store = store(Arc::clone(&backend));

        store.layout().await.unwrap();
        settle().await;

        assert_eq!(backend.saves.load(Ordering::SeqCst), 1);
        assert_eq!(backend.stored("user-1"), Some(build_default_layout()));
    }

    #[tokio::test]
    async fn test_valid_stored_layout_is_not_rewritten() {
        let mut stored = build_default_layout();
        stored.widgets.retain(|w| w.i != WidgetId::ChartPeakHours);
        stored.hidden_widgets.push(WidgetId::ChartPeakHours);
        let backend = MemoryBackend::seeded("user-1", stored);
        let store = store(Arc::clone(&backend));

        store.layout().await.unwrap();
        settle().await;

        assert_eq!(backend.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_layout_drops_hidden_widgets() {
        let store = store(MemoryBackend::new());
        store.remove_widget(WidgetId::StatTotalUsers).await.unwrap();

        // A full placement set including the removed widget must not bring
        // it back.
        let layout = store
            .update_layout(build_default_layout().widgets)
            .await
            .unwrap();

        assert!(layout.widgets.iter().all(|w| w.i != WidgetId::StatTotalUsers));
        assert_eq!(layout.hidden_widgets, vec![WidgetId::StatTotalUsers]);
    }

    #[tokio::test]
    async fn test_update_layout_rejects_invalid_geometry() {
        let store = store(MemoryBackend::new());
        let mut widgets = build_default_layout().widgets;
        widgets[0].x = 11;
        widgets[0].w = 4;

        assert!(matches!(
            store.update_layout(widgets).await,
            Err(LayoutError::InvalidLayout)
        ));
    }

    #[tokio::test]
    async fn test_remove_then_add_places_at_bottom() {
        let store = store(MemoryBackend::new());
        let before = store.layout().await.unwrap();

        store.remove_widget(WidgetId::ChartActivityFeed).await.unwrap();
        let layout = store.add_widget(WidgetId::ChartActivityFeed).await.unwrap();

        let item = layout
            .widgets
            .iter()
            .find(|w| w.i == WidgetId::ChartActivityFeed)
            .unwrap();
        let bottom_without = layout
            .widgets
            .iter()
            .filter(|w| w.i != WidgetId::ChartActivityFeed)
            .map(|w| w.y + w.h)
            .max()
            .unwrap();
        assert_eq!((item.x, item.y), (0, bottom_without));
        assert!(layout.hidden_widgets.is_empty());
        assert_eq!(layout.widgets.len(), before.widgets.len());
    }

    #[tokio::test]
    async fn test_remove_missing_widget_fails() {
        let store = store(MemoryBackend::new());
        store.remove_widget(WidgetId::StatAvgSession).await.unwrap();

        assert!(matches!(
            store.remove_widget(WidgetId::StatAvgSession).await,
            Err(LayoutError::NotPlaced(WidgetId::StatAvgSession))
        ));
    }

    #[tokio::test]
    async fn test_add_placed_widget_fails() {
        let store = store(MemoryBackend::new());

        assert!(matches!(
            store.add_widget(WidgetId::StatAvgSession).await,
            Err(LayoutError::AlreadyPlaced(WidgetId::StatAvgSession))
        ));
    }

    #[tokio::test]
    async fn test_resize_clamps_to_catalogue_minimum() {
        let store = store(MemoryBackend::new());

        let layout = store
            .resize_widget(WidgetId::ChartCombinedActivity, 1, 1)
            .await
            .unwrap();

        let item = layout
            .widgets
            .iter()
            .find(|w| w.i == WidgetId::ChartCombinedActivity)
            .unwrap();
        assert_eq!((item.w, item.h), (4, 3));
    }

    #[tokio::test]
    async fn test_resize_clamps_to_grid_edge() {
        let store = store(MemoryBackend::new());

        let layout = store
            .resize_widget(WidgetId::StatTotalUsers, 40, 2)
            .await
            .unwrap();

        let item = layout
            .widgets
            .iter()
            .find(|w| w.i == WidgetId::StatTotalUsers)
            .unwrap();
        assert_eq!(item.x + item.w, GRID_COLUMNS);
    }

    #[tokio::test]
    async fn test_reset_restores_default_layout() {
        let store = store(MemoryBackend::new());
        store.remove_widget(WidgetId::StatKratosHealth).await.unwrap();

        let layout = store.reset_to_default().await.unwrap();

        assert_eq!(layout, build_default_layout());
    }

    #[tokio::test]
    async fn test_debounce_coalesces_saves() {
        let backend = MemoryBackend::new();
        let store = store(Arc::clone(&backend));

        store.remove_widget(WidgetId::StatTotalUsers).await.unwrap();
        store.remove_widget(WidgetId::StatUserGrowth).await.unwrap();
        let last = store.remove_widget(WidgetId::StatAvgSession).await.unwrap();
        settle().await;

        assert_eq!(backend.saves.load(Ordering::SeqCst), 1);
        assert_eq!(backend.stored("user-1"), Some(last));
    }

    #[tokio::test]
    async fn test_mutations_spaced_beyond_debounce_each_save() {
        let backend = MemoryBackend::new();
        let store = store(Arc::clone(&backend));

        store.remove_widget(WidgetId::StatTotalUsers).await.unwrap();
        settle().await;
        store.remove_widget(WidgetId::StatUserGrowth).await.unwrap();
        settle().await;

        assert_eq!(backend.saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_service_reuses_store_per_principal() {
        let service = LayoutService::with_debounce(MemoryBackend::new(), DEBOUNCE);

        let a = service.store_for("alice").await;
        let b = service.store_for("alice").await;
        let c = service.store_for("bob").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
