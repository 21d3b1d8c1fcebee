//! Dashboard widget catalogue, layout types, and the default bin-packing
//! layout builder.
//!
//! The catalogue is a closed enum: adding a widget kind means adding a
//! [`WidgetId`] variant, and the compiler then demands a definition for it in
//! [`WidgetId::definition`]. Layout geometry lives on a fixed 12-column grid;
//! coordinates are unsigned, so negative positions cannot even be
//! deserialized from a persisted layout.

use serde::{Deserialize, Serialize};

/// Schema version of the persisted layout. A stored layout with any other
/// version is discarded and rebuilt from the catalogue.
pub const LAYOUT_VERSION: u32 = 17;

/// Number of grid columns.
pub const GRID_COLUMNS: u32 = 12;

/// Unique identifier for each dashboard widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetId {
    StatTotalUsers,
    StatActiveSessions,
    StatAvgSession,
    StatUserGrowth,
    StatKratosHealth,
    StatHydraHealth,
    ChartCombinedActivity,
    ChartUsersBySchema,
    ChartVerificationGauge,
    ChartPeakHours,
    ChartSessionLocations,
    ChartActivityFeed,
    ChartOauth2GrantTypes,
}

impl WidgetId {
    /// Every widget kind, in default layout order.
    pub const ALL: [WidgetId; 13] = [
        WidgetId::StatTotalUsers,
        WidgetId::StatActiveSessions,
        WidgetId::StatAvgSession,
        WidgetId::StatUserGrowth,
        WidgetId::StatKratosHealth,
        WidgetId::StatHydraHealth,
        WidgetId::ChartCombinedActivity,
        WidgetId::ChartUsersBySchema,
        WidgetId::ChartVerificationGauge,
        WidgetId::ChartPeakHours,
        WidgetId::ChartSessionLocations,
        WidgetId::ChartActivityFeed,
        WidgetId::ChartOauth2GrantTypes,
    ];

    /// Static catalogue entry for this widget kind. Total by construction:
    /// a new variant fails to compile until it is defined here.
    pub fn definition(self) -> WidgetDefinition {
        match self {
            WidgetId::StatTotalUsers => WidgetDefinition {
                id: self,
                title: "Total Users",
                description: "Total number of registered users",
                icon: "users",
                category: WidgetCategory::Stat,
                default_w: 2,
                default_h: 2,
                min_w: None,
                min_h: None,
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::StatActiveSessions => WidgetDefinition {
                id: self,
                title: "Active Users",
                description: "Unique users with active sessions",
                icon: "shield",
                category: WidgetCategory::Stat,
                default_w: 2,
                default_h: 2,
                min_w: None,
                min_h: None,
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::StatAvgSession => WidgetDefinition {
                id: self,
                title: "Avg Session Duration",
                description: "Average session duration",
                icon: "time",
                category: WidgetCategory::Stat,
                default_w: 2,
                default_h: 2,
                min_w: None,
                min_h: None,
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::StatUserGrowth => WidgetDefinition {
                id: self,
                title: "User Growth",
                description: "New users this week with trend",
                icon: "trending-up",
                category: WidgetCategory::Stat,
                default_w: 2,
                default_h: 2,
                min_w: None,
                min_h: None,
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::StatKratosHealth => WidgetDefinition {
                id: self,
                title: "Kratos Health",
                description: "Identity service health status",
                icon: "health",
                category: WidgetCategory::Stat,
                default_w: 2,
                default_h: 2,
                min_w: None,
                min_h: None,
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::StatHydraHealth => WidgetDefinition {
                id: self,
                title: "Hydra Health",
                description: "OAuth2 service health status",
                icon: "cloud",
                category: WidgetCategory::Stat,
                default_w: 2,
                default_h: 2,
                min_w: None,
                min_h: None,
                max_w: None,
                max_h: None,
                requires_hydra: true,
            },
            WidgetId::ChartCombinedActivity => WidgetDefinition {
                id: self,
                title: "Activity Overview",
                description: "Sign-ups and logins over time",
                icon: "activity",
                category: WidgetCategory::Chart,
                default_w: 12,
                default_h: 6,
                min_w: Some(4),
                min_h: Some(3),
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::ChartUsersBySchema => WidgetDefinition {
                id: self,
                title: "Users by Schema",
                description: "Identity distribution by schema",
                icon: "shapes",
                category: WidgetCategory::Chart,
                default_w: 3,
                default_h: 4,
                min_w: Some(2),
                min_h: Some(3),
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::ChartVerificationGauge => WidgetDefinition {
                id: self,
                title: "Email Verification Rate",
                description: "Visual gauge of email verification rate",
                icon: "verified",
                category: WidgetCategory::Chart,
                default_w: 3,
                default_h: 4,
                min_w: Some(2),
                min_h: Some(3),
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::ChartPeakHours => WidgetDefinition {
                id: self,
                title: "Peak Activity Hours",
                description: "Login activity distribution by hour",
                icon: "bar-chart",
                category: WidgetCategory::Chart,
                default_w: 6,
                default_h: 6,
                min_w: Some(3),
                min_h: Some(3),
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::ChartSessionLocations => WidgetDefinition {
                id: self,
                title: "Session Locations",
                description: "World heat map of session origins",
                icon: "globe",
                category: WidgetCategory::Chart,
                default_w: 6,
                default_h: 6,
                min_w: Some(4),
                min_h: Some(4),
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::ChartActivityFeed => WidgetDefinition {
                id: self,
                title: "Recent Activity",
                description: "Latest signups and logins",
                icon: "activity",
                category: WidgetCategory::Chart,
                default_w: 3,
                default_h: 4,
                min_w: Some(2),
                min_h: Some(3),
                max_w: None,
                max_h: None,
                requires_hydra: false,
            },
            WidgetId::ChartOauth2GrantTypes => WidgetDefinition {
                id: self,
                title: "OAuth2 Grant Types Usage",
                description: "Distribution of OAuth2 grant types",
                icon: "key-round",
                category: WidgetCategory::Chart,
                default_w: 3,
                default_h: 4,
                min_w: Some(2),
                min_h: Some(3),
                max_w: None,
                max_h: None,
                requires_hydra: true,
            },
        }
    }

    /// Whether this widget needs the optional OAuth2 service to be available.
    pub fn requires_hydra(self) -> bool {
        self.definition().requires_hydra
    }

    /// Wire name of this widget, as used in JSON bodies and URL paths.
    pub fn as_str(self) -> &'static str {
        match self {
            WidgetId::StatTotalUsers => "stat-total-users",
            WidgetId::StatActiveSessions => "stat-active-sessions",
            WidgetId::StatAvgSession => "stat-avg-session",
            WidgetId::StatUserGrowth => "stat-user-growth",
            WidgetId::StatKratosHealth => "stat-kratos-health",
            WidgetId::StatHydraHealth => "stat-hydra-health",
            WidgetId::ChartCombinedActivity => "chart-combined-activity",
            WidgetId::ChartUsersBySchema => "chart-users-by-schema",
            WidgetId::ChartVerificationGauge => "chart-verification-gauge",
            WidgetId::ChartPeakHours => "chart-peak-hours",
            WidgetId::ChartSessionLocations => "chart-session-locations",
            WidgetId::ChartActivityFeed => "chart-activity-feed",
            WidgetId::ChartOauth2GrantTypes => "chart-oauth2-grant-types",
        }
    }
}

impl std::fmt::Display for WidgetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a widget name that is not part of the catalogue.
#[derive(Debug, thiserror::Error)]
#[error("unknown widget: {0}")]
pub struct UnknownWidget(pub String);

impl std::str::FromStr for WidgetId {
    type Err = UnknownWidget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WidgetId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownWidget(s.to_string()))
    }
}

/// Broad widget grouping for the add-widget dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetCategory {
    Stat,
    Chart,
}

/// Static catalogue entry. Defined at build time, never created or destroyed
/// at runtime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDefinition {
    pub id: WidgetId,
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub category: WidgetCategory,
    pub default_w: u32,
    pub default_h: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
    pub requires_hydra: bool,
}

/// A placed widget instance on the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetLayoutItem {
    pub i: WidgetId,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
}

impl WidgetLayoutItem {
    /// Place a widget at a position using its catalogue sizing.
    pub fn from_definition(def: &WidgetDefinition, x: u32, y: u32) -> Self {
        Self {
            i: def.id,
            x,
            y,
            w: def.default_w,
            h: def.default_h,
            min_w: def.min_w,
            min_h: def.min_h,
            max_w: def.max_w,
            max_h: def.max_h,
        }
    }

    fn overlaps(&self, other: &WidgetLayoutItem) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// The full persisted dashboard layout: placed widgets, hidden widgets, and
/// the schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardLayout {
    pub widgets: Vec<WidgetLayoutItem>,
    pub hidden_widgets: Vec<WidgetId>,
    pub version: u32,
}

impl DashboardLayout {
    /// A persisted layout is trusted only if its version matches and its
    /// geometry is structurally valid: widgets fit the grid, sizes respect
    /// the catalogue bounds, and no widget is both placed and hidden.
    pub fn is_valid(&self) -> bool {
        if self.version != LAYOUT_VERSION {
            return false;
        }

        for (n, item) in self.widgets.iter().enumerate() {
            if item.w == 0 || item.h == 0 || item.x + item.w > GRID_COLUMNS {
                return false;
            }
            if self.widgets[n + 1..].iter().any(|other| other.i == item.i) {
                return false;
            }
            let def = item.i.definition();
            if def.min_w.is_some_and(|min| item.w < min)
                || def.min_h.is_some_and(|min| item.h < min)
                || def.max_w.is_some_and(|max| item.w > max)
                || def.max_h.is_some_and(|max| item.h > max)
            {
                return false;
            }
        }

        self.widgets
            .iter()
            .all(|item| !self.hidden_widgets.contains(&item.i))
    }

    /// Widgets visible given the OAuth2 service's availability.
    pub fn visible_widgets(&self, hydra_available: bool) -> Vec<WidgetLayoutItem> {
        self.widgets
            .iter()
            .filter(|item| hydra_available || !item.i.requires_hydra())
            .cloned()
            .collect()
    }

    /// Hidden widgets that could currently be added back.
    pub fn addable_widgets(&self, hydra_available: bool) -> Vec<WidgetId> {
        self.hidden_widgets
            .iter()
            .copied()
            .filter(|id| hydra_available || !id.requires_hydra())
            .collect()
    }

    /// Bottom edge of the current layout (first free row).
    pub fn bottom(&self) -> u32 {
        self.widgets.iter().map(|w| w.y + w.h).max().unwrap_or(0)
    }
}

/// Build the default layout by bin-packing the full catalogue.
pub fn build_default_layout() -> DashboardLayout {
    let defs: Vec<WidgetDefinition> = WidgetId::ALL.iter().map(|id| id.definition()).collect();
    DashboardLayout {
        widgets: pack_definitions(&defs),
        hidden_widgets: Vec::new(),
        version: LAYOUT_VERSION,
    }
}

/// Greedy bin-packing placement.
///
/// Definitions are placed in declaration order. A per-column height array
/// tracks the skyline; each widget scans every horizontal offset it fits at
/// and takes the one with the lowest resulting top edge, ties to the
/// leftmost. Placements never overlap and are fully deterministic for a
/// given catalogue ordering.
fn pack_definitions(defs: &[WidgetDefinition]) -> Vec<WidgetLayoutItem> {
    let mut widgets = Vec::with_capacity(defs.len());
    let mut col_heights = [0u32; GRID_COLUMNS as usize];

    for def in defs {
        let width = def.default_w.min(GRID_COLUMNS) as usize;

        let mut best_x = 0usize;
        let mut best_y = u32::MAX;
        for x in 0..=(GRID_COLUMNS as usize - width) {
            let top = col_heights[x..x + width].iter().copied().max().unwrap_or(0);
            if top < best_y {
                best_y = top;
                best_x = x;
            }
        }

        widgets.push(WidgetLayoutItem::from_definition(def, best_x as u32, best_y));

        for height in &mut col_heights[best_x..best_x + width] {
            *height = best_y + def.default_h;
        }
    }

    widgets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_has_every_widget_once() {
        let layout = build_default_layout();

        assert_eq!(layout.version, LAYOUT_VERSION);
        assert!(layout.hidden_widgets.is_empty());
        assert_eq!(layout.widgets.len(), WidgetId::ALL.len());
        for id in WidgetId::ALL {
            assert_eq!(layout.widgets.iter().filter(|w| w.i == id).count(), 1);
        }
    }

    #[test]
    fn test_default_layout_has_no_overlaps() {
        let layout = build_default_layout();

        for (n, a) in layout.widgets.iter().enumerate() {
            for b in &layout.widgets[n + 1..] {
                assert!(!a.overlaps(b), "{:?} overlaps {:?}", a.i, b.i);
            }
            assert!(a.x + a.w <= GRID_COLUMNS);
        }
    }

    #[test]
    fn test_default_layout_is_deterministic() {
        assert_eq!(build_default_layout(), build_default_layout());
    }

    #[test]
    fn test_packing_small_then_full_width() {
        // A 2x2 widget followed by a full-width 12x4 widget: the second can
        // only start below the first's footprint.
        let mut small = WidgetId::StatTotalUsers.definition();
        small.default_w = 2;
        small.default_h = 2;
        let mut wide = WidgetId::ChartCombinedActivity.definition();
        wide.default_w = 12;
        wide.default_h = 4;

        let placed = pack_definitions(&[small, wide]);

        assert_eq!((placed[0].x, placed[0].y), (0, 0));
        assert_eq!((placed[1].x, placed[1].y), (0, 2));
    }

    #[test]
    fn test_packing_prefers_leftmost_on_ties() {
        let defs: Vec<WidgetDefinition> = (0..3)
            .map(|_| {
                let mut def = WidgetId::StatTotalUsers.definition();
                def.default_w = 4;
                def.default_h = 2;
                def
            })
            .collect();

        let placed = pack_definitions(&defs);

        assert_eq!((placed[0].x, placed[0].y), (0, 0));
        assert_eq!((placed[1].x, placed[1].y), (4, 0));
        assert_eq!((placed[2].x, placed[2].y), (8, 0));
    }

    #[test]
    fn test_validity_rejects_version_mismatch() {
        let mut layout = build_default_layout();
        assert!(layout.is_valid());

        layout.version = LAYOUT_VERSION - 1;
        assert!(!layout.is_valid());
    }

    #[test]
    fn test_validity_rejects_out_of_grid_geometry() {
        let mut layout = build_default_layout();
        layout.widgets[0].x = 11;
        layout.widgets[0].w = 2;
        assert!(!layout.is_valid());
    }

    #[test]
    fn test_validity_rejects_size_below_catalogue_minimum() {
        let mut layout = build_default_layout();
        let chart = layout
            .widgets
            .iter_mut()
            .find(|w| w.i == WidgetId::ChartCombinedActivity)
            .unwrap();
        chart.w = 1; // catalogue minimum is 4
        assert!(!layout.is_valid());
    }

    #[test]
    fn test_validity_rejects_duplicate_widgets() {
        let mut layout = build_default_layout();
        let copy = layout.widgets[0].clone();
        layout.widgets.push(copy);
        assert!(!layout.is_valid());
    }

    #[test]
    fn test_widget_id_parses_from_wire_name() {
        let id: WidgetId = "chart-session-locations".parse().unwrap();
        assert_eq!(id, WidgetId::ChartSessionLocations);
        assert!("chart-bogus".parse::<WidgetId>().is_err());
    }

    #[test]
    fn test_validity_rejects_placed_and_hidden_overlap() {
        let mut layout = build_default_layout();
        layout.hidden_widgets.push(layout.widgets[0].i);
        assert!(!layout.is_valid());
    }

    #[test]
    fn test_visible_widgets_hide_hydra_gated_kinds() {
        let layout = build_default_layout();

        let all = layout.visible_widgets(true);
        assert_eq!(all.len(), WidgetId::ALL.len());

        let without_hydra = layout.visible_widgets(false);
        assert_eq!(without_hydra.len(), WidgetId::ALL.len() - 2);
        assert!(without_hydra.iter().all(|w| !w.i.requires_hydra()));
    }

    #[test]
    fn test_widget_id_wire_names_are_kebab_case() {
        let json = serde_json::to_string(&WidgetId::StatTotalUsers).unwrap();
        assert_eq!(json, "\"stat-total-users\"");
        let json = serde_json::to_string(&WidgetId::ChartOauth2GrantTypes).unwrap();
        assert_eq!(json, "\"chart-oauth2-grant-types\"");

        let parsed: WidgetId = serde_json::from_str("\"chart-peak-hours\"").unwrap();
        assert_eq!(parsed, WidgetId::ChartPeakHours);
    }

    #[test]
    fn test_layout_wire_format_is_camel_case() {
        let layout = build_default_layout();
        let value = serde_json::to_value(&layout).unwrap();

        assert!(value.get("hiddenWidgets").is_some());
        let first = &value["widgets"][0];
        assert!(first.get("i").is_some());
        assert!(first.get("x").is_some());
    }
}
