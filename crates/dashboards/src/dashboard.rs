use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgebi_core::{DashboardId, Entity, Principal, WidgetId};

use crate::widget::Widget;

/// Permission entry granting every principal read access.
pub const PERMISSION_ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub name: String,
    pub min_width: u32,
    pub columns: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub columns: u32,
    pub row_height: u32,
    /// Horizontal and vertical margin in pixels.
    pub margin: [u32; 2],
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            columns: 12,
            row_height: 80,
            margin: [10, 10],
            breakpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    In,
    Between,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: JsonValue,
}

/// Authoring input for `DashboardRegistry::create_dashboard`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDashboard {
    pub name: String,
    pub description: String,
    pub category: String,
    pub is_default: bool,
    pub is_public: bool,
    pub layout: Layout,
    pub widgets: Vec<Widget>,
    pub filters: Vec<DashboardFilter>,
    pub refresh_interval_secs: u64,
    pub permissions: Vec<String>,
    pub created_by: String,
    pub tags: Vec<String>,
}

impl NewDashboard {
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: "general".to_string(),
            is_default: false,
            is_public: false,
            layout: Layout::default(),
            widgets: Vec::new(),
            filters: Vec::new(),
            refresh_interval_secs: 300,
            permissions: Vec::new(),
            created_by: created_by.into(),
            tags: Vec::new(),
        }
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_widget(mut self, widget: Widget) -> Self {
        self.widgets.push(widget);
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn with_refresh_interval(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: DashboardId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub is_default: bool,
    pub is_public: bool,
    pub layout: Layout,
    pub widgets: Vec<Widget>,
    pub filters: Vec<DashboardFilter>,
    pub refresh_interval_secs: u64,
    pub permissions: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Soft-delete flag; archived dashboards behave as if they did not exist.
    pub archived: bool,
}

impl Dashboard {
    pub(crate) fn from_spec(id: DashboardId, spec: NewDashboard, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            category: spec.category,
            is_default: spec.is_default,
            is_public: spec.is_public,
            layout: spec.layout,
            widgets: spec.widgets,
            filters: spec.filters,
            refresh_interval_secs: spec.refresh_interval_secs,
            permissions: spec.permissions,
            created_by: spec.created_by,
            created_at: now,
            last_modified: now,
            tags: spec.tags,
            archived: false,
        }
    }

    pub fn widget(&self, id: &WidgetId) -> Option<&Widget> {
        self.widgets.iter().find(|w| &w.id == id)
    }

    /// `is_public || created_by == principal || "all" ∈ permissions ||
    /// principal role ∈ permissions`. Anonymous readers see public dashboards.
    pub fn is_visible_to(&self, principal: Option<&Principal>) -> bool {
        if self.is_public {
            return true;
        }
        let Some(principal) = principal else {
            return false;
        };
        self.created_by == principal.id
            || self.permissions.iter().any(|p| p == PERMISSION_ALL)
            || self.permissions.iter().any(|p| principal.has_role(p))
    }
}

impl Entity for Dashboard {
    type Id = DashboardId;
    const KIND: &'static str = "dashboard";

    fn id(&self) -> &DashboardId {
        &self.id
    }
}
