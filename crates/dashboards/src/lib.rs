//! Dashboard registry: dashboards composed of widgets bound to data sources.
//!
//! Mutations are validated up front and applied atomically per dashboard;
//! readers always receive copies.

pub mod dashboard;
pub mod export;
pub mod registry;
pub mod render;
pub mod validation;
pub mod widget;

pub use dashboard::{Breakpoint, Dashboard, DashboardFilter, FilterOperator, Layout, NewDashboard};
pub use export::{DashboardExport, ExportFormat};
pub use registry::{DashboardRegistry, WidgetUpsert};
pub use render::{RenderedDashboard, RenderedWidget};
pub use widget::{
    Aggregation, Axis, Interaction, InteractionAction, InteractionTrigger, Position, Series, Size,
    SortOrder, Visualization, Widget, WidgetConfig, WidgetType,
};
