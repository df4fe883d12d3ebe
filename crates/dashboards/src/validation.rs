//! Layout and widget binding checks.
//!
//! Every mutation validates the full resulting widget list before anything is
//! stored, so a rejected mutation never leaves a partial list behind.

use std::collections::HashSet;

use forgebi_core::{AnalyticsError, AnalyticsResult};

use crate::dashboard::Layout;
use crate::widget::Widget;

pub fn validate_layout(layout: &Layout) -> AnalyticsResult<()> {
    if layout.columns == 0 {
        return Err(AnalyticsError::validation("layout must have at least one column"));
    }
    if layout.row_height == 0 {
        return Err(AnalyticsError::validation("layout row height must be positive"));
    }
    for bp in &layout.breakpoints {
        if bp.columns == 0 {
            return Err(AnalyticsError::validation(format!(
                "breakpoint {} must have at least one column",
                bp.name
            )));
        }
    }
    Ok(())
}

pub fn validate_widget(
    widget: &Widget,
    layout: &Layout,
    dashboard_refresh_secs: u64,
) -> AnalyticsResult<()> {
    if widget.id.is_blank() {
        return Err(AnalyticsError::validation("widget id cannot be empty"));
    }
    if widget.title.trim().is_empty() {
        return Err(AnalyticsError::validation(format!(
            "widget {} title cannot be empty",
            widget.id
        )));
    }

    let size = &widget.size;
    if size.width == 0 || size.height == 0 {
        return Err(AnalyticsError::validation(format!(
            "widget {} must be at least one cell wide and tall",
            widget.id
        )));
    }
    if widget.position.x.saturating_add(size.width) > layout.columns {
        return Err(AnalyticsError::validation(format!(
            "widget {} overflows the {}-column layout",
            widget.id, layout.columns
        )));
    }
    check_bounds(widget, "width", size.width, size.min_width, size.max_width)?;
    check_bounds(widget, "height", size.height, size.min_height, size.max_height)?;

    widget
        .data_source
        .validate()
        .map_err(|e| AnalyticsError::validation(format!("widget {}: {e}", widget.id)))?;

    if !widget.refresh_override && widget.data_source.refresh_interval_secs > dashboard_refresh_secs {
        return Err(AnalyticsError::validation(format!(
            "widget {} refreshes every {}s, slower than the dashboard's {}s; set refresh_override to allow it",
            widget.id, widget.data_source.refresh_interval_secs, dashboard_refresh_secs
        )));
    }

    if widget.visualization.aggregation.is_some() && widget.visualization.measures.is_empty() {
        return Err(AnalyticsError::validation(format!(
            "widget {} aggregates but declares no measure",
            widget.id
        )));
    }

    Ok(())
}

fn check_bounds(
    widget: &Widget,
    dimension: &str,
    value: u32,
    min: Option<u32>,
    max: Option<u32>,
) -> AnalyticsResult<()> {
    if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
        return Err(AnalyticsError::validation(format!(
            "widget {} {dimension} {value} is outside its bounds",
            widget.id
        )));
    }
    Ok(())
}

/// Validate a complete widget list against a layout.
pub fn validate_widgets(
    widgets: &[Widget],
    layout: &Layout,
    dashboard_refresh_secs: u64,
) -> AnalyticsResult<()> {
    let mut seen = HashSet::new();
    for widget in widgets {
        if !seen.insert(&widget.id) {
            return Err(AnalyticsError::validation(format!(
                "duplicate widget id {}",
                widget.id
            )));
        }
        validate_widget(widget, layout, dashboard_refresh_secs)?;
    }
    Ok(())
}
