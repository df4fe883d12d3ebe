//! Resolving widget data for the (external) rendering layer.

use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use forgebi_connectors::{DataSourceConnector, DataSourceType, Row};
use forgebi_core::{DashboardId, MetricId, WidgetId};
use forgebi_metrics::MetricStore;

use crate::dashboard::Dashboard;
use crate::widget::{Widget, WidgetType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedWidget {
    pub widget_id: WidgetId,
    pub widget_type: WidgetType,
    pub title: String,
    /// Rows on success, or the data source error. One broken widget never
    /// fails the whole dashboard.
    pub data: Result<Vec<Row>, String>,
}

impl RenderedWidget {
    pub fn is_ok(&self) -> bool {
        self.data.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedDashboard {
    pub dashboard_id: DashboardId,
    pub name: String,
    pub rendered_at: DateTime<Utc>,
    pub widgets: Vec<RenderedWidget>,
}

impl RenderedDashboard {
    pub fn failed_widgets(&self) -> impl Iterator<Item = &RenderedWidget> {
        self.widgets.iter().filter(|w| !w.is_ok())
    }
}

/// Fetch data for every visible widget of an already-copied dashboard.
///
/// Connector fetches run concurrently on scoped threads; widget order is
/// preserved in the output.
pub(crate) fn render(
    dashboard: &Dashboard,
    metrics: &MetricStore,
    connector: &dyn DataSourceConnector,
    rendered_at: DateTime<Utc>,
) -> RenderedDashboard {
    let visible: Vec<&Widget> = dashboard.widgets.iter().filter(|w| w.visible).collect();

    let widgets = thread::scope(|scope| {
        let handles: Vec<_> = visible
            .iter()
            .map(|widget| scope.spawn(move || resolve(widget, metrics, connector)))
            .collect();

        handles
            .into_iter()
            .zip(visible.iter())
            .map(|(handle, widget)| {
                let data = handle
                    .join()
                    .unwrap_or_else(|_| Err("widget data resolution panicked".to_string()));
                if let Err(e) = &data {
                    warn!(dashboard = %dashboard.id, widget = %widget.id, error = %e, "widget data unavailable");
                }
                RenderedWidget {
                    widget_id: widget.id.clone(),
                    widget_type: widget.widget_type,
                    title: widget.title.clone(),
                    data,
                }
            })
            .collect()
    });

    RenderedDashboard {
        dashboard_id: dashboard.id,
        name: dashboard.name.clone(),
        rendered_at,
        widgets,
    }
}

fn resolve(
    widget: &Widget,
    metrics: &MetricStore,
    connector: &dyn DataSourceConnector,
) -> Result<Vec<Row>, String> {
    let source = &widget.data_source;
    match source.source_type {
        DataSourceType::Metric => {
            let name = source.query.as_deref().unwrap_or_default();
            let metric = metrics
                .get(&MetricId::new(name))
                .ok_or_else(|| format!("metric {name} has not been observed yet"))?;
            let value = json!({
                "metric": metric.id,
                "value": metric.value,
                "previous_value": metric.previous_value,
                "change_percentage": metric.change_percentage,
                "trend": metric.trend,
                "unit": metric.unit,
                "timestamp": metric.timestamp,
            });
            match value {
                serde_json::Value::Object(row) => Ok(vec![row]),
                _ => Err("metric row did not serialize to an object".to_string()),
            }
        }
        _ => connector.fetch(source).map_err(|e| e.to_string()),
    }
}
