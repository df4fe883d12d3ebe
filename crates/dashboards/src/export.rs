use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgebi_core::{AnalyticsError, AnalyticsResult, DashboardId};

use crate::dashboard::Dashboard;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Full dashboard definition.
    Json,
    /// One row per widget: id, type, title, placement and data source.
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardExport {
    pub dashboard_id: DashboardId,
    pub format: ExportFormat,
    pub exported_at: DateTime<Utc>,
    pub content: String,
}

pub(crate) fn export(
    dashboard: &Dashboard,
    format: ExportFormat,
    exported_at: DateTime<Utc>,
) -> AnalyticsResult<DashboardExport> {
    let content = match format {
        ExportFormat::Json => serde_json::to_string_pretty(dashboard)
            .map_err(|e| AnalyticsError::validation(format!("dashboard not serializable: {e}")))?,
        ExportFormat::Csv => to_csv(dashboard),
    };
    Ok(DashboardExport {
        dashboard_id: dashboard.id,
        format,
        exported_at,
        content,
    })
}

fn to_csv(dashboard: &Dashboard) -> String {
    let mut out = String::from("widget_id,type,title,x,y,width,height,source_type,connection,query\n");
    for w in &dashboard.widgets {
        let source_type = serde_json::to_value(w.data_source.source_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        let fields = [
            w.id.to_string(),
            w.widget_type.as_str().to_string(),
            w.title.clone(),
            w.position.x.to_string(),
            w.position.y.to_string(),
            w.size.width.to_string(),
            w.size.height.to_string(),
            source_type,
            w.data_source.connection.clone(),
            w.data_source.query.clone().unwrap_or_default(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
