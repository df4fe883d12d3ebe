use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use forgebi_core::{DashboardId, MetricId, ModelId, ReportId, WidgetId};
use forgebi_dashboards::{Dashboard, DashboardRegistry, WidgetType};
use forgebi_metrics::{Metric, MetricSnapshot, MetricStore};
use forgebi_models::{ModelRegistry, ModelStatus, Prediction, PredictiveModel};

use crate::report::{Report, ReportType, SectionSource, Styling};

/// Immutable result of compiling a report; shared by every dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledReport {
    pub report_id: ReportId,
    pub name: String,
    pub report_type: ReportType,
    pub generated_at: DateTime<Utc>,
    pub styling: Styling,
    pub sections: Vec<CompiledSection>,
}

impl CompiledReport {
    /// Sections whose source could not be resolved.
    pub fn unavailable_sections(&self) -> impl Iterator<Item = &CompiledSection> {
        self.sections
            .iter()
            .filter(|s| matches!(s.content, SectionContent::Unavailable { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSection {
    pub title: String,
    pub content: SectionContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetSummary {
    pub id: WidgetId,
    pub widget_type: WidgetType,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionContent {
    Metrics {
        metrics: Vec<Metric>,
        /// Requested ids with no observation yet.
        missing: Vec<MetricId>,
    },
    Dashboard {
        dashboard_id: DashboardId,
        name: String,
        widgets: Vec<WidgetSummary>,
    },
    Model {
        model_id: ModelId,
        name: String,
        status: ModelStatus,
        accuracy: Option<f64>,
        prediction: Option<Prediction>,
    },
    Text {
        body: String,
    },
    Unavailable {
        reason: String,
    },
}

/// Everything a report reads, captured once before compilation.
pub(crate) struct SourceSnapshot {
    metrics: MetricSnapshot,
    dashboards: HashMap<DashboardId, Dashboard>,
    models: HashMap<ModelId, PredictiveModel>,
}

impl SourceSnapshot {
    pub(crate) fn capture(
        report: &Report,
        metrics: &MetricStore,
        dashboards: &DashboardRegistry,
        models: &ModelRegistry,
    ) -> Self {
        let mut dashboard_copies = HashMap::new();
        let mut model_copies = HashMap::new();
        for section in &report.template.sections {
            match &section.source {
                SectionSource::Dashboard { dashboard_id } => {
                    if let Ok(d) = dashboards.get_dashboard(*dashboard_id) {
                        dashboard_copies.insert(*dashboard_id, d);
                    }
                }
                SectionSource::Model { model_id } => {
                    if let Ok(m) = models.get_model(*model_id) {
                        model_copies.insert(*model_id, m);
                    }
                }
                _ => {}
            }
        }
        Self {
            metrics: metrics.snapshot(),
            dashboards: dashboard_copies,
            models: model_copies,
        }
    }
}

pub(crate) fn compile(report: &Report, sources: &SourceSnapshot, at: DateTime<Utc>) -> CompiledReport {
    let sections = report
        .template
        .sections
        .iter()
        .map(|section| CompiledSection {
            title: section.title.clone(),
            content: compile_section(&section.source, sources),
        })
        .collect();

    CompiledReport {
        report_id: report.id,
        name: report.name.clone(),
        report_type: report.report_type,
        generated_at: at,
        styling: report.template.styling.clone(),
        sections,
    }
}

fn compile_section(source: &SectionSource, sources: &SourceSnapshot) -> SectionContent {
    match source {
        SectionSource::Metrics { metric_ids } => {
            let (found, missing): (Vec<&MetricId>, Vec<&MetricId>) = metric_ids
                .iter()
                .partition(|id| sources.metrics.contains(id));
            SectionContent::Metrics {
                metrics: found
                    .into_iter()
                    .filter_map(|id| sources.metrics.get(id).cloned())
                    .collect(),
                missing: missing.into_iter().cloned().collect(),
            }
        }
        SectionSource::Category { category } => SectionContent::Metrics {
            metrics: sources.metrics.in_category(*category).cloned().collect(),
            missing: Vec::new(),
        },
        SectionSource::Dashboard { dashboard_id } => match sources.dashboards.get(dashboard_id) {
            Some(d) => SectionContent::Dashboard {
                dashboard_id: *dashboard_id,
                name: d.name.clone(),
                widgets: d
                    .widgets
                    .iter()
                    .filter(|w| w.visible)
                    .map(|w| WidgetSummary {
                        id: w.id.clone(),
                        widget_type: w.widget_type,
                        title: w.title.clone(),
                    })
                    .collect(),
            },
            None => SectionContent::Unavailable {
                reason: format!("dashboard {dashboard_id} not found"),
            },
        },
        SectionSource::Model { model_id } => match sources.models.get(model_id) {
            Some(m) => SectionContent::Model {
                model_id: *model_id,
                name: m.name.clone(),
                status: m.status,
                accuracy: m.accuracy,
                prediction: m.latest_prediction().cloned(),
            },
            None => SectionContent::Unavailable {
                reason: format!("model {model_id} not found"),
            },
        },
        SectionSource::Text { body } => SectionContent::Text { body: body.clone() },
    }
}
