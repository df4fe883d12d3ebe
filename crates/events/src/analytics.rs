//! The concrete events published by the analytics engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgebi_core::{DashboardId, InsightId, MetricId, ModelId, ReportId, WidgetId};

use crate::bus::{EventBus, EventFilter};
use crate::event::Event;

/// The bus every component publishes on.
pub type SharedBus = Arc<dyn EventBus<AnalyticsEvent>>;

/// Event names, usable as subscription filters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    MetricsUpdated,
    InsightGenerated,
    ModelTrainingStarted,
    ModelTrainingCompleted,
    ModelTrainingFailed,
    ReportGenerated,
    DashboardExported,
    DashboardUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MetricsUpdated => "metrics_updated",
            EventKind::InsightGenerated => "insight_generated",
            EventKind::ModelTrainingStarted => "model_training_started",
            EventKind::ModelTrainingCompleted => "model_training_completed",
            EventKind::ModelTrainingFailed => "model_training_failed",
            EventKind::ReportGenerated => "report_generated",
            EventKind::DashboardExported => "dashboard_exported",
            EventKind::DashboardUpdated => "dashboard_updated",
        }
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        EventFilter::Only(kind.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdated {
    pub metric_id: MetricId,
    pub value: f64,
    pub previous_value: Option<f64>,
    pub change_percentage: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightGenerated {
    pub insight_id: InsightId,
    pub insight_type: String,
    pub priority: String,
    pub metric_ids: Vec<MetricId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainingStarted {
    pub model_id: ModelId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainingCompleted {
    pub model_id: ModelId,
    pub accuracy: f64,
    pub confidence: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainingFailed {
    pub model_id: ModelId,
    /// Display form of the trainer's error.
    pub cause: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportGenerated {
    pub report_id: ReportId,
    pub delivered: usize,
    pub failed: usize,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardExported {
    pub dashboard_id: DashboardId,
    pub format: String,
    pub bytes: usize,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardUpdated {
    pub dashboard_id: DashboardId,
    /// The widget touched by the mutation, if any.
    pub widget_id: Option<WidgetId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalyticsEvent {
    MetricsUpdated(MetricsUpdated),
    InsightGenerated(InsightGenerated),
    ModelTrainingStarted(ModelTrainingStarted),
    ModelTrainingCompleted(ModelTrainingCompleted),
    ModelTrainingFailed(ModelTrainingFailed),
    ReportGenerated(ReportGenerated),
    DashboardExported(DashboardExported),
    DashboardUpdated(DashboardUpdated),
}

impl AnalyticsEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AnalyticsEvent::MetricsUpdated(_) => EventKind::MetricsUpdated,
            AnalyticsEvent::InsightGenerated(_) => EventKind::InsightGenerated,
            AnalyticsEvent::ModelTrainingStarted(_) => EventKind::ModelTrainingStarted,
            AnalyticsEvent::ModelTrainingCompleted(_) => EventKind::ModelTrainingCompleted,
            AnalyticsEvent::ModelTrainingFailed(_) => EventKind::ModelTrainingFailed,
            AnalyticsEvent::ReportGenerated(_) => EventKind::ReportGenerated,
            AnalyticsEvent::DashboardExported(_) => EventKind::DashboardExported,
            AnalyticsEvent::DashboardUpdated(_) => EventKind::DashboardUpdated,
        }
    }
}

impl Event for AnalyticsEvent {
    fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AnalyticsEvent::MetricsUpdated(e) => e.occurred_at,
            AnalyticsEvent::InsightGenerated(e) => e.occurred_at,
            AnalyticsEvent::ModelTrainingStarted(e) => e.occurred_at,
            AnalyticsEvent::ModelTrainingCompleted(e) => e.occurred_at,
            AnalyticsEvent::ModelTrainingFailed(e) => e.occurred_at,
            AnalyticsEvent::ReportGenerated(e) => e.occurred_at,
            AnalyticsEvent::DashboardExported(e) => e.occurred_at,
            AnalyticsEvent::DashboardUpdated(e) => e.occurred_at,
        }
    }
}
