use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgebi_core::{AnalyticsError, AnalyticsResult, Entity, InsightId, MetricId};
use forgebi_metrics::MetricCategory;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Anomaly,
    Trend,
    Opportunity,
    Risk,
    Optimization,
    Correlation,
    Seasonality,
    ThresholdBreach,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Anomaly => "anomaly",
            InsightType::Trend => "trend",
            InsightType::Opportunity => "opportunity",
            InsightType::Risk => "risk",
            InsightType::Optimization => "optimization",
            InsightType::Correlation => "correlation",
            InsightType::Seasonality => "seasonality",
            InsightType::ThresholdBreach => "threshold_breach",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl InsightPriority {
    /// Bucket a 0–100 impact score.
    pub fn from_impact(impact: f64) -> Self {
        if impact >= 75.0 {
            InsightPriority::Critical
        } else if impact >= 50.0 {
            InsightPriority::High
        } else if impact >= 25.0 {
            InsightPriority::Medium
        } else {
            InsightPriority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightPriority::Low => "low",
            InsightPriority::Medium => "medium",
            InsightPriority::High => "high",
            InsightPriority::Critical => "critical",
        }
    }
}

/// Lifecycle: `new → viewed → acted → dismissed`, forward only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    New,
    Viewed,
    Acted,
    Dismissed,
}

impl InsightStatus {
    /// Still waiting for someone to act on it.
    pub fn is_open(&self) -> bool {
        matches!(self, InsightStatus::New | InsightStatus::Viewed)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub description: String,
    pub expected_impact: String,
    pub effort: Effort,
    pub timeline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub label: String,
    pub value: JsonValue,
}

impl Evidence {
    pub fn new(label: impl Into<String>, value: JsonValue) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: InsightId,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub priority: InsightPriority,
    pub title: String,
    pub description: String,
    /// 0–100.
    pub impact: f64,
    /// 0–100.
    pub confidence: f64,
    pub category: MetricCategory,
    pub metric_ids: Vec<MetricId>,
    pub recommendations: Vec<Recommendation>,
    pub detected_at: DateTime<Utc>,
    pub status: InsightStatus,
    pub action_taken: Option<String>,
    pub evidence: Vec<Evidence>,
    /// Name of the rule that produced this insight.
    pub rule: String,
}

impl Insight {
    /// Move to `next`. Backward and repeated transitions are conflicts.
    pub(crate) fn advance(&mut self, next: InsightStatus) -> AnalyticsResult<()> {
        if next <= self.status {
            return Err(AnalyticsError::conflict(format!(
                "insight {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn references(&self, metric: &MetricId) -> bool {
        self.metric_ids.iter().any(|m| m == metric)
    }
}

impl Entity for Insight {
    type Id = InsightId;
    const KIND: &'static str = "insight";

    fn id(&self) -> &InsightId {
        &self.id
    }
}
