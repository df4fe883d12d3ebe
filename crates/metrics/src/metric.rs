use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgebi_core::{AnalyticsError, AnalyticsResult, MetricId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Sales,
    Marketing,
    Inventory,
    Finance,
    Customer,
    Operational,
    Hr,
    Logistics,
    Performance,
    Compliance,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Trend::Up
        } else if change < 0.0 {
            Trend::Down
        } else {
            Trend::Stable
        }
    }
}

/// A raw value reported by the ingestion side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub id: MetricId,
    pub value: f64,
    pub unit: String,
    pub category: MetricCategory,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
}

impl MetricObservation {
    pub fn new(
        id: impl Into<MetricId>,
        value: f64,
        unit: impl Into<String>,
        category: MetricCategory,
    ) -> Self {
        Self {
            id: id.into(),
            value,
            unit: unit.into(),
            category,
            dimensions: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.id.is_blank() {
            return Err(AnalyticsError::validation("metric id cannot be empty"));
        }
        if !self.value.is_finite() {
            return Err(AnalyticsError::validation(format!(
                "metric {} value must be a finite number",
                self.id
            )));
        }
        if self.unit.trim().is_empty() {
            return Err(AnalyticsError::validation(format!(
                "metric {} unit cannot be empty",
                self.id
            )));
        }
        Ok(())
    }
}

/// Latest known state of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: MetricId,
    pub category: MetricCategory,
    pub value: f64,
    pub previous_value: Option<f64>,
    pub change: Option<f64>,
    /// `None` when there is no previous value or it was zero.
    pub change_percentage: Option<f64>,
    pub trend: Trend,
    pub timestamp: DateTime<Utc>,
    pub unit: String,
    pub dimensions: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, JsonValue>,
}

impl Metric {
    /// First observation of a metric: no history, stable trend.
    pub(crate) fn first(obs: MetricObservation, at: DateTime<Utc>) -> Self {
        Self {
            id: obs.id,
            category: obs.category,
            value: obs.value,
            previous_value: None,
            change: None,
            change_percentage: None,
            trend: Trend::Stable,
            timestamp: at,
            unit: obs.unit,
            dimensions: obs.dimensions,
            metadata: obs.metadata,
        }
    }

    /// Shift current → previous and recompute the derived fields.
    ///
    /// `timestamp` never moves backwards, even if `at` does.
    pub(crate) fn observe(&mut self, obs: MetricObservation, at: DateTime<Utc>) {
        let previous = self.value;
        let change = obs.value - previous;

        self.previous_value = Some(previous);
        self.value = obs.value;
        self.change = Some(change);
        self.change_percentage = change_percentage(change, previous);
        self.trend = Trend::from_change(change);
        self.timestamp = self.timestamp.max(at);
        self.unit = obs.unit;
        self.dimensions = obs.dimensions;
        self.metadata = obs.metadata;
    }

    pub fn has_history(&self) -> bool {
        self.previous_value.is_some()
    }
}

fn change_percentage(change: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let pct = change * 100.0 / previous;
    pct.is_finite().then_some(pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_previous_has_no_percentage() {
        assert_eq!(change_percentage(5.0, 0.0), None);
        assert_eq!(change_percentage(30.0, 100.0), Some(30.0));
    }

    #[test]
    fn negative_previous_keeps_sign_of_ratio() {
        // -50 → -25 is a change of +25 over a base of -50.
        assert_eq!(change_percentage(25.0, -50.0), Some(-50.0));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let obs = MetricObservation::new("revenue", f64::NAN, "USD", MetricCategory::Sales);
        assert!(matches!(obs.validate(), Err(AnalyticsError::Validation(_))));
    }
}
