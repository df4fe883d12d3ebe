//! Insight rules.
//!
//! A rule looks at a single metric from a snapshot and either proposes an
//! insight or stays silent. Rules must not mutate anything.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use forgebi_core::MetricId;
use forgebi_metrics::Metric;

use crate::insight::{Effort, Evidence, InsightType, Recommendation};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("rule {rule} failed: {reason}")]
pub struct RuleError {
    pub rule: &'static str,
    pub reason: String,
}

/// Proposed insight, before priority, id and status are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightDraft {
    pub insight_type: InsightType,
    pub title: String,
    pub description: String,
    pub impact: f64,
    pub confidence: f64,
    pub metric_ids: Vec<MetricId>,
    pub recommendations: Vec<Recommendation>,
    pub evidence: Vec<Evidence>,
}

pub trait InsightRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, metric: &Metric) -> Result<Option<InsightDraft>, RuleError>;
}

/// Flags metrics whose last change exceeds `threshold_pct` in either
/// direction.
///
/// Metrics without a previous value (or with a zero previous value, where
/// the percentage is undefined) are skipped.
#[derive(Debug, Clone)]
pub struct AnomalyRule {
    threshold_pct: f64,
    /// Fixed confidence assigned to every anomaly (rule weight).
    confidence: f64,
}

impl AnomalyRule {
    pub const NAME: &'static str = "anomaly.change_percentage";

    pub fn new(threshold_pct: f64) -> Self {
        Self {
            threshold_pct,
            confidence: 85.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

impl InsightRule for AnomalyRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn evaluate(&self, metric: &Metric) -> Result<Option<InsightDraft>, RuleError> {
        if !(self.threshold_pct.is_finite() && self.threshold_pct >= 0.0) {
            return Err(RuleError {
                rule: Self::NAME,
                reason: format!("threshold {} must be a finite non-negative number", self.threshold_pct),
            });
        }
        let (Some(previous), Some(pct)) = (metric.previous_value, metric.change_percentage) else {
            return Ok(None);
        };
        if pct.abs() <= self.threshold_pct {
            return Ok(None);
        }

        let impact = pct.abs().min(100.0);
        let direction = if pct > 0.0 { "increase" } else { "drop" };
        Ok(Some(InsightDraft {
            insight_type: InsightType::Anomaly,
            title: format!("Unusual {direction} in {}", metric.id),
            description: format!(
                "{} moved {pct:+.1}% ({previous} → {} {}), beyond the {:.1}% threshold",
                metric.id, metric.value, metric.unit, self.threshold_pct
            ),
            impact,
            confidence: self.confidence,
            metric_ids: vec![metric.id.clone()],
            recommendations: vec![Recommendation {
                action: "investigate".to_string(),
                description: format!("Review recent activity behind the {direction} in {}", metric.id),
                expected_impact: format!("explains a {:.1}% swing", pct.abs()),
                effort: Effort::Low,
                timeline: "24h".to_string(),
            }],
            evidence: vec![
                Evidence::new("previous_value", json!(previous)),
                Evidence::new("current_value", json!(metric.value)),
                Evidence::new("change_percentage", json!(pct)),
                Evidence::new("threshold_pct", json!(self.threshold_pct)),
            ],
        }))
    }
}

/// Static bounds for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub metric_id: MetricId,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Flags metrics whose current value sits outside configured bounds.
#[derive(Debug, Clone, Default)]
pub struct ThresholdBreachRule {
    thresholds: HashMap<MetricId, MetricThreshold>,
}

impl ThresholdBreachRule {
    pub const NAME: &'static str = "threshold.bounds";

    pub fn new(thresholds: impl IntoIterator<Item = MetricThreshold>) -> Self {
        Self {
            thresholds: thresholds
                .into_iter()
                .map(|t| (t.metric_id.clone(), t))
                .collect(),
        }
    }
}

impl InsightRule for ThresholdBreachRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn evaluate(&self, metric: &Metric) -> Result<Option<InsightDraft>, RuleError> {
        let Some(bounds) = self.thresholds.get(&metric.id) else {
            return Ok(None);
        };
        if let (Some(lo), Some(hi)) = (bounds.lower, bounds.upper) {
            if lo > hi {
                return Err(RuleError {
                    rule: Self::NAME,
                    reason: format!("lower bound {lo} exceeds upper bound {hi} for {}", metric.id),
                });
            }
        }

        let breached = match (bounds.lower, bounds.upper) {
            (Some(lo), _) if metric.value < lo => Some(("below", lo)),
            (_, Some(hi)) if metric.value > hi => Some(("above", hi)),
            _ => None,
        };
        let Some((side, bound)) = breached else {
            return Ok(None);
        };

        let impact = if bound == 0.0 {
            100.0
        } else {
            ((metric.value - bound).abs() / bound.abs() * 100.0).min(100.0)
        };

        Ok(Some(InsightDraft {
            insight_type: InsightType::ThresholdBreach,
            title: format!("{} is {side} its threshold", metric.id),
            description: format!(
                "{} is {} {}, {side} the configured bound of {bound}",
                metric.id, metric.value, metric.unit
            ),
            impact,
            confidence: 95.0,
            metric_ids: vec![metric.id.clone()],
            recommendations: vec![Recommendation {
                action: "restore_within_bounds".to_string(),
                description: format!("Bring {} back {} {bound}", metric.id, if side == "below" { "above" } else { "below" }),
                expected_impact: "returns the metric to its agreed operating range".to_string(),
                effort: Effort::Medium,
                timeline: "1w".to_string(),
            }],
            evidence: vec![
                Evidence::new("current_value", json!(metric.value)),
                Evidence::new("bound", json!(bound)),
            ],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    use forgebi_metrics::{MetricCategory, Trend};

    fn metric(value: f64, previous: Option<f64>) -> Metric {
        let change = previous.map(|p| value - p);
        Metric {
            id: MetricId::new("revenue"),
            category: MetricCategory::Sales,
            value,
            previous_value: previous,
            change,
            change_percentage: previous.filter(|p| *p != 0.0).map(|p| (value - p) * 100.0 / p),
            trend: Trend::from_change(change.unwrap_or(0.0)),
            timestamp: Utc::now(),
            unit: "USD".to_string(),
            dimensions: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn anomaly_impact_is_absolute_change_percentage() {
        let draft = AnomalyRule::new(20.0)
            .evaluate(&metric(130.0, Some(100.0)))
            .unwrap()
            .unwrap();
        assert_eq!(draft.insight_type, InsightType::Anomaly);
        assert!((draft.impact - 30.0).abs() < 1e-9);
        assert_eq!(draft.metric_ids, vec![MetricId::new("revenue")]);
    }

    #[test]
    fn anomaly_ignores_first_observation_and_small_changes() {
        let rule = AnomalyRule::new(20.0);
        assert!(rule.evaluate(&metric(130.0, None)).unwrap().is_none());
        assert!(rule.evaluate(&metric(110.0, Some(100.0))).unwrap().is_none());
    }

    #[test]
    fn anomaly_detects_drops_and_caps_impact() {
        let draft = AnomalyRule::new(20.0)
            .evaluate(&metric(500.0, Some(100.0)))
            .unwrap()
            .unwrap();
        assert_eq!(draft.impact, 100.0);

        let drop = AnomalyRule::new(20.0)
            .evaluate(&metric(50.0, Some(100.0)))
            .unwrap()
            .unwrap();
        assert!(drop.title.contains("drop"));
    }

    #[test]
    fn threshold_rule_flags_values_outside_bounds() {
        let rule = ThresholdBreachRule::new([MetricThreshold {
            metric_id: MetricId::new("revenue"),
            lower: Some(50.0),
            upper: Some(200.0),
        }]);
        assert!(rule.evaluate(&metric(100.0, None)).unwrap().is_none());

        let draft = rule.evaluate(&metric(25.0, None)).unwrap().unwrap();
        assert_eq!(draft.insight_type, InsightType::ThresholdBreach);
        assert!((draft.impact - 50.0).abs() < 1e-9);
    }

    #[test]
    fn inverted_bounds_are_a_rule_error() {
        let rule = ThresholdBreachRule::new([MetricThreshold {
            metric_id: MetricId::new("revenue"),
            lower: Some(10.0),
            upper: Some(1.0),
        }]);
        assert!(rule.evaluate(&metric(5.0, None)).is_err());
    }
}
