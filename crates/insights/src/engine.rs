use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use forgebi_core::{
    AnalyticsError, AnalyticsResult, Clock, Entity, InMemoryRepository, InsightId, MetricId,
    Repository,
};
use forgebi_events::{AnalyticsEvent, EventBus, InsightGenerated, SharedBus};
use forgebi_metrics::{Metric, MetricSnapshot, MetricStore};

use crate::insight::{Insight, InsightPriority, InsightStatus, InsightType};
use crate::rules::{AnomalyRule, InsightDraft, InsightRule, MetricThreshold, ThresholdBreachRule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightConfig {
    /// Absolute change percentage above which a metric is anomalous.
    pub anomaly_threshold_pct: f64,
    /// An open insight of the same type for the same metrics suppresses new
    /// ones for this long.
    #[serde(with = "cooldown_secs")]
    pub cooldown: Duration,
    #[serde(default)]
    pub thresholds: Vec<MetricThreshold>,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold_pct: 20.0,
            cooldown: Duration::hours(24),
            thresholds: Vec::new(),
        }
    }
}

impl InsightConfig {
    pub fn with_anomaly_threshold(mut self, pct: f64) -> Self {
        self.anomaly_threshold_pct = pct;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_threshold(mut self, threshold: MetricThreshold) -> Self {
        self.thresholds.push(threshold);
        self
    }
}

mod cooldown_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("cooldown of {secs}s is out of range")))
    }
}

/// A rule that failed (or panicked) on one metric during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFailure {
    pub metric_id: MetricId,
    pub rule: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub scanned: usize,
    pub generated: Vec<InsightId>,
    /// Drafts dropped because an open insight already covers them.
    pub suppressed: usize,
    pub errors: Vec<RuleFailure>,
}

/// Query for [`InsightEngine::list_insights`]. Empty filter matches all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightFilter {
    pub status: Option<InsightStatus>,
    pub insight_type: Option<InsightType>,
    pub metric_id: Option<MetricId>,
    pub min_priority: Option<InsightPriority>,
}

impl InsightFilter {
    pub fn with_status(mut self, status: InsightStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, insight_type: InsightType) -> Self {
        self.insight_type = Some(insight_type);
        self
    }

    pub fn for_metric(mut self, metric_id: impl Into<MetricId>) -> Self {
        self.metric_id = Some(metric_id.into());
        self
    }

    pub fn at_least(mut self, priority: InsightPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    fn matches(&self, insight: &Insight) -> bool {
        self.status.is_none_or(|s| insight.status == s)
            && self.insight_type.is_none_or(|t| insight.insight_type == t)
            && self.metric_id.as_ref().is_none_or(|m| insight.references(m))
            && self.min_priority.is_none_or(|p| insight.priority >= p)
    }
}

/// Applies insight rules to metric snapshots and tracks the resulting
/// insights through their lifecycle.
pub struct InsightEngine {
    metrics: Arc<MetricStore>,
    rules: Vec<Box<dyn InsightRule>>,
    cooldown: Duration,
    insights: InMemoryRepository<Insight>,
    /// Serializes scans so dedup sees the previous scan's output.
    scan_lock: Mutex<()>,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
}

impl InsightEngine {
    pub fn new(
        metrics: Arc<MetricStore>,
        config: InsightConfig,
        bus: SharedBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut rules: Vec<Box<dyn InsightRule>> =
            vec![Box::new(AnomalyRule::new(config.anomaly_threshold_pct))];
        if !config.thresholds.is_empty() {
            rules.push(Box::new(ThresholdBreachRule::new(config.thresholds)));
        }
        Self {
            metrics,
            rules,
            cooldown: config.cooldown,
            insights: InMemoryRepository::new(),
            scan_lock: Mutex::new(()),
            bus,
            clock,
        }
    }

    pub fn with_rule(mut self, rule: impl InsightRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run every rule over a fresh metric snapshot.
    pub fn scan(&self) -> ScanReport {
        let _guard = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.metrics.snapshot();
        let now = self.clock.now();

        let mut report = ScanReport {
            scanned: snapshot.len(),
            ..ScanReport::default()
        };

        for metric in snapshot.iter() {
            for rule in &self.rules {
                let draft = match evaluate_isolated(rule.as_ref(), metric) {
                    Ok(Some(draft)) => draft,
                    Ok(None) => continue,
                    Err(error) => {
                        warn!(metric = %metric.id, rule = rule.name(), error = %error, "insight rule failed");
                        report.errors.push(RuleFailure {
                            metric_id: metric.id.clone(),
                            rule: rule.name(),
                            error,
                        });
                        continue;
                    }
                };

                if let Err(error) = check_references(&draft, &snapshot) {
                    warn!(metric = %metric.id, rule = rule.name(), error = %error, "insight draft rejected");
                    report.errors.push(RuleFailure {
                        metric_id: metric.id.clone(),
                        rule: rule.name(),
                        error: error.to_string(),
                    });
                    continue;
                }

                if self.is_duplicate(&draft, now) {
                    debug!(metric = %metric.id, insight_type = draft.insight_type.as_str(), "insight suppressed by cooldown");
                    report.suppressed += 1;
                    continue;
                }

                match self.store(draft, metric, rule.name(), now) {
                    Ok(id) => report.generated.push(id),
                    Err(e) => {
                        warn!(metric = %metric.id, rule = rule.name(), error = %e, "insight not stored");
                        report.errors.push(RuleFailure {
                            metric_id: metric.id.clone(),
                            rule: rule.name(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            scanned = report.scanned,
            generated = report.generated.len(),
            suppressed = report.suppressed,
            errors = report.errors.len(),
            "insight scan finished"
        );
        report
    }

    pub fn get_insight(&self, id: InsightId) -> AnalyticsResult<Insight> {
        self.insights
            .get(&id)
            .ok_or_else(|| AnalyticsError::not_found(Insight::KIND, id))
    }

    /// Matching insights, newest first.
    pub fn list_insights(&self, filter: &InsightFilter) -> Vec<Insight> {
        let mut out: Vec<Insight> = self
            .insights
            .list()
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        out.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        out
    }

    pub fn mark_viewed(&self, id: InsightId) -> AnalyticsResult<Insight> {
        self.transition(id, InsightStatus::Viewed, None)
    }

    pub fn mark_acted(&self, id: InsightId, note: impl Into<String>) -> AnalyticsResult<Insight> {
        let note = note.into();
        if note.trim().is_empty() {
            return Err(AnalyticsError::validation("action note cannot be empty"));
        }
        self.transition(id, InsightStatus::Acted, Some(note))
    }

    pub fn dismiss(&self, id: InsightId) -> AnalyticsResult<Insight> {
        self.transition(id, InsightStatus::Dismissed, None)
    }

    fn transition(
        &self,
        id: InsightId,
        next: InsightStatus,
        note: Option<String>,
    ) -> AnalyticsResult<Insight> {
        let updated = self.insights.update(&id, |insight| {
            insight.advance(next)?;
            if note.is_some() {
                insight.action_taken = note;
            }
            Ok(insight.clone())
        })?;
        debug!(insight = %id, status = ?next, "insight status changed");
        Ok(updated)
    }

    fn is_duplicate(&self, draft: &InsightDraft, now: DateTime<Utc>) -> bool {
        let window_start = now.checked_sub_signed(self.cooldown).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.insights.any(|existing| {
            existing.status.is_open()
                && existing.insight_type == draft.insight_type
                && existing.detected_at > window_start
                && same_metrics(&existing.metric_ids, &draft.metric_ids)
        })
    }

    fn store(
        &self,
        draft: InsightDraft,
        source: &Metric,
        rule: &'static str,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<InsightId> {
        let impact = draft.impact.clamp(0.0, 100.0);
        let insight = Insight {
            id: InsightId::new(),
            insight_type: draft.insight_type,
            priority: InsightPriority::from_impact(impact),
            title: draft.title,
            description: draft.description,
            impact,
            confidence: draft.confidence.clamp(0.0, 100.0),
            category: source.category,
            metric_ids: draft.metric_ids,
            recommendations: draft.recommendations,
            detected_at: now,
            status: InsightStatus::New,
            action_taken: None,
            evidence: draft.evidence,
            rule: rule.to_string(),
        };
        let event = InsightGenerated {
            insight_id: insight.id,
            insight_type: insight.insight_type.as_str().to_string(),
            priority: insight.priority.as_str().to_string(),
            metric_ids: insight.metric_ids.clone(),
            occurred_at: now,
        };
        let id = insight.id;
        self.insights.insert(insight)?;

        info!(
            insight = %id,
            rule,
            insight_type = event.insight_type,
            priority = event.priority,
            "insight generated"
        );
        self.bus.publish(AnalyticsEvent::InsightGenerated(event));
        Ok(id)
    }
}

fn evaluate_isolated(rule: &dyn InsightRule, metric: &Metric) -> Result<Option<InsightDraft>, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(metric))) {
        Ok(Ok(draft)) => Ok(draft),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("rule panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("rule panicked: {s}")
    } else {
        "rule panicked".to_string()
    }
}

fn check_references(draft: &InsightDraft, snapshot: &MetricSnapshot) -> AnalyticsResult<()> {
    if draft.metric_ids.is_empty() {
        return Err(AnalyticsError::validation("insight must reference at least one metric"));
    }
    if let Some(missing) = draft.metric_ids.iter().find(|id| !snapshot.contains(id)) {
        return Err(AnalyticsError::not_found("metric", missing));
    }
    Ok(())
}

fn same_metrics(a: &[MetricId], b: &[MetricId]) -> bool {
    let mut a: Vec<&MetricId> = a.iter().collect();
    let mut b: Vec<&MetricId> = b.iter().collect();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}
