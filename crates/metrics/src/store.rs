use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use forgebi_core::{AnalyticsError, AnalyticsResult, Clock, MetricId};
use forgebi_events::{AnalyticsEvent, EventBus, MetricsUpdated, SharedBus};

use crate::metric::{Metric, MetricCategory, MetricObservation};

/// Point-in-time copy of every metric.
///
/// Taken under a single read lock, so it never mixes old and new values of
/// the same metric even while ingestion keeps writing.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    taken_at: DateTime<Utc>,
    metrics: BTreeMap<MetricId, Metric>,
}

impl MetricSnapshot {
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn get(&self, id: &MetricId) -> Option<&Metric> {
        self.metrics.get(id)
    }

    pub fn contains(&self, id: &MetricId) -> bool {
        self.metrics.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    pub fn in_category(&self, category: MetricCategory) -> impl Iterator<Item = &Metric> {
        self.metrics.values().filter(move |m| m.category == category)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Holds the latest state of every metric.
///
/// `upsert` is the only write path; it is meant to be called by the metric
/// refresh driver. Metrics are never removed during the process lifetime.
pub struct MetricStore {
    metrics: RwLock<HashMap<MetricId, Metric>>,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
}

impl MetricStore {
    pub fn new(bus: SharedBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            bus,
            clock,
        }
    }

    /// Record a new observation and publish exactly one `metrics_updated`.
    ///
    /// Invalid input leaves the store unchanged and publishes nothing.
    pub fn upsert(&self, observation: MetricObservation) -> AnalyticsResult<Metric> {
        observation.validate()?;
        let now = self.clock.now();

        let updated = {
            let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
            match metrics.get_mut(&observation.id) {
                Some(existing) => {
                    if existing.category != observation.category {
                        return Err(AnalyticsError::validation(format!(
                            "metric {} is {:?}, not {:?}",
                            existing.id, existing.category, observation.category
                        )));
                    }
                    existing.observe(observation, now);
                    existing.clone()
                }
                None => {
                    let metric = Metric::first(observation, now);
                    metrics.insert(metric.id.clone(), metric.clone());
                    metric
                }
            }
        };

        debug!(
            metric = %updated.id,
            value = updated.value,
            trend = ?updated.trend,
            "metric updated"
        );

        self.bus.publish(AnalyticsEvent::MetricsUpdated(MetricsUpdated {
            metric_id: updated.id.clone(),
            value: updated.value,
            previous_value: updated.previous_value,
            change_percentage: updated.change_percentage,
            occurred_at: updated.timestamp,
        }));

        Ok(updated)
    }

    pub fn get(&self, id: &MetricId) -> Option<Metric> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All metrics (optionally one category), ordered by id.
    pub fn list(&self, category: Option<MetricCategory>) -> Vec<Metric> {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Metric> = metrics
            .values()
            .filter(|m| category.is_none_or(|c| m.category == c))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        MetricSnapshot {
            taken_at: self.clock.now(),
            metrics: metrics
                .iter()
                .map(|(id, m)| (id.clone(), m.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
