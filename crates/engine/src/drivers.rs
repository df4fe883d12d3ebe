//! The periodic jobs that keep the engine fresh.
//!
//! Each job is a [`DriverTask`]; the engine spawns them with a
//! [`crate::runner::PeriodicDriver`], tests call `tick` directly.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use forgebi_core::{AnalyticsResult, Clock};
use forgebi_insights::InsightEngine;
use forgebi_metrics::MetricStore;
use forgebi_models::ModelRegistry;
use forgebi_reports::ReportScheduler;

use crate::feed::MetricFeed;
use crate::runner::DriverTask;

/// Pulls observations from the feed into the metric store.
///
/// A feed failure fails the tick (and is retried); a single invalid
/// observation is logged and skipped.
pub struct MetricRefresh {
    feed: Arc<dyn MetricFeed>,
    metrics: Arc<MetricStore>,
}

impl MetricRefresh {
    pub fn new(feed: Arc<dyn MetricFeed>, metrics: Arc<MetricStore>) -> Self {
        Self { feed, metrics }
    }
}

impl DriverTask for MetricRefresh {
    fn name(&self) -> &'static str {
        "metric-refresh"
    }

    fn tick(&mut self) -> AnalyticsResult<()> {
        let observations = self.feed.poll()?;
        let polled = observations.len();
        let mut applied = 0usize;
        for obs in observations {
            let id = obs.id.clone();
            match self.metrics.upsert(obs) {
                Ok(_) => applied += 1,
                Err(e) => warn!(metric = %id, error = %e, "observation rejected"),
            }
        }
        debug!(polled, applied, "metric refresh finished");
        Ok(())
    }
}

pub struct InsightScan {
    insights: Arc<InsightEngine>,
}

impl InsightScan {
    pub fn new(insights: Arc<InsightEngine>) -> Self {
        Self { insights }
    }
}

impl DriverTask for InsightScan {
    fn name(&self) -> &'static str {
        "insight-scan"
    }

    fn tick(&mut self) -> AnalyticsResult<()> {
        let report = self.insights.scan();
        for failure in &report.errors {
            warn!(
                metric = %failure.metric_id,
                rule = failure.rule,
                error = %failure.error,
                "insight rule failed"
            );
        }
        if !report.generated.is_empty() {
            info!(
                scanned = report.scanned,
                generated = report.generated.len(),
                suppressed = report.suppressed,
                "insight scan finished"
            );
        }
        Ok(())
    }
}

/// Runs every report whose `next_run` has passed.
///
/// Individual run failures are recorded on the report and logged by the
/// scheduler; they do not fail the tick.
pub struct ReportDueCheck {
    reports: Arc<ReportScheduler>,
    clock: Arc<dyn Clock>,
}

impl ReportDueCheck {
    pub fn new(reports: Arc<ReportScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self { reports, clock }
    }
}

impl DriverTask for ReportDueCheck {
    fn name(&self) -> &'static str {
        "report-due"
    }

    fn tick(&mut self) -> AnalyticsResult<()> {
        let ran = self.reports.run_due(self.clock.now());
        if !ran.is_empty() {
            let failed = ran.iter().filter(|(_, r)| r.is_err()).count();
            info!(ran = ran.len(), failed, "due reports processed");
        }
        Ok(())
    }
}

/// Moves `ready` models older than `max_age` to `outdated`.
pub struct ModelStaleSweep {
    models: Arc<ModelRegistry>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl ModelStaleSweep {
    pub fn new(models: Arc<ModelRegistry>, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            models,
            max_age,
            clock,
        }
    }
}

impl DriverTask for ModelStaleSweep {
    fn name(&self) -> &'static str {
        "model-sweep"
    }

    fn tick(&mut self) -> AnalyticsResult<()> {
        let swept = self.models.mark_stale(self.max_age, self.clock.now());
        if !swept.is_empty() {
            debug!(count = swept.len(), "stale models swept");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use forgebi_core::{AnalyticsError, FetchError, ManualClock, MetricId};
    use forgebi_events::{AnalyticsEvent, InMemoryEventBus, SharedBus};
    use forgebi_insights::{InsightConfig, InsightFilter, InsightType};
    use forgebi_metrics::{MetricCategory, MetricObservation};

    /// Hands out one prepared batch per poll.
    struct Batches(Mutex<Vec<Result<Vec<MetricObservation>, FetchError>>>);

    impl MetricFeed for Batches {
        fn poll(&self) -> Result<Vec<MetricObservation>, FetchError> {
            let mut batches = self.0.lock().unwrap();
            if batches.is_empty() {
                Ok(Vec::new())
            } else {
                batches.remove(0)
            }
        }
    }

    fn fixture() -> (Arc<MetricStore>, Arc<ManualClock>, SharedBus) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ));
        let bus: SharedBus = Arc::new(InMemoryEventBus::<AnalyticsEvent>::new());
        let metrics = Arc::new(MetricStore::new(bus.clone(), clock.clone()));
        (metrics, clock, bus)
    }

    fn revenue(value: f64) -> MetricObservation {
        MetricObservation::new("revenue", value, "USD", MetricCategory::Sales)
    }

    #[test]
    fn refresh_skips_invalid_observations() {
        let (metrics, _clock, _bus) = fixture();
        let feed = Batches(Mutex::new(vec![Ok(vec![
            revenue(100.0),
            MetricObservation::new("broken", f64::NAN, "USD", MetricCategory::Sales),
        ])]));
        let mut driver = MetricRefresh::new(Arc::new(feed), metrics.clone());

        driver.tick().unwrap();

        assert_eq!(metrics.len(), 1);
        assert!(metrics.get(&MetricId::from("broken")).is_none());
    }

    #[test]
    fn refresh_fails_the_tick_when_the_feed_is_down() {
        let (metrics, _clock, _bus) = fixture();
        let feed = Batches(Mutex::new(vec![Err(FetchError::Unavailable("kpi-feed".into()))]));
        let mut driver = MetricRefresh::new(Arc::new(feed), metrics.clone());

        let err = driver.tick().unwrap_err();
        assert!(matches!(err, AnalyticsError::Fetch(FetchError::Unavailable(_))));
        assert!(metrics.is_empty());
    }

    #[test]
    fn refresh_then_scan_surfaces_the_revenue_anomaly() {
        let (metrics, clock, bus) = fixture();
        let feed = Batches(Mutex::new(vec![Ok(vec![revenue(100.0)]), Ok(vec![revenue(130.0)])]));
        let insights = Arc::new(InsightEngine::new(
            metrics.clone(),
            InsightConfig::default(),
            bus,
            clock.clone(),
        ));
        let mut refresh = MetricRefresh::new(Arc::new(feed), metrics);
        let mut scan = InsightScan::new(insights.clone());

        refresh.tick().unwrap();
        scan.tick().unwrap();
        assert!(insights.list_insights(&InsightFilter::default()).is_empty());

        clock.advance(Duration::hours(1));
        refresh.tick().unwrap();
        scan.tick().unwrap();
        scan.tick().unwrap();

        let found = insights.list_insights(&InsightFilter::default().with_type(InsightType::Anomaly));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].impact, 30.0);
    }
}
