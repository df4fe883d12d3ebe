use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use forgebi_connectors::{CachingConnector, DataSourceConnector};
use forgebi_core::Clock;
use forgebi_dashboards::DashboardRegistry;
use forgebi_events::{
    AnalyticsEvent, EventBus, EventEnvelope, EventKind, HandlerError, InMemoryEventBus, SharedBus,
    SubscriptionHandle,
};
use forgebi_insights::{InsightConfig, InsightEngine};
use forgebi_metrics::MetricStore;
use forgebi_models::{ModelRegistry, ModelTrainer};
use forgebi_reports::{RecipientDispatcher, ReportScheduler};

use crate::config::EngineConfig;
use crate::drivers::{InsightScan, MetricRefresh, ModelStaleSweep, ReportDueCheck};
use crate::feed::MetricFeed;
use crate::runner::{DriverHandle, DriverTask, PeriodicDriver};

/// External systems the engine talks to.
pub struct Collaborators {
    /// Executes widget and training data sources. Wrapped in a cache.
    pub connector: Arc<dyn DataSourceConnector>,
    pub trainer: Arc<dyn ModelTrainer>,
    pub dispatcher: Arc<dyn RecipientDispatcher>,
    pub feed: Arc<dyn MetricFeed>,
}

/// The assembled analytics engine: one bus, one clock, and the component
/// registries that share them.
pub struct AnalyticsEngine {
    config: EngineConfig,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
    feed: Arc<dyn MetricFeed>,
    metrics: Arc<MetricStore>,
    dashboards: Arc<DashboardRegistry>,
    insights: Arc<InsightEngine>,
    models: Arc<ModelRegistry>,
    reports: Arc<ReportScheduler>,
}

impl AnalyticsEngine {
    pub fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let cooldown = chrono::Duration::from_std(config.insight_cooldown)
            .context("insight cooldown out of range")?;

        let bus: SharedBus = Arc::new(InMemoryEventBus::<AnalyticsEvent>::new());
        let connector: Arc<dyn DataSourceConnector> = Arc::new(CachingConnector::new(
            collaborators.connector,
            clock.clone(),
        ));

        let metrics = Arc::new(MetricStore::new(bus.clone(), clock.clone()));
        let dashboards = Arc::new(DashboardRegistry::new(
            metrics.clone(),
            connector,
            bus.clone(),
            clock.clone(),
        ));
        let insights = Arc::new(InsightEngine::new(
            metrics.clone(),
            InsightConfig::default()
                .with_anomaly_threshold(config.anomaly_threshold_pct)
                .with_cooldown(cooldown),
            bus.clone(),
            clock.clone(),
        ));
        let models = Arc::new(ModelRegistry::new(
            collaborators.trainer,
            bus.clone(),
            clock.clone(),
        ));
        let reports = Arc::new(
            ReportScheduler::new(
                metrics.clone(),
                dashboards.clone(),
                models.clone(),
                collaborators.dispatcher,
                bus.clone(),
                clock.clone(),
            )
            .with_dispatch_timeout(config.dispatch_timeout),
        );

        Ok(Self {
            config,
            bus,
            clock,
            feed: collaborators.feed,
            metrics,
            dashboards,
            insights,
            models,
            reports,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &Arc<MetricStore> {
        &self.metrics
    }

    pub fn dashboards(&self) -> &Arc<DashboardRegistry> {
        &self.dashboards
    }

    pub fn insights(&self) -> &Arc<InsightEngine> {
        &self.insights
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn reports(&self) -> &Arc<ReportScheduler> {
        &self.reports
    }

    pub fn metric_refresh(&self) -> MetricRefresh {
        MetricRefresh::new(self.feed.clone(), self.metrics.clone())
    }

    pub fn insight_scan(&self) -> InsightScan {
        InsightScan::new(self.insights.clone())
    }

    pub fn report_due_check(&self) -> ReportDueCheck {
        ReportDueCheck::new(self.reports.clone(), self.clock.clone())
    }

    pub fn model_stale_sweep(&self) -> anyhow::Result<ModelStaleSweep> {
        let max_age = chrono::Duration::from_std(self.config.model_max_age)
            .context("model max age out of range")?;
        Ok(ModelStaleSweep::new(self.models.clone(), max_age, self.clock.clone()))
    }

    /// Spawn the background drivers.
    ///
    /// With `scan_on_refresh`, every `metrics_updated` event also requests an
    /// insight scan; bursts collapse into one pending scan.
    pub fn start(&self) -> anyhow::Result<EngineHandle> {
        let mut drivers = DriverSet::default();

        drivers.spawn(&self.config, self.config.metric_refresh, self.metric_refresh())?;
        let insight_scan = drivers.spawn(&self.config, self.config.insight_scan, self.insight_scan())?;
        drivers.spawn(&self.config, self.config.report_check, self.report_due_check())?;
        let sweep = match self.model_stale_sweep() {
            Ok(sweep) => sweep,
            Err(e) => {
                drivers.shutdown();
                return Err(e);
            }
        };
        drivers.spawn(&self.config, self.config.model_sweep, sweep)?;

        let scan_subscription = self.config.scan_on_refresh.then(|| {
            let trigger = drivers.handles[insight_scan].trigger_handle();
            self.bus.subscribe(
                EventKind::MetricsUpdated.into(),
                Arc::new(move |_: &EventEnvelope<AnalyticsEvent>| -> Result<(), HandlerError> {
                    trigger.fire();
                    Ok(())
                }),
            )
        });

        info!(drivers = drivers.handles.len(), "analytics engine started");

        Ok(EngineHandle {
            drivers: drivers.handles,
            insight_scan,
            scan_subscription,
            models: self.models.clone(),
        })
    }
}

#[derive(Default)]
struct DriverSet {
    handles: Vec<DriverHandle>,
}

impl DriverSet {
    /// Spawn one driver; on failure stop the ones already running.
    fn spawn<T: DriverTask>(
        &mut self,
        config: &EngineConfig,
        every: std::time::Duration,
        task: T,
    ) -> anyhow::Result<usize> {
        let name = task.name();
        let spawned = PeriodicDriver::every(every)
            .with_retries(config.max_retries, config.base_backoff)
            .spawn(task);
        match spawned {
            Ok(handle) => {
                self.handles.push(handle);
                Ok(self.handles.len() - 1)
            }
            Err(e) => {
                self.shutdown();
                Err(e).with_context(|| format!("failed to start {name} driver"))
            }
        }
    }

    fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.shutdown();
        }
    }
}

/// Running drivers. Call [`EngineHandle::shutdown`] to stop them.
pub struct EngineHandle {
    drivers: Vec<DriverHandle>,
    insight_scan: usize,
    scan_subscription: Option<SubscriptionHandle>,
    models: Arc<ModelRegistry>,
}

impl EngineHandle {
    pub fn trigger_insight_scan(&self) {
        self.drivers[self.insight_scan].trigger();
    }

    /// Trigger the driver with the given name. Returns false if unknown.
    pub fn trigger(&self, driver: &str) -> bool {
        match self.drivers.iter().find(|d| d.name() == driver) {
            Some(d) => {
                d.trigger();
                true
            }
            None => false,
        }
    }

    pub fn driver_names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(DriverHandle::name).collect()
    }

    /// Stop every driver, then signal in-flight training runs to cancel.
    pub fn shutdown(self) {
        if let Some(sub) = self.scan_subscription {
            sub.unsubscribe();
        }
        for driver in self.drivers {
            driver.shutdown();
        }
        let cancelled = self.models.cancel_all();
        if cancelled > 0 {
            warn!(cancelled, "training runs cancelled at shutdown");
        }
        info!("analytics engine stopped");
    }
}
