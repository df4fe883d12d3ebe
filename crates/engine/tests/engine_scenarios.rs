use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;

use forgebi_connectors::{DataSource, DataSourceConnector, DataSourceType, Row};
use forgebi_core::{DeliveryError, FetchError, ManualClock, MetricId, ModelId};
use forgebi_dashboards::{NewDashboard, Widget, WidgetType};
use forgebi_engine::{AnalyticsEngine, Collaborators, DriverTask, EngineConfig, MetricFeed};
use forgebi_events::{EventBus, EventKind};
use forgebi_insights::{InsightFilter, InsightPriority, InsightType};
use forgebi_metrics::{MetricCategory, MetricObservation};
use forgebi_models::{Feature, FeatureType, LinearTrendTrainer, ModelStatus, ModelType, NewModel, TrainingRange};
use forgebi_reports::{
    CompiledReport, DeliveryReceipt, NewReport, Recipient, RecipientDispatcher, ReportSchedule,
    ReportSection, ReportType, SectionContent, SectionSource,
};

/// Daily revenue for training plus a KPI table for widgets.
#[derive(Default)]
struct Warehouse {
    fetches: AtomicUsize,
}

impl DataSourceConnector for Warehouse {
    fn fetch(&self, source: &DataSource) -> Result<Vec<Row>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match source.query.as_deref() {
            Some("daily_revenue") => {
                let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
                Ok((0..60u64)
                    .map(|d| {
                        let mut row = Row::new();
                        let date = start.checked_add_days(Days::new(d)).unwrap();
                        row.insert("date".into(), json!(date.to_string()));
                        row.insert("revenue".into(), json!(500.0 + 5.0 * d as f64));
                        row
                    })
                    .collect())
            }
            Some("kpis") => {
                let mut row = Row::new();
                row.insert("orders".into(), json!(42));
                Ok(vec![row])
            }
            _ => Err(FetchError::InvalidSource(source.connection.clone())),
        }
    }
}

#[derive(Default)]
struct QuietFeed;

impl MetricFeed for QuietFeed {
    fn poll(&self) -> Result<Vec<MetricObservation>, FetchError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct Outbox {
    delivered: Mutex<Vec<(String, CompiledReport)>>,
}

impl RecipientDispatcher for Outbox {
    fn send(&self, report: &CompiledReport, recipient: &Recipient) -> Result<DeliveryReceipt, DeliveryError> {
        if recipient.address.starts_with("bounce") {
            return Err(DeliveryError::Unreachable(recipient.address.clone()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((recipient.address.clone(), report.clone()));
        Ok(DeliveryReceipt {
            delivered_at: report.generated_at,
            reference: Some(format!("msg-{}", recipient.address)),
        })
    }
}

struct Harness {
    engine: AnalyticsEngine,
    clock: Arc<ManualClock>,
    warehouse: Arc<Warehouse>,
    outbox: Arc<Outbox>,
}

fn harness(config: EngineConfig) -> Harness {
    forgebi_observability::init();

    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    let warehouse = Arc::new(Warehouse::default());
    let outbox = Arc::new(Outbox::default());
    let trainer = LinearTrendTrainer::new(warehouse.clone(), clock.clone());

    let engine = AnalyticsEngine::new(
        config,
        Collaborators {
            connector: warehouse.clone(),
            trainer: Arc::new(trainer),
            dispatcher: outbox.clone(),
            feed: Arc::new(QuietFeed),
        },
        clock.clone(),
    )
    .unwrap();

    Harness {
        engine,
        clock,
        warehouse,
        outbox,
    }
}

fn observe(h: &Harness, id: &str, value: f64) {
    h.engine
        .metrics()
        .upsert(MetricObservation::new(id, value, "USD", MetricCategory::Sales))
        .unwrap();
}

#[test]
fn running_engine_scans_after_a_metric_jump() {
    let h = harness(
        EngineConfig::default()
            .with_metric_refresh(Duration::from_secs(3600))
            .with_insight_scan(Duration::from_secs(3600))
            .with_report_check(Duration::from_secs(3600)),
    );
    let handle = h.engine.start().unwrap();
    assert_eq!(handle.driver_names().len(), 4);

    observe(&h, "revenue", 100.0);
    h.clock.advance(chrono::Duration::hours(1));
    observe(&h, "revenue", 130.0);

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut found = Vec::new();
    while Instant::now() < deadline {
        found = h
            .engine
            .insights()
            .list_insights(&InsightFilter::default().for_metric("revenue"));
        if !found.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.shutdown();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].insight_type, InsightType::Anomaly);
    assert_eq!(found[0].impact, 30.0);
    assert_eq!(found[0].priority, InsightPriority::Medium);
}

#[test]
fn repeated_scans_inside_the_cooldown_keep_one_insight() {
    let h = harness(EngineConfig::default().with_anomaly_threshold(10.0));
    let mut scan = h.engine.insight_scan();

    observe(&h, "revenue", 100.0);
    observe(&h, "revenue", 115.0);
    scan.tick().unwrap();
    h.clock.advance(chrono::Duration::hours(2));
    scan.tick().unwrap();

    let open = h.engine.insights().list_insights(&InsightFilter::default());
    assert_eq!(open.len(), 1);
}

#[test]
fn due_report_is_compiled_and_delivered() {
    let h = harness(EngineConfig::default().with_dispatch_timeout(Duration::from_secs(2)));
    observe(&h, "revenue", 130.0);

    let dashboard = h
        .engine
        .dashboards()
        .create_dashboard(
            NewDashboard::new("Sales", "ops")
                .with_widget(Widget::new("rev", WidgetType::Metric, "Revenue", DataSource::metric("revenue")))
                .with_widget(Widget::new(
                    "orders",
                    WidgetType::Table,
                    "Orders",
                    DataSource::new(DataSourceType::Sql, "warehouse")
                        .with_query("kpis")
                        .with_cache(300),
                )),
        )
        .unwrap();

    let report = h
        .engine
        .reports()
        .create_report(
            NewReport::new(
                "Morning sales",
                ReportType::Sales,
                ReportSchedule::daily(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
                "ops",
            )
            .with_section(ReportSection::new(
                "Headline",
                SectionSource::Metrics {
                    metric_ids: vec![MetricId::from("revenue"), MetricId::from("margin")],
                },
            ))
            .with_section(ReportSection::new("Dashboard", SectionSource::Dashboard { dashboard_id: dashboard }))
            .with_section(ReportSection::new("Forecast", SectionSource::Model { model_id: ModelId::new() }))
            .with_recipient(Recipient::email("cfo@example.com"))
            .with_recipient(Recipient::email("bounce@example.com"))
            .with_recipient(Recipient::email("sales@example.com")),
        )
        .unwrap();

    let generated = h.engine.bus().subscribe_channel(EventKind::ReportGenerated.into());
    let mut due = h.engine.report_due_check();

    due.tick().unwrap();
    assert!(h.outbox.delivered.lock().unwrap().is_empty());

    h.clock.advance(chrono::Duration::hours(1));
    due.tick().unwrap();

    let stored = h.engine.reports().get_report(report).unwrap();
    let summary = stored.last_outcome.unwrap();
    assert_eq!((summary.delivered, summary.failed), (2, 1));
    assert_eq!(stored.last_run, Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    assert_eq!(stored.next_run, Some(Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap()));
    assert!(generated.try_recv().is_ok());

    let delivered = h.outbox.delivered.lock().unwrap();
    let (_, compiled) = &delivered[0];
    match &compiled.sections[0].content {
        SectionContent::Metrics { metrics, missing } => {
            assert_eq!(metrics.len(), 1);
            assert_eq!(missing, &vec![MetricId::from("margin")]);
        }
        other => panic!("unexpected section {other:?}"),
    }
    assert!(matches!(compiled.sections[1].content, SectionContent::Dashboard { .. }));
    assert_eq!(compiled.unavailable_sections().count(), 1);

    // Second tick within the same day runs nothing.
    drop(delivered);
    due.tick().unwrap();
    assert_eq!(h.outbox.delivered.lock().unwrap().len(), 2);
}

#[test]
fn dashboard_renders_go_through_the_connector_cache() {
    let h = harness(EngineConfig::default());
    let id = h
        .engine
        .dashboards()
        .create_dashboard(NewDashboard::new("Ops", "ops").with_widget(Widget::new(
            "orders",
            WidgetType::Table,
            "Orders",
            DataSource::new(DataSourceType::Sql, "warehouse")
                .with_query("kpis")
                .with_cache(300),
        )))
        .unwrap();

    let first = h.engine.dashboards().render_dashboard(id).unwrap();
    let second = h.engine.dashboards().render_dashboard(id).unwrap();

    assert_eq!(first.failed_widgets().count(), 0);
    assert_eq!(first.widgets[0].data, second.widgets[0].data);
    assert_eq!(h.warehouse.fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn trained_model_forecasts_and_ages_out() {
    let h = harness(EngineConfig::default().with_model_max_age(Duration::from_secs(7 * 24 * 3600)));
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let id = h
        .engine
        .models()
        .register_model(
            NewModel::new(
                "revenue forecast",
                ModelType::SalesForecast,
                "revenue",
                TrainingRange::new(start, start + chrono::Duration::days(59)),
            )
            .with_feature(Feature::new("date", FeatureType::Temporal, 1.0))
            .with_horizon(90)
            .with_data_source(DataSource::new(DataSourceType::Sql, "warehouse").with_query("daily_revenue")),
        )
        .unwrap();

    let completed = h.engine.bus().subscribe_channel(EventKind::ModelTrainingCompleted.into());
    h.engine.models().train(id).unwrap().wait().unwrap();

    let prediction = h.engine.models().predict(id).unwrap();
    assert_eq!(prediction.values.len(), 90);
    assert!(prediction.values.windows(2).all(|w| w[0].date < w[1].date));
    assert!(completed.try_recv().is_ok());

    let mut sweep = h.engine.model_stale_sweep().unwrap();
    h.clock.advance(chrono::Duration::days(3));
    sweep.tick().unwrap();
    assert_eq!(h.engine.models().get_model(id).unwrap().status, ModelStatus::Ready);

    h.clock.advance(chrono::Duration::days(5));
    sweep.tick().unwrap();
    assert_eq!(h.engine.models().get_model(id).unwrap().status, ModelStatus::Outdated);

    // Outdated models can be retrained; the forecast is still served meanwhile.
    assert!(h.engine.models().predict(id).is_ok());
    h.engine.models().train(id).unwrap().wait().unwrap();
}

#[test]
fn invalid_configuration_is_rejected_at_construction() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    let warehouse = Arc::new(Warehouse::default());
    let result = AnalyticsEngine::new(
        EngineConfig::default().with_anomaly_threshold(f64::NAN),
        Collaborators {
            connector: warehouse.clone(),
            trainer: Arc::new(LinearTrendTrainer::new(warehouse, clock.clone())),
            dispatcher: Arc::new(Outbox::default()),
            feed: Arc::new(QuietFeed),
        },
        clock,
    );
    assert!(result.is_err());
}
