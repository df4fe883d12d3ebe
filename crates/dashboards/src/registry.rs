use std::sync::Arc;

use tracing::info;

use forgebi_connectors::DataSourceConnector;
use forgebi_core::{
    AnalyticsError, AnalyticsResult, Clock, DashboardId, Entity, InMemoryRepository, Principal,
    Repository, WidgetId,
};
use forgebi_events::{AnalyticsEvent, DashboardExported, DashboardUpdated, EventBus, SharedBus};
use forgebi_metrics::MetricStore;

use crate::dashboard::{Dashboard, Layout, NewDashboard};
use crate::export::{self, DashboardExport, ExportFormat};
use crate::render::{self, RenderedDashboard};
use crate::validation::{validate_layout, validate_widget, validate_widgets};
use crate::widget::Widget;

/// Whether `upsert_widget` added a widget or replaced one in place.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WidgetUpsert {
    Inserted,
    Replaced,
}

/// Owns dashboards and their widgets.
///
/// Widget mutations are last-writer-wins at whole-widget granularity and run
/// under the dashboard's own lock (see [`Repository::update`]), so readers
/// never see a half-updated widget list.
pub struct DashboardRegistry {
    dashboards: InMemoryRepository<Dashboard>,
    metrics: Arc<MetricStore>,
    connector: Arc<dyn DataSourceConnector>,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
}

impl DashboardRegistry {
    pub fn new(
        metrics: Arc<MetricStore>,
        connector: Arc<dyn DataSourceConnector>,
        bus: SharedBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dashboards: InMemoryRepository::new(),
            metrics,
            connector,
            bus,
            clock,
        }
    }

    pub fn create_dashboard(&self, spec: NewDashboard) -> AnalyticsResult<DashboardId> {
        if spec.name.trim().is_empty() {
            return Err(AnalyticsError::validation("dashboard name cannot be empty"));
        }
        if spec.created_by.trim().is_empty() {
            return Err(AnalyticsError::validation("dashboard creator cannot be empty"));
        }
        if spec.refresh_interval_secs == 0 {
            return Err(AnalyticsError::validation("dashboard refresh interval must be positive"));
        }
        validate_layout(&spec.layout)?;
        validate_widgets(&spec.widgets, &spec.layout, spec.refresh_interval_secs)?;

        let id = DashboardId::new();
        let dashboard = Dashboard::from_spec(id, spec, self.clock.now());
        let widgets = dashboard.widgets.len();
        self.dashboards.insert(dashboard)?;

        info!(dashboard = %id, widgets, "dashboard created");
        Ok(id)
    }

    pub fn get_dashboard(&self, id: DashboardId) -> AnalyticsResult<Dashboard> {
        self.dashboards
            .get(&id)
            .filter(|d| !d.archived)
            .ok_or_else(|| AnalyticsError::not_found(Dashboard::KIND, id))
    }

    /// Dashboards visible to `principal`; anonymous callers see public ones.
    pub fn list_dashboards(&self, principal: Option<&Principal>) -> Vec<Dashboard> {
        self.dashboards
            .list()
            .into_iter()
            .filter(|d| !d.archived && d.is_visible_to(principal))
            .collect()
    }

    /// Insert a widget with a new id, or replace the widget with the same id.
    pub fn upsert_widget(&self, id: DashboardId, widget: Widget) -> AnalyticsResult<WidgetUpsert> {
        let now = self.clock.now();
        let widget_id = widget.id.clone();

        let outcome = self.mutate(id, |dashboard| {
            validate_widget(&widget, &dashboard.layout, dashboard.refresh_interval_secs)?;
            let outcome = match dashboard.widgets.iter_mut().find(|w| w.id == widget.id) {
                Some(existing) => {
                    *existing = widget;
                    WidgetUpsert::Replaced
                }
                None => {
                    dashboard.widgets.push(widget);
                    WidgetUpsert::Inserted
                }
            };
            dashboard.last_modified = dashboard.last_modified.max(now);
            Ok(outcome)
        })?;

        self.publish_updated(id, Some(widget_id));
        Ok(outcome)
    }

    pub fn remove_widget(&self, id: DashboardId, widget_id: &WidgetId) -> AnalyticsResult<Widget> {
        let now = self.clock.now();
        let removed = self.mutate(id, |dashboard| {
            let position = dashboard
                .widgets
                .iter()
                .position(|w| &w.id == widget_id)
                .ok_or_else(|| AnalyticsError::not_found("widget", widget_id))?;
            let removed = dashboard.widgets.remove(position);
            dashboard.last_modified = dashboard.last_modified.max(now);
            Ok(removed)
        })?;

        self.publish_updated(id, Some(widget_id.clone()));
        Ok(removed)
    }

    /// Replace the layout; every existing widget must still fit.
    pub fn update_layout(&self, id: DashboardId, layout: Layout) -> AnalyticsResult<()> {
        validate_layout(&layout)?;
        let now = self.clock.now();
        self.mutate(id, |dashboard| {
            validate_widgets(&dashboard.widgets, &layout, dashboard.refresh_interval_secs)?;
            dashboard.layout = layout;
            dashboard.last_modified = dashboard.last_modified.max(now);
            Ok(())
        })?;

        self.publish_updated(id, None);
        Ok(())
    }

    /// Soft delete. The dashboard disappears from reads and rejects mutations.
    pub fn archive_dashboard(&self, id: DashboardId) -> AnalyticsResult<()> {
        let now = self.clock.now();
        self.mutate(id, |dashboard| {
            dashboard.archived = true;
            dashboard.last_modified = dashboard.last_modified.max(now);
            Ok(())
        })?;
        info!(dashboard = %id, "dashboard archived");
        Ok(())
    }

    /// Resolve data for every visible widget.
    ///
    /// Works on a copy taken before any fetch starts, so concurrent edits do
    /// not affect an in-progress render.
    pub fn render_dashboard(&self, id: DashboardId) -> AnalyticsResult<RenderedDashboard> {
        let dashboard = self.get_dashboard(id)?;
        Ok(render::render(
            &dashboard,
            &self.metrics,
            self.connector.as_ref(),
            self.clock.now(),
        ))
    }

    pub fn export_dashboard(
        &self,
        id: DashboardId,
        format: ExportFormat,
    ) -> AnalyticsResult<DashboardExport> {
        let dashboard = self.get_dashboard(id)?;
        let exported = export::export(&dashboard, format, self.clock.now())?;

        info!(dashboard = %id, format = format.as_str(), bytes = exported.content.len(), "dashboard exported");
        self.bus.publish(AnalyticsEvent::DashboardExported(DashboardExported {
            dashboard_id: id,
            format: format.as_str().to_string(),
            bytes: exported.content.len(),
            occurred_at: exported.exported_at,
        }));
        Ok(exported)
    }

    fn mutate<R>(
        &self,
        id: DashboardId,
        f: impl FnOnce(&mut Dashboard) -> AnalyticsResult<R>,
    ) -> AnalyticsResult<R> {
        self.dashboards.update(&id, |dashboard| {
            if dashboard.archived {
                return Err(AnalyticsError::not_found(Dashboard::KIND, id));
            }
            f(dashboard)
        })
    }

    fn publish_updated(&self, id: DashboardId, widget_id: Option<WidgetId>) {
        self.bus.publish(AnalyticsEvent::DashboardUpdated(DashboardUpdated {
            dashboard_id: id,
            widget_id,
            occurred_at: self.clock.now(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use forgebi_connectors::{DataSource, DataSourceType, Row};
    use forgebi_core::{FetchError, ManualClock};
    use forgebi_events::{EventKind, InMemoryEventBus};
    use forgebi_metrics::{MetricCategory, MetricObservation};
    use proptest::prelude::*;
    use serde_json::json;

    use crate::widget::WidgetType;

    /// Returns one row for `good` queries and fails everything else.
    struct FakeConnector;

    impl DataSourceConnector for FakeConnector {
        fn fetch(&self, source: &DataSource) -> Result<Vec<Row>, FetchError> {
            match source.query.as_deref() {
                Some("good") => {
                    let mut row = Row::new();
                    row.insert("total".into(), json!(12));
                    Ok(vec![row])
                }
                _ => Err(FetchError::Unavailable(source.connection.clone())),
            }
        }
    }

    struct Fixture {
        registry: DashboardRegistry,
        metrics: Arc<MetricStore>,
        bus: Arc<InMemoryEventBus<AnalyticsEvent>>,
        clock: Arc<ManualClock>,
    }

    fn setup() -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()));
        let metrics = Arc::new(MetricStore::new(bus.clone(), clock.clone()));
        let registry = DashboardRegistry::new(metrics.clone(), Arc::new(FakeConnector), bus.clone(), clock.clone());
        Fixture {
            registry,
            metrics,
            bus,
            clock,
        }
    }

    fn metric_widget(id: &str) -> Widget {
        Widget::new(id, WidgetType::Metric, "Revenue", DataSource::metric("revenue"))
    }

    fn sql_widget(id: &str, query: &str) -> Widget {
        Widget::new(
            id,
            WidgetType::Table,
            "Orders",
            DataSource::new(DataSourceType::Sql, "warehouse").with_query(query),
        )
        .at(4, 0)
    }

    #[test]
    fn create_rejects_invalid_layout() {
        let f = setup();
        let spec = NewDashboard::new("Sales", "alice").with_layout(Layout {
            columns: 0,
            ..Layout::default()
        });
        let err = f.registry.create_dashboard(spec).unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));
        assert!(f.registry.list_dashboards(Some(&Principal::new("alice"))).is_empty());
    }

    #[test]
    fn create_rejects_duplicate_widget_ids() {
        let f = setup();
        let spec = NewDashboard::new("Sales", "alice")
            .with_widget(metric_widget("w1"))
            .with_widget(metric_widget("w1"));
        assert!(f.registry.create_dashboard(spec).is_err());
    }

    #[test]
    fn upsert_new_widget_adds_one_and_bumps_last_modified() {
        let f = setup();
        let id = f.registry.create_dashboard(NewDashboard::new("Sales", "alice")).unwrap();
        let before = f.registry.get_dashboard(id).unwrap();

        f.clock.advance(Duration::minutes(5));
        let outcome = f.registry.upsert_widget(id, metric_widget("w1")).unwrap();

        let after = f.registry.get_dashboard(id).unwrap();
        assert_eq!(outcome, WidgetUpsert::Inserted);
        assert_eq!(after.widgets.len(), before.widgets.len() + 1);
        assert!(after.last_modified > before.last_modified);
    }

    #[test]
    fn upsert_existing_widget_replaces_in_place() {
        let f = setup();
        let spec = NewDashboard::new("Sales", "alice")
            .with_widget(metric_widget("w1"))
            .with_widget(sql_widget("w2", "good"));
        let id = f.registry.create_dashboard(spec).unwrap();

        let mut replacement = metric_widget("w1");
        replacement.title = "Net revenue".to_string();
        let outcome = f.registry.upsert_widget(id, replacement).unwrap();

        let d = f.registry.get_dashboard(id).unwrap();
        assert_eq!(outcome, WidgetUpsert::Replaced);
        assert_eq!(d.widgets.len(), 2);
        assert_eq!(d.widgets[0].title, "Net revenue");
        assert_eq!(d.widgets[0].id.as_str(), "w1");
    }

    #[test]
    fn invalid_widget_is_rejected_atomically() {
        let f = setup();
        let id = f
            .registry
            .create_dashboard(NewDashboard::new("Sales", "alice").with_widget(metric_widget("w1")))
            .unwrap();
        let before = f.registry.get_dashboard(id).unwrap();

        let err = f
            .registry
            .upsert_widget(id, metric_widget("w2").at(11, 0).sized(4, 1))
            .unwrap_err();

        assert!(matches!(err, AnalyticsError::Validation(_)));
        assert_eq!(f.registry.get_dashboard(id).unwrap(), before);
    }

    #[test]
    fn unknown_dashboard_is_not_found() {
        let f = setup();
        let err = f.registry.upsert_widget(DashboardId::new(), metric_widget("w1")).unwrap_err();
        assert!(matches!(err, AnalyticsError::NotFound { entity: "dashboard", .. }));
    }

    #[test]
    fn list_applies_visibility_rules() {
        let f = setup();
        f.registry.create_dashboard(NewDashboard::new("Public", "alice").public()).unwrap();
        f.registry.create_dashboard(NewDashboard::new("Private", "alice")).unwrap();
        f.registry
            .create_dashboard(NewDashboard::new("Finance", "alice").with_permission("finance"))
            .unwrap();

        let names = |p: Option<&Principal>| -> Vec<String> {
            f.registry.list_dashboards(p).into_iter().map(|d| d.name).collect()
        };

        assert_eq!(names(None), vec!["Public"]);
        assert_eq!(names(Some(&Principal::new("alice"))).len(), 3);
        assert_eq!(
            names(Some(&Principal::new("bob").with_role("finance"))),
            vec!["Public", "Finance"]
        );
    }

    #[test]
    fn archived_dashboards_disappear() {
        let f = setup();
        let id = f.registry.create_dashboard(NewDashboard::new("Old", "alice").public()).unwrap();
        f.registry.archive_dashboard(id).unwrap();

        assert!(f.registry.get_dashboard(id).is_err());
        assert!(f.registry.list_dashboards(None).is_empty());
        assert!(f.registry.upsert_widget(id, metric_widget("w1")).is_err());
    }

    #[test]
    fn update_layout_revalidates_existing_widgets() {
        let f = setup();
        let id = f
            .registry
            .create_dashboard(NewDashboard::new("Sales", "alice").with_widget(sql_widget("w2", "good")))
            .unwrap();

        let narrow = Layout {
            columns: 6,
            ..Layout::default()
        };
        assert!(f.registry.update_layout(id, narrow).is_err());
        assert_eq!(f.registry.get_dashboard(id).unwrap().layout.columns, 12);
    }

    #[test]
    fn render_isolates_broken_data_sources() {
        let f = setup();
        f.metrics
            .upsert(MetricObservation::new("revenue", 100.0, "USD", MetricCategory::Sales))
            .unwrap();
        let spec = NewDashboard::new("Sales", "alice")
            .with_widget(metric_widget("revenue"))
            .with_widget(sql_widget("orders", "good"))
            .with_widget(sql_widget("broken", "bad").at(8, 0))
            .with_widget(sql_widget("hidden", "good").at(0, 4).hidden());
        let id = f.registry.create_dashboard(spec).unwrap();

        let rendered = f.registry.render_dashboard(id).unwrap();

        assert_eq!(rendered.widgets.len(), 3);
        assert_eq!(rendered.failed_widgets().count(), 1);
        assert_eq!(rendered.widgets[2].widget_id.as_str(), "broken");
        let revenue = rendered.widgets[0].data.as_ref().unwrap();
        assert_eq!(revenue[0]["value"], json!(100.0));
    }

    #[test]
    fn export_publishes_event() {
        let f = setup();
        let sub = f.bus.subscribe_channel(EventKind::DashboardExported.into());
        let id = f
            .registry
            .create_dashboard(NewDashboard::new("Sales", "alice").with_widget(sql_widget("w, 1", "good")))
            .unwrap();

        let csv = f.registry.export_dashboard(id, ExportFormat::Csv).unwrap();
        assert!(csv.content.lines().nth(1).unwrap().starts_with("\"w, 1\",table,Orders"));

        let json = f.registry.export_dashboard(id, ExportFormat::Json).unwrap();
        let parsed: Dashboard = serde_json::from_str(&json.content).unwrap();
        assert_eq!(parsed.id, id);

        assert!(sub.try_recv().is_ok());
        assert!(sub.try_recv().is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: new ids grow the widget list by one, existing ids never do.
        #[test]
        fn upsert_widget_count_tracks_distinct_ids(ids in prop::collection::vec(0u8..6, 1..20)) {
            let f = setup();
            let id = f.registry.create_dashboard(NewDashboard::new("P", "alice")).unwrap();
            let mut seen = std::collections::HashSet::new();

            for n in ids {
                let before = f.registry.get_dashboard(id).unwrap().widgets.len();
                let outcome = f.registry.upsert_widget(id, metric_widget(&format!("w{n}"))).unwrap();
                let after = f.registry.get_dashboard(id).unwrap().widgets.len();

                if seen.insert(n) {
                    prop_assert_eq!(outcome, WidgetUpsert::Inserted);
                    prop_assert_eq!(after, before + 1);
                } else {
                    prop_assert_eq!(outcome, WidgetUpsert::Replaced);
                    prop_assert_eq!(after, before);
                }
            }
        }
    }
}
