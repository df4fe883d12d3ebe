use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use forgebi_core::{
    AnalyticsError, AnalyticsResult, Clock, Entity, InMemoryRepository, ReportId, Repository,
};
use forgebi_dashboards::DashboardRegistry;
use forgebi_events::{AnalyticsEvent, EventBus, ReportGenerated, SharedBus};
use forgebi_metrics::MetricStore;
use forgebi_models::ModelRegistry;

use crate::compile::{self, CompiledReport, SourceSnapshot};
use crate::dispatch::{self, DeliveryOutcome, RecipientDispatcher};
use crate::report::{NewReport, Report, ReportStatus, RunSummary};
use crate::schedule::{Frequency, ReportSchedule, compute_next_run, first_run};

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one report run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report_id: ReportId,
    pub compiled: Arc<CompiledReport>,
    pub deliveries: Vec<DeliveryOutcome>,
    pub next_run: Option<DateTime<Utc>>,
}

impl RunOutcome {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.len() - self.delivered()
    }

    /// Some, but not all, recipients failed.
    pub fn is_partial_failure(&self) -> bool {
        self.failed() > 0 && self.delivered() > 0
    }
}

/// Owns reports, compiles them from a snapshot of dashboards, metrics and
/// models, and hands them to the recipient dispatcher.
pub struct ReportScheduler {
    reports: InMemoryRepository<Report>,
    metrics: Arc<MetricStore>,
    dashboards: Arc<DashboardRegistry>,
    models: Arc<ModelRegistry>,
    dispatcher: Arc<dyn RecipientDispatcher>,
    dispatch_timeout: Duration,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
}

impl ReportScheduler {
    pub fn new(
        metrics: Arc<MetricStore>,
        dashboards: Arc<DashboardRegistry>,
        models: Arc<ModelRegistry>,
        dispatcher: Arc<dyn RecipientDispatcher>,
        bus: SharedBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reports: InMemoryRepository::new(),
            metrics,
            dashboards,
            models,
            dispatcher,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            bus,
            clock,
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn create_report(&self, spec: NewReport) -> AnalyticsResult<ReportId> {
        spec.validate()?;
        let now = self.clock.now();
        let next_run = initial_next_run(&spec.schedule, now)?;

        let id = ReportId::new();
        let report = Report::from_spec(id, spec, next_run, now);
        info!(report = %id, next_run = ?report.next_run, "report created");
        self.reports.insert(report)?;
        Ok(id)
    }

    pub fn get_report(&self, id: ReportId) -> AnalyticsResult<Report> {
        self.reports
            .get(&id)
            .ok_or_else(|| AnalyticsError::not_found(Report::KIND, id))
    }

    pub fn list_reports(&self, status: Option<ReportStatus>) -> Vec<Report> {
        self.reports
            .list()
            .into_iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .collect()
    }

    /// Replace the schedule and recompute `next_run`. Rejected while the
    /// report is running.
    pub fn update_schedule(&self, id: ReportId, schedule: ReportSchedule) -> AnalyticsResult<Report> {
        schedule.validate()?;
        let now = self.clock.now();
        let next_run = initial_next_run(&schedule, now)?;

        self.reports.update(&id, |report| {
            if report.running {
                return Err(AnalyticsError::conflict(format!(
                    "report {id} is running; retry the schedule change after it finishes"
                )));
            }
            report.schedule = schedule;
            report.next_run = next_run;
            Ok(report.clone())
        })
    }

    /// Change status. Re-activating a report whose `next_run` has passed
    /// moves it to the next slot after now. A one-off report that already ran
    /// stays spent.
    pub fn set_status(&self, id: ReportId, status: ReportStatus) -> AnalyticsResult<Report> {
        let now = self.clock.now();
        self.reports.update(&id, |report| {
            let spent = report.schedule.frequency == Frequency::Once && report.last_run.is_some();
            if status == ReportStatus::Active
                && report.schedule.enabled
                && !spent
                && report.next_run.is_none_or(|at| at <= now)
            {
                report.next_run = first_run(&report.schedule, now)?;
            }
            report.status = status;
            Ok(report.clone())
        })
    }

    /// Compile and deliver a report now, regardless of its schedule.
    ///
    /// Individual delivery failures are reported in the outcome; they do not
    /// fail the run.
    pub fn run(&self, id: ReportId) -> AnalyticsResult<RunOutcome> {
        let report = self.reports.update(&id, |report| {
            if report.running {
                return Err(AnalyticsError::conflict(format!("report {id} is already running")));
            }
            report.running = true;
            Ok(report.clone())
        })?;
        let running = RunningFlag {
            reports: &self.reports,
            id,
        };

        let sources = SourceSnapshot::capture(&report, &self.metrics, &self.dashboards, &self.models);
        let compiled = Arc::new(compile::compile(&report, &sources, self.clock.now()));
        let deliveries = dispatch::dispatch_all(
            &self.dispatcher,
            &compiled,
            &report.recipients,
            self.dispatch_timeout,
        );

        let finished_at = self.clock.now();
        let next_run = match compute_next_run(&report.schedule, finished_at) {
            Ok(next) if report.schedule.enabled => next,
            Ok(_) => None,
            Err(e) => {
                warn!(report = %id, error = %e, "could not compute next run");
                None
            }
        };

        let summary = RunSummary {
            finished_at,
            delivered: deliveries.iter().filter(|d| d.is_delivered()).count(),
            failed: deliveries.iter().filter(|d| !d.is_delivered()).count(),
        };
        self.reports.update(&id, |stored| {
            stored.running = false;
            stored.last_run = Some(finished_at);
            stored.next_run = next_run;
            stored.last_outcome = Some(summary);
            Ok(())
        })?;
        running.disarm();

        info!(
            report = %id,
            delivered = summary.delivered,
            failed = summary.failed,
            next_run = ?next_run,
            "report generated"
        );
        self.bus.publish(AnalyticsEvent::ReportGenerated(ReportGenerated {
            report_id: id,
            delivered: summary.delivered,
            failed: summary.failed,
            occurred_at: finished_at,
        }));

        Ok(RunOutcome {
            report_id: id,
            compiled,
            deliveries,
            next_run,
        })
    }

    /// Run every active, enabled report whose `next_run` is at or before `now`.
    pub fn run_due(&self, now: DateTime<Utc>) -> Vec<(ReportId, AnalyticsResult<RunOutcome>)> {
        let due: Vec<ReportId> = self
            .reports
            .list()
            .into_iter()
            .filter(|r| r.is_due(now))
            .map(|r| r.id)
            .collect();

        due.into_iter()
            .map(|id| {
                let outcome = self.run(id);
                if let Err(e) = &outcome {
                    warn!(report = %id, error = %e, "scheduled report run failed");
                }
                (id, outcome)
            })
            .collect()
    }
}

/// Clears a report's `running` flag if a run unwinds before recording its
/// outcome, so the report is not locked out of later runs.
struct RunningFlag<'a> {
    reports: &'a InMemoryRepository<Report>,
    id: ReportId,
}

impl RunningFlag<'_> {
    /// The run recorded its outcome, which already cleared the flag.
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        let _ = self.reports.update(&self.id, |report| {
            report.running = false;
            Ok(())
        });
        warn!(report = %self.id, "report run aborted before completion");
    }
}

fn initial_next_run(
    schedule: &ReportSchedule,
    now: DateTime<Utc>,
) -> AnalyticsResult<Option<DateTime<Utc>>> {
    if schedule.enabled {
        first_run(schedule, now)
    } else {
        Ok(None)
    }
}
