use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgebi_core::{AnalyticsError, AnalyticsResult, DashboardId, Entity, MetricId, ModelId, ReportId};
use forgebi_metrics::MetricCategory;

use crate::schedule::ReportSchedule;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Executive,
    Operational,
    Financial,
    Sales,
    Inventory,
    Custom,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Pdf,
    Html,
    Csv,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Slack,
    Webhook,
    Sftp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub channel: Channel,
    pub address: String,
    pub format: ReportFormat,
}

impl Recipient {
    pub fn new(channel: Channel, address: impl Into<String>, format: ReportFormat) -> Self {
        Self {
            channel,
            address: address.into(),
            format,
        }
    }

    pub fn email(address: impl Into<String>) -> Self {
        Self::new(Channel::Email, address, ReportFormat::Pdf)
    }

    fn validate(&self) -> AnalyticsResult<()> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(AnalyticsError::validation("recipient address cannot be empty"));
        }
        if self.channel == Channel::Email && !address.contains('@') {
            return Err(AnalyticsError::validation(format!(
                "{address} is not an email address"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Active,
    Paused,
    Draft,
}

/// What a template section pulls in when the report is compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionSource {
    Metrics { metric_ids: Vec<MetricId> },
    Category { category: MetricCategory },
    Dashboard { dashboard_id: DashboardId },
    Model { model_id: ModelId },
    Text { body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub source: SectionSource,
}

impl ReportSection {
    pub fn new(title: impl Into<String>, source: SectionSource) -> Self {
        Self {
            title: title.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Styling {
    pub theme: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub accent_color: Option<String>,
}

impl Default for Styling {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            logo_url: None,
            accent_color: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub sections: Vec<ReportSection>,
    #[serde(default)]
    pub styling: Styling,
}

/// Delivery counts of the last completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub finished_at: DateTime<Utc>,
    pub delivered: usize,
    pub failed: usize,
}

/// Input to [`crate::ReportScheduler::create_report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub report_type: ReportType,
    pub template: ReportTemplate,
    pub schedule: ReportSchedule,
    pub recipients: Vec<Recipient>,
    pub status: ReportStatus,
    pub created_by: String,
}

impl NewReport {
    pub fn new(
        name: impl Into<String>,
        report_type: ReportType,
        schedule: ReportSchedule,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            report_type,
            template: ReportTemplate::default(),
            schedule,
            recipients: Vec::new(),
            status: ReportStatus::Active,
            created_by: created_by.into(),
        }
    }

    pub fn with_section(mut self, section: ReportSection) -> Self {
        self.template.sections.push(section);
        self
    }

    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_status(mut self, status: ReportStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_styling(mut self, styling: Styling) -> Self {
        self.template.styling = styling;
        self
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.name.trim().is_empty() {
            return Err(AnalyticsError::validation("report name cannot be empty"));
        }
        if self.created_by.trim().is_empty() {
            return Err(AnalyticsError::validation("report creator cannot be empty"));
        }
        if self.template.sections.is_empty() {
            return Err(AnalyticsError::validation("report template needs at least one section"));
        }
        for section in &self.template.sections {
            if section.title.trim().is_empty() {
                return Err(AnalyticsError::validation("section title cannot be empty"));
            }
            if let SectionSource::Metrics { metric_ids } = &section.source {
                if metric_ids.is_empty() {
                    return Err(AnalyticsError::validation(format!(
                        "section {} lists no metrics",
                        section.title
                    )));
                }
            }
        }
        for recipient in &self.recipients {
            recipient.validate()?;
        }
        self.schedule.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub template: ReportTemplate,
    pub schedule: ReportSchedule,
    pub recipients: Vec<Recipient>,
    pub status: ReportStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunSummary>,
    /// Set for the duration of a run; schedule edits are rejected meanwhile.
    pub running: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub(crate) fn from_spec(
        id: ReportId,
        spec: NewReport,
        next_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            report_type: spec.report_type,
            template: spec.template,
            schedule: spec.schedule,
            recipients: spec.recipients,
            status: spec.status,
            last_run: None,
            next_run,
            last_outcome: None,
            running: false,
            created_by: spec.created_by,
            created_at: now,
        }
    }

    /// Active, enabled, idle and scheduled at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReportStatus::Active
            && self.schedule.enabled
            && !self.running
            && self.next_run.is_some_and(|at| at <= now)
    }
}

impl Entity for Report {
    type Id = ReportId;
    const KIND: &'static str = "report";

    fn id(&self) -> &ReportId {
        &self.id
    }
}
