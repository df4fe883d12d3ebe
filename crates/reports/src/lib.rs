//! `forgebi-reports`: scheduled report compilation and delivery.
//!
//! A report is a template of sections plus a schedule and a recipient list.
//! Running it takes one snapshot of metrics, dashboards and models, compiles
//! an immutable [`CompiledReport`] and fans it out to every recipient.

pub mod compile;
pub mod dispatch;
pub mod report;
pub mod schedule;
pub mod scheduler;

pub use compile::{CompiledReport, CompiledSection, SectionContent, WidgetSummary};
pub use dispatch::{DeliveryOutcome, DeliveryReceipt, RecipientDispatcher};
pub use report::{
    Channel, NewReport, Recipient, ReportFormat, ReportSection, ReportStatus, ReportTemplate,
    ReportType, Report, RunSummary, SectionSource, Styling,
};
pub use schedule::{Frequency, ReportSchedule, compute_next_run, first_run};
pub use scheduler::{DEFAULT_DISPATCH_TIMEOUT, ReportScheduler, RunOutcome};
