//! In-process publish/subscribe for analytics state changes.
//!
//! Components announce what happened (metric refreshed, insight generated,
//! model trained, report generated, dashboard exported) on the bus without
//! knowing who listens.

pub mod analytics;
pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use analytics::{
    AnalyticsEvent, DashboardExported, DashboardUpdated, EventKind, InsightGenerated,
    MetricsUpdated, ModelTrainingCompleted, ModelTrainingFailed, ModelTrainingStarted,
    ReportGenerated, SharedBus,
};
pub use bus::{
    ChannelSubscription, EventBus, EventFilter, EventHandler, HandlerError, HandlerFailure,
    PublishReport, SubscriptionHandle, SubscriptionId,
};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
