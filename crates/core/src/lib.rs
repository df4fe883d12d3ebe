//! `forgebi-core`: shared building blocks for the analytics engine.
//!
//! This crate contains **pure** primitives (identifiers, the error taxonomy,
//! time source, principals and the repository abstraction). No IO, no threads.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod principal;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{AnalyticsError, AnalyticsResult, DeliveryError, FetchError, TrainingError};
pub use id::{DashboardId, InsightId, MetricId, ModelId, PredictionId, ReportId, WidgetId};
pub use principal::Principal;
pub use repository::{InMemoryRepository, Repository};
