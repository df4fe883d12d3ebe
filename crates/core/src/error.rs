//! Error taxonomy shared by every analytics component.

use std::time::Duration;

use thiserror::Error;

/// Result type used across the analytics layer.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Operation-level error returned to callers of the engine.
///
/// Validation and not-found errors are surfaced directly and never retried.
/// Collaborator failures keep the originating collaborator error as `source`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyticsError {
    /// Malformed input to a create/upsert operation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown identifier.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Concurrent training, or an edit that overlaps an in-flight run.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("data source fetch failed")]
    Fetch(#[source] FetchError),

    #[error("model training failed")]
    Training(#[source] TrainingError),

    #[error("report delivery failed")]
    Delivery(#[source] DeliveryError),

    /// Invalid schedule configuration (e.g. `day_of_month` out of range).
    #[error("schedule computation failed: {0}")]
    ScheduleComputation(String),

    /// The model has never completed a training run.
    #[error("no prediction available for model {0}")]
    NoPredictionAvailable(String),
}

impl AnalyticsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        Self::ScheduleComputation(msg.into())
    }
}

impl From<FetchError> for AnalyticsError {
    fn from(value: FetchError) -> Self {
        Self::Fetch(value)
    }
}

impl From<TrainingError> for AnalyticsError {
    fn from(value: TrainingError) -> Self {
        Self::Training(value)
    }
}

impl From<DeliveryError> for AnalyticsError {
    fn from(value: DeliveryError) -> Self {
        Self::Delivery(value)
    }
}

/// Failure reported by a data source connector or metric feed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("connection {0} unavailable")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("data source misconfigured: {0}")]
    InvalidSource(String),
}

/// Failure reported by a model trainer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainingError {
    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    #[error("trainer failed: {0}")]
    Failed(String),

    /// The trainer returned predictions that break the prediction invariants.
    #[error("trainer produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("training cancelled")]
    Cancelled,
}

/// Failure reported by a recipient dispatcher.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("recipient {0} rejected the report")]
    Rejected(String),

    #[error("recipient {0} unreachable")]
    Unreachable(String),

    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),

    #[error("dispatcher failed: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn collaborator_errors_are_kept_as_source() {
        let err = AnalyticsError::from(TrainingError::Failed("diverged".into()));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("trainer failed: diverged"));
    }

    #[test]
    fn not_found_names_entity_and_id() {
        let err = AnalyticsError::not_found("dashboard", "abc");
        assert_eq!(err.to_string(), "dashboard not found: abc");
    }
}
