//! Metric store: latest value, previous value and derived trend per named
//! business metric.

pub mod metric;
pub mod store;

pub use metric::{Metric, MetricCategory, MetricObservation, Trend};
pub use store::{MetricSnapshot, MetricStore};
