//! `forgebi-engine`
//!
//! **Responsibility:** wire the analytics components together and keep them
//! fresh with background drivers.
//!
//! - [`AnalyticsEngine`] builds the shared bus, stores and registries
//! - [`AnalyticsEngine::start`] spawns the periodic drivers
//! - Each driver's `tick` can be called directly for deterministic tests

pub mod config;
pub mod drivers;
pub mod engine;
pub mod feed;
pub mod runner;

pub use config::EngineConfig;
pub use drivers::{InsightScan, MetricRefresh, ModelStaleSweep, ReportDueCheck};
pub use engine::{AnalyticsEngine, Collaborators, EngineHandle};
pub use feed::{ConnectorFeed, MetricFeed};
pub use runner::{DriverHandle, DriverTask, PeriodicDriver, Trigger};
