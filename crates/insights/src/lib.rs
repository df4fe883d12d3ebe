//! `forgebi-insights`
//!
//! **Responsibility:** scan metric snapshots and surface actionable
//! observations (anomalies, threshold breaches).
//!
//! - Rules are pure: they read one metric and return a draft or nothing.
//! - A failing rule only affects the metric it was evaluating.
//! - Insights are never deleted; their status only moves forward.

pub mod engine;
pub mod insight;
pub mod rules;

pub use engine::{InsightConfig, InsightEngine, InsightFilter, RuleFailure, ScanReport};
pub use insight::{
    Effort, Evidence, Insight, InsightPriority, InsightStatus, InsightType, Recommendation,
};
pub use rules::{AnomalyRule, InsightDraft, InsightRule, MetricThreshold, RuleError, ThresholdBreachRule};
