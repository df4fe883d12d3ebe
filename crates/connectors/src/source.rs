use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgebi_core::{AnalyticsError, AnalyticsResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
    Sql,
    Api,
    /// Reads a named metric from the metric store; `query` holds the metric id.
    Metric,
    RealTime,
    File,
}

/// Configuration describing where and how data is fetched.
///
/// Pure configuration: behavior lives in the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "type")]
    pub source_type: DataSourceType,
    pub connection: String,
    pub query: Option<String>,
    pub refresh_interval_secs: u64,
    pub cache: bool,
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub parameters: BTreeMap<String, JsonValue>,
}

impl DataSource {
    pub fn new(source_type: DataSourceType, connection: impl Into<String>) -> Self {
        Self {
            source_type,
            connection: connection.into(),
            query: None,
            refresh_interval_secs: 60,
            cache: false,
            cache_ttl_secs: 0,
            parameters: BTreeMap::new(),
        }
    }

    /// A data source bound to a metric in the metric store.
    pub fn metric(metric_id: impl Into<String>) -> Self {
        Self::new(DataSourceType::Metric, "metrics").with_query(metric_id)
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_refresh_interval(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    pub fn with_cache(mut self, ttl_secs: u64) -> Self {
        self.cache = true;
        self.cache_ttl_secs = ttl_secs;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Structural checks shared by dashboards and models.
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.connection.trim().is_empty() {
            return Err(AnalyticsError::validation(
                "data source connection cannot be empty",
            ));
        }
        let needs_query = matches!(
            self.source_type,
            DataSourceType::Sql | DataSourceType::Api | DataSourceType::Metric
        );
        if needs_query && self.query.as_deref().is_none_or(|q| q.trim().is_empty()) {
            return Err(AnalyticsError::validation(format!(
                "{:?} data source requires a query or endpoint",
                self.source_type
            )));
        }
        if self.cache && self.cache_ttl_secs == 0 {
            return Err(AnalyticsError::validation(
                "cached data source requires a positive cache TTL",
            ));
        }
        Ok(())
    }

    /// Stable key identifying the fetch this source describes.
    pub fn cache_key(&self) -> String {
        format!(
            "{:?}|{}|{}|{}",
            self.source_type,
            self.connection,
            self.query.as_deref().unwrap_or_default(),
            serde_json::to_string(&self.parameters).unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sql_source_without_query_is_rejected() {
        let err = DataSource::new(DataSourceType::Sql, "warehouse")
            .validate()
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));
    }

    #[test]
    fn cache_without_ttl_is_rejected() {
        let mut source = DataSource::metric("revenue");
        source.cache = true;
        assert!(source.validate().is_err());
        assert!(DataSource::metric("revenue").with_cache(30).validate().is_ok());
    }

    #[test]
    fn cache_key_depends_on_parameters() {
        let a = DataSource::new(DataSourceType::Api, "crm")
            .with_query("/deals")
            .with_parameter("region", json!("emea"));
        let b = a.clone().with_parameter("region", json!("apac"));
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
    }
}
