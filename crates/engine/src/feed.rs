use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use forgebi_connectors::{DataSource, DataSourceConnector, Row};
use forgebi_core::FetchError;
use forgebi_metrics::MetricObservation;

/// Source of fresh metric observations for the refresh driver.
pub trait MetricFeed: Send + Sync {
    fn poll(&self) -> Result<Vec<MetricObservation>, FetchError>;
}

impl<F> MetricFeed for Arc<F>
where
    F: MetricFeed + ?Sized,
{
    fn poll(&self) -> Result<Vec<MetricObservation>, FetchError> {
        (**self).poll()
    }
}

/// Reads observations from a data source through a connector.
///
/// Each row must carry `id`, `value`, `unit` and `category`; `dimensions`
/// and `metadata` objects are optional. Rows that do not fit are skipped.
pub struct ConnectorFeed {
    connector: Arc<dyn DataSourceConnector>,
    source: DataSource,
}

impl ConnectorFeed {
    pub fn new(connector: Arc<dyn DataSourceConnector>, source: DataSource) -> Self {
        Self { connector, source }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }
}

impl MetricFeed for ConnectorFeed {
    fn poll(&self) -> Result<Vec<MetricObservation>, FetchError> {
        let rows = self.connector.fetch(&self.source)?;
        Ok(rows.into_iter().filter_map(to_observation).collect())
    }
}

fn to_observation(row: Row) -> Option<MetricObservation> {
    match serde_json::from_value::<MetricObservation>(JsonValue::Object(row)) {
        Ok(obs) => Some(obs),
        Err(e) => {
            warn!(error = %e, "skipping malformed metric row");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use forgebi_connectors::DataSourceType;
    use forgebi_metrics::MetricCategory;

    struct Rows(Vec<JsonValue>);

    impl DataSourceConnector for Rows {
        fn fetch(&self, _source: &DataSource) -> Result<Vec<Row>, FetchError> {
            Ok(self
                .0
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .collect())
        }
    }

    struct Down;

    impl DataSourceConnector for Down {
        fn fetch(&self, source: &DataSource) -> Result<Vec<Row>, FetchError> {
            Err(FetchError::Unavailable(source.connection.clone()))
        }
    }

    fn source() -> DataSource {
        DataSource::new(DataSourceType::Sql, "warehouse").with_query("select * from kpis")
    }

    #[test]
    fn rows_become_observations() {
        let feed = ConnectorFeed::new(
            Arc::new(Rows(vec![
                json!({"id": "revenue", "value": 130.0, "unit": "USD", "category": "sales"}),
                json!({"id": "churn", "value": 2.5, "unit": "%", "category": "customer",
                       "dimensions": {"region": "eu"}}),
            ])),
            source(),
        );

        let obs = feed.poll().unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].id.as_str(), "revenue");
        assert_eq!(obs[0].category, MetricCategory::Sales);
        assert_eq!(obs[1].dimensions.get("region").map(String::as_str), Some("eu"));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let feed = ConnectorFeed::new(
            Arc::new(Rows(vec![
                json!({"id": "revenue", "value": "lots", "unit": "USD", "category": "sales"}),
                json!({"id": "orders", "value": 12.0, "unit": "count", "category": "sales"}),
            ])),
            source(),
        );

        let obs = feed.poll().unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].id.as_str(), "orders");
    }

    #[test]
    fn connector_failure_is_returned() {
        let feed = ConnectorFeed::new(Arc::new(Down), source());
        assert_eq!(
            feed.poll().unwrap_err(),
            FetchError::Unavailable("warehouse".into())
        );
    }
}
