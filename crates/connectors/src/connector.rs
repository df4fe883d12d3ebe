use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use forgebi_core::FetchError;

use crate::source::DataSource;

/// One row returned by a connector (column name → value).
pub type Row = Map<String, JsonValue>;

/// Executes the query/endpoint a [`DataSource`] describes.
///
/// Implementations live outside the engine (SQL pools, HTTP clients, file
/// readers). They may block; the engine only calls them off the timer threads.
pub trait DataSourceConnector: Send + Sync {
    fn fetch(&self, source: &DataSource) -> Result<Vec<Row>, FetchError>;
}

impl<C> DataSourceConnector for Arc<C>
where
    C: DataSourceConnector + ?Sized,
{
    fn fetch(&self, source: &DataSource) -> Result<Vec<Row>, FetchError> {
        (**self).fetch(source)
    }
}
