//! `forgebi-connectors`
//!
//! **Responsibility:** describe *where* widget and training data comes from.
//!
//! The engine never executes queries itself. It hands a [`DataSource`] to a
//! [`DataSourceConnector`] supplied by the embedding application.

pub mod caching;
pub mod connector;
pub mod source;

pub use caching::CachingConnector;
pub use connector::{DataSourceConnector, Row};
pub use source::{DataSource, DataSourceType};
