use std::sync::Arc;

use crate::core::{PersistError, Result};
use crate::interface::DataSource;
use crate::metadata::SchemaRegistry;
use crate::sql::session::SqlSession;

/// The transaction entry point: a data source paired with the entity schema.
/// Each call to [`Repository::transact`] opens a session (one connection, one
/// transaction) and passes it to the closure; nested scopes reuse the same
/// session by calling [`SqlSession::transact`] on it, so the transaction
/// context travels explicitly through the call graph.
pub struct Repository {
    data_source: Arc<dyn DataSource>,
    registry: Arc<SchemaRegistry>,
}

impl Repository {
    pub fn new(data_source: Arc<dyn DataSource>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            data_source,
            registry,
        }
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Execute the closure in a new transaction: acquire a connection, begin,
    /// run, then commit on success or roll back on failure. A connection that
    /// cannot be acquired aborts before any statement is issued.
    pub async fn transact<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(SqlSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let connection = self.data_source.connect().await.map_err(|error| match error {
            PersistError::ConnectionAcquisition(_) => error,
            other => PersistError::ConnectionAcquisition(other.to_string()),
        })?;
        let session = SqlSession::open(connection, self.registry.clone()).await?;
        session.transact(op).await
    }
}
