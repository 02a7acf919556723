use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::core::{Result, SqlValue};
use crate::result::QueryResult;

/// A live database connection as seen by this crate.
///
/// This trait allows writing code that is agnostic to the underlying database
/// driver. Wrap a real client (Postgres, MySQL, ...) to implement this trait
/// for production use, or script one in tests. All statements are
/// parameterized: `?` placeholders in the SQL text are bound positionally from
/// the parameter slice.
#[async_trait]
pub trait Connection: Send {
    /// Execute a query that is expected to return rows (SELECT).
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Execute a statement that modifies data, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Execute a DML statement and read back the named database-generated
    /// columns, one result row per affected row, in the requested column order.
    async fn execute_returning(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        generated: &[String],
    ) -> Result<QueryResult>;

    /// Execute the same statement once per parameter row in a single driver
    /// round trip. Generated columns are returned one row per affected row, in
    /// submission order, so callers can match them back by position.
    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<SqlValue>],
        generated: &[String],
    ) -> Result<QueryResult>;

    /// Start a transaction (disable auto-commit).
    async fn begin(&mut self) -> Result<()>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Snapshot the live catalog state for the given schema: existing tables
    /// with their column and index names, and existing foreign-key constraint
    /// names. Consumed by the schema mapping tool.
    async fn catalog_snapshot(&mut self, schema: Option<&str>) -> Result<CatalogSnapshot>;
}

/// A factory for connections, typically backed by a connection pool.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// A point-in-time view of the database catalog, as reported by the driver.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    /// Whether the configured schema (namespace) already exists.
    pub schema_exists: bool,
    /// Existing tables keyed by unqualified table name.
    pub tables: HashMap<String, TableSnapshot>,
    /// Names of existing foreign-key constraints.
    pub foreign_keys: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    pub columns: HashSet<String>,
    pub indexes: HashSet<String>,
}

impl CatalogSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.get(name)
    }
}
