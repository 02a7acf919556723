use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::core::{PersistError, Result, SqlValue};
use crate::interface::{CatalogSnapshot, Connection};
use crate::metadata::{Entity, SchemaRegistry};
use crate::result::QueryResult;
use crate::sql::entity_sql::{self, EntitySql};
use crate::sql::finder::{Finder, InnerQuery};
use crate::sql::select::SelectQuery;

/// One logical transaction: a single connection, the shared schema registry
/// and a re-entrancy counter. Cheap to clone; all clones share the same
/// connection and transaction scope. Obtained through
/// [`Repository::transact`](crate::sql::Repository::transact), which commits
/// or rolls back when the outermost scope exits.
#[derive(Clone)]
pub struct SqlSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connection: Mutex<Box<dyn Connection>>,
    registry: Arc<SchemaRegistry>,
    depth: AtomicU32,
    closed: AtomicBool,
}

impl SqlSession {
    pub(crate) async fn open(
        mut connection: Box<dyn Connection>,
        registry: Arc<SchemaRegistry>,
    ) -> Result<Self> {
        connection.begin().await?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                connection: Mutex::new(connection),
                registry,
                depth: AtomicU32::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PersistError::SessionClosed);
        }
        Ok(())
    }

    /// Run a nested transactional scope on this session. Entries and exits
    /// are counted; only when the outermost scope exits does the session
    /// commit (on success) or roll back (on any propagated failure) and
    /// close. A failing commit still attempts a rollback before the commit
    /// error is surfaced.
    pub async fn transact<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(SqlSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_open()?;
        self.inner.depth.fetch_add(1, Ordering::SeqCst);
        let result = op(self.clone()).await;
        let remaining = self.inner.depth.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            return result;
        }
        match result {
            Ok(value) => {
                self.close(true).await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.close(false).await {
                    warn!("rollback failed after error: {}", rollback_error);
                }
                Err(error)
            }
        }
    }

    /// Commit or roll back and mark the session closed. On a commit failure a
    /// rollback is still attempted, without masking the commit error.
    async fn close(&self, on_success: bool) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut connection = self.inner.connection.lock().await;
        if on_success {
            if let Err(commit_error) = connection.commit().await {
                let _ = connection.rollback().await;
                return Err(commit_error);
            }
            Ok(())
        } else {
            connection.rollback().await
        }
    }

    /// Execute a prepared query with the given parameters.
    pub async fn execute_query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.ensure_open()?;
        debug!("{}", sql);
        let mut connection = self.inner.connection.lock().await;
        connection.query(sql, params).await
    }

    /// Execute a prepared statement, returning the affected row count.
    pub async fn execute_update(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.ensure_open()?;
        debug!("{}", sql);
        let mut connection = self.inner.connection.lock().await;
        connection.execute(sql, params).await
    }

    pub(crate) async fn execute_returning(
        &self,
        sql: &str,
        params: &[SqlValue],
        generated: &[String],
    ) -> Result<QueryResult> {
        self.ensure_open()?;
        debug!("{}", sql);
        let mut connection = self.inner.connection.lock().await;
        connection.execute_returning(sql, params, generated).await
    }

    pub(crate) async fn execute_batch(
        &self,
        sql: &str,
        rows: &[Vec<SqlValue>],
        generated: &[String],
    ) -> Result<QueryResult> {
        self.ensure_open()?;
        debug!("{}", sql);
        let mut connection = self.inner.connection.lock().await;
        connection.execute_batch(sql, rows, generated).await
    }

    pub(crate) async fn catalog_snapshot(&self) -> Result<CatalogSnapshot> {
        self.ensure_open()?;
        let mut connection = self.inner.connection.lock().await;
        connection
            .catalog_snapshot(self.inner.registry.name())
            .await
    }

    /// Insert the entity; its generated id (and version) are written back.
    pub async fn insert<E: Entity>(&self, entity: &mut E) -> Result<()> {
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        let statement = EntitySql::insert(&self.inner.registry, entity_data, None, None)?;
        statement.execute(self, entity as &mut dyn Any).await?;
        Ok(())
    }

    /// Insert the entities in batches of 100, matching generated ids back by
    /// position.
    pub async fn batch_insert<E: Entity>(&self, entities: &mut [E]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        let statement = EntitySql::insert(&self.inner.registry, entity_data, None, None)?;
        statement.execute_in_batch(self, entities).await
    }

    /// Insert the entities in batches of 100, updating the conflicting rows
    /// (or skipping them, when no update clause is given).
    pub async fn batch_upsert<E: Entity>(
        &self,
        entities: &mut [E],
        on_conflict: &str,
        update_clause: Option<&str>,
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        let statement = EntitySql::insert(
            &self.inner.registry,
            entity_data,
            Some(on_conflict),
            update_clause,
        )?;
        statement.execute_in_batch(self, entities).await
    }

    /// Update the fields selected by the given group, enforcing the version
    /// match. Returns the affected row count: zero signals an optimistic-lock
    /// miss, and an empty field set is a no-op reported as zero.
    pub async fn update<E: Entity>(&self, entity: &mut E, field_group: Option<&str>) -> Result<u64> {
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        match EntitySql::update(&self.inner.registry, entity_data, field_group)? {
            Some(statement) => statement.execute(self, entity as &mut dyn Any).await,
            None => Ok(0),
        }
    }

    /// Update the entities in batches of 100 using the given field group.
    pub async fn batch_update<E: Entity>(
        &self,
        entities: &mut [E],
        field_group: Option<&str>,
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        match EntitySql::update(&self.inner.registry, entity_data, field_group)? {
            Some(statement) => statement.execute_in_batch(self, entities).await,
            None => Ok(()),
        }
    }

    /// Insert when new, else update with the given field group.
    pub async fn save<E: Entity>(
        &self,
        entity: &mut E,
        is_new: bool,
        field_group: Option<&str>,
    ) -> Result<()> {
        if is_new {
            self.insert(entity).await
        } else {
            self.update(entity, field_group).await.map(|_| ())
        }
    }

    /// Delete the entity row, returning the affected row count (zero on a
    /// version mismatch).
    pub async fn delete<E: Entity>(&self, entity: &E) -> Result<u64> {
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        entity_sql::delete(self, &entity_data, entity as &dyn Any).await
    }

    /// Delete the entity rows in batches of 100.
    pub async fn batch_delete<E: Entity>(&self, entities: &[E]) -> Result<()> {
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        entity_sql::batch_delete(self, &entity_data, entities).await
    }

    /// Acquire a row lock on the given primary key.
    pub async fn lock_for_update<E: Entity>(&self, primary_key: SqlValue) -> Result<()> {
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        entity_sql::lock_for_update(self, &entity_data, primary_key).await
    }

    /// Select one entity by primary key, expanding the given field group.
    pub async fn select<E: Entity>(
        &self,
        primary_key: SqlValue,
        field_group: Option<&str>,
    ) -> Result<Option<E>> {
        self.select_internal(primary_key, field_group, false).await
    }

    /// Select one entity by primary key with `for update` row locking.
    pub async fn select_for_update<E: Entity>(
        &self,
        primary_key: SqlValue,
        field_group: Option<&str>,
    ) -> Result<Option<E>> {
        self.select_internal(primary_key, field_group, true).await
    }

    async fn select_internal<E: Entity>(
        &self,
        primary_key: SqlValue,
        field_group: Option<&str>,
        for_update: bool,
    ) -> Result<Option<E>> {
        let entity_data = self.inner.registry.entity_data::<E>()?.clone();
        let query = SelectQuery::new(self, entity_data, field_group, primary_key);
        match query.find(for_update).await? {
            Some(instance) => {
                let entity = instance.downcast::<E>().map_err(|_| {
                    PersistError::TypeMismatch(format!(
                        "selected row is not of type {}",
                        std::any::type_name::<E>()
                    ))
                })?;
                Ok(Some(*entity))
            }
            None => Ok(None),
        }
    }

    /// Create a finder for the entity with the default alias `x`.
    pub fn find<E: Entity>(&self) -> Result<Finder<E>> {
        self.find_as("x")
    }

    /// Create a finder for the entity with the given root alias.
    pub fn find_as<E: Entity>(&self, alias: &str) -> Result<Finder<E>> {
        Finder::new(self.clone(), alias)
    }

    /// Execute an update statement prefixed with the entity's table name.
    pub async fn execute_entity_update<E: Entity>(
        &self,
        query: &str,
        params: &[SqlValue],
    ) -> Result<u64> {
        let sql = format!("update {} {}", self.table_name::<E>()?, query);
        self.execute_update(&sql, params).await
    }

    /// Execute a `union all` of rendered inner queries, wrapped between the
    /// given prefix and suffix, with all their parameters in order.
    pub async fn execute_union_query(
        &self,
        prefix: &str,
        parts: &[InnerQuery],
        suffix: &str,
    ) -> Result<QueryResult> {
        if parts.is_empty() {
            return Err(PersistError::InvalidArgument(
                "union query requires at least one inner query".into(),
            ));
        }
        let mut sql = String::from(prefix);
        let mut parameters = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                sql.push_str("union all");
            }
            sql.push_str(&format!(" ({}) ", part.sql));
            parameters.extend(part.parameters.iter().cloned());
        }
        sql.push_str(suffix);
        self.execute_query(&sql, &parameters).await
    }

    /// The schema-qualified table name of the entity.
    pub fn table_name<E: Entity>(&self) -> Result<String> {
        let entity_data = self.inner.registry.entity_data::<E>()?;
        self.inner.registry.schema_table_name(entity_data)
    }
}
