use std::any::Any;
use std::sync::Arc;

use log::warn;

use crate::core::{Result, SqlValue};
use crate::metadata::{ColumnType, EntityData, FieldData, SchemaRegistry, split_group_entry};
use crate::sql::session::SqlSession;

/// Batch statements are chunked at this many rows to bound driver buffer
/// growth; chunks execute sequentially in submission order.
pub(crate) const BATCH_SIZE: usize = 100;

#[derive(Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Insert,
    Update,
}

/// A prepared insert or update statement for one entity type: the SQL text,
/// the ordered field names its parameters bind from, and the generated
/// columns read back into the source object after execution.
pub(crate) struct EntitySql {
    entity: Arc<EntityData>,
    query_string: String,
    parameter_fields: Vec<String>,
    generated_columns: Vec<String>,
    generated_fields: Vec<Arc<FieldData>>,
    kind: StatementKind,
}

impl EntitySql {
    /// Build the insert statement: every column except the database-generated
    /// id, with an optional `ON CONFLICT` upsert clause.
    pub(crate) fn insert(
        registry: &SchemaRegistry,
        entity: Arc<EntityData>,
        on_conflict: Option<&str>,
        update_clause: Option<&str>,
    ) -> Result<Self> {
        let table = registry.schema_table_name(&entity)?;
        let mut columns = Vec::new();
        let mut parameter_fields = Vec::new();
        for field in entity.fields() {
            if field.column_type() == ColumnType::Id {
                continue; // database-generated
            }
            parameter_fields.push(field.name().to_string());
            columns.push(field.column_name().to_string());
        }
        let placeholders = vec!["?"; columns.len()].join(",");
        let mut query = format!(
            "insert into {} as x ({}) values ({})",
            table,
            columns.join(","),
            placeholders
        );
        if let Some(on_conflict) = on_conflict {
            let mut conflict_columns = Vec::new();
            for field_name in on_conflict.split(',') {
                conflict_columns.push(
                    entity
                        .field_data(field_name.trim())?
                        .column_name()
                        .to_string(),
                );
            }
            query.push_str(&format!(" ON CONFLICT ({})", conflict_columns.join(", ")));
            match update_clause {
                Some(clause) => query.push_str(&format!(" DO UPDATE SET {}", clause)),
                None => query.push_str(" DO NOTHING"),
            }
        }
        let mut statement = Self {
            query_string: query,
            parameter_fields,
            generated_columns: Vec::new(),
            generated_fields: Vec::new(),
            kind: StatementKind::Insert,
            entity: entity.clone(),
        };
        statement.push_generated(entity.id_field_required()?.clone());
        if let Some(version) = entity.version_field() {
            statement.push_generated(version.clone());
        }
        Ok(statement)
    }

    /// Build the update statement for the given field group: the version
    /// column is bumped server-side, the group's other non-identity fields
    /// become SET targets, and the where clause matches id plus version for
    /// optimistic locking. Returns `None` when the group leaves nothing to
    /// update.
    pub(crate) fn update(
        registry: &SchemaRegistry,
        entity: Arc<EntityData>,
        field_group: Option<&str>,
    ) -> Result<Option<Self>> {
        let table = registry.schema_table_name(&entity)?;
        let mut assignments = Vec::new();
        if let Some(version) = entity.version_field() {
            assignments.push(format!(
                "{} = {} + 1",
                version.column_name(),
                version.column_name()
            ));
        }
        let mut parameter_fields = Vec::new();
        for entry in entity.field_group_fields(field_group)? {
            let (field_name, _) = split_group_entry(entry);
            let field = entity.field_data(field_name)?;
            if matches!(field.column_type(), ColumnType::Id | ColumnType::Version) {
                continue;
            }
            parameter_fields.push(field.name().to_string());
            assignments.push(format!("{} = ?", field.column_name()));
        }
        if parameter_fields.is_empty() {
            warn!("no fields are included in the update for: {}", entity.type_name());
            return Ok(None);
        }
        let id_field = entity.id_field_required()?.clone();
        let mut query = format!("update {} set {}", table, assignments.join(", "));
        query.push_str(&format!(" where {} = ?", id_field.column_name()));
        parameter_fields.push(id_field.name().to_string());
        let version = entity.version_field().cloned();
        if let Some(version) = &version {
            query.push_str(&format!(" and {} = ?", version.column_name()));
            parameter_fields.push(version.name().to_string());
        }
        let mut statement = Self {
            query_string: query,
            parameter_fields,
            generated_columns: Vec::new(),
            generated_fields: Vec::new(),
            kind: StatementKind::Update,
            entity,
        };
        if let Some(version) = version {
            statement.push_generated(version);
        }
        Ok(Some(statement))
    }

    fn push_generated(&mut self, field: Arc<FieldData>) {
        self.generated_columns.push(field.column_name().to_string());
        self.generated_fields.push(field);
    }

    /// Execute for a single instance, writing generated columns back into it.
    /// A zero row count (e.g. an optimistic-lock miss or a `DO NOTHING`
    /// conflict) is returned as-is, never raised.
    pub(crate) async fn execute(
        &self,
        session: &SqlSession,
        instance: &mut dyn Any,
    ) -> Result<u64> {
        let params = self.parameters(session, instance)?;
        let result = session
            .execute_returning(&self.query_string, &params, &self.generated_columns)
            .await?;
        if let Some(row) = result.rows.first() {
            self.write_generated(instance, row)?;
        }
        Ok(result.row_count() as u64)
    }

    /// Execute for a list of instances, chunked at [`BATCH_SIZE`] rows. The
    /// generated rows of each chunk are matched back to the chunk's instances
    /// by position.
    pub(crate) async fn execute_in_batch<E: Any + Send + Sync>(
        &self,
        session: &SqlSession,
        instances: &mut [E],
    ) -> Result<()> {
        for chunk in instances.chunks_mut(BATCH_SIZE) {
            let mut rows = Vec::with_capacity(chunk.len());
            for instance in chunk.iter_mut() {
                rows.push(self.parameters(session, instance as &mut dyn Any)?);
            }
            let generated = session
                .execute_batch(&self.query_string, &rows, &self.generated_columns)
                .await?;
            for (instance, row) in chunk.iter_mut().zip(generated.rows.iter()) {
                self.write_generated(instance as &mut dyn Any, row)?;
            }
        }
        Ok(())
    }

    /// Extract the bound parameter values from the instance, notifying the
    /// entity listener first. Version columns bind the literal initial value
    /// on insert; foreign keys bind the referenced entity's identity value.
    fn parameters(&self, session: &SqlSession, instance: &mut dyn Any) -> Result<Vec<SqlValue>> {
        let registry = session.registry();
        if let Some(listener) = registry.listener() {
            match self.kind {
                StatementKind::Insert => listener.before_insert(instance),
                StatementKind::Update => listener.before_update(instance),
            }
        }
        let mut params = Vec::with_capacity(self.parameter_fields.len());
        for field_name in &self.parameter_fields {
            let field = self.entity.field_data(field_name)?;
            let value = if self.kind == StatementKind::Insert
                && field.column_type() == ColumnType::Version
            {
                SqlValue::Integer(1)
            } else if field.column_type() == ColumnType::ForeignKey {
                match field.get_entity(&*instance)? {
                    Some(referenced) => {
                        let target = registry.entity_data_by_id(field.target_type_required()?)?;
                        target.id_field_required()?.get_value(referenced)?
                    }
                    None => SqlValue::Null,
                }
            } else {
                field.get_value(&*instance)?
            };
            params.push(value);
        }
        Ok(params)
    }

    fn write_generated(&self, instance: &mut dyn Any, row: &[SqlValue]) -> Result<()> {
        for (field, value) in self.generated_fields.iter().zip(row.iter()) {
            field.set_value(instance, value.clone())?;
        }
        Ok(())
    }
}

/// Delete one entity row by id (and version, when present). A version
/// mismatch reports zero affected rows.
pub(crate) async fn delete(
    session: &SqlSession,
    entity: &Arc<EntityData>,
    instance: &dyn Any,
) -> Result<u64> {
    let (query, params) = delete_statement(session, entity, instance)?;
    session.execute_update(&query, &params).await
}

/// Delete entity rows in chunks of [`BATCH_SIZE`].
pub(crate) async fn batch_delete<E: Any + Send + Sync>(
    session: &SqlSession,
    entity: &Arc<EntityData>,
    instances: &[E],
) -> Result<()> {
    if instances.is_empty() {
        return Ok(());
    }
    let (query, _) = delete_statement(session, entity, &instances[0] as &dyn Any)?;
    for chunk in instances.chunks(BATCH_SIZE) {
        let mut rows = Vec::with_capacity(chunk.len());
        for instance in chunk {
            let (_, params) = delete_statement(session, entity, instance as &dyn Any)?;
            rows.push(params);
        }
        session.execute_batch(&query, &rows, &[]).await?;
    }
    Ok(())
}

fn delete_statement(
    session: &SqlSession,
    entity: &Arc<EntityData>,
    instance: &dyn Any,
) -> Result<(String, Vec<SqlValue>)> {
    let registry = session.registry();
    let id_field = entity.id_field_required()?;
    let mut query = format!(
        "DELETE FROM {} WHERE {} = ?",
        registry.schema_table_name(entity)?,
        id_field.column_name()
    );
    let mut params = vec![id_field.get_value(instance)?];
    if let Some(version) = entity.version_field() {
        query.push_str(&format!(" AND {} = ?", version.column_name()));
        params.push(version.get_value(instance)?);
    }
    Ok((query, params))
}

/// Acquire a row lock on the given primary key without reading any data.
pub(crate) async fn lock_for_update(
    session: &SqlSession,
    entity: &Arc<EntityData>,
    primary_key: SqlValue,
) -> Result<()> {
    let registry = session.registry();
    let query = format!(
        "SELECT 1 FROM {} WHERE {} = ? FOR UPDATE",
        registry.schema_table_name(entity)?,
        entity.id_field_required()?.column_name()
    );
    session.execute_query(&query, &[primary_key]).await?;
    Ok(())
}
