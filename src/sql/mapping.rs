use std::sync::Arc;

use log::debug;

use crate::core::{PersistError, Result};
use crate::interface::CatalogSnapshot;
use crate::metadata::{ColumnType, EntityData, FieldData, SchemaRegistry};
use crate::sql::session::SqlSession;

struct ForeignKeyInfo {
    name: String,
    table: String,
    column: String,
    target_table: String,
    target_column: String,
}

struct IndexInfo {
    name: String,
    columns: Vec<String>,
    unique: bool,
}

/// Reconciles the declared entity schema with the live database catalog by
/// emitting additive DDL only: missing schemas, tables, columns, indexes,
/// unique constraints and foreign keys. Nothing is ever dropped or renamed.
pub struct MappingTool;

impl MappingTool {
    /// Diff the registry against a catalog snapshot and return the DDL
    /// statements needed to reconcile, in execution order. An up-to-date
    /// catalog yields an empty plan.
    pub fn plan(registry: &SchemaRegistry, snapshot: &CatalogSnapshot) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        if let Some(name) = registry.name() {
            if !snapshot.schema_exists {
                statements.push(format!("create schema if not exists {}", name));
            }
        }
        let mut foreign_keys: Vec<ForeignKeyInfo> = Vec::new();
        for entity in registry.all_entity_data() {
            let Some(table) = entity.table_name() else {
                continue; // mapped superclass, no table of its own
            };
            let qualified = registry.schema_table_name(entity)?;
            match snapshot.table(table) {
                None => {
                    let mut columns = Vec::with_capacity(entity.fields().len());
                    for field in entity.fields() {
                        columns.push(column_definition(registry, field)?);
                    }
                    statements.push(format!("CREATE TABLE {} ({})", qualified, columns.join(", ")));
                }
                Some(existing) => {
                    let mut additions = Vec::new();
                    for field in entity.fields() {
                        if !existing.columns.contains(field.column_name()) {
                            additions
                                .push(format!("ADD COLUMN {}", column_definition(registry, field)?));
                        }
                    }
                    if !additions.is_empty() {
                        statements.push(format!("ALTER TABLE {} {}", qualified, additions.join(", ")));
                    }
                }
            }
            for index in index_infos(entity, table)? {
                let exists = snapshot
                    .table(table)
                    .is_some_and(|info| info.indexes.contains(&index.name));
                if exists {
                    continue;
                }
                if index.unique {
                    statements.push(format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                        qualified,
                        index.name,
                        index.columns.join(", ")
                    ));
                } else {
                    statements.push(format!(
                        "CREATE INDEX {} ON {} ({})",
                        index.name,
                        qualified,
                        index.columns.join(", ")
                    ));
                }
            }
            for field in entity.fields() {
                if field.column_type() == ColumnType::ForeignKey {
                    let target = registry.entity_data_by_id(field.target_type_required()?)?;
                    foreign_keys.push(ForeignKeyInfo {
                        name: format!("{}_{}_fkey", table, field.column_name()),
                        table: qualified.clone(),
                        column: field.column_name().to_string(),
                        target_table: registry.schema_table_name(target)?,
                        target_column: target.id_field_required()?.column_name().to_string(),
                    });
                }
            }
        }
        // foreign keys go last so every referenced table exists by then
        for fk in foreign_keys {
            if snapshot.foreign_keys.contains(&fk.name) {
                continue;
            }
            statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) DEFERRABLE INITIALLY DEFERRED",
                fk.table, fk.name, fk.column, fk.target_table, fk.target_column
            ));
        }
        Ok(statements)
    }

    /// Snapshot the live catalog through the session's connection, plan the
    /// reconciliation and execute it. Returns the executed statements.
    pub async fn sync(session: &SqlSession) -> Result<Vec<String>> {
        let registry = session.registry().clone();
        let snapshot = session.catalog_snapshot().await?;
        let statements = Self::plan(&registry, &snapshot)?;
        for statement in &statements {
            debug!("{}", statement);
            session.execute_update(statement, &[]).await?;
        }
        Ok(statements)
    }
}

/// The DDL definition of one column. Foreign-key columns take the plain type
/// of the referenced identity column.
fn column_definition(registry: &SchemaRegistry, field: &Arc<FieldData>) -> Result<String> {
    if field.column_type() == ColumnType::ForeignKey {
        let target = registry.entity_data_by_id(field.target_type_required()?)?;
        let id_type = target.id_field_required()?.sql_type();
        let mut definition = format!("{} {}", field.column_name(), id_type.ddl(255, 0));
        if !field.is_optional() {
            definition.push_str(" not null");
        }
        return Ok(definition);
    }
    Ok(field.column_definition())
}

fn index_infos(entity: &EntityData, table: &str) -> Result<Vec<IndexInfo>> {
    let mut infos = Vec::new();
    for index in entity.index_data() {
        let mut columns = Vec::with_capacity(index.fields.len());
        for field_name in &index.fields {
            columns.push(entity.field_data(field_name)?.column_name().to_string());
        }
        if columns.is_empty() {
            return Err(PersistError::InvalidArgument(format!(
                "at least one column should be specified for an index on: {}",
                table
            )));
        }
        let suffix = if index.unique { "key" } else { "idx" };
        let name = match &index.name {
            Some(name) => format!("{}_{}", table, name),
            None => format!("{}_{}_{}", table, columns.join("_"), suffix),
        };
        infos.push(IndexInfo {
            name,
            columns,
            unique: index.unique,
        });
    }
    for field in entity.fields() {
        if field.is_indexed() {
            infos.push(IndexInfo {
                name: format!("{}_{}_idx", table, field.column_name()),
                columns: vec![field.column_name().to_string()],
                unique: false,
            });
        }
    }
    Ok(infos)
}
