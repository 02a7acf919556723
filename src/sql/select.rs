use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{PersistError, Result, Row, SqlValue};
use crate::metadata::{ColumnType, EntityData, FieldData, SchemaRegistry, split_group_entry};
use crate::sql::session::SqlSession;

/// The select-list plan for one entity alias. Row mapping consumes result
/// columns in exactly the order this plan listed them during select-list
/// construction; the two sides share this structure so they can never
/// diverge.
pub(crate) struct RowPlan {
    pub(crate) type_id: TypeId,
    pub(crate) fields: Vec<PlannedField>,
}

pub(crate) enum PlannedField {
    /// One plain column of the owning alias.
    Column(Arc<FieldData>),
    /// A joined foreign key, expanded into the target's join-fetch fields.
    Reference {
        field: Arc<FieldData>,
        plan: RowPlan,
    },
    /// A second-level foreign key: only the referenced id is fetched.
    ReferenceId {
        field: Arc<FieldData>,
        target: TypeId,
        target_id: Arc<FieldData>,
    },
}

/// Render the join clause for a foreign-key field. Optional foreign keys use
/// a left outer join unless an inner join is forced.
pub(crate) fn join_clause(
    registry: &SchemaRegistry,
    from_alias: &str,
    fk_entity: &Arc<EntityData>,
    field: &Arc<FieldData>,
    as_alias: &str,
    force_inner: bool,
) -> Result<String> {
    let join_type = if force_inner || !field.is_optional() {
        " inner join "
    } else {
        " left outer join "
    };
    Ok(format!(
        "{}{} as {} on {}.{} = {}.{}",
        join_type,
        registry.schema_table_name(fk_entity)?,
        as_alias,
        as_alias,
        fk_entity.id_field_required()?.column_name(),
        from_alias,
        field.column_name()
    ))
}

/// Build the select column list for the given alias by walking its field
/// group. Unjoined foreign keys get a synthesized `t0, t1, ...` join and are
/// expanded into the target's join-fetch fields; a foreign key nested inside
/// that expansion contributes only its id column.
pub(crate) fn build_select(
    registry: &SchemaRegistry,
    entity: &Arc<EntityData>,
    alias: &str,
    field_group: Option<&str>,
    join_builder: &mut String,
    join_alias_map: Option<&HashMap<String, String>>,
) -> Result<(String, RowPlan)> {
    let mut fk_counter = 0usize;
    let mut columns = String::from("select");
    let mut planned = Vec::new();
    for entry in entity.field_group_fields(field_group)? {
        let (field_name, join_group) = split_group_entry(entry);
        let field = entity.field_data(field_name)?;
        if field.column_type() == ColumnType::ForeignKey {
            let fk_entity = registry.entity_data_by_id(field.target_type_required()?)?;
            let as_alias = join_alias_map
                .and_then(|map| map.get(&format!("{}.{}", alias, field_name)))
                .cloned();
            let as_alias = match as_alias {
                Some(existing) => existing,
                None => {
                    let new_alias = format!("t{}", fk_counter);
                    fk_counter += 1;
                    join_builder.push_str(&join_clause(
                        registry, alias, fk_entity, field, &new_alias, false,
                    )?);
                    new_alias
                }
            };
            let mut nested = Vec::new();
            for fk_entry in fk_entity.join_fetch_fields(join_group)? {
                let (fk_name, _) = split_group_entry(&fk_entry);
                let fk_field = fk_entity.field_data(fk_name)?;
                columns.push(' ');
                columns.push_str(&as_alias);
                columns.push('.');
                columns.push_str(fk_field.column_name());
                columns.push(',');
                if fk_field.column_type() == ColumnType::ForeignKey {
                    let second = registry.entity_data_by_id(fk_field.target_type_required()?)?;
                    nested.push(PlannedField::ReferenceId {
                        field: fk_field.clone(),
                        target: second.type_id(),
                        target_id: second.id_field_required()?.clone(),
                    });
                } else {
                    nested.push(PlannedField::Column(fk_field.clone()));
                }
            }
            planned.push(PlannedField::Reference {
                field: field.clone(),
                plan: RowPlan {
                    type_id: fk_entity.type_id(),
                    fields: nested,
                },
            });
        } else {
            columns.push(' ');
            columns.push_str(alias);
            columns.push('.');
            columns.push_str(field.column_name());
            columns.push(',');
            planned.push(PlannedField::Column(field.clone()));
        }
    }
    columns.pop();
    Ok((
        columns,
        RowPlan {
            type_id: entity.type_id(),
            fields: planned,
        },
    ))
}

fn next_value(row: &Row, index: &mut usize) -> Result<SqlValue> {
    let value = row.get(*index).cloned().ok_or_else(|| {
        PersistError::execution(format!("result row is missing column {}", *index + 1))
    })?;
    *index += 1;
    Ok(value)
}

/// Rebuild an entity instance (and its joined references) from one result row.
pub(crate) fn hydrate_row(
    registry: &SchemaRegistry,
    plan: &RowPlan,
    row: &Row,
) -> Result<Box<dyn Any + Send + Sync>> {
    let mut index = 0usize;
    hydrate(registry, plan, row, &mut index)
}

fn hydrate(
    registry: &SchemaRegistry,
    plan: &RowPlan,
    row: &Row,
    index: &mut usize,
) -> Result<Box<dyn Any + Send + Sync>> {
    let entity_data = registry.entity_data_by_id(plan.type_id)?;
    let mut instance = entity_data.new_instance();
    for planned in &plan.fields {
        match planned {
            PlannedField::Column(field) => {
                let value = next_value(row, index)?;
                field.set_value(&mut *instance, value)?;
            }
            PlannedField::Reference { field, plan } => {
                let nested = hydrate_optional(registry, plan, row, index)?;
                field.set_entity(&mut *instance, nested)?;
            }
            PlannedField::ReferenceId {
                field,
                target,
                target_id,
            } => {
                let value = next_value(row, index)?;
                if !value.is_null() {
                    let target_data = registry.entity_data_by_id(*target)?;
                    let mut nested = target_data.new_instance();
                    target_id.set_value(&mut *nested, value)?;
                    field.set_entity(&mut *instance, Some(nested))?;
                }
            }
        }
    }
    Ok(instance)
}

/// Hydrate a joined reference: the instance is only created once a non-null
/// column shows up, so an unmatched outer join maps to `None`.
fn hydrate_optional(
    registry: &SchemaRegistry,
    plan: &RowPlan,
    row: &Row,
    index: &mut usize,
) -> Result<Option<Box<dyn Any + Send + Sync>>> {
    let entity_data = registry.entity_data_by_id(plan.type_id)?;
    let mut instance: Option<Box<dyn Any + Send + Sync>> = None;
    for planned in &plan.fields {
        match planned {
            PlannedField::Column(field) => {
                let value = next_value(row, index)?;
                if !value.is_null() {
                    let owner = instance.get_or_insert_with(|| entity_data.new_instance());
                    field.set_value(&mut **owner, value)?;
                }
            }
            PlannedField::ReferenceId {
                field,
                target,
                target_id,
            } => {
                let value = next_value(row, index)?;
                if !value.is_null() {
                    let target_data = registry.entity_data_by_id(*target)?;
                    let mut nested = target_data.new_instance();
                    target_id.set_value(&mut *nested, value)?;
                    let owner = instance.get_or_insert_with(|| entity_data.new_instance());
                    field.set_entity(&mut **owner, Some(nested))?;
                }
            }
            PlannedField::Reference { field, plan } => {
                let nested = hydrate_optional(registry, plan, row, index)?;
                if nested.is_some() {
                    let owner = instance.get_or_insert_with(|| entity_data.new_instance());
                    field.set_entity(&mut **owner, nested)?;
                }
            }
        }
    }
    Ok(instance)
}

/// A select of one entity row by primary key, expanding the field group the
/// same way the finder does.
pub(crate) struct SelectQuery<'a> {
    session: &'a SqlSession,
    entity: Arc<EntityData>,
    field_group: Option<&'a str>,
    primary_key: SqlValue,
    alias: &'static str,
}

impl<'a> SelectQuery<'a> {
    pub(crate) fn new(
        session: &'a SqlSession,
        entity: Arc<EntityData>,
        field_group: Option<&'a str>,
        primary_key: SqlValue,
    ) -> Self {
        Self {
            session,
            entity,
            field_group,
            primary_key,
            alias: "x",
        }
    }

    pub(crate) async fn find(&self, for_update: bool) -> Result<Option<Box<dyn Any + Send + Sync>>> {
        let registry = self.session.registry().clone();
        let mut join_builder = String::new();
        let (columns, plan) = build_select(
            &registry,
            &self.entity,
            self.alias,
            self.field_group,
            &mut join_builder,
            None,
        )?;
        let mut sql = format!(
            "{} from {} as {}{}",
            columns,
            registry.schema_table_name(&self.entity)?,
            self.alias,
            join_builder
        );
        sql.push_str(&format!(
            " where {}.{} = ?",
            self.alias,
            self.entity.id_field_required()?.column_name()
        ));
        if for_update {
            sql.push_str(&format!(" for update of {}", self.alias));
        }
        let result = self
            .session
            .execute_query(&sql, std::slice::from_ref(&self.primary_key))
            .await?;
        match result.rows.first() {
            Some(row) => Ok(Some(hydrate_row(&registry, &plan, row)?)),
            None => Ok(None),
        }
    }
}
