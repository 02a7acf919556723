use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::{PersistError, Result, naming};
use crate::metadata::entity::{Entity, EntityData, EntityDef};
use crate::metadata::field::{ColumnType, FieldData, FieldDef};

/// Hook invoked immediately before an entity row is inserted or updated,
/// once per logical row, before parameters are extracted.
pub trait EntityListener: Send + Sync {
    fn before_insert(&self, _entity: &mut dyn Any) {}
    fn before_update(&self, _entity: &mut dyn Any) {}
}

/// The resolved entity schema: every registered entity type (including
/// synthesized mapped-superclass metadata), keyed by type. Built once via
/// [`SchemaRegistry::builder`] and immutable afterwards, so it can be shared
/// freely across concurrent operations.
pub struct SchemaRegistry {
    name: Option<String>,
    listener: Option<Arc<dyn EntityListener>>,
    entities: HashMap<TypeId, Arc<EntityData>>,
    by_name: HashMap<String, TypeId>,
    order: Vec<TypeId>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder {
            name: None,
            listener: None,
            defs: Vec::new(),
        }
    }

    /// The schema (namespace) name, used as a table-name prefix when present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn listener(&self) -> Option<&Arc<dyn EntityListener>> {
        self.listener.as_ref()
    }

    /// All registered entity metadata, in registration order.
    pub fn all_entity_data(&self) -> impl Iterator<Item = &Arc<EntityData>> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    pub fn entity_data<E: Entity>(&self) -> Result<&Arc<EntityData>> {
        self.entities.get(&TypeId::of::<E>()).ok_or_else(|| {
            PersistError::Configuration(format!(
                "entity data is not available for type: {}",
                std::any::type_name::<E>()
            ))
        })
    }

    pub fn entity_data_by_id(&self, type_id: TypeId) -> Result<&Arc<EntityData>> {
        self.entities.get(&type_id).ok_or_else(|| {
            PersistError::Configuration("entity data is not available for the given type".into())
        })
    }

    pub fn entity_data_by_name(&self, type_name: &str) -> Result<&Arc<EntityData>> {
        self.by_name
            .get(type_name)
            .and_then(|id| self.entities.get(id))
            .ok_or_else(|| {
                PersistError::Configuration(format!(
                    "entity data is not available for type: {}",
                    type_name
                ))
            })
    }

    /// The table name qualified with the schema name, as used in SQL text.
    pub fn schema_table_name(&self, entity: &EntityData) -> Result<String> {
        let table = entity.table_name().ok_or_else(|| {
            PersistError::Configuration(format!(
                "{} is a mapped superclass and has no table",
                entity.type_name()
            ))
        })?;
        Ok(self.qualify(table))
    }

    pub(crate) fn qualify(&self, table: &str) -> String {
        match &self.name {
            Some(name) => format!("{}.{}", name, table),
            None => table.to_string(),
        }
    }
}

/// Collects entity types and configuration, then builds the registry in one
/// validated pass.
pub struct SchemaRegistryBuilder {
    name: Option<String>,
    listener: Option<Arc<dyn EntityListener>>,
    defs: Vec<EntityDef>,
}

impl SchemaRegistryBuilder {
    /// Set the schema name; stored lower-cased.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the entity listener notified before inserts and updates.
    pub fn listener(mut self, listener: Arc<dyn EntityListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Register an entity type with the schema.
    pub fn entity<E: Entity>(mut self) -> Self {
        self.defs.push(E::describe());
        self
    }

    /// Build the fully configured, immutable registry.
    pub fn build(self) -> Result<SchemaRegistry> {
        if self.defs.is_empty() {
            return Err(PersistError::Configuration(
                "this schema doesn't contain any entity".into(),
            ));
        }
        let name = match self.name {
            Some(name) => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    return Err(PersistError::Configuration(format!(
                        "invalid schema name: '{}'",
                        name
                    )));
                }
                Some(trimmed.to_lowercase())
            }
            None => None,
        };

        // collect the declared types plus synthesized ancestor metadata,
        // parents ahead of the entities extending them
        let mut defs: HashMap<TypeId, EntityDef> = HashMap::new();
        let mut order: Vec<TypeId> = Vec::new();
        let mut explicit: HashSet<TypeId> = HashSet::new();
        for def in self.defs {
            if !explicit.insert(def.type_id) {
                return Err(PersistError::Configuration(format!(
                    "this entity is already added: {}",
                    def.type_name
                )));
            }
            let mut ancestors = Vec::new();
            let mut next = def.parent.as_ref().map(|p| (p.describe)());
            while let Some(ancestor) = next {
                if defs.contains_key(&ancestor.type_id) {
                    break;
                }
                next = ancestor.parent.as_ref().map(|p| (p.describe)());
                ancestors.push(ancestor);
            }
            for ancestor in ancestors.into_iter().rev() {
                order.push(ancestor.type_id);
                defs.insert(ancestor.type_id, ancestor);
            }
            if defs.contains_key(&def.type_id) {
                // synthesized earlier from a child's parent chain; the
                // explicit declaration carries the same facts
                defs.insert(def.type_id, def);
            } else {
                order.push(def.type_id);
                defs.insert(def.type_id, def);
            }
        }

        let mut entities: HashMap<TypeId, Arc<EntityData>> = HashMap::new();
        let mut by_name: HashMap<String, TypeId> = HashMap::new();
        for type_id in &order {
            let def = defs
                .get(type_id)
                .ok_or_else(|| PersistError::Configuration("entity definition missing".into()))?;
            let parent = match &def.parent {
                Some(parent) => Some(
                    entities
                        .get(&parent.type_id)
                        .cloned()
                        .ok_or_else(|| {
                            PersistError::Configuration(format!(
                                "parent entity {} was not resolved before {}",
                                parent.type_name, def.type_name
                            ))
                        })?,
                ),
                None => None,
            };
            let table_name = if def.superclass {
                None
            } else {
                Some(naming::sql_name(
                    simple_name(def.type_name),
                    def.table_override,
                ))
            };
            let mut declared = Vec::with_capacity(def.fields.len());
            let mut field_names = HashSet::new();
            for field in &def.fields {
                if !field_names.insert(field.name) {
                    return Err(PersistError::Configuration(format!(
                        "field '{}' is declared twice on: {}",
                        field.name, def.type_name
                    )));
                }
                declared.push(resolve_field(field, &defs)?);
            }
            let entity = EntityData::assemble(
                def.type_id,
                def.type_name,
                table_name,
                parent,
                def.parent.as_ref(),
                declared,
                &def.groups,
                &def.indexes,
                def.constructor,
            )?;
            by_name.insert(def.type_name.to_string(), def.type_id);
            entities.insert(*type_id, Arc::new(entity));
        }

        Ok(SchemaRegistry {
            name,
            listener: self.listener,
            entities,
            by_name,
            order,
        })
    }
}

/// Derive the column name and classify the field. A field whose declared
/// target type is registered in this schema becomes a foreign key; an
/// unregistered target is a configuration error.
fn resolve_field(def: &FieldDef, defs: &HashMap<TypeId, EntityDef>) -> Result<FieldData> {
    let column_name = naming::sql_name(def.name, def.column);
    let mut column_type = def.column_type;
    if let Some(target) = &def.target {
        if !defs.contains_key(&target.type_id) {
            return Err(PersistError::Configuration(format!(
                "referenced entity type {} is not registered (field: {})",
                target.type_name, def.name
            )));
        }
        if column_type != ColumnType::Column {
            return Err(PersistError::Configuration(format!(
                "a reference field can not be marked {:?}: {}",
                column_type, def.name
            )));
        }
        column_type = ColumnType::ForeignKey;
    }
    Ok(FieldData::new(def, column_name, column_type))
}

fn simple_name(type_name: &str) -> &str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}
