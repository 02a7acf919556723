use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::core::{PersistError, Result, SqlParam, SqlType, SqlValue};

/// How a persisted field maps to its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// A plain value column.
    Column,
    /// The database-generated identity column.
    Id,
    /// The optimistic-lock version column.
    Version,
    /// A large-object column (unbounded text or binary).
    Lob,
    /// A column referencing another entity's identity.
    ForeignKey,
}

pub(crate) type GetValueFn = Arc<dyn Fn(&dyn Any) -> Result<SqlValue> + Send + Sync>;
pub(crate) type SetValueFn = Arc<dyn Fn(&mut dyn Any, SqlValue) -> Result<()> + Send + Sync>;
pub(crate) type GetEntityFn =
    Arc<dyn for<'a> Fn(&'a dyn Any) -> Result<Option<&'a dyn Any>> + Send + Sync>;
pub(crate) type SetEntityFn =
    Arc<dyn Fn(&mut dyn Any, Option<Box<dyn Any + Send + Sync>>) -> Result<()> + Send + Sync>;
pub(crate) type ProjectFn =
    Arc<dyn for<'a> Fn(&'a dyn Any) -> Result<&'a dyn Any> + Send + Sync>;
pub(crate) type ProjectMutFn =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> Result<&'a mut dyn Any> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Accessor {
    Value { get: GetValueFn, set: SetValueFn },
    EntityRef { get: GetEntityFn, set: SetEntityFn },
}

// The helpers below pin the higher-ranked closure signatures so the borrow in
// the return type stays tied to the argument lifetime.
pub(crate) fn entity_get_fn<F>(f: F) -> GetEntityFn
where
    F: for<'a> Fn(&'a dyn Any) -> Result<Option<&'a dyn Any>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn project_fn<F>(f: F) -> ProjectFn
where
    F: for<'a> Fn(&'a dyn Any) -> Result<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn project_mut_fn<F>(f: F) -> ProjectMutFn
where
    F: for<'a> Fn(&'a mut dyn Any) -> Result<&'a mut dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn downcast_ref<E: Any>(any: &dyn Any) -> Result<&E> {
    any.downcast_ref::<E>().ok_or_else(|| {
        PersistError::TypeMismatch(format!(
            "expected entity type {}",
            std::any::type_name::<E>()
        ))
    })
}

pub(crate) fn downcast_mut<E: Any>(any: &mut dyn Any) -> Result<&mut E> {
    any.downcast_mut::<E>().ok_or_else(|| {
        PersistError::TypeMismatch(format!(
            "expected entity type {}",
            std::any::type_name::<E>()
        ))
    })
}

#[derive(Clone, Copy)]
pub(crate) struct FieldTarget {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

/// The declarative facts about one persisted field, with its accessor pair
/// captured once at declaration time.
pub struct FieldDef {
    pub(crate) name: &'static str,
    pub(crate) column: Option<&'static str>,
    pub(crate) column_type: ColumnType,
    pub(crate) sql_type: SqlType,
    pub(crate) optional: bool,
    pub(crate) length: u16,
    pub(crate) scale: u16,
    pub(crate) fetch: bool,
    pub(crate) indexed: bool,
    pub(crate) target: Option<FieldTarget>,
    pub(crate) accessor: Accessor,
}

impl FieldDef {
    /// Declare a plain value column backed by an `Option<T>` struct field.
    pub fn column<E, T>(
        name: &'static str,
        get: impl Fn(&E) -> Option<T> + Send + Sync + 'static,
        set: impl Fn(&mut E, Option<T>) + Send + Sync + 'static,
    ) -> Self
    where
        E: Any + Send + Sync,
        T: SqlParam,
    {
        let get_fn: GetValueFn = Arc::new(move |any| {
            let entity = downcast_ref::<E>(any)?;
            Ok(match get(entity) {
                Some(value) => value.to_sql(),
                None => SqlValue::Null,
            })
        });
        let set_fn: SetValueFn = Arc::new(move |any, value| {
            let entity = downcast_mut::<E>(any)?;
            if value.is_null() {
                set(entity, None);
            } else {
                set(entity, Some(T::from_sql(value)?));
            }
            Ok(())
        });
        Self {
            name,
            column: None,
            column_type: ColumnType::Column,
            sql_type: T::SQL_TYPE,
            optional: true,
            length: 255,
            scale: 0,
            fetch: true,
            indexed: false,
            target: None,
            accessor: Accessor::Value {
                get: get_fn,
                set: set_fn,
            },
        }
    }

    /// Declare a field holding another entity. The registry classifies it as
    /// a foreign key when the target type is registered in the same schema.
    pub fn reference<E, T>(
        name: &'static str,
        get: impl for<'a> Fn(&'a E) -> Option<&'a T> + Send + Sync + 'static,
        set: impl Fn(&mut E, Option<T>) + Send + Sync + 'static,
    ) -> Self
    where
        E: Any + Send + Sync,
        T: Any + Send + Sync,
    {
        let get_fn = entity_get_fn(move |any| {
            let entity = downcast_ref::<E>(any)?;
            Ok(get(entity).map(|value| value as &dyn Any))
        });
        let set_fn: SetEntityFn = Arc::new(move |any, value| {
            let entity = downcast_mut::<E>(any)?;
            let value = match value {
                Some(boxed) => Some(*boxed.downcast::<T>().map_err(|_| {
                    PersistError::TypeMismatch(format!(
                        "unexpected entity type for field '{}'",
                        name
                    ))
                })?),
                None => None,
            };
            set(entity, value);
            Ok(())
        });
        Self {
            name,
            column: None,
            column_type: ColumnType::Column,
            sql_type: SqlType::BigInt,
            optional: true,
            length: 255,
            scale: 0,
            fetch: true,
            indexed: false,
            target: Some(FieldTarget {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            }),
            accessor: Accessor::EntityRef {
                get: get_fn,
                set: set_fn,
            },
        }
    }

    /// Mark this field as the identity column.
    pub fn id(mut self) -> Self {
        self.column_type = ColumnType::Id;
        self
    }

    /// Mark this field as the optimistic-lock version column.
    pub fn version(mut self) -> Self {
        self.column_type = ColumnType::Version;
        self.optional = false;
        self
    }

    /// Mark this field as a large object.
    pub fn lob(mut self) -> Self {
        self.column_type = ColumnType::Lob;
        self
    }

    /// Override the derived column name.
    pub fn named(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Declare the column `not null`.
    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn scale(mut self, scale: u16) -> Self {
        self.scale = scale;
        self
    }

    /// Exclude this field from the default fetch group.
    pub fn no_fetch(mut self) -> Self {
        self.fetch = false;
        self
    }

    /// Declare a single-column index on this field.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// The resolved, immutable descriptor of one persisted field. The column name
/// is fixed when the registry is built and never recomputed.
#[derive(Clone)]
pub struct FieldData {
    name: String,
    column_name: String,
    column_type: ColumnType,
    sql_type: SqlType,
    optional: bool,
    length: u16,
    scale: u16,
    fetch: bool,
    indexed: bool,
    target_type: Option<TypeId>,
    accessor: Accessor,
}

impl FieldData {
    pub(crate) fn new(def: &FieldDef, column_name: String, column_type: ColumnType) -> Self {
        Self {
            name: def.name.to_string(),
            column_name,
            column_type,
            sql_type: def.sql_type,
            optional: def.optional,
            length: def.length,
            scale: def.scale,
            fetch: def.fetch,
            indexed: def.indexed,
            target_type: def.target.map(|t| t.type_id),
            accessor: def.accessor.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_fetch(&self) -> bool {
        self.fetch
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// The referenced entity type, for foreign-key fields.
    pub fn target_type(&self) -> Option<TypeId> {
        self.target_type
    }

    pub(crate) fn target_type_required(&self) -> Result<TypeId> {
        self.target_type.ok_or_else(|| {
            PersistError::Configuration(format!("field '{}' is not a foreign key", self.name))
        })
    }

    /// Read this field's column value from the given entity instance.
    pub fn get_value(&self, entity: &dyn Any) -> Result<SqlValue> {
        match &self.accessor {
            Accessor::Value { get, .. } => get(entity),
            Accessor::EntityRef { .. } => Err(PersistError::TypeMismatch(format!(
                "field '{}' holds an entity reference, not a column value",
                self.name
            ))),
        }
    }

    /// Write a column value into the given entity instance.
    pub fn set_value(&self, entity: &mut dyn Any, value: SqlValue) -> Result<()> {
        match &self.accessor {
            Accessor::Value { set, .. } => set(entity, value),
            Accessor::EntityRef { .. } => Err(PersistError::TypeMismatch(format!(
                "field '{}' holds an entity reference, not a column value",
                self.name
            ))),
        }
    }

    /// Borrow the referenced entity from the given instance, for foreign-key fields.
    pub fn get_entity<'a>(&self, entity: &'a dyn Any) -> Result<Option<&'a dyn Any>> {
        match &self.accessor {
            Accessor::EntityRef { get, .. } => get(entity),
            Accessor::Value { .. } => Err(PersistError::TypeMismatch(format!(
                "field '{}' holds a column value, not an entity reference",
                self.name
            ))),
        }
    }

    /// Install a referenced entity into the given instance, for foreign-key fields.
    pub fn set_entity(
        &self,
        entity: &mut dyn Any,
        value: Option<Box<dyn Any + Send + Sync>>,
    ) -> Result<()> {
        match &self.accessor {
            Accessor::EntityRef { set, .. } => set(entity, value),
            Accessor::Value { .. } => Err(PersistError::TypeMismatch(format!(
                "field '{}' holds a column value, not an entity reference",
                self.name
            ))),
        }
    }

    /// Re-bind this field so its accessors operate on a subtype instance that
    /// embeds the declaring type, by routing access through the projection.
    pub(crate) fn project_through(&self, project: ProjectFn, project_mut: ProjectMutFn) -> Self {
        let accessor = match &self.accessor {
            Accessor::Value { get, set } => {
                let (get, set) = (get.clone(), set.clone());
                let (p, pm) = (project, project_mut);
                Accessor::Value {
                    get: Arc::new(move |any| get(p(any)?)),
                    set: Arc::new(move |any, value| set(pm(any)?, value)),
                }
            }
            Accessor::EntityRef { get, set } => {
                let (get, set) = (get.clone(), set.clone());
                let (p, pm) = (project, project_mut);
                Accessor::EntityRef {
                    get: entity_get_fn(move |any| get(p(any)?)),
                    set: Arc::new(move |any, value| set(pm(any)?, value)),
                }
            }
        };
        Self {
            name: self.name.clone(),
            column_name: self.column_name.clone(),
            column_type: self.column_type,
            sql_type: self.sql_type,
            optional: self.optional,
            length: self.length,
            scale: self.scale,
            fetch: self.fetch,
            indexed: self.indexed,
            target_type: self.target_type,
            accessor,
        }
    }

    /// Render the DDL column definition fragment for this field.
    pub fn column_definition(&self) -> String {
        if self.column_type == ColumnType::Id {
            let type_ddl = match self.sql_type.serial_ddl() {
                Some(serial) => serial.to_string(),
                None => self.sql_type.ddl(self.length, self.scale),
            };
            return format!("{} {} primary key", self.column_name, type_ddl);
        }
        let type_ddl = if self.column_type == ColumnType::Lob {
            self.sql_type.lob_ddl().to_string()
        } else {
            self.sql_type.ddl(self.length, self.scale)
        };
        let mut definition = format!("{} {}", self.column_name, type_ddl);
        if !self.optional {
            definition.push_str(" not null");
        }
        definition
    }
}

impl fmt::Debug for FieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldData")
            .field("name", &self.name)
            .field("column_name", &self.column_name)
            .field("column_type", &self.column_type)
            .field("optional", &self.optional)
            .finish()
    }
}
