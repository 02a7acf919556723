use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::{PersistError, Result};
use crate::metadata::field::{
    ColumnType, FieldData, FieldDef, ProjectFn, ProjectMutFn, downcast_mut, downcast_ref,
    project_fn, project_mut_fn,
};

/// A type mapped to a table (or, for mapped superclasses, contributing fields
/// to its subtypes). `describe()` supplies the declarative metadata the
/// registry is built from.
pub trait Entity: Any + Send + Sync + 'static {
    fn describe() -> EntityDef
    where
        Self: Sized;
}

/// A named, composable subset of an entity's fields, scoping select and
/// update column lists. The identity and version fields are implicit members
/// of every group. An entry may carry a `field@group` suffix selecting the
/// join group used when that foreign-key field is expanded.
pub struct FieldGroupDef {
    pub(crate) name: &'static str,
    pub(crate) fields: Vec<&'static str>,
    pub(crate) includes: Vec<&'static str>,
    pub(crate) join_fetch: bool,
}

impl FieldGroupDef {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            includes: Vec::new(),
            join_fetch: false,
        }
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = &'static str>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Include previously declared groups of the same entity. Includes may
    /// only refer backward to groups declared before this one.
    pub fn includes(mut self, groups: impl IntoIterator<Item = &'static str>) -> Self {
        self.includes.extend(groups);
        self
    }

    /// Use this group to fetch fields when the entity is reached through a
    /// foreign key. At most one group per entity may set this.
    pub fn join_fetch(mut self) -> Self {
        self.join_fetch = true;
        self
    }
}

/// An index or unique-constraint declaration over entity field names.
pub struct IndexDef {
    pub(crate) name: Option<&'static str>,
    pub(crate) fields: Vec<&'static str>,
    pub(crate) unique: bool,
}

impl IndexDef {
    pub fn on(fields: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            name: None,
            fields: fields.into_iter().collect(),
            unique: false,
        }
    }

    pub fn unique_on(fields: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            name: None,
            fields: fields.into_iter().collect(),
            unique: true,
        }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Link from an entity to the mapped supertype it embeds: the parent's
/// metadata plus the projection pair giving access to the embedded struct.
pub struct ParentDef {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) describe: fn() -> EntityDef,
    pub(crate) project: ProjectFn,
    pub(crate) project_mut: ProjectMutFn,
}

/// The declarative metadata of one entity type, supplied by
/// [`Entity::describe`] and consumed by the registry builder.
pub struct EntityDef {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) table_override: Option<&'static str>,
    pub(crate) superclass: bool,
    pub(crate) parent: Option<ParentDef>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) groups: Vec<FieldGroupDef>,
    pub(crate) indexes: Vec<IndexDef>,
    pub(crate) constructor: fn() -> Box<dyn Any + Send + Sync>,
}

fn construct<E: Default + Send + Sync + 'static>() -> Box<dyn Any + Send + Sync> {
    Box::new(E::default())
}

impl EntityDef {
    /// Declare a concrete entity. The table name is derived from the type
    /// name unless overridden with [`EntityDef::with_table`].
    pub fn new<E: Entity + Default>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            table_override: None,
            superclass: false,
            parent: None,
            fields: Vec::new(),
            groups: Vec::new(),
            indexes: Vec::new(),
            constructor: construct::<E>,
        }
    }

    /// Declare a mapped superclass: it has no table of its own and only
    /// contributes fields to the entities extending it.
    pub fn mapped_superclass<E: Entity + Default>() -> Self {
        Self {
            superclass: true,
            ..Self::new::<E>()
        }
    }

    pub fn with_table(mut self, table: &'static str) -> Self {
        self.table_override = Some(table);
        self
    }

    /// Declare that `E` extends the mapped supertype `P`, embedded as a
    /// struct field reachable through the given projection pair.
    pub fn extends<E, P>(
        mut self,
        project: fn(&E) -> &P,
        project_mut: fn(&mut E) -> &mut P,
    ) -> Self
    where
        E: Entity,
        P: Entity,
    {
        let project: ProjectFn = project_fn(move |any| {
            let entity = downcast_ref::<E>(any)?;
            Ok(project(entity) as &dyn Any)
        });
        let project_mut: ProjectMutFn = project_mut_fn(move |any| {
            let entity = downcast_mut::<E>(any)?;
            Ok(project_mut(entity) as &mut dyn Any)
        });
        self.parent = Some(ParentDef {
            type_id: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
            describe: P::describe,
            project,
            project_mut,
        });
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field_group(mut self, group: FieldGroupDef) -> Self {
        self.groups.push(group);
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Split a field-group entry into the field name and the optional `@group`
/// join-group override.
pub(crate) fn split_group_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.find('@') {
        Some(at) => (&entry[..at], Some(&entry[at + 1..])),
        None => (entry, None),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    pub(crate) name: Option<String>,
    pub(crate) fields: Vec<String>,
    pub(crate) unique: bool,
}

/// The resolved, immutable metadata of one entity type. Built once by the
/// registry and shared read-only afterwards.
pub struct EntityData {
    type_id: TypeId,
    type_name: String,
    table_name: Option<String>,
    parent: Option<Arc<EntityData>>,
    declared: Vec<Arc<FieldData>>,
    fields: Vec<Arc<FieldData>>,
    id_field: Option<Arc<FieldData>>,
    version_field: Option<Arc<FieldData>>,
    default_group: Vec<String>,
    field_groups: Vec<(String, Vec<String>)>,
    join_field_group: Option<String>,
    indexes: Vec<IndexData>,
    constructor: fn() -> Box<dyn Any + Send + Sync>,
}

impl EntityData {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        type_id: TypeId,
        type_name: &'static str,
        table_name: Option<String>,
        parent: Option<Arc<EntityData>>,
        parent_link: Option<&ParentDef>,
        declared: Vec<FieldData>,
        groups: &[FieldGroupDef],
        indexes: &[IndexDef],
        constructor: fn() -> Box<dyn Any + Send + Sync>,
    ) -> Result<Self> {
        let declared: Vec<Arc<FieldData>> = declared.into_iter().map(Arc::new).collect();
        let mut fields = declared.clone();
        if let (Some(parent), Some(link)) = (&parent, parent_link) {
            for field in parent.fields() {
                fields.push(Arc::new(
                    field.project_through(link.project.clone(), link.project_mut.clone()),
                ));
            }
        }
        // id first, version last, the rest by column name; the sort is stable
        // so own fields stay ahead of inherited ones on equal column names
        fn sort_rank(column_type: ColumnType) -> u8 {
            match column_type {
                ColumnType::Id => 0,
                ColumnType::Version => 2,
                _ => 1,
            }
        }
        fields.sort_by(|a, b| {
            sort_rank(a.column_type())
                .cmp(&sort_rank(b.column_type()))
                .then_with(|| a.column_name().cmp(b.column_name()))
        });

        let mut id_field: Option<Arc<FieldData>> = None;
        let mut version_field: Option<Arc<FieldData>> = None;
        for field in &fields {
            match field.column_type() {
                ColumnType::Id => {
                    if id_field.is_some() {
                        return Err(PersistError::Configuration(format!(
                            "multiple id columns can not be present in an entity: {}",
                            type_name
                        )));
                    }
                    id_field = Some(field.clone());
                }
                ColumnType::Version => {
                    if version_field.is_some() {
                        return Err(PersistError::Configuration(format!(
                            "multiple version columns can not be present in an entity: {}",
                            type_name
                        )));
                    }
                    version_field = Some(field.clone());
                }
                _ => {}
            }
        }
        if id_field.is_none() {
            if let Some(table) = &table_name {
                return Err(PersistError::Configuration(format!(
                    "the entity must have an id field for table: {}",
                    table
                )));
            }
        }

        let mut entity = Self {
            type_id,
            type_name: type_name.to_string(),
            table_name,
            parent,
            declared,
            fields,
            id_field,
            version_field,
            default_group: Vec::new(),
            field_groups: Vec::new(),
            join_field_group: None,
            indexes: indexes
                .iter()
                .map(|index| IndexData {
                    name: index.name.map(str::to_string),
                    fields: index.fields.iter().map(|f| f.to_string()).collect(),
                    unique: index.unique,
                })
                .collect(),
            constructor,
        };
        entity.read_field_group_data(groups)?;
        Ok(entity)
    }

    fn read_field_group_data(&mut self, groups: &[FieldGroupDef]) -> Result<()> {
        let mut default_group = self.implicit_group_members();
        for field in &self.fields {
            if field.is_fetch() && !default_group.iter().any(|n| n == field.name()) {
                default_group.push(field.name().to_string());
            }
        }
        self.default_group = default_group;

        let mut names = HashSet::new();
        for group in groups {
            if group.join_fetch {
                if self.join_field_group.is_some() {
                    return Err(PersistError::Configuration(format!(
                        "a field group with join_fetch can only be used once: {}",
                        self.type_name
                    )));
                }
                self.join_field_group = Some(group.name.to_string());
            }
            if !names.insert(group.name) {
                return Err(PersistError::Configuration(format!(
                    "field group name should be unique for: {}",
                    self.type_name
                )));
            }
        }
        for group in groups {
            let mut members = self.implicit_group_members();
            for include in &group.includes {
                let included = self
                    .field_groups
                    .iter()
                    .find(|(name, _)| name == include)
                    .ok_or_else(|| {
                        PersistError::Configuration(format!(
                            "included field group '{}' not found on: {}",
                            include, self.type_name
                        ))
                    })?;
                for member in &included.1 {
                    if !members.contains(member) {
                        members.push(member.clone());
                    }
                }
            }
            for field in &group.fields {
                if !members.iter().any(|m| m == field) {
                    members.push(field.to_string());
                }
            }
            self.field_groups.push((group.name.to_string(), members));
        }
        Ok(())
    }

    fn implicit_group_members(&self) -> Vec<String> {
        let mut members = Vec::new();
        if let Some(id) = &self.id_field {
            members.push(id.name().to_string());
        }
        if let Some(version) = &self.version_field {
            members.push(version.name().to_string());
        }
        members
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The table name; `None` when this metadata describes a mapped superclass.
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    pub fn is_superclass(&self) -> bool {
        self.table_name.is_none()
    }

    pub fn parent(&self) -> Option<&Arc<EntityData>> {
        self.parent.as_ref()
    }

    pub fn id_field(&self) -> Option<&Arc<FieldData>> {
        self.id_field.as_ref()
    }

    pub(crate) fn id_field_required(&self) -> Result<&Arc<FieldData>> {
        self.id_field.as_ref().ok_or_else(|| {
            PersistError::Configuration(format!("entity has no id field: {}", self.type_name))
        })
    }

    pub fn version_field(&self) -> Option<&Arc<FieldData>> {
        self.version_field.as_ref()
    }

    /// All resolved fields including inherited ones, in query order.
    pub fn fields(&self) -> &[Arc<FieldData>] {
        &self.fields
    }

    /// Only the fields declared directly on this entity.
    pub fn declared_fields(&self) -> &[Arc<FieldData>] {
        &self.declared
    }

    pub fn field_data(&self, field_name: &str) -> Result<&Arc<FieldData>> {
        self.fields
            .iter()
            .find(|field| field.name() == field_name)
            .ok_or_else(|| {
                PersistError::Configuration(format!(
                    "field data is not available for field: {} in: {}",
                    field_name, self.type_name
                ))
            })
    }

    /// The field names selected by the given group, or the default fetch
    /// group when no group is named.
    pub fn field_group_fields(&self, group: Option<&str>) -> Result<&[String]> {
        match group {
            None => Ok(&self.default_group),
            Some(name) => self
                .field_groups
                .iter()
                .find(|(group_name, _)| group_name == name)
                .map(|(_, fields)| fields.as_slice())
                .ok_or_else(|| {
                    PersistError::Configuration(format!(
                        "field group '{}' not found on: {}",
                        name, self.type_name
                    ))
                }),
        }
    }

    /// The fields fetched when this entity is reached through a foreign key:
    /// the id, plus the given group's fields (or the join-fetch group's, when
    /// one is declared and no override is given).
    pub fn join_fetch_fields(&self, join_group: Option<&str>) -> Result<Vec<String>> {
        let mut fields = vec![self.id_field_required()?.name().to_string()];
        let group = match join_group {
            Some(group) => Some(group),
            None => self.join_field_group.as_deref(),
        };
        if let Some(group) = group {
            for entry in self.field_group_fields(Some(group))? {
                if !fields.contains(entry) {
                    fields.push(entry.clone());
                }
            }
        }
        Ok(fields)
    }

    pub fn join_field_group(&self) -> Option<&str> {
        self.join_field_group.as_deref()
    }

    pub(crate) fn index_data(&self) -> &[IndexData] {
        &self.indexes
    }

    /// Create a fresh default instance of the entity type for row mapping.
    pub fn new_instance(&self) -> Box<dyn Any + Send + Sync> {
        (self.constructor)()
    }
}

impl fmt::Debug for EntityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityData")
            .field("type_name", &self.type_name)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields)
            .finish()
    }
}
