mod entity;
mod field;
mod schema;

pub use entity::{Entity, EntityData, EntityDef, FieldGroupDef, IndexDef};
pub use field::{ColumnType, FieldData, FieldDef};
pub use schema::{EntityListener, SchemaRegistry, SchemaRegistryBuilder};

pub(crate) use entity::split_group_entry;
