// ============================================================================
// sqlpersist Library
// ============================================================================
//
// Entity metadata, dynamic SQL generation and transaction-scoped execution
// for relational databases.
//
// Entity types declare their mapping once (table, columns, foreign keys,
// field groups) through a registration API; the resulting schema registry is
// built once, validated, and shared read-only. SQL statements are generated
// from that metadata and executed through a pluggable driver connection, with
// result rows mapped back into entity graphs.
//
// ```ignore
// use std::sync::Arc;
// use sqlpersist::{Repository, SchemaRegistry, SqlValue};
//
// let registry = Arc::new(
//     SchemaRegistry::builder()
//         .named("billing")
//         .entity::<Customer>()
//         .entity::<Invoice>()
//         .build()?,
// );
// let repository = Repository::new(data_source, registry);
//
// let invoices = repository
//     .transact(|session| async move {
//         session
//             .find::<Invoice>()?
//             .join("x.customer", "c")?
//             .and_where("c.name = ?", [SqlValue::from("acme")])?
//             .order_by("x.amount")?
//             .fetch(0, 20)
//             .await
//     })
//     .await?;
// ```

pub mod core;
pub mod interface;
pub mod metadata;
pub mod result;
pub mod sql;

// Re-export main types for convenience
pub use core::{PersistError, Result, Row, SqlParam, SqlType, SqlValue};
pub use interface::{CatalogSnapshot, Connection, DataSource, TableSnapshot};
pub use metadata::{
    ColumnType, Entity, EntityData, EntityDef, EntityListener, FieldData, FieldDef, FieldGroupDef,
    IndexDef, SchemaRegistry, SchemaRegistryBuilder,
};
pub use result::QueryResult;
pub use sql::{Finder, InnerQuery, MappingTool, Repository, SqlSession};
