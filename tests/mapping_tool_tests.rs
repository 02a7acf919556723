/// Mapping tool tests: additive DDL planning against catalog snapshots.
mod common;

use std::collections::{HashMap, HashSet};

use common::{Customer, CustomerGroup, Invoice, MockState};
use sqlpersist::{
    CatalogSnapshot, MappingTool, Result, SchemaRegistry, TableSnapshot,
};

fn billing_registry() -> SchemaRegistry {
    SchemaRegistry::builder()
        .named("billing")
        .entity::<CustomerGroup>()
        .entity::<Customer>()
        .entity::<Invoice>()
        .build()
        .unwrap()
}

fn table(columns: &[&str], indexes: &[&str]) -> TableSnapshot {
    TableSnapshot {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        indexes: indexes.iter().map(|i| i.to_string()).collect(),
    }
}

fn full_snapshot() -> CatalogSnapshot {
    let mut tables = HashMap::new();
    tables.insert("customer_group".to_string(), table(&["id", "code"], &[]));
    tables.insert(
        "customer".to_string(),
        table(
            &["id", "email", "group_id", "name", "version"],
            &["customer_email_key", "customer_name_idx"],
        ),
    );
    tables.insert(
        "invoice".to_string(),
        table(&["id", "amount", "customer", "remarks", "version"], &[]),
    );
    let mut foreign_keys = HashSet::new();
    foreign_keys.insert("customer_group_id_fkey".to_string());
    foreign_keys.insert("invoice_customer_fkey".to_string());
    CatalogSnapshot {
        schema_exists: true,
        tables,
        foreign_keys,
    }
}

#[test]
fn test_empty_catalog_creates_everything() {
    let registry = billing_registry();
    let plan = MappingTool::plan(&registry, &CatalogSnapshot::default()).unwrap();
    assert_eq!(
        plan,
        vec![
            "create schema if not exists billing".to_string(),
            "CREATE TABLE billing.customer_group (id bigserial primary key, code varchar(30))"
                .to_string(),
            "CREATE TABLE billing.customer (id bigserial primary key, email varchar(255), \
             group_id bigint, name varchar(100) not null, version bigint not null)"
                .to_string(),
            "ALTER TABLE billing.customer ADD CONSTRAINT customer_email_key UNIQUE (email)"
                .to_string(),
            "CREATE INDEX customer_name_idx ON billing.customer (name)".to_string(),
            "CREATE TABLE billing.invoice (id bigserial primary key, \
             amount double precision not null, customer bigint, remarks varchar(255), \
             version bigint not null)"
                .to_string(),
            "ALTER TABLE billing.customer ADD CONSTRAINT customer_group_id_fkey \
             FOREIGN KEY (group_id) REFERENCES billing.customer_group (id) \
             DEFERRABLE INITIALLY DEFERRED"
                .to_string(),
            "ALTER TABLE billing.invoice ADD CONSTRAINT invoice_customer_fkey \
             FOREIGN KEY (customer) REFERENCES billing.customer (id) \
             DEFERRABLE INITIALLY DEFERRED"
                .to_string(),
        ]
    );
}

#[test]
fn test_up_to_date_catalog_yields_empty_plan() {
    let registry = billing_registry();
    let plan = MappingTool::plan(&registry, &full_snapshot()).unwrap();
    assert!(plan.is_empty());
}

#[test]
fn test_missing_column_is_added() {
    let registry = billing_registry();
    let mut snapshot = full_snapshot();
    snapshot
        .tables
        .get_mut("customer")
        .unwrap()
        .columns
        .remove("email");
    let plan = MappingTool::plan(&registry, &snapshot).unwrap();
    assert_eq!(
        plan,
        vec!["ALTER TABLE billing.customer ADD COLUMN email varchar(255)".to_string()]
    );
}

#[test]
fn test_missing_columns_join_into_one_statement() {
    let registry = billing_registry();
    let mut snapshot = full_snapshot();
    {
        let customer = snapshot.tables.get_mut("customer").unwrap();
        customer.columns.remove("email");
        customer.columns.remove("name");
    }
    let plan = MappingTool::plan(&registry, &snapshot).unwrap();
    assert_eq!(
        plan,
        vec![
            "ALTER TABLE billing.customer ADD COLUMN email varchar(255), \
             ADD COLUMN name varchar(100) not null"
                .to_string()
        ]
    );
}

#[test]
fn test_extra_catalog_objects_are_never_dropped() {
    let registry = billing_registry();
    let mut snapshot = full_snapshot();
    snapshot
        .tables
        .get_mut("invoice")
        .unwrap()
        .columns
        .insert("legacy_flag".to_string());
    snapshot
        .tables
        .insert("unmapped_table".to_string(), table(&["id"], &[]));
    let plan = MappingTool::plan(&registry, &snapshot).unwrap();
    assert!(plan.is_empty());
}

#[test]
fn test_missing_schema_only() {
    let registry = billing_registry();
    let mut snapshot = full_snapshot();
    snapshot.schema_exists = false;
    let plan = MappingTool::plan(&registry, &snapshot).unwrap();
    assert_eq!(plan, vec!["create schema if not exists billing".to_string()]);
}

#[test]
fn test_unnamed_registry_skips_schema_statement() {
    let registry = common::registry();
    let plan = MappingTool::plan(&registry, &CatalogSnapshot::default()).unwrap();
    assert!(!plan[0].starts_with("create schema"));
    assert!(plan[0].starts_with("CREATE TABLE customer_group"));
}

#[tokio::test]
async fn test_sync_executes_the_plan() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    let statements = repository
        .transact(|session| async move { MappingTool::sync(&session).await })
        .await?;
    assert!(!statements.is_empty());
    assert_eq!(common::executed_sql(&state), statements);
    Ok(())
}
