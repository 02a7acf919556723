/// Insert/update/delete statement tests: SQL shapes, parameter binding,
/// generated-column write-back, batching and the entity listener hook.
mod common;

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Customer, CustomerGroup, Invoice, MockState};
use sqlpersist::{
    EntityListener, QueryResult, Repository, Result, SchemaRegistry, SqlValue,
};

#[tokio::test]
async fn test_insert_shape_and_binding() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    let invoice = repository
        .transact(|session| async move {
            let mut invoice = Invoice {
                amount: Some(99.5),
                remarks: Some("new".into()),
                customer: Some(Customer {
                    id: Some(11),
                    ..Default::default()
                }),
                version: Some(42), // ignored: inserts always start at version 1
                ..Default::default()
            };
            session.insert(&mut invoice).await?;
            Ok(invoice)
        })
        .await?;
    let sql = common::executed_sql(&state);
    assert_eq!(
        sql[0],
        "insert into invoice as x (amount,customer,remarks,version) values (?,?,?,?)"
    );
    // foreign keys bind the referenced id; version binds the literal 1
    assert_eq!(
        common::executed_params(&state, 0),
        vec![
            SqlValue::Float(99.5),
            SqlValue::Integer(11),
            SqlValue::Text("new".into()),
            SqlValue::Integer(1),
        ]
    );
    // generated id and version written back
    assert_eq!(invoice.id, Some(1));
    assert_eq!(invoice.version, Some(1));
    Ok(())
}

#[tokio::test]
async fn test_insert_null_foreign_key() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    repository
        .transact(|session| async move {
            let mut invoice = Invoice {
                amount: Some(1.0),
                ..Default::default()
            };
            session.insert(&mut invoice).await
        })
        .await?;
    assert_eq!(common::executed_params(&state, 0)[1], SqlValue::Null);
    Ok(())
}

#[tokio::test]
async fn test_batch_insert_chunks_and_assigns_ids_by_position() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    let invoices = repository
        .transact(|session| async move {
            let mut invoices: Vec<Invoice> = (0..250)
                .map(|n| Invoice {
                    amount: Some(n as f64),
                    ..Default::default()
                })
                .collect();
            session.batch_insert(&mut invoices).await?;
            Ok(invoices)
        })
        .await?;
    // 250 rows execute as exactly three physical batches
    assert_eq!(state.lock().unwrap().batch_sizes, vec![100, 100, 50]);
    for (index, invoice) in invoices.iter().enumerate() {
        assert_eq!(invoice.id, Some(index as i64 + 1));
        assert_eq!(invoice.version, Some(1));
    }
    Ok(())
}

#[tokio::test]
async fn test_batch_upsert_appends_conflict_clause() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    repository
        .transact(|session| async move {
            let mut invoices = vec![Invoice {
                amount: Some(5.0),
                remarks: Some("dup".into()),
                ..Default::default()
            }];
            session
                .batch_upsert(&mut invoices, "remarks", Some("amount = excluded.amount"))
                .await
        })
        .await?;
    let sql = common::executed_sql(&state);
    assert_eq!(
        sql[0],
        "insert into invoice as x (amount,customer,remarks,version) values (?,?,?,?) \
         ON CONFLICT (remarks) DO UPDATE SET amount = excluded.amount"
    );
    Ok(())
}

#[tokio::test]
async fn test_batch_upsert_without_update_clause_does_nothing() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    repository
        .transact(|session| async move {
            let mut invoices = vec![Invoice::default()];
            session.batch_upsert(&mut invoices, "remarks", None).await
        })
        .await?;
    let sql = common::executed_sql(&state);
    assert!(sql[0].ends_with("ON CONFLICT (remarks) DO NOTHING"));
    Ok(())
}

#[tokio::test]
async fn test_update_shape_and_optimistic_lock() -> Result<()> {
    let state = MockState::new();
    state
        .lock()
        .unwrap()
        .returning_results
        .push_back(QueryResult::new(
            vec!["version".into()],
            vec![vec![SqlValue::Integer(4)]],
        ));
    let repository = common::repository(state.clone());
    let (count, invoice) = repository
        .transact(|session| async move {
            let mut invoice = Invoice {
                id: Some(7),
                version: Some(3),
                amount: Some(10.0),
                ..Default::default()
            };
            let count = session.update(&mut invoice, Some("amounts")).await?;
            Ok((count, invoice))
        })
        .await?;
    assert_eq!(count, 1);
    let sql = common::executed_sql(&state);
    assert_eq!(
        sql[0],
        "update invoice set version = version + 1, amount = ? where id = ? and version = ?"
    );
    assert_eq!(
        common::executed_params(&state, 0),
        vec![
            SqlValue::Float(10.0),
            SqlValue::Integer(7),
            SqlValue::Integer(3),
        ]
    );
    // the bumped version is read back
    assert_eq!(invoice.version, Some(4));
    Ok(())
}

#[tokio::test]
async fn test_update_version_mismatch_returns_zero() -> Result<()> {
    let state = MockState::new();
    state
        .lock()
        .unwrap()
        .returning_results
        .push_back(QueryResult::empty());
    let repository = common::repository(state.clone());
    let (count, invoice) = repository
        .transact(|session| async move {
            let mut invoice = Invoice {
                id: Some(7),
                version: Some(2),
                amount: Some(10.0),
                ..Default::default()
            };
            let count = session.update(&mut invoice, Some("amounts")).await?;
            Ok((count, invoice))
        })
        .await?;
    // a stale version silently matches zero rows, it is not an error
    assert_eq!(count, 0);
    assert_eq!(invoice.version, Some(2));
    Ok(())
}

#[tokio::test]
async fn test_update_with_empty_field_group_is_noop() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    let count = repository
        .transact(|session| async move {
            let mut invoice = Invoice {
                id: Some(7),
                version: Some(3),
                ..Default::default()
            };
            // the "touch" group holds only the implicit id and version fields
            session.update(&mut invoice, Some("touch")).await
        })
        .await?;
    assert_eq!(count, 0);
    assert!(common::executed_sql(&state).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_binds_id_and_version() -> Result<()> {
    let state = MockState::new();
    state.lock().unwrap().update_results.push_back(1);
    let repository = common::repository(state.clone());
    let count = repository
        .transact(|session| async move {
            let invoice = Invoice {
                id: Some(7),
                version: Some(3),
                ..Default::default()
            };
            session.delete(&invoice).await
        })
        .await?;
    assert_eq!(count, 1);
    let sql = common::executed_sql(&state);
    assert_eq!(sql[0], "DELETE FROM invoice WHERE id = ? AND version = ?");
    assert_eq!(
        common::executed_params(&state, 0),
        vec![SqlValue::Integer(7), SqlValue::Integer(3)]
    );
    Ok(())
}

#[tokio::test]
async fn test_delete_without_version_field() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    repository
        .transact(|session| async move {
            let group = CustomerGroup {
                id: Some(4),
                code: Some("std".into()),
            };
            session.delete(&group).await
        })
        .await?;
    let sql = common::executed_sql(&state);
    assert_eq!(sql[0], "DELETE FROM customer_group WHERE id = ?");
    Ok(())
}

#[tokio::test]
async fn test_batch_delete_chunks() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    repository
        .transact(|session| async move {
            let invoices: Vec<Invoice> = (0..150)
                .map(|n| Invoice {
                    id: Some(n),
                    version: Some(1),
                    ..Default::default()
                })
                .collect();
            session.batch_delete(&invoices).await
        })
        .await?;
    assert_eq!(state.lock().unwrap().batch_sizes, vec![100, 50]);
    Ok(())
}

#[tokio::test]
async fn test_lock_for_update() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    repository
        .transact(|session| async move {
            session.lock_for_update::<Invoice>(7i64.into()).await
        })
        .await?;
    let sql = common::executed_sql(&state);
    assert_eq!(sql[0], "SELECT 1 FROM invoice WHERE id = ? FOR UPDATE");
    Ok(())
}

// ============================================================================
// Entity listener
// ============================================================================

#[derive(Default)]
struct CountingListener {
    inserts: AtomicUsize,
    updates: AtomicUsize,
}

impl EntityListener for CountingListener {
    fn before_insert(&self, entity: &mut dyn Any) {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if let Some(invoice) = entity.downcast_mut::<Invoice>() {
            if invoice.remarks.is_none() {
                invoice.remarks = Some("stamped".into());
            }
        }
    }

    fn before_update(&self, _entity: &mut dyn Any) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

fn registry_with_listener(listener: Arc<CountingListener>) -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::builder()
            .entity::<CustomerGroup>()
            .entity::<Customer>()
            .entity::<Invoice>()
            .listener(listener)
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn test_listener_notified_once_per_row() -> Result<()> {
    let state = MockState::new();
    let listener = Arc::new(CountingListener::default());
    let repository = common::repository_with(state.clone(), registry_with_listener(listener.clone()));
    let invoice = repository
        .transact(|session| async move {
            let mut invoices: Vec<Invoice> = (0..3).map(|_| Invoice::default()).collect();
            session.batch_insert(&mut invoices).await?;
            let mut single = invoices.remove(0);
            session.update(&mut single, Some("amounts")).await?;
            Ok(single)
        })
        .await?;
    assert_eq!(listener.inserts.load(Ordering::SeqCst), 3);
    assert_eq!(listener.updates.load(Ordering::SeqCst), 1);
    // the listener runs before parameter extraction, so its change is bound
    assert_eq!(invoice.remarks.as_deref(), Some("stamped"));
    Ok(())
}

#[tokio::test]
async fn test_save_routes_to_insert_or_update() -> Result<()> {
    let state = MockState::new();
    let repository = common::repository(state.clone());
    repository
        .transact(|session| async move {
            let mut invoice = Invoice {
                amount: Some(1.0),
                ..Default::default()
            };
            session.save(&mut invoice, true, None).await?;
            session.save(&mut invoice, false, Some("amounts")).await
        })
        .await?;
    let sql = common::executed_sql(&state);
    assert!(sql[0].starts_with("insert into invoice"));
    assert!(sql[1].starts_with("update invoice set"));
    Ok(())
}

// Repository is re-exported for direct use in application code
#[test]
fn test_repository_exposes_registry() {
    let state = MockState::new();
    let repository: Repository = common::repository(state);
    assert!(repository.registry().name().is_none());
}
