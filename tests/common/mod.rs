#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sqlpersist::{
    CatalogSnapshot, Connection, DataSource, Entity, EntityDef, FieldDef, FieldGroupDef, IndexDef,
    PersistError, QueryResult, Repository, Result, SchemaRegistry, SqlValue,
};

// ============================================================================
// Scripted mock driver
// ============================================================================

/// Shared driver state: records every statement and serves scripted results.
/// When no result is scripted for a returning statement, generated rows are
/// synthesized with sequential ids (first generated column) and 1 elsewhere.
#[derive(Default)]
pub struct MockState {
    pub executed: Vec<(String, Vec<SqlValue>)>,
    pub batch_sizes: Vec<usize>,
    pub query_results: VecDeque<QueryResult>,
    pub returning_results: VecDeque<QueryResult>,
    pub update_results: VecDeque<u64>,
    pub fail_commit: bool,
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub catalog: CatalogSnapshot,
    pub next_id: i64,
}

impl MockState {
    pub fn new() -> Arc<Mutex<MockState>> {
        Arc::new(Mutex::new(MockState {
            next_id: 1,
            ..Default::default()
        }))
    }
}

pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

fn synthesize_generated(state: &mut MockState, generated: &[String], rows: usize) -> QueryResult {
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        let mut row = Vec::with_capacity(generated.len());
        for (index, _) in generated.iter().enumerate() {
            if index == 0 {
                row.push(SqlValue::Integer(state.next_id));
                state.next_id += 1;
            } else {
                row.push(SqlValue::Integer(1));
            }
        }
        out.push(row);
    }
    QueryResult::new(generated.to_vec(), out)
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let mut state = self.state.lock().unwrap();
        state.executed.push((sql.to_string(), params.to_vec()));
        Ok(state
            .query_results
            .pop_front()
            .unwrap_or_else(QueryResult::empty))
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.executed.push((sql.to_string(), params.to_vec()));
        Ok(state.update_results.pop_front().unwrap_or(0))
    }

    async fn execute_returning(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        generated: &[String],
    ) -> Result<QueryResult> {
        let mut state = self.state.lock().unwrap();
        state.executed.push((sql.to_string(), params.to_vec()));
        match state.returning_results.pop_front() {
            Some(result) => Ok(result),
            None => Ok(synthesize_generated(&mut state, generated, 1)),
        }
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<SqlValue>],
        generated: &[String],
    ) -> Result<QueryResult> {
        let mut state = self.state.lock().unwrap();
        state
            .executed
            .push((sql.to_string(), rows.iter().flatten().cloned().collect()));
        state.batch_sizes.push(rows.len());
        match state.returning_results.pop_front() {
            Some(result) => Ok(result),
            None => Ok(synthesize_generated(&mut state, generated, rows.len())),
        }
    }

    async fn begin(&mut self) -> Result<()> {
        self.state.lock().unwrap().begun += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commit {
            return Err(PersistError::execution("commit failed"));
        }
        state.committed += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.state.lock().unwrap().rolled_back += 1;
        Ok(())
    }

    async fn catalog_snapshot(&mut self, _schema: Option<&str>) -> Result<CatalogSnapshot> {
        Ok(self.state.lock().unwrap().catalog.clone())
    }
}

pub struct MockDataSource {
    pub state: Arc<Mutex<MockState>>,
    pub fail_connect: bool,
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        if self.fail_connect {
            return Err(PersistError::ConnectionAcquisition(
                "no database available".into(),
            ));
        }
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }
}

// ============================================================================
// Shared test entities
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CustomerGroup {
    pub id: Option<i64>,
    pub code: Option<String>,
}

impl Entity for CustomerGroup {
    fn describe() -> EntityDef {
        EntityDef::new::<CustomerGroup>()
            .field(FieldDef::column("id", |e: &CustomerGroup| e.id, |e, v| e.id = v).id())
            .field(
                FieldDef::column(
                    "code",
                    |e: &CustomerGroup| e.code.clone(),
                    |e, v| e.code = v,
                )
                .length(30),
            )
    }
}

#[derive(Debug, Default, Clone)]
pub struct Customer {
    pub id: Option<i64>,
    pub version: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub group: Option<CustomerGroup>,
}

impl Entity for Customer {
    fn describe() -> EntityDef {
        EntityDef::new::<Customer>()
            .field(FieldDef::column("id", |e: &Customer| e.id, |e, v| e.id = v).id())
            .field(
                FieldDef::column("version", |e: &Customer| e.version, |e, v| e.version = v)
                    .version(),
            )
            .field(
                FieldDef::column("name", |e: &Customer| e.name.clone(), |e, v| e.name = v)
                    .length(100)
                    .required()
                    .indexed(),
            )
            .field(FieldDef::column(
                "email",
                |e: &Customer| e.email.clone(),
                |e, v| e.email = v,
            ))
            .field(
                FieldDef::reference(
                    "group",
                    |e: &Customer| e.group.as_ref(),
                    |e, v| e.group = v,
                )
                .named("group_id"),
            )
            .field_group(
                FieldGroupDef::new("summary")
                    .fields(["name", "group"])
                    .join_fetch(),
            )
            .index(IndexDef::unique_on(["email"]))
    }
}

#[derive(Debug, Default, Clone)]
pub struct Invoice {
    pub id: Option<i64>,
    pub version: Option<i64>,
    pub amount: Option<f64>,
    pub remarks: Option<String>,
    pub customer: Option<Customer>,
}

impl Entity for Invoice {
    fn describe() -> EntityDef {
        EntityDef::new::<Invoice>()
            .field(FieldDef::column("id", |e: &Invoice| e.id, |e, v| e.id = v).id())
            .field(
                FieldDef::column("version", |e: &Invoice| e.version, |e, v| e.version = v)
                    .version(),
            )
            .field(
                FieldDef::column("amount", |e: &Invoice| e.amount, |e, v| e.amount = v).required(),
            )
            .field(FieldDef::column(
                "remarks",
                |e: &Invoice| e.remarks.clone(),
                |e, v| e.remarks = v,
            ))
            .field(FieldDef::reference(
                "customer",
                |e: &Invoice| e.customer.as_ref(),
                |e, v| e.customer = v,
            ))
            .field_group(FieldGroupDef::new("amounts").fields(["amount"]))
            .field_group(
                FieldGroupDef::new("full")
                    .includes(["amounts"])
                    .fields(["remarks", "customer"]),
            )
            .field_group(FieldGroupDef::new("touch"))
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn registry() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::builder()
            .entity::<CustomerGroup>()
            .entity::<Customer>()
            .entity::<Invoice>()
            .build()
            .unwrap(),
    )
}

pub fn repository_with(
    state: Arc<Mutex<MockState>>,
    registry: Arc<SchemaRegistry>,
) -> Repository {
    Repository::new(
        Arc::new(MockDataSource {
            state,
            fail_connect: false,
        }),
        registry,
    )
}

pub fn repository(state: Arc<Mutex<MockState>>) -> Repository {
    repository_with(state, registry())
}

/// The SQL statements recorded by the mock driver.
pub fn executed_sql(state: &Arc<Mutex<MockState>>) -> Vec<String> {
    state
        .lock()
        .unwrap()
        .executed
        .iter()
        .map(|(sql, _)| sql.clone())
        .collect()
}

/// The parameters bound for the statement at the given index.
pub fn executed_params(state: &Arc<Mutex<MockState>>, index: usize) -> Vec<SqlValue> {
    state.lock().unwrap().executed[index].1.clone()
}
