use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::{PersistError, Result, Row, SqlValue};
use crate::metadata::{ColumnType, Entity, EntityData, FieldData};
use crate::sql::select::{build_select, hydrate_row, join_clause};
use crate::sql::session::SqlSession;

/// A rendered inner query (select text plus its bound parameters), used for
/// `IN (subquery)` predicates and union queries.
pub struct InnerQuery {
    pub(crate) sql: String,
    pub(crate) parameters: Vec<SqlValue>,
}

/// Composes one select or delete statement incrementally. Aliases bind
/// entities into the query scope; every free-form SQL fragment may embed
/// `alias.field` tokens, which are rewritten to the resolved column names
/// before the text reaches the driver.
pub struct Finder<E> {
    session: SqlSession,
    alias: String,
    alias_entities: HashMap<String, Arc<EntityData>>,
    join_alias_map: HashMap<String, String>,
    join_clause: String,
    where_clause: Option<String>,
    group_by: Option<String>,
    order_by: Option<String>,
    parameters: Vec<SqlValue>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Finder<E> {
    pub(crate) fn new(session: SqlSession, alias: &str) -> Result<Self> {
        let entity = session.registry().entity_data::<E>()?.clone();
        let mut alias_entities = HashMap::new();
        alias_entities.insert(alias.to_string(), entity);
        Ok(Self {
            session,
            alias: alias.to_string(),
            alias_entities,
            join_alias_map: HashMap::new(),
            join_clause: String::new(),
            where_clause: None,
            group_by: None,
            order_by: None,
            parameters: Vec::new(),
            _entity: PhantomData,
        })
    }

    /// Join the foreign key referenced by `alias.field`, binding the target
    /// entity to `as_alias`. Optional foreign keys use a left outer join.
    pub fn join(self, alias_field: &str, as_alias: &str) -> Result<Self> {
        self.join_with(alias_field, as_alias, false)
    }

    /// Like [`Finder::join`], optionally forcing an inner join even though
    /// the foreign key is optional.
    pub fn join_with(
        mut self,
        alias_field: &str,
        as_alias: &str,
        force_inner: bool,
    ) -> Result<Self> {
        if self.alias_entities.contains_key(as_alias) {
            return Err(PersistError::InvalidArgument(format!(
                "this alias is already used: {}",
                as_alias
            )));
        }
        let (from_alias, field_name) = parse_alias_field(alias_field)?;
        let field = self.field_for(from_alias, field_name)?.clone();
        if field.column_type() != ColumnType::ForeignKey {
            return Err(PersistError::Configuration(format!(
                "join field is not a foreign key: {}",
                alias_field
            )));
        }
        let registry = self.session.registry().clone();
        let fk_entity = registry
            .entity_data_by_id(field.target_type_required()?)?
            .clone();
        let clause = join_clause(&registry, from_alias, &fk_entity, &field, as_alias, force_inner)?;
        self.join_clause.push_str(&clause);
        self.join_alias_map.insert(
            format!("{}.{}", from_alias, field_name),
            as_alias.to_string(),
        );
        self.alias_entities.insert(as_alias.to_string(), fk_entity);
        Ok(self)
    }

    /// Join the table of another entity type on a raw conditional clause.
    pub fn join_on<T: Entity>(
        mut self,
        alias: &str,
        use_outer_join: bool,
        on_condition: &str,
    ) -> Result<Self> {
        if self.alias_entities.contains_key(alias) {
            return Err(PersistError::InvalidArgument(format!(
                "this alias is already used: {}",
                alias
            )));
        }
        let registry = self.session.registry().clone();
        let entity = registry.entity_data::<T>()?.clone();
        let join_type = if use_outer_join {
            " left outer join "
        } else {
            " inner join "
        };
        self.join_clause.push_str(&format!(
            "{}{} as {} on {}",
            join_type,
            registry.schema_table_name(&entity)?,
            alias,
            on_condition
        ));
        self.alias_entities.insert(alias.to_string(), entity);
        Ok(self)
    }

    /// Append a predicate fragment to the where clause (fragments are joined
    /// with `and`) and bind its parameters. Clause text and values are added
    /// together so positions never desynchronize.
    pub fn and_where(
        mut self,
        fragment: &str,
        parameters: impl IntoIterator<Item = SqlValue>,
    ) -> Result<Self> {
        self.parameters.extend(parameters);
        if !fragment.is_empty() {
            let rewritten = self.rewrite_fragment(fragment)?;
            self.append_where(&rewritten);
        }
        Ok(self)
    }

    /// Append `fragment in (?, ...)` with one placeholder per value. An empty
    /// value list is rejected.
    pub fn and_where_in(mut self, fragment: &str, values: Vec<SqlValue>) -> Result<Self> {
        if values.is_empty() {
            return Err(PersistError::InvalidArgument(
                "IN parameters can not be empty".into(),
            ));
        }
        let rewritten = self.rewrite_fragment(fragment)?;
        let placeholders = vec!["?"; values.len()].join(",");
        self.append_where(&format!("{} in ({})", rewritten, placeholders));
        self.parameters.extend(values);
        Ok(self)
    }

    /// Append `fragment in (subquery)` using another finder's rendered inner
    /// query, adopting its parameters.
    pub fn and_where_in_query(mut self, fragment: &str, inner: InnerQuery) -> Result<Self> {
        let rewritten = self.rewrite_fragment(fragment)?;
        self.append_where(&format!("{} in ({})", rewritten, inner.sql));
        self.parameters.extend(inner.parameters);
        Ok(self)
    }

    /// Append a case-folded LIKE predicate across the given `alias.field`
    /// columns. With word search, every whitespace-separated word of the text
    /// is matched separately, OR-joined.
    pub fn like(
        mut self,
        like_text: &str,
        search_by_word: bool,
        search_columns: &[&str],
    ) -> Result<Self> {
        let folded = like_text.to_lowercase();
        let mut clause = String::from("(");
        if !search_by_word {
            for (column_index, column) in search_columns.iter().enumerate() {
                let column = self.resolve_column(column)?;
                if column_index > 0 {
                    clause.push_str(" or ");
                }
                clause.push_str(&format!("lower({}) like ?", column));
                self.parameters.push(SqlValue::Text(format!("%{}%", folded)));
            }
        } else {
            let words: Vec<String> = folded.split_whitespace().map(str::to_string).collect();
            for (column_index, column) in search_columns.iter().enumerate() {
                let column = self.resolve_column(column)?;
                if column_index > 0 {
                    clause.push_str(" or ");
                }
                for (word_index, word) in words.iter().enumerate() {
                    if word_index > 0 {
                        clause.push_str(" or ");
                    }
                    clause.push_str(&format!("lower({}) like ?", column));
                    self.parameters.push(SqlValue::Text(format!("%{}%", word)));
                }
            }
        }
        clause.push(')');
        self.append_where(&clause);
        Ok(self)
    }

    /// Set the group by clause. Can be set only once.
    pub fn group_by(mut self, clause: &str) -> Result<Self> {
        if self.group_by.is_some() {
            return Err(PersistError::InvalidArgument(
                "group by clause is already specified in this finder".into(),
            ));
        }
        self.group_by = Some(format!(" group by {}", self.rewrite_fragment(clause)?));
        Ok(self)
    }

    /// Set the order by clause. Can be set only once.
    pub fn order_by(mut self, clause: &str) -> Result<Self> {
        if self.order_by.is_some() {
            return Err(PersistError::InvalidArgument(
                "order by clause is already specified in this finder".into(),
            ));
        }
        self.order_by = Some(format!(" order by {}", self.rewrite_fragment(clause)?));
        Ok(self)
    }

    /// Insert a parameter at the given position; useful when a select clause
    /// carries its own placeholder.
    pub fn add_parameter(mut self, index: usize, parameter: SqlValue) -> Self {
        self.parameters.insert(index, parameter);
        self
    }

    /// Fetch entities with the default fetch group.
    pub async fn fetch(&self, offset: i64, limit: i64) -> Result<Vec<E>> {
        self.fetch_with(None, offset, limit).await
    }

    /// Fetch entities, selecting the columns of the given field group.
    pub async fn fetch_with(
        &self,
        field_group: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<E>> {
        let alias = self.alias.clone();
        downcast_list(
            self.fetch_boxed(&alias, field_group, offset, limit, false)
                .await?,
        )
    }

    pub async fn fetch_first(&self) -> Result<Option<E>> {
        self.fetch_first_with(None).await
    }

    pub async fn fetch_first_with(&self, field_group: Option<&str>) -> Result<Option<E>> {
        Ok(self.fetch_with(field_group, -1, 1).await?.into_iter().next())
    }

    /// Fetch entities with `for update of <alias>` row locking.
    pub async fn fetch_for_update(&self, offset: i64, limit: i64) -> Result<Vec<E>> {
        let alias = self.alias.clone();
        downcast_list(self.fetch_boxed(&alias, None, offset, limit, true).await?)
    }

    pub async fn fetch_first_for_update(&self) -> Result<Option<E>> {
        Ok(self.fetch_for_update(-1, 1).await?.into_iter().next())
    }

    /// Fetch the entity bound to a joined alias instead of the root entity.
    pub async fn fetch_alias<V: Entity>(
        &self,
        alias: &str,
        field_group: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<V>> {
        downcast_list(
            self.fetch_boxed(alias, field_group, offset, limit, false)
                .await?,
        )
    }

    /// Run an aggregate select clause and return the raw rows.
    pub async fn fetch_rows(
        &self,
        select_clause: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Row>> {
        let mut sql = format!("select {}", self.rewrite_fragment(select_clause)?);
        sql.push_str(&self.from_clause()?);
        sql.push_str(&self.join_clause);
        self.push_filters(&mut sql);
        push_offset_limit(&mut sql, offset, limit);
        Ok(self.session.execute_query(&sql, &self.parameters).await?.rows)
    }

    /// Run an aggregate select clause and return the first column of the
    /// first row, if any.
    pub async fn fetch_scalar(&self, select_clause: &str) -> Result<Option<SqlValue>> {
        let rows = self.fetch_rows(select_clause, -1, 1).await?;
        Ok(rows.into_iter().next().and_then(|row| row.into_iter().next()))
    }

    /// Render this finder as an inner query with the given select clause, for
    /// `IN (subquery)` predicates and union queries.
    pub fn inner_query(&self, select_clause: &str) -> Result<InnerQuery> {
        let mut sql = format!("select {}", self.rewrite_fragment(select_clause)?);
        sql.push_str(&self.from_clause()?);
        sql.push_str(&self.join_clause);
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(where_clause);
        }
        if let Some(group_by) = &self.group_by {
            sql.push_str(group_by);
        }
        Ok(InnerQuery {
            sql,
            parameters: self.parameters.clone(),
        })
    }

    /// Execute the composed statement as a delete, returning the affected row
    /// count. A version mismatch shows up as a zero count, not an error.
    pub async fn delete(&self) -> Result<u64> {
        let mut sql = String::from("delete");
        sql.push_str(&self.from_clause()?);
        sql.push_str(&self.join_clause);
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(where_clause);
        }
        self.session.execute_update(&sql, &self.parameters).await
    }

    /// The composed from/join/where/group/order text, without a select list.
    pub fn to_sql(&self) -> Result<String> {
        let mut sql = self.from_clause()?;
        sql.push_str(&self.join_clause);
        self.push_filters(&mut sql);
        Ok(sql)
    }

    async fn fetch_boxed(
        &self,
        alias: &str,
        field_group: Option<&str>,
        offset: i64,
        limit: i64,
        for_update: bool,
    ) -> Result<Vec<Box<dyn Any + Send + Sync>>> {
        let entity = self
            .alias_entities
            .get(alias)
            .ok_or_else(|| {
                PersistError::InvalidArgument(format!(
                    "the alias is not joined in this query: {}",
                    alias
                ))
            })?
            .clone();
        let registry = self.session.registry().clone();
        let mut join_builder = self.join_clause.clone();
        let (columns, plan) = build_select(
            &registry,
            &entity,
            alias,
            field_group,
            &mut join_builder,
            Some(&self.join_alias_map),
        )?;
        let mut sql = columns;
        sql.push_str(&self.from_clause()?);
        sql.push_str(&join_builder);
        self.push_filters(&mut sql);
        push_offset_limit(&mut sql, offset, limit);
        if for_update {
            sql.push_str(&format!(" for update of {}", alias));
        }
        let result = self.session.execute_query(&sql, &self.parameters).await?;
        result
            .rows
            .iter()
            .map(|row| hydrate_row(&registry, &plan, row))
            .collect()
    }

    fn push_filters(&self, sql: &mut String) {
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(where_clause);
        }
        if let Some(group_by) = &self.group_by {
            sql.push_str(group_by);
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(order_by);
        }
    }

    fn from_clause(&self) -> Result<String> {
        let entity = self.alias_entities.get(&self.alias).ok_or_else(|| {
            PersistError::InvalidArgument(format!(
                "the alias is not joined in this query: {}",
                self.alias
            ))
        })?;
        Ok(format!(
            " from {} as {}",
            self.session.registry().schema_table_name(entity)?,
            self.alias
        ))
    }

    fn append_where(&mut self, clause: &str) {
        match &mut self.where_clause {
            Some(existing) => {
                existing.push_str(" and ");
                existing.push_str(clause);
            }
            None => self.where_clause = Some(format!(" where {}", clause)),
        }
    }

    fn field_for(&self, alias: &str, field_name: &str) -> Result<&Arc<FieldData>> {
        let entity = self.alias_entities.get(alias).ok_or_else(|| {
            PersistError::Configuration(format!(
                "the alias is not joined in this query: {}",
                alias
            ))
        })?;
        entity.field_data(field_name)
    }

    /// Resolve a single `alias.field` token into `alias.column`.
    fn resolve_column(&self, alias_field: &str) -> Result<String> {
        let (alias, field_name) = parse_alias_field(alias_field)?;
        let field = self.field_for(alias, field_name)?;
        Ok(format!("{}.{}", alias, field.column_name()))
    }

    /// Rewrite every `alias.field` token in a free-form SQL fragment to
    /// `alias.column` with a single left-to-right scan. The scanner is either
    /// reading an alias or, after a dot, reading a field name; any
    /// non-alphanumeric character ends the current token. Plain SQL passes
    /// through unchanged.
    fn rewrite_fragment(&self, fragment: &str) -> Result<String> {
        let mut output = String::with_capacity(fragment.len());
        let mut alias_token = String::new();
        let mut field_token = String::new();
        let mut current_alias: Option<String> = None;
        for ch in fragment.chars() {
            match current_alias.take() {
                None => {
                    if ch.is_alphanumeric() {
                        alias_token.push(ch);
                    } else if ch == '.' {
                        current_alias = Some(std::mem::take(&mut alias_token));
                    } else {
                        if !alias_token.is_empty() {
                            output.push_str(&alias_token);
                            alias_token.clear();
                        }
                        output.push(ch);
                    }
                }
                Some(alias) => {
                    if ch.is_alphanumeric() {
                        field_token.push(ch);
                        current_alias = Some(alias);
                    } else {
                        if field_token.is_empty() {
                            current_alias = Some(alias);
                        } else {
                            let field = self.field_for(&alias, &field_token)?;
                            output.push_str(&alias);
                            output.push('.');
                            output.push_str(field.column_name());
                            field_token.clear();
                        }
                        output.push(ch);
                    }
                }
            }
        }
        if let Some(alias) = current_alias {
            if !field_token.is_empty() {
                let field = self.field_for(&alias, &field_token)?;
                output.push_str(&alias);
                output.push('.');
                output.push_str(field.column_name());
            }
        } else if !alias_token.is_empty() {
            output.push_str(&alias_token);
        }
        Ok(output)
    }
}

fn parse_alias_field(alias_field: &str) -> Result<(&str, &str)> {
    let mut parts = alias_field.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(alias), Some(field), None) => Ok((alias.trim(), field.trim())),
        _ => Err(PersistError::InvalidArgument(format!(
            "invalid usage of field: {}",
            alias_field
        ))),
    }
}

fn push_offset_limit(sql: &mut String, offset: i64, limit: i64) {
    if offset > 0 {
        sql.push_str(&format!(" offset {}", offset));
    }
    if limit > 0 {
        sql.push_str(&format!(" limit {}", limit));
    }
}

fn downcast_list<T: Entity>(instances: Vec<Box<dyn Any + Send + Sync>>) -> Result<Vec<T>> {
    instances
        .into_iter()
        .map(|instance| {
            instance.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
                PersistError::TypeMismatch(format!(
                    "fetched row is not of type {}",
                    std::any::type_name::<T>()
                ))
            })
        })
        .collect()
}
