use sqlx::SqliteConnection;

use super::{FilterBuilder, Joins};
use crate::{db::SqlValue, error::Result};

/// Assembles a find query for one table: a SELECT body, deduplicated
/// joins, ANDed where/having clause strings, and positional arguments in
/// clause order. Errors recorded on an attached filter surface here, when
/// the query is executed, not before.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    pub table_name: String,
    pub body: String,
    joins: Joins,
    where_clauses: Vec<String>,
    having_clauses: Vec<String>,
    args: Vec<SqlValue>,
    pub sort_and_pagination: String,
    err: Option<super::FilterError>,
}

impl QueryBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            body: super::sql::select_distinct_ids(table_name),
            ..Default::default()
        }
    }

    pub fn add_where(&mut self, clause: impl Into<String>) {
        let clause = clause.into();
        if !clause.is_empty() {
            self.where_clauses.push(clause);
        }
    }

    pub fn add_having(&mut self, clause: impl Into<String>) {
        let clause = clause.into();
        if !clause.is_empty() {
            self.having_clauses.push(clause);
        }
    }

    pub fn add_arg(&mut self, arg: SqlValue) {
        self.args.push(arg);
    }

    pub fn add_filter(&mut self, filter: &FilterBuilder) {
        if let Err(err) = filter.validate() {
            if self.err.is_none() {
                self.err = Some(err);
            }
            return;
        }

        let (clause, args) = filter.generate_where_clauses();
        self.add_where(clause);
        self.args.extend(args);

        let (clause, args) = filter.generate_having_clauses();
        self.add_having(clause);
        self.args.extend(args);

        self.joins.extend(&filter.get_all_joins());
    }

    /// Runs the assembled query, returning matching IDs and the total count
    /// ignoring pagination.
    pub async fn execute_find(&self, conn: &mut SqliteConnection) -> Result<(Vec<i64>, i64)> {
        if let Some(err) = &self.err {
            return Err(err.clone().into());
        }

        let mut body = self.body.clone();
        let join_sql = self.joins.to_sql();
        if !join_sql.is_empty() {
            body.push_str(&join_sql);
        }

        if !self.where_clauses.is_empty() {
            body.push_str(" WHERE ");
            body.push_str(&self.where_clauses.join(" AND "));
        }
        body.push_str(&format!(" GROUP BY {}.id ", self.table_name));
        if !self.having_clauses.is_empty() {
            body.push_str(" HAVING ");
            body.push_str(&self.having_clauses.join(" AND "));
        }

        let count_query = format!("SELECT COUNT(*) as count FROM ({body}) as temp");
        let ids_query = format!("{body}{}", self.sort_and_pagination);

        tracing::trace!(sql = %ids_query, "find query");

        let mut count = sqlx::query_as::<_, (i64,)>(&count_query);
        for arg in &self.args {
            count = arg.bind_to_query_as(count);
        }
        let (total,) = count.fetch_one(&mut *conn).await?;

        let mut ids = sqlx::query_as::<_, (i64,)>(&ids_query);
        for arg in &self.args {
            ids = arg.bind_to_query_as(ids);
        }
        let rows = ids.fetch_all(&mut *conn).await?;

        Ok((rows.into_iter().map(|row| row.0).collect(), total))
    }
}
