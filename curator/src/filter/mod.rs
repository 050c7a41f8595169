pub mod criteria;
pub mod query;
pub mod scenes;
pub mod sql;

use crate::db::SqlValue;

/// Errors recorded on a filter while it is being assembled. Builder calls
/// never fail directly; the accumulated state is surfaced once, when the
/// tree is compiled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("sub-filter already set")]
    SubFilterAlreadySet,
    #[error("invalid regex pattern '{0}'")]
    InvalidRegex(String),
}

#[derive(Debug, Clone)]
pub struct SqlClause {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl SqlClause {
    pub fn new(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// How a node combines with its attached sub-filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFilterOp {
    And,
    Or,
    AndNot,
}

impl SubFilterOp {
    fn as_sql(self) -> &'static str {
        match self {
            SubFilterOp::And => "AND",
            SubFilterOp::Or => "OR",
            SubFilterOp::AndNot => "AND NOT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    pub as_alias: String,
    pub on_clause: String,
}

impl Join {
    /// The alias, or the table name when no alias was given. Joins are
    /// deduplicated on this value.
    pub fn alias(&self) -> &str {
        if self.as_alias.is_empty() {
            &self.table
        } else {
            &self.as_alias
        }
    }

    pub fn to_sql(&self) -> String {
        let as_str = if !self.as_alias.is_empty() && self.as_alias != self.table {
            format!(" AS {}", self.as_alias)
        } else {
            String::new()
        };
        format!("LEFT JOIN {}{} ON {}", self.table, as_str, self.on_clause)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Joins(Vec<Join>);

impl Joins {
    pub fn add(&mut self, new_join: Join) {
        if self.0.iter().any(|j| j.alias() == new_join.alias()) {
            return;
        }
        self.0.push(new_join);
    }

    pub fn extend(&mut self, other: &Joins) {
        for join in &other.0 {
            self.add(join.clone());
        }
    }

    pub fn to_sql(&self) -> String {
        self.0
            .iter()
            .map(Join::to_sql)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A node in the criteria tree. Own clauses are ANDed together; at most one
/// sub-filter may be attached, combined with the configured operator when
/// the tree is compiled.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    sub_filter: Option<(SubFilterOp, Box<FilterBuilder>)>,
    joins: Joins,
    where_clauses: Vec<SqlClause>,
    having_clauses: Vec<SqlClause>,
    err: Option<FilterError>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(&mut self, sub: FilterBuilder) {
        self.attach(SubFilterOp::And, sub);
    }

    pub fn or(&mut self, sub: FilterBuilder) {
        self.attach(SubFilterOp::Or, sub);
    }

    pub fn not(&mut self, sub: FilterBuilder) {
        self.attach(SubFilterOp::AndNot, sub);
    }

    fn attach(&mut self, op: SubFilterOp, sub: FilterBuilder) {
        if self.sub_filter.is_some() {
            self.set_error(FilterError::SubFilterAlreadySet);
            return;
        }
        self.sub_filter = Some((op, Box::new(sub)));
    }

    /// Adds a LEFT JOIN, skipped if the alias/table is already joined.
    pub fn add_join(
        &mut self,
        table: impl Into<String>,
        as_alias: impl Into<String>,
        on_clause: impl Into<String>,
    ) {
        self.joins.add(Join {
            table: table.into(),
            as_alias: as_alias.into(),
            on_clause: on_clause.into(),
        });
    }

    /// Adds a where clause ANDed with its siblings. Empty clauses are ignored.
    pub fn add_where(&mut self, sql: impl Into<String>, args: Vec<SqlValue>) {
        let sql = sql.into();
        if sql.is_empty() {
            return;
        }
        self.where_clauses.push(SqlClause::new(sql, args));
    }

    pub fn add_having(&mut self, sql: impl Into<String>, args: Vec<SqlValue>) {
        let sql = sql.into();
        if sql.is_empty() {
            return;
        }
        self.having_clauses.push(SqlClause::new(sql, args));
    }

    pub fn set_error(&mut self, err: FilterError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// The first error recorded on this node or any sub-filter.
    pub fn validate(&self) -> Result<(), FilterError> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if let Some((_, sub)) = &self.sub_filter {
            return sub.validate();
        }
        Ok(())
    }

    /// Compiles the where clause for this node and its sub-tree. Own clauses
    /// come first, then the sub-filter's, so positional arguments stay
    /// aligned with the clause text.
    pub fn generate_where_clauses(&self) -> (String, Vec<SqlValue>) {
        let (mut clause, mut args) = and_clauses(&self.where_clauses);

        if let Some((op, sub)) = &self.sub_filter {
            let (sub_clause, sub_args) = sub.generate_where_clauses();
            if !sub_clause.is_empty() {
                clause = combine_sub_filter_clause(&clause, &sub_clause, *op);
                args.extend(sub_args);
            }
        }

        (clause, args)
    }

    pub fn generate_having_clauses(&self) -> (String, Vec<SqlValue>) {
        let (mut clause, mut args) = and_clauses(&self.having_clauses);

        if let Some((op, sub)) = &self.sub_filter {
            let (sub_clause, sub_args) = sub.generate_having_clauses();
            if !sub_clause.is_empty() {
                clause = combine_sub_filter_clause(&clause, &sub_clause, *op);
                args.extend(sub_args);
            }
        }

        (clause, args)
    }

    /// All joins from this node and its sub-tree, deduplicated by alias.
    pub fn get_all_joins(&self) -> Joins {
        let mut all = Joins::default();
        all.extend(&self.joins);
        if let Some((_, sub)) = &self.sub_filter {
            all.extend(&sub.get_all_joins());
        }
        all
    }
}

/// A bare NOT sub-expression with no local clauses must render as
/// `NOT (...)`, never with a dangling leading AND.
fn combine_sub_filter_clause(clause: &str, sub_clause: &str, op: SubFilterOp) -> String {
    if clause.is_empty() {
        if op == SubFilterOp::AndNot {
            format!("NOT {sub_clause}")
        } else {
            sub_clause.to_string()
        }
    } else {
        format!("{clause} {} {sub_clause}", op.as_sql())
    }
}

fn and_clauses(input: &[SqlClause]) -> (String, Vec<SqlValue>) {
    if input.is_empty() {
        return (String::new(), Vec::new());
    }

    let clause = format!(
        "({})",
        input
            .iter()
            .map(|c| c.sql.as_str())
            .collect::<Vec<_>>()
            .join(" AND ")
    );
    let args = input.iter().flat_map(|c| c.args.clone()).collect();
    (clause, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_clauses_are_anded_and_parenthesized() {
        let mut f = FilterBuilder::new();
        f.add_where("a = ?", vec![1.into()]);
        f.add_where("b = ?", vec![2.into()]);
        let (clause, args) = f.generate_where_clauses();
        assert_eq!(clause, "(a = ? AND b = ?)");
        assert_eq!(args, vec![1.into(), 2.into()]);
    }

    #[test]
    fn sub_filter_combines_with_operator() {
        let mut sub = FilterBuilder::new();
        sub.add_where("c = ?", vec![3.into()]);

        let mut f = FilterBuilder::new();
        f.add_where("a = ?", vec![1.into()]);
        f.or(sub);

        let (clause, args) = f.generate_where_clauses();
        assert_eq!(clause, "(a = ?) OR (c = ?)");
        assert_eq!(args, vec![1.into(), 3.into()]);
    }

    #[test]
    fn bare_not_renders_without_leading_and() {
        let mut sub = FilterBuilder::new();
        sub.add_where("c = ?", vec![3.into()]);

        let mut f = FilterBuilder::new();
        f.not(sub);

        let (clause, _) = f.generate_where_clauses();
        assert_eq!(clause, "NOT (c = ?)");
    }

    #[test]
    fn not_with_local_clauses_uses_and_not() {
        let mut sub = FilterBuilder::new();
        sub.add_where("c = ?", vec![3.into()]);

        let mut f = FilterBuilder::new();
        f.add_where("a = ?", vec![1.into()]);
        f.not(sub);

        let (clause, args) = f.generate_where_clauses();
        assert_eq!(clause, "(a = ?) AND NOT (c = ?)");
        assert_eq!(args, vec![1.into(), 3.into()]);
    }

    #[test]
    fn second_attach_is_an_error_and_keeps_first() {
        let mut first = FilterBuilder::new();
        first.add_where("a = 1", vec![]);
        let mut second = FilterBuilder::new();
        second.add_where("b = 2", vec![]);

        let mut f = FilterBuilder::new();
        f.and(first);
        f.or(second);

        assert_eq!(f.validate(), Err(FilterError::SubFilterAlreadySet));
        // the first attachment is not replaced
        let (clause, _) = f.generate_where_clauses();
        assert_eq!(clause, "(a = 1)");
    }

    #[test]
    fn joins_deduplicate_by_alias_across_subtree() {
        let mut sub = FilterBuilder::new();
        sub.add_join("scenes_tags", "", "scenes_tags.scene_id = scenes.id");

        let mut f = FilterBuilder::new();
        f.add_join("scenes_tags", "", "scenes_tags.scene_id = scenes.id");
        f.add_join("tags", "", "tags.id = scenes_tags.tag_id");
        f.and(sub);

        let joins = f.get_all_joins();
        assert_eq!(joins.len(), 2);
    }

    #[test]
    fn sub_filter_errors_surface_through_validate() {
        let mut sub = FilterBuilder::new();
        sub.set_error(FilterError::InvalidRegex("(".to_string()));

        let mut f = FilterBuilder::new();
        f.and(sub);
        assert!(matches!(f.validate(), Err(FilterError::InvalidRegex(_))));
    }

    #[test]
    fn args_follow_own_then_sub_order() {
        let mut inner = FilterBuilder::new();
        inner.add_where("z = ?", vec!["inner".into()]);

        let mut mid = FilterBuilder::new();
        mid.add_where("m = ?", vec!["mid".into()]);
        mid.and(inner);

        let mut outer = FilterBuilder::new();
        outer.add_where("o = ?", vec!["outer".into()]);
        outer.and(mid);

        let (clause, args) = outer.generate_where_clauses();
        assert_eq!(clause, "(o = ?) AND (m = ?) AND (z = ?)");
        assert_eq!(args, vec!["outer".into(), "mid".into(), "inner".into()]);
    }
}
