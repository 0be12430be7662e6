//! Translation of [`Query`] into SQL `WHERE`/`ORDER BY`/`LIMIT`/`OFFSET`
//! clauses, shared by every SQL-style backend adapter.
//!
//! Two dialects are supported: [`Dialect::Plain`] and
//! [`Dialect::CrdtTombstone`]. The latter prefixes `is_deleted = 0` into
//! every generated `SELECT`'s `WHERE` clause (but not `DELETE`
//! statements), matching how CRDT-replicated backends keep tombstoned rows
//! physically present but logically absent from default reads.

use crate::query::model::{Operator, OrderBy, Query, QueryFilter};
use crate::query::Value;

/// Which backend family a translation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// No tombstone awareness.
    Plain,
    /// CRDT-replicated backend: excludes soft-deleted rows from reads.
    CrdtTombstone,
}

/// A generated SQL fragment plus its positional `?` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    /// The SQL text.
    pub sql: String,
    /// Arguments in the order their `?` placeholders appear.
    pub args: Vec<Value>,
}

/// Resolves a query field name to the column name (and, if needed,
/// table-qualified alias) a backend should emit in generated SQL.
pub trait FieldAliasMap {
    /// Resolve `field` to a column reference. Defaults to passing the
    /// field name through unchanged.
    fn resolve(&self, field: &str) -> String {
        field.to_string()
    }
}

/// The identity alias map: every field name passes through unchanged.
pub struct IdentityAliasMap;
impl FieldAliasMap for IdentityAliasMap {}

/// Translates [`Query`] values into SQL text against a given `table` and
/// [`Dialect`].
pub struct SqlTranslator<'a, A: FieldAliasMap = IdentityAliasMap> {
    dialect: Dialect,
    aliases: &'a A,
}

impl<'a> SqlTranslator<'a, IdentityAliasMap> {
    /// Construct a translator using the identity alias map.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            aliases: &IdentityAliasMap,
        }
    }
}

impl<'a, A: FieldAliasMap> SqlTranslator<'a, A> {
    /// Construct a translator with a custom field alias map.
    pub fn with_aliases(dialect: Dialect, aliases: &'a A) -> Self {
        Self { dialect, aliases }
    }

    /// Produce a `SELECT * FROM <table> WHERE ... ORDER BY ... LIMIT ...
    /// OFFSET ...` fragment. `include_tombstone_filter` lets a caller
    /// suppress the CRDT dialect's tombstone predicate for one call (e.g.
    /// when explicitly reading deleted rows for a changeset).
    pub fn to_select_sql(
        &self,
        table: &str,
        query: Option<&Query>,
        include_tombstone_filter: bool,
    ) -> SqlFragment {
        let mut args = Vec::new();
        let mut where_clauses = Vec::new();

        if self.dialect == Dialect::CrdtTombstone && include_tombstone_filter {
            where_clauses.push("is_deleted = 0".to_string());
        }

        if let Some(query) = query {
            if let Some(clause) = self.where_clause(query, &mut args) {
                where_clauses.push(clause);
            }
        }

        let mut sql = format!("SELECT * FROM {table}");
        if !where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clauses.join(" AND "));
        }

        if let Some(query) = query {
            if !query.order_by.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&self.order_by_clause(&query.order_by));
            }
            if let Some(limit) = query.limit.or(query.first_count) {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            if let Some(offset) = query.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        SqlFragment { sql, args }
    }

    /// Produce a `DELETE FROM <table> WHERE ...` fragment. Tombstone
    /// filtering never applies to deletes: a delete targets rows
    /// regardless of their current tombstone state.
    pub fn to_delete_sql(&self, table: &str, query: &Query) -> SqlFragment {
        let mut args = Vec::new();
        let mut sql = format!("DELETE FROM {table}");
        if let Some(clause) = self.where_clause(query, &mut args) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        SqlFragment { sql, args }
    }

    fn where_clause(&self, query: &Query, args: &mut Vec<Value>) -> Option<String> {
        if query.filters.is_empty() {
            return None;
        }
        let clauses: Vec<String> = query
            .filters
            .iter()
            .map(|f| self.filter_clause(f, args))
            .collect();
        Some(clauses.join(" AND "))
    }

    fn filter_clause(&self, filter: &QueryFilter, args: &mut Vec<Value>) -> String {
        let column = self.aliases.resolve(&filter.field);
        match filter.operator {
            Operator::Eq => {
                args.push(filter.value.clone());
                format!("{column} = ?")
            }
            Operator::NotEq => {
                args.push(filter.value.clone());
                format!("{column} != ?")
            }
            Operator::Lt => {
                args.push(filter.value.clone());
                format!("{column} < ?")
            }
            Operator::Lte => {
                args.push(filter.value.clone());
                format!("{column} <= ?")
            }
            Operator::Gt => {
                args.push(filter.value.clone());
                format!("{column} > ?")
            }
            Operator::Gte => {
                args.push(filter.value.clone());
                format!("{column} >= ?")
            }
            Operator::In => Self::list_clause(&column, "IN", &filter.value, args, "1 = 0"),
            Operator::NotIn => Self::list_clause(&column, "NOT IN", &filter.value, args, "1 = 1"),
            Operator::IsNull => format!("{column} IS NULL"),
            Operator::IsNotNull => format!("{column} IS NOT NULL"),
            Operator::Contains => {
                args.push(Value::Text(format!("%{}%", filter.value.display_string())));
                format!("{column} LIKE ?")
            }
            Operator::StartsWith => {
                args.push(Value::Text(format!("{}%", filter.value.display_string())));
                format!("{column} LIKE ?")
            }
            Operator::EndsWith => {
                args.push(Value::Text(format!("%{}", filter.value.display_string())));
                format!("{column} LIKE ?")
            }
            Operator::ArrayContains => {
                args.push(Value::Text(format!("%{}%", filter.value.display_string())));
                format!("{column} LIKE ?")
            }
            Operator::ArrayContainsAny => match &filter.value {
                Value::List(items) if !items.is_empty() => {
                    let placeholders: Vec<&str> = items.iter().map(|_| "?").collect();
                    args.extend(items.iter().cloned());
                    format!(
                        "EXISTS (SELECT 1 FROM json_each({column}) WHERE value IN ({}))",
                        placeholders.join(", ")
                    )
                }
                _ => "1 = 0".to_string(),
            },
        }
    }

    fn list_clause(
        column: &str,
        keyword: &str,
        value: &Value,
        args: &mut Vec<Value>,
        empty_fallback: &str,
    ) -> String {
        match value {
            Value::List(items) if !items.is_empty() => {
                let placeholders: Vec<&str> = items.iter().map(|_| "?").collect();
                args.extend(items.iter().cloned());
                format!("{column} {keyword} ({})", placeholders.join(", "))
            }
            _ => empty_fallback.to_string(),
        }
    }

    fn order_by_clause(&self, order_by: &[OrderBy]) -> String {
        order_by
            .iter()
            .map(|o| {
                let column = self.aliases.resolve(&o.field);
                let dir = if o.descending { "DESC" } else { "ASC" };
                format!("{column} {dir}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::model::Query;

    #[test]
    fn crdt_dialect_prefixes_tombstone_filter_into_select() {
        let query = Query::new()
            .where_filter("status", Operator::Eq, Value::Text("active".into()))
            .order_by("created_at", true)
            .limit(10);

        let translator = SqlTranslator::new(Dialect::CrdtTombstone);
        let fragment = translator.to_select_sql("t", Some(&query), true);

        assert_eq!(
            fragment.sql,
            "SELECT * FROM t WHERE is_deleted = 0 AND status = ? ORDER BY created_at DESC LIMIT 10"
        );
        assert_eq!(fragment.args, vec![Value::Text("active".into())]);
    }

    #[test]
    fn plain_dialect_has_no_tombstone_filter() {
        let query = Query::new().where_filter("id", Operator::Eq, Value::Int(1));
        let translator = SqlTranslator::new(Dialect::Plain);
        let fragment = translator.to_select_sql("t", Some(&query), true);
        assert_eq!(fragment.sql, "SELECT * FROM t WHERE id = ?");
    }

    #[test]
    fn delete_never_applies_tombstone_filter() {
        let query = Query::new().where_filter("id", Operator::Eq, Value::Int(1));
        let translator = SqlTranslator::new(Dialect::CrdtTombstone);
        let fragment = translator.to_delete_sql("t", &query);
        assert_eq!(fragment.sql, "DELETE FROM t WHERE id = ?");
    }

    #[test]
    fn empty_in_list_is_always_false() {
        let query = Query::new().where_filter("id", Operator::In, Value::List(vec![]));
        let translator = SqlTranslator::new(Dialect::Plain);
        let fragment = translator.to_select_sql("t", Some(&query), true);
        assert_eq!(fragment.sql, "SELECT * FROM t WHERE 1 = 0");
    }

    #[test]
    fn empty_not_in_list_is_always_true() {
        let query = Query::new().where_filter("id", Operator::NotIn, Value::List(vec![]));
        let translator = SqlTranslator::new(Dialect::Plain);
        let fragment = translator.to_select_sql("t", Some(&query), true);
        assert_eq!(fragment.sql, "SELECT * FROM t WHERE 1 = 1");
    }

    #[test]
    fn array_contains_any_generates_json_each_exists() {
        let query = Query::new().where_filter(
            "tags",
            Operator::ArrayContainsAny,
            Value::List(vec![Value::Text("a".into()), Value::Text("b".into())]),
        );
        let translator = SqlTranslator::new(Dialect::Plain);
        let fragment = translator.to_select_sql("t", Some(&query), true);
        assert_eq!(
            fragment.sql,
            "SELECT * FROM t WHERE EXISTS (SELECT 1 FROM json_each(tags) WHERE value IN (?, ?))"
        );
    }

    #[test]
    fn contains_uses_like_wildcards() {
        let query = Query::new().where_filter("name", Operator::Contains, Value::Text("bob".into()));
        let translator = SqlTranslator::new(Dialect::Plain);
        let fragment = translator.to_select_sql("t", Some(&query), true);
        assert_eq!(fragment.sql, "SELECT * FROM t WHERE name LIKE ?");
        assert_eq!(fragment.args, vec![Value::Text("%bob%".into())]);
    }
}
