//! The query model: an immutable builder plus a small expression algebra.
//!
//! [`Query`] composes by returning new values from every `with_*` method,
//! so a base query can be cloned and specialized by multiple callers
//! without interference.

use crate::pagination::Cursor;
use crate::query::Value;

/// Comparison operators available to a [`QueryFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `≠`
    NotEq,
    /// `<`
    Lt,
    /// `≤`
    Lte,
    /// `>`
    Gt,
    /// `≥`
    Gte,
    /// `IN (...)`
    In,
    /// `NOT IN (...)`
    NotIn,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
    /// Substring predicate.
    Contains,
    /// Prefix predicate.
    StartsWith,
    /// Suffix predicate.
    EndsWith,
    /// List-field membership.
    ArrayContains,
    /// List-field non-empty intersection.
    ArrayContainsAny,
}

/// A single `(field, operator, value)` filter clause.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    /// Field name, resolved via [`crate::entity::FieldAccess`] or an alias
    /// map at translation time.
    pub field: String,
    /// The comparison to apply.
    pub operator: Operator,
    /// The operand. Ignored by `IS_NULL`/`IS_NOT_NULL`.
    pub value: Value,
}

impl QueryFilter {
    /// Construct a filter clause.
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// An expression tree combining comparisons with boolean connectives.
///
/// Multiple [`QueryFilter`] entries on a [`Query`] combine as an implicit
/// conjunction; `Expression` exists for callers that need `OR`/`NOT` or
/// nested grouping beyond a flat `AND` of filters.
#[derive(Debug, Clone)]
pub enum Expression {
    /// A single comparison.
    Comparison(QueryFilter),
    /// Logical AND of two subexpressions.
    And(Box<Expression>, Box<Expression>),
    /// Logical OR of two subexpressions.
    Or(Box<Expression>, Box<Expression>),
    /// Logical negation.
    Not(Box<Expression>),
}

impl Expression {
    /// Build a comparison leaf.
    pub fn cmp(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Expression::Comparison(QueryFilter::new(field, operator, value))
    }

    /// Combine with AND.
    pub fn and(self, other: Expression) -> Self {
        Expression::And(Box::new(self), Box::new(other))
    }

    /// Combine with OR.
    pub fn or(self, other: Expression) -> Self {
        Expression::Or(Box::new(self), Box::new(other))
    }

    /// Negate.
    pub fn not(self) -> Self {
        Expression::Not(Box::new(self))
    }
}

/// An ordering clause.
#[derive(Debug, Clone)]
pub struct OrderBy {
    /// Field to sort by.
    pub field: String,
    /// Descending if true, ascending otherwise.
    pub descending: bool,
}

impl OrderBy {
    /// Ascending order on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending order on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// An immutable, composable query description.
///
/// An empty query (`Query::new()`) matches every item. Each `with_*`
/// method consumes `self` and returns a new `Query`, so composition reads
/// as a chain: `Query::new().where_filter(...).order_by(...).limit(10)`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Conjunctive filter clauses.
    pub filters: Vec<QueryFilter>,
    /// An optional expression tree, evaluated in conjunction with `filters`.
    pub expression: Option<Expression>,
    /// Ordering clauses, applied in sequence.
    pub order_by: Vec<OrderBy>,
    /// Absolute result cap.
    pub limit: Option<usize>,
    /// Number of leading results to skip.
    pub offset: Option<usize>,
    /// Forward-pagination page size.
    pub first_count: Option<usize>,
    /// Forward-pagination cursor.
    pub after_cursor: Option<Cursor>,
    /// Backward-pagination cursor.
    pub before_cursor: Option<Cursor>,
    /// Backward-pagination page size.
    pub last_count: Option<usize>,
}

impl Query {
    /// An empty query matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter clause.
    pub fn where_filter(mut self, field: impl Into<String>, operator: Operator, value: Value) -> Self {
        self.filters.push(QueryFilter::new(field, operator, value));
        self
    }

    /// Set (replace) the expression tree.
    pub fn where_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Append an ordering clause.
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    /// Set the result cap.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the skip count.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Forward-paginate: take `count` items after `cursor` (if any).
    pub fn first(mut self, count: usize) -> Self {
        self.first_count = Some(count);
        self
    }

    /// Set the forward-pagination cursor.
    pub fn after(mut self, cursor: Cursor) -> Self {
        self.after_cursor = Some(cursor);
        self
    }

    /// Set the backward-pagination cursor.
    pub fn before(mut self, cursor: Cursor) -> Self {
        self.before_cursor = Some(cursor);
        self
    }

    /// Backward-paginate: take `count` items before `cursor` (if any).
    pub fn last(mut self, count: usize) -> Self {
        self.last_count = Some(count);
        self
    }

    /// Whether this query carries no constraints at all.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
            && self.expression.is_none()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.first_count.is_none()
            && self.after_cursor.is_none()
            && self.before_cursor.is_none()
            && self.last_count.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_has_no_constraints() {
        assert!(Query::new().is_empty());
    }

    #[test]
    fn builder_composes_without_mutating_in_place() {
        let base = Query::new().where_filter("age", Operator::Gt, Value::Int(22));
        let extended = base.clone().order_by("age", false).limit(10);

        assert_eq!(base.order_by.len(), 0);
        assert_eq!(extended.order_by.len(), 1);
        assert_eq!(extended.limit, Some(10));
    }

    #[test]
    fn expression_tree_builds() {
        let expr = Expression::cmp("age", Operator::Gt, Value::Int(22))
            .and(Expression::cmp("active", Operator::Eq, Value::Bool(true)));
        match expr {
            Expression::And(_, _) => {}
            _ => panic!("expected And"),
        }
    }
}
