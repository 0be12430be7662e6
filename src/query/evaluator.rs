//! In-memory evaluation of [`Query`] and [`Expression`] against a slice of
//! entities.

use std::cmp::Ordering;

use crate::entity::FieldAccess;
use crate::query::model::{Expression, Operator, Query, QueryFilter};
use crate::query::Value;

/// Evaluate a single comparison against a field value read from `item`.
fn eval_filter<E: FieldAccess>(item: &E, filter: &QueryFilter) -> bool {
    let field_value = item.field(&filter.field).unwrap_or(Value::Null);

    match filter.operator {
        Operator::Eq => field_value == filter.value,
        Operator::NotEq => field_value != filter.value,
        Operator::Lt => field_value.compare(&filter.value) == Ordering::Less,
        Operator::Lte => field_value.compare(&filter.value) != Ordering::Greater,
        Operator::Gt => field_value.compare(&filter.value) == Ordering::Greater,
        Operator::Gte => field_value.compare(&filter.value) != Ordering::Less,
        Operator::In => match &filter.value {
            Value::List(items) => items.contains(&field_value),
            _ => false,
        },
        Operator::NotIn => match &filter.value {
            Value::List(items) => !items.contains(&field_value),
            _ => true,
        },
        Operator::IsNull => matches!(field_value, Value::Null),
        Operator::IsNotNull => !matches!(field_value, Value::Null),
        Operator::Contains => field_value.contains_substring(&filter.value),
        Operator::StartsWith => field_value.starts_with(&filter.value),
        Operator::EndsWith => field_value.ends_with(&filter.value),
        Operator::ArrayContains => field_value.array_contains(&filter.value),
        Operator::ArrayContainsAny => field_value.array_contains_any(&filter.value),
    }
}

/// Evaluate an expression tree against `item`, short-circuiting `And`/`Or`.
pub fn eval_expression<E: FieldAccess>(item: &E, expr: &Expression) -> bool {
    match expr {
        Expression::Comparison(filter) => eval_filter(item, filter),
        Expression::And(l, r) => eval_expression(item, l) && eval_expression(item, r),
        Expression::Or(l, r) => eval_expression(item, l) || eval_expression(item, r),
        Expression::Not(x) => !eval_expression(item, x),
    }
}

/// Does `item` satisfy every filter clause and the expression tree (if
/// present) on `query`?
pub fn matches<E: FieldAccess>(item: &E, query: &Query) -> bool {
    if !query.filters.iter().all(|f| eval_filter(item, f)) {
        return false;
    }
    if let Some(expr) = &query.expression {
        if !eval_expression(item, expr) {
            return false;
        }
    }
    true
}

/// Apply `query` to `items`: filter, stably order, then offset and limit.
///
/// `first_count` (when set and `limit` is not) behaves as a paging-aware
/// limit identical to `limit` — callers that want cursor-aware slicing
/// should use [`crate::pagination::paginate`] instead, which delegates
/// filtering and ordering back to this function before slicing.
pub fn evaluate<E: FieldAccess + Clone>(items: &[E], query: &Query) -> Vec<E> {
    let mut matched: Vec<E> = items.iter().filter(|item| matches(*item, query)).cloned().collect();

    for order in query.order_by.iter().rev() {
        matched.sort_by(|a, b| {
            let av = a.field(&order.field).unwrap_or(Value::Null);
            let bv = b.field(&order.field).unwrap_or(Value::Null);
            let cmp = av.compare(&bv);
            if order.descending {
                cmp.reverse()
            } else {
                cmp
            }
        });
    }

    if let Some(offset) = query.offset {
        matched = matched.into_iter().skip(offset).collect();
    }

    let limit = query.limit.or(query.first_count);
    if let Some(limit) = limit {
        matched.truncate(limit);
    }

    matched
}
