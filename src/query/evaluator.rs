//! Applies an internal [`Query`] to candidate documents: filter evaluation
//! (including OR composites), ordering with the total typed-value order,
//! cursor bounds, offset, limit, and projection.
//!
//! Shared by the in-memory storage engine and the subscription registry's
//! query predicate check.

use std::cmp::Ordering;

use crate::model::{Document, FieldPath};
use crate::query::builder::Query;
use crate::query::filter::{FieldFilter, Filter, FilterOperator, Order, OrderDirection};
use crate::value::{MapValue, Value, ValueKind};

pub fn apply_query(documents: Vec<Document>, query: &Query) -> Vec<Document> {
    let mut filtered: Vec<Document> = documents
        .into_iter()
        .filter(|document| document.exists())
        .filter(|document| matches_filters(document, query.filters()))
        .collect();

    filtered.sort_by(|left, right| compare_documents(left, right, query.orders()));

    if let Some(cursor) = query.start_at() {
        filtered.retain(|document| {
            compare_document_to_cursor(document, cursor, query.orders()) != Ordering::Less
        });
    }
    if let Some(cursor) = query.start_after() {
        filtered.retain(|document| {
            compare_document_to_cursor(document, cursor, query.orders()) == Ordering::Greater
        });
    }
    if let Some(cursor) = query.end_at() {
        filtered.retain(|document| {
            compare_document_to_cursor(document, cursor, query.orders()) != Ordering::Greater
        });
    }
    if let Some(cursor) = query.end_before() {
        filtered.retain(|document| {
            compare_document_to_cursor(document, cursor, query.orders()) == Ordering::Less
        });
    }

    if let Some(offset) = query.offset() {
        let offset = offset as usize;
        if offset >= filtered.len() {
            filtered.clear();
        } else {
            filtered.drain(0..offset);
        }
    }

    if let Some(limit) = query.limit() {
        filtered.truncate(limit as usize);
    }

    if let Some(fields) = query.select_fields() {
        filtered = filtered
            .into_iter()
            .map(|document| apply_projection(document, fields))
            .collect();
    }

    filtered
}

/// True when every filter in the list matches; OR composites match when any
/// of their children do.
pub fn matches_filters(document: &Document, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches_filter(document, filter))
}

fn matches_filter(document: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::Field(leaf) => matches_leaf(document, leaf),
        Filter::Composite(composite) => composite
            .filters()
            .iter()
            .any(|child| matches_filter(document, child)),
    }
}

fn matches_leaf(document: &Document, filter: &FieldFilter) -> bool {
    match field_value(document, filter.field()) {
        Some(value) => evaluate_operator(filter, &value),
        None => match filter.operator() {
            FilterOperator::NotEqual => evaluate_operator(filter, &Value::null()),
            _ => false,
        },
    }
}

fn evaluate_operator(filter: &FieldFilter, value: &Value) -> bool {
    match filter.operator() {
        FilterOperator::Equal => value == filter.value(),
        FilterOperator::NotEqual => value != filter.value(),
        FilterOperator::LessThan => compare_values(value, filter.value()) == Ordering::Less,
        FilterOperator::LessThanOrEqual => {
            compare_values(value, filter.value()) != Ordering::Greater
        }
        FilterOperator::GreaterThan => compare_values(value, filter.value()) == Ordering::Greater,
        FilterOperator::GreaterThanOrEqual => {
            compare_values(value, filter.value()) != Ordering::Less
        }
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(array) => array.contains(filter.value()),
            _ => false,
        },
        FilterOperator::ArrayContainsAny => match (value.kind(), filter.value().kind()) {
            (ValueKind::Array(array), ValueKind::Array(needles)) => {
                needles.values().iter().any(|needle| array.contains(needle))
            }
            _ => false,
        },
        FilterOperator::In => match filter.value().kind() {
            ValueKind::Array(values) => values.contains(value),
            _ => false,
        },
        FilterOperator::NotIn => match filter.value().kind() {
            ValueKind::Array(values) => {
                !matches!(value.kind(), ValueKind::Null) && !values.contains(value)
            }
            _ => false,
        },
    }
}

/// Resolves a field path against a document; `__name__` resolves to the
/// document's full path.
pub fn field_value(document: &Document, field: &FieldPath) -> Option<Value> {
    if field.is_document_id() {
        return Some(Value::from_string(document.path().canonical_string()));
    }
    document.fields().get(field).cloned()
}

pub fn compare_documents(left: &Document, right: &Document, orders: &[Order]) -> Ordering {
    for order in orders {
        let left_value = field_value(left, order.field()).unwrap_or_else(Value::null);
        let right_value = field_value(right, order.field()).unwrap_or_else(Value::null);

        let mut ordering = compare_values(&left_value, &right_value);
        if order.direction() == OrderDirection::Descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    // Stable tiebreak so paginated reads never interleave.
    left.path().canonical_string().cmp(&right.path().canonical_string())
}

fn compare_document_to_cursor(document: &Document, cursor: &[Value], orders: &[Order]) -> Ordering {
    for (index, order) in orders.iter().enumerate() {
        if index >= cursor.len() {
            break;
        }
        let document_value = field_value(document, order.field()).unwrap_or_else(Value::null);
        let mut ordering = compare_values(&document_value, &cursor[index]);
        if order.direction() == OrderDirection::Descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn type_rank(value: &Value) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) => 3,
        ValueKind::String(_) => 4,
        ValueKind::Bytes(_) => 5,
        ValueKind::Reference(_) => 6,
        ValueKind::GeoPoint(_) => 7,
        ValueKind::Array(_) => 8,
        ValueKind::Map(_) => 9,
        ValueKind::Raw(_) => 10,
    }
}

/// Total order over typed values:
/// `null < bool < number < timestamp < string < bytes < reference <
/// geoPoint < array < map`. Within numbers, numeric order (NaN sorts below
/// every other number).
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => Ordering::Equal,
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => compare_numbers(*a as f64, *b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => compare_numbers(*a, *b as f64),
        (ValueKind::Double(a), ValueKind::Double(b)) => compare_numbers(*a, *b),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
        (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
        (ValueKind::Bytes(a), ValueKind::Bytes(b)) => a.as_slice().cmp(b.as_slice()),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => a.cmp(b),
        (ValueKind::GeoPoint(a), ValueKind::GeoPoint(b)) => a
            .latitude
            .total_cmp(&b.latitude)
            .then_with(|| a.longitude.total_cmp(&b.longitude)),
        (ValueKind::Array(a), ValueKind::Array(b)) => {
            for (left_entry, right_entry) in a.values().iter().zip(b.values().iter()) {
                let ordering = compare_values(left_entry, right_entry);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.values().len().cmp(&b.values().len())
        }
        (ValueKind::Map(a), ValueKind::Map(b)) => {
            for ((left_key, left_entry), (right_key, right_entry)) in
                a.fields().iter().zip(b.fields().iter())
            {
                let key_ordering = left_key.cmp(right_key);
                if key_ordering != Ordering::Equal {
                    return key_ordering;
                }
                let ordering = compare_values(left_entry, right_entry);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.fields().len().cmp(&b.fields().len())
        }
        (ValueKind::Raw(a), ValueKind::Raw(b)) => a.0.to_string().cmp(&b.0.to_string()),
        _ => Ordering::Equal,
    }
}

fn compare_numbers(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

fn apply_projection(document: Document, fields: &[FieldPath]) -> Document {
    let mut projected = MapValue::empty();
    for field in fields {
        if let Some(value) = document.fields().get(field) {
            projected.set(field, value.clone());
        }
    }
    let update_time = document.update_time();
    document.with_fields(projected, update_time)
}
