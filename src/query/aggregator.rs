//! Executes aggregation queries over already-filtered documents.

use std::collections::BTreeMap;

use crate::model::Document;
use crate::query::aggregation::{Aggregation, AggregationKind, AggregationQuery};
use crate::query::evaluator::{compare_values, field_value};
use crate::value::Value;

/// One result row: the group key values (empty without `groupBy`) plus each
/// alias's aggregate value.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationRow {
    group: Vec<(String, Value)>,
    aggregates: BTreeMap<String, Value>,
}

impl AggregationRow {
    pub fn group(&self) -> &[(String, Value)] {
        &self.group
    }

    pub fn aggregates(&self) -> &BTreeMap<String, Value> {
        &self.aggregates
    }
}

/// Runs every aggregation over the documents, partitioned by the `groupBy`
/// tuple when present. Partitions appear in first-seen order.
pub fn run_aggregations(documents: &[Document], request: &AggregationQuery) -> Vec<AggregationRow> {
    let partitions = partition_documents(documents, request);

    partitions
        .into_iter()
        .map(|(group, members)| {
            let mut aggregates = BTreeMap::new();
            for aggregation in request.aggregations() {
                aggregates.insert(
                    aggregation.alias().to_string(),
                    run_single(&members, aggregation),
                );
            }
            AggregationRow { group, aggregates }
        })
        .collect()
}

type Partition<'a> = (Vec<(String, Value)>, Vec<&'a Document>);

fn partition_documents<'a>(
    documents: &'a [Document],
    request: &AggregationQuery,
) -> Vec<Partition<'a>> {
    if request.group_by().is_empty() {
        return vec![(Vec::new(), documents.iter().collect())];
    }

    let mut partitions: Vec<Partition<'a>> = Vec::new();
    for document in documents {
        let key: Vec<(String, Value)> = request
            .group_by()
            .iter()
            .map(|field| {
                let value = field_value(document, field).unwrap_or_else(Value::null);
                (field.canonical_string(), value)
            })
            .collect();

        match partitions.iter_mut().find(|(group, _)| group == &key) {
            Some((_, members)) => members.push(document),
            None => partitions.push((key, vec![document])),
        }
    }
    partitions
}

fn run_single(documents: &[&Document], aggregation: &Aggregation) -> Value {
    match aggregation.kind() {
        AggregationKind::Count => Value::from_integer(documents.len() as i64),
        AggregationKind::Sum => sum(documents, aggregation),
        AggregationKind::Avg => avg(documents, aggregation),
        AggregationKind::Min => extremum(documents, aggregation, std::cmp::Ordering::Less),
        AggregationKind::Max => extremum(documents, aggregation, std::cmp::Ordering::Greater),
    }
}

fn numeric_values<'a>(
    documents: &'a [&Document],
    aggregation: &'a Aggregation,
) -> impl Iterator<Item = Value> + 'a {
    let field = aggregation
        .field()
        .expect("non-count aggregations always carry a field");
    documents
        .iter()
        .filter_map(move |document| field_value(document, field))
        // Non-numeric values are skipped silently.
        .filter(|value| value.is_numeric())
}

fn sum(documents: &[&Document], aggregation: &Aggregation) -> Value {
    let mut integer_sum: i64 = 0;
    let mut double_sum: f64 = 0.0;
    let mut saw_double = false;
    for value in numeric_values(documents, aggregation) {
        match value.kind() {
            crate::value::ValueKind::Integer(i) => {
                integer_sum = integer_sum.wrapping_add(*i);
                double_sum += *i as f64;
            }
            crate::value::ValueKind::Double(d) => {
                saw_double = true;
                double_sum += d;
            }
            _ => unreachable!("filtered to numeric values"),
        }
    }
    if saw_double {
        Value::from_double(double_sum)
    } else {
        Value::from_integer(integer_sum)
    }
}

fn avg(documents: &[&Document], aggregation: &Aggregation) -> Value {
    let mut total = 0.0;
    let mut count = 0usize;
    for value in numeric_values(documents, aggregation) {
        total += value.as_f64().unwrap_or_default();
        count += 1;
    }
    if count == 0 {
        Value::from_double(f64::NAN)
    } else {
        Value::from_double(total / count as f64)
    }
}

fn extremum(
    documents: &[&Document],
    aggregation: &Aggregation,
    keep: std::cmp::Ordering,
) -> Value {
    let field = aggregation
        .field()
        .expect("non-count aggregations always carry a field");
    let mut best: Option<Value> = None;
    for document in documents {
        let Some(value) = field_value(document, field) else {
            continue;
        };
        best = match best {
            None => Some(value),
            Some(current) => {
                if compare_values(&value, &current) == keep {
                    Some(value)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.unwrap_or_else(Value::null)
}
