//! Translates `structuredAggregationQuery` JSON into the internal
//! [`AggregationQuery`].

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use crate::error::{
    invalid_request_body, missing_structured_aggregation_query, ApiResult,
};
use crate::model::FieldPath;
use crate::query::builder::{parse_structured_query, Query};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregationKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregationKind {
    fn wire_key(&self) -> &'static str {
        match self {
            AggregationKind::Count => "count",
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    alias: String,
    kind: AggregationKind,
    field: Option<FieldPath>,
}

impl Aggregation {
    pub fn new(alias: impl Into<String>, kind: AggregationKind, field: Option<FieldPath>) -> Self {
        Self {
            alias: alias.into(),
            kind,
            field,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    pub fn field(&self) -> Option<&FieldPath> {
        self.field.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregationQuery {
    query: Query,
    aggregations: Vec<Aggregation>,
    group_by: Vec<FieldPath>,
}

impl AggregationQuery {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    pub fn group_by(&self) -> &[FieldPath] {
        &self.group_by
    }
}

/// Entry point for the `documents:runAggregationQuery` endpoint: the body
/// must carry a `structuredAggregationQuery` key.
pub fn parse_run_aggregation_body(body: &JsonValue) -> ApiResult<AggregationQuery> {
    let root = body
        .get("structuredAggregationQuery")
        .ok_or_else(missing_structured_aggregation_query)?;
    parse_aggregation_query(root)
}

pub fn parse_aggregation_query(root: &JsonValue) -> ApiResult<AggregationQuery> {
    let structured = root
        .get("structuredQuery")
        .ok_or_else(|| invalid_request_body("structuredAggregationQuery must carry a structuredQuery"))?;
    let query = parse_structured_query(structured)?;

    let entries = root
        .get("aggregations")
        .and_then(JsonValue::as_array)
        .filter(|entries| !entries.is_empty())
        .ok_or_else(|| invalid_request_body("structuredAggregationQuery must carry aggregations"))?;

    let mut seen_aliases = BTreeSet::new();
    let mut aggregations = Vec::with_capacity(entries.len());
    for entry in entries {
        let aggregation = parse_aggregation_entry(entry)?;
        if !seen_aliases.insert(aggregation.alias().to_string()) {
            return Err(invalid_request_body(format!(
                "duplicate aggregation alias: {:?}",
                aggregation.alias()
            )));
        }
        aggregations.push(aggregation);
    }

    let group_by = match root.get("groupBy") {
        Some(value) => parse_group_by(value)?,
        None => Vec::new(),
    };

    Ok(AggregationQuery {
        query,
        aggregations,
        group_by,
    })
}

fn parse_aggregation_entry(entry: &JsonValue) -> ApiResult<Aggregation> {
    let alias = entry
        .get("alias")
        .and_then(JsonValue::as_str)
        .filter(|alias| !alias.trim().is_empty())
        .ok_or_else(|| invalid_request_body("aggregation must carry a non-empty alias"))?;

    for kind in [
        AggregationKind::Count,
        AggregationKind::Sum,
        AggregationKind::Avg,
        AggregationKind::Min,
        AggregationKind::Max,
    ] {
        let Some(payload) = entry.get(kind.wire_key()) else {
            continue;
        };
        let field = match kind {
            AggregationKind::Count => None,
            _ => {
                let field_path = payload
                    .get("field")
                    .and_then(|field| field.get("fieldPath"))
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| {
                        invalid_request_body(format!(
                            "{} aggregation must carry field.fieldPath",
                            kind.wire_key()
                        ))
                    })?;
                Some(FieldPath::from_dot_separated(field_path)?)
            }
        };
        return Ok(Aggregation::new(alias, kind, field));
    }

    Err(invalid_request_body(
        "aggregation must be one of count, sum, avg, min, max",
    ))
}

fn parse_group_by(value: &JsonValue) -> ApiResult<Vec<FieldPath>> {
    let entries = value
        .as_array()
        .ok_or_else(|| invalid_request_body("'groupBy' must be an array"))?;
    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        let field_path = match entry {
            JsonValue::String(raw) => raw.as_str(),
            other => other
                .get("fieldPath")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| invalid_request_body("groupBy entry must carry fieldPath"))?,
        };
        fields.push(FieldPath::from_dot_separated(field_path)?);
    }
    Ok(fields)
}
