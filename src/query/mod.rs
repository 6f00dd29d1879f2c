mod aggregation;
mod aggregator;
mod builder;
mod evaluator;
mod filter;

pub use aggregation::{
    parse_aggregation_query, parse_run_aggregation_body, Aggregation, AggregationKind,
    AggregationQuery,
};
pub use aggregator::{run_aggregations, AggregationRow};
pub use builder::{
    parse_query_with_default_collection, parse_run_query_body, parse_structured_query, Query,
};
pub use evaluator::{apply_query, compare_values, field_value, matches_filters};
pub use filter::{
    CompositeFilter, CompositeKind, FieldFilter, Filter, FilterOperator, Order, OrderDirection,
};
