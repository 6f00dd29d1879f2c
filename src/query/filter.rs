use crate::model::FieldPath;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "LESS_THAN" => Some(FilterOperator::LessThan),
            "LESS_THAN_OR_EQUAL" => Some(FilterOperator::LessThanOrEqual),
            "GREATER_THAN" => Some(FilterOperator::GreaterThan),
            "GREATER_THAN_OR_EQUAL" => Some(FilterOperator::GreaterThanOrEqual),
            "EQUAL" => Some(FilterOperator::Equal),
            "NOT_EQUAL" => Some(FilterOperator::NotEqual),
            "ARRAY_CONTAINS" => Some(FilterOperator::ArrayContains),
            "ARRAY_CONTAINS_ANY" => Some(FilterOperator::ArrayContainsAny),
            "IN" => Some(FilterOperator::In),
            "NOT_IN" => Some(FilterOperator::NotIn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    /// Any string other than `DESCENDING` orders ascending.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "DESCENDING" => OrderDirection::Descending,
            _ => OrderDirection::Ascending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeKind {
    And,
    Or,
}

impl CompositeKind {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "AND" | "and" => Some(CompositeKind::And),
            "OR" | "or" => Some(CompositeKind::Or),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: Value,
}

impl FieldFilter {
    pub fn new(field: FieldPath, operator: FilterOperator, value: Value) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A disjunction of already-flattened sub-filters. AND composites never
/// survive query building (their children are lifted into the enclosing
/// filter list), so the only composite kind stored here is OR.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeFilter {
    filters: Vec<Filter>,
}

impl CompositeFilter {
    pub fn or(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn kind(&self) -> CompositeKind {
        CompositeKind::Or
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Field(FieldFilter),
    Composite(CompositeFilter),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    field: FieldPath,
    direction: OrderDirection,
}

impl Order {
    pub fn new(field: FieldPath, direction: OrderDirection) -> Self {
        Self { field, direction }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_mapping_is_total_over_canonical_strings() {
        for op in [
            "LESS_THAN",
            "LESS_THAN_OR_EQUAL",
            "GREATER_THAN",
            "GREATER_THAN_OR_EQUAL",
            "EQUAL",
            "NOT_EQUAL",
            "ARRAY_CONTAINS",
            "ARRAY_CONTAINS_ANY",
            "IN",
            "NOT_IN",
        ] {
            let mapped = FilterOperator::from_wire(op).unwrap();
            assert_eq!(mapped.as_str(), op);
        }
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert_eq!(FilterOperator::from_wire("MATCHES_REGEX"), None);
        assert_eq!(FilterOperator::from_wire("equal"), None);
    }

    #[test]
    fn unknown_direction_defaults_to_ascending() {
        assert_eq!(OrderDirection::from_wire("DESCENDING"), OrderDirection::Descending);
        assert_eq!(OrderDirection::from_wire("ASCENDING"), OrderDirection::Ascending);
        assert_eq!(OrderDirection::from_wire("sideways"), OrderDirection::Ascending);
    }

    #[test]
    fn composite_kind_accepts_both_casings() {
        assert_eq!(CompositeKind::from_wire("AND"), Some(CompositeKind::And));
        assert_eq!(CompositeKind::from_wire("or"), Some(CompositeKind::Or));
        assert_eq!(CompositeKind::from_wire("NAND"), None);
    }
}
