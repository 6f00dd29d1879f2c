use std::collections::BTreeMap;

use crate::model::FieldPath;
use crate::value::{Value, ValueKind};

#[derive(Clone, Debug, PartialEq, Default)]
pub struct MapValue {
    fields: BTreeMap<String, Value>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Retrieves the value at a (possibly nested) field path.
    pub fn get(&self, field_path: &FieldPath) -> Option<&Value> {
        get_from_segments(self.fields(), field_path.segments())
    }

    /// Writes `value` at a (possibly nested) field path, materializing
    /// intermediate maps. Non-map intermediates are replaced.
    pub fn set(&mut self, field_path: &FieldPath, value: Value) {
        set_in_segments(&mut self.fields, field_path.segments(), value);
    }

    /// Removes the value at a (possibly nested) field path, if present.
    pub fn remove(&mut self, field_path: &FieldPath) -> Option<Value> {
        remove_in_segments(&mut self.fields, field_path.segments())
    }
}

fn get_from_segments<'a>(
    fields: &'a BTreeMap<String, Value>,
    segments: &[String],
) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let value = fields.get(first)?;
    if rest.is_empty() {
        Some(value)
    } else if let ValueKind::Map(child) = value.kind() {
        get_from_segments(child.fields(), rest)
    } else {
        None
    }
}

fn set_in_segments(fields: &mut BTreeMap<String, Value>, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }
    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| Value::from_map(BTreeMap::new()));
    if !matches!(entry.kind(), ValueKind::Map(_)) {
        *entry = Value::from_map(BTreeMap::new());
    }
    if let ValueKind::Map(child) = entry.kind() {
        let mut child_fields = child.fields().clone();
        set_in_segments(&mut child_fields, rest, value);
        *entry = Value::from_map(child_fields);
    }
}

fn remove_in_segments(fields: &mut BTreeMap<String, Value>, segments: &[String]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return fields.remove(first);
    }
    let entry = fields.get_mut(first)?;
    if let ValueKind::Map(child) = entry.kind() {
        let mut child_fields = child.fields().clone();
        let removed = remove_in_segments(&mut child_fields, rest);
        *entry = Value::from_map(child_fields);
        removed
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_map_entries() {
        let mut map = BTreeMap::new();
        map.insert("foo".to_string(), Value::from_integer(1));
        let value = MapValue::new(map.clone());
        assert_eq!(value.fields().get("foo"), map.get("foo"));
    }

    #[test]
    fn get_returns_nested_value() {
        let mut inner = BTreeMap::new();
        inner.insert("bar".to_string(), Value::from_string("baz"));
        let mut map = BTreeMap::new();
        map.insert("foo".to_string(), Value::from_map(inner));
        let value = MapValue::new(map);
        let path = FieldPath::from_dot_separated("foo.bar").unwrap();
        let result = value.get(&path).unwrap();
        match result.kind() {
            ValueKind::String(s) => assert_eq!(s, "baz"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn set_materializes_intermediate_maps() {
        let mut map = MapValue::empty();
        let path = FieldPath::from_dot_separated("a.b.c").unwrap();
        map.set(&path, Value::from_integer(7));
        assert_eq!(map.get(&path), Some(&Value::from_integer(7)));
    }

    #[test]
    fn remove_nested_value() {
        let mut map = MapValue::empty();
        let path = FieldPath::from_dot_separated("a.b").unwrap();
        map.set(&path, Value::from_bool(true));
        assert_eq!(map.remove(&path), Some(Value::from_bool(true)));
        assert_eq!(map.get(&path), None);
    }
}
