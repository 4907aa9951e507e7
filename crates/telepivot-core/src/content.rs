//! Content trees
//!
//! The pivoted representation of device data: a tree whose nodes are
//! scalars, ordered field containers, or lists. Containers are reference
//! counted, so cloning a tree is cheap and editing one level only copies
//! that level (`Arc::make_mut`); everything below it stays shared.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A leaf value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Text
    Str(String),
    /// Signed integer (every integer that fits lands here)
    Int(i64),
    /// Unsigned integer above `i64::MAX`
    UInt(u64),
    /// Floating point
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Normalize an unsigned value: `Int` when it fits, `UInt` otherwise
    pub fn from_u64(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Self::Int(value),
            Err(_) => Self::UInt(value),
        }
    }

    /// Borrow the text of a `Str`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// JSON rendering; bytes become base64 text, non-finite floats null
    pub fn to_json(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::UInt(u) => Value::from(*u),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(b) => Value::Bool(*b),
            Self::Bytes(bytes) => Value::String(BASE64.encode(bytes)),
        }
    }

    /// Text used when a value is looked up in a string-keyed table
    pub fn lookup_key(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Str(s) => serializer.serialize_str(s),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::UInt(u) => serializer.serialize_u64(*u),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Bytes(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
        }
    }
}

/// Ordered name → value map with unique names and copy-on-write storage
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V> {
    entries: Arc<Vec<(String, V)>>,
}

/// A field container of a content tree; also used for pivoted keys
pub type Fields = OrderedMap<ContentTree>;

/// Record metadata
pub type Headers = OrderedMap<Scalar>;

impl<V> OrderedMap<V> {
    /// Empty map
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value stored under `name`
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Is `name` present?
    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Position of `name` in insertion order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// Entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Names in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// True when both maps share the same storage
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<V: Clone> OrderedMap<V> {
    /// Insert or overwrite in place; returns the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        let entries = Arc::make_mut(&mut self.entries);
        match entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((name, value));
                None
            }
        }
    }

    /// Insert at a position; the name must not be present yet
    pub fn insert_at(&mut self, index: usize, name: impl Into<String>, value: V) {
        let entries = Arc::make_mut(&mut self.entries);
        let index = index.min(entries.len());
        entries.insert(index, (name.into(), value));
    }

    /// Remove an entry, keeping the order of the others
    pub fn remove(&mut self, name: &str) -> Option<V> {
        let index = self.position(name)?;
        Some(Arc::make_mut(&mut self.entries).remove(index).1)
    }

    /// Rename an entry in place. Returns false when `old` is missing.
    pub fn rename(&mut self, old: &str, new: impl Into<String>) -> bool {
        let Some(index) = self.position(old) else {
            return false;
        };
        Arc::make_mut(&mut self.entries)[index].0 = new.into();
        true
    }

    /// Replace the value of an existing entry
    pub fn set(&mut self, name: &str, value: V) -> bool {
        let Some(index) = self.position(name) else {
            return false;
        };
        Arc::make_mut(&mut self.entries)[index].1 = value;
        true
    }
}

impl OrderedMap<ContentTree> {
    /// Insert following the repetition rule: a name seen before turns into a
    /// list holding the earlier value(s) followed by the new one. An existing
    /// list value is extended in place, never nested, so `[a, b]` merged with
    /// `c` gives `[a, b, c]`.
    pub fn merge_insert(&mut self, name: impl Into<String>, value: ContentTree) {
        let name = name.into();
        let entries = Arc::make_mut(&mut self.entries);
        match entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, ContentTree::List(list))) => list.push(value),
            Some((_, existing)) => {
                let prior = existing.clone();
                *existing = ContentTree::List(List::from(vec![prior, value]));
            }
            None => entries.push((name, value)),
        }
    }

    /// Merge every entry of `other` with [`Self::merge_insert`]
    pub fn merge_all(&mut self, other: &Fields) {
        for (name, value) in other.iter() {
            self.merge_insert(name, value.clone());
        }
    }

    /// JSON object rendering
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect(),
        )
    }
}

impl OrderedMap<Scalar> {
    /// JSON object rendering
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect(),
        )
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone, S: Into<String>> FromIterator<(S, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// An ordered sequence of content trees
#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    items: Arc<Vec<ContentTree>>,
}

impl List {
    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when there are no elements
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Elements in order
    pub fn iter(&self) -> impl Iterator<Item = &ContentTree> {
        self.items.iter()
    }

    /// Append an element
    pub fn push(&mut self, value: ContentTree) {
        Arc::make_mut(&mut self.items).push(value);
    }
}

impl From<Vec<ContentTree>> for List {
    fn from(items: Vec<ContentTree>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }
}

impl FromIterator<ContentTree> for List {
    fn from_iter<I: IntoIterator<Item = ContentTree>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

/// A node of pivoted content
#[derive(Debug, Clone, PartialEq)]
pub enum ContentTree {
    /// Leaf value
    Scalar(Scalar),
    /// Named children, names unique
    Field(Fields),
    /// Repeated siblings
    List(List),
}

impl ContentTree {
    /// An empty field container
    pub fn empty() -> Self {
        Self::Field(Fields::new())
    }

    /// True for `Field` and `List`
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::Scalar(_))
    }

    /// True for containers without children. Scalars are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::Field(fields) => fields.is_empty(),
            Self::List(list) => list.is_empty(),
        }
    }

    /// Borrow the field container
    pub fn as_fields(&self) -> Option<&Fields> {
        match self {
            Self::Field(fields) => Some(fields),
            _ => None,
        }
    }

    /// Borrow the list
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Borrow the scalar
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// JSON rendering
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(scalar) => scalar.to_json(),
            Self::Field(fields) => fields.to_json(),
            Self::List(list) => Value::Array(list.iter().map(Self::to_json).collect()),
        }
    }

    /// Build a tree from JSON. `null` has no counterpart: a top-level null
    /// gives `None` and nested nulls are left out.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Scalar(Scalar::Bool(*b))),
            Value::Number(n) => {
                let scalar = if let Some(i) = n.as_i64() {
                    Scalar::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Scalar::UInt(u)
                } else {
                    Scalar::Float(n.as_f64()?)
                };
                Some(Self::Scalar(scalar))
            }
            Value::String(s) => Some(Self::Scalar(Scalar::Str(s.clone()))),
            Value::Array(items) => Some(Self::List(items.iter().filter_map(Self::from_json).collect())),
            Value::Object(map) => Some(Self::Field(
                map.iter()
                    .filter_map(|(name, value)| Some((name.clone(), Self::from_json(value)?)))
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for ContentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<Scalar> for ContentTree {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<Fields> for ContentTree {
    fn from(value: Fields) -> Self {
        Self::Field(value)
    }
}

impl From<List> for ContentTree {
    fn from(value: List) -> Self {
        Self::List(value)
    }
}

impl Serialize for ContentTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(scalar) => scalar.serialize(serializer),
            Self::Field(fields) => fields.serialize(serializer),
            Self::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for item in list.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ContentTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).ok_or_else(|| D::Error::custom("null is not a content value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> ContentTree {
        ContentTree::from_json(&value).unwrap()
    }

    #[test]
    fn test_merge_insert_promotes_to_list() {
        let mut fields = Fields::new();
        fields.merge_insert("iface", Scalar::from("eth0").into());
        fields.merge_insert("iface", Scalar::from("eth1").into());
        fields.merge_insert("iface", Scalar::from("eth2").into());
        assert_eq!(
            ContentTree::Field(fields),
            tree(json!({"iface": ["eth0", "eth1", "eth2"]}))
        );
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut fields: Fields = [("b", tree(json!(1))), ("a", tree(json!(2)))]
            .into_iter()
            .collect();
        fields.insert("b", tree(json!(3)));
        fields.insert("c", tree(json!(4)));
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(fields.get("b"), Some(&tree(json!(3))));
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut fields = tree(json!({"a": 1, "b": 2, "c": 3})).as_fields().unwrap().clone();
        assert!(fields.rename("b", "z"));
        assert!(!fields.rename("missing", "y"));
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["a", "z", "c"]);
    }

    #[test]
    fn test_copy_on_write_shares_until_modified() {
        let original = tree(json!({"a": {"x": 1}, "b": 2})).as_fields().unwrap().clone();
        let mut copy = original.clone();
        assert!(copy.ptr_eq(&original));
        copy.insert("b", tree(json!(5)));
        assert!(!copy.ptr_eq(&original));
        assert_eq!(original.get("b"), Some(&tree(json!(2))));
        // the untouched child is still shared
        let (Some(ContentTree::Field(left)), Some(ContentTree::Field(right))) =
            (original.get("a"), copy.get("a"))
        else {
            panic!("expected field containers");
        };
        assert!(left.ptr_eq(right));
    }

    #[test]
    fn test_json_numbers_normalize() {
        assert_eq!(tree(json!(4096)), ContentTree::Scalar(Scalar::Int(4096)));
        assert_eq!(
            tree(json!(u64::MAX)),
            ContentTree::Scalar(Scalar::UInt(u64::MAX))
        );
        assert_eq!(tree(json!(1.5)), ContentTree::Scalar(Scalar::Float(1.5)));
        assert_eq!(Scalar::from_u64(7), Scalar::Int(7));
    }

    #[test]
    fn test_null_is_dropped() {
        assert!(ContentTree::from_json(&Value::Null).is_none());
        assert_eq!(tree(json!({"a": null, "b": 1})), tree(json!({"b": 1})));
    }

    #[test]
    fn test_serialize_matches_to_json() {
        let value = json!({"z": [1, {"y": "t"}], "a": true});
        let tree = tree(value.clone());
        assert_eq!(serde_json::to_value(&tree).unwrap(), value);
        assert_eq!(tree.to_json(), value);
        assert_eq!(tree.to_string(), r#"{"z":[1,{"y":"t"}],"a":true}"#);
    }

    #[test]
    fn test_bytes_render_as_base64() {
        let scalar = Scalar::Bytes(vec![1, 2, 3]);
        assert_eq!(scalar.to_json(), json!("AQID"));
    }

    #[test]
    fn test_lookup_key() {
        assert_eq!(Scalar::from("UP").lookup_key(), "UP");
        assert_eq!(Scalar::Int(2).lookup_key(), "2");
        assert_eq!(Scalar::Bool(true).lookup_key(), "true");
    }

    #[test]
    fn test_is_empty() {
        assert!(ContentTree::empty().is_empty());
        assert!(tree(json!([])).is_empty());
        assert!(!tree(json!(0)).is_empty());
        assert!(!tree(json!("")).is_empty());
    }
}
