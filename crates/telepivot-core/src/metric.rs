//! Metric records
//!
//! A [`MetricRecord`] is one pivoted, possibly partially flattened, metric:
//! where it sits in the device model (its encoding path), the fields that
//! identify it (keys), its values (content) and collection metadata
//! (headers). Records are immutable. The `with_*` methods build a new record
//! and share every part they do not touch.

use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::content::{ContentTree, Fields, Headers, Scalar};

/// Header carrying the originating node id
pub const NODE_ID: &str = "node_id";
/// Header carrying the subscription id
pub const SUBSCRIPTION_ID: &str = "subscription_id";
/// Header carrying the encoding path the record was collected from
pub const ENCODING_PATH: &str = "encoding_path";
/// Header carrying the collection id
pub const COLLECTION_ID: &str = "collection_id";
/// Header carrying the collection start timestamp
pub const COLLECTION_START_TIME: &str = "collection_start_time";
/// Header carrying the collection end timestamp
pub const COLLECTION_END_TIME: &str = "collection_end_time";
/// Header carrying the message (or row) timestamp
pub const MSG_TIMESTAMP: &str = "msg_timestamp";
/// Header carrying the vendor tag
pub const VENDOR: &str = "vendor";

/// Name used when non-field content is projected into a flat object
pub const CONTENT_KEY: &str = "content";

/// Join an encoding path with a child name
///
/// ```
/// use telepivot_core::metric::form_encoding_path;
///
/// assert_eq!(form_encoding_path("a/b", "c"), "a/b/c");
/// assert_eq!(form_encoding_path("a/b/", "c"), "a/b/c");
/// assert_eq!(form_encoding_path("", "c"), "c");
/// ```
pub fn form_encoding_path(base: &str, name: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    if base.is_empty() {
        return name.to_string();
    }
    format!("{base}/{name}")
}

/// One metric flowing through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    path: Arc<str>,
    keys: Fields,
    content: ContentTree,
    headers: Headers,
}

impl MetricRecord {
    /// Create a record with empty keys and headers
    pub fn new(path: impl AsRef<str>, content: ContentTree) -> Self {
        Self {
            path: Arc::from(path.as_ref()),
            keys: Fields::new(),
            content,
            headers: Headers::new(),
        }
    }

    /// Encoding path: the coordinate system of all path configuration
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identity fields
    pub fn keys(&self) -> &Fields {
        &self.keys
    }

    /// Values
    pub fn content(&self) -> &ContentTree {
        &self.content
    }

    /// Metadata
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Same record under another encoding path
    pub fn with_path(&self, path: impl AsRef<str>) -> Self {
        Self {
            path: Arc::from(path.as_ref()),
            ..self.clone()
        }
    }

    /// Same record with other keys
    pub fn with_keys(&self, keys: Fields) -> Self {
        Self {
            keys,
            ..self.clone()
        }
    }

    /// Same record with other content
    pub fn with_content(&self, content: ContentTree) -> Self {
        Self {
            content,
            ..self.clone()
        }
    }

    /// Same record with other headers
    pub fn with_headers(&self, headers: Headers) -> Self {
        Self {
            headers,
            ..self.clone()
        }
    }

    /// Header lookup
    pub fn header(&self, name: &str) -> Option<&Scalar> {
        self.headers.get(name)
    }

    /// Originating node
    pub fn node_id(&self) -> Option<&Scalar> {
        self.header(NODE_ID)
    }

    /// Message timestamp, falling back to the collection start time
    pub fn msg_timestamp(&self) -> Option<&Scalar> {
        self.header(MSG_TIMESTAMP)
            .or_else(|| self.header(COLLECTION_START_TIME))
    }

    /// Exporter projection: content, then keys, then headers merged into a
    /// single object. Later groups win on name clashes.
    pub fn to_flat_json(&self) -> Value {
        let mut flat = Map::new();
        match &self.content {
            ContentTree::Field(fields) => {
                for (name, value) in fields.iter() {
                    flat.insert(name.to_string(), value.to_json());
                }
            }
            other => {
                flat.insert(CONTENT_KEY.to_string(), other.to_json());
            }
        }
        for (name, value) in self.keys.iter() {
            flat.insert(name.to_string(), value.to_json());
        }
        for (name, value) in self.headers.iter() {
            flat.insert(name.to_string(), value.to_json());
        }
        Value::Object(flat)
    }
}

impl Serialize for MetricRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("MetricRecord", 4)?;
        record.serialize_field("encoding_path", &*self.path)?;
        record.serialize_field("keys", &self.keys)?;
        record.serialize_field("content", &self.content)?;
        record.serialize_field("headers", &self.headers)?;
        record.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> ContentTree {
        ContentTree::from_json(&value).unwrap()
    }

    fn record() -> MetricRecord {
        let headers: Headers = [
            (NODE_ID, Scalar::from("router-1")),
            (COLLECTION_START_TIME, Scalar::Int(100)),
        ]
        .into_iter()
        .collect();
        MetricRecord::new("model:interfaces/interface", tree(json!({"mtu": 1500})))
            .with_keys(tree(json!({"name": "eth0"})).as_fields().unwrap().clone())
            .with_headers(headers)
    }

    #[test]
    fn test_with_content_leaves_original_untouched() {
        let original = record();
        let changed = original.with_content(tree(json!({"mtu": 9000})));
        assert_eq!(original.content(), &tree(json!({"mtu": 1500})));
        assert_eq!(changed.content(), &tree(json!({"mtu": 9000})));
        assert!(changed.keys().ptr_eq(original.keys()));
        assert!(changed.headers().ptr_eq(original.headers()));
        assert_eq!(changed.path(), original.path());
    }

    #[test]
    fn test_msg_timestamp_falls_back_to_collection_start() {
        let record = record();
        assert_eq!(record.msg_timestamp(), Some(&Scalar::Int(100)));
        let mut headers = record.headers().clone();
        headers.insert(MSG_TIMESTAMP, Scalar::Int(150));
        assert_eq!(
            record.with_headers(headers).msg_timestamp(),
            Some(&Scalar::Int(150))
        );
    }

    #[test]
    fn test_flat_projection_orders_content_keys_headers() {
        let flat = record().to_flat_json();
        let names: Vec<_> = flat.as_object().unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["mtu", "name", NODE_ID, COLLECTION_START_TIME]);
        assert_eq!(flat["name"], "eth0");
    }

    #[test]
    fn test_flat_projection_wraps_non_field_content() {
        let flat = record().with_content(tree(json!([1, 2]))).to_flat_json();
        assert_eq!(flat[CONTENT_KEY], json!([1, 2]));
    }

    #[test]
    fn test_serialize_record() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["encoding_path"], "model:interfaces/interface");
        assert_eq!(value["keys"], json!({"name": "eth0"}));
        assert_eq!(value["content"], json!({"mtu": 1500}));
        assert_eq!(value["headers"][NODE_ID], "router-1");
    }
}
