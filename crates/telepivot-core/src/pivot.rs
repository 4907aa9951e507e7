//! EAV pivot
//!
//! Self-describing telemetry arrives as rows of generic `{ name, value,
//! fields[] }` nodes (the JSON rendering of the vendor's key/value protobuf).
//! Every row has a `keys` subtree and a `content` subtree. Pivoting turns
//! each subtree into a [`ContentTree`] where node names become field names.
//! Siblings sharing a name become a list, in arrival order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::content::{ContentTree, Fields, Headers, Scalar};
use crate::error::{Diagnostic, DiagnosticKind, TransformError};
use crate::metric::{
    COLLECTION_END_TIME, COLLECTION_ID, COLLECTION_START_TIME, ENCODING_PATH, MSG_TIMESTAMP,
    MetricRecord, NODE_ID, SUBSCRIPTION_ID, VENDOR,
};
use crate::pipeline::{MetricState, StepFailure, TransformationState};

/// Name given to nodes that arrive without one
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Name of the identity subtree of a row
pub const KEYS_FIELD: &str = "keys";

/// Name of the value subtree of a row
pub const CONTENT_FIELD: &str = "content";

/// Step name reported when a row cannot be pivoted
pub const PIVOT_STEP: &str = "pivot";

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText<T> {
    Number(T),
    Text(String),
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match Option::<NumberOrText<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(value)) => Ok(Some(value)),
        Some(NumberOrText::Text(text)) => text.trim().parse().map(Some).map_err(D::Error::custom),
    }
}

fn base64_bytes<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(text) => BASE64.decode(text).map(Some).map_err(D::Error::custom),
    }
}

fn row_timestamp<'de, D>(deserializer: D) -> Result<Option<Scalar>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<NumberOrText<u64>>::deserialize(deserializer)? {
            None => None,
            Some(NumberOrText::Number(value)) => Some(Scalar::from_u64(value)),
            Some(NumberOrText::Text(text)) => Some(
                text.parse::<u64>()
                    .map(Scalar::from_u64)
                    .unwrap_or(Scalar::Str(text)),
            ),
        },
    )
}

/// One generic node of a row
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawField {
    /// Node name; absent on some platforms
    #[serde(default)]
    pub name: Option<String>,
    /// Row timestamp (top-level nodes only)
    #[serde(default, deserialize_with = "row_timestamp")]
    pub timestamp: Option<Scalar>,
    /// Child nodes
    #[serde(default)]
    pub fields: Vec<RawField>,
    /// Raw bytes, base64 in JSON
    #[serde(default, deserialize_with = "base64_bytes")]
    pub bytes_value: Option<Vec<u8>>,
    /// Text
    #[serde(default)]
    pub string_value: Option<String>,
    /// Boolean
    #[serde(default)]
    pub bool_value: Option<bool>,
    /// Unsigned 32-bit
    #[serde(default, deserialize_with = "lenient")]
    pub uint32_value: Option<u32>,
    /// Unsigned 64-bit
    #[serde(default, deserialize_with = "lenient")]
    pub uint64_value: Option<u64>,
    /// Signed 32-bit
    #[serde(default, deserialize_with = "lenient")]
    pub sint32_value: Option<i32>,
    /// Signed 64-bit
    #[serde(default, deserialize_with = "lenient")]
    pub sint64_value: Option<i64>,
    /// Double precision
    #[serde(default, deserialize_with = "lenient")]
    pub double_value: Option<f64>,
    /// Single precision
    #[serde(default, deserialize_with = "lenient")]
    pub float_value: Option<f32>,
}

impl RawField {
    /// A named container node
    pub fn container(name: &str, fields: Vec<RawField>) -> Self {
        Self {
            name: Some(name.to_string()),
            fields,
            ..Default::default()
        }
    }

    /// A named text leaf
    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            string_value: Some(value.to_string()),
            ..Default::default()
        }
    }

    /// A named unsigned leaf
    pub fn uint(name: &str, value: u64) -> Self {
        Self {
            name: Some(name.to_string()),
            uint64_value: Some(value),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&RawField> {
        self.fields
            .iter()
            .find(|field| field.name.as_deref() == Some(name))
    }
}

/// Pivot options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotOptions {
    /// Render 64-bit integers as text, for sinks that lose precision
    #[serde(default)]
    pub int64_as_string: bool,
}

/// The two subtrees of one pivoted row
#[derive(Debug, Clone, PartialEq)]
pub struct PivotedRow {
    /// Row timestamp, if the row carried one
    pub timestamp: Option<Scalar>,
    /// Identity fields
    pub keys: Fields,
    /// Values
    pub content: ContentTree,
}

/// A collection message: headers plus pivotable rows
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TelemetryMessage {
    /// Originating node
    #[serde(default, alias = "node_id_str")]
    pub node_id: Option<String>,
    /// Subscription the message belongs to
    #[serde(default, alias = "subscription_id_str")]
    pub subscription_id: Option<String>,
    /// Encoding path of every row
    #[serde(default)]
    pub encoding_path: String,
    /// Collection id
    #[serde(default, deserialize_with = "lenient")]
    pub collection_id: Option<u64>,
    /// Collection start
    #[serde(default, deserialize_with = "lenient")]
    pub collection_start_time: Option<u64>,
    /// Collection end
    #[serde(default, deserialize_with = "lenient")]
    pub collection_end_time: Option<u64>,
    /// Message timestamp
    #[serde(default, deserialize_with = "lenient")]
    pub msg_timestamp: Option<u64>,
    /// Vendor tag
    #[serde(default)]
    pub vendor: Option<String>,
    /// Rows
    #[serde(default)]
    pub data_gpbkv: Vec<RawField>,
}

impl TelemetryMessage {
    /// Headers shared by every record of this message
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(node) = &self.node_id {
            headers.insert(NODE_ID, Scalar::from(node.as_str()));
        }
        if let Some(subscription) = &self.subscription_id {
            headers.insert(SUBSCRIPTION_ID, Scalar::from(subscription.as_str()));
        }
        headers.insert(ENCODING_PATH, Scalar::from(self.encoding_path.as_str()));
        let numbers = [
            (COLLECTION_ID, self.collection_id),
            (COLLECTION_START_TIME, self.collection_start_time),
            (COLLECTION_END_TIME, self.collection_end_time),
            (MSG_TIMESTAMP, self.msg_timestamp),
        ];
        for (name, value) in numbers {
            if let Some(value) = value {
                headers.insert(name, Scalar::from_u64(value));
            }
        }
        if let Some(vendor) = &self.vendor {
            headers.insert(VENDOR, Scalar::from(vendor.as_str()));
        }
        headers
    }
}

/// Turns raw rows into content trees
#[derive(Debug, Clone, Default)]
pub struct Pivot {
    options: PivotOptions,
}

impl Pivot {
    /// Create a pivot
    pub fn new(options: PivotOptions) -> Self {
        Self { options }
    }

    /// Pivot one row. Rows without a `keys` or a `content` child are
    /// malformed.
    pub fn pivot_row(
        &self,
        row: &RawField,
        warnings: &mut Vec<Diagnostic>,
    ) -> Result<PivotedRow, TransformError> {
        let keys = row
            .child(KEYS_FIELD)
            .ok_or_else(|| TransformError::malformed("row has no 'keys' field"))?;
        let content = row
            .child(CONTENT_FIELD)
            .ok_or_else(|| TransformError::malformed("row has no 'content' field"))?;

        let keys = match self.convert(keys, warnings) {
            ContentTree::Field(fields) => fields,
            other => [(UNKNOWN_FIELD, other)].into_iter().collect(),
        };
        let content = self.convert(content, warnings);
        Ok(PivotedRow {
            timestamp: row.timestamp.clone(),
            keys,
            content,
        })
    }

    /// Pivot every row of a message into records. Rows that cannot be
    /// pivoted become error states without a last good record.
    pub fn pivot_message(&self, message: &TelemetryMessage) -> TransformationState {
        let headers = message.headers();
        let mut state = TransformationState::default();
        for row in &message.data_gpbkv {
            let mut warnings = Vec::new();
            match self.pivot_row(row, &mut warnings) {
                Ok(pivoted) => {
                    let mut row_headers = headers.clone();
                    if let Some(timestamp) = pivoted.timestamp {
                        row_headers.insert(MSG_TIMESTAMP, timestamp);
                    }
                    let metric = MetricRecord::new(&message.encoding_path, pivoted.content)
                        .with_keys(pivoted.keys)
                        .with_headers(row_headers);
                    state.warnings.extend(warnings.iter().cloned());
                    state.states.push(MetricState::Ok { metric, warnings });
                }
                Err(error) => {
                    debug!(path = %message.encoding_path, %error, "row not pivoted");
                    state.warnings.extend(warnings.iter().cloned());
                    state.states.push(MetricState::Error {
                        failure: StepFailure {
                            step: PIVOT_STEP.to_string(),
                            error,
                        },
                        warnings,
                        last_good: None,
                    });
                }
            }
        }
        state
    }

    fn convert(&self, node: &RawField, warnings: &mut Vec<Diagnostic>) -> ContentTree {
        let mut fields = Fields::new();
        for child in &node.fields {
            let name = match &child.name {
                Some(name) => name.clone(),
                None => {
                    warnings.push(Diagnostic::new(
                        DiagnosticKind::UnknownField,
                        "field without a name",
                    ));
                    UNKNOWN_FIELD.to_string()
                }
            };
            let value = if child.fields.is_empty() {
                match self.value(child) {
                    Some(value) => ContentTree::Scalar(value),
                    None => {
                        warnings.push(
                            Diagnostic::new(DiagnosticKind::EmptyValue, "leaf without a value")
                                .with("name", &name),
                        );
                        continue;
                    }
                }
            } else {
                self.convert(child, warnings)
            };
            fields.merge_insert(name, value);
        }
        if fields.len() == 1
            && let Some(only) = fields.get(UNKNOWN_FIELD)
        {
            return only.clone();
        }
        ContentTree::Field(fields)
    }

    fn value(&self, field: &RawField) -> Option<Scalar> {
        let wide = |value: Scalar| match (self.options.int64_as_string, value) {
            (true, Scalar::Int(i)) => Scalar::Str(i.to_string()),
            (true, Scalar::UInt(u)) => Scalar::Str(u.to_string()),
            (_, value) => value,
        };
        if let Some(bytes) = &field.bytes_value {
            return Some(Scalar::Bytes(bytes.clone()));
        }
        if let Some(text) = &field.string_value {
            return Some(Scalar::Str(text.clone()));
        }
        if let Some(flag) = field.bool_value {
            return Some(Scalar::Bool(flag));
        }
        if let Some(value) = field.uint32_value {
            return Some(Scalar::Int(i64::from(value)));
        }
        if let Some(value) = field.uint64_value {
            return Some(wide(Scalar::from_u64(value)));
        }
        if let Some(value) = field.sint32_value {
            return Some(Scalar::Int(i64::from(value)));
        }
        if let Some(value) = field.sint64_value {
            return Some(wide(Scalar::Int(value)));
        }
        if let Some(value) = field.double_value {
            return Some(Scalar::Float(value));
        }
        field.float_value.map(|value| Scalar::Float(f64::from(value)))
    }
}
