//! Whole-record transformations: keys, headers and record shape

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{ContentTree, Fields};
use crate::engine::find_flatten_name;
use crate::error::{Diagnostic, DiagnosticKind, Result, StepError, TransformError};
use crate::metric::{MSG_TIMESTAMP, MetricRecord, NODE_ID};
use crate::path_index::PathIndex;
use crate::registry::{Registry, TransformationDoc, parse_config};
use crate::transformation::{Output, Transformation};

/// Parameters of steps that take none
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoConfig {}

fn no_config(kind: &str, config: Value) -> Result<()> {
    parse_config::<NoConfig>(kind, config).map(|_| ())
}

fn empty_config() -> Result<Value> {
    Ok(serde_json::to_value(NoConfig {})?)
}

/// Identity step
#[derive(Debug, Clone, Copy, Default)]
pub struct Equal;

impl Equal {
    /// Registry key
    pub const KIND: &'static str = "equal";

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        no_config(Self::KIND, config)?;
        Ok(Box::new(Self))
    }
}

impl Transformation for Equal {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        Ok(Output::one(metric.clone()))
    }

    fn to_config(&self) -> Result<Value> {
        empty_config()
    }
}

/// Parameters of [`FilterMetric`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterMetricConfig {
    /// Encoding paths whose records are dropped
    pub path_list: Vec<String>,
}

/// Drop records by encoding path
#[derive(Debug, Clone)]
pub struct FilterMetric {
    paths: PathIndex,
}

impl FilterMetric {
    /// Registry key
    pub const KIND: &'static str = "filter_metric";

    /// Drop records at `paths`
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: PathIndex::from_paths(paths),
        }
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        let config: FilterMetricConfig = parse_config(Self::KIND, config)?;
        Ok(Box::new(Self::new(config.path_list)))
    }
}

impl Transformation for FilterMetric {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        if self.paths.contains(metric.path()) {
            return Ok(Output::none());
        }
        Ok(Output::one(metric.clone()))
    }

    fn to_config(&self) -> Result<Value> {
        let config = FilterMetricConfig {
            path_list: self.paths.paths().map(str::to_string).collect(),
        };
        Ok(serde_json::to_value(config)?)
    }
}

/// How one key is renamed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyRename {
    /// New name for the key
    Name(String),
    /// New names for the elements of a repeated key, by position. Positions
    /// without an entry keep the old name.
    ByPosition(BTreeMap<String, String>),
}

/// Parameters of [`RenameKeys`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameKeysConfig {
    /// Encoding path → key → rename
    pub path_info: BTreeMap<String, BTreeMap<String, KeyRename>>,
}

/// Rename record keys, per encoding path
#[derive(Debug, Clone)]
pub struct RenameKeys {
    config: RenameKeysConfig,
}

impl RenameKeys {
    /// Registry key
    pub const KIND: &'static str = "rename_keys";

    /// Build from parameters
    pub fn new(config: RenameKeysConfig) -> Self {
        Self { config }
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        Ok(Box::new(Self::new(parse_config(Self::KIND, config)?)))
    }
}

impl Transformation for RenameKeys {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        let Some(renames) = self.config.path_info.get(metric.path()) else {
            return Ok(Output::one(metric.clone()));
        };
        let mut keys = Fields::new();
        for (key, value) in metric.keys().iter() {
            match renames.get(key) {
                None => keys.merge_insert(key, value.clone()),
                Some(KeyRename::Name(name)) => keys.merge_insert(name.clone(), value.clone()),
                Some(KeyRename::ByPosition(names)) => {
                    let ContentTree::List(items) = value else {
                        return Err(TransformError::KeyTypeMismatch {
                            path: metric.path().to_string(),
                            key: key.to_string(),
                            message: "positional renames need a repeated key".to_string(),
                        }
                        .into());
                    };
                    for (position, item) in items.iter().enumerate() {
                        let name = names
                            .get(&position.to_string())
                            .map(String::as_str)
                            .unwrap_or(key);
                        keys.merge_insert(name, item.clone());
                    }
                }
            }
        }
        Ok(Output::one(metric.with_keys(keys)))
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.config)?)
    }
}

/// Merge keys, timestamp, node id and content into a single flat content
/// level, in that order. Repeated keys contribute one field per value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlattenHeaders;

impl FlattenHeaders {
    /// Registry key
    pub const KIND: &'static str = "flatten_headers";

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        no_config(Self::KIND, config)?;
        Ok(Box::new(Self))
    }
}

fn add_field(
    fields: &mut Fields,
    name: &str,
    value: ContentTree,
    path: &str,
    warnings: &mut Vec<Diagnostic>,
) -> std::result::Result<(), TransformError> {
    let name = find_flatten_name(fields, None, name, path, warnings)?;
    fields.insert(name, value);
    Ok(())
}

impl Transformation for FlattenHeaders {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        let path = metric.path();
        let ContentTree::Field(content) = metric.content() else {
            return Err(TransformError::ContentNotAField {
                path: path.to_string(),
            }
            .into());
        };

        let mut warnings = Vec::new();
        let mut flat = Fields::new();
        for (key, value) in metric.keys().iter() {
            if let ContentTree::List(items) = value {
                for item in items.iter() {
                    add_field(&mut flat, key, item.clone(), path, &mut warnings)?;
                }
                warnings.push(
                    Diagnostic::new(DiagnosticKind::KeysWithDoubleName, "repeated key flattened")
                        .with("key", key)
                        .with("path", path),
                );
            } else {
                add_field(&mut flat, key, value.clone(), path, &mut warnings)?;
            }
        }
        if let Some(timestamp) = metric.msg_timestamp() {
            add_field(&mut flat, MSG_TIMESTAMP, timestamp.clone().into(), path, &mut warnings)?;
        }
        if let Some(node) = metric.node_id() {
            add_field(&mut flat, NODE_ID, node.clone().into(), path, &mut warnings)?;
        }
        for (name, value) in content.iter() {
            add_field(&mut flat, name, value.clone(), path, &mut warnings)?;
        }

        Ok(Output {
            metrics: vec![metric.with_content(ContentTree::Field(flat))],
            warnings,
        })
    }

    fn to_config(&self) -> Result<Value> {
        empty_config()
    }
}

/// Pass records through with a warning attached
#[derive(Debug, Clone, Copy, Default)]
pub struct Dummy;

impl Dummy {
    /// Registry key
    pub const KIND: &'static str = "dummy";

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        no_config(Self::KIND, config)?;
        Ok(Box::new(Self))
    }
}

impl Transformation for Dummy {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        Ok(Output::one(metric.clone())
            .warn(Diagnostic::new(DiagnosticKind::Dummy, "dummy warning").with("path", metric.path())))
    }

    fn to_config(&self) -> Result<Value> {
        empty_config()
    }
}

/// Make record content a field container: list content becomes one record
/// per element, recursively
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveContentHierarchies;

impl RemoveContentHierarchies {
    /// Registry key
    pub const KIND: &'static str = "remove_content_hierarchies";

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        no_config(Self::KIND, config)?;
        Ok(Box::new(Self))
    }

    fn unnest(metric: MetricRecord, output: &mut Output) {
        match metric.content() {
            ContentTree::Field(_) => output.metrics.push(metric),
            ContentTree::List(items) => {
                for item in items.iter() {
                    Self::unnest(metric.with_content(item.clone()), output);
                }
            }
            ContentTree::Scalar(_) => {
                output.warnings.push(
                    Diagnostic::new(
                        DiagnosticKind::NonHierarchicalContent,
                        "content is neither a field container nor a list",
                    )
                    .with("path", metric.path()),
                );
                output.metrics.push(metric);
            }
        }
    }
}

impl Transformation for RemoveContentHierarchies {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        let mut output = Output::none();
        Self::unnest(metric.clone(), &mut output);
        Ok(output)
    }

    fn to_config(&self) -> Result<Value> {
        empty_config()
    }
}

/// Parameters of [`PerPath`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerPathConfig {
    /// Encoding path → step
    pub transformation_per_path: BTreeMap<String, TransformationDoc>,
    /// Step for every other path; records pass unchanged without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<TransformationDoc>,
}

/// Dispatch on the record's encoding path
#[derive(Debug)]
pub struct PerPath {
    steps: BTreeMap<String, Box<dyn Transformation>>,
    default: Option<Box<dyn Transformation>>,
}

impl PerPath {
    /// Registry key
    pub const KIND: &'static str = "transformation_per_path";

    /// Build from path → step pairs
    pub fn new(
        steps: BTreeMap<String, Box<dyn Transformation>>,
        default: Option<Box<dyn Transformation>>,
    ) -> Self {
        Self { steps, default }
    }

    /// Registry constructor
    pub fn from_config(registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        let config: PerPathConfig = parse_config(Self::KIND, config)?;
        let steps = config
            .transformation_per_path
            .iter()
            .map(|(path, doc)| Ok((path.clone(), registry.load(doc)?)))
            .collect::<Result<_>>()?;
        let default = config
            .default
            .as_ref()
            .map(|doc| registry.load(doc))
            .transpose()?;
        Ok(Box::new(Self::new(steps, default)))
    }
}

impl Transformation for PerPath {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        match self.steps.get(metric.path()).or(self.default.as_ref()) {
            Some(step) => step
                .transform(metric)
                .map_err(|err| err.nested(step.name(), Vec::new())),
            None => Ok(Output::one(metric.clone())),
        }
    }

    fn to_config(&self) -> Result<Value> {
        let config = PerPathConfig {
            transformation_per_path: self
                .steps
                .iter()
                .map(|(path, step)| Ok((path.clone(), TransformationDoc::from_step(step.as_ref())?)))
                .collect::<Result<_>>()?,
            default: self
                .default
                .as_ref()
                .map(|step| TransformationDoc::from_step(step.as_ref()))
                .transpose()?,
        };
        Ok(serde_json::to_value(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Headers, Scalar};
    use crate::metric::COLLECTION_START_TIME;
    use serde_json::json;

    fn tree(value: Value) -> ContentTree {
        ContentTree::from_json(&value).unwrap()
    }

    fn fields(value: Value) -> Fields {
        tree(value).as_fields().unwrap().clone()
    }

    fn metric(path: &str, keys: Value, content: Value) -> MetricRecord {
        MetricRecord::new(path, tree(content)).with_keys(fields(keys))
    }

    #[test]
    fn test_filter_metric() {
        let step = FilterMetric::new(["drop/me"]);
        assert!(step.transform(&metric("drop/me", json!({}), json!({}))).unwrap().metrics.is_empty());
        assert_eq!(
            step.transform(&metric("keep", json!({}), json!({}))).unwrap().metrics.len(),
            1
        );
    }

    #[test]
    fn test_rename_keys() {
        let step = RenameKeys::new(
            serde_json::from_value(json!({"path_info": {"p": {
                "name": "interface",
                "ids": {"0": "first", "1": "second"}
            }}}))
            .unwrap(),
        );
        let out = step
            .transform(&metric("p", json!({"name": "e0", "ids": [1, 2, 3]}), json!({})))
            .unwrap();
        assert_eq!(
            out.metrics[0].keys(),
            &fields(json!({"interface": "e0", "first": 1, "second": 2, "ids": 3}))
        );
    }

    #[test]
    fn test_rename_keys_other_path_untouched() {
        let step = RenameKeys::new(
            serde_json::from_value(json!({"path_info": {"p": {"name": "x"}}})).unwrap(),
        );
        let input = metric("q", json!({"name": "e0"}), json!({}));
        assert_eq!(step.transform(&input).unwrap().metrics, vec![input]);
    }

    #[test]
    fn test_rename_keys_positional_on_scalar_fails() {
        let step = RenameKeys::new(
            serde_json::from_value(json!({"path_info": {"p": {"ids": {"0": "first"}}}})).unwrap(),
        );
        let err = step
            .transform(&metric("p", json!({"ids": 1}), json!({})))
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Record(TransformError::KeyTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_flatten_headers() {
        let headers: Headers = [
            (NODE_ID, Scalar::from("r1")),
            (COLLECTION_START_TIME, Scalar::Int(10)),
        ]
        .into_iter()
        .collect();
        let input = metric("p", json!({"name": ["a", "b"]}), json!({"mtu": 1, "name": "c"}))
            .with_headers(headers);
        let out = FlattenHeaders.transform(&input).unwrap();
        assert_eq!(
            out.metrics[0].content(),
            &tree(json!({
                "name": "a",
                "name_0": "b",
                MSG_TIMESTAMP: 10,
                NODE_ID: "r1",
                "mtu": 1,
                "name_1": "c"
            }))
        );
        let kinds: Vec<_> = out.warnings.iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&DiagnosticKind::KeysWithDoubleName));
        assert!(kinds.contains(&DiagnosticKind::ExistingNameInFlattening));
    }

    #[test]
    fn test_flatten_headers_needs_field_content() {
        let err = FlattenHeaders
            .transform(&metric("p", json!({}), json!([1])))
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Record(TransformError::ContentNotAField { .. })
        ));
    }

    #[test]
    fn test_remove_content_hierarchies() {
        let out = RemoveContentHierarchies
            .transform(&metric("p", json!({}), json!([{"a": 1}, [{"b": 2}, {"c": 3}]])))
            .unwrap();
        let contents: Vec<_> = out.metrics.iter().map(|m| m.content().clone()).collect();
        assert_eq!(
            contents,
            vec![tree(json!({"a": 1})), tree(json!({"b": 2})), tree(json!({"c": 3}))]
        );
        assert!(out.warnings.is_empty());

        let out = RemoveContentHierarchies
            .transform(&metric("p", json!({}), json!(5)))
            .unwrap();
        assert_eq!(out.metrics.len(), 1);
        assert_eq!(out.warnings[0].kind, DiagnosticKind::NonHierarchicalContent);
    }

    #[test]
    fn test_dummy_warns() {
        let out = Dummy.transform(&metric("p", json!({}), json!({}))).unwrap();
        assert_eq!(out.metrics.len(), 1);
        assert_eq!(out.warnings[0].kind, DiagnosticKind::Dummy);
    }

    #[test]
    fn test_per_path_dispatch() {
        let mut steps: BTreeMap<String, Box<dyn Transformation>> = BTreeMap::new();
        steps.insert("drop".into(), Box::new(FilterMetric::new(["drop"])));
        let step = PerPath::new(steps, Some(Box::new(Dummy)));
        assert!(step.transform(&metric("drop", json!({}), json!({}))).unwrap().metrics.is_empty());
        let out = step.transform(&metric("other", json!({}), json!({}))).unwrap();
        assert_eq!(out.warnings.len(), 1);

        let plain = PerPath::new(BTreeMap::new(), None);
        let input = metric("other", json!({}), json!({}));
        assert_eq!(plain.transform(&input).unwrap(), Output::one(input));
    }

    #[test]
    fn test_per_path_failure_names_dispatched_step() {
        let rename = RenameKeys::new(
            serde_json::from_value(json!({"path_info": {"p": {"ids": {"0": "first"}}}})).unwrap(),
        );
        let mut steps: BTreeMap<String, Box<dyn Transformation>> = BTreeMap::new();
        steps.insert("p".into(), Box::new(rename));
        let step = PerPath::new(steps, None);
        let err = step
            .transform(&metric("p", json!({"ids": 1}), json!({})))
            .unwrap_err();
        let StepError::Record(TransformError::Nested { step, error, .. }) = err else {
            panic!("expected a nested record error");
        };
        assert_eq!(step, "rename_keys");
        assert!(matches!(*error, TransformError::KeyTypeMismatch { .. }));
    }
}
