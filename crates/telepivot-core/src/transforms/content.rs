//! Content transformations: 1-to-1 rewrites of a record's content tree

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::{ContentTree, Fields, List, Scalar};
use crate::engine::{
    ContentTransformation, MatchState, Matched, find_flatten_name, group_by_child,
    transform_content,
};
use crate::error::{
    Diagnostic, DiagnosticKind, Error, InvariantViolation, Result, StepError, TransformError,
};
use crate::metric::MetricRecord;
use crate::path_index::PathIndex;
use crate::registry::{Registry, TransformationDoc, parse_config};
use crate::transformation::{Output, Transformation};
use crate::transforms::selector::{ContentSelector, FieldKinds, SelectorConfig};

/// Stringify matched values. Strings are left alone, everything else becomes
/// its compact JSON text.
#[derive(Debug, Clone)]
pub struct FieldToString {
    selector: ContentSelector,
}

impl FieldToString {
    /// Registry key
    pub const KIND: &'static str = "field_to_string";

    /// Build from selection parameters
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            selector: ContentSelector::new(config),
        }
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        Ok(Box::new(Self::new(parse_config(Self::KIND, config)?)))
    }
}

impl ContentTransformation for FieldToString {
    fn has_node(&self, path: &str) -> bool {
        self.selector.has_node(path)
    }

    fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState> {
        self.selector.decide(path, name, value)
    }

    fn apply(
        &self,
        _path: &str,
        mut fields: Fields,
        matched: &[Matched],
        _warnings: &mut Vec<Diagnostic>,
    ) -> std::result::Result<Fields, TransformError> {
        for m in matched {
            let Some(value) = fields.get(&m.name) else {
                continue;
            };
            if matches!(value, ContentTree::Scalar(Scalar::Str(_))) {
                continue;
            }
            let text = value.to_string();
            fields.set(&m.name, Scalar::Str(text).into());
        }
        Ok(fields)
    }
}

impl Transformation for FieldToString {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        transform_content(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.selector.config())?)
    }

    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        Some(self)
    }
}

/// Parameters of [`FlattenHierarchies`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlattenConfig {
    /// Encoding paths of the containers to flatten
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_list: Vec<String>,
    /// Container kinds flattened everywhere. Defaults to both kinds when no
    /// path is given.
    #[serde(default)]
    pub options: Option<FieldKinds>,
    /// Prefix flattened names with the container's name
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keep_naming: bool,
}

/// Pull the children of matched field containers up one level. Matched
/// lists are stringified instead.
#[derive(Debug, Clone)]
pub struct FlattenHierarchies {
    selector: ContentSelector,
    keep_naming: bool,
}

impl FlattenHierarchies {
    /// Registry key
    pub const KIND: &'static str = "flatten_hierarchies";

    /// Build from parameters
    pub fn new(config: FlattenConfig) -> Self {
        let options = match config.options {
            Some(options) => options,
            None if config.path_list.is_empty() => FieldKinds::HIERARCHIES,
            None => FieldKinds::default(),
        };
        Self {
            selector: ContentSelector::new(SelectorConfig {
                path_list: config.path_list,
                options,
                leaf_names: Vec::new(),
            }),
            keep_naming: config.keep_naming,
        }
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        Ok(Box::new(Self::new(parse_config(Self::KIND, config)?)))
    }
}

impl ContentTransformation for FlattenHierarchies {
    fn has_node(&self, path: &str) -> bool {
        self.selector.has_node(path)
    }

    fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState> {
        self.selector.decide(path, name, value)
    }

    fn apply(
        &self,
        path: &str,
        mut fields: Fields,
        matched: &[Matched],
        warnings: &mut Vec<Diagnostic>,
    ) -> std::result::Result<Fields, TransformError> {
        for m in matched {
            let Some(value) = fields.get(&m.name).cloned() else {
                continue;
            };
            let kpath = m.path(path);
            match value {
                ContentTree::Scalar(_) => warnings.push(
                    Diagnostic::new(
                        DiagnosticKind::InvalidFlatteningPath,
                        "flattening path points to a leaf",
                    )
                    .with("path", &kpath),
                ),
                ContentTree::List(_) => {
                    warnings.push(
                        Diagnostic::new(DiagnosticKind::FlattenedList, "list flattened to a string")
                            .with("path", &kpath),
                    );
                    fields.set(&m.name, Scalar::Str(value.to_string()).into());
                }
                ContentTree::Field(children) => {
                    let Some(mut at) = fields.position(&m.name) else {
                        continue;
                    };
                    fields.remove(&m.name);
                    let prefix = self.keep_naming.then_some(m.name.as_str());
                    for (child, child_value) in children.iter() {
                        let name = find_flatten_name(&fields, prefix, child, &kpath, warnings)?;
                        fields.insert_at(at, name, child_value.clone());
                        at += 1;
                    }
                }
            }
        }
        Ok(fields)
    }
}

impl Transformation for FlattenHierarchies {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        transform_content(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        let selection = self.selector.config();
        let config = FlattenConfig {
            path_list: selection.path_list.clone(),
            options: Some(selection.options),
            keep_naming: self.keep_naming,
        };
        Ok(serde_json::to_value(config)?)
    }

    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        Some(self)
    }
}

/// Parameters of [`RenameContent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameContentConfig {
    /// Path → new name; `null` drops the field
    pub path_info: Map<String, Value>,
}

/// Rename or drop fields by path
#[derive(Debug, Clone)]
pub struct RenameContent {
    renames: PathIndex<Option<String>>,
}

impl RenameContent {
    /// Registry key
    pub const KIND: &'static str = "rename_content";

    /// Build from path → new name pairs
    pub fn new<I, S>(renames: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<String>)>,
        S: Into<String>,
    {
        Self {
            renames: PathIndex::from_map(renames),
        }
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        let config: RenameContentConfig = parse_config(Self::KIND, config)?;
        let mut renames = Vec::with_capacity(config.path_info.len());
        for (path, target) in config.path_info {
            let target = match target {
                Value::Null => None,
                Value::String(name) => Some(name),
                other => {
                    return Err(Error::invalid_config(
                        Self::KIND,
                        format!("new name for '{path}' must be a string or null, got {other}"),
                    ));
                }
            };
            renames.push((path, target));
        }
        Ok(Box::new(Self::new(renames)))
    }
}

impl ContentTransformation for RenameContent {
    fn has_node(&self, path: &str) -> bool {
        self.renames.has_descendant(path)
    }

    fn decide(&self, path: &str, _name: &str, _value: &ContentTree) -> Option<MatchState> {
        self.renames
            .contains(path)
            .then(|| MatchState::Path(path.to_string()))
    }

    fn apply(
        &self,
        path: &str,
        mut fields: Fields,
        matched: &[Matched],
        warnings: &mut Vec<Diagnostic>,
    ) -> std::result::Result<Fields, TransformError> {
        for m in matched {
            let kpath = m.path(path);
            let Some(target) = self.renames.get(&kpath) else {
                continue;
            };
            match target {
                None => {
                    fields.remove(&m.name);
                }
                Some(new_name) if new_name == &m.name => {}
                Some(new_name) if fields.contains_key(new_name) => warnings.push(
                    Diagnostic::new(DiagnosticKind::ExistingName, "rename target already exists")
                        .with("path", &kpath)
                        .with("new_name", new_name),
                ),
                Some(new_name) => {
                    fields.rename(&m.name, new_name.clone());
                }
            }
        }
        Ok(fields)
    }
}

impl Transformation for RenameContent {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        transform_content(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        let path_info = self
            .renames
            .iter()
            .map(|(path, target)| {
                let target = target.clone().map(Value::String).unwrap_or(Value::Null);
                (path.to_string(), target)
            })
            .collect();
        Ok(serde_json::to_value(RenameContentConfig { path_info })?)
    }

    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        Some(self)
    }
}

/// Parameters of [`ValueMapper`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueMapperConfig {
    /// Encoding paths of mapped fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_list: Vec<String>,
    /// Container kinds mapped everywhere
    #[serde(default, skip_serializing_if = "FieldKinds::is_empty")]
    pub options: FieldKinds,
    /// Field names mapped everywhere
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaf_names: Vec<String>,
    /// Value → replacement, keyed by the value's text
    pub mapper: Map<String, Value>,
    /// Replacement for unmapped values; absent or `null` drops the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Replace matched values through a lookup table
#[derive(Debug, Clone)]
pub struct ValueMapper {
    selector: ContentSelector,
    mapper: Map<String, Value>,
    default: Option<Value>,
}

impl ValueMapper {
    /// Registry key
    pub const KIND: &'static str = "value_mapper";

    /// Build from parameters. An empty table is rejected.
    pub fn new(config: ValueMapperConfig) -> Result<Self> {
        if config.mapper.is_empty() {
            return Err(Error::invalid_config(Self::KIND, "mapper is empty"));
        }
        Ok(Self {
            selector: ContentSelector::new(SelectorConfig {
                path_list: config.path_list,
                options: config.options,
                leaf_names: config.leaf_names,
            }),
            mapper: config.mapper,
            default: config.default,
        })
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        Ok(Box::new(Self::new(parse_config(Self::KIND, config)?)?))
    }

    fn replacement(&self, value: &ContentTree) -> Option<ContentTree> {
        let mapped = value
            .as_scalar()
            .and_then(|scalar| self.mapper.get(&scalar.lookup_key()))
            .or(self.default.as_ref())?;
        ContentTree::from_json(mapped)
    }
}

impl ContentTransformation for ValueMapper {
    fn has_node(&self, path: &str) -> bool {
        self.selector.has_node(path)
    }

    fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState> {
        self.selector.decide(path, name, value)
    }

    fn apply(
        &self,
        _path: &str,
        mut fields: Fields,
        matched: &[Matched],
        _warnings: &mut Vec<Diagnostic>,
    ) -> std::result::Result<Fields, TransformError> {
        for m in matched {
            let Some(value) = fields.get(&m.name) else {
                continue;
            };
            match self.replacement(value) {
                Some(replacement) => {
                    fields.set(&m.name, replacement);
                }
                None => {
                    fields.remove(&m.name);
                }
            }
        }
        Ok(fields)
    }
}

impl Transformation for ValueMapper {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        transform_content(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        let selection = self.selector.config();
        let config = ValueMapperConfig {
            path_list: selection.path_list.clone(),
            options: selection.options,
            leaf_names: selection.leaf_names.clone(),
            mapper: self.mapper.clone(),
            default: self.default.clone(),
        };
        Ok(serde_json::to_value(config)?)
    }

    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        Some(self)
    }
}

/// Wrap matched non-list values in a one-element list
#[derive(Debug, Clone)]
pub struct ConvertToList {
    selector: ContentSelector,
}

impl ConvertToList {
    /// Registry key
    pub const KIND: &'static str = "convert_to_list";

    /// Build from selection parameters
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            selector: ContentSelector::new(config),
        }
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        Ok(Box::new(Self::new(parse_config(Self::KIND, config)?)))
    }
}

impl ContentTransformation for ConvertToList {
    fn has_node(&self, path: &str) -> bool {
        self.selector.has_node(path)
    }

    fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState> {
        self.selector.decide(path, name, value)
    }

    fn apply(
        &self,
        _path: &str,
        mut fields: Fields,
        matched: &[Matched],
        _warnings: &mut Vec<Diagnostic>,
    ) -> std::result::Result<Fields, TransformError> {
        for m in matched {
            let Some(value) = fields.get(&m.name) else {
                continue;
            };
            if matches!(value, ContentTree::List(_)) {
                continue;
            }
            let wrapped = ContentTree::List(List::from(vec![value.clone()]));
            fields.set(&m.name, wrapped);
        }
        Ok(fields)
    }
}

impl Transformation for ConvertToList {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        transform_content(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.selector.config())?)
    }

    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        Some(self)
    }
}

/// Convert matched values to integers
#[derive(Debug, Clone)]
pub struct ConvertToInt {
    selector: ContentSelector,
}

impl ConvertToInt {
    /// Registry key
    pub const KIND: &'static str = "convert_to_int";

    /// Build from selection parameters
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            selector: ContentSelector::new(config),
        }
    }

    /// Registry constructor
    pub fn from_config(_registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        Ok(Box::new(Self::new(parse_config(Self::KIND, config)?)))
    }
}

fn to_int(value: &ContentTree) -> Option<Scalar> {
    match value.as_scalar()? {
        Scalar::Int(i) => Some(Scalar::Int(*i)),
        Scalar::UInt(u) => Some(Scalar::UInt(*u)),
        Scalar::Bool(b) => Some(Scalar::Int(i64::from(*b))),
        Scalar::Float(f) if f.is_finite() && f.abs() < i64::MAX as f64 => {
            Some(Scalar::Int(f.trunc() as i64))
        }
        Scalar::Str(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Scalar::Int)
                .or_else(|_| s.parse::<u64>().map(Scalar::UInt))
                .ok()
        }
        _ => None,
    }
}

impl ContentTransformation for ConvertToInt {
    fn has_node(&self, path: &str) -> bool {
        self.selector.has_node(path)
    }

    fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState> {
        self.selector.decide(path, name, value)
    }

    fn apply(
        &self,
        path: &str,
        mut fields: Fields,
        matched: &[Matched],
        _warnings: &mut Vec<Diagnostic>,
    ) -> std::result::Result<Fields, TransformError> {
        for m in matched {
            let Some(value) = fields.get(&m.name) else {
                continue;
            };
            let converted = to_int(value).ok_or_else(|| TransformError::NotConvertible {
                path: m.path(path),
                value: value.to_string(),
                target: "int",
            })?;
            fields.set(&m.name, converted.into());
        }
        Ok(fields)
    }
}

impl Transformation for ConvertToInt {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        transform_content(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.selector.config())?)
    }

    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        Some(self)
    }
}

/// Parameters of the combined transformations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CombinedConfig {
    /// Children, in order
    pub transformations: Vec<TransformationDoc>,
}

/// Several content transformations applied in one walk. At every level the
/// children that matched run in their configured order.
#[derive(Debug)]
pub struct CombineContent {
    children: Vec<Box<dyn Transformation>>,
}

impl CombineContent {
    /// Registry key
    pub const KIND: &'static str = "combine_content";

    /// Combine content transformations
    pub fn new(children: Vec<Box<dyn Transformation>>) -> Result<Self> {
        if let Some(child) = children.iter().find(|child| child.as_content().is_none()) {
            return Err(Error::invalid_config(
                Self::KIND,
                format!("'{}' is not a content transformation", child.kind()),
            ));
        }
        Ok(Self { children })
    }

    /// Registry constructor
    pub fn from_config(registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        let config: CombinedConfig = parse_config(Self::KIND, config)?;
        Ok(Box::new(Self::new(registry.load_all(&config.transformations)?)?))
    }

    fn strategies(&self) -> impl Iterator<Item = (usize, &dyn ContentTransformation)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(n, child)| Some((n, child.as_content()?)))
    }
}

impl ContentTransformation for CombineContent {
    fn has_node(&self, path: &str) -> bool {
        self.strategies().any(|(_, child)| child.has_node(path))
    }

    fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState> {
        let states: Vec<_> = self
            .strategies()
            .filter_map(|(n, child)| Some((n, child.decide(path, name, value)?)))
            .collect();
        (!states.is_empty()).then_some(MatchState::Combined(states))
    }

    fn apply(
        &self,
        path: &str,
        mut fields: Fields,
        matched: &[Matched],
        warnings: &mut Vec<Diagnostic>,
    ) -> std::result::Result<Fields, TransformError> {
        for (n, group) in group_by_child(matched) {
            let Some(child) = self.children.get(n).and_then(|child| child.as_content()) else {
                continue;
            };
            fields = child.apply(path, fields, &group, warnings)?;
        }
        Ok(fields)
    }
}

impl Transformation for CombineContent {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        if let Some(child) = self.children.iter().find(|c| c.as_content().is_none()) {
            return Err(InvariantViolation::UnexpectedStrategy {
                step: child.name(),
                expected: "content",
            }
            .into());
        }
        transform_content(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        let config = CombinedConfig {
            transformations: self
                .children
                .iter()
                .map(|child| TransformationDoc::from_step(child.as_ref()))
                .collect::<Result<_>>()?,
        };
        Ok(serde_json::to_value(config)?)
    }

    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        Some(self)
    }
}
