//! Declarative transformation registry
//!
//! Every built-in step is registered under a string key. A configuration
//! document `{ "kind": <key>, "config": { ... } }` is turned into a live step
//! by looking the key up and handing `config` to the registered constructor;
//! a live step is dumped back to the same shape. Composite steps load their
//! children through the same registry.

use std::collections::BTreeMap;

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::transformation::Transformation;
use crate::transforms::content::{
    CombineContent, ConvertToInt, ConvertToList, FieldToString, FlattenHierarchies, RenameContent,
    ValueMapper,
};
use crate::transforms::metric::{
    Dummy, Equal, FilterMetric, FlattenHeaders, PerPath, RemoveContentHierarchies, RenameKeys,
};
use crate::transforms::split::{CombineSeries, ExtraKeys, SplitLists};

/// Builds a step from its `config` object
pub type Constructor = fn(&Registry, Value) -> Result<Box<dyn Transformation>>;

/// Serialized form of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformationDoc {
    /// Registry key
    pub kind: String,
    /// Constructor parameters
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(Map::new())
}

impl TransformationDoc {
    /// Document for a live step
    pub fn from_step(step: &dyn Transformation) -> Result<Self> {
        Ok(Self {
            kind: step.kind().to_string(),
            config: step.to_config()?,
        })
    }
}

/// Deserialize a constructor's parameters. `null` counts as no parameters.
pub fn parse_config<T: DeserializeOwned>(kind: &str, config: Value) -> Result<T> {
    let config = match config {
        Value::Null => empty_config(),
        other => other,
    };
    serde_json::from_value(config).map_err(|err| Error::invalid_config(kind, err))
}

/// Key → constructor table
#[derive(Debug, Default)]
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in step
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Equal::KIND, Equal::from_config)?;
        registry.register(FilterMetric::KIND, FilterMetric::from_config)?;
        registry.register(RenameKeys::KIND, RenameKeys::from_config)?;
        registry.register(FlattenHeaders::KIND, FlattenHeaders::from_config)?;
        registry.register(Dummy::KIND, Dummy::from_config)?;
        registry.register(
            RemoveContentHierarchies::KIND,
            RemoveContentHierarchies::from_config,
        )?;
        registry.register(FieldToString::KIND, FieldToString::from_config)?;
        registry.register(FlattenHierarchies::KIND, FlattenHierarchies::from_config)?;
        registry.register(RenameContent::KIND, RenameContent::from_config)?;
        registry.register(ValueMapper::KIND, ValueMapper::from_config)?;
        registry.register(ConvertToList::KIND, ConvertToList::from_config)?;
        registry.register(ConvertToInt::KIND, ConvertToInt::from_config)?;
        registry.register(CombineContent::KIND, CombineContent::from_config)?;
        registry.register(ExtraKeys::KIND, ExtraKeys::from_config)?;
        registry.register(SplitLists::KIND, SplitLists::from_config)?;
        registry.register(CombineSeries::KIND, CombineSeries::from_config)?;
        registry.register(Pipeline::KIND, Pipeline::from_config)?;
        registry.register(PerPath::KIND, PerPath::from_config)?;
        Ok(registry)
    }

    /// Register a constructor. Keys are unique.
    pub fn register(&mut self, kind: &str, constructor: Constructor) -> Result<()> {
        if self.constructors.contains_key(kind) {
            return Err(Error::DuplicateTransformationKey {
                kind: kind.to_string(),
            });
        }
        self.constructors.insert(kind.to_string(), constructor);
        Ok(())
    }

    /// Is `kind` registered?
    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered keys, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Build a step from its document
    pub fn load(&self, doc: &TransformationDoc) -> Result<Box<dyn Transformation>> {
        let constructor =
            self.constructors
                .get(&doc.kind)
                .ok_or_else(|| Error::UnknownTransformationKind {
                    kind: doc.kind.clone(),
                })?;
        constructor(self, doc.config.clone())
    }

    /// Build a step from an untyped document
    pub fn load_value(&self, value: Value) -> Result<Box<dyn Transformation>> {
        let doc: TransformationDoc = serde_json::from_value(value).map_err(|err| Error::ConfigInvalid {
            message: format!("transformation document: {err}"),
        })?;
        self.load(&doc)
    }

    /// Build every step of a list, in order
    pub fn load_all(&self, docs: &[TransformationDoc]) -> Result<Vec<Box<dyn Transformation>>> {
        docs.iter().map(|doc| self.load(doc)).collect()
    }

    /// Dump a step built by this registry
    pub fn dump(&self, step: &dyn Transformation) -> Result<TransformationDoc> {
        if !self.contains(step.kind()) {
            return Err(Error::NotSerializable {
                kind: step.kind().to_string(),
            });
        }
        TransformationDoc::from_step(step)
    }

    /// Dump every step of a list, in order
    pub fn dump_all(&self, steps: &[Box<dyn Transformation>]) -> Result<Vec<TransformationDoc>> {
        steps.iter().map(|step| self.dump(step.as_ref())).collect()
    }
}

static DEFAULT_REGISTRY: OnceCell<Registry> = OnceCell::new();

/// Process-wide registry of built-in steps, created on first use
pub fn default_registry() -> Result<&'static Registry> {
    DEFAULT_REGISTRY.get_or_try_init(Registry::builtin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn doc(value: Value) -> TransformationDoc {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_builtin_kinds() {
        let registry = Registry::builtin().unwrap();
        let kinds: Vec<_> = registry.kinds().collect();
        assert_eq!(kinds.len(), 18);
        for kind in ["equal", "extra_keys", "split_lists", "pipeline", "transformation_per_path"] {
            assert!(registry.contains(kind), "{kind} missing");
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = Registry::builtin().unwrap();
        let err = registry.register("equal", Equal::from_config).unwrap_err();
        assert!(matches!(err, Error::DuplicateTransformationKey { .. }));
    }

    #[test]
    fn test_unknown_kind() {
        let registry = default_registry().unwrap();
        let err = registry.load(&doc(json!({"kind": "nope"}))).unwrap_err();
        assert!(matches!(err, Error::UnknownTransformationKind { kind } if kind == "nope"));
    }

    #[test]
    fn test_unknown_kind_inside_composite() {
        let registry = default_registry().unwrap();
        let err = registry
            .load(&doc(json!({
                "kind": "pipeline",
                "config": {"transformations": [{"kind": "equal"}, {"kind": "nope"}]}
            })))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTransformationKind { .. }));
    }

    #[rstest]
    #[case::missing_required(json!({"kind": "rename_content", "config": {}}))]
    #[case::wrong_type(json!({"kind": "filter_metric", "config": {"path_list": 3}}))]
    #[case::empty_mapper(json!({"kind": "value_mapper", "config": {"leaf_names": ["a"], "mapper": {}}}))]
    #[case::bad_option(json!({"kind": "field_to_string", "config": {"options": ["SOMETIMES"]}}))]
    #[case::misspelled_path_list(json!({"kind": "field_to_string", "config": {"path_lists": ["a"]}}))]
    #[case::misspelled_keep_naming(json!({"kind": "flatten_hierarchies", "config": {"keep_namming": true}}))]
    #[case::misspelled_leaf_names(json!({"kind": "convert_to_int", "config": {"leaf_name": ["v"]}}))]
    #[case::misspelled_options(json!({"kind": "convert_to_list", "config": {"option": ["LISTS"]}}))]
    #[case::misspelled_mapper_selection(json!({"kind": "value_mapper", "config": {"leaf_name": ["s"], "mapper": {"a": 1}}}))]
    #[case::wrong_family(json!({"kind": "combine_content", "config": {"transformations": [{"kind": "extra_keys", "config": {"path_list": ["a"]}}]}}))]
    fn test_invalid_config(#[case] value: Value) {
        let registry = default_registry().unwrap();
        let err = registry.load(&doc(value)).unwrap_err();
        assert!(
            matches!(err, Error::InvalidTransformationConfig { .. }),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_load_value_rejects_malformed_document() {
        let registry = default_registry().unwrap();
        let err = registry.load_value(json!({"config": {}})).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[rstest]
    #[case::equal(json!({"kind": "equal", "config": {}}))]
    #[case::dummy(json!({"kind": "dummy", "config": {}}))]
    #[case::flatten_headers(json!({"kind": "flatten_headers", "config": {}}))]
    #[case::remove_hierarchies(json!({"kind": "remove_content_hierarchies", "config": {}}))]
    #[case::filter(json!({"kind": "filter_metric", "config": {"path_list": ["a/b", "c"]}}))]
    #[case::rename_keys(json!({"kind": "rename_keys", "config": {"path_info": {"p": {"name": "if", "ids": {"0": "first", "1": "second"}}}}}))]
    #[case::field_to_string(json!({"kind": "field_to_string", "config": {"path_list": ["a/b"], "options": ["LISTS"], "leaf_names": ["x"]}}))]
    #[case::flatten(json!({"kind": "flatten_hierarchies", "config": {"path_list": ["a/b"], "options": [], "keep_naming": true}}))]
    #[case::flatten_default(json!({"kind": "flatten_hierarchies", "config": {"options": ["HIERARCHIES"]}}))]
    #[case::rename_content(json!({"kind": "rename_content", "config": {"path_info": {"a/b": "c", "a/d": null}}}))]
    #[case::value_mapper(json!({"kind": "value_mapper", "config": {"path_list": ["a/s"], "mapper": {"UP": 1, "DOWN": 0}, "default": -1}}))]
    #[case::convert_to_list(json!({"kind": "convert_to_list", "config": {"path_list": ["a/l"]}}))]
    #[case::convert_to_int(json!({"kind": "convert_to_int", "config": {"leaf_names": ["mtu"]}}))]
    #[case::extra_keys(json!({"kind": "extra_keys", "config": {"path_list": ["a/b/id"]}}))]
    #[case::split_lists(json!({"kind": "split_lists", "config": {"path_list": ["a/items"]}}))]
    #[case::combine_content(json!({"kind": "combine_content", "config": {"transformations": [
        {"kind": "field_to_string", "config": {"leaf_names": ["x"]}},
        {"kind": "flatten_hierarchies", "config": {"options": ["FIELDS"]}}
    ]}}))]
    #[case::combine_series(json!({"kind": "combine_series", "config": {"transformations": [
        {"kind": "extra_keys", "config": {"path_list": ["a/id"]}},
        {"kind": "split_lists", "config": {"path_list": ["a/items"]}}
    ]}}))]
    #[case::pipeline(json!({"kind": "pipeline", "config": {"transformations": [
        {"kind": "equal", "config": {}},
        {"kind": "rename_content", "config": {"path_info": {"a/b": "c"}}}
    ]}}))]
    #[case::per_path(json!({"kind": "transformation_per_path", "config": {
        "transformation_per_path": {"a": {"kind": "equal", "config": {}}},
        "default": {"kind": "dummy", "config": {}}
    }}))]
    fn test_round_trip(#[case] value: Value) {
        let registry = default_registry().unwrap();
        let step = registry.load(&doc(value.clone())).unwrap();
        let dumped = registry.dump(step.as_ref()).unwrap();
        assert_eq!(serde_json::to_value(&dumped).unwrap(), value);
        let again = registry.dump(registry.load(&dumped).unwrap().as_ref()).unwrap();
        assert_eq!(again, dumped);
    }

    #[test]
    fn test_dump_requires_registered_kind() {
        let registry = Registry::new();
        let step = default_registry()
            .unwrap()
            .load(&doc(json!({"kind": "equal"})))
            .unwrap();
        assert!(matches!(
            registry.dump(step.as_ref()),
            Err(Error::NotSerializable { .. })
        ));
    }
}
