//! Field selection shared by the content transformations
//!
//! A field is selected when its name is one of `leaf_names`, when its value
//! has one of the container kinds in `options`, or when its encoding path is
//! in `path_list`.

use serde::{Deserialize, Serialize};

use crate::content::ContentTree;
use crate::engine::MatchState;
use crate::path_index::PathIndex;

/// Container kinds a transformation applies to regardless of path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FieldKinds {
    /// Every list
    pub lists: bool,
    /// Every field container
    pub fields: bool,
}

impl FieldKinds {
    /// Lists and field containers
    pub const HIERARCHIES: Self = Self {
        lists: true,
        fields: true,
    };

    /// Neither kind
    pub fn is_empty(&self) -> bool {
        !self.lists && !self.fields
    }

    /// Does `value` have a selected kind?
    pub fn selects(&self, value: &ContentTree) -> bool {
        match value {
            ContentTree::List(_) => self.lists,
            ContentTree::Field(_) => self.fields,
            ContentTree::Scalar(_) => false,
        }
    }
}

impl TryFrom<Vec<String>> for FieldKinds {
    type Error = String;

    fn try_from(options: Vec<String>) -> Result<Self, Self::Error> {
        let mut kinds = Self::default();
        for option in options {
            match option.as_str() {
                "LISTS" => kinds.lists = true,
                "FIELDS" => kinds.fields = true,
                "HIERARCHIES" => kinds = Self::HIERARCHIES,
                "NO_OPTION" => {}
                other => return Err(format!("unknown option '{other}'")),
            }
        }
        Ok(kinds)
    }
}

impl From<FieldKinds> for Vec<String> {
    fn from(kinds: FieldKinds) -> Self {
        match (kinds.lists, kinds.fields) {
            (true, true) => vec!["HIERARCHIES".to_string()],
            (true, false) => vec!["LISTS".to_string()],
            (false, true) => vec!["FIELDS".to_string()],
            (false, false) => Vec::new(),
        }
    }
}

/// Serialized selection parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorConfig {
    /// Encoding paths of selected fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_list: Vec<String>,
    /// Container kinds selected everywhere
    #[serde(default, skip_serializing_if = "FieldKinds::is_empty")]
    pub options: FieldKinds,
    /// Field names selected everywhere
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaf_names: Vec<String>,
}

/// Compiled selection
#[derive(Debug, Clone, Default)]
pub struct ContentSelector {
    config: SelectorConfig,
    paths: PathIndex,
}

impl ContentSelector {
    /// Compile a selection
    pub fn new(config: SelectorConfig) -> Self {
        let paths = PathIndex::from_paths(config.path_list.iter().cloned());
        Self { config, paths }
    }

    /// The selection parameters
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Selects nothing at all
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.config.options.is_empty() && self.config.leaf_names.is_empty()
    }

    /// Name and kind selections apply anywhere; paths only along their
    /// ancestors.
    pub fn has_node(&self, path: &str) -> bool {
        if !self.config.leaf_names.is_empty() || !self.config.options.is_empty() {
            return true;
        }
        self.paths.has_descendant(path)
    }

    /// Is the field at `path` selected?
    pub fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState> {
        let selected = self.config.leaf_names.iter().any(|leaf| leaf == name)
            || self.config.options.selects(value)
            || self.paths.contains(path);
        selected.then(|| MatchState::Path(path.to_string()))
    }
}
