//! Splitting transformations: one record in, several out

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{ContentTree, Fields};
use crate::engine::{MatchState, Matched, MetricSplitting, SplitContext, group_by_child, split_metric};
use crate::error::{Diagnostic, DiagnosticKind, Error, InvariantViolation, Result, StepError};
use crate::metric::MetricRecord;
use crate::path_index::PathIndex;
use crate::registry::{Registry, TransformationDoc, parse_config};
use crate::transformation::{Output, Transformation};
use crate::transforms::content::CombinedConfig;

/// Parameters of the path-driven splitting transformations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitConfig {
    /// Encoding paths that trigger a split
    pub path_list: Vec<String>,
}

fn path_decision(paths: &PathIndex, path: &str) -> Option<MatchState> {
    paths
        .contains(path)
        .then(|| MatchState::Path(path.to_string()))
}

/// Promote fields to keys
///
/// When a level holds one of the configured paths, the matched fields move
/// into the record keys and the rest of that level becomes the content of a
/// new record rooted at the level. Deeper levels of the new record are split
/// again.
#[derive(Debug, Clone)]
pub struct ExtraKeys {
    paths: PathIndex,
}

impl ExtraKeys {
    /// Registry key
    pub const KIND: &'static str = "extra_keys";

    /// Promote the fields at `paths`
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
        let config: SplitConfig = parse_config(Self::KIND, config)?;
        Ok(Box::new(Self::new(config.path_list)))
    }
}

impl MetricSplitting for ExtraKeys {
    fn has_node(&self, path: &str) -> bool {
        self.paths.has_descendant(path)
    }

    fn decide(&self, path: &str) -> Option<MatchState> {
        path_decision(&self.paths, path)
    }

    fn split(
        &self,
        ctx: &mut SplitContext,
        metric: &MetricRecord,
        mut fields: Fields,
        path: &str,
        matched: &[Matched],
    ) -> std::result::Result<Fields, StepError> {
        let mut keys = metric.keys().clone();
        for m in matched {
            if let Some(value) = fields.remove(&m.name) {
                keys.merge_insert(m.name.clone(), value);
            }
        }
        let derived = metric
            .with_keys(keys)
            .with_content(ContentTree::Field(fields))
            .with_path(path);
        ctx.absorb(split_metric(self, &derived)?);
        Ok(Fields::new())
    }
}

impl Transformation for ExtraKeys {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        split_metric(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        let config = SplitConfig {
            path_list: self.paths.paths().map(str::to_string).collect(),
        };
        Ok(serde_json::to_value(config)?)
    }

    fn as_splitting(&self) -> Option<&dyn MetricSplitting> {
        Some(self)
    }
}

/// Turn every element of the lists at the configured paths into its own
/// record. A matched value that is not a list stays where it is.
#[derive(Debug, Clone)]
pub struct SplitLists {
    paths: PathIndex,
}

impl SplitLists {
    /// Registry key
    pub const KIND: &'static str = "split_lists";

    /// Split the lists at `paths`
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
        let config: SplitConfig = parse_config(Self::KIND, config)?;
        Ok(Box::new(Self::new(config.path_list)))
    }
}

impl MetricSplitting for SplitLists {
    fn has_node(&self, path: &str) -> bool {
        self.paths.has_descendant(path)
    }

    fn decide(&self, path: &str) -> Option<MatchState> {
        path_decision(&self.paths, path)
    }

    fn split(
        &self,
        ctx: &mut SplitContext,
        metric: &MetricRecord,
        mut fields: Fields,
        path: &str,
        matched: &[Matched],
    ) -> std::result::Result<Fields, StepError> {
        for m in matched {
            let kpath = m.path(path);
            match fields.get(&m.name).cloned() {
                Some(ContentTree::List(list)) => {
                    fields.remove(&m.name);
                    for element in list.iter() {
                        let derived = metric.with_content(element.clone()).with_path(&kpath);
                        ctx.absorb(split_metric(self, &derived)?);
                    }
                }
                Some(_) => ctx.warn(
                    Diagnostic::new(DiagnosticKind::NotAList, "split target is not a list")
                        .with("path", &kpath),
                ),
                None => {}
            }
        }
        Ok(fields)
    }
}

impl Transformation for SplitLists {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        split_metric(self, metric)
    }

    fn to_config(&self) -> Result<Value> {
        let config = SplitConfig {
            path_list: self.paths.paths().map(str::to_string).collect(),
        };
        Ok(serde_json::to_value(config)?)
    }

    fn as_splitting(&self) -> Option<&dyn MetricSplitting> {
        Some(self)
    }
}

/// Several splitting transformations in one walk
///
/// At the first level where any child matches, the earliest matching child
/// splits. Every record it emits is fed through the whole series again.
#[derive(Debug)]
pub struct CombineSeries {
    children: Vec<Box<dyn Transformation>>,
}

impl CombineSeries {
    /// Registry key
    pub const KIND: &'static str = "combine_series";

    /// Combine splitting transformations
    pub fn new(children: Vec<Box<dyn Transformation>>) -> Result<Self> {
        if let Some(child) = children.iter().find(|child| child.as_splitting().is_none()) {
            return Err(Error::invalid_config(
                Self::KIND,
                format!("'{}' is not a splitting transformation", child.kind()),
            ));
        }
        Ok(Self { children })
    }

    /// Registry constructor
    pub fn from_config(registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        let config: CombinedConfig = parse_config(Self::KIND, config)?;
        Ok(Box::new(Self::new(registry.load_all(&config.transformations)?)?))
    }

    fn strategies(&self) -> impl Iterator<Item = (usize, &dyn MetricSplitting)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(n, child)| Some((n, child.as_splitting()?)))
    }
}

impl MetricSplitting for CombineSeries {
    fn has_node(&self, path: &str) -> bool {
        self.strategies().any(|(_, child)| child.has_node(path))
    }

    fn decide(&self, path: &str) -> Option<MatchState> {
        self.strategies()
            .find_map(|(n, child)| Some(MatchState::Combined(vec![(n, child.decide(path)?)])))
    }

    fn split(
        &self,
        ctx: &mut SplitContext,
        metric: &MetricRecord,
        fields: Fields,
        path: &str,
        matched: &[Matched],
    ) -> std::result::Result<Fields, StepError> {
        let Some((first, group)) = group_by_child(matched).into_iter().next() else {
            return Ok(fields);
        };
        let child = self.children.get(first).and_then(|child| child.as_splitting()).ok_or_else(|| {
            InvariantViolation::UnexpectedStrategy {
                step: Self::KIND.to_string(),
                expected: "splitting",
            }
        })?;

        let mut inner = SplitContext::default();
        let remaining = child.split(&mut inner, metric, fields, path, &group)?;
        ctx.warnings.extend(inner.warnings);
        for emitted in inner.metrics {
            ctx.absorb(split_metric(self, &emitted)?);
        }
        Ok(remaining)
    }
}

impl Transformation for CombineSeries {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        if let Some(child) = self.children.iter().find(|c| c.as_splitting().is_none()) {
            return Err(InvariantViolation::UnexpectedStrategy {
                step: child.name(),
                expected: "splitting",
            }
            .into());
        }
        split_metric(self, metric)
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

    fn as_splitting(&self) -> Option<&dyn MetricSplitting> {
        Some(self)
    }
}
