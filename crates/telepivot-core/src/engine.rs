//! Recursive content-transformation engine
//!
//! Two depth-first walkers over a record's content tree, both driven by a
//! strategy that answers two questions per position: is anything configured
//! at or below this path (`has_node`), and does this particular field match
//! (`decide`).
//!
//! - [`transform_content`] rewrites content in place (1 record in, 1 out).
//!   Containers are resolved before their parent, so inner hierarchies are
//!   already transformed when the parent level's `apply` runs.
//! - [`split_metric`] may emit new records (1 in, N out). The first level
//!   with matches is handed to the strategy's `split`, which typically builds
//!   a derived record and walks it again.

use crate::content::{ContentTree, Fields};
use crate::error::{Diagnostic, DiagnosticKind, StepError, TransformError};
use crate::metric::{MetricRecord, form_encoding_path};
use crate::transformation::Output;

/// Number of numbered suffixes tried before flattening gives up on a name
pub const MAX_NAME_ATTEMPTS: usize = 100;

/// Evidence that a field matched, handed back to the strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchState {
    /// Encoding path of the matched field
    Path(String),
    /// Evidence of the children of a combined transformation, by position
    Combined(Vec<(usize, MatchState)>),
}

impl MatchState {
    /// The matched path, when this is direct evidence
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Combined(_) => None,
        }
    }
}

/// A field selected at the current level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// Field name
    pub name: String,
    /// Evidence returned by `decide`
    pub state: MatchState,
}

impl Matched {
    /// Path of the matched field, rebuilt from the parent path when the
    /// evidence does not carry it
    pub fn path(&self, parent: &str) -> String {
        match self.state.path() {
            Some(path) => path.to_string(),
            None => form_encoding_path(parent, &self.name),
        }
    }
}

/// Split matches of a combined strategy by child position, ascending
pub fn group_by_child(matched: &[Matched]) -> Vec<(usize, Vec<Matched>)> {
    let mut groups: Vec<(usize, Vec<Matched>)> = Vec::new();
    for entry in matched {
        let MatchState::Combined(states) = &entry.state else {
            continue;
        };
        for (child, state) in states {
            let inner = Matched {
                name: entry.name.clone(),
                state: state.clone(),
            };
            match groups.iter_mut().find(|(n, _)| n == child) {
                Some((_, group)) => group.push(inner),
                None => groups.push((*child, vec![inner])),
            }
        }
    }
    groups.sort_by_key(|(child, _)| *child);
    groups
}

/// A 1-to-1 rewrite of content
pub trait ContentTransformation: Send + Sync {
    /// Is anything configured at or below `path`?
    fn has_node(&self, path: &str) -> bool;

    /// Should the field `name` at `path` be acted on?
    fn decide(&self, path: &str, name: &str, value: &ContentTree) -> Option<MatchState>;

    /// Walk into list elements (default) or leave lists untouched
    fn transform_list_elements(&self) -> bool {
        true
    }

    /// Rewrite one level. Called once per level that has matches, after all
    /// of its containers were walked. Matched names may be missing if the
    /// walk emptied them.
    fn apply(
        &self,
        path: &str,
        fields: Fields,
        matched: &[Matched],
        warnings: &mut Vec<Diagnostic>,
    ) -> Result<Fields, TransformError>;
}

/// Apply a content transformation to a record
pub fn transform_content<C>(strategy: &C, metric: &MetricRecord) -> Result<Output, StepError>
where
    C: ContentTransformation + ?Sized,
{
    let mut warnings = Vec::new();
    let content = walk_content(strategy, metric.content(), metric.path(), &mut warnings)?;
    Ok(Output {
        metrics: vec![metric.with_content(content)],
        warnings,
    })
}

/// Walk one subtree. Empty containers in the result are for the caller to
/// drop.
pub fn walk_content<C>(
    strategy: &C,
    tree: &ContentTree,
    path: &str,
    warnings: &mut Vec<Diagnostic>,
) -> Result<ContentTree, TransformError>
where
    C: ContentTransformation + ?Sized,
{
    if !strategy.has_node(path) {
        return Ok(tree.clone());
    }
    match tree {
        ContentTree::Scalar(_) => Ok(tree.clone()),
        ContentTree::List(list) => {
            if !strategy.transform_list_elements() {
                return Ok(tree.clone());
            }
            let mut items = Vec::with_capacity(list.len());
            for item in list.iter() {
                if !item.is_container() {
                    items.push(item.clone());
                    continue;
                }
                let walked = walk_content(strategy, item, path, warnings)?;
                if !walked.is_empty() {
                    items.push(walked);
                }
            }
            Ok(ContentTree::List(items.into()))
        }
        ContentTree::Field(fields) => {
            walk_fields(strategy, fields, path, warnings).map(ContentTree::Field)
        }
    }
}

fn walk_fields<C>(
    strategy: &C,
    fields: &Fields,
    path: &str,
    warnings: &mut Vec<Diagnostic>,
) -> Result<Fields, TransformError>
where
    C: ContentTransformation + ?Sized,
{
    let (matched, containers) = partition(fields, path, |child_path, name, value| {
        strategy.decide(child_path, name, value)
    });

    let mut fields = fields.clone();
    for (name, child_path) in containers {
        let Some(value) = fields.get(&name).cloned() else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let walked = walk_content(strategy, &value, &child_path, warnings)?;
        if walked.is_empty() {
            fields.remove(&name);
        } else {
            fields.set(&name, walked);
        }
    }

    if matched.is_empty() {
        return Ok(fields);
    }
    strategy.apply(path, fields, &matched, warnings)
}

/// Sort the children of a level into matched fields and containers
fn partition<F>(fields: &Fields, path: &str, mut decide: F) -> (Vec<Matched>, Vec<(String, String)>)
where
    F: FnMut(&str, &str, &ContentTree) -> Option<MatchState>,
{
    let mut matched = Vec::new();
    let mut containers = Vec::new();
    for (name, value) in fields.iter() {
        let child_path = form_encoding_path(path, name);
        if let Some(state) = decide(&child_path, name, value) {
            matched.push(Matched {
                name: name.to_string(),
                state,
            });
        }
        if value.is_container() {
            containers.push((name.to_string(), child_path));
        }
    }
    (matched, containers)
}

/// Records and warnings produced while splitting
#[derive(Debug, Default)]
pub struct SplitContext {
    /// Records emitted so far
    pub metrics: Vec<MetricRecord>,
    /// Warnings collected so far
    pub warnings: Vec<Diagnostic>,
}

impl SplitContext {
    /// Emit a record
    pub fn emit(&mut self, metric: MetricRecord) {
        self.metrics.push(metric);
    }

    /// Record a warning
    pub fn warn(&mut self, warning: Diagnostic) {
        self.warnings.push(warning);
    }

    /// Take over the records and warnings of a nested run
    pub fn absorb(&mut self, output: Output) {
        self.metrics.extend(output.metrics);
        self.warnings.extend(output.warnings);
    }

    /// Finish
    pub fn into_output(self) -> Output {
        Output {
            metrics: self.metrics,
            warnings: self.warnings,
        }
    }
}

/// A 1-to-N rewrite that turns parts of the content into new records
pub trait MetricSplitting: Send + Sync {
    /// Is anything configured at or below `path`?
    fn has_node(&self, path: &str) -> bool;

    /// Does the field at `path` trigger a split?
    fn decide(&self, path: &str) -> Option<MatchState>;

    /// Split one level of `metric`'s content. Returns what remains of the
    /// level; generated records go to `ctx`.
    fn split(
        &self,
        ctx: &mut SplitContext,
        metric: &MetricRecord,
        fields: Fields,
        path: &str,
        matched: &[Matched],
    ) -> Result<Fields, StepError>;
}

/// Apply a splitting transformation to a record
///
/// Records generated along the way come first. The original record follows
/// with whatever content is left, unless the split absorbed all of it.
pub fn split_metric<S>(strategy: &S, metric: &MetricRecord) -> Result<Output, StepError>
where
    S: MetricSplitting + ?Sized,
{
    let mut ctx = SplitContext::default();
    let (content, changed) = split_tree(strategy, &mut ctx, metric, metric.content(), metric.path())?;
    if !changed {
        ctx.emit(metric.clone());
    } else if !content.is_empty() {
        ctx.emit(metric.with_content(content));
    }
    Ok(ctx.into_output())
}

fn split_tree<S>(
    strategy: &S,
    ctx: &mut SplitContext,
    metric: &MetricRecord,
    tree: &ContentTree,
    path: &str,
) -> Result<(ContentTree, bool), StepError>
where
    S: MetricSplitting + ?Sized,
{
    if !strategy.has_node(path) {
        return Ok((tree.clone(), false));
    }
    match tree {
        ContentTree::Scalar(_) => Ok((tree.clone(), false)),
        ContentTree::List(list) => {
            let mut changed = false;
            let mut items = Vec::with_capacity(list.len());
            for item in list.iter() {
                let (walked, item_changed) = split_tree(strategy, ctx, metric, item, path)?;
                changed |= item_changed;
                if !walked.is_empty() {
                    items.push(walked);
                }
            }
            Ok((ContentTree::List(items.into()), changed))
        }
        ContentTree::Field(fields) => {
            let (matched, containers) =
                partition(fields, path, |child_path, _, _| strategy.decide(child_path));
            if !matched.is_empty() {
                let remaining = strategy.split(ctx, metric, fields.clone(), path, &matched)?;
                return Ok((ContentTree::Field(remaining), true));
            }

            let mut fields = fields.clone();
            let mut changed = false;
            for (name, child_path) in containers {
                let Some(value) = fields.get(&name).cloned() else {
                    continue;
                };
                if value.is_empty() {
                    continue;
                }
                let (walked, child_changed) = split_tree(strategy, ctx, metric, &value, &child_path)?;
                if child_changed {
                    changed = true;
                    if walked.is_empty() {
                        fields.remove(&name);
                    } else {
                        fields.set(&name, walked);
                    }
                }
            }
            Ok((ContentTree::Field(fields), changed))
        }
    }
}

/// Pick the name a flattened child gets in `fields`
///
/// The base name is `prefix_child` (or `child` without prefix). When it is
/// taken, `base_0` … `base_99` are tried and an `ExistingNameInFlattening`
/// warning is recorded.
pub fn find_flatten_name(
    fields: &Fields,
    prefix: Option<&str>,
    child: &str,
    path: &str,
    warnings: &mut Vec<Diagnostic>,
) -> Result<String, TransformError> {
    let base = match prefix {
        Some(prefix) => format!("{prefix}_{child}"),
        None => child.to_string(),
    };
    if !fields.contains_key(&base) {
        return Ok(base);
    }
    warnings.push(
        Diagnostic::new(
            DiagnosticKind::ExistingNameInFlattening,
            "base name for flattening exists",
        )
        .with("base", &base)
        .with("path", path)
        .with("child_key", child),
    );
    (0..MAX_NAME_ATTEMPTS)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !fields.contains_key(candidate))
        .ok_or_else(|| TransformError::NameCollisionUnresolved {
            path: path.to_string(),
            child: child.to_string(),
        })
}
