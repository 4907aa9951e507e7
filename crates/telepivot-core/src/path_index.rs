//! Path index
//!
//! A segment trie over `/`-separated encoding paths. Built once from
//! configuration, then only read. Every transformation uses it to decide
//! whether a position in the content tree is configured (`contains`) and
//! whether it is worth descending any further (`has_descendant`).
//!
//! The same handful of paths is probed for every record of the same shape,
//! so both queries are memoized. The caches sit behind `RwLock`s, which keeps
//! the index shareable between worker threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Node {
    children: HashMap<String, usize>,
    entry: Option<usize>,
}

/// Trie of configured encoding paths with an optional payload per path
pub struct PathIndex<T = ()> {
    nodes: Vec<Node>,
    entries: Vec<(String, T)>,
    exact_cache: RwLock<HashMap<String, bool>>,
    descendant_cache: RwLock<HashMap<String, bool>>,
}

impl<T> PathIndex<T> {
    /// Build an index from `(path, payload)` pairs. A repeated path keeps its
    /// first position and the last payload.
    pub fn from_map<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
    {
        let mut index = Self {
            nodes: vec![Node::default()],
            entries: Vec::new(),
            exact_cache: RwLock::new(HashMap::new()),
            descendant_cache: RwLock::new(HashMap::new()),
        };
        for (path, payload) in items {
            index.insert(path.into(), payload);
        }
        index
    }

    fn insert(&mut self, path: String, payload: T) {
        let mut current = 0;
        for segment in segments(&path) {
            current = match self.nodes[current].children.get(segment) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[current]
                        .children
                        .insert(segment.to_string(), next);
                    next
                }
            };
        }
        match self.nodes[current].entry {
            Some(existing) => self.entries[existing].1 = payload,
            None => {
                self.nodes[current].entry = Some(self.entries.len());
                self.entries.push((path, payload));
            }
        }
    }

    fn find(&self, path: &str) -> Option<&Node> {
        let mut current = 0;
        for segment in segments(path) {
            current = *self.nodes[current].children.get(segment)?;
        }
        Some(&self.nodes[current])
    }

    /// Is this exact path configured?
    pub fn contains(&self, path: &str) -> bool {
        memoized(&self.exact_cache, path, || {
            self.find(path).is_some_and(|node| node.entry.is_some())
        })
    }

    /// Is this path, or any path below it, configured?
    pub fn has_descendant(&self, path: &str) -> bool {
        memoized(&self.descendant_cache, path, || {
            self.find(path)
                .is_some_and(|node| node.entry.is_some() || !node.children.is_empty())
        })
    }

    /// Payload stored for an exact path
    pub fn get(&self, path: &str) -> Option<&T> {
        let entry = self.find(path)?.entry?;
        Some(&self.entries[entry].1)
    }

    /// Configured paths in insertion order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(path, _)| path.as_str())
    }

    /// Configured `(path, payload)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries
            .iter()
            .map(|(path, payload)| (path.as_str(), payload))
    }

    /// Number of configured paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PathIndex<()> {
    /// Build a set-like index from a list of paths
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_map(paths.into_iter().map(|path| (path, ())))
    }
}

impl<T> Default for PathIndex<T> {
    fn default() -> Self {
        Self::from_map(std::iter::empty::<(String, T)>())
    }
}

impl<T: Clone> Clone for PathIndex<T> {
    fn clone(&self) -> Self {
        Self::from_map(self.entries.iter().cloned())
    }
}

impl<T: fmt::Debug> fmt::Debug for PathIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_end_matches('/');
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

fn memoized(cache: &RwLock<HashMap<String, bool>>, key: &str, compute: impl FnOnce() -> bool) -> bool {
    if let Ok(hits) = cache.read()
        && let Some(&hit) = hits.get(key)
    {
        return hit;
    }
    let value = compute();
    if let Ok(mut hits) = cache.write() {
        hits.insert(key.to_string(), value);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PathIndex {
        PathIndex::from_paths(["module:thi/is/a/path", "module:thi/is/other"])
    }

    #[test]
    fn test_contains_is_exact() {
        let index = index();
        assert!(index.contains("module:thi/is/a/path"));
        assert!(index.contains("module:thi/is/other"));
        assert!(!index.contains("module:thi/is/a"));
        assert!(!index.contains("module:this"));
    }

    #[test]
    fn test_has_descendant_covers_ancestors() {
        let index = index();
        assert!(index.has_descendant(""));
        assert!(index.has_descendant("module:thi"));
        assert!(index.has_descendant("module:thi/is/a"));
        assert!(index.has_descendant("module:thi/is/a/path"));
        assert!(!index.has_descendant("module:this"));
        assert!(!index.has_descendant("module:thi/is/a/path/deeper"));
    }

    #[test]
    fn test_segments_do_not_match_on_char_prefix() {
        let index = PathIndex::from_paths(["a/bc"]);
        assert!(!index.has_descendant("a/b"));
        assert!(index.has_descendant("a"));
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let index = PathIndex::from_paths(["a/b/"]);
        assert!(index.contains("a/b"));
        assert!(index.contains("a/b/"));
    }

    #[test]
    fn test_repeated_queries_hit_the_cache() {
        let index = index();
        for _ in 0..3 {
            assert!(index.contains("module:thi/is/other"));
            assert!(!index.has_descendant("nope"));
        }
        assert_eq!(index.exact_cache.read().unwrap().len(), 1);
        assert_eq!(index.descendant_cache.read().unwrap().len(), 1);
    }

    #[test]
    fn test_map_payloads() {
        let index = PathIndex::from_map([("a/b", "x"), ("a/c", "y"), ("a/b", "z")]);
        assert_eq!(index.get("a/b"), Some(&"z"));
        assert_eq!(index.get("a/c"), Some(&"y"));
        assert_eq!(index.get("a"), None);
        assert_eq!(index.paths().collect::<Vec<_>>(), vec!["a/b", "a/c"]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_empty_index() {
        let index: PathIndex = PathIndex::default();
        assert!(index.is_empty());
        assert!(!index.has_descendant(""));
        assert!(!index.contains("a"));
    }

    #[test]
    fn test_shared_between_threads() {
        let index = std::sync::Arc::new(index());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || index.has_descendant("module:thi/is"))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
