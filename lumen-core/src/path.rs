//! Interned hierarchical identity keys.
//!
//! A [`Path`] names one logical media item, e.g. `/uri/https%3A%2F%2Fhost%2Fa.jpg`.
//! Paths are interned through a [`PathTree`]: resolving the same segment
//! sequence twice yields the same node for as long as someone holds it, so
//! "same item" checks are pointer comparisons.

use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::error::{CacheError, Result};

const PRUNE_THRESHOLD: usize = 32;

#[derive(Debug)]
struct Children {
    nodes: HashMap<String, Weak<PathNode>>,
    prune_at: usize,
}

impl Default for Children {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            prune_at: PRUNE_THRESHOLD,
        }
    }
}

struct PathNode {
    parent: Option<Path>,
    segment: String,
    children: Mutex<Children>,
}

/// Interned path node. Equality and hashing use node identity.
#[derive(Clone)]
pub struct Path(Arc<PathNode>);

impl Path {
    fn new_root() -> Self {
        Self(Arc::new(PathNode {
            parent: None,
            segment: String::new(),
            children: Mutex::new(Children::default()),
        }))
    }

    /// Returns the interned child for `segment`, creating it if needed.
    pub fn child(&self, segment: impl AsRef<str>) -> Path {
        let segment = segment.as_ref();
        let mut children = self.0.children.lock();
        if let Some(existing) =
            children.nodes.get(segment).and_then(Weak::upgrade)
        {
            return Path(existing);
        }

        let node = Arc::new(PathNode {
            parent: Some(self.clone()),
            segment: segment.to_owned(),
            children: Mutex::new(Children::default()),
        });
        children
            .nodes
            .insert(segment.to_owned(), Arc::downgrade(&node));

        if children.nodes.len() >= children.prune_at {
            children.nodes.retain(|_, weak| weak.strong_count() > 0);
            children.prune_at =
                (children.nodes.len() * 2).max(PRUNE_THRESHOLD);
        }

        Path(node)
    }

    pub fn parent(&self) -> Option<Path> {
        self.0.parent.clone()
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    /// Last segment; empty for the root.
    pub fn suffix(&self) -> &str {
        &self.0.segment
    }

    /// First segment below the root, used to select a media source.
    pub fn prefix(&self) -> String {
        self.prefix_path()
            .map(|p| p.suffix().to_owned())
            .unwrap_or_default()
    }

    pub fn prefix_path(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            if parent.is_root() {
                return Some(current);
            }
            current = parent;
        }
        None
    }

    /// Segments from the root down, excluding the root itself.
    pub fn segments(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if node.is_root() {
                break;
            }
            out.push(node.suffix().to_owned());
            current = node.parent();
        }
        out.reverse();
        out
    }

    pub fn equals_ignore_case(&self, other: &str) -> bool {
        self.to_string().eq_ignore_ascii_case(other)
    }

    pub fn ptr_eq(a: &Path, b: &Path) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.segments() {
            f.write_str("/")?;
            f.write_str(&segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Path").field(&self.to_string()).finish()
    }
}

/// Owner of the interning root.
#[derive(Clone)]
pub struct PathTree {
    root: Path,
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PathTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathTree").finish_non_exhaustive()
    }
}

impl PathTree {
    pub fn new() -> Self {
        Self {
            root: Path::new_root(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn from_string(&self, s: &str) -> Result<Path> {
        let segments = split(s)?;
        Ok(self.from_segments(segments))
    }

    pub fn from_segments<I, S>(&self, segments: I) -> Path
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .fold(self.root.clone(), |current, segment| current.child(segment))
    }
}

/// Splits `/a/{b/c}/d` into `["a", "{b/c}", "d"]`. Braces protect slashes.
pub fn split(s: &str) -> Result<Vec<String>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = s.strip_prefix('/') else {
        return Err(CacheError::InvalidPath(format!("malformed path: {s}")));
    };
    split_balanced(rest, '/')
        .map_err(|_| CacheError::InvalidPath(format!("unbalanced brace in path: {s}")))
}

/// Splits a `{foo,bar,{baz,qux}}` sequence into its top-level members.
pub fn split_sequence(s: &str) -> Result<Vec<String>> {
    let inner = s
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| CacheError::InvalidPath(format!("bad sequence: {s}")))?;
    split_balanced(inner, ',')
        .map_err(|_| CacheError::InvalidPath(format!("unbalanced brace in sequence: {s}")))
}

fn split_balanced(s: &str, separator: char) -> std::result::Result<Vec<String>, ()> {
    let mut out = Vec::new();
    if s.is_empty() {
        return Ok(out);
    }
    let mut depth: i32 = 0;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            c if c == separator && depth == 0 => {
                out.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        if depth < 0 {
            return Err(());
        }
        current.push(c);
    }
    if depth != 0 {
        return Err(());
    }
    if !current.is_empty() {
        out.push(current);
    }
    Ok(out)
}
