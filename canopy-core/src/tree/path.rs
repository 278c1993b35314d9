//! Paths into a state tree.
//!
//! A path is the ordered list of segments from the root to a node. Its
//! canonical string form joins segments with `.`; the empty string is the
//! root. Canonical decimal segments (`0`, `42`, but not `042`) parse as
//! [`Segment::Index`], so `items.3` and an id `3` address the same child.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Index(usize),
    Key(Arc<str>),
}

impl Segment {
    /// Parse a single raw segment, canonicalizing numbers.
    pub fn parse(raw: &str) -> Segment {
        if is_canonical_index(raw) {
            if let Ok(index) = raw.parse::<usize>() {
                return Segment::Index(index);
            }
        }
        Segment::Key(Arc::from(raw))
    }

    /// The record key this segment looks up.
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            Segment::Index(index) => Cow::Owned(index.to_string()),
            Segment::Key(key) => Cow::Borrowed(key),
        }
    }
}

fn is_canonical_index(raw: &str) -> bool {
    !raw.is_empty()
        && raw.bytes().all(|b| b.is_ascii_digit())
        && (raw == "0" || !raw.starts_with('0'))
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(index) => write!(f, "{index}"),
            Segment::Key(key) => f.write_str(key),
        }
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

impl From<&str> for Segment {
    fn from(raw: &str) -> Self {
        Segment::parse(raw)
    }
}

impl From<String> for Segment {
    fn from(raw: String) -> Self {
        Segment::parse(&raw)
    }
}

/// An immutable path from the tree root.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Path {
    segments: SmallVec<[Segment; 4]>,
}

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-delimited path.
    ///
    /// The empty string is the root. Empty segments (`a..b`, a trailing dot)
    /// and wildcard characters are rejected.
    pub fn parse(raw: &str) -> Result<Path> {
        if raw.is_empty() {
            return Ok(Path::root());
        }
        let mut segments = SmallVec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(Error::invalid_path(raw, "empty segment"));
            }
            if part.contains('*') {
                return Err(Error::invalid_path(raw, "wildcards are only valid in patterns"));
            }
            segments.push(Segment::parse(part));
        }
        Ok(Path { segments })
    }

    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        Path {
            segments: segments.into_iter().collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Append one segment.
    pub fn child(&self, segment: impl Into<Segment>) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Path { segments }
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Path { segments })
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Whether this path is a direct child of `parent`.
    pub fn is_child_of(&self, parent: &Path) -> bool {
        self.len() == parent.len() + 1 && self.starts_with(parent)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        Path::parse(raw)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Path::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Memoizes parsed paths for one tree.
///
/// When the cache reaches its capacity it is cleared and refilled; paths
/// are cheap to re-parse, the cache only saves repeated splitting on hot
/// accessors.
#[derive(Debug)]
pub struct PathRegistry {
    cache: Mutex<HashMap<String, Path>>,
    capacity: usize,
}

impl PathRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Parse `raw`, reusing an earlier parse when available.
    pub fn resolve(&self, raw: &str) -> Result<Path> {
        if let Some(path) = self.cache.lock().get(raw) {
            return Ok(path.clone());
        }

        let path = Path::parse(raw)?;
        let mut cache = self.cache.lock();
        if cache.len() >= self.capacity {
            tracing::trace!(capacity = self.capacity, "path cache full, clearing");
            cache.clear();
        }
        cache.insert(raw.to_string(), path.clone());
        Ok(path)
    }

    /// Number of memoized paths.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_canonicalizes_numbers() {
        let path = Path::parse("items.0.tags.12").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("items".into()),
                Segment::Index(0),
                Segment::Key("tags".into()),
                Segment::Index(12),
            ]
        );
        assert_eq!(path.to_string(), "items.0.tags.12");
    }

    #[test]
    fn leading_zero_stays_a_key() {
        let path = Path::parse("codes.007").unwrap();
        assert_eq!(path.last(), Some(&Segment::Key("007".into())));
    }

    #[test]
    fn empty_string_is_root() {
        let root = Path::parse("").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "");
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(Path::parse("a..b").unwrap_err().is_invalid_path());
        assert!(Path::parse("a.").is_err());
        assert!(Path::parse(".a").is_err());
        assert!(Path::parse("a.*").is_err());
    }

    #[test]
    fn ancestry() {
        let parent = Path::parse("a.b").unwrap();
        let child = parent.child("c");
        assert!(child.is_child_of(&parent));
        assert!(child.starts_with(&parent));
        assert!(!parent.starts_with(&child));
        assert!(!child.child(0usize).is_child_of(&parent));
        assert_eq!(child.parent(), Some(parent));
    }

    #[test]
    fn registry_memoizes_and_bounds() {
        let registry = PathRegistry::new(2);
        let first = registry.resolve("a.b").unwrap();
        assert_eq!(registry.resolve("a.b").unwrap(), first);
        assert_eq!(registry.len(), 1);

        registry.resolve("c").unwrap();
        registry.resolve("d").unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.resolve("x..y").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let path = Path::parse("a.1").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"a.1\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
