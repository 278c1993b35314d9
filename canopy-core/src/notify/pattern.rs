//! Subscription patterns.

use std::fmt;

use crate::error::{Error, Result};
use crate::tree::Path;

/// Which changed paths a subscriber hears about.
///
/// | pattern    | matches                                    |
/// |------------|--------------------------------------------|
/// | `a.b`      | exactly `a.b`                              |
/// | `a.*`      | direct children of `a` (`a.b`, not `a.b.c`) |
/// | `a.**`     | every descendant of `a`, not `a` itself    |
/// | `*`        | direct children of the root                |
/// | `**`       | everything                                 |
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPattern {
    Exact(Path),
    Children(Path),
    Descendants(Path),
    All,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<PathPattern> {
        match raw {
            "**" => return Ok(PathPattern::All),
            "*" => return Ok(PathPattern::Children(Path::root())),
            _ => {}
        }
        if let Some(prefix) = raw.strip_suffix(".**") {
            return Ok(PathPattern::Descendants(Self::prefix(raw, prefix)?));
        }
        if let Some(prefix) = raw.strip_suffix(".*") {
            return Ok(PathPattern::Children(Self::prefix(raw, prefix)?));
        }
        Path::parse(raw).map(PathPattern::Exact)
    }

    fn prefix(raw: &str, prefix: &str) -> Result<Path> {
        if prefix.is_empty() {
            return Err(Error::invalid_path(raw, "wildcard needs a prefix"));
        }
        Path::parse(prefix)
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Children(parent) => path.is_child_of(parent),
            PathPattern::Descendants(ancestor) => {
                path.len() > ancestor.len() && path.starts_with(ancestor)
            }
            PathPattern::All => true,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(path) => write!(f, "{path}"),
            PathPattern::Children(parent) if parent.is_root() => f.write_str("*"),
            PathPattern::Children(parent) => write!(f, "{parent}.*"),
            PathPattern::Descendants(ancestor) => write!(f, "{ancestor}.**"),
            PathPattern::All => f.write_str("**"),
        }
    }
}

impl From<Path> for PathPattern {
    fn from(path: Path) -> Self {
        PathPattern::Exact(path)
    }
}
