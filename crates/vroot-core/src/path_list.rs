//! Parsed path representation used as the unit of work by the resolver

use crate::error::MappingError;
use std::fmt;

/// An ordered list of path components.
///
/// Splitting drops empty and `.` components but keeps `..`, which the
/// resolver applies against the already-resolved prefix. A trailing `/`
/// in the input is remembered so exact-path rules can see it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathList {
    components: Vec<String>,
    absolute: bool,
    trailing_slash: bool,
}

impl PathList {
    /// The root directory `/`
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
            absolute: true,
            trailing_slash: false,
        }
    }

    /// Split a raw path string. Never fails.
    pub fn split(path: &str) -> Self {
        let absolute = path.starts_with('/');
        let components: Vec<String> = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .map(str::to_string)
            .collect();
        let trailing_slash = !components.is_empty() && (path.ends_with('/') || path.ends_with("/."));
        Self {
            components,
            absolute,
            trailing_slash,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.components.is_empty()
    }

    pub fn has_trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    pub fn set_trailing_slash(&mut self, trailing_slash: bool) {
        self.trailing_slash = trailing_slash && !self.components.is_empty();
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// True iff no component still needs resolution (`..`)
    pub fn is_clean(&self) -> bool {
        self.components.iter().all(|c| c != "..")
    }

    pub fn push(&mut self, component: impl Into<String>) {
        self.components.push(component.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.components.pop()
    }

    /// Append `other` to this list; an absolute `other` replaces it
    pub fn join(&self, other: &PathList) -> PathList {
        if other.absolute {
            return other.clone();
        }
        let mut joined = self.clone();
        joined.components.extend(other.components.iter().cloned());
        joined.trailing_slash = other.trailing_slash || (other.is_empty() && self.trailing_slash);
        joined
    }

    /// Apply `..` components lexically. Climbing above the root is an error.
    pub fn resolve_dotdot(&self) -> Result<PathList, MappingError> {
        let mut cleaned = Vec::with_capacity(self.components.len());
        for component in &self.components {
            if component == ".." {
                if cleaned.pop().is_none() && self.absolute {
                    return Err(MappingError::PathEscapesRoot {
                        path: self.to_string(),
                    });
                }
            } else {
                cleaned.push(component.clone());
            }
        }
        Ok(PathList {
            trailing_slash: self.trailing_slash && !cleaned.is_empty(),
            components: cleaned,
            absolute: self.absolute,
        })
    }

    /// Like [`resolve_dotdot`](Self::resolve_dotdot), but `..` at the root stays at the root
    pub fn lexical_clean(&self) -> PathList {
        let mut cleaned: Vec<String> = Vec::with_capacity(self.components.len());
        for component in &self.components {
            if component == ".." {
                cleaned.pop();
            } else {
                cleaned.push(component.clone());
            }
        }
        PathList {
            trailing_slash: self.trailing_slash && !cleaned.is_empty(),
            components: cleaned,
            absolute: self.absolute,
        }
    }

    /// Serialized form without the trailing slash marker
    pub fn to_plain_string(&self) -> String {
        let mut out = String::new();
        for (i, component) in self.components.iter().enumerate() {
            if self.absolute || i > 0 {
                out.push('/');
            }
            out.push_str(component);
        }
        if out.is_empty() {
            out.push_str(if self.absolute { "/" } else { "." });
        }
        out
    }
}

impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_string())?;
        if self.trailing_slash {
            f.write_str("/")?;
        }
        Ok(())
    }
}

/// Join a directory and a relative path string
pub fn join_path(dir: &str, rel: &str) -> String {
    if rel.is_empty() {
        return dir.to_string();
    }
    if dir.ends_with('/') {
        format!("{}{}", dir, rel)
    } else {
        format!("{}/{}", dir, rel)
    }
}
