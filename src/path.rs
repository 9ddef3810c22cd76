//! Dotted key paths.
//!
//! Root events name the changed field by its path from the root:
//! a change to `el` on a node attached as `root.sub.leaf` is reported as
//! `KeyPath(["sub", "leaf", "el"])`, rendered `sub.leaf.el`.

use crate::error::{GraphError, Result};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(pub Vec<String>);

impl KeyPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parse `"a.b.c"`. The empty string is the empty path; empty segments
    /// (`"a..b"`, `".a"`) are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let mut segments = Vec::new();
        for part in s.split('.') {
            if part.is_empty() {
                return Err(GraphError::InvalidKey(s.to_string()));
            }
            segments.push(part.to_string());
        }
        Ok(Self(segments))
    }

    /// A new path with `key` appended.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        Self(segments)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_and_display() {
        let p = KeyPath::parse("sub.leaf").unwrap();
        assert_eq!(p.child("el").to_string(), "sub.leaf.el");
        assert!(KeyPath::parse("").unwrap().is_empty());
        assert!(KeyPath::parse("a..b").is_err());
    }
}
