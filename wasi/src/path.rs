//! Capability-checked guest path parsing.
//!
//! Guest paths are always relative to a directory descriptor. Parsing
//! normalizes `.` and `..` eagerly so that resolution never has to walk
//! upward: a `..` that would climb past the starting directory is a
//! capability violation and is rejected here, before any tree access.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::abi::Errno;

/// Longest accepted name for a single path component, in bytes.
const NAME_MAX: usize = 255;

/// A parsed, normalized guest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath {
    components: Vec<String>,
    must_be_dir: bool,
}

impl VirtualPath {
    /// Parse a raw guest path.
    ///
    /// Rejects absolute paths and `..` escapes (`Errno::NotCapable`),
    /// embedded NUL bytes (`Errno::Inval`), and over-long components
    /// (`Errno::NameTooLong`). A trailing slash marks the path as
    /// required to resolve to a directory.
    pub fn parse(raw: &str) -> Result<Self, Errno> {
        if raw.contains('\0') {
            return Err(Errno::Inval);
        }
        if raw.starts_with('/') {
            return Err(Errno::NotCapable);
        }

        let mut components: Vec<String> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if components.pop().is_none() {
                        return Err(Errno::NotCapable);
                    }
                }
                name => {
                    if name.len() > NAME_MAX {
                        return Err(Errno::NameTooLong);
                    }
                    components.push(String::from(name));
                }
            }
        }

        Ok(VirtualPath {
            components,
            must_be_dir: raw.ends_with('/'),
        })
    }

    /// The normalized components, in order.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// True when the caller required the target to be a directory.
    pub fn must_be_dir(&self) -> bool {
        self.must_be_dir
    }

    /// True when the path names the starting directory itself.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Split into the parent components and the final name.
    /// `None` when the path has no final component to act on.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        self.components
            .split_last()
            .map(|(last, parents)| (parents, last.as_str()))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(c)?;
        }
        if self.must_be_dir && !self.components.is_empty() {
            f.write_str("/")?;
        }
        Ok(())
    }
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn parses_and_normalizes() {
        let p = VirtualPath::parse("a/./b//c").unwrap();
        assert_eq!(p.components(), &["a", "b", "c"]);
        assert!(!p.must_be_dir());
    }

    #[test]
    fn dot_dot_collapses_inside_the_tree() {
        let p = VirtualPath::parse("a/b/../c").unwrap();
        assert_eq!(p.components(), &["a", "c"]);
    }

    #[test]
    fn trailing_slash_requires_directory() {
        let p = VirtualPath::parse("a/b/").unwrap();
        assert!(p.must_be_dir());
        assert_eq!(p.components(), &["a", "b"]);
    }

    #[test]
    fn rejects_absolute_path() {
        assert_eq!(VirtualPath::parse("/etc/passwd"), Err(Errno::NotCapable));
    }

    #[test]
    fn rejects_escape_past_root() {
        assert_eq!(VirtualPath::parse(".."), Err(Errno::NotCapable));
        assert_eq!(VirtualPath::parse("a/../.."), Err(Errno::NotCapable));
        assert_eq!(VirtualPath::parse("../etc"), Err(Errno::NotCapable));
    }

    #[test]
    fn rejects_embedded_nul() {
        assert_eq!(VirtualPath::parse("a\0b"), Err(Errno::Inval));
    }

    #[test]
    fn rejects_overlong_component() {
        let long = "x".repeat(256);
        assert_eq!(VirtualPath::parse(&long), Err(Errno::NameTooLong));
        let ok = "x".repeat(255);
        assert!(VirtualPath::parse(&ok).is_ok());
    }

    #[test]
    fn empty_path_names_the_base_directory() {
        let p = VirtualPath::parse("").unwrap();
        assert!(p.is_empty());
        assert!(p.split_last().is_none());
    }

    #[test]
    fn display_round_trips_to_an_equivalent_path() {
        for raw in ["a/b/c", "a/b/", "x", "a/./b/../c"] {
            let p = VirtualPath::parse(raw).unwrap();
            let rejoined = format!("{}", p);
            let reparsed = VirtualPath::parse(&rejoined).unwrap();
            assert_eq!(p, reparsed, "{raw} -> {rejoined}");
        }
    }
}
