//! The [`RemotePath`] value type.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::str::FromStr;

use crate::error::{PathError, PathResult};

/// Name separator of every remote tree.
pub const SEPARATOR: &str = "/";

const SLASH: u8 = b'/';
const DOT: u8 = b'.';

/// An abstract path into the remote tree.
///
/// Immutable: the name table is computed once in [`RemotePath::new`] and never
/// changes, so the type is freely `Clone`/`Send`/`Sync` with no locking.
///
/// A zero-length path is modeled as exactly one empty name, matching POSIX
/// path APIs (`"".name_count() == 1`). The root `/` has zero names.
#[derive(Clone)]
pub struct RemotePath {
    bytes: Vec<u8>,
    /// One byte range per non-empty `/`-delimited run.
    names: Vec<Range<usize>>,
}

impl RemotePath {
    /// Create a path from raw bytes. Never performs I/O.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let names = scan_names(&bytes);
        Self { bytes, names }
    }

    /// The single global root, `/`.
    pub fn root() -> Self {
        Self::new(SEPARATOR)
    }

    /// The empty path.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Join `first` and the non-empty `more` segments with `/`.
    ///
    /// Pure string joining: no normalization is applied.
    pub fn from_segments(first: &str, more: &[&str]) -> Self {
        if more.is_empty() {
            return Self::new(first);
        }
        let mut joined = String::from(first);
        for segment in more.iter().filter(|s| !s.is_empty()) {
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(segment);
        }
        Self::new(joined)
    }

    /// Raw bytes of this path.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// String form, replacing invalid UTF-8 sequences.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Returns true for the zero-length path.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns true if the first byte is `/`.
    pub fn is_absolute(&self) -> bool {
        self.bytes.first() == Some(&SLASH)
    }

    /// The root component: `/` for absolute paths, `None` for relative ones.
    pub fn root_component(&self) -> Option<RemotePath> {
        self.is_absolute().then(Self::root)
    }

    /// Number of names in the path.
    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// The name at `index`, counting from the element closest to the root.
    pub fn name(&self, index: usize) -> PathResult<RemotePath> {
        if index >= self.names.len() {
            return Err(PathError::illegal_argument(format!(
                "name index {} out of range for {} names",
                index,
                self.names.len()
            )));
        }
        Ok(Self::new(self.name_bytes(index)))
    }

    /// The last name, or `None` for the root.
    pub fn file_name(&self) -> Option<RemotePath> {
        let last = self.names.last()?;
        Some(Self::new(&self.bytes[last.clone()]))
    }

    /// Everything before the last name.
    ///
    /// `/a` has parent `/`; a single relative name and the root have none.
    pub fn parent(&self) -> Option<RemotePath> {
        match self.names.len() {
            0 => None,
            1 => self.root_component(),
            n => Some(Self::new(&self.bytes[..self.names[n - 2].end])),
        }
    }

    /// The relative path formed by names `begin..end`.
    pub fn subpath(&self, begin: usize, end: usize) -> PathResult<RemotePath> {
        let count = self.names.len();
        if begin >= count || end > count || begin >= end {
            return Err(PathError::illegal_argument(format!(
                "subpath range {}..{} invalid for {} names",
                begin, end, count
            )));
        }
        let start = self.names[begin].start;
        let stop = self.names[end - 1].end;
        Ok(Self::new(&self.bytes[start..stop]))
    }

    /// Iterate over the names of this path.
    pub fn names(&self) -> Names<'_> {
        Names {
            path: self,
            next: 0,
        }
    }

    /// Returns true if this path is the single name `.`.
    pub fn is_dot(&self) -> bool {
        self.bytes == [DOT]
    }

    /// Returns true if this path is the single name `..`.
    pub fn is_dot_dot(&self) -> bool {
        self.bytes == [DOT, DOT]
    }

    /// Whole-name prefix test: `/a/b` starts with `/a`, `/ab` does not.
    pub fn starts_with(&self, other: &RemotePath) -> bool {
        if self.is_absolute() != other.is_absolute() {
            return false;
        }
        let theirs = other.names.len();
        if theirs > self.names.len() {
            return false;
        }
        (0..theirs).all(|i| self.name_bytes(i) == other.name_bytes(i))
    }

    /// [`starts_with`](Self::starts_with) against a parsed string.
    pub fn starts_with_str(&self, other: &str) -> bool {
        self.starts_with(&Self::new(other))
    }

    /// Whole-name suffix test. An absolute `other` must match the entire path.
    pub fn ends_with(&self, other: &RemotePath) -> bool {
        if other.is_empty() {
            return self.is_empty();
        }
        let ours = self.names.len();
        let theirs = other.names.len();
        if other.is_absolute() {
            return self.is_absolute()
                && ours == theirs
                && (0..ours).all(|i| self.name_bytes(i) == other.name_bytes(i));
        }
        if theirs > ours {
            return false;
        }
        let skip = ours - theirs;
        (0..theirs).all(|i| self.name_bytes(skip + i) == other.name_bytes(i))
    }

    /// [`ends_with`](Self::ends_with) against a parsed string.
    pub fn ends_with_str(&self, other: &str) -> bool {
        self.ends_with(&Self::new(other))
    }

    /// Remove redundant `.` and `name/..` elements.
    ///
    /// Pair elimination repeats until nothing changes, since dropping one
    /// pair can expose another. A `..` directly under the root of an absolute
    /// path is dropped; on a relative path it is kept.
    pub fn normalize(&self) -> RemotePath {
        let count = self.names.len();
        if count == 0 || self.is_empty() {
            return self.clone();
        }

        let mut ignore = vec![false; count];
        let mut remaining = count;
        let mut has_dot_dot = false;
        let absolute = self.is_absolute();

        for (i, skip) in ignore.iter_mut().enumerate() {
            let name = self.name_bytes(i);
            if name == [DOT] {
                *skip = true;
                remaining -= 1;
            } else if name == [DOT, DOT] {
                has_dot_dot = true;
            }
        }

        if has_dot_dot {
            loop {
                let before = remaining;
                let mut prev_name: Option<usize> = None;
                for i in 0..count {
                    if ignore[i] {
                        continue;
                    }
                    if self.name_bytes(i) != [DOT, DOT] {
                        prev_name = Some(i);
                        continue;
                    }
                    match prev_name.take() {
                        Some(prev) => {
                            ignore[prev] = true;
                            ignore[i] = true;
                            remaining -= 2;
                        }
                        None => {
                            // cannot ascend past the root
                            if absolute && ignore[..i].iter().all(|&skipped| skipped) {
                                ignore[i] = true;
                                remaining -= 1;
                            }
                        }
                    }
                }
                if remaining == before {
                    break;
                }
            }
        }

        if remaining == count {
            return self.clone();
        }
        if remaining == 0 {
            return if absolute { Self::root() } else { Self::empty() };
        }

        let mut result = Vec::with_capacity(self.bytes.len());
        if absolute {
            result.push(SLASH);
        }
        let mut first = true;
        for (i, _) in ignore.iter().enumerate().filter(|(_, skipped)| !**skipped) {
            if !first {
                result.push(SLASH);
            }
            result.extend_from_slice(self.name_bytes(i));
            first = false;
        }
        Self::new(result)
    }

    /// Resolve `other` against this path.
    ///
    /// An absolute `other` replaces this path outright; otherwise the two are
    /// joined with exactly one separator.
    pub fn resolve(&self, other: &RemotePath) -> RemotePath {
        if other.is_absolute() {
            return other.clone();
        }
        Self::new(join_bytes(&self.bytes, &other.bytes))
    }

    /// [`resolve`](Self::resolve) against a parsed string.
    pub fn resolve_str(&self, other: &str) -> RemotePath {
        self.resolve(&Self::new(other))
    }

    /// Resolve `other` against this path's parent.
    pub fn resolve_sibling(&self, other: &RemotePath) -> RemotePath {
        match self.parent() {
            Some(parent) => parent.resolve(other),
            None => other.clone(),
        }
    }

    /// [`resolve_sibling`](Self::resolve_sibling) against a parsed string.
    pub fn resolve_sibling_str(&self, other: &str) -> RemotePath {
        self.resolve_sibling(&Self::new(other))
    }

    /// Construct the relative path that leads from this path to `other`.
    ///
    /// Both paths must be of the same class (absolute or relative). The
    /// common prefix is found by exact name equality, never by byte prefix.
    pub fn relativize(&self, other: &RemotePath) -> PathResult<RemotePath> {
        if self == other {
            return Ok(Self::empty());
        }
        if self.is_absolute() != other.is_absolute() {
            return Err(PathError::type_mismatch(format!(
                "cannot relativize {} against {}: one is absolute, the other relative",
                other, self
            )));
        }
        if self.is_empty() {
            return Ok(other.clone());
        }

        let base_count = self.names.len();
        let other_count = other.names.len();
        let shared = base_count.min(other_count);
        let mut common = 0;
        while common < shared && self.name_bytes(common) == other.name_bytes(common) {
            common += 1;
        }

        let dot_dots = base_count - common;
        if common < other_count {
            let remainder = other.subpath(common, other_count)?;
            if dot_dots == 0 {
                return Ok(remainder);
            }
            let mut result = Vec::with_capacity(dot_dots * 3 + remainder.bytes.len());
            for n in 0..dot_dots {
                result.extend_from_slice(b"..");
                // no trailing separator when the remainder is empty
                if !remainder.is_empty() || n + 1 < dot_dots {
                    result.push(SLASH);
                }
            }
            result.extend_from_slice(&remainder.bytes);
            Ok(Self::new(result))
        } else {
            // names matched but spelling differed (e.g. doubled separators)
            if dot_dots == 0 {
                return Ok(Self::empty());
            }
            let parts = vec![&b".."[..]; dot_dots];
            Ok(Self::new(parts.join(&SLASH)))
        }
    }

    /// Resolve a relative path against `default_dir`; absolute paths are
    /// returned unchanged.
    pub fn to_absolute(&self, default_dir: &RemotePath) -> RemotePath {
        if self.is_absolute() {
            return self.clone();
        }
        Self::new(join_bytes(&default_dir.bytes, &self.bytes))
    }

    fn name_bytes(&self, index: usize) -> &[u8] {
        &self.bytes[self.names[index].clone()]
    }
}

/// Iterator over the names of a [`RemotePath`].
pub struct Names<'a> {
    path: &'a RemotePath,
    next: usize,
}

impl Iterator for Names<'_> {
    type Item = RemotePath;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.path.names.get(self.next)?;
        self.next += 1;
        Some(RemotePath::new(&self.path.bytes[range.clone()]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.path.names.len() - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Names<'_> {}

impl<'a> IntoIterator for &'a RemotePath {
    type Item = RemotePath;
    type IntoIter = Names<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.names()
    }
}

impl PartialEq for RemotePath {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for RemotePath {}

impl Hash for RemotePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl Ord for RemotePath {
    /// Unsigned byte-wise comparison; on a shared prefix the shorter path
    /// sorts first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl PartialOrd for RemotePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemotePath").field(&self.to_string_lossy()).finish()
    }
}

impl From<&str> for RemotePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RemotePath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl FromStr for RemotePath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Find every non-empty `/`-delimited run. The empty path has one empty name.
fn scan_names(bytes: &[u8]) -> Vec<Range<usize>> {
    if bytes.is_empty() {
        return vec![0..0];
    }
    let mut names = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == SLASH {
            index += 1;
            continue;
        }
        let start = index;
        while index < bytes.len() && bytes[index] != SLASH {
            index += 1;
        }
        names.push(start..index);
    }
    names
}

fn join_bytes(base: &[u8], child: &[u8]) -> Vec<u8> {
    if child.is_empty() {
        return base.to_vec();
    }
    if base.is_empty() || child[0] == SLASH {
        return child.to_vec();
    }
    let mut result = Vec::with_capacity(base.len() + 1 + child.len());
    result.extend_from_slice(base);
    // bare root already ends in a separator
    if base != [SLASH] {
        result.push(SLASH);
    }
    result.extend_from_slice(child);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> RemotePath {
        RemotePath::new(s)
    }

    #[test]
    fn test_name_table() {
        assert_eq!(p("/").name_count(), 0);
        assert_eq!(p("").name_count(), 1);
        assert_eq!(p("/a/b/c").name_count(), 3);
        assert_eq!(p("a//b/").name_count(), 2);
        assert_eq!(p("a//b/").name(1).unwrap(), p("b"));
        assert_eq!(p("").name(0).unwrap(), p(""));
    }

    #[test]
    fn test_name_out_of_range() {
        let err = p("/a/b").name(2).unwrap_err();
        assert!(matches!(err, PathError::IllegalArgument(_)));
        assert!(p("/").name(0).is_err());
    }

    #[test]
    fn test_absolute_and_root() {
        assert!(p("/a").is_absolute());
        assert!(!p("a").is_absolute());
        assert!(!p("").is_absolute());
        assert_eq!(p("/a/b").root_component(), Some(RemotePath::root()));
        assert_eq!(p("a/b").root_component(), None);
    }

    #[test]
    fn test_file_name_and_parent() {
        assert_eq!(p("/a/b").file_name(), Some(p("b")));
        assert_eq!(p("a").file_name(), Some(p("a")));
        assert_eq!(p("/").file_name(), None);

        assert_eq!(p("/a/b").parent(), Some(p("/a")));
        assert_eq!(p("/a").parent(), Some(p("/")));
        assert_eq!(p("a").parent(), None);
        assert_eq!(p("a/b/").parent(), Some(p("a")));
        assert_eq!(p("/").parent(), None);
    }

    #[test]
    fn test_subpath() {
        assert_eq!(p("/a/b/c").subpath(0, 2).unwrap(), p("a/b"));
        assert_eq!(p("/a/b/c").subpath(1, 3).unwrap(), p("b/c"));
        assert!(p("/a/b/c").subpath(2, 2).is_err());
        assert!(p("/a/b/c").subpath(0, 4).is_err());
        assert!(p("/a/b/c").subpath(3, 4).is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(p("/a/b/../c").normalize(), p("/a/c"));
        assert_eq!(p("/a/../../b").normalize(), p("/b"));
        assert_eq!(p("a/./b").normalize(), p("a/b"));
        assert_eq!(p("a/b/c/../../..").normalize(), p(""));
        assert_eq!(p("/a/..").normalize(), p("/"));
        assert_eq!(p("../a").normalize(), p("../a"));
        assert_eq!(p("a/../../b").normalize(), p("../b"));
        assert_eq!(p("/a/b/c/d/../../../e").normalize(), p("/a/e"));
        assert_eq!(p("/a/..b/c").normalize(), p("/a/..b/c"));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(p("/a").resolve(&p("b")), p("/a/b"));
        assert_eq!(p("/").resolve(&p("b")), p("/b"));
        assert_eq!(p("/a").resolve(&p("/x/y")), p("/x/y"));
        assert_eq!(p("/a").resolve(&p("")), p("/a"));
        assert_eq!(p("").resolve(&p("b")), p("b"));
    }

    #[test]
    fn test_resolve_sibling() {
        assert_eq!(p("/a/b").resolve_sibling_str("c"), p("/a/c"));
        assert_eq!(p("a").resolve_sibling_str("c"), p("c"));
        assert_eq!(p("/a").resolve_sibling_str("c"), p("/c"));
    }

    #[test]
    fn test_relativize() {
        assert_eq!(p("/a/b/c").relativize(&p("/a/x")).unwrap(), p("../../x"));
        assert_eq!(p("/a").relativize(&p("/a/b/c")).unwrap(), p("b/c"));
        assert_eq!(p("/a/b").relativize(&p("/a")).unwrap(), p(".."));
        assert_eq!(p("/a/b/c").relativize(&p("/")).unwrap(), p("../../.."));
        assert_eq!(p("/a").relativize(&p("/a")).unwrap(), p(""));
        assert_eq!(p("a/b").relativize(&p("")).unwrap(), p("../.."));
        assert_eq!(p("").relativize(&p("a/b")).unwrap(), p("a/b"));
    }

    #[test]
    fn test_relativize_mismatched_classes() {
        let err = p("/a").relativize(&p("b")).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch(_)));
    }

    #[test]
    fn test_starts_with() {
        assert!(p("/a/b").starts_with(&p("/a")));
        assert!(!p("/ab").starts_with(&p("/a")));
        assert!(p("/a/b").starts_with(&p("/")));
        assert!(!p("a/b").starts_with(&p("/")));
        assert!(!p("/a/b").starts_with(&p("a")));
        assert!(p("a/b").starts_with_str("a"));
        assert!(!p("/a").starts_with(&p("/a/b")));
        assert!(p("").starts_with(&p("")));
        assert!(!p("/a").starts_with(&p("")));
    }

    #[test]
    fn test_ends_with() {
        assert!(p("/a/b").ends_with(&p("b")));
        assert!(p("/a/b").ends_with(&p("a/b")));
        assert!(p("/a/b").ends_with(&p("/a/b")));
        assert!(!p("/a/b").ends_with(&p("/b")));
        assert!(!p("/a/bb").ends_with(&p("b")));
        assert!(!p("a/b").ends_with(&p("/a/b")));
        assert!(p("/").ends_with(&p("/")));
        assert!(!p("/a").ends_with(&p("")));
        assert!(p("").ends_with_str(""));
    }

    #[test]
    fn test_ordering() {
        assert!(p("/a") < p("/b"));
        assert!(p("/a") < p("/a/b"));
        assert_eq!(p("/a").cmp(&p("/a")), Ordering::Equal);
        // unsigned compare: high bytes sort after ASCII
        assert!(RemotePath::new(vec![b'/', 0xff]) > p("/z"));
    }

    #[test]
    fn test_names_iterator() {
        let names: Vec<String> = p("/usr/local/bin").names().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["usr", "local", "bin"]);
        assert_eq!((&p("/x/y")).into_iter().len(), 2);
    }

    #[test]
    fn test_from_segments() {
        assert_eq!(RemotePath::from_segments("/a", &["b", "", "c"]), p("/a/b/c"));
        assert_eq!(RemotePath::from_segments("", &["b"]), p("b"));
        assert_eq!(RemotePath::from_segments("x//", &[]), p("x//"));
    }

    #[test]
    fn test_to_absolute() {
        assert_eq!(p("b/c").to_absolute(&p("/home/u")), p("/home/u/b/c"));
        assert_eq!(p("/etc").to_absolute(&p("/home/u")), p("/etc"));
    }
}
