use std::borrow::Borrow;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::{ObservationError, Result};

/// A path to an attribute, supporting both simple names and dotted sub-paths.
/// For simple attributes like `count` the path has a single segment; for `owner.name` it has two.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Arc<str>);

impl KeyPath {
    /// Parse a single path. Empty paths and paths with empty segments (`a..b`, `.a`) are rejected.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(ObservationError::InvalidPath(path.to_string()));
        }
        Ok(Self(Arc::from(path)))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// The first segment (e.g. `owner` for `owner.name`)
    pub fn root(&self) -> &str { self.segments().next().unwrap_or(&self.0) }

    pub fn segments(&self) -> impl Iterator<Item = &str> { self.0.split('.') }

    /// Check if this is a simple attribute name (no sub-path)
    pub fn is_simple(&self) -> bool { !self.0.contains('.') }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

impl Borrow<str> for KeyPath {
    fn borrow(&self) -> &str { &self.0 }
}

impl AsRef<str> for KeyPath {
    fn as_ref(&self) -> &str { &self.0 }
}

/// Anything that names one or more key paths: a single name, or any collection of names.
pub trait IntoKeyPaths {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>>;
}

/// Normalize a path specification into its set of canonical key paths, duplicates removed.
pub fn normalize(spec: impl IntoKeyPaths) -> Result<BTreeSet<KeyPath>> { spec.into_key_paths() }

fn collect<I>(names: I) -> Result<BTreeSet<KeyPath>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    names.into_iter().map(|name| KeyPath::parse(name.as_ref())).collect()
}

impl IntoKeyPaths for &str {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { Ok(BTreeSet::from([KeyPath::parse(self)?])) }
}

impl IntoKeyPaths for String {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { self.as_str().into_key_paths() }
}

impl IntoKeyPaths for &String {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { self.as_str().into_key_paths() }
}

impl IntoKeyPaths for KeyPath {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { Ok(BTreeSet::from([self])) }
}

impl<S: AsRef<str>> IntoKeyPaths for Vec<S> {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { collect(self) }
}

impl<S: AsRef<str>> IntoKeyPaths for &[S] {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { collect(self) }
}

impl<S: AsRef<str>, const N: usize> IntoKeyPaths for [S; N] {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { collect(self) }
}

impl<S: AsRef<str>> IntoKeyPaths for HashSet<S> {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { collect(self) }
}

impl<S: AsRef<str>> IntoKeyPaths for BTreeSet<S> {
    fn into_key_paths(self) -> Result<BTreeSet<KeyPath>> { collect(self) }
}
