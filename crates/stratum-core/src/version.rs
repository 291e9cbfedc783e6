//! Schema version identifiers and the registered-version catalog.
//!
//! A store is stamped with a version tag in the canonical form
//! `V{major}_{minor}_{patch}` (e.g. `V2_1_0`). Parsing also accepts the short
//! forms `V{major}` and `V{major}_{minor}`, defaulting the missing parts to 0.
//!
//! Valid migration hops are defined by a [`VersionCatalog`], never by
//! arithmetic on version numbers: `V1_9_0 -> V2_0_0` is a single hop if and
//! only if no registered version sits between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a version tag is not in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVersionError {
    /// The tag is empty.
    #[error("empty version tag")]
    Empty,

    /// The tag does not start with `V`.
    #[error("version tag {0:?} must start with 'V'")]
    MissingPrefix(String),

    /// The tag has more than three components.
    #[error("version tag {0:?} has too many components")]
    TooManyComponents(String),

    /// A component is not a canonical unsigned integer.
    #[error("version tag {tag:?} has invalid component {component:?}")]
    InvalidComponent {
        /// The full tag being parsed.
        tag: String,
        /// The offending component.
        component: String,
    },
}

/// An immutable schema version, ordered by (major, minor, patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionIdentifier {
    major: u32,
    minor: u32,
    patch: u32,
}

impl VersionIdentifier {
    /// Create a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version tag (`V2`, `V2_1` or `V2_1_0`).
    pub fn parse(tag: &str) -> Result<Self, ParseVersionError> {
        if tag.is_empty() {
            return Err(ParseVersionError::Empty);
        }
        let body = tag
            .strip_prefix('V')
            .ok_or_else(|| ParseVersionError::MissingPrefix(tag.to_string()))?;

        let mut parts = [0u32; 3];
        let mut count = 0;
        for component in body.split('_') {
            if count == parts.len() {
                return Err(ParseVersionError::TooManyComponents(tag.to_string()));
            }
            parts[count] = parse_component(tag, component)?;
            count += 1;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }

    /// Major component.
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Minor component.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Patch component.
    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// Canonical tag, always with all three components.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

fn parse_component(tag: &str, component: &str) -> Result<u32, ParseVersionError> {
    let invalid = || ParseVersionError::InvalidComponent {
        tag: tag.to_string(),
        component: component.to_string(),
    };

    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    // Leading zeros would not survive a round trip through `tag()`.
    if component.len() > 1 && component.starts_with('0') {
        return Err(invalid());
    }
    component.parse().map_err(|_| invalid())
}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}_{}_{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionIdentifier {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionIdentifier {
    type Error = ParseVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionIdentifier> for String {
    fn from(version: VersionIdentifier) -> Self {
        version.tag()
    }
}

/// The sorted set of schema versions the application knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCatalog {
    versions: Vec<VersionIdentifier>,
}

impl VersionCatalog {
    /// Build a catalog from any set of versions. Duplicates are dropped.
    pub fn new(versions: impl IntoIterator<Item = VersionIdentifier>) -> Self {
        let mut versions: Vec<_> = versions.into_iter().collect();
        versions.sort();
        versions.dedup();
        Self { versions }
    }

    /// Build a catalog from version tags.
    pub fn from_tags<S: AsRef<str>>(
        tags: impl IntoIterator<Item = S>,
    ) -> Result<Self, ParseVersionError> {
        let versions = tags
            .into_iter()
            .map(|tag| VersionIdentifier::parse(tag.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(versions))
    }

    /// Register an additional version.
    pub fn register(&mut self, version: VersionIdentifier) {
        if let Err(pos) = self.versions.binary_search(&version) {
            self.versions.insert(pos, version);
        }
    }

    /// The newest registered version.
    pub fn latest(&self) -> Option<VersionIdentifier> {
        self.versions.last().copied()
    }

    /// The oldest registered version.
    pub fn earliest(&self) -> Option<VersionIdentifier> {
        self.versions.first().copied()
    }

    /// Check whether a version is registered.
    pub fn contains(&self, version: &VersionIdentifier) -> bool {
        self.versions.binary_search(version).is_ok()
    }

    /// Resolve a tag to a registered version.
    pub fn resolve(&self, tag: &str) -> Option<VersionIdentifier> {
        VersionIdentifier::parse(tag)
            .ok()
            .filter(|version| self.contains(version))
    }

    /// The registered version immediately after `version`.
    pub fn successor(&self, version: &VersionIdentifier) -> Option<VersionIdentifier> {
        let idx = match self.versions.binary_search(version) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        };
        self.versions.get(idx).copied()
    }

    /// Registered versions in `(from, to]`, in ascending order.
    ///
    /// Empty when `from >= to`.
    pub fn sequence(&self, from: &VersionIdentifier, to: &VersionIdentifier) -> Vec<VersionIdentifier> {
        if from >= to {
            return Vec::new();
        }
        self.versions
            .iter()
            .copied()
            .filter(|v| v > from && v <= to)
            .collect()
    }

    /// Single-hop pairs walking the catalog from `from` to `to`.
    ///
    /// Returns `None` unless both endpoints are registered and `from <= to`.
    pub fn hops(
        &self,
        from: &VersionIdentifier,
        to: &VersionIdentifier,
    ) -> Option<Vec<(VersionIdentifier, VersionIdentifier)>> {
        if !self.contains(from) || !self.contains(to) || from > to {
            return None;
        }

        let mut hops = Vec::new();
        let mut current = *from;
        for next in self.sequence(from, to) {
            hops.push((current, next));
            current = next;
        }
        Some(hops)
    }

    /// Number of registered versions.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Check if no versions are registered.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Iterate over registered versions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &VersionIdentifier> {
        self.versions.iter()
    }
}

impl FromIterator<VersionIdentifier> for VersionCatalog {
    fn from_iter<I: IntoIterator<Item = VersionIdentifier>>(iter: I) -> Self {
        Self::new(iter)
    }
}
