//! Capability tags advertised by nodes.
//!
//! The substrate never interprets a tag; it only compares them when routing
//! a method to a peer that can serve it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// A single capability tag, e.g. `storage-access`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(String);

impl Capability {
    pub const STORAGE_ACCESS: &'static str = "storage-access";
    pub const LANGUAGE_MODEL: &'static str = "language-model";
    pub const INFERENCE_LOGIC: &'static str = "inference-logic";
    pub const VALIDATION_LOGIC: &'static str = "validation-logic";
    pub const INTERACTIVE_IO: &'static str = "interactive-io";
    pub const SCHEMA_MANAGEMENT: &'static str = "schema-management";

    /// Create a capability tag. Tags must be non-empty and whitespace-free.
    pub fn new(tag: impl Into<String>) -> Result<Self, TypesError> {
        let tag = tag.into();
        if tag.is_empty() || tag.chars().any(char::is_whitespace) {
            return Err(TypesError::InvalidCapability(tag));
        }
        Ok(Self(tag))
    }

    /// Wrap a tag literal. Only for tags known to be well-formed, such as
    /// the constants above.
    pub fn from_static(tag: &'static str) -> Self {
        debug_assert!(Self::new(tag).is_ok(), "malformed capability literal {tag:?}");
        Self(tag.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Capability {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Capability {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set of capability tags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a set from string tags, rejecting the first malformed one.
    pub fn parse<I, S>(tags: I) -> Result<Self, TypesError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tags.into_iter()
            .map(Capability::new)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn from_static(tags: &[&'static str]) -> Self {
        tags.iter().copied().map(Capability::from_static).collect()
    }

    pub fn insert(&mut self, cap: Capability) -> bool {
        self.0.insert(cap)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|c| c.as_str() == tag)
    }

    /// Whether every capability in `required` is present in `self`.
    pub fn contains_all(&self, required: &CapabilitySet) -> bool {
        required.0.is_subset(&self.0)
    }

    /// Number of tags shared with `other`.
    pub fn overlap(&self, other: &CapabilitySet) -> usize {
        self.0.intersection(&other.0).count()
    }

    /// Number of tags in `self` that `other` lacks.
    pub fn novelty_over(&self, other: &CapabilitySet) -> usize {
        self.0.difference(&other.0).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.0.iter().map(Capability::as_str).collect();
        write!(f, "[{}]", tags.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tags: &[&str]) -> CapabilitySet {
        CapabilitySet::parse(tags.iter().copied()).unwrap()
    }

    #[test]
    fn rejects_empty_and_whitespace_tags() {
        assert!(Capability::new("").is_err());
        assert!(Capability::new("storage access").is_err());
        assert!(Capability::new("storage-access").is_ok());
    }

    #[test]
    fn contains_all_is_subset() {
        let node = set(&["storage-access", "language-model"]);
        assert!(node.contains_all(&set(&["storage-access"])));
        assert!(node.contains_all(&CapabilitySet::new()));
        assert!(!node.contains_all(&set(&["storage-access", "validation-logic"])));
    }

    #[test]
    fn overlap_and_novelty() {
        let a = set(&["a", "b", "c"]);
        let b = set(&["b", "c", "d"]);
        assert_eq!(a.overlap(&b), 2);
        assert_eq!(b.novelty_over(&a), 1);
    }

    #[test]
    fn deserialize_validates_tags() {
        let ok: CapabilitySet = serde_json::from_str(r#"["x","y"]"#).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_str::<CapabilitySet>(r#"["bad tag"]"#).is_err());
    }

    #[test]
    fn display_lists_sorted_tags() {
        assert_eq!(set(&["b", "a"]).to_string(), "[a,b]");
    }
}
