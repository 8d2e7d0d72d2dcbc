//! Directory entry types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute name to values, as returned by the server
pub type AttributeMap = BTreeMap<String, Vec<String>>;

// ============================================================================
// Raw Entry
// ============================================================================

/// One directory object exactly as the server returned it.
///
/// Range-qualified attributes (`member;range=0-1499`) are merged into their
/// plain name while a search session runs; once a session hands an entry
/// out, no range-qualified keys remain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Distinguished name
    pub dn: String,

    /// Attribute values
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: AttributeMap::new(),
        }
    }

    /// Builder helper used by connections and tests
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// The stored key for an attribute, compared case-insensitively
    pub fn key_of(&self, name: &str) -> Option<&str> {
        self.attributes
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(|k| k.as_str())
    }

    /// All values of an attribute; empty when absent
    pub fn values(&self, name: &str) -> &[String] {
        self.key_of(name)
            .and_then(|k| self.attributes.get(k))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// First value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(|s| s.as_str())
    }

    /// Whether an attribute carries at least one value
    pub fn has(&self, name: &str) -> bool {
        !self.values(name).is_empty()
    }
}

// ============================================================================
// Classified Entry
// ============================================================================

/// Classification of a directory object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    Group,
    Other,
}

/// A classified, attribute-projected directory object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// User, group or anything else
    pub kind: EntryKind,

    /// Distinguished name
    pub dn: String,

    /// Projected attributes
    #[serde(flatten)]
    pub attributes: AttributeMap,

    /// Resolved group membership, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<DirectoryEntry>>,
}

impl DirectoryEntry {
    pub fn new(kind: EntryKind, raw: RawEntry) -> Self {
        Self {
            kind,
            dn: raw.dn,
            attributes: raw.attributes,
            groups: None,
        }
    }

    /// All values of an attribute (case-insensitive name)
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// First value of an attribute
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(|s| s.as_str())
    }

    /// Common name, if projected
    pub fn common_name(&self) -> Option<&str> {
        self.get("cn")
    }

    /// Name used to order groups: common name, else DN
    pub fn sort_key(&self) -> &str {
        self.common_name().unwrap_or(&self.dn)
    }

    pub fn is_user(&self) -> bool {
        self.kind == EntryKind::User
    }

    pub fn is_group(&self) -> bool {
        self.kind == EntryKind::Group
    }
}

// ============================================================================
// Operation Results
// ============================================================================

/// Result of a generic find, split by classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindResult {
    pub users: Vec<DirectoryEntry>,
    pub groups: Vec<DirectoryEntry>,
    pub other: Vec<DirectoryEntry>,
}

impl FindResult {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty() && self.other.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.groups.len() + self.other.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_lookup_ignores_case() {
        let entry = RawEntry::new("CN=Jane,DC=example,DC=com")
            .with_attribute("sAMAccountName", ["jane"])
            .with_attribute("objectClass", ["top", "person", "user"]);

        assert_eq!(entry.first("samaccountname"), Some("jane"));
        assert_eq!(entry.values("OBJECTCLASS").len(), 3);
        assert!(entry.values("mail").is_empty());
        assert!(!entry.has("mail"));
    }

    #[test]
    fn test_entry_serializes_flat() {
        let raw = RawEntry::new("CN=Admins,DC=example,DC=com").with_attribute("cn", ["Admins"]);
        let group = DirectoryEntry::new(EntryKind::Group, raw);

        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["dn"], "CN=Admins,DC=example,DC=com");
        assert_eq!(json["cn"][0], "Admins");
        assert_eq!(json["kind"], "group");
        assert!(json.get("groups").is_none());
        assert_eq!(group.sort_key(), "Admins");
    }
}
