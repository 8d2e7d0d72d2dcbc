//! Attribute selection and entry classification

use once_cell::sync::Lazy;
use regex::Regex;

use adquery_core::types::{
    includes_membership, AttributeMap, EntryKind, MembershipKind, RawEntry,
};

static USER_SCHEMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)CN=Person,CN=Schema,CN=Configuration,.*").expect("valid user schema pattern")
});

static GROUP_SCHEMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)CN=Group,CN=Schema,CN=Configuration,.*").expect("valid group schema pattern")
});

/// Whether an attribute list selects every attribute
pub fn includes_all_attributes(attributes: &[String]) -> bool {
    attributes.is_empty() || attributes.iter().any(|a| a == "*")
}

/// Union of attribute lists in first-seen order.
/// Any list selecting everything makes the union select everything.
pub fn join_attributes(lists: &[&[String]]) -> Vec<String> {
    if lists.iter().any(|l| includes_all_attributes(l)) {
        return Vec::new();
    }

    let mut joined: Vec<String> = Vec::new();
    for list in lists {
        for attribute in list.iter() {
            if !joined.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
                joined.push(attribute.clone());
            }
        }
    }
    joined
}

/// Attributes user lookups need for recursion, on top of the caller's
pub fn required_user_attributes(
    attributes: Option<&[String]>,
    membership: &[MembershipKind],
) -> Vec<String> {
    if attributes.map(includes_all_attributes).unwrap_or(false) {
        return Vec::new();
    }

    let mut required = vec!["dn".to_string(), "cn".to_string()];
    if includes_membership(membership, MembershipKind::User) {
        required.push("member".to_string());
    }
    required
}

/// Shorthand for building attribute lists from literals
pub fn attrs(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn object_class_contains(entry: &RawEntry, class: &str) -> bool {
    entry
        .values("objectClass")
        .iter()
        .any(|c| c.eq_ignore_ascii_case(class))
}

/// Group test: `groupType`, then the schema category, then `objectClass`
pub fn is_group(entry: &RawEntry) -> bool {
    if entry.has("groupType") {
        return true;
    }
    if let Some(category) = entry.first("objectCategory") {
        return GROUP_SCHEMA.is_match(category);
    }
    object_class_contains(entry, "group")
}

/// User test: `userPrincipalName`, then the schema category, then `objectClass`
pub fn is_user(entry: &RawEntry) -> bool {
    if entry.has("userPrincipalName") {
        return true;
    }
    if let Some(category) = entry.first("objectCategory") {
        return USER_SCHEMA.is_match(category);
    }
    object_class_contains(entry, "user")
}

/// Classifies an entry. The group test runs first, so an entry carrying both
/// `groupType` and `userPrincipalName` is a group.
pub fn classify(entry: &RawEntry) -> EntryKind {
    if is_group(entry) {
        EntryKind::Group
    } else if is_user(entry) {
        EntryKind::User
    } else {
        EntryKind::Other
    }
}

/// Keeps only the wanted attributes that exist on the entry.
/// Empty or `*` keeps the entry unchanged.
pub fn project(entry: RawEntry, wanted: &[String]) -> RawEntry {
    if includes_all_attributes(wanted) {
        return entry;
    }

    let RawEntry { dn, attributes } = entry;
    let projected: AttributeMap = attributes
        .into_iter()
        .filter(|(name, _)| wanted.iter().any(|w| w.eq_ignore_ascii_case(name)))
        .collect();

    RawEntry {
        dn,
        attributes: projected,
    }
}
