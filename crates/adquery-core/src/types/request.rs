//! Request types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::RawEntry;

/// LDAP search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Base,
    One,
    #[default]
    Sub,
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(Scope::Base),
            "one" | "onelevel" => Ok(Scope::One),
            "sub" | "subtree" => Ok(Scope::Sub),
            other => Err(format!("unknown scope '{}'", other)),
        }
    }
}

/// Hook run on every entry before it joins a result set.
/// Returning `None` drops the entry.
pub type EntryParser = Arc<dyn Fn(RawEntry) -> Option<RawEntry> + Send + Sync>;

/// Which membership to resolve alongside a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipKind {
    All,
    User,
    Group,
}

impl FromStr for MembershipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(MembershipKind::All),
            "user" => Ok(MembershipKind::User),
            "group" => Ok(MembershipKind::Group),
            other => Err(format!("unknown membership kind '{}'", other)),
        }
    }
}

/// Whether `kinds` asks for membership of `wanted` (`all` covers both)
pub fn includes_membership(kinds: &[MembershipKind], wanted: MembershipKind) -> bool {
    kinds
        .iter()
        .any(|k| *k == MembershipKind::All || *k == wanted)
}

// ============================================================================
// Search Request
// ============================================================================

/// One logical search
#[derive(Clone, Default)]
pub struct SearchRequest {
    /// Base DN; the client default when `None`
    pub base_dn: Option<String>,
    pub filter: String,
    pub scope: Scope,
    /// Attributes to return; empty means all
    pub attributes: Vec<String>,
    /// Server-side entry limit, 0 for none
    pub size_limit: i32,
    /// Server-side time limit in seconds, 0 for none
    pub time_limit: i32,
    /// Surface tombstoned objects
    pub include_deleted: bool,
    /// Overrides the configured page size
    pub page_size: Option<i32>,
    pub entry_parser: Option<EntryParser>,
}

impl SearchRequest {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Default::default()
        }
    }

    pub fn base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }
}

impl fmt::Debug for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchRequest")
            .field("base_dn", &self.base_dn)
            .field("filter", &self.filter)
            .field("scope", &self.scope)
            .field("attributes", &self.attributes)
            .field("size_limit", &self.size_limit)
            .field("time_limit", &self.time_limit)
            .field("include_deleted", &self.include_deleted)
            .field("page_size", &self.page_size)
            .field("entry_parser", &self.entry_parser.is_some())
            .finish()
    }
}

// ============================================================================
// Query Options
// ============================================================================

/// Caller options accepted by every facade operation.
/// Unset fields fall back to the operation's defaults.
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub base_dn: Option<String>,
    pub filter: Option<String>,
    pub scope: Option<Scope>,
    /// Attributes to return; `None` selects the configured defaults,
    /// `Some(vec![])` or `["*"]` selects everything
    pub attributes: Option<Vec<String>>,
    pub size_limit: i32,
    pub time_limit: i32,
    pub include_deleted: bool,
    pub entry_parser: Option<EntryParser>,
    /// Membership to resolve; `None` uses the client configuration
    pub include_membership: Option<Vec<MembershipKind>>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    pub fn with_membership(mut self, kinds: Vec<MembershipKind>) -> Self {
        self.include_membership = Some(kinds);
        self
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("base_dn", &self.base_dn)
            .field("filter", &self.filter)
            .field("scope", &self.scope)
            .field("attributes", &self.attributes)
            .field("size_limit", &self.size_limit)
            .field("time_limit", &self.time_limit)
            .field("include_deleted", &self.include_deleted)
            .field("entry_parser", &self.entry_parser.is_some())
            .field("include_membership", &self.include_membership)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_kinds() {
        let kinds = vec![MembershipKind::All];
        assert!(includes_membership(&kinds, MembershipKind::User));
        assert!(includes_membership(&kinds, MembershipKind::Group));

        let kinds: Vec<MembershipKind> = vec!["USER".parse().unwrap()];
        assert!(includes_membership(&kinds, MembershipKind::User));
        assert!(!includes_membership(&kinds, MembershipKind::Group));
        assert!(!includes_membership(&[], MembershipKind::User));
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("base".parse::<Scope>(), Ok(Scope::Base));
        assert_eq!("subtree".parse::<Scope>(), Ok(Scope::Sub));
        assert!("deep".parse::<Scope>().is_err());
    }
}
