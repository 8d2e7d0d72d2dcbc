//! LDAP filter construction
//!
//! Turns query intents (an account name, a DN, a list of either, or a raw
//! filter) into Active Directory filter strings.

use once_cell::sync::Lazy;
use regex::Regex;

/// One or more `key=value` segments joined by commas, covering the whole value
static DISTINGUISHED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(([^=]+=.+),?)+$").expect("valid DN pattern"));

const USER_CATEGORY: &str = "(objectCategory=User)";
const GROUP_CATEGORY: &str = "(objectCategory=Group)";

/// Listing filter for `find_users`
pub const DEFAULT_USER_FILTER: &str =
    "(|(objectClass=user)(objectClass=person))(!(objectClass=computer))(!(objectClass=group))";

/// Listing filter for `find_groups`
pub const DEFAULT_GROUP_FILTER: &str =
    "(objectClass=group)(!(objectClass=computer))(!(objectClass=user))(!(objectClass=person))";

/// Longest filter written to the log before it is shortened
pub const MAX_LOG_OUTPUT: usize = 256;

/// What a user lookup is keyed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    /// Every user
    All,
    /// sAMAccountName, userPrincipalName or DN
    Id(String),
    /// Any of several identifiers
    Ids(Vec<String>),
    /// Caller filter, restricted to users
    Filter(String),
}

impl From<&str> for UserQuery {
    fn from(value: &str) -> Self {
        UserQuery::Id(value.to_string())
    }
}

impl From<String> for UserQuery {
    fn from(value: String) -> Self {
        UserQuery::Id(value)
    }
}

impl From<Vec<String>> for UserQuery {
    fn from(values: Vec<String>) -> Self {
        UserQuery::Ids(values)
    }
}

impl From<Option<&str>> for UserQuery {
    fn from(value: Option<&str>) -> Self {
        value.map(UserQuery::from).unwrap_or(UserQuery::All)
    }
}

/// Checks whether a value is a distinguished name
pub fn is_distinguished_name(value: &str) -> bool {
    !value.is_empty() && DISTINGUISHED_NAME.is_match(value)
}

/// Escapes a DN for use inside a filter.
///
/// Only double quotes and the first escaped comma are handled; this is not
/// RFC 4515 escaping and existing filters depend on exactly this output.
pub fn escape_dn(dn: &str) -> String {
    dn.replace('"', "\\\"").replacen("\\,", "\\\\,", 1)
}

/// Wraps a filter in parentheses unless it already is.
/// An empty filter stays empty.
pub fn compound_filter(filter: &str) -> String {
    if filter.is_empty() {
        return String::new();
    }
    if filter.starts_with('(') && filter.ends_with(')') {
        return filter.to_string();
    }
    format!("({})", filter)
}

fn single_user_filter(id: &str) -> String {
    if is_distinguished_name(id) {
        format!(
            "(&{}(distinguishedName={}))",
            USER_CATEGORY,
            escape_dn(id)
        )
    } else {
        format!(
            "(&{}(|(sAMAccountName={})(userPrincipalName={})))",
            USER_CATEGORY, id, id
        )
    }
}

/// Filter for a user lookup
pub fn user_filter(query: &UserQuery) -> String {
    match query {
        UserQuery::All => USER_CATEGORY.to_string(),
        UserQuery::Id(id) if id.is_empty() => USER_CATEGORY.to_string(),
        UserQuery::Id(id) => single_user_filter(id),
        UserQuery::Ids(ids) if ids.is_empty() => USER_CATEGORY.to_string(),
        UserQuery::Ids(ids) => {
            let clauses: String = ids.iter().map(|id| single_user_filter(id)).collect();
            format!("(|{})", clauses)
        }
        UserQuery::Filter(filter) => {
            if filter.contains("objectCategory=User") {
                filter.clone()
            } else {
                format!("(&{}{})", USER_CATEGORY, compound_filter(filter))
            }
        }
    }
}

/// Filter for a group lookup by common name or DN
pub fn group_filter(name: Option<&str>) -> String {
    match name {
        None | Some("") => GROUP_CATEGORY.to_string(),
        Some(name) if is_distinguished_name(name) => format!(
            "(&{}(distinguishedName={}))",
            GROUP_CATEGORY,
            escape_dn(name)
        ),
        Some(name) => format!("(&{}(cn={}))", GROUP_CATEGORY, name),
    }
}

/// Filter for several groups by common name or DN
pub fn groups_filter(names: &[String]) -> String {
    match names {
        [] => GROUP_CATEGORY.to_string(),
        [one] => group_filter(Some(one)),
        many => {
            let clauses: String = many.iter().map(|n| group_filter(Some(n))).collect();
            format!("(|{})", clauses)
        }
    }
}

/// Listing filter AND-ed with an optional caller filter
pub fn listing_filter(base: &str, extra: Option<&str>) -> String {
    match extra {
        Some(extra) if !extra.is_empty() => format!("(&{}{})", base, compound_filter(extra)),
        _ => format!("(&{})", base),
    }
}

/// `(member=<dn>)`
pub fn member_filter(dn: &str) -> String {
    format!("(member={})", escape_dn(dn))
}

/// `(distinguishedName=<dn>)`
pub fn dn_filter(dn: &str) -> String {
    format!("(distinguishedName={})", escape_dn(dn))
}

/// Bulk lookup of users and groups among a set of DNs
pub fn members_filter(dns: &[String]) -> String {
    let clauses: String = dns.iter().map(|dn| dn_filter(dn)).collect();
    format!(
        "(&(|{}{})(|{}))",
        USER_CATEGORY, GROUP_CATEGORY, clauses
    )
}

/// Shortens long log output to `prefix...suffix`
pub fn truncate_log_output(output: &str) -> String {
    truncate_to(output, MAX_LOG_OUTPUT)
}

fn truncate_to(output: &str, max: usize) -> String {
    let chars: Vec<char> = output.chars().collect();
    if chars.len() < max + 3 {
        return output.to_string();
    }

    let prefix = (max - 3).div_ceil(2);
    let suffix = (max - 3) / 2;
    let head: String = chars[..prefix].iter().collect();
    let tail: String = chars[chars.len() - suffix..].iter().collect();
    format!("{}...{}", head, tail)
}
