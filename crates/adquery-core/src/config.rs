//! Configuration for adquery
//!
//! A [`ClientConfig`] is built once and owned by a single directory client.
//! Nothing here is shared or mutated after construction.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};
use crate::types::MembershipKind;
use crate::{DEFAULT_MEMBERSHIP_CHUNK_SIZE, DEFAULT_PAGE_SIZE};

/// Directory client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// LDAP server URL (ldap:// or ldaps://)
    /// Example: "ldap://dc.example.com:389"
    #[serde(default = "default_url")]
    pub url: String,

    /// Default base DN all queries originate from
    /// Example: "dc=example,dc=com"
    #[serde(default)]
    pub base_dn: String,

    /// Optional per-kind base DNs
    #[serde(default)]
    pub base_dns: BaseDns,

    /// Bind DN (or userPrincipalName) of the service account
    #[serde(default)]
    pub bind_dn: String,

    /// Bind password
    #[serde(default)]
    pub bind_password: String,

    /// Use STARTTLS for connection upgrade
    #[serde(default)]
    pub start_tls: bool,

    /// Skip TLS certificate verification (not recommended for production)
    #[serde(default)]
    pub skip_tls_verify: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Referral chasing policy
    #[serde(default)]
    pub referrals: ReferralConfig,

    /// Default attribute projections per entity kind
    #[serde(default)]
    pub attributes: DefaultAttributes,

    /// Ceiling on simultaneously open directory searches
    #[serde(default = "default_max_searches")]
    pub max_searches_at_once: usize,

    /// Ceiling on simultaneously running membership chunk searches
    #[serde(default = "default_max_membership_chunks")]
    pub max_membership_chunks_at_once: usize,

    /// Page size attached to searches
    #[serde(default = "default_page_size")]
    pub page_size: i32,

    /// Member DNs per bulk membership search
    #[serde(default = "default_chunk_size")]
    pub membership_chunk_size: usize,

    /// Retries of a physical search after a transient failure
    #[serde(default = "default_retry_attempts")]
    pub search_retry_attempts: u32,

    /// Upper bound on one physical search, in seconds
    #[serde(default)]
    pub search_timeout_seconds: Option<u64>,

    /// Membership to resolve when a request does not say otherwise
    #[serde(default)]
    pub include_membership: Vec<MembershipKind>,
}

fn default_url() -> String {
    "ldap://localhost:389".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_max_searches() -> usize {
    100
}

fn default_max_membership_chunks() -> usize {
    20
}

fn default_page_size() -> i32 {
    DEFAULT_PAGE_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_MEMBERSHIP_CHUNK_SIZE
}

fn default_retry_attempts() -> u32 {
    1
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            base_dn: String::new(),
            base_dns: BaseDns::default(),
            bind_dn: String::new(),
            bind_password: String::new(),
            start_tls: false,
            skip_tls_verify: false,
            timeout_seconds: default_timeout(),
            referrals: ReferralConfig::default(),
            attributes: DefaultAttributes::default(),
            max_searches_at_once: default_max_searches(),
            max_membership_chunks_at_once: default_max_membership_chunks(),
            page_size: default_page_size(),
            membership_chunk_size: default_chunk_size(),
            search_retry_attempts: default_retry_attempts(),
            search_timeout_seconds: None,
            include_membership: Vec::new(),
        }
    }
}

/// Base DN overrides for user, group and generic queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseDns {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// Which base DN a query should start from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDnKind {
    User,
    Group,
    Default,
}

/// Referral chasing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Follow search references at all
    #[serde(default)]
    pub enabled: bool,

    /// Case-insensitive patterns of referral URLs never followed
    #[serde(default = "default_referral_exclusions")]
    pub exclude: Vec<String>,
}

/// Active Directory hands out these partitions as referrals on most
/// searches; following them only multiplies traffic.
fn default_referral_exclusions() -> Vec<String> {
    vec![
        r"ldaps?://ForestDnsZones\..*/.*".to_string(),
        r"ldaps?://DomainDnsZones\..*/.*".to_string(),
        r"ldaps?://.*/CN=Configuration,.*".to_string(),
    ]
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            exclude: default_referral_exclusions(),
        }
    }
}

/// Attributes returned for users and groups when a request names none
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultAttributes {
    #[serde(default = "default_user_attributes")]
    pub user: Vec<String>,
    #[serde(default = "default_group_attributes")]
    pub group: Vec<String>,
}

fn default_user_attributes() -> Vec<String> {
    [
        "dn",
        "userPrincipalName",
        "sAMAccountName",
        "mail",
        "lockoutTime",
        "whenCreated",
        "pwdLastSet",
        "userAccountControl",
        "employeeID",
        "sn",
        "givenName",
        "initials",
        "cn",
        "displayName",
        "comment",
        "description",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_group_attributes() -> Vec<String> {
    ["dn", "cn", "description"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DefaultAttributes {
    fn default() -> Self {
        Self {
            user: default_user_attributes(),
            group: default_group_attributes(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for a server, base DN and service account
    pub fn new(
        url: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: bind_password.into(),
            ..Default::default()
        }
    }

    /// Build configuration from `ADQUERY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ADQUERY_URL") {
            config.url = url;
        }
        if let Ok(base_dn) = std::env::var("ADQUERY_BASE_DN") {
            config.base_dn = base_dn;
        }
        if let Ok(bind_dn) = std::env::var("ADQUERY_BIND_DN") {
            config.bind_dn = bind_dn;
        }
        if let Ok(password) = std::env::var("ADQUERY_BIND_PASSWORD") {
            config.bind_password = password;
        }
        if std::env::var("ADQUERY_REFERRALS")
            .map(|v| v == "true")
            .unwrap_or(false)
        {
            config.referrals.enabled = true;
        }
        if std::env::var("ADQUERY_START_TLS")
            .map(|v| v == "true")
            .unwrap_or(false)
        {
            config.start_tls = true;
        }
        if let Ok(max) = std::env::var("ADQUERY_MAX_SEARCHES") {
            if let Ok(m) = max.parse() {
                config.max_searches_at_once = m;
            }
        }

        config
    }

    /// Base DN for a query kind. Per-kind overrides win over the default.
    pub fn base_dn_for(&self, kind: BaseDnKind) -> &str {
        let specific = match kind {
            BaseDnKind::User => self.base_dns.user.as_deref(),
            BaseDnKind::Group => self.base_dns.group.as_deref(),
            BaseDnKind::Default => None,
        };

        specific
            .or(self.base_dns.default.as_deref())
            .unwrap_or(&self.base_dn)
    }

    /// Validate configuration
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.url.is_empty() {
            return Err(DirectoryError::Config("Server URL is required".to_string()));
        }

        if !self.url.starts_with("ldap://") && !self.url.starts_with("ldaps://") {
            return Err(DirectoryError::Config(
                "Server URL must start with ldap:// or ldaps://".to_string(),
            ));
        }

        if self.page_size <= 0 {
            return Err(DirectoryError::Config(
                "Page size must be positive".to_string(),
            ));
        }

        if self.membership_chunk_size == 0 {
            return Err(DirectoryError::Config(
                "Membership chunk size must be positive".to_string(),
            ));
        }

        for pattern in &self.referrals.exclude {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    DirectoryError::Config(format!(
                        "Invalid referral exclusion '{}': {}",
                        pattern, e
                    ))
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig {
            url: String::new(),
            ..Default::default()
        };

        // Should fail - empty server URL
        assert!(config.validate().is_err());

        config.url = "http://dc.example.com".to_string();
        assert!(config.validate().is_err());

        config.url = "ldaps://dc.example.com:636".to_string();
        assert!(config.validate().is_ok());

        config.referrals.exclude.push("ldap://(unclosed".to_string());
        assert!(matches!(config.validate(), Err(DirectoryError::Config(_))));
    }

    #[test]
    fn test_base_dn_resolution() {
        let mut config = ClientConfig::new(
            "ldap://dc.example.com",
            "dc=example,dc=com",
            "admin@example.com",
            "secret",
        );
        assert_eq!(config.base_dn_for(BaseDnKind::User), "dc=example,dc=com");

        config.base_dns.user = Some("ou=people,dc=example,dc=com".to_string());
        config.base_dns.default = Some("ou=corp,dc=example,dc=com".to_string());

        assert_eq!(
            config.base_dn_for(BaseDnKind::User),
            "ou=people,dc=example,dc=com"
        );
        assert_eq!(
            config.base_dn_for(BaseDnKind::Group),
            "ou=corp,dc=example,dc=com"
        );
        assert_eq!(
            config.base_dn_for(BaseDnKind::Default),
            "ou=corp,dc=example,dc=com"
        );
    }

    #[test]
    fn test_defaults_from_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            url = "ldap://dc.example.com"
            base_dn = "dc=example,dc=com"

            [referrals]
            enabled = true
            "#,
        )
        .unwrap();

        assert!(config.referrals.enabled);
        assert_eq!(config.referrals.exclude.len(), 3);
        assert_eq!(config.page_size, 1000);
        assert!(config.attributes.group.contains(&"cn".to_string()));
        assert_eq!(config.search_retry_attempts, 1);
    }
}
