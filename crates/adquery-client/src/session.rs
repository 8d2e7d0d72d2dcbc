//! Search sessions
//!
//! A session turns one [`SearchRequest`] into every physical search needed
//! to answer it: the primary search, one follow-up per truncated
//! range-qualified attribute and one nested search per allowed referral.
//! Outstanding physical searches live in a single set; the session is
//! finished when that set is empty.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use adquery_core::config::ReferralConfig;
use adquery_core::types::{EntryParser, RangedAttribute, RawEntry, SearchRequest};
use adquery_core::{ClientConfig, DirectoryError, DirectoryResult};

use crate::connection::{DirectoryConnection, DirectoryConnector, SearchEvent, SearchParams};
use crate::filter::{dn_filter, truncate_log_output};
use crate::limiter::{ConcurrencyLimiter, FailurePolicy, SEARCH_POOL};

// ============================================================================
// Referral Policy
// ============================================================================

/// Decides which referral URIs a session follows
#[derive(Debug, Clone)]
pub struct ReferralPolicy {
    enabled: bool,
    exclude: Vec<Regex>,
}

impl ReferralPolicy {
    pub fn from_config(config: &ReferralConfig) -> DirectoryResult<Self> {
        let exclude = config
            .exclude
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        DirectoryError::Config(format!(
                            "Invalid referral exclusion '{}': {}",
                            pattern, e
                        ))
                    })
            })
            .collect::<DirectoryResult<Vec<_>>>()?;

        Ok(Self {
            enabled: config.enabled,
            exclude,
        })
    }

    /// Referrals never followed
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            exclude: Vec::new(),
        }
    }

    pub fn allows(&self, uri: &str) -> bool {
        if !self.enabled || uri.is_empty() {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(uri))
    }
}

/// Splits `ldap://host:port/BASE??scope` into a server URL and base DN
fn parse_referral(uri: &str) -> DirectoryResult<(String, String)> {
    let parsed = Url::parse(uri)
        .map_err(|e| DirectoryError::InvalidArgument(format!("bad referral '{}': {}", uri, e)))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| DirectoryError::InvalidArgument(format!("referral '{}' has no host", uri)))?;

    let server = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };

    let path = parsed.path().trim_start_matches('/');
    let base_dn = percent_decode_str(path).decode_utf8_lossy().into_owned();

    Ok((server, base_dn))
}

// ============================================================================
// Session
// ============================================================================

/// Entries of a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub entries: Vec<RawEntry>,
    /// The server stopped early at a size limit
    pub truncated: bool,
}

/// How physical searches authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bind {
    /// Configured service account
    Service,
    Anonymous,
}

/// Where a physical search is sent
#[derive(Debug, Clone)]
struct Origin {
    url: String,
    base_dn: String,
    /// Referral URI the search descends from, if any
    referral: Option<String>,
}

#[derive(Debug)]
enum Operation {
    Primary,
    Referral { url: String },
    /// Next slice of range-qualified attributes for the entry in `slot`.
    /// `referral` is set when the entry was found by chasing one.
    Range {
        slot: usize,
        referral: Option<String>,
    },
}

#[derive(Debug, Default)]
struct Physical {
    entries: Vec<RawEntry>,
    references: Vec<String>,
    truncated: bool,
}

/// An entry collected by the session and where it came from
struct Slot {
    entry: RawEntry,
    origin: Origin,
}

type Pending<'a> = BoxFuture<'a, (Operation, DirectoryResult<Physical>)>;

/// Runs search sessions against one directory
pub struct SearchEngine {
    connector: Arc<dyn DirectoryConnector>,
    config: Arc<ClientConfig>,
    referrals: ReferralPolicy,
    limiter: Arc<ConcurrencyLimiter>,
    entry_parser: Option<EntryParser>,
}

impl SearchEngine {
    pub fn new(
        connector: Arc<dyn DirectoryConnector>,
        config: Arc<ClientConfig>,
        limiter: Arc<ConcurrencyLimiter>,
    ) -> DirectoryResult<Self> {
        let referrals = ReferralPolicy::from_config(&config.referrals)?;
        Ok(Self {
            connector,
            config,
            referrals,
            limiter,
            entry_parser: None,
        })
    }

    /// Client-wide entry hook; a request's own hook wins
    pub fn with_entry_parser(mut self, parser: Option<EntryParser>) -> Self {
        self.entry_parser = parser;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    pub fn connector(&self) -> &Arc<dyn DirectoryConnector> {
        &self.connector
    }

    /// Runs a session against the configured server as the service account
    pub async fn search(&self, request: &SearchRequest) -> DirectoryResult<SearchOutcome> {
        self.search_at(&self.config.url, Bind::Service, request)
            .await
    }

    /// Runs a session against any server
    pub async fn search_at(
        &self,
        url: &str,
        bind: Bind,
        request: &SearchRequest,
    ) -> DirectoryResult<SearchOutcome> {
        let started = Instant::now();
        let base_dn = request
            .base_dn
            .clone()
            .unwrap_or_else(|| self.config.base_dn.clone());
        let params = self.params_for(request);

        debug!(
            "Querying directory ({}) with filter \"{}\" for {:?}",
            base_dn,
            truncate_log_output(&params.filter),
            params.attributes
        );

        let mut pending: FuturesUnordered<Pending<'_>> = FuturesUnordered::new();
        pending.push(self.dispatch(
            Operation::Primary,
            Origin {
                url: url.to_string(),
                base_dn: base_dn.clone(),
                referral: None,
            },
            bind,
            params.clone(),
        ));

        let mut slots: Vec<Slot> = Vec::new();
        let mut truncated = false;
        let mut failure: Option<DirectoryError> = None;

        while let Some((operation, result)) = pending.next().await {
            let physical = match result {
                Ok(physical) => physical,
                Err(e) => {
                    self.on_operation_error(&operation, &base_dn, e, &mut failure);
                    continue;
                }
            };

            // Draining after a failure: remaining searches only need to settle.
            if failure.is_some() {
                continue;
            }

            truncated |= physical.truncated;

            let origin = match &operation {
                Operation::Primary => Origin {
                    url: url.to_string(),
                    base_dn: base_dn.clone(),
                    referral: None,
                },
                Operation::Referral { url } => match parse_referral(url) {
                    Ok((server, base_dn)) => Origin {
                        url: server,
                        base_dn,
                        referral: Some(url.clone()),
                    },
                    Err(_) => continue,
                },
                Operation::Range { slot, referral } => {
                    let followups = merge_range_slice(&mut slots[*slot].entry, physical.entries);
                    if !followups.is_empty() {
                        let origin = slots[*slot].origin.clone();
                        pending.push(self.dispatch(
                            Operation::Range {
                                slot: *slot,
                                referral: referral.clone(),
                            },
                            origin,
                            bind,
                            range_params(&params, &slots[*slot].entry.dn, followups),
                        ));
                    }
                    continue;
                }
            };

            for mut entry in physical.entries {
                let followups = fold_ranges(&mut entry);
                let slot = slots.len();
                if !followups.is_empty() {
                    debug!(
                        "Attribute range retrieval specifiers {:?} found for \"{}\"",
                        followups, entry.dn
                    );
                    pending.push(self.dispatch(
                        Operation::Range {
                            slot,
                            referral: origin.referral.clone(),
                        },
                        origin.clone(),
                        bind,
                        range_params(&params, &entry.dn, followups),
                    ));
                }
                slots.push(Slot {
                    entry,
                    origin: origin.clone(),
                });
            }

            for uri in physical.references {
                if !self.referrals.allows(&uri) {
                    trace!("Ignoring referral {}", uri);
                    continue;
                }
                match parse_referral(&uri) {
                    Ok((server, referral_base)) => {
                        debug!("Following LDAP referral chase at {}", uri);
                        pending.push(self.dispatch(
                            Operation::Referral { url: uri.clone() },
                            Origin {
                                url: server,
                                base_dn: referral_base,
                                referral: Some(uri.clone()),
                            },
                            bind,
                            params.clone(),
                        ));
                    }
                    Err(e) => warn!("Skipping referral: {}", e),
                }
            }
        }

        if let Some(e) = failure {
            let e = match e {
                DirectoryError::Timeout { .. } => DirectoryError::Timeout {
                    elapsed: started.elapsed(),
                },
                other => other,
            };
            return Err(e);
        }

        let parser = request.entry_parser.as_ref().or(self.entry_parser.as_ref());
        let entries: Vec<RawEntry> = slots
            .into_iter()
            .filter_map(|slot| match parser {
                Some(parse) => parse(slot.entry),
                None => Some(slot.entry),
            })
            .collect();

        info!(
            "Directory search ({}) for \"{}\" returned {} entries{}",
            base_dn,
            truncate_log_output(&params.filter),
            entries.len(),
            if truncated { " (size limit reached)" } else { "" }
        );

        Ok(SearchOutcome { entries, truncated })
    }

    fn on_operation_error(
        &self,
        operation: &Operation,
        base_dn: &str,
        e: DirectoryError,
        failure: &mut Option<DirectoryError>,
    ) {
        match (operation, e) {
            (Operation::Referral { url }, e) => {
                error!(
                    "[{}] An error occurred chasing the LDAP referral on {}: {}",
                    e.code(),
                    url,
                    e
                );
            }
            (Operation::Range { slot, referral: Some(url) }, e) => {
                error!(
                    "[{}] Range retrieval for entry {} found through referral {} failed, keeping values so far: {}",
                    e.code(),
                    slot,
                    url,
                    e
                );
            }
            (_, DirectoryError::ConnectionReset(message)) => {
                warn!("Ignoring connection reset during search on {}: {}", base_dn, message);
            }
            (_, e) => {
                error!(
                    "[{}] An error occurred performing the requested LDAP search on {}: {}",
                    e.code(),
                    base_dn,
                    e
                );
                if failure.is_none() {
                    *failure = Some(e);
                }
            }
        }
    }

    fn params_for(&self, request: &SearchRequest) -> SearchParams {
        SearchParams {
            filter: request.filter.clone(),
            scope: request.scope,
            attributes: request.attributes.clone(),
            size_limit: request.size_limit,
            time_limit: request.time_limit,
            page_size: request.page_size.unwrap_or(self.config.page_size),
            show_deleted: request.include_deleted,
        }
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::retry(self.config.search_retry_attempts)
            .with_timeout(self.config.search_timeout_seconds.map(Duration::from_secs))
    }

    /// Queues one physical search behind the shared search pool
    fn dispatch(
        &self,
        operation: Operation,
        origin: Origin,
        bind: Bind,
        params: SearchParams,
    ) -> Pending<'_> {
        async move {
            let policy = self.failure_policy();
            let result = self
                .limiter
                .run(SEARCH_POOL, self.config.max_searches_at_once, policy, || {
                    self.physical_search(&origin, bind, &params)
                })
                .await;
            (operation, result)
        }
        .boxed()
    }

    /// Connect, bind, search and always unbind
    async fn physical_search(
        &self,
        origin: &Origin,
        bind: Bind,
        params: &SearchParams,
    ) -> DirectoryResult<Physical> {
        let mut connection = self.connector.connect(&origin.url).await?;
        let result = self
            .collect(connection.as_mut(), origin, bind, params)
            .await;

        if let Err(e) = connection.unbind().await {
            debug!("Unbind from {} failed: {}", origin.url, e);
        }

        result
    }

    async fn collect(
        &self,
        connection: &mut dyn DirectoryConnection,
        origin: &Origin,
        bind: Bind,
        params: &SearchParams,
    ) -> DirectoryResult<Physical> {
        match bind {
            Bind::Service => {
                connection
                    .bind(&self.config.bind_dn, &self.config.bind_password)
                    .await?
            }
            Bind::Anonymous => connection.bind("", "").await?,
        }

        let mut events = connection.search(&origin.base_dn, params).await?;
        let mut physical = Physical::default();

        loop {
            match events.next().await {
                Ok(Some(SearchEvent::Entry(entry))) => physical.entries.push(entry),
                Ok(Some(SearchEvent::Reference(uris))) => physical.references.extend(uris),
                Ok(None) => break,
                Err(DirectoryError::SizeLimitExceeded) => {
                    debug!("Size limit reached on {}", origin.base_dn);
                    physical.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(physical)
    }
}

// ============================================================================
// Range Retrieval
// ============================================================================

/// Moves range-qualified values onto their plain attribute name and returns
/// the specifiers of the slices still to fetch
fn fold_ranges(entry: &mut RawEntry) -> Vec<String> {
    let ranged: Vec<(String, RangedAttribute)> = entry
        .attributes
        .keys()
        .filter_map(|key| RangedAttribute::parse(key).map(|r| (key.clone(), r)))
        .collect();

    let mut followups = Vec::new();
    for (key, range) in ranged {
        let values = entry.attributes.remove(&key).unwrap_or_default();
        append_values(entry, &range.name, values);
        if let Some(next) = range.next() {
            followups.push(next.to_string());
        }
    }
    followups
}

/// Appends a follow-up slice to the entry it belongs to
fn merge_range_slice(entry: &mut RawEntry, slice: Vec<RawEntry>) -> Vec<String> {
    let Some(mut item) = slice.into_iter().next() else {
        return Vec::new();
    };

    let followups = fold_ranges(&mut item);
    for (name, values) in item.attributes {
        if entry.key_of(&name).is_some() {
            append_values(entry, &name, values);
        }
    }
    followups
}

fn append_values(entry: &mut RawEntry, name: &str, values: Vec<String>) {
    let key = entry
        .key_of(name)
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string());
    entry.attributes.entry(key).or_default().extend(values);
}

fn range_params(base: &SearchParams, dn: &str, attributes: Vec<String>) -> SearchParams {
    SearchParams {
        filter: dn_filter(dn),
        attributes,
        ..base.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_fold_ranges() {
        let mut entry = RawEntry::new("CN=Big,DC=corp,DC=com")
            .with_attribute("cn", ["Big"])
            .with_attribute("member;range=0-1499", values("a", 1500));

        let followups = fold_ranges(&mut entry);
        assert_eq!(followups, vec!["member;range=1500-*".to_string()]);
        assert_eq!(entry.values("member").len(), 1500);
        assert!(entry.attributes.keys().all(|k| !k.contains(";range=")));
    }

    #[test]
    fn test_merge_final_slice() {
        let mut entry = RawEntry::new("CN=Big,DC=corp,DC=com")
            .with_attribute("member;range=0-1499", values("a", 1500));
        fold_ranges(&mut entry);

        let slice = RawEntry::new("CN=Big,DC=corp,DC=com")
            .with_attribute("member;range=1500-*", values("b", 7));
        let followups = merge_range_slice(&mut entry, vec![slice]);

        assert!(followups.is_empty());
        let members = entry.values("member");
        assert_eq!(members.len(), 1507);
        assert_eq!(members[0], "a0");
        assert_eq!(members[1500], "b0");
        assert_eq!(entry.attributes.len(), 1);
    }

    #[test]
    fn test_merge_intermediate_slice() {
        let mut entry = RawEntry::new("CN=Big,DC=corp,DC=com")
            .with_attribute("member;range=0-1499", values("a", 1500));
        fold_ranges(&mut entry);

        let slice = RawEntry::new("CN=Big,DC=corp,DC=com")
            .with_attribute("member;range=1500-2999", values("b", 1500));
        let followups = merge_range_slice(&mut entry, vec![slice]);

        assert_eq!(followups, vec!["member;range=3000-*".to_string()]);
        assert_eq!(entry.values("member").len(), 3000);
    }

    #[test]
    fn test_referral_policy() {
        let policy = ReferralPolicy::from_config(&ReferralConfig {
            enabled: true,
            ..Default::default()
        })
        .unwrap();

        assert!(policy.allows("ldap://child.corp.com/DC=child,DC=corp,DC=com"));
        assert!(!policy.allows("ldap://ForestDnsZones.corp.com/DC=ForestDnsZones,DC=corp,DC=com"));
        assert!(!policy.allows("LDAP://domaindnszones.corp.com/DC=DomainDnsZones,DC=corp,DC=com"));
        assert!(!policy.allows("ldap://corp.com/CN=Configuration,DC=corp,DC=com"));
        assert!(!policy.allows(""));

        let disabled = ReferralPolicy::from_config(&ReferralConfig::default()).unwrap();
        assert!(!disabled.allows("ldap://child.corp.com/DC=child,DC=corp,DC=com"));
    }

    #[test]
    fn test_parse_referral() {
        let (server, base) =
            parse_referral("ldap://child.corp.com:389/DC=child,DC=corp,DC=com??sub").unwrap();
        assert_eq!(server, "ldap://child.corp.com:389");
        assert_eq!(base, "DC=child,DC=corp,DC=com");

        let (server, base) = parse_referral("ldaps://dc2/OU=Some%20Unit,DC=corp").unwrap();
        assert_eq!(server, "ldaps://dc2");
        assert_eq!(base, "OU=Some Unit,DC=corp");

        assert!(parse_referral("not a url").is_err());
    }
}
