//! In-memory directory used to drive the client end to end

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use adquery_client::{
    ConcurrencyLimiter, DirectoryClient, DirectoryConnection, DirectoryConnector, SearchEvent,
    SearchEvents, SearchParams,
};
use adquery_core::types::{RangedAttribute, RawEntry, Scope};
use adquery_core::{ClientConfig, DirectoryError, DirectoryResult};

pub const URL: &str = "ldap://dc.corp.com";
pub const BASE: &str = "DC=corp,DC=com";
pub const USERS: &str = "OU=Users,DC=corp,DC=com";
pub const GROUPS: &str = "OU=Groups,DC=corp,DC=com";
pub const SERVICE_DN: &str = "CN=svc,OU=Users,DC=corp,DC=com";
pub const SERVICE_PASSWORD: &str = "svc-secret";

const PERSON_CATEGORY: &str = "CN=Person,CN=Schema,CN=Configuration,DC=corp,DC=com";
const GROUP_CATEGORY: &str = "CN=Group,CN=Schema,CN=Configuration,DC=corp,DC=com";

pub fn user(name: &str) -> RawEntry {
    RawEntry::new(format!("CN={},{}", name, USERS))
        .with_attribute("cn", [name])
        .with_attribute("sAMAccountName", [name])
        .with_attribute("userPrincipalName", [format!("{}@corp.com", name)])
        .with_attribute("mail", [format!("{}@corp.com", name)])
        .with_attribute("objectCategory", [PERSON_CATEGORY])
        .with_attribute("objectClass", ["top", "person", "organizationalPerson", "user"])
}

pub fn user_dn(name: &str) -> String {
    format!("CN={},{}", name, USERS)
}

pub fn group(name: &str, members: &[String]) -> RawEntry {
    let entry = RawEntry::new(group_dn(name))
        .with_attribute("cn", [name])
        .with_attribute("description", [format!("{} group", name)])
        .with_attribute("groupType", ["-2147483646"])
        .with_attribute("objectCategory", [GROUP_CATEGORY])
        .with_attribute("objectClass", ["top", "group"]);

    if members.is_empty() {
        entry
    } else {
        entry.with_attribute("member", members.to_vec())
    }
}

pub fn group_dn(name: &str) -> String {
    format!("CN={},{}", name, GROUPS)
}

pub fn config() -> ClientConfig {
    ClientConfig::new(URL, BASE, SERVICE_DN, SERVICE_PASSWORD)
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
    Substring(String, String),
}

fn parse_filter(input: &str) -> Filter {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    parse_at(&chars, &mut pos)
}

fn parse_at(chars: &[char], pos: &mut usize) -> Filter {
    assert_eq!(chars[*pos], '(', "filter must start with '('");
    *pos += 1;

    let filter = match chars[*pos] {
        '&' | '|' => {
            let op = chars[*pos];
            *pos += 1;
            let mut parts = Vec::new();
            while chars[*pos] == '(' {
                parts.push(parse_at(chars, pos));
            }
            if op == '&' {
                Filter::And(parts)
            } else {
                Filter::Or(parts)
            }
        }
        '!' => {
            *pos += 1;
            Filter::Not(Box::new(parse_at(chars, pos)))
        }
        _ => {
            let start = *pos;
            while chars[*pos] != ')' {
                *pos += 1;
            }
            let item: String = chars[start..*pos].iter().collect();
            let (attr, value) = item.split_once('=').expect("attribute assertion");
            if value == "*" {
                Filter::Present(attr.to_string())
            } else if value.contains('*') {
                Filter::Substring(attr.to_string(), value.to_string())
            } else {
                Filter::Equal(attr.to_string(), value.to_string())
            }
        }
    };

    assert_eq!(chars[*pos], ')', "unbalanced filter");
    *pos += 1;
    filter
}

fn glob_match(pattern: &str, value: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let value = value.to_ascii_lowercase();
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value.as_str();

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if let Some(idx) = rest.find(part) {
            rest = &rest[idx + part.len()..];
        } else {
            return false;
        }
    }

    pattern.ends_with('*') || parts.last().map(|p| value.ends_with(p)).unwrap_or(true)
}

fn category_matches(entry: &RawEntry, wanted: &str) -> bool {
    let Some(category) = entry.first("objectCategory") else {
        return false;
    };
    let name = category
        .split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .map(|(_, v)| v)
        .unwrap_or("");

    name.eq_ignore_ascii_case(wanted)
        || (wanted.eq_ignore_ascii_case("user") && name.eq_ignore_ascii_case("person"))
}

fn matches(filter: &Filter, entry: &RawEntry) -> bool {
    match filter {
        Filter::And(parts) => parts.iter().all(|f| matches(f, entry)),
        Filter::Or(parts) => parts.iter().any(|f| matches(f, entry)),
        Filter::Not(inner) => !matches(inner, entry),
        Filter::Present(attr) => attr.eq_ignore_ascii_case("objectClass") || entry.has(attr),
        Filter::Equal(attr, value) => {
            if attr.eq_ignore_ascii_case("distinguishedName") {
                entry.dn.eq_ignore_ascii_case(value)
            } else if attr.eq_ignore_ascii_case("objectCategory") && !value.contains('=') {
                category_matches(entry, value)
            } else {
                entry.values(attr).iter().any(|v| v.eq_ignore_ascii_case(value))
            }
        }
        Filter::Substring(attr, pattern) => {
            entry.values(attr).iter().any(|v| glob_match(pattern, v))
        }
    }
}

fn in_scope(entry: &RawEntry, base: &str, scope: Scope) -> bool {
    let dn = entry.dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    match scope {
        Scope::Base => dn == base,
        Scope::One => dn
            .split_once(',')
            .map(|(_, parent)| parent == base)
            .unwrap_or(false),
        Scope::Sub => base.is_empty() || dn == base || dn.ends_with(&format!(",{}", base)),
    }
}

// ============================================================================
// Directory
// ============================================================================

/// One recorded physical search
#[derive(Debug, Clone)]
pub struct RecordedSearch {
    pub url: String,
    pub base_dn: String,
    pub params: SearchParams,
}

#[derive(Default)]
pub struct Stats {
    pub connections: AtomicUsize,
    pub binds: AtomicUsize,
    pub searches: AtomicUsize,
    pub unbinds: AtomicUsize,
    open: AtomicUsize,
    pub peak_open: AtomicUsize,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// One in-memory directory server
pub struct MemoryDirectory {
    pub url: String,
    entries: Mutex<Vec<RawEntry>>,
    root_dse: Mutex<Option<RawEntry>>,
    credentials: Mutex<HashMap<String, String>>,
    /// Values per range slice; unlimited when `None`
    range_size: Mutex<Option<usize>>,
    /// Server-side result cap
    size_limit: Mutex<Option<usize>>,
    references: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<DirectoryError>>,
    /// Every range follow-up fails with this error
    range_failure: Mutex<Option<DirectoryError>>,
    latency: Mutex<Duration>,
    pub stats: Stats,
    pub log: Mutex<Vec<RecordedSearch>>,
}

impl MemoryDirectory {
    pub fn new(url: &str) -> Arc<Self> {
        let directory = Self {
            url: url.to_string(),
            entries: Mutex::new(Vec::new()),
            root_dse: Mutex::new(None),
            credentials: Mutex::new(HashMap::new()),
            range_size: Mutex::new(None),
            size_limit: Mutex::new(None),
            references: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            range_failure: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            stats: Stats::default(),
            log: Mutex::new(Vec::new()),
        };
        directory
            .credentials
            .lock()
            .insert(SERVICE_DN.to_ascii_lowercase(), SERVICE_PASSWORD.to_string());
        Arc::new(directory)
    }

    pub fn add(&self, entry: RawEntry) -> &Self {
        self.entries.lock().push(entry);
        self
    }

    pub fn add_all(&self, entries: impl IntoIterator<Item = RawEntry>) -> &Self {
        self.entries.lock().extend(entries);
        self
    }

    pub fn set_password(&self, principal: &str, password: &str) {
        self.credentials
            .lock()
            .insert(principal.to_ascii_lowercase(), password.to_string());
    }

    pub fn set_root_dse(&self, entry: RawEntry) {
        *self.root_dse.lock() = Some(entry);
    }

    pub fn set_range_size(&self, size: usize) {
        *self.range_size.lock() = Some(size);
    }

    pub fn set_size_limit(&self, limit: usize) {
        *self.size_limit.lock() = Some(limit);
    }

    pub fn add_reference(&self, uri: &str) {
        self.references.lock().push(uri.to_string());
    }

    /// The next searches fail with these errors, in order
    pub fn fail_next(&self, error: DirectoryError) {
        self.failures.lock().push_back(error);
    }

    pub fn fail_range_retrievals(&self, error: DirectoryError) {
        *self.range_failure.lock() = Some(error);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn searches(&self) -> Vec<RecordedSearch> {
        self.log.lock().clone()
    }

    pub fn searches_with_filter_prefix(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|s| s.params.filter.starts_with(prefix))
            .count()
    }

    fn check_bind(&self, dn: &str, password: &str) -> DirectoryResult<()> {
        if dn.is_empty() && password.is_empty() {
            return Ok(());
        }
        match self.credentials.lock().get(&dn.to_ascii_lowercase()) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(DirectoryError::InvalidCredentials(
                "80090308: LdapErr: DSID-0C09042A, comment: AcceptSecurityContext error"
                    .to_string(),
            )),
        }
    }

    /// Attributes of `entry` the request selects, range-sliced
    fn select(&self, entry: &RawEntry, params: &SearchParams) -> RawEntry {
        let range_size = *self.range_size.lock();
        let all = params.attributes.is_empty() || params.attributes.iter().any(|a| a == "*");
        let mut selected = RawEntry::new(entry.dn.clone());

        let requested: Vec<(String, u32)> = if all {
            entry.attributes.keys().map(|k| (k.clone(), 0)).collect()
        } else {
            params
                .attributes
                .iter()
                .filter_map(|a| match RangedAttribute::parse(a) {
                    Some(range) => entry.key_of(&range.name).map(|k| (k.to_string(), range.low)),
                    None => entry.key_of(a).map(|k| (k.to_string(), 0)),
                })
                .collect()
        };

        for (key, low) in requested {
            let values = entry.values(&key);
            let low = low as usize;
            match range_size {
                Some(size) if values.len() > size || low > 0 => {
                    let end = (low + size).min(values.len());
                    let slice = values[low.min(values.len())..end].to_vec();
                    let name = if end >= values.len() {
                        format!("{};range={}-*", key, low)
                    } else {
                        format!("{};range={}-{}", key, low, end - 1)
                    };
                    selected.attributes.insert(name, slice);
                }
                _ => {
                    selected.attributes.insert(key, values.to_vec());
                }
            }
        }

        selected
    }

    fn run_search(&self, base_dn: &str, params: &SearchParams) -> VecDeque<DirectoryResult<SearchEvent>> {
        let mut events = VecDeque::new();

        if let Some(error) = self.failures.lock().pop_front() {
            events.push_back(Err(error));
            return events;
        }

        let range_followup = params.attributes.iter().any(|a| RangedAttribute::is_ranged(a));
        if range_followup {
            if let Some(error) = self.range_failure.lock().clone() {
                events.push_back(Err(error));
                return events;
            }
        }

        if base_dn.is_empty() && params.scope == Scope::Base {
            if let Some(dse) = self.root_dse.lock().clone() {
                events.push_back(Ok(SearchEvent::Entry(self.select(&dse, params))));
            }
            return events;
        }

        let filter = parse_filter(&params.filter);
        let size_limit = *self.size_limit.lock();
        let mut sent = 0;

        for entry in self.entries.lock().iter() {
            if !in_scope(entry, base_dn, params.scope) || !matches(&filter, entry) {
                continue;
            }
            let tombstone = entry
                .first("isDeleted")
                .map(|v| v.eq_ignore_ascii_case("TRUE"))
                .unwrap_or(false);
            if tombstone && !params.show_deleted {
                continue;
            }
            if size_limit.map(|limit| sent >= limit).unwrap_or(false) {
                events.push_back(Err(DirectoryError::SizeLimitExceeded));
                return events;
            }
            events.push_back(Ok(SearchEvent::Entry(self.select(entry, params))));
            sent += 1;
        }

        let references = self.references.lock().clone();
        if !range_followup && !references.is_empty() {
            events.push_back(Ok(SearchEvent::Reference(references)));
        }

        events
    }
}

// ============================================================================
// Connections
// ============================================================================

/// Connector serving any number of in-memory servers by URL
#[derive(Clone, Default)]
pub struct MemoryConnector {
    servers: Arc<Mutex<HashMap<String, Arc<MemoryDirectory>>>>,
}

impl MemoryConnector {
    pub fn new(servers: &[&Arc<MemoryDirectory>]) -> Arc<Self> {
        let connector = Self::default();
        for server in servers {
            connector
                .servers
                .lock()
                .insert(server.url.clone(), Arc::clone(server));
        }
        Arc::new(connector)
    }
}

#[async_trait]
impl DirectoryConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        let server = self
            .servers
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| DirectoryError::Connection(format!("connect ECONNREFUSED {}", url)))?;

        server.stats.connections.fetch_add(1, Ordering::SeqCst);
        let open = server.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        server.stats.peak_open.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(MemoryConnection {
            server,
            closed: false,
        }))
    }
}

struct MemoryConnection {
    server: Arc<MemoryDirectory>,
    closed: bool,
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        self.server.stats.binds.fetch_add(1, Ordering::SeqCst);
        self.server.check_bind(dn, password)
    }

    async fn search(
        &mut self,
        base_dn: &str,
        params: &SearchParams,
    ) -> DirectoryResult<Box<dyn SearchEvents>> {
        self.server.stats.searches.fetch_add(1, Ordering::SeqCst);
        self.server.log.lock().push(RecordedSearch {
            url: self.server.url.clone(),
            base_dn: base_dn.to_string(),
            params: params.clone(),
        });

        let latency = *self.server.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        Ok(Box::new(MemoryEvents {
            events: self.server.run_search(base_dn, params),
        }))
    }

    async fn unbind(&mut self) -> DirectoryResult<()> {
        if !self.closed {
            self.closed = true;
            self.server.stats.unbinds.fetch_add(1, Ordering::SeqCst);
            self.server.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryEvents {
    events: VecDeque<DirectoryResult<SearchEvent>>,
}

#[async_trait]
impl SearchEvents for MemoryEvents {
    async fn next(&mut self) -> DirectoryResult<Option<SearchEvent>> {
        match self.events.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Client over the given servers with a private limiter
pub fn client_for(config: ClientConfig, servers: &[&Arc<MemoryDirectory>]) -> DirectoryClient {
    DirectoryClient::builder(config)
        .connector(MemoryConnector::new(servers))
        .limiter(Arc::new(ConcurrencyLimiter::new()))
        .build()
        .expect("valid test configuration")
}

pub fn client(directory: &Arc<MemoryDirectory>) -> DirectoryClient {
    client_for(config(), &[directory])
}
