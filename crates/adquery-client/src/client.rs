//! Directory client
//!
//! Public operations over users, groups and deleted objects. Each read
//! resolves a filter and attribute list, runs one search session, then
//! classifies and projects what came back. Membership is resolved on
//! request before results are returned.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, trace, warn};

use adquery_core::config::BaseDnKind;
use adquery_core::types::{
    includes_membership, DirectoryEntry, EntryKind, EntryParser, FindResult, MembershipKind,
    QueryOptions, RawEntry, Scope, SearchRequest,
};
use adquery_core::{ClientConfig, DirectoryError, DirectoryResult};

use crate::attributes::{
    attrs, classify, includes_all_attributes, join_attributes, project, required_user_attributes,
};
use crate::connection::{DirectoryConnector, LdapConnector};
use crate::filter::{
    group_filter, is_distinguished_name, listing_filter, truncate_log_output, user_filter,
    UserQuery, DEFAULT_GROUP_FILTER, DEFAULT_USER_FILTER,
};
use crate::limiter::ConcurrencyLimiter;
use crate::observer::{DirectoryObserver, TracingObserver};
use crate::resolver::{GroupResolver, ResolveOptions};
use crate::session::{Bind, SearchEngine};

/// Attributes requested for deleted objects on top of the caller's
const DELETED_OBJECT_ATTRIBUTES: &[&str] = &[
    "attributeID",
    "attributeSyntax",
    "dnReferenceUpdate",
    "dNSHostName",
    "flatName",
    "governsID",
    "groupType",
    "instanceType",
    "lDAPDisplayName",
    "legacyExchangeDN",
    "mS-DS-CreatorSID",
    "mSMQOwnerID",
    "nCName",
    "objectClass",
    "objectGUID",
    "objectSid",
    "oMSyntax",
    "proxiedObjectName",
    "replPropertyMetaData",
    "sAMAccountName",
    "securityIdentifier",
    "sIDHistory",
    "subClassOf",
    "systemFlags",
    "trustPartner",
    "trustDirection",
    "trustType",
    "trustAttributes",
    "userAccountControl",
    "uSNChanged",
    "uSNCreated",
    "whenCreated",
    "msDS-AdditionalSamAccountName",
    "msDS-Auxiliary-Classes",
    "msDS-Entry-Time-To-Die",
    "msDS-IntId",
    "msSFU30NisDomain",
    "nTSecurityDescriptor",
    "uid",
];

const MATCH_ALL: &str = "(objectClass=*)";

/// Result of a credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub authenticated: bool,
    /// Why the bind failed
    pub error: Option<DirectoryError>,
}

impl AuthOutcome {
    fn failed(error: DirectoryError) -> Self {
        Self {
            authenticated: false,
            error: Some(error),
        }
    }
}

/// Builder for [`DirectoryClient`]
pub struct DirectoryClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn DirectoryConnector>>,
    limiter: Option<Arc<ConcurrencyLimiter>>,
    observer: Option<Arc<dyn DirectoryObserver>>,
    entry_parser: Option<EntryParser>,
}

impl DirectoryClientBuilder {
    /// Use another connection backend (the default is `ldap3`)
    pub fn connector(mut self, connector: Arc<dyn DirectoryConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a private limiter instead of the process-wide one
    pub fn limiter(mut self, limiter: Arc<ConcurrencyLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DirectoryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Hook applied to every entry unless a request brings its own
    pub fn entry_parser(mut self, parser: EntryParser) -> Self {
        self.entry_parser = Some(parser);
        self
    }

    pub fn build(self) -> DirectoryResult<DirectoryClient> {
        self.config.validate()?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(LdapConnector::new(&self.config)));
        let limiter = self.limiter.unwrap_or_else(ConcurrencyLimiter::global);
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingObserver));

        let config = Arc::new(self.config);
        let engine = Arc::new(
            SearchEngine::new(connector, Arc::clone(&config), limiter)?
                .with_entry_parser(self.entry_parser),
        );

        info!(
            "Directory client ready for {} (base {})",
            config.url, config.base_dn
        );

        Ok(DirectoryClient {
            resolver: GroupResolver::new(Arc::clone(&engine)),
            config,
            engine,
            observer,
        })
    }
}

/// Active Directory client
pub struct DirectoryClient {
    config: Arc<ClientConfig>,
    engine: Arc<SearchEngine>,
    resolver: GroupResolver,
    observer: Arc<dyn DirectoryObserver>,
}

impl DirectoryClient {
    /// Client over `ldap3`, sharing the process-wide limiter
    pub fn new(config: ClientConfig) -> DirectoryResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> DirectoryClientBuilder {
        DirectoryClientBuilder {
            config,
            connector: None,
            limiter: None,
            observer: None,
            entry_parser: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn membership(&self, options: &QueryOptions) -> Vec<MembershipKind> {
        options
            .include_membership
            .clone()
            .unwrap_or_else(|| self.config.include_membership.clone())
    }

    fn base_dn(&self, options: &QueryOptions, kind: BaseDnKind) -> String {
        options
            .base_dn
            .clone()
            .unwrap_or_else(|| self.config.base_dn_for(kind).to_string())
    }

    fn request(
        &self,
        filter: String,
        options: &QueryOptions,
        kind: BaseDnKind,
        attributes: Vec<String>,
    ) -> SearchRequest {
        SearchRequest {
            base_dn: Some(self.base_dn(options, kind)),
            filter,
            scope: options.scope.unwrap_or_default(),
            attributes,
            size_limit: options.size_limit,
            time_limit: options.time_limit,
            include_deleted: options.include_deleted,
            page_size: None,
            entry_parser: options.entry_parser.clone(),
        }
    }

    /// Caller attributes, or the configured defaults for a kind
    fn wanted<'a>(&'a self, options: &'a QueryOptions, kind: EntryKind) -> &'a [String] {
        match (&options.attributes, kind) {
            (Some(attributes), _) => attributes,
            (None, EntryKind::Group) => &self.config.attributes.group,
            (None, _) => &self.config.attributes.user,
        }
    }

    fn group_resolve_options(&self, options: &QueryOptions) -> ResolveOptions {
        ResolveOptions::new(self.wanted(options, EntryKind::Group).to_vec())
            .with_base_dn(options.base_dn.clone())
    }

    /// Attaches transitive group membership to an entry
    async fn attach_groups(
        &self,
        entry: &mut DirectoryEntry,
        options: &QueryOptions,
    ) -> DirectoryResult<()> {
        let groups = self
            .resolver
            .groups_containing(&entry.dn, &self.group_resolve_options(options))
            .await?;
        entry.groups = Some(groups);
        Ok(())
    }

    async fn attach_groups_to_all(
        &self,
        entries: &mut [DirectoryEntry],
        options: &QueryOptions,
    ) -> DirectoryResult<()> {
        let resolve = self.group_resolve_options(options);
        let lookups = entries
            .iter()
            .map(|e| self.resolver.groups_containing(&e.dn, &resolve));
        let resolved = join_all(lookups).await;

        for (entry, groups) in entries.iter_mut().zip(resolved) {
            entry.groups = Some(groups?);
        }
        Ok(())
    }

    fn settle<T>(&self, operation: &str, result: DirectoryResult<T>) -> DirectoryResult<T> {
        match &result {
            Ok(_) => self.observer.on_done(operation),
            Err(e) => self.observer.on_error(operation, e),
        }
        result
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// First user matching an account name, UPN or DN
    pub async fn find_user(
        &self,
        query: impl Into<UserQuery>,
        options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>> {
        let query = query.into();
        let result = self.find_user_inner(&query, options).await;
        self.settle("find_user", result)
    }

    async fn find_user_inner(
        &self,
        query: &UserQuery,
        options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>> {
        trace!("find_user({:?}, {:?})", query, options);
        let membership = self.membership(options);
        let wanted = self.wanted(options, EntryKind::User);
        let filter = options
            .filter
            .clone()
            .unwrap_or_else(|| user_filter(query));
        let attributes = join_attributes(&[
            wanted,
            &required_user_attributes(options.attributes.as_deref(), &membership),
        ]);

        let request = self.request(filter, options, BaseDnKind::User, attributes);
        let outcome = self.engine.search(&request).await?;
        let count = outcome.entries.len();

        let Some(first) = outcome.entries.into_iter().next() else {
            warn!(
                "User {:?} not found for query \"{}\"",
                query,
                truncate_log_output(&request.filter)
            );
            return Ok(None);
        };

        let mut user = DirectoryEntry::new(EntryKind::User, project(first, wanted));
        info!(
            "{} user(s) found for query \"{}\". Returning first user: {}",
            count,
            truncate_log_output(&request.filter),
            user.dn
        );

        if includes_membership(&membership, MembershipKind::User) {
            self.attach_groups(&mut user, options).await?;
        }

        self.observer.on_user(&user);
        Ok(Some(user))
    }

    /// Every user matching the listing filter AND-ed with `options.filter`
    pub async fn find_users(&self, options: &QueryOptions) -> DirectoryResult<Vec<DirectoryEntry>> {
        let result = self.find_users_inner(options).await;
        self.settle("find_users", result)
    }

    async fn find_users_inner(&self, options: &QueryOptions) -> DirectoryResult<Vec<DirectoryEntry>> {
        let membership = self.membership(options);
        let wanted = self.wanted(options, EntryKind::User);
        let filter = listing_filter(DEFAULT_USER_FILTER, options.filter.as_deref());
        let attributes = join_attributes(&[
            wanted,
            &required_user_attributes(options.attributes.as_deref(), &membership),
            &attrs(&["objectCategory", "objectClass", "userPrincipalName", "groupType"]),
        ]);

        let request = self.request(filter, options, BaseDnKind::User, attributes);
        let outcome = self.engine.search(&request).await?;

        let mut users: Vec<DirectoryEntry> = outcome
            .entries
            .into_iter()
            .filter(|e| classify(e) == EntryKind::User)
            .map(|e| DirectoryEntry::new(EntryKind::User, project(e, wanted)))
            .collect();

        if users.is_empty() {
            warn!(
                "No users found matching query \"{}\"",
                truncate_log_output(&request.filter)
            );
        }

        if includes_membership(&membership, MembershipKind::User) {
            self.attach_groups_to_all(&mut users, options).await?;
        }

        for user in &users {
            self.observer.on_user(user);
        }
        self.observer.on_users(&users);
        Ok(users)
    }

    pub async fn user_exists(
        &self,
        query: impl Into<UserQuery>,
        options: &QueryOptions,
    ) -> DirectoryResult<bool> {
        let query = query.into();
        let options = QueryOptions {
            include_membership: Some(Vec::new()),
            ..options.clone()
        };
        let exists = self.find_user(query.clone(), &options).await?.is_some();
        info!("{:?} {} exist", query, if exists { "DOES" } else { "DOES NOT" });
        Ok(exists)
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// First group matching a common name or DN
    pub async fn find_group(
        &self,
        name: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>> {
        let result = self.find_group_inner(name, options).await;
        self.settle("find_group", result)
    }

    async fn find_group_inner(
        &self,
        name: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>> {
        let membership = self.membership(options);
        let wanted = self.wanted(options, EntryKind::Group);
        let filter = options
            .filter
            .clone()
            .unwrap_or_else(|| group_filter(Some(name)));
        let attributes = join_attributes(&[
            wanted,
            &required_user_attributes(options.attributes.as_deref(), &membership),
        ]);

        let request = self.request(filter, options, BaseDnKind::Group, attributes);
        let outcome = self.engine.search(&request).await?;
        let count = outcome.entries.len();

        let Some(first) = outcome.entries.into_iter().next() else {
            warn!(
                "Group \"{}\" not found for query \"{}\"",
                name,
                truncate_log_output(&request.filter)
            );
            return Ok(None);
        };

        let mut group = DirectoryEntry::new(EntryKind::Group, project(first, wanted));
        info!(
            "{} group(s) found for query \"{}\". Returning first group: {}",
            count,
            truncate_log_output(&request.filter),
            group.dn
        );

        if includes_membership(&membership, MembershipKind::Group) {
            self.attach_groups(&mut group, options).await?;
        }

        self.observer.on_group(&group);
        Ok(Some(group))
    }

    /// Every group matching the listing filter AND-ed with `options.filter`
    pub async fn find_groups(&self, options: &QueryOptions) -> DirectoryResult<Vec<DirectoryEntry>> {
        let result = self.find_groups_inner(options).await;
        self.settle("find_groups", result)
    }

    async fn find_groups_inner(&self, options: &QueryOptions) -> DirectoryResult<Vec<DirectoryEntry>> {
        let membership = self.membership(options);
        let wanted = self.wanted(options, EntryKind::Group);
        let filter = listing_filter(DEFAULT_GROUP_FILTER, options.filter.as_deref());
        let attributes = join_attributes(&[
            wanted,
            &required_user_attributes(options.attributes.as_deref(), &membership),
            &attrs(&["groupType", "objectCategory", "objectClass"]),
        ]);

        let request = self.request(filter, options, BaseDnKind::Group, attributes);
        let outcome = self.engine.search(&request).await?;

        let mut groups: Vec<DirectoryEntry> = outcome
            .entries
            .into_iter()
            .filter(|e| classify(e) == EntryKind::Group)
            .map(|e| DirectoryEntry::new(EntryKind::Group, project(e, wanted)))
            .collect();

        if groups.is_empty() {
            warn!(
                "No groups found matching query \"{}\"",
                truncate_log_output(&request.filter)
            );
        }

        if includes_membership(&membership, MembershipKind::Group) {
            self.attach_groups_to_all(&mut groups, options).await?;
        }

        for group in &groups {
            self.observer.on_group(group);
        }
        self.observer.on_groups(&groups);
        Ok(groups)
    }

    pub async fn group_exists(&self, name: &str, options: &QueryOptions) -> DirectoryResult<bool> {
        let options = QueryOptions {
            include_membership: Some(Vec::new()),
            ..options.clone()
        };
        let exists = self.find_group(name, &options).await?.is_some();
        info!("\"{}\" {} exist", name, if exists { "DOES" } else { "DOES NOT" });
        Ok(exists)
    }

    // ========================================================================
    // Generic Search
    // ========================================================================

    /// Runs `options.filter` and splits the results into users, groups and
    /// everything else
    pub async fn find(&self, options: &QueryOptions) -> DirectoryResult<FindResult> {
        let result = self.find_inner(options).await;
        self.settle("find", result)
    }

    async fn find_inner(&self, options: &QueryOptions) -> DirectoryResult<FindResult> {
        let filter = match options.filter.as_deref() {
            Some(f) if !f.is_empty() => f.to_string(),
            _ => {
                return Err(DirectoryError::InvalidArgument(
                    "find requires a filter".to_string(),
                ))
            }
        };

        let membership = self.membership(options);
        let user_wanted = self.wanted(options, EntryKind::User);
        let group_wanted = self.wanted(options, EntryKind::Group);
        let other_wanted: Vec<String> = match &options.attributes {
            Some(attributes) => attributes.clone(),
            None => join_attributes(&[user_wanted, group_wanted]),
        };

        let attributes = join_attributes(&[
            user_wanted,
            group_wanted,
            &required_user_attributes(options.attributes.as_deref(), &membership),
            &attrs(&["objectCategory", "objectClass", "groupType", "userPrincipalName"]),
        ]);

        let request = self.request(filter, options, BaseDnKind::Default, attributes);
        let outcome = self.engine.search(&request).await?;

        if outcome.entries.is_empty() {
            warn!(
                "No results found for query \"{}\"",
                truncate_log_output(&request.filter)
            );
        }

        let mut result = FindResult::default();
        for entry in outcome.entries {
            match classify(&entry) {
                EntryKind::Group => result
                    .groups
                    .push(DirectoryEntry::new(EntryKind::Group, project(entry, group_wanted))),
                EntryKind::User => result
                    .users
                    .push(DirectoryEntry::new(EntryKind::User, project(entry, user_wanted))),
                EntryKind::Other => result
                    .other
                    .push(DirectoryEntry::new(EntryKind::Other, project(entry, &other_wanted))),
            }
        }

        if includes_membership(&membership, MembershipKind::Group) {
            self.attach_groups_to_all(&mut result.groups, options).await?;
        }
        if includes_membership(&membership, MembershipKind::User) {
            self.attach_groups_to_all(&mut result.users, options).await?;
        }

        for group in &result.groups {
            self.observer.on_group(group);
        }
        for user in &result.users {
            self.observer.on_user(user);
        }
        for other in &result.other {
            self.observer.on_other(other);
        }

        Ok(result)
    }

    // ========================================================================
    // Deleted Objects
    // ========================================================================

    /// Tombstoned objects under the deleted-objects container. The container
    /// is discovered from the root DSE when no base DN is given.
    pub async fn find_deleted_objects(&self, options: &QueryOptions) -> DirectoryResult<Vec<RawEntry>> {
        let result = self.find_deleted_objects_inner(options).await;
        self.settle("find_deleted_objects", result)
    }

    async fn find_deleted_objects_inner(
        &self,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<RawEntry>> {
        let base_dn = match &options.base_dn {
            Some(base_dn) => base_dn.clone(),
            None => {
                debug!(
                    "No base DN specified for deleted objects. Querying root DSE at {}",
                    self.config.url
                );
                let naming_context = self
                    .get_root_dse(None, Some(attrs(&["defaultNamingContext"])))
                    .await?
                    .and_then(|dse| dse.first("defaultNamingContext").map(str::to_string))
                    .ok_or_else(|| {
                        DirectoryError::InvalidArgument(
                            "root DSE has no defaultNamingContext".to_string(),
                        )
                    })?;
                info!("Retrieved defaultNamingContext ({}) from root DSE", naming_context);
                format!("CN=Deleted Objects,{}", naming_context)
            }
        };

        let defaults = attrs(DELETED_OBJECT_ATTRIBUTES);
        let attributes = match &options.attributes {
            Some(caller) => join_attributes(&[caller, &defaults]),
            None => defaults,
        };

        let request = SearchRequest {
            base_dn: Some(base_dn),
            filter: options.filter.clone().unwrap_or_else(|| MATCH_ALL.to_string()),
            scope: options.scope.unwrap_or(Scope::One),
            attributes,
            size_limit: options.size_limit,
            time_limit: options.time_limit,
            include_deleted: true,
            page_size: None,
            entry_parser: options.entry_parser.clone(),
        };

        let outcome = self.engine.search(&request).await?;
        let projection: &[String] = options.attributes.as_deref().unwrap_or(&[]);
        let deleted: Vec<RawEntry> = outcome
            .entries
            .into_iter()
            .map(|e| project(e, projection))
            .collect();

        if deleted.is_empty() {
            warn!(
                "No deleted objects found for query \"{}\"",
                truncate_log_output(&request.filter)
            );
        }

        for entry in &deleted {
            self.observer.on_deleted(entry);
        }
        self.observer.on_deleted_objects(&deleted);
        Ok(deleted)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// DN for a user; a value that already is a DN is returned as is
    async fn user_dn(&self, user: &str, options: &QueryOptions) -> DirectoryResult<Option<String>> {
        if is_distinguished_name(user) {
            return Ok(Some(user.to_string()));
        }

        let request = self.request(
            user_filter(&UserQuery::from(user)),
            options,
            BaseDnKind::User,
            attrs(&["dn"]),
        );
        let outcome = self.engine.search(&request).await?;
        Ok(outcome.entries.into_iter().next().map(|e| e.dn))
    }

    /// DN for a group; a value that already is a DN is returned as is
    async fn group_dn(&self, group: &str, options: &QueryOptions) -> DirectoryResult<Option<String>> {
        if is_distinguished_name(group) {
            return Ok(Some(group.to_string()));
        }

        let request = self.request(
            group_filter(Some(group)),
            options,
            BaseDnKind::Group,
            attrs(&["dn"]),
        );
        let outcome = self.engine.search(&request).await?;
        Ok(outcome.entries.into_iter().next().map(|e| e.dn))
    }

    async fn memberships_for(
        &self,
        dn: Option<String>,
        name: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let Some(dn) = dn else {
            warn!("Could not find a distinguishedName for \"{}\"", name);
            return Ok(Vec::new());
        };

        let groups = self
            .resolver
            .groups_containing(&dn, &self.group_resolve_options(options))
            .await?;

        for group in &groups {
            self.observer.on_group(group);
        }
        self.observer.on_groups(&groups);
        Ok(groups)
    }

    /// Every group a user belongs to, directly or through nesting
    pub async fn get_group_membership_for_user(
        &self,
        user: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let result: DirectoryResult<Vec<DirectoryEntry>> = async {
            let dn = self.user_dn(user, options).await?;
            self.memberships_for(dn, user, options).await
        }
        .await;
        self.settle("get_group_membership_for_user", result)
    }

    /// Every group a group belongs to, directly or through nesting
    pub async fn get_group_membership_for_group(
        &self,
        group: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let result: DirectoryResult<Vec<DirectoryEntry>> = async {
            let dn = self.group_dn(group, options).await?;
            self.memberships_for(dn, group, options).await
        }
        .await;
        self.settle("get_group_membership_for_group", result)
    }

    /// Whether a user belongs to a group, directly or through nesting.
    /// The group may be given by DN or common name.
    pub async fn is_user_member_of(
        &self,
        user: &str,
        group: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<bool> {
        let options = QueryOptions {
            attributes: Some(attrs(&["cn", "dn"])),
            ..options.clone()
        };
        let groups = self.get_group_membership_for_user(user, &options).await?;

        let member = groups.iter().any(|g| {
            g.dn.eq_ignore_ascii_case(group)
                || g.common_name()
                    .map(|cn| cn.eq_ignore_ascii_case(group))
                    .unwrap_or(false)
        });

        info!(
            "\"{}\" {} a member of \"{}\"",
            user,
            if member { "IS" } else { "IS NOT" },
            group
        );
        Ok(member)
    }

    /// Every user in a group, expanding nested groups. A user reached through
    /// more than one group is listed once per group.
    pub async fn get_users_for_group(
        &self,
        group: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let result: DirectoryResult<Vec<DirectoryEntry>> = async {
            let wanted = self.wanted(options, EntryKind::User);
            let resolve = ResolveOptions::new(wanted.to_vec()).with_base_dn(options.base_dn.clone());
            let users = self.resolver.members_of(group, &resolve).await?;

            for user in &users {
                self.observer.on_user(user);
            }
            self.observer.on_users(&users);
            Ok(users)
        }
        .await;
        self.settle("get_users_for_group", result)
    }

    // ========================================================================
    // Authentication & Server Metadata
    // ========================================================================

    /// Checks credentials with a throwaway bind. Empty values fail without
    /// touching the network.
    pub async fn authenticate(&self, username: &str, password: &str) -> AuthOutcome {
        trace!("authenticate({}, ********)", username);

        if username.is_empty() || password.is_empty() {
            return AuthOutcome::failed(DirectoryError::InvalidCredentials(
                "The supplied credential is invalid".to_string(),
            ));
        }

        let result: DirectoryResult<()> = async {
            let mut connection = self.engine.connector().connect(&self.config.url).await?;
            let bound = connection.bind(username, password).await;
            if let Err(e) = connection.unbind().await {
                debug!("Unbind after authentication failed: {}", e);
            }
            bound
        }
        .await;

        match result {
            Ok(()) => {
                info!(
                    "Authentication succeeded for \"{}\" as \"{}\" (password: \"********\")",
                    self.config.url, username
                );
                AuthOutcome {
                    authenticated: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    "Authentication failed for \"{}\" as \"{}\" (password: \"********\"). Error: {}",
                    self.config.url, username, e
                );
                self.observer.on_error("authenticate", &e);
                AuthOutcome::failed(e)
            }
        }
    }

    /// Server metadata through an anonymous bind. Defaults to the client URL
    /// and every attribute.
    pub async fn get_root_dse(
        &self,
        url: Option<&str>,
        attributes: Option<Vec<String>>,
    ) -> DirectoryResult<Option<RawEntry>> {
        let url = url.unwrap_or(&self.config.url);
        let attributes = attributes
            .filter(|a| !includes_all_attributes(a))
            .unwrap_or_else(|| attrs(&["*"]));

        trace!("get_root_dse({}, {:?})", url, attributes);

        let request = SearchRequest::new(MATCH_ALL)
            .base_dn("")
            .scope(Scope::Base)
            .attributes(attributes);

        let result = self
            .engine
            .search_at(url, Bind::Anonymous, &request)
            .await
            .map(|outcome| outcome.entries.into_iter().next());

        self.settle("get_root_dse", result)
    }
}
