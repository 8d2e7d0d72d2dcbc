//! Transitive group membership
//!
//! Both directions walk the `member` graph with a visited set scoped to one
//! top-level call. A DN enters the set the first time it is reached and is
//! never expanded again, which is what makes cyclic nesting terminate.
//! Sibling branches are awaited together, so a failing branch still lets
//! the others settle before the error is returned.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, trace};

use adquery_core::config::BaseDnKind;
use adquery_core::types::{DirectoryEntry, EntryKind, RawEntry, Scope, SearchRequest};
use adquery_core::DirectoryResult;

use crate::attributes::{attrs, classify, join_attributes, project};
use crate::filter::{group_filter, member_filter, members_filter};
use crate::limiter::{FailurePolicy, MEMBERSHIP_POOL};
use crate::session::SearchEngine;

/// DNs already traversed in one resolution call
#[derive(Clone, Default)]
struct VisitedSet(Arc<Mutex<HashSet<String>>>);

impl VisitedSet {
    /// Marks a DN as visited; false when it already was
    fn insert(&self, dn: &str) -> bool {
        self.0.lock().insert(dn.to_ascii_lowercase())
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Options for one resolution
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Base DN for the searches; per-kind configured bases otherwise
    pub base_dn: Option<String>,
    /// Attributes kept on returned entries; empty keeps everything
    pub attributes: Vec<String>,
}

impl ResolveOptions {
    pub fn new(attributes: Vec<String>) -> Self {
        Self {
            base_dn: None,
            attributes,
        }
    }

    pub fn with_base_dn(mut self, base_dn: Option<String>) -> Self {
        self.base_dn = base_dn;
        self
    }
}

/// Attributes every classification needs
fn classification_attributes() -> Vec<String> {
    attrs(&["groupType", "objectCategory", "objectClass"])
}

fn dedup_by_dn(entries: Vec<DirectoryEntry>) -> Vec<DirectoryEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.dn.to_ascii_lowercase()))
        .collect()
}

/// Recursive membership resolution over a search engine
pub struct GroupResolver {
    engine: Arc<SearchEngine>,
}

impl GroupResolver {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine }
    }

    fn base_dn(&self, options: &ResolveOptions, kind: BaseDnKind) -> String {
        options
            .base_dn
            .clone()
            .unwrap_or_else(|| self.engine.config().base_dn_for(kind).to_string())
    }

    // ========================================================================
    // Groups containing a DN
    // ========================================================================

    /// Every group `dn` belongs to, directly or through nesting.
    /// Deduplicated by DN and sorted by common name (DN when absent).
    pub async fn groups_containing(
        &self,
        dn: &str,
        options: &ResolveOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let visited = VisitedSet::default();
        let groups = self
            .expand_memberships(dn.to_string(), options, visited.clone())
            .await?;

        let mut groups = dedup_by_dn(groups);
        groups.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));

        debug!(
            "Resolved {} groups for {} ({} DNs visited)",
            groups.len(),
            dn,
            visited.len()
        );
        Ok(groups)
    }

    fn expand_memberships<'a>(
        &'a self,
        dn: String,
        options: &'a ResolveOptions,
        visited: VisitedSet,
    ) -> BoxFuture<'a, DirectoryResult<Vec<DirectoryEntry>>> {
        async move {
            trace!("Expanding group membership of {}", dn);
            let wanted = classification_attributes();
            let request = SearchRequest::new(member_filter(&dn))
                .base_dn(self.base_dn(options, BaseDnKind::Group))
                .scope(Scope::Sub)
                .attributes(join_attributes(&[&options.attributes, &wanted]));

            let outcome = self.engine.search(&request).await?;

            let mut found = Vec::new();
            let mut branches = Vec::new();
            for entry in outcome.entries {
                if classify(&entry) != EntryKind::Group || !visited.insert(&entry.dn) {
                    continue;
                }
                branches.push(self.expand_memberships(entry.dn.clone(), options, visited.clone()));
                found.push(DirectoryEntry::new(
                    EntryKind::Group,
                    project(entry, &options.attributes),
                ));
            }

            for nested in join_all(branches).await {
                found.extend(nested?);
            }
            Ok(found)
        }
        .boxed()
    }

    // ========================================================================
    // Users contained in a group
    // ========================================================================

    /// Every user in a group (by common name or DN), expanding nested groups.
    /// Nested results are concatenated, so a user reachable through several
    /// groups appears once per path. An unknown group yields an empty list.
    pub async fn members_of(
        &self,
        group: &str,
        options: &ResolveOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let request = SearchRequest::new(group_filter(Some(group)))
            .base_dn(self.base_dn(options, BaseDnKind::Group))
            .attributes(attrs(&["dn", "cn", "member"]));

        let Some(top) = self.engine.search(&request).await?.entries.into_iter().next() else {
            debug!("Group {} not found", group);
            return Ok(Vec::new());
        };

        let visited = VisitedSet::default();
        visited.insert(&top.dn);

        self.expand_group(top, options, visited).await
    }

    fn expand_group<'a>(
        &'a self,
        group: RawEntry,
        options: &'a ResolveOptions,
        visited: VisitedSet,
    ) -> BoxFuture<'a, DirectoryResult<Vec<DirectoryEntry>>> {
        async move {
            let members = group.values("member");
            if members.is_empty() {
                return Ok(Vec::new());
            }

            let chunk_size = self.engine.config().membership_chunk_size.max(1);
            debug!(
                "Expanding {} members of {} in chunks of {}",
                members.len(),
                group.dn,
                chunk_size
            );

            let chunks = members
                .chunks(chunk_size)
                .map(|chunk| self.expand_chunk(chunk.to_vec(), options, visited.clone()));

            let mut users = Vec::new();
            for chunk in join_all(chunks).await {
                users.extend(chunk?);
            }
            Ok(users)
        }
        .boxed()
    }

    /// One bulk lookup of member DNs; nested groups recurse after the
    /// chunk's membership slot is released
    async fn expand_chunk(
        &self,
        dns: Vec<String>,
        options: &ResolveOptions,
        visited: VisitedSet,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let wanted = join_attributes(&[
            &options.attributes,
            &attrs(&["dn", "cn", "member"]),
            &classification_attributes(),
        ]);
        let request = SearchRequest::new(members_filter(&dns))
            .base_dn(self.base_dn(options, BaseDnKind::Default))
            .attributes(wanted);

        let config = self.engine.config();
        let outcome = self
            .engine
            .limiter()
            .run(
                MEMBERSHIP_POOL,
                config.max_membership_chunks_at_once,
                FailurePolicy::none(),
                || self.engine.search(&request),
            )
            .await?;

        let mut users = Vec::new();
        let mut nested = Vec::new();
        for entry in outcome.entries {
            match classify(&entry) {
                EntryKind::User => users.push(DirectoryEntry::new(
                    EntryKind::User,
                    project(entry, &options.attributes),
                )),
                EntryKind::Group => {
                    if visited.insert(&entry.dn) {
                        nested.push(self.expand_group(entry, options, visited.clone()));
                    }
                }
                EntryKind::Other => trace!("Skipping non-user member {}", entry.dn),
            }
        }

        for group_users in join_all(nested).await {
            users.extend(group_users?);
        }
        Ok(users)
    }
}
