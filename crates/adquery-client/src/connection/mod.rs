//! Directory connection abstraction
//!
//! The search engine never touches the wire. It opens connections through a
//! [`DirectoryConnector`], binds, searches and unbinds through a
//! [`DirectoryConnection`], and reads results as a flat stream of
//! [`SearchEvent`]s regardless of how many pages the server used.

mod ldap;

use async_trait::async_trait;

use adquery_core::types::{RawEntry, Scope};
use adquery_core::DirectoryResult;

pub use ldap::LdapConnector;

/// Parameters of one physical search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub filter: String,
    pub scope: Scope,
    /// Empty requests every attribute
    pub attributes: Vec<String>,
    pub size_limit: i32,
    pub time_limit: i32,
    pub page_size: i32,
    /// Attach the show-deleted control
    pub show_deleted: bool,
}

/// Something a search produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Entry(RawEntry),
    /// Search reference (continuation URIs)
    Reference(Vec<String>),
}

/// Result stream of a running search.
///
/// `Ok(None)` marks the end. A server that truncated the result ends the
/// stream with `Err(DirectoryError::SizeLimitExceeded)` after the entries it
/// did send.
#[async_trait]
pub trait SearchEvents: Send {
    async fn next(&mut self) -> DirectoryResult<Option<SearchEvent>>;
}

/// One open connection, exclusively owned by a single search
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind. Empty DN and password bind anonymously.
    async fn bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()>;

    async fn search(
        &mut self,
        base_dn: &str,
        params: &SearchParams,
    ) -> DirectoryResult<Box<dyn SearchEvents>>;

    async fn unbind(&mut self) -> DirectoryResult<()>;
}

/// Opens connections to directory servers
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self, url: &str) -> DirectoryResult<Box<dyn DirectoryConnection>>;
}
