//! Active Directory search engine for adquery

pub mod attributes;
pub mod client;
pub mod connection;
pub mod filter;
pub mod limiter;
pub mod observer;
pub mod resolver;
pub mod session;

pub use client::{AuthOutcome, DirectoryClient, DirectoryClientBuilder};
pub use connection::{
    DirectoryConnection, DirectoryConnector, LdapConnector, SearchEvent, SearchEvents,
    SearchParams,
};
pub use filter::UserQuery;
pub use limiter::{ConcurrencyLimiter, FailurePolicy, RejectBehaviour};
pub use observer::{DirectoryObserver, TracingObserver};
pub use resolver::{GroupResolver, ResolveOptions};
pub use session::{ReferralPolicy, SearchEngine, SearchOutcome};
