//! Adquery Core Library
//!
//! Core types, configuration and error handling for the adquery Active
//! Directory client.

pub mod config;
pub mod error;
pub mod types;

pub use config::ClientConfig;
pub use error::{DirectoryError, DirectoryResult};

/// Adquery version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Page size attached to every search unless the caller supplies one.
/// Active Directory returns at most 1000 entries per page by default.
pub const DEFAULT_PAGE_SIZE: i32 = 1000;

/// Number of member DNs resolved per bulk search when expanding a group
pub const DEFAULT_MEMBERSHIP_CHUNK_SIZE: usize = 1000;

/// OID of the Active Directory "show deleted objects" control
pub const SHOW_DELETED_OID: &str = "1.2.840.113556.1.4.417";

/// LDAP result code: success
pub const RC_SUCCESS: u32 = 0;

/// LDAP result code: size limit exceeded
pub const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// LDAP result code: referral
pub const RC_REFERRAL: u32 = 10;

/// LDAP result code: invalid credentials
pub const RC_INVALID_CREDENTIALS: u32 = 49;

/// LDAP result code: other (client-side failures with no server code)
pub const RC_OTHER: u32 = 80;
