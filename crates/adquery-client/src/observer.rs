//! Side-channel notifications
//!
//! Observers see every classified record and every aggregate a
//! [`DirectoryClient`](crate::DirectoryClient) produces. They never affect
//! return values.

use adquery_core::types::{DirectoryEntry, RawEntry};
use adquery_core::DirectoryError;
use tracing::{debug, trace, warn};

/// Receives notifications from a directory client
pub trait DirectoryObserver: Send + Sync {
    fn on_user(&self, _user: &DirectoryEntry) {}

    fn on_group(&self, _group: &DirectoryEntry) {}

    fn on_other(&self, _entry: &DirectoryEntry) {}

    fn on_deleted(&self, _entry: &RawEntry) {}

    fn on_users(&self, _users: &[DirectoryEntry]) {}

    fn on_groups(&self, _groups: &[DirectoryEntry]) {}

    fn on_deleted_objects(&self, _entries: &[RawEntry]) {}

    /// An operation finished successfully
    fn on_done(&self, _operation: &str) {}

    fn on_error(&self, _operation: &str, _error: &DirectoryError) {}
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DirectoryObserver for TracingObserver {
    fn on_user(&self, user: &DirectoryEntry) {
        trace!("user: {}", user.dn);
    }

    fn on_group(&self, group: &DirectoryEntry) {
        trace!("group: {}", group.dn);
    }

    fn on_other(&self, entry: &DirectoryEntry) {
        trace!("other: {}", entry.dn);
    }

    fn on_deleted(&self, entry: &RawEntry) {
        trace!("deleted: {}", entry.dn);
    }

    fn on_users(&self, users: &[DirectoryEntry]) {
        debug!("{} users", users.len());
    }

    fn on_groups(&self, groups: &[DirectoryEntry]) {
        debug!("{} groups", groups.len());
    }

    fn on_deleted_objects(&self, entries: &[RawEntry]) {
        debug!("{} deleted objects", entries.len());
    }

    fn on_done(&self, operation: &str) {
        trace!("{} done", operation);
    }

    fn on_error(&self, operation: &str, error: &DirectoryError) {
        warn!("[{}] {} failed: {}", error.code(), operation, error);
    }
}
