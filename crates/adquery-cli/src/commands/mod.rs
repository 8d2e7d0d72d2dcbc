//! CLI command implementations

pub mod groups;
pub mod search;
pub mod users;

use adquery_client::DirectoryClient;
use adquery_core::types::{MembershipKind, QueryOptions, Scope};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

/// Context passed to all commands
pub struct CommandContext {
    pub client: DirectoryClient,
    pub pretty: bool,
}

impl CommandContext {
    /// Print a value as JSON on stdout
    pub fn print<T: Serialize>(&self, value: &T) -> Result<()> {
        let out = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .context("Failed to serialize output")?;

        println!("{}", out);
        Ok(())
    }
}

/// Options shared by lookup commands
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Base DN to search under
    #[arg(long)]
    pub base_dn: Option<String>,

    /// Extra LDAP filter
    #[arg(long)]
    pub filter: Option<String>,

    /// Search scope (base, one, sub)
    #[arg(long)]
    pub scope: Option<Scope>,

    /// Attributes to return, comma separated
    #[arg(long, value_delimiter = ',')]
    pub attributes: Vec<String>,

    /// Server-side result cap (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub size_limit: i32,

    /// Membership to resolve (all, user, group), comma separated
    #[arg(long, value_delimiter = ',')]
    pub membership: Vec<MembershipKind>,
}

impl QueryArgs {
    pub fn to_options(&self) -> QueryOptions {
        QueryOptions {
            base_dn: self.base_dn.clone(),
            filter: self.filter.clone(),
            scope: self.scope,
            attributes: (!self.attributes.is_empty()).then(|| self.attributes.clone()),
            size_limit: self.size_limit,
            include_membership: (!self.membership.is_empty()).then(|| self.membership.clone()),
            ..QueryOptions::new()
        }
    }
}
