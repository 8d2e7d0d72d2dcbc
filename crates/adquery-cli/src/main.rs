//! adquery - Active Directory query tool
//!
//! Runs one directory operation per invocation and prints the result as JSON.

mod commands;
mod config;

use adquery_client::DirectoryClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{groups, search, users, CommandContext, QueryArgs};
use config::AdqueryConfig;

#[derive(Parser)]
#[command(name = "adquery")]
#[command(author = "Adquery Team")]
#[command(version = adquery_core::VERSION)]
#[command(about = "Query users, groups and membership in Active Directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ADQUERY_CONFIG")]
    config: Option<String>,

    /// LDAP server URL
    #[arg(long, global = true, env = "ADQUERY_URL")]
    url: Option<String>,

    /// Default base DN
    #[arg(long = "base", global = true, env = "ADQUERY_BASE_DN")]
    default_base: Option<String>,

    /// Service account DN or userPrincipalName
    #[arg(long, global = true, env = "ADQUERY_BIND_DN")]
    bind_dn: Option<String>,

    /// Service account password
    #[arg(long, global = true, env = "ADQUERY_BIND_PASSWORD", hide_env_values = true)]
    bind_password: Option<String>,

    /// Follow referrals
    #[arg(long, global = true)]
    referrals: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ADQUERY_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find one user by sAMAccountName, userPrincipalName or DN
    User {
        id: String,
        /// Treat ID as an LDAP filter
        #[arg(long)]
        raw: bool,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List users
    Users {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Find one group by common name or DN
    Group {
        name: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List groups
    Groups {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Run a filter and split results into users, groups and other objects
    Find {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List deleted objects
    Deleted {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Check whether a user exists
    UserExists {
        id: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Check whether a group exists
    GroupExists {
        name: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Check whether a user belongs to a group, directly or through nesting
    MemberOf {
        user: String,
        group: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Groups a user belongs to
    Memberships {
        user: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Groups a group belongs to
    GroupMemberships {
        group: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Users of a group, expanding nested groups
    Members {
        group: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Check a username and password
    Auth {
        username: String,
        #[arg(long, env = "ADQUERY_AUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show server metadata
    RootDse {
        /// Server to ask instead of the configured one
        #[arg(long)]
        server: Option<String>,
        /// Attributes to return, comma separated
        #[arg(long, value_delimiter = ',')]
        attributes: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

fn load_config(cli: &Cli) -> Result<AdqueryConfig> {
    let mut config = match &cli.config {
        Some(path) => AdqueryConfig::from_file(path)?,
        None => AdqueryConfig::from_env(),
    };

    // Override with CLI args
    if let Some(url) = &cli.url {
        config.directory.url = url.clone();
    }
    if let Some(base_dn) = &cli.default_base {
        config.directory.base_dn = base_dn.clone();
    }
    if let Some(bind_dn) = &cli.bind_dn {
        config.directory.bind_dn = bind_dn.clone();
    }
    if let Some(password) = &cli.bind_password {
        config.directory.bind_password = password.clone();
    }
    if cli.referrals {
        config.directory.referrals.enabled = true;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Logs go to stderr so stdout stays JSON
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Commands::Config = cli.command {
        let shown = serde_json::to_string_pretty(&config.redacted())?;
        println!("{}", shown);
        return Ok(());
    }

    debug!("Connecting to {} (base {})", config.directory.url, config.directory.base_dn);
    let client = DirectoryClient::new(config.directory).context("Invalid directory configuration")?;
    let ctx = CommandContext {
        client,
        pretty: cli.pretty,
    };

    match &cli.command {
        Commands::User { id, raw, query } => {
            if *raw {
                users::find_user_by_filter(&ctx, id, query).await?
            } else {
                users::find_user(&ctx, id, query).await?
            }
        }
        Commands::Users { query } => users::find_users(&ctx, query).await?,
        Commands::Group { name, query } => groups::find_group(&ctx, name, query).await?,
        Commands::Groups { query } => groups::find_groups(&ctx, query).await?,
        Commands::Find { query } => search::find(&ctx, query).await?,
        Commands::Deleted { query } => search::deleted(&ctx, query).await?,
        Commands::UserExists { id, query } => users::user_exists(&ctx, id, query).await?,
        Commands::GroupExists { name, query } => groups::group_exists(&ctx, name, query).await?,
        Commands::MemberOf { user, group, query } => {
            groups::member_of(&ctx, user, group, query).await?
        }
        Commands::Memberships { user, query } => groups::memberships(&ctx, user, query).await?,
        Commands::GroupMemberships { group, query } => {
            groups::group_memberships(&ctx, group, query).await?
        }
        Commands::Members { group, query } => groups::members(&ctx, group, query).await?,
        Commands::Auth { username, password } => {
            if !users::authenticate(&ctx, username, password).await? {
                std::process::exit(1);
            }
        }
        Commands::RootDse { server, attributes } => {
            search::root_dse(&ctx, server.as_deref(), attributes).await?
        }
        Commands::Config => {}
    }

    Ok(())
}
