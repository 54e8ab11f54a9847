//! Command-line argument parsing

use crate::config::{CacheConfig, ClientConfig, RegistryEndpoint, RetryConfig};
use crate::error::{RegistryError, Result};
use crate::query::{SortDirection, SortField, TagSortField};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "docker-registry-browser")]
#[command(about = "Browse, search and inspect a Docker registry v2 through a local cache")]
#[command(version, author)]
pub struct Args {
    /// Registry base URL
    #[arg(
        long = "registry-url",
        short = 'r',
        env = "REGISTRY_URL",
        help = "Registry base URL, e.g. https://registry.example.com or localhost:5000"
    )]
    pub registry_url: String,

    /// Registry username
    #[arg(
        long = "username",
        short = 'u',
        env = "REGISTRY_USERNAME",
        help = "Username for registry authentication"
    )]
    pub username: Option<String>,

    /// Registry password
    #[arg(
        long = "password",
        short = 'p',
        env = "REGISTRY_PASSWORD",
        hide_env_values = true,
        help = "Password for registry authentication"
    )]
    pub password: Option<String>,

    /// Skip TLS verification
    #[arg(
        long = "skip-tls",
        short = 'k',
        env = "REGISTRY_SKIP_TLS",
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    /// Cache database location
    #[arg(
        long = "cache-path",
        env = "REGISTRY_CACHE_PATH",
        default_value = "registry-cache.db",
        help = "Path of the SQLite cache database"
    )]
    pub cache_path: PathBuf,

    /// Timeout in seconds for a single request
    #[arg(
        long = "timeout",
        short = 't',
        env = "REGISTRY_TIMEOUT",
        default_value = "30",
        help = "Timeout for a single registry request in seconds"
    )]
    pub timeout: u64,

    /// Retry attempts for transient failures
    #[arg(
        long = "retry",
        env = "REGISTRY_RETRY",
        default_value = "3",
        help = "Number of retries after a 5xx or network failure"
    )]
    pub retry: u32,

    /// Concurrent tag/manifest fetches
    #[arg(
        long = "concurrency",
        short = 'j',
        default_value = "5",
        help = "Concurrent tag and manifest fetches while expanding listings"
    )]
    pub concurrency: usize,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet output
    #[arg(long = "quiet", short = 'q', help = "Only log errors")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search, sort and page repositories
    Repos(ReposArgs),
    /// Search, sort and page the tags of one repository
    Tags(TagsArgs),
    /// Show the resolved manifest for a tag or digest
    Manifest {
        repository: String,
        reference: String,
    },
    /// Suggest repository names for a partial input
    Suggest {
        partial: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Inspect or clear the local cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(ClapArgs, Debug)]
pub struct ReposArgs {
    #[arg(long, short = 's')]
    pub search: Option<String>,
    #[arg(long, default_value = "name", help = "name, last_updated or tag_count")]
    pub sort: SortField,
    #[arg(long, default_value = "asc")]
    pub order: SortDirection,
    #[arg(long, default_value = "1")]
    pub page: usize,
    #[arg(long, default_value = "20", help = "Rounded up to 20, 50 or 100")]
    pub page_size: usize,
}

#[derive(ClapArgs, Debug)]
pub struct TagsArgs {
    pub repository: String,
    #[arg(long, short = 's')]
    pub search: Option<String>,
    #[arg(long, default_value = "tag", help = "tag, created or size")]
    pub sort: TagSortField,
    #[arg(long, default_value = "asc")]
    pub order: SortDirection,
    #[arg(long, default_value = "1")]
    pub page: usize,
    #[arg(long, default_value = "20")]
    pub page_size: usize,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Entry count and location of the cache store
    Stats,
    /// Drop cached entries: all of them, those under a key prefix, or only expired ones
    Clear {
        #[arg(long, conflicts_with = "expired")]
        prefix: Option<String>,
        #[arg(long)]
        expired: bool,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(RegistryError::Config("timeout must be greater than 0".to_string()));
        }
        if self.concurrency == 0 {
            return Err(RegistryError::Config("concurrency must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Typed client configuration from the parsed arguments.
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.validate()?;
        let endpoint = RegistryEndpoint::parse(&self.registry_url)?
            .with_optional_credentials(self.username.clone(), self.password.clone())?
            .with_verify_tls(!self.skip_tls);
        let retry = RetryConfig::default()
            .with_max_retries(self.retry)
            .with_request_timeout(Duration::from_secs(self.timeout));
        let cache = CacheConfig::new(&self.cache_path).with_fetch_concurrency(self.concurrency);
        Ok(ClientConfig::new(endpoint, cache).with_retry(retry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn repos_command_parses_query_options() {
        let args = parse(&[
            "docker-registry-browser",
            "-r",
            "localhost:5000",
            "repos",
            "--search",
            "nginx",
            "--sort",
            "last_updated",
            "--order",
            "desc",
            "--page-size",
            "50",
        ]);
        let Command::Repos(repos) = args.command else {
            panic!("expected repos command");
        };
        assert_eq!(repos.search.as_deref(), Some("nginx"));
        assert_eq!(repos.sort, SortField::LastUpdated);
        assert_eq!(repos.order, SortDirection::Desc);
        assert_eq!(repos.page_size, 50);
    }

    #[test]
    fn client_config_carries_settings() {
        let args = parse(&[
            "docker-registry-browser",
            "-r",
            "https://registry.example.com",
            "-u",
            "admin",
            "-p",
            "secret",
            "--timeout",
            "5",
            "--retry",
            "1",
            "cache",
            "stats",
        ]);
        let config = args.client_config().unwrap();
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.request_timeout, Duration::from_secs(5));
        assert!(config.endpoint.credentials.is_some());
        assert!(config.endpoint.verify_tls);
    }

    #[test]
    fn username_without_password_is_rejected() {
        let args = parse(&["docker-registry-browser", "-r", "localhost:5000", "-u", "admin", "cache", "stats"]);
        assert!(matches!(args.client_config(), Err(RegistryError::Config(_))));
    }

    #[test]
    fn cache_clear_takes_prefix_or_expired() {
        let args = parse(&["docker-registry-browser", "-r", "localhost:5000", "cache", "clear", "--expired"]);
        assert!(matches!(
            args.command,
            Command::Cache(CacheCommand::Clear { prefix: None, expired: true })
        ));

        let both = Args::try_parse_from([
            "docker-registry-browser",
            "-r",
            "localhost:5000",
            "cache",
            "clear",
            "--prefix",
            "tags:",
            "--expired",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn invalid_sort_field_fails_to_parse() {
        let result = Args::try_parse_from([
            "docker-registry-browser",
            "-r",
            "localhost:5000",
            "repos",
            "--sort",
            "popularity",
        ]);
        assert!(result.is_err());
    }
}
