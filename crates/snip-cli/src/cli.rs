use clap::{Parser, Subcommand, ValueEnum};
use snip_storage::{PostgresSettings, StoreConfig};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const BASE_URL_ENV: &str = "BASE_URL";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const DB_MAX_CONNECTIONS_ENV: &str = "SNIP_DB_MAX_CONNECTIONS";
pub const DB_TIMEOUT_ENV: &str = "SNIP_DB_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Shorten, resolve and delete URLs")]
pub struct Cli {
    /// Prefix for fully-qualified short URLs.
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Journal file; selects the file backend when no DSN is given.
    #[arg(long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// PostgreSQL connection string; selects the database backend.
    #[arg(long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    #[arg(long, env = DB_MAX_CONNECTIONS_ENV, default_value_t = 10)]
    pub db_max_connections: u32,

    /// Upper bound for a single database operation, in seconds.
    #[arg(long, env = DB_TIMEOUT_ENV, default_value_t = 10)]
    pub db_timeout_secs: u64,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Shorten one URL, or several as a single all-or-nothing batch.
    Shorten {
        #[arg(long, default_value = "")]
        owner: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the original URL behind a short code.
    Resolve { code: String },
    /// List an owner's live short URLs.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Soft-delete short codes owned by `owner`.
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Check that the storage backend answers.
    Ping,
    /// Create the storage schema if missing.
    Bootstrap,
}

impl Cli {
    /// Resolves the store configuration. Empty values count as unset.
    pub fn store_config(&self) -> StoreConfig {
        let file_storage_path = self
            .file_storage_path
            .clone()
            .filter(|path| !path.as_os_str().is_empty());
        let postgres = self
            .database_dsn
            .as_deref()
            .filter(|dsn| !dsn.is_empty())
            .map(|dsn| {
                PostgresSettings::builder()
                    .dsn(dsn)
                    .max_connections(self.db_max_connections)
                    .operation_timeout(Duration::from_secs(self.db_timeout_secs))
                    .build()
            });

        StoreConfig {
            file_storage_path,
            postgres,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_storage::BackendKind;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("snip").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parses_shorten_with_owner() {
        let cli = parse(&[
            "--base-url",
            "http://x/",
            "shorten",
            "--owner",
            "u1",
            "https://a.example",
            "https://b.example",
        ]);

        assert_eq!(cli.base_url, "http://x/");
        assert_eq!(
            cli.command,
            Command::Shorten {
                owner: "u1".to_string(),
                urls: vec![
                    "https://a.example".to_string(),
                    "https://b.example".to_string()
                ],
            }
        );
    }

    #[test]
    fn shorten_requires_a_url() {
        assert!(Cli::try_parse_from(["snip", "shorten"]).is_err());
    }

    #[test]
    fn dsn_takes_precedence_over_file() {
        let cli = parse(&[
            "--file-storage-path",
            "/tmp/urls.jsonl",
            "--database-dsn",
            "postgres://db/snip",
            "--db-timeout-secs",
            "3",
            "ping",
        ]);

        let config = cli.store_config();
        assert_eq!(config.backend(), BackendKind::Postgres);
        assert_eq!(
            config.postgres.unwrap().operation_timeout,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn empty_dsn_falls_back_to_file() {
        let cli = parse(&[
            "--file-storage-path",
            "/tmp/urls.jsonl",
            "--database-dsn",
            "",
            "ping",
        ]);

        assert_eq!(cli.store_config().backend(), BackendKind::Journal);
    }
}
