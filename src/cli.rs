use crate::error::ConfigError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coral-redirect")]
#[command(about = "A URL shortener and redirect server implemented in Rust")]
#[command(long_about = "Coral Redirect maps short keys to URLs and serves redirects, JSON, text and QR codes, backed by an embedded transactional store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server host to bind to
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// Server port to bind to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Storage backend to use
    #[arg(short, long, global = true)]
    pub storage: Option<StorageBackend>,

    /// Path of the LMDB store file
    #[arg(long, global = true)]
    pub lmdb_path: Option<PathBuf>,

    /// How long to wait for another process to release the store, in milliseconds
    #[arg(long, global = true)]
    pub lock_timeout_ms: Option<u64>,

    /// Configuration file path (JSON format)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the redirect server (default)
    Serve,
    /// Manage API tokens allowed to create and update redirects
    ApiKey {
        #[command(subcommand)]
        action: ApiKeyAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ApiKeyAction {
    /// Authorize a bearer token
    Add { token: String },
    /// Revoke a previously authorized bearer token
    Revoke { token: String },
}

#[derive(Debug, Clone, ValueEnum)]
pub enum StorageBackend {
    /// In-memory storage (fast but not persistent)
    Memory,
    /// LMDB storage (default, persistent, ACID transactions)
    Lmdb,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Lmdb => write!(f, "lmdb"),
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Reject flags that make no sense for the chosen backend.
    pub fn validate_for_storage(&self, storage: &StorageBackend) -> Result<(), ConfigError> {
        match storage {
            StorageBackend::Memory => {
                if self.lmdb_path.is_some() || self.lock_timeout_ms.is_some() {
                    return Err(ConfigError::Validation(
                        "LMDB options given but the memory backend was selected".to_string(),
                    ));
                }
            }
            StorageBackend::Lmdb => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_serve() {
        let cli = Cli::try_parse_from(["coral-redirect"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.storage.is_none());
    }

    #[test]
    fn test_parse_api_key_add() {
        let cli = Cli::try_parse_from(["coral-redirect", "api-key", "add", "tok", "--debug"]).unwrap();
        match cli.command {
            Some(Command::ApiKey {
                action: ApiKeyAction::Add { token },
            }) => assert_eq!(token, "tok"),
            _ => panic!("Expected api-key add"),
        }
        assert!(cli.debug);
    }

    #[test]
    fn test_memory_backend_rejects_lmdb_flags() {
        let cli = Cli::try_parse_from([
            "coral-redirect",
            "--storage",
            "memory",
            "--lmdb-path",
            "x.lmdb",
        ])
        .unwrap();
        assert!(cli.validate_for_storage(&StorageBackend::Memory).is_err());
        assert!(cli.validate_for_storage(&StorageBackend::Lmdb).is_ok());
    }
}
