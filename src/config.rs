use crate::cli::{Cli, StorageBackend as CliStorageBackend};
use crate::error::ConfigError;
use crate::storage::lmdb::DEFAULT_MAP_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration combining server, storage and telemetry settings.
///
/// Can be loaded from files, env vars, or CLI args with precedence order:
/// CLI > File > Environment > Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Scheme used for URLs the service hands out (QR codes) when the
    /// request carries no `X-Forwarded-Proto`.
    #[serde(default = "default_public_scheme")]
    pub public_scheme: String,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_scheme: default_public_scheme(),
            read_timeout_ms: default_read_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_scheme() -> String {
    "https".to_string()
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_lmdb_path() -> PathBuf {
    PathBuf::from("./db/redirector.lmdb")
}

fn default_lock_timeout_ms() -> u64 {
    1_000
}

fn default_map_size() -> usize {
    DEFAULT_MAP_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Lmdb {
        #[serde(default = "default_lmdb_path")]
        path: PathBuf,
        #[serde(default = "default_lock_timeout_ms")]
        lock_timeout_ms: u64,
        #[serde(default = "default_map_size")]
        map_size: usize,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Lmdb {
            path: default_lmdb_path(),
            lock_timeout_ms: default_lock_timeout_ms(),
            map_size: default_map_size(),
        }
    }
}

impl StorageConfig {
    fn backend(&self) -> CliStorageBackend {
        match self {
            StorageConfig::Memory => CliStorageBackend::Memory,
            StorageConfig::Lmdb { .. } => CliStorageBackend::Lmdb,
        }
    }

    fn lmdb_settings(&self) -> Option<(PathBuf, u64, usize)> {
        match self {
            StorageConfig::Lmdb {
                path,
                lock_timeout_ms,
                map_size,
            } => Some((path.clone(), *lock_timeout_ms, *map_size)),
            StorageConfig::Memory => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enable_metrics: default_enable_metrics(),
        }
    }
}

fn default_enable_metrics() -> bool {
    true
}

impl Config {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("REDIRECTOR_HOST") {
            config.server.host = host;
        }

        if let Ok(port_str) = std::env::var("REDIRECTOR_PORT") {
            config.server.port = port_str.parse().map_err(|_| {
                ConfigError::Validation(format!("REDIRECTOR_PORT is not a port: {port_str}"))
            })?;
        }

        match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("memory") => config.storage = StorageConfig::Memory,
            Ok("lmdb") | Err(_) => {
                let path = std::env::var("LMDB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_lmdb_path());
                let lock_timeout_ms = match std::env::var("LMDB_LOCK_TIMEOUT_MS") {
                    Ok(raw) => raw.parse().map_err(|_| {
                        ConfigError::Validation(format!("LMDB_LOCK_TIMEOUT_MS is not a number: {raw}"))
                    })?,
                    Err(_) => default_lock_timeout_ms(),
                };
                config.storage = StorageConfig::Lmdb {
                    path,
                    lock_timeout_ms,
                    map_size: default_map_size(),
                };
            }
            Ok(other) => {
                return Err(ConfigError::Validation(format!(
                    "unknown STORAGE_BACKEND: {other}"
                )))
            }
        }

        Ok(config)
    }

    /// Create config with CLI args taking precedence over file and environment.
    ///
    /// Precedence: CLI > File > Environment > Defaults
    pub fn from_sources(cli: &Cli) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        let file_config = cli
            .config
            .as_ref()
            .map(Self::load_from_file)
            .transpose()?;

        let file_server = file_config.as_ref().map(|c| &c.server);
        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or_else(|| file_server.map(|s| s.host.clone()))
                .unwrap_or_else(|| env_config.server.host.clone()),
            port: cli
                .port
                .or_else(|| file_server.map(|s| s.port))
                .unwrap_or(env_config.server.port),
            ..file_server.cloned().unwrap_or_else(|| env_config.server.clone())
        };

        let storage = Self::resolve_storage(cli, file_config.as_ref(), &env_config)?;

        let telemetry = file_config
            .as_ref()
            .map(|c| c.telemetry.clone())
            .unwrap_or_default();

        let config = Config {
            server,
            storage,
            telemetry,
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve_storage(
        cli: &Cli,
        file_config: Option<&Config>,
        env_config: &Config,
    ) -> Result<StorageConfig, ConfigError> {
        let backend = cli
            .storage
            .clone()
            .or_else(|| file_config.map(|c| c.storage.backend()))
            .unwrap_or_else(|| env_config.storage.backend());

        cli.validate_for_storage(&backend)?;

        let storage = match backend {
            CliStorageBackend::Memory => StorageConfig::Memory,
            CliStorageBackend::Lmdb => {
                let inherited = file_config
                    .and_then(|c| c.storage.lmdb_settings())
                    .or_else(|| env_config.storage.lmdb_settings());
                let (file_path, file_timeout, map_size) = inherited.unwrap_or_else(|| {
                    (default_lmdb_path(), default_lock_timeout_ms(), default_map_size())
                });

                StorageConfig::Lmdb {
                    path: cli.lmdb_path.clone().unwrap_or(file_path),
                    lock_timeout_ms: cli.lock_timeout_ms.unwrap_or(file_timeout),
                    map_size,
                }
            }
        };

        Ok(storage)
    }

    /// Sanity checks that would otherwise only surface at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::MissingField("server.host".to_string()));
        }
        if !matches!(self.server.public_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "public_scheme must be http or https, got {:?}",
                self.server.public_scheme
            )));
        }
        if self.server.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_body_bytes must be positive".to_string(),
            ));
        }
        if let StorageConfig::Lmdb { path, .. } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::MissingField("storage.path".to_string()));
            }
        }
        Ok(())
    }

    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.server.public_scheme, "https");
        match &config.storage {
            StorageConfig::Lmdb {
                path,
                lock_timeout_ms,
                ..
            } => {
                assert_eq!(*path, PathBuf::from("./db/redirector.lmdb"));
                assert_eq!(*lock_timeout_ms, 1000);
            }
            StorageConfig::Memory => panic!("Expected LMDB default"),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(
            &path,
            r#"{"server": {"port": 9000}, "storage": {"backend": "memory"}}"#,
        )
        .unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.server.host, "0.0.0.0");
        assert!(matches!(loaded.storage, StorageConfig::Memory));

        loaded.save_to_file(&path).unwrap();
        let reloaded = Config::load_from_file(&path).unwrap();
        assert_eq!(reloaded.server.port, 9000);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9000, "public_scheme": "http"},
                "storage": {"backend": "lmdb", "path": "/tmp/from-file.lmdb"}}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "coral-redirect",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "7000",
            "--lmdb-path",
            "/tmp/from-cli.lmdb",
        ])
        .unwrap();
        let config = Config::from_sources(&cli).unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.public_scheme, "http");
        match config.storage {
            StorageConfig::Lmdb { path, .. } => assert_eq!(path, PathBuf::from("/tmp/from-cli.lmdb")),
            StorageConfig::Memory => panic!("Expected LMDB storage"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let mut config = Config::default();
        config.server.public_scheme = "ftp".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
