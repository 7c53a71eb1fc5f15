//! Server configuration management.
//!
//! Configuration is stored as TOML at the path in `REELHUB_CONFIG`, or:
//! - Linux: `~/.config/reelhub/server.toml`
//! - Windows: `%APPDATA%/reelhub/server.toml`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use reelhub_session_store::DEFAULT_MAX_TOTAL_CHUNKS;
use reelhub_transfer::MIB;
use reelhub_upload_server::ServerConfig;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "REELHUB_CONFIG";

/// Where finalized files are handed off to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteConfig {
    /// Copy into a local directory (development and tests).
    Local { dir: PathBuf, base_url: String },
    /// Multipart POST to a media host.
    Http {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder: Option<String>,
    },
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::Local {
            dir: data_dir().join("media"),
            base_url: "http://localhost:8080/media".into(),
        }
    }
}

/// Upload server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    #[serde(default = "default_assembly_dir")]
    pub assembly_dir: PathBuf,

    /// Largest chunk a session may declare, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Most chunks one session may be split into.
    #[serde(default = "default_max_total_chunks")]
    pub max_total_chunks: u32,

    /// Idle sessions older than this are reclaimed.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_bind() -> SocketAddr {
    ([127, 0, 0, 1], 8080).into()
}

fn default_staging_dir() -> PathBuf {
    data_dir().join("staging")
}

fn default_assembly_dir() -> PathBuf {
    data_dir().join("assembly")
}

fn default_max_chunk_size() -> u64 {
    20 * MIB
}

fn default_max_total_chunks() -> u32 {
    DEFAULT_MAX_TOTAL_CHUNKS
}

fn default_retention_hours() -> u64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            staging_dir: default_staging_dir(),
            assembly_dir: default_assembly_dir(),
            max_chunk_size: default_max_chunk_size(),
            max_total_chunks: default_max_total_chunks(),
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `REELHUB_CONFIG` or the platform default path.
    pub fn load() -> anyhow::Result<(Self, PathBuf)> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(p) => PathBuf::from(p),
            None => config_path()?,
        };
        let config = Self::load_from(&path)?;
        Ok((config, path))
    }

    /// Loads `path`, or writes and returns the defaults if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes this configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // May contain the media host API key.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Converts to the library's server settings.
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let retention = i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::TimeDelta::try_hours)
            .with_context(|| format!("retention_hours {} is out of range", self.retention_hours))?;

        Ok(ServerConfig {
            bind: self.bind,
            staging_dir: self.staging_dir.clone(),
            assembly_dir: self.assembly_dir.clone(),
            max_chunk_size: self.max_chunk_size,
            max_total_chunks: self.max_total_chunks,
            retention,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        })
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir().join("reelhub").join("server.toml"))
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

/// Default root for staged chunks and handed-off media.
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let local =
            std::env::var("LOCALAPPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(local).join("reelhub")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".local").join("share").join("reelhub")
    }
}
