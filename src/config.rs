//! Server configuration read from `boardsync.toml`.
//!
//! Settings are layered: built-in defaults, then the TOML file, then
//! `BOARDSYNC_*` environment variables, then CLI flags (applied by the
//! `serve` command).
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! dev_mode = false
//!
//! [storage]
//! db_path = ".boardsync/board.db"
//! uploads_dir = "uploads"
//!
//! [uploads]
//! max_bytes = 10485760
//! allowed_extensions = ["jpeg", "jpg", "png", "gif", "pdf", "doc", "docx", "txt"]
//!
//! [realtime]
//! ping_interval_secs = 30
//! pong_timeout_secs = 60
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::attachments::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_BYTES, UploadPolicy};
use crate::board::ws::Keepalive;

pub const CONFIG_FILE_NAME: &str = "boardsync.toml";

pub const ENV_HOST: &str = "BOARDSYNC_HOST";
pub const ENV_PORT: &str = "BOARDSYNC_PORT";
pub const ENV_DB_PATH: &str = "BOARDSYNC_DB_PATH";
pub const ENV_UPLOADS_DIR: &str = "BOARDSYNC_UPLOADS_DIR";

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables permissive CORS.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".boardsync/board.db")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

/// `[uploads]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadsSection {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_allowed_extensions() -> Vec<String> {
    DEFAULT_ALLOWED_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for UploadsSection {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// `[realtime]` section: WebSocket keepalive timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSection {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    60
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

/// Parsed `boardsync.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardsyncToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub uploads: UploadsSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
}

impl BoardsyncToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse boardsync.toml")
    }

    /// Load an explicit config file, or `./boardsync.toml` when present,
    /// or the defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = Path::new(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize boardsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `BOARDSYNC_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `BOARDSYNC_*` overrides from an arbitrary lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: '{}'", ENV_PORT, port))?;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_UPLOADS_DIR) {
            self.storage.uploads_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Validate the configuration and return any problems.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.server.host.trim().is_empty() {
            problems.push("server.host must not be empty".to_string());
        }
        if self.uploads.max_bytes == 0 {
            problems.push("uploads.max_bytes must be greater than zero".to_string());
        }
        if self.uploads.allowed_extensions.is_empty() {
            problems.push("uploads.allowed_extensions must list at least one extension".to_string());
        }
        for ext in &self.uploads.allowed_extensions {
            if ext.is_empty() || ext.starts_with('.') || ext.chars().any(|c| c.is_ascii_uppercase()) {
                problems.push(format!(
                    "Invalid extension '{}' in uploads.allowed_extensions: use lowercase without a dot",
                    ext
                ));
            }
        }
        if self.realtime.ping_interval_secs == 0 {
            problems.push("realtime.ping_interval_secs must be greater than zero".to_string());
        }
        if self.realtime.pong_timeout_secs <= self.realtime.ping_interval_secs {
            problems.push(format!(
                "realtime.pong_timeout_secs ({}) must exceed ping_interval_secs ({})",
                self.realtime.pong_timeout_secs, self.realtime.ping_interval_secs
            ));
        }

        problems
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_bytes: self.uploads.max_bytes,
            allowed_extensions: self.uploads.allowed_extensions.clone(),
        }
    }

    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            ping_interval: Duration::from_secs(self.realtime.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.realtime.pong_timeout_secs),
        }
    }
}
