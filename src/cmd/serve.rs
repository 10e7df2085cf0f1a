//! Board server commands: `boardsync serve` and `boardsync init`.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use boardsync::board::db::BoardDb;
use boardsync::board::server::{ServerConfig, start_server};
use boardsync::config::BoardsyncToml;

/// Flags given on the `serve` command line; they win over file and env.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub uploads_dir: Option<PathBuf>,
    pub dev: bool,
}

impl ServeOverrides {
    fn apply(self, toml: &mut BoardsyncToml) {
        if let Some(host) = self.host {
            toml.server.host = host;
        }
        if let Some(port) = self.port {
            toml.server.port = port;
        }
        if let Some(db_path) = self.db_path {
            toml.storage.db_path = db_path;
        }
        if let Some(uploads_dir) = self.uploads_dir {
            toml.storage.uploads_dir = uploads_dir;
        }
        if self.dev {
            toml.server.dev_mode = true;
        }
    }
}

/// Defaults, then the config file, then the environment, then flags.
fn resolve_config(config_path: Option<&Path>, overrides: ServeOverrides) -> Result<BoardsyncToml> {
    let mut toml = BoardsyncToml::load_or_default(config_path)?;
    toml.apply_env()?;
    overrides.apply(&mut toml);

    let problems = toml.validate();
    if !problems.is_empty() {
        bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
    }
    Ok(toml)
}

pub async fn cmd_serve(config_path: Option<&Path>, overrides: ServeOverrides) -> Result<()> {
    let toml = resolve_config(config_path, overrides)?;
    tracing::info!(
        host = %toml.server.host,
        port = toml.server.port,
        db_path = %toml.storage.db_path.display(),
        uploads_dir = %toml.storage.uploads_dir.display(),
        "Starting boardsync"
    );
    start_server(ServerConfig::from(&toml)).await
}

pub fn cmd_init(db_path: Option<PathBuf>) -> Result<()> {
    let db_path = match db_path {
        Some(path) => path,
        None => {
            let mut toml = BoardsyncToml::load_or_default(None)?;
            toml.apply_env()?;
            toml.storage.db_path
        }
    };

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::new(&db_path).context("Failed to initialize board database")?;
    println!("Board database initialized at {}", db_path.display());
    Ok(())
}
