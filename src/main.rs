use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "boardsync")]
#[command(version, about = "Real-time project board server")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and WebSocket server
    Serve {
        /// Interface to bind (overrides BOARDSYNC_HOST and boardsync.toml)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Directory for uploaded attachments
        #[arg(long)]
        uploads_dir: Option<PathBuf>,

        /// Config file (defaults to ./boardsync.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Development mode: permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Create the database schema and exit
    Init {
        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    boardsync::logging::init(cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            uploads_dir,
            config,
            dev,
        } => {
            cmd::cmd_serve(
                config.as_deref(),
                cmd::ServeOverrides {
                    host,
                    port,
                    db_path,
                    uploads_dir,
                    dev,
                },
            )
            .await
        }
        Commands::Init { db_path } => cmd::cmd_init(db_path),
    }
}
