//! memo-sync: headless memo client.
//!
//! Keeps a local note store on disk and syncs it with a memo server using the
//! same engine as the browser client.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use memo_sync_cli::{http_engine, save_token, App, FileKv};
use memo_sync_core::{ExportScope, MemoConfig};

#[derive(Parser, Debug)]
#[command(name = "memo-sync")]
#[command(about = "Offline-first memo store with server sync")]
struct Args {
    /// Directory holding the local note store
    #[arg(long, env = "MEMO_DATA_DIR")]
    data_dir: Option<String>,

    /// Path to the JSON config file
    #[arg(long, env = "MEMO_CONFIG")]
    config: Option<String>,

    /// Sync endpoint (overrides config and MEMO_SYNC_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token (overrides config and MEMO_SYNC_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge local notes with the server
    Sync,
    /// Replace local notes with the server's
    Pull,
    /// Replace the server's notes with the local ones
    Push,
    /// Import notes from a JSON export
    Import { file: PathBuf },
    /// Export notes to JSON
    Export {
        /// Export only the active note
        #[arg(long)]
        active: bool,
        /// Output directory or `.json` file
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// List notes and sync settings
    Status,
    /// Log in and store the token in the config file
    Login {
        username: String,
        #[arg(long, env = "MEMO_PASSWORD")]
        password: String,
    },
    /// Create an account and store its token in the config file
    Register {
        username: String,
        #[arg(long, env = "MEMO_PASSWORD")]
        password: String,
    },
}

fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

fn resolve(arg: Option<&str>, default: Option<PathBuf>, what: &str) -> Result<PathBuf> {
    match arg {
        Some(path) => Ok(expand_tilde(path)),
        None => default.with_context(|| format!("Cannot determine default {}; pass it explicitly", what)),
    }
}

async fn authenticate(
    config_path: &Path,
    config: MemoConfig,
    username: &str,
    password: &str,
    create: bool,
) -> Result<()> {
    let endpoint = config
        .sync
        .endpoint
        .clone()
        .context("Sync endpoint is not set (use --endpoint or MEMO_SYNC_ENDPOINT)")?;
    let session = if create {
        memo_sync_http::register(&endpoint, username, password).await?
    } else {
        memo_sync_http::login(&endpoint, username, password).await?
    };
    save_token(config_path, &session.token)?;
    println!("Logged in as {}; token saved to {}", username, config_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "debug,memo_sync_core=debug,memo_sync_cli=debug"
    } else {
        "warn,memo_sync_core=info,memo_sync_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = resolve(
        args.data_dir.as_deref(),
        dirs::data_dir().map(|d| d.join("memo-sync")),
        "data directory",
    )?;
    let config_path = resolve(
        args.config.as_deref(),
        dirs::config_dir().map(|d| d.join("memo-sync").join("config.json")),
        "config path",
    )?;

    let mut config = MemoConfig::load(&config_path)?;
    if let Some(endpoint) = args.endpoint {
        config.sync.endpoint = Some(endpoint);
    }
    if let Some(token) = args.token {
        config.sync.token = Some(token);
    }
    info!("Data directory: {:?}", data_dir);

    match &args.command {
        Command::Login { username, password } => {
            return authenticate(&config_path, config, username, password, false).await;
        }
        Command::Register { username, password } => {
            return authenticate(&config_path, config, username, password, true).await;
        }
        _ => {}
    }

    let mut app = App::open(FileKv::new(data_dir), config).await?;

    match args.command {
        Command::Sync => {
            let engine = http_engine(app.config())?;
            let report = app.sync(&engine).await?;
            println!(
                "Synced: {} local update(s), {} sent, {} conflict(s), {} dropped",
                report.local_updates, report.server_updates, report.conflicts, report.dropped
            );
        }
        Command::Pull => {
            let engine = http_engine(app.config())?;
            let count = app.pull(&engine).await?;
            println!("Replaced local notes with {} note(s) from the server", count);
        }
        Command::Push => {
            let engine = http_engine(app.config())?;
            let received = app.push(&engine).await?;
            let count = received.unwrap_or(app.store().len());
            println!("Replaced server notes with {} local note(s)", count);
        }
        Command::Import { file } => {
            let report = app.import_file(&file).await?;
            println!("Imported {} note(s)", report.imported);
            for (from, to) in &report.renamed_ids {
                println!("  id {} already taken, imported as {}", from, to);
            }
        }
        Command::Export { active, out } => {
            let scope = if active { ExportScope::Active } else { ExportScope::All };
            let path = app.export_file(scope, &out).await?;
            println!("Wrote {}", path.display());
        }
        Command::Status => {
            let status = app.status();
            println!(
                "Endpoint: {}",
                status.endpoint.as_deref().unwrap_or("(not configured)")
            );
            println!("{} note(s), {} deleted", status.notes.len(), status.deleted);
            for note in &status.notes {
                let marker = if note.active { "*" } else { " " };
                println!(
                    "{} {}  {}  ({} version(s), updated {})",
                    marker, note.id, note.title, note.versions, note.updated_at
                );
            }
        }
        Command::Login { .. } | Command::Register { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/tmp/memo"), PathBuf::from("/tmp/memo"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/memo"), home.join("memo"));
            assert_eq!(expand_tilde("~"), home);
        }
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from(["memo-sync", "--endpoint", "http://x/api", "export", "--active"]).unwrap();
        assert_eq!(args.endpoint.as_deref(), Some("http://x/api"));
        assert!(matches!(args.command, Command::Export { active: true, .. }));
    }
}
