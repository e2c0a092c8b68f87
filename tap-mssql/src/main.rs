//! Singer tap for Microsoft SQL Server.
//!
//! Discovery mode writes the catalog of every visible table and view to
//! stdout. Sync mode reads the catalog and state, then writes SCHEMA,
//! RECORD (or BATCH) and STATE messages to stdout, one JSON object per line.
//! Logs go to stderr.
//!
//! # Security Guarantees
//! - Read-only database operations only
//! - The password from the config file is never logged

use anyhow::Context;
use clap::{Args, Parser};
use std::path::{Path, PathBuf};
use tap_mssql_core::{
    logging::init_logging, Catalog, CatalogBuilder, MessageWriter, StreamSync, SyncOptions,
    TapConfig, TapState,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tap-mssql")]
#[command(about = "Singer tap extracting SQL Server tables")]
#[command(version)]
#[command(long_about = "
tap-mssql - Singer tap for Microsoft SQL Server

Discovers tables and views with their column types and keys, and extracts
them as typed record streams, either fully or incrementally from a
replication key bookmark.

EXAMPLES:
  tap-mssql --config config.json --discover > catalog.json
  tap-mssql --config config.json --catalog catalog.json --state state.json
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Tap configuration file
    #[arg(short, long, help = "JSON config file with connection and sync settings")]
    config: PathBuf,

    /// Run discovery
    #[arg(short, long, help = "Write the discovered catalog to stdout and exit")]
    discover: bool,

    /// Catalog selecting the streams to sync
    #[arg(long, conflicts_with = "discover", help = "Catalog file; without it every stream is synced")]
    catalog: Option<PathBuf>,

    /// State from a previous run
    #[arg(short, long, conflicts_with = "discover", help = "State file with bookmarks to resume from")]
    state: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all logs except errors")]
    quiet: bool,
}

#[cfg(feature = "mssql")]
async fn connect(config: &TapConfig) -> anyhow::Result<tap_mssql_core::adapters::mssql::SqlServerSource> {
    Ok(tap_mssql_core::adapters::mssql::SqlServerSource::connect(config.connection(), &config.password).await?)
}

#[cfg(not(feature = "mssql"))]
async fn connect(_config: &TapConfig) -> anyhow::Result<std::convert::Infallible> {
    anyhow::bail!("tap-mssql was built without the 'mssql' feature")
}

fn read_file(path: &Path, what: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {} file {}", what, path.display()))
}

fn load_state(path: Option<&Path>) -> anyhow::Result<TapState> {
    match path {
        Some(path) => Ok(TapState::from_json(&read_file(path, "state")?)?),
        None => Ok(TapState::default()),
    }
}

#[cfg(feature = "mssql")]
async fn discover(config: &TapConfig) -> anyhow::Result<()> {
    let mut source = connect(config).await?;
    let catalog = CatalogBuilder::new(config.policy())
        .with_strict_types(config.strict_types)
        .discover(&mut source)
        .await?;

    println!("{}", catalog.to_json()?);
    info!("Discovered {} streams", catalog.streams.len());
    Ok(())
}

#[cfg(feature = "mssql")]
async fn sync(config: &TapConfig, catalog: Option<&Path>, state: Option<&Path>) -> anyhow::Result<()> {
    let mut source = connect(config).await?;

    let catalog = match catalog {
        Some(path) => Catalog::from_json(&read_file(path, "catalog")?)?,
        None => {
            warn!("No catalog given; discovering and syncing every stream");
            let discovered = CatalogBuilder::new(config.policy())
                .with_strict_types(config.strict_types)
                .discover(&mut source)
                .await?;
            Catalog {
                streams: discovered.streams.iter().map(|s| s.with_selected(true)).collect(),
            }
        }
    };
    let mut state = load_state(state)?;

    let runner = StreamSync::new(SyncOptions::from_config(config))?;
    let mut writer = MessageWriter::new(std::io::stdout().lock());
    let summaries = runner.sync_all(&mut source, &catalog, &mut state, &mut writer).await?;

    let rows: u64 = summaries.iter().map(|s| s.rows).sum();
    info!("Synced {} streams, {} rows", summaries.len(), rows);
    Ok(())
}

#[cfg(not(feature = "mssql"))]
async fn discover(config: &TapConfig) -> anyhow::Result<()> {
    connect(config).await.map(|_| ())
}

#[cfg(not(feature = "mssql"))]
async fn sync(config: &TapConfig, _catalog: Option<&Path>, state: Option<&Path>) -> anyhow::Result<()> {
    load_state(state)?;
    connect(config).await.map(|_| ())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    let config = TapConfig::from_file(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    info!("Using {}", config.connection());

    if cli.discover {
        discover(&config).await
    } else {
        sync(&config, cli.catalog.as_deref(), cli.state.as_deref()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["tap-mssql", "--config", "config.json", "--discover"]).unwrap();
        assert!(cli.discover);
        assert_eq!(cli.config, PathBuf::from("config.json"));

        let cli = Cli::try_parse_from([
            "tap-mssql", "-c", "config.json", "--catalog", "catalog.json", "--state", "state.json", "-vv",
        ])
        .unwrap();
        assert!(!cli.discover);
        assert_eq!(cli.catalog, Some(PathBuf::from("catalog.json")));
        assert_eq!(cli.state, Some(PathBuf::from("state.json")));
        assert_eq!(cli.global.verbose, 2);

        assert!(Cli::try_parse_from(["tap-mssql", "--discover"]).is_err());
        assert!(
            Cli::try_parse_from(["tap-mssql", "-c", "c.json", "--discover", "--catalog", "x.json"]).is_err()
        );
    }

    #[test]
    fn test_load_state() {
        assert_eq!(load_state(None).unwrap(), TapState::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"bookmarks": {"dbo-users": {"replication_key": "id", "replication_key_value": 42}}}"#,
        )
        .unwrap();
        let state = load_state(Some(&path)).unwrap();
        assert_eq!(state.replication_key("dbo-users"), Some("id"));

        assert!(load_state(Some(&dir.path().join("missing.json"))).is_err());
    }
}
