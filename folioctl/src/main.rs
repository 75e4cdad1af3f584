use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use folio_config::{ConfigLoad, ConfigLoader};
use folio_core::model::ThumbnailConfig;
use folio_core::{MediaLibrary, TreeView};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "folioctl", version)]
#[command(
    about = "Inspect and maintain a Folio media library: reconcile metadata, \
             report orphans, dump the tree and manage thumbnails"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Path to folio.toml (defaults to ./folio.toml or ./config/folio.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Media root (overrides config and FOLIO_MEDIA_ROOT)
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,

    /// Data directory (overrides config and FOLIO_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Heal metadata against the filesystem and print what changed
    Reconcile,
    /// Report orphaned records and unconfigured files without changing anything
    Orphans,
    /// Print the library tree as JSON
    Tree {
        /// Omit private folders and medias
        #[arg(long)]
        public: bool,
    },
    /// Manage derived thumbnails
    #[command(subcommand)]
    Thumbnails(ThumbnailsCommand),
    /// Watch the media root and keep metadata and thumbnails current until
    /// interrupted
    Watch,
}

#[derive(Debug, Subcommand)]
enum ThumbnailsCommand {
    /// Delete and regenerate every thumbnail
    Rebuild,
    /// Print the active thumbnail configuration
    Config,
    /// Replace the thumbnail configuration from a JSON file and rebuild
    SetConfig {
        /// JSON document with presets, format, quality and removal policy
        file: PathBuf,
    },
    /// Generate thumbnails for a single media path
    Generate {
        /// Path relative to the media root
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,folio_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let library = open_library(&cli.global).await?;
    let result = run(&library, cli.command).await;
    library.close();
    result
}

async fn open_library(args: &GlobalArgs) -> anyhow::Result<MediaLibrary> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }
    if let Some(path) = &args.media_root {
        loader = loader.with_media_root(path);
    }
    if let Some(path) = &args.data_dir {
        loader = loader.with_data_dir(path);
    }

    let ConfigLoad { config, warnings } =
        loader.load().context("failed to load configuration")?;
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => warn!(hint = %hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    MediaLibrary::open(config.library_options())
        .await
        .with_context(|| {
            format!(
                "failed to open media library at {}",
                config.library.media_root.display()
            )
        })
}

async fn run(library: &MediaLibrary, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Reconcile => {
            let report = library
                .reconciler()
                .reconcile()
                .await
                .context("reconcile failed")?;
            print_json(&*report)
        }
        Command::Orphans => {
            let report =
                library.orphans().await.context("orphan scan failed")?;
            print_json(&report)
        }
        Command::Tree { public } => {
            let view = if public {
                TreeView::Public
            } else {
                TreeView::Admin
            };
            let tree = library
                .tree(view)
                .await
                .context("failed to build library tree")?;
            print_json(&*tree)
        }
        Command::Thumbnails(ThumbnailsCommand::Rebuild) => {
            let report = library
                .thumbnails()
                .rebuild_all()
                .await
                .context("thumbnail rebuild failed")?;
            print_json(&report)
        }
        Command::Thumbnails(ThumbnailsCommand::Config) => {
            print_json(&*library.thumbnails().config())
        }
        Command::Thumbnails(ThumbnailsCommand::SetConfig { file }) => {
            let next = read_thumbnail_config(&file).await?;
            let report = library
                .thumbnails()
                .update_config(next)
                .await
                .context("failed to apply thumbnail configuration")?;
            print_json(&report)
        }
        Command::Thumbnails(ThumbnailsCommand::Generate { path }) => {
            let record = library
                .thumbnails()
                .generate(&path)
                .await
                .with_context(|| format!("failed to generate {path}"))?;
            match record {
                Some(record) => print_json(&record),
                None => anyhow::bail!("{path} is not a thumbnail source"),
            }
        }
        Command::Watch => watch(library).await,
    }
}

async fn watch(library: &MediaLibrary) -> anyhow::Result<()> {
    let report = library
        .ensure_ready()
        .await
        .context("initial reconcile failed")?;
    info!(
        media_root = %library.media_root().display(),
        changed = report.changed(),
        "watching media library; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    let stats = library.thumbnails().stats();
    info!(
        started = stats.started,
        completed = stats.completed,
        failed = stats.failed,
        coalesced = stats.coalesced,
        "shutting down"
    );
    Ok(())
}

async fn read_thumbnail_config(path: &Path) -> anyhow::Result<ThumbnailConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
