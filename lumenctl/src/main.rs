use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Target};
use log::LevelFilter;
use lumen_config::{ConfigSource, LumenConfig};

mod commands;
mod view;

#[derive(Parser)]
#[command(name = "lumenctl", about = "Inspect and exercise the lumen media caches")]
struct Cli {
    /// Config file (TOML or JSON). Overrides $LUMEN_CONFIG_PATH.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cache root. Overrides the configured one.
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,
    /// Debug logging for the lumen crates
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download URLs through the download cache
    Fetch {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,
        /// Concurrent requests issued per URL; they share one download
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Read and write the encoded-preview blob cache
    Blob {
        #[command(subcommand)]
        action: BlobAction,
    },
    /// Run the sliding-window adapter over a list of image URIs
    View {
        /// Local paths, file:// or http(s):// URIs
        #[arg(required = true)]
        uris: Vec<String>,
        /// Index to start at
        #[arg(long, default_value_t = 0)]
        center: usize,
        /// Indices to move to after the first load settles
        #[arg(long, value_delimiter = ',')]
        moves: Vec<usize>,
        /// Skip full-image decoding
        #[arg(long)]
        previews_only: bool,
    },
    /// Print the effective configuration
    Config {
        #[arg(long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
}

#[derive(Subcommand)]
enum BlobAction {
    /// Store a file under a key
    Put { key: String, file: PathBuf },
    /// Print or write the record stored under a key
    Get {
        key: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Remove the record stored under a key
    Clear { key: String },
    /// Show entry count and bytes in use
    Usage,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigFormat {
    Toml,
    Json,
}

fn init_logger(verbose: bool) {
    let lumen_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder = Builder::new();
    builder
        .target(Target::Stderr)
        .filter_level(LevelFilter::Warn)
        .filter_module("lumen_core", lumen_level)
        .filter_module("lumen_config", lumen_level)
        .filter_module("lumenctl", lumen_level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn load_config(cli: &Cli) -> Result<(LumenConfig, ConfigSource)> {
    let (mut config, source) = match &cli.config {
        Some(path) => {
            let config = LumenConfig::load_from_file(path)?;
            (config, ConfigSource::File(path.clone()))
        }
        None => LumenConfig::load_from_env()?,
    };
    if let Some(root) = &cli.cache_root {
        config.cache_root = Some(root.clone());
    }
    config
        .validate()
        .with_context(|| format!("invalid configuration from {source}"))?;
    Ok((config, source))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let (config, source) = load_config(&cli)?;
    log::debug!("using configuration from {}", source);

    match cli.command {
        Command::Fetch { urls, concurrency } => {
            commands::fetch(&config, &urls, concurrency).await
        }
        Command::Blob { action } => match action {
            BlobAction::Put { key, file } => commands::blob_put(&config, &key, &file).await,
            BlobAction::Get { key, out } => {
                commands::blob_get(&config, &key, out.as_deref()).await
            }
            BlobAction::Clear { key } => commands::blob_clear(&config, &key).await,
            BlobAction::Usage => commands::blob_usage(&config).await,
        },
        Command::View {
            uris,
            center,
            moves,
            previews_only,
        } => view::run(&config, &uris, center, &moves, !previews_only).await,
        Command::Config { format } => match format {
            ConfigFormat::Toml => commands::print_config_toml(&config, &source),
            ConfigFormat::Json => commands::print_config_json(&config),
        },
    }
}
