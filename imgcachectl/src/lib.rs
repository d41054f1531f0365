//! Command-line front end for `imgcache-core`.
//!
//! The binary is the composition root: it loads configuration, builds one
//! [`ImageDownloader`] and runs a single subcommand against it.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use imgcache_core::{
    CacheConfig, ConfigLoad, ConfigLoader, DiskStore, ImageDownloader,
    ImageKey,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "imgcachectl", version)]
#[command(about = "Fetch remote images through a memory and disk cache")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to an imgcache.toml (defaults to IMGCACHE_CONFIG, then ./imgcache.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Environment file loaded before reading IMGCACHE_* variables
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Disk cache root (overrides config and IMGCACHE_DISK_DIR)
    #[arg(long, global = true, conflicts_with = "no_disk")]
    pub disk_dir: Option<PathBuf>,

    /// Keep images in memory only
    #[arg(long, global = true)]
    pub no_disk: bool,

    /// Log disk write failures instead of failing the command
    #[arg(long, global = true)]
    pub best_effort_disk: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download images into the cache and report each result
    Fetch {
        /// Image URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Print fetch counters when done
        #[arg(long)]
        stats: bool,
    },
    /// Download an image and print its average colour as #rrggbbaa
    Color {
        url: String,
    },
    /// Print where an image is (or would be) stored on disk
    Path {
        url: String,
    },
}

/// Load configuration and apply command-line overrides on top of it.
pub fn load_config(args: &GlobalArgs) -> Result<ConfigLoad> {
    let mut loader = ConfigLoader::new().with_default_disk_dir(!args.no_disk);
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let mut load = loader.load().context("failed to load configuration")?;
    apply_overrides(&mut load.config, args);
    Ok(load)
}

pub fn apply_overrides(config: &mut CacheConfig, args: &GlobalArgs) {
    if let Some(dir) = &args.disk_dir {
        config.disk_dir = Some(dir.clone());
    }
    if args.no_disk {
        config.disk_dir = None;
    }
    if args.best_effort_disk {
        config.strict_disk_writes = false;
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let ConfigLoad {
        config,
        config_path,
        env_file_loaded,
    } = load_config(&cli.global)?;

    if env_file_loaded {
        info!("loaded .env file");
    }
    match &config_path {
        Some(path) => info!(path = %path.display(), "configuration file loaded"),
        None => info!("no configuration file found, using defaults"),
    }
    info!(
        disk_dir = ?config.disk_dir,
        strict_disk_writes = config.strict_disk_writes,
        max_concurrent_fetches = config.max_concurrent_fetches,
        request_timeout = ?config.request_timeout,
        "cache configuration in effect"
    );

    match cli.command {
        Command::Path { url } => {
            let path = disk_path(&config, &url)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Color { url } => {
            let key = ImageKey::parse(&url)?;
            let downloader = ImageDownloader::new(config)?;
            downloader.download(&key).await?;
            match downloader.color_for(&key).await {
                Some(color) => println!("{}", color.to_hex()),
                None => println!("none"),
            }
            Ok(())
        }
        Command::Fetch { urls, stats } => {
            let keys = urls
                .iter()
                .map(|url| ImageKey::parse(url))
                .collect::<Result<Vec<_>, _>>()?;
            let downloader = ImageDownloader::new(config)?;
            fetch_all(&downloader, &keys).await?;
            if stats {
                println!("{:?}", downloader.stats());
            }
            Ok(())
        }
    }
}

/// Disk location for `url` under the configured disk root.
pub fn disk_path(config: &CacheConfig, url: &str) -> Result<PathBuf> {
    let key = ImageKey::parse(url)?;
    let root = config
        .disk_dir
        .clone()
        .ok_or_else(|| anyhow!("disk cache is disabled"))?;
    DiskStore::new(root)
        .path_for(&key)
        .ok_or_else(|| anyhow!("{url} has no path to store under"))
}

async fn fetch_all(downloader: &ImageDownloader, keys: &[ImageKey]) -> Result<()> {
    let outcome = downloader.download_and_cache(keys).await;

    for key in keys {
        let state = downloader.state_of(key).await;
        let color = downloader
            .color_for(key)
            .await
            .map(|c| c.to_hex())
            .unwrap_or_else(|| "-".to_string());
        match state {
            Some(_) => println!("ok\t{key}\t{color}"),
            None => println!("failed\t{key}"),
        }
    }

    if let Err(err) = &outcome {
        warn!("at least one download failed: {err}");
    }
    outcome.context("batch download failed")
}
