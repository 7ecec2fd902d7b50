use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use url::Url;

use assetpull::{
    AssetSync, CacheLayout, ReqwestClient, SyncEvent, SyncMode, SyncOptions, SyncState,
};

// Emoji with fallback for terminals without Unicode support
static PICTURE: Emoji<'_, '_> = Emoji("🖼️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

/// Keep a local image cache in sync with a remote directory listing
#[derive(Parser, Debug)]
#[command(name = "assetpull")]
#[command(about = "Keep a local image cache in sync with a remote directory listing")]
#[command(version)]
struct Args {
    /// URL of the remote directory index (should end with a slash)
    base_url: Url,

    /// Cache key; must be unique per concurrently running instance
    #[arg(short, long, default_value = "assets")]
    key: String,

    /// Root directory for caches (defaults to the platform data directory)
    #[arg(long)]
    cache_root: Option<PathBuf>,

    /// Only sync files with this extension, e.g. `.png` (repeatable)
    #[arg(short, long = "ext")]
    extensions: Vec<String>,

    /// URL to request first; if unreachable only the cache is used
    #[arg(long)]
    probe: Option<Url>,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    /// Skip the network and load the cache only
    #[arg(long)]
    offline: bool,

    /// Do not fall back to the cache when the probe URL is unreachable
    #[arg(long)]
    no_cache_fallback: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "assetpull=debug,info",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Render sync events on a spinner until the channel closes
async fn render_events(mut events: broadcast::Receiver<SyncEvent>) {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:.cyan} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            SyncEvent::Log(message) => spinner.set_message(message),

            SyncEvent::StateChanged(SyncState::ListingRemote) => {
                spinner.set_prefix(format!("{SEARCH}"));
            }

            SyncEvent::StateChanged(SyncState::Downloading { current, total }) => {
                spinner.set_prefix(format!("{DOWNLOAD}[{}/{}]", current + 1, total));
            }

            SyncEvent::StateChanged(_) => {}

            SyncEvent::Issue(issue) => {
                spinner.println(format!("{FAILURE}{}", issue.to_string().red()));
            }

            SyncEvent::AssetsReady { .. } => spinner.finish_and_clear(),
        }
    }

    spinner.finish_and_clear();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            PICTURE,
            "assetpull".bold().magenta(),
            "- Image cache synchronizer".dimmed()
        );
    }

    let layout = match &args.cache_root {
        Some(root) => CacheLayout::new(root, &args.key),
        None => CacheLayout::in_default_root(&args.key),
    }
    .context("Invalid cache configuration")?;

    let client = ReqwestClient::with_timeout(Duration::from_secs(args.timeout))
        .context("Failed to create HTTP client")?;

    let options = SyncOptions {
        allowed_extensions: (!args.extensions.is_empty()).then(|| args.extensions.clone()),
        connectivity_probe: args.probe.clone(),
        use_cache_if_offline: !args.no_cache_fallback,
    };

    let sync = AssetSync::new(client, args.base_url.clone(), layout, options);

    let renderer = if args.quiet {
        None
    } else {
        Some(tokio::spawn(render_events(sync.subscribe())))
    };

    let result = if args.offline {
        sync.load_cached().await
    } else {
        sync.sync().await
    };

    let assets = sync.assets();
    let cache_dir = sync.layout().dir().to_path_buf();

    // Closing the event channel stops the renderer
    drop(sync);
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }

    let report = result.context("Failed to sync assets")?;

    if !args.quiet {
        let source = match report.mode {
            SyncMode::Online => "online".green(),
            SyncMode::CacheOnly => "cache only".yellow(),
        };
        println!(
            "{PARTY}{} ({}) {} loaded, {} downloaded, {} unchanged, {} removed, {} failed",
            "Sync complete".bold().green(),
            source,
            report.loaded.to_string().green().bold(),
            report.downloaded.to_string().cyan(),
            report.cache_hits.to_string().cyan(),
            report.pruned.to_string().yellow(),
            if report.failed > 0 {
                report.failed.to_string().red().bold()
            } else {
                report.failed.to_string().green()
            }
        );

        for asset in assets.iter() {
            println!(
                "  {} {}",
                asset.name.bold(),
                format!("{}x{}", asset.image.width(), asset.image.height()).dimmed()
            );
        }

        println!("\n{FOLDER}Cache: {}\n", cache_dir.display().to_string().cyan());
    }

    if report.failed > 0 && report.loaded == 0 {
        std::process::exit(1);
    }

    Ok(())
}
