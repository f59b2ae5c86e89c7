//! hltb-overlay: entry point.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::task::LocalSet;

use hltb_overlay::{FetchCoordinator, InjectionController, Markers};
use hltb_overlay_cli::commands::{self, InspectTarget};
use hltb_overlay_cli::config::OverlayConfig;

#[derive(Parser)]
#[command(
    name = "hltb-overlay",
    about = "HowLongToBeat completion times for Steam library pages",
    version
)]
struct Cli {
    /// Cache directory.
    #[arg(long, global = true)]
    cache_dir: Option<String>,

    /// Lookup backend URL.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up completion times for a Steam app id.
    Lookup {
        app_id: u32,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show cache statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Remove every cached entry.
    Clear,

    /// Detect the game page in an HTML snapshot.
    Detect {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Inspect an HTML snapshot, for finding markers after a client update.
    Inspect {
        file: PathBuf,

        /// List every image.
        #[arg(long, conflicts_with_all = ["class", "select", "element"])]
        images: bool,

        /// Elements with this class.
        #[arg(long)]
        class: Option<String>,

        /// Elements matching this selector.
        #[arg(long)]
        select: Option<String>,

        /// First element matching this selector, with its children.
        #[arg(long)]
        element: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Keep the overlay in sync with an HTML file as it changes.
    Watch {
        file: PathBuf,

        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },

    /// Print the page markers in use as JSON.
    Selectors,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   hltb-overlay completions bash > ~/.local/share/bash-completion/completions/hltb-overlay
    ///   hltb-overlay completions zsh > ~/.zfunc/_hltb-overlay
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode.
    Repl,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = OverlayConfig::load(cli.cache_dir.as_deref(), cli.endpoint.as_deref())?;
    tracing::debug!("Cache dir: {}", config.cache_dir.display());

    // The REPL drives its own runtime.
    if let Commands::Repl = cli.command {
        return hltb_overlay_cli::repl::run(config);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    runtime.block_on(local.run_until(run(cli.command, config)))
}

async fn run(command: Commands, config: OverlayConfig) -> anyhow::Result<()> {
    let markers = Markers::library()?;

    match command {
        Commands::Lookup { app_id, json } => {
            let coordinator =
                FetchCoordinator::new(Rc::new(config.open_cache()), Rc::new(config.client()?));
            println!("{}", commands::run_lookup(&coordinator, app_id, json).await?);
        }

        Commands::Stats { json } => {
            let cache = config.open_cache();
            println!("{}", commands::run_stats(&cache, &markers, json)?);
        }

        Commands::Clear => {
            let cache = config.open_cache();
            println!("{}", commands::run_clear(&cache, &markers));
        }

        Commands::Detect { file, json } => {
            let markup = read(&file)?;
            println!("{}", commands::run_detect(&markup, &markers, json)?);
        }

        Commands::Inspect {
            file,
            images,
            class,
            select,
            element,
            json,
        } => {
            let target = match (class, select, element) {
                (Some(class), _, _) => InspectTarget::Class(class),
                (_, Some(select), _) => InspectTarget::Selector(select),
                (_, _, Some(element)) => InspectTarget::Element(element),
                _ if images => InspectTarget::Images,
                _ => InspectTarget::AssetImages,
            };
            let markup = read(&file)?;
            println!("{}", commands::run_inspect(&markup, &target, json)?);
        }

        Commands::Watch { file, interval_ms } => {
            let coordinator =
                FetchCoordinator::new(Rc::new(config.open_cache()), Rc::new(config.client()?));
            let controller = InjectionController::new(coordinator, markers, config.retry);
            tracing::info!("Watching {} (Ctrl+C to stop)", file.display());

            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let written = commands::watch(
                &file,
                &controller,
                Duration::from_millis(interval_ms.max(10)),
                &mut std::io::stdout(),
                shutdown,
            )
            .await?;
            tracing::info!("Stopped after {written} overlay updates");
        }

        Commands::Selectors => {
            println!("{}", serde_json::to_string_pretty(markers.sources())?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "hltb-overlay", &mut std::io::stdout());
        }

        Commands::Repl => anyhow::bail!("the REPL cannot start inside the async runtime"),
    }

    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
