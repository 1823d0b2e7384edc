//! bferry CLI - bulk and large-object transfers for object storage
//!
//! Uploads many files, downloads many objects, or pulls one large object in
//! parallel byte ranges, against a local directory bucket or a JSON-API
//! storage endpoint.

mod commands;
mod config;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// bferry - object storage transfer tool
#[derive(Parser)]
#[command(name = "bferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file
    #[arg(long, env = "BFERRY_CONFIG")]
    config: Option<PathBuf>,

    /// Use a local directory as the bucket
    #[arg(long, conflicts_with = "endpoint")]
    store_root: Option<PathBuf>,

    /// Storage endpoint URL
    #[arg(long, env = "BFERRY_ENDPOINT")]
    endpoint: Option<String>,

    /// Bucket name
    #[arg(long, env = "BFERRY_BUCKET")]
    bucket: Option<String>,

    /// Bearer token for the endpoint
    #[arg(long, env = "BFERRY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload local files
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Object name prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Leave existing objects untouched
        #[arg(long)]
        skip_if_exists: bool,

        /// Content type for every upload
        #[arg(long)]
        content_type: Option<String>,

        /// Max concurrent uploads
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Download objects
    Download {
        /// Object names
        #[arg(required = true)]
        names: Vec<String>,

        /// Local directory to download into
        #[arg(short, long)]
        prefix: Option<PathBuf>,

        /// Text removed from the start of each object name
        #[arg(long)]
        strip_prefix: Option<String>,

        /// Max concurrent downloads
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Download one large object in parallel chunks
    DownloadLarge {
        /// Object name
        name: String,

        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Max concurrent chunks
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Directory to write the file to
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show object metadata
    Stat {
        /// Object name
        name: String,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum ConfigAction {
    /// Show effective settings
    Show,

    /// Print the settings file location
    Path,

    /// Write a settings file with the effective settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "bferry=debug,bferry_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "bferry", &mut std::io::stdout());
        return Ok(());
    }

    // Load settings and apply command-line overrides
    let config_path = config::config_path(cli.config.as_deref());
    let mut settings = config::load_settings(&config_path)?;
    config::apply_overrides(
        &mut settings,
        config::Overrides {
            store_root: cli.store_root,
            endpoint: cli.endpoint,
            bucket: cli.bucket,
            token: cli.token,
        },
    );

    if let Commands::Config { action } = cli.command {
        return commands::config_action(&config_path, &settings, action, cli.output);
    }

    let store = config::build_store(&settings.store).await?;
    let manager = bferry_core::TransferManager::new(store);

    // Ctrl-C cancels whatever transfer is running
    let cancel = manager.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling transfers");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Upload {
            paths,
            prefix,
            skip_if_exists,
            content_type,
            concurrency,
            timeout,
        } => {
            let options = commands::UploadArgs {
                prefix,
                skip_if_exists,
                content_type,
                concurrency,
                timeout,
            };
            commands::upload(&manager, &settings, paths, options, cli.output).await?
        }

        Commands::Download {
            names,
            prefix,
            strip_prefix,
            concurrency,
            timeout,
        } => {
            let options = commands::DownloadArgs {
                prefix,
                strip_prefix,
                concurrency,
                timeout,
            };
            commands::download(&manager, &settings, names, options, cli.output).await?
        }

        Commands::DownloadLarge {
            name,
            chunk_size,
            concurrency,
            dir,
            timeout,
        } => {
            let options = commands::DownloadLargeArgs {
                chunk_size,
                concurrency,
                dir,
                timeout,
            };
            commands::download_large(&manager, &settings, &name, options, cli.output).await?
        }

        Commands::Stat { name } => commands::stat(&manager, &name, cli.output).await?,

        Commands::Config { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}
