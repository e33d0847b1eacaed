//! modelstash CLI
//!
//! Command-line interface for the local model cache.

mod commands;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use modelstash_core::{ModelFormat, StashConfig};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// modelstash - local cache for model artifacts
#[derive(Parser, Debug)]
#[command(name = "modelstash")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "MODELSTASH_CONFIG")]
    config: Option<PathBuf>,

    /// Cache root, overriding configuration and environment
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a model into the cache and print its directory
    Cache {
        /// Model spec (JSON)
        spec: PathBuf,

        /// Quantization to fetch for quantized LLM formats
        #[arg(long, short)]
        quantization: Option<String>,
    },

    /// Resolve a registered LLM by name and download it into the cache
    Pull {
        /// Registered model name
        name: String,

        /// Model format, e.g. pytorch or ggufv2
        #[arg(long)]
        format: Option<ModelFormat>,

        /// Size in billions of parameters, e.g. 7 or 1_8
        #[arg(long)]
        size: Option<String>,

        /// Quantization, matched case-insensitively
        #[arg(long, short)]
        quantization: Option<String>,
    },

    /// Show cache status for every version of a model
    Status {
        /// Model spec (JSON)
        spec: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the description written into a model's cache marker
    Describe {
        /// Model spec (JSON)
        spec: PathBuf,
    },

    /// Delete a model from the cache
    Remove {
        /// Model spec (JSON)
        spec: PathBuf,
    },

    /// Show how a model URI is interpreted
    ParseUri {
        /// Model URI, e.g. s3://bucket/dir or /models/qwen
        uri: String,
    },
}

fn init_logging(config: &StashConfig, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if config.logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
}

fn load_config(cli: &Cli) -> anyhow::Result<StashConfig> {
    let config = match &cli.config {
        Some(path) => StashConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StashConfig::default(),
    };
    let mut config = config.apply_env();
    if let Some(cache_dir) = &cli.cache_dir {
        config.storage.cache_root = cache_dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Cache { spec, quantization } => {
            let ctx = commands::Context::new(&config).await?;
            commands::cache(&ctx, &spec, quantization).await?;
        }
        Commands::Pull {
            name,
            format,
            size,
            quantization,
        } => {
            let ctx = commands::Context::new(&config).await?;
            commands::pull(
                &ctx,
                &name,
                format,
                size.as_deref(),
                quantization.as_deref(),
            )
            .await?;
        }
        Commands::Status { spec, json } => {
            let ctx = commands::Context::new(&config).await?;
            commands::status(&ctx, &spec, json)?;
        }
        Commands::Describe { spec } => {
            commands::describe(&spec)?;
        }
        Commands::Remove { spec } => {
            let ctx = commands::Context::new(&config).await?;
            commands::remove(&ctx, &spec).await?;
        }
        Commands::ParseUri { uri } => {
            commands::parse_uri(&uri)?;
        }
    }

    Ok(())
}
