//! apicollect - fetch the Kubernetes API resources an XCCDF profile checks.

use anyhow::Context;
use apicollect_collector::{Collector, CollectorConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "apicollect")]
#[command(
    author,
    version,
    about = "Collect the cluster API resources a compliance profile needs"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every resource the profile needs and write it to the result directory
    Collect {
        #[command(flatten)]
        options: RunOptions,
    },

    /// Print the resources a collection would fetch, without fetching them
    Discover {
        #[command(flatten)]
        options: RunOptions,
    },
}

#[derive(Args)]
struct RunOptions {
    /// Configuration file (YAML or JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Benchmark data stream
    #[arg(long)]
    content: Option<PathBuf>,

    /// Tailoring document
    #[arg(long)]
    tailoring: Option<PathBuf>,

    /// Profile id (the tailored profile id with --tailoring)
    #[arg(long)]
    profile: Option<String>,

    /// Directory fetched resources are written under
    #[arg(long)]
    resultdir: Option<PathBuf>,

    /// File collection warnings are written to
    #[arg(long)]
    warnings_output_file: Option<PathBuf>,

    /// Seconds to wait for content files to appear
    #[arg(long)]
    content_timeout: Option<u64>,

    /// API server URL (defaults to the in-cluster address)
    #[arg(long)]
    api_server: Option<String>,

    /// Bearer token file
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// CA bundle for the API server
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Skip API server certificate verification
    #[arg(long)]
    insecure_skip_tls_verify: bool,
}

impl RunOptions {
    /// The config file, if any, with command line flags on top.
    fn into_config(self) -> anyhow::Result<CollectorConfig> {
        let mut config = match &self.config {
            Some(path) => CollectorConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => CollectorConfig::default(),
        };

        if let Some(content) = self.content {
            config.content = Some(content);
        }
        if let Some(tailoring) = self.tailoring {
            config.tailoring = Some(tailoring);
        }
        if let Some(profile) = self.profile {
            config.profile = profile;
        }
        if let Some(dir) = self.resultdir {
            config.result_dir = dir;
        }
        if let Some(file) = self.warnings_output_file {
            config.warnings_file = file;
        }
        if let Some(timeout) = self.content_timeout {
            config.content_timeout_seconds = timeout;
        }
        if let Some(url) = self.api_server {
            config.cluster.api_server = Some(url);
        }
        if let Some(token) = self.token_file {
            config.cluster.token_file = Some(token);
        }
        if let Some(ca) = self.ca_file {
            config.cluster.ca_file = Some(ca);
        }
        if self.insecure_skip_tls_verify {
            config.cluster.insecure_skip_tls_verify = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init(),
    }

    match cli.command {
        Commands::Collect { options } => {
            let config = options.into_config()?;
            info!(
                "Collecting resources for profile {} into {}",
                config.profile,
                config.result_dir.display()
            );

            let collector = Collector::connect(config)?;
            let collection = collector.run().await.map_err(|e| {
                if e.is_timeout() {
                    error!("Content never became available: {}", e);
                }
                e
            })?;

            info!(
                "Collection complete: {} resources, {} warnings",
                collection.outcome.results.len(),
                collection.outcome.warnings.len()
            );
        }

        Commands::Discover { options } => {
            let config = options.into_config()?;
            let collector = Collector::connect(config)?;
            let content = collector.load_content().await?;
            let discovery = collector.discover(&content).await?;

            println!("{}", serde_json::to_string_pretty(&discovery)?);
        }
    }

    Ok(())
}
