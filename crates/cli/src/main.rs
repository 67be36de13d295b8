//! Volume Optimizer CLI
//!
//! A command-line tool for analyzing block volumes, executing remediations
//! and estimating costs through the volume optimizer service.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{analyze, costs, execute};

/// Volume Optimizer CLI
#[derive(Parser)]
#[command(name = "vopt")]
#[command(author, version, about = "CLI for the Volume Optimizer", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via VOPT_API_URL env var)
    #[arg(long, env = "VOPT_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify volumes as idle or overprovisioned and suggest remediations
    Analyze {
        /// Volume to analyze (repeatable; all volumes when omitted)
        #[arg(long = "volume-id")]
        volume_ids: Vec<String>,
    },

    /// Execute a remediation on one volume
    Execute {
        /// Volume ID
        volume_id: String,

        /// Remediation to perform
        #[arg(value_enum)]
        action: execute::ActionKind,

        /// Target size in GB (resize actions)
        #[arg(long)]
        target_size: Option<u64>,

        /// Target volume class (change-type actions, default gp3)
        #[arg(long)]
        target_class: Option<String>,

        /// Provisioned IOPS
        #[arg(long)]
        iops: Option<u32>,

        /// Provisioned throughput in MiB/s
        #[arg(long)]
        throughput: Option<u32>,
    },

    /// Estimate the monthly cost of a volume configuration
    Cost {
        /// Size in GB
        #[arg(long)]
        size: u64,

        /// Volume class (gp2, gp3, io1, io2, st1, sc1, standard)
        #[arg(long)]
        class: String,

        /// Region (service default when omitted)
        #[arg(long)]
        region: Option<String>,

        /// Provisioned IOPS
        #[arg(long)]
        iops: Option<f64>,

        /// Provisioned throughput in MiB/s
        #[arg(long)]
        throughput: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let format = config.format(cli.format)?;

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Analyze { volume_ids } => {
            analyze::run(&client, volume_ids, format).await?;
        }
        Commands::Execute {
            volume_id,
            action,
            target_size,
            target_class,
            iops,
            throughput,
        } => {
            let params = execute::ActionParams {
                target_size_gb: target_size,
                target_class,
                iops,
                throughput,
            };
            execute::run(&client, &volume_id, action, params, format).await?;
        }
        Commands::Cost {
            size,
            class,
            region,
            iops,
            throughput,
        } => {
            let request = client::CostRequest {
                size_gb: size,
                volume_class: class,
                region: region.or_else(|| config.default_region.clone()),
                iops,
                throughput,
            };
            costs::estimate(&client, request, format).await?;
        }
    }

    Ok(())
}
