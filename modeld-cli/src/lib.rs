//! `modeld` command line: deploy and manage KServe model servers and a
//! local k3d cluster to run them on.

pub mod cluster;
pub mod commands;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::commands::{ClusterCommands, DeployArgs, ListArgs, handle_cluster_command, model};
use crate::config::CliConfig;

#[derive(Debug, Parser)]
#[command(name = "modeld")]
#[command(about = "Deploy and manage KServe model servers")]
#[command(version)]
pub struct Cli {
    /// Config file; defaults to the per-user modeld config
    #[arg(long, global = true, env = "MODELD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Namespace of the inference services
    #[arg(long, global = true, env = "MODELD_NAMESPACE")]
    pub namespace: Option<String>,

    /// Kubeconfig context to use
    #[arg(long, global = true, env = "MODELD_CONTEXT")]
    pub context: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Deploy a model server, or update an equivalent one with --replace
    Deploy(DeployArgs),

    /// List model servers matching the given labels
    #[clap(alias = "ls")]
    List(ListArgs),

    /// Show the prediction URL and details of a model server
    Info { uuid: Uuid },

    /// Delete a model server; unknown UUIDs are ignored
    Delete {
        uuid: Uuid,

        /// Seconds to wait for the deletion; 0 returns immediately
        #[arg(long)]
        timeout: Option<u64>,

        /// Delete without a grace period
        #[arg(long)]
        force: bool,
    },

    /// Start a model server (not supported by KServe)
    Start { uuid: Uuid },

    /// Stop a model server (not supported by KServe, use delete)
    Stop { uuid: Uuid },

    /// Manage the local k3d cluster
    #[command(subcommand)]
    Cluster(ClusterCommands),
}

/// Runs a parsed command line.
///
/// `start` and `stop` fail before the config is read or a cluster is
/// contacted.
pub async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config,
        namespace,
        context,
        command,
        ..
    } = cli;
    let load = move || -> Result<CliConfig> {
        Ok(CliConfig::load(config.as_deref())?.with_overrides(namespace, context))
    };

    match command {
        Commands::Start { uuid } => model::start(uuid),
        Commands::Stop { uuid } => model::stop(uuid),
        Commands::Deploy(args) => model::deploy(args, &load()?.deployer).await,
        Commands::List(args) => model::list(args, &load()?.deployer).await,
        Commands::Info { uuid } => model::info(uuid, &load()?.deployer).await,
        Commands::Delete {
            uuid,
            timeout,
            force,
        } => model::delete(uuid, timeout, force, &load()?.deployer).await,
        Commands::Cluster(cmd) => handle_cluster_command(cmd, &load()?.cluster),
    }
}
