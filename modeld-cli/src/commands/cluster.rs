//! Local cluster commands

use anyhow::{Result, bail};
use clap::Subcommand;

use crate::cluster::detection::list_available_tools;
use crate::cluster::{ClusterConfig, LocalCluster, check_prerequisites, detect_target};

#[derive(Debug, Subcommand, Clone)]
pub enum ClusterCommands {
    /// Check that k3d, kubectl and docker are installed
    Check,

    /// Create the local k3d cluster and its registry
    #[clap(alias = "up")]
    Provision,

    /// Delete the local cluster
    #[clap(alias = "down")]
    Deprovision,

    /// Start a suspended local cluster
    Resume,

    /// Stop the local cluster without deleting it
    Suspend,

    /// Show the detected cluster and local cluster state
    Status,

    /// Print the shell commands that provision the cluster by hand
    SetupSteps,
}

/// Handle cluster commands
pub fn handle_cluster_command(cmd: ClusterCommands, config: &ClusterConfig) -> Result<()> {
    let cluster = LocalCluster::from_config(config);
    match cmd {
        ClusterCommands::Check => check_only(),
        ClusterCommands::Provision => {
            cluster.provision()?;
            println!("✅ Local cluster {} provisioned", cluster.name());
            println!("   kubectl context: {}", cluster.kubernetes_context());
            println!("   registry:        {}", cluster.registry_name());
            Ok(())
        }
        ClusterCommands::Deprovision => {
            cluster.deprovision()?;
            println!("🗑️  Local cluster {} removed", cluster.name());
            Ok(())
        }
        ClusterCommands::Resume => {
            cluster.resume()?;
            println!("▶️  Local cluster {} running", cluster.name());
            Ok(())
        }
        ClusterCommands::Suspend => {
            cluster.suspend()?;
            println!("⏸️  Local cluster {} suspended", cluster.name());
            Ok(())
        }
        ClusterCommands::Status => status(&cluster),
        ClusterCommands::SetupSteps => {
            println!("# Provision the local cluster {} by hand:", cluster.name());
            for step in cluster.manual_setup_steps() {
                println!("{step}");
            }
            Ok(())
        }
    }
}

fn check_only() -> Result<()> {
    println!("📋 Checking local cluster prerequisites...");
    let result = check_prerequisites();

    for check in &result.checks {
        if check.is_satisfied() {
            println!(
                "  ✅ {} {} ({})",
                check.name,
                check.installed_version.as_deref().unwrap_or("unknown"),
                check.required_version
            );
        } else if check.found {
            println!(
                "  ⚠️  {} {} does not satisfy {}",
                check.name,
                check.installed_version.as_deref().unwrap_or("unknown"),
                check.required_version
            );
        } else {
            println!("  ❌ {} not found", check.name);
        }
    }

    if !result.all_met() {
        println!();
        println!("💡 Install hints:");
        for check in result.missing() {
            println!("  {}: {}", check.name, check.install_hint);
        }
        bail!("Missing {} required binaries", result.missing().len());
    }
    println!("✅ All prerequisites met");
    Ok(())
}

fn status(cluster: &LocalCluster) -> Result<()> {
    println!("🔎 Target: {}", detect_target());
    for (tool, available) in list_available_tools() {
        let mark = if available { "✅" } else { "❌" };
        println!("  {mark} {tool}");
    }
    println!("Local cluster: {}", cluster.name());

    if !cluster.is_provisioned()? {
        println!("  state: not provisioned");
    } else if cluster.is_running()? {
        println!("  state: running");
        println!("  kubectl context: {}", cluster.kubernetes_context());
    } else {
        println!("  state: suspended");
    }
    println!("  registry: {}", cluster.registry_name());
    println!("  root: {}", cluster.root().display());
    Ok(())
}
