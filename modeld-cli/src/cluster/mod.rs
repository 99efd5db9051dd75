//! Local k3d cluster for running KServe model servers on a workstation.
//!
//! The cluster is created with a k3d-managed image registry whose mirror
//! configuration is written to the modeld root directory.

pub mod detection;
pub mod prereq;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use duct::cmd;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use detection::{ClusterTarget, detect_target};
pub use prereq::{PrereqResult, check_prerequisites};

const REGISTRY_CONFIG_FILE: &str = "k3d_registry.yaml";

/// Settings of the local cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Distinguishes clusters of different modeld setups; its first
    /// eight characters go into the cluster name.
    pub cluster_id: String,
    pub registry_port: u16,
    /// Directory holding the registry config and mounted into the
    /// cluster nodes. `~` is expanded.
    pub root_directory: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let root_directory = dirs::data_dir()
            .map(|dir| dir.join("modeld").display().to_string())
            .unwrap_or_else(|| "~/.modeld".to_string());
        Self {
            cluster_id: "local".to_string(),
            registry_port: 5000,
            root_directory,
        }
    }
}

/// k3d registry configuration file.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub mirrors: BTreeMap<String, RegistryMirror>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMirror {
    pub endpoint: Vec<String>,
}

/// One entry of `k3d cluster list -o json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct K3dCluster {
    name: String,
    #[serde(default)]
    servers_running: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCluster {
    name: String,
    registry_port: u16,
    root: PathBuf,
}

impl LocalCluster {
    pub fn from_config(config: &ClusterConfig) -> Self {
        let prefix: String = config.cluster_id.chars().take(8).collect();
        let root = shellexpand::tilde(&config.root_directory).into_owned();
        Self {
            name: format!("modeld-{prefix}"),
            registry_port: config.registry_port,
            root: PathBuf::from(root),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Kubeconfig context k3d creates for the cluster.
    pub fn kubernetes_context(&self) -> String {
        format!("k3d-{}", self.name)
    }

    pub fn registry_name(&self) -> String {
        format!("k3d-modeld-registry.localhost:{}", self.registry_port)
    }

    pub fn registry_config_path(&self) -> PathBuf {
        self.root.join(REGISTRY_CONFIG_FILE)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        let registry = self.registry_name();
        let mirror = RegistryMirror {
            endpoint: vec![format!("http://{registry}")],
        };
        RegistryConfig {
            mirrors: BTreeMap::from([(registry, mirror)]),
        }
    }

    /// Writes the registry config, creating the root directory if needed.
    pub fn write_registry_config(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create directory: {}", self.root.display()))?;
        let yaml = serde_yaml::to_string(&self.registry_config())
            .context("Failed to render the k3d registry config")?;
        let path = self.registry_config_path();
        fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Wrote k3d registry config to {}", path.display());
        Ok(path)
    }

    fn create_args(&self) -> Vec<String> {
        let root = self.root.display().to_string();
        vec![
            "cluster".to_string(),
            "create".to_string(),
            self.name.clone(),
            "--registry-create".to_string(),
            self.registry_name(),
            "--registry-config".to_string(),
            self.registry_config_path().display().to_string(),
            "--volume".to_string(),
            format!("{root}:{root}"),
        ]
    }

    /// Shell commands provisioning the cluster by hand.
    pub fn manual_setup_steps(&self) -> Vec<String> {
        let registry = self.registry_name();
        vec![
            format!("mkdir -p {}", self.root.display()),
            format!(
                "cat > {} <<EOF\nmirrors:\n  {registry}:\n    endpoint:\n    \
                 - http://{registry}\nEOF",
                self.registry_config_path().display()
            ),
            format!("k3d {}", self.create_args().join(" ")),
            format!("kubectl config use-context {}", self.kubernetes_context()),
        ]
    }

    fn find(&self) -> Result<Option<K3dCluster>> {
        let output = cmd!("k3d", "cluster", "list", "-o", "json")
            .stderr_null()
            .read()
            .context("Failed to list k3d clusters")?;
        let clusters = parse_cluster_list(&output)?;
        Ok(clusters.into_iter().find(|cluster| cluster.name == self.name))
    }

    pub fn is_provisioned(&self) -> Result<bool> {
        Ok(self.find()?.is_some())
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.find()?.is_some_and(|cluster| cluster.servers_running > 0))
    }

    /// Creates the cluster and its registry.
    pub fn provision(&self) -> Result<()> {
        let prereqs = check_prerequisites();
        if !prereqs.all_met() {
            let missing: Vec<&str> = prereqs.missing().iter().map(|c| c.name.as_str()).collect();
            bail!(
                "Missing prerequisites for a local cluster: {}\n\
                 Run `modeld cluster check` for install hints",
                missing.join(", ")
            );
        }
        if self.is_provisioned()? {
            info!("Local cluster {} already exists", self.name);
            return Ok(());
        }

        self.write_registry_config()?;
        info!("Provisioning local cluster {}", self.name);
        cmd("k3d", self.create_args())
            .run()
            .with_context(|| format!("Failed to create k3d cluster {}", self.name))?;
        info!(
            "Local cluster {} ready, kubernetes context {}",
            self.name,
            self.kubernetes_context()
        );
        Ok(())
    }

    pub fn deprovision(&self) -> Result<()> {
        if !self.is_provisioned()? {
            info!("Local cluster {} does not exist", self.name);
            return Ok(());
        }
        cmd!("k3d", "cluster", "delete", &self.name)
            .run()
            .with_context(|| format!("Failed to delete k3d cluster {}", self.name))?;
        info!("Deleted local cluster {}", self.name);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if !self.is_provisioned()? {
            bail!("Local cluster {} does not exist; provision it first", self.name);
        }
        if self.is_running()? {
            info!("Local cluster {} is already running", self.name);
            return Ok(());
        }
        cmd!("k3d", "cluster", "start", &self.name)
            .run()
            .with_context(|| format!("Failed to start k3d cluster {}", self.name))?;
        info!("Resumed local cluster {}", self.name);
        Ok(())
    }

    pub fn suspend(&self) -> Result<()> {
        if !self.is_running()? {
            info!("Local cluster {} is not running", self.name);
            return Ok(());
        }
        cmd!("k3d", "cluster", "stop", &self.name)
            .run()
            .with_context(|| format!("Failed to stop k3d cluster {}", self.name))?;
        info!("Suspended local cluster {}", self.name);
        Ok(())
    }
}

fn parse_cluster_list(json: &str) -> Result<Vec<K3dCluster>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).context("Failed to parse `k3d cluster list` output")
}
