//! modeld configuration file, loaded with confy.
//!
//! ```toml
//! [deployer]
//! kubernetes_namespace = "kserve"
//! secret = "s3-store"
//!
//! [cluster]
//! registry_port = 5000
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use modeld_core::DeployerConfig;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterConfig;

const APP_NAME: &str = "modeld";
const CONFIG_NAME: &str = "config";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub deployer: DeployerConfig,
    pub cluster: ClusterConfig,
}

impl CliConfig {
    /// Loads `path`, or the per-user config file when none is given.
    /// A missing file is created with the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => confy::load_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => confy::load(APP_NAME, CONFIG_NAME).context("Failed to load the modeld config"),
        }
    }

    /// Applies `--namespace`/`--context` (or their environment variables).
    #[must_use]
    pub fn with_overrides(mut self, namespace: Option<String>, context: Option<String>) -> Self {
        if namespace.is_some() {
            self.deployer.kubernetes_namespace = namespace;
        }
        if context.is_some() {
            self.deployer.kubernetes_context = context;
        }
        self
    }
}
