//! Deployer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::DEFAULT_PREFIX;
use crate::matcher::WinnerSelection;

/// Default seconds to wait for a model server to start or stop.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Settings of the KServe model deployer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Kubeconfig context; the inferred configuration is used when unset.
    pub kubernetes_context: Option<String>,
    /// Namespace of the inference services; the context's namespace when unset.
    pub kubernetes_namespace: Option<String>,
    /// Ingress base URL exposing the inference services.
    pub base_url: Option<String>,
    /// Secret holding the storage credentials of deployed models.
    pub secret: Option<String>,
    /// Fail deploys that name no secret.
    pub require_credentials: bool,
    pub timeout_secs: u64,
    pub winner_selection: WinnerSelection,
    /// Environment prefix of the env credential store.
    pub credentials_prefix: String,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            kubernetes_context: None,
            kubernetes_namespace: None,
            base_url: None,
            secret: None,
            require_credentials: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            winner_selection: WinnerSelection::default(),
            credentials_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl DeployerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
