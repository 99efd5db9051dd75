// Cluster auto-detection
// Detects which Kubernetes targets are reachable from this machine

use std::fmt;

use duct::cmd;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterTarget {
    /// A kubeconfig context is selected.
    KubeContext(String),
    /// No context, but k3d can provision a local cluster.
    LocalK3d,
    Unavailable,
}

impl fmt::Display for ClusterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KubeContext(context) => write!(f, "kubernetes context '{context}'"),
            Self::LocalK3d => write!(f, "local k3d cluster (not provisioned)"),
            Self::Unavailable => write!(f, "no kubernetes cluster"),
        }
    }
}

/// Detect the cluster modeld would deploy to
pub fn detect_target() -> ClusterTarget {
    // Priority order: configured context > k3d
    if let Some(context) = current_context() {
        return ClusterTarget::KubeContext(context);
    }
    if k3d_available() {
        return ClusterTarget::LocalK3d;
    }
    ClusterTarget::Unavailable
}

/// Tool availability, in detection order.
pub fn list_available_tools() -> Vec<(&'static str, bool)> {
    vec![
        ("kubectl", current_context().is_some()),
        ("k3d", k3d_available()),
    ]
}

fn current_context() -> Option<String> {
    cmd!("kubectl", "config", "current-context")
        .stderr_null()
        .read()
        .ok()
        .map(|context| context.trim().to_string())
        .filter(|context| !context.is_empty())
}

fn k3d_available() -> bool {
    cmd!("k3d", "version")
        .stdout_null()
        .stderr_null()
        .run()
        .is_ok()
}
