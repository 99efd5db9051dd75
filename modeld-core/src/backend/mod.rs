//! Deployment backends: where model servers actually run.

pub mod kserve;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::credentials::Credentials;
use crate::error::BackendError;
use crate::handle::DeploymentHandle;
use crate::labels::LabelSet;
use crate::spec::DeploymentSpec;

pub use kserve::KServeBackend;
pub use memory::{BackendCall, MemoryBackend};

/// A backend that hosts model servers and manages them by label.
///
/// Every call is a blocking round trip from the caller's point of view;
/// the matcher never issues two calls at once.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    /// Short backend family name used in errors and logs.
    fn name(&self) -> &str;

    /// Ingress base URL used to build prediction URLs, if any.
    fn base_url(&self) -> Option<&str> {
        None
    }

    /// Raw records of every managed deployment matching `labels`.
    ///
    /// Empty label values are wildcards.
    async fn list(&self, labels: &LabelSet) -> Result<Vec<Value>, BackendError>;

    /// Provisions a new deployment with a fresh UUID.
    async fn create(&self, spec: &DeploymentSpec) -> Result<DeploymentHandle, BackendError>;

    /// Swaps the model served by `uuid` in place, keeping its UUID and endpoint.
    async fn update(
        &self,
        uuid: Uuid,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentHandle, BackendError>;

    /// Waits up to `timeout` for the deployment to become ready.
    ///
    /// A zero timeout returns as soon as provisioning has been accepted.
    /// Calling this on a running deployment is a no-op.
    async fn start(
        &self,
        handle: &DeploymentHandle,
        timeout: Duration,
    ) -> Result<DeploymentHandle, BackendError>;

    /// Deprovisions the deployment. A missing deployment is not an error.
    async fn stop(&self, uuid: Uuid, timeout: Duration, force: bool) -> Result<(), BackendError>;

    /// Makes `credentials` available to deployments created or updated afterwards.
    async fn apply_credentials(&self, credentials: &Credentials) -> Result<(), BackendError>;
}
