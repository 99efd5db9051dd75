//! Deployment matcher: the equivalence-based deploy/update/find protocol.
//!
//! Two deployments are equivalent when they serve versions of the same
//! model deployed by the same pipeline step (same pipeline name, step name
//! and model name). A replacing deploy updates one equivalent deployment in
//! place, so it keeps its UUID and prediction URL, and removes the others.
//!
//! The matcher holds no deployment state. It does not lock: two concurrent
//! replacing deploys of the same spec can both see no equivalent and both
//! create one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::DeploymentBackend;
use crate::config::DeployerConfig;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{
    BackendOperationSnafu, CredentialError, CredentialResolutionSnafu, DeployerError,
    MalformedRecordSnafu,
};
use crate::handle::DeploymentHandle;
use crate::record;
use crate::spec::{DeploymentCriteria, DeploymentSpec};

/// How the surviving deployment is picked among equivalent ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerSelection {
    /// The first deployment in the order the backend listed them.
    #[default]
    BackendOrder,
    /// The most recently created deployment, by creation timestamp.
    NewestFirst,
}

impl WinnerSelection {
    fn order(self, handles: &mut [DeploymentHandle]) {
        match self {
            Self::BackendOrder => {}
            Self::NewestFirst => handles.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
    }
}

/// Matcher behaviour that does not depend on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatcherSettings {
    /// Secret used when a spec names none.
    pub secret: Option<String>,
    pub require_credentials: bool,
    pub winner_selection: WinnerSelection,
}

impl From<&DeployerConfig> for MatcherSettings {
    fn from(config: &DeployerConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            require_credentials: config.require_credentials,
            winner_selection: config.winner_selection,
        }
    }
}

pub struct DeploymentMatcher {
    backend: Arc<dyn DeploymentBackend>,
    credentials: Option<Arc<dyn CredentialStore>>,
    settings: MatcherSettings,
}

impl DeploymentMatcher {
    pub fn new(
        backend: Arc<dyn DeploymentBackend>,
        credentials: Option<Arc<dyn CredentialStore>>,
        settings: MatcherSettings,
    ) -> Self {
        Self {
            backend,
            credentials,
            settings,
        }
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    fn backend_error(
        &self,
        operation: &'static str,
    ) -> BackendOperationSnafu<String, &'static str> {
        BackendOperationSnafu {
            backend: self.backend.name().to_string(),
            operation,
        }
    }

    /// Finds deployments matching `criteria`, in backend order.
    ///
    /// With `running_only`, deployments the backend does not report as
    /// running are dropped.
    pub async fn find(
        &self,
        criteria: &DeploymentCriteria,
        running_only: bool,
    ) -> Result<Vec<DeploymentHandle>, DeployerError> {
        let labels = criteria.labels();
        debug!("Finding deployments with selector {}", labels.selector());

        let records = self
            .backend
            .list(&labels)
            .await
            .context(self.backend_error("list deployments"))?;

        let mut handles = Vec::with_capacity(records.len());
        for raw in &records {
            let handle = record::materialize(raw, self.backend.base_url())
                .context(MalformedRecordSnafu)
                .context(self.backend_error("read a deployment record"))?;
            if running_only && !handle.is_running() {
                continue;
            }
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Looks up one deployment by UUID.
    pub async fn get(&self, uuid: Uuid) -> Result<Option<DeploymentHandle>, DeployerError> {
        Ok(self
            .find(&DeploymentCriteria::by_uuid(uuid), false)
            .await?
            .into_iter()
            .next())
    }

    /// Creates a deployment for `spec`, or with `replace` updates an
    /// equivalent one in place, then waits up to `timeout` for it to start.
    ///
    /// A zero `timeout` returns once provisioning has been accepted.
    pub async fn deploy(
        &self,
        spec: &DeploymentSpec,
        replace: bool,
        timeout: Duration,
    ) -> Result<DeploymentHandle, DeployerError> {
        if let Some(credentials) = self.resolve_credentials(spec).await? {
            self.backend
                .apply_credentials(&credentials)
                .await
                .context(self.backend_error("apply credentials"))?;
        }

        let winner = if replace {
            self.reconcile_equivalents(spec).await?
        } else {
            None
        };

        let handle = match winner {
            Some(winner) => {
                info!(
                    "Updating existing deployment {} ({}) for model {}",
                    winner.uuid,
                    winner.resource_name,
                    spec.model_name()
                );
                self.backend
                    .update(winner.uuid, spec)
                    .await
                    .context(self.backend_error("update a deployment"))?
            }
            None => {
                let handle = self
                    .backend
                    .create(spec)
                    .await
                    .context(self.backend_error("create a deployment"))?;
                info!(
                    "Created new deployment {} ({}) for model {}",
                    handle.uuid,
                    handle.resource_name,
                    spec.model_name()
                );
                handle
            }
        };

        self.backend
            .start(&handle, timeout)
            .await
            .context(self.backend_error("start a deployment"))
    }

    /// Picks the deployment to update among those equivalent to `spec` and
    /// stops the rest. Stop failures are logged and ignored.
    async fn reconcile_equivalents(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<Option<DeploymentHandle>, DeployerError> {
        let mut equivalents = self.find(&spec.equivalence_criteria(), false).await?;
        self.settings.winner_selection.order(&mut equivalents);

        let mut equivalents = equivalents.into_iter();
        let winner = equivalents.next();
        for stale in equivalents {
            info!("Stopping duplicate deployment {}", stale.uuid);
            if let Err(e) = self.backend.stop(stale.uuid, Duration::ZERO, false).await {
                warn!("Failed to stop duplicate deployment {}: {}", stale.uuid, e);
            }
        }
        Ok(winner)
    }

    async fn resolve_credentials(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<Option<Credentials>, DeployerError> {
        let Some(secret) = spec.secret_ref().or(self.settings.secret.as_deref()) else {
            if self.settings.require_credentials {
                return Err(DeployerError::Configuration {
                    message: "a secret name must be set on the deployer or the deployment spec"
                        .to_string(),
                });
            }
            return Ok(None);
        };

        let store = self
            .credentials
            .as_ref()
            .ok_or(CredentialError::NotConfigured)
            .context(CredentialResolutionSnafu { secret })?;
        let credentials = store
            .get(secret)
            .await
            .context(CredentialResolutionSnafu { secret })?;
        debug!("Resolved credentials from secret {secret}");
        Ok(Some(credentials))
    }

    /// Deletes the deployment with `uuid`. Deleting an unknown UUID succeeds.
    pub async fn delete(
        &self,
        uuid: Uuid,
        timeout: Duration,
        force: bool,
    ) -> Result<(), DeployerError> {
        let Some(handle) = self.get(uuid).await? else {
            debug!("No deployment {uuid} to delete");
            return Ok(());
        };
        self.backend
            .stop(handle.uuid, timeout, force)
            .await
            .context(self.backend_error("delete a deployment"))?;
        info!("Deleted deployment {uuid}");
        Ok(())
    }

    /// Not supported: the backend cannot start an existing model server
    /// independently of creating it.
    pub async fn start_by_uuid(
        &self,
        _uuid: Uuid,
        _timeout: Duration,
    ) -> Result<(), DeployerError> {
        Err(DeployerError::start_unsupported(self.backend.name()))
    }

    /// Not supported: the backend cannot stop a model server without deleting it.
    pub async fn stop_by_uuid(
        &self,
        _uuid: Uuid,
        _timeout: Duration,
        _force: bool,
    ) -> Result<(), DeployerError> {
        Err(DeployerError::stop_unsupported(self.backend.name()))
    }
}
