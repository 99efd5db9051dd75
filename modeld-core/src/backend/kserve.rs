//! KServe backend: `InferenceService` custom resources through the Kubernetes API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, Config};
use serde_json::Value;
use snafu::ResultExt;
use tokio::sync::RwLock;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};
use uuid::Uuid;

use super::DeploymentBackend;
use crate::config::DeployerConfig;
use crate::credentials::Credentials;
use crate::error::{BackendError, KubeSnafu, MalformedRecordSnafu, SchemaSnafu};
use crate::handle::DeploymentHandle;
use crate::labels::LabelSet;
use crate::record::{self, API_GROUP, API_VERSION, KIND, PLURAL};
use crate::spec::DeploymentSpec;

const FIELD_MANAGER: &str = "modeld";
const CREDENTIALS_SECRET: &str = "modeld-kserve-credentials";
const SERVICE_ACCOUNT: &str = "modeld-kserve-sa";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct KServeBackend {
    client: Client,
    namespace: String,
    base_url: Option<String>,
    poll_interval: Duration,
    service_account: RwLock<Option<String>>,
}

impl KServeBackend {
    /// Name reported in errors and logs.
    pub const NAME: &'static str = "kserve";

    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            base_url: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            service_account: RwLock::new(None),
        }
    }

    /// Connects using the configured kubeconfig context, or the inferred
    /// configuration (local kubeconfig or in-cluster) when none is set.
    pub async fn connect(config: &DeployerConfig) -> Result<Self, BackendError> {
        let kube_config = match &config.kubernetes_context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..KubeConfigOptions::default()
                };
                Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| BackendError::Connect {
                        message: e.to_string(),
                    })?
            }
            None => Config::infer().await.map_err(|e| BackendError::Connect {
                message: e.to_string(),
            })?,
        };

        let namespace = config
            .kubernetes_namespace
            .clone()
            .unwrap_or_else(|| kube_config.default_namespace.clone());
        let client = Client::try_from(kube_config).context(KubeSnafu)?;

        info!(
            "Connected to kubernetes: context={}, namespace={}",
            config.kubernetes_context.as_deref().unwrap_or("<inferred>"),
            namespace
        );

        let mut backend = Self::new(client, namespace);
        backend.base_url.clone_from(&config.base_url);
        Ok(backend)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn inference_services(&self) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(API_GROUP, API_VERSION, KIND);
        let resource = ApiResource::from_gvk_with_plural(&gvk, PLURAL);
        Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
    }

    fn materialize(&self, object: &DynamicObject) -> Result<DeploymentHandle, BackendError> {
        let raw = to_raw(object)?;
        record::materialize(&raw, self.base_url.as_deref()).context(MalformedRecordSnafu)
    }

    async fn manifest_object(
        &self,
        spec: &DeploymentSpec,
        uuid: Uuid,
    ) -> Result<DynamicObject, BackendError> {
        let account = self.service_account.read().await.clone();
        let manifest = record::manifest(spec, uuid, account.as_deref());
        serde_json::from_value(manifest)
            .context(SchemaSnafu)
            .context(MalformedRecordSnafu)
    }

    async fn fetch(&self, uuid: Uuid) -> Result<Option<DynamicObject>, BackendError> {
        self.inference_services()
            .get_opt(&record::resource_name(uuid))
            .await
            .context(KubeSnafu)
    }
}

/// `None` when `timeout` reaches past what the clock can represent.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn is_past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn to_raw(object: &DynamicObject) -> Result<Value, BackendError> {
    serde_json::to_value(object)
        .context(SchemaSnafu)
        .context(MalformedRecordSnafu)
}

#[async_trait]
impl DeploymentBackend for KServeBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    async fn list(&self, labels: &LabelSet) -> Result<Vec<Value>, BackendError> {
        let selector = labels.selector();
        debug!(
            "Listing inference services in {} with selector {selector}",
            self.namespace
        );
        let params = ListParams::default().labels(&selector);

        let listed = self
            .inference_services()
            .list(&params)
            .await
            .context(KubeSnafu)?;
        listed.items.iter().map(to_raw).collect()
    }

    async fn create(&self, spec: &DeploymentSpec) -> Result<DeploymentHandle, BackendError> {
        let uuid = Uuid::new_v4();
        let object = self.manifest_object(spec, uuid).await?;
        let created = self
            .inference_services()
            .create(&PostParams::default(), &object)
            .await
            .context(KubeSnafu)?;
        self.materialize(&created)
    }

    async fn update(
        &self,
        uuid: Uuid,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentHandle, BackendError> {
        let existing = self
            .fetch(uuid)
            .await?
            .ok_or(BackendError::NotFound { uuid })?;

        let mut object = self.manifest_object(spec, uuid).await?;
        object
            .metadata
            .resource_version
            .clone_from(&existing.metadata.resource_version);

        let replaced = self
            .inference_services()
            .replace(&record::resource_name(uuid), &PostParams::default(), &object)
            .await
            .context(KubeSnafu)?;
        self.materialize(&replaced)
    }

    async fn start(
        &self,
        handle: &DeploymentHandle,
        timeout: Duration,
    ) -> Result<DeploymentHandle, BackendError> {
        let uuid = handle.uuid;
        let deadline = deadline_after(timeout);
        loop {
            let object = self
                .fetch(uuid)
                .await?
                .ok_or(BackendError::NotFound { uuid })?;
            let current = self.materialize(&object)?;
            if current.is_running() || timeout.is_zero() {
                return Ok(current);
            }
            if is_past(deadline) {
                return Err(BackendError::Timeout {
                    what: format!(
                        "inference service {} to become ready",
                        handle.resource_name
                    ),
                    timeout,
                });
            }
            debug!(
                "Waiting for {} to become ready: {:?}",
                handle.resource_name, current.state
            );
            sleep(self.poll_interval).await;
        }
    }

    async fn stop(&self, uuid: Uuid, timeout: Duration, force: bool) -> Result<(), BackendError> {
        let name = record::resource_name(uuid);
        if self.fetch(uuid).await?.is_none() {
            return Ok(());
        }

        let params = DeleteParams {
            grace_period_seconds: force.then_some(0),
            ..DeleteParams::default()
        };
        self.inference_services()
            .delete(&name, &params)
            .await
            .context(KubeSnafu)?;
        info!("Deleted inference service {name}");

        if timeout.is_zero() {
            return Ok(());
        }
        let deadline = deadline_after(timeout);
        while self.fetch(uuid).await?.is_some() {
            if is_past(deadline) {
                return Err(BackendError::Timeout {
                    what: format!("inference service {name} to be deleted"),
                    timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
        Ok(())
    }

    async fn apply_credentials(&self, credentials: &Credentials) -> Result<(), BackendError> {
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let data: BTreeMap<String, String> = credentials
            .fields()
            .iter()
            .map(|(field, value)| (field.to_ascii_uppercase(), value.clone()))
            .collect();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(CREDENTIALS_SECRET.to_string()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            string_data: Some(data),
            ..Secret::default()
        };
        Api::<Secret>::namespaced(self.client.clone(), &self.namespace)
            .patch(CREDENTIALS_SECRET, &params, &Patch::Apply(&secret))
            .await
            .context(KubeSnafu)?;

        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(SERVICE_ACCOUNT.to_string()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            secrets: Some(vec![ObjectReference {
                name: Some(CREDENTIALS_SECRET.to_string()),
                ..ObjectReference::default()
            }]),
            ..ServiceAccount::default()
        };
        Api::<ServiceAccount>::namespaced(self.client.clone(), &self.namespace)
            .patch(SERVICE_ACCOUNT, &params, &Patch::Apply(&account))
            .await
            .context(KubeSnafu)?;

        *self.service_account.write().await = Some(SERVICE_ACCOUNT.to_string());
        info!(
            "Applied credentials secret {CREDENTIALS_SECRET} and service account \
             {SERVICE_ACCOUNT} in {}",
            self.namespace
        );
        Ok(())
    }
}
