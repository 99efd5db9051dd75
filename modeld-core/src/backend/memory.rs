//! In-memory backend for tests and dry runs.
//!
//! Stores the same camelCase `InferenceService` records a cluster would,
//! lists them newest first, and keeps a log of every call so that tests
//! can assert on what the matcher asked for.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use snafu::ResultExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::DeploymentBackend;
use crate::credentials::Credentials;
use crate::error::{BackendError, MalformedRecordSnafu};
use crate::handle::DeploymentHandle;
use crate::labels::{LabelSet, SERVICE_UUID};
use crate::record;
use crate::spec::DeploymentSpec;

/// One call received by a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    List { selector: String },
    Create { uuid: Uuid },
    Update { uuid: Uuid },
    Start { uuid: Uuid, timeout: Duration },
    Stop { uuid: Uuid, force: bool },
    ApplyCredentials { fields: Vec<String> },
}

#[derive(Debug, Default)]
struct State {
    /// Records in creation order.
    records: Vec<Value>,
    calls: Vec<BackendCall>,
    failing_stops: HashSet<Uuid>,
    fail_list: bool,
    last_created: Option<DateTime<Utc>>,
}

impl State {
    fn position(&self, uuid: Uuid) -> Option<usize> {
        self.records.iter().position(|raw| uuid_of(raw) == Some(uuid))
    }

    /// Strictly increasing creation timestamps, even within one clock tick.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created {
            Some(last) if now <= last => last + chrono::Duration::seconds(1),
            _ => now,
        };
        self.last_created = Some(stamp);
        stamp
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
    base_url: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.state.read().await.calls.clone()
    }

    /// UUIDs of the stored deployments, oldest first.
    pub async fn uuids(&self) -> Vec<Uuid> {
        self.state
            .read()
            .await
            .records
            .iter()
            .filter_map(uuid_of)
            .collect()
    }

    /// Makes every later `stop` of `uuid` fail.
    pub async fn fail_stop(&self, uuid: Uuid) {
        self.state.write().await.failing_stops.insert(uuid);
    }

    /// Makes every later `list` fail.
    pub async fn fail_list(&self) {
        self.state.write().await.fail_list = true;
    }

    /// Seeds a raw record as if it had been created out of band.
    pub async fn insert_record(&self, raw: Value) {
        self.state.write().await.records.push(raw);
    }

    /// Flips the `Ready` condition of a stored deployment.
    pub async fn set_ready(&self, uuid: Uuid, ready: bool) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let index = state.position(uuid).ok_or(BackendError::NotFound { uuid })?;
        let raw = &mut state.records[index];
        let status = ready_status(raw, ready);
        raw["status"] = status;
        Ok(())
    }

    fn materialize(&self, raw: &Value) -> Result<DeploymentHandle, BackendError> {
        record::materialize(raw, self.base_url.as_deref()).context(MalformedRecordSnafu)
    }
}

#[async_trait]
impl DeploymentBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    async fn list(&self, labels: &LabelSet) -> Result<Vec<Value>, BackendError> {
        let mut state = self.state.write().await;
        state.calls.push(BackendCall::List {
            selector: labels.selector(),
        });
        if state.fail_list {
            return Err(BackendError::Rejected {
                message: "list failure injected".to_string(),
            });
        }

        Ok(state
            .records
            .iter()
            .rev()
            .filter(|raw| labels.matches(&labels_of(raw)))
            .cloned()
            .collect())
    }

    async fn create(&self, spec: &DeploymentSpec) -> Result<DeploymentHandle, BackendError> {
        let uuid = Uuid::new_v4();
        let mut raw = record::manifest(spec, uuid, None);

        let mut state = self.state.write().await;
        state.calls.push(BackendCall::Create { uuid });
        let created = state.next_timestamp();
        raw["metadata"]["creationTimestamp"] =
            json!(created.to_rfc3339_opts(SecondsFormat::Millis, true));
        raw["status"] = json!({});
        state.records.push(raw.clone());
        drop(state);

        self.materialize(&raw)
    }

    async fn update(
        &self,
        uuid: Uuid,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentHandle, BackendError> {
        let mut state = self.state.write().await;
        state.calls.push(BackendCall::Update { uuid });
        let index = state.position(uuid).ok_or(BackendError::NotFound { uuid })?;

        let existing = &state.records[index];
        let mut raw = record::manifest(spec, uuid, None);
        raw["metadata"]["creationTimestamp"] =
            existing["metadata"]["creationTimestamp"].clone();
        raw["status"] = existing["status"].clone();
        state.records[index] = raw.clone();
        drop(state);

        self.materialize(&raw)
    }

    async fn start(
        &self,
        handle: &DeploymentHandle,
        timeout: Duration,
    ) -> Result<DeploymentHandle, BackendError> {
        let uuid = handle.uuid;
        let mut state = self.state.write().await;
        state.calls.push(BackendCall::Start { uuid, timeout });
        let index = state.position(uuid).ok_or(BackendError::NotFound { uuid })?;

        let raw = &mut state.records[index];
        let current = self.materialize(raw)?;
        if current.is_running() || timeout.is_zero() {
            return Ok(current);
        }
        let status = ready_status(raw, true);
        raw["status"] = status;
        let raw = raw.clone();
        drop(state);

        self.materialize(&raw)
    }

    async fn stop(&self, uuid: Uuid, _timeout: Duration, force: bool) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.calls.push(BackendCall::Stop { uuid, force });
        if state.failing_stops.contains(&uuid) {
            return Err(BackendError::Rejected {
                message: format!("stop failure injected for {uuid}"),
            });
        }
        if let Some(index) = state.position(uuid) {
            state.records.remove(index);
        }
        Ok(())
    }

    async fn apply_credentials(&self, credentials: &Credentials) -> Result<(), BackendError> {
        self.state
            .write()
            .await
            .calls
            .push(BackendCall::ApplyCredentials {
                fields: credentials.field_names().map(str::to_string).collect(),
            });
        Ok(())
    }
}

fn labels_of(raw: &Value) -> BTreeMap<String, String> {
    raw["metadata"]["labels"]
        .as_object()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn uuid_of(raw: &Value) -> Option<Uuid> {
    raw["metadata"]["labels"][SERVICE_UUID]
        .as_str()
        .and_then(|value| Uuid::parse_str(value).ok())
}

fn ready_status(raw: &Value, ready: bool) -> Value {
    let name = raw["metadata"]["name"].as_str().unwrap_or_default();
    let status = if ready { "True" } else { "False" };
    let mut ready_condition = json!({"type": "Ready", "status": status});
    if !ready {
        ready_condition["reason"] = json!("Stopped");
    }
    json!({
        "url": format!("http://{name}.modeld.svc.cluster.local"),
        "conditions": [
            {"type": "PredictorReady", "status": status},
            ready_condition,
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(model: &str) -> DeploymentSpec {
        DeploymentSpec::builder()
            .pipeline_name("p1")
            .pipeline_step_name("train")
            .model_name(model)
            .model_uri(format!("file:///models/{model}"))
            .predictor_kind("sklearn")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_filtered() {
        let backend = MemoryBackend::new();
        let a = backend.create(&spec("a")).await.unwrap();
        let b = backend.create(&spec("a")).await.unwrap();
        backend.create(&spec("other")).await.unwrap();

        let labels = spec("a").equivalence_criteria().labels();
        let listed: Vec<Uuid> = backend
            .list(&labels)
            .await
            .unwrap()
            .iter()
            .filter_map(uuid_of)
            .collect();
        assert_eq!(listed, vec![b.uuid, a.uuid]);
        assert!(b.created_at > a.created_at);
    }

    #[tokio::test]
    async fn test_list_skips_records_it_does_not_manage() {
        let backend = MemoryBackend::new();
        let ours = backend.create(&spec("a")).await.unwrap();
        let mut foreign = record::manifest(&spec("a"), Uuid::new_v4(), None);
        foreign["metadata"]["labels"]
            .as_object_mut()
            .unwrap()
            .remove(crate::labels::MANAGED_BY);
        backend.insert_record(foreign).await;

        let everything = crate::spec::DeploymentCriteria::default().labels();
        let listed: Vec<Uuid> = backend
            .list(&everything)
            .await
            .unwrap()
            .iter()
            .filter_map(uuid_of)
            .collect();
        assert_eq!(listed, vec![ours.uuid]);
        assert_eq!(
            backend.calls().await.last(),
            Some(&BackendCall::List {
                selector: "app.kubernetes.io/managed-by=modeld".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_zero_timeout_does_not_wait() {
        let backend = MemoryBackend::new();
        let handle = backend.create(&spec("a")).await.unwrap();
        assert!(!handle.is_running());

        let accepted = backend.start(&handle, Duration::ZERO).await.unwrap();
        assert!(!accepted.is_running());

        let running = backend.start(&handle, Duration::from_secs(5)).await.unwrap();
        assert!(running.is_running());
        let again = backend.start(&running, Duration::from_secs(5)).await.unwrap();
        assert_eq!(again, running);
    }

    #[tokio::test]
    async fn test_update_keeps_uuid_and_endpoint() {
        let backend = MemoryBackend::new();
        let handle = backend.create(&spec("a")).await.unwrap();
        let running = backend.start(&handle, Duration::from_secs(1)).await.unwrap();

        let next = DeploymentSpec::builder()
            .pipeline_name("p1")
            .pipeline_step_name("train")
            .model_name("a")
            .model_uri("file:///models/a/v2")
            .predictor_kind("sklearn")
            .build()
            .unwrap();
        let updated = backend.update(handle.uuid, &next).await.unwrap();
        assert_eq!(updated.uuid, handle.uuid);
        assert_eq!(updated.prediction_url, running.prediction_url);
        assert_eq!(updated.created_at, handle.created_at);
        assert_eq!(updated.spec.model_uri(), "file:///models/a/v2");
    }

    #[tokio::test]
    async fn test_stop_removes_and_ignores_missing() {
        let backend = MemoryBackend::new();
        let handle = backend.create(&spec("a")).await.unwrap();
        backend.stop(handle.uuid, Duration::ZERO, false).await.unwrap();
        backend.stop(handle.uuid, Duration::ZERO, true).await.unwrap();
        assert!(backend.uuids().await.is_empty());
    }
}
