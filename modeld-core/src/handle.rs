//! Handles to backend-managed deployments.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::spec::DeploymentSpec;

/// Readiness as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum DeploymentState {
    /// The backend reports the model server as ready.
    Running,
    /// Accepted, not ready yet.
    Provisioning,
    /// The backend reports the model server as not ready, with a reason.
    Failed(String),
}

/// An existing deployment. The backend is the source of truth; a handle is
/// a snapshot taken when it was listed, created, updated or started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentHandle {
    pub uuid: Uuid,
    /// Backend-native resource name.
    pub resource_name: String,
    pub created_at: DateTime<Utc>,
    pub spec: DeploymentSpec,
    pub state: DeploymentState,
    pub prediction_url: Option<String>,
    /// Readiness conditions keyed by snake_case condition type.
    pub conditions: BTreeMap<String, bool>,
}

impl DeploymentHandle {
    pub fn is_running(&self) -> bool {
        self.state == DeploymentState::Running
    }

    pub fn info(&self) -> ModelServerInfo {
        ModelServerInfo {
            prediction_url: self.prediction_url.clone(),
            model_uri: self.spec.model_uri().to_string(),
            model_name: self.spec.model_name().to_string(),
            inference_service: self.resource_name.clone(),
        }
    }
}

/// Implementation-specific information about a model server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ModelServerInfo {
    pub prediction_url: Option<String>,
    pub model_uri: String,
    pub model_name: String,
    #[serde(rename = "KSERVE_INFERENCE_SERVICE")]
    pub inference_service: String,
}

impl ModelServerInfo {
    /// Key/value pairs in display order.
    pub fn entries(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("PREDICTION_URL", self.prediction_url.as_deref()),
            ("MODEL_URI", Some(self.model_uri.as_str())),
            ("MODEL_NAME", Some(self.model_name.as_str())),
            ("KSERVE_INFERENCE_SERVICE", Some(self.inference_service.as_str())),
        ]
    }
}
