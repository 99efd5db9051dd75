//! Desired-deployment descriptions and search criteria.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use uuid::Uuid;

use crate::error::{MissingFieldSpecSnafu, NoAlphanumericSnafu, SpecError};
use crate::labels::LabelSet;

/// Immutable description of a desired model-serving deployment.
///
/// Built through [`DeploymentSpec::builder`], which rejects specs whose
/// match-key fields are empty. Optional identity fields default to `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pipeline_name: String,
    #[serde(default)]
    pipeline_run_id: String,
    pipeline_step_name: String,
    model_name: String,
    model_uri: String,
    predictor_kind: String,
    #[serde(default)]
    resource_requests: BTreeMap<String, String>,
    #[serde(default)]
    secret_ref: Option<String>,
}

impl DeploymentSpec {
    pub fn builder() -> DeploymentSpecBuilder {
        DeploymentSpecBuilder::default()
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn pipeline_run_id(&self) -> &str {
        &self.pipeline_run_id
    }

    pub fn pipeline_step_name(&self) -> &str {
        &self.pipeline_step_name
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_uri(&self) -> &str {
        &self.model_uri
    }

    pub fn predictor_kind(&self) -> &str {
        &self.predictor_kind
    }

    pub fn resource_requests(&self) -> &BTreeMap<String, String> {
        &self.resource_requests
    }

    pub fn secret_ref(&self) -> Option<&str> {
        self.secret_ref.as_deref()
    }

    /// Labels derived from every identity field of this spec.
    pub fn labels(&self) -> LabelSet {
        LabelSet::from_identity(
            &self.pipeline_name,
            &self.pipeline_run_id,
            &self.pipeline_step_name,
            &self.model_name,
            &self.model_uri,
            &self.predictor_kind,
        )
    }

    /// Two specs are equivalent when they serve versions of the same model
    /// deployed by the same pipeline step.
    pub fn is_equivalent(&self, other: &DeploymentSpec) -> bool {
        self.labels().identity() == other.labels().identity()
    }

    /// Criteria that find every deployment equivalent to this spec.
    pub fn equivalence_criteria(&self) -> DeploymentCriteria {
        DeploymentCriteria {
            pipeline_name: self.pipeline_name.clone(),
            pipeline_step_name: self.pipeline_step_name.clone(),
            model_name: self.model_name.clone(),
            ..DeploymentCriteria::default()
        }
    }

    /// Rebuilds a spec from a backend record without validation.
    pub(crate) fn from_record_parts(
        labels: &BTreeMap<String, String>,
        model_uri: String,
        predictor_kind: String,
        resource_requests: BTreeMap<String, String>,
    ) -> Self {
        use crate::labels::{MODEL_NAME, PIPELINE_NAME, PIPELINE_RUN_ID, PIPELINE_STEP_NAME};

        let label = |key: &str| labels.get(key).cloned().unwrap_or_default();
        Self {
            pipeline_name: label(PIPELINE_NAME),
            pipeline_run_id: label(PIPELINE_RUN_ID),
            pipeline_step_name: label(PIPELINE_STEP_NAME),
            model_name: label(MODEL_NAME),
            model_uri,
            predictor_kind,
            resource_requests,
            secret_ref: None,
        }
    }
}

/// Builder for [`DeploymentSpec`].
#[derive(Debug, Clone, Default)]
pub struct DeploymentSpecBuilder {
    pipeline_name: String,
    pipeline_run_id: String,
    pipeline_step_name: String,
    model_name: String,
    model_uri: String,
    predictor_kind: String,
    resource_requests: BTreeMap<String, String>,
    secret_ref: Option<String>,
}

impl DeploymentSpecBuilder {
    #[must_use]
    pub fn pipeline_name(mut self, value: impl Into<String>) -> Self {
        self.pipeline_name = value.into();
        self
    }

    #[must_use]
    pub fn pipeline_run_id(mut self, value: impl Into<String>) -> Self {
        self.pipeline_run_id = value.into();
        self
    }

    #[must_use]
    pub fn pipeline_step_name(mut self, value: impl Into<String>) -> Self {
        self.pipeline_step_name = value.into();
        self
    }

    #[must_use]
    pub fn model_name(mut self, value: impl Into<String>) -> Self {
        self.model_name = value.into();
        self
    }

    #[must_use]
    pub fn model_uri(mut self, value: impl Into<String>) -> Self {
        self.model_uri = value.into();
        self
    }

    #[must_use]
    pub fn predictor_kind(mut self, value: impl Into<String>) -> Self {
        self.predictor_kind = value.into();
        self
    }

    #[must_use]
    pub fn resource_request(
        mut self,
        name: impl Into<String>,
        quantity: impl Into<String>,
    ) -> Self {
        self.resource_requests.insert(name.into(), quantity.into());
        self
    }

    #[must_use]
    pub fn secret_ref(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        self.secret_ref = (!value.trim().is_empty()).then_some(value);
        self
    }

    /// Validates the match-key fields and produces the spec.
    ///
    /// Each match-key field must be non-blank and hold at least one ASCII
    /// letter or digit.
    pub fn build(self) -> Result<DeploymentSpec, SpecError> {
        let required = [
            ("pipeline_name", &self.pipeline_name),
            ("pipeline_step_name", &self.pipeline_step_name),
            ("model_name", &self.model_name),
            ("model_uri", &self.model_uri),
            ("predictor_kind", &self.predictor_kind),
        ];
        for (field, value) in required {
            ensure!(!value.trim().is_empty(), MissingFieldSpecSnafu { field });
            ensure!(
                value.chars().any(|ch| ch.is_ascii_alphanumeric()),
                NoAlphanumericSnafu { field, value }
            );
        }

        Ok(DeploymentSpec {
            pipeline_name: self.pipeline_name,
            pipeline_run_id: self.pipeline_run_id,
            pipeline_step_name: self.pipeline_step_name,
            model_name: self.model_name,
            model_uri: self.model_uri,
            predictor_kind: self.predictor_kind,
            resource_requests: self.resource_requests,
            secret_ref: self.secret_ref,
        })
    }
}

/// Partial search criteria for [`crate::DeploymentMatcher::find`].
///
/// Empty fields match anything on that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentCriteria {
    pub pipeline_name: String,
    pub pipeline_run_id: String,
    pub pipeline_step_name: String,
    pub model_name: String,
    pub model_uri: String,
    pub predictor_kind: String,
    pub service_uuid: Option<Uuid>,
}

impl DeploymentCriteria {
    /// Criteria selecting a single deployment by its UUID.
    pub fn by_uuid(uuid: Uuid) -> Self {
        Self {
            service_uuid: Some(uuid),
            ..Self::default()
        }
    }

    pub fn labels(&self) -> LabelSet {
        let labels = LabelSet::from_identity(
            &self.pipeline_name,
            &self.pipeline_run_id,
            &self.pipeline_step_name,
            &self.model_name,
            &self.model_uri,
            &self.predictor_kind,
        );
        match self.service_uuid {
            Some(uuid) => labels.with_service_uuid(uuid),
            None => labels,
        }
    }
}
