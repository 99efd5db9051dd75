//! Typed mapping between `InferenceService` records and deployment handles.
//!
//! Backends hand back raw records in the Kubernetes camelCase convention.
//! [`materialize`] reads them through a typed schema for the known field
//! set; only condition types, whose set is open, go through
//! [`crate::naming::to_snake_case`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use snafu::{OptionExt, ResultExt};
use uuid::Uuid;

use crate::error::{
    InvalidUuidSnafu, MissingFieldSnafu, MissingLabelSnafu, RecordError, SchemaSnafu,
    SpecAnnotationSnafu,
};
use crate::handle::{DeploymentHandle, DeploymentState};
use crate::labels::SERVICE_UUID;
use crate::naming::to_snake_case;
use crate::spec::DeploymentSpec;

pub const API_GROUP: &str = "serving.kserve.io";
pub const API_VERSION: &str = "v1beta1";
pub const KIND: &str = "InferenceService";
pub const PLURAL: &str = "inferenceservices";

/// Annotation holding the JSON snapshot of the deployed spec.
pub const SPEC_ANNOTATION: &str = "modeld.io/deployment-spec";

/// Resource name of the inference service managed for `uuid`.
pub fn resource_name(uuid: Uuid) -> String {
    format!("modeld-{}", uuid.simple())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceServiceRecord {
    metadata: RecordMetadata,
    #[serde(default)]
    spec: Option<InferenceServiceSpec>,
    #[serde(default)]
    status: Option<InferenceServiceStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordMetadata {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceServiceSpec {
    predictor: PredictorSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictorSpec {
    /// Framework sections (`sklearn`, `tensorflow`, `model`, ...) and any
    /// other predictor fields such as `serviceAccountName`.
    #[serde(flatten)]
    sections: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelSection {
    storage_uri: String,
    #[serde(default)]
    resources: ResourceSection,
    #[serde(default)]
    model_format: Option<ModelFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceSection {
    #[serde(default)]
    requests: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ModelFormat {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceServiceStatus {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    conditions: Vec<ConditionRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionRecord {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PredictorSpec {
    /// First framework section carrying a `storageUri`, with its kind.
    fn model_section(&self) -> Option<(String, ModelSection)> {
        self.sections.iter().find_map(|(key, value)| {
            if !value.get("storageUri").is_some_and(Value::is_string) {
                return None;
            }
            let section: ModelSection = serde_json::from_value(value.clone()).ok()?;
            let kind = match (&section.model_format, key.as_str()) {
                (Some(format), "model") => format.name.clone(),
                _ => key.clone(),
            };
            Some((kind, section))
        })
    }
}

/// Materializes a raw backend record into a [`DeploymentHandle`].
///
/// `base_url` is the ingress exposing the inference services; without it
/// the prediction URL is derived from `status.url`. Either way the URL is
/// only reported once the deployment is running.
pub fn materialize(raw: &Value, base_url: Option<&str>) -> Result<DeploymentHandle, RecordError> {
    let record: InferenceServiceRecord =
        serde_json::from_value(raw.clone()).context(SchemaSnafu)?;
    let metadata = record.metadata;

    let uuid_label = metadata
        .labels
        .get(SERVICE_UUID)
        .context(MissingLabelSnafu { key: SERVICE_UUID })?;
    let uuid = Uuid::parse_str(uuid_label).context(InvalidUuidSnafu {
        key: SERVICE_UUID,
        value: uuid_label.clone(),
    })?;

    let created_at = metadata.creation_timestamp.context(MissingFieldSnafu {
        field: "metadata.creationTimestamp",
    })?;

    let spec = match metadata.annotations.get(SPEC_ANNOTATION) {
        Some(snapshot) => serde_json::from_str(snapshot).context(SpecAnnotationSnafu)?,
        None => {
            let (kind, section) = record
                .spec
                .as_ref()
                .and_then(|spec| spec.predictor.model_section())
                .context(MissingFieldSnafu {
                    field: "spec.predictor.*.storageUri",
                })?;
            DeploymentSpec::from_record_parts(
                &metadata.labels,
                section.storage_uri,
                kind,
                section.resources.requests,
            )
        }
    };

    let status = record.status.unwrap_or_default();
    let conditions: BTreeMap<String, bool> = status
        .conditions
        .iter()
        .map(|c| (to_snake_case(&c.kind), c.status == "True"))
        .collect();

    let state = match status.conditions.iter().find(|c| c.kind == "Ready") {
        Some(ready) if ready.status == "True" => DeploymentState::Running,
        Some(ready) if ready.status == "False" && ready.reason.is_some() => {
            let reason = ready.reason.clone().unwrap_or_default();
            match &ready.message {
                Some(message) => DeploymentState::Failed(format!("{reason}: {message}")),
                None => DeploymentState::Failed(reason),
            }
        }
        _ => DeploymentState::Provisioning,
    };

    let prediction_url = if state == DeploymentState::Running {
        base_url
            .or(status.url.as_deref())
            .map(|base| predict_url(base, &metadata.name))
    } else {
        None
    };

    Ok(DeploymentHandle {
        uuid,
        resource_name: metadata.name,
        created_at,
        spec,
        state,
        prediction_url,
        conditions,
    })
}

fn predict_url(base: &str, resource_name: &str) -> String {
    format!(
        "{}/v1/models/{resource_name}:predict",
        base.trim_end_matches('/')
    )
}

/// Builds the `InferenceService` manifest for `spec` under `uuid`.
pub fn manifest(spec: &DeploymentSpec, uuid: Uuid, service_account: Option<&str>) -> Value {
    let labels = spec.labels().with_service_uuid(uuid);
    // DeploymentSpec only holds strings and string maps
    let snapshot = serde_json::to_string(spec).unwrap_or_default();

    let mut model = json!({
        "storageUri": spec.model_uri(),
    });
    if !spec.resource_requests().is_empty() {
        model["resources"] = json!({ "requests": spec.resource_requests() });
    }

    let mut predictor = Map::new();
    predictor.insert(spec.predictor_kind().to_string(), model);
    if let Some(account) = service_account {
        predictor.insert("serviceAccountName".to_string(), json!(account));
    }

    json!({
        "apiVersion": format!("{API_GROUP}/{API_VERSION}"),
        "kind": KIND,
        "metadata": {
            "name": resource_name(uuid),
            "labels": labels.as_map(),
            "annotations": { SPEC_ANNOTATION: snapshot },
        },
        "spec": { "predictor": predictor },
    })
}
