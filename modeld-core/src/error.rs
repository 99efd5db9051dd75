//! Error types for the deployment matcher and its collaborators.

use std::time::Duration;

use snafu::Snafu;
use uuid::Uuid;

/// Errors surfaced by [`crate::DeploymentMatcher`].
///
/// Everything except the best-effort cleanup stops performed during a
/// replacing deploy is propagated to the caller. No variant is retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DeployerError {
    /// A required setting is missing or invalid. Raised before any backend mutation.
    #[snafu(display("configuration error: {message}"))]
    Configuration { message: String },

    /// The named secret could not be resolved. Raised before any backend mutation.
    #[snafu(display("failed to resolve credentials from secret '{secret}'"))]
    CredentialResolution {
        secret: String,
        source: CredentialError,
    },

    /// The backend failed while listing, creating, updating, starting or deleting.
    #[snafu(display("{backend} backend failed to {operation}"))]
    BackendOperation {
        backend: String,
        operation: &'static str,
        source: BackendError,
    },

    /// The backend family has no primitive for this operation.
    #[snafu(display("{operation} is not supported by the {backend} backend: {hint}"))]
    UnsupportedOperation {
        backend: String,
        operation: &'static str,
        hint: &'static str,
    },
}

impl DeployerError {
    /// Starting an existing model server by UUID.
    pub fn start_unsupported(backend: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            backend: backend.into(),
            operation: "starting a model server",
            hint: "deploy the model again instead",
        }
    }

    /// Stopping a model server by UUID without deleting it.
    pub fn stop_unsupported(backend: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            backend: backend.into(),
            operation: "stopping a model server",
            hint: "delete the model server instead",
        }
    }

    /// Returns `true` for [`DeployerError::UnsupportedOperation`].
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedOperation { .. })
    }
}

/// Failures reported by a [`crate::DeploymentBackend`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("failed to connect to the cluster: {message}"))]
    Connect { message: String },

    #[snafu(display("kubernetes api request failed"))]
    Kube { source: kube::Error },

    #[snafu(display("deployment {uuid} not found"))]
    NotFound { uuid: Uuid },

    #[snafu(display("timed out after {}s waiting for {what}", timeout.as_secs()))]
    Timeout { what: String, timeout: Duration },

    #[snafu(display("malformed deployment record"))]
    MalformedRecord { source: RecordError },

    #[snafu(display("request rejected: {message}"))]
    Rejected { message: String },
}

/// Failures while turning a raw backend record into a handle, or a spec into a record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RecordError {
    #[snafu(display("record does not match the inference service schema"))]
    Schema { source: serde_json::Error },

    #[snafu(display("record is missing label '{key}'"))]
    MissingLabel { key: &'static str },

    #[snafu(display("record is missing field '{field}'"))]
    MissingField { field: &'static str },

    #[snafu(display("label '{key}' holds an invalid uuid: {value}"))]
    InvalidUuid {
        key: &'static str,
        value: String,
        source: uuid::Error,
    },

    #[snafu(display("spec annotation could not be read"))]
    SpecAnnotation { source: serde_json::Error },
}

/// Failures reported by a [`crate::CredentialStore`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CredentialError {
    #[snafu(display("secret '{name}' is not registered in the credential store"))]
    #[snafu(context(suffix(SecretSnafu)))]
    NotFound { name: String },

    #[snafu(display("no credential store is configured"))]
    NotConfigured,

    #[snafu(display("credential store failure: {message}"))]
    Store { message: String },
}

/// Rejections from [`crate::DeploymentSpecBuilder::build`].
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum SpecError {
    #[snafu(display("deployment spec requires a non-empty {field}"))]
    #[snafu(context(suffix(SpecSnafu)))]
    MissingField { field: &'static str },

    #[snafu(display("{field} must contain a letter or digit, got {value:?}"))]
    NoAlphanumeric { field: &'static str, value: String },
}
