//! Label index: stable, matchable labels derived from deployment identity.
//!
//! Every derived [`LabelSet`] carries the managed-by marker and all six
//! identity axes. An empty axis value is the explicit "match anything on
//! this axis" marker; it is never rendered into a backend selector. The
//! service UUID is only present when one was supplied.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const PIPELINE_NAME: &str = "modeld.pipeline_name";
pub const PIPELINE_RUN_ID: &str = "modeld.pipeline_run_id";
pub const PIPELINE_STEP_NAME: &str = "modeld.pipeline_step_name";
pub const MODEL_NAME: &str = "modeld.model_name";
pub const MODEL_URI: &str = "modeld.model_uri";
pub const PREDICTOR: &str = "modeld.predictor";
pub const SERVICE_UUID: &str = "modeld.service_uuid";

/// Marks the records modeld owns. Always part of the selector.
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "modeld";

/// Keys that decide whether two deployments are equivalent.
pub const IDENTITY_KEYS: [&str; 3] = [PIPELINE_NAME, PIPELINE_STEP_NAME, MODEL_NAME];

/// Maximum length of a Kubernetes label value.
const MAX_VALUE_LEN: usize = 63;
/// Hex characters of the digest appended to rewritten values.
const DIGEST_LEN: usize = 8;
/// Room left for the readable prefix in front of `-<digest>`.
const PREFIX_LEN: usize = MAX_VALUE_LEN - DIGEST_LEN - 1;

/// Ordered label key/value mapping used as the sole lookup key against a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub(crate) fn from_identity(
        pipeline_name: &str,
        pipeline_run_id: &str,
        pipeline_step_name: &str,
        model_name: &str,
        model_uri: &str,
        predictor: &str,
    ) -> Self {
        let labels = [
            (PIPELINE_NAME, pipeline_name),
            (PIPELINE_RUN_ID, pipeline_run_id),
            (PIPELINE_STEP_NAME, pipeline_step_name),
            (MODEL_NAME, model_name),
            (MODEL_URI, model_uri),
            (PREDICTOR, predictor),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), label_value(value)))
        .chain([(MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string())])
        .collect();
        Self(labels)
    }

    /// Adds the exact-match service UUID label.
    #[must_use]
    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.0.insert(SERVICE_UUID.to_string(), uuid.to_string());
        self
    }

    /// The equivalence subset: pipeline name, step name and model name.
    #[must_use]
    pub fn identity(&self) -> LabelSet {
        Self(
            IDENTITY_KEYS
                .iter()
                .filter_map(|key| self.0.get(*key).map(|v| ((*key).to_string(), v.clone())))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Renders a `k=v,k=v` selector from the non-empty entries.
    ///
    /// The managed-by entry is always included, so even an all-wildcard
    /// set only selects records modeld created.
    pub fn selector(&self) -> String {
        let managed = format!("{MANAGED_BY}={MANAGED_BY_VALUE}");
        let parts: Vec<String> = self
            .0
            .iter()
            .filter(|(key, value)| !value.is_empty() && key.as_str() != MANAGED_BY)
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        std::iter::once(managed)
            .chain(parts)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Checks a resource's labels against this set, skipping wildcard axes.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(MANAGED_BY).map(String::as_str) == Some(MANAGED_BY_VALUE)
            && self
                .0
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .all(|(key, value)| labels.get(key) == Some(value))
    }
}

/// Maps a raw identity value to a Kubernetes label value, one-to-one.
///
/// Empty stays empty. A value that already is a valid label value is
/// kept as is. Anything else is rewritten: characters outside
/// `[A-Za-z0-9._-]` become `-`, the result is cut to leave room for a
/// `-` and the first eight hex digits of the SHA-256 of the raw value,
/// and trimmed to alphanumeric ends. Two raw values that sanitize to the
/// same text therefore still get different labels.
pub fn label_value(raw: &str) -> String {
    if raw.is_empty() || is_label_value(raw) {
        return raw.to_string();
    }

    let sanitized: String = raw
        .chars()
        .map(|ch| if is_label_char(ch) { ch } else { '-' })
        .take(PREFIX_LEN)
        .collect();
    let prefix = sanitized.trim_matches(|ch: char| !ch.is_ascii_alphanumeric());
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    let digest = &digest[..DIGEST_LEN];

    if prefix.is_empty() {
        digest.to_string()
    } else {
        format!("{prefix}-{digest}")
    }
}

/// Whether `value` is usable verbatim as a non-empty label value.
fn is_label_value(value: &str) -> bool {
    value.len() <= MAX_VALUE_LEN
        && value.chars().all(is_label_char)
        && value.starts_with(|ch: char| ch.is_ascii_alphanumeric())
        && value.ends_with(|ch: char| ch.is_ascii_alphanumeric())
}

fn is_label_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')
}
