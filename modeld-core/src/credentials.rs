//! Credential stores resolving named secrets to backend credentials.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use snafu::OptionExt;

use crate::error::{CredentialError, NotFoundSecretSnafu};

/// Default environment variable prefix for [`EnvCredentials`].
pub const DEFAULT_PREFIX: &str = "MODELD";

/// Credential fields resolved from a secret.
///
/// `Debug` prints field names only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    fields: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Resolves a named secret into credential fields.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns [`CredentialError::NotFound`] when `name` is not registered.
    async fn get(&self, name: &str) -> Result<Credentials, CredentialError>;
}

/// In-memory credential store for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentials {
    secrets: Arc<RwLock<HashMap<String, Credentials>>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, name: impl Into<String>, credentials: Credentials) {
        self.secrets.write().await.insert(name.into(), credentials);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn get(&self, name: &str) -> Result<Credentials, CredentialError> {
        self.secrets
            .read()
            .await
            .get(name)
            .cloned()
            .context(NotFoundSecretSnafu { name })
    }
}

/// Read-only store backed by environment variables.
///
/// Secret `aws` with prefix `MODELD` is assembled from every variable named
/// `MODELD_AWS_<FIELD>`; field names are lowercased, so
/// `MODELD_AWS_ACCESS_KEY_ID` becomes field `access_key_id`.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    prefix: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvCredentials {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn secret_prefix(&self, name: &str) -> String {
        format!(
            "{}_{}_",
            self.prefix,
            name.to_ascii_uppercase().replace('-', "_")
        )
    }

    fn collect<I>(&self, name: &str, vars: I) -> Credentials
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = self.secret_prefix(name);
        vars.into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .filter(|field| !field.is_empty())
                    .map(|field| (field.to_ascii_lowercase(), value))
            })
            .collect()
    }
}

#[async_trait]
impl CredentialStore for EnvCredentials {
    async fn get(&self, name: &str) -> Result<Credentials, CredentialError> {
        let prefix = self.secret_prefix(name);
        let mut vars = Vec::new();
        for (key, value) in std::env::vars_os() {
            let Some(key) = key.to_str().filter(|key| key.starts_with(&prefix)) else {
                continue;
            };
            let value = value.into_string().map_err(|_| CredentialError::Store {
                message: format!("{key} is not valid unicode"),
            })?;
            vars.push((key.to_string(), value));
        }

        let credentials = self.collect(name, vars);
        if credentials.is_empty() {
            return NotFoundSecretSnafu { name }.fail();
        }
        Ok(credentials)
    }
}
