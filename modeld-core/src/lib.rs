//! Model deployment core for modeld.
//!
//! Finds, creates, updates in place and deletes externally hosted model
//! servers (KServe `InferenceService` resources) keyed by labels derived
//! from the pipeline step that deployed them.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use modeld_core::{
//!     DeployerConfig, DeploymentMatcher, DeploymentSpec, EnvCredentials, KServeBackend,
//!     MatcherSettings,
//! };
//!
//! let config = DeployerConfig::default();
//! let backend = KServeBackend::connect(&config).await?;
//! let matcher = DeploymentMatcher::new(
//!     Arc::new(backend),
//!     Some(Arc::new(EnvCredentials::new())),
//!     MatcherSettings::from(&config),
//! );
//!
//! let spec = DeploymentSpec::builder()
//!     .pipeline_name("training")
//!     .pipeline_step_name("deployer")
//!     .model_name("mnist")
//!     .model_uri("s3://models/mnist/3")
//!     .predictor_kind("tensorflow")
//!     .secret_ref("s3-store")
//!     .build()?;
//! let handle = matcher.deploy(&spec, true, config.timeout()).await?;
//! println!("{:?}", handle.prediction_url);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handle;
pub mod labels;
pub mod matcher;
pub mod naming;
pub mod record;
pub mod spec;

pub use backend::{BackendCall, DeploymentBackend, KServeBackend, MemoryBackend};
pub use config::DeployerConfig;
pub use credentials::{CredentialStore, Credentials, EnvCredentials, MemoryCredentials};
pub use error::{BackendError, CredentialError, DeployerError, RecordError, SpecError};
pub use handle::{DeploymentHandle, DeploymentState, ModelServerInfo};
pub use labels::LabelSet;
pub use matcher::{DeploymentMatcher, MatcherSettings, WinnerSelection};
pub use spec::{DeploymentCriteria, DeploymentSpec, DeploymentSpecBuilder};
