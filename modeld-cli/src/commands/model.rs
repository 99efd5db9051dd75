//! Model server commands: deploy, list, info, delete, start, stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, ValueEnum};
use modeld_core::{
    CredentialStore, DeployerConfig, DeployerError, DeploymentCriteria, DeploymentHandle,
    DeploymentMatcher, DeploymentSpec, DeploymentState, EnvCredentials, KServeBackend,
    MatcherSettings,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Args, Clone)]
pub struct DeployArgs {
    /// Name of the pipeline deploying the model
    #[arg(long)]
    pub pipeline: String,

    /// Name of the pipeline step deploying the model
    #[arg(long)]
    pub step: String,

    #[arg(long)]
    pub model: String,

    /// URI of the model artifact, e.g. s3://models/mnist/3
    #[arg(long)]
    pub model_uri: String,

    /// Predictor framework, e.g. sklearn, tensorflow, pytorch
    #[arg(long)]
    pub predictor: String,

    #[arg(long)]
    pub run_id: Option<String>,

    /// Resource request as NAME=QUANTITY, e.g. --resource cpu=500m
    #[arg(long = "resource", value_parser = parse_key_val)]
    pub resources: Vec<(String, String)>,

    /// Secret holding the model storage credentials
    #[arg(long)]
    pub secret: Option<String>,

    /// Update an existing deployment of the same model in place
    #[arg(long)]
    pub replace: bool,

    /// Seconds to wait for the model server; 0 returns once accepted
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub pipeline: Option<String>,

    #[arg(long)]
    pub step: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub run_id: Option<String>,

    #[arg(long)]
    pub model_uri: Option<String>,

    #[arg(long)]
    pub predictor: Option<String>,

    #[arg(long)]
    pub uuid: Option<Uuid>,

    /// Only show running model servers
    #[arg(long)]
    pub running: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid NAME=QUANTITY: no `=` found in `{s}`"))?;
    if key.is_empty() || value.is_empty() {
        return Err(format!("invalid NAME=QUANTITY: `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl DeployArgs {
    fn to_spec(&self) -> Result<DeploymentSpec> {
        let mut builder = DeploymentSpec::builder()
            .pipeline_name(&self.pipeline)
            .pipeline_step_name(&self.step)
            .model_name(&self.model)
            .model_uri(&self.model_uri)
            .predictor_kind(&self.predictor);
        if let Some(run_id) = &self.run_id {
            builder = builder.pipeline_run_id(run_id);
        }
        if let Some(secret) = &self.secret {
            builder = builder.secret_ref(secret);
        }
        for (name, quantity) in &self.resources {
            builder = builder.resource_request(name, quantity);
        }
        builder.build().context("Invalid deployment")
    }
}

impl ListArgs {
    fn criteria(&self) -> DeploymentCriteria {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        DeploymentCriteria {
            pipeline_name: field(&self.pipeline),
            pipeline_run_id: field(&self.run_id),
            pipeline_step_name: field(&self.step),
            model_name: field(&self.model),
            model_uri: field(&self.model_uri),
            predictor_kind: field(&self.predictor),
            service_uuid: self.uuid,
        }
    }
}

/// Connects to the KServe backend described by `config`.
async fn connect(config: &DeployerConfig) -> Result<DeploymentMatcher> {
    let backend = KServeBackend::connect(config)
        .await
        .context("Failed to connect to Kubernetes")?;
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(EnvCredentials::with_prefix(&config.credentials_prefix));
    Ok(DeploymentMatcher::new(
        Arc::new(backend),
        Some(credentials),
        MatcherSettings::from(config),
    ))
}

fn timeout_or_default(timeout: Option<u64>, config: &DeployerConfig) -> Duration {
    timeout.map_or_else(|| config.timeout(), Duration::from_secs)
}

pub async fn deploy(args: DeployArgs, config: &DeployerConfig) -> Result<()> {
    let spec = args.to_spec()?;
    let timeout = timeout_or_default(args.timeout, config);
    let matcher = connect(config).await?;

    println!("🚀 Deploying model {} ({})", spec.model_name(), spec.model_uri());
    let handle = matcher
        .deploy(&spec, args.replace, timeout)
        .await
        .with_context(|| format!("Failed to deploy model {}", spec.model_name()))?;

    println!("✅ Model server {} is {}", handle.uuid, state_label(&handle.state));
    print_info(&handle);
    Ok(())
}

pub async fn list(args: ListArgs, config: &DeployerConfig) -> Result<()> {
    let matcher = connect(config).await?;
    let criteria = args.criteria();
    debug!("Listing model servers matching {:?}", criteria);

    let handles = matcher
        .find(&criteria, args.running)
        .await
        .context("Failed to list model servers")?;
    println!("{}", render(&handles, args.output)?);
    Ok(())
}

pub async fn info(uuid: Uuid, config: &DeployerConfig) -> Result<()> {
    let matcher = connect(config).await?;
    let handle = matcher
        .get(uuid)
        .await
        .context("Failed to look up the model server")?
        .ok_or_else(|| anyhow!("No model server with UUID {uuid}"))?;

    println!("Model server {}", handle.uuid);
    println!("  pipeline: {}/{}", handle.spec.pipeline_name(), handle.spec.pipeline_step_name());
    println!("  created:  {}", handle.created_at.to_rfc3339());
    println!("  state:    {}", state_label(&handle.state));
    print_info(&handle);
    Ok(())
}

pub async fn delete(
    uuid: Uuid,
    timeout: Option<u64>,
    force: bool,
    config: &DeployerConfig,
) -> Result<()> {
    let matcher = connect(config).await?;
    matcher
        .delete(uuid, timeout_or_default(timeout, config), force)
        .await
        .with_context(|| format!("Failed to delete model server {uuid}"))?;
    println!("🗑️  Model server {uuid} deleted");
    Ok(())
}

/// Fails without connecting: KServe model servers cannot be started by UUID.
pub fn start(uuid: Uuid) -> Result<()> {
    Err::<(), _>(DeployerError::start_unsupported(KServeBackend::NAME))
        .with_context(|| format!("Cannot start model server {uuid}"))
}

/// Fails without connecting: KServe model servers cannot be stopped by UUID.
pub fn stop(uuid: Uuid) -> Result<()> {
    Err::<(), _>(DeployerError::stop_unsupported(KServeBackend::NAME))
        .with_context(|| format!("Cannot stop model server {uuid}"))
}

fn print_info(handle: &DeploymentHandle) {
    for (key, value) in handle.info().entries() {
        println!("  {key}: {}", value.unwrap_or("-"));
    }
}

fn state_label(state: &DeploymentState) -> String {
    match state {
        DeploymentState::Running => "running".to_string(),
        DeploymentState::Provisioning => "provisioning".to_string(),
        DeploymentState::Failed(reason) => format!("failed ({reason})"),
    }
}

fn render(handles: &[DeploymentHandle], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(handles).context("Failed to render JSON")
        }
        OutputFormat::Yaml => serde_yaml::to_string(handles).context("Failed to render YAML"),
        OutputFormat::Table => Ok(render_table(handles)),
    }
}

fn render_table(handles: &[DeploymentHandle]) -> String {
    if handles.is_empty() {
        return "No model servers found".to_string();
    }

    let rows: Vec<[String; 5]> = handles
        .iter()
        .map(|handle| {
            [
                handle.uuid.to_string(),
                format!("{}/{}", handle.spec.pipeline_name(), handle.spec.pipeline_step_name()),
                handle.spec.model_name().to_string(),
                state_label(&handle.state),
                handle.prediction_url.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let header = ["UUID", "PIPELINE/STEP", "MODEL", "STATE", "PREDICTION URL"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![line(&header)];
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        lines.push(line(&cells));
    }
    lines.join("\n")
}
