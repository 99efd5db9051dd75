use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use modeld_core::record;
use modeld_core::{
    BackendCall, CredentialError, Credentials, DeployerError, DeploymentCriteria,
    DeploymentMatcher, DeploymentSpec, MatcherSettings, MemoryBackend, MemoryCredentials,
    WinnerSelection,
};
use serde_json::json;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(30);

fn spec(pipeline: &str, step: &str, model: &str, uri: &str) -> DeploymentSpec {
    DeploymentSpec::builder()
        .pipeline_name(pipeline)
        .pipeline_step_name(step)
        .model_name(model)
        .model_uri(uri)
        .predictor_kind("sklearn")
        .build()
        .unwrap()
}

fn settings(selection: WinnerSelection) -> MatcherSettings {
    MatcherSettings {
        secret: Some("model-store".to_string()),
        require_credentials: true,
        winner_selection: selection,
    }
}

async fn matcher_with(backend: &MemoryBackend, selection: WinnerSelection) -> DeploymentMatcher {
    let credentials = MemoryCredentials::new();
    credentials
        .insert(
            "model-store",
            Credentials::new()
                .with_field("access_key_id", "AKIA")
                .with_field("secret_access_key", "shh"),
        )
        .await;
    DeploymentMatcher::new(
        Arc::new(backend.clone()),
        Some(Arc::new(credentials)),
        settings(selection),
    )
}

async fn matcher(backend: &MemoryBackend) -> DeploymentMatcher {
    matcher_with(backend, WinnerSelection::BackendOrder).await
}

fn stops(calls: &[BackendCall]) -> Vec<Uuid> {
    calls
        .iter()
        .filter_map(|call| match call {
            BackendCall::Stop { uuid, .. } => Some(*uuid),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_deploy_without_replace_always_creates() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    let model = spec("p1", "train", "m", "s3://models/m/1");

    let first = matcher.deploy(&model, false, WAIT).await.unwrap();
    let second = matcher.deploy(&model, false, WAIT).await.unwrap();

    assert_ne!(first.uuid, second.uuid);
    assert_eq!(backend.uuids().await, vec![first.uuid, second.uuid]);
    let calls = backend.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, BackendCall::List { .. })));
    assert!(!calls.iter().any(|c| matches!(c, BackendCall::Update { .. })));
    assert!(second.is_running());
}

#[tokio::test]
async fn test_replace_without_equivalents_creates() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    matcher
        .deploy(&spec("p1", "train", "other", "s3://models/o/1"), false, WAIT)
        .await
        .unwrap();

    let handle = matcher
        .deploy(&spec("p1", "train", "m", "s3://models/m/1"), true, WAIT)
        .await
        .unwrap();

    assert_eq!(backend.uuids().await.len(), 2);
    assert!(handle.is_running());
    let calls = backend.calls().await;
    assert!(calls.contains(&BackendCall::Create { uuid: handle.uuid }));
    assert!(!calls.iter().any(|c| matches!(c, BackendCall::Update { .. })));
    assert!(stops(&calls).is_empty());
}

#[tokio::test]
async fn test_replace_updates_in_place_keeping_uuid_and_endpoint() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;

    let original = matcher
        .deploy(&spec("p1", "train", "m", "s3://models/m/1"), true, WAIT)
        .await
        .unwrap();
    let updated = matcher
        .deploy(&spec("p1", "train", "m", "s3://models/m/2"), true, WAIT)
        .await
        .unwrap();

    assert_eq!(updated.uuid, original.uuid);
    assert!(original.prediction_url.is_some());
    assert_eq!(updated.prediction_url, original.prediction_url);
    assert_eq!(updated.spec.model_uri(), "s3://models/m/2");
    assert_eq!(backend.uuids().await, vec![original.uuid]);
}

#[tokio::test]
async fn test_replace_keeps_first_found_and_stops_the_rest() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    let model = spec("p1", "train", "m", "s3://models/m/1");

    let oldest = matcher.deploy(&model, false, WAIT).await.unwrap();
    let middle = matcher.deploy(&model, false, WAIT).await.unwrap();
    let newest = matcher.deploy(&model, false, WAIT).await.unwrap();

    let handle = matcher
        .deploy(&spec("p1", "train", "m", "s3://models/m/2"), true, WAIT)
        .await
        .unwrap();

    // the memory backend lists newest first
    assert_eq!(handle.uuid, newest.uuid);
    assert_eq!(handle.prediction_url, newest.prediction_url);
    assert_eq!(stops(&backend.calls().await), vec![middle.uuid, oldest.uuid]);
    assert_eq!(backend.uuids().await, vec![newest.uuid]);
}

#[tokio::test]
async fn test_cleanup_stop_failures_do_not_fail_deploy() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    let model = spec("p1", "train", "m", "s3://models/m/1");

    let a = matcher.deploy(&model, false, WAIT).await.unwrap();
    let b = matcher.deploy(&model, false, WAIT).await.unwrap();
    let c = matcher.deploy(&model, false, WAIT).await.unwrap();
    backend.fail_stop(a.uuid).await;
    backend.fail_stop(b.uuid).await;

    let handle = matcher.deploy(&model, true, WAIT).await.unwrap();

    assert_eq!(handle.uuid, c.uuid);
    assert_eq!(stops(&backend.calls().await), vec![b.uuid, a.uuid]);
    assert!(backend.calls().await.contains(&BackendCall::Update { uuid: c.uuid }));
}

#[tokio::test]
async fn test_second_replacing_deploy_stops_first_created_duplicate() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    let model = spec("p1", "train", "m", "s3://models/m/1");

    // a duplicate left behind by a non-replacing deploy
    let first = matcher.deploy(&model, false, WAIT).await.unwrap();
    let second = matcher.deploy(&model, true, WAIT).await.unwrap();
    let third = matcher.deploy(&model, true, WAIT).await.unwrap();

    assert_eq!(second.uuid, first.uuid);
    assert_eq!(third.uuid, first.uuid);
    assert!(stops(&backend.calls().await).is_empty());

    let stray = matcher.deploy(&model, false, WAIT).await.unwrap();
    let survivor = matcher.deploy(&model, true, WAIT).await.unwrap();
    assert_eq!(survivor.uuid, stray.uuid);
    assert_eq!(stops(&backend.calls().await), vec![first.uuid]);

    let matching = matcher
        .find(&model.equivalence_criteria(), false)
        .await
        .unwrap();
    assert_eq!(matching.len(), 1);
}

#[tokio::test]
async fn test_winner_selection_newest_first_ignores_backend_order() {
    let backend = MemoryBackend::new();
    let model = spec("p1", "train", "m", "s3://models/m/1");
    let older = Uuid::new_v4();
    let newer = Uuid::new_v4();

    // inserted newer first, so the backend lists the older one first
    for (uuid, created) in [
        (newer, Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()),
        (older, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
    ] {
        let mut raw = record::manifest(&model, uuid, None);
        raw["metadata"]["creationTimestamp"] = json!(created.to_rfc3339());
        backend.insert_record(raw).await;
    }

    let by_order = matcher_with(&backend, WinnerSelection::BackendOrder).await;
    let listed = by_order.find(&model.equivalence_criteria(), false).await.unwrap();
    assert_eq!(listed[0].uuid, older);

    let newest = matcher_with(&backend, WinnerSelection::NewestFirst).await;
    let handle = newest.deploy(&model, true, WAIT).await.unwrap();
    assert_eq!(handle.uuid, newer);
    assert_eq!(stops(&backend.calls().await), vec![older]);
}

#[tokio::test]
async fn test_find_with_empty_criteria_returns_everything() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    matcher.deploy(&spec("p1", "train", "a", "s3://a"), false, WAIT).await.unwrap();
    matcher.deploy(&spec("p2", "eval", "b", "s3://b"), false, WAIT).await.unwrap();
    matcher.deploy(&spec("p3", "serve", "c", "s3://c"), false, Duration::ZERO).await.unwrap();

    let all = matcher.find(&DeploymentCriteria::default(), false).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(backend.calls().await.contains(&BackendCall::List {
        selector: "app.kubernetes.io/managed-by=modeld".to_string(),
    }));

    let running = matcher.find(&DeploymentCriteria::default(), true).await.unwrap();
    assert_eq!(running.len(), 2);
}

#[tokio::test]
async fn test_find_ignores_inference_services_created_elsewhere() {
    let backend = MemoryBackend::new();
    backend
        .insert_record(json!({
            "apiVersion": "serving.kserve.io/v1beta1",
            "kind": "InferenceService",
            "metadata": {
                "name": "hand-made",
                "creationTimestamp": "2024-05-01T10:00:00Z",
                "labels": {"app": "fraud-model"},
            },
            "spec": {"predictor": {"sklearn": {"storageUri": "gs://other/model"}}},
        }))
        .await;
    backend
        .insert_record(json!({
            "metadata": {
                "name": "helm-release",
                "labels": {"app.kubernetes.io/managed-by": "Helm"},
            },
        }))
        .await;

    let matcher = matcher(&backend).await;
    let ours = matcher
        .deploy(&spec("p1", "train", "a", "s3://a"), false, Duration::ZERO)
        .await
        .unwrap();

    let all = matcher.find(&DeploymentCriteria::default(), false).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].uuid, ours.uuid);
}

#[tokio::test]
async fn test_lookalike_identities_do_not_replace_each_other() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;

    let slash = matcher
        .deploy(&spec("p1", "train", "team/model", "s3://a"), true, WAIT)
        .await
        .unwrap();
    let colon = matcher
        .deploy(&spec("p1", "train", "team:model", "s3://b"), true, WAIT)
        .await
        .unwrap();

    assert_ne!(slash.uuid, colon.uuid);
    assert!(stops(&backend.calls().await).is_empty());
    assert_eq!(backend.uuids().await, vec![slash.uuid, colon.uuid]);

    let criteria = DeploymentCriteria {
        model_name: "team/model".to_string(),
        ..DeploymentCriteria::default()
    };
    let found = matcher.find(&criteria, false).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].uuid, slash.uuid);
    assert_eq!(found[0].spec.model_name(), "team/model");
}

#[tokio::test]
async fn test_find_running_only_uses_backend_status() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    let model = spec("p1", "train", "m", "s3://models/m/1");
    let a = matcher.deploy(&model, false, WAIT).await.unwrap();
    let b = matcher.deploy(&model, false, WAIT).await.unwrap();
    backend.set_ready(a.uuid, false).await.unwrap();

    let criteria = model.equivalence_criteria();
    let running = matcher.find(&criteria, true).await.unwrap();
    assert_eq!(running.iter().map(|h| h.uuid).collect::<Vec<_>>(), vec![b.uuid]);
    assert_eq!(matcher.find(&criteria, false).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_find_by_partial_criteria() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    let a = matcher.deploy(&spec("p1", "train", "a", "s3://a"), false, WAIT).await.unwrap();
    matcher.deploy(&spec("p2", "train", "b", "s3://b"), false, WAIT).await.unwrap();

    let criteria = DeploymentCriteria {
        pipeline_name: "p1".to_string(),
        ..DeploymentCriteria::default()
    };
    let found = matcher.find(&criteria, false).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].uuid, a.uuid);

    let by_uuid = matcher.get(a.uuid).await.unwrap().unwrap();
    assert_eq!(by_uuid.spec.model_name(), "a");
}

#[tokio::test]
async fn test_find_surfaces_backend_failure() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    backend.fail_list().await;

    let result = matcher.find(&DeploymentCriteria::default(), false).await;
    assert!(matches!(
        result,
        Err(DeployerError::BackendOperation { operation: "list deployments", .. })
    ));

    let deploy = matcher
        .deploy(&spec("p1", "train", "m", "s3://m"), true, WAIT)
        .await;
    assert!(matches!(deploy, Err(DeployerError::BackendOperation { .. })));
    assert!(!backend.calls().await.iter().any(|c| matches!(c, BackendCall::Create { .. })));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;

    matcher.delete(Uuid::new_v4(), WAIT, false).await.unwrap();
    assert!(stops(&backend.calls().await).is_empty());

    let handle = matcher
        .deploy(&spec("p1", "train", "m", "s3://m"), false, WAIT)
        .await
        .unwrap();
    matcher.delete(handle.uuid, WAIT, true).await.unwrap();
    assert!(backend.calls().await.contains(&BackendCall::Stop {
        uuid: handle.uuid,
        force: true
    }));
    assert!(backend.uuids().await.is_empty());

    matcher.delete(handle.uuid, WAIT, false).await.unwrap();
    assert_eq!(stops(&backend.calls().await).len(), 1);
}

#[tokio::test]
async fn test_start_and_stop_by_uuid_are_unsupported() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;
    let uuid = Uuid::new_v4();

    let start = matcher.start_by_uuid(uuid, WAIT).await.unwrap_err();
    assert!(start.is_unsupported());
    let stop = matcher.stop_by_uuid(uuid, WAIT, true).await.unwrap_err();
    assert!(stop.is_unsupported());
    assert!(stop.to_string().contains("delete"));

    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn test_missing_secret_name_fails_before_backend_calls() {
    let backend = MemoryBackend::new();
    let matcher = DeploymentMatcher::new(
        Arc::new(backend.clone()),
        Some(Arc::new(MemoryCredentials::new())),
        MatcherSettings {
            secret: None,
            require_credentials: true,
            winner_selection: WinnerSelection::BackendOrder,
        },
    );

    let result = matcher
        .deploy(&spec("p1", "train", "m", "s3://m"), true, WAIT)
        .await;
    assert!(matches!(result, Err(DeployerError::Configuration { .. })));
    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn test_unresolvable_secret_fails_before_backend_calls() {
    let backend = MemoryBackend::new();

    let unknown = DeploymentMatcher::new(
        Arc::new(backend.clone()),
        Some(Arc::new(MemoryCredentials::new())),
        settings(WinnerSelection::BackendOrder),
    );
    let result = unknown
        .deploy(&spec("p1", "train", "m", "s3://m"), false, WAIT)
        .await;
    assert!(matches!(
        result,
        Err(DeployerError::CredentialResolution { source: CredentialError::NotFound { .. }, .. })
    ));

    let no_store = DeploymentMatcher::new(
        Arc::new(backend.clone()),
        None,
        settings(WinnerSelection::BackendOrder),
    );
    let result = no_store
        .deploy(&spec("p1", "train", "m", "s3://m"), false, WAIT)
        .await;
    assert!(matches!(
        result,
        Err(DeployerError::CredentialResolution { source: CredentialError::NotConfigured, .. })
    ));

    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn test_spec_secret_overrides_deployer_secret() {
    let backend = MemoryBackend::new();
    let credentials = MemoryCredentials::new();
    credentials
        .insert("per-model", Credentials::new().with_field("token", "t"))
        .await;
    let matcher = DeploymentMatcher::new(
        Arc::new(backend.clone()),
        Some(Arc::new(credentials)),
        settings(WinnerSelection::BackendOrder),
    );

    let model = DeploymentSpec::builder()
        .pipeline_name("p1")
        .pipeline_step_name("train")
        .model_name("m")
        .model_uri("s3://m")
        .predictor_kind("sklearn")
        .secret_ref("per-model")
        .build()
        .unwrap();
    let handle = matcher.deploy(&model, false, WAIT).await.unwrap();

    let calls = backend.calls().await;
    assert_eq!(
        calls[0],
        BackendCall::ApplyCredentials {
            fields: vec!["token".to_string()]
        }
    );
    assert_eq!(calls[1], BackendCall::Create { uuid: handle.uuid });
}

#[tokio::test]
async fn test_credentials_optional_when_not_required() {
    let backend = MemoryBackend::new();
    let matcher =
        DeploymentMatcher::new(Arc::new(backend.clone()), None, MatcherSettings::default());

    let handle = matcher
        .deploy(&spec("p1", "train", "m", "s3://m"), false, WAIT)
        .await
        .unwrap();
    assert!(handle.is_running());
    assert!(!backend
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, BackendCall::ApplyCredentials { .. })));
}

#[tokio::test]
async fn test_zero_timeout_returns_once_accepted() {
    let backend = MemoryBackend::new();
    let matcher = matcher(&backend).await;

    let handle = matcher
        .deploy(&spec("p1", "train", "m", "s3://m"), true, Duration::ZERO)
        .await
        .unwrap();
    assert!(!handle.is_running());
    assert_eq!(handle.prediction_url, None);
    assert!(backend.calls().await.contains(&BackendCall::Start {
        uuid: handle.uuid,
        timeout: Duration::ZERO
    }));
}

#[tokio::test]
async fn test_info_reports_model_server_details() {
    let backend = MemoryBackend::new().with_base_url("https://ingress.example.com");
    let matcher = matcher(&backend).await;

    let handle = matcher
        .deploy(&spec("p1", "train", "mnist", "s3://models/mnist/3"), true, WAIT)
        .await
        .unwrap();
    let info = handle.info();

    assert_eq!(info.model_name, "mnist");
    assert_eq!(info.model_uri, "s3://models/mnist/3");
    assert_eq!(info.inference_service, record::resource_name(handle.uuid));
    assert_eq!(
        info.prediction_url,
        Some(format!(
            "https://ingress.example.com/v1/models/{}:predict",
            record::resource_name(handle.uuid)
        ))
    );
    assert_eq!(info.entries()[0].0, "PREDICTION_URL");
}
