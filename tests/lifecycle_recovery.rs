mod common;

use std::sync::Arc;
use std::time::Duration;

use std::sync::atomic::Ordering;

use ollama_pilot::classifier::{ModelClassifier, ParameterSource, SizeCategory};
use ollama_pilot::lifecycle::{ErrorKind, LifecycleError, LoadOutcome, LoadPhase};
use ollama_pilot::service::ServiceError;
use ollama_pilot::transport::GenerateRequest;

use common::{manager, refused, status, timeout, FakeServiceManager, FakeTransport, Op};

const LLAMA: &str = "llama3.1:8b";

fn setup(models: &[&str]) -> (Arc<FakeTransport>, Arc<FakeServiceManager>) {
    (
        Arc::new(FakeTransport::with_models(models)),
        Arc::new(FakeServiceManager::default()),
    )
}

fn request(model: &str) -> GenerateRequest {
    GenerateRequest::new(model, "What is the capital of France?")
}

#[tokio::test]
async fn test_ensure_loaded_twice_loads_once() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host);

    let first = manager.ensure_loaded(LLAMA).await.unwrap();
    assert!(matches!(first, LoadOutcome::Loaded { replaced: None, attempts: 1, .. }));
    let second = manager.ensure_loaded(LLAMA).await.unwrap();
    assert_eq!(second, LoadOutcome::AlreadyLoaded);

    assert_eq!(transport.loads(), vec![LLAMA]);
    assert_eq!(manager.state().phase(), LoadPhase::Loaded);
}

#[tokio::test]
async fn test_bare_name_matches_latest_tag() {
    let (transport, host) = setup(&["mistral:latest"]);
    let mut manager = manager(transport.clone(), host);

    manager.ensure_loaded("mistral").await.unwrap();
    assert_eq!(manager.ensure_loaded("mistral").await.unwrap(), LoadOutcome::AlreadyLoaded);
    assert_eq!(transport.loads(), vec!["mistral:latest"]);
}

#[tokio::test]
async fn test_unknown_model_refreshes_list_once() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host);

    let err = manager.ensure_loaded("nope:1b").await.unwrap_err();
    assert!(matches!(err, LifecycleError::ModelNotFound(ref m) if m == "nope:1b"));

    // A cached list that misses is refreshed before giving up
    manager.ensure_loaded("other:7b").await.unwrap_err();
    assert_eq!(transport.list_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(transport.loads().is_empty());
}

#[tokio::test]
async fn test_load_404_is_model_not_found() {
    let (transport, host) = setup(&[LLAMA]);
    transport.fail(Op::Load, vec![status(404)]);
    let mut manager = manager(transport.clone(), host);

    let err = manager.ensure_loaded(LLAMA).await.unwrap_err();
    assert!(matches!(err, LifecycleError::ModelNotFound(_)));
    assert_eq!(manager.state().phase(), LoadPhase::Idle);
    assert!(manager.state().current_model().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_load_retried_after_server_fault_ends_loaded() {
    let (transport, host) = setup(&[LLAMA]);
    transport.fail(Op::Load, vec![status(500)]);
    let mut manager = manager(transport.clone(), host);

    let outcome = manager.ensure_loaded(LLAMA).await.unwrap();
    assert!(matches!(outcome, LoadOutcome::Loaded { attempts: 2, .. }));
    assert_eq!(transport.unloads(), vec![LLAMA]);
    assert_eq!(manager.state().phase(), LoadPhase::Loaded);
    assert!(manager.state().is_current(LLAMA));
}

#[tokio::test]
async fn test_failed_reload_leaves_manager_idle() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host);
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.set_healthy(false);
    transport.fail(Op::Load, vec![status(400)]);
    let err = manager.ensure_loaded(LLAMA).await.unwrap_err();
    assert!(matches!(err, LifecycleError::LoadFailed { .. }));
    assert_eq!(manager.state().phase(), LoadPhase::Idle);
    assert!(manager.state().current_model().is_none());
}

#[tokio::test]
async fn test_server_details_are_merged_once() {
    let transport = Arc::new(
        FakeTransport::with_models(&["mystery:latest"]).with_details(
            "mystery:latest",
            &["completion", "vision"],
            Some(7_615_616_512),
        ),
    );
    let mut manager = manager(transport.clone(), Arc::new(FakeServiceManager::default()));

    manager.ensure_loaded("mystery").await.unwrap();
    let current = manager.state().current_model().unwrap().clone();
    assert_eq!(current.capabilities, vec!["completion", "vision"]);
    assert_eq!(current.parameter_size.as_deref(), Some("7.6B"));

    let caps = ModelClassifier::default().classify(&current);
    assert!(caps.supports_vision);
    assert_eq!(caps.size_category, SizeCategory::Small);
    assert_eq!(caps.parameter_source, ParameterSource::Server);

    manager.describe("mystery:latest").await.unwrap();
    manager.list_models_detailed(false).await.unwrap();
    assert_eq!(transport.show_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_details_lookup_is_retried() {
    let transport = Arc::new(
        FakeTransport::with_models(&["mystery:latest"])
            .with_details("mystery:latest", &["thinking"], None),
    );
    transport.fail(Op::Show, vec![refused()]);
    let mut manager = manager(transport.clone(), Arc::new(FakeServiceManager::default()));

    let plain = manager.describe("mystery").await.unwrap();
    assert!(plain.capabilities.is_empty());
    assert_eq!(manager.state().consecutive_failures(), 0);

    let detailed = manager.describe("mystery").await.unwrap();
    assert_eq!(detailed.capabilities, vec!["thinking"]);
    assert!(detailed.parameter_size.is_none());
    assert_eq!(transport.show_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_switching_models_unloads_previous() {
    let (transport, host) = setup(&["alpha:7b", "beta:7b"]);
    let mut manager = manager(transport.clone(), host);

    manager.ensure_loaded("alpha:7b").await.unwrap();
    let outcome = manager.ensure_loaded("beta:7b").await.unwrap();
    assert!(matches!(
        outcome,
        LoadOutcome::Loaded { replaced: Some(ref previous), .. } if previous == "alpha:7b"
    ));

    assert_eq!(transport.unloads(), vec!["alpha:7b"]);
    assert_eq!(transport.loads(), vec!["alpha:7b", "beta:7b"]);
    assert!(manager.state().is_current("beta:7b"));
}

#[tokio::test]
async fn test_failed_unload_blocks_switch() {
    let (transport, host) = setup(&["alpha:7b", "beta:7b"]);
    let mut manager = manager(transport.clone(), host);
    manager.ensure_loaded("alpha:7b").await.unwrap();

    transport.fail(Op::Unload, vec![status(400)]);
    let err = manager.ensure_loaded("beta:7b").await.unwrap_err();
    assert!(matches!(err, LifecycleError::UnloadFailed { ref model, .. } if model == "alpha:7b"));
    assert_eq!(transport.loads(), vec!["alpha:7b"]);
}

#[tokio::test]
async fn test_unhealthy_server_triggers_reload() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host);
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.set_healthy(false);
    let outcome = manager.ensure_loaded(LLAMA).await.unwrap();
    assert!(matches!(outcome, LoadOutcome::Loaded { replaced: None, .. }));
    assert_eq!(transport.loads().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_below_threshold_only_retry() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.fail(Op::Generate, vec![refused(), timeout()]);
    let completion = manager.generate(LLAMA, &request(LLAMA)).await.unwrap();

    assert!(completion.text.contains("Answer from"));
    assert_eq!(transport.generates().len(), 3);
    assert_eq!(host.restarts(), 0);
    assert!(transport.unloads().is_empty());
    assert_eq!(manager.state().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_restart_per_streak() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.fail(Op::Generate, vec![refused(), refused(), refused(), refused(), refused()]);
    let err = manager.generate(LLAMA, &request(LLAMA)).await.unwrap_err();

    match err {
        LifecycleError::GiveUp { kind, attempts, .. } => {
            assert_eq!(kind, ErrorKind::ConnectionRefused);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected GiveUp, got {:?}", other),
    }
    assert_eq!(host.restarts(), 1);
    assert_eq!(transport.generates().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_restart_recovers_and_keeps_model_current() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.fail(Op::Generate, vec![refused(), refused(), refused()]);
    manager.generate(LLAMA, &request(LLAMA)).await.unwrap();

    assert_eq!(host.restarts(), 1);
    assert!(manager.state().last_restart().is_some());
    assert!(manager.state().is_current(LLAMA));
    assert!(!manager.state().restart_attempted_in_streak());
}

#[tokio::test(start_paused = true)]
async fn test_server_fault_unloads_then_retries() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.fail(Op::Generate, vec![status(500)]);
    manager.generate(LLAMA, &request(LLAMA)).await.unwrap();

    assert_eq!(transport.unloads(), vec![LLAMA]);
    assert_eq!(host.restarts(), 0);
    assert_eq!(transport.generates().len(), 2);
    assert!(manager.state().is_current(LLAMA));
}

#[tokio::test]
async fn test_client_error_gives_up_immediately() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.fail(Op::Generate, vec![status(400)]);
    let err = manager.generate(LLAMA, &request(LLAMA)).await.unwrap_err();

    assert!(matches!(err, LifecycleError::GiveUp { attempts: 1, .. }));
    assert_eq!(err.kind(), Some(ErrorKind::HttpStatus(400)));
    assert_eq!(transport.generates().len(), 1);
    assert_eq!(host.restarts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_gives_up_with_manual_hint() {
    let transport = Arc::new(FakeTransport::with_models(&[LLAMA]));
    let host = Arc::new(FakeServiceManager::failing_with(ServiceError::PermissionDenied(
        "sudo: a password is required".to_string(),
    )));
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.fail(Op::Generate, vec![timeout(), timeout(), timeout()]);
    let err = manager.generate(LLAMA, &request(LLAMA)).await.unwrap_err();

    match err {
        LifecycleError::GiveUp { kind, message, attempts } => {
            assert_eq!(kind, ErrorKind::Timeout);
            assert_eq!(attempts, 3);
            assert!(message.contains("sudo systemctl restart ollama"), "{}", message);
        }
        other => panic!("expected GiveUp, got {:?}", other),
    }
    assert_eq!(host.restarts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_cooldown() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    transport.fail(Op::Generate, vec![refused(), refused(), refused()]);
    manager.generate(LLAMA, &request(LLAMA)).await.unwrap();
    assert_eq!(host.restarts(), 1);

    // A new streak inside the cooldown cannot restart again
    transport.fail(Op::Generate, vec![refused(), refused(), refused()]);
    let err = manager.generate(LLAMA, &request(LLAMA)).await.unwrap_err();
    assert!(err.to_string().contains("cooldown"), "{}", err);
    assert_eq!(host.restarts(), 1);

    tokio::time::advance(Duration::from_secs(121)).await;
    // One clean call ends the streak
    manager.generate(LLAMA, &request(LLAMA)).await.unwrap();
    transport.fail(Op::Generate, vec![refused(), refused(), refused()]);
    manager.generate(LLAMA, &request(LLAMA)).await.unwrap();
    assert_eq!(host.restarts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_restart_still_starts_cooldown() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host.clone());
    manager.ensure_loaded(LLAMA).await.unwrap();

    // The restart is issued but the server never comes back within the timeout
    transport.set_healthy(false);
    transport.fail(Op::Generate, vec![refused(), refused(), refused()]);
    let err = manager.generate(LLAMA, &request(LLAMA)).await.unwrap_err();
    assert!(err.to_string().contains("did not become healthy"), "{}", err);
    assert_eq!(host.restarts(), 1);
    assert!(manager.state().last_restart().is_some());

    transport.set_healthy(true);
    manager.generate(LLAMA, &request(LLAMA)).await.unwrap();

    transport.fail(Op::Generate, vec![refused(), refused(), refused()]);
    let err = manager.generate(LLAMA, &request(LLAMA)).await.unwrap_err();
    assert!(err.to_string().contains("cooldown"), "{}", err);
    assert_eq!(host.restarts(), 1);
}

#[tokio::test]
async fn test_unload_current_resets_state() {
    let (transport, host) = setup(&[LLAMA]);
    let mut manager = manager(transport.clone(), host);
    manager.ensure_loaded(LLAMA).await.unwrap();
    assert_eq!(manager.running_models().await.unwrap().len(), 1);

    manager.unload(LLAMA).await.unwrap();
    assert!(manager.state().current_model().is_none());
    assert_eq!(manager.state().phase(), LoadPhase::Idle);
    assert!(manager.running_models().await.unwrap().is_empty());
}
