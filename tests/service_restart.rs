mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use ollama_pilot::service::{ServiceController, ServiceError};

use common::{service_config, FakeServiceManager, FakeTransport};

fn controller(transport: Arc<FakeTransport>, host: Arc<FakeServiceManager>) -> ServiceController {
    ServiceController::new(host, transport, service_config())
}

#[tokio::test(start_paused = true)]
async fn test_restart_waits_for_healthy_server() {
    let transport = Arc::new(FakeTransport::default());
    let host = Arc::new(FakeServiceManager::default());
    let controller = controller(transport, host.clone());

    controller.restart(None).await.unwrap();
    assert_eq!(host.restarts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_times_out_when_server_stays_down() {
    let transport = Arc::new(FakeTransport::default());
    transport.set_healthy(false);
    let host = Arc::new(FakeServiceManager::default());
    let controller = controller(transport, host);

    let started = Instant::now();
    let err = controller.restart(None).await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::RestartTimeout {
            unit: "ollama".to_string(),
            waited_secs: 5
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_refuses_without_touching_the_host() {
    let host = Arc::new(FakeServiceManager::default());
    let controller = controller(Arc::new(FakeTransport::default()), host.clone());

    let just_now = Instant::now();
    let err = controller.restart(Some(just_now)).await.unwrap_err();
    assert!(matches!(err, ServiceError::CooldownActive { remaining_secs } if remaining_secs >= 119));
    assert_eq!(host.restarts(), 0);

    tokio::time::advance(Duration::from_secs(120)).await;
    controller.restart(Some(just_now)).await.unwrap();
    assert_eq!(host.restarts(), 1);
}

#[tokio::test]
async fn test_status_reports_version() {
    let controller = controller(
        Arc::new(FakeTransport::default()),
        Arc::new(FakeServiceManager::default()),
    );
    let status = controller.status().await;
    assert!(status.active);
    assert!(status.healthy);
    assert_eq!(status.server_version.as_deref(), Some("0.5.7"));
    assert_eq!(controller.manual_restart_hint(), "sudo systemctl restart ollama");
}
