// ABOUTME: Integration tests against a real Docker Swarm manager on the local socket.
// ABOUTME: Grouped under "swarm" so they run only on hosts with an active swarm.

mod support;

use flotilla::orchestrator::{
    ClusterType, DOCKER_SOCKET, DeploymentSpec, OrchestratorAdapter, SwarmAdapter,
};
use flotilla::types::{AppName, ImageRef};
use std::time::Duration;

fn adapter() -> SwarmAdapter {
    SwarmAdapter::connect_socket(DOCKER_SOCKET).expect("docker socket should be reachable")
}

/// Test: The local engine reports itself as an active swarm.
#[test_group::group(swarm)]
#[tokio::test]
async fn detects_swarm() {
    support::init_tracing();
    let swarm = adapter();

    assert_eq!(swarm.detect().await.unwrap(), ClusterType::Swarm);

    let health = swarm.health_check().await.unwrap();
    assert!(health.healthy, "swarm should be healthy: {}", health.message);
    assert!(health.details.version.is_some());
}

/// Test: A service can be created, scaled, and removed.
#[test_group::group(swarm)]
#[tokio::test]
async fn service_lifecycle() {
    support::init_tracing();
    let swarm = adapter();
    let name = format!("flotilla-live-{}", std::process::id());

    let mut spec = DeploymentSpec::new(
        AppName::new(&name).unwrap(),
        ImageRef::parse("nginx:alpine").unwrap(),
    );
    spec.env.insert("FLOTILLA_TEST".into(), "1".into());
    swarm.deploy_application(&spec).await.unwrap();

    swarm.scale_application(&name, 2, None).await.unwrap();
    let info = swarm.get_deployment(&name, None).await.unwrap().unwrap();
    assert_eq!(info.replicas.desired, 2);
    assert!(info.image.unwrap().starts_with("nginx:alpine"));

    swarm.delete_application(&name, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(swarm.get_deployment(&name, None).await.unwrap().is_none());
}
