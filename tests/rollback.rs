// ABOUTME: Integration tests for rollback snapshots and replays.
// ABOUTME: Versions are consecutive per application; replays restore an image without minting a snapshot.

mod support;

use flotilla::error::Error;
use flotilla::store::{DeploymentIntent, DeploymentRecord, DeploymentStatus, TargetRef};
use flotilla::types::{ApplicationId, ImageRef, RollbackId};
use proptest::prelude::*;
use support::{Harness, application};

fn api() -> TargetRef {
    TargetRef::Application(ApplicationId::new("api"))
}

async fn deploy(h: &Harness, image: &str) -> DeploymentRecord {
    let mut app = application("api");
    app.image = ImageRef::parse(image).unwrap();
    h.store.insert_application(app);
    h.control
        .submit_deploy(api(), DeploymentIntent::Deploy)
        .await
        .unwrap()
        .finished()
        .await
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn successful_deploys_mint_consecutive_versions(deploys in 1usize..7) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let mut records = Vec::new();
            for i in 0..deploys {
                records.push(deploy(&h, &format!("registry.example.com/api:v{}", i + 1)).await);
            }

            let rollbacks = h.control.list_rollbacks(&ApplicationId::new("api")).await.unwrap();
            let versions: Vec<u32> = rollbacks.iter().map(|r| r.version).collect();
            let expected: Vec<u32> = (1..=deploys as u32).rev().collect();
            prop_assert_eq!(versions, expected);
            for (rollback, record) in rollbacks.iter().rev().zip(&records) {
                prop_assert_eq!(&rollback.deployment_id, &record.id);
            }
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn rollback_restores_an_old_image_without_a_new_snapshot() {
    let h = Harness::new();
    for tag in ["v1", "v2", "v3"] {
        let record = deploy(&h, &format!("registry.example.com/api:{tag}")).await;
        assert_eq!(record.status, DeploymentStatus::Done);
    }
    let rollbacks = h.control.list_rollbacks(&ApplicationId::new("api")).await.unwrap();
    let v1 = rollbacks.iter().find(|r| r.version == 1).unwrap().clone();
    assert_eq!(
        h.swarm.workload("api").unwrap().image.to_string(),
        "registry.example.com/api:v3"
    );

    let record = h.control.rollback(&v1.id).await.unwrap().finished().await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Done);
    assert_eq!(record.rollback_id.as_ref(), Some(&v1.id));
    assert_eq!(record.title, "Rollback to v1");
    assert_eq!(h.swarm.workload("api").unwrap().image, v1.image);
    assert_eq!(h.swarm.workload("api").unwrap().env, v1.env);
    assert_eq!(
        h.control.list_rollbacks(&ApplicationId::new("api")).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn snapshots_pin_a_moving_tag() {
    let h = Harness::new();
    deploy(&h, "registry.example.com/api:latest").await;
    deploy(&h, "registry.example.com/api:latest").await;

    assert!(h.remote.ran("docker tag registry.example.com/api:latest api:v1"));
    assert!(h.remote.ran("docker tag registry.example.com/api:latest api:v2"));
    let rollbacks = h.control.list_rollbacks(&ApplicationId::new("api")).await.unwrap();
    let images: Vec<String> = rollbacks.iter().map(|r| r.image.to_string()).collect();
    assert_eq!(images, ["api:v2", "api:v1"]);

    let v1 = rollbacks.iter().find(|r| r.version == 1).unwrap();
    let record = h.control.rollback(&v1.id).await.unwrap().finished().await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Done);
    assert_eq!(h.swarm.workload("api").unwrap().image.to_string(), "api:v1");
}

#[tokio::test]
async fn failed_deploys_mint_nothing() {
    let h = Harness::new();
    h.swarm.fail_with("connection refused");

    let record = deploy(&h, "registry.example.com/api:v1").await;

    assert_eq!(record.status, DeploymentStatus::Error);
    assert!(record.error_message.unwrap().contains("connection refused"));
    assert!(
        h.control
            .list_rollbacks(&ApplicationId::new("api"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn remove_rollback_keeps_deployments() {
    let h = Harness::new();
    let record = deploy(&h, "registry.example.com/api:v1").await;
    let rollback = h.control.list_rollbacks(&ApplicationId::new("api")).await.unwrap()[0].clone();

    h.control.remove_rollback(&rollback.id).await.unwrap();

    assert!(
        h.control
            .list_rollbacks(&ApplicationId::new("api"))
            .await
            .unwrap()
            .is_empty()
    );
    assert!(h.store.all_deployments().iter().any(|r| r.id == record.id));
    assert!(h.remote.ran("docker image rm api:v1 --force"));

    let err = h.control.remove_rollback(&rollback.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn rollback_of_unknown_snapshot_is_not_found() {
    let h = Harness::new();
    let err = h
        .control
        .rollback(&RollbackId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(h.store.all_deployments().is_empty());
}
