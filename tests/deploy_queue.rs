// ABOUTME: Integration tests for the deployment schedulers.
// ABOUTME: Per-target serialization, the worker pool bound, queue cleaning, direct dispatch, and shutdown.

mod support;

use flotilla::deploy::{DispatchMode, JobProgress};
use flotilla::error::Error;
use flotilla::store::{DeploymentIntent, DeploymentStatus, TargetRef};
use flotilla::types::ApplicationId;
use std::time::Duration;
use support::{Harness, application, eventually, server};

fn app_target(name: &str) -> TargetRef {
    TargetRef::Application(ApplicationId::new(name))
}

#[tokio::test]
async fn jobs_for_one_target_run_one_at_a_time() {
    let h = Harness::gated(|b| b);
    h.store.insert_application(application("api"));

    let mut handles = Vec::new();
    for _ in 0..3 {
        handles.push(
            h.control
                .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
                .await
                .unwrap(),
        );
    }

    eventually("first build", || h.build.running() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.build.running(), 1);

    let status = h.control.queue_status();
    let api = &status.targets["application:api"];
    assert_eq!(api.processing, 1);
    assert_eq!(api.waiting, 2);

    h.build.release(3);
    for handle in &handles {
        let record = handle.finished().await.unwrap();
        assert_eq!(record.status, DeploymentStatus::Done);
    }
    assert_eq!(h.build.peak(), 1);
    eventually("counters settle", || h.control.queue_status().completed == 3).await;
}

#[tokio::test]
async fn one_target_starts_jobs_in_submission_order() {
    let h = Harness::gated(|b| b);
    h.store.insert_application(application("api"));

    let first = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap();
    let first = first.claimed().await.unwrap();
    let second = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Redeploy)
        .await
        .unwrap();

    h.build.release(2);
    let second = second.finished().await.unwrap();
    assert!(second.created_at >= first.created_at);
    assert_eq!(second.intent, DeploymentIntent::Redeploy);
    assert_eq!(second.title, "Rebuild deployment");
}

#[tokio::test]
async fn worker_pool_bounds_jobs_across_targets() {
    let h = Harness::gated(|b| b.concurrency(2));
    for name in ["a", "b", "c"] {
        h.store.insert_application(application(name));
    }

    let mut handles = Vec::new();
    for name in ["a", "b", "c"] {
        handles.push(
            h.control
                .submit_deploy(app_target(name), DeploymentIntent::Deploy)
                .await
                .unwrap(),
        );
    }

    eventually("two builds", || h.build.running() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.build.running(), 2);
    assert_eq!(h.control.queue_status().waiting(), 1);

    h.build.release(3);
    for handle in &handles {
        assert_eq!(
            handle.finished().await.unwrap().status,
            DeploymentStatus::Done
        );
    }
    assert_eq!(h.build.peak(), 2);
}

#[tokio::test]
async fn clean_queue_cancels_only_waiting_jobs() {
    let h = Harness::gated(|b| b);
    h.store.insert_application(application("api"));
    h.store.insert_application(application("web"));

    let running = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap();
    eventually("first build", || h.build.running() == 1).await;
    let waiting = [
        h.control
            .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
            .await
            .unwrap(),
        h.control
            .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
            .await
            .unwrap(),
    ];

    assert_eq!(h.control.clean_queue(&app_target("web")), 0);
    assert_eq!(h.control.clean_queue(&app_target("api")), 2);

    for handle in &waiting {
        assert!(handle.claimed().await.is_err());
        assert_eq!(handle.progress(), JobProgress::Cancelled);
    }

    h.build.release(1);
    let record = running.finished().await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Done);
    assert_eq!(h.store.all_deployments().len(), 1);
    assert_eq!(h.control.queue_status().cancelled, 2);
}

#[tokio::test]
async fn submit_rejects_unknown_targets_and_unsupported_intents() {
    let h = Harness::new();

    let err = h
        .control
        .submit_deploy(app_target("ghost"), DeploymentIntent::Deploy)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(h.store.all_deployments().is_empty());
}

#[tokio::test]
async fn hosted_mode_refuses_a_busy_target() {
    let h = Harness::gated(|b| b.mode(DispatchMode::Hosted));
    h.store.insert_server(server("edge-1", "203.0.113.7"));
    let mut app = application("api");
    app.server_id = Some("edge-1".into());
    h.store.insert_application(app);

    let first = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap();
    first.claimed().await.unwrap();

    let err = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap_err();
    match err {
        Error::AlreadyInProgress(message) => assert!(message.contains("application api")),
        other => panic!("expected AlreadyInProgress, got {other:?}"),
    }

    h.build.release(1);
    assert_eq!(
        first.finished().await.unwrap().status,
        DeploymentStatus::Done
    );
    assert_eq!(h.store.all_deployments().len(), 1);
}

#[tokio::test]
async fn shutdown_drops_waiting_jobs_and_finishes_running_ones() {
    let h = Harness::gated(|b| b);
    h.store.insert_application(application("api"));

    let running = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap();
    eventually("first build", || h.build.running() == 1).await;
    let waiting = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap();

    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.build.release(5);
    };
    tokio::join!(h.control.shutdown(), release);

    assert_eq!(
        running.finished().await.unwrap().status,
        DeploymentStatus::Done
    );
    assert!(waiting.claimed().await.is_err());

    let err = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Deploy(_)));
}

#[tokio::test]
async fn job_timeout_kills_the_build_and_fails_the_record() {
    let h = Harness::gated(|b| b.job_timeout(Duration::from_millis(100)));
    h.store.insert_application(application("api"));

    let handle = h
        .control
        .submit_deploy(app_target("api"), DeploymentIntent::Deploy)
        .await
        .unwrap();
    let record = handle.finished().await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Error);
    assert_eq!(
        record.error_message.as_deref(),
        Some("deployment timed out after 100ms")
    );
    assert!(h.remote.ran(&format!("kill -9 -- -{}", support::BUILD_PID)));
    assert!(h.control.list_rollbacks(&ApplicationId::new("api")).await.unwrap().is_empty());
}
