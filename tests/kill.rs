// ABOUTME: Integration tests for killing running deployments.
// ABOUTME: Killed records fail with a fixed message; records without a process are left alone.

mod support;

use flotilla::deploy::KILLED_MESSAGE;
use flotilla::error::Error;
use flotilla::notify::NotificationEvent;
use flotilla::remote::ExecTarget;
use flotilla::store::{
    DeploymentIntent, DeploymentStatus, DeploymentStore, NewDeployment, TargetRef,
};
use flotilla::types::{ApplicationId, DeploymentId, ServerId};
use support::{BUILD_PID, Harness, application, eventually, server};

fn api() -> TargetRef {
    TargetRef::Application(ApplicationId::new("api"))
}

#[tokio::test]
async fn kill_signals_the_build_and_fails_the_record() {
    let h = Harness::gated(|b| b);
    h.store.insert_server(server("edge-1", "203.0.113.7"));
    let mut app = application("api");
    app.server_id = Some(ServerId::new("edge-1"));
    h.store.insert_application(app);

    let handle = h
        .control
        .submit_deploy(api(), DeploymentIntent::Deploy)
        .await
        .unwrap();
    let claimed = handle.claimed().await.unwrap();
    eventually("pid recorded", || {
        h.store
            .all_deployments()
            .iter()
            .any(|r| r.process_id == Some(BUILD_PID))
    })
    .await;

    let killed = h.control.kill_deployment(&claimed.id).await.unwrap();
    assert_eq!(killed.status, DeploymentStatus::Error);
    assert_eq!(killed.error_message.as_deref(), Some(KILLED_MESSAGE));
    assert!(h.remote.commands().contains(&(
        ExecTarget::Server(ServerId::new("edge-1")),
        format!("kill -9 -- -{}", BUILD_PID)
    )));

    // The build finishing afterwards must not resurrect the record.
    h.build.release(1);
    let finished = handle.finished().await.unwrap();
    assert_eq!(finished.status, DeploymentStatus::Error);
    assert_eq!(finished.error_message.as_deref(), Some(KILLED_MESSAGE));
    assert!(
        h.control
            .list_rollbacks(&ApplicationId::new("api"))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.notifier.count(NotificationEvent::DeploymentFailed), 1);
}

#[tokio::test]
async fn kill_without_a_process_leaves_the_record_running() {
    let h = Harness::new();
    h.store.insert_application(application("api"));
    let record = h
        .store
        .create_deployment(NewDeployment {
            target: api(),
            intent: DeploymentIntent::Deploy,
            title: "Manual deployment".into(),
            description: None,
            log_path: h.logs_dir.path().join("api/api.log"),
            rollback_id: None,
            preview_deployment_id: None,
        })
        .await
        .unwrap();

    let err = h.control.kill_deployment(&record.id).await.unwrap_err();
    assert!(matches!(err, Error::NoProcessId(ref id) if id == &record.id));

    let current = h.store.get_deployment(&record.id).await.unwrap().unwrap();
    assert_eq!(current.status, DeploymentStatus::Running);
    assert!(h.remote.commands().is_empty());
}

#[tokio::test]
async fn kill_refuses_finished_and_unknown_deployments() {
    let h = Harness::new();
    h.store.insert_application(application("api"));

    let record = h
        .control
        .submit_deploy(api(), DeploymentIntent::Deploy)
        .await
        .unwrap()
        .finished()
        .await
        .unwrap();
    assert_eq!(record.status, DeploymentStatus::Done);

    let err = h.control.kill_deployment(&record.id).await.unwrap_err();
    assert!(matches!(err, Error::NotRunning(_)));

    let err = h
        .control
        .kill_deployment(&DeploymentId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
