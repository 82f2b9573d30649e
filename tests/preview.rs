// ABOUTME: Integration tests for pull request preview deployments.
// ABOUTME: Limits, idempotent redeploys, label filters, routed hosts, and teardown on close.

mod support;

use flotilla::deploy::{DeployError, DispatchMode};
use flotilla::error::Error;
use flotilla::notify::NotificationEvent;
use flotilla::preview::{PREVIEW_TITLE, PreviewOutcome, PullRequestAction};
use flotilla::store::{
    DeploymentIntent, DeploymentStatus, DeploymentStore, PreviewStatus, PreviewStore, TargetRef,
};
use flotilla::types::{ApplicationId, ServerId};
use proptest::prelude::*;
use support::{Harness, eventually, preview_application, pull_request, server};

fn api() -> TargetRef {
    TargetRef::Application(ApplicationId::new("api"))
}

async fn settle(outcome: &PreviewOutcome) {
    for job in &outcome.jobs {
        let record = job.finished().await.unwrap();
        assert_eq!(record.status, DeploymentStatus::Done);
    }
}

#[tokio::test]
async fn limit_counts_other_pull_requests_only() {
    let h = Harness::new();
    h.store.insert_application(preview_application("api", 1));

    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    assert_eq!(opened.message, "Preview deployments queued");
    assert_eq!(opened.previews.len(), 1);
    settle(&opened).await;

    let other = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 11, "bbb222"))
        .await
        .unwrap();
    assert_eq!(other.message, "Preview limit reached");
    assert!(other.jobs.is_empty());

    let pushed = h
        .control
        .on_pull_request_event(&pull_request(
            PullRequestAction::Synchronize,
            10,
            "ccc333",
        ))
        .await
        .unwrap();
    assert_eq!(pushed.message, "Preview deployments queued");
    assert_eq!(pushed.previews[0].id, opened.previews[0].id);
    settle(&pushed).await;

    let previews = h.store.all_previews();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].pull_request_id, "pr-10");
    assert_eq!(previews[0].branch, "feature-10");
    assert_eq!(previews[0].status, PreviewStatus::Done);

    let records = h
        .store
        .list_deployments(&api(), Some(&previews[0].id))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].description.as_deref(), Some("Hash: ccc333"));
    assert_eq!(records[1].description.as_deref(), Some("Hash: aaa111"));
    assert!(records.iter().all(|r| r.is_preview && r.title == PREVIEW_TITLE));
}

#[tokio::test]
async fn closing_a_pull_request_frees_its_slot() {
    let h = Harness::new();
    h.store.insert_application(preview_application("api", 1));

    let first = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    settle(&first).await;
    let skipped = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 11, "bbb222"))
        .await
        .unwrap();
    assert_eq!(skipped.message, "Preview limit reached");

    h.control
        .on_pull_request_event(&pull_request(PullRequestAction::Closed, 10, "aaa111"))
        .await
        .unwrap();
    assert!(h.store.all_previews().is_empty());

    let second = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 11, "bbb222"))
        .await
        .unwrap();
    assert_eq!(second.message, "Preview deployments queued");
    settle(&second).await;

    let previews = h.store.all_previews();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].pull_request_id, "pr-11");
}

#[tokio::test]
async fn preview_deploys_run_beside_the_application() {
    let h = Harness::new();
    h.store.insert_application(preview_application("api", 3));

    let outcome = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    settle(&outcome).await;

    let preview = &outcome.previews[0];
    assert!(preview.app_name.as_str().starts_with("preview-api-"));
    let workload = h.swarm.workload(preview.app_name.as_str()).unwrap();
    assert_eq!(workload.port, Some(3000));
    assert!(h.swarm.workload("api").is_none());

    // Preview records never mint rollbacks or show up in the app's history.
    assert!(
        h.control
            .list_rollbacks(&ApplicationId::new("api"))
            .await
            .unwrap()
            .is_empty()
    );
    assert!(h.store.list_deployments(&api(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn preview_host_embeds_the_server_address() {
    let h = Harness::new();
    h.store.insert_server(server("edge-1", "203.0.113.7"));
    let mut app = preview_application("api", 3);
    app.server_id = Some(ServerId::new("edge-1"));
    h.store.insert_application(app);

    let outcome = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    settle(&outcome).await;

    let preview = &outcome.previews[0];
    let domain = h
        .store
        .get_domain(preview.domain_id.as_ref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        domain.host,
        format!("{}-203-0-113-7.traefik.me", preview.app_name)
    );
    assert_eq!(domain.preview_deployment_id.as_ref(), Some(&preview.id));
}

#[tokio::test]
async fn label_filter_skips_unlabeled_pull_requests() {
    let h = Harness::new();
    let mut app = preview_application("api", 3);
    app.preview.labels = vec!["preview".into()];
    h.store.insert_application(app);

    let skipped = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    assert_eq!(skipped.message, "No applications matched");
    assert!(h.store.all_previews().is_empty());

    let mut labeled = pull_request(PullRequestAction::Labeled, 10, "aaa111");
    labeled.labels = vec!["preview".into()];
    let outcome = h.control.on_pull_request_event(&labeled).await.unwrap();
    assert_eq!(outcome.message, "Preview deployments queued");
    settle(&outcome).await;
}

#[tokio::test]
async fn other_actions_and_bad_events() {
    let h = Harness::new();
    h.store.insert_application(preview_application("api", 3));

    let outcome = h
        .control
        .on_pull_request_event(&pull_request(
            PullRequestAction::Other("edited".into()),
            10,
            "aaa111",
        ))
        .await
        .unwrap();
    assert_eq!(outcome.message, "No action taken for edited");

    let mut event = pull_request(PullRequestAction::Opened, 10, "aaa111");
    event.repository = String::new();
    let err = h.control.on_pull_request_event(&event).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let mut event = pull_request(PullRequestAction::Opened, 10, "aaa111");
    event.branch = "release".into();
    let outcome = h.control.on_pull_request_event(&event).await.unwrap();
    assert_eq!(outcome.message, "No applications matched");
    assert!(h.store.all_deployments().is_empty());
}

#[tokio::test]
async fn closing_the_pull_request_tears_the_preview_down() {
    let h = Harness::new();
    h.store.insert_application(preview_application("api", 3));

    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    settle(&opened).await;
    let preview = opened.previews[0].clone();
    let log = h.store.all_deployments()[0].log_path.clone();
    assert!(log.exists());

    let closed = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Closed, 10, "aaa111"))
        .await
        .unwrap();

    assert_eq!(closed.message, "Preview deployments removed");
    assert!(!closed.diagnostics.has_warnings());
    assert!(h.swarm.workload(preview.app_name.as_str()).is_none());
    assert!(h.store.all_previews().is_empty());
    assert_eq!(h.store.domain_count(), 0);
    assert!(h.store.all_deployments().is_empty());
    assert!(!log.exists());
    assert_eq!(h.notifier.count(NotificationEvent::PreviewRemoved), 1);
}

#[tokio::test]
async fn teardown_continues_when_the_cluster_is_down() {
    let h = Harness::new();
    h.store.insert_application(preview_application("api", 3));
    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    settle(&opened).await;

    h.swarm.fail_with("connection refused");
    let closed = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Closed, 10, "aaa111"))
        .await
        .unwrap();

    assert!(closed.diagnostics.has_warnings());
    assert!(h.store.all_previews().is_empty());
    assert!(h.store.all_deployments().is_empty());
}

#[tokio::test]
async fn closing_cancels_waiting_preview_jobs_and_waits_out_the_running_one() {
    let h = Harness::gated(|b| b);
    h.store.insert_application(preview_application("api", 3));

    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    opened.jobs[0].claimed().await.unwrap();
    let pushed = h
        .control
        .on_pull_request_event(&pull_request(
            PullRequestAction::Synchronize,
            10,
            "bbb222",
        ))
        .await
        .unwrap();
    assert_eq!(pushed.message, "Preview deployments queued");
    let preview = opened.previews[0].clone();

    let close = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Closed, 10, "bbb222"));
    let release = async {
        let err = pushed.jobs[0].finished().await.unwrap_err();
        assert!(matches!(err, DeployError::Cancelled(_)));
        // Teardown has not started while the first build still holds the lane.
        assert_eq!(h.store.all_previews().len(), 1);
        h.build.release(1);
    };
    let (closed, ()) = tokio::join!(close, release);

    assert_eq!(closed.unwrap().message, "Preview deployments removed");
    assert_eq!(h.build.started().len(), 1);
    assert!(h.store.all_previews().is_empty());
    assert!(h.store.all_deployments().is_empty());
    assert!(h.swarm.workload(preview.app_name.as_str()).is_none());
    assert!(h.swarm.workload("api").is_none());
}

#[tokio::test]
async fn closing_during_a_production_deploy_leaves_production_alone() {
    let h = Harness::gated(|b| b);
    h.store.insert_application(preview_application("api", 3));

    let production = h
        .control
        .submit_deploy(api(), DeploymentIntent::Deploy)
        .await
        .unwrap();
    production.claimed().await.unwrap();
    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    let preview = opened.previews[0].clone();
    eventually("preview build running", || h.build.running() == 2).await;

    let close = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Closed, 10, "aaa111"));
    let release = async {
        tokio::task::yield_now().await;
        assert_eq!(h.store.all_previews().len(), 1);
        h.build.release(2);
    };
    let (closed, ()) = tokio::join!(close, release);
    assert!(!closed.unwrap().diagnostics.has_warnings());

    let record = production.finished().await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Done);
    let deployments = h.store.all_deployments();
    assert_eq!(deployments.len(), 1);
    assert!(!deployments[0].is_preview);
    assert!(h.store.all_previews().is_empty());
    assert!(h.swarm.workload(preview.app_name.as_str()).is_none());
    assert_eq!(h.swarm.workload("api").unwrap().replicas, 2);
}

#[tokio::test]
async fn queued_job_for_a_deleted_preview_never_touches_production() {
    let h = Harness::gated(|b| b);
    h.store.insert_application(preview_application("api", 3));

    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    opened.jobs[0].claimed().await.unwrap();
    let pushed = h
        .control
        .on_pull_request_event(&pull_request(
            PullRequestAction::Synchronize,
            10,
            "bbb222",
        ))
        .await
        .unwrap();

    h.store
        .delete_preview(&opened.previews[0].id)
        .await
        .unwrap();
    h.build.release(2);

    opened.jobs[0].finished().await.unwrap();
    let err = pushed.jobs[0].finished().await.unwrap_err();
    assert!(matches!(err, DeployError::Rejected(ref m) if m.contains("no longer exists")));
    assert_eq!(h.build.started().len(), 1);
    assert!(h.swarm.workload("api").is_none());
    assert_eq!(h.store.all_deployments().len(), 1);
}

#[tokio::test]
async fn hosted_previews_do_not_wait_for_production() {
    let h = Harness::gated(|b| b.mode(DispatchMode::Hosted));
    h.store.insert_server(server("edge-1", "203.0.113.7"));
    let mut app = preview_application("api", 3);
    app.server_id = Some(ServerId::new("edge-1"));
    h.store.insert_application(app);

    let production = h
        .control
        .submit_deploy(api(), DeploymentIntent::Deploy)
        .await
        .unwrap();
    production.claimed().await.unwrap();

    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    assert_eq!(opened.message, "Preview deployments queued");
    eventually("both builds running", || h.build.running() == 2).await;

    h.build.release(2);
    assert_eq!(
        production.finished().await.unwrap().status,
        DeploymentStatus::Done
    );
    settle(&opened).await;
    assert!(h.swarm.workload("api").is_some());
    assert!(
        h.swarm
            .workload(opened.previews[0].app_name.as_str())
            .is_some()
    );
}

#[tokio::test]
async fn hosted_preview_refused_while_its_lane_is_busy() {
    let h = Harness::gated(|b| b.mode(DispatchMode::Hosted));
    h.store.insert_server(server("edge-1", "203.0.113.7"));
    let mut app = preview_application("api", 3);
    app.server_id = Some(ServerId::new("edge-1"));
    h.store.insert_application(app);

    let opened = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();
    opened.jobs[0].claimed().await.unwrap();

    let pushed = h
        .control
        .on_pull_request_event(&pull_request(
            PullRequestAction::Synchronize,
            10,
            "bbb222",
        ))
        .await
        .unwrap();
    assert_eq!(pushed.message, "Preview deployments not queued");
    assert!(pushed.jobs.is_empty());
    assert!(pushed.diagnostics.has_warnings());

    h.build.release(1);
    settle(&opened).await;
    assert_eq!(h.store.all_deployments().len(), 1);
}

#[tokio::test]
async fn refused_new_preview_stays_idle_without_records() {
    let h = Harness::gated(|b| b.mode(DispatchMode::Hosted));
    h.store.insert_server(server("edge-1", "203.0.113.7"));
    let mut app = preview_application("api", 3);
    app.server_id = Some(ServerId::new("edge-1"));
    h.store.insert_application(app);
    h.control.shutdown().await;

    let outcome = h
        .control
        .on_pull_request_event(&pull_request(PullRequestAction::Opened, 10, "aaa111"))
        .await
        .unwrap();

    assert_eq!(outcome.message, "Preview deployments not queued");
    assert!(outcome.jobs.is_empty());
    let previews = h.store.all_previews();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].status, PreviewStatus::Idle);
    assert!(h.store.all_deployments().is_empty());
    assert!(h.build.started().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn live_previews_never_exceed_the_limit(limit in 1usize..4, pull_requests in 1u32..7) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            h.store.insert_application(preview_application("api", limit));
            for pr in 0..pull_requests {
                let outcome = h
                    .control
                    .on_pull_request_event(&pull_request(PullRequestAction::Opened, pr, "sha"))
                    .await
                    .unwrap();
                settle(&outcome).await;
                prop_assert!(h.store.all_previews().len() <= limit);
            }
            prop_assert_eq!(
                h.store.all_previews().len(),
                limit.min(pull_requests as usize)
            );
            Ok(())
        })?;
    }
}
