//! End-to-end reconciliation against the in-memory runtime.

use std::sync::Arc;
use std::time::Duration;

use krane_core::{NAMESPACE_LABEL, REVISION_LABEL};
use krane_deployment::DeploymentConfig;
use krane_job::{JobError, JobQueue, RetryPolicy};
use krane_reconcile::{
    Action, DeploymentService, JobReport, ReconcileError, ReconcileOptions, UpReport,
};
use krane_runtime::InMemoryRuntime;
use krane_runtime::memory::Op;
use krane_state::StateStore;

struct Harness {
    service: DeploymentService,
    runtime: Arc<InMemoryRuntime>,
    store: StateStore,
}

fn harness(retries: u32) -> Harness {
    let store = StateStore::open_in_memory().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let options = ReconcileOptions {
        retry: RetryPolicy::new(retries, Duration::from_millis(1)),
        ..ReconcileOptions::default()
    };
    let service = DeploymentService::new(store.clone(), runtime.clone(), JobQueue::new(4), options);
    Harness {
        service,
        runtime,
        store,
    }
}

fn web(name: &str, scale: u32) -> DeploymentConfig {
    let mut config = DeploymentConfig::new(name, "nginx");
    config.alias = vec![format!("{name}.example.com")];
    config.ports.insert("8080".into(), "80".into());
    config.scale = scale;
    config
}

fn labelled(runtime: &InMemoryRuntime, name: &str) -> usize {
    runtime
        .containers()
        .iter()
        .filter(|c| c.label(NAMESPACE_LABEL) == Some(name))
        .count()
}

async fn up(service: &DeploymentService, name: &str) -> UpReport {
    match service.run(name).unwrap().wait().await.unwrap() {
        JobReport::Up(report) => report,
        other => panic!("expected up report, got {other:?}"),
    }
}

#[tokio::test]
async fn up_creates_scaled_running_containers_with_labels() {
    let h = harness(0);
    h.service.register(web("api", 3)).unwrap();

    let report = up(&h.service, "api").await;
    assert_eq!(report.containers.len(), 3);
    assert!(!report.unchanged);

    let containers = h.runtime.containers();
    assert_eq!(containers.len(), 3);
    for container in &containers {
        assert!(container.is_running());
        assert_eq!(container.image, "docker.io/nginx:latest");
        assert_eq!(container.networks, vec!["krane"]);
        assert_eq!(
            container.label("traefik.http.routers.api-insecure.rule"),
            Some("Host(`api.example.com`)")
        );
        assert!(container.label(REVISION_LABEL).is_some());
    }
}

#[tokio::test]
async fn up_then_down_leaves_no_labelled_containers() {
    let h = harness(0);
    h.service.register(web("api", 2)).unwrap();
    h.service.register(web("other", 1)).unwrap();
    up(&h.service, "other").await;

    // Submitted back to back; the queue serializes them.
    let up_job = h.service.run("api").unwrap();
    let down_job = h.service.stop("api").unwrap();
    up_job.wait().await.unwrap();
    let down = down_job.wait().await.unwrap();

    match down {
        JobReport::Down(report) => {
            assert_eq!(report.removed.len(), 2);
            assert!(!report.purged);
        }
        other => panic!("expected down report, got {other:?}"),
    }
    assert_eq!(labelled(&h.runtime, "api"), 0);
    assert_eq!(labelled(&h.runtime, "other"), 1);
    assert!(h.service.get("api").is_ok());
}

#[tokio::test]
async fn repeated_up_is_a_no_op_when_converged() {
    let h = harness(0);
    h.service.register(web("api", 2)).unwrap();

    let first = up(&h.service, "api").await;
    let second = up(&h.service, "api").await;

    assert!(second.unchanged);
    let mut a = first.containers.clone();
    let mut b = second.containers.clone();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(labelled(&h.runtime, "api"), 2);
}

#[tokio::test]
async fn changed_config_replaces_containers_new_before_old() {
    let h = harness(0);
    h.service.register(web("api", 1)).unwrap();
    let first = up(&h.service, "api").await;

    let mut changed = web("api", 1);
    changed.tag = "1.25".into();
    h.service.update(changed).unwrap();
    let second = up(&h.service, "api").await;

    assert_eq!(second.removed, first.containers);
    let containers = h.runtime.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].image, "docker.io/nginx:1.25");

    // The replacement started before the old container was stopped.
    let calls = h.runtime.calls();
    let new_id = &second.containers[0];
    let started = calls.iter().position(|c| *c == format!("start:{new_id}")).unwrap();
    let stopped = calls
        .iter()
        .position(|c| *c == format!("stop:{}", first.containers[0]))
        .unwrap();
    assert!(started < stopped);
}

#[tokio::test]
async fn delete_cascades_to_secrets_and_config() {
    let h = harness(0);
    let mut config = web("api", 1);
    config.secrets.insert("TOKEN".into(), "api-token".into());
    h.service.register(config).unwrap();
    h.service.add_secret("api", "api-token", "s3cret").unwrap();
    up(&h.service, "api").await;

    let report = h.service.delete("api").unwrap().wait().await.unwrap();
    assert!(matches!(report, JobReport::Down(ref r) if r.purged && r.removed.len() == 1));

    assert_eq!(labelled(&h.runtime, "api"), 0);
    assert!(matches!(h.service.get("api"), Err(ReconcileError::NotFound(_))));
    assert!(!h.store.has_collection("api-secrets").unwrap());
}

#[tokio::test]
async fn run_after_delete_is_rejected_and_leaves_nothing_behind() {
    let h = harness(0);
    h.service.register(web("api", 1)).unwrap();
    up(&h.service, "api").await;

    let delete = h.service.delete("api").unwrap();
    assert!(matches!(h.service.run("api"), Err(ReconcileError::NotFound(_))));
    assert!(matches!(h.service.stop("api"), Err(ReconcileError::NotFound(_))));
    delete.wait().await.unwrap();

    assert_eq!(labelled(&h.runtime, "api"), 0);
    assert!(!h.store.has_collection("api-secrets").unwrap());
}

#[tokio::test]
async fn retry_adopts_container_whose_create_reply_was_lost() {
    let h = harness(1);
    h.service.register(web("api", 1)).unwrap();
    let first = up(&h.service, "api").await;

    let mut changed = web("api", 1);
    changed.tag = "2".into();
    h.service.update(changed).unwrap();
    h.runtime.lose_next_reply(Op::Create, 1);

    let report = up(&h.service, "api").await;

    // One container serves the new revision; the old one is gone.
    let containers = h.runtime.containers();
    assert_eq!(containers.len(), 1);
    assert!(containers[0].is_running());
    assert_eq!(containers[0].image, "docker.io/nginx:2");
    assert_eq!(report.containers, vec![containers[0].id.clone()]);
    assert_eq!(report.removed, first.containers);
}

#[tokio::test]
async fn transient_runtime_failures_are_retried() {
    let h = harness(2);
    h.service.register(web("api", 1)).unwrap();
    h.runtime.fail_next(Op::Start, 2);

    let report = up(&h.service, "api").await;

    // The container created by the first attempt is reused, not duplicated.
    assert_eq!(report.containers.len(), 1);
    assert_eq!(labelled(&h.runtime, "api"), 1);
    assert!(h.runtime.containers()[0].is_running());
}

#[tokio::test]
async fn exhausted_retries_surface_last_runtime_error() {
    let h = harness(1);
    h.service.register(web("api", 1)).unwrap();
    h.runtime.fail_next(Op::Pull, 5);

    let err = h.service.run("api").unwrap().wait().await.unwrap_err();
    match err {
        JobError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(last, ReconcileError::Runtime(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(labelled(&h.runtime, "api"), 0);
}

#[tokio::test]
async fn failed_teardown_keeps_new_containers_serving() {
    let h = harness(0);
    h.service.register(web("api", 1)).unwrap();
    let first = up(&h.service, "api").await;

    let mut changed = web("api", 1);
    changed.tag = "2".into();
    h.service.update(changed).unwrap();
    h.runtime.fail_next(Op::Remove, 1);

    assert!(h.service.run("api").unwrap().wait().await.is_err());

    // Old container still present, new one running: never zero serving.
    let running: Vec<_> = h
        .runtime
        .containers()
        .into_iter()
        .filter(|c| c.label(NAMESPACE_LABEL) == Some("api") && c.is_running())
        .collect();
    assert_eq!(running.len(), 1);
    assert_ne!(running[0].id, first.containers[0]);
}

#[tokio::test]
async fn submit_matches_actions_exhaustively() {
    let h = harness(0);
    let config = h.service.register(web("api", 1)).unwrap();

    let up = h.service.submit(Action::Up, &config).unwrap();
    assert_eq!(up.kind(), krane_job::JobKind::ContainerCreate);
    up.wait().await.unwrap();

    let down = h.service.submit(Action::Down, &config).unwrap();
    assert_eq!(down.kind(), krane_job::JobKind::ContainerDelete);
    down.wait().await.unwrap();
    assert_eq!(labelled(&h.runtime, "api"), 0);
}
