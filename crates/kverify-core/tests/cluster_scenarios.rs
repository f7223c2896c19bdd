//! End-to-end checks of the polling, log and assertion engines against
//! the in-memory cluster fake. Time is paused, so minute-long waits run
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use kverify_core::cluster::{Named, Pod, PodExt, Service, Workload};
use kverify_core::fakes::{FakeCluster, ScriptedLog};
use kverify_core::predicate::{
    all_of, anything, equal_to, has_entry, has_item, has_size, property, starts_with,
};
use kverify_core::{
    await_deleted, await_resource, await_selected, match_ordered, AssertionChain, ClusterError,
    Condition, Labels, LogAssertion, PodLog, PollSchedule, Predicate, ResourceKind, ResourceRef,
    VerifyError, NOT_OBSERVED,
};
use serde_json::json;
use tokio::time::Instant;

const SPRING_BOOT_PHRASES: [&str; 3] = [
    "Tomcat started on port(s): 8080",
    "Started ZeroConfigApplication in",
    "seconds",
];

fn labelled_demo() -> Predicate<Pod> {
    property("labels", |p: &Pod| p.labels(), has_entry("app", "demo"))
}

fn ready_pod(name: &str) -> serde_json::Value {
    json!({
        "metadata": {"name": name, "labels": {"app": "demo"}},
        "spec": {"containers": [{"name": "demo", "image": "demo:latest"}]},
        "status": {"phase": "Running", "containerStatuses": [{
            "name": "demo", "ready": true, "restartCount": 0,
            "image": "demo:latest", "imageID": "docker-pullable://demo@sha256:1c"
        }]}
    })
}

fn demo_selector() -> Labels {
    let mut selector = Labels::new();
    selector.insert("app".into(), "demo".into());
    selector
}

/// Test: a pod that never appears times out after 60-62s with the marker
#[tokio::test(start_paused = true)]
async fn test_missing_pod_times_out_not_observed() {
    let cluster = FakeCluster::new();
    let target = ResourceRef::new(ResourceKind::Pod, "default", "demo");
    let condition = Condition::new(labelled_demo(), PollSchedule::secs(60, 2).unwrap());
    let start = Instant::now();

    let err = await_resource::<Pod>(&cluster, &target, &condition)
        .await
        .unwrap_err();

    let wall = start.elapsed();
    assert!(wall >= Duration::from_secs(60) && wall <= Duration::from_secs(62));
    match &err {
        VerifyError::AwaitTimeout {
            elapsed,
            last_observed,
            attempts,
            ..
        } => {
            assert!(*elapsed >= Duration::from_secs(60));
            assert!(last_observed.is_none());
            assert_eq!(*attempts, 31);
        }
        other => panic!("expected AwaitTimeout, got {other:?}"),
    }
    assert!(err.to_string().contains(NOT_OBSERVED));
    assert_eq!(cluster.get_calls(ResourceKind::Pod), 31);
}

/// Test: a permission failure aborts the wait on the first attempt
#[tokio::test(start_paused = true)]
async fn test_forbidden_aborts_immediately() {
    let cluster = FakeCluster::new();
    cluster.script(
        ResourceKind::Pod,
        "default",
        "demo",
        vec![Err(ClusterError::Forbidden {
            kind: "Pod".into(),
            namespace: "default".into(),
            reason: "serviceaccount cannot get pods".into(),
        })],
    );
    let target = ResourceRef::new(ResourceKind::Pod, "default", "demo");
    let condition = Condition::new(labelled_demo(), PollSchedule::secs(60, 2).unwrap());

    let err = await_resource::<Pod>(&cluster, &target, &condition)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err.elapsed(), Some(Duration::ZERO));
    assert_eq!(cluster.get_calls(ResourceKind::Pod), 1);
}

/// Test: the pod selected by label becomes ready after a few polls
#[tokio::test(start_paused = true)]
async fn test_selected_pod_becomes_ready() {
    let cluster = FakeCluster::new();
    let pending = json!({
        "metadata": {"name": "demo-1", "labels": {"app": "demo"}},
        "status": {"phase": "Pending"}
    });
    let running = ready_pod("demo-1");
    cluster.insert(ResourceKind::Pod, "default", pending);

    let selector = demo_selector();
    let condition = Condition::new(
        Predicate::new("a ready pod", Pod::is_ready),
        PollSchedule::secs(60, 2).unwrap(),
    );

    let waiter =
        await_selected::<Pod>(&cluster, ResourceKind::Pod, "default", &selector, &condition);
    let flip = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cluster.insert(ResourceKind::Pod, "default", running);
    };
    let (got, ()) = tokio::join!(waiter, flip);

    let got = got.unwrap();
    assert_eq!(got.value.name(), "demo-1");
    assert_eq!(got.elapsed, Duration::from_secs(6));
}

/// Test: a failed pod listed first does not hide a ready one with the same labels
#[tokio::test(start_paused = true)]
async fn test_selected_picks_the_ready_pod_among_several() {
    let cluster = FakeCluster::new();
    cluster.insert(
        ResourceKind::Pod,
        "default",
        json!({
            "metadata": {"name": "demo-old", "labels": {"app": "demo"}},
            "status": {"phase": "Failed"}
        }),
    );
    cluster.insert(ResourceKind::Pod, "default", ready_pod("demo-so-ready"));
    let condition = Condition::new(
        Predicate::new("a ready pod", Pod::is_ready),
        PollSchedule::secs(10, 1).unwrap(),
    );

    let got = await_selected::<Pod>(
        &cluster,
        ResourceKind::Pod,
        "default",
        &demo_selector(),
        &condition,
    )
    .await
    .unwrap();

    assert_eq!(got.value.name(), "demo-so-ready");
    assert_eq!(got.attempts, 1);
    assert_eq!(got.elapsed, Duration::ZERO);
    assert_eq!(cluster.list_calls(ResourceKind::Pod), 1);
}

/// Test: when no selected pod qualifies the timeout reports the first one listed
#[tokio::test(start_paused = true)]
async fn test_selected_timeout_reports_first_listed_pod() {
    let cluster = FakeCluster::new();
    for name in ["demo-a", "demo-b"] {
        cluster.insert(
            ResourceKind::Pod,
            "default",
            json!({
                "metadata": {"name": name, "labels": {"app": "demo"}},
                "status": {"phase": "Pending"}
            }),
        );
    }
    let condition = Condition::new(
        Predicate::new("a ready pod", Pod::is_ready),
        PollSchedule::secs(10, 1).unwrap(),
    );

    let err = await_selected::<Pod>(
        &cluster,
        ResourceKind::Pod,
        "default",
        &demo_selector(),
        &condition,
    )
    .await
    .unwrap_err();

    match err {
        VerifyError::AwaitTimeout {
            what,
            last_observed,
            attempts,
            ..
        } => {
            assert_eq!(what, "Pod default/app=demo");
            assert_eq!(attempts, 11);
            assert!(last_observed.unwrap_or_default().contains("demo-a"));
        }
        other => panic!("expected AwaitTimeout, got {other:?}"),
    }
}

/// Test: ordered startup phrases appearing within 10s succeed
#[tokio::test(start_paused = true)]
async fn test_startup_log_matches_in_order() {
    let log = ScriptedLog::growing(
        [
            "Tomcat started on port(s): 8080 (http) with context path ''",
            "Started ZeroConfigApplication in 2.817",
            "seconds (JVM running for 3.3)",
        ],
        1,
    );
    let assertion = LogAssertion::new(SPRING_BOOT_PHRASES, Duration::from_secs(40)).unwrap();

    let got = match_ordered(&log, &assertion).await.unwrap();

    assert!(got.elapsed <= Duration::from_secs(10));
    assert_eq!(got.attempts, 3);
}

/// Test: a missing middle phrase fails at the 40s deadline with index 1
#[tokio::test(start_paused = true)]
async fn test_startup_log_missing_middle_phrase() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.script_logs(
        "default",
        "sb-zero-config-1",
        vec![
            "Tomcat started on port(s): 8080 (http)\n".to_string(),
            "Tomcat started on port(s): 8080 (http)\nready in 3 seconds\n".to_string(),
        ],
    );
    let log = PodLog::new(cluster.clone(), "default", "sb-zero-config-1");
    let assertion = LogAssertion::new(SPRING_BOOT_PHRASES, Duration::from_secs(40)).unwrap();
    let start = Instant::now();

    let err = match_ordered(&log, &assertion).await.unwrap_err();

    assert!(start.elapsed() >= Duration::from_secs(40));
    assert!(start.elapsed() <= Duration::from_secs(41));
    match err {
        VerifyError::LogTimeout {
            matched,
            expected,
            captured,
            ..
        } => {
            assert_eq!(matched, 1);
            assert_eq!(expected.len(), 3);
            assert!(captured.contains("ready in 3 seconds"));
        }
        other => panic!("expected LogTimeout, got {other:?}"),
    }
}

/// Test: replicas=2 against equal_to(1) fails fast; containers never checked
#[tokio::test(start_paused = true)]
async fn test_deployment_replica_mismatch_fails_fast() {
    let cluster = FakeCluster::new();
    cluster.insert(
        ResourceKind::Deployment,
        "default",
        json!({
            "kind": "Deployment",
            "metadata": {"name": "sb-zero-config", "namespace": "default"},
            "spec": {"replicas": 2, "template": {"spec": {"containers": [
                {"name": "spring-boot", "image": "sb-zero-config:latest"}
            ]}}}
        }),
    );
    let target = ResourceRef::new(ResourceKind::Deployment, "default", "sb-zero-config");
    let snapshot = await_resource::<Workload>(
        &cluster,
        &target,
        &Condition::new(anything(), PollSchedule::secs(60, 2).unwrap()),
    )
    .await
    .unwrap()
    .value;

    let chain = AssertionChain::of(ResourceKind::Deployment, snapshot);
    let mut containers_checked = false;
    let outcome = chain.assert_replicas(equal_to(1)).and_then(|c| {
        containers_checked = true;
        c.assert_containers(has_item(all_of(vec![
            property(
                "name",
                |c: &kverify_core::cluster::Container| &c.name,
                starts_with("spring"),
            ),
        ])))
    });

    assert!(!containers_checked);
    match outcome.unwrap_err() {
        VerifyError::AssertionMismatch {
            subject,
            expected,
            actual,
            ..
        } => {
            assert_eq!(subject, "Deployment default/sb-zero-config");
            assert_eq!(expected, "1");
            assert_eq!(actual, "2");
        }
        other => panic!("expected AssertionMismatch, got {other:?}"),
    }
}

/// Test: service structure checks on a fetched snapshot
#[tokio::test(start_paused = true)]
async fn test_service_chain_on_fetched_snapshot() {
    let cluster = FakeCluster::new();
    cluster.insert(
        ResourceKind::Service,
        "default",
        json!({
            "metadata": {"name": "vertx-simplest", "namespace": "default"},
            "spec": {"type": "ClusterIP", "ports": [{"name": "http", "port": 8080}]}
        }),
    );
    let target = ResourceRef::new(ResourceKind::Service, "default", "vertx-simplest");
    let svc = await_resource::<Service>(
        &cluster,
        &target,
        &Condition::new(anything(), PollSchedule::secs(30, 1).unwrap()),
    )
    .await
    .unwrap()
    .value;

    let chain = AssertionChain::of(ResourceKind::Service, svc);
    chain
        .assert_ports(has_size(1))
        .and_then(|c| c.assert_port("http", 8080, false))
        .and_then(|c| c.assert_is_cluster_ip())
        .unwrap();
}

/// Test: undeploy wait completes once the object is gone
#[tokio::test(start_paused = true)]
async fn test_await_deleted_after_undeploy() {
    let cluster = FakeCluster::new();
    let present = json!({"metadata": {"name": "webapp"}});
    cluster.script(
        ResourceKind::Service,
        "default",
        "webapp",
        vec![
            Ok(present.clone()),
            Ok(present),
            Err(ClusterError::NotFound {
                kind: "Service".into(),
                namespace: "default".into(),
                name: "webapp".into(),
            }),
        ],
    );
    let target = ResourceRef::new(ResourceKind::Service, "default", "webapp");

    let elapsed = await_deleted(&cluster, &target, PollSchedule::secs(60, 2).unwrap())
        .await
        .unwrap();

    assert_eq!(elapsed, Duration::from_secs(4));
}
