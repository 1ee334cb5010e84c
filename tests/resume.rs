// ABOUTME: Crash, shutdown and resume tests sharing one store across orchestrator instances.
// ABOUTME: A resumed rollout re-enters its stage and never moves traffic backwards.

mod support;

use pdo::deploy::{DeployErrorKind, DeploymentStatus, StageOutcome};
use pdo::store::{MemoryStateStore, StateStore};
use pdo::types::TrafficSplit;
use std::sync::Arc;
use std::time::Duration;
use support::{Call, Harness, service};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

#[test]
fn crash_during_traffic_shift_resumes_forward() {
    let store = Arc::new(MemoryStateStore::new());

    let crashed = paused_runtime();
    let id = crashed.block_on(async {
        let h = Harness::with_store(store.clone());
        h.adopt();
        h.driver.hang_at(50);
        let hung = h.driver.hung();
        let id = h.start(1);
        hung.notified().await;
        id
    });
    // Dropping the runtime kills the controller mid-call
    drop(crashed);

    let stranded = store.get(&id).unwrap().unwrap();
    assert_eq!(stranded.status(), DeploymentStatus::Shifting50);
    assert_eq!(stranded.traffic_split(), TrafficSplit::candidate_percent(10));
    assert_eq!(
        stranded.pending_split(),
        Some(TrafficSplit::candidate_percent(50))
    );
    assert!(store.read_lock(&service()).unwrap().is_some());

    let restarted = paused_runtime();
    restarted.block_on(async {
        let h = Harness::with_store(store.clone());
        let resumed = h.orchestrator.resume_incomplete().unwrap();
        assert_eq!(resumed, vec![id.clone()]);

        let done = h.orchestrator.wait(&id).await.unwrap();

        assert_eq!(done.status(), DeploymentStatus::Completed);
        assert_eq!(h.driver.traffic_weights(), vec![50, 100]);
        let interrupted: Vec<_> = done
            .stage_history()
            .iter()
            .filter(|r| r.outcome == StageOutcome::Interrupted)
            .map(|r| r.stage)
            .collect();
        assert_eq!(interrupted, vec![DeploymentStatus::Shifting50]);
        assert!(store.read_lock(&service()).unwrap().is_none());
    });
}

#[tokio::test(start_paused = true)]
async fn shutdown_suspends_and_resume_continues() {
    let h = Harness::new();
    h.adopt();
    let id = h.start(1);

    // One gate sample into the 10% soak
    tokio::time::sleep(Duration::from_secs(15)).await;
    h.orchestrator.shutdown().await;

    let stopped = h.orchestrator.get_deployment(&id).unwrap();
    assert_eq!(stopped.status(), DeploymentStatus::Shifting10);
    assert_eq!(stopped.traffic_split(), TrafficSplit::candidate_percent(10));
    assert!(stopped.pending_split().is_none());
    assert!(stopped.is_resumable());

    let next = Harness::with_store(h.store.clone());
    assert_eq!(next.orchestrator.resume_incomplete().unwrap(), vec![id.clone()]);
    let done = next.orchestrator.wait(&id).await.unwrap();

    assert_eq!(done.status(), DeploymentStatus::Completed);
    // The confirmed 10% split is not re-issued
    assert_eq!(next.driver.traffic_weights(), vec![50, 100]);
}

#[tokio::test(start_paused = true)]
async fn abort_requested_while_nobody_runs_it_rolls_back_on_resume() {
    let h = Harness::new();
    h.adopt();
    let id = h.start(1);
    tokio::time::sleep(Duration::from_secs(15)).await;
    h.orchestrator.shutdown().await;

    let operator = Harness::with_store(h.store.clone());
    operator.orchestrator.abort_deployment(&id).unwrap();
    assert!(h.store.abort_requested(&id).unwrap());

    operator.orchestrator.resume_incomplete().unwrap();
    let done = operator.orchestrator.wait(&id).await.unwrap();

    assert_eq!(done.status(), DeploymentStatus::RolledBack);
    let cause = done.last_error().unwrap();
    assert_eq!(cause.kind, DeployErrorKind::Aborted);
    assert_eq!(cause.stage, DeploymentStatus::Shifting10);
    assert_eq!(operator.driver.traffic_weights(), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn store_outage_stops_the_rollout_until_resumed() {
    let h = Harness::new();
    h.adopt();
    let id = h.start(1);
    h.store.set_fail_writes(true);

    let err = h.orchestrator.wait(&id).await.unwrap_err();
    assert_eq!(err.kind(), DeployErrorKind::Store);
    assert_eq!(
        h.orchestrator.get_deployment(&id).unwrap().status(),
        DeploymentStatus::Pending
    );

    h.store.set_fail_writes(false);
    assert_eq!(h.orchestrator.resume_incomplete().unwrap(), vec![id.clone()]);
    let done = h.orchestrator.wait(&id).await.unwrap();

    assert_eq!(done.status(), DeploymentStatus::Completed);
    let applies = h
        .driver
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Apply(..)))
        .count();
    assert_eq!(applies, 2);
}

#[tokio::test(start_paused = true)]
async fn resume_skips_rollouts_already_running_here() {
    let h = Harness::new();
    h.adopt();
    let id = h.start(1);

    assert!(h.orchestrator.is_running(&id));
    assert!(h.orchestrator.resume_incomplete().unwrap().is_empty());

    let done = h.orchestrator.wait(&id).await.unwrap();
    assert_eq!(done.status(), DeploymentStatus::Completed);
}
