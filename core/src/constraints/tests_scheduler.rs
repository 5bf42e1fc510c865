use super::*;
use crate::geometry::{ApproxEq, Vector3};
use crate::scene::{AssemblyScene, Component};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;

fn bench() -> AssemblyScene {
    let mut scene = AssemblyScene::new();
    scene.add_component(Component::new("Base").fixed());
    scene.add_component(Component::new("Bracket").at(Vector3::new(5.0, 0.0, 0.0)));
    scene
}

fn distance_params(target: f64) -> InputParams {
    json!({"elements": ["Base", "Bracket"], "distance": target})
        .as_object()
        .unwrap()
        .clone()
}

async fn next_report(rx: &mut UnboundedReceiver<RunReport>) -> RunReport {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("run did not finish in time")
        .expect("runner stopped")
}

async fn wait_in_flight(scheduler: &RunScheduler) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !scheduler.is_in_flight() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("run never started");
}

#[test]
fn test_scheduler_coalesces_requests() {
    let scheduler = RunScheduler::new();
    let defaults = RunOptions::default();
    assert!(scheduler.begin(&defaults).is_none(), "nothing requested yet");

    scheduler.request();
    assert!(scheduler.begin(&defaults).is_some());
    assert!(scheduler.is_in_flight());

    for _ in 0..5 {
        scheduler.request();
    }
    assert!(scheduler.begin(&defaults).is_none(), "only one run may be in flight");
    assert!(scheduler.finish(), "requests during a run queue one trailing run");

    assert!(scheduler.begin(&defaults).is_some());
    assert!(!scheduler.finish());
    assert!(scheduler.begin(&defaults).is_none());
}

#[test]
fn test_latest_override_wins_for_trailing_run() {
    let scheduler = RunScheduler::new();
    let defaults = RunOptions::default().with_max_iterations(7);

    scheduler.request();
    assert_eq!(scheduler.begin(&defaults).unwrap().max_iterations, 7);

    scheduler.request_with(RunOptions::default().with_max_iterations(2));
    scheduler.request();
    scheduler.request_with(RunOptions::default().with_max_iterations(4));
    assert!(scheduler.finish());

    let trailing = scheduler.begin(&defaults).unwrap();
    assert_eq!(trailing.max_iterations, 4);
    assert!(!scheduler.finish());

    scheduler.request();
    assert_eq!(scheduler.begin(&defaults).unwrap().max_iterations, 7, "overrides are used once");
}

#[tokio::test]
async fn test_session_run_moves_scene() {
    let mut session = AssemblySession::new(ConstraintHistory::with_builtin(), bench());
    session.history.add_constraint("distance", Some(distance_params(2.0))).unwrap();

    let options = RunOptions::default().with_max_iterations(4).with_gains(1.0, 1.0);
    let report = session.run(&options, &NoHooks, &CancelToken::new()).await;

    assert_eq!(report.iterations, 1);
    let bracket = session.scene.find_by_name("Bracket").unwrap();
    assert!(bracket.position.approx_eq(&Vector3::new(2.0, 0.0, 0.0)));
}

#[tokio::test]
async fn test_deferred_run_observes_disable() {
    let session = Arc::new(Mutex::new(AssemblySession::new(ConstraintHistory::with_builtin(), bench())));
    let scheduler = Arc::new(RunScheduler::new());
    let (tx, mut rx) = unbounded_channel();
    let options = RunOptions::default().with_max_iterations(3).with_gains(1.0, 1.0);
    let runner = AutoRunner::spawn(session.clone(), scheduler.clone(), options, Arc::new(NoHooks), Some(tx)).await;

    let id = {
        let mut guard = session.lock().await;
        let id = guard.history.add_constraint("distance", Some(distance_params(2.0))).unwrap();
        guard.history.set_constraint_enabled(&id, false).unwrap();
        id
    };

    let report = next_report(&mut rx).await;
    assert_eq!(report.result_for(&id).unwrap().status, ConstraintStatus::Disabled);

    let guard = session.lock().await;
    assert_eq!(guard.history.get(&id).unwrap().status(), ConstraintStatus::Disabled);
    let bracket = guard.scene.find_by_name("Bracket").unwrap();
    assert!(bracket.position.approx_eq(&Vector3::new(5.0, 0.0, 0.0)), "disabled entry must not move anything");
    drop(guard);
    runner.shutdown();
}

#[tokio::test]
async fn test_requests_during_run_collapse_into_one_trailing_run() {
    let session = Arc::new(Mutex::new(AssemblySession::new(ConstraintHistory::with_builtin(), bench())));
    let scheduler = Arc::new(RunScheduler::new());
    let (tx, mut rx) = unbounded_channel();
    let options = RunOptions {
        max_iterations: 3,
        translation_gain: 0.5,
        iteration_delay_ms: 30,
        ..RunOptions::default()
    };
    let runner = AutoRunner::spawn(session.clone(), scheduler.clone(), options, Arc::new(NoHooks), Some(tx)).await;

    session.lock().await.history.add_constraint("distance", Some(distance_params(1.0))).unwrap();
    wait_in_flight(&scheduler).await;
    for _ in 0..5 {
        scheduler.request();
    }

    let first = next_report(&mut rx).await;
    let second = next_report(&mut rx).await;
    assert!(!first.aborted);
    assert!(!second.aborted);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "no third run expected"
    );
    runner.shutdown();
}

#[tokio::test]
async fn test_runner_cancel_aborts_active_run() {
    let session = Arc::new(Mutex::new(AssemblySession::new(ConstraintHistory::with_builtin(), bench())));
    let scheduler = Arc::new(RunScheduler::new());
    let (tx, mut rx) = unbounded_channel();
    let options = RunOptions {
        max_iterations: 50,
        translation_gain: 0.1,
        iteration_delay_ms: 20,
        ..RunOptions::default()
    };
    let runner = AutoRunner::spawn(session.clone(), scheduler.clone(), options, Arc::new(NoHooks), Some(tx)).await;

    session.lock().await.history.add_constraint("distance", Some(distance_params(1.0))).unwrap();
    wait_in_flight(&scheduler).await;
    runner.cancel();

    let report = next_report(&mut rx).await;
    assert!(report.aborted);
    assert!(report.iterations < 50);

    // The next run starts with a fresh token.
    scheduler.request();
    let rerun = next_report(&mut rx).await;
    assert!(!rerun.aborted);
    runner.shutdown();
}

#[tokio::test]
async fn test_cancel_reaches_only_the_active_run() {
    let session = Arc::new(Mutex::new(AssemblySession::new(ConstraintHistory::with_builtin(), bench())));
    let scheduler = Arc::new(RunScheduler::new());
    let (tx, mut rx) = unbounded_channel();
    let options = RunOptions {
        max_iterations: 50,
        translation_gain: 0.1,
        iteration_delay_ms: 20,
        ..RunOptions::default()
    };
    let runner = AutoRunner::spawn(session.clone(), scheduler.clone(), options, Arc::new(NoHooks), Some(tx)).await;

    session.lock().await.history.add_constraint("distance", Some(distance_params(1.0))).unwrap();
    wait_in_flight(&scheduler).await;
    // Queue a trailing run, then cancel the active one.
    scheduler.request();
    runner.cancel();

    let cancelled = next_report(&mut rx).await;
    assert!(cancelled.aborted);
    let trailing = next_report(&mut rx).await;
    assert!(!trailing.aborted, "a cancel must not leak into the next run");
    runner.shutdown();
}

#[tokio::test]
async fn test_detached_runner_runs_only_on_request() {
    let session = Arc::new(Mutex::new(AssemblySession::new(ConstraintHistory::with_builtin(), bench())));
    let scheduler = Arc::new(RunScheduler::new());
    let (tx, mut rx) = unbounded_channel();
    let options = RunOptions::default().with_max_iterations(3).with_gains(1.0, 1.0);
    let runner = AutoRunner::spawn_detached(session.clone(), scheduler.clone(), options, Arc::new(NoHooks), Some(tx));

    let id = session.lock().await.history.add_constraint("distance", Some(distance_params(2.0))).unwrap();
    assert!(!scheduler.has_pending(), "edits do not schedule runs");
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "no run expected before a request"
    );

    scheduler.request_with(RunOptions::default().with_max_iterations(9).with_gains(1.0, 1.0));
    let report = next_report(&mut rx).await;
    assert!(!report.aborted);
    assert_eq!(report.iterations, 1);

    let guard = session.lock().await;
    let data = &guard.history.get(&id).unwrap().persistent_data;
    assert_eq!(data.last_requested_iterations, Some(9));
    assert!(guard.scene.find_by_name("Bracket").unwrap().position.approx_eq(&Vector3::new(2.0, 0.0, 0.0)));
    drop(guard);
    runner.shutdown();
}
