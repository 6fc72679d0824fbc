//! Plan order and failure isolation.
//!
//! These tests verify that the scheduler honours prerequisites, runs
//! independent tasks together, and confines failures to their dependents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use pipewright::core::{Task, TaskRegistry, TaskStatus};
use pipewright::orchestration::{DependencyResolver, SchedulerEvent};
use pipewright::Error;

use crate::fixtures::{failing_task, recording_task, registry_of, Recorder, SchedulerHarness};

/// Test: clean / compile / optimize scenario
/// Given optimize depends on compile
/// When optimize is requested
/// Then the plan is [[compile], [optimize]] and compile finishes first
#[tokio::test]
async fn test_optimize_runs_after_compile() {
    let recorder = Recorder::new();
    let mut harness = SchedulerHarness::new(vec![
        recording_task(&recorder, "clean", &[], 5),
        recording_task(&recorder, "compile", &[], 20),
        recording_task(&recorder, "optimize", &["compile"], 5),
    ]);

    let plan = DependencyResolver::new(harness.scheduler.registry())
        .resolve(&["optimize"])
        .unwrap();
    assert_eq!(
        plan.groups(),
        &[vec!["compile".to_string()], vec!["optimize".to_string()]]
    );

    let result = harness.scheduler.run(&plan).await;
    assert!(result.is_success());
    assert!(recorder.before("compile", "optimize"));
    assert_eq!(recorder.count("start:clean"), 0, "clean was not requested");

    let events = harness.drain_events();
    assert!(matches!(
        events.last(),
        Some(SchedulerEvent::RunFinished { success: true, .. })
    ));
}

/// Test: prerequisites always settle first
/// Given a layered graph with shared prerequisites
/// When the top task runs
/// Then every task ended after all of its prerequisites ended
#[tokio::test]
async fn test_prerequisites_end_before_dependents_start() {
    let recorder = Recorder::new();
    let harness = SchedulerHarness::new(vec![
        recording_task(&recorder, "fonts", &[], 15),
        recording_task(&recorder, "icons", &[], 5),
        recording_task(&recorder, "sprites", &["icons"], 10),
        recording_task(&recorder, "styles", &["fonts", "sprites"], 5),
        recording_task(&recorder, "bundle", &["styles", "icons"], 5),
    ]);

    let result = harness.scheduler.run_tasks(&["bundle"]).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.reports.len(), 5);

    for (task, prerequisite) in [
        ("sprites", "icons"),
        ("styles", "fonts"),
        ("styles", "sprites"),
        ("bundle", "styles"),
        ("bundle", "icons"),
    ] {
        assert!(
            recorder.before(prerequisite, task),
            "{} should end before {} starts: {:?}",
            prerequisite,
            task,
            recorder.entries()
        );
    }
}

/// Test: a group runs concurrently
/// Given three independent tasks that wait on a shared barrier
/// When they are requested together
/// Then all three reach the barrier, which needs them in flight at once
#[tokio::test]
async fn test_group_members_run_concurrently() {
    let barrier = Arc::new(Barrier::new(3));
    let tasks = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let barrier = Arc::clone(&barrier);
            Task::new(name).with_action(move |_ctx| {
                let barrier = Arc::clone(&barrier);
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            })
        })
        .collect();
    let harness = SchedulerHarness::new(tasks);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        harness.scheduler.run_tasks(&["a", "b", "c"]),
    )
    .await
    .expect("group members should not wait on each other")
    .unwrap();
    assert_eq!(result.succeeded(), 3);
}

/// Test: failure blocks dependents only
/// Given sass fails, imgmin is independent, and deploy needs sass
/// When all are requested
/// Then imgmin succeeds, deploy is skipped, and one notification is sent
#[tokio::test]
async fn test_failure_skips_dependents_not_siblings() {
    let recorder = Recorder::new();
    let mut harness = SchedulerHarness::new(vec![
        failing_task("sass", &[], "Undefined variable: $red"),
        recording_task(&recorder, "imgmin", &[], 20),
        recording_task(&recorder, "deploy", &["sass"], 0),
    ]);

    let result = harness
        .scheduler
        .run_tasks(&["sass", "imgmin", "deploy"])
        .await
        .unwrap();

    assert!(!result.is_success());
    assert_eq!(
        result.status("sass"),
        Some(&TaskStatus::Failed {
            error: "Undefined variable: $red".into()
        })
    );
    assert_eq!(result.status("imgmin"), Some(&TaskStatus::Succeeded));
    assert_eq!(
        result.status("deploy"),
        Some(&TaskStatus::Skipped {
            reason: "prerequisite 'sass' failed".into()
        })
    );
    assert_eq!(recorder.count("start:deploy"), 0);

    let notifications = harness.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].title, "Compile Error");
    assert_eq!(notifications[0].task, "sass");

    let skipped: Vec<_> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskSkipped { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec!["deploy"]);
}

/// Test: skips propagate transitively
/// Given a chain a -> b -> c where a fails
/// When c is requested
/// Then b is skipped because a failed, and c because b was skipped
#[tokio::test]
async fn test_skip_propagates_down_a_chain() {
    let recorder = Recorder::new();
    let harness = SchedulerHarness::new(vec![
        failing_task("a", &[], "boom"),
        recording_task(&recorder, "b", &["a"], 0),
        recording_task(&recorder, "c", &["b"], 0),
    ]);

    let result = harness.scheduler.run_tasks(&["c"]).await.unwrap();
    assert_eq!(result.failed(), 1);
    assert_eq!(result.skipped(), 2);
    assert_eq!(
        result.status("c"),
        Some(&TaskStatus::Skipped {
            reason: "prerequisite 'b' was skipped".into()
        })
    );
    assert!(recorder.entries().is_empty());
}

/// Test: a panicking action is contained
/// Given a task that panics next to one that succeeds
/// When both run
/// Then the panic becomes a failed status and the sibling still succeeds
#[tokio::test]
async fn test_panic_is_isolated() {
    let recorder = Recorder::new();
    let harness = SchedulerHarness::new(vec![
        Task::new("explode").with_action(|_ctx| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        }),
        recording_task(&recorder, "steady", &[], 10),
    ]);

    let result = harness
        .scheduler
        .run_tasks(&["explode", "steady"])
        .await
        .unwrap();
    assert!(matches!(
        result.status("explode"),
        Some(TaskStatus::Failed { error }) if error.contains("kaboom")
    ));
    assert_eq!(result.status("steady"), Some(&TaskStatus::Succeeded));
    assert_eq!(harness.notifier.notifications().len(), 1);
}

/// Test: a shared prerequisite runs once
/// Given two requested tasks that both need the same prerequisite
/// When they run together
/// Then the prerequisite's action is invoked exactly once
#[tokio::test]
async fn test_shared_prerequisite_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let harness = SchedulerHarness::new(vec![
        Task::new("clean").with_action(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        Task::new("css").with_prerequisite("clean"),
        Task::new("js").with_prerequisite("clean"),
    ]);

    let result = harness.scheduler.run_tasks(&["css", "js"]).await.unwrap();
    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test: graph errors are fatal and up front
/// Given a cycle, an unknown prerequisite, and an unknown request
/// Then registration, freezing and resolution fail respectively
#[tokio::test]
async fn test_graph_errors() {
    let mut registry = TaskRegistry::new();
    registry.register(Task::new("a").with_prerequisite("b")).unwrap();
    let err = registry.register(Task::new("b").with_prerequisite("a")).unwrap_err();
    assert!(matches!(err, Error::CyclicDependency { .. }));

    let mut registry = TaskRegistry::new();
    registry.register(Task::new("a").with_prerequisite("ghost")).unwrap();
    assert!(matches!(
        registry.freeze(),
        Err(Error::UnknownTask { ref name, .. }) if name == "ghost"
    ));

    let harness = SchedulerHarness::with_registry(registry_of(vec![Task::new("a")]));
    let err = harness.scheduler.run_tasks(&["missing"]).await.unwrap_err();
    assert!(matches!(err, Error::UnknownTask { ref name, required_by: None } if name == "missing"));
}

/// Test: shutdown stops pending groups
/// Given a two-group plan
/// When the scheduler shuts down while the first group runs
/// Then the first task settles and the second is skipped as cancelled
#[tokio::test]
async fn test_shutdown_skips_later_groups() {
    let recorder = Recorder::new();
    let harness = SchedulerHarness::new(vec![
        recording_task(&recorder, "slow", &[], 50),
        recording_task(&recorder, "after", &["slow"], 0),
    ]);

    let scheduler = harness.scheduler.clone();
    let run = tokio::spawn(async move { scheduler.run_tasks(&["after"]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.scheduler.shutdown();

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.status("slow"), Some(&TaskStatus::Succeeded));
    assert_eq!(
        result.status("after"),
        Some(&TaskStatus::Skipped {
            reason: "run cancelled".into()
        })
    );
}

/// Test: the result serializes for `run --json`
#[tokio::test]
async fn test_run_result_json() {
    let harness = SchedulerHarness::new(vec![failing_task("sass", &[], "bad")]);
    let result = harness.scheduler.run_tasks(&["sass"]).await.unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["reports"][0]["name"], "sass");
    assert_eq!(json["reports"][0]["status"]["state"], "failed");
    assert_eq!(json["reports"][0]["status"]["error"], "bad");
    tokio_test::assert_ok!(serde_json::to_string(&result));
}
