// tests/store_admission.rs

use std::error::Error;

use serde_json::json;
use taskdag::dag::resolver::{find_blocked, find_ready};
use taskdag::dag::{SubtaskSpec, TaskSpec, TaskStore, TransitionUpdate};
use taskdag::errors::SchedulerError;
use taskdag::types::{TaskId, TaskStatus};
use taskdag_test_utils::{init_tracing, GraphBuilder};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn lone_task_is_admitted_ready() -> TestResult {
    init_tracing();
    let mut store = TaskStore::new();

    let id = store.create(TaskSpec::new("solo").payload(json!({"x": 1})))?;
    let task = store.task(id)?;

    assert_eq!(task.status, TaskStatus::Ready);
    assert_eq!(task.kind, "task");
    assert_eq!(task.payload, json!({"x": 1}));
    // CREATED -> READY is recorded even though it happens during admission.
    assert_eq!(task.history.len(), 1);
    assert_eq!(task.history[0].from, TaskStatus::Created);
    Ok(())
}

#[test]
fn task_with_dependencies_waits() -> TestResult {
    let mut store = TaskStore::new();

    let a = store.create(TaskSpec::new("a"))?;
    let b = store.create(TaskSpec::new("b").depends_on(a))?;

    assert_eq!(store.task(b)?.status, TaskStatus::WaitingForDependencies);
    assert_eq!(store.dependents_of(a), &[b]);
    assert!(find_ready(&store).is_empty());
    Ok(())
}

#[test]
fn unknown_dependency_is_rejected_without_registering() {
    let mut store = TaskStore::new();

    let err = store
        .create(TaskSpec::new("orphan").depends_on(TaskId(42)))
        .unwrap_err();

    assert!(matches!(err, SchedulerError::UnknownDependency { .. }));
    assert!(store.is_empty());
}

#[test]
fn ids_follow_submission_order() -> TestResult {
    let mut store = TaskStore::new();

    let ids: Vec<TaskId> = (0..5)
        .map(|i| store.create(TaskSpec::new(format!("t{i}"))))
        .collect::<Result<_, _>>()?;

    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    Ok(())
}

#[test]
fn two_node_cycle_is_rejected_and_nothing_exists() {
    init_tracing();
    let mut store = TaskStore::new();

    // B depends on A, A depends on B.
    let graph = GraphBuilder::new()
        .node("A", &["B"])
        .node("B", &["A"])
        .build();

    let err = store.create_graph(&graph, None).unwrap_err();

    assert!(matches!(err, SchedulerError::CycleDetected(_)));
    assert!(store.is_empty());
}

#[test]
fn self_dependency_is_a_cycle() {
    let mut store = TaskStore::new();
    let graph = GraphBuilder::new().node("A", &["A"]).build();

    let err = store.create_graph(&graph, None).unwrap_err();
    assert!(matches!(err, SchedulerError::CycleDetected(_)));
    assert!(store.is_empty());
}

#[test]
fn longer_cycle_in_a_larger_graph_rejects_the_whole_batch() {
    let mut store = TaskStore::new();
    let graph = GraphBuilder::new()
        .node("root", &[])
        .node("a", &["root", "c"])
        .node("b", &["a"])
        .node("c", &["b"])
        .node("leaf", &["root"])
        .build();

    assert!(matches!(
        store.create_graph(&graph, None),
        Err(SchedulerError::CycleDetected(_))
    ));
    assert!(store.is_empty());
}

#[test]
fn graph_ids_follow_descriptor_order_and_resolve_keys() -> TestResult {
    let mut store = TaskStore::new();
    let graph = GraphBuilder::new()
        .node("C", &["A", "B"])
        .node("A", &[])
        .node("B", &[])
        .build();

    let ids = store.create_graph(&graph, None)?;
    let (c, a, b) = (ids[0], ids[1], ids[2]);

    let c_task = store.task(c)?;
    assert_eq!(c_task.name, "C");
    assert_eq!(c_task.dependencies, vec![a, b]);
    assert_eq!(c_task.status, TaskStatus::WaitingForDependencies);
    assert_eq!(store.task(a)?.status, TaskStatus::Ready);
    assert_eq!(store.task(b)?.status, TaskStatus::Ready);
    Ok(())
}

#[test]
fn duplicate_and_unknown_keys_are_rejected() {
    let mut store = TaskStore::new();

    let dup = GraphBuilder::new().node("A", &[]).node("A", &[]).build();
    assert!(matches!(
        store.create_graph(&dup, None),
        Err(SchedulerError::DuplicateKey(key)) if key == "A"
    ));

    let unknown = GraphBuilder::new().node("A", &["ghost"]).build();
    assert!(matches!(
        store.create_graph(&unknown, None),
        Err(SchedulerError::UnknownDependency { dependency, .. }) if dependency == "ghost"
    ));

    assert!(store.is_empty());
}

#[test]
fn graph_members_may_depend_on_existing_tasks() -> TestResult {
    let mut store = TaskStore::new();
    let existing = store.create(TaskSpec::new("existing"))?;

    let graph = vec![SubtaskSpec::new("next", TaskSpec::new("next").depends_on(existing))];
    let ids = store.create_graph(&graph, None)?;

    assert_eq!(store.task(ids[0])?.dependencies, vec![existing]);
    Ok(())
}

#[test]
fn transition_is_compare_and_swap() -> TestResult {
    let mut store = TaskStore::new();
    let id = store.create(TaskSpec::new("t"))?;

    // Wrong expected status: nothing changes.
    let err = store
        .transition(id, &[TaskStatus::Running], TaskStatus::Completed, TransitionUpdate::none())
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidTransition {
            from: TaskStatus::Ready,
            to: TaskStatus::Completed,
            ..
        }
    ));
    assert_eq!(store.task(id)?.status, TaskStatus::Ready);

    // Expected status matches but the lifecycle has no such edge.
    assert!(
        store
            .transition(id, &[TaskStatus::Ready], TaskStatus::Completed, TransitionUpdate::none())
            .is_err()
    );

    store.transition(id, &[TaskStatus::Ready], TaskStatus::Running, TransitionUpdate::none())?;
    let done = store.transition(
        id,
        &[TaskStatus::Running],
        TaskStatus::Completed,
        TransitionUpdate::result(json!("ok")),
    )?;
    assert_eq!(done.result, Some(json!("ok")));
    assert!(done.completed_at.is_some());
    assert_eq!(done.dispatch_count, 1);

    // Terminal states never move again, not even to CANCELLED.
    assert!(
        store
            .transition(
                id,
                &[TaskStatus::Completed],
                TaskStatus::Cancelled,
                TransitionUpdate::none()
            )
            .is_err()
    );
    Ok(())
}

#[test]
fn failed_tasks_always_carry_an_error() -> TestResult {
    let mut store = TaskStore::new();
    let id = store.create(TaskSpec::new("t"))?;
    store.transition(id, &[TaskStatus::Ready], TaskStatus::Running, TransitionUpdate::none())?;
    let failed = store.transition(id, &[TaskStatus::Running], TaskStatus::Failed, TransitionUpdate::none())?;

    let error = failed.error.as_ref().expect("failed task has an error");
    assert!(!error.message.is_empty());
    Ok(())
}

#[test]
fn history_sequence_is_global() -> TestResult {
    let mut store = TaskStore::new();
    let a = store.create(TaskSpec::new("a"))?;
    let b = store.create(TaskSpec::new("b"))?;
    store.transition(b, &[TaskStatus::Ready], TaskStatus::Running, TransitionUpdate::none())?;
    store.transition(a, &[TaskStatus::Ready], TaskStatus::Running, TransitionUpdate::none())?;

    let a_running = store.task(a)?.first_entered(TaskStatus::Running).unwrap();
    let b_running = store.task(b)?.first_entered(TaskStatus::Running).unwrap();
    assert!(b_running < a_running);
    Ok(())
}

#[test]
fn resolver_honours_optional_failures() -> TestResult {
    let mut store = TaskStore::new();
    let critical = store.create(TaskSpec::new("critical"))?;
    let optional = store.create(TaskSpec::new("optional").optional(true))?;
    let after_critical = store.create(TaskSpec::new("x").depends_on(critical))?;
    let after_optional = store.create(TaskSpec::new("y").depends_on(optional))?;

    for id in [critical, optional] {
        store.transition(id, &[TaskStatus::Ready], TaskStatus::Running, TransitionUpdate::none())?;
        store.transition(id, &[TaskStatus::Running], TaskStatus::Failed, TransitionUpdate::none())?;
    }

    assert_eq!(find_ready(&store), vec![after_optional]);
    assert_eq!(find_blocked(&store), vec![(after_critical, critical)]);
    Ok(())
}

#[test]
fn oversized_timeout_saturates_instead_of_wrapping() {
    let spec = TaskSpec::new("forever").timeout(std::time::Duration::MAX);
    assert_eq!(spec.timeout_ms, Some(u64::MAX));

    let spec = TaskSpec::new("short").timeout(std::time::Duration::from_millis(1500));
    assert_eq!(spec.timeout_ms, Some(1500));
}

#[test]
fn subtask_waiting_on_an_ancestor_leaves_store_untouched() -> TestResult {
    let mut store = TaskStore::new();
    let root = store.create(TaskSpec::new("root"))?;
    let sibling = store.create(TaskSpec::new("sibling").depends_on(root))?;

    for dep in [root, sibling] {
        let specs = vec![SubtaskSpec::new("c", TaskSpec::new("c").depends_on(dep))];
        assert!(matches!(
            store.create_graph(&specs, Some(root)),
            Err(SchedulerError::CycleDetected(key)) if key == "c"
        ));
    }
    assert_eq!(store.len(), 2);

    let unrelated = store.create(TaskSpec::new("unrelated"))?;
    let specs = vec![SubtaskSpec::new("c", TaskSpec::new("c").depends_on(unrelated))];
    let ids = store.create_graph(&specs, Some(root))?;
    assert_eq!(store.task(ids[0])?.dependencies, vec![unrelated]);
    Ok(())
}
