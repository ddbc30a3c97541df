// tests/core_runtime.rs

//! The core is exercised directly here: no tokio runtime, no executor.
//! Each test plays the role of the IO shell by reading the commands of a
//! step and feeding back the events an executor would produce.

use std::error::Error;
use std::time::Duration;

use serde_json::json;
use taskdag::dag::{SubtaskSpec, TaskSpec};
use taskdag::engine::{CoreCommand, CoreEvent, CoreRuntime, CoreStep, Dispatch, Outcome};
use taskdag::errors::FailureKind;
use taskdag::types::{AggregationPolicy, SchedulingPolicy, TaskId, TaskStatus};
use taskdag_test_utils::{driver_config, init_tracing, GraphBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn new_core(policy: SchedulingPolicy, concurrency: usize) -> CoreRuntime {
    init_tracing();
    CoreRuntime::new(&driver_config(policy, concurrency))
}

fn dispatches(step: &CoreStep) -> Vec<Dispatch> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Dispatch(d) => Some(d.clone()),
            _ => None,
        })
        .collect()
}

fn dispatched_ids(step: &CoreStep) -> Vec<TaskId> {
    dispatches(step).iter().map(|d| d.task.id).collect()
}

fn finish(core: &mut CoreRuntime, d: &Dispatch, outcome: Outcome) -> CoreStep {
    core.step(CoreEvent::ExecutionFinished {
        task: d.task.id,
        dispatch: d.dispatch,
        outcome,
    })
}

fn status(core: &CoreRuntime, id: TaskId) -> TaskStatus {
    core.task(id).map(|t| t.status).expect("task exists")
}

#[test]
fn advance_dispatches_up_to_capacity() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 2);
    let ids: Vec<TaskId> = (0..3)
        .map(|i| core.submit(TaskSpec::new(format!("t{i}"))))
        .collect::<Result<_, _>>()?;

    let step = core.advance();
    assert!(step.keep_running);
    assert_eq!(dispatched_ids(&step), vec![ids[0], ids[1]]);
    assert_eq!(status(&core, ids[2]), TaskStatus::Ready);

    // Nothing more to do until a slot frees up.
    assert!(dispatches(&core.advance()).is_empty());

    let first = dispatches(&step)[0].clone();
    let step = finish(&mut core, &first, Outcome::Success(json!(1)));
    assert_eq!(dispatched_ids(&step), vec![ids[2]]);
    assert_eq!(status(&core, ids[0]), TaskStatus::Completed);
    Ok(())
}

#[test]
fn dependents_are_promoted_after_completion() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Priority, 2);
    let ids = core.submit_graph(
        &GraphBuilder::new()
            .node("A", &[])
            .node("B", &[])
            .node("C", &["A", "B"])
            .build(),
    )?;
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    let step = core.advance();
    let running = dispatches(&step);
    assert_eq!(dispatched_ids(&step), vec![a, b]);
    assert_eq!(status(&core, c), TaskStatus::WaitingForDependencies);

    let step = finish(&mut core, &running[0], Outcome::Success(json!("a")));
    assert!(dispatches(&step).is_empty());
    assert_eq!(status(&core, c), TaskStatus::WaitingForDependencies);

    let step = finish(&mut core, &running[1], Outcome::Success(json!("b")));
    assert_eq!(dispatched_ids(&step), vec![c]);
    Ok(())
}

#[test]
fn failure_cascades_to_dependents_without_running_them() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let ids = core.submit_graph(
        &GraphBuilder::new()
            .node("A", &[])
            .node("B", &["A"])
            .node("C", &["B"])
            .build(),
    )?;

    let step = core.advance();
    let a = dispatches(&step)[0].clone();
    let step = finish(&mut core, &a, Outcome::Failure("boom".to_string()));

    assert!(dispatches(&step).is_empty());
    for id in &ids[1..] {
        let task = core.task(*id)?;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.dispatch_count, 0);
        assert_eq!(
            task.error.as_ref().map(|e| e.kind),
            Some(FailureKind::DependencyFailed)
        );
    }
    let a = core.task(ids[0])?;
    assert_eq!(a.error.as_ref().map(|e| e.message.as_str()), Some("boom"));
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn task_submitted_after_its_dependency_failed_is_failed_too() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let a = core.submit(TaskSpec::new("a"))?;
    let step = core.advance();
    finish(&mut core, &dispatches(&step)[0], Outcome::Failure("nope".into()));

    let late = core.submit(TaskSpec::new("late").depends_on(a))?;
    core.advance();

    assert_eq!(status(&core, late), TaskStatus::Failed);
    Ok(())
}

#[test]
fn stale_outcomes_are_discarded() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let id = core.submit(TaskSpec::new("t"))?;
    let step = core.advance();
    let d = dispatches(&step)[0].clone();

    let step = core.step(CoreEvent::ExecutionFinished {
        task: id,
        dispatch: d.dispatch + 100,
        outcome: Outcome::Success(json!(null)),
    });
    assert!(step.commands.is_empty());
    assert_eq!(status(&core, id), TaskStatus::Running);
    Ok(())
}

#[test]
fn slice_expiry_only_requests_a_yield() -> TestResult {
    let mut core = new_core(SchedulingPolicy::RoundRobin, 1);
    let a = core.submit(TaskSpec::new("a"))?;
    let b = core.submit(TaskSpec::new("b"))?;

    let step = core.advance();
    let d = dispatches(&step)[0].clone();
    assert_eq!(d.task.id, a);
    assert_eq!(d.time_slice, Some(Duration::from_millis(10)));

    let step = core.step(CoreEvent::SliceExpired {
        task: a,
        dispatch: d.dispatch,
    });
    assert!(matches!(
        step.commands.as_slice(),
        [CoreCommand::RequestYield { task, .. }] if *task == a
    ));
    // Still running until the executor actually yields.
    assert_eq!(status(&core, a), TaskStatus::Running);

    let step = finish(&mut core, &d, Outcome::Yielded);
    assert_eq!(dispatched_ids(&step), vec![b]);
    assert_eq!(status(&core, a), TaskStatus::Ready);
    assert_eq!(core.task(a)?.requeue_count(), 1);
    Ok(())
}

#[test]
fn preemption_requests_a_yield_only_when_full_and_strictly_more_urgent() -> TestResult {
    let mut core = new_core(SchedulingPolicy::PreemptivePriority, 1);
    let low = core.submit(TaskSpec::new("low").priority(5))?;
    let step = core.advance();
    let d = dispatches(&step)[0].clone();

    core.submit(TaskSpec::new("same").priority(5))?;
    assert!(core.advance().commands.is_empty());

    let high = core.submit(TaskSpec::new("high").priority(0))?;
    let step = core.advance();
    assert!(matches!(
        step.commands.as_slice(),
        [CoreCommand::RequestYield { task, .. }] if *task == low
    ));
    // Asked once only.
    assert!(core.advance().commands.is_empty());

    let step = finish(&mut core, &d, Outcome::Yielded);
    assert_eq!(dispatched_ids(&step), vec![high]);
    Ok(())
}

#[test]
fn deadline_fails_the_task_and_aborts_the_call() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let id = core.submit(TaskSpec::new("slow").timeout(Duration::from_millis(50)))?;
    let next = core.submit(TaskSpec::new("next"))?;

    let step = core.advance();
    let d = dispatches(&step)[0].clone();
    assert_eq!(d.deadline, Some(Duration::from_millis(50)));

    let step = core.step(CoreEvent::DeadlineExpired {
        task: id,
        dispatch: d.dispatch,
    });
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::Abort { task, .. } if *task == id)));
    assert_eq!(dispatched_ids(&step), vec![next]);

    let task = core.task(id)?;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_ref().map(|e| e.kind), Some(FailureKind::Timeout));

    // The late outcome changes nothing.
    finish(&mut core, &d, Outcome::Success(json!("late")));
    assert_eq!(status(&core, id), TaskStatus::Failed);
    Ok(())
}

#[test]
fn decomposition_parks_parent_until_children_finish() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 2);
    let parent = core.submit(TaskSpec::new("parent"))?;
    let step = core.advance();
    let d = dispatches(&step)[0].clone();

    let children = vec![
        SubtaskSpec::new("x", TaskSpec::new("x")),
        SubtaskSpec::new("y", TaskSpec::new("y")).after("x"),
    ];
    let step = finish(&mut core, &d, Outcome::Decomposition(children));

    let p = core.task(parent)?;
    assert_eq!(p.status, TaskStatus::WaitingForSubtasks);
    assert_eq!(p.children.len(), 2);
    let (x, y) = (p.children[0], p.children[1]);
    assert_eq!(core.task(x)?.parent_id, Some(parent));
    assert_eq!(core.task(y)?.dependencies, vec![x]);
    assert_eq!(dispatched_ids(&step), vec![x]);

    let step = finish(&mut core, &dispatches(&step)[0], Outcome::Success(json!(1)));
    assert_eq!(status(&core, parent), TaskStatus::WaitingForSubtasks);
    finish(&mut core, &dispatches(&step)[0], Outcome::Success(json!(2)));

    let p = core.task(parent)?;
    assert_eq!(p.status, TaskStatus::Completed);
    let result = p.result.clone().expect("aggregated result");
    assert_eq!(result["completed"], json!(2));
    assert_eq!(result["total"], json!(2));
    Ok(())
}

#[test]
fn empty_decomposition_completes_parent_immediately() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let parent = core.submit(TaskSpec::new("parent"))?;
    let step = core.advance();
    finish(&mut core, &dispatches(&step)[0], Outcome::Decomposition(Vec::new()));

    let p = core.task(parent)?;
    assert_eq!(p.status, TaskStatus::Completed);
    assert_eq!(p.result.as_ref().map(|r| r["total"].clone()), Some(json!(0)));
    Ok(())
}

#[test]
fn cyclic_decomposition_fails_parent_and_creates_nothing() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let parent = core.submit(TaskSpec::new("parent"))?;
    let step = core.advance();

    let cyclic = vec![
        SubtaskSpec::new("x", TaskSpec::new("x")).after("y"),
        SubtaskSpec::new("y", TaskSpec::new("y")).after("x"),
    ];
    finish(&mut core, &dispatches(&step)[0], Outcome::Decomposition(cyclic));

    let p = core.task(parent)?;
    assert_eq!(p.status, TaskStatus::Failed);
    assert_eq!(
        p.error.as_ref().map(|e| e.kind),
        Some(FailureKind::InvalidDecomposition)
    );
    assert_eq!(core.store().len(), 1);
    Ok(())
}

fn assert_invalid_decomposition(core: &CoreRuntime, id: TaskId) -> TestResult {
    let task = core.task(id)?;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error.as_ref().map(|e| e.kind),
        Some(FailureKind::InvalidDecomposition)
    );
    assert!(task.children.is_empty());
    Ok(())
}

#[test]
fn child_depending_on_its_own_parent_is_rejected() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let parent = core.submit(TaskSpec::new("parent"))?;
    let step = core.advance();

    let children = vec![SubtaskSpec::new("c", TaskSpec::new("c").depends_on(parent))];
    finish(&mut core, &dispatches(&step)[0], Outcome::Decomposition(children));

    assert_invalid_decomposition(&core, parent)?;
    assert_eq!(core.store().len(), 1);
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn child_depending_on_a_dependent_of_its_parent_is_rejected() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let parent = core.submit(TaskSpec::new("parent"))?;
    let waiter = core.submit(TaskSpec::new("waiter").depends_on(parent))?;
    let step = core.advance();
    assert_eq!(dispatched_ids(&step), vec![parent]);

    let children = vec![SubtaskSpec::new("c", TaskSpec::new("c").depends_on(waiter))];
    finish(&mut core, &dispatches(&step)[0], Outcome::Decomposition(children));

    assert_invalid_decomposition(&core, parent)?;
    assert_eq!(status(&core, waiter), TaskStatus::Failed);
    assert_eq!(core.store().len(), 2);
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn grandchild_depending_on_its_grandparent_is_rejected() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let root = core.submit(TaskSpec::new("root"))?;
    let step = core.advance();

    let step = finish(
        &mut core,
        &dispatches(&step)[0],
        Outcome::Decomposition(vec![SubtaskSpec::new("mid", TaskSpec::new("mid"))]),
    );
    let mid = core.task(root)?.children[0];
    assert_eq!(dispatched_ids(&step), vec![mid]);

    let children = vec![SubtaskSpec::new("leaf", TaskSpec::new("leaf").depends_on(root))];
    finish(&mut core, &dispatches(&step)[0], Outcome::Decomposition(children));

    assert_invalid_decomposition(&core, mid)?;
    assert!(core.task(root)?.is_terminal());
    assert_eq!(core.store().len(), 2);
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn child_may_depend_on_an_unrelated_task() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 2);
    let outside = core.submit(TaskSpec::new("outside"))?;
    let parent = core.submit(TaskSpec::new("parent"))?;
    let step = core.advance();
    let running = dispatches(&step);
    let find = |id: TaskId| running.iter().find(|d| d.task.id == id).cloned();
    let (outside_run, parent_run) = (find(outside), find(parent));
    let (Some(outside_run), Some(parent_run)) = (outside_run, parent_run) else {
        panic!("expected both tasks dispatched, got {:?}", dispatched_ids(&step));
    };

    let children = vec![SubtaskSpec::new("c", TaskSpec::new("c").depends_on(outside))];
    let step = finish(&mut core, &parent_run, Outcome::Decomposition(children));
    assert!(dispatched_ids(&step).is_empty());

    let p = core.task(parent)?;
    assert_eq!(p.status, TaskStatus::WaitingForSubtasks);
    let child = p.children[0];
    assert_eq!(core.task(child)?.dependencies, vec![outside]);
    assert_eq!(status(&core, child), TaskStatus::WaitingForDependencies);

    let step = finish(&mut core, &outside_run, Outcome::Success(json!("o")));
    assert_eq!(dispatched_ids(&step), vec![child]);
    finish(&mut core, &dispatches(&step)[0], Outcome::Success(json!("c")));

    assert_eq!(status(&core, parent), TaskStatus::Completed);
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn best_effort_parent_completes_despite_failed_child() -> TestResult {
    init_tracing();
    let mut config = driver_config(SchedulingPolicy::Fifo, 2);
    config.aggregation = AggregationPolicy::BestEffort;
    let mut core = CoreRuntime::new(&config);

    let parent = core.submit(TaskSpec::new("parent"))?;
    let step = core.advance();
    let children = vec![
        SubtaskSpec::new("x", TaskSpec::new("x")),
        SubtaskSpec::new("y", TaskSpec::new("y")),
    ];
    let step = finish(&mut core, &dispatches(&step)[0], Outcome::Decomposition(children));
    let running = dispatches(&step);

    finish(&mut core, &running[0], Outcome::Failure("x broke".into()));
    assert_eq!(status(&core, parent), TaskStatus::WaitingForSubtasks);
    finish(&mut core, &running[1], Outcome::Success(json!("y ok")));

    let p = core.task(parent)?;
    assert_eq!(p.status, TaskStatus::Completed);
    let result = p.result.clone().expect("aggregated result");
    assert_eq!(result["completed"], json!(1));
    assert_eq!(result["children"][0]["status"], json!("FAILED"));
    assert_eq!(result["children"][1]["result"], json!("y ok"));
    Ok(())
}

#[test]
fn cancelling_a_waiting_parent_cancels_its_children_first() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let parent = core.submit(TaskSpec::new("parent"))?;
    let step = core.advance();
    let children = vec![
        SubtaskSpec::new("x", TaskSpec::new("x")),
        SubtaskSpec::new("y", TaskSpec::new("y")),
    ];
    let step = finish(&mut core, &dispatches(&step)[0], Outcome::Decomposition(children));
    let x = dispatches(&step)[0].clone();

    assert!(core.cancel(parent)?);
    let step = core.advance();
    assert!(dispatches(&step).is_empty());
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::Abort { task, .. } if *task == x.task.id)));

    let p = core.task(parent)?;
    assert_eq!(p.status, TaskStatus::Cancelled);
    let parent_cancelled = p.first_entered(TaskStatus::Cancelled).unwrap();
    for child in p.children.clone() {
        let c = core.task(child)?;
        assert_eq!(c.status, TaskStatus::Cancelled);
        assert!(c.first_entered(TaskStatus::Cancelled).unwrap() < parent_cancelled);
    }

    // The running child's late outcome is ignored and no slot leaks.
    finish(&mut core, &x, Outcome::Success(json!(null)));
    assert!(core.is_idle());
    assert_eq!(core.stats().slots_in_use, 0);

    // Cancelling a terminal task is a no-op.
    assert!(!core.cancel(parent)?);
    Ok(())
}

#[test]
fn cancellation_propagates_to_dependents() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let ids = core.submit_graph(&GraphBuilder::new().node("A", &[]).node("B", &["A"]).build())?;
    core.cancel(ids[0])?;

    let b = core.task(ids[1])?;
    assert_eq!(b.status, TaskStatus::Cancelled);
    assert_eq!(
        b.error.as_ref().map(|e| e.kind),
        Some(FailureKind::CancellationRequested)
    );
    Ok(())
}

#[test]
fn goal_tasks_are_dispatched_with_goal_kind() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let root = core.submit_goal("ship it", json!({"goal": "ship it"}))?;
    let step = core.advance();

    let d = dispatches(&step)[0].clone();
    assert_eq!(d.task.id, root);
    assert_eq!(d.task.kind, "goal");
    assert_eq!(d.task.payload, json!({"goal": "ship it"}));
    Ok(())
}

#[test]
fn strategy_switch_keeps_queued_tasks() -> TestResult {
    let mut core = new_core(SchedulingPolicy::Fifo, 1);
    let first = core.submit(TaskSpec::new("first").priority(9))?;
    let step = core.advance();
    let running = dispatches(&step)[0].clone();
    assert_eq!(running.task.id, first);

    let late_low = core.submit(TaskSpec::new("late_low").priority(9))?;
    let urgent = core.submit(TaskSpec::new("urgent").priority(1))?;

    core.set_strategy(SchedulingPolicy::Priority);
    assert_eq!(core.policy(), SchedulingPolicy::Priority);
    assert_eq!(status(&core, first), TaskStatus::Running);

    let step = finish(&mut core, &running, Outcome::Success(json!(null)));
    assert_eq!(dispatched_ids(&step), vec![urgent]);
    assert_eq!(status(&core, late_low), TaskStatus::Ready);
    Ok(())
}

#[test]
fn exit_when_idle_requests_exit() -> TestResult {
    init_tracing();
    let mut config = driver_config(SchedulingPolicy::Fifo, 1);
    config.exit_when_idle = true;
    let mut core = CoreRuntime::new(&config);

    core.submit(TaskSpec::new("only"))?;
    let step = core.advance();
    assert!(step.keep_running);

    let step = finish(&mut core, &dispatches(&step)[0], Outcome::Success(json!(null)));
    assert!(!step.keep_running);
    assert!(matches!(step.commands.last(), Some(CoreCommand::RequestExit)));
    Ok(())
}
