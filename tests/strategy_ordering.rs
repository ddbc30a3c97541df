// tests/strategy_ordering.rs

use std::error::Error;
use std::time::Duration;

use taskdag::dag::{strategy_for, Task, TaskSpec, TaskStore, TransitionUpdate};
use taskdag::types::{SchedulingPolicy, TaskId, TaskStatus};

type TestResult = Result<(), Box<dyn Error>>;

const SLICE: Duration = Duration::from_millis(10);

fn ready<'a>(store: &'a TaskStore) -> Vec<&'a Task> {
    store.with_status(TaskStatus::Ready)
}

fn select(store: &TaskStore, policy: SchedulingPolicy, capacity: usize) -> Vec<TaskId> {
    strategy_for(policy, SLICE).select_next(&ready(store), capacity)
}

#[test]
fn fifo_dispatches_in_submission_order() -> TestResult {
    let mut store = TaskStore::new();
    let a = store.create(TaskSpec::new("a").priority(9))?;
    let b = store.create(TaskSpec::new("b").priority(1))?;
    let c = store.create(TaskSpec::new("c").priority(5))?;

    assert_eq!(select(&store, SchedulingPolicy::Fifo, 10), vec![a, b, c]);
    assert_eq!(select(&store, SchedulingPolicy::Fifo, 2), vec![a, b]);
    Ok(())
}

#[test]
fn priority_orders_by_value_then_submission() -> TestResult {
    let mut store = TaskStore::new();
    let a = store.create(TaskSpec::new("a").priority(3))?;
    let b = store.create(TaskSpec::new("b").priority(1))?;
    let c = store.create(TaskSpec::new("c").priority(3))?;
    let d = store.create(TaskSpec::new("d").priority(-2))?;

    assert_eq!(select(&store, SchedulingPolicy::Priority, 10), vec![d, b, a, c]);
    assert_eq!(
        select(&store, SchedulingPolicy::PreemptivePriority, 10),
        vec![d, b, a, c]
    );
    Ok(())
}

#[test]
fn equal_priorities_dispatch_in_submission_order() -> TestResult {
    let mut store = TaskStore::new();
    let ids: Vec<TaskId> = (0..6)
        .map(|i| store.create(TaskSpec::new(format!("t{i}")).priority(7)))
        .collect::<Result<_, _>>()?;

    assert_eq!(select(&store, SchedulingPolicy::Priority, 10), ids);
    Ok(())
}

#[test]
fn shortest_job_first_puts_unknown_estimates_last() -> TestResult {
    let mut store = TaskStore::new();
    let unknown = store.create(TaskSpec::new("unknown"))?;
    let long = store.create(TaskSpec::new("long").estimated_time(10.0))?;
    let short = store.create(TaskSpec::new("short").estimated_time(0.5))?;
    let tie = store.create(TaskSpec::new("tie").estimated_time(0.5))?;

    assert_eq!(
        select(&store, SchedulingPolicy::ShortestJobFirst, 10),
        vec![short, tie, long, unknown]
    );
    Ok(())
}

#[test]
fn round_robin_sends_requeued_tasks_to_the_back() -> TestResult {
    let mut store = TaskStore::new();
    let a = store.create(TaskSpec::new("a"))?;
    let b = store.create(TaskSpec::new("b"))?;
    let c = store.create(TaskSpec::new("c"))?;

    // `a` runs one slice and yields.
    store.transition(a, &[TaskStatus::Ready], TaskStatus::Running, TransitionUpdate::none())?;
    store.transition(a, &[TaskStatus::Running], TaskStatus::Ready, TransitionUpdate::none())?;

    assert_eq!(select(&store, SchedulingPolicy::RoundRobin, 10), vec![b, c, a]);
    // Plain FIFO ignores the requeue.
    assert_eq!(select(&store, SchedulingPolicy::Fifo, 10), vec![a, b, c]);
    Ok(())
}

#[test]
fn only_round_robin_grants_a_time_slice() {
    for policy in [
        SchedulingPolicy::Fifo,
        SchedulingPolicy::Priority,
        SchedulingPolicy::PreemptivePriority,
        SchedulingPolicy::ShortestJobFirst,
    ] {
        assert_eq!(strategy_for(policy, SLICE).time_slice(), None, "{policy}");
    }
    assert_eq!(
        strategy_for(SchedulingPolicy::RoundRobin, SLICE).time_slice(),
        Some(SLICE)
    );
}

#[test]
fn preemption_picks_least_urgent_running_task() -> TestResult {
    let mut store = TaskStore::new();
    let low = store.create(TaskSpec::new("low").priority(5))?;
    let mid = store.create(TaskSpec::new("mid").priority(3))?;
    for id in [low, mid] {
        store.transition(id, &[TaskStatus::Ready], TaskStatus::Running, TransitionUpdate::none())?;
    }
    let urgent = store.create(TaskSpec::new("urgent").priority(0))?;
    let equal = store.create(TaskSpec::new("equal").priority(5))?;

    let running = store.with_status(TaskStatus::Running);
    let strategy = strategy_for(SchedulingPolicy::PreemptivePriority, SLICE);

    let contenders = vec![store.task(urgent)?];
    assert_eq!(strategy.preemption_victim(&contenders, &running), Some(low));

    // Not strictly more urgent: no preemption.
    let contenders = vec![store.task(equal)?];
    assert_eq!(strategy.preemption_victim(&contenders, &running), None);

    // Non-preemptive strategies never preempt.
    let contenders = vec![store.task(urgent)?];
    let priority = strategy_for(SchedulingPolicy::Priority, SLICE);
    assert_eq!(priority.preemption_victim(&contenders, &running), None);
    Ok(())
}

#[test]
fn policy_names_parse_with_aliases() {
    assert_eq!("fifo".parse::<SchedulingPolicy>(), Ok(SchedulingPolicy::Fifo));
    assert_eq!(
        "Round-Robin".parse::<SchedulingPolicy>(),
        Ok(SchedulingPolicy::RoundRobin)
    );
    assert_eq!(
        "sjf".parse::<SchedulingPolicy>(),
        Ok(SchedulingPolicy::ShortestJobFirst)
    );
    assert_eq!(
        "preemptive".parse::<SchedulingPolicy>(),
        Ok(SchedulingPolicy::PreemptivePriority)
    );
    assert!("lottery".parse::<SchedulingPolicy>().is_err());
    assert_eq!(SchedulingPolicy::default(), SchedulingPolicy::Priority);
}
