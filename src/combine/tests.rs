use super::*;
use crate::util::{
    test::{finish, manual, Counter, Log},
    trace_init,
};
use proptest::prelude::*;

fn collect<T: Clone + Send + 'static>(task: &Task<T>) -> Log<T> {
    let log = Log::new();
    {
        let log = log.clone();
        task.subscribe(move |value| log.push(value));
    }
    log
}

#[test]
fn empty_input_completes_immediately() {
    let _trace = trace_init();
    let task = combine(Vec::<Task<usize>>::new());
    assert_eq!(collect(&task).values(), vec![Vec::<usize>::new()]);
    assert!(task.is_completed());
}

#[test]
fn reverse_completion_keeps_input_order() {
    let _trace = trace_init();
    let (tasks, sinks): (Vec<_>, Vec<_>) = (0..3).map(|_| manual::<usize>()).unzip();
    let combined = Task::combine_all(tasks);
    let log = collect(&combined);

    finish(&sinks[2], 3);
    finish(&sinks[1], 2);
    assert!(log.values().is_empty(), "waits for every child");
    finish(&sinks[0], 1);
    assert_eq!(test_dbg!(log.values()), vec![vec![1, 2, 3]]);
}

#[test]
fn dropping_the_combined_task_cancels_the_children() {
    let _trace = trace_init();
    let stopped = Counter::new();
    let children = (0..3)
        .map(|_| {
            let stopped = stopped.clone();
            Task::<usize>::with_cancel(|_done| {}, move || stopped.incr())
        })
        .collect::<Vec<_>>();

    let combined = combine(children).weakify();
    let log = collect(&combined);
    assert_eq!(stopped.get(), 0);

    drop(combined);
    assert_eq!(stopped.get(), 3);
    assert!(log.values().is_empty());
}

#[test]
fn combine_with_pairs_results() {
    let _trace = trace_init();
    let (left, left_sink) = manual::<usize>();
    let (right, right_sink) = manual::<&str>();
    let log = collect(&left.combine_with(right));

    finish(&right_sink, "right");
    assert!(log.values().is_empty());
    finish(&left_sink, 1);
    assert_eq!(log.values(), vec![(1, "right")]);
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Failure {
    Left,
    Right,
}

#[test]
fn combine_success_fails_early() {
    let _trace = trace_init();
    let stopped = Counter::new();
    let left = Task::<Result<usize, Failure>>::with_cancel(|_done| {}, {
        let stopped = stopped.clone();
        move || stopped.incr()
    });
    let (right, right_sink) = manual::<Result<usize, Failure>>();
    let log = collect(&left.combine_success(right));

    finish(&right_sink, Err(Failure::Right));
    assert_eq!(log.values(), vec![Err(Failure::Right)]);
    assert_eq!(stopped.get(), 1, "the unfinished child was released");
}

#[test]
fn combine_success_prefers_the_left_failure() {
    let _trace = trace_init();
    let task = Task::<Result<usize, Failure>>::failure(Failure::Left)
        .combine_success(Task::<Result<usize, Failure>>::failure(Failure::Right));
    assert_eq!(collect(&task).values(), vec![Err(Failure::Left)]);
}

#[test]
fn combine_success_succeeds_with_both_values() {
    let _trace = trace_init();
    let (left, left_sink) = manual::<Result<usize, Failure>>();
    let task = left.combine_success(Task::<Result<&str, Failure>>::success("b"));
    let log = collect(&task);
    assert!(log.values().is_empty());
    finish(&left_sink, Ok(1));
    assert_eq!(log.values(), vec![Ok((1, "b"))]);
}

proptest! {
    #[test]
    fn any_completion_order_keeps_input_order(
        order in (1usize..8).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let (tasks, sinks): (Vec<_>, Vec<_>) = order.iter().map(|_| manual::<usize>()).unzip();
        let log = collect(&combine(tasks));

        for &index in &order {
            prop_assert!(log.values().is_empty());
            finish(&sinks[index], index * 10);
        }

        let expected = (0..order.len()).map(|index| index * 10).collect::<Vec<_>>();
        prop_assert_eq!(log.values(), vec![expected]);
    }
}
