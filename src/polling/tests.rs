use super::*;
use crate::util::{
    executor::ManualExecutor,
    test::{finish, manual, Counter, Log},
    trace_init,
};
use proptest::prelude::*;

/// A generator whose attempts complete immediately with the attempt number.
fn counting(attempts: &Counter) -> impl Fn() -> Task<usize> + Send + Sync + 'static {
    let attempts = attempts.clone();
    move || {
        attempts.incr();
        Task::ready(attempts.get())
    }
}

fn collect<T: Clone + Send + 'static>(task: &Task<T>) -> Log<T> {
    let log = Log::new();
    {
        let log = log.clone();
        task.subscribe(move |value| log.push(value));
    }
    log
}

#[test]
fn stops_after_the_retry_count() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Counter::new();
    let responses = Log::new();

    let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
        .retry_count(3)
        .should_repeat(|_| true)
        .on_response({
            let responses = responses.clone();
            move |value| responses.push(*value)
        })
        .build();
    let log = collect(&polling.start());
    assert_eq!(attempts.get(), 1, "the first attempt starts right away");

    executor.run_all();
    assert_eq!(attempts.get(), 3);
    assert_eq!(test_dbg!(responses.values()), vec![1, 2, 3]);
    assert_eq!(log.values(), vec![3]);
}

#[test]
fn does_not_repeat_unless_asked_to() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Counter::new();

    let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
        .retry_count(5)
        .build();
    let log = collect(&polling.start());

    assert_eq!(executor.pending(), 0);
    assert_eq!(attempts.get(), 1);
    assert_eq!(log.values(), vec![1]);
}

#[test]
fn repeats_until_the_result_is_satisfactory() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Counter::new();

    let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
        .retry_count(10)
        .should_repeat(|value| *value < 4)
        .build();
    let log = collect(&polling.start());

    executor.run_all();
    assert_eq!(attempts.get(), 4);
    assert_eq!(log.values(), vec![4]);
}

#[test]
fn minimum_waiting_time_extends_the_retry_budget() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Counter::new();

    let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
        .retry_count(2)
        .minimum_waiting_time(Duration::from_secs(3600))
        .should_repeat(|value| *value < 5)
        .build();
    let log = collect(&polling.start());

    executor.run_all();
    assert_eq!(attempts.get(), 5);
    assert_eq!(log.values(), vec![5]);
}

#[test]
fn idle_interval_is_clamped() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Counter::new();

    let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
        .idle_interval(Duration::ZERO)
        .should_repeat(|_| true)
        .build();
    let _log = collect(&polling.start());

    assert_eq!(
        executor.delays(),
        vec![PollingTask::<usize>::MIN_IDLE_INTERVAL]
    );
}

#[test]
fn dropping_the_started_task_cancels_the_loop() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Counter::new();

    let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
        .retry_count(3)
        .should_repeat(|_| true)
        .build();
    let task = polling.start().weakify();
    let log = collect(&task);
    assert_eq!(executor.pending(), 1, "the second attempt is scheduled");

    drop(task);
    executor.run_all();
    assert_eq!(attempts.get(), 1, "no attempt starts after cancellation");
    assert!(log.values().is_empty());
}

#[test]
fn cancelling_during_an_attempt_suppresses_the_result() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Log::new();
    let responses = Counter::new();

    let generator = {
        let attempts = attempts.clone();
        move || {
            let (attempt, sink) = manual::<usize>();
            attempts.push((attempt.clone(), sink));
            attempt
        }
    };
    let polling = PollingTask::builder(Arc::new(executor.clone()), generator)
        .retry_count(3)
        .should_repeat(|_| true)
        .on_response({
            let responses = responses.clone();
            move |_| responses.incr()
        })
        .build();
    let task = polling.start().weakify();
    let log = collect(&task);
    assert_eq!(attempts.values().len(), 1, "the first attempt is in flight");

    drop(task);
    // The test's own handle keeps the attempt alive past the cancellation.
    let (attempt, sink) = attempts.values().remove(0);
    finish(&sink, 1);
    executor.run_all();

    assert_eq!(responses.get(), 0, "the late result is not observed");
    assert!(log.values().is_empty());
    assert_eq!(executor.pending(), 0, "nothing is rescheduled");
    assert_eq!(attempts.values().len(), 1);
    drop(attempt);
}

#[test]
fn every_start_runs_its_own_loop() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let attempts = Counter::new();

    let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
        .retry_count(2)
        .should_repeat(|_| true)
        .build();
    let first = polling.start().weakify();
    let first_log = collect(&first);
    let second_log = collect(&polling.start());
    drop(first);

    executor.run_all();
    assert_eq!(attempts.get(), 3, "two first attempts and one retry");
    assert!(first_log.values().is_empty());
    assert_eq!(second_log.values(), vec![3]);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "single attempt")]
fn retry_count_of_one_is_rejected() {
    let _trace = trace_init();
    let _ = PollingTask::builder(Arc::new(ManualExecutor::new()), || Task::ready(()))
        .retry_count(1)
        .build();
}

proptest! {
    #[test]
    fn always_repeating_makes_exactly_retry_count_attempts(retry_count in 2usize..16) {
        let executor = ManualExecutor::new();
        let attempts = Counter::new();
        let responses = Counter::new();

        let polling = PollingTask::builder(Arc::new(executor.clone()), counting(&attempts))
            .retry_count(retry_count)
            .should_repeat(|_| true)
            .on_response({
                let responses = responses.clone();
                move |_| responses.incr()
            })
            .build();
        let log = collect(&polling.start());
        executor.run_all();

        prop_assert_eq!(attempts.get(), retry_count);
        prop_assert_eq!(responses.get(), retry_count);
        prop_assert_eq!(log.values(), vec![retry_count]);
    }
}
