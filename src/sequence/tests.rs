use crate::{
    task::Task,
    util::{
        executor::ManualExecutor,
        test::{finish, manual, Counter, Log},
        trace_init,
    },
};
use deferred_util::sync::Mutex;
use std::sync::Arc;

#[test]
fn and_then_pairs_both_results() {
    let _trace = trace_init();
    let log = Log::new();
    let task = Task::ready(2).and_then(|value| {
        let squared = value * value;
        Task::ready(format!("{value} squared is {squared}"))
    });
    {
        let log = log.clone();
        task.subscribe(move |pair| log.push(pair));
    }
    assert_eq!(
        test_dbg!(log.values()),
        vec![(2, "2 squared is 4".to_string())]
    );
}

#[test]
fn then_keeps_the_second_result() {
    let _trace = trace_init();
    let log = Log::new();
    let task = Task::ready("a").then(|first| Task::ready(first.len()));
    {
        let log = log.clone();
        task.subscribe(move |value| log.push(value));
    }
    assert_eq!(log.values(), vec![1]);
}

#[test]
fn generator_runs_once_after_the_first_result() {
    let _trace = trace_init();
    let generated = Counter::new();
    let hooks = Log::new();
    let (first, first_sink) = manual::<usize>();
    let (second, second_sink) = manual::<&str>();

    let task = first
        .and_then({
            let generated = generated.clone();
            move |_| {
                generated.incr();
                second
            }
        })
        .before_complete({
            let hooks = hooks.clone();
            move |pair| hooks.push(format!("before {pair:?}"))
        })
        .after_complete({
            let hooks = hooks.clone();
            move |pair| hooks.push(format!("after {pair:?}"))
        });
    {
        let hooks = hooks.clone();
        task.subscribe(move |pair| hooks.push(format!("complete {pair:?}")));
    }
    assert_eq!(
        generated.get(),
        0,
        "the generator waits for the first result"
    );

    finish(&first_sink, 1);
    assert_eq!(generated.get(), 1);
    assert!(
        hooks.values().is_empty(),
        "completion waits for the second task"
    );

    finish(&second_sink, "two");
    assert_eq!(generated.get(), 1);
    assert_eq!(
        hooks.values(),
        vec![
            "before (1, \"two\")",
            "complete (1, \"two\")",
            "after (1, \"two\")"
        ]
    );
}

#[test]
fn dropping_the_sequence_before_the_first_result_skips_the_generator() {
    let _trace = trace_init();
    let generated = Counter::new();
    let first_done = Log::new();
    let completed = Log::new();
    let (first, first_sink) = manual::<usize>();
    let first = first.after_complete({
        let first_done = first_done.clone();
        move |value| first_done.push(*value)
    });

    let task = first
        .and_then({
            let generated = generated.clone();
            move |value| {
                generated.incr();
                Task::ready(*value)
            }
        })
        .weakify();
    {
        let completed = completed.clone();
        task.subscribe(move |pair| completed.push(pair));
    }
    drop(task);

    finish(&first_sink, 3);
    assert_eq!(
        first_done.values(),
        vec![3],
        "the first task runs to completion"
    );
    assert_eq!(generated.get(), 0);
    assert!(completed.values().is_empty());
}

#[test]
fn dropping_the_sequence_cancels_the_second_task() {
    let _trace = trace_init();
    let stopped = Counter::new();
    let completed = Log::new();
    let sink = Arc::new(Mutex::new(None));
    let second = Task::with_cancel(
        {
            let sink = sink.clone();
            move |done| sink.with_lock(|slot| *slot = Some(done))
        },
        {
            let stopped = stopped.clone();
            move || stopped.incr()
        },
    );

    let task = Task::ready(()).and_then(move |()| second).weakify();
    {
        let completed = completed.clone();
        task.subscribe(move |pair: ((), usize)| completed.push(pair));
    }
    assert_eq!(stopped.get(), 0, "the cache holds the second task");

    drop(task);
    assert_eq!(stopped.get(), 1);
    finish(&sink, 1);
    assert!(completed.values().is_empty());
}

#[test]
fn second_task_is_released_after_completion() {
    let _trace = trace_init();
    let executor = ManualExecutor::new();
    let stopped = Counter::new();
    let completed = Log::new();
    let second = Task::with_cancel(|done| done.complete(2), {
        let stopped = stopped.clone();
        move || stopped.incr()
    })
    .with_work_queue(executor.queue());

    let task = Task::ready(1).and_then(move |_| second);
    {
        let completed = completed.clone();
        task.subscribe(move |pair| completed.push(pair));
    }
    assert_eq!(executor.run_all(), 1);
    assert_eq!(completed.values(), vec![(1, 2)]);
    assert_eq!(stopped.get(), 1, "the cache let go of the second task");
}
