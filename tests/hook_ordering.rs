//! Hook invocation order, dependency dedup and background dispatch

mod common;

use common::{counting_hook, drift_operator, step_times, wait_until, Recorder};
use dirigir::{FnHook, HookTarget, TimeScale, TimeStep};
use std::sync::Arc;
use std::time::Duration;

/// Priorities order independent hooks; required hooks precede dependents
/// regardless of priority (scenario: A prio 10, B prio 0, C prio 5
/// requiring A fires as B, A, C)
#[test]
fn priority_and_dependency_order() {
    let (operator, _) = drift_operator(1, 2, 1.0);
    let recorder = Recorder::new();

    let a = {
        let recorder = recorder.clone();
        Arc::new(
            FnHook::new("a", TimeStep::every(1, TimeScale::Iteration), move |_, _| {
                recorder.record("a");
            })
            .with_priority(10),
        )
    };
    let b = {
        let recorder = recorder.clone();
        Arc::new(
            FnHook::new("b", TimeStep::every(1, TimeScale::Iteration), move |_, _| {
                recorder.record("b");
            })
            .with_priority(0),
        )
    };
    let c = {
        let recorder = recorder.clone();
        Arc::new(
            FnHook::new("c", TimeStep::every(1, TimeScale::Iteration), move |_, _| {
                recorder.record("c");
            })
            .with_priority(5)
            .requires(a.clone()),
        )
    };

    operator.attach_local_hook(a).unwrap();
    operator.attach_local_hook(b).unwrap();
    operator.attach_local_hook(c).unwrap();

    step_times(&operator, 1);

    assert_eq!(recorder.events(), vec!["b", "a", "c"]);
}

/// Two hooks requiring functionally equal hooks share one attachment,
/// which is collected only when its last dependent detaches
#[test]
fn required_hook_dedup_and_orphan_collection() {
    let (operator, _) = drift_operator(1, 2, 1.0);
    let recorder = Recorder::new();

    let shared_a = counting_hook(&recorder, "r", TimeStep::every(1, TimeScale::Iteration));
    let shared_b = counting_hook(&recorder, "r", TimeStep::every(1, TimeScale::Iteration));
    let h1 = {
        let recorder = recorder.clone();
        Arc::new(
            FnHook::new("h1", TimeStep::every(1, TimeScale::Iteration), move |_, _| {
                recorder.record("h1");
            })
            .requires(shared_a),
        )
    };
    let h2 = {
        let recorder = recorder.clone();
        Arc::new(
            FnHook::new("h2", TimeStep::every(1, TimeScale::Iteration), move |_, _| {
                recorder.record("h2");
            })
            .requires(shared_b),
        )
    };

    operator.attach_local_hook(h1.clone()).unwrap();
    operator.attach_local_hook(h2.clone()).unwrap();
    // h1, h2 and one shared requirement
    assert_eq!(operator.attached_hook_count(HookTarget::Local), 3);

    step_times(&operator, 1);

    // The requirement ran once, before both dependents
    let events = recorder.events();
    assert_eq!(events.iter().filter(|e| *e == "r").count(), 1);
    let r_at = events.iter().position(|e| e == "r").unwrap();
    assert!(r_at < events.iter().position(|e| e == "h1").unwrap());
    assert!(r_at < events.iter().position(|e| e == "h2").unwrap());

    // Detaching h1 keeps the requirement; detaching h2 collects it
    assert!(operator.detach_local_hook(h1.as_ref()).unwrap());
    assert_eq!(operator.attached_hook_count(HookTarget::Local), 2);
    assert!(operator.detach_local_hook(h2.as_ref()).unwrap());
    assert_eq!(operator.attached_hook_count(HookTarget::Local), 0);
}

/// Background hooks observe a snapshot of the event registry; hooks of
/// the same event see identical snapshot contents
#[test]
fn background_hooks_see_snapshot() {
    let (operator, _) = drift_operator(1, 3, 1.0);
    let observed = Recorder::new();

    let make_observer = |name: &str| {
        let observed = observed.clone();
        let label = name.to_string();
        Arc::new(
            FnHook::new(name, TimeStep::limited(1, TimeScale::Iteration, 1), move |registry, _| {
                let epoch = registry.get("epoch").and_then(|v| v.as_int()).unwrap_or(-1);
                let iteration = registry
                    .get("iteration")
                    .and_then(|v| v.as_int())
                    .unwrap_or(-1);
                observed.record(format!("{label}:{epoch}/{iteration}"));
            })
            .in_background()
            .with_required_keys(["epoch", "iteration"]),
        )
    };

    operator
        .attach_local_hook(make_observer("first"))
        .unwrap();
    operator
        .attach_local_hook(make_observer("second"))
        .unwrap();

    step_times(&operator, 1);

    assert!(wait_until(Duration::from_secs(5), || observed.events().len() == 2));
    let events = observed.events();
    // Both buckets saw the same event state: epoch 1, iteration 0 (the
    // iteration counter advances after the event fires)
    assert!(events.contains(&"first:1/0".to_string()));
    assert!(events.contains(&"second:1/0".to_string()));
}

/// A background hook required by a foreground hook is promoted and runs
/// synchronously before its dependent
#[test]
fn background_promoted_by_foreground_dependent() {
    let (operator, _) = drift_operator(1, 2, 1.0);
    let recorder = Recorder::new();

    let produced = {
        let recorder = recorder.clone();
        Arc::new(
            FnHook::new(
                "producer",
                TimeStep::every(1, TimeScale::Iteration),
                move |_, _| {
                    recorder.record("producer");
                },
            )
            .in_background(),
        )
    };
    let consumer = {
        let recorder = recorder.clone();
        Arc::new(
            FnHook::new(
                "consumer",
                TimeStep::every(1, TimeScale::Iteration),
                move |_, _| {
                    recorder.record("consumer");
                },
            )
            .requires(produced.clone()),
        )
    };

    operator.attach_local_hook(consumer).unwrap();

    step_times(&operator, 1);

    // Synchronous order on the worker thread, no waiting needed
    assert_eq!(recorder.events(), vec!["producer", "consumer"]);
}

/// A hook with bounded live time fires exactly that many times, then is
/// detached automatically
#[test]
fn bounded_live_time_fires_exactly_n_times() {
    let (operator, _) = drift_operator(1, 4, 1.0);
    let recorder = Recorder::new();

    let hook = counting_hook(
        &recorder,
        "limited",
        TimeStep::limited(1, TimeScale::Iteration, 3),
    );
    operator.attach_local_hook(hook).unwrap();
    assert_eq!(operator.attached_hook_count(HookTarget::Local), 1);

    step_times(&operator, 6);

    assert_eq!(recorder.count("limited"), 3);
    assert_eq!(operator.attached_hook_count(HookTarget::Local), 0);
}

/// Interval spacing: a hook firing every second iteration
#[test]
fn interval_spacing() {
    let (operator, _) = drift_operator(1, 6, 1.0);
    let recorder = Recorder::new();

    let every_second = counting_hook(
        &recorder,
        "sparse",
        TimeStep::every(2, TimeScale::Iteration),
    );
    operator.attach_local_hook(every_second).unwrap();

    step_times(&operator, 5);
    assert_eq!(recorder.count("sparse"), 2);
}
