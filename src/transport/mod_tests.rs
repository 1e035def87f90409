use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use yare::parameterized;

#[parameterized(
    exact = { "test/temp", "test/temp", true },
    exact_mismatch = { "test/temp", "test/humidity", false },
    single_level = { "$aws/things/pi/jobs/+/update/accepted", "$aws/things/pi/jobs/job-1/update/accepted", true },
    single_level_needs_a_level = { "a/+/c", "a/c", false },
    multi_level = { "$aws/things/pi/#", "$aws/things/pi/jobs/notify-next", true },
    multi_level_parent = { "a/#", "a", true },
    longer_topic = { "a/b", "a/b/c", false },
    longer_filter = { "a/b/c", "a/b", false },
)]
fn filter_matching(filter: &str, topic: &str, expected: bool) {
    assert_eq!(topic_matches(filter, topic), expected);
}

#[test]
fn qos_codes() {
    assert_eq!(QoS::from_i32(QoS::AtLeastOnce.as_i32()), Some(QoS::AtLeastOnce));
    assert_eq!(QoS::from_i32(0x80), None);
}

#[test]
fn dispatch_runs_matching_handlers_only() {
    let subs = Subscriptions::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    subs.insert(
        "jobs/+/update/accepted",
        QoS::AtLeastOnce,
        Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    subs.insert("jobs/notify-next", QoS::AtLeastOnce, Arc::new(|_, _| panic!("wrong handler")));

    assert_eq!(subs.dispatch("jobs/42/update/accepted", b"{}"), 1);
    assert_eq!(subs.dispatch("jobs/42/update/rejected", b"{}"), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn insert_replaces_same_filter() {
    let subs = Subscriptions::new();
    subs.insert("a", QoS::AtMostOnce, Arc::new(|_, _| {}));
    subs.insert("b", QoS::AtLeastOnce, Arc::new(|_, _| {}));
    subs.insert("a", QoS::AtLeastOnce, Arc::new(|_, _| {}));

    assert_eq!(
        subs.filters(),
        vec![
            ("b".to_string(), QoS::AtLeastOnce),
            ("a".to_string(), QoS::AtLeastOnce)
        ]
    );

    subs.remove("b");
    assert_eq!(subs.filters().len(), 1);
}

#[test]
fn handler_may_register_during_dispatch() {
    let subs = Arc::new(Subscriptions::new());
    let inner = Arc::clone(&subs);
    subs.insert(
        "first",
        QoS::AtLeastOnce,
        Arc::new(move |_, _| inner.insert("second", QoS::AtLeastOnce, Arc::new(|_, _| {}))),
    );

    subs.dispatch("first", b"");
    assert_eq!(subs.filters().len(), 2);
}
