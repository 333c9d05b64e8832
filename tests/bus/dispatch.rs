//! Dispatcher delivery tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use pooled_bus::{Dispatcher, DispatcherConfig, EventKind, SubscriptionId};

use crate::support::{init_logging, Recorder, WAIT};

// ============================================================================
// Test 1: Int subscriber receives the published value
// ============================================================================

#[test]
fn int_event_reaches_subscriber() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    let log = Recorder::new();

    let sink = log.clone();
    bus.subscribe(1, move |value: Arc<i32>| sink.push(*value));

    bus.publish(1, 42i32).unwrap();
    assert!(bus.flush(WAIT));
    assert_eq!(log.entries(), vec![42]);
}

// ============================================================================
// Test 2: String subscriber receives the published text
// ============================================================================

#[test]
fn string_event_reaches_subscriber() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    let log = Recorder::new();

    let sink = log.clone();
    bus.subscribe(2, move |text: Arc<String>| sink.push(text.as_str().to_owned()));

    bus.publish(2, String::from("hello, bus")).unwrap();
    assert!(bus.flush(WAIT));
    assert_eq!(log.entries(), vec!["hello, bus".to_string()]);
}

// ============================================================================
// Test 3: Every handler runs exactly once, in registration order
// ============================================================================

#[test]
fn handlers_run_once_in_registration_order() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    let log = Recorder::new();

    for index in 0..5 {
        let sink = log.clone();
        bus.subscribe(7, move |value: Arc<u64>| sink.push((index, *value)));
    }
    assert_eq!(bus.subscriber_count(7), 5);

    bus.publish(7, 99u64).unwrap();
    let stats = bus.shutdown();

    assert_eq!(
        log.entries(),
        vec![(0, 99), (1, 99), (2, 99), (3, 99), (4, 99)]
    );
    assert_eq!(stats.delivered, 5);
    assert_eq!(stats.dispatched, 1);
}

// ============================================================================
// Test 4: Kind with no subscribers is a no-op and the payload is released
// ============================================================================

#[test]
fn unrouted_event_is_released() {
    init_logging();
    let bus = Dispatcher::new().unwrap();

    let payload = Arc::new(String::from("into the void"));
    let weak: Weak<String> = Arc::downgrade(&payload);
    bus.publish_shared(3, payload).unwrap();

    assert!(bus.flush(WAIT));
    assert!(weak.upgrade().is_none(), "payload still held after delivery");

    let stats = bus.stats();
    assert_eq!(stats.unrouted, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.handler_panics + stats.handler_failures, 0);
}

// ============================================================================
// Test 5: Concurrent publishers lose and duplicate nothing
// ============================================================================

#[test]
fn concurrent_publishers_lose_nothing() {
    init_logging();
    const PUBLISHERS: usize = 8;
    const PER_PUBLISHER: usize = 250;

    let bus = Dispatcher::new().unwrap();
    let log = Recorder::new();

    let sink = log.clone();
    bus.subscribe(1, move |event: Arc<(usize, usize)>| sink.push(*event));

    thread::scope(|scope| {
        for publisher in 0..PUBLISHERS {
            let bus = &bus;
            scope.spawn(move || {
                for n in 0..PER_PUBLISHER {
                    bus.publish(1, (publisher, n)).unwrap();
                }
            });
        }
    });

    let stats = bus.shutdown();
    let total = (PUBLISHERS * PER_PUBLISHER) as u64;
    assert_eq!(stats.published, total);
    assert_eq!(stats.dispatched, total);
    assert_eq!(log.len(), PUBLISHERS * PER_PUBLISHER);

    // Each publisher's events arrive in the order it published them.
    let mut per_publisher: HashMap<usize, Vec<usize>> = HashMap::new();
    for (publisher, n) in log.entries() {
        per_publisher.entry(publisher).or_default().push(n);
    }
    assert_eq!(per_publisher.len(), PUBLISHERS);
    for sequence in per_publisher.values() {
        assert_eq!(*sequence, (0..PER_PUBLISHER).collect::<Vec<_>>());
    }
}

// ============================================================================
// Test 6: A panicking handler does not stop the drain loop
// ============================================================================

#[test]
fn panicking_handler_is_isolated() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    let survivors = Arc::new(AtomicUsize::new(0));

    bus.subscribe(4, |_: Arc<u8>| panic!("handler blew up"));
    let s = Arc::clone(&survivors);
    bus.subscribe(4, move |_: Arc<u8>| {
        s.fetch_add(1, Ordering::SeqCst);
    });

    for n in 0..3u8 {
        bus.publish(4, n).unwrap();
    }
    let stats = bus.shutdown();

    assert_eq!(survivors.load(Ordering::SeqCst), 3);
    assert_eq!(stats.handler_panics, 3);
    assert_eq!(stats.delivered, 3);
}

// ============================================================================
// Test 7: Mismatched payload type is reported, other kinds unaffected
// ============================================================================

#[test]
fn type_mismatch_is_reported() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    let log = Recorder::new();

    bus.subscribe(5, |_: Arc<String>| {});
    let sink = log.clone();
    bus.subscribe(6, move |value: Arc<i32>| sink.push(*value));

    bus.publish(5, 12i32).unwrap();
    bus.publish(6, 13i32).unwrap();
    let stats = bus.shutdown();

    assert_eq!(stats.type_mismatches, 1);
    assert_eq!(log.entries(), vec![13]);
}

// ============================================================================
// Test 8: Unsubscribe stops delivery to that handler only
// ============================================================================

#[test]
fn unsubscribe_stops_delivery() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    let log = Recorder::new();

    let first = log.clone();
    let id = bus.subscribe(1, move |value: Arc<i32>| first.push(("first", *value)));
    let second = log.clone();
    bus.subscribe(1, move |value: Arc<i32>| second.push(("second", *value)));

    bus.publish(1, 1i32).unwrap();
    assert!(bus.flush(WAIT));

    assert!(bus.unsubscribe(id));
    assert!(!bus.unsubscribe(id));
    assert_eq!(bus.subscriber_count(EventKind(1)), 1);

    bus.publish(1, 2i32).unwrap();
    assert!(bus.flush(WAIT));

    assert_eq!(
        log.entries(),
        vec![("first", 1), ("second", 1), ("second", 2)]
    );
}

// ============================================================================
// Test 9: Handlers may publish re-entrantly
// ============================================================================

#[test]
fn handler_can_publish_follow_up_event() {
    init_logging();
    let bus = Arc::new(Dispatcher::new().unwrap());
    let log = Recorder::new();

    let weak = Arc::downgrade(&bus);
    bus.subscribe(1, move |value: Arc<u32>| {
        if let Some(bus) = weak.upgrade() {
            bus.publish(2, *value * 10).unwrap();
        }
    });
    let sink = log.clone();
    bus.subscribe(2, move |value: Arc<u32>| sink.push(*value));

    bus.publish(1, 4u32).unwrap();
    assert!(bus.flush(WAIT));
    assert_eq!(log.entries(), vec![40]);
}

// ============================================================================
// Test 10: Fallible handlers report errors without halting
// ============================================================================

#[test]
fn fallible_handler_errors_are_counted() {
    init_logging();
    let bus = Dispatcher::with_config(DispatcherConfig::default().with_name("orders")).unwrap();
    let log = Recorder::new();

    let sink = log.clone();
    bus.try_subscribe(9, move |amount: Arc<i64>| {
        if *amount < 0 {
            return Err(format!("refund of {} not allowed", amount));
        }
        sink.push(*amount);
        Ok(())
    });

    for amount in [10i64, -5, 20] {
        bus.publish(9, amount).unwrap();
    }
    let stats = bus.shutdown();

    assert_eq!(log.entries(), vec![10, 20]);
    assert_eq!(stats.handler_failures, 1);
    assert_eq!(stats.delivered, 2);
}

// ============================================================================
// Test 11: Stats serialize for reporting
// ============================================================================

#[test]
fn stats_serialize_to_json() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    bus.subscribe(1, |_: Arc<i32>| {});
    bus.publish(1, 1i32).unwrap();
    let stats = bus.shutdown();

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["published"], 1);
    assert_eq!(json["delivered"], 1);
    assert_eq!(json["rejected"], 0);
}

// ============================================================================
// Test 12: Subscribing while other threads publish
// ============================================================================

#[test]
fn subscribe_concurrently_with_publish() {
    init_logging();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let bus = Dispatcher::new().unwrap();
    let log = Recorder::new();

    thread::scope(|scope| {
        for thread_index in 0..THREADS {
            let bus = &bus;
            let log = log.clone();
            scope.spawn(move || {
                for n in 0..PER_THREAD {
                    let owner = thread_index * PER_THREAD + n;
                    let sink = log.clone();
                    bus.subscribe(1, move |tag: Arc<usize>| sink.push((owner, *tag)));
                    bus.publish(1, owner).unwrap();
                }
            });
        }
    });
    assert!(bus.flush(WAIT));

    let total = THREADS * PER_THREAD;
    assert_eq!(bus.subscriber_count(1), total);

    // Every handler saw the event published right after it subscribed,
    // and no handler saw any event twice.
    let entries = log.entries();
    let seen: HashSet<(usize, usize)> = entries.iter().copied().collect();
    assert_eq!(seen.len(), entries.len());
    for owner in 0..total {
        assert!(seen.contains(&(owner, owner)), "handler {} missed its event", owner);
    }
}

// ============================================================================
// Test 13: Handlers may subscribe and unsubscribe re-entrantly
// ============================================================================

#[test]
fn handler_can_subscribe_and_unsubscribe() {
    init_logging();
    let bus = Arc::new(Dispatcher::new().unwrap());
    let log = Recorder::new();
    let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

    let weak = Arc::downgrade(&bus);
    let sink = log.clone();
    let slot = Arc::clone(&own_id);
    let id = bus.subscribe(1, move |value: Arc<u32>| {
        sink.push(("setup", *value));
        if let Some(bus) = weak.upgrade() {
            let late = sink.clone();
            bus.subscribe(1, move |value: Arc<u32>| late.push(("late", *value)));
            let id = slot.lock().unwrap().take();
            if let Some(id) = id {
                assert!(bus.unsubscribe(id));
            }
        }
    });
    *own_id.lock().unwrap() = Some(id);

    bus.publish(1, 1u32).unwrap();
    assert!(bus.flush(WAIT));
    assert_eq!(bus.subscriber_count(1), 1);

    bus.publish(1, 2u32).unwrap();
    assert!(bus.flush(WAIT));

    assert_eq!(log.entries(), vec![("setup", 1), ("late", 2)]);
    assert_eq!(bus.stats().handler_panics, 0);
}

// ============================================================================
// Test 14: Stats stay consistent while events are in motion
// ============================================================================

#[test]
fn stats_never_run_ahead_of_publish() {
    init_logging();
    let bus = Dispatcher::new().unwrap();
    bus.subscribe(1, |_: Arc<u32>| {});
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let bus = &bus;
        let done = &done;
        scope.spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let stats = bus.stats();
                assert!(stats.dispatched <= stats.published, "{:?}", stats);
                assert!(stats.delivered <= stats.dispatched, "{:?}", stats);
            }
        });

        for n in 0..5_000u32 {
            bus.publish(1, n).unwrap();
        }
        let flushed = bus.flush(WAIT);
        done.store(true, Ordering::SeqCst);
        assert!(flushed);
    });

    let stats = bus.shutdown();
    assert_eq!(stats.published, 5_000);
    assert_eq!(stats.delivered, 5_000);
}
