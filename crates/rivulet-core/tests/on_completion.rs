//! Completion substitution operators, end to end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rivulet_core::subscription::ImmediateSubscription;
use rivulet_core::testing::AssertSubscriber;
use rivulet_core::{Error, Failure, Multi, Publisher, Subscriber, Uni};

fn upstream() -> Multi<i64> {
    Multi::range(1, 5)
}

fn flag() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
    let flag = Arc::new(AtomicBool::new(false));
    (Arc::clone(&flag), flag)
}

fn is_null_reference(error: &Error) -> bool {
    matches!(error, Error::NullReference(_))
}

// ---------------------------------------------------------------------------
// continue_with
// ---------------------------------------------------------------------------

#[test]
fn test_continue_with_after_invoke() {
    let (called, hook) = flag();
    upstream()
        .on_completion()
        .invoke(move || hook.store(true, Ordering::SeqCst))
        .on_completion()
        .continue_with(vec![6, 7, 8])
        .subscribe(AssertSubscriber::create(7))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4, 6, 7, 8]);
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn test_continue_with_skipped_on_upstream_failure() {
    let (called, hook) = flag();
    Multi::emitter(|e| {
        e.emit(1)
            .emit(2)
            .fail(Failure::new(std::io::Error::other("boom")));
    })
    .on_completion()
    .invoke(move || hook.store(true, Ordering::SeqCst))
    .on_completion()
    .continue_with(vec![6, 7, 8])
    .subscribe(AssertSubscriber::create(7))
    .assert_failed_with::<std::io::Error>(Some("boom"))
    .assert_received(&[1, 2]);
    assert!(!called.load(Ordering::SeqCst));
}

#[test]
fn test_continue_with_nothing() {
    upstream()
        .on_completion()
        .continue_with(Vec::new())
        .subscribe(AssertSubscriber::create(7))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4]);
}

#[test]
fn test_continue_with_single_item() {
    upstream()
        .on_completion()
        .continue_with([25])
        .subscribe(AssertSubscriber::create(7))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4, 25]);
}

#[test]
fn test_continue_with_respects_demand() {
    let ts = upstream()
        .on_completion()
        .continue_with(vec![5, 6])
        .subscribe(AssertSubscriber::create(5));
    ts.assert_received(&[1, 2, 3, 4, 5]).assert_not_terminated();
    ts.request(1);
    ts.assert_received(&[1, 2, 3, 4, 5, 6]).assert_completed();
}

#[test]
fn test_continue_with_supplier() {
    upstream()
        .on_completion()
        .continue_with_supplier(|| Some(vec![25_i64, 26]))
        .subscribe(AssertSubscriber::create(20))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4, 25, 26]);
}

#[test]
fn test_continue_with_supplier_returning_empty() {
    upstream()
        .on_completion()
        .continue_with_supplier(|| Some(Vec::<i64>::new()))
        .subscribe(AssertSubscriber::create(20))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4]);
}

#[test]
fn test_continue_with_supplier_truncates_at_missing_item() {
    upstream()
        .on_completion()
        .continue_with_supplier(|| Some(vec![Some(25_i64), None, Some(26)]))
        .subscribe(AssertSubscriber::create(20))
        .assert_failed_with_kind(is_null_reference)
        .assert_received(&[1, 2, 3, 4, 25]);
}

#[test]
fn test_continue_with_supplier_returning_none() {
    upstream()
        .on_completion()
        .continue_with_supplier(|| None::<Vec<i64>>)
        .subscribe(AssertSubscriber::create(20))
        .assert_failed_with_kind(is_null_reference)
        .assert_received(&[1, 2, 3, 4]);
}

#[test]
fn test_continue_with_supplier_panicking() {
    upstream()
        .on_completion()
        .continue_with_supplier(|| -> Option<Vec<i64>> { panic!("BOOM!") })
        .subscribe(AssertSubscriber::create(20))
        .assert_failed_with_kind(|e| matches!(e, Error::CallbackPanicked(m) if m == "BOOM!"))
        .assert_received(&[1, 2, 3, 4]);
}

#[test]
fn test_continue_with_supplier_runs_per_subscription() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let multi = upstream().on_completion().continue_with_supplier(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Some(vec![100 + i64::try_from(n).unwrap_or(0)])
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    multi
        .subscribe(AssertSubscriber::create(10))
        .assert_received(&[1, 2, 3, 4, 100]);
    multi
        .subscribe(AssertSubscriber::create(10))
        .assert_received(&[1, 2, 3, 4, 101]);
}

// ---------------------------------------------------------------------------
// fail
// ---------------------------------------------------------------------------

#[test]
fn test_fail() {
    upstream()
        .on_completion()
        .fail()
        .subscribe(AssertSubscriber::create(u64::MAX))
        .assert_received(&[1, 2, 3, 4])
        .assert_failed_with_kind(|e| matches!(e, Error::NoSuchElement));
}

#[test]
fn test_fail_with() {
    upstream()
        .on_completion()
        .fail_with(Failure::new(std::io::Error::other("boom")))
        .subscribe(AssertSubscriber::create(u64::MAX))
        .assert_received(&[1, 2, 3, 4])
        .assert_failed_with::<std::io::Error>(Some("boom"));
}

#[test]
fn test_fail_with_supplier() {
    upstream()
        .on_completion()
        .fail_with_supplier(|| Some(Failure::new(std::io::Error::other("boom"))))
        .subscribe(AssertSubscriber::create(u64::MAX))
        .assert_received(&[1, 2, 3, 4])
        .assert_failed_with::<std::io::Error>(Some("boom"));
}

#[test]
fn test_fail_with_supplier_panicking() {
    upstream()
        .on_completion()
        .fail_with_supplier(|| panic!("BOOM!"))
        .subscribe(AssertSubscriber::create(u64::MAX))
        .assert_received(&[1, 2, 3, 4])
        .assert_failed_with_kind(|e| matches!(e, Error::CallbackPanicked(m) if m == "BOOM!"));
}

#[test]
fn test_fail_with_supplier_returning_none() {
    upstream()
        .on_completion()
        .fail_with_supplier(|| None)
        .subscribe(AssertSubscriber::create(u64::MAX))
        .assert_received(&[1, 2, 3, 4])
        .assert_failed_with_kind(is_null_reference);
}

// ---------------------------------------------------------------------------
// switch_to
// ---------------------------------------------------------------------------

#[test]
fn test_switch_to() {
    upstream()
        .on_completion()
        .switch_to(Multi::items([20]))
        .subscribe(AssertSubscriber::create(10))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4, 20]);
}

#[test]
fn test_switch_to_supplier() {
    upstream()
        .on_completion()
        .switch_to_supplier(|| Some(Multi::range(5, 8)))
        .subscribe(AssertSubscriber::create(10))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn test_switch_to_supplier_returning_none() {
    upstream()
        .on_completion()
        .switch_to_supplier(|| None)
        .subscribe(AssertSubscriber::create(10))
        .assert_failed_with_kind(is_null_reference)
        .assert_received(&[1, 2, 3, 4]);
}

#[test]
fn test_switch_to_emitter() {
    upstream()
        .on_completion()
        .switch_to_emitter(|e| {
            e.emit(5).emit(6).complete();
        })
        .subscribe(AssertSubscriber::create(10))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_switch_to_cancel_reaches_new_upstream() {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cancelled);
    let ts = upstream()
        .on_completion()
        .switch_to(Multi::never().on_cancellation().invoke(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .subscribe(AssertSubscriber::create(10));
    ts.assert_received(&[1, 2, 3, 4]).assert_not_terminated();
    ts.cancel();
    ts.cancel();
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// invoke / invoke_async
// ---------------------------------------------------------------------------

#[test]
fn test_invoke_panicking() {
    let (called, hook) = flag();
    upstream()
        .on_completion()
        .invoke(move || {
            hook.store(true, Ordering::SeqCst);
            panic!("bam");
        })
        .subscribe(AssertSubscriber::create(7))
        .assert_failed_with_kind(|e| matches!(e, Error::CallbackPanicked(m) if m == "bam"));
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn test_invoke_async() {
    let (called, hook) = flag();
    upstream()
        .on_completion()
        .invoke_async(move || {
            hook.store(true, Ordering::SeqCst);
            Uni::item(69)
        })
        .subscribe(AssertSubscriber::create(7))
        .assert_completed()
        .assert_received(&[1, 2, 3, 4]);
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn test_invoke_async_failed_uni() {
    let (called, hook) = flag();
    upstream()
        .on_completion()
        .invoke_async(move || {
            hook.store(true, Ordering::SeqCst);
            Uni::<i32>::failure(Failure::message("bam"))
        })
        .subscribe(AssertSubscriber::create(7))
        .assert_received(&[1, 2, 3, 4])
        .assert_failed_with_message("bam");
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn test_invoke_async_panicking_supplier() {
    let (called, hook) = flag();
    upstream()
        .on_completion()
        .invoke_async(move || -> Uni<i32> {
            hook.store(true, Ordering::SeqCst);
            panic!("bam");
        })
        .subscribe(AssertSubscriber::create(7))
        .assert_received(&[1, 2, 3, 4])
        .assert_failed_with_kind(|e| matches!(e, Error::CallbackPanicked(m) if m == "bam"));
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn test_invoke_async_cancellation() {
    let (called, hook) = flag();
    let (uni_cancelled, uni_hook) = flag();
    let counter = Arc::new(AtomicUsize::new(0));
    let supplier_counter = Arc::clone(&counter);

    let ts = upstream()
        .on_completion()
        .invoke_async(move || {
            hook.store(true, Ordering::SeqCst);
            supplier_counter.fetch_add(1, Ordering::SeqCst);
            let cancel_counter = Arc::clone(&supplier_counter);
            let cancel_flag = Arc::clone(&uni_hook);
            Uni::<i32>::emitter(|_| {})
                .on_cancellation()
                .invoke(move || {
                    cancel_counter.fetch_add(1, Ordering::SeqCst);
                    cancel_flag.store(true, Ordering::SeqCst);
                })
        })
        .subscribe(AssertSubscriber::create(7));

    ts.assert_received(&[1, 2, 3, 4]).assert_not_terminated();
    assert!(called.load(Ordering::SeqCst));
    assert!(!uni_cancelled.load(Ordering::SeqCst));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    ts.cancel();
    ts.assert_not_terminated();
    assert!(uni_cancelled.load(Ordering::SeqCst));
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    ts.cancel();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_invoke_async_late_item_after_cancel_is_discarded() {
    let slot = Arc::new(parking_lot::Mutex::new(None));
    let emitter_slot = Arc::clone(&slot);
    let ts = upstream()
        .on_completion()
        .invoke_async(move || {
            let emitter_slot = Arc::clone(&emitter_slot);
            Uni::emitter(move |e| *emitter_slot.lock() = Some(e))
        })
        .subscribe(AssertSubscriber::create(7));
    ts.cancel();
    let emitter = slot.lock().clone().expect("async hook subscribed");
    emitter.complete(1);
    ts.assert_received(&[1, 2, 3, 4]).assert_not_terminated();
}

// ---------------------------------------------------------------------------
// racing producers
// ---------------------------------------------------------------------------

fn racing_completions() -> Multi<i32> {
    Multi::emitter(|e| {
        let first = e.clone();
        let second = e.clone();
        let t1 = thread::spawn(move || first.complete());
        let t2 = thread::spawn(move || second.complete());
        t1.join().expect("first completer");
        t2.join().expect("second completer");
    })
}

#[test]
fn test_rogue_emitters_invoke() {
    for _ in 0..100 {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&counter);
        let ts = racing_completions()
            .on_completion()
            .invoke(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe(AssertSubscriber::create(10));
        ts.assert_completed();
        assert_eq!(ts.completion_count(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_rogue_emitters_invoke_async() {
    for _ in 0..100 {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&counter);
        let ts = racing_completions()
            .on_completion()
            .invoke_async(move || {
                hook.fetch_add(1, Ordering::SeqCst);
                Uni::item(69)
            })
            .subscribe(AssertSubscriber::create(10));
        ts.assert_completed();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

// ---------------------------------------------------------------------------
// Signals driven straight into the stage
// ---------------------------------------------------------------------------

type RawSlot = Arc<Mutex<Option<Arc<dyn Subscriber<i64>>>>>;

/// Source with no terminal guard of its own: it signals whatever the test
/// tells it to, as often as it is told.
struct RawPublisher {
    slot: RawSlot,
}

impl Publisher<i64> for RawPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<i64>>) {
        subscriber.on_subscribe(Arc::new(ImmediateSubscription::new()));
        *self.slot.lock() = Some(subscriber);
    }
}

fn raw_source() -> (RawSlot, Multi<i64>) {
    let slot: RawSlot = Arc::new(Mutex::new(None));
    let multi = Multi::from_publisher(RawPublisher {
        slot: Arc::clone(&slot),
    });
    (slot, multi)
}

fn raw_subscriber(slot: &RawSlot) -> Arc<dyn Subscriber<i64>> {
    slot.lock().clone().expect("raw source subscribed")
}

/// Delivers completion and failure from two threads at once.
fn race_completion_against_failure(slot: &RawSlot) {
    let completer = raw_subscriber(slot);
    let failer = Arc::clone(&completer);
    let t1 = thread::spawn(move || completer.on_completion());
    let t2 = thread::spawn(move || failer.on_failure(Failure::message("racing failure")));
    t1.join().expect("completer");
    t2.join().expect("failer");
}

fn assert_single_terminal(ts: &AssertSubscriber<i64>) {
    assert_eq!(ts.completion_count() + ts.failure_count(), 1);
}

#[test]
fn test_raw_completion_racing_failure_into_invoke() {
    for _ in 0..200 {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&counter);
        let (slot, source) = raw_source();
        let ts = source
            .on_completion()
            .invoke(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe(AssertSubscriber::create(10));

        race_completion_against_failure(&slot);
        assert_single_terminal(&ts);
        assert_eq!(counter.load(Ordering::SeqCst), ts.completion_count());
    }
}

#[test]
fn test_raw_completion_racing_failure_into_invoke_async() {
    for _ in 0..200 {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&counter);
        let (slot, source) = raw_source();
        let ts = source
            .on_completion()
            .invoke_async(move || {
                hook.fetch_add(1, Ordering::SeqCst);
                Uni::item(())
            })
            .subscribe(AssertSubscriber::create(10));

        race_completion_against_failure(&slot);
        assert_single_terminal(&ts);
        assert_eq!(counter.load(Ordering::SeqCst), ts.completion_count());
    }
}

#[test]
fn test_raw_completion_racing_failure_into_on_failure_invoke() {
    for _ in 0..200 {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&counter);
        let (slot, source) = raw_source();
        let ts = source
            .on_failure()
            .invoke(move |_| {
                hook.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe(AssertSubscriber::create(10));

        race_completion_against_failure(&slot);
        assert_single_terminal(&ts);
        assert_eq!(counter.load(Ordering::SeqCst), ts.failure_count());
    }
}

#[test]
fn test_raw_duplicate_completions_into_continue_with() {
    for _ in 0..200 {
        let supplied = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&supplied);
        let (slot, source) = raw_source();
        let ts = source
            .on_completion()
            .continue_with_supplier(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(vec![6_i64, 7])
            })
            .subscribe(AssertSubscriber::create(10));

        let first = raw_subscriber(&slot);
        let second = Arc::clone(&first);
        let t1 = thread::spawn(move || first.on_completion());
        let t2 = thread::spawn(move || second.on_completion());
        t1.join().expect("first completer");
        t2.join().expect("second completer");

        ts.assert_completed().assert_received(&[6, 7]);
        assert_eq!(ts.completion_count(), 1);
        assert_eq!(supplied.load(Ordering::SeqCst), 1);
    }
}
