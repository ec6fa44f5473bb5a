use idlewatch::{Semaphore, thread};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;
mod common;
use common::{SETTLE_TIMEOUT, start_monitor};

#[test]
fn test_consumer_stays_busy_until_every_post_is_consumed() {
    let harness = start_monitor();
    let items = Arc::new(Semaphore::new_in(&harness.monitor, 0));
    let processed = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let consumer = {
        let items = Arc::clone(&items);
        let processed = Arc::clone(&processed);
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .monitor(&harness.monitor)
            .spawn(move || {
                loop {
                    items.wait();
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    // Untracked work keeps the thread busy
                    std::thread::sleep(Duration::from_millis(5));
                    processed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap()
    };

    let parked = harness.expect_idle(SETTLE_TIMEOUT);
    assert_eq!(processed.load(Ordering::SeqCst), 0);

    // A short-lived producer posts everything and exits; the consumer still
    // owes three wakeups
    let producer = {
        let items = Arc::clone(&items);
        thread::Builder::new()
            .monitor(&harness.monitor)
            .spawn(move || {
                for _ in 0..3 {
                    items.post();
                }
            })
            .unwrap()
    };

    let drained = harness.expect_idle_after(parked, SETTLE_TIMEOUT);
    assert_eq!(drained, parked + 1);
    assert_eq!(processed.load(Ordering::SeqCst), 3);
    assert_eq!(harness.monitor.snapshot().block_map, "x");

    stop.store(true, Ordering::SeqCst);
    items.post();
    producer.join().unwrap();
    consumer.join().unwrap();
    assert_eq!(harness.monitor.snapshot().threads, 0);
}

#[test]
fn test_named_semaphore_waiter_never_counts_as_blocked() {
    let harness = start_monitor();
    let shared = Arc::new(idlewatch::Semaphore::named_in(&harness.monitor, 0));

    let waiter = {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .monitor(&harness.monitor)
            .spawn(move || shared.wait())
            .unwrap()
    };

    // Someone outside the process might post it at any time
    harness.assert_stays_busy(common::QUIET_PERIOD);

    shared.post();
    waiter.join().unwrap();
    harness.expect_idle(SETTLE_TIMEOUT);
}

#[test]
fn test_timed_wait_parks_as_idle_and_times_out() {
    let harness = start_monitor();
    let sem = Arc::new(Semaphore::new_in(&harness.monitor, 0));
    let before = harness.monitor.times_idle();

    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let waiter = {
        let sem = Arc::clone(&sem);
        thread::Builder::new()
            .monitor(&harness.monitor)
            .spawn(move || {
                let took = sem.wait_timeout(Duration::from_millis(50));
                // Busy again after the timeout, until released
                let _ = release_rx.recv();
                took
            })
            .unwrap()
    };

    // Idle exactly once, while parked, then busy again after the timeout
    common::wait_until(SETTLE_TIMEOUT, || {
        harness.monitor.times_idle() == before + 1 && !harness.monitor.is_idle()
    });

    release_tx.send(()).unwrap();
    assert!(!waiter.join().unwrap());
    assert_eq!(
        harness
            .monitor
            .with(|t| t.registry().semaphore(sem.id()).unwrap().pending_wakeups),
        0
    );
}
