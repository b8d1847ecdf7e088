//! Integration tests for submission and draining across lanes
//!
//! Tests cover:
//! - Drain waits for queued and nested units
//! - FIFO order within a lane
//! - No overlap within a lane, parallelism across lanes
//! - Panicking units surface from drain

use super::test_utils::{conversation, finish, prepared_group, Conversation, CONVERSATION};
use context_fixture::error::HarnessError;
use context_fixture::types::ContextRole;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_drain_with_no_work_returns_immediately() {
    let group = prepared_group("drain_idle");
    group.drain().unwrap();
    assert_eq!(group.dispatch_group().outstanding(), 0);
    finish(group);
}

#[test]
fn test_drain_waits_for_every_lane() {
    let group = prepared_group("drain_every_lane");
    let completed = Arc::new(AtomicUsize::new(0));

    for role in ContextRole::ALL {
        let ctx = group.context(role).unwrap();
        for _ in 0..5 {
            let completed = Arc::clone(&completed);
            ctx.perform(move |_| {
                thread::sleep(Duration::from_millis(5));
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
    }

    group.drain().unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 15);
    assert_eq!(group.dispatch_group().outstanding(), 0);
    finish(group);
}

#[test]
fn test_drain_waits_for_nested_units_across_lanes() {
    let group = prepared_group("drain_nested");
    let background = group.background().unwrap();
    let search = group.search().unwrap();
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    group
        .interactive()
        .unwrap()
        .perform(move |_| {
            background
                .perform(move |ctx| {
                    ctx.insert(CONVERSATION, "c1", &conversation("nested")).unwrap();
                    search
                        .perform(move |_| {
                            thread::sleep(Duration::from_millis(30));
                            flag.store(true, Ordering::SeqCst);
                        })
                        .unwrap();
                })
                .unwrap();
        })
        .unwrap();

    group.drain().unwrap();
    assert!(finished.load(Ordering::SeqCst));

    let stored: Option<Conversation> = group
        .search()
        .unwrap()
        .perform_and_wait(|ctx| ctx.fetch(CONVERSATION, "c1").unwrap())
        .unwrap();
    assert_eq!(stored, Some(conversation("nested")));
    finish(group);
}

#[test]
fn test_units_on_one_lane_run_in_submission_order() {
    let group = prepared_group("fifo_order");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let background = group.background().unwrap();

    for i in 0..100 {
        let seen = Arc::clone(&seen);
        background.perform(move |_| seen.lock().push(i)).unwrap();
    }

    group.drain().unwrap();
    assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    finish(group);
}

#[test]
fn test_units_on_one_lane_never_overlap() {
    let group = prepared_group("no_overlap");
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let interactive = group.interactive().unwrap();

    for _ in 0..20 {
        let busy = Arc::clone(&busy);
        let overlaps = Arc::clone(&overlaps);
        interactive
            .perform(move |_| {
                if busy.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(1));
                busy.store(false, Ordering::SeqCst);
            })
            .unwrap();
    }

    group.drain().unwrap();
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    finish(group);
}

#[test]
fn test_different_lanes_run_in_parallel() {
    let group = prepared_group("parallel_lanes");
    // Both units must be running at the same time to pass the barrier.
    let barrier = Arc::new(Barrier::new(2));

    for role in [ContextRole::Interactive, ContextRole::Background] {
        let barrier = Arc::clone(&barrier);
        group
            .context(role)
            .unwrap()
            .perform(move |_| {
                barrier.wait();
            })
            .unwrap();
    }

    group.drain().unwrap();
    finish(group);
}

#[test]
fn test_panicking_unit_fails_drain_with_role() {
    let group = prepared_group("panicking_unit");
    group
        .background()
        .unwrap()
        .perform(|_| panic!("sync failed"))
        .unwrap();

    match group.drain() {
        Err(HarnessError::TaskPanicked { role, message }) => {
            assert_eq!(role, ContextRole::Background);
            assert_eq!(message, "sync failed");
        }
        other => panic!("expected a task panic, got {:?}", other),
    }

    // The failure is reported once and the lane keeps working.
    group.drain().unwrap();
    let value = group
        .background()
        .unwrap()
        .perform_and_wait(|_| 5)
        .unwrap();
    assert_eq!(value, 5);
    finish(group);
}

#[test]
fn test_every_panic_on_a_lane_is_reported() {
    let group = prepared_group("several_panics");
    let search = group.search().unwrap();
    search.perform(|_| panic!("first index failed")).unwrap();
    search.perform(|_| panic!("second index failed")).unwrap();

    match group.drain() {
        Err(HarnessError::TaskPanicked { role, message }) => {
            assert_eq!(role, ContextRole::Search);
            assert_eq!(message, "first index failed; second index failed");
        }
        other => panic!("expected a task panic, got {:?}", other),
    }
    group.drain().unwrap();
    drop(search);
    finish(group);
}

#[test]
fn test_off_lane_store_access_is_a_protocol_violation() {
    let group = prepared_group("off_lane_access");
    let interactive = group.interactive().unwrap();
    let search = group.search().unwrap();

    let from_test_thread = interactive.insert(CONVERSATION, "c1", &conversation("x"));
    assert!(matches!(
        from_test_thread,
        Err(HarnessError::ProtocolViolation {
            role: ContextRole::Interactive,
            ..
        })
    ));

    // Reaching into another context's store from a different lane is rejected too.
    let from_search_lane = search
        .perform_and_wait(move |_| interactive.count(CONVERSATION))
        .unwrap();
    assert!(matches!(
        from_search_lane,
        Err(HarnessError::ProtocolViolation { .. })
    ));
    finish(group);
}
