//! Property-based tests for draining arbitrary work spread over the lanes

use context_fixture::concurrency::DispatchGroup;
use context_fixture::fixture::ContextGroup;
use context_fixture::types::ContextRole;
use parking_lot::Mutex;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Every submitted unit, nested ones included, has run once drain returns, and
/// top-level units on each lane ran in submission order.
#[test]
fn test_drain_observes_every_unit_property() {
    let mut runner = TestRunner::new(Config::with_cases(16));

    runner
        .run(
            &prop::collection::vec((0usize..3, any::<bool>()), 0..40),
            |units| {
                let mut group = ContextGroup::new(DispatchGroup::new());
                group.prepare_for_test("drain_counter").unwrap();

                let completed = Arc::new(AtomicUsize::new(0));
                let order: Arc<Vec<Mutex<Vec<usize>>>> =
                    Arc::new((0..3).map(|_| Mutex::new(Vec::new())).collect());

                for (index, (lane, nested)) in units.iter().copied().enumerate() {
                    let ctx = group.context(ContextRole::ALL[lane]).unwrap();
                    let next = group.context(ContextRole::ALL[(lane + 1) % 3]).unwrap();
                    let completed = Arc::clone(&completed);
                    let order = Arc::clone(&order);
                    ctx.perform(move |_| {
                        order[lane].lock().push(index);
                        completed.fetch_add(1, Ordering::SeqCst);
                        if nested {
                            let completed = Arc::clone(&completed);
                            next.perform(move |_| {
                                completed.fetch_add(1, Ordering::SeqCst);
                            })
                            .unwrap();
                        }
                    })
                    .unwrap();
                }

                group.drain().unwrap();

                let expected = units.len() + units.iter().filter(|(_, nested)| *nested).count();
                prop_assert_eq!(completed.load(Ordering::SeqCst), expected);
                prop_assert_eq!(group.dispatch_group().outstanding(), 0);
                for lane in 0..3 {
                    let seen = order[lane].lock().clone();
                    let submitted: Vec<usize> = units
                        .iter()
                        .enumerate()
                        .filter(|(_, (l, _))| *l == lane)
                        .map(|(index, _)| index)
                        .collect();
                    prop_assert_eq!(seen, submitted);
                }

                group.wait_and_delete_all_contexts().unwrap();
                Ok(())
            },
        )
        .unwrap();
}
