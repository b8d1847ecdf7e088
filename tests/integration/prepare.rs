//! Integration tests for preparing contexts between tests

use super::test_utils::{conversation, finish, Conversation, CONVERSATION};
use context_fixture::concurrency::DispatchGroup;
use context_fixture::config::HarnessConfig;
use context_fixture::error::HarnessError;
use context_fixture::fixture::ContextGroup;
use context_fixture::keychain::KeychainCall;
use context_fixture::logging::init_test_logging;
use context_fixture::types::ContextRole;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_second_prepare_has_no_in_memory_residue() {
    init_test_logging();
    let mut group = ContextGroup::new(DispatchGroup::new());

    group.prepare_for_test("first").unwrap();
    group
        .background()
        .unwrap()
        .perform(|ctx| ctx.insert(CONVERSATION, "c1", &conversation("c1")).unwrap())
        .unwrap();
    let first_interactive = group.interactive().unwrap();
    group.drain().unwrap();
    drop(first_interactive);

    group.prepare_for_test("second").unwrap();

    let stored: Option<Conversation> = group
        .interactive()
        .unwrap()
        .perform_and_wait(|ctx| ctx.fetch(CONVERSATION, "c1").unwrap())
        .unwrap();
    assert_eq!(stored, None);
    assert_eq!(group.test_name(), Some("second"));
    finish(group);
}

#[test]
fn test_prepare_drains_pending_work_of_previous_test() {
    init_test_logging();
    let mut group = ContextGroup::new(DispatchGroup::new());
    group.prepare_for_test("first").unwrap();
    let old_search = group.search().unwrap();
    old_search
        .perform(|_| std::thread::sleep(std::time::Duration::from_millis(30)))
        .unwrap();
    drop(old_search);

    group.prepare_for_test("second").unwrap();

    assert_eq!(group.dispatch_group().outstanding(), 0);
    finish(group);
}

#[test]
fn test_flags_are_read_at_build_time() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let config = HarnessConfig {
        store_path: Some(temp_dir.path().join("store")),
        ..HarnessConfig::default()
    };
    let mut group = ContextGroup::with_config(DispatchGroup::new(), config);
    group.prepare_for_test("in_memory").unwrap();

    // Changing the flag does not touch the live contexts.
    group.set_use_in_memory_store(false);
    assert!(!temp_dir.path().join("store").exists());

    group.prepare_for_test("durable").unwrap();
    assert!(temp_dir.path().join("store").exists());
    finish(group);
}

#[test]
fn test_fresh_fake_keychain_per_test() {
    init_test_logging();
    let mut group = ContextGroup::new(DispatchGroup::new());
    group.prepare_for_test("first").unwrap();
    let first = group.fake_keychain().unwrap();
    group
        .interactive()
        .unwrap()
        .credentials()
        .store("alice", b"token")
        .unwrap();
    assert_eq!(first.calls(), vec![KeychainCall::Store("alice".to_string())]);

    group.prepare_for_test("second").unwrap();

    let second = group.fake_keychain().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(
        group.credentials().unwrap().retrieve("alice").unwrap(),
        None
    );
    finish(group);
}

#[test]
fn test_unopenable_store_fails_prepare() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let config = HarnessConfig {
        use_in_memory_store: false,
        store_path: Some(blocker.join("store")),
        ..HarnessConfig::default()
    };
    let mut group = ContextGroup::with_config(DispatchGroup::new(), config);

    let result = group.prepare_for_test("unopenable");
    match result {
        Err(HarnessError::Open { operation, .. }) => assert_eq!(operation, "prepare_for_test"),
        other => panic!("expected an open failure, got {:?}", other),
    }
    assert!(!group.is_prepared());
    assert!(matches!(
        group.context(ContextRole::Interactive),
        Err(HarnessError::NotPrepared { .. })
    ));
}

#[test]
fn test_durable_store_deleted_after_release() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let store_path = temp_dir.path().join("store");
    let config = HarnessConfig {
        use_in_memory_store: false,
        store_path: Some(store_path.clone()),
        ..HarnessConfig::default()
    };
    let mut group = ContextGroup::with_config(DispatchGroup::new(), config);
    group.prepare_for_test("durable_delete").unwrap();
    assert!(store_path.exists());

    assert!(matches!(
        group.delete_persistent_store(),
        Err(HarnessError::ProtocolViolation { .. })
    ));

    group.tear_down().unwrap();
    group.wait_and_delete_all_contexts().unwrap();
    group.delete_persistent_store().unwrap();
    assert!(!store_path.exists());
}
