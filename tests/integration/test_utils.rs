//! Shared test utilities for integration tests

use context_fixture::concurrency::DispatchGroup;
use context_fixture::config::HarnessConfig;
use context_fixture::fixture::ContextGroup;
use context_fixture::logging::init_test_logging;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tempfile::TempDir;

pub const CONVERSATION: &str = "conversation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub name: String,
    pub unread: u32,
}

pub fn conversation(name: &str) -> Conversation {
    Conversation {
        name: name.to_string(),
        unread: 0,
    }
}

/// In-memory group with a short drain timeout, already prepared for `test_name`.
pub fn prepared_group(test_name: &str) -> ContextGroup {
    init_test_logging();
    let config = HarnessConfig {
        drain_timeout_ms: 5_000,
        ..HarnessConfig::default()
    };
    let mut group = ContextGroup::with_config(DispatchGroup::new(), config);
    group.prepare_for_test(test_name).unwrap();
    group
}

/// Durable group whose store and caches live under `temp_dir`.
pub fn durable_group(test_name: &str, temp_dir: &TempDir) -> ContextGroup {
    init_test_logging();
    let config = HarnessConfig {
        use_in_memory_store: false,
        store_path: Some(temp_dir.path().join("store")),
        cache_root: Some(temp_dir.path().join("caches")),
        ..HarnessConfig::default()
    };
    let mut group = ContextGroup::with_config(DispatchGroup::new(), config);
    group.prepare_for_test(test_name).unwrap();
    group
}

/// Drain, verify and release everything the group holds.
pub fn finish(mut group: ContextGroup) {
    group.tear_down().unwrap();
    group.wait_and_delete_all_contexts().unwrap();
}

pub fn short_timeout() -> Duration {
    Duration::from_millis(100)
}
