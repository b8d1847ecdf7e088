//! Managed contexts
//!
//! A [`ManagedContext`] pairs a store connection with the one lane allowed to use it.
//! Record operations check that they run on that lane; work reaches the lane through
//! [`perform`](ManagedContext::perform) and
//! [`perform_and_wait`](ManagedContext::perform_and_wait).

pub mod affinity;

pub use affinity::PretendGuard;

use crate::cache::CacheArea;
use crate::concurrency::{DispatchGroup, WorkQueue};
use crate::error::HarnessError;
use crate::keychain::CredentialStore;
use crate::store::StoreHandle;
use crate::types::ContextRole;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

pub struct ManagedContext {
    role: ContextRole,
    queue: WorkQueue,
    store: StoreHandle,
    credentials: Arc<dyn CredentialStore>,
    caches: Arc<CacheArea>,
    pretend_sync: AtomicBool,
    this: Weak<ManagedContext>,
}

impl ManagedContext {
    /// Build a context on a freshly spawned lane.
    pub fn new(
        role: ContextRole,
        store: StoreHandle,
        group: DispatchGroup,
        credentials: Arc<dyn CredentialStore>,
        caches: Arc<CacheArea>,
    ) -> Result<Arc<Self>, HarnessError> {
        let queue = WorkQueue::new(role, group)?;
        debug!(role = %role, "context created");
        Ok(Arc::new_cyclic(|this| Self {
            role,
            queue,
            store,
            credentials,
            caches,
            pretend_sync: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    /// Whether the calling thread is this context's lane.
    pub fn is_on_lane(&self) -> bool {
        self.queue.is_current()
    }

    /// Units submitted to this context that have not completed yet.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub(crate) fn take_failures(&self) -> Vec<String> {
        self.queue.take_failures()
    }

    /// Submit `unit` to run on this context's lane without waiting for it.
    pub fn perform<F>(&self, unit: F) -> Result<(), HarnessError>
    where
        F: FnOnce(&ManagedContext) + Send + 'static,
    {
        let context = self.upgrade("perform")?;
        debug!(role = %self.role, "unit submitted");
        self.queue.submit(move || unit(&context))
    }

    /// Run `unit` on this context's lane and return its result.
    ///
    /// Runs inline when already on the lane. A panic inside `unit` is re-raised on
    /// the caller once the lane has recovered.
    pub fn perform_and_wait<F, R>(&self, unit: F) -> Result<R, HarnessError>
    where
        F: FnOnce(&ManagedContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let context = self.upgrade("perform_and_wait")?;
        self.queue.submit_and_wait(move || unit(&context))
    }

    pub fn insert<T: Serialize>(&self, entity: &str, key: &str, value: &T) -> Result<(), HarnessError> {
        self.check_lane("insert")?;
        Ok(self.store.put(entity, key, value)?)
    }

    pub fn fetch<T: DeserializeOwned>(&self, entity: &str, key: &str) -> Result<Option<T>, HarnessError> {
        self.check_lane("fetch")?;
        Ok(self.store.get(entity, key)?)
    }

    pub fn delete(&self, entity: &str, key: &str) -> Result<bool, HarnessError> {
        self.check_lane("delete")?;
        Ok(self.store.remove(entity, key)?)
    }

    pub fn count(&self, entity: &str) -> Result<usize, HarnessError> {
        self.check_lane("count")?;
        Ok(self.store.count(entity)?)
    }

    pub fn keys(&self, entity: &str) -> Result<Vec<String>, HarnessError> {
        self.check_lane("keys")?;
        Ok(self.store.keys(entity)?)
    }

    /// Flush this context's writes to the backing store.
    pub fn save(&self) -> Result<(), HarnessError> {
        self.check_lane("save")?;
        Ok(self.store.flush()?)
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Store an asset blob in this context's cache directory.
    pub fn store_asset(&self, key: &str, bytes: &[u8]) -> Result<(), HarnessError> {
        self.caches.store_blob(self.role, key, bytes).map(|_| ())
    }

    pub fn read_asset(&self, key: &str) -> Result<Option<Vec<u8>>, HarnessError> {
        self.caches.read_blob(self.role, key)
    }

    fn upgrade(&self, operation: &str) -> Result<Arc<ManagedContext>, HarnessError> {
        self.this.upgrade().ok_or_else(|| HarnessError::ProtocolViolation {
            role: self.role,
            operation: operation.to_string(),
            detail: "context is being destroyed".to_string(),
        })
    }

    pub(crate) fn check_lane(&self, operation: &str) -> Result<(), HarnessError> {
        if self.queue.is_current() {
            return Ok(());
        }
        let caller = WorkQueue::current()
            .map(|tag| format!("{} lane", tag.role()))
            .unwrap_or_else(|| "a thread outside any lane".to_string());
        error!(role = %self.role, operation, caller = %caller, "cross-lane store access");
        Err(HarnessError::ProtocolViolation {
            role: self.role,
            operation: operation.to_string(),
            detail: format!("store accessed from {}", caller),
        })
    }
}

impl std::fmt::Debug for ManagedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedContext")
            .field("role", &self.role)
            .field("pending", &self.pending())
            .field("pretends_to_be_sync", &self.pretends_to_be_sync())
            .finish()
    }
}
