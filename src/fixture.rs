//! Context group fixture
//!
//! [`ContextGroup`] owns the interactive, background and search contexts a test runs
//! against, the shared [`DispatchGroup`] that tracks their work, and the collaborators
//! those contexts use: the store, the credential backend and the asset caches.
//!
//! A typical test:
//!
//! ```no_run
//! use context_fixture::concurrency::DispatchGroup;
//! use context_fixture::fixture::ContextGroup;
//!
//! let mut group = ContextGroup::new(DispatchGroup::new());
//! group.prepare_for_test("inserts_user").unwrap();
//! group
//!     .background()
//!     .unwrap()
//!     .perform(|ctx| ctx.insert("user", "u1", &"alice".to_string()).unwrap())
//!     .unwrap();
//! group.drain().unwrap();
//! group.tear_down().unwrap();
//! group.wait_and_delete_all_contexts().unwrap();
//! ```

use crate::cache::CacheArea;
use crate::concurrency::{DispatchGroup, WorkQueue};
use crate::config::HarnessConfig;
use crate::context::ManagedContext;
use crate::error::HarnessError;
use crate::keychain::{CredentialStore, FakeKeychain, SystemKeychain};
use crate::store::{SledBackend, StorageBackend, StoreHandle, StoreMode};
use crate::types::ContextRole;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{error, info, info_span, warn};

/// The three live contexts; present together or absent together.
struct LiveContexts {
    interactive: Arc<ManagedContext>,
    background: Arc<ManagedContext>,
    search: Arc<ManagedContext>,
}

impl LiveContexts {
    fn get(&self, role: ContextRole) -> &Arc<ManagedContext> {
        match role {
            ContextRole::Interactive => &self.interactive,
            ContextRole::Background => &self.background,
            ContextRole::Search => &self.search,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<ManagedContext>> {
        [&self.interactive, &self.background, &self.search].into_iter()
    }
}

impl Drop for LiveContexts {
    fn drop(&mut self) {
        // Queued units hold their own context alive, so leftover work is caught here
        // rather than when the lane itself goes away.
        let busy: Vec<(ContextRole, usize)> = self
            .iter()
            .map(|ctx| {
                let pending = ctx.pending().saturating_sub(usize::from(ctx.is_on_lane()));
                (ctx.role(), pending)
            })
            .filter(|(_, pending)| *pending > 0)
            .collect();
        if busy.is_empty() {
            return;
        }
        for (role, pending) in &busy {
            error!(role = %role, pending, "context released with outstanding work");
        }
        if cfg!(debug_assertions) && !thread::panicking() {
            let roles: Vec<&str> = busy.iter().map(|(role, _)| role.as_str()).collect();
            panic!(
                "contexts released with outstanding work on: {}; drain before releasing contexts",
                roles.join(", ")
            );
        }
    }
}

/// Per-test collaborators built alongside the contexts.
struct Collaborators {
    store: StoreHandle,
    credentials: Arc<dyn CredentialStore>,
    fake_keychain: Option<Arc<FakeKeychain>>,
}

pub struct ContextGroup {
    dispatch_group: DispatchGroup,
    config: HarnessConfig,
    backend: Arc<dyn StorageBackend>,
    contexts: Option<LiveContexts>,
    collaborators: Option<Collaborators>,
    caches: Option<Arc<CacheArea>>,
    scratch: Option<TempDir>,
    test_name: Option<String>,
}

impl ContextGroup {
    /// Create a group with default configuration: in-memory store, fake keychain.
    ///
    /// No contexts exist until [`prepare_for_test`](Self::prepare_for_test).
    pub fn new(dispatch_group: DispatchGroup) -> Self {
        Self::with_config(dispatch_group, HarnessConfig::default())
    }

    pub fn with_config(dispatch_group: DispatchGroup, config: HarnessConfig) -> Self {
        Self::with_backend(dispatch_group, config, Arc::new(SledBackend::new()))
    }

    pub fn with_backend(
        dispatch_group: DispatchGroup,
        config: HarnessConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            dispatch_group,
            config,
            backend,
            contexts: None,
            collaborators: None,
            caches: None,
            scratch: None,
            test_name: None,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Takes effect the next time contexts are built.
    pub fn set_use_in_memory_store(&mut self, use_in_memory_store: bool) {
        self.config.use_in_memory_store = use_in_memory_store;
    }

    /// Takes effect the next time contexts are built.
    pub fn set_use_real_keychain(&mut self, use_real_keychain: bool) {
        self.config.use_real_keychain = use_real_keychain;
    }

    pub fn set_drain_timeout(&mut self, timeout: Duration) {
        self.config.drain_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn dispatch_group(&self) -> &DispatchGroup {
        &self.dispatch_group
    }

    pub fn is_prepared(&self) -> bool {
        self.contexts.is_some()
    }

    pub fn test_name(&self) -> Option<&str> {
        self.test_name.as_deref()
    }

    pub fn interactive(&self) -> Result<Arc<ManagedContext>, HarnessError> {
        self.context(ContextRole::Interactive)
    }

    pub fn background(&self) -> Result<Arc<ManagedContext>, HarnessError> {
        self.context(ContextRole::Background)
    }

    pub fn search(&self) -> Result<Arc<ManagedContext>, HarnessError> {
        self.context(ContextRole::Search)
    }

    pub fn context(&self, role: ContextRole) -> Result<Arc<ManagedContext>, HarnessError> {
        self.live("context")
            .map(|contexts| Arc::clone(contexts.get(role)))
    }

    pub fn credentials(&self) -> Result<Arc<dyn CredentialStore>, HarnessError> {
        self.collaborators
            .as_ref()
            .map(|c| Arc::clone(&c.credentials))
            .ok_or_else(|| not_prepared("credentials"))
    }

    /// The fake keychain for this test, unless the real keychain is in use.
    pub fn fake_keychain(&self) -> Option<Arc<FakeKeychain>> {
        self.collaborators
            .as_ref()
            .and_then(|c| c.fake_keychain.clone())
    }

    /// Location of the durable store as currently configured.
    pub fn store_location(&mut self) -> Result<PathBuf, HarnessError> {
        match &self.config.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.scratch_dir()?.join("store")),
        }
    }

    /// Build fresh contexts for one test.
    ///
    /// Existing contexts are drained and released first. The storage mode and
    /// credential backend are read from the configuration now; a store that cannot
    /// be opened fails the test.
    pub fn prepare_for_test(&mut self, name: &str) -> Result<(), HarnessError> {
        let span = info_span!("prepare_for_test", test = name);
        let _entered = span.enter();

        if self.contexts.is_some() {
            self.wait_and_delete_all_contexts()?;
        }
        self.test_name = Some(name.to_string());

        let mode = if self.config.use_in_memory_store {
            StoreMode::InMemory
        } else {
            StoreMode::Durable(self.store_location()?)
        };
        let store = self.backend.open(&mode).map_err(|source| HarnessError::Open {
            operation: "prepare_for_test".to_string(),
            source,
        })?;

        let fake_keychain = if self.config.use_real_keychain {
            None
        } else {
            Some(Arc::new(FakeKeychain::new()))
        };
        let credentials: Arc<dyn CredentialStore> = match &fake_keychain {
            Some(fake) => Arc::clone(fake) as Arc<dyn CredentialStore>,
            None => Arc::new(SystemKeychain::new(&self.config.keychain_service)),
        };
        self.collaborators = Some(Collaborators {
            store,
            credentials,
            fake_keychain,
        });

        let caches = self.caches()?;
        caches.wipe()?;

        let interactive = self.build_context(ContextRole::Interactive)?;
        let background = self.build_context(ContextRole::Background)?;
        let search = self.build_context(ContextRole::Search)?;
        self.contexts = Some(LiveContexts {
            interactive,
            background,
            search,
        });

        info!(
            in_memory = self.config.use_in_memory_store,
            real_keychain = self.config.use_real_keychain,
            "contexts prepared"
        );
        Ok(())
    }

    /// Block until every lane has finished its work, bounded by the configured
    /// drain timeout.
    pub fn drain(&self) -> Result<(), HarnessError> {
        self.drain_with_timeout(self.config.drain_timeout(), "drain")
    }

    /// Alias for [`drain`](Self::drain).
    pub fn wait_for_contexts_to_finish(&self) -> Result<(), HarnessError> {
        self.drain()
    }

    /// Block until the shared dispatch group is idle or `timeout` elapses.
    ///
    /// Units that panicked since the last drain are reported after the wait, every
    /// message of the first failing lane joined into one error. Failures on other
    /// lanes stay recorded for the next drain.
    pub fn drain_with_timeout(&self, timeout: Duration, operation: &str) -> Result<(), HarnessError> {
        if let Some(tag) = WorkQueue::current() {
            return Err(HarnessError::ProtocolViolation {
                role: tag.role(),
                operation: operation.to_string(),
                detail: "cannot wait for contexts from inside a lane".to_string(),
            });
        }

        if !self.dispatch_group.wait_timeout(timeout) {
            let busy: Vec<ContextRole> = self
                .contexts
                .iter()
                .flat_map(|contexts| contexts.iter())
                .filter(|ctx| ctx.pending() > 0)
                .map(|ctx| ctx.role())
                .collect();
            let outstanding = self.dispatch_group.outstanding();
            warn!(operation, outstanding, ?busy, "contexts did not finish in time");
            return Err(HarnessError::Timeout {
                operation: operation.to_string(),
                timeout,
                outstanding,
                busy,
            });
        }

        if let Some(contexts) = &self.contexts {
            for ctx in contexts.iter() {
                let failures = ctx.take_failures();
                if !failures.is_empty() {
                    return Err(HarnessError::TaskPanicked {
                        role: ctx.role(),
                        message: failures.join("; "),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run `block` on the interactive lane while the interactive context pretends
    /// to be the sync context.
    ///
    /// The call returns only once `block` has finished. The pretend flag is cleared
    /// afterwards even if `block` panics; the panic is then re-raised here.
    pub fn perform_pretending_ui_is_sync<F, R>(&self, block: F) -> Result<R, HarnessError>
    where
        F: FnOnce(&ManagedContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let interactive = self.interactive()?;
        interactive.perform_and_wait(move |ctx| {
            let _pretend = ctx.begin_pretending_sync();
            block(ctx)
        })
    }

    /// Replace the interactive and background contexts with new instances.
    ///
    /// Outstanding work is drained first. With `wipe_persistent_store` the store is
    /// wiped, so earlier records are gone; without it the store is flushed and the
    /// new contexts see everything written before, like a relaunch. The search
    /// context keeps its instance and lane, but it shares the store, so a wipe empties
    /// what it sees too. Caches are left alone.
    pub fn reset_ui_and_sync_contexts(&mut self, wipe_persistent_store: bool) -> Result<(), HarnessError> {
        let operation = "reset_ui_and_sync_contexts";
        self.live(operation)?;
        self.drain_with_timeout(self.config.drain_timeout(), operation)?;

        let store = self.store(operation)?;
        if wipe_persistent_store {
            store.clear().map_err(|source| HarnessError::Wipe {
                operation: operation.to_string(),
                source,
            })?;
        } else {
            store.flush()?;
        }

        let interactive = self.build_context(ContextRole::Interactive)?;
        let background = self.build_context(ContextRole::Background)?;
        let previous = self.contexts.take().ok_or_else(|| not_prepared(operation))?;
        self.contexts = Some(LiveContexts {
            interactive,
            background,
            search: Arc::clone(&previous.search),
        });
        // Old lanes are idle; dropping them joins their threads.
        drop(previous);

        info!(wipe_persistent_store, "interactive and background contexts reset");
        Ok(())
    }

    /// Wait for every lane and verify the test doubles.
    ///
    /// Storage is left untouched.
    pub fn tear_down(&mut self) -> Result<(), HarnessError> {
        self.drain_with_timeout(self.config.drain_timeout(), "tear_down")?;
        if let Some(collaborators) = &self.collaborators {
            collaborators.credentials.verify()?;
        }
        info!(test = self.test_name.as_deref().unwrap_or(""), "torn down");
        Ok(())
    }

    /// Wait for every lane, then release all contexts and the store connection.
    pub fn wait_and_delete_all_contexts(&mut self) -> Result<(), HarnessError> {
        self.drain_with_timeout(self.config.drain_timeout(), "wait_and_delete_all_contexts")?;
        if let Some(contexts) = self.contexts.take() {
            drop(contexts);
            info!("contexts released");
        }
        self.collaborators = None;
        Ok(())
    }

    /// Destroy the durable store on disk.
    ///
    /// Contexts must have been released with
    /// [`wait_and_delete_all_contexts`](Self::wait_and_delete_all_contexts).
    pub fn delete_persistent_store(&mut self) -> Result<(), HarnessError> {
        if self.contexts.is_some() || self.collaborators.is_some() {
            return Err(HarnessError::ProtocolViolation {
                role: ContextRole::Background,
                operation: "delete_persistent_store".to_string(),
                detail: "contexts still hold the store; release them first".to_string(),
            });
        }
        let mode = StoreMode::Durable(self.store_location()?);
        self.backend
            .wipe(&mode)
            .map_err(|source| HarnessError::Wipe {
                operation: "delete_persistent_store".to_string(),
                source,
            })
    }

    /// Create the cache directory of every context role. Idempotent.
    pub fn set_up_caches(&mut self) -> Result<(), HarnessError> {
        self.caches()?.set_up()
    }

    /// Remove every cached blob. A no-op when caches were never set up.
    pub fn wipe_caches(&mut self) -> Result<(), HarnessError> {
        match &self.caches {
            Some(caches) => caches.wipe(),
            None => Ok(()),
        }
    }

    pub fn cache_area(&mut self) -> Result<Arc<CacheArea>, HarnessError> {
        self.caches()
    }

    fn live(&self, operation: &str) -> Result<&LiveContexts, HarnessError> {
        self.contexts.as_ref().ok_or_else(|| not_prepared(operation))
    }

    fn store(&self, operation: &str) -> Result<StoreHandle, HarnessError> {
        self.collaborators
            .as_ref()
            .map(|c| c.store.clone())
            .ok_or_else(|| not_prepared(operation))
    }

    fn build_context(&mut self, role: ContextRole) -> Result<Arc<ManagedContext>, HarnessError> {
        let caches = self.caches()?;
        let collaborators = self
            .collaborators
            .as_ref()
            .ok_or_else(|| not_prepared("build_context"))?;
        ManagedContext::new(
            role,
            collaborators.store.clone(),
            self.dispatch_group.clone(),
            Arc::clone(&collaborators.credentials),
            caches,
        )
    }

    fn caches(&mut self) -> Result<Arc<CacheArea>, HarnessError> {
        if let Some(caches) = &self.caches {
            return Ok(Arc::clone(caches));
        }
        let root = match &self.config.cache_root {
            Some(root) => root.clone(),
            None => self.scratch_dir()?.join("caches"),
        };
        let caches = Arc::new(CacheArea::new(root));
        self.caches = Some(Arc::clone(&caches));
        Ok(caches)
    }

    fn scratch_dir(&mut self) -> Result<PathBuf, HarnessError> {
        if self.scratch.is_none() {
            let dir = TempDir::new().map_err(|e| {
                HarnessError::Config(format!("Failed to create scratch directory: {}", e))
            })?;
            self.scratch = Some(dir);
        }
        match &self.scratch {
            Some(dir) => Ok(dir.path().to_path_buf()),
            None => Err(HarnessError::Config("scratch directory unavailable".to_string())),
        }
    }
}

impl std::fmt::Debug for ContextGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGroup")
            .field("test_name", &self.test_name)
            .field("prepared", &self.is_prepared())
            .field("dispatch_group", &self.dispatch_group)
            .field("config", &self.config)
            .finish()
    }
}

fn not_prepared(operation: &str) -> HarnessError {
    HarnessError::NotPrepared {
        operation: operation.to_string(),
    }
}
