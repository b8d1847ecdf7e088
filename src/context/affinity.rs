//! Lane-identity assertions and pretend affinity.
//!
//! Code written for the background (sync) context asserts its role with
//! [`ManagedContext::require_role`]. During tests the interactive context can pretend
//! to be the sync context so that code runs on a single lane.

use crate::context::ManagedContext;
use crate::error::HarnessError;
use crate::types::ContextRole;
use std::sync::atomic::Ordering;
use tracing::{debug, error};

/// Clears the pretend flag when dropped, including during unwinding.
pub struct PretendGuard<'a> {
    context: &'a ManagedContext,
}

impl Drop for PretendGuard<'_> {
    fn drop(&mut self) {
        self.context.pretend_sync.store(false, Ordering::SeqCst);
        debug!(role = %self.context.role, "pretend affinity cleared");
    }
}

impl ManagedContext {
    /// Whether this context currently pretends to be the sync context.
    pub fn pretends_to_be_sync(&self) -> bool {
        self.pretend_sync.load(Ordering::SeqCst)
    }

    /// True for the background context, or for any context pretending to be it.
    pub fn is_sync_context(&self) -> bool {
        self.role == ContextRole::Background || self.pretends_to_be_sync()
    }

    /// Role this context answers to in lane-identity assertions.
    pub fn effective_role(&self) -> ContextRole {
        if self.pretends_to_be_sync() {
            ContextRole::Background
        } else {
            self.role
        }
    }

    /// Assert that the caller runs on this context's lane and that the context acts
    /// as `expected`.
    pub fn require_role(&self, expected: ContextRole, operation: &str) -> Result<(), HarnessError> {
        self.check_lane(operation)?;
        let actual = self.effective_role();
        if actual != expected {
            error!(role = %self.role, expected = %expected, operation, "context role mismatch");
            return Err(HarnessError::ProtocolViolation {
                role: self.role,
                operation: operation.to_string(),
                detail: format!("expected the {} context, running as {}", expected, actual),
            });
        }
        Ok(())
    }

    /// Set the pretend flag until the returned guard drops.
    pub fn begin_pretending_sync(&self) -> PretendGuard<'_> {
        self.pretend_sync.store(true, Ordering::SeqCst);
        debug!(role = %self.role, "pretending to be the sync context");
        PretendGuard { context: self }
    }
}
