//! In-memory credential backend with call recording and expectations.

use crate::error::CredentialError;
use crate::keychain::CredentialStore;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A recorded call against the fake keychain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeychainCall {
    Store(String),
    Retrieve(String),
    Delete(String),
}

impl KeychainCall {
    fn describe(&self) -> String {
        match self {
            KeychainCall::Store(account) => format!("store({})", account),
            KeychainCall::Retrieve(account) => format!("retrieve({})", account),
            KeychainCall::Delete(account) => format!("delete({})", account),
        }
    }
}

#[derive(Default)]
struct FakeState {
    entries: HashMap<String, Vec<u8>>,
    calls: Vec<KeychainCall>,
    expected: Vec<(KeychainCall, bool)>,
}

impl FakeState {
    fn record(&mut self, call: KeychainCall) {
        if let Some(slot) = self
            .expected
            .iter_mut()
            .find(|(expected, satisfied)| !*satisfied && *expected == call)
        {
            slot.1 = true;
        }
        self.calls.push(call);
    }
}

/// Test double for the OS keychain.
#[derive(Default)]
pub struct FakeKeychain {
    state: Mutex<FakeState>,
}

impl FakeKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect exactly one more call matching `call` before verification.
    pub fn expect(&self, call: KeychainCall) {
        self.state.lock().expected.push((call, false));
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<KeychainCall> {
        self.state.lock().calls.clone()
    }
}

impl CredentialStore for FakeKeychain {
    fn store(&self, account: &str, secret: &[u8]) -> Result<(), CredentialError> {
        let mut state = self.state.lock();
        state.record(KeychainCall::Store(account.to_string()));
        state.entries.insert(account.to_string(), secret.to_vec());
        Ok(())
    }

    fn retrieve(&self, account: &str) -> Result<Option<Vec<u8>>, CredentialError> {
        let mut state = self.state.lock();
        state.record(KeychainCall::Retrieve(account.to_string()));
        Ok(state.entries.get(account).cloned())
    }

    fn delete(&self, account: &str) -> Result<bool, CredentialError> {
        let mut state = self.state.lock();
        state.record(KeychainCall::Delete(account.to_string()));
        Ok(state.entries.remove(account).is_some())
    }

    fn verify(&self) -> Result<(), CredentialError> {
        let state = self.state.lock();
        let unmet: Vec<String> = state
            .expected
            .iter()
            .filter(|(_, satisfied)| !*satisfied)
            .map(|(call, _)| call.describe())
            .collect();
        if unmet.is_empty() {
            Ok(())
        } else {
            Err(CredentialError::UnmetExpectations(unmet))
        }
    }
}
