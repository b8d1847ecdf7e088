//! Credential backends
//!
//! Contexts reach credentials through [`CredentialStore`]. Tests normally run against
//! [`FakeKeychain`], which records calls and checks expectations at tear down;
//! [`SystemKeychain`] talks to the OS keychain when a test opts into it.

pub mod fake;
pub mod system;

pub use fake::{FakeKeychain, KeychainCall};
pub use system::SystemKeychain;

use crate::error::CredentialError;

/// Capability shared by real and fake credential backends.
pub trait CredentialStore: Send + Sync {
    fn store(&self, account: &str, secret: &[u8]) -> Result<(), CredentialError>;

    fn retrieve(&self, account: &str) -> Result<Option<Vec<u8>>, CredentialError>;

    /// Returns whether an entry existed.
    fn delete(&self, account: &str) -> Result<bool, CredentialError>;

    /// Check that the backend was used as the test expected.
    fn verify(&self) -> Result<(), CredentialError> {
        Ok(())
    }
}

