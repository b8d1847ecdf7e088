//! OS keychain backend via the `keyring` crate.
//!
//! Secrets are stored hex-encoded because the platform stores hold strings.

use crate::error::CredentialError;
use crate::keychain::CredentialStore;
use keyring::Entry;

pub struct SystemKeychain {
    service: String,
}

impl SystemKeychain {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, account: &str) -> Result<Entry, CredentialError> {
        Entry::new(&self.service, account).map_err(|e| backend_error(account, e))
    }
}

fn backend_error(account: &str, err: keyring::Error) -> CredentialError {
    CredentialError::Backend {
        account: account.to_string(),
        message: err.to_string(),
    }
}

impl CredentialStore for SystemKeychain {
    fn store(&self, account: &str, secret: &[u8]) -> Result<(), CredentialError> {
        self.entry(account)?
            .set_password(&hex::encode(secret))
            .map_err(|e| backend_error(account, e))
    }

    fn retrieve(&self, account: &str) -> Result<Option<Vec<u8>>, CredentialError> {
        match self.entry(account)?.get_password() {
            Ok(encoded) => hex::decode(encoded)
                .map(Some)
                .map_err(|e| CredentialError::Backend {
                    account: account.to_string(),
                    message: format!("Stored secret is not valid hex: {}", e),
                }),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(backend_error(account, e)),
        }
    }

    fn delete(&self, account: &str) -> Result<bool, CredentialError> {
        match self.entry(account)?.delete_password() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(backend_error(account, e)),
        }
    }
}
