use super::{KeyVault, VaultError};

const PROBE_ACCOUNT: &str = "kubert-availability-probe";

/// [`KeyVault`] backed by the platform keychain through the `keyring` crate.
#[derive(Debug, Clone)]
pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    /// Connect to the platform vault, failing fast when it cannot be reached.
    pub fn connect(service: &str) -> Result<Self, VaultError> {
        let entry = keyring::Entry::new(service, PROBE_ACCOUNT)
            .map_err(|e| VaultError::Unavailable(e.to_string()))?;
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(Self {
                service: service.to_string(),
            }),
            Err(err) => Err(VaultError::Unavailable(err.to_string())),
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry, VaultError> {
        keyring::Entry::new(&self.service, account).map_err(|e| VaultError::Backend {
            account: account.to_string(),
            reason: e.to_string(),
        })
    }
}

impl KeyVault for KeyringVault {
    fn get(&self, account: &str) -> Result<Option<String>, VaultError> {
        match self.entry(account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(VaultError::Backend {
                account: account.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn set(&self, account: &str, secret: &str) -> Result<(), VaultError> {
        self.entry(account)?
            .set_password(secret)
            .map_err(|e| VaultError::Backend {
                account: account.to_string(),
                reason: e.to_string(),
            })
    }

    fn delete(&self, account: &str) -> Result<(), VaultError> {
        match self.entry(account)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(VaultError::Backend {
                account: account.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}
