mod crypto;
mod keychain;

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;

pub use crypto::{random_key_32, ContextKey, CryptoError, KEY_LEN, NONCE_LEN};
pub use keychain::KeyringVault;

/// Keychain service name under which one account per context name is stored.
pub const KEYCHAIN_SERVICE: &str = "kubert-encrypted-kubeconfigs";

#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    #[error("OS credential vault is not available: {0}")]
    Unavailable(String),
    #[error("credential vault error for '{account}': {reason}")]
    Backend { account: String, reason: String },
    #[error("stored key for '{account}' is malformed: {reason}")]
    MalformedKey { account: String, reason: String },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Minimal secret storage used to hold one base64 key per account.
pub trait KeyVault: Send + Sync {
    fn get(&self, account: &str) -> Result<Option<String>, VaultError>;
    /// Create-or-update.
    fn set(&self, account: &str, secret: &str) -> Result<(), VaultError>;
    /// Deleting a missing entry succeeds.
    fn delete(&self, account: &str) -> Result<(), VaultError>;
}

/// Process-local [`KeyVault`]; keys vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryVault {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, account: &str) -> bool {
        self.guard().contains_key(account)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyVault for MemoryVault {
    fn get(&self, account: &str) -> Result<Option<String>, VaultError> {
        Ok(self.guard().get(account).cloned())
    }

    fn set(&self, account: &str, secret: &str) -> Result<(), VaultError> {
        self.guard().insert(account.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), VaultError> {
        self.guard().remove(account);
        Ok(())
    }
}

/// Fetch-or-create per-context keys and run the AEAD with them.
pub struct VaultCipher {
    vault: Box<dyn KeyVault>,
}

impl VaultCipher {
    pub fn new(vault: Box<dyn KeyVault>) -> Self {
        Self { vault }
    }

    /// Cipher over the platform keychain under [`KEYCHAIN_SERVICE`].
    pub fn keychain() -> Result<Self, VaultError> {
        Ok(Self::new(Box::new(KeyringVault::connect(KEYCHAIN_SERVICE)?)))
    }

    pub fn get_or_create_key(&self, context_name: &str) -> Result<ContextKey, VaultError> {
        if let Some(encoded) = self.vault.get(context_name)? {
            return decode_key(context_name, &encoded);
        }

        let key = random_key_32();
        let encoded = base64::engine::general_purpose::STANDARD.encode(key.as_slice());
        self.vault.set(context_name, &encoded)?;
        tracing::debug!(context = context_name, "created new encryption key in vault");
        Ok(key)
    }

    pub fn encrypt(&self, plaintext: &[u8], key: &ContextKey) -> Result<Vec<u8>, CryptoError> {
        crypto::seal(key, plaintext)
    }

    pub fn decrypt(&self, sealed: &[u8], key: &ContextKey) -> Result<Vec<u8>, CryptoError> {
        crypto::open(key, sealed)
    }

    pub fn delete_key(&self, context_name: &str) -> Result<(), VaultError> {
        self.vault.delete(context_name)
    }
}

fn decode_key(account: &str, encoded: &str) -> Result<ContextKey, VaultError> {
    let raw = zeroize::Zeroizing::new(
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| VaultError::MalformedKey {
                account: account.to_string(),
                reason: e.to_string(),
            })?,
    );
    crypto::key_from_slice(&raw).map_err(|e| VaultError::MalformedKey {
        account: account.to_string(),
        reason: e.to_string(),
    })
}
