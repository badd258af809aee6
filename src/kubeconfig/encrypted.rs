use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::provider::{KubeconfigProvider, SourcedKubeconfig};
use super::{Kubeconfig, KubeconfigError};
use crate::paths;
use crate::vault::VaultCipher;

pub const CATALOG_FILE: &str = "contexts.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedContextMetadata {
    pub name: String,
    pub encrypted_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<PathBuf>,
}

/// Kubeconfigs stored encrypted at rest, one ciphertext per context.
///
/// The storage directory holds `contexts.json`, a cleartext catalog of
/// `{name, encryptedFile, originalFile?}`, and one `<sanitized-name>.encrypted` file per
/// context containing `nonce || ciphertext || tag`.
pub struct EncryptedProvider {
    storage_dir: PathBuf,
    catalog_path: PathBuf,
    cipher: VaultCipher,
}

impl EncryptedProvider {
    pub fn new(storage_dir: &Path, cipher: VaultCipher) -> Result<Self, KubeconfigError> {
        paths::ensure_private_dir(storage_dir).map_err(|e| KubeconfigError::io(storage_dir, e))?;
        Ok(Self {
            storage_dir: storage_dir.to_path_buf(),
            catalog_path: storage_dir.join(CATALOG_FILE),
            cipher,
        })
    }

    /// Provider backed by the platform keychain; fails when the vault is unreachable.
    pub fn with_keychain(storage_dir: &Path) -> Result<Self, KubeconfigError> {
        let cipher = VaultCipher::keychain()?;
        Self::new(storage_dir, cipher)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Encrypt the kubeconfig at `source_path` under `context_name`.
    ///
    /// Re-encrypting an existing name replaces its ciphertext and catalog entry.
    pub fn encrypt(&self, source_path: &Path, context_name: &str) -> Result<PathBuf, KubeconfigError> {
        let raw = std::fs::read(source_path).map_err(|e| KubeconfigError::io(source_path, e))?;
        let parsed = Kubeconfig::from_slice(&raw, source_path)?;
        if parsed.context(context_name).is_none() {
            return Err(KubeconfigError::ContextNotFound(context_name.to_string()));
        }

        let key = self.cipher.get_or_create_key(context_name)?;
        let sealed = self
            .cipher
            .encrypt(&raw, &key)
            .map_err(|source| KubeconfigError::Crypto {
                context: context_name.to_string(),
                source,
            })?;

        let encrypted_file = self
            .storage_dir
            .join(format!("{}.encrypted", sanitize_filename(context_name)));
        if let Some(owner) = self
            .read_catalog()?
            .into_iter()
            .find(|c| c.name != context_name && c.encrypted_file == encrypted_file)
        {
            return Err(KubeconfigError::EncryptedFileConflict {
                context: context_name.to_string(),
                owner: owner.name,
                path: encrypted_file,
            });
        }
        write_private(&self.storage_dir, &encrypted_file, &sealed)?;

        let entry = EncryptedContextMetadata {
            name: context_name.to_string(),
            encrypted_file: encrypted_file.clone(),
            original_file: Some(source_path.to_path_buf()),
        };
        if let Err(err) = self.upsert(entry) {
            if let Err(cleanup) = std::fs::remove_file(&encrypted_file) {
                tracing::warn!(path = %encrypted_file.display(), error = %cleanup, "failed to remove orphaned ciphertext");
            }
            return Err(err);
        }
        Ok(encrypted_file)
    }

    pub fn remove(&self, context_name: &str) -> Result<(), KubeconfigError> {
        let mut catalog = self.read_catalog()?;
        let Some(idx) = catalog.iter().position(|c| c.name == context_name) else {
            return Err(KubeconfigError::EncryptedNotFound(context_name.to_string()));
        };
        let entry = catalog.remove(idx);

        match std::fs::remove_file(&entry.encrypted_file) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(KubeconfigError::io(&entry.encrypted_file, err)),
        }

        if let Err(err) = self.cipher.delete_key(context_name) {
            tracing::warn!(context = context_name, error = %err, "failed to remove encryption key");
        }

        self.write_catalog(&catalog)
    }

    pub fn list(&self) -> Result<Vec<String>, KubeconfigError> {
        Ok(self.read_catalog()?.into_iter().map(|c| c.name).collect())
    }

    fn decrypt_entry(&self, entry: &EncryptedContextMetadata) -> Result<Kubeconfig, KubeconfigError> {
        let sealed = std::fs::read(&entry.encrypted_file)
            .map_err(|e| KubeconfigError::io(&entry.encrypted_file, e))?;
        let key = self.cipher.get_or_create_key(&entry.name)?;
        let plain = zeroize::Zeroizing::new(self.cipher.decrypt(&sealed, &key).map_err(
            |source| KubeconfigError::Crypto {
                context: entry.name.clone(),
                source,
            },
        )?);
        Kubeconfig::from_slice(&plain, &entry.encrypted_file)
    }

    fn upsert(&self, entry: EncryptedContextMetadata) -> Result<(), KubeconfigError> {
        let mut catalog = self.read_catalog()?;
        match catalog.iter_mut().find(|c| c.name == entry.name) {
            Some(existing) => *existing = entry,
            None => catalog.push(entry),
        }
        self.write_catalog(&catalog)
    }

    fn read_catalog(&self) -> Result<Vec<EncryptedContextMetadata>, KubeconfigError> {
        let raw = match std::fs::read(&self.catalog_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(KubeconfigError::io(&self.catalog_path, err)),
        };
        serde_json::from_slice(&raw).map_err(|source| KubeconfigError::Catalog {
            path: self.catalog_path.clone(),
            source,
        })
    }

    fn write_catalog(&self, catalog: &[EncryptedContextMetadata]) -> Result<(), KubeconfigError> {
        let json = serde_json::to_vec_pretty(catalog).map_err(|source| KubeconfigError::Catalog {
            path: self.catalog_path.clone(),
            source,
        })?;
        write_private(&self.storage_dir, &self.catalog_path, &json)
    }
}

impl KubeconfigProvider for EncryptedProvider {
    fn load(&self) -> Result<Vec<SourcedKubeconfig>, KubeconfigError> {
        let catalog = self.read_catalog()?;
        let mut loaded = Vec::with_capacity(catalog.len());
        for entry in &catalog {
            match self.decrypt_entry(entry) {
                Ok(config) => loaded.push(SourcedKubeconfig {
                    config,
                    path: entry.encrypted_file.clone(),
                }),
                Err(err) => {
                    tracing::warn!(context = %entry.name, error = %err, "skipping encrypted context");
                }
            }
        }
        tracing::debug!(count = loaded.len(), "encrypted kubeconfigs loaded");
        Ok(loaded)
    }
}

/// Write `bytes` to `target` atomically with owner-only permissions.
fn write_private(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), KubeconfigError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| KubeconfigError::io(dir, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(|e| KubeconfigError::io(target, e))?;
    }
    tmp.write_all(bytes)
        .map_err(|e| KubeconfigError::io(target, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| KubeconfigError::io(target, e))?;
    tmp.persist(target)
        .map_err(|e| KubeconfigError::io(target, e.error))?;
    Ok(())
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            other => other,
        })
        .collect()
}
