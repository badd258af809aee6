pub mod encrypted;
pub mod isolate;
pub mod provider;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use crate::vault::{CryptoError, VaultError};

pub use isolate::{isolate, Snapshot};
pub use provider::{
    filter_contexts_by_patterns, glob_to_regex, ContextRef, FileSystemProvider,
    KubeconfigProvider, Loader, SourcedKubeconfig,
};

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(thiserror::Error, Debug)]
pub enum KubeconfigError {
    #[error("context \"{0}\" not found")]
    ContextNotFound(String),
    #[error("cluster \"{cluster}\" referenced by context \"{context}\" not found")]
    ClusterNotFound { context: String, cluster: String },
    #[error("user \"{user}\" referenced by context \"{context}\" not found")]
    AuthInfoNotFound { context: String, user: String },
    #[error(
        "duplicate context name \"{name}\" found:\n  - {}\n  - {}\n\nKubert requires unique context names across all kubeconfig files.\nPlease rename one of these contexts to avoid conflicts",
        first.display(),
        second.display()
    )]
    DuplicateContext {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("no current context set in {}", path.display())]
    NoCurrentContext { path: PathBuf },
    #[error("kubeconfig io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse kubeconfig {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize kubeconfig: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
    #[error("encrypted context \"{0}\" not found")]
    EncryptedNotFound(String),
    #[error(
        "encrypted context \"{context}\" would overwrite {} owned by \"{owner}\"",
        path.display()
    )]
    EncryptedFileConflict {
        context: String,
        owner: String,
        path: PathBuf,
    },
    #[error("failed to decrypt context \"{context}\": {source}")]
    Crypto {
        context: String,
        #[source]
        source: CryptoError,
    },
    #[error("encrypted catalog {} is invalid: {source}", path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl KubeconfigError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        KubeconfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The parts of a kubeconfig kubert reads and rewrites; everything else is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub preferences: Value,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedCluster>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedUser>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default)]
    pub current_context: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extensions: Value,
}

impl Default for Kubeconfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            preferences: Value::Null,
            clusters: Vec::new(),
            users: Vec::new(),
            contexts: Vec::new(),
            current_context: String::new(),
            extensions: Value::Null,
        }
    }
}

/// Cluster and user bodies are opaque to kubert and round-trip as raw YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Config".to_string()
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Kubeconfig {
    pub fn from_slice(raw: &[u8], origin: &Path) -> Result<Self, KubeconfigError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(raw).map_err(|source| KubeconfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, KubeconfigError> {
        let raw = std::fs::read(path).map_err(|e| KubeconfigError::io(path, e))?;
        Self::from_slice(&raw, path)
    }

    pub fn to_yaml(&self) -> Result<String, KubeconfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Overwrite `path` in place, keeping its existing permissions.
    pub fn save(&self, path: &Path) -> Result<(), KubeconfigError> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(|e| KubeconfigError::io(path, e))
    }

    pub fn context(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn context_mut(&mut self, name: &str) -> Option<&mut NamedContext> {
        self.contexts.iter_mut().find(|c| c.name == name)
    }

    pub fn cluster(&self, name: &str) -> Option<&NamedCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&NamedUser> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn context_names(&self) -> impl Iterator<Item = &str> {
        self.contexts
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// The context named by `current-context`, if it is set and present.
    pub fn current(&self) -> Option<&NamedContext> {
        if self.current_context.is_empty() {
            return None;
        }
        self.context(&self.current_context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: v1
kind: Config
preferences: {}
clusters:
- name: cluster-a
  cluster:
    server: https://a.example.com
    certificate-authority-data: QUJD
users:
- name: user-a
  user:
    token: token-a
contexts:
- name: ctx-a
  context:
    cluster: cluster-a
    user: user-a
    namespace: team-a
    extensions:
    - name: marker
      extension: {}
current-context: ctx-a
"#;

    #[test]
    fn parses_named_sections_and_current_context() {
        let cfg = Kubeconfig::from_slice(SAMPLE.as_bytes(), Path::new("sample")).unwrap();
        assert_eq!(cfg.current_context, "ctx-a");
        let ctx = cfg.current().unwrap();
        assert_eq!(ctx.context.cluster, "cluster-a");
        assert_eq!(ctx.context.user, "user-a");
        assert_eq!(ctx.context.namespace, "team-a");
        assert!(ctx.context.extra.contains_key("extensions"));
        assert_eq!(
            cfg.cluster("cluster-a").unwrap().cluster["server"],
            Value::from("https://a.example.com")
        );
    }

    #[test]
    fn reserialized_document_keeps_opaque_fields() {
        let cfg = Kubeconfig::from_slice(SAMPLE.as_bytes(), Path::new("sample")).unwrap();
        let yaml = cfg.to_yaml().unwrap();
        let again = Kubeconfig::from_slice(yaml.as_bytes(), Path::new("again")).unwrap();
        assert_eq!(cfg, again);
        assert!(yaml.contains("current-context: ctx-a"));
        assert!(yaml.contains("certificate-authority-data: QUJD"));
    }

    #[test]
    fn null_and_empty_documents_are_empty_configs() {
        let cfg = Kubeconfig::from_slice(b"\n  \n", Path::new("blank")).unwrap();
        assert!(cfg.contexts.is_empty());

        let cfg = Kubeconfig::from_slice(
            b"apiVersion: v1\nkind: Config\nclusters: null\nusers: null\ncontexts: null\n",
            Path::new("nulls"),
        )
        .unwrap();
        assert!(cfg.clusters.is_empty());
        assert!(cfg.current().is_none());
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = Kubeconfig::from_slice(b"contexts: [", Path::new("/tmp/broken.yaml")).unwrap_err();
        assert!(err.to_string().contains("/tmp/broken.yaml"));
    }

    #[test]
    fn duplicate_error_lists_both_sources() {
        let err = KubeconfigError::DuplicateContext {
            name: "prod".into(),
            first: PathBuf::from("/a/config"),
            second: PathBuf::from("/b/config"),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("duplicate context name \"prod\" found:"));
        assert!(msg.contains("  - /a/config\n  - /b/config"));
    }
}
