use std::io::Write;
use std::path::Path;

use super::{Kubeconfig, KubeconfigError, NamedContext};

/// Build a document holding only `context_name`, its cluster and its user.
///
/// `namespace` replaces the context namespace in the output when given; `source` is
/// never modified.
pub fn isolate(
    source: &Kubeconfig,
    context_name: &str,
    namespace: Option<&str>,
) -> Result<Kubeconfig, KubeconfigError> {
    let ctx = source
        .context(context_name)
        .ok_or_else(|| KubeconfigError::ContextNotFound(context_name.to_string()))?;
    let cluster = source
        .cluster(&ctx.context.cluster)
        .ok_or_else(|| KubeconfigError::ClusterNotFound {
            context: context_name.to_string(),
            cluster: ctx.context.cluster.clone(),
        })?;
    let user = source
        .user(&ctx.context.user)
        .ok_or_else(|| KubeconfigError::AuthInfoNotFound {
            context: context_name.to_string(),
            user: ctx.context.user.clone(),
        })?;

    let mut spec = ctx.context.clone();
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        spec.namespace = ns.to_string();
    }

    Ok(Kubeconfig {
        api_version: source.api_version.clone(),
        kind: source.kind.clone(),
        preferences: source.preferences.clone(),
        clusters: vec![cluster.clone()],
        users: vec![user.clone()],
        contexts: vec![NamedContext {
            name: context_name.to_string(),
            context: spec,
        }],
        current_context: context_name.to_string(),
        extensions: serde_yaml::Value::Null,
    })
}

/// An owner-only temporary kubeconfig, removed when dropped.
#[derive(Debug)]
pub struct Snapshot {
    file: tempfile::NamedTempFile,
    context: String,
}

impl Snapshot {
    /// Isolate `context_name` from `source` and write it to a fresh `kubert-*.yaml`
    /// file in the system temp directory.
    pub fn create(
        source: &Kubeconfig,
        context_name: &str,
        namespace: Option<&str>,
    ) -> Result<Self, KubeconfigError> {
        Self::create_in(&std::env::temp_dir(), source, context_name, namespace)
    }

    pub fn create_in(
        dir: &Path,
        source: &Kubeconfig,
        context_name: &str,
        namespace: Option<&str>,
    ) -> Result<Self, KubeconfigError> {
        let isolated = isolate(source, context_name, namespace)?;
        let yaml = isolated.to_yaml()?;

        let mut file = tempfile::Builder::new()
            .prefix("kubert-")
            .suffix(".yaml")
            .tempfile_in(dir)
            .map_err(|e| KubeconfigError::io(dir, e))?;
        restrict_to_owner(file.path())?;
        let path = file.path().to_path_buf();
        file.write_all(yaml.as_bytes())
            .map_err(|e| KubeconfigError::io(&path, e))?;
        file.flush().map_err(|e| KubeconfigError::io(&path, e))?;

        tracing::debug!(context = context_name, path = %file.path().display(), "wrote isolated kubeconfig");
        Ok(Self {
            file,
            context: context_name.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Remove the file now, reporting failures instead of swallowing them on drop.
    pub fn close(self) -> Result<(), KubeconfigError> {
        let path = self.file.path().to_path_buf();
        self.file.close().map_err(|e| KubeconfigError::io(&path, e))
    }
}

fn restrict_to_owner(path: &Path) -> Result<(), KubeconfigError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| KubeconfigError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Rewrite the namespace of the current context of the kubeconfig at `path`.
///
/// Returns the name of the context that was updated.
pub fn set_current_namespace(path: &Path, namespace: &str) -> Result<String, KubeconfigError> {
    let mut doc = Kubeconfig::load(path)?;
    let current = doc.current_context.clone();
    if current.is_empty() {
        return Err(KubeconfigError::NoCurrentContext {
            path: path.to_path_buf(),
        });
    }
    let ctx = doc
        .context_mut(&current)
        .ok_or_else(|| KubeconfigError::ContextNotFound(current.clone()))?;
    ctx.context.namespace = namespace.to_string();
    doc.save(path)?;
    Ok(current)
}
