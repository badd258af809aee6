use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::kubeconfig::Kubeconfig;

pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// RAII guard for temporarily setting/removing an environment variable in tests.
///
/// IMPORTANT: This does not prevent other tests from mutating the environment.
/// Pair usage with `ENV_LOCK` when the variable is shared/global (e.g. HOME).
pub struct ScopedEnvVar {
    key: String,
    old: Option<OsString>,
}

impl ScopedEnvVar {
    pub fn set(key: &str, value: impl AsRef<OsStr>) -> Self {
        let old = std::env::var_os(key);
        std::env::set_var(key, value);
        Self {
            key: key.to_string(),
            old,
        }
    }

    pub fn remove(key: &str) -> Self {
        let old = std::env::var_os(key);
        std::env::remove_var(key);
        Self {
            key: key.to_string(),
            old,
        }
    }
}

impl Drop for ScopedEnvVar {
    fn drop(&mut self) {
        match &self.old {
            Some(v) => std::env::set_var(&self.key, v),
            None => std::env::remove_var(&self.key),
        }
    }
}

/// Kubeconfig YAML with one cluster/user pair per `(context, cluster, user)` triple.
pub fn kubeconfig_yaml(contexts: &[(&str, &str, &str)]) -> String {
    let mut clusters = String::new();
    let mut users = String::new();
    let mut ctxs = String::new();
    for (ctx, cluster, user) in contexts {
        clusters.push_str(&format!(
            "- name: {cluster}\n  cluster:\n    server: https://{cluster}.example.com\n"
        ));
        users.push_str(&format!("- name: {user}\n  user:\n    token: secret-{user}\n"));
        ctxs.push_str(&format!(
            "- name: {ctx}\n  context:\n    cluster: {cluster}\n    user: {user}\n"
        ));
    }
    let current = contexts.first().map(|(ctx, _, _)| *ctx).unwrap_or("");
    format!(
        "apiVersion: v1\nkind: Config\nclusters:\n{clusters}users:\n{users}contexts:\n{ctxs}current-context: \"{current}\"\n"
    )
}

pub fn write_kubeconfig(dir: &Path, file_name: &str, contexts: &[(&str, &str, &str)]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, kubeconfig_yaml(contexts)).unwrap();
    path
}

/// ctx-N -> cluster-N / user-N (token-N), namespace ns-N, for N in 1..=3.
pub fn three_context_kubeconfig() -> Kubeconfig {
    let yaml = r#"
apiVersion: v1
kind: Config
clusters:
- name: cluster-1
  cluster:
    server: https://one.example.com
- name: cluster-2
  cluster:
    server: https://two.example.com
    certificate-authority-data: Y2EtMg==
- name: cluster-3
  cluster:
    server: https://three.example.com
users:
- name: user-1
  user:
    token: token-1
- name: user-2
  user:
    token: token-2
- name: user-3
  user:
    client-key-data: token-3
contexts:
- name: ctx-1
  context:
    cluster: cluster-1
    user: user-1
    namespace: ns-1
- name: ctx-2
  context:
    cluster: cluster-2
    user: user-2
    namespace: ns-2
- name: ctx-3
  context:
    cluster: cluster-3
    user: user-3
    namespace: ns-3
current-context: ctx-1
"#;
    Kubeconfig::from_slice(yaml.as_bytes(), Path::new("three-contexts")).unwrap()
}
