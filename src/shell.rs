use std::path::{Path, PathBuf};
use std::process::Command;

/// Set to `1` in every shell kubert starts.
pub const SHELL_ACTIVE_ENV: &str = "KUBERT_SHELL_ACTIVE";
/// Path of the isolated kubeconfig the shell was started with.
pub const SHELL_KUBECONFIG_ENV: &str = "KUBERT_SHELL_KUBECONFIG";
pub const SHELL_STATE_FILE_ENV: &str = "KUBERT_SHELL_STATE_FILE";
/// The kubeconfig file the context was isolated from.
pub const SHELL_ORIGINAL_KUBECONFIG_ENV: &str = "KUBERT_SHELL_ORIGINAL_KUBECONFIG";

#[derive(thiserror::Error, Debug)]
pub enum ShellError {
    #[error("shell not started by kubert")]
    NotKubertShell,
    #[error("kubeconfig file not found at {0}")]
    KubeconfigMissing(String),
    #[error("kubeconfig file not found in environment")]
    NoShellKubeconfig,
    #[error(
        "KUBECONFIG environment variable does not match kubert kubeconfig, to prevent kubert from interfering with your original kubeconfigs, please start a new shell with kubert"
    )]
    KubeconfigMismatch,
    #[error("{program} not found in PATH")]
    ProgramNotFound { program: String },
    #[error("timeout listing namespaces: cluster may be unreachable")]
    NamespaceTimeout,
    #[error("failed to list namespaces: {0}")]
    NamespaceList(String),
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Verify we are inside a kubert shell whose `KUBECONFIG` is still the one kubert set.
///
/// Returns the active kubeconfig path.
pub fn preflight_check() -> Result<PathBuf, ShellError> {
    preflight_check_with(|key| std::env::var(key).ok())
}

pub fn preflight_check_with(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf, ShellError> {
    if lookup(SHELL_ACTIVE_ENV).as_deref() != Some("1") {
        return Err(ShellError::NotKubertShell);
    }

    let kubeconfig = lookup("KUBECONFIG").unwrap_or_default();
    if kubeconfig.is_empty() || !Path::new(&kubeconfig).exists() {
        return Err(ShellError::KubeconfigMissing(kubeconfig));
    }

    let recorded = lookup(SHELL_KUBECONFIG_ENV).unwrap_or_default();
    if recorded.is_empty() {
        return Err(ShellError::NoShellKubeconfig);
    }
    if recorded != kubeconfig {
        return Err(ShellError::KubeconfigMismatch);
    }
    Ok(PathBuf::from(kubeconfig))
}

/// Everything an interactive kubert shell needs in its environment.
#[derive(Debug, Clone)]
pub struct ShellSession {
    pub kubeconfig: PathBuf,
    pub original_kubeconfig: PathBuf,
    pub state_file: PathBuf,
}

impl ShellSession {
    pub fn env(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("KUBECONFIG", self.kubeconfig.clone()),
            (SHELL_ACTIVE_ENV, PathBuf::from("1")),
            (SHELL_KUBECONFIG_ENV, self.kubeconfig.clone()),
            (SHELL_STATE_FILE_ENV, self.state_file.clone()),
            (SHELL_ORIGINAL_KUBECONFIG_ENV, self.original_kubeconfig.clone()),
        ]
    }

    /// Start `$SHELL` (or `/bin/sh`) with inherited stdio and wait for it to exit.
    pub fn launch(&self) -> Result<(), ShellError> {
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string());

        let mut cmd = Command::new(&shell);
        for (key, value) in self.env() {
            cmd.env(key, value);
        }
        tracing::debug!(shell = %shell, kubeconfig = %self.kubeconfig.display(), "launching kubert shell");
        let status = cmd.status().map_err(|source| ShellError::Launch {
            program: shell.clone(),
            source,
        })?;
        tracing::debug!(status = ?status.code(), "kubert shell exited");
        Ok(())
    }
}

/// Run a program with inherited stdio, returning its exit code.
pub fn run_inherited(program: &str, args: &[String]) -> Result<i32, ShellError> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ShellError::ProgramNotFound {
                    program: program.to_string(),
                }
            } else {
                ShellError::Launch {
                    program: program.to_string(),
                    source,
                }
            }
        })?;
    Ok(status.code().unwrap_or(1))
}

/// Seconds kubectl may spend on the namespace listing request.
pub const NAMESPACE_LIST_TIMEOUT_SECS: u64 = 10;

/// Namespace names of the cluster behind `kubeconfig`, via `kubectl get namespaces`.
pub fn list_namespaces(kubeconfig: &Path) -> Result<Vec<String>, ShellError> {
    let output = Command::new("kubectl")
        .args([
            "get",
            "namespaces",
            "-o",
            "jsonpath={.items[*].metadata.name}",
        ])
        .arg(format!("--request-timeout={NAMESPACE_LIST_TIMEOUT_SECS}s"))
        .env("KUBECONFIG", kubeconfig)
        .output()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ShellError::ProgramNotFound {
                    program: "kubectl".to_string(),
                }
            } else {
                ShellError::Launch {
                    program: "kubectl".to_string(),
                    source,
                }
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lowered = stderr.to_ascii_lowercase();
        if lowered.contains("timeout") || lowered.contains("deadline exceeded") {
            return Err(ShellError::NamespaceTimeout);
        }
        return Err(ShellError::NamespaceList(stderr));
    }

    Ok(parse_namespace_list(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_namespace_list(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    names.sort();
    names.dedup();
    names
}
