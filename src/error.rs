use crate::config::ConfigError;
use crate::exec::ExecError;
use crate::kubeconfig::KubeconfigError;
use crate::protection::ProtectionError;
use crate::shell::ShellError;
use crate::state::StateError;
use crate::vault::VaultError;

/// Every failure a kubert command can surface.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Kubeconfig(#[from] KubeconfigError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Protection(#[from] ProtectionError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Usage(String),
    /// A wrapped program exited non-zero and has already reported why.
    #[error("command exited with status {0}")]
    ChildExit(i32),
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }
}
