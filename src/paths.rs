use std::path::{Path, PathBuf};

const APP_NAME: &str = "kubert";

/// Best-effort home directory resolution.
///
/// We prefer `dirs::home_dir()`, but that can return `None` in some service/test
/// environments. In those cases, fall back to common environment variables.
pub fn user_home_dir() -> Option<PathBuf> {
    dirs::home_dir()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
}

fn env_dir_override(var: &str) -> Option<PathBuf> {
    let dir = std::env::var(var).ok()?;
    let trimmed = dir.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

/// Return the per-user kubert data directory.
///
/// `KUBERT_DATA_DIR` wins so tests and side-by-side installs can isolate their state.
/// Otherwise `$XDG_DATA_HOME/kubert` (or the platform equivalent), falling back to an
/// absolute temp directory when no home can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = env_dir_override("KUBERT_DATA_DIR") {
        return dir;
    }
    if let Some(dir) = dirs::data_dir() {
        return dir.join(APP_NAME);
    }
    match user_home_dir() {
        Some(home) => home.join(".local").join("share").join(APP_NAME),
        None => std::env::temp_dir().join("kubert-no-home"),
    }
}

/// Return the default config file location (`~/.config/kubert/config.yaml`).
pub fn default_config_path() -> PathBuf {
    let base = user_home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
        .unwrap_or_else(std::env::temp_dir);
    base.join(APP_NAME).join("config.yaml")
}

pub fn state_file_path() -> PathBuf {
    data_dir().join("state.json")
}

pub fn default_encrypted_storage_dir() -> PathBuf {
    data_dir().join("encrypted")
}

/// Expand a leading `~` or `~/` to the user's home directory.
pub fn expand_tilde(raw: &str) -> Result<PathBuf, String> {
    if raw == "~" || raw.starts_with("~/") {
        let home = user_home_dir()
            .ok_or_else(|| format!("failed to get home directory for path {}", raw))?;
        let rest = raw.trim_start_matches('~').trim_start_matches('/');
        return Ok(if rest.is_empty() {
            home
        } else {
            home.join(rest)
        });
    }
    Ok(PathBuf::from(raw))
}

pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScopedEnvVar, ENV_LOCK};

    #[test]
    fn data_dir_honors_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let _dir = ScopedEnvVar::set("KUBERT_DATA_DIR", tmp.path());
        assert_eq!(data_dir(), tmp.path());
        assert_eq!(state_file_path(), tmp.path().join("state.json"));
    }

    #[test]
    fn expand_tilde_only_touches_leading_home_marker() {
        let _lock = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let _home = ScopedEnvVar::set("HOME", tmp.path());
        assert_eq!(
            expand_tilde("~/.kube/config").unwrap(),
            tmp.path().join(".kube/config")
        );
        assert_eq!(
            expand_tilde("/etc/kube/~config").unwrap(),
            PathBuf::from("/etc/kube/~config")
        );
    }

    #[cfg(unix)]
    #[test]
    fn ensure_private_dir_restricts_existing_dirs_and_reports_failures() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("encrypted");
        std::fs::create_dir(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        ensure_private_dir(&dir).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        assert!(ensure_private_dir(&blocker.join("nested")).is_err());
    }
}
