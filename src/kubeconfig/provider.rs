use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use super::{Kubeconfig, KubeconfigError};
use crate::paths;

/// A parsed kubeconfig together with where it came from.
///
/// For filesystem sources `path` is the file itself; encrypted sources report their
/// ciphertext path so duplicate errors still point somewhere meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedKubeconfig {
    pub config: Kubeconfig,
    pub path: PathBuf,
}

pub trait KubeconfigProvider {
    fn load(&self) -> Result<Vec<SourcedKubeconfig>, KubeconfigError>;
}

/// Kubeconfig files found on disk through include/exclude glob patterns.
#[derive(Debug, Clone)]
pub struct FileSystemProvider {
    include: Vec<String>,
    exclude: Vec<String>,
    default_path: Option<PathBuf>,
}

impl FileSystemProvider {
    /// `~/.kube/config` is always considered first when it exists.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        let default_path = paths::user_home_dir().map(|home| home.join(".kube").join("config"));
        Self {
            include,
            exclude,
            default_path,
        }
    }

    pub fn with_default_path(mut self, default_path: Option<PathBuf>) -> Self {
        self.default_path = default_path;
        self
    }

    fn expand_globs(patterns: &[String]) -> Result<Vec<PathBuf>, KubeconfigError> {
        let mut out = Vec::new();
        for pattern in patterns {
            let expanded = paths::expand_tilde(pattern).map_err(|reason| {
                KubeconfigError::Pattern {
                    pattern: pattern.clone(),
                    reason,
                }
            })?;
            let expanded = expanded.to_string_lossy().into_owned();
            let entries = glob::glob(&expanded).map_err(|e| KubeconfigError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            for entry in entries {
                match entry {
                    Ok(path) => out.push(path),
                    Err(err) => {
                        tracing::warn!(pattern = %expanded, error = %err, "skipping unreadable glob match")
                    }
                }
            }
        }
        Ok(out)
    }
}

impl KubeconfigProvider for FileSystemProvider {
    fn load(&self) -> Result<Vec<SourcedKubeconfig>, KubeconfigError> {
        let mut loaded = Vec::new();
        let mut seen = HashSet::new();

        if let Some(default_path) = &self.default_path {
            match std::fs::metadata(default_path) {
                Ok(meta) if meta.is_file() => {
                    let config = Kubeconfig::load(default_path)?;
                    seen.insert(absolutize(default_path));
                    loaded.push(SourcedKubeconfig {
                        config,
                        path: default_path.clone(),
                    });
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(KubeconfigError::io(default_path, err)),
            }
        }

        let excluded: HashSet<PathBuf> = Self::expand_globs(&self.exclude)?
            .into_iter()
            .map(|p| absolutize(&p))
            .collect();

        for file in Self::expand_globs(&self.include)? {
            let abs = absolutize(&file);
            if excluded.contains(&abs) || seen.contains(&abs) {
                continue;
            }
            let meta = std::fs::metadata(&file).map_err(|e| KubeconfigError::io(&file, e))?;
            if meta.is_dir() {
                continue;
            }
            let config = Kubeconfig::load(&file)?;
            seen.insert(abs);
            loaded.push(SourcedKubeconfig { config, path: file });
        }

        tracing::debug!(count = loaded.len(), "kubeconfig files loaded from filesystem");
        Ok(loaded)
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// A context name and the document that defines it.
#[derive(Debug, Clone)]
pub struct ContextRef {
    pub name: String,
    pub source: Arc<SourcedKubeconfig>,
}

/// Aggregates every configured provider.
#[derive(Default)]
pub struct Loader {
    providers: Vec<Box<dyn KubeconfigProvider>>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Box<dyn KubeconfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn load_all(&self) -> Result<Vec<SourcedKubeconfig>, KubeconfigError> {
        let mut all = Vec::new();
        for provider in &self.providers {
            all.extend(provider.load()?);
        }
        Ok(all)
    }

    /// Every context across all providers, sorted by name.
    ///
    /// Context names must be unique across all sources; a collision is reported with
    /// both source paths.
    pub fn load_contexts(&self) -> Result<Vec<ContextRef>, KubeconfigError> {
        index_contexts(self.load_all()?)
    }
}

pub fn index_contexts(
    sources: Vec<SourcedKubeconfig>,
) -> Result<Vec<ContextRef>, KubeconfigError> {
    let mut by_name: BTreeMap<String, ContextRef> = BTreeMap::new();
    let mut origin: HashMap<String, PathBuf> = HashMap::new();

    for source in sources {
        let source = Arc::new(source);
        for name in source.config.context_names() {
            if let Some(first) = origin.get(name) {
                return Err(KubeconfigError::DuplicateContext {
                    name: name.to_string(),
                    first: first.clone(),
                    second: source.path.clone(),
                });
            }
            origin.insert(name.to_string(), source.path.clone());
            by_name.insert(
                name.to_string(),
                ContextRef {
                    name: name.to_string(),
                    source: Arc::clone(&source),
                },
            );
        }
    }

    tracing::debug!(count = by_name.len(), "contexts loaded");
    Ok(by_name.into_values().collect())
}

/// Translate a shell-style glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> String {
    let quoted = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    format!("^{quoted}$")
}

/// Contexts whose name matches any of `patterns`, de-duplicated and sorted by name.
pub fn filter_contexts_by_patterns(
    contexts: &[ContextRef],
    patterns: &[String],
    use_regex: bool,
) -> Result<Vec<ContextRef>, KubeconfigError> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let source = if use_regex {
            pattern.clone()
        } else {
            glob_to_regex(pattern)
        };
        let re = Regex::new(&source).map_err(|e| KubeconfigError::Pattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        compiled.push(re);
    }

    let mut matched: BTreeMap<&str, ContextRef> = BTreeMap::new();
    for ctx in contexts {
        if compiled.iter().any(|re| re.is_match(&ctx.name)) {
            matched.entry(ctx.name.as_str()).or_insert_with(|| ctx.clone());
        }
    }
    Ok(matched.into_values().collect())
}

/// Split a `--contexts` value such as `prod*,staging*` into trimmed patterns.
pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
