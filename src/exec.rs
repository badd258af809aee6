use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};

use crate::kubeconfig::{ContextRef, Snapshot};
use crate::protection::{BlockAction, ProtectionPolicy};
use crate::state::StateStore;

#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("no command provided")]
    EmptyCommand,
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("one or more commands failed")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    Succeeded,
    /// Protected context under prompt mode; never prompts during fan-out.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub context: String,
    pub output: String,
    pub status: ExecStatus,
}

impl ExecResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, ExecStatus::Failed(_))
    }

    fn failed(context: &str, output: String, message: impl Into<String>) -> Self {
        Self {
            context: context.to_string(),
            output,
            status: ExecStatus::Failed(message.into()),
        }
    }
}

/// What a run would do for a context, without doing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Run,
    SkipProtected,
    FailProtected,
}

/// Runs one command against many contexts, each invocation with its own isolated
/// single-context kubeconfig.
pub struct Executor<'a> {
    policy: &'a ProtectionPolicy,
    state: &'a StateStore,
    namespace: String,
    snapshot_dir: PathBuf,
    now: DateTime<Utc>,
}

impl<'a> Executor<'a> {
    pub fn new(policy: &'a ProtectionPolicy, state: &'a StateStore, namespace: &str) -> Self {
        Self {
            policy,
            state,
            namespace: namespace.to_string(),
            snapshot_dir: std::env::temp_dir(),
            now: Utc::now(),
        }
    }

    pub fn with_snapshot_dir(mut self, dir: &Path) -> Self {
        self.snapshot_dir = dir.to_path_buf();
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn is_protected(&self, name: &str) -> bool {
        let record = self.state.get(name);
        self.policy
            .evaluate(name, record.as_ref(), self.now)
            .protected
    }

    pub fn plan(&self, contexts: &[ContextRef]) -> Vec<(String, PlannedAction)> {
        contexts
            .iter()
            .map(|ctx| {
                let action = if !self.is_protected(&ctx.name) {
                    PlannedAction::Run
                } else {
                    match self.policy.action() {
                        BlockAction::Exit => PlannedAction::FailProtected,
                        BlockAction::Prompt => PlannedAction::SkipProtected,
                    }
                };
                (ctx.name.clone(), action)
            })
            .collect()
    }

    /// Run `args` against one context.
    pub fn run_in_context(&self, ctx: &ContextRef, args: &[String]) -> ExecResult {
        if self.is_protected(&ctx.name) {
            return match self.policy.action() {
                BlockAction::Exit => ExecResult::failed(
                    &ctx.name,
                    String::new(),
                    "context is protected and protection prompts are disabled",
                ),
                BlockAction::Prompt => ExecResult {
                    context: ctx.name.clone(),
                    output: String::new(),
                    status: ExecStatus::Skipped,
                },
            };
        }

        let snapshot = match Snapshot::create_in(
            &self.snapshot_dir,
            &ctx.source.config,
            &ctx.name,
            Some(&self.namespace),
        ) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return ExecResult::failed(
                    &ctx.name,
                    String::new(),
                    format!("failed to create temp kubeconfig: {err}"),
                )
            }
        };

        let result = match run_command(args, snapshot.path()) {
            Ok((output, true)) => ExecResult {
                context: ctx.name.clone(),
                output,
                status: ExecStatus::Succeeded,
            },
            Ok((output, false)) => ExecResult::failed(&ctx.name, output, "command failed"),
            Err(err) => ExecResult::failed(&ctx.name, String::new(), err.to_string()),
        };

        if let Err(err) = snapshot.close() {
            tracing::warn!(context = %ctx.name, error = %err, "failed to remove temp kubeconfig");
        }
        result
    }

    /// Process contexts one at a time in name order, reporting each result before the
    /// next context starts.
    pub fn run_sequential(
        &self,
        contexts: &[ContextRef],
        args: &[String],
        mut on_result: impl FnMut(&ExecResult),
    ) -> Vec<ExecResult> {
        let mut ordered: Vec<&ContextRef> = contexts.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let mut results = Vec::with_capacity(ordered.len());
        for ctx in ordered {
            let result = self.run_in_context(ctx, args);
            on_result(&result);
            results.push(result);
        }
        results
    }

    /// One worker thread per context; results come back sorted by context name once
    /// every worker has finished.
    pub fn run_parallel(&self, contexts: &[ContextRef], args: &[String]) -> Vec<ExecResult> {
        let mut results: Vec<ExecResult> = std::thread::scope(|scope| {
            let handles: Vec<_> = contexts
                .iter()
                .map(|ctx| (ctx, scope.spawn(move || self.run_in_context(ctx, args))))
                .collect();
            handles
                .into_iter()
                .map(|(ctx, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        ExecResult::failed(&ctx.name, String::new(), "worker thread panicked")
                    })
                })
                .collect()
        });
        results.sort_by(|a, b| a.context.cmp(&b.context));
        results
    }
}

/// Fails when any context failed; skipped contexts do not count.
pub fn summarize(results: &[ExecResult]) -> Result<(), ExecError> {
    if results.iter().any(ExecResult::is_failure) {
        Err(ExecError::Failed)
    } else {
        Ok(())
    }
}

/// Run `args` with `KUBECONFIG` pointing at `kubeconfig`, returning stdout followed by
/// stderr and whether the command exited successfully.
pub fn run_command(args: &[String], kubeconfig: &Path) -> Result<(String, bool), ExecError> {
    let (program, rest) = args.split_first().ok_or(ExecError::EmptyCommand)?;
    let output = Command::new(program)
        .args(rest)
        .env("KUBECONFIG", kubeconfig)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((combined, output.status.success()))
}
