use std::io::{BufRead, Write};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::ProtectionConfig;
use crate::state::ContextRecord;

#[derive(thiserror::Error, Debug)]
pub enum ProtectionError {
    #[error("invalid protection regex '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to read confirmation: {0}")]
    Prompt(#[from] std::io::Error),
}

/// What happens when a blocked command is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    /// Refuse immediately and exit successfully.
    Exit,
    /// Ask for confirmation; a "no" is not an error.
    Prompt,
}

/// Why a context ended up protected or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionReason {
    Lifted { until: DateTime<Utc> },
    Override,
    PatternMatch,
    PatternMismatch,
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionStatus {
    pub protected: bool,
    pub reason: ProtectionReason,
}

impl ProtectionStatus {
    /// `lifted`, `protected` or `unprotected`.
    pub fn short_label(&self) -> &'static str {
        match (&self.reason, self.protected) {
            (ProtectionReason::Lifted { .. }, _) => "lifted",
            (_, true) => "protected",
            (_, false) => "unprotected",
        }
    }
}

/// Outcome for a single kubectl invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(BlockAction),
}

/// Decides whether destructive kubectl commands are blocked for a context.
///
/// Evaluated fresh for every command: an active lift suspends protection, then an
/// explicit stored override wins, then the configured default regex decides. With none
/// of these the context is unprotected.
#[derive(Debug, Clone)]
pub struct ProtectionPolicy {
    pattern: Option<Regex>,
    commands: Vec<String>,
    action: BlockAction,
}

impl ProtectionPolicy {
    pub fn new(
        pattern: Option<&str>,
        commands: Vec<String>,
        action: BlockAction,
    ) -> Result<Self, ProtectionError> {
        let pattern = match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => Some(Regex::new(p).map_err(|source| ProtectionError::InvalidPattern {
                pattern: p.to_string(),
                source,
            })?),
            None => None,
        };
        Ok(Self {
            pattern,
            commands,
            action,
        })
    }

    pub fn from_config(cfg: &ProtectionConfig) -> Result<Self, ProtectionError> {
        let action = if cfg.prompt {
            BlockAction::Prompt
        } else {
            BlockAction::Exit
        };
        Self::new(cfg.regex.as_deref(), cfg.commands.clone(), action)
    }

    pub fn action(&self) -> BlockAction {
        self.action
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    /// Protection state of `name` given its stored record (if any) at `now`.
    pub fn evaluate(
        &self,
        name: &str,
        record: Option<&ContextRecord>,
        now: DateTime<Utc>,
    ) -> ProtectionStatus {
        if let Some(until) = record.and_then(|r| r.active_lift(now)) {
            return ProtectionStatus {
                protected: false,
                reason: ProtectionReason::Lifted { until },
            };
        }
        if let Some(explicit) = record.and_then(|r| r.protected) {
            return ProtectionStatus {
                protected: explicit,
                reason: ProtectionReason::Override,
            };
        }
        match &self.pattern {
            Some(re) if re.is_match(name) => ProtectionStatus {
                protected: true,
                reason: ProtectionReason::PatternMatch,
            },
            Some(_) => ProtectionStatus {
                protected: false,
                reason: ProtectionReason::PatternMismatch,
            },
            None => ProtectionStatus {
                protected: false,
                reason: ProtectionReason::NotConfigured,
            },
        }
    }

    /// True when the first token of `args` is in the block-list.
    pub fn is_command_blocked(&self, args: &[String]) -> bool {
        args.first()
            .is_some_and(|first| self.commands.iter().any(|c| c == first))
    }

    pub fn decide(&self, status: &ProtectionStatus, args: &[String]) -> Decision {
        if status.protected && self.is_command_blocked(args) {
            Decision::Block(self.action)
        } else {
            Decision::Allow
        }
    }
}

/// Ask `Are you sure you want to continue? [y/N]` and read one answer line.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<bool, ProtectionError> {
    write!(out, "Are you sure you want to continue? [y/N]: ")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
