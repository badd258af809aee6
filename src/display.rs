use std::io::{BufRead, Write};

use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::exec::{ExecResult, ExecStatus, PlannedAction};
use crate::protection::{ProtectionReason, ProtectionStatus};

// ── Palette ──────────────────────────────────────────────────────────────────
// Consistent color vocabulary used across every command.
//
//   heading   – bold cyan   (section titles)
//   label     – bold        (field names / keys)
//   id        – cyan        (context names the user can copy/paste)
//   dim       – dimmed      (secondary info, hints)
//   ok        – green       (unprotected / ready)
//   warn      – yellow      (lifted / skipped)
//   danger    – red         (protected / errors)

/// Print a section heading.
pub fn heading(text: &str) {
    println!("{}", text.bold().cyan());
}

/// Format a label: value line (indented).
pub fn kv(label: &str, value: &str) {
    println!("  {} {}", format!("{}:", label).bold(), value);
}

/// Print a hint/footer line.
pub fn hint(text: &str) {
    println!("{}", text.dimmed());
}

/// Print one name per line.
pub fn list(names: &[String]) {
    for name in names {
        println!("{}", name);
    }
}

pub fn warning(text: &str) {
    println!("{}: {}", "WARNING".bright_yellow(), text);
}

// ── Fan-out ──────────────────────────────────────────────────────────────────

const RULE_WIDTH: usize = 80;

pub fn print_exec_header(names: &[String]) {
    println!("Executing command against {} context(s):", names.len());
    for name in names {
        println!("  - {}", name);
    }
    println!();
}

pub fn format_exec_result(result: &ExecResult) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = format!("{rule}\nContext: {}\n{rule}\n", result.context);
    match &result.status {
        ExecStatus::Succeeded => out.push_str(&result.output),
        ExecStatus::Skipped => out.push_str(&format!(
            "{}: context {} is protected, skipping...\n",
            "WARNING".bright_yellow(),
            result.context
        )),
        ExecStatus::Failed(message) => {
            out.push_str(&format!("{}: {}\n", "ERROR".red(), message));
            if !result.output.is_empty() {
                out.push_str(&result.output);
                if !result.output.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
    }
    out
}

pub fn print_exec_result(result: &ExecResult, first: bool) {
    if !first {
        println!();
    }
    print!("{}", format_exec_result(result));
}

pub fn print_dry_run(command: &[String], namespace: &str, plan: &[(String, PlannedAction)]) {
    println!("=== DRY RUN ===");
    println!();
    println!("Command: {}", command.join(" "));
    if !namespace.is_empty() {
        println!("Namespace: {}", namespace);
    }
    println!("Total contexts: {}", plan.len());
    println!();
    println!("Contexts to execute against:");
    for (name, action) in plan {
        println!("  {}", format_plan_line(name, *action));
    }
}

fn format_plan_line(name: &str, action: PlannedAction) -> String {
    match action {
        PlannedAction::Run => format!("{} {}", "✓".green(), name),
        PlannedAction::SkipProtected => {
            format!("{} {} (protected - will be skipped)", "⚠".yellow(), name)
        }
        PlannedAction::FailProtected => {
            format!("{} {} (protected - will fail)", "⊘".yellow(), name)
        }
    }
}

// ── Protection ───────────────────────────────────────────────────────────────

pub fn print_protection_info(
    context: &str,
    status: &ProtectionStatus,
    pattern: Option<&str>,
    now: DateTime<Utc>,
) {
    println!("Context: {}", context.cyan());
    println!();
    match &status.reason {
        ProtectionReason::Lifted { until } => {
            println!(
                "{} Status: {} until {}",
                "⏳".yellow(),
                "LIFTED".yellow(),
                until.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            );
            let remaining = (*until - now).to_std().unwrap_or_default();
            let remaining = std::time::Duration::from_secs(remaining.as_secs());
            println!("   Remaining: {}", humantime::format_duration(remaining));
        }
        ProtectionReason::Override => {
            if status.protected {
                println!("{} Status: {} (explicit override)", "🔒".red(), "PROTECTED".red());
            } else {
                println!(
                    "{} Status: {} (explicit override)",
                    "🔓".green(),
                    "UNPROTECTED".green()
                );
            }
            hint("   Use 'kubert protection remove' to revert to default");
        }
        ProtectionReason::PatternMatch => {
            println!(
                "{} Status: {} (matches default regex)",
                "🔒".red(),
                "PROTECTED".red()
            );
            if let Some(pattern) = pattern {
                println!("   Regex: {}", pattern);
            }
        }
        ProtectionReason::PatternMismatch => println!(
            "{} Status: {} (does not match default regex)",
            "🔓".green(),
            "UNPROTECTED".green()
        ),
        ProtectionReason::NotConfigured => println!(
            "{} Status: {} (no protection configured)",
            "🔓".green(),
            "UNPROTECTED".green()
        ),
    }
}

// ── Selection ────────────────────────────────────────────────────────────────

/// Numbered picker: accepts an index from the list or an exact name. Empty input
/// cancels.
pub fn select_one<R: BufRead, W: Write>(
    items: &[String],
    prompt: &str,
    input: &mut R,
    out: &mut W,
) -> std::io::Result<Option<String>> {
    for (idx, item) in items.iter().enumerate() {
        writeln!(out, "{:>3}) {}", idx + 1, item)?;
    }
    write!(out, "{}: ", prompt)?;
    out.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    if answer.is_empty() {
        return Ok(None);
    }
    if let Ok(n) = answer.parse::<usize>() {
        if (1..=items.len()).contains(&n) {
            return Ok(Some(items[n - 1].clone()));
        }
    }
    Ok(items.iter().find(|item| item.as_str() == answer).cloned())
}
