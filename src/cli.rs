use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "kubert")]
#[command(about = "Switch Kubernetes contexts and namespaces in isolated shells")]
#[command(
    long_about = "kubert switches Kubernetes contexts and namespaces inside isolated shells, so several \
shells can target different contexts and namespaces at the same time.\n\n\
It also wraps kubectl to protect sensitive contexts: commands such as `delete` are blocked or \
need confirmation. Protection only applies to `kubert kubectl`, not to plain `kubectl`."
)]
pub struct Cli {
    /// Config file (default: ~/.config/kubert/config.yaml)
    #[arg(long, global = true, env = "KUBERT_CONFIG")]
    pub config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a shell for a context; `-` reopens the last one
    #[command(visible_alias = "context")]
    Ctx { name: Option<String> },
    /// Switch the namespace of the current kubert shell
    #[command(visible_alias = "namespace")]
    Ns { name: Option<String> },
    /// Run a command against every context matching a pattern
    Exec {
        #[command(flatten)]
        args: ExecArgs,
    },
    /// kubectl wrapper that enforces context protection
    #[command(disable_help_flag = true)]
    Kubectl {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Manage protection of the current context
    Protection {
        #[command(subcommand)]
        command: ProtectionCommand,
    },
    /// Manage kubeconfigs stored encrypted at rest
    Encrypted {
        #[command(subcommand)]
        command: EncryptedCommand,
    },
    /// Show the current context, namespace, cluster or config file
    Which {
        #[command(subcommand)]
        command: WhichCommand,
    },
    Kubeconfig {
        #[command(subcommand)]
        command: KubeconfigCommand,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct ExecArgs {
    /// Comma-separated context patterns, glob-style unless --regex
    #[arg(short = 'c', long)]
    pub contexts: Option<String>,
    /// Namespace used for every context
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,
    /// Treat patterns as regular expressions
    #[arg(long)]
    pub regex: bool,
    /// Run against all contexts concurrently
    #[arg(short = 'p', long)]
    pub parallel: bool,
    /// Show which contexts would be used without running anything
    #[arg(long)]
    pub dry_run: bool,
    /// Command to run, after `--`
    #[arg(required = true, last = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum ProtectionCommand {
    /// Protect the current context
    Protect,
    /// Explicitly unprotect the current context
    Unprotect,
    /// Drop the explicit override and any lift
    Remove,
    /// Suspend protection for a duration such as 5m, 1h or 30s
    Lift { duration: String },
    /// Show the protection status of the current context
    Info {
        #[arg(short = 'o', long, value_enum)]
        output: Option<InfoFormat>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InfoFormat {
    Short,
}

#[derive(Debug, Subcommand)]
pub enum EncryptedCommand {
    /// Encrypt and store a kubeconfig context
    Add { path: PathBuf, context: String },
    /// Remove an encrypted context and its key
    #[command(visible_aliases = ["rm", "delete"])]
    Remove { context: String },
    #[command(visible_alias = "ls")]
    List,
}

#[derive(Debug, Subcommand)]
pub enum WhichCommand {
    #[command(visible_alias = "context")]
    Ctx,
    #[command(visible_alias = "namespace")]
    Ns,
    Cluster,
    #[command(visible_alias = "cfg")]
    Config,
}

#[derive(Debug, Subcommand)]
pub enum KubeconfigCommand {
    /// List the kubeconfig files kubert loads
    List,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the default configuration
    Default,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_takes_command_after_double_dash() {
        let cli = Cli::try_parse_from([
            "kubert", "exec", "-c", "prod*,staging*", "-p", "--", "kubectl", "get", "pods", "-A",
        ])
        .unwrap();
        let Command::Exec { args } = cli.command else {
            panic!("expected exec");
        };
        assert_eq!(args.contexts.as_deref(), Some("prod*,staging*"));
        assert!(args.parallel);
        assert_eq!(args.namespace, "default");
        assert_eq!(args.command, ["kubectl", "get", "pods", "-A"]);
    }

    #[test]
    fn kubectl_passes_flags_through() {
        let cli = Cli::try_parse_from(["kubert", "kubectl", "delete", "pod", "x", "--force"])
            .unwrap();
        let Command::Kubectl { args } = cli.command else {
            panic!("expected kubectl");
        };
        assert_eq!(args, ["delete", "pod", "x", "--force"]);
    }

    #[test]
    fn ctx_accepts_dash_for_last_context() {
        let cli = Cli::try_parse_from(["kubert", "ctx", "-"]).unwrap();
        assert!(matches!(cli.command, Command::Ctx { name: Some(ref n) } if n == "-"));
    }
}
