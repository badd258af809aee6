use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::cli::{
    Cli, Command, ConfigCommand, EncryptedCommand, ExecArgs, InfoFormat, KubeconfigCommand,
    ProtectionCommand, WhichCommand,
};
use crate::config::{Config, LoadedConfig};
use crate::display;
use crate::error::Error;
use crate::exec::{self, Executor};
use crate::kubeconfig::encrypted::EncryptedProvider;
use crate::kubeconfig::isolate::set_current_namespace;
use crate::kubeconfig::provider::split_patterns;
use crate::kubeconfig::{
    filter_contexts_by_patterns, FileSystemProvider, Kubeconfig, KubeconfigError, Loader,
    Snapshot, DEFAULT_NAMESPACE,
};
use crate::logging;
use crate::paths;
use crate::protection::{self, BlockAction, Decision, ProtectionPolicy};
use crate::shell::{self, ShellSession, SHELL_STATE_FILE_ENV};
use crate::state::StateStore;

/// Everything a command needs, built once per invocation.
struct App<'a> {
    config: &'a Config,
    config_source: Option<&'a Path>,
    state: &'a StateStore,
    policy: &'a ProtectionPolicy,
}

pub fn run(cli: Cli) -> Result<(), Error> {
    logging::init(cli.debug);

    match &cli.command {
        Command::Version => {
            println!("kubert {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Config {
            command: ConfigCommand::Default,
        } => {
            print!("{}", Config::default_yaml()?);
            return Ok(());
        }
        _ => {}
    }

    let LoadedConfig { config, source } = Config::load(cli.config.as_deref())?;
    let policy = ProtectionPolicy::from_config(&config.protection)?;
    let state = StateStore::open(&state_file_path())?;
    let app = App {
        config: &config,
        config_source: source.as_deref(),
        state: &state,
        policy: &policy,
    };

    match cli.command {
        Command::Ctx { name } => run_ctx(&app, name),
        Command::Ns { name } => run_ns(&app, name),
        Command::Exec { args } => run_exec(&app, &args),
        Command::Kubectl { args } => run_kubectl(&app, &args),
        Command::Protection { command } => run_protection(&app, command),
        Command::Encrypted { command } => run_encrypted(&app, command),
        Command::Which { command } => run_which(&app, command),
        Command::Kubeconfig {
            command: KubeconfigCommand::List,
        } => {
            for source in build_loader(app.config)?.load_all()? {
                println!("{}", source.path.display());
            }
            Ok(())
        }
        Command::Version | Command::Config { .. } => Ok(()),
    }
}

/// The shell's recorded state file wins so nested commands share one store.
fn state_file_path() -> PathBuf {
    match std::env::var_os(SHELL_STATE_FILE_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => paths::state_file_path(),
    }
}

fn build_loader(config: &Config) -> Result<Loader, Error> {
    let fs = FileSystemProvider::new(
        config.kubeconfigs.include.clone(),
        config.kubeconfigs.exclude.clone(),
    );
    let mut loader = Loader::new().with_provider(Box::new(fs));

    let encrypted = &config.kubeconfig_providers.encrypted;
    if encrypted.enabled {
        let dir = encrypted.resolved_storage_dir()?;
        loader = loader.with_provider(Box::new(EncryptedProvider::with_keychain(&dir)?));
    }
    Ok(loader)
}

fn is_interactive(config: &Config) -> bool {
    config.interactive_shell_mode && std::io::stdin().is_terminal()
}

/// Pick one of `items` interactively, or print them when not interactive.
fn select(app: &App<'_>, items: &[String], prompt: &str) -> Result<Option<String>, Error> {
    if !is_interactive(app.config) {
        display::list(items);
        return Ok(None);
    }
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut out = std::io::stdout();
    Ok(display::select_one(items, prompt, &mut input, &mut out)?)
}

fn run_ctx(app: &App<'_>, name: Option<String>) -> Result<(), Error> {
    let contexts = build_loader(app.config)?.load_contexts()?;
    let names: Vec<String> = contexts.iter().map(|c| c.name.clone()).collect();

    let selected = match name.as_deref() {
        Some("-") => app
            .state
            .last_context()
            .ok_or_else(|| Error::usage("no previous context to switch to"))?,
        Some(name) => name.to_string(),
        None => match select(app, &names, "Context")? {
            Some(name) => name,
            None => return Ok(()),
        },
    };

    let ctx = contexts
        .iter()
        .find(|c| c.name == selected)
        .ok_or_else(|| KubeconfigError::ContextNotFound(selected.clone()))?;
    let namespace = app
        .state
        .get(&ctx.name)
        .map(|record| record.last_namespace)
        .filter(|ns| !ns.is_empty());

    let snapshot = Snapshot::create(&ctx.source.config, &ctx.name, namespace.as_deref())?;
    app.state.set_last_context(&ctx.name)?;

    let session = ShellSession {
        kubeconfig: snapshot.path().to_path_buf(),
        original_kubeconfig: ctx.source.path.clone(),
        state_file: app.state.path().to_path_buf(),
    };
    tracing::debug!(context = snapshot.context(), "starting kubert shell");
    let launched = session.launch();
    if let Err(err) = snapshot.close() {
        tracing::warn!(context = %ctx.name, error = %err, "failed to remove temp kubeconfig");
    }
    Ok(launched?)
}

fn run_ns(app: &App<'_>, name: Option<String>) -> Result<(), Error> {
    let kubeconfig = shell::preflight_check()?;
    let namespaces = shell::list_namespaces(&kubeconfig)?;

    let namespace = match name {
        Some(name) => name,
        None => match select(app, &namespaces, "Namespace")? {
            Some(name) => name,
            None => return Ok(()),
        },
    };
    if !namespaces.contains(&namespace) {
        return Err(Error::usage(format!(
            "namespace \"{namespace}\" does not exist"
        )));
    }

    let context = set_current_namespace(&kubeconfig, &namespace)?;
    app.state.set_namespace_or_create(&context, &namespace)?;
    Ok(())
}

fn run_exec(app: &App<'_>, args: &ExecArgs) -> Result<(), Error> {
    let raw = args.contexts.as_deref().unwrap_or_default();
    let patterns = split_patterns(raw);
    if patterns.is_empty() {
        return Err(Error::usage("--contexts is required"));
    }

    let contexts = build_loader(app.config)?.load_contexts()?;
    let matched = filter_contexts_by_patterns(&contexts, &patterns, args.regex)?;
    if matched.is_empty() {
        return Err(Error::usage(format!(
            "no contexts matched the pattern: {raw}"
        )));
    }

    let executor = Executor::new(app.policy, app.state, &args.namespace);
    if args.dry_run {
        display::print_dry_run(&args.command, executor.namespace(), &executor.plan(&matched));
        return Ok(());
    }

    let names: Vec<String> = matched.iter().map(|c| c.name.clone()).collect();
    display::print_exec_header(&names);

    let results = if args.parallel {
        let results = executor.run_parallel(&matched, &args.command);
        for (idx, result) in results.iter().enumerate() {
            display::print_exec_result(result, idx == 0);
        }
        results
    } else {
        let mut first = true;
        executor.run_sequential(&matched, &args.command, |result| {
            display::print_exec_result(result, first);
            first = false;
        })
    };

    Ok(exec::summarize(&results)?)
}

/// Name of the context the current kubert shell points at.
fn current_context(kubeconfig: &Path) -> Result<String, Error> {
    let doc = Kubeconfig::load(kubeconfig)?;
    if doc.current_context.is_empty() {
        return Err(KubeconfigError::NoCurrentContext {
            path: kubeconfig.to_path_buf(),
        }
        .into());
    }
    Ok(doc.current_context)
}

fn run_kubectl(app: &App<'_>, args: &[String]) -> Result<(), Error> {
    let kubeconfig = shell::preflight_check()?;
    let context = current_context(&kubeconfig)?;
    let now = Utc::now();

    app.state.clear_expired_lift(&context, now)?;
    let record = app.state.get(&context);
    let status = app.policy.evaluate(&context, record.as_ref(), now);
    let verb = args.first().map(String::as_str).unwrap_or_default();

    match app.policy.decide(&status, args) {
        Decision::Allow => {}
        Decision::Block(BlockAction::Exit) => {
            println!(
                "You tried to run the protected kubectl command \"{}\" in the protected context \"{}\".\n\n\
                 The command has not been executed and kubert will exit immediately.\nExiting...",
                verb, context
            );
            return Ok(());
        }
        Decision::Block(BlockAction::Prompt) => {
            display::warning(&format!(
                "you tried to run the protected kubectl command \"{}\" in the protected context \"{}\".\n",
                verb, context
            ));
            let stdin = std::io::stdin();
            let confirmed = protection::confirm(&mut stdin.lock(), &mut std::io::stdout())?;
            if !confirmed {
                println!("Exiting...");
                return Ok(());
            }
            println!();
        }
    }

    match shell::run_inherited("kubectl", args)? {
        0 => Ok(()),
        code => Err(Error::ChildExit(code)),
    }
}

fn run_protection(app: &App<'_>, command: ProtectionCommand) -> Result<(), Error> {
    let kubeconfig = shell::preflight_check()?;
    let context = current_context(&kubeconfig)?;

    match command {
        ProtectionCommand::Protect => {
            app.state.ensure_context(&context)?;
            app.state.set_protection(&context, true)?;
            app.state.clear_lift(&context)?;
            println!("Context \"{}\" is now protected", context);
        }
        ProtectionCommand::Unprotect => {
            app.state.ensure_context(&context)?;
            app.state.set_protection(&context, false)?;
            println!("Context \"{}\" is now unprotected", context);
        }
        ProtectionCommand::Remove => {
            app.state.ensure_context(&context)?;
            app.state.reset_protection(&context)?;
            println!(
                "Protection override removed for context \"{}\", default rules apply",
                context
            );
        }
        ProtectionCommand::Lift { duration } => {
            let parsed = humantime::parse_duration(&duration)
                .map_err(|e| Error::usage(format!("invalid duration \"{duration}\": {e}")))?;
            let delta = chrono::Duration::from_std(parsed)
                .map_err(|e| Error::usage(format!("invalid duration \"{duration}\": {e}")))?;
            let until = Utc::now()
                .checked_add_signed(delta)
                .ok_or_else(|| {
                    Error::usage(format!("invalid duration \"{duration}\": too large"))
                })?;
            app.state.ensure_context(&context)?;
            app.state.lift_protection(&context, until)?;
            println!(
                "Protection lifted for context \"{}\" until {}",
                context,
                until.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            );
        }
        ProtectionCommand::Info { output } => {
            let now = Utc::now();
            let record = app.state.get(&context);
            let status = app.policy.evaluate(&context, record.as_ref(), now);
            match output {
                Some(InfoFormat::Short) => println!("{}", status.short_label()),
                None => display::print_protection_info(&context, &status, app.policy.pattern(), now),
            }
        }
    }
    Ok(())
}

fn run_encrypted(app: &App<'_>, command: EncryptedCommand) -> Result<(), Error> {
    let settings = &app.config.kubeconfig_providers.encrypted;
    if !settings.enabled {
        return Err(Error::usage(
            "encrypted provider is not enabled in configuration (kubeconfigProviders.encrypted.enabled)",
        ));
    }
    let provider = EncryptedProvider::with_keychain(&settings.resolved_storage_dir()?)?;

    match command {
        EncryptedCommand::Add { path, context } => {
            provider.encrypt(&path, &context)?;
            println!(
                "Successfully encrypted context '{}' from '{}'",
                context,
                path.display()
            );
        }
        EncryptedCommand::Remove { context } => {
            provider.remove(&context)?;
            println!("Successfully removed encrypted context '{}'", context);
        }
        EncryptedCommand::List => {
            let mut names = provider.list()?;
            if names.is_empty() {
                display::hint("No encrypted contexts found");
                return Ok(());
            }
            names.sort();
            display::heading("Encrypted contexts");
            for name in &names {
                println!("  {}", name);
            }
            display::kv("Storage", &provider.storage_dir().display().to_string());
        }
    }
    Ok(())
}

fn run_which(app: &App<'_>, command: WhichCommand) -> Result<(), Error> {
    if let WhichCommand::Config = command {
        match app.config_source {
            Some(path) => println!("{}", path.display()),
            None => println!("No config file is being used"),
        }
        return Ok(());
    }

    let path = std::env::var_os("KUBECONFIG")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| Error::usage("KUBECONFIG is not set"))?;
    let doc = Kubeconfig::load(&path)?;
    if doc.current_context.is_empty() {
        return Err(KubeconfigError::NoCurrentContext { path }.into());
    }
    let ctx = doc
        .current()
        .ok_or_else(|| KubeconfigError::ContextNotFound(doc.current_context.clone()))?;

    match command {
        WhichCommand::Ctx => println!("{}", ctx.name),
        WhichCommand::Ns => {
            let ns = ctx.context.namespace.as_str();
            println!("{}", if ns.is_empty() { DEFAULT_NAMESPACE } else { ns });
        }
        WhichCommand::Cluster => println!("{}", ctx.context.cluster),
        WhichCommand::Config => {}
    }
    Ok(())
}
