use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

struct Env {
    root: TempDir,
}

impl Env {
    /// `kubeconfigs` maps file names to comma-separated context names.
    fn new(kubeconfigs: &[(&str, &str)], config_extra: &str) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let kube_dir = root.path().join("kube");
        std::fs::create_dir_all(&kube_dir).expect("kube dir");
        for (file, contexts) in kubeconfigs {
            let names: Vec<&str> = contexts.split(',').collect();
            std::fs::write(kube_dir.join(file), kubeconfig(&names)).expect("write kubeconfig");
        }
        std::fs::create_dir_all(root.path().join("home")).expect("home dir");
        std::fs::create_dir_all(root.path().join("tmp")).expect("tmp dir");

        let config = format!(
            "interactiveShellMode: false\nkubeconfigs:\n  include:\n    - {}/*.yaml\n{}",
            kube_dir.display(),
            config_extra
        );
        std::fs::write(root.path().join("config.yaml"), config).expect("write config");
        Self { root }
    }

    fn kubeconfig_path(&self, file: &str) -> PathBuf {
        self.root.path().join("kube").join(file)
    }

    fn config_path(&self) -> PathBuf {
        self.root.path().join("config.yaml")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_kubert"));
        cmd.env("HOME", self.root.path().join("home"))
            .env("TMPDIR", self.root.path().join("tmp"))
            .env("KUBERT_DATA_DIR", self.root.path().join("data"))
            .env("KUBERT_CONFIG", self.config_path())
            .env_remove("KUBERT_SHELL_ACTIVE")
            .env_remove("KUBERT_SHELL_KUBECONFIG")
            .env_remove("KUBERT_SHELL_STATE_FILE")
            .env_remove("KUBERT_LOG")
            .env_remove("KUBECONFIG")
            .env("NO_COLOR", "1")
            .args(args);
        cmd
    }

    /// Pretend to be inside a kubert shell whose kubeconfig is `kubeconfig`.
    fn shell_command(&self, kubeconfig: &Path, args: &[&str]) -> Command {
        let mut cmd = self.command(args);
        cmd.env("KUBERT_SHELL_ACTIVE", "1")
            .env("KUBECONFIG", kubeconfig)
            .env("KUBERT_SHELL_KUBECONFIG", kubeconfig);
        cmd
    }

    fn in_shell(&self, kubeconfig: &Path, args: &[&str]) -> Output {
        self.shell_command(kubeconfig, args)
            .output()
            .expect("failed to run kubert binary")
    }

    fn tmp_leftovers(&self) -> Vec<String> {
        std::fs::read_dir(self.root.path().join("tmp"))
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("kubert-"))
            .collect()
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args)
            .output()
            .expect("failed to run kubert binary")
    }
}

fn kubeconfig(contexts: &[&str]) -> String {
    let mut out = String::from("apiVersion: v1\nkind: Config\nclusters:\n");
    for ctx in contexts {
        out.push_str(&format!(
            "- name: {ctx}-cluster\n  cluster:\n    server: https://{ctx}.example.com\n"
        ));
    }
    out.push_str("users:\n");
    for ctx in contexts {
        out.push_str(&format!("- name: {ctx}-user\n  user:\n    token: t-{ctx}\n"));
    }
    out.push_str("contexts:\n");
    for ctx in contexts {
        out.push_str(&format!(
            "- name: {ctx}\n  context:\n    cluster: {ctx}-cluster\n    user: {ctx}-user\n"
        ));
    }
    if let Some(first) = contexts.first() {
        out.push_str(&format!("current-context: {first}\n"));
    }
    out
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn assert_ok(output: &Output) {
    assert!(
        output.status.success(),
        "command failed\nstdout:\n{}\nstderr:\n{}",
        stdout(output),
        stderr(output)
    );
}

const EXIT_MODE: &str = "protection:\n  regex: \"^prod\"\n  prompt: false\n";

#[cfg(unix)]
#[test]
fn exec_in_parallel_reports_contexts_in_name_order() {
    let env = Env::new(
        &[("a.yaml", "dev-b,dev-a"), ("b.yaml", "dev-c")],
        "",
    );
    let output = env.run(&[
        "exec",
        "-c",
        "dev-*",
        "-p",
        "--",
        "sh",
        "-c",
        "grep current-context \"$KUBECONFIG\"",
    ]);
    assert_ok(&output);

    let text = stdout(&output);
    assert!(text.contains("Executing command against 3 context(s):"));
    let a = text.find("Context: dev-a").expect("dev-a block");
    let b = text.find("Context: dev-b").expect("dev-b block");
    let c = text.find("Context: dev-c").expect("dev-c block");
    assert!(a < b && b < c, "unexpected order:\n{text}");
    assert!(text.contains("current-context: dev-b"));

    assert!(env.tmp_leftovers().is_empty(), "temp kubeconfigs were not removed");
}

#[cfg(unix)]
#[test]
fn exec_fails_when_a_protected_context_is_refused() {
    let env = Env::new(&[("a.yaml", "dev-a,prod-a")], EXIT_MODE);
    let output = env.run(&["exec", "-c", "*", "--", "sh", "-c", "echo ran"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("one or more commands failed"));
    let text = stdout(&output);
    assert!(text.contains("Context: prod-a"));
    assert!(text.contains("ERROR"));
    assert!(text.contains("ran"));
}

#[cfg(unix)]
#[test]
fn exec_skips_protected_contexts_in_prompt_mode() {
    let env = Env::new(
        &[("a.yaml", "dev-a,prod-a")],
        "protection:\n  regex: \"^prod\"\n",
    );
    let output = env.run(&["exec", "-c", "*", "--", "sh", "-c", "echo ran"]);

    assert_ok(&output);
    assert!(stdout(&output).contains("context prod-a is protected, skipping..."));
}

#[test]
fn exec_dry_run_lists_the_plan_without_running() {
    let env = Env::new(&[("a.yaml", "dev-a,prod-a")], EXIT_MODE);
    let output = env.run(&[
        "exec",
        "-c",
        "dev-a,prod-*",
        "-n",
        "apps",
        "--dry-run",
        "--",
        "kubectl",
        "get",
        "pods",
    ]);
    assert_ok(&output);

    let text = stdout(&output);
    assert!(text.contains("=== DRY RUN ==="));
    assert!(text.contains("Command: kubectl get pods"));
    assert!(text.contains("Namespace: apps"));
    assert!(text.contains("Total contexts: 2"));
    assert!(text.contains("prod-a (protected - will fail)"));
}

#[test]
fn exec_without_matches_is_an_error() {
    let env = Env::new(&[("a.yaml", "dev-a")], "");
    let output = env.run(&["exec", "-c", "nothing-*", "--", "true"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("no contexts matched the pattern: nothing-*"));
}

#[test]
fn duplicate_context_names_across_files_are_rejected() {
    let env = Env::new(&[("a.yaml", "shared"), ("b.yaml", "shared")], "");
    let output = env.run(&["exec", "-c", "*", "--dry-run", "--", "true"]);

    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("duplicate context name \"shared\""));
    assert!(err.contains(&env.kubeconfig_path("a.yaml").display().to_string()));
    assert!(err.contains(&env.kubeconfig_path("b.yaml").display().to_string()));
}

#[test]
fn kubeconfig_list_prints_loaded_files() {
    let env = Env::new(&[("a.yaml", "dev-a"), ("b.yaml", "dev-b")], "");
    let output = env.run(&["kubeconfig", "list"]);
    assert_ok(&output);

    let text = stdout(&output);
    assert!(text.contains(&env.kubeconfig_path("a.yaml").display().to_string()));
    assert!(text.contains(&env.kubeconfig_path("b.yaml").display().to_string()));
}

#[test]
fn config_default_and_which_config() {
    let env = Env::new(&[("a.yaml", "dev-a")], "");

    let output = env.run(&["config", "default"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("interactiveShellMode: true"));

    let output = env.run(&["which", "config"]);
    assert_ok(&output);
    assert_eq!(stdout(&output).trim(), env.config_path().display().to_string());
}

#[test]
fn shell_commands_require_a_kubert_shell() {
    let env = Env::new(&[("a.yaml", "dev-a")], "");
    for args in [
        &["ns", "default"][..],
        &["protection", "info"][..],
        &["kubectl", "get", "pods"][..],
    ] {
        let output = env.run(args);
        assert!(!output.status.success());
        assert!(
            stderr(&output).contains("shell not started by kubert"),
            "{args:?}: {}",
            stderr(&output)
        );
    }
}

#[test]
fn which_reads_the_active_kubeconfig() {
    let env = Env::new(&[("a.yaml", "dev-a")], "");
    let kubeconfig = env.kubeconfig_path("a.yaml");

    let output = env.in_shell(&kubeconfig, &["which", "ctx"]);
    assert_ok(&output);
    assert_eq!(stdout(&output).trim(), "dev-a");

    let output = env.in_shell(&kubeconfig, &["which", "ns"]);
    assert_ok(&output);
    assert_eq!(stdout(&output).trim(), "default");

    let output = env.in_shell(&kubeconfig, &["which", "cluster"]);
    assert_ok(&output);
    assert_eq!(stdout(&output).trim(), "dev-a-cluster");
}

#[test]
fn protected_kubectl_commands_are_refused_in_exit_mode() {
    let env = Env::new(&[("a.yaml", "prod-a")], EXIT_MODE);
    let kubeconfig = env.kubeconfig_path("a.yaml");

    let output = env.in_shell(&kubeconfig, &["kubectl", "delete", "pod", "web-0"]);
    assert_ok(&output);
    let text = stdout(&output);
    assert!(text.contains(
        "You tried to run the protected kubectl command \"delete\" in the protected context \"prod-a\"."
    ));
    assert!(text.contains("The command has not been executed"));
}

#[test]
fn protection_overrides_and_lifts_change_info() {
    let env = Env::new(&[("a.yaml", "prod-a")], EXIT_MODE);
    let kubeconfig = env.kubeconfig_path("a.yaml");
    let short = |env: &Env| {
        let output = env.in_shell(&kubeconfig, &["protection", "info", "-o", "short"]);
        assert_ok(&output);
        stdout(&output).trim().to_string()
    };

    assert_eq!(short(&env), "protected");

    let output = env.in_shell(&kubeconfig, &["protection", "info"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("(matches default regex)"));
    assert!(stdout(&output).contains("Regex: ^prod"));

    assert_ok(&env.in_shell(&kubeconfig, &["protection", "unprotect"]));
    assert_eq!(short(&env), "unprotected");

    assert_ok(&env.in_shell(&kubeconfig, &["protection", "remove"]));
    assert_eq!(short(&env), "protected");

    let output = env.in_shell(&kubeconfig, &["protection", "lift", "5m"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("Protection lifted for context \"prod-a\" until"));
    assert_eq!(short(&env), "lifted");

    let state = std::fs::read_to_string(env.root.path().join("data").join("state.json"))
        .expect("state file");
    assert!(state.contains("prod-a"));
}

#[test]
fn lift_rejects_invalid_durations() {
    let env = Env::new(&[("a.yaml", "prod-a")], EXIT_MODE);
    let kubeconfig = env.kubeconfig_path("a.yaml");
    let output = env.in_shell(&kubeconfig, &["protection", "lift", "soon"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid duration \"soon\""));

    let output = env.in_shell(&kubeconfig, &["protection", "lift", "1000000years"]);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("invalid duration \"1000000years\": too large"));
}

#[test]
fn encrypted_commands_require_the_provider() {
    let env = Env::new(&[("a.yaml", "dev-a")], "");
    let output = env.run(&["encrypted", "list"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("encrypted provider is not enabled in configuration"));
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A `$SHELL` stand-in that records the kubeconfig it was started with and exits.
#[cfg(unix)]
fn recording_shell(env: &Env) -> (PathBuf, PathBuf) {
    let record = env.root.path().join("record");
    std::fs::create_dir_all(&record).unwrap();
    let script = env.root.path().join("fake-shell");
    write_script(
        &script,
        &format!(
            "echo \"$KUBECONFIG\" >> '{dir}/paths'\ncat \"$KUBECONFIG\" > '{dir}/last.yaml'\necho \"$KUBERT_SHELL_ACTIVE\" > '{dir}/active'\n",
            dir = record.display()
        ),
    );
    (script, record)
}

#[cfg(unix)]
#[test]
fn ctx_launches_a_shell_on_an_isolated_kubeconfig_and_cleans_up() {
    let env = Env::new(&[("a.yaml", "dev-a,dev-b")], "");
    let (shell, record) = recording_shell(&env);
    let data = env.root.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(
        data.join("state.json"),
        r#"{"contexts":{"dev-b":{"last_namespace":"apps"}}}"#,
    )
    .unwrap();

    let output = env.command(&["ctx", "-"]).env("SHELL", &shell).output().unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("no previous context to switch to"));

    let output = env.command(&["ctx", "nope"]).env("SHELL", &shell).output().unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("context \"nope\" not found"));

    let output = env.command(&["ctx", "dev-b"]).env("SHELL", &shell).output().unwrap();
    assert_ok(&output);

    let snapshot = std::fs::read_to_string(record.join("last.yaml")).unwrap();
    assert!(snapshot.contains("current-context: dev-b"));
    assert!(snapshot.contains("namespace: apps"));
    assert!(!snapshot.contains("dev-a"));
    assert_eq!(std::fs::read_to_string(record.join("active")).unwrap().trim(), "1");

    let paths = std::fs::read_to_string(record.join("paths")).unwrap();
    let first_path = PathBuf::from(paths.trim());
    assert!(first_path.starts_with(env.root.path().join("tmp")));
    assert!(!first_path.exists(), "snapshot left behind after the shell exited");

    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(data.join("state.json")).unwrap()).unwrap();
    assert_eq!(state["last_context"], "dev-b");

    let output = env.command(&["ctx", "-"]).env("SHELL", &shell).output().unwrap();
    assert_ok(&output);
    let snapshot = std::fs::read_to_string(record.join("last.yaml")).unwrap();
    assert!(snapshot.contains("current-context: dev-b"));
    assert!(snapshot.contains("namespace: apps"));

    let paths = std::fs::read_to_string(record.join("paths")).unwrap();
    let launched: Vec<&str> = paths.lines().collect();
    assert_eq!(launched.len(), 2);
    assert_ne!(launched[0], launched[1]);
    assert!(env.tmp_leftovers().is_empty());
}

/// Puts a fake `kubectl` first on `PATH` that leaves a marker and exits 3.
#[cfg(unix)]
fn fake_kubectl(env: &Env) -> (std::ffi::OsString, PathBuf) {
    let bin = env.root.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let marker = env.root.path().join("kubectl-ran");
    write_script(
        &bin.join("kubectl"),
        &format!("echo \"$@\" > '{}'\nexit 3\n", marker.display()),
    );
    let mut dirs = vec![bin];
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    (std::env::join_paths(dirs).unwrap(), marker)
}

#[cfg(unix)]
fn kubectl_with_answer(env: &Env, path: &std::ffi::OsStr, answer: &str) -> Output {
    let kubeconfig = env.kubeconfig_path("a.yaml");
    let mut child = env
        .shell_command(&kubeconfig, &["kubectl", "delete", "pod", "web-0"])
        .env("PATH", path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run kubert binary");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(answer.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[cfg(unix)]
#[test]
fn prompt_mode_asks_before_running_protected_kubectl_commands() {
    let env = Env::new(&[("a.yaml", "prod-a")], "protection:\n  regex: \"^prod\"\n");
    let (path, marker) = fake_kubectl(&env);

    let output = kubectl_with_answer(&env, &path, "n\n");
    assert_ok(&output);
    let text = stdout(&output);
    assert!(text.contains("Are you sure you want to continue? [y/N]"));
    assert!(text.contains("Exiting..."));
    assert!(!marker.exists(), "kubectl ran after the user declined");

    let output = kubectl_with_answer(&env, &path, "yes\n");
    assert_eq!(output.status.code(), Some(3));
    assert!(!stderr(&output).contains("Error"));
    assert_eq!(
        std::fs::read_to_string(&marker).unwrap().trim(),
        "delete pod web-0"
    );
}
