#![cfg(unix)]

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Stand-in runtime: answers `--entrypoint cat` introspection with a minimal
/// base image and records the arguments of any other invocation.
const FAKE_RUNTIME: &str = r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "--entrypoint" ]; then
    for last in "$@"; do :; done
    case "$last" in
      /etc/passwd) printf 'root:x:0:0:root:/root:/bin/bash\n' ;;
      /etc/group) printf 'root:x:0:\n' ;;
      /etc/shadow) printf 'root:*:19793:0:99999:7:::\n' ;;
    esac
    exit 0
  fi
done
printf '%s\n' "$@" > "$DOCKERX_FAKE_LOG"
exit "${DOCKERX_FAKE_EXIT:-0}"
"#;

struct Sandbox {
    temp: TempDir,
}

impl Sandbox {
    fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        fs::create_dir_all(temp.path().join("home"))?;
        fs::create_dir_all(temp.path().join("work"))?;
        let runtime = temp.path().join("fake-docker");
        fs::write(&runtime, FAKE_RUNTIME)?;
        fs::set_permissions(&runtime, fs::Permissions::from_mode(0o755))?;
        Ok(Self { temp })
    }

    fn home(&self) -> PathBuf {
        self.temp.path().join("home")
    }

    fn work(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    fn runtime(&self) -> PathBuf {
        self.temp.path().join("fake-docker")
    }

    fn log(&self) -> PathBuf {
        self.temp.path().join("runtime.log")
    }

    fn command(&self, workdir: &Path) -> Result<Command> {
        let mut cmd = Command::cargo_bin("dockerx")?;
        cmd.current_dir(workdir)
            .env("HOME", self.home())
            .env("DOCKERX_FAKE_LOG", self.log())
            .env_remove("RUST_LOG")
            .env_remove("DOCKERX_IMAGE")
            .env_remove("DOCKERX_USER")
            .env("DOCKERX_RUNTIME", self.runtime())
            .env_remove("DOCKERX_INTROSPECT_TIMEOUT")
            .env_remove("XDG_CONFIG_HOME")
            .env_remove("XDG_CACHE_HOME")
            .env_remove("HF_HOME")
            .env_remove("CODEX_HOME");
        Ok(cmd)
    }
}

#[test]
fn given_dry_run_when_invoked_then_plan_printed_and_runtime_not_started() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let workdir = sandbox.work();

    sandbox
        .command(&workdir)?
        .args(["--dry-run", "--no-config", "--image", "repo/image:latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Image: repo/image:latest"))
        .stdout(predicate::str::contains("Workdir: "))
        .stdout(predicate::str::contains("work -> /app (rw)"))
        .stdout(predicate::str::contains("Host config mounts: none"))
        .stdout(predicate::str::contains("Container command: zsh"))
        .stdout(predicate::str::contains("Docker args: run --rm -i"));

    assert!(!sandbox.log().exists());
    Ok(())
}

#[test]
fn given_home_config_when_dry_run_then_staged_mount_listed() -> Result<()> {
    let sandbox = Sandbox::new()?;
    fs::create_dir_all(sandbox.home().join(".ssh"))?;

    sandbox
        .command(&sandbox.work())?
        .args(["--dry-run", "--image", "repo/image:latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "/.ssh -> /tmp/dockerx-config/0 (ro), copied to /home/dev/.ssh (rw)",
        ))
        .stdout(predicate::str::contains("DOCKERX_CONFIG_COUNT=1"));
    Ok(())
}

#[test]
fn given_json_dry_run_when_invoked_then_plan_is_json() -> Result<()> {
    let sandbox = Sandbox::new()?;

    let output = sandbox
        .command(&sandbox.work())?
        .args([
            "--dry-run",
            "--json",
            "--no-config",
            "--image",
            "repo/image:latest",
            "python",
            "-V",
        ])
        .output()?;

    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(plan["image"], "repo/image:latest");
    assert_eq!(plan["command"], serde_json::json!(["python", "-V"]));
    let arguments = plan["arguments"].as_array().unwrap();
    assert_eq!(arguments.last().unwrap(), "-V");
    Ok(())
}

#[test]
fn given_json_without_dry_run_when_run_then_plan_printed_and_runtime_started() -> Result<()> {
    let sandbox = Sandbox::new()?;

    let output = sandbox
        .command(&sandbox.work())?
        .args([
            "--json",
            "--no-config",
            "--user",
            "0:0",
            "--image",
            "repo/image:latest",
        ])
        .output()?;

    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(plan["image"], "repo/image:latest");
    let log = fs::read_to_string(sandbox.log())?;
    assert!(log.lines().any(|line| line == "repo/image:latest"));
    Ok(())
}

#[test]
fn given_missing_runtime_when_invoked_then_fails_with_not_found() -> Result<()> {
    let sandbox = Sandbox::new()?;

    sandbox
        .command(&sandbox.work())?
        .args(["--runtime", "dockerx-no-such-runtime", "--dry-run"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("dockerx: "))
        .stderr(predicate::str::contains("not found"));
    Ok(())
}

#[test]
fn given_user_override_when_run_then_runtime_gets_identity_overlay() -> Result<()> {
    let sandbox = Sandbox::new()?;

    sandbox
        .command(&sandbox.work())?
        .args([
            "--no-config",
            "--user",
            "1000:1000",
            "--image",
            "repo/image:latest",
            "echo",
            "hi",
        ])
        .assert()
        .success();

    let log = fs::read_to_string(sandbox.log())?;
    let args: Vec<&str> = log.lines().collect();
    assert!(args.windows(2).any(|w| w == ["--user", "1000:1000"]));
    assert!(args.iter().any(|a| a.ends_with("dst=/etc/passwd,readonly")));
    assert!(args.iter().any(|a| a.ends_with("dst=/etc/shadow,readonly")));
    assert_eq!(&args[args.len() - 3..], &["repo/image:latest", "echo", "hi"]);
    Ok(())
}

#[test]
fn given_runtime_failure_when_run_then_exit_status_reported() -> Result<()> {
    let sandbox = Sandbox::new()?;

    sandbox
        .command(&sandbox.work())?
        .env("DOCKERX_FAKE_EXIT", "7")
        .args(["--no-config", "--user", "0:0", "--image", "repo/image:latest"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("run failed: exit status 7"));
    Ok(())
}

#[test]
fn given_comma_in_working_directory_when_invoked_then_rejected() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let workdir = sandbox.temp.path().join("a,b");
    fs::create_dir_all(&workdir)?;

    sandbox
        .command(&workdir)?
        .args(["--dry-run", "--no-config"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unsupported comma"));
    Ok(())
}

#[test]
fn given_malformed_user_when_invoked_then_rejected() -> Result<()> {
    let sandbox = Sandbox::new()?;

    sandbox
        .command(&sandbox.work())?
        .args(["--dry-run", "--user", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid uid:gid"));
    Ok(())
}
