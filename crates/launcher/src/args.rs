//! Assembly of the `run` argument vector handed to the container runtime.

use crate::env::EnvLookup;
use crate::error::LaunchError;
use crate::host::HostIdentity;
use crate::mount::{ensure_no_delimiter, utf8_path, MountSpec};
use crate::plan::LaunchPlan;
use crate::{CONFIG_STAGE_ROOT, CONTAINER_HOME, CONTAINER_USER, SANDBOX_APP_DIR, SELF_IMAGE};
use std::path::Path;
use tracing::debug;

/// Host variables forwarded into the sandbox when they have a value.
pub const PASSTHROUGH_ENV_KEYS: [&str; 15] = [
    "TERM",
    "COLORTERM",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "AZURE_OPENAI_API_KEY",
    "AZURE_OPENAI_ENDPOINT",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "HF_TOKEN",
    "HUGGINGFACEHUB_API_TOKEN",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
];

/// Docker Hub host prefixes that name the same repository as no prefix.
const DOCKER_HUB_PREFIXES: [&str; 3] = ["docker.io/", "index.docker.io/", "registry-1.docker.io/"];

/// Linux capabilities kept after dropping everything: identity switching and
/// audit logging for login tooling inside the sandbox.
const RETAINED_CAPABILITIES: [&str; 3] = ["SETUID", "SETGID", "AUDIT_WRITE"];

/// Transient writable paths layered over the read-only root.
const TMPFS_MOUNTS: [&str; 5] = [
    "/tmp:mode=1777",
    "/run:mode=755",
    "/var/tmp:mode=1777",
    "/var/lib/apt/lists:mode=755",
    "/var/cache/apt:mode=755",
];

/// Inputs to [`build_launch_plan`].
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub image: &'a str,
    pub working_dir: &'a Path,
    pub command: &'a [String],
    pub config_mounts: &'a [MountSpec],
    pub identity_mounts: &'a [MountSpec],
    /// Numeric identity the sandbox runs as, when known.
    pub identity: Option<HostIdentity>,
    /// Disables the forced pull of the dockerx image.
    pub no_pull: bool,
    /// Whether stdin and stdout are both terminals.
    pub tty: bool,
}

/// True when `image` names the dockerx image itself, on Docker Hub, with any
/// tag. Those are always pulled so the sandbox tooling stays current.
pub fn should_always_pull(image: &str) -> bool {
    let lowered = image.trim().to_lowercase();
    let mut reference = lowered.as_str();
    for prefix in DOCKER_HUB_PREFIXES {
        if let Some(rest) = reference.strip_prefix(prefix) {
            reference = rest;
            break;
        }
    }
    match reference.strip_prefix(SELF_IMAGE) {
        Some("") => true,
        Some(rest) => rest.starts_with(':'),
        None => false,
    }
}

/// Allow-listed variable names that have a non-blank value in `env`, in
/// allow-list order.
pub fn passthrough_env_keys(env: &dyn EnvLookup) -> Vec<String> {
    PASSTHROUGH_ENV_KEYS
        .iter()
        .filter(|key| env.get_non_blank(key).is_some())
        .map(|key| key.to_string())
        .collect()
}

/// Staging directory inside the sandbox for the config mount at `index`.
pub fn stage_path(index: usize) -> String {
    format!("{}/{}", CONFIG_STAGE_ROOT, index)
}

fn validate(request: &LaunchRequest<'_>) -> Result<(), LaunchError> {
    let working_dir = utf8_path("current directory", request.working_dir)?;
    ensure_no_delimiter("current directory", working_dir)?;
    for mount in request.identity_mounts.iter().chain(request.config_mounts) {
        mount.validate()?;
    }
    Ok(())
}

/// Builds the full, deterministic launch plan.
///
/// Every path is checked for UTF-8 and for the mount delimiter before
/// anything is assembled, so an invalid request yields no arguments at all.
pub fn build_launch_plan(
    request: &LaunchRequest<'_>,
    env: &dyn EnvLookup,
) -> Result<LaunchPlan, LaunchError> {
    validate(request)?;

    let mut args = Args::default();
    args.push_all(["run", "--rm", "-i"]);
    if !request.no_pull && should_always_pull(request.image) {
        args.push_all(["--pull", "always"]);
    }
    if request.tty {
        args.push("-t");
    }

    args.push("--read-only");
    args.push_all(["--cap-drop", "ALL"]);
    for cap in RETAINED_CAPABILITIES {
        args.push_all(["--cap-add", cap]);
    }

    let workdir_mount = MountSpec::writable(request.working_dir, SANDBOX_APP_DIR);
    args.flag("--mount", workdir_mount.to_mount_arg());
    for tmpfs in TMPFS_MOUNTS {
        args.push_all(["--tmpfs", tmpfs]);
    }
    args.flag("--tmpfs", home_tmpfs(request.identity));

    args.push_all(["--workdir", SANDBOX_APP_DIR]);
    args.flag("--env", format!("HOME={}", CONTAINER_HOME));
    args.flag("--env", format!("USER={}", CONTAINER_USER));
    args.flag("--env", format!("CODEX_HOME={}/.codex", CONTAINER_HOME));

    if let Some(identity) = request.identity {
        args.flag("--user", identity.to_string());
    }

    for mount in request.identity_mounts {
        args.flag("--mount", mount.to_mount_arg());
    }

    let mut staged = Vec::with_capacity(request.config_mounts.len());
    for (index, mount) in request.config_mounts.iter().enumerate() {
        let stage = stage_path(index);
        let staged_mount = MountSpec::read_only(mount.source(), stage.as_str());
        args.flag("--mount", staged_mount.to_mount_arg());
        args.flag("--env", format!("DOCKERX_CONFIG_SRC_{}={}", index, stage));
        args.flag(
            "--env",
            format!("DOCKERX_CONFIG_DST_{}={}", index, mount.destination()),
        );
        staged.push(mount.clone());
    }
    if !staged.is_empty() {
        args.flag("--env", format!("DOCKERX_CONFIG_COUNT={}", staged.len()));
    }

    let env_keys = passthrough_env_keys(env);
    for key in &env_keys {
        args.flag("--env", key.clone());
    }

    args.push(request.image);
    args.push_all(request.command.iter().map(String::as_str));

    debug!(
        args = args.0.len(),
        config_mounts = staged.len(),
        env_keys = env_keys.len(),
        "assembled launch arguments"
    );

    Ok(LaunchPlan {
        image: request.image.to_string(),
        working_directory: request.working_dir.to_path_buf(),
        command: request.command.to_vec(),
        mounts: staged,
        passthrough_env_keys: env_keys,
        arguments: args.0,
    })
}

fn home_tmpfs(identity: Option<HostIdentity>) -> String {
    match identity {
        Some(id) => format!("{}:mode=755,uid={},gid={}", CONTAINER_HOME, id.uid, id.gid),
        None => format!("{}:mode=755", CONTAINER_HOME),
    }
}

#[derive(Debug, Default)]
struct Args(Vec<String>);

impl Args {
    fn push(&mut self, token: impl Into<String>) {
        self.0.push(token.into());
    }

    fn push_all<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        self.0.extend(tokens.into_iter().map(str::to_string));
    }

    fn flag(&mut self, flag: &str, value: impl Into<String>) {
        self.push(flag);
        self.push(value);
    }
}
