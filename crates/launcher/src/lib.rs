//! Builds hardened, reproducible `docker run` invocations for an interactive
//! development sandbox.
//!
//! The pipeline resolves the host context, discovers host config to expose
//! read-only, synthesizes an identity overlay so the host uid has a name inside
//! the container, and assembles the final argument vector.

pub mod args;
pub mod discovery;
pub mod env;
pub mod error;
pub mod host;
pub mod identity;
pub mod mount;
pub mod plan;
pub mod runtime;

pub use args::{build_launch_plan, passthrough_env_keys, should_always_pull, LaunchRequest};
pub use discovery::{discover_config_mounts, path_exists};
pub use env::{EnvLookup, ProcessEnv};
pub use error::LaunchError;
pub use host::{HostContext, HostIdentity};
pub use identity::{merge_identity, prepare_identity_mounts, IdentityOverlay, OverlayMounts};
pub use mount::MountSpec;
pub use plan::LaunchPlan;
pub use runtime::{CommandOutput, DockerRuntime, RuntimeLauncher};

use tracing::{debug, info, warn};

/// Home directory of the sandbox user.
pub const CONTAINER_HOME: &str = "/home/dev";

/// Name of the sandbox user.
pub const CONTAINER_USER: &str = "dev";

/// Where the host working directory appears inside the sandbox.
pub const SANDBOX_APP_DIR: &str = "/app";

/// Root under which host config mounts are staged, one numbered directory each.
pub const CONFIG_STAGE_ROOT: &str = "/tmp/dockerx-config";

/// Repository of the dockerx image itself.
pub const SELF_IMAGE: &str = "wpkpda/dockerx";

/// Image used when neither `--image` nor `DOCKERX_IMAGE` is given.
pub const DEFAULT_IMAGE: &str = "wpkpda/dockerx:latest";

/// Shell started when no command is given.
pub const DEFAULT_SHELL: &str = "zsh";

/// User-facing knobs for one launch.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub image: String,
    pub shell: String,
    pub command: Vec<String>,
    pub no_pull: bool,
    pub no_config: bool,
    /// Resolve and report only; the runtime is never invoked.
    pub dry_run: bool,
    pub identity: Option<HostIdentity>,
    pub tty: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            command: Vec::new(),
            no_pull: false,
            no_config: false,
            dry_run: false,
            identity: None,
            tty: false,
        }
    }
}

impl LaunchOptions {
    /// The command to run, falling back to the configured shell.
    pub fn effective_command(&self) -> Vec<String> {
        if self.command.is_empty() {
            vec![self.shell.clone()]
        } else {
            self.command.clone()
        }
    }
}

/// Runs the launch pipeline against a runtime and an environment.
pub struct Launcher<'a> {
    runtime: &'a dyn RuntimeLauncher,
    env: &'a dyn EnvLookup,
    exists: &'a dyn Fn(&std::path::Path) -> bool,
}

impl<'a> Launcher<'a> {
    pub fn new(runtime: &'a dyn RuntimeLauncher, env: &'a dyn EnvLookup) -> Self {
        Self {
            runtime,
            env,
            exists: &path_exists,
        }
    }

    /// Replaces the host filesystem existence check used by discovery.
    pub fn with_exists(mut self, exists: &'a dyn Fn(&std::path::Path) -> bool) -> Self {
        self.exists = exists;
        self
    }

    /// Resolves everything needed to launch, without launching.
    ///
    /// A failing identity overlay is logged and skipped. Any other error
    /// aborts, and an overlay created along the way is removed on return.
    pub fn prepare(
        &self,
        options: &LaunchOptions,
        host: &HostContext,
    ) -> Result<PreparedLaunch, LaunchError> {
        if options.image.trim().is_empty() {
            return Err(LaunchError::EmptyImage);
        }

        let config_mounts = if options.no_config {
            debug!("host config mounts disabled");
            Vec::new()
        } else {
            discover_config_mounts(&host.home_dir, self.env, self.exists)
        };

        let overlay = match options.identity {
            Some(identity) if !options.dry_run => {
                let request = identity::IdentityRequest {
                    image: &options.image,
                    username: CONTAINER_USER,
                    home: CONTAINER_HOME,
                    identity,
                };
                match prepare_identity_mounts(self.runtime, &request) {
                    Ok(overlay) => overlay,
                    Err(err) if err.is_overlay_degradation() => {
                        warn!(code = err.code(), "identity overlay disabled: {}", err);
                        OverlayMounts::none()
                    }
                    Err(err) => return Err(err),
                }
            }
            _ => OverlayMounts::none(),
        };

        let command = options.effective_command();
        let request = LaunchRequest {
            image: &options.image,
            working_dir: &host.working_dir,
            command: &command,
            config_mounts: &config_mounts,
            identity_mounts: overlay.mounts(),
            identity: options.identity,
            no_pull: options.no_pull,
            tty: options.tty,
        };
        let plan = build_launch_plan(&request, self.env)?;

        Ok(PreparedLaunch { plan, overlay })
    }
}

/// A resolved plan together with the overlay files it mounts.
///
/// The overlay directory lives exactly as long as this value.
#[derive(Debug)]
pub struct PreparedLaunch {
    plan: LaunchPlan,
    overlay: OverlayMounts,
}

impl PreparedLaunch {
    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    pub fn overlay(&self) -> &OverlayMounts {
        &self.overlay
    }

    /// Runs the sandbox attached to the terminal, then releases the overlay.
    pub fn execute(self, runtime: &dyn RuntimeLauncher) -> Result<(), LaunchError> {
        info!(image = %self.plan.image, "starting sandbox");
        let result = runtime.run_attached(&self.plan.arguments);

        if let Err(err) = self.overlay.cleanup() {
            warn!("failed to remove identity overlay: {}", err);
        }

        match result {
            Ok(Some(0)) => Ok(()),
            Ok(code) => Err(LaunchError::RuntimeExit {
                runtime: runtime.name().to_string(),
                code,
            }),
            Err(source) => Err(LaunchError::RuntimeSpawn {
                runtime: runtime.name().to_string(),
                source,
            }),
        }
    }
}
