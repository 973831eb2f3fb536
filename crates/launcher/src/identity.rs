//! Synthesized `/etc/passwd`, `/etc/group` and `/etc/shadow` for the sandbox user.
//!
//! The container runs as the host's numeric uid/gid. Tools inside it expect
//! that uid to resolve to a name with a home directory, so the image's own
//! credential databases are read, a matching entry is merged in when missing,
//! and the merged files are bind-mounted read-only over the originals.

use crate::error::LaunchError;
use crate::host::HostIdentity;
use crate::mount::MountSpec;
use crate::runtime::{CaptureError, RuntimeLauncher};
use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing::debug;

pub const PASSWD_PATH: &str = "/etc/passwd";
pub const GROUP_PATH: &str = "/etc/group";
pub const SHADOW_PATH: &str = "/etc/shadow";

/// Login shell given to a synthesized user.
pub const DEFAULT_SHELL: &str = "/bin/zsh";

/// Username used when the requested one is blank.
pub const FALLBACK_USERNAME: &str = "dev";

/// Aging fields of a synthesized shadow entry: empty password, fixed last
/// change day, no minimum age, 99999 day maximum, 7 day warning.
const SHADOW_AGING: &str = "19793:0:99999:7:::";

const PASSWD_MIN_FIELDS: usize = 7;
const GROUP_MIN_FIELDS: usize = 3;

/// What the overlay should provide.
#[derive(Debug, Clone)]
pub struct IdentityRequest<'a> {
    pub image: &'a str,
    pub username: &'a str,
    pub home: &'a str,
    pub identity: HostIdentity,
}

/// Merged credential databases and the identity they resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityOverlay {
    pub passwd: String,
    pub group: String,
    pub shadow: String,
    pub username: String,
    pub home: String,
    pub uid: u32,
    pub gid: u32,
    pub shell: String,
}

/// Merges an entry for `identity` into the base databases.
///
/// An existing passwd entry for the uid keeps its name, and that name is the
/// one used for the group and shadow merges. Nothing already present is
/// duplicated or rewritten.
pub fn merge_identity(
    passwd_base: &str,
    group_base: &str,
    shadow_base: &str,
    username: &str,
    home: &str,
    identity: HostIdentity,
) -> IdentityOverlay {
    let requested = if username.trim().is_empty() {
        FALLBACK_USERNAME
    } else {
        username
    };

    let mut passwd = split_lines(passwd_base);
    let mut group = split_lines(group_base);
    let mut shadow = split_lines(shadow_base);
    let uid = identity.uid.to_string();
    let gid = identity.gid.to_string();

    let existing_user = passwd
        .iter()
        .filter_map(|line| fields(line, PASSWD_MIN_FIELDS))
        .find(|f| f[2] == uid)
        .map(|f| (f[0].to_string(), f[6].to_string()));

    let (runtime_user, shell) = match existing_user {
        Some((name, shell)) => {
            debug!(uid = identity.uid, user = %name, "image already defines uid");
            (name, shell)
        }
        None => {
            passwd.push(format!(
                "{user}:x:{uid}:{gid}:{user} user:{home}:{shell}",
                user = requested,
                uid = uid,
                gid = gid,
                home = home,
                shell = DEFAULT_SHELL
            ));
            (requested.to_string(), DEFAULT_SHELL.to_string())
        }
    };

    let has_group = group
        .iter()
        .filter_map(|line| fields(line, GROUP_MIN_FIELDS))
        .any(|f| f[2] == gid);
    if !has_group {
        group.push(format!("{}:x:{}:", runtime_user, gid));
    }

    let has_shadow = shadow
        .iter()
        .any(|line| line.split(':').next() == Some(runtime_user.as_str()));
    if !has_shadow {
        shadow.push(format!("{}::{}", runtime_user, SHADOW_AGING));
    }

    IdentityOverlay {
        passwd: join_lines(&passwd),
        group: join_lines(&group),
        shadow: join_lines(&shadow),
        username: runtime_user,
        home: home.to_string(),
        uid: identity.uid,
        gid: identity.gid,
        shell,
    }
}

/// Colon-separated fields of `line`, or `None` when it has fewer than `min`.
///
/// Short lines are skipped rather than rejected so odd base images still work.
fn fields(line: &str, min: usize) -> Option<Vec<&str>> {
    let parts: Vec<&str> = line.split(':').collect();
    (parts.len() >= min).then_some(parts)
}

fn split_lines(content: &str) -> Vec<String> {
    content
        .replace("\r\n", "\n")
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Identity mounts plus ownership of the files behind them.
///
/// The backing directory is removed when this value is dropped, so holding
/// it for the lifetime of the launch covers every exit path.
#[derive(Debug, Default)]
pub struct OverlayMounts {
    mounts: Vec<MountSpec>,
    dir: Option<TempDir>,
}

impl OverlayMounts {
    /// No overlay: no mounts and nothing to clean up.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn mounts(&self) -> &[MountSpec] {
        &self.mounts
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Host directory holding the synthesized files, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Removes the backing directory now, reporting failures.
    pub fn cleanup(mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

/// Builds the identity overlay for `request.image`.
///
/// Root needs no overlay. Otherwise the image's databases are read through
/// `runtime`, merged, and written to a private temp directory.
pub fn prepare_identity_mounts(
    runtime: &dyn RuntimeLauncher,
    request: &IdentityRequest<'_>,
) -> Result<OverlayMounts, LaunchError> {
    if request.identity.is_root() {
        debug!("running as root, identity overlay not needed");
        return Ok(OverlayMounts::none());
    }

    let passwd_base = read_image_file(runtime, request.image, PASSWD_PATH)?;
    let group_base = read_image_file(runtime, request.image, GROUP_PATH)?;
    let shadow_base = read_image_file(runtime, request.image, SHADOW_PATH)?;

    let overlay = merge_identity(
        &passwd_base,
        &group_base,
        &shadow_base,
        request.username,
        request.home,
        request.identity,
    );
    debug!(
        user = %overlay.username,
        uid = overlay.uid,
        gid = overlay.gid,
        "synthesized identity overlay"
    );

    materialize(&overlay)
}

/// Writes the overlay files and returns mounts over the standard paths.
pub fn materialize(overlay: &IdentityOverlay) -> Result<OverlayMounts, LaunchError> {
    let dir = tempfile::Builder::new()
        .prefix("dockerx-identity-")
        .tempdir()
        .map_err(|source| LaunchError::OverlayIo {
            action: "create identity temp dir",
            path: std::env::temp_dir(),
            source,
        })?;

    // An early return below drops `dir`, which removes whatever was written.
    let passwd = write_overlay_file(dir.path(), "passwd", &overlay.passwd, 0o644)?;
    let group = write_overlay_file(dir.path(), "group", &overlay.group, 0o644)?;
    let shadow = write_overlay_file(dir.path(), "shadow", &overlay.shadow, 0o400)?;

    Ok(OverlayMounts {
        mounts: vec![
            MountSpec::read_only(passwd, PASSWD_PATH),
            MountSpec::read_only(group, GROUP_PATH),
            MountSpec::read_only(shadow, SHADOW_PATH),
        ],
        dir: Some(dir),
    })
}

fn write_overlay_file(
    dir: &Path,
    name: &'static str,
    contents: &str,
    mode: u32,
) -> Result<PathBuf, LaunchError> {
    let path = dir.join(name);
    let action = match name {
        "passwd" => "write passwd overlay",
        "group" => "write group overlay",
        _ => "write shadow overlay",
    };
    let io_err = |source| LaunchError::OverlayIo {
        action,
        path: path.clone(),
        source,
    };

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(mode);

    let mut file = options.open(&path).map_err(io_err)?;
    file.write_all(contents.as_bytes()).map_err(io_err)?;

    // The umask may have narrowed the creation mode.
    #[cfg(unix)]
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).map_err(io_err)?;
    #[cfg(not(unix))]
    let _ = mode;

    Ok(path)
}

/// Unique name for one introspection container, so a run that outlives its
/// client after a timeout can still be removed.
fn introspection_container_name() -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!(
        "dockerx-introspect-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

fn read_image_file(
    runtime: &dyn RuntimeLauncher,
    image: &str,
    path: &str,
) -> Result<String, LaunchError> {
    let name = introspection_container_name();
    let args: Vec<String> = [
        "run",
        "--rm",
        "--name",
        name.as_str(),
        "--entrypoint",
        "cat",
        image,
        path,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    debug!(image, path, container = %name, "reading credential database from image");
    let output = runtime.capture(&args).map_err(|err| match err {
        CaptureError::Spawn(source) => LaunchError::ImageIntrospection {
            image: image.to_string(),
            path: path.to_string(),
            detail: source.to_string(),
        },
        CaptureError::TimedOut(timeout) => {
            remove_container(runtime, &name);
            LaunchError::IntrospectionTimeout {
                image: image.to_string(),
                path: path.to_string(),
                timeout,
            }
        }
    })?;

    if !output.success() {
        let status = match output.status_code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        return Err(LaunchError::ImageIntrospection {
            image: image.to_string(),
            path: path.to_string(),
            detail: format!("{} ({})", status, output.stderr_lossy().trim()),
        });
    }

    Ok(output.stdout_lossy())
}

/// Killing the runtime client on timeout leaves the container itself
/// running; force-remove it by name. A container that was never created
/// makes this a no-op failure.
fn remove_container(runtime: &dyn RuntimeLauncher, name: &str) {
    let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
    match runtime.capture(&args) {
        Ok(output) if output.success() => debug!(container = name, "removed timed out container"),
        Ok(output) => debug!(
            container = name,
            stderr = %output.stderr_lossy().trim(),
            "timed out container not removed"
        ),
        Err(_) => debug!(container = name, "timed out container not removed"),
    }
}
