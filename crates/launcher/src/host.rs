use crate::error::LaunchError;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Where the launch is happening on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    pub working_dir: PathBuf,
    pub home_dir: PathBuf,
}

impl HostContext {
    /// Resolves the current directory and the invoking user's home.
    ///
    /// Both are required; there is no meaningful launch without them.
    pub fn resolve() -> Result<Self, LaunchError> {
        let cwd = std::env::current_dir().map_err(|source| LaunchError::WorkingDir { source })?;
        let working_dir = absolutize(&cwd).map_err(|source| LaunchError::WorkingDir { source })?;
        let home_dir = dirs::home_dir().ok_or(LaunchError::HomeDir)?;

        tracing::debug!(
            working_dir = %working_dir.display(),
            home_dir = %home_dir.display(),
            "resolved host context"
        );

        Ok(Self {
            working_dir,
            home_dir,
        })
    }
}

/// Numeric user and group the sandbox runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl HostIdentity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Effective uid/gid of this process, when the platform has them.
    #[cfg(unix)]
    pub fn current() -> Option<Self> {
        // SAFETY: geteuid/getegid have no preconditions and cannot fail.
        let uid = unsafe { libc::geteuid() };
        let gid = unsafe { libc::getegid() };
        Some(Self { uid, gid })
    }

    #[cfg(not(unix))]
    pub fn current() -> Option<Self> {
        None
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

impl FromStr for HostIdentity {
    type Err = LaunchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || LaunchError::InvalidIdentity {
            value: value.to_string(),
        };
        let (uid, gid) = value.split_once(':').ok_or_else(invalid)?;
        let uid = uid.trim().parse::<u32>().map_err(|_| invalid())?;
        let gid = gid.trim().parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { uid, gid })
    }
}

/// Makes `path` absolute against the current directory and resolves `.` and
/// `..` lexically. Symlinks are left alone.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut clean = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(prefix) => clean.push(prefix.as_os_str()),
            Component::RootDir => clean.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            Component::Normal(part) => clean.push(part),
        }
    }
    Ok(clean)
}
