use crate::error::LaunchError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Separator between fields of a `--mount` argument. It must never appear
/// inside a path handed to the runtime.
pub const MOUNT_DELIMITER: char = ',';

/// A bind mount from the host into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSpec {
    source: PathBuf,
    destination: String,
    read_only: bool,
}

impl MountSpec {
    pub fn read_only(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            read_only: true,
        }
    }

    pub fn writable(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            read_only: false,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Rejects a source or destination that would break the mount syntax or
    /// could not be passed to the runtime unchanged.
    pub fn validate(&self) -> Result<(), LaunchError> {
        let source = utf8_path("mount source", &self.source)?;
        ensure_no_delimiter("mount source", source)?;
        ensure_no_delimiter("mount destination", &self.destination)
    }

    /// Renders the `--mount` value, e.g. `type=bind,src=/a,dst=/b,readonly`.
    pub fn to_mount_arg(&self) -> String {
        let mut arg = format!(
            "type=bind,src={},dst={}",
            self.source.display(),
            self.destination
        );
        if self.read_only {
            arg.push_str(",readonly");
        }
        arg
    }
}

/// `path` as text. Arguments are handed to the runtime as strings, so a
/// path that is not UTF-8 cannot be named without rewriting it.
pub(crate) fn utf8_path<'p>(what: &'static str, path: &'p Path) -> Result<&'p str, LaunchError> {
    path.to_str().ok_or_else(|| LaunchError::NonUtf8Path {
        what,
        path: path.to_path_buf(),
    })
}

pub(crate) fn ensure_no_delimiter(what: &'static str, value: &str) -> Result<(), LaunchError> {
    if value.contains(MOUNT_DELIMITER) {
        return Err(LaunchError::UnsupportedDelimiter {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}
