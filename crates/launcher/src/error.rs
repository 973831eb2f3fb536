use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Every failure the launch pipeline can produce.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("image cannot be empty")]
    EmptyImage,

    #[error("{runtime} executable not found in PATH")]
    RuntimeNotFound {
        runtime: String,
        #[source]
        source: which::Error,
    },

    #[error("resolve current directory: {source}")]
    WorkingDir {
        #[source]
        source: std::io::Error,
    },

    #[error("resolve user home directory: home directory is unknown")]
    HomeDir,

    #[error("invalid uid:gid: {value:?}")]
    InvalidIdentity { value: String },

    #[error("read {path} from image {image}: {detail}")]
    ImageIntrospection {
        image: String,
        path: String,
        detail: String,
    },

    #[error("read {path} from image {image}: timed out after {}", whole_seconds(.timeout))]
    IntrospectionTimeout {
        image: String,
        path: String,
        timeout: Duration,
    },

    #[error("{action} {}: {source}", .path.display())]
    OverlayIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} is not valid UTF-8: {}", .path.display())]
    NonUtf8Path { what: &'static str, path: PathBuf },

    #[error("{what} contains an unsupported comma: {value:?}")]
    UnsupportedDelimiter { what: &'static str, value: String },

    #[error("failed to spawn container runtime {runtime}: {source}")]
    RuntimeSpawn {
        runtime: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{runtime} run failed: {}", exit_detail(.code))]
    RuntimeExit { runtime: String, code: Option<i32> },
}

impl LaunchError {
    /// Stable machine-readable identifier for the error.
    pub fn code(&self) -> &'static str {
        match self {
            LaunchError::EmptyImage => "DOCKERX_EMPTY_IMAGE",
            LaunchError::RuntimeNotFound { .. } => "DOCKERX_RUNTIME_NOT_FOUND",
            LaunchError::WorkingDir { .. } => "DOCKERX_WORKDIR_UNRESOLVED",
            LaunchError::HomeDir => "DOCKERX_HOME_UNRESOLVED",
            LaunchError::InvalidIdentity { .. } => "DOCKERX_INVALID_IDENTITY",
            LaunchError::ImageIntrospection { .. } => "DOCKERX_IMAGE_INTROSPECTION",
            LaunchError::IntrospectionTimeout { .. } => "DOCKERX_INTROSPECTION_TIMEOUT",
            LaunchError::OverlayIo { .. } => "DOCKERX_OVERLAY_IO",
            LaunchError::NonUtf8Path { .. } => "DOCKERX_NON_UTF8_PATH",
            LaunchError::UnsupportedDelimiter { .. } => "DOCKERX_UNSUPPORTED_DELIMITER",
            LaunchError::RuntimeSpawn { .. } => "DOCKERX_RUNTIME_SPAWN",
            LaunchError::RuntimeExit { .. } => "DOCKERX_RUNTIME_EXIT",
        }
    }

    /// Errors that only disable the identity overlay; the launch goes on without it.
    pub fn is_overlay_degradation(&self) -> bool {
        matches!(
            self,
            LaunchError::ImageIntrospection { .. }
                | LaunchError::IntrospectionTimeout { .. }
                | LaunchError::OverlayIo { .. }
        )
    }
}

fn exit_detail(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn whole_seconds(timeout: &Duration) -> String {
    format!("{}s", timeout.as_secs())
}
