//! Spawning the container runtime CLI.

use crate::error::LaunchError;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Captured result of a runtime invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Why a captured invocation produced no output.
#[derive(Debug)]
pub enum CaptureError {
    Spawn(io::Error),
    TimedOut(Duration),
}

/// Something that can run the container runtime with a given argument vector.
pub trait RuntimeLauncher {
    /// Display name used in messages, e.g. `docker`.
    fn name(&self) -> &str;

    /// Runs to completion with stdout/stderr captured and stdin closed.
    fn capture(&self, args: &[String]) -> Result<CommandOutput, CaptureError>;

    /// Runs attached to the caller's terminal and returns the exit code
    /// (`None` when killed by a signal).
    fn run_attached(&self, args: &[String]) -> io::Result<Option<i32>>;
}

/// The real runtime executable found on the host.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    name: String,
    program: PathBuf,
    capture_timeout: Option<Duration>,
}

impl DockerRuntime {
    /// Finds `runtime` (a bare name searched in `PATH`, or a path).
    pub fn locate(runtime: &str) -> Result<Self, LaunchError> {
        let program = which::which(runtime).map_err(|source| LaunchError::RuntimeNotFound {
            runtime: runtime.to_string(),
            source,
        })?;
        debug!(runtime, program = %program.display(), "located container runtime");
        Ok(Self {
            name: runtime.to_string(),
            program,
            capture_timeout: None,
        })
    }

    /// Bounds how long captured invocations (image introspection) may run.
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl RuntimeLauncher for DockerRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&self, args: &[String]) -> Result<CommandOutput, CaptureError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CaptureError::Spawn)?;

        // Drain both pipes on their own threads so a chatty child cannot block
        // on a full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.capture_timeout {
            Some(timeout) => match child.wait_timeout(timeout).map_err(CaptureError::Spawn)? {
                Some(status) => status,
                None => {
                    kill_quietly(&mut child);
                    return Err(CaptureError::TimedOut(timeout));
                }
            },
            None => child.wait().map_err(CaptureError::Spawn)?,
        };

        Ok(CommandOutput {
            status_code: status.code(),
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        })
    }

    /// Runs the sandbox in the foreground.
    ///
    /// While it runs, terminal interrupts are left to the child and SIGTERM
    /// is relayed to it, so this process outlives the child and callers get
    /// to clean up. SIGKILL still leaves caller-owned state behind.
    fn run_attached(&self, args: &[String]) -> io::Result<Option<i32>> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;

        #[cfg(unix)]
        let _relay = signals::Relay::install(child.id());
        let status = child.wait()?;
        Ok(status.code())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
mod signals {
    use std::sync::atomic::{AtomicI32, Ordering};

    static ATTACHED_CHILD: AtomicI32 = AtomicI32::new(0);

    extern "C" fn relay_to_child(sig: libc::c_int) {
        // Async-signal-safe: one atomic load and kill(2).
        let pid = ATTACHED_CHILD.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, sig);
            }
        }
    }

    /// Signal dispositions for the lifetime of one attached child, restored
    /// on drop.
    pub(super) struct Relay {
        previous: Vec<(libc::c_int, libc::sighandler_t)>,
    }

    impl Relay {
        pub(super) fn install(child: u32) -> Self {
            ATTACHED_CHILD.store(child as i32, Ordering::SeqCst);
            let handler = relay_to_child as extern "C" fn(libc::c_int) as libc::sighandler_t;
            let dispositions = [
                // The terminal already delivers these to the child's process group.
                (libc::SIGINT, libc::SIG_IGN),
                (libc::SIGQUIT, libc::SIG_IGN),
                (libc::SIGTERM, handler),
            ];
            // SAFETY: the installed handler only touches an atomic and kill(2).
            let previous = dispositions
                .iter()
                .map(|&(sig, disposition)| (sig, unsafe { libc::signal(sig, disposition) }))
                .collect();
            Self { previous }
        }
    }

    impl Drop for Relay {
        fn drop(&mut self) {
            for &(sig, disposition) in &self.previous {
                unsafe {
                    libc::signal(sig, disposition);
                }
            }
            ATTACHED_CHILD.store(0, Ordering::SeqCst);
        }
    }
}
