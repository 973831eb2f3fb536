#![allow(dead_code)]

use launcher::runtime::CaptureError;
use launcher::{CommandOutput, RuntimeLauncher};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

pub const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n";
pub const GROUP: &str = "root:x:0:\n";
pub const SHADOW: &str = "root:*:19793:0:99999:7:::\n";

/// Runtime double that answers `cat <path>` introspection from a map and
/// records every call.
#[derive(Default)]
pub struct FakeRuntime {
    files: BTreeMap<String, String>,
    fail_capture: Option<String>,
    run_timeout: Option<Duration>,
    unspawnable: bool,
    attached_exit: Option<i32>,
    captured: RefCell<Vec<Vec<String>>>,
    attached: RefCell<Vec<Vec<String>>>,
}

impl FakeRuntime {
    pub fn with_image_files(passwd: &str, group: &str, shadow: &str) -> Self {
        let mut files = BTreeMap::new();
        files.insert("/etc/passwd".to_string(), passwd.to_string());
        files.insert("/etc/group".to_string(), group.to_string());
        files.insert("/etc/shadow".to_string(), shadow.to_string());
        Self {
            files,
            attached_exit: Some(0),
            ..Self::default()
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            fail_capture: Some(stderr.to_string()),
            attached_exit: Some(0),
            ..Self::default()
        }
    }

    /// Every `run` capture times out; anything else (cleanup) succeeds.
    pub fn timing_out(timeout: Duration) -> Self {
        Self {
            run_timeout: Some(timeout),
            attached_exit: Some(0),
            ..Self::default()
        }
    }

    /// The runtime executable cannot be started for captures.
    pub fn unspawnable() -> Self {
        Self {
            unspawnable: true,
            attached_exit: Some(0),
            ..Self::default()
        }
    }

    pub fn exiting_with(mut self, code: i32) -> Self {
        self.attached_exit = Some(code);
        self
    }

    pub fn captured(&self) -> Vec<Vec<String>> {
        self.captured.borrow().clone()
    }

    pub fn attached(&self) -> Vec<Vec<String>> {
        self.attached.borrow().clone()
    }
}

impl RuntimeLauncher for FakeRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    fn capture(&self, args: &[String]) -> Result<CommandOutput, CaptureError> {
        self.captured.borrow_mut().push(args.to_vec());
        if self.unspawnable {
            return Err(CaptureError::Spawn(io::Error::new(
                io::ErrorKind::NotFound,
                "runtime vanished",
            )));
        }
        if let Some(timeout) = self.run_timeout {
            if args.first().map(String::as_str) == Some("run") {
                return Err(CaptureError::TimedOut(timeout));
            }
            return Ok(CommandOutput {
                status_code: Some(0),
                ..CommandOutput::default()
            });
        }
        if let Some(stderr) = &self.fail_capture {
            return Ok(CommandOutput {
                status_code: Some(125),
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
            });
        }
        let path = args.last().cloned().unwrap_or_default();
        match self.files.get(&path) {
            Some(contents) => Ok(CommandOutput {
                status_code: Some(0),
                stdout: contents.as_bytes().to_vec(),
                stderr: Vec::new(),
            }),
            None => Ok(CommandOutput {
                status_code: Some(1),
                stdout: Vec::new(),
                stderr: format!("cat: {}: No such file or directory", path).into_bytes(),
            }),
        }
    }

    fn run_attached(&self, args: &[String]) -> io::Result<Option<i32>> {
        self.attached.borrow_mut().push(args.to_vec());
        Ok(self.attached_exit)
    }
}

pub fn contains_pair(values: &[String], first: &str, second: &str) -> bool {
    values.windows(2).any(|w| w[0] == first && w[1] == second)
}

pub fn contains_substring(values: &[String], part: &str) -> bool {
    values.iter().any(|v| v.contains(part))
}
