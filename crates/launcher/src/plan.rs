use crate::args::stage_path;
use crate::mount::MountSpec;
use crate::SANDBOX_APP_DIR;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Everything resolved for one launch.
///
/// `mounts` are the host config mounts in staging order; `arguments` is the
/// exact vector passed to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchPlan {
    pub image: String,
    pub working_directory: PathBuf,
    pub command: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub passthrough_env_keys: Vec<String>,
    pub arguments: Vec<String>,
}

impl LaunchPlan {
    /// Human-readable summary printed for `--verbose` and `--dry-run`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Image: {}", self.image);
        let _ = writeln!(
            out,
            "Workdir: {} -> {} (rw)",
            self.working_directory.display(),
            SANDBOX_APP_DIR
        );

        if self.mounts.is_empty() {
            let _ = writeln!(out, "Host config mounts: none");
        } else {
            let _ = writeln!(out, "Host config mounts:");
            for (index, mount) in self.mounts.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  - {} -> {} (ro), copied to {} (rw)",
                    mount.source().display(),
                    stage_path(index),
                    mount.destination()
                );
            }
        }

        if self.passthrough_env_keys.is_empty() {
            let _ = writeln!(out, "Passthrough env: none");
        } else {
            let _ = writeln!(
                out,
                "Passthrough env: {}",
                self.passthrough_env_keys.join(", ")
            );
        }

        let _ = writeln!(out, "Container command: {}", self.command.join(" "));
        let _ = writeln!(out, "Docker args: {}", self.arguments.join(" "));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LaunchPlan {
        LaunchPlan {
            image: "repo/image:latest".to_string(),
            working_directory: PathBuf::from("/tmp/work"),
            command: vec!["zsh".to_string()],
            mounts: vec![MountSpec::read_only("/host/.ssh", "/home/dev/.ssh")],
            passthrough_env_keys: vec!["TERM".to_string(), "GH_TOKEN".to_string()],
            arguments: vec!["run".to_string(), "--rm".to_string()],
        }
    }

    #[test]
    fn render_lists_staged_mounts_and_env() {
        let text = sample().render();
        assert!(text.contains("Image: repo/image:latest\n"));
        assert!(text.contains("Workdir: /tmp/work -> /app (rw)\n"));
        assert!(text.contains(
            "  - /host/.ssh -> /tmp/dockerx-config/0 (ro), copied to /home/dev/.ssh (rw)\n"
        ));
        assert!(text.contains("Passthrough env: TERM, GH_TOKEN\n"));
        assert!(text.contains("Container command: zsh\n"));
        assert!(text.ends_with("Docker args: run --rm\n"));
    }

    #[test]
    fn render_reports_empty_sections() {
        let mut plan = sample();
        plan.mounts.clear();
        plan.passthrough_env_keys.clear();
        let text = plan.render();
        assert!(text.contains("Host config mounts: none\n"));
        assert!(text.contains("Passthrough env: none\n"));
        assert!(text.contains("Docker args: run --rm\n"));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["workingDirectory"], "/tmp/work");
        assert_eq!(value["passthroughEnvKeys"][1], "GH_TOKEN");
        assert_eq!(value["mounts"][0]["readOnly"], true);
    }
}
