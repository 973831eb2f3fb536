//! Host config and credential directories exposed read-only to the sandbox.

use crate::env::EnvLookup;
use crate::host::absolutize;
use crate::mount::MountSpec;
use crate::CONTAINER_HOME;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base directories the candidate list is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BaseDirs {
    config_home: PathBuf,
    cache_home: PathBuf,
    hf_home: PathBuf,
    codex_home: PathBuf,
}

impl BaseDirs {
    fn resolve(home: &Path, env: &dyn EnvLookup) -> Self {
        let config_home = env_path(env, "XDG_CONFIG_HOME").unwrap_or_else(|| home.join(".config"));
        let cache_home = env_path(env, "XDG_CACHE_HOME").unwrap_or_else(|| home.join(".cache"));
        let hf_home = env_path(env, "HF_HOME").unwrap_or_else(|| cache_home.join("huggingface"));
        let codex_home = env_path(env, "CODEX_HOME").unwrap_or_else(|| home.join(".codex"));

        Self {
            config_home,
            cache_home,
            hf_home,
            codex_home,
        }
    }
}

fn env_path(env: &dyn EnvLookup, key: &str) -> Option<PathBuf> {
    env.get_non_blank(key).map(PathBuf::from)
}

fn in_container_home(relative: &str) -> String {
    format!("{}/{}", CONTAINER_HOME, relative)
}

/// Candidates in priority order. When two resolve to the same host path the
/// earlier one wins.
fn candidates(home: &Path, env: &dyn EnvLookup) -> Vec<MountSpec> {
    let base = BaseDirs::resolve(home, env);
    debug!(?base, "resolved config base directories");

    vec![
        MountSpec::read_only(&base.codex_home, in_container_home(".codex")),
        MountSpec::read_only(base.config_home.join("codex"), in_container_home(".config/codex")),
        MountSpec::read_only(home.join(".openai"), in_container_home(".openai")),
        MountSpec::read_only(base.config_home.join("gh"), in_container_home(".config/gh")),
        MountSpec::read_only(base.config_home.join("git"), in_container_home(".config/git")),
        MountSpec::read_only(home.join(".gitconfig"), in_container_home(".gitconfig")),
        MountSpec::read_only(
            home.join(".git-credentials"),
            in_container_home(".git-credentials"),
        ),
        MountSpec::read_only(home.join(".ssh"), in_container_home(".ssh")),
        MountSpec::read_only(home.join(".huggingface"), in_container_home(".huggingface")),
        MountSpec::read_only(
            base.config_home.join("huggingface"),
            in_container_home(".config/huggingface"),
        ),
        MountSpec::read_only(&base.hf_home, in_container_home(".cache/huggingface")),
    ]
}

/// Returns the read-only config mounts present on this host, sorted by
/// destination.
///
/// `exists` decides whether a candidate source is present. No two returned
/// mounts share a source path.
pub fn discover_config_mounts<F>(home: &Path, env: &dyn EnvLookup, exists: F) -> Vec<MountSpec>
where
    F: Fn(&Path) -> bool,
{
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut found = Vec::new();

    for candidate in candidates(home, env) {
        let source = candidate.source();
        if source.as_os_str().is_empty() || !exists(source) {
            continue;
        }
        let absolute = match absolutize(source) {
            Ok(path) => path,
            Err(err) => {
                debug!(source = %source.display(), error = %err, "skipping unresolvable config path");
                continue;
            }
        };
        if !seen.insert(absolute.clone()) {
            debug!(source = %absolute.display(), "skipping duplicate config source");
            continue;
        }
        found.push(MountSpec::read_only(absolute, candidate.destination()));
    }

    found.sort_by(|a, b| a.destination().cmp(b.destination()));
    debug!(count = found.len(), "discovered host config mounts");
    found
}

/// Existence check against the host filesystem.
pub fn path_exists(path: &Path) -> bool {
    path.exists()
}
