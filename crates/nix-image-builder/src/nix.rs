//! `nix build` invocation
//!
//! The build tool sits behind the narrow [`BuildTool`] trait (build a target,
//! hand back the output path, honour cancellation) so the load/identify logic
//! can be exercised with a fake in tests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::config::ResolvedConfig;
use crate::error::BuilderError;
use crate::Result;

/// Fully-qualified flake output to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    pub source_dir: PathBuf,
    pub system: String,
    pub name: String,
}

impl BuildTarget {
    pub fn new(source_dir: &Path, resolved: &ResolvedConfig) -> Self {
        BuildTarget {
            source_dir: source_dir.to_path_buf(),
            system: resolved.system.clone(),
            name: resolved.name.clone(),
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#legacyPackages.{}.{}",
            self.source_dir.display(),
            self.system,
            self.name
        )
    }
}

/// Something that can turn a [`BuildTarget`] into an archive on disk.
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Build `target` and return the path of the produced archive.
    ///
    /// The path is expected to exist when this returns, but it may not be
    /// visible to readers immediately.
    async fn build(&self, target: &BuildTarget, cancel: &CancelSignal) -> Result<PathBuf>;
}

/// `nix build <target> --no-link --print-out-paths`
#[derive(Debug, Clone)]
pub struct NixCli {
    program: String,
}

impl Default for NixCli {
    fn default() -> Self {
        Self::new("nix")
    }
}

impl NixCli {
    pub fn new(program: impl Into<String>) -> Self {
        NixCli {
            program: program.into(),
        }
    }

    /// Arguments passed to the nix binary for `target`.
    pub fn args(target: &BuildTarget) -> Vec<String> {
        vec![
            "build".to_string(),
            target.to_string(),
            "--no-link".to_string(),
            "--print-out-paths".to_string(),
        ]
    }
}

#[async_trait]
impl BuildTool for NixCli {
    async fn build(&self, target: &BuildTarget, cancel: &CancelSignal) -> Result<PathBuf> {
        debug!("Spawning {} build {}", self.program, target);

        let child = Command::new(&self.program)
            .args(Self::args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BuilderError::BuildToolSpawn {
                program: self.program.clone(),
                source,
            })?;

        let output = cancel.guard(child.wait_with_output()).await??;

        if !output.status.success() {
            return Err(BuilderError::BuildToolFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        parse_out_path(&output.stdout)
    }
}

/// Turn `--print-out-paths` stdout into the archive path.
pub fn parse_out_path(stdout: &[u8]) -> Result<PathBuf> {
    let text = String::from_utf8_lossy(stdout);
    let path = text.trim_end_matches(&['\r', '\n'][..]);
    if path.is_empty() {
        return Err(BuilderError::EmptyBuildOutput);
    }
    Ok(PathBuf::from(path))
}
