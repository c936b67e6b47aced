//! Error types for the docker:nix builder

use std::path::PathBuf;

use thiserror::Error;

use crate::image::BuildOutput;
use crate::runtime::RuntimeError;

/// Errors that end a docker:nix build
#[derive(Error, Debug)]
pub enum BuilderError {
    /// The host handed over configuration meant for another builder
    #[error("expected configuration type {expected}, was: {found}")]
    ConfigTypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// No system configured and the host CPU is not in the system table
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// The nix binary could not be started
    #[error("failed to start {program}: {source}")]
    BuildToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// `nix build` exited non-zero; stderr is kept verbatim
    #[error("nix build failed: {status}\n{stderr}")]
    BuildToolFailed { status: String, stderr: String },

    /// `nix build` exited zero but printed no store path
    #[error("nix build succeeded but printed no output path")]
    EmptyBuildOutput,

    /// Every load attempt failed
    #[error("image archive failed to load after {attempts} attempt(s): {last_error}")]
    LoadExhausted {
        attempts: u32,
        #[source]
        last_error: LoadAttemptError,
    },

    /// The runtime has no image for a tag it just reported
    #[error("couldn't get docker image id for tag: {tag}")]
    IdentifierNotFound { tag: String },

    /// Tagging failed after the image id was resolved.
    ///
    /// The resolved output is carried so callers can tell a partial
    /// success from a total failure.
    #[error("couldn't tag image as {tag}: {source}")]
    TagApply {
        output: BuildOutput,
        tag: String,
        #[source]
        source: RuntimeError,
    },

    /// Container runtime error outside the load step
    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The caller cancelled the build
    #[error("build cancelled")]
    Cancelled,

    /// Purge is not supported by this builder
    #[error("purge not implemented for {0}")]
    PurgeNotImplemented(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuilderError {
    /// The build output that was already produced before this error, if any.
    pub fn partial_output(&self) -> Option<&BuildOutput> {
        match self {
            BuilderError::TagApply { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// A single failed load attempt.
///
/// All of these are candidate-transient: the retry policy absorbs them until
/// its bound is reached and only then reports [`BuilderError::LoadExhausted`].
#[derive(Error, Debug)]
pub enum LoadAttemptError {
    /// The archive could not be opened (often not visible yet)
    #[error("couldn't open image archive {}: {source}", path.display())]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The runtime's load call failed
    #[error("docker image load failed: {0}")]
    Ingestion(#[source] RuntimeError),

    /// The load response stream broke off
    #[error("couldn't read docker image load response: {0}")]
    ResponseRead(#[source] std::io::Error),

    /// The runtime reported an error frame
    #[error("docker image load rejected: {0}")]
    Rejected(String),

    /// The final line did not carry a default tag
    #[error("unrecognised docker image load response: {0:?}")]
    UnrecognisedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageId;

    #[test]
    fn test_build_tool_failure_embeds_stderr() {
        let err = BuilderError::BuildToolFailed {
            status: "exit status: 1".to_string(),
            stderr: "error: flake has no attribute 'legacyPackages'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit status: 1"));
        assert!(msg.contains("flake has no attribute"));
    }

    #[test]
    fn test_partial_output_only_for_tag_failures() {
        let output = BuildOutput::new(ImageId::new("sha256:abc"));
        let err = BuilderError::TagApply {
            output: output.clone(),
            tag: "plan:sha256:abc".to_string(),
            source: RuntimeError::Unavailable("daemon gone".to_string()),
        };
        assert_eq!(err.partial_output(), Some(&output));
        assert!(BuilderError::Cancelled.partial_output().is_none());
    }
}
