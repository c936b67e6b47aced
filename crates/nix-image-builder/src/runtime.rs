//! Container runtime boundary
//!
//! The runtime client is owned by the caller and passed into the builder.
//! The builder only needs three calls: load an archive, look up an image id
//! by reference, and tag an image.

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::image::ImageId;

/// Result type for runtime calls
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Raw response body of a load call: newline-separated frames.
pub type LoadBody = Box<dyn AsyncRead + Send + Unpin>;

/// Errors reported by a container runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The runtime CLI could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A runtime command exited non-zero
    #[error("`{command}` failed: {status}\n{stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The runtime cannot serve the request right now
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The calls the docker:nix builder makes against a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Stream an image archive into the runtime.
    ///
    /// Returns the response frames; on success the last one reads
    /// `Loaded image: <tag>`.
    async fn load_image(&self, archive: File) -> RuntimeResult<LoadBody>;

    /// Canonical id of the image behind `reference`, `None` if there is none.
    async fn image_id(&self, reference: &str) -> RuntimeResult<Option<ImageId>>;

    /// Add `tag` to `image`.
    async fn tag_image(&self, image: &ImageId, tag: &str) -> RuntimeResult<()>;
}
