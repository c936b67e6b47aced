//! Nix-Image-Builder: the `docker:nix` builder
//!
//! Builds a test plan's Nix flake into an image archive, loads the archive
//! into a container runtime, resolves the loaded image's id and tags it for
//! the plan.
//!
//! ## Pipeline
//!
//! `platform` → `nix` → `retry`(`load`) → `image` (identify, tag)
//!
//! ## Key Components
//!
//! - [`DockerNixBuilder`]: the pipeline, behind the [`Builder`] contract
//! - [`BuildTool`] / [`NixCli`]: `nix build` invocation
//! - [`ContainerRuntime`] / [`DockerCli`]: the runtime boundary
//! - [`CancelSignal`]: cooperative cancellation
//! - [`OutputSink`]: write-only progress output
//!
//! In-memory fakes for tests live in [`fakes`].

pub mod builder;
pub mod cancel;
pub mod config;
pub mod docker;
mod error;
pub mod fakes;
pub mod image;
pub mod load;
pub mod nix;
pub mod output;
pub mod platform;
pub mod retry;
pub mod runtime;
pub mod telemetry;

pub use builder::{BuildInput, Builder, DockerNixBuilder};
pub use cancel::CancelSignal;
pub use config::{BuildConfig, BuilderSettings, DockerNixConfig, LoadStrategy, ResolvedConfig};
pub use docker::DockerCli;
pub use error::{BuilderError, LoadAttemptError};
pub use image::{BuildOutput, ImageId};
pub use nix::{BuildTarget, BuildTool, NixCli};
pub use output::{OutputSink, TracingSink};
pub use runtime::{ContainerRuntime, RuntimeError, RuntimeResult};
pub use telemetry::init_tracing;

/// Result type for builder operations
pub type Result<T> = std::result::Result<T, BuilderError>;
