//! The builder plugin contract and the docker:nix pipeline.
//!
//! A build runs strictly in sequence:
//!
//! 1. check the configuration type and fill in defaults
//! 2. `nix build` the flake output
//! 3. load the archive into the runtime (retry policy)
//! 4. resolve the default tag to an image id
//! 5. tag the image as `<plan>:<image id>`
//!
//! The builder keeps no state between builds; the build tool and runtime are
//! shared handles owned by the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::{BuildConfig, BuilderSettings, LoadStrategy};
use crate::error::BuilderError;
use crate::image::{apply_tag, plan_tag, resolve_image_id, BuildOutput};
use crate::load::load_artifact;
use crate::nix::{BuildTarget, BuildTool};
use crate::output::OutputSink;
use crate::platform::host_arch;
use crate::retry::load_with_strategy;
use crate::runtime::ContainerRuntime;
use crate::Result;

/// One build request as handed over by the host.
#[derive(Debug, Clone)]
pub struct BuildInput {
    /// Test plan name
    pub plan: String,
    /// Unpacked plan sources (a Nix flake)
    pub source_dir: PathBuf,
    /// Caller configuration, already decoded by the host
    pub config: BuildConfig,
}

/// Contract between the host's builder registry and a builder.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Stable builder id, e.g. `docker:nix`.
    fn id(&self) -> &'static str;

    /// Build `input` and return its artifact.
    async fn build(
        &self,
        cancel: &CancelSignal,
        input: &BuildInput,
        sink: &dyn OutputSink,
    ) -> Result<BuildOutput>;

    /// Remove artifacts produced for `plan`.
    async fn purge(&self, cancel: &CancelSignal, plan: &str, sink: &dyn OutputSink) -> Result<()>;

    /// Decode caller JSON into the configuration shape this builder expects.
    fn decode_config(&self, raw: serde_json::Value) -> Result<BuildConfig>;
}

/// Builds a Nix flake image and loads it into a container runtime.
pub struct DockerNixBuilder {
    build_tool: Arc<dyn BuildTool>,
    runtime: Arc<dyn ContainerRuntime>,
    load: LoadStrategy,
    host_arch: String,
}

impl DockerNixBuilder {
    pub const ID: &'static str = "docker:nix";

    pub fn new(
        build_tool: Arc<dyn BuildTool>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: &BuilderSettings,
    ) -> Self {
        DockerNixBuilder {
            build_tool,
            runtime,
            load: settings.load,
            host_arch: host_arch().to_string(),
        }
    }

    /// Pretend to run on `arch` instead of the real host CPU.
    pub fn with_host_arch(mut self, arch: impl Into<String>) -> Self {
        self.host_arch = arch.into();
        self
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        input: &BuildInput,
        sink: &dyn OutputSink,
    ) -> Result<BuildOutput> {
        let config = match &input.config {
            BuildConfig::DockerNix(config) => config,
            other => {
                return Err(BuilderError::ConfigTypeMismatch {
                    expected: "DockerNixConfig",
                    found: other.kind().to_string(),
                })
            }
        };

        let resolved = config.resolve(&input.plan, &self.host_arch)?;
        let target = BuildTarget::new(&input.source_dir, &resolved);
        let started = Instant::now();
        cancel.check()?;

        sink.info("nix build", &[("target", &target)]);
        let path = self
            .build_tool
            .build(&target, cancel)
            .await
            .map_err(|err| {
                if let BuilderError::BuildToolFailed { stderr, .. } = &err {
                    sink.error("nix build fail result", &[("stderr", stderr)]);
                }
                err
            })?;
        sink.info("nix build completed", &[("path", &path.display())]);

        let runtime = self.runtime.as_ref();
        let archive = path.as_path();
        let default_tag = load_with_strategy(&self.load, cancel, sink, move |_| {
            load_artifact(runtime, archive, sink)
        })
        .await?;
        let took_ms = started.elapsed().as_millis();
        sink.info(
            "build completed",
            &[("default_tag", &default_tag), ("took_ms", &took_ms)],
        );

        let image_id = resolve_image_id(runtime, &default_tag, cancel).await?;
        sink.info("got docker image id", &[("image_id", &image_id)]);

        let output = BuildOutput::new(image_id);
        let tag = plan_tag(&input.plan, &output.artifact_id);
        sink.info(
            "tagging image",
            &[("image_id", &output.artifact_id), ("tag", &tag)],
        );
        apply_tag(runtime, output, tag, cancel).await
    }
}

#[async_trait]
impl Builder for DockerNixBuilder {
    fn id(&self) -> &'static str {
        Self::ID
    }

    async fn build(
        &self,
        cancel: &CancelSignal,
        input: &BuildInput,
        sink: &dyn OutputSink,
    ) -> Result<BuildOutput> {
        let build_id = Uuid::new_v4();
        let span = tracing::info_span!("docker_nix.build", build_id = %build_id, plan = %input.plan);

        let result = self.run(cancel, input, sink).instrument(span).await;
        if let Err(err) = &result {
            sink.error(
                "docker:nix build failed",
                &[("plan", &input.plan), ("error", err)],
            );
        }
        result
    }

    async fn purge(&self, _cancel: &CancelSignal, plan: &str, sink: &dyn OutputSink) -> Result<()> {
        let err = BuilderError::PurgeNotImplemented(Self::ID);
        sink.error("purge failed", &[("plan", &plan), ("error", &err)]);
        Err(err)
    }

    fn decode_config(&self, raw: serde_json::Value) -> Result<BuildConfig> {
        BuildConfig::from_value(raw)
    }
}
