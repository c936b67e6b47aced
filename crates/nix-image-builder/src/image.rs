//! Image identifier resolution and plan tagging

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::error::BuilderError;
use crate::runtime::ContainerRuntime;
use crate::Result;

/// The runtime's canonical, content-derived image id (e.g. `sha256:...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        ImageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The only externally visible result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Image id of the loaded artifact
    pub artifact_id: ImageId,
}

impl BuildOutput {
    pub fn new(artifact_id: ImageId) -> Self {
        BuildOutput { artifact_id }
    }
}

/// Ask the runtime which image backs `tag`.
///
/// The load response only proves a tag was assigned, so the runtime is
/// queried again here, exactly once.
pub async fn resolve_image_id(
    runtime: &dyn ContainerRuntime,
    tag: &str,
    cancel: &CancelSignal,
) -> Result<ImageId> {
    cancel
        .guard(runtime.image_id(tag))
        .await??
        .ok_or_else(|| BuilderError::IdentifierNotFound {
            tag: tag.to_string(),
        })
}

/// Tag correlating an image with the plan that built it: `<plan>:<image id>`.
pub fn plan_tag(plan: &str, image: &ImageId) -> String {
    format!("{plan}:{image}")
}

/// Apply `tag` to the image in `output`.
///
/// On failure the output travels inside [`BuilderError::TagApply`].
pub async fn apply_tag(
    runtime: &dyn ContainerRuntime,
    output: BuildOutput,
    tag: String,
    cancel: &CancelSignal,
) -> Result<BuildOutput> {
    match cancel.guard(runtime.tag_image(&output.artifact_id, &tag)).await? {
        Ok(()) => Ok(output),
        Err(source) => Err(BuilderError::TagApply {
            output,
            tag,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRuntime;

    #[test]
    fn test_plan_tag() {
        let id = ImageId::new("sha256:deadbeef");
        assert_eq!(plan_tag("mytest", &id), "mytest:sha256:deadbeef");
    }

    #[tokio::test]
    async fn test_resolve_known_tag() {
        let runtime = FakeRuntime::new().with_image("myimg:latest", "sha256:deadbeef");
        let id = resolve_image_id(&runtime, "myimg:latest", &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(id, ImageId::new("sha256:deadbeef"));
        assert_eq!(runtime.id_queries(), vec!["myimg:latest".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_unknown_tag() {
        let runtime = FakeRuntime::new();
        let err = resolve_image_id(&runtime, "ghost:latest", &CancelSignal::new())
            .await
            .unwrap_err();
        match err {
            BuilderError::IdentifierNotFound { tag } => assert_eq!(tag, "ghost:latest"),
            other => panic!("expected IdentifierNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_apply_tag_records_tag() {
        let runtime = FakeRuntime::new();
        let output = BuildOutput::new(ImageId::new("sha256:abc"));
        let tagged = apply_tag(
            &runtime,
            output.clone(),
            "p:sha256:abc".to_string(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

        assert_eq!(tagged, output);
        assert_eq!(
            runtime.tags(),
            vec![(ImageId::new("sha256:abc"), "p:sha256:abc".to_string())]
        );
    }

    #[tokio::test]
    async fn test_apply_tag_failure_keeps_output() {
        let runtime = FakeRuntime::new().failing_tags("permission denied");
        let output = BuildOutput::new(ImageId::new("sha256:abc"));
        let err = apply_tag(
            &runtime,
            output.clone(),
            "p:sha256:abc".to_string(),
            &CancelSignal::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.partial_output(), Some(&output));
    }
}
