//! In-memory fakes for the build tool, the container runtime and the output
//! sink (testing only)
//!
//! `FakeBuildTool` and `FakeRuntime` are scripted up front and record every
//! call, so tests can assert on what the pipeline did as well as on what it
//! returned.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::Level;

use crate::cancel::CancelSignal;
use crate::error::BuilderError;
use crate::image::ImageId;
use crate::nix::{BuildTarget, BuildTool};
use crate::output::{Field, OutputSink};
use crate::runtime::{ContainerRuntime, LoadBody, RuntimeError, RuntimeResult};
use crate::Result;

// ---------------------------------------------------------------------------
// FakeBuildTool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum BuildBehaviour {
    Succeed(PathBuf),
    Fail { status: String, stderr: String },
    Hang,
}

/// Build tool returning a fixed path or a fixed failure.
#[derive(Debug)]
pub struct FakeBuildTool {
    behaviour: BuildBehaviour,
    targets: Mutex<Vec<BuildTarget>>,
}

impl FakeBuildTool {
    /// Every build "produces" `path`.
    pub fn succeeding(path: impl AsRef<Path>) -> Self {
        Self::with(BuildBehaviour::Succeed(path.as_ref().to_path_buf()))
    }

    /// Every build exits with exit code 1 and `stderr`.
    pub fn failing(stderr: &str) -> Self {
        Self::with(BuildBehaviour::Fail {
            status: "exit status: 1".to_string(),
            stderr: stderr.to_string(),
        })
    }

    /// Every build runs until cancelled.
    pub fn hanging() -> Self {
        Self::with(BuildBehaviour::Hang)
    }

    fn with(behaviour: BuildBehaviour) -> Self {
        FakeBuildTool {
            behaviour,
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Targets requested so far, in order.
    pub fn targets(&self) -> Vec<BuildTarget> {
        self.targets.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.targets.lock().unwrap().len()
    }
}

#[async_trait]
impl BuildTool for FakeBuildTool {
    async fn build(&self, target: &BuildTarget, cancel: &CancelSignal) -> Result<PathBuf> {
        self.targets.lock().unwrap().push(target.clone());
        match &self.behaviour {
            BuildBehaviour::Succeed(path) => Ok(path.clone()),
            BuildBehaviour::Fail { status, stderr } => Err(BuilderError::BuildToolFailed {
                status: status.clone(),
                stderr: stderr.clone(),
            }),
            BuildBehaviour::Hang => {
                cancel.guard(std::future::pending::<()>()).await?;
                unreachable!("pending future completed")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

/// Scripted outcome of one `load_image` call.
#[derive(Debug, Clone)]
pub enum FakeLoad {
    /// Return this text as the response body
    Respond(String),
    /// Fail the call with `RuntimeError::Unavailable`
    Fail(String),
}

/// In-memory container runtime.
///
/// Load calls consume the script in order; once it runs out every further
/// load returns an empty body.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    loads: Mutex<VecDeque<FakeLoad>>,
    images: Mutex<HashMap<String, ImageId>>,
    tag_failure: Option<String>,
    loaded_sizes: Mutex<Vec<usize>>,
    load_calls: Mutex<usize>,
    id_queries: Mutex<Vec<String>>,
    tags: Mutex<Vec<(ImageId, String)>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a load call answering with `body`.
    pub fn then_respond(self, body: &str) -> Self {
        self.loads
            .lock()
            .unwrap()
            .push_back(FakeLoad::Respond(body.to_string()));
        self
    }

    /// Queue a load call failing with `message`.
    pub fn then_fail(self, message: &str) -> Self {
        self.loads
            .lock()
            .unwrap()
            .push_back(FakeLoad::Fail(message.to_string()));
        self
    }

    /// Make `reference` resolve to `id`.
    pub fn with_image(self, reference: &str, id: &str) -> Self {
        self.images
            .lock()
            .unwrap()
            .insert(reference.to_string(), ImageId::new(id));
        self
    }

    /// Make every tag call fail with `message`.
    pub fn failing_tags(mut self, message: &str) -> Self {
        self.tag_failure = Some(message.to_string());
        self
    }

    pub fn load_calls(&self) -> usize {
        *self.load_calls.lock().unwrap()
    }

    /// Byte counts of the archives read by successful-or-not load calls.
    pub fn loaded_sizes(&self) -> Vec<usize> {
        self.loaded_sizes.lock().unwrap().clone()
    }

    pub fn id_queries(&self) -> Vec<String> {
        self.id_queries.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<(ImageId, String)> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn load_image(&self, mut archive: File) -> RuntimeResult<LoadBody> {
        *self.load_calls.lock().unwrap() += 1;

        let mut bytes = Vec::new();
        archive.read_to_end(&mut bytes).await?;
        self.loaded_sizes.lock().unwrap().push(bytes.len());

        let next = self.loads.lock().unwrap().pop_front();
        match next {
            Some(FakeLoad::Respond(body)) => Ok(Box::new(Cursor::new(body.into_bytes()))),
            Some(FakeLoad::Fail(message)) => Err(RuntimeError::Unavailable(message)),
            None => Ok(Box::new(Cursor::new(Vec::new()))),
        }
    }

    async fn image_id(&self, reference: &str) -> RuntimeResult<Option<ImageId>> {
        self.id_queries.lock().unwrap().push(reference.to_string());
        Ok(self.images.lock().unwrap().get(reference).cloned())
    }

    async fn tag_image(&self, image: &ImageId, tag: &str) -> RuntimeResult<()> {
        if let Some(message) = &self.tag_failure {
            return Err(RuntimeError::Unavailable(message.clone()));
        }
        self.tags
            .lock()
            .unwrap()
            .push((image.clone(), tag.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// A progress line captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLine {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl RecordedLine {
    /// Value of field `key`, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Output sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<RecordedLine>>,
    stdout: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<RecordedLine> {
        self.lines.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<RecordedLine> {
        self.at_level(Level::ERROR)
    }

    pub fn warnings(&self) -> Vec<RecordedLine> {
        self.at_level(Level::WARN)
    }

    /// First line whose message equals `message`.
    pub fn find(&self, message: &str) -> Option<RecordedLine> {
        self.lines().into_iter().find(|l| l.message == message)
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout.lock().unwrap().clone()
    }

    fn at_level(&self, level: Level) -> Vec<RecordedLine> {
        self.lines()
            .into_iter()
            .filter(|l| l.level == level)
            .collect()
    }
}

impl OutputSink for RecordingSink {
    fn emit(&self, level: Level, message: &str, fields: &[Field<'_>]) {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.lines.lock().unwrap().push(RecordedLine {
            level,
            message: message.to_string(),
            fields,
        });
    }

    fn stdout(&self, line: &str) {
        self.stdout.lock().unwrap().push(line.to_string());
    }
}
