//! Docker CLI runtime
//!
//! Drives a local `docker` binary. The archive is streamed into the stdin of
//! `docker load`, whose plain-text output becomes the load response body.

use std::io::Cursor;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::image::ImageId;
use crate::runtime::{ContainerRuntime, LoadBody, RuntimeError, RuntimeResult};

/// [`ContainerRuntime`] backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        DockerCli {
            program: program.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> RuntimeError {
        RuntimeError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    fn check(&self, args: &[&str], output: Output) -> RuntimeResult<Vec<u8>> {
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(RuntimeError::CommandFailed {
            command: format!("{} {}", self.program, args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run(&self, args: &[&str]) -> RuntimeResult<Vec<u8>> {
        debug!("Running {} {}", self.program, args.join(" "));
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        self.check(args, output)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn load_image(&self, mut archive: File) -> RuntimeResult<LoadBody> {
        let args = ["load"];
        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Unavailable("docker load stdin not captured".into()))?;

        // Feed stdin while collecting output so neither side can stall on a full pipe.
        let feed = async move {
            let copied = tokio::io::copy(&mut archive, &mut stdin).await;
            let closed = stdin.shutdown().await;
            drop(stdin);
            copied.and(closed)
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        let stdout = self.check(&args, output)?;
        fed?;
        Ok(Box::new(Cursor::new(stdout)))
    }

    async fn image_id(&self, reference: &str) -> RuntimeResult<Option<ImageId>> {
        let stdout = self
            .run(&["images", "--no-trunc", "--quiet", reference])
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        Ok(text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ImageId::new))
    }

    async fn tag_image(&self, image: &ImageId, tag: &str) -> RuntimeResult<()> {
        self.run(&["tag", image.as_str(), tag]).await?;
        Ok(())
    }
}
