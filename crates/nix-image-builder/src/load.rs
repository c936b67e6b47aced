//! Artifact loading
//!
//! One load attempt opens the archive, streams it into the runtime, relays
//! every response frame to the output sink and extracts the default tag from
//! the final frame. The archive handle lives only as long as the attempt.
//!
//! Response frames are either Docker engine JSON messages
//! (`{"stream": "Loaded image: ...\n"}`) or the plain text printed by
//! `docker load`.

use std::path::Path;

use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::LoadAttemptError;
use crate::output::OutputSink;
use crate::runtime::{ContainerRuntime, LoadBody};

/// Prefix of the final load line that carries the default tag.
pub const LOADED_IMAGE_PREFIX: &str = "Loaded image: ";

#[derive(Debug, Default, Deserialize)]
struct JsonFrame {
    stream: Option<String>,
    status: Option<String>,
    error: Option<String>,
    #[serde(rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Text(String),
    Error(String),
}

fn decode_frame(line: &str) -> Frame {
    if !line.trim_start().starts_with('{') {
        return Frame::Text(line.to_string());
    }
    match serde_json::from_str::<JsonFrame>(line) {
        Ok(frame) => {
            let detail = frame.error_detail.and_then(|d| d.message);
            if let Some(error) = frame.error.or(detail) {
                return Frame::Error(error);
            }
            Frame::Text(frame.stream.or(frame.status).unwrap_or_default())
        }
        Err(_) => Frame::Text(line.to_string()),
    }
}

/// Load the archive at `path` once and return the default tag.
pub async fn load_artifact(
    runtime: &dyn ContainerRuntime,
    path: &Path,
    sink: &dyn OutputSink,
) -> Result<String, LoadAttemptError> {
    let archive = File::open(path)
        .await
        .map_err(|source| LoadAttemptError::ArtifactUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let body = runtime
        .load_image(archive)
        .await
        .map_err(LoadAttemptError::Ingestion)?;

    let final_line = relay_frames(body, sink).await?;
    parse_default_tag(&final_line)
}

/// Consume the whole response, relaying it, and return the last non-empty line.
async fn relay_frames(body: LoadBody, sink: &dyn OutputSink) -> Result<String, LoadAttemptError> {
    let mut lines = BufReader::new(body).lines();
    let mut last = String::new();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(LoadAttemptError::ResponseRead)?
    {
        match decode_frame(&line) {
            Frame::Error(message) => {
                sink.stdout(&message);
                return Err(LoadAttemptError::Rejected(message));
            }
            Frame::Text(text) => {
                for part in text.lines().filter(|l| !l.trim().is_empty()) {
                    sink.stdout(part);
                    last = part.to_string();
                }
            }
        }
    }

    Ok(last)
}

/// Extract the default tag from the final load line.
pub fn parse_default_tag(final_line: &str) -> Result<String, LoadAttemptError> {
    let tag = final_line
        .strip_prefix(LOADED_IMAGE_PREFIX)
        .map(|rest| rest.trim_end_matches(&['\r', '\n'][..]))
        .filter(|tag| !tag.trim().is_empty())
        .ok_or_else(|| LoadAttemptError::UnrecognisedResponse(final_line.to_string()))?;
    Ok(tag.to_string())
}
