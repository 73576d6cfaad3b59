// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Failure artifacts written to the diagnostics directory.
//!
//! Layout, all tagged with the attempt number:
//! - `raw_attempt{n}.{xml,json,html,txt}`: body as received
//! - `snapshot_attempt{n}.png` / `dom_attempt{n}.html`: rendered state
//! - `attempts.jsonl`: one line per failed attempt
//! - `last_error.txt`: final error after retries were exhausted
//!
//! Writing is best effort. Nothing here is read back by the pipeline, so a
//! failed write is logged and otherwise ignored.

use crate::acquisition::{RawContent, RenderedSnapshot};
use crate::error::{FailureClass, ScrapeError};
use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

const ATTEMPT_LOG: &str = "attempts.jsonl";
const LAST_ERROR: &str = "last_error.txt";

/// One failed attempt, as appended to `attempts.jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptEvent {
    pub timestamp: String,
    pub attempt: u32,
    pub class: &'static str,
    pub status: Option<u16>,
    pub error: String,
    pub artifacts: Vec<String>,
}

fn class_name(class: FailureClass) -> &'static str {
    match class {
        FailureClass::Network => "network",
        FailureClass::NonData => "non_data",
        FailureClass::Extraction => "extraction",
        FailureClass::Other => "other",
    }
}

/// Writer bound to one diagnostics directory.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture everything available about a failed attempt.
    ///
    /// Returns the paths that were written.
    pub async fn capture_attempt(
        &self,
        attempt: u32,
        error: &ScrapeError,
        raw: Option<&RawContent>,
        snapshot: Option<&RenderedSnapshot>,
    ) -> Vec<PathBuf> {
        let mut written = Vec::new();

        if let Some(raw) = raw {
            let name = format!("raw_attempt{attempt}.{}", raw.extension());
            written.extend(self.write(&name, raw.body.as_bytes()).await);
        }
        if let Some(snap) = snapshot {
            if let Some(png) = &snap.screenshot {
                let name = format!("snapshot_attempt{attempt}.png");
                written.extend(self.write(&name, png).await);
            }
            if let Some(dom) = &snap.dom {
                let name = format!("dom_attempt{attempt}.html");
                written.extend(self.write(&name, dom.as_bytes()).await);
            }
        }

        let status = match error {
            ScrapeError::Network { status, .. } => *status,
            _ => raw.and_then(|r| r.status),
        };
        let event = AttemptEvent {
            timestamp: Utc::now().to_rfc3339(),
            attempt,
            class: class_name(error.class()),
            status,
            error: error.to_string(),
            artifacts: written
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
        };
        if let Err(e) = self.append_event(&event) {
            tracing::warn!("failed to record attempt {attempt} in {ATTEMPT_LOG}: {e}");
        }

        written
    }

    /// Record the error that ended the run.
    pub async fn write_last_error(&self, error: &ScrapeError, attempts: u32) -> Option<PathBuf> {
        let text = format!(
            "{}\nattempts: {attempts}\nclass: {}\nerror: {error}\n",
            Utc::now().to_rfc3339(),
            class_name(error.class()),
        );
        self.write(LAST_ERROR, text.as_bytes()).await
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Option<PathBuf> {
        let path = self.dir.join(name);
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::debug!("wrote diagnostic {}", path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("failed to write diagnostic {}: {e}", path.display());
                None
            }
        }
    }

    fn append_event(&self, event: &AttemptEvent) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(ATTEMPT_LOG))?;
        let json = serde_json::to_string(event).map_err(std::io::Error::other)?;
        writeln!(file, "{json}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{ContentKind, ResponseFault, StructuredFormat};

    #[tokio::test]
    async fn test_capture_writes_raw_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let diag = Diagnostics::new(dir.path().join("artifacts"));

        let raw = RawContent::new("<list/>", ContentKind::Structured(StructuredFormat::Xml));
        let snap = RenderedSnapshot {
            screenshot: Some(vec![0x89, b'P', b'N', b'G']),
            dom: Some("<html></html>".into()),
        };
        let err = ScrapeError::TargetNotFound("TargetLot".into());
        let written = diag.capture_attempt(2, &err, Some(&raw), Some(&snap)).await;

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["raw_attempt2.xml", "snapshot_attempt2.png", "dom_attempt2.html"]
        );
        assert_eq!(
            std::fs::read_to_string(diag.dir().join("raw_attempt2.xml")).unwrap(),
            "<list/>"
        );

        let log = std::fs::read_to_string(diag.dir().join(ATTEMPT_LOG)).unwrap();
        let event: serde_json::Value = serde_json::from_str(log.trim()).unwrap();
        assert_eq!(event["attempt"], 2);
        assert_eq!(event["class"], "extraction");
        assert_eq!(event["artifacts"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_block_page_saved_as_html() {
        let dir = tempfile::tempdir().unwrap();
        let diag = Diagnostics::new(dir.path());
        let raw = RawContent::new("<html>denied</html>", ContentKind::Error(ResponseFault::BlockPage));
        let err = ScrapeError::NonDataResponse("block page".into());
        diag.capture_attempt(1, &err, Some(&raw), None).await;
        assert!(dir.path().join("raw_attempt1.html").exists());
    }

    #[tokio::test]
    async fn test_last_error_file() {
        let dir = tempfile::tempdir().unwrap();
        let diag = Diagnostics::new(dir.path());
        let err = ScrapeError::Network {
            message: "HTTP 503".into(),
            status: Some(503),
        };
        let path = diag.write_last_error(&err, 6).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("attempts: 6"));
        assert!(text.contains("class: network"));
        assert!(text.contains("HTTP 503"));
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let diag = Diagnostics::new(blocker.join("nested"));
        let err = ScrapeError::network("reset");
        assert!(diag.write_last_error(&err, 1).await.is_none());
        assert!(diag.capture_attempt(1, &err, None, None).await.is_empty());
    }
}
