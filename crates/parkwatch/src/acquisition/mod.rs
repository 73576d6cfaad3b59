// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Content acquisition for one observation attempt.
//!
//! A [`NavigationContext`] owns whatever session state a source needs
//! (cookie jar, browser page) and produces one [`RawContent`] per call to
//! `fetch`. It never retries on its own; the retry controller decides when
//! to try again and when to `refresh` or `recreate` the context.

pub mod feed;
pub mod http_client;

use crate::config::{Config, SourceKind};
use crate::error::{ScrapeError, ScrapeResult};
use async_trait::async_trait;

/// Structured payload formats understood by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredFormat {
    Xml,
    Json,
}

/// Why a response is not usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFault {
    /// Non-2xx HTTP status.
    Status(u16),
    /// A markup document where a feed was expected (block or login page).
    BlockPage,
    /// Body does not resemble any structured format.
    NotStructured,
}

/// Classification of a fetched body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Structured(StructuredFormat),
    Unstructured,
    Error(ResponseFault),
}

/// Raw body of one attempt together with its classification.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub body: String,
    pub kind: ContentKind,
    /// HTTP status, when the source exposes one.
    pub status: Option<u16>,
}

impl RawContent {
    pub fn new(body: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            body: body.into(),
            kind,
            status: None,
        }
    }

    /// Convert error-classified content into the matching failure.
    pub fn ensure_data(&self) -> ScrapeResult<()> {
        match self.kind {
            ContentKind::Error(ResponseFault::Status(code)) => Err(ScrapeError::Network {
                message: format!("HTTP {code}"),
                status: Some(code),
            }),
            ContentKind::Error(ResponseFault::BlockPage) => Err(ScrapeError::NonDataResponse(
                "received an HTML document instead of the feed (possible block page)".into(),
            )),
            ContentKind::Error(ResponseFault::NotStructured) => Err(ScrapeError::NonDataResponse(
                "response body is not in a structured format".into(),
            )),
            _ => Ok(()),
        }
    }

    /// File extension used when the body is written to disk.
    pub fn extension(&self) -> &'static str {
        match self.kind {
            ContentKind::Structured(StructuredFormat::Xml) => "xml",
            ContentKind::Structured(StructuredFormat::Json) => "json",
            ContentKind::Unstructured | ContentKind::Error(ResponseFault::BlockPage) => "html",
            ContentKind::Error(_) => "txt",
        }
    }
}

/// Classify a response body.
///
/// `expect_feed` selects feed semantics: markup documents and free text are
/// errors there, while the rendered source treats them as unstructured text.
pub fn classify(status: u16, body: &str, expect_feed: bool) -> ContentKind {
    if !(200..300).contains(&status) {
        return ContentKind::Error(ResponseFault::Status(status));
    }

    let head = body.trim_start_matches('\u{feff}').trim_start();
    let lower: String = head.chars().take(16).collect::<String>().to_ascii_lowercase();

    if lower.starts_with("<!doctype") || lower.starts_with("<html") {
        return if expect_feed {
            ContentKind::Error(ResponseFault::BlockPage)
        } else {
            ContentKind::Unstructured
        };
    }
    if expect_feed {
        if head.starts_with('<') {
            return ContentKind::Structured(StructuredFormat::Xml);
        }
        if head.starts_with('{') || head.starts_with('[') {
            return ContentKind::Structured(StructuredFormat::Json);
        }
        return ContentKind::Error(ResponseFault::NotStructured);
    }
    ContentKind::Unstructured
}

/// Rendered state captured for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RenderedSnapshot {
    /// PNG screenshot.
    pub screenshot: Option<Vec<u8>>,
    /// Serialized document.
    pub dom: Option<String>,
}

/// A session against the remote source.
#[async_trait]
pub trait NavigationContext: Send {
    /// Fetch raw content for one attempt. Transport failures are `Err`;
    /// any answer from the server is `Ok` with a classified kind.
    async fn fetch(&mut self, attempt: u32) -> ScrapeResult<RawContent>;
    /// Lightweight recovery (reload, re-warm) before the next attempt.
    async fn refresh(&mut self) -> ScrapeResult<()>;
    /// Replace the underlying session with a fresh one.
    async fn recreate(&mut self) -> ScrapeResult<()>;
    /// Rendered-state snapshot, if the source has one.
    async fn snapshot(&mut self) -> Option<RenderedSnapshot> {
        None
    }
    /// Release the session.
    async fn close(self: Box<Self>) -> ScrapeResult<()> {
        Ok(())
    }
}

/// Build the context selected by `config.source.kind`.
pub async fn build_context(config: &Config) -> ScrapeResult<Box<dyn NavigationContext>> {
    match config.source.kind {
        SourceKind::Feed => {
            let ctx = http_client::FeedContext::connect(&config.source).await?;
            Ok(Box::new(ctx))
        }
        SourceKind::Rendered => {
            let ctx = crate::renderer::chromium::RenderedContext::launch(&config.source).await?;
            Ok(Box::new(ctx))
        }
    }
}
