// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP feed context wrapping reqwest.
//!
//! Not a browser: plain requests with browser-like headers and a cookie
//! jar. Warm-up requests load the pages a visitor would see first so the
//! feed request carries the session cookies the site hands out; their
//! failures are ignored. Exactly one data request is sent per `fetch`.

use super::{classify, NavigationContext, RawContent};
use crate::config::SourceConfig;
use crate::error::{ScrapeError, ScrapeResult};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Feed session: a cookie-carrying client plus its source settings.
pub struct FeedContext {
    client: reqwest::Client,
    config: SourceConfig,
}

impl FeedContext {
    /// Build a client and warm up the session.
    pub async fn connect(config: &SourceConfig) -> ScrapeResult<Self> {
        let ctx = Self::cold(config)?;
        ctx.warm_up().await;
        Ok(ctx)
    }

    /// Build a client without any warm-up request.
    pub fn cold(config: &SourceConfig) -> ScrapeResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            config: config.clone(),
        })
    }

    /// Visit the warm-up pages. Best effort: errors are logged and skipped.
    pub async fn warm_up(&self) {
        for path in &self.config.warmup_paths {
            let url = match self.config.warmup_url(path) {
                Ok(u) => u,
                Err(e) => {
                    tracing::debug!("skipping warm-up path {path}: {e}");
                    continue;
                }
            };
            match self
                .client
                .get(url.clone())
                .timeout(self.config.warmup_timeout)
                .send()
                .await
            {
                Ok(resp) => {
                    tracing::debug!("warm-up {url} -> {}", resp.status().as_u16());
                    // Drain the body so the connection can be reused.
                    let _ = resp.bytes().await;
                }
                Err(e) => tracing::debug!("warm-up failed (ignored): {url} => {e}"),
            }
            if !self.config.warmup_pause.is_zero() {
                tokio::time::sleep(self.config.warmup_pause).await;
            }
        }
    }

    fn request_pause(&self) -> Duration {
        let (min, max) = self.config.request_pause;
        if max <= min {
            return min;
        }
        let ms = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl NavigationContext for FeedContext {
    async fn fetch(&mut self, attempt: u32) -> ScrapeResult<RawContent> {
        let pause = self.request_pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let url = self
            .config
            .feed_url(chrono::Utc::now().timestamp_millis())?;
        tracing::debug!("attempt {attempt}: GET {url}");

        let resp = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        let kind = classify(status, &body, true);

        Ok(RawContent {
            body,
            kind,
            status: Some(status),
        })
    }

    async fn refresh(&mut self) -> ScrapeResult<()> {
        self.warm_up().await;
        Ok(())
    }

    async fn recreate(&mut self) -> ScrapeResult<()> {
        self.client = build_client(&self.config)?;
        self.warm_up().await;
        Ok(())
    }
}

fn build_client(config: &SourceConfig) -> ScrapeResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ScrapeError::Config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ScrapeError::Config(format!("invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }

    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .cookie_store(true)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| ScrapeError::Config(format!("failed to build HTTP client: {e}")))
}
