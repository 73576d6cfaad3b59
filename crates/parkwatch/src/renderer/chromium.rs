// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chromium-based navigation context using chromiumoxide.

use super::{PageLoad, BLOCKED_RESOURCE_PATTERNS, WAIT_POLL_MS};
use crate::acquisition::{classify, NavigationContext, RawContent, RenderedSnapshot};
use crate::config::SourceConfig;
use crate::error::{ScrapeError, ScrapeResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetBlockedUrLsParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. PARKWATCH_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("PARKWATCH_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.parkwatch/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = [
            home.join(".parkwatch/chromium/chrome-linux64/chrome"),
            home.join(".parkwatch/chromium/chrome"),
        ];
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

async fn launch_browser() -> ScrapeResult<(Browser, JoinHandle<()>)> {
    let chrome_path = find_chromium().ok_or_else(|| {
        ScrapeError::Browser("Chromium not found; set PARKWATCH_CHROMIUM_PATH".into())
    })?;

    let config = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .build()
        .map_err(|e| ScrapeError::Browser(format!("failed to build browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| ScrapeError::Browser(format!("failed to launch Chromium: {e}")))?;

    // The handler drives the CDP connection and must be polled continuously.
    let task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            let _ = event;
        }
    });

    Ok((browser, task))
}

/// A rendered-page session: one browser, one page.
pub struct RenderedContext {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    config: SourceConfig,
    /// Whether the page currently shows the render URL.
    loaded: bool,
}

impl RenderedContext {
    /// Launch a headless browser and open a blank page.
    pub async fn launch(config: &SourceConfig) -> ScrapeResult<Self> {
        let (browser, handler) = launch_browser().await?;
        let page = open_page(&browser, config.block_resources).await?;
        Ok(Self {
            browser,
            handler,
            page,
            config: config.clone(),
            loaded: false,
        })
    }

    async fn navigate(&mut self) -> ScrapeResult<PageLoad> {
        let start = Instant::now();
        let url = self.config.render_url.clone();

        match tokio::time::timeout(self.config.request_timeout, self.page.goto(url.as_str())).await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ScrapeError::network(format!("navigation failed: {e}"))),
            Err(_) => {
                return Err(ScrapeError::network(format!(
                    "navigation timed out after {:?}",
                    self.config.request_timeout
                )))
            }
        }
        let _ = self.page.wait_for_navigation().await;
        self.loaded = true;
        self.wait_ready(start).await
    }

    /// Wait (bounded by the request timeout) for the configured element.
    async fn wait_ready(&self, start: Instant) -> ScrapeResult<PageLoad> {
        if let Some(selector) = &self.config.wait_selector {
            let deadline = start + self.config.request_timeout;
            loop {
                if self.page.find_element(selector.as_str()).await.is_ok() {
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(ScrapeError::network(format!(
                        "element '{selector}' did not appear within {:?}",
                        self.config.request_timeout
                    )));
                }
                tokio::time::sleep(Duration::from_millis(WAIT_POLL_MS)).await;
            }
        }

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| self.config.render_url.clone());

        Ok(PageLoad {
            final_url,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn html(&self) -> ScrapeResult<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| ScrapeError::Browser(format!("failed to read HTML: {e}")))?;

        result
            .into_value::<String>()
            .map_err(|e| ScrapeError::Browser(format!("failed to convert HTML result: {e:?}")))
    }
}

async fn open_page(browser: &Browser, block_resources: bool) -> ScrapeResult<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| ScrapeError::Browser(format!("failed to create new page: {e}")))?;

    if block_resources {
        let patterns = BLOCKED_RESOURCE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        if let Err(e) = page.execute(SetBlockedUrLsParams::new(patterns)).await {
            tracing::warn!("resource blocking unavailable: {e}");
        }
    }
    Ok(page)
}

#[async_trait]
impl NavigationContext for RenderedContext {
    async fn fetch(&mut self, attempt: u32) -> ScrapeResult<RawContent> {
        let load = if self.loaded {
            self.wait_ready(Instant::now()).await?
        } else {
            self.navigate().await?
        };
        tracing::debug!(
            "attempt {attempt}: rendered {} in {}ms",
            load.final_url,
            load.load_time_ms
        );

        let body = self.html().await?;
        let kind = classify(200, &body, false);
        Ok(RawContent::new(body, kind))
    }

    async fn refresh(&mut self) -> ScrapeResult<()> {
        let start = Instant::now();
        match tokio::time::timeout(self.config.request_timeout, self.page.reload()).await {
            Ok(Ok(_)) => {
                self.loaded = true;
                self.wait_ready(start).await.map(|_| ())
            }
            Ok(Err(e)) => Err(ScrapeError::Browser(format!("reload failed: {e}"))),
            Err(_) => Err(ScrapeError::network("reload timed out")),
        }
    }

    async fn recreate(&mut self) -> ScrapeResult<()> {
        let _ = self.page.clone().close().await;
        self.loaded = false;

        match open_page(&self.browser, self.config.block_resources).await {
            Ok(page) => {
                self.page = page;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("new page failed ({e}), relaunching browser");
                let (browser, handler) = launch_browser().await?;
                let page = open_page(&browser, self.config.block_resources).await?;
                let old_handler = std::mem::replace(&mut self.handler, handler);
                old_handler.abort();
                self.browser = browser;
                self.page = page;
                Ok(())
            }
        }
    }

    async fn snapshot(&mut self) -> Option<RenderedSnapshot> {
        let screenshot = self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| tracing::debug!("screenshot failed: {e}"))
            .ok();
        let dom = self.html().await.ok();
        Some(RenderedSnapshot { screenshot, dom })
    }

    async fn close(mut self: Box<Self>) -> ScrapeResult<()> {
        let _ = self.page.clone().close().await;
        let _ = self.browser.close().await;
        self.handler.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_rendered_context_reads_text() {
        let config = SourceConfig {
            render_url: "data:text/html,<div id='lot'><p>TargetLot</p><p>잔여 12대</p></div>"
                .to_string(),
            wait_selector: Some("#lot".to_string()),
            ..SourceConfig::default()
        };
        let mut ctx = Box::new(
            RenderedContext::launch(&config)
                .await
                .expect("failed to launch browser"),
        );

        let content = ctx.fetch(1).await.expect("fetch failed");
        assert!(content.body.contains("잔여 12대"));

        ctx.refresh().await.expect("refresh failed");
        ctx.recreate().await.expect("recreate failed");
        let again = ctx.fetch(2).await.expect("fetch after recreate failed");
        assert!(again.body.contains("TargetLot"));

        let snap = ctx.snapshot().await.expect("snapshot");
        assert!(snap.dom.is_some());

        ctx.close().await.expect("close failed");
    }
}
