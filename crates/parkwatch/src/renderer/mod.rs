// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Browser-backed source for pages that only show the figure after rendering.
//!
//! The browser engine (Chromium via chromiumoxide) stays behind the
//! [`NavigationContext`](crate::acquisition::NavigationContext) trait; the
//! retry controller never sees it directly.

pub mod chromium;

/// URL patterns suppressed when resource blocking is on: images, fonts, media.
pub const BLOCKED_RESOURCE_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.bmp", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.eot", "*.mp4", "*.webm", "*.mp3", "*.ogg", "*.wav",
];

/// Outcome of loading the render URL.
#[derive(Debug, Clone)]
pub struct PageLoad {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time until the page (and the awaited element) was ready.
    pub load_time_ms: u64,
}

/// Poll interval while waiting for an element to appear.
pub(crate) const WAIT_POLL_MS: u64 = 250;
