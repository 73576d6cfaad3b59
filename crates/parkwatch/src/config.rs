// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration value object and path resolution.
//!
//! A [`Config`] is built once per run (by the binary, or by tests) and handed
//! to each component by reference. Nothing in the library reads the process
//! environment except the explicit `resolve_*` helpers below.

use crate::error::{ScrapeError, ScrapeResult};
use crate::extraction::{Position, Strategy};
use crate::model::fixed_offset;
use chrono::FixedOffset;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ROOT: &str = "https://park.yuc.co.kr";
pub const DEFAULT_FEED_PATH: &str = "/usersite/userSiteParkingLotInfo";
pub const DEFAULT_STORE_PATH: &str = "yuc/parking_log.csv";
pub const DEFAULT_DIAGNOSTICS_DIR: &str = "yuc/artifacts";

/// Korea Standard Time, seconds east of UTC.
pub const KST_OFFSET_SECS: i32 = 9 * 3600;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/120 Safari/537.36";

/// Where the raw content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Machine-readable feed over plain HTTP.
    Feed,
    /// Rendered document read through a headless browser.
    Rendered,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feed" | "xml" | "http" => Ok(SourceKind::Feed),
            "rendered" | "browser" => Ok(SourceKind::Rendered),
            other => Err(format!("unknown source kind '{other}' (expected feed|rendered)")),
        }
    }
}

/// What a placeholder token ("no data") in place of the facility's value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderPolicy {
    /// Record zero availability.
    Zero,
    /// Treat the sample as missing.
    Fail,
}

impl FromStr for PlaceholderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" | "0" => Ok(PlaceholderPolicy::Zero),
            "fail" | "missing" => Ok(PlaceholderPolicy::Fail),
            other => Err(format!("unknown placeholder policy '{other}' (expected zero|fail)")),
        }
    }
}

/// Remote source settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub root: String,
    pub feed_path: String,
    /// Fixed query parameters of the feed request (region/division filters).
    pub query: Vec<(String, String)>,
    /// Name of the cache-busting parameter, filled with the current unix millis.
    pub cache_buster_param: String,
    pub warmup_paths: Vec<String>,
    pub warmup_pause: Duration,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub warmup_timeout: Duration,
    /// Random pause before each data request, `(min, max)`.
    pub request_pause: (Duration, Duration),
    /// Page loaded by the rendered source.
    pub render_url: String,
    /// Element that must exist before the rendered text is read.
    pub wait_selector: Option<String>,
    /// Suppress images, fonts and media in the rendered source.
    pub block_resources: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let headers = [
            ("Accept", "application/xml, text/xml, */*; q=0.01"),
            ("Accept-Language", "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
            ("Referer", "https://park.yuc.co.kr/views/parkinglot/info/info.html"),
            ("Origin", DEFAULT_ROOT),
            ("Sec-Fetch-Site", "same-origin"),
            ("Sec-Fetch-Mode", "cors"),
            ("Sec-Fetch-Dest", "empty"),
            ("X-Requested-With", "XMLHttpRequest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            kind: SourceKind::Feed,
            root: DEFAULT_ROOT.to_string(),
            feed_path: DEFAULT_FEED_PATH.to_string(),
            query: vec![
                ("regionCd".to_string(), String::new()),
                ("parkinglotDivisionCd".to_string(), String::new()),
            ],
            cache_buster_param: "_".to_string(),
            warmup_paths: vec![
                "/".to_string(),
                "/views/parkinglot/info/info.html".to_string(),
                "/views/parkinglot/info/info.js".to_string(),
            ],
            warmup_pause: Duration::from_millis(500),
            user_agent: USER_AGENT.to_string(),
            headers,
            connect_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(60),
            warmup_timeout: Duration::from_secs(30),
            request_pause: (Duration::from_millis(300), Duration::from_millis(800)),
            render_url: format!("{DEFAULT_ROOT}/views/parkinglot/info/info.html"),
            wait_selector: None,
            block_resources: true,
        }
    }
}

impl SourceConfig {
    /// Feed URL for a request issued at `now_millis`.
    pub fn feed_url(&self, now_millis: i64) -> ScrapeResult<url::Url> {
        let base = url::Url::parse(&self.root)
            .map_err(|e| ScrapeError::Config(format!("invalid root URL '{}': {e}", self.root)))?;
        let mut url = base
            .join(&self.feed_path)
            .map_err(|e| ScrapeError::Config(format!("invalid feed path '{}': {e}", self.feed_path)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
            if !self.cache_buster_param.is_empty() {
                pairs.append_pair(&self.cache_buster_param, &now_millis.to_string());
            }
        }
        Ok(url)
    }

    /// Absolute URL of a warm-up path.
    pub fn warmup_url(&self, path: &str) -> ScrapeResult<url::Url> {
        url::Url::parse(&self.root)
            .and_then(|base| base.join(path))
            .map_err(|e| ScrapeError::Config(format!("invalid warm-up path '{path}': {e}")))
    }
}

/// Value extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Element wrapping one record in the XML feed.
    pub record_element: String,
    pub name_field: String,
    pub count_field: String,
    pub capacity_field: Option<String>,
    pub strategies: Vec<Strategy>,
    /// Words that precede the available count in free text.
    pub keywords: Vec<String>,
    /// Maximum characters between a keyword and its number.
    pub proximity_window: usize,
    pub position: Position,
    pub placeholder_tokens: Vec<String>,
    pub placeholder_policy: PlaceholderPolicy,
    /// Known capacity of the facility, if any.
    pub capacity: Option<u32>,
    /// Values above this are logged as suspicious but still recorded.
    pub plausibility_ceiling: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            record_element: "resultData".to_string(),
            name_field: "parkinglot_nm".to_string(),
            count_field: "parkd_current_num".to_string(),
            capacity_field: Some("parkd_total_num".to_string()),
            strategies: Strategy::ALL.to_vec(),
            keywords: ["잔여", "주차가능", "가능", "빈자리", "available", "remaining", "free"]
                .into_iter()
                .map(String::from)
                .collect(),
            proximity_window: 12,
            position: Position::Last,
            placeholder_tokens: ["-", "–", "—", "N/A", "null", ""]
                .into_iter()
                .map(String::from)
                .collect(),
            placeholder_policy: PlaceholderPolicy::Fail,
            capacity: None,
            plausibility_ceiling: 5000,
        }
    }
}

/// Attempt bound and backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Symmetric jitter fraction, `0.3` means ±30%.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(2),
            jitter: 0.3,
            max_delay: Duration::from_secs(90),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub lock_timeout: Duration,
    pub utc_offset_secs: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
            diagnostics_dir: PathBuf::from(DEFAULT_DIAGNOSTICS_DIR),
            lock_timeout: Duration::from_secs(10),
            utc_offset_secs: KST_OFFSET_SECS,
        }
    }
}

impl StoreConfig {
    pub fn offset(&self) -> FixedOffset {
        fixed_offset(self.utc_offset_secs).unwrap_or_else(|| {
            // validate() rejects out-of-range offsets; this is only reached
            // by configs that skipped validation.
            FixedOffset::east_opt(KST_OFFSET_SECS).expect("KST offset is valid")
        })
    }
}

/// Full configuration of one sampling run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the monitored facility; also written as the row's facility id.
    pub facility_name: String,
    pub source: SourceConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn new(facility_name: impl Into<String>) -> Self {
        Self {
            facility_name: facility_name.into(),
            source: SourceConfig::default(),
            extraction: ExtractionConfig::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> ScrapeResult<()> {
        let bad = |msg: String| Err(ScrapeError::Config(msg));

        if self.facility_name.trim().is_empty() {
            return bad("facility name must not be empty".into());
        }
        if self.retry.max_attempts == 0 {
            return bad("max attempts must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return bad(format!("jitter {} is outside 0.0..=1.0", self.retry.jitter));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return bad("max backoff delay is smaller than the base delay".into());
        }
        if self.source.request_pause.0 > self.source.request_pause.1 {
            return bad("request pause minimum exceeds its maximum".into());
        }
        if fixed_offset(self.store.utc_offset_secs).is_none() {
            return bad(format!("UTC offset {}s is out of range", self.store.utc_offset_secs));
        }
        if self.extraction.strategies.is_empty() {
            return bad("at least one extraction strategy is required".into());
        }
        if self.extraction.strategies.contains(&Strategy::ProximityRegex) {
            if self.extraction.keywords.iter().all(|k| k.trim().is_empty()) {
                return bad("proximity strategy needs at least one keyword".into());
            }
            if self.extraction.proximity_window == 0 {
                return bad("proximity window must be positive".into());
            }
        }
        if let Some(cap) = self.extraction.capacity {
            if cap == 0 {
                return bad("facility capacity must be positive when set".into());
            }
        }
        match self.source.kind {
            SourceKind::Feed => {
                self.source.feed_url(0)?;
            }
            SourceKind::Rendered => {
                url::Url::parse(&self.source.render_url).map_err(|e| {
                    ScrapeError::Config(format!(
                        "invalid render URL '{}': {e}",
                        self.source.render_url
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Resolve the store path: explicit value, then `OUTPUT_CSV`, then the default.
pub fn resolve_store_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    if let Ok(env_path) = std::env::var("OUTPUT_CSV") {
        if !env_path.trim().is_empty() {
            return PathBuf::from(env_path);
        }
    }
    PathBuf::from(DEFAULT_STORE_PATH)
}

/// Resolve the diagnostics directory: explicit value, then `ARTIFACT_DIR`, then the default.
pub fn resolve_diagnostics_dir(explicit: Option<&str>) -> PathBuf {
    if let Some(dir) = explicit {
        return PathBuf::from(dir);
    }
    if let Ok(env_dir) = std::env::var("ARTIFACT_DIR") {
        if !env_dir.trim().is_empty() {
            return PathBuf::from(env_dir);
        }
    }
    PathBuf::from(DEFAULT_DIAGNOSTICS_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        Config::new("TargetLot").validate().unwrap();
    }

    #[test]
    fn test_empty_facility_rejected() {
        let err = Config::new("  ").validate().unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut cfg = Config::new("Lot");
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_feed_url_carries_filters_and_cache_buster() {
        let cfg = SourceConfig::default();
        let url = cfg.feed_url(1_700_000_000_123).unwrap();
        assert_eq!(url.path(), DEFAULT_FEED_PATH);
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("regionCd".to_string(), String::new())));
        assert!(pairs.contains(&("parkinglotDivisionCd".to_string(), String::new())));
        assert!(pairs.contains(&("_".to_string(), "1700000000123".to_string())));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("zero".parse::<PlaceholderPolicy>(), Ok(PlaceholderPolicy::Zero));
        assert_eq!("FAIL".parse::<PlaceholderPolicy>(), Ok(PlaceholderPolicy::Fail));
        assert!("maybe".parse::<PlaceholderPolicy>().is_err());
        assert_eq!("rendered".parse::<SourceKind>(), Ok(SourceKind::Rendered));
    }

    #[test]
    fn test_explicit_paths_win() {
        assert_eq!(
            resolve_store_path(Some("/tmp/a.csv")),
            PathBuf::from("/tmp/a.csv")
        );
        assert_eq!(
            resolve_diagnostics_dir(Some("/tmp/art")),
            PathBuf::from("/tmp/art")
        );
    }
}
