// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command-line and environment options, folded into a [`Config`].

use clap::{Args, ValueEnum};
use parkwatch::config::{
    resolve_diagnostics_dir, resolve_store_path, Config, PlaceholderPolicy, SourceKind,
};
use parkwatch::extraction::{Position, Strategy};
use parkwatch::ScrapeError;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Options shared by every command. Each has a `PARKWATCH_*` variable.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Facility name as it appears in the source.
    #[arg(long, global = true, env = "PARKWATCH_FACILITY")]
    pub facility: Option<String>,

    /// Source kind (feed, rendered).
    #[arg(long, global = true, env = "PARKWATCH_SOURCE")]
    pub source: Option<SourceKind>,

    /// Site root for the feed and its warm-up pages.
    #[arg(long, global = true, env = "PARKWATCH_ROOT")]
    pub root: Option<String>,

    /// Page loaded by the rendered source.
    #[arg(long, global = true, env = "PARKWATCH_RENDER_URL")]
    pub render_url: Option<String>,

    /// CSS selector that must exist before rendered text is read.
    #[arg(long, global = true, env = "PARKWATCH_WAIT_SELECTOR")]
    pub wait_selector: Option<String>,

    /// Load images, fonts and media in the rendered source.
    #[arg(long, global = true, env = "PARKWATCH_LOAD_RESOURCES")]
    pub load_resources: bool,

    /// CSV store path. Falls back to OUTPUT_CSV.
    #[arg(long, global = true, env = "PARKWATCH_STORE")]
    pub store: Option<String>,

    /// Diagnostics directory. Falls back to ARTIFACT_DIR.
    #[arg(long, global = true, env = "PARKWATCH_DIAGNOSTICS_DIR")]
    pub diagnostics_dir: Option<String>,

    /// Attempts before giving up.
    #[arg(long, global = true, env = "PARKWATCH_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// First backoff delay in seconds.
    #[arg(long, global = true, env = "PARKWATCH_BACKOFF_BASE")]
    pub backoff_base: Option<f64>,

    /// Longest backoff delay in seconds.
    #[arg(long, global = true, env = "PARKWATCH_BACKOFF_CAP")]
    pub backoff_cap: Option<f64>,

    /// Backoff jitter fraction (0.3 = ±30%).
    #[arg(long, global = true, env = "PARKWATCH_JITTER")]
    pub jitter: Option<f64>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, env = "PARKWATCH_REQUEST_TIMEOUT")]
    pub request_timeout: Option<f64>,

    /// Store lock wait in seconds.
    #[arg(long, global = true, env = "PARKWATCH_LOCK_TIMEOUT")]
    pub lock_timeout: Option<f64>,

    /// What a "no data" count means (zero, fail).
    #[arg(long, global = true, env = "PARKWATCH_PLACEHOLDER")]
    pub placeholder: Option<PlaceholderPolicy>,

    /// Known capacity; larger readings are clamped to it.
    #[arg(long, global = true, env = "PARKWATCH_CAPACITY")]
    pub capacity: Option<u32>,

    /// Readings above this are flagged as outliers.
    #[arg(long, global = true, env = "PARKWATCH_CEILING")]
    pub ceiling: Option<u32>,

    /// Extraction strategies in order (structured,proximity,positional,global-min).
    #[arg(long, global = true, env = "PARKWATCH_STRATEGIES", value_delimiter = ',')]
    pub strategies: Option<Vec<Strategy>>,

    /// Number picked by the positional strategy (first, last, or an index).
    #[arg(long, global = true, env = "PARKWATCH_POSITION")]
    pub position: Option<Position>,

    /// Keywords for the proximity strategy.
    #[arg(long, global = true, env = "PARKWATCH_KEYWORDS", value_delimiter = ',')]
    pub keywords: Option<Vec<String>>,

    /// Facility UTC offset in hours.
    #[arg(long, global = true, env = "PARKWATCH_UTC_OFFSET", allow_hyphen_values = true)]
    pub utc_offset: Option<i32>,
}

fn secs(name: &str, value: f64) -> Result<Duration, ScrapeError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ScrapeError::Config(format!("--{name} must be a non-negative number of seconds")))
}

impl ConfigArgs {
    /// Build the run configuration. Unset options keep their defaults.
    pub fn to_config(&self) -> Result<Config, ScrapeError> {
        let mut cfg = Config::new(self.facility.clone().unwrap_or_default().trim());

        if let Some(kind) = self.source {
            cfg.source.kind = kind;
        }
        if let Some(root) = &self.root {
            cfg.source.root = root.trim_end_matches('/').to_string();
        }
        if let Some(url) = &self.render_url {
            cfg.source.render_url = url.clone();
        }
        cfg.source.wait_selector = self.wait_selector.clone();
        cfg.source.block_resources = !self.load_resources;
        if let Some(t) = self.request_timeout {
            cfg.source.request_timeout = secs("request-timeout", t)?;
        }

        if let Some(n) = self.max_attempts {
            cfg.retry.max_attempts = n;
        }
        if let Some(b) = self.backoff_base {
            cfg.retry.base_delay = secs("backoff-base", b)?;
        }
        if let Some(c) = self.backoff_cap {
            cfg.retry.max_delay = secs("backoff-cap", c)?;
        }
        if let Some(j) = self.jitter {
            cfg.retry.jitter = j;
        }

        if let Some(p) = self.placeholder {
            cfg.extraction.placeholder_policy = p;
        }
        cfg.extraction.capacity = self.capacity;
        if let Some(c) = self.ceiling {
            cfg.extraction.plausibility_ceiling = c;
        }
        if let Some(s) = &self.strategies {
            cfg.extraction.strategies = s.clone();
        }
        if let Some(p) = self.position {
            cfg.extraction.position = p;
        }
        if let Some(k) = &self.keywords {
            cfg.extraction.keywords = k.clone();
        }

        cfg.store.path = resolve_store_path(self.store.as_deref());
        cfg.store.diagnostics_dir = resolve_diagnostics_dir(self.diagnostics_dir.as_deref());
        if let Some(l) = self.lock_timeout {
            cfg.store.lock_timeout = secs("lock-timeout", l)?;
        }
        if let Some(h) = self.utc_offset {
            cfg.store.utc_offset_secs = h.saturating_mul(3600);
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ConfigArgs,
    }

    fn parse(argv: &[&str]) -> Config {
        let mut full = vec!["parkwatch"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args.to_config().unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let cfg = parse(&[
            "--facility",
            " TargetLot ",
            "--store",
            "/tmp/p.csv",
            "--max-attempts",
            "3",
            "--backoff-base",
            "0.5",
            "--placeholder",
            "zero",
            "--strategies",
            "structured,global-min",
            "--position",
            "0",
            "--utc-offset",
            "-5",
        ]);
        assert_eq!(cfg.facility_name, "TargetLot");
        assert_eq!(cfg.store.path, std::path::PathBuf::from("/tmp/p.csv"));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(500));
        assert_eq!(cfg.extraction.placeholder_policy, PlaceholderPolicy::Zero);
        assert_eq!(
            cfg.extraction.strategies,
            vec![Strategy::StructuredLookup, Strategy::GlobalMinimum]
        );
        assert_eq!(cfg.extraction.position, Position::Index(0));
        assert_eq!(cfg.store.utc_offset_secs, -5 * 3600);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_defaults_without_flags() {
        let cfg = parse(&["--facility", "Lot", "--store", "a.csv", "--diagnostics-dir", "art"]);
        assert_eq!(cfg.retry.max_attempts, 6);
        assert_eq!(cfg.source.kind, SourceKind::Feed);
        assert!(cfg.source.block_resources);
        assert_eq!(cfg.extraction.placeholder_policy, PlaceholderPolicy::Fail);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let args = TestCli::try_parse_from(["parkwatch", "--backoff-base=-1"])
            .unwrap()
            .args;
        assert!(matches!(args.to_config(), Err(ScrapeError::Config(_))));
    }

    #[test]
    fn test_unknown_strategy_is_usage_error() {
        assert!(TestCli::try_parse_from(["parkwatch", "--strategies", "guess"]).is_err());
    }
}
