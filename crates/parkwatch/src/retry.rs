// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry of fetch + extract with exponential backoff.
//!
//! `Idle → Attempting(n) → {Success, Exhausted}`. Every failure inside an
//! attempt is retried the same way until the attempt bound is reached; the
//! last error is then returned unchanged.

use crate::acquisition::{NavigationContext, RawContent};
use crate::config::{Config, RetryConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{ScrapeError, ScrapeResult};
use crate::extraction::{Extraction, ValueExtractor};
use crate::model::{now_in, Observation};
use chrono::FixedOffset;
use rand::Rng;
use std::time::Duration;

/// Exponent cap; keeps `2^n` finite long before the delay cap applies.
const MAX_DOUBLINGS: u32 = 30;

/// Controller state, traced on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting(u32),
    Success,
    Exhausted,
}

/// `base * 2^(attempt-1)`, jittered, clamped to `[0, max]`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub jitter: f64,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base: config.base_delay,
            jitter: config.jitter,
            max: config.max_delay,
        }
    }

    /// Delay before the attempt following failed attempt `attempt`, without jitter.
    ///
    /// Rate-limit responses get one extra doubling.
    pub fn nominal(&self, attempt: u32, rate_limited: bool) -> Duration {
        let doublings = (attempt.saturating_sub(1) + u32::from(rate_limited)).min(MAX_DOUBLINGS);
        let secs = self.base.as_secs_f64() * 2f64.powi(doublings as i32);
        clamp_secs(secs, self.max)
    }

    /// Jittered delay using the thread-local RNG.
    pub fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with(attempt, rate_limited, &mut rng)
    }

    pub fn delay_with<R: Rng>(&self, attempt: u32, rate_limited: bool, rng: &mut R) -> Duration {
        let nominal = self.nominal(attempt, rate_limited);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        clamp_secs(nominal.as_secs_f64() * factor, self.max)
    }
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.min(max.as_secs_f64()))
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub observation: Observation,
    pub extraction: Extraction,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Backoff delays slept between attempts.
    pub delays: Vec<Duration>,
}

impl RetryOutcome {
    pub fn available(&self) -> u32 {
        self.observation.available
    }
}

/// Drives fetch and extraction attempts against one navigation context.
pub struct RetryController {
    max_attempts: u32,
    backoff: BackoffPolicy,
    extractor: ValueExtractor,
    diagnostics: Diagnostics,
    facility: String,
    offset: FixedOffset,
    state: RetryState,
}

impl RetryController {
    pub fn new(config: &Config) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            backoff: BackoffPolicy::from_config(&config.retry),
            extractor: ValueExtractor::from_config(config),
            diagnostics: Diagnostics::new(&config.store.diagnostics_dir),
            facility: config.facility_name.trim().to_string(),
            offset: config.store.offset(),
            state: RetryState::Idle,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    fn transition(&mut self, next: RetryState) {
        tracing::debug!("retry state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Attempt until a value is extracted or the attempt bound is reached.
    pub async fn run(&mut self, ctx: &mut dyn NavigationContext) -> ScrapeResult<RetryOutcome> {
        let mut delays = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.transition(RetryState::Attempting(attempt));

            let (err, raw) = match self.attempt(ctx, attempt).await {
                Ok(extraction) => {
                    self.transition(RetryState::Success);
                    let observation =
                        Observation::new(now_in(self.offset), extraction.available, &self.facility);
                    tracing::info!(
                        "attempt {attempt}/{}: {} available at '{}' via {}",
                        self.max_attempts,
                        observation.available,
                        self.facility,
                        extraction.strategy.name()
                    );
                    return Ok(RetryOutcome {
                        observation,
                        extraction,
                        attempts: attempt,
                        delays,
                    });
                }
                Err(failure) => failure,
            };

            tracing::warn!("attempt {attempt}/{} failed: {err}", self.max_attempts);
            let snapshot = ctx.snapshot().await;
            self.diagnostics
                .capture_attempt(attempt, &err, raw.as_ref(), snapshot.as_ref())
                .await;

            if attempt >= self.max_attempts {
                self.transition(RetryState::Exhausted);
                tracing::warn!("giving up after {attempt} attempts");
                self.diagnostics.write_last_error(&err, attempt).await;
                return Err(err);
            }

            let delay = self.backoff.delay(attempt, err.is_rate_limited());
            tracing::info!("retrying in {:.1}s", delay.as_secs_f64());
            delays.push(delay);
            tokio::time::sleep(delay).await;

            recover(ctx).await;
        }
    }

    /// One fetch and extraction. The raw body travels with the error so it
    /// can be saved.
    async fn attempt(
        &self,
        ctx: &mut dyn NavigationContext,
        attempt: u32,
    ) -> Result<Extraction, (ScrapeError, Option<RawContent>)> {
        let raw = ctx.fetch(attempt).await.map_err(|e| (e, None))?;
        if let Err(e) = raw.ensure_data() {
            return Err((e, Some(raw)));
        }
        match self.extractor.extract(&raw) {
            Ok(extraction) => Ok(extraction),
            Err(e) => Err((e, Some(raw))),
        }
    }
}

/// Refresh the context, recreating it when the refresh itself fails.
async fn recover(ctx: &mut dyn NavigationContext) {
    match ctx.refresh().await {
        Ok(()) => {}
        Err(e) => {
            tracing::warn!("refresh failed ({e}); recreating context");
            if let Err(e) = ctx.recreate().await {
                tracing::warn!("recreating context failed: {e}");
            }
        }
    }
}
