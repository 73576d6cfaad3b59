// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! One sampling run: acquire, extract, validate, persist.

use crate::acquisition::{build_context, NavigationContext};
use crate::config::Config;
use crate::error::{ScrapeError, ScrapeResult};
use crate::extraction::ValueFlag;
use crate::model::{format_timestamp, Observation};
use crate::retry::RetryController;
use crate::store::{AppendOutcome, ObservationStore, SkipReason};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// What happened to the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Appended,
    Skipped,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub facility: String,
    pub timestamp: String,
    pub available: u32,
    pub strategy: &'static str,
    pub flags: Vec<String>,
    pub attempts: u32,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub store: PathBuf,
    pub elapsed_ms: u64,
}

fn flag_label(flag: &ValueFlag) -> String {
    match flag {
        ValueFlag::ClampedNegative { raw } => format!("clamped_negative({raw})"),
        ValueFlag::ClampedToCapacity { raw, capacity } => {
            format!("clamped_to_capacity({raw}>{capacity})")
        }
        ValueFlag::Outlier { ceiling } => format!("outlier(>{ceiling})"),
        ValueFlag::PlaceholderAsZero => "placeholder_as_zero".to_string(),
    }
}

/// Run once with the context selected by the configuration.
pub async fn run_once(config: &Config) -> ScrapeResult<RunReport> {
    config.validate()?;
    let mut ctx = build_context(config).await?;
    let result = run_with_context(config, ctx.as_mut()).await;
    if let Err(e) = ctx.close().await {
        tracing::debug!("closing context: {e}");
    }
    result
}

/// Run once against an already built context. The context stays open.
pub async fn run_with_context(
    config: &Config,
    ctx: &mut dyn NavigationContext,
) -> ScrapeResult<RunReport> {
    let start = Instant::now();
    tracing::info!("sampling '{}'", config.facility_name);

    let mut controller = RetryController::new(config);
    let outcome = controller.run(ctx).await?;

    let store = ObservationStore::new(&config.store);
    let appended = persist(&store, &outcome.observation).await?;

    let (status, skip_reason) = match appended {
        AppendOutcome::Appended(_) => (RunStatus::Appended, None),
        AppendOutcome::Skipped(reason) => {
            tracing::info!(
                "not stored ({reason:?}): {} at '{}'",
                outcome.observation.available,
                config.facility_name
            );
            (RunStatus::Skipped, Some(reason))
        }
    };

    Ok(RunReport {
        facility: outcome.observation.facility_id.clone(),
        timestamp: format_timestamp(&outcome.observation.timestamp),
        available: outcome.observation.available,
        strategy: outcome.extraction.strategy.name(),
        flags: outcome.extraction.flags.iter().map(flag_label).collect(),
        attempts: outcome.attempts,
        status,
        skip_reason,
        store: store.path().to_path_buf(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

/// Append on the blocking pool; store failures are not retried.
pub async fn persist(store: &ObservationStore, observation: &Observation) -> ScrapeResult<AppendOutcome> {
    let store = store.clone();
    let observation = observation.clone();
    tokio::task::spawn_blocking(move || store.append(&observation))
        .await
        .map_err(|e| ScrapeError::Io(std::io::Error::other(e)))?
}
