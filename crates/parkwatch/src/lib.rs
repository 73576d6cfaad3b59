// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parkwatch: samples a parking facility's available-space count and keeps
//! a deduplicated, append-only time series of it.
//!
//! A run fetches the remote source ([`acquisition`]), reduces it to one
//! number ([`extraction`]) under bounded retry ([`retry`]), and appends the
//! observation to a CSV store ([`store`]). [`pipeline::run_once`] wires the
//! four together.

pub mod acquisition;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extraction;
pub mod model;
pub mod pipeline;
pub mod renderer;
pub mod retry;
pub mod store;

pub use acquisition::{ContentKind, NavigationContext, RawContent};
pub use config::Config;
pub use error::{ScrapeError, ScrapeResult};
pub use extraction::{Extraction, ValueExtractor};
pub use model::{Observation, StoredRecord};
pub use pipeline::{run_once, RunReport};
pub use retry::{RetryController, RetryOutcome};
pub use store::{AppendOutcome, ObservationStore, SkipReason};
