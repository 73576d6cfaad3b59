// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Append-only CSV series of observations.
//!
//! Every read-before-append and the append itself happen under the store's
//! sidecar lock, so overlapping runs cannot interleave. The methods here
//! block; async callers run them on the blocking pool.

pub mod lock;
pub mod tail;

use crate::config::StoreConfig;
use crate::error::ScrapeResult;
use crate::model::{hour_bucket, Observation, StoredRecord, CSV_HEADER};
use chrono::FixedOffset;
use lock::StoreLock;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use tail::read_last_record;

/// Why an observation was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Same value as the last row, within the same hour bucket.
    Unchanged,
    /// Older than the last row.
    Stale,
}

/// Result of [`ObservationStore::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(StoredRecord),
    Skipped(SkipReason),
}

impl AppendOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, AppendOutcome::Appended(_))
    }
}

/// Dedup decision for `candidate` given the newest stored row.
///
/// Rows without a facility name (older two-column stores) count as the same
/// facility; a different name never dedups.
pub fn skip_reason(
    last: Option<&StoredRecord>,
    candidate: &StoredRecord,
    offset: &FixedOffset,
) -> Option<SkipReason> {
    let last = last?;
    let same_facility =
        last.facility_name.is_empty() || last.facility_name == candidate.facility_name;
    if !same_facility {
        return None;
    }
    if candidate.timestamp < last.timestamp {
        return Some(SkipReason::Stale);
    }
    if candidate.available == last.available
        && hour_bucket(&candidate.timestamp, offset) == hour_bucket(&last.timestamp, offset)
    {
        return Some(SkipReason::Unchanged);
    }
    None
}

/// Handle on the CSV file. Cheap to clone; holds no open file.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    path: PathBuf,
    lock_timeout: Duration,
    offset: FixedOffset,
}

impl ObservationStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            path: config.path.clone(),
            lock_timeout: config.lock_timeout,
            offset: config.offset(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> ScrapeResult<StoreLock> {
        StoreLock::acquire(&self.path, self.lock_timeout)
    }

    /// Create the file with its header. Existing content is left untouched.
    pub fn initialize(&self) -> ScrapeResult<()> {
        let _guard = self.lock()?;
        self.ensure_header()
    }

    /// Newest stored row, if any.
    pub fn last(&self) -> ScrapeResult<Option<StoredRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let _guard = self.lock()?;
        let mut file = File::open(&self.path)?;
        read_last_record(&mut file)
    }

    /// Append `observation` unless the dedup rule skips it. The row is
    /// flushed and synced before this returns.
    pub fn append(&self, observation: &Observation) -> ScrapeResult<AppendOutcome> {
        let _guard = self.lock()?;
        self.ensure_header()?;

        let candidate = StoredRecord::from(observation);
        let mut file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let last = read_last_record(&mut file)?;

        if let Some(reason) = skip_reason(last.as_ref(), &candidate, &self.offset) {
            tracing::debug!(
                "skipping {} for '{}' ({reason:?}; last {:?})",
                candidate.available,
                candidate.facility_name,
                last.as_ref().map(|r| (r.timestamp, r.available))
            );
            return Ok(AppendOutcome::Skipped(reason));
        }

        if !ends_with_newline(&mut file)? {
            file.write_all(b"\n")?;
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(candidate.to_row())?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.sync_all()?;

        tracing::info!(
            "appended {} for '{}' to {}",
            candidate.available,
            candidate.facility_name,
            self.path.display()
        );
        Ok(AppendOutcome::Appended(candidate))
    }

    /// Write the header into a missing or empty file. Caller holds the lock.
    fn ensure_header(&self) -> ScrapeResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if file.metadata()?.len() > 0 {
            return Ok(());
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.sync_all()?;
        tracing::info!("initialized store {}", self.path.display());
        Ok(())
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KST_OFFSET_SECS;
    use crate::model::{fixed_offset, parse_timestamp};

    fn kst() -> FixedOffset {
        fixed_offset(KST_OFFSET_SECS).unwrap()
    }

    fn record(ts: &str, available: u32) -> StoredRecord {
        StoredRecord {
            timestamp: parse_timestamp(ts).unwrap(),
            facility_name: "TargetLot".into(),
            available,
        }
    }

    fn obs(ts: &str, available: u32) -> Observation {
        Observation::new(parse_timestamp(ts).unwrap(), available, "TargetLot")
    }

    fn store_in(dir: &Path) -> ObservationStore {
        ObservationStore::new(&StoreConfig {
            path: dir.join("yuc/parking_log.csv"),
            diagnostics_dir: dir.join("artifacts"),
            lock_timeout: Duration::from_millis(500),
            utc_offset_secs: KST_OFFSET_SECS,
        })
    }

    #[test]
    fn test_same_hour_same_value_skipped() {
        let last = record("2025-03-01T09:15:00+09:00", 20);
        let new = record("2025-03-01T09:50:00+09:00", 20);
        assert_eq!(skip_reason(Some(&last), &new, &kst()), Some(SkipReason::Unchanged));
    }

    #[test]
    fn test_hour_change_appends_unchanged_value() {
        let last = record("2025-03-01T09:55:00+09:00", 20);
        let new = record("2025-03-01T10:05:00+09:00", 20);
        assert_eq!(skip_reason(Some(&last), &new, &kst()), None);
    }

    #[test]
    fn test_value_change_appends() {
        let last = record("2025-03-01T10:00:00+09:00", 20);
        let new = record("2025-03-01T10:10:00+09:00", 25);
        assert_eq!(skip_reason(Some(&last), &new, &kst()), None);
    }

    #[test]
    fn test_bucket_uses_facility_offset() {
        // 00:30Z and 00:50Z are both 09:xx in KST.
        let last = record("2025-03-01T00:30:00+00:00", 20);
        let new = record("2025-03-01T09:50:00+09:00", 20);
        assert_eq!(skip_reason(Some(&last), &new, &kst()), Some(SkipReason::Unchanged));
    }

    #[test]
    fn test_older_timestamp_is_stale() {
        let last = record("2025-03-01T10:10:00+09:00", 20);
        let new = record("2025-03-01T10:05:00+09:00", 25);
        assert_eq!(skip_reason(Some(&last), &new, &kst()), Some(SkipReason::Stale));
    }

    #[test]
    fn test_other_facility_never_dedups() {
        let mut last = record("2025-03-01T09:15:00+09:00", 20);
        last.facility_name = "OtherLot".into();
        let new = record("2025-03-01T09:20:00+09:00", 20);
        assert_eq!(skip_reason(Some(&last), &new, &kst()), None);
        assert_eq!(skip_reason(None, &new, &kst()), None);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.initialize().unwrap();
        let first = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(first, "timestamp,facility_name,available_count\n");

        store.append(&obs("2025-03-01T09:15:00+09:00", 20)).unwrap();
        let before = std::fs::read(store.path()).unwrap();
        store.initialize().unwrap();
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_initialize_unwritable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = ObservationStore::new(&StoreConfig {
            path: blocker.join("log.csv"),
            ..StoreConfig::default()
        });
        let err = store.initialize().unwrap_err();
        assert!(matches!(err, crate::error::ScrapeError::Io(_)));
    }

    #[test]
    fn test_append_then_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.last().unwrap(), None);

        let outcome = store.append(&obs("2025-03-01T09:15:00+09:00", 20)).unwrap();
        assert!(outcome.is_appended());
        assert_eq!(
            store.append(&obs("2025-03-01T09:50:00+09:00", 20)).unwrap(),
            AppendOutcome::Skipped(SkipReason::Unchanged)
        );
        assert!(store.append(&obs("2025-03-01T10:05:00+09:00", 20)).unwrap().is_appended());

        let last = store.last().unwrap().unwrap();
        assert_eq!(last.timestamp, parse_timestamp("2025-03-01T10:05:00+09:00").unwrap());

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            "timestamp,facility_name,available_count\n\
             2025-03-01T09:15:00+09:00,TargetLot,20\n\
             2025-03-01T10:05:00+09:00,TargetLot,20\n"
        );
    }

    #[test]
    fn test_append_repairs_missing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            "timestamp,facility_name,available_count\n2025-03-01T09:15:00+09:00,TargetLot,20",
        )
        .unwrap();

        store.append(&obs("2025-03-01T09:20:00+09:00", 21)).unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.ends_with(
            "2025-03-01T09:15:00+09:00,TargetLot,20\n2025-03-01T09:20:00+09:00,TargetLot,21\n"
        ));
    }

    #[test]
    fn test_append_after_legacy_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            "timestamp_kst,available_sum\n2025-03-01 09:15:00+0900,20\n",
        )
        .unwrap();

        assert_eq!(
            store.append(&obs("2025-03-01T09:40:00+09:00", 20)).unwrap(),
            AppendOutcome::Skipped(SkipReason::Unchanged)
        );
        assert!(store.append(&obs("2025-03-01T09:45:00+09:00", 19)).unwrap().is_appended());
    }

    #[test]
    fn test_append_waits_for_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.initialize().unwrap();

        let held = StoreLock::acquire(store.path(), Duration::from_secs(1)).unwrap();
        let err = store.append(&obs("2025-03-01T09:15:00+09:00", 20)).unwrap_err();
        assert!(matches!(err, crate::error::ScrapeError::LockTimeout { .. }));
        drop(held);

        // Nothing was written while the lock was held elsewhere.
        assert_eq!(store.last().unwrap(), None);
    }
}
