// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Observations and stored rows.

use chrono::{DateTime, FixedOffset, NaiveDate, SubsecRound, Timelike, Utc};
use serde::Serialize;

/// Timestamp layout written to the store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Layout used by rows written before the store carried a facility column.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Header row of a freshly created store.
pub const CSV_HEADER: [&str; 3] = ["timestamp", "facility_name", "available_count"];

/// One successfully extracted sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub timestamp: DateTime<FixedOffset>,
    pub available: u32,
    pub facility_id: String,
}

impl Observation {
    pub fn new(timestamp: DateTime<FixedOffset>, available: u32, facility_id: &str) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            available,
            facility_id: facility_id.to_string(),
        }
    }
}

/// A row of the persisted series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub facility_name: String,
    pub available: u32,
}

impl StoredRecord {
    /// Parse a CSV row. Returns `None` for the header and for rows that are
    /// not a record (blank, truncated, non-numeric count).
    ///
    /// Two-column rows (`timestamp, available`) from older stores are accepted
    /// with an empty facility name.
    pub fn from_csv(record: &csv::StringRecord) -> Option<Self> {
        let (ts, facility, count) = match record.len() {
            2 => (record.get(0)?, "", record.get(1)?),
            n if n >= 3 => (record.get(0)?, record.get(1)?, record.get(2)?),
            _ => return None,
        };
        Some(Self {
            timestamp: parse_timestamp(ts)?,
            facility_name: facility.trim().to_string(),
            available: count.trim().parse().ok()?,
        })
    }

    pub fn to_row(&self) -> [String; 3] {
        [
            format_timestamp(&self.timestamp),
            self.facility_name.clone(),
            self.available.to_string(),
        ]
    }
}

impl From<&Observation> for StoredRecord {
    fn from(obs: &Observation) -> Self {
        Self {
            timestamp: obs.timestamp,
            facility_name: obs.facility_id.clone(),
            available: obs.available,
        }
    }
}

/// Build the facility's fixed offset from seconds east of UTC.
pub fn fixed_offset(seconds_east: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(seconds_east)
}

/// Current time in the facility's offset, second precision.
pub fn now_in(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset).trunc_subsecs(0)
}

pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    DateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .or_else(|_| DateTime::parse_from_str(s, LEGACY_TIMESTAMP_FORMAT))
        .ok()
}

/// Hour-aligned dedup bucket of `ts`, evaluated in `offset`.
pub fn hour_bucket(ts: &DateTime<FixedOffset>, offset: &FixedOffset) -> (NaiveDate, u32) {
    let local = ts.with_timezone(offset);
    (local.date_naive(), local.hour())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kst() -> FixedOffset {
        fixed_offset(9 * 3600).unwrap()
    }

    #[test]
    fn test_timestamp_format_roundtrip() {
        let ts = DateTime::parse_from_rfc3339("2025-03-01T09:15:00+09:00").unwrap();
        let text = format_timestamp(&ts);
        assert_eq!(text, "2025-03-01T09:15:00+09:00");
        assert_eq!(parse_timestamp(&text), Some(ts));
    }

    #[test]
    fn test_parse_legacy_timestamp() {
        let ts = parse_timestamp("2025-03-01 09:15:00+0900").unwrap();
        assert_eq!(ts.offset(), &kst());
        assert_eq!(ts.hour(), 9);
    }

    #[test]
    fn test_observation_truncates_subseconds() {
        let ts = DateTime::parse_from_rfc3339("2025-03-01T09:15:00.734+09:00").unwrap();
        let obs = Observation::new(ts, 5, "Lot");
        assert_eq!(obs.timestamp.nanosecond(), 0);
    }

    #[test]
    fn test_record_from_csv_variants() {
        let row = csv::StringRecord::from(vec!["2025-03-01T09:15:00+09:00", "Lot A", "20"]);
        let rec = StoredRecord::from_csv(&row).unwrap();
        assert_eq!(rec.facility_name, "Lot A");
        assert_eq!(rec.available, 20);

        let legacy = csv::StringRecord::from(vec!["2025-03-01 09:15:00+0900", "7"]);
        let rec = StoredRecord::from_csv(&legacy).unwrap();
        assert_eq!(rec.facility_name, "");
        assert_eq!(rec.available, 7);

        let header = csv::StringRecord::from(CSV_HEADER.to_vec());
        assert!(StoredRecord::from_csv(&header).is_none());
    }

    #[test]
    fn test_hour_bucket_uses_facility_offset() {
        let a = DateTime::parse_from_rfc3339("2025-03-01T00:30:00+00:00").unwrap();
        let b = DateTime::parse_from_rfc3339("2025-03-01T09:59:59+09:00").unwrap();
        assert_eq!(hour_bucket(&a, &kst()), hour_bucket(&b, &kst()));
    }
}
