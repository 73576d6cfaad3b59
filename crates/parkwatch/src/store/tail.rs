// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Backward scan for the newest record of an append-only CSV stream.

use crate::error::ScrapeResult;
use crate::model::StoredRecord;
use std::io::{Read, Seek, SeekFrom};

/// Bytes read per backward step.
const CHUNK_SIZE: u64 = 4096;

/// What a single line turned out to be.
enum Line {
    Record(StoredRecord),
    Header,
    /// Blank, truncated or otherwise unreadable.
    Other,
}

fn classify_line(bytes: &[u8]) -> Line {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return Line::Other;
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let Some(Ok(row)) = reader.records().next() else {
        return Line::Other;
    };

    if let Some(record) = StoredRecord::from_csv(&row) {
        return Line::Record(record);
    }
    match row.get(0).map(str::trim) {
        Some(first) if first.starts_with("timestamp") => Line::Header,
        _ => Line::Other,
    }
}

/// Most recent record of `reader`, reading from the end in fixed-size chunks.
///
/// A missing trailing newline, trailing blank lines and unreadable lines are
/// tolerated; the header line (or the start of the stream) ends the search.
pub fn read_last_record<R: Read + Seek>(reader: &mut R) -> ScrapeResult<Option<StoredRecord>> {
    let mut pos = reader.seek(SeekFrom::End(0))?;
    // Unscanned bytes between `pos` and the oldest line already examined.
    let mut pending: Vec<u8> = Vec::new();

    while pos > 0 {
        let step = CHUNK_SIZE.min(pos);
        pos -= step;
        reader.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        reader.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&pending);
        pending = chunk;

        // Everything after the last newline is a complete line.
        while let Some(nl) = pending.iter().rposition(|b| *b == b'\n') {
            let line = pending.split_off(nl + 1);
            pending.truncate(nl);
            match classify_line(&line) {
                Line::Record(record) => return Ok(Some(record)),
                Line::Header => return Ok(None),
                Line::Other => {}
            }
        }
    }

    // The first line of the stream.
    match classify_line(&pending) {
        Line::Record(record) => Ok(Some(record)),
        Line::Header | Line::Other => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "timestamp,facility_name,available_count\n";

    fn last(text: &str) -> Option<StoredRecord> {
        read_last_record(&mut Cursor::new(text.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_trailing_newline_is_irrelevant() {
        let body = format!(
            "{HEADER}2025-03-01T09:15:00+09:00,TargetLot,20\n2025-03-01T09:50:00+09:00,TargetLot,21"
        );
        let without = last(&body).unwrap();
        let with = last(&format!("{body}\n")).unwrap();
        assert_eq!(without, with);
        assert_eq!(with.available, 21);
    }

    #[test]
    fn test_empty_and_header_only() {
        assert_eq!(last(""), None);
        assert_eq!(last(HEADER), None);
        assert_eq!(last(HEADER.trim_end()), None);
        assert_eq!(last("\n\n"), None);
    }

    #[test]
    fn test_skips_blank_and_truncated_lines() {
        let body = format!("{HEADER}2025-03-01T09:15:00+09:00,TargetLot,20\n\r\n2025-03-01T09:5\n\n");
        let record = last(&body).unwrap();
        assert_eq!(record.available, 20);
    }

    #[test]
    fn test_record_spanning_chunks() {
        let mut body = String::from(HEADER);
        for i in 0..2000 {
            body.push_str(&format!("2025-03-01T09:15:00+09:00,TargetLot,{i}\n"));
        }
        assert!(body.len() as u64 > CHUNK_SIZE * 4);
        assert_eq!(last(&body).unwrap().available, 1999);
    }

    #[test]
    fn test_single_record_without_header() {
        let record = last("2025-03-01T09:15:00+09:00,TargetLot,7").unwrap();
        assert_eq!(record.facility_name, "TargetLot");
        assert_eq!(record.available, 7);
    }

    #[test]
    fn test_legacy_two_column_rows() {
        let body = "timestamp_kst,available_sum\n2025-03-01 09:15:00+0900,33\n";
        let record = last(body).unwrap();
        assert_eq!(record.available, 33);
        assert_eq!(record.facility_name, "");
    }
}
