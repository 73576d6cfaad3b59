// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parse feed bodies (XML or JSON) into flat name/value records.

use super::{ContentKind, RawContent, StructuredFormat};
use crate::error::{ScrapeError, ScrapeResult};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

/// One record of the feed, fields in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedRecord {
    pub fields: Vec<(String, String)>,
}

impl FeedRecord {
    /// First value of the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse structured content into records.
pub fn parse_records(content: &RawContent, record_element: &str) -> ScrapeResult<Vec<FeedRecord>> {
    match content.kind {
        ContentKind::Structured(StructuredFormat::Xml) => parse_xml(&content.body, record_element),
        ContentKind::Structured(StructuredFormat::Json) => parse_json(&content.body),
        _ => Ok(Vec::new()),
    }
}

/// Parse an XML feed; every `record_element` becomes one record whose child
/// elements are its fields.
pub fn parse_xml(xml: &str, record_element: &str) -> ScrapeResult<Vec<FeedRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut records = Vec::new();
    let mut buf = Vec::new();

    let mut current: Option<FeedRecord> = None;
    // Depth relative to the open record element.
    let mut depth = 0usize;
    let mut field_name = String::new();
    let mut field_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if current.is_some() {
                    depth += 1;
                    if depth == 1 {
                        field_name = name;
                        field_text.clear();
                    }
                } else if name == record_element {
                    current = Some(FeedRecord::default());
                    depth = 0;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(rec) = current.as_mut() {
                    if depth == 0 {
                        let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                        rec.fields.push((name, String::new()));
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if current.is_some() && depth >= 1 {
                    let text = e.unescape().unwrap_or_default();
                    field_text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if current.is_some() && depth >= 1 {
                    field_text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) if current.is_some() => {
                if depth == 0 {
                    records.extend(current.take());
                } else {
                    if depth == 1 {
                        if let Some(rec) = current.as_mut() {
                            rec.fields
                                .push((std::mem::take(&mut field_name), field_text.trim().to_string()));
                        }
                        field_text.clear();
                    }
                    depth -= 1;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ScrapeError::ExtractionFailed(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

/// Parse a JSON feed: either an array of objects, or an object holding such
/// an array somewhere below it (first one found, depth-first).
pub fn parse_json(json: &str) -> ScrapeResult<Vec<FeedRecord>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ScrapeError::ExtractionFailed(format!("malformed JSON: {e}")))?;

    let Some(items) = find_record_array(&value) else {
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|obj| FeedRecord {
            fields: obj
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|s| (k.clone(), s)))
                .collect(),
        })
        .collect())
}

fn find_record_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) if items.iter().any(Value::is_object) => Some(items),
        Value::Array(items) => items.iter().find_map(find_record_array),
        Value::Object(map) => map.values().find_map(find_record_array),
        _ => None,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<list>
  <resultData>
    <parkinglot_nm>TargetLot</parkinglot_nm>
    <parkd_current_num>37</parkd_current_num>
    <parkd_total_num>120</parkd_total_num>
  </resultData>
  <resultData>
    <parkinglot_nm><![CDATA[Other & Lot]]></parkinglot_nm>
    <parkd_current_num>-</parkd_current_num>
    <memo/>
  </resultData>
</list>"#;

    #[test]
    fn test_parse_xml_records() {
        let records = parse_xml(SAMPLE_XML, "resultData").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("parkinglot_nm"), Some("TargetLot"));
        assert_eq!(records[0].get("parkd_current_num"), Some("37"));
        assert_eq!(records[0].get("parkd_total_num"), Some("120"));
        assert_eq!(records[1].get("parkinglot_nm"), Some("Other & Lot"));
        assert_eq!(records[1].get("memo"), Some(""));
    }

    #[test]
    fn test_parse_xml_unescapes_entities() {
        let xml = "<r><resultData><name>A &amp; B</name></resultData></r>";
        let records = parse_xml(xml, "resultData").unwrap();
        assert_eq!(records[0].get("name"), Some("A & B"));
    }

    #[test]
    fn test_parse_xml_without_records() {
        let records = parse_xml("<list><other/></list>", "resultData").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_malformed_xml() {
        let err = parse_xml("<list><resultData><a>1</b></resultData>", "resultData").unwrap_err();
        assert!(matches!(err, ScrapeError::ExtractionFailed(_)));
    }

    #[test]
    fn test_parse_json_nested_array() {
        let json = r#"{"status":"ok","data":{"resultData":[
            {"parkinglot_nm":"TargetLot","parkd_current_num":37,"extra":{"x":1}},
            {"parkinglot_nm":"Other","parkd_current_num":"5"}
        ]}}"#;
        let records = parse_json(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("parkd_current_num"), Some("37"));
        assert_eq!(records[0].get("extra"), None);
        assert_eq!(records[1].get("parkd_current_num"), Some("5"));
    }

    #[test]
    fn test_parse_json_top_level_array() {
        let records = parse_json(r#"[{"name":"A","count":null}]"#).unwrap();
        assert_eq!(records[0].get("count"), Some(""));
    }
}
