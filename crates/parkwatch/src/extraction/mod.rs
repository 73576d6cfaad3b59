// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reduce raw content to the facility's available count.
//!
//! Strategies run in the configured order and the first one that yields a
//! number wins:
//!
//! 1. **Structured lookup**: the feed record named after the facility
//!    (exact, then normalized, then substring match) and its count field.
//! 2. **Proximity regex**: a vocabulary keyword followed closely by a
//!    number, in rendered text.
//! 3. **Positional**: a fixed position among the values of the matched
//!    record or block.
//! 4. **Global minimum**: when nothing matched the facility at all, the
//!    smallest number in the document.
//!
//! A "no data" token where a strategy expected the facility's figure (the
//! count field, the token after a keyword, or the picked cell) ends the
//! chain: the placeholder policy decides between 0 and failure.
//!
//! The result is then validated: negatives clamp to zero, values above a
//! known capacity clamp to it, and implausibly large values are flagged.

pub mod normalize;
pub mod patterns;

use crate::acquisition::feed::{self, FeedRecord};
use crate::acquisition::{ContentKind, RawContent};
use crate::config::{Config, ExtractionConfig, PlaceholderPolicy};
use crate::error::{ScrapeError, ScrapeResult};
use normalize::name_key;
use patterns::Reading;
use std::str::FromStr;

/// One extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    StructuredLookup,
    ProximityRegex,
    Positional,
    GlobalMinimum,
}

impl Strategy {
    /// Default chain order.
    pub const ALL: [Strategy; 4] = [
        Strategy::StructuredLookup,
        Strategy::ProximityRegex,
        Strategy::Positional,
        Strategy::GlobalMinimum,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::StructuredLookup => "structured",
            Strategy::ProximityRegex => "proximity",
            Strategy::Positional => "positional",
            Strategy::GlobalMinimum => "global-min",
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" => Ok(Strategy::StructuredLookup),
            "proximity" => Ok(Strategy::ProximityRegex),
            "positional" => Ok(Strategy::Positional),
            "global-min" | "global" => Ok(Strategy::GlobalMinimum),
            other => Err(format!(
                "unknown strategy '{other}' (expected structured|proximity|positional|global-min)"
            )),
        }
    }
}

/// Which number of a matched row the positional strategy returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    First,
    Last,
    /// Zero-based index.
    Index(usize),
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Position::First),
            "last" => Ok(Position::Last),
            n => n
                .parse()
                .map(Position::Index)
                .map_err(|_| format!("invalid position '{n}' (expected first|last|<index>)")),
        }
    }
}

impl Position {
    fn pick<T: Copy>(&self, values: &[T]) -> Option<T> {
        match self {
            Position::First => values.first().copied(),
            Position::Last => values.last().copied(),
            Position::Index(i) => values.get(*i).copied(),
        }
    }
}

/// How the facility's record or block was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Normalized,
    Contains,
}

/// Adjustments and warnings attached to an extracted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueFlag {
    ClampedNegative { raw: i64 },
    ClampedToCapacity { raw: i64, capacity: u32 },
    /// Above the plausibility ceiling; kept as read.
    Outlier { ceiling: u32 },
    /// The facility's value was a "no data" token and was recorded as zero.
    PlaceholderAsZero,
}

/// A validated value and how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub available: u32,
    pub strategy: Strategy,
    pub match_kind: Option<MatchKind>,
    pub flags: Vec<ValueFlag>,
}

/// The facility's record (feed) or block (rendered text).
struct Target {
    match_kind: MatchKind,
    /// Designated count field; structured content only.
    count: Option<String>,
    /// Text searched by the proximity strategy.
    block_text: String,
    /// Values the positional strategy chooses from.
    readings: Vec<Reading>,
    capacity: Option<u32>,
}

/// Content prepared once for all strategies.
struct Prepared {
    structured: bool,
    target: Option<Target>,
    /// Whole-document text.
    text: String,
}

enum Step {
    Found(i64),
    Placeholder,
    Skip,
    /// The facility's value exists but could not be read.
    Unparseable(String),
}

enum FieldValue {
    Number(i64),
    Placeholder,
    Invalid,
}

/// Extractor for one facility.
#[derive(Debug, Clone)]
pub struct ValueExtractor {
    facility: String,
    config: ExtractionConfig,
}

impl ValueExtractor {
    pub fn new(facility: &str, config: &ExtractionConfig) -> Self {
        Self {
            facility: facility.trim().to_string(),
            config: config.clone(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.facility_name, &config.extraction)
    }

    /// Run the strategy chain over `content`.
    pub fn extract(&self, content: &RawContent) -> ScrapeResult<Extraction> {
        let prepared = self.prepare(content)?;
        let mut unparseable: Option<String> = None;

        for strategy in &self.config.strategies {
            let step = match strategy {
                Strategy::StructuredLookup => self.structured_lookup(&prepared),
                Strategy::ProximityRegex => self.proximity(&prepared),
                Strategy::Positional => self.positional(&prepared),
                Strategy::GlobalMinimum => self.global_minimum(&prepared),
            };

            match step {
                Step::Found(raw) => {
                    tracing::debug!("{} strategy yielded {raw}", strategy.name());
                    return Ok(self.validate(raw, *strategy, &prepared, Vec::new()));
                }
                Step::Placeholder => {
                    return match self.config.placeholder_policy {
                        PlaceholderPolicy::Zero => {
                            tracing::info!(
                                "'{}' reports no data; recording 0 per placeholder policy",
                                self.facility
                            );
                            Ok(self.validate(
                                0,
                                *strategy,
                                &prepared,
                                vec![ValueFlag::PlaceholderAsZero],
                            ))
                        }
                        PlaceholderPolicy::Fail => Err(ScrapeError::ExtractionFailed(format!(
                            "'{}' reports no data (placeholder value)",
                            self.facility
                        ))),
                    };
                }
                Step::Unparseable(detail) => {
                    tracing::warn!("{} strategy: {detail}", strategy.name());
                    unparseable.get_or_insert(detail);
                }
                Step::Skip => {}
            }
        }

        Err(match unparseable {
            Some(detail) => ScrapeError::ExtractionFailed(detail),
            None => ScrapeError::TargetNotFound(format!(
                "no value for '{}' in {} content",
                self.facility,
                if prepared.structured { "structured" } else { "unstructured" }
            )),
        })
    }

    fn prepare(&self, content: &RawContent) -> ScrapeResult<Prepared> {
        match content.kind {
            ContentKind::Structured(_) => {
                let records = feed::parse_records(content, &self.config.record_element)?;
                let text = records
                    .iter()
                    .flat_map(|r| r.fields.iter())
                    .filter(|(k, _)| *k != self.config.name_field)
                    .map(|(_, v)| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let target = self
                    .find_record(&records)
                    .map(|(record, kind)| self.record_target(record, kind));
                Ok(Prepared {
                    structured: true,
                    target,
                    text,
                })
            }
            ContentKind::Unstructured => {
                let text = patterns::visible_text(&content.body);
                let target = patterns::facility_block(
                    &content.body,
                    &self.facility,
                    &self.config.placeholder_tokens,
                )
                .map(|block| Target {
                    match_kind: block.match_kind,
                    count: None,
                    block_text: block.text,
                    readings: block.readings,
                    capacity: None,
                });
                Ok(Prepared {
                    structured: false,
                    target,
                    text,
                })
            }
            ContentKind::Error(_) => {
                content.ensure_data()?;
                Err(ScrapeError::ExtractionFailed(
                    "content classified as an error".into(),
                ))
            }
        }
    }

    /// Locate the facility's record: exact, normalized, then substring.
    fn find_record<'r>(&self, records: &'r [FeedRecord]) -> Option<(&'r FeedRecord, MatchKind)> {
        let name_of = |r: &'r FeedRecord| r.get(&self.config.name_field).map(str::trim);

        if let Some(r) = records.iter().find(|r| name_of(*r) == Some(self.facility.as_str())) {
            return Some((r, MatchKind::Exact));
        }

        let key = name_key(&self.facility);
        if key.is_empty() {
            return None;
        }

        if let Some(r) = records
            .iter()
            .find(|r| name_of(*r).map(name_key).as_deref() == Some(key.as_str()))
        {
            tracing::warn!(
                "exact match for '{}' failed; matched '{}' after normalization",
                self.facility,
                name_of(r).unwrap_or_default()
            );
            return Some((r, MatchKind::Normalized));
        }

        let mut contains = records
            .iter()
            .filter(|r| name_of(*r).map(|n| name_key(n).contains(&key)).unwrap_or(false));
        let first = contains.next()?;
        let others = contains.count();
        tracing::warn!(
            "exact match for '{}' failed; using '{}' which contains it{}",
            self.facility,
            name_of(first).unwrap_or_default(),
            if others > 0 {
                format!(" ({others} other candidates ignored)")
            } else {
                String::new()
            }
        );
        Some((first, MatchKind::Contains))
    }

    fn record_target(&self, record: &FeedRecord, kind: MatchKind) -> Target {
        let capacity_field = self.config.capacity_field.as_deref();
        let readings = record
            .fields
            .iter()
            .filter(|(k, v)| {
                *k != self.config.name_field
                    && Some(k.as_str()) != capacity_field
                    && !v.trim().is_empty()
            })
            .filter_map(|(_, v)| match self.field_value(v) {
                FieldValue::Number(n) => Some(Reading::Number(n)),
                FieldValue::Placeholder => Some(Reading::Placeholder),
                FieldValue::Invalid => None,
            })
            .collect();
        let capacity = capacity_field
            .and_then(|f| record.get(f))
            .and_then(patterns::parse_number)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0);

        Target {
            match_kind: kind,
            count: record.get(&self.config.count_field).map(String::from),
            block_text: record
                .fields
                .iter()
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            readings,
            capacity,
        }
    }

    fn field_value(&self, raw: &str) -> FieldValue {
        let trimmed = raw.trim();
        if patterns::is_placeholder(trimmed, &self.config.placeholder_tokens) {
            return FieldValue::Placeholder;
        }
        match patterns::parse_number(trimmed) {
            Some(n) => FieldValue::Number(n),
            None => FieldValue::Invalid,
        }
    }

    fn structured_lookup(&self, prepared: &Prepared) -> Step {
        if !prepared.structured {
            return Step::Skip;
        }
        let Some(target) = &prepared.target else {
            return Step::Skip;
        };
        let Some(raw) = &target.count else {
            return Step::Unparseable(format!(
                "record for '{}' has no '{}' field",
                self.facility, self.config.count_field
            ));
        };
        match self.field_value(raw) {
            FieldValue::Number(n) => Step::Found(n),
            FieldValue::Placeholder => Step::Placeholder,
            FieldValue::Invalid => Step::Unparseable(format!(
                "'{}' field of '{}' is not a number: {raw:?}",
                self.config.count_field, self.facility
            )),
        }
    }

    fn proximity(&self, prepared: &Prepared) -> Step {
        if prepared.structured {
            return Step::Skip;
        }
        let text = prepared
            .target
            .as_ref()
            .map(|t| t.block_text.as_str())
            .unwrap_or(&prepared.text);
        match patterns::proximity_value(
            text,
            &self.config.keywords,
            self.config.proximity_window,
            &self.config.placeholder_tokens,
        ) {
            Some(Reading::Number(n)) => Step::Found(n),
            Some(Reading::Placeholder) => Step::Placeholder,
            None => Step::Skip,
        }
    }

    fn positional(&self, prepared: &Prepared) -> Step {
        let Some(target) = &prepared.target else {
            return Step::Skip;
        };
        match self.config.position.pick(&target.readings) {
            Some(Reading::Number(n)) => {
                tracing::warn!(
                    "using positional fallback ({:?}) for '{}'",
                    self.config.position,
                    self.facility
                );
                Step::Found(n)
            }
            Some(Reading::Placeholder) => Step::Placeholder,
            None => Step::Skip,
        }
    }

    fn global_minimum(&self, prepared: &Prepared) -> Step {
        if prepared.target.is_some() {
            return Step::Skip;
        }
        match patterns::digit_runs(&prepared.text).into_iter().min() {
            Some(n) => {
                tracing::warn!(
                    "'{}' not found in document; using smallest number as a last resort",
                    self.facility
                );
                Step::Found(n)
            }
            None => Step::Skip,
        }
    }

    fn validate(
        &self,
        raw: i64,
        strategy: Strategy,
        prepared: &Prepared,
        mut flags: Vec<ValueFlag>,
    ) -> Extraction {
        let mut value = raw;

        if value < 0 {
            tracing::warn!("negative reading {raw} for '{}' clamped to 0", self.facility);
            flags.push(ValueFlag::ClampedNegative { raw });
            value = 0;
        }

        let capacity = self
            .config
            .capacity
            .or_else(|| prepared.target.as_ref().and_then(|t| t.capacity));
        if let Some(cap) = capacity {
            if value > i64::from(cap) {
                tracing::warn!(
                    "reading {raw} for '{}' exceeds capacity {cap}; clamped",
                    self.facility
                );
                flags.push(ValueFlag::ClampedToCapacity { raw, capacity: cap });
                value = i64::from(cap);
            }
        }

        let available = u32::try_from(value).unwrap_or(u32::MAX);
        if available > self.config.plausibility_ceiling {
            tracing::warn!(
                "reading {available} for '{}' is above the plausibility ceiling {}; kept",
                self.facility,
                self.config.plausibility_ceiling
            );
            flags.push(ValueFlag::Outlier {
                ceiling: self.config.plausibility_ceiling,
            });
        }

        Extraction {
            available,
            strategy,
            match_kind: prepared.target.as_ref().map(|t| t.match_kind),
            flags,
        }
    }
}
