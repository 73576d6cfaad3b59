// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Regex and DOM helpers for free-text extraction.
//!
//! These work on rendered documents where no record structure exists. All
//! entry points are synchronous: `scraper`'s types are `!Send`, so a parsed
//! document never lives across an await point.

use super::normalize::{name_key, normalize_ws};
use super::MatchKind;
use regex::Regex;
use scraper::{Html, Node, Selector};

/// Elements that usually hold one facility's row or card.
const BLOCK_SELECTOR: &str = "tr, li, dl, p, div, section, article";

/// Visible text of an HTML document, scripts and styles excluded,
/// whitespace collapsed.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .map(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
            .unwrap_or(false);
        if !hidden && !text.trim().is_empty() {
            parts.push(text.trim());
        }
    }

    normalize_ws(&parts.join(" "))
}

/// A value read from rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Number(i64),
    /// A "no data" token where a figure was expected.
    Placeholder,
}

/// The element that holds one facility's row or card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityBlock {
    pub text: String,
    pub match_kind: MatchKind,
    /// Numbers and placeholder cells outside the facility name, in
    /// document order.
    pub readings: Vec<Reading>,
}

/// Whether `value` is one of the "no data" tokens.
pub fn is_placeholder(value: &str, tokens: &[String]) -> bool {
    let value = value.trim();
    tokens.iter().any(|t| t.trim().eq_ignore_ascii_case(value))
}

/// Smallest block whose text mentions the facility.
///
/// Blocks that also hold a figure or a placeholder cell are preferred so
/// that a bare name cell does not shadow the row holding the figures.
pub fn facility_block(
    html: &str,
    facility: &str,
    placeholders: &[String],
) -> Option<FacilityBlock> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(BLOCK_SELECTOR).expect("block selector is valid");
    let key = name_key(facility);
    if key.is_empty() {
        return None;
    }

    let mut with_figures: Option<FacilityBlock> = None;
    let mut without_figures: Option<FacilityBlock> = None;

    for el in document.select(&selector) {
        let text = normalize_ws(&el.text().collect::<Vec<_>>().join(" "));
        let match_kind = if text.contains(facility.trim()) {
            MatchKind::Exact
        } else if name_key(&text).contains(&key) {
            MatchKind::Normalized
        } else {
            continue;
        };

        let mut readings = Vec::new();
        for cell in el.text().map(str::trim).filter(|t| !t.is_empty()) {
            if is_placeholder(cell, placeholders) {
                readings.push(Reading::Placeholder);
            } else {
                readings.extend(
                    numeric_tokens(&strip_name(cell, facility))
                        .into_iter()
                        .map(Reading::Number),
                );
            }
        }

        let slot = if readings.is_empty() {
            &mut without_figures
        } else {
            &mut with_figures
        };
        let shorter = slot
            .as_ref()
            .map(|b| text.chars().count() < b.text.chars().count())
            .unwrap_or(true);
        if shorter {
            *slot = Some(FacilityBlock {
                text,
                match_kind,
                readings,
            });
        }
    }

    with_figures.or(without_figures)
}

/// Remove literal occurrences of the facility name, so digits inside the
/// name ("Lot 3") are not read as figures.
pub fn strip_name(text: &str, facility: &str) -> String {
    let name = facility.trim();
    if name.is_empty() {
        text.to_string()
    } else {
        text.replace(name, " ")
    }
}

/// Value that follows one of `keywords`.
///
/// A placeholder token right after the keyword ("잔여 -") is reported as
/// such. Otherwise the first number within `window` characters is returned;
/// only non-digit characters may sit between keyword and number.
pub fn proximity_value(
    text: &str,
    keywords: &[String],
    window: usize,
    placeholders: &[String],
) -> Option<Reading> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return None;
    }

    let keyword_re = Regex::new(&format!(r"(?i)(?:{})", alternatives.join("|")))
        .expect("escaped keyword pattern is valid");
    let number_re = Regex::new(&format!(r"^[^0-9]{{0,{window}}}?(-?[0-9][0-9,]*)"))
        .expect("proximity number pattern is valid");

    for keyword in keyword_re.find_iter(text) {
        let rest = &text[keyword.end()..];

        let token = rest
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '：'))
            .split_whitespace()
            .next()
            .map(|t| t.trim_end_matches([',', ';', '|']))
            .unwrap_or_default();
        if !token.is_empty() && is_placeholder(token, placeholders) {
            return Some(Reading::Placeholder);
        }

        if let Some(n) = number_re
            .captures(rest)
            .and_then(|caps| caps.get(1))
            .and_then(|m| parse_number(m.as_str()))
        {
            return Some(Reading::Number(n));
        }
    }
    None
}

/// Signed numeric tokens in document order.
pub fn numeric_tokens(text: &str) -> Vec<i64> {
    let re = Regex::new(r"-?[0-9][0-9,]*").expect("numeric token regex is valid");
    re.find_iter(text)
        .filter_map(|m| parse_number(m.as_str()))
        .collect()
}

/// Unsigned digit runs in document order.
pub fn digit_runs(text: &str) -> Vec<i64> {
    let re = Regex::new(r"[0-9][0-9,]*").expect("digit run regex is valid");
    re.find_iter(text)
        .filter_map(|m| parse_number(m.as_str()))
        .collect()
}

/// Parse an integer with optional sign and thousands separators.
pub fn parse_number(token: &str) -> Option<i64> {
    let t = token.trim().trim_end_matches(',');
    let (neg, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    if digits.is_empty() || digits.starts_with(',') {
        return None;
    }
    let cleaned: String = digits.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let value: i64 = cleaned.parse().ok()?;
    Some(if neg { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn placeholders() -> Vec<String> {
        kw(&["-", "–", "—", "N/A", "null", ""])
    }

    fn near(text: &str, keywords: &[&str]) -> Option<Reading> {
        proximity_value(text, &kw(keywords), 12, &placeholders())
    }

    #[test]
    fn test_proximity_korean() {
        let keywords = ["잔여", "available"];
        assert_eq!(near("잔여 12대", &keywords), Some(Reading::Number(12)));
        assert_eq!(near("현재 잔여석: 7 면", &keywords), Some(Reading::Number(7)));
    }

    #[test]
    fn test_proximity_english_case_insensitive() {
        assert_eq!(
            near("Total 120 - Remaining 12 spaces", &["remaining"]),
            Some(Reading::Number(12))
        );
    }

    #[test]
    fn test_proximity_respects_window() {
        let far = format!("remaining{}42", " ".repeat(30));
        assert_eq!(near(&far, &["remaining"]), None);
    }

    #[test]
    fn test_proximity_keeps_sign() {
        assert_eq!(near("available: -3", &["available"]), Some(Reading::Number(-3)));
    }

    #[test]
    fn test_proximity_placeholder_after_keyword() {
        assert_eq!(near("TargetLot 잔여 - 총 120면", &["잔여"]), Some(Reading::Placeholder));
        assert_eq!(near("available: N/A (total 80)", &["available"]), Some(Reading::Placeholder));
        assert_eq!(near("잔여 —, 총 120", &["잔여"]), Some(Reading::Placeholder));
    }

    #[test]
    fn test_parse_number_variants() {
        assert_eq!(parse_number("1,234"), Some(1234));
        assert_eq!(parse_number("-5"), Some(-5));
        assert_eq!(parse_number("+7"), Some(7));
        assert_eq!(parse_number("12,"), Some(12));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(" 37 "), Some(37));
    }

    #[test]
    fn test_digit_runs_and_tokens() {
        assert_eq!(digit_runs("a 120 b 37, c 1,500"), vec![120, 37, 1500]);
        assert_eq!(numeric_tokens("x -4 y 9"), vec![-4, 9]);
    }

    #[test]
    fn test_visible_text_skips_scripts() {
        let html = "<html><head><script>var n = 1;</script><style>p{}</style></head>\
                    <body><p>잔여  12대</p></body></html>";
        assert_eq!(visible_text(html), "잔여 12대");
    }

    #[test]
    fn test_facility_block_prefers_row_with_figures() {
        let html = "<table>\
            <tr><td>Other Lot</td><td>50</td><td>3</td></tr>\
            <tr><td>TargetLot</td><td>120</td><td>37</td></tr>\
            </table><div><span>TargetLot</span></div>";
        let block = facility_block(html, "TargetLot", &placeholders()).unwrap();
        assert_eq!(block.match_kind, MatchKind::Exact);
        assert_eq!(block.readings, vec![Reading::Number(120), Reading::Number(37)]);
        assert!(!block.text.contains("Other"));
    }

    #[test]
    fn test_facility_block_normalized_match() {
        let html = "<ul><li>Target  Lot · 잔여 9</li><li>Else · 잔여 1</li></ul>";
        let block = facility_block(html, "TargetLot", &placeholders()).unwrap();
        assert_eq!(block.match_kind, MatchKind::Normalized);
        assert!(block.text.contains("잔여 9"));
    }

    #[test]
    fn test_facility_block_keeps_placeholder_cells() {
        let html = "<div><table>\
            <tr><td>Other Lot</td><td>50</td><td>3</td></tr>\
            <tr><td>TargetLot</td><td>120</td><td>-</td></tr>\
            </table></div>";
        let block = facility_block(html, "TargetLot", &placeholders()).unwrap();
        assert!(!block.text.contains("Other"));
        assert_eq!(block.readings, vec![Reading::Number(120), Reading::Placeholder]);
    }

    #[test]
    fn test_dash_inside_text_is_not_a_placeholder_cell() {
        let html = "<p>TargetLot - 120 - 37</p>";
        let block = facility_block(html, "TargetLot", &placeholders()).unwrap();
        assert_eq!(block.readings, vec![Reading::Number(120), Reading::Number(37)]);
    }

    #[test]
    fn test_strip_name_removes_digits_in_name() {
        assert_eq!(
            numeric_tokens(&strip_name("Lot 3 120 45", "Lot 3")),
            vec![120, 45]
        );
    }
}
