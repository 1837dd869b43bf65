use chrono::NaiveTime;
use core_types::{Direction, Outcome, ParsedMessage};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Marker strings anchoring the live-entry shape. The defaults are the
/// upstream group's wire format; groups with a different template swap
/// these in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    pub asset_marker: String,
    pub time_marker: String,
    pub direction_marker: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            asset_marker: "Ativo:".to_string(),
            time_marker: "Horário:".to_string(),
            direction_marker: "Direção:".to_string(),
        }
    }
}

/// Recognizes two mutually exclusive message shapes:
///
/// 1. live entry: asset marker, time marker, direction marker, in that
///    order; outcome implicitly pending;
/// 2. final result: `ASSET - HH:MM:SS - M1 - DIRECTION - WIN|LOSS`.
///
/// Everything else is chat noise and returns `None`.
#[derive(Debug, Clone)]
pub struct SignalParser {
    cfg: ParserConfig,
}

impl SignalParser {
    pub fn new(cfg: ParserConfig) -> Self {
        Self { cfg }
    }

    pub fn parse(&self, text: &str) -> Option<ParsedMessage> {
        if text.trim().is_empty() {
            return None;
        }
        let gale = gale_level(text);
        self.parse_live_entry(text, gale)
            .or_else(|| parse_final_result(text, gale))
    }

    fn parse_live_entry(&self, text: &str, gale: u8) -> Option<ParsedMessage> {
        let at = text.find(&self.cfg.asset_marker)?;
        let after_asset = &text[at + self.cfg.asset_marker.len()..];
        let (asset, _) = take_symbol(after_asset)?;

        let tm = after_asset.find(&self.cfg.time_marker)?;
        let after_time = &after_asset[tm + self.cfg.time_marker.len()..];
        let (time, _) = take_time(after_time)?;

        let dm = after_time.find(&self.cfg.direction_marker)?;
        let after_direction = &after_time[dm + self.cfg.direction_marker.len()..];
        let (direction, _) = take_direction(after_direction)?;

        Some(ParsedMessage::LiveEntry {
            time,
            asset,
            direction,
            gale,
        })
    }
}

/// A superscript retry glyph anywhere in the message sets the gale level.
fn gale_level(text: &str) -> u8 {
    if text.contains('¹') {
        1
    } else if text.contains('²') {
        2
    } else {
        0
    }
}

fn parse_final_result(text: &str, gale: u8) -> Option<ParsedMessage> {
    let (time_at, time) = find_time(text)?;

    // Asset sits before the time, separated by a dash. It may itself
    // contain dashes (EURUSD-OTC), so walk back over the separator and
    // then take the trailing symbol run.
    let before = text[..time_at].trim_end();
    let before = before.strip_suffix('-')?.trim_end();
    let asset = take_symbol_back(before)?;

    // After the time: `- M1 - DIRECTION - WIN|LOSS`, case-insensitive.
    let rest = &text[time_at + 8..];
    let rest = expect_dash(rest)?;
    let rest = expect_keyword(rest, "M1")?;
    let rest = expect_dash(rest)?;
    let (direction, rest) = take_direction(rest)?;
    let rest = expect_dash(rest)?;
    let (word, _) = take_word(rest)?;
    let outcome = match word.to_ascii_uppercase().as_str() {
        "WIN" => Outcome::Win,
        "LOSS" => Outcome::Loss,
        _ => return None,
    };

    Some(ParsedMessage::FinalResult {
        time,
        asset,
        direction,
        outcome,
        gale,
    })
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// Skip leading non-symbol characters (emoji, whitespace, glyphs), then
/// take a run of `[A-Za-z0-9-]`, uppercased. Returns the remainder.
fn take_symbol(text: &str) -> Option<(SmolStr, &str)> {
    let start = text.find(|c: char| c.is_ascii_alphanumeric())?;
    let tail = &text[start..];
    let end = tail
        .find(|c: char| !is_symbol_char(c))
        .unwrap_or(tail.len());
    let raw = tail[..end].trim_matches('-');
    if raw.is_empty() {
        return None;
    }
    Some((SmolStr::new(raw.to_ascii_uppercase()), &tail[end..]))
}

/// Trailing symbol run of `text`, uppercased.
fn take_symbol_back(text: &str) -> Option<SmolStr> {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_symbol_char(*c))
        .last()
        .map(|(i, _)| i)?;
    let raw = text[start..].trim_matches('-');
    if raw.is_empty() {
        return None;
    }
    Some(SmolStr::new(raw.to_ascii_uppercase()))
}

/// First `HH:MM:SS` token at or after the start of `text`.
fn take_time(text: &str) -> Option<(NaiveTime, &str)> {
    let (at, time) = find_time(text)?;
    Some((time, &text[at + 8..]))
}

/// Scan for a standalone `HH:MM:SS` and parse it; byte offset returned.
fn find_time(text: &str) -> Option<(usize, NaiveTime)> {
    let bytes = text.as_bytes();
    for i in 0..bytes.len().saturating_sub(7) {
        if !text.is_char_boundary(i) {
            continue;
        }
        let w = &bytes[i..i + 8];
        let shaped = w[0].is_ascii_digit()
            && w[1].is_ascii_digit()
            && w[2] == b':'
            && w[3].is_ascii_digit()
            && w[4].is_ascii_digit()
            && w[5] == b':'
            && w[6].is_ascii_digit()
            && w[7].is_ascii_digit();
        if !shaped {
            continue;
        }
        // Not embedded in a longer digit/colon run.
        if i > 0 && (bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b':') {
            continue;
        }
        if let Some(&next) = bytes.get(i + 8) {
            if next.is_ascii_digit() || next == b':' {
                continue;
            }
        }
        if let Ok(time) = NaiveTime::parse_from_str(&text[i..i + 8], "%H:%M:%S") {
            return Some((i, time));
        }
    }
    None
}

/// Skip to the next alphabetic word and read it as CALL/PUT.
fn take_direction(text: &str) -> Option<(Direction, &str)> {
    let (word, rest) = take_word(text)?;
    Direction::parse(&word).map(|d| (d, rest))
}

/// Next ASCII-alphabetic word, skipping anything else before it.
fn take_word(text: &str) -> Option<(String, &str)> {
    let start = text.find(|c: char| c.is_ascii_alphabetic())?;
    let tail = &text[start..];
    let end = tail
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(tail.len());
    Some((tail[..end].to_string(), &tail[end..]))
}

/// Consume optional whitespace, a dash, optional whitespace.
fn expect_dash(text: &str) -> Option<&str> {
    let trimmed = text.trim_start();
    trimmed.strip_prefix('-').map(str::trim_start)
}

/// Consume `keyword` case-insensitively at the head of `text`.
fn expect_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let trimmed = text.trim_start();
    if trimmed.len() < keyword.len() || !trimmed.is_char_boundary(keyword.len()) {
        return None;
    }
    let (head, rest) = trimmed.split_at(keyword.len());
    head.eq_ignore_ascii_case(keyword).then_some(rest)
}
