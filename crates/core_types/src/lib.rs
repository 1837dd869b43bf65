use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Wire format of the canonical log: dates and times as the upstream
/// group posts them.
pub const DATE_FORMAT: &str = "%d/%m/%Y";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Rows preceding the first data row in the canonical log. Never pruned.
pub const HEADER_ROWS: usize = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CALL" => Some(Self::Call),
            "PUT" => Some(Self::Put),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pending,
    Win,
    Loss,
}

impl Outcome {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "PENDENTE" => Some(Self::Pending),
            "WIN" => Some(Self::Win),
            "LOSS" => Some(Self::Loss),
            _ => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Win | Self::Loss)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Pending => "PENDING",
            Self::Win => "WIN",
            Self::Loss => "LOSS",
        };
        f.write_str(value)
    }
}

/// Unique identity of a signal within the canonical log.
pub type SignalKey = (NaiveDate, NaiveTime);

/// One observed trade event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub asset: SmolStr,
    pub direction: Direction,
    pub outcome: Outcome,
    /// Retry level of a losing trade: 0 = first attempt, 1/2 = gale retries.
    pub gale: u8,
}

impl Signal {
    pub fn key(&self) -> SignalKey {
        (self.date, self.time)
    }

    /// Positional row as persisted: date, time, asset, direction, outcome, gale.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.date.format(DATE_FORMAT).to_string(),
            self.time.format(TIME_FORMAT).to_string(),
            self.asset.to_string(),
            self.direction.to_string(),
            self.outcome.to_string(),
            self.gale.to_string(),
        ]
    }

    /// Decode a persisted row. Tolerates a missing gale cell (defaults to 0);
    /// anything else malformed yields `None` so callers can skip the row.
    pub fn parse_row(row: &[String]) -> Option<Self> {
        if row.len() < 5 {
            return None;
        }
        let date = NaiveDate::parse_from_str(row[0].trim(), DATE_FORMAT).ok()?;
        let time = NaiveTime::parse_from_str(row[1].trim(), TIME_FORMAT).ok()?;
        let asset = row[2].trim();
        if asset.is_empty() {
            return None;
        }
        let direction = Direction::parse(&row[3])?;
        let outcome = Outcome::parse(&row[4])?;
        let gale = row
            .get(5)
            .and_then(|cell| cell.trim().parse::<u8>().ok())
            .unwrap_or(0);
        Some(Self {
            date,
            time,
            asset: SmolStr::new(asset.to_ascii_uppercase()),
            direction,
            outcome,
            gale,
        })
    }
}

/// Parse an `HH:MM:SS` or `HH:MM` cell into a time-of-day.
pub fn parse_time_of_day(cell: &str) -> Option<NaiveTime> {
    let cell = cell.trim();
    NaiveTime::parse_from_str(cell, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(cell, "%H:%M"))
        .ok()
}

/// Parse a log-row key without decoding the full signal. Used by the
/// reconciler to match rows whose outcome cell may be unreadable.
pub fn parse_row_key(row: &[String]) -> Option<SignalKey> {
    if row.len() < 2 {
        return None;
    }
    let date = NaiveDate::parse_from_str(row[0].trim(), DATE_FORMAT).ok()?;
    let time = NaiveTime::parse_from_str(row[1].trim(), TIME_FORMAT).ok()?;
    Some((date, time))
}

/// What the parser recognized in one chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ParsedMessage {
    /// A live entry announcement; the outcome is not known yet.
    LiveEntry {
        time: NaiveTime,
        asset: SmolStr,
        direction: Direction,
        gale: u8,
    },
    /// A final result announcement carrying WIN or LOSS.
    FinalResult {
        time: NaiveTime,
        asset: SmolStr,
        direction: Direction,
        outcome: Outcome,
        gale: u8,
    },
}

impl ParsedMessage {
    pub fn time(&self) -> NaiveTime {
        match self {
            Self::LiveEntry { time, .. } | Self::FinalResult { time, .. } => *time,
        }
    }

    pub fn asset(&self) -> &SmolStr {
        match self {
            Self::LiveEntry { asset, .. } | Self::FinalResult { asset, .. } => asset,
        }
    }

    pub fn is_live_entry(&self) -> bool {
        matches!(self, Self::LiveEntry { .. })
    }

    /// Bind the message to the trading date it belongs to.
    pub fn into_signal(self, date: NaiveDate) -> Signal {
        match self {
            Self::LiveEntry {
                time,
                asset,
                direction,
                gale,
            } => Signal {
                date,
                time,
                asset,
                direction,
                outcome: Outcome::Pending,
                gale,
            },
            Self::FinalResult {
                time,
                asset,
                direction,
                outcome,
                gale,
            } => Signal {
                date,
                time,
                asset,
                direction,
                outcome,
                gale,
            },
        }
    }
}

/// One scheduled economic event, as scraped: raw cells, unparsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawNewsRow {
    pub time: String,
    pub currency: String,
    pub impact: String,
    pub text: String,
}

/// A calendar event with its time and impact tier decoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsEvent {
    pub time: NaiveTime,
    pub currency: SmolStr,
    /// Severity tier 0-3.
    pub impact: u8,
    pub text: String,
}

impl fmt::Display for NewsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (impact {}) {}",
            self.time.format("%H:%M"),
            self.currency,
            self.impact,
            self.text
        )
    }
}

/// One raw winrate row from the stats collaborator: label + unparsed cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawStatRow {
    pub label: String,
    pub winrate: String,
}

/// Everything the stats collaborator returns in one fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawStatsSnapshot {
    pub asset_rows: Vec<RawStatRow>,
    pub slot_rows: Vec<RawStatRow>,
    pub news_rows: Vec<RawNewsRow>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationTier {
    StronglyRecommended,
    Recommended,
    Moderate,
    NotRecommended,
}

impl fmt::Display for RecommendationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::StronglyRecommended => "STRONGLY_RECOMMENDED",
            Self::Recommended => "RECOMMENDED",
            Self::Moderate => "MODERATE",
            Self::NotRecommended => "NOT_RECOMMENDED",
        };
        f.write_str(value)
    }
}

/// Outcome of scoring one (asset, time) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreResult {
    pub score: i32,
    /// Applied-rule labels, append order = evaluation order.
    pub applied_criteria: Vec<String>,
    pub tier: RecommendationTier,
    pub nearest_past: Option<NewsEvent>,
    pub nearest_future: Option<NewsEvent>,
    pub qualifying_impact_event: Option<NewsEvent>,
}

/// Payload handed to the notification sink. Fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreNotification {
    pub asset: SmolStr,
    pub time: NaiveTime,
    pub result: ScoreResult,
}

/// One message from the chat collaborator. Arrival order is not
/// chronological and ranges may be re-delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub text: String,
}

/// Counters for one completed reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PassReport {
    pub candidates: usize,
    pub deduped: usize,
    pub updates_applied: usize,
    pub appended: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PruneReport {
    pub kept: usize,
    pub dropped: usize,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot parse time-of-day from {0:?}")]
    InvalidTime(String),
    #[error("stats snapshot unavailable: {0}")]
    SnapshotUnavailable(String),
    #[error(
        "pass aborted after {updates_applied} updates, {appends_applied} appends \
         ({appends_pending} rows pending): {cause}"
    )]
    WriteAborted {
        updates_applied: usize,
        appends_applied: usize,
        appends_pending: usize,
        cause: anyhow::Error,
    },
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type DynStream<T> = BoxStream<'static, Result<T>>;

/// Chat transport. Replayable: overlapping ranges must be tolerated by
/// the consumer (the reconciler's dedup key handles re-delivery).
#[async_trait]
pub trait ChatFeed: Send + Sync {
    /// Most recent messages first.
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>>;
    async fn stream_messages(&self) -> Result<DynStream<ChatMessage>>;
}

/// Canonical log storage. Rows are positional cells; the first
/// `HEADER_ROWS` rows are headers. `row_index` is 0-based and absolute
/// (headers included).
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn read_all(&self) -> Result<Vec<Vec<String>>>;
    async fn update_row(&self, row_index: usize, row: Vec<String>) -> Result<()>;
    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<()>;
    /// Atomic bulk rewrite: the log is replaced by exactly `rows`.
    async fn replace_all(&self, rows: Vec<Vec<String>>) -> Result<()>;
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self) -> Result<RawStatsSnapshot>;
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch_news_rows(&self) -> Result<Vec<RawNewsRow>>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, note: &ScoreNotification) -> Result<()>;
}

/// Persisted marker gating the at-most-daily calendar refresh.
#[async_trait]
pub trait RefreshStateStore: Send + Sync {
    async fn last_refresh_date(&self) -> Result<Option<NaiveDate>>;
    async fn set_last_refresh_date(&self, date: NaiveDate) -> Result<()>;
}
