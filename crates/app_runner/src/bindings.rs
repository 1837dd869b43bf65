use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{
    CalendarSource, ChatFeed, ChatMessage, DynStream, NotificationSink, RawNewsRow, RawStatRow,
    RawStatsSnapshot, RefreshStateStore, ScoreNotification, StatsSource, DATE_FORMAT,
};
use csv::ReaderBuilder;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Replay chat transport: one JSON-encoded `ChatMessage` per line, file
/// order chronological. Unreadable lines are skipped, not fatal.
#[derive(Debug, Clone)]
pub struct JsonlChatFeed {
    path: PathBuf,
}

impl JsonlChatFeed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_messages(&self) -> Result<Vec<ChatMessage>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("open chat replay file: {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let mut messages = Vec::new();
        while let Some(line) = lines.next_line().await.context("read chat replay line")? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(&line) {
                Ok(msg) => messages.push(msg),
                Err(err) => tracing::warn!(%err, "skipping unreadable chat replay line"),
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl ChatFeed for JsonlChatFeed {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut messages = self.read_messages().await?;
        let skip = messages.len().saturating_sub(limit);
        let mut recent: Vec<ChatMessage> = messages.drain(skip..).collect();
        recent.reverse();
        Ok(recent)
    }

    async fn stream_messages(&self) -> Result<DynStream<ChatMessage>> {
        let messages = self.read_messages().await?;
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            for msg in messages {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx).map(Ok)))
    }
}

/// Stats collaborator reading three CSV files: asset winrates, time-slot
/// winrates, and the news calendar. Cells stay raw; parsing and row
/// dropping happen downstream where the warnings belong.
#[derive(Debug, Clone)]
pub struct CsvStatsSource {
    asset_path: PathBuf,
    slot_path: PathBuf,
    news_path: PathBuf,
}

impl CsvStatsSource {
    pub fn new(asset_path: PathBuf, slot_path: PathBuf, news_path: PathBuf) -> Self {
        Self {
            asset_path,
            slot_path,
            news_path,
        }
    }
}

#[async_trait]
impl StatsSource for CsvStatsSource {
    async fn fetch(&self) -> Result<RawStatsSnapshot> {
        let asset_path = self.asset_path.clone();
        let slot_path = self.slot_path.clone();
        let news_path = self.news_path.clone();
        tokio::task::spawn_blocking(move || {
            Ok(RawStatsSnapshot {
                asset_rows: read_stat_rows(&asset_path)?,
                slot_rows: read_stat_rows(&slot_path)?,
                news_rows: read_news_rows_or_empty(&news_path),
            })
        })
        .await
        .context("join stats fetch")?
    }
}

/// Calendar collaborator over the same news CSV: a drop-in replacement
/// for the news half of the stats source.
#[derive(Debug, Clone)]
pub struct CsvCalendarSource {
    news_path: PathBuf,
}

impl CsvCalendarSource {
    pub fn new(news_path: PathBuf) -> Self {
        Self { news_path }
    }
}

#[async_trait]
impl CalendarSource for CsvCalendarSource {
    async fn fetch_news_rows(&self) -> Result<Vec<RawNewsRow>> {
        let path = self.news_path.clone();
        tokio::task::spawn_blocking(move || read_news_rows(&path))
            .await
            .context("join calendar fetch")?
    }
}

fn read_stat_rows(path: &Path) -> Result<Vec<RawStatRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open stats file: {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("read stats row")?;
        if record.len() < 2 {
            tracing::warn!(path = %path.display(), "skipping short stats row");
            continue;
        }
        rows.push(RawStatRow {
            label: record[0].to_string(),
            winrate: record[1].to_string(),
        });
    }
    Ok(rows)
}

fn read_news_rows(path: &Path) -> Result<Vec<RawNewsRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open news file: {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("read news row")?;
        if record.len() < 3 {
            tracing::warn!(path = %path.display(), "skipping short news row");
            continue;
        }
        rows.push(RawNewsRow {
            time: record[0].to_string(),
            currency: record[1].to_string(),
            impact: record[2].to_string(),
            text: record.get(3).unwrap_or("").to_string(),
        });
    }
    Ok(rows)
}

/// The news file may simply not exist yet on a fresh install; scoring
/// then sees an empty calendar rather than a failed snapshot.
fn read_news_rows_or_empty(path: &Path) -> Vec<RawNewsRow> {
    if !path.exists() {
        return Vec::new();
    }
    match read_news_rows(path) {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(%err, "news file unreadable; continuing with an empty calendar");
            Vec::new()
        }
    }
}

/// Single-line date file gating the at-most-daily calendar refresh.
#[derive(Debug, Clone)]
pub struct FileRefreshState {
    path: PathBuf,
}

impl FileRefreshState {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RefreshStateStore for FileRefreshState {
    async fn last_refresh_date(&self) -> Result<Option<NaiveDate>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read refresh marker: {}", self.path.display()))?;
        let trimmed = raw.trim();
        match NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
            Ok(date) => Ok(Some(date)),
            Err(_) => {
                tracing::warn!(content = trimmed, "unreadable refresh marker; treating as never refreshed");
                Ok(None)
            }
        }
    }

    async fn set_last_refresh_date(&self, date: NaiveDate) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("create refresh marker dir")?;
            }
        }
        tokio::fs::write(&self.path, date.format(DATE_FORMAT).to_string())
            .await
            .with_context(|| format!("write refresh marker: {}", self.path.display()))
    }
}

/// Default delivery: structured log lines. Anything fancier (bot message,
/// webhook) plugs in behind the same trait.
#[derive(Debug, Clone, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, note: &ScoreNotification) -> Result<()> {
        let nearest_past = note
            .result
            .nearest_past
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        let nearest_future = note
            .result
            .nearest_future
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        tracing::info!(
            asset = %note.asset,
            time = %note.time,
            tier = %note.result.tier,
            score = note.result.score,
            criteria = %note.result.applied_criteria.join("; "),
            %nearest_past,
            %nearest_future,
            "scored signal"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            ts: Utc.with_ymd_and_hms(2024, 3, 8, 16, 1, 0).unwrap() + chrono::Duration::seconds(id),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn recent_messages_are_newest_first_and_limited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chat.jsonl");
        let lines: Vec<String> = (0..5)
            .map(|i| serde_json::to_string(&msg(i, &format!("m{i}"))).expect("encode"))
            .collect();
        std::fs::write(&path, format!("{}\nnot json\n", lines.join("\n"))).expect("write");

        let feed = JsonlChatFeed::new(path);
        let recent = feed.recent_messages(3).await.expect("read");
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text, "m4");
        assert_eq!(recent[2].text, "m2");
    }

    #[tokio::test]
    async fn stream_preserves_file_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chat.jsonl");
        let lines: Vec<String> = (0..3)
            .map(|i| serde_json::to_string(&msg(i, &format!("m{i}"))).expect("encode"))
            .collect();
        std::fs::write(&path, lines.join("\n")).expect("write");

        let feed = JsonlChatFeed::new(path);
        let mut stream = feed.stream_messages().await.expect("stream");
        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(item.expect("message").text);
        }
        assert_eq!(seen, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn stats_source_reads_raw_cells() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assets = dir.path().join("assets.csv");
        let slots = dir.path().join("slots.csv");
        let news = dir.path().join("news.csv");
        std::fs::write(&assets, "EURUSD-OTC,91%\nGBPUSD,62%\n").expect("write");
        std::fs::write(&slots, "16:00,85%\n").expect("write");
        std::fs::write(&news, "14:30,USD,3,Nonfarm Payrolls\n").expect("write");

        let snapshot = CsvStatsSource::new(assets, slots, news)
            .fetch()
            .await
            .expect("fetch");
        assert_eq!(snapshot.asset_rows.len(), 2);
        assert_eq!(snapshot.asset_rows[0].winrate, "91%");
        assert_eq!(snapshot.slot_rows[0].label, "16:00");
        assert_eq!(snapshot.news_rows[0].impact, "3");
    }

    #[tokio::test]
    async fn missing_news_file_is_an_empty_calendar_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assets = dir.path().join("assets.csv");
        let slots = dir.path().join("slots.csv");
        std::fs::write(&assets, "EURUSD,90%\n").expect("write");
        std::fs::write(&slots, "16:00,85%\n").expect("write");

        let snapshot = CsvStatsSource::new(assets, slots, dir.path().join("missing.csv"))
            .fetch()
            .await
            .expect("fetch");
        assert!(snapshot.news_rows.is_empty());
    }

    #[tokio::test]
    async fn refresh_marker_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = FileRefreshState::new(dir.path().join("marker"));
        assert_eq!(state.last_refresh_date().await.expect("read"), None);

        let today = NaiveDate::from_ymd_opt(2024, 3, 8).expect("valid date");
        state.set_last_refresh_date(today).await.expect("write");
        assert_eq!(state.last_refresh_date().await.expect("read"), Some(today));
    }
}
