use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use core_types::{
    CalendarSource, ChatFeed, ChatMessage, EngineError, NotificationSink, ParsedMessage,
    PassReport, RawNewsRow, RawStatsSnapshot, RefreshStateStore, ScoreNotification, Signal,
    SignalStore, StatsSource,
};
use reconciler::{RetentionPruner, SignalReconciler};
use scoring_engine::ScoringEngine;
use signal_parser::SignalParser;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;

use crate::bus::{EngineEvent, EventBus};
use crate::config_loader::{CollectSection, EngineConfig};

/// External collaborators, all behind traits so transports stay pluggable.
pub struct Collaborators {
    pub chat: Arc<dyn ChatFeed>,
    pub store: Arc<dyn SignalStore>,
    pub stats: Arc<dyn StatsSource>,
    pub calendar: Arc<dyn CalendarSource>,
    pub notifier: Arc<dyn NotificationSink>,
    pub refresh_state: Arc<dyn RefreshStateStore>,
}

/// The cooperative loop: chat intake, immediate scoring of live entries,
/// serialized reconciliation passes, at-most-daily calendar refresh.
///
/// Passes never overlap: they run inline in the loop, one at a time,
/// each against a single snapshot read of the canonical log.
pub struct Engine {
    collect: CollectSection,
    parser: SignalParser,
    scorer: ScoringEngine,
    reconciler: SignalReconciler,
    pruner: RetentionPruner,
    chat: Arc<dyn ChatFeed>,
    store: Arc<dyn SignalStore>,
    stats: Arc<dyn StatsSource>,
    calendar: Arc<dyn CalendarSource>,
    notifier: Arc<dyn NotificationSink>,
    refresh_state: Arc<dyn RefreshStateStore>,
    /// Latest calendar fetch; replaces the news half of every snapshot.
    news_cache: RwLock<Option<Vec<RawNewsRow>>>,
}

impl Engine {
    pub fn new(cfg: &EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            collect: cfg.collect.clone(),
            parser: SignalParser::new(cfg.parser.clone()),
            scorer: ScoringEngine::new(cfg.scoring.clone()),
            reconciler: SignalReconciler::new(cfg.reconcile.clone()),
            pruner: RetentionPruner::new(cfg.retention.clone()),
            chat: collaborators.chat,
            store: collaborators.store,
            stats: collaborators.stats,
            calendar: collaborators.calendar,
            notifier: collaborators.notifier,
            refresh_state: collaborators.refresh_state,
            news_cache: RwLock::new(None),
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.collect.utc_offset_hours * 3_600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"))
    }

    /// Startup work plus the intake loop. Runs until the bus closes.
    pub async fn run(&self, bus: EventBus) -> anyhow::Result<()> {
        self.refresh_calendar_if_stale().await;
        if let Err(err) = self.run_pass().await {
            tracing::warn!(%err, "initial reconciliation pass failed");
        }
        tracing::info!("listening for chat messages");

        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(EngineEvent::Chat(msg)) => self.on_chat_message(&msg, &bus).await,
                Ok(EngineEvent::CollectRequest) => {
                    if let Err(err) = self.run_pass().await {
                        tracing::warn!(%err, "reconciliation pass failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "engine loop lagged behind chat intake");
                }
                Err(RecvError::Closed) => break,
            }
        }
        Ok(())
    }

    async fn on_chat_message(&self, msg: &ChatMessage, bus: &EventBus) {
        let Some(parsed) = self.parser.parse(&msg.text) else {
            tracing::debug!(id = msg.id, "chat message is not a signal");
            return;
        };
        if !parsed.is_live_entry() {
            // Result messages are picked up by the next collection pass.
            return;
        }

        tracing::info!(asset = %parsed.asset(), time = %parsed.time(), "live entry detected");
        if let Err(err) = self.score_and_notify(&parsed).await {
            tracing::warn!(%err, "scoring failed for live entry");
        }

        let bus = bus.clone();
        let delay = Duration::from_secs(self.collect.post_signal_collect_delay_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if bus.publish(EngineEvent::CollectRequest).is_err() {
                tracing::warn!("deferred collection request found the bus closed");
            }
        });
    }

    async fn score_and_notify(&self, parsed: &ParsedMessage) -> Result<(), EngineError> {
        let snapshot = self.fetch_snapshot().await?;
        let result = self
            .scorer
            .score_at(parsed.asset(), parsed.time(), &snapshot);
        let note = ScoreNotification {
            asset: parsed.asset().clone(),
            time: parsed.time(),
            result,
        };
        // Fire-and-forget: delivery failure is the sink's concern.
        if let Err(err) = self.notifier.notify(&note).await {
            tracing::warn!(%err, "notification delivery failed");
        }
        Ok(())
    }

    async fn fetch_snapshot(&self) -> Result<RawStatsSnapshot, EngineError> {
        let mut snapshot = match self.stats.fetch().await {
            Ok(snapshot) => snapshot,
            Err(err) if self.collect.allow_partial_snapshot => {
                tracing::warn!(%err, "stats snapshot unavailable; classifications degrade to neutral");
                RawStatsSnapshot::default()
            }
            Err(err) => return Err(EngineError::SnapshotUnavailable(err.to_string())),
        };
        if let Some(rows) = self.news_cache.read().await.as_ref() {
            snapshot.news_rows = rows.clone();
        }
        Ok(snapshot)
    }

    /// One reconciliation pass: collect, parse, plan against a single
    /// log snapshot, apply, prune, then the daily calendar check.
    pub async fn run_pass(&self) -> Result<PassReport, EngineError> {
        let messages = self.chat.recent_messages(self.collect.message_limit).await?;
        let candidates = build_candidates(
            &self.parser,
            &messages,
            self.offset(),
            self.collect.skip_weekends,
        );

        let log_rows = self.store.read_all().await?;
        let plan = self.reconciler.plan(&candidates, &log_rows);
        let report = self.reconciler.apply(&plan, self.store.as_ref()).await?;
        let pruned = self.pruner.prune(self.store.as_ref()).await?;

        tracing::info!(
            messages = messages.len(),
            candidates = report.candidates,
            updates = report.updates_applied,
            appended = report.appended,
            skipped = report.skipped,
            pruned = pruned.dropped,
            "reconciliation pass complete"
        );

        self.refresh_calendar_if_stale().await;
        Ok(report)
    }

    /// Refreshes the news cache from the calendar collaborator at most
    /// once per source-local day. Failures keep the previous snapshot.
    async fn refresh_calendar_if_stale(&self) {
        let today = Utc::now().with_timezone(&self.offset()).date_naive();
        match self.refresh_state.last_refresh_date().await {
            Ok(Some(date)) if date == today => {
                tracing::debug!(%today, "calendar already refreshed today");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(%err, "cannot read calendar refresh marker; refreshing anyway");
            }
        }

        match self.calendar.fetch_news_rows().await {
            Ok(rows) => {
                tracing::info!(events = rows.len(), "calendar refreshed");
                *self.news_cache.write().await = Some(rows);
                if let Err(err) = self.refresh_state.set_last_refresh_date(today).await {
                    tracing::warn!(%err, "could not persist calendar refresh marker");
                }
            }
            Err(err) => {
                tracing::warn!(%err, "calendar refresh failed; keeping previous events");
            }
        }
    }
}

/// Bind a parsed message to its trading date. A live entry announces an
/// upcoming time, so it belongs to the message's own day. A result
/// message can land just after midnight for a trade entered before it:
/// when the announced time-of-day is later than the message's own, the
/// signal belongs to the previous day.
pub fn assign_date(local_ts: DateTime<FixedOffset>, parsed: &ParsedMessage) -> NaiveDate {
    let date = local_ts.date_naive();
    match parsed {
        ParsedMessage::LiveEntry { .. } => date,
        ParsedMessage::FinalResult { time, .. } => {
            if *time > local_ts.time() {
                date.pred_opt().unwrap_or(date)
            } else {
                date
            }
        }
    }
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Parse a message batch into dated candidates. Dedup is not done here:
/// the reconciler owns it, keyed on (date, time).
pub fn build_candidates(
    parser: &SignalParser,
    messages: &[ChatMessage],
    offset: FixedOffset,
    skip_weekends: bool,
) -> Vec<Signal> {
    let mut candidates = Vec::new();
    for msg in messages {
        let local = msg.ts.with_timezone(&offset);
        if skip_weekends && !is_trading_day(local.date_naive()) {
            continue;
        }
        let Some(parsed) = parser.parse(&msg.text) else {
            continue;
        };
        let date = assign_date(local, &parsed);
        candidates.push(parsed.into_signal(date));
    }
    candidates
}
