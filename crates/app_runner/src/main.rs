use std::sync::Arc;

use anyhow::{Context, Result};
use core_types::ChatFeed;
use futures::StreamExt;

mod bindings;
mod bus;
mod config_loader;
mod engine_loop;
mod logging;
mod stores;

use bindings::{
    CsvCalendarSource, CsvStatsSource, FileRefreshState, JsonlChatFeed, TracingNotificationSink,
};
use bus::{EngineEvent, EventBus};
use engine_loop::{Collaborators, Engine};
use stores::CsvSignalStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg_path = config_loader::config_path();
    let cfg = config_loader::load_config(&cfg_path)
        .with_context(|| format!("load config: {}", cfg_path.display()))?;
    let _guard = logging::init_tracing(&cfg.logging)?;
    tracing::info!(config = %cfg_path.display(), "signal engine starting");

    let store = Arc::new(CsvSignalStore::new(cfg.paths.log_file.clone()));
    store.ensure_initialized().await?;

    let chat: Arc<dyn ChatFeed> = Arc::new(JsonlChatFeed::new(cfg.paths.chat_replay_file.clone()));
    let collaborators = Collaborators {
        chat: chat.clone(),
        store,
        stats: Arc::new(CsvStatsSource::new(
            cfg.paths.asset_stats_file.clone(),
            cfg.paths.slot_stats_file.clone(),
            cfg.paths.news_file.clone(),
        )),
        calendar: Arc::new(CsvCalendarSource::new(cfg.paths.news_file.clone())),
        notifier: Arc::new(TracingNotificationSink),
        refresh_state: Arc::new(FileRefreshState::new(cfg.paths.refresh_marker_file.clone())),
    };

    let bus = EventBus::new(16_384);
    spawn_chat_feed(bus.clone(), chat);

    let engine = Engine::new(&cfg, collaborators);
    engine.run(bus).await
}

fn spawn_chat_feed(bus: EventBus, chat: Arc<dyn ChatFeed>) {
    tokio::spawn(async move {
        let Ok(mut stream) = chat.stream_messages().await else {
            tracing::error!("chat feed failed to start");
            return;
        };
        while let Some(item) = stream.next().await {
            match item {
                Ok(msg) => {
                    let _ = bus.publish(EngineEvent::Chat(msg));
                }
                Err(err) => {
                    tracing::warn!(?err, "chat feed event error");
                }
            }
        }
        tracing::info!("chat feed drained");
    });
}
