use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use reconciler::{ReconcilerConfig, RetentionConfig};
use scoring_engine::ScoringConfig;
use serde::{Deserialize, Serialize};
use signal_parser::ParserConfig;

/// One explicit, validated configuration structure: every component
/// receives its slice at construction. A missing file or missing section
/// falls back to defaults; a present-but-invalid value refuses to start.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub parser: ParserConfig,
    pub scoring: ScoringConfig,
    pub collect: CollectSection,
    pub reconcile: ReconcilerConfig,
    pub retention: RetentionConfig,
    pub paths: PathsSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectSection {
    /// How many recent chat messages one reconciliation pass scans.
    pub message_limit: usize,
    /// Delay between a live entry and the follow-up collection pass.
    pub post_signal_collect_delay_secs: u64,
    /// Skip messages dated Saturday/Sunday.
    pub skip_weekends: bool,
    /// Local-time offset of the chat source, in hours from UTC.
    pub utc_offset_hours: i32,
    /// Score with neutral classifications when the stats collaborator is
    /// down, instead of failing the call.
    pub allow_partial_snapshot: bool,
}

impl Default for CollectSection {
    fn default() -> Self {
        Self {
            message_limit: 1_000,
            post_signal_collect_delay_secs: 360,
            skip_weekends: true,
            utc_offset_hours: 0,
            allow_partial_snapshot: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsSection {
    pub log_file: PathBuf,
    pub chat_replay_file: PathBuf,
    pub asset_stats_file: PathBuf,
    pub slot_stats_file: PathBuf,
    pub news_file: PathBuf,
    pub refresh_marker_file: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("data/signals.csv"),
            chat_replay_file: PathBuf::from("data/chat.jsonl"),
            asset_stats_file: PathBuf::from("data/asset_stats.csv"),
            slot_stats_file: PathBuf::from("data/slot_stats.csv"),
            news_file: PathBuf::from("data/news.csv"),
            refresh_marker_file: PathBuf::from("data/last_calendar_refresh"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub log_dir: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.scoring.validate()?;
        self.reconcile.validate()?;
        self.retention.validate()?;
        if self.collect.message_limit == 0 {
            return Err("collect.message_limit must be at least 1".to_string());
        }
        if self.collect.utc_offset_hours.abs() > 14 {
            return Err(format!(
                "collect.utc_offset_hours must be within -14..=14, got {}",
                self.collect.utc_offset_hours
            ));
        }
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    std::env::var("SIGNAL_ENGINE_CONFIG_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("configs/engine.toml"))
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        toml::from_str::<EngineConfig>(&raw)
            .with_context(|| format!("parse config file: {}", path.display()))?
    } else {
        EngineConfig::default()
    };
    cfg.validate().map_err(|reason| anyhow!("invalid config: {reason}"))?;
    Ok(cfg)
}
