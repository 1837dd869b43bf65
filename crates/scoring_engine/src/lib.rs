use chrono::NaiveTime;
use core_types::{
    parse_time_of_day, EngineError, RawStatsSnapshot, RecommendationTier, ScoreResult,
};
use news_matcher::{NewsMatcher, NewsWindows};
use serde::{Deserialize, Serialize};
use stats_index::{SlotGranularity, StatsIndex, StatsThresholds};

/// Which bonus rule is tried first. The two drafts of the upstream logic
/// disagree; at most one bonus ever applies either way.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BonusPrecedence {
    #[default]
    TimeNewsFirst,
    TimeAssetFirst,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub thresholds: StatsThresholds,
    pub slot_granularity: SlotGranularity,
    /// Qualifying events below this impact are displayed but not penalized.
    pub min_penalizable_news_impact: u8,
    pub bonus_precedence: BonusPrecedence,
    pub news_windows: NewsWindows,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.thresholds.validate()?;
        if self.min_penalizable_news_impact > 3 {
            return Err(format!(
                "min_penalizable_news_impact must be 0..=3, got {}",
                self.min_penalizable_news_impact
            ));
        }
        Ok(())
    }
}

/// Scores one (asset, time) pair against the current stats/news snapshot.
/// Pure: the same snapshot and inputs always produce the same result.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    cfg: ScoringConfig,
    matcher: NewsMatcher,
}

impl ScoringEngine {
    pub fn new(cfg: ScoringConfig) -> Self {
        let matcher = NewsMatcher::new(cfg.news_windows.clone());
        Self { cfg, matcher }
    }

    /// `time` accepts `HH:MM` or `HH:MM:SS`; anything else is an input
    /// error for this call only.
    pub fn score(
        &self,
        asset: &str,
        time: &str,
        snapshot: &RawStatsSnapshot,
    ) -> Result<ScoreResult, EngineError> {
        let time = parse_time_of_day(time).ok_or_else(|| EngineError::InvalidTime(time.to_string()))?;
        Ok(self.score_at(asset, time, snapshot))
    }

    /// Fixed evaluation order: asset, time slot, news, then at most one
    /// bonus. Missing stats classify as neutral, never as an error.
    pub fn score_at(&self, asset: &str, time: NaiveTime, snapshot: &RawStatsSnapshot) -> ScoreResult {
        let index = StatsIndex::build(snapshot, &self.cfg.thresholds);
        let mut score = 0i32;
        let mut criteria: Vec<String> = Vec::with_capacity(4);

        let asset_good = index.is_best_asset(asset);
        let asset_bad = !asset_good && index.is_worst_asset(asset);
        if asset_good {
            score += 1;
            criteria.push("asset: good".to_string());
        } else if asset_bad {
            score -= 1;
            criteria.push("asset: bad".to_string());
        } else {
            criteria.push("asset: neutral".to_string());
        }

        let slot = self.cfg.slot_granularity.slot_key(time);
        let time_good = !index.is_bad_slot(&slot);
        if time_good {
            criteria.push("time: good".to_string());
        } else {
            score -= 1;
            criteria.push("time: bad".to_string());
        }

        let proximity = self.matcher.match_events(time, &snapshot.news_rows);
        let news_clear = proximity
            .qualifying_impact_event
            .as_ref()
            .map_or(true, |event| event.impact < self.cfg.min_penalizable_news_impact);
        if news_clear {
            criteria.push("news: clear".to_string());
        } else {
            score -= 1;
            criteria.push("news: high-impact nearby".to_string());
        }

        let time_no_news = time_good && news_clear;
        let time_and_asset = asset_good && time_good;
        let bonus = match self.cfg.bonus_precedence {
            BonusPrecedence::TimeNewsFirst => {
                if time_no_news {
                    Some("bonus: good-time+no-news")
                } else if time_and_asset {
                    Some("bonus: good-time+good-asset")
                } else {
                    None
                }
            }
            BonusPrecedence::TimeAssetFirst => {
                if time_and_asset {
                    Some("bonus: good-time+good-asset")
                } else if time_no_news {
                    Some("bonus: good-time+no-news")
                } else {
                    None
                }
            }
        };
        if let Some(label) = bonus {
            score += 1;
            criteria.push(label.to_string());
        }

        let tier = tier_for(score);
        tracing::debug!(asset, %time, score, %tier, "scored opportunity");

        ScoreResult {
            score,
            applied_criteria: criteria,
            tier,
            nearest_past: proximity.nearest_past,
            nearest_future: proximity.nearest_future,
            qualifying_impact_event: proximity.qualifying_impact_event,
        }
    }
}

fn tier_for(score: i32) -> RecommendationTier {
    if score > 1 {
        RecommendationTier::StronglyRecommended
    } else if score == 1 {
        RecommendationTier::Recommended
    } else if score == 0 {
        RecommendationTier::Moderate
    } else {
        RecommendationTier::NotRecommended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{RawNewsRow, RawStatRow};

    fn stat(label: &str, winrate: &str) -> RawStatRow {
        RawStatRow {
            label: label.to_string(),
            winrate: winrate.to_string(),
        }
    }

    fn news(time: &str, impact: &str, text: &str) -> RawNewsRow {
        RawNewsRow {
            time: time.to_string(),
            currency: "USD".to_string(),
            impact: impact.to_string(),
            text: text.to_string(),
        }
    }

    fn snapshot() -> RawStatsSnapshot {
        RawStatsSnapshot {
            asset_rows: vec![stat("EURUSD-OTC", "91%"), stat("GBPUSD", "62%")],
            slot_rows: vec![stat("16:00", "85%"), stat("11:00", "78%")],
            news_rows: Vec::new(),
        }
    }

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringConfig::default())
    }

    #[test]
    fn best_asset_good_time_no_news_scores_two() {
        let result = engine()
            .score("EURUSD-OTC", "16:00", &snapshot())
            .expect("valid time");
        assert_eq!(result.score, 2);
        assert_eq!(result.tier, RecommendationTier::StronglyRecommended);
        assert_eq!(
            result.applied_criteria,
            vec![
                "asset: good",
                "time: good",
                "news: clear",
                "bonus: good-time+no-news",
            ]
        );
    }

    #[test]
    fn triple_negative_scores_minus_three() {
        let mut snap = snapshot();
        snap.news_rows.push(news("11:45", "3", "rate decision"));
        let result = engine().score("GBPUSD", "11:00", &snap).expect("valid time");
        // Worst asset, bad slot, impact-3 event 45 minutes out: inside
        // its 60-minute window.
        assert_eq!(result.score, -3);
        assert_eq!(result.tier, RecommendationTier::NotRecommended);
        assert_eq!(
            result.applied_criteria,
            vec!["asset: bad", "time: bad", "news: high-impact nearby"]
        );
        assert!(result.qualifying_impact_event.is_some());
    }

    #[test]
    fn sub_penalizable_impact_is_displayed_not_penalized() {
        let mut snap = snapshot();
        snap.news_rows.push(news("16:05", "1", "minor print"));
        let result = engine()
            .score("EURUSD-OTC", "16:00", &snap)
            .expect("valid time");
        // Impact 1 qualifies within its 10-minute window but sits below
        // the default penalizable minimum of 2.
        assert_eq!(result.qualifying_impact_event.as_ref().map(|e| e.impact), Some(1));
        assert!(result.applied_criteria.contains(&"news: clear".to_string()));
        assert_eq!(result.score, 2);
    }

    #[test]
    fn lower_penalizable_minimum_flips_the_news_criterion() {
        let cfg = ScoringConfig {
            min_penalizable_news_impact: 1,
            ..ScoringConfig::default()
        };
        let mut snap = snapshot();
        snap.news_rows.push(news("16:05", "1", "minor print"));
        let result = ScoringEngine::new(cfg)
            .score("EURUSD-OTC", "16:00", &snap)
            .expect("valid time");
        // +1 asset, -1 news, +1 bonus (good time + good asset).
        assert_eq!(result.score, 1);
        assert!(result
            .applied_criteria
            .contains(&"news: high-impact nearby".to_string()));
        assert!(result
            .applied_criteria
            .contains(&"bonus: good-time+good-asset".to_string()));
    }

    #[test]
    fn bonus_precedence_is_configurable() {
        let cfg = ScoringConfig {
            bonus_precedence: BonusPrecedence::TimeAssetFirst,
            ..ScoringConfig::default()
        };
        let result = ScoringEngine::new(cfg)
            .score("EURUSD-OTC", "16:00", &snapshot())
            .expect("valid time");
        assert!(result
            .applied_criteria
            .contains(&"bonus: good-time+good-asset".to_string()));
    }

    #[test]
    fn missing_stats_classify_neutral() {
        let empty = RawStatsSnapshot::default();
        let result = engine().score("XAUUSD", "03:30", &empty).expect("valid time");
        assert_eq!(result.score, 1);
        assert_eq!(result.tier, RecommendationTier::Recommended);
        assert_eq!(
            result.applied_criteria,
            vec![
                "asset: neutral",
                "time: good",
                "news: clear",
                "bonus: good-time+no-news",
            ]
        );
    }

    #[test]
    fn hour_bucketing_matches_top_of_hour_slot() {
        let cfg = ScoringConfig {
            slot_granularity: SlotGranularity::Hour,
            ..ScoringConfig::default()
        };
        let result = ScoringEngine::new(cfg)
            .score("EURUSD-OTC", "11:37:15", &snapshot())
            .expect("valid time");
        assert!(result.applied_criteria.contains(&"time: bad".to_string()));
    }

    #[test]
    fn unparseable_time_is_an_input_error() {
        let err = engine().score("EURUSD-OTC", "quarter past", &snapshot());
        assert!(matches!(err, Err(EngineError::InvalidTime(_))));
    }

    #[test]
    fn score_is_deterministic_for_a_fixed_snapshot() {
        let mut snap = snapshot();
        snap.news_rows.push(news("15:40", "2", "pmi"));
        let engine = engine();
        let first = engine.score("EURUSD-OTC", "16:00", &snap).expect("valid time");
        let second = engine.score("EURUSD-OTC", "16:00", &snap).expect("valid time");
        assert_eq!(first, second);
    }

    #[test]
    fn nearest_events_attached_even_when_not_scoring() {
        let mut snap = snapshot();
        snap.news_rows.push(news("14:00", "0", "speech"));
        snap.news_rows.push(news("19:00", "0", "minutes"));
        let result = engine()
            .score("EURUSD-OTC", "16:00", &snap)
            .expect("valid time");
        assert_eq!(result.nearest_past.expect("past").text, "speech");
        assert_eq!(result.nearest_future.expect("future").text, "minutes");
        assert!(result.qualifying_impact_event.is_none());
    }
}
