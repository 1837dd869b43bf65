use std::collections::{HashMap, HashSet};

use chrono::NaiveTime;
use core_types::RawStatsSnapshot;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Classification thresholds for the derived best/worst/bad sets.
/// Winrates are 0..1. Defaults follow the newest observed draft; the
/// system owner can pin different values in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatsThresholds {
    pub best_asset_min_winrate: f64,
    pub worst_asset_max_winrate: f64,
    pub bad_time_slot_max_winrate: f64,
}

impl Default for StatsThresholds {
    fn default() -> Self {
        Self {
            best_asset_min_winrate: 0.85,
            worst_asset_max_winrate: 0.70,
            bad_time_slot_max_winrate: 0.81,
        }
    }
}

impl StatsThresholds {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("best_asset_min_winrate", self.best_asset_min_winrate),
            ("worst_asset_max_winrate", self.worst_asset_max_winrate),
            ("bad_time_slot_max_winrate", self.bad_time_slot_max_winrate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within 0..1, got {value}"));
            }
        }
        if self.worst_asset_max_winrate >= self.best_asset_min_winrate {
            return Err(format!(
                "worst_asset_max_winrate {} must be below best_asset_min_winrate {}",
                self.worst_asset_max_winrate, self.best_asset_min_winrate
            ));
        }
        Ok(())
    }
}

/// How a signal time maps onto a time-slot key when looking up slot
/// winrates: exact minute, or bucketed to the top of the hour.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotGranularity {
    #[default]
    Exact,
    Hour,
}

impl SlotGranularity {
    pub fn slot_key(self, time: NaiveTime) -> String {
        match self {
            Self::Exact => time.format("%H:%M").to_string(),
            Self::Hour => time.format("%H:00").to_string(),
        }
    }
}

/// Read-only snapshot of historical winrates plus the derived
/// classification sets. Built once per scoring call; never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsIndex {
    asset_winrates: HashMap<SmolStr, f64>,
    slot_winrates: HashMap<String, f64>,
    best_assets: HashSet<SmolStr>,
    worst_assets: HashSet<SmolStr>,
    bad_time_slots: HashSet<String>,
}

impl StatsIndex {
    pub fn build(snapshot: &RawStatsSnapshot, thresholds: &StatsThresholds) -> Self {
        let mut index = Self::default();

        for row in &snapshot.asset_rows {
            let asset = SmolStr::new(row.label.trim().to_ascii_uppercase());
            if asset.is_empty() {
                continue;
            }
            let Some(winrate) = parse_winrate_cell(&row.winrate) else {
                tracing::warn!(asset = %asset, cell = %row.winrate, "dropping asset stat row with unreadable winrate");
                continue;
            };
            if winrate >= thresholds.best_asset_min_winrate {
                index.best_assets.insert(asset.clone());
            } else if winrate <= thresholds.worst_asset_max_winrate {
                index.worst_assets.insert(asset.clone());
            }
            index.asset_winrates.insert(asset, winrate);
        }

        for row in &snapshot.slot_rows {
            let slot = row.label.trim().to_string();
            if slot.is_empty() {
                continue;
            }
            let Some(winrate) = parse_winrate_cell(&row.winrate) else {
                tracing::warn!(slot = %slot, cell = %row.winrate, "dropping slot stat row with unreadable winrate");
                continue;
            };
            if winrate < thresholds.bad_time_slot_max_winrate {
                index.bad_time_slots.insert(slot.clone());
            }
            index.slot_winrates.insert(slot, winrate);
        }

        index
    }

    pub fn asset_winrate(&self, asset: &str) -> Option<f64> {
        self.asset_winrates
            .get(asset.trim().to_ascii_uppercase().as_str())
            .copied()
    }

    pub fn slot_winrate(&self, slot: &str) -> Option<f64> {
        self.slot_winrates.get(slot).copied()
    }

    pub fn is_best_asset(&self, asset: &str) -> bool {
        self.best_assets
            .contains(asset.trim().to_ascii_uppercase().as_str())
    }

    pub fn is_worst_asset(&self, asset: &str) -> bool {
        self.worst_assets
            .contains(asset.trim().to_ascii_uppercase().as_str())
    }

    pub fn is_bad_slot(&self, slot: &str) -> bool {
        self.bad_time_slots.contains(slot)
    }

    pub fn tracked_assets(&self) -> usize {
        self.asset_winrates.len()
    }

    pub fn tracked_slots(&self) -> usize {
        self.slot_winrates.len()
    }
}

/// Parse a percent-valued winrate cell: strip `%`, normalize the decimal
/// comma, divide by 100. `"85%"` and `"79,5"` both decode; anything
/// non-numeric is `None` so the caller can drop the row.
pub fn parse_winrate_cell(cell: &str) -> Option<f64> {
    let cleaned = cell.replace('%', "").replace(',', ".");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    let value = cleaned.parse::<f64>().ok()?;
    Some((value / 100.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::RawStatRow;

    fn stat(label: &str, winrate: &str) -> RawStatRow {
        RawStatRow {
            label: label.to_string(),
            winrate: winrate.to_string(),
        }
    }

    fn snapshot() -> RawStatsSnapshot {
        RawStatsSnapshot {
            asset_rows: vec![
                stat("EURUSD-OTC", "91%"),
                stat("gbpusd", "62,5%"),
                stat("AUDCAD", "78"),
                stat("BROKEN", "n/a"),
            ],
            slot_rows: vec![
                stat("16:00", "85%"),
                stat("11:00", "79,5%"),
                stat("09:00", "80%"),
                stat("13:00", "oops"),
            ],
            news_rows: Vec::new(),
        }
    }

    #[test]
    fn builds_classification_sets() {
        let index = StatsIndex::build(&snapshot(), &StatsThresholds::default());
        assert!(index.is_best_asset("eurusd-otc"));
        assert!(index.is_worst_asset("GBPUSD"));
        assert!(!index.is_best_asset("AUDCAD"));
        assert!(!index.is_worst_asset("AUDCAD"));
        assert!(index.is_bad_slot("11:00"));
        assert!(index.is_bad_slot("09:00"));
        assert!(!index.is_bad_slot("16:00"));
    }

    #[test]
    fn unreadable_cells_drop_rows_not_snapshot() {
        let index = StatsIndex::build(&snapshot(), &StatsThresholds::default());
        assert_eq!(index.tracked_assets(), 3);
        assert_eq!(index.tracked_slots(), 3);
        assert_eq!(index.asset_winrate("BROKEN"), None);
        assert_eq!(index.asset_winrate("eurusd-otc"), Some(0.91));
        assert_eq!(index.slot_winrate("16:00"), Some(0.85));
        assert!(!index.is_bad_slot("13:00"));
    }

    #[test]
    fn winrate_cell_formats() {
        assert_eq!(parse_winrate_cell("85%"), Some(0.85));
        assert_eq!(parse_winrate_cell("79,5"), Some(0.795));
        assert_eq!(parse_winrate_cell(" 100 % "), Some(1.0));
        assert_eq!(parse_winrate_cell(""), None);
        assert_eq!(parse_winrate_cell("n/a"), None);
    }

    #[test]
    fn bad_slot_threshold_is_strict() {
        let thresholds = StatsThresholds {
            bad_time_slot_max_winrate: 0.81,
            ..StatsThresholds::default()
        };
        let snap = RawStatsSnapshot {
            slot_rows: vec![stat("10:00", "81%"), stat("12:00", "80,9%")],
            ..RawStatsSnapshot::default()
        };
        let index = StatsIndex::build(&snap, &thresholds);
        assert!(!index.is_bad_slot("10:00"));
        assert!(index.is_bad_slot("12:00"));
    }

    #[test]
    fn slot_keys_by_granularity() {
        let time = NaiveTime::from_hms_opt(16, 37, 12).expect("valid time");
        assert_eq!(SlotGranularity::Exact.slot_key(time), "16:37");
        assert_eq!(SlotGranularity::Hour.slot_key(time), "16:00");
    }

    #[test]
    fn threshold_validation() {
        assert!(StatsThresholds::default().validate().is_ok());
        let inverted = StatsThresholds {
            best_asset_min_winrate: 0.60,
            worst_asset_max_winrate: 0.70,
            ..StatsThresholds::default()
        };
        assert!(inverted.validate().is_err());
        let out_of_range = StatsThresholds {
            bad_time_slot_max_winrate: 81.0,
            ..StatsThresholds::default()
        };
        assert!(out_of_range.validate().is_err());
    }
}
